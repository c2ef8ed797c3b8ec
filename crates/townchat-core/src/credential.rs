//! Credential sources
//!
//! A session never looks credentials up on its own. The host resolves one from a
//! source when it creates the session and passes it in explicitly.

use std::path::PathBuf;

use crate::errors::ConfigError;
use crate::types::Credential;

/// Somewhere an access token can be read from
pub trait CredentialSource: Send + Sync {
    /// Current token, if one is stored
    fn access_token(&self) -> Result<Option<Credential>, ConfigError>;
}

/// A token fixed at construction
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(Option<Credential>);

impl StaticCredential {
    pub fn new(credential: Option<Credential>) -> Self {
        Self(credential)
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self(Credential::new(token))
    }
}

impl CredentialSource for StaticCredential {
    fn access_token(&self) -> Result<Option<Credential>, ConfigError> {
        Ok(self.0.clone())
    }
}

/// A token read from an environment variable
#[derive(Debug, Clone)]
pub struct EnvCredential {
    variable: String,
}

impl EnvCredential {
    pub const DEFAULT_VARIABLE: &'static str = "TOWNCHAT_ACCESS_TOKEN";

    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }
}

impl Default for EnvCredential {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VARIABLE)
    }
}

impl CredentialSource for EnvCredential {
    fn access_token(&self) -> Result<Option<Credential>, ConfigError> {
        Ok(std::env::var(&self.variable).ok().and_then(Credential::new))
    }
}

/// A token stored as the trimmed contents of a file
///
/// A missing file means "no token", not an error.
#[derive(Debug, Clone)]
pub struct FileCredential {
    path: PathBuf,
}

impl FileCredential {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialSource for FileCredential {
    fn access_token(&self) -> Result<Option<Credential>, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Credential::new(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ConfigError::CredentialRead {
                path: self.path.display().to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credential() {
        let source = StaticCredential::from_token("T1");
        assert_eq!(source.access_token().unwrap().unwrap().token(), "T1");
        assert!(StaticCredential::default().access_token().unwrap().is_none());
    }

    #[test]
    fn test_file_credential() {
        let path = std::env::temp_dir().join(format!("townchat-token-{}", uuid::Uuid::new_v4()));
        let source = FileCredential::new(&path);
        assert!(source.access_token().unwrap().is_none());

        std::fs::write(&path, "  T2\n").unwrap();
        assert_eq!(source.access_token().unwrap().unwrap().token(), "T2");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_env_credential_missing_variable() {
        let source = EnvCredential::new("TOWNCHAT_TEST_VARIABLE_THAT_IS_NEVER_SET");
        assert!(source.access_token().unwrap().is_none());
    }
}
