use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::NotFound(_) | Self::AlreadyExists(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn client_errors_are_classified() {
        assert!(Error::InvalidArgument("x".into()).is_client_error());
        assert!(Error::NotFound("x".into()).is_client_error());
        assert!(Error::AlreadyExists("x".into()).is_client_error());
        assert!(!Error::Database("x".into()).is_client_error());
        assert!(!Error::Config("x".into()).is_client_error());
    }

    #[test]
    fn display_includes_category() {
        let err = Error::NotFound("user with ID 7 does not exist".into());
        assert_eq!(err.to_string(), "not found: user with ID 7 does not exist");
    }
}
