use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_size_classes(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidSizeClasses {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn already_initialized() -> Error {
        Error(ErrorKind::AlreadyInitialized.into())
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid size classes: {message}")]
    InvalidSizeClasses { message: String },

    #[error("the process-wide size class catalogue is already initialized")]
    AlreadyInitialized,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(Box::new(kind))
    }
}
