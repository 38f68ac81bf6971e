use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Io(std::io::Error),
    DirectoryNotFound(String),
    NotFound,
    BadRequest,
    InvalidFileName(String),
    UploadCollision(String),
    UnknownContentType(String),
    InvalidCommand(String),
    InvalidConfig(String),
    InternalServerError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Io(err) => write!(f, "IO error: {err}"),
            AppError::DirectoryNotFound(path) => write!(f, "Directory not found: {path}"),
            AppError::NotFound => write!(f, "Not Found"),
            AppError::BadRequest => write!(f, "Bad request"),
            AppError::InvalidFileName(name) => write!(f, "Invalid file name: '{name}'"),
            AppError::UploadCollision(name) => write!(f, "Upload target already exists: '{name}'"),
            AppError::UnknownContentType(name) => {
                write!(f, "Content type of '{name}' cannot be determined")
            }
            AppError::InvalidCommand(line) => {
                write!(f, "Invalid command: '{line}' (expected 'upload <fileName>')")
            }
            AppError::InvalidConfig(msg) => write!(f, "Invalid configuration: {msg}"),
            AppError::InternalServerError(msg) => write!(f, "Internal server error: {msg}"),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<tempfile::PersistError> for AppError {
    fn from(err: tempfile::PersistError) -> Self {
        AppError::Io(err.error)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Io(err) => Some(err),
            _ => None,
        }
    }
}
