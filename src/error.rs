use thiserror::Error;

/// Errors raised by the store layer and its configuration.
///
/// `UnsupportedScheme` and `UnsupportedSerializer` are fatal at startup and
/// are never retried. Everything else surfaces to the endpoint layer, which
/// aborts the current request without partial writes becoming visible.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unsupported store scheme \"{0}\", expected memory or file")]
    UnsupportedScheme(String),

    #[error("invalid store uri \"{0}\"")]
    InvalidUri(String),

    #[error("unsupported serializer \"{0}\", expected json or msgpack")]
    UnsupportedSerializer(String),

    #[error("failed to encode value for key {key}: {message}")]
    Encode { key: String, message: String },

    #[error("failed to decode value for key {key}: {message}")]
    Decode { key: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
