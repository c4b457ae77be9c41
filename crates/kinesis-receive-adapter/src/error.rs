use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("required environment variable not defined '{0}'")]
    MissingEnv(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Kinesis error: {0}")]
    Kinesis(String),

    #[error("Sink rejected event with status {status}")]
    SinkRejected { status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn kinesis<E: std::error::Error>(err: E) -> Self {
        Error::Kinesis(aws_sdk_kinesis::error::DisplayErrorContext(err).to_string())
    }

    pub fn checkpoint<E: std::error::Error>(err: E) -> Self {
        Error::Checkpoint(aws_sdk_dynamodb::error::DisplayErrorContext(err).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_env_message() {
        assert_eq!(
            Error::MissingEnv("STREAM_NAME").to_string(),
            "required environment variable not defined 'STREAM_NAME'"
        );
    }
}
