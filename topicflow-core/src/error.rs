use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Invalid State - {0}")]
    InvalidState(String),

    #[error("Broker Error - {0}")]
    Broker(String),

    #[error("Unknown Topic - no processor host for routing key {0}")]
    UnknownTopic(String),

    #[error("Processor Error - {0}")]
    Processor(String),

    #[error("Pipeline Error - topic {topic}: {error}")]
    Pipeline { topic: String, error: String },

    #[error("Sink Error - {0}")]
    Sink(String),

    #[error("Timeout - {0}")]
    Timeout(String),

    #[error("Metrics Error - {0}")]
    Metrics(String),

    #[error("{0}")]
    Other(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Other(format!("task join error: {err}"))
    }
}
