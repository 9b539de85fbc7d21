use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Routing Key Error - {0}")]
    RoutingKey(String),

    #[error("Decode Error - {0}")]
    Decode(String),

    #[error("Sink Error - {0}")]
    Sink(String),

    #[error("Aggregation Error - {0}")]
    Aggregation(String),
}

impl From<Error> for topicflow_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Config(e) => topicflow_core::Error::Config(e),
            Error::Sink(e) => topicflow_core::Error::Sink(e),
            other => topicflow_core::Error::Processor(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}
