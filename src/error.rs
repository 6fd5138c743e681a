pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task rejected: {0}")]
    Rejected(String),

    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("looper must run on the thread that prepared it")]
    WrongThread,

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn rejected<S: Into<String>>(msg: S) -> Self {
        Error::Rejected(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// True when the error means "no lane accepted the task".
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Rejected(_))
    }
}
