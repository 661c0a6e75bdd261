use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("task was already run or taken")]
    Consumed,
    #[error("thread was already started")]
    AlreadyStarted,
    #[error("scheduling invariant violated: {0}")]
    Invariant(&'static str),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
