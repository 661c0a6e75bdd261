use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("message addressed an endpoint not present on this node")]
    UnknownTarget,
    #[error("handle's endpoint is bound; cannot send it")]
    HandleInUse,
    #[error("handle's endpoint has already been transferred")]
    HandleTransferred,
    #[error("same-process handle recovery failed to find the named endpoint")]
    Corrupt,
    #[error("internal invariant violated: {0}")]
    Invariant(&'static str),
    #[error("mage-base scheduling error: {0}")]
    Scheduling(#[from] mage_base::Error),
}
