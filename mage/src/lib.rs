//! A multi-process message-passing runtime: nodes exchange handles to
//! bidirectional, one-to-one message pipes (entangled endpoint pairs)
//! over OS byte channels, bootstrapped by a one-shot invitation
//! handshake. See [`core`] for the facade most callers use.

pub mod channel;
pub mod core;
pub mod endpoint;
pub mod error;
pub mod handles;
pub mod message;
pub mod node;
mod util;

pub use crate::core::Core;
pub use endpoint::Delegate;
pub use error::{Error, Result};
pub use handles::MessagePipe;
pub use message::{Address, EndpointName, Message, NodeName};
