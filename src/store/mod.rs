//! In-memory message log shared by every transport.
//!
//! The log lives for the process lifetime and is never trimmed.

mod log;
mod message;

pub use log::{beginning_of_time, MessageStore};
pub use message::{Message, SendMessageRequest, ANONYMOUS_SENDER};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
