// Streaming chat client core without UI dependencies

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod session;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod utils;

pub use app::{ChatClient, SendOutcome, SkipReason};
pub use config::ClientConfig;
pub use error::{Error, Result};
