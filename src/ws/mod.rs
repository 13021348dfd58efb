//! Resilient WebSocket connection management.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: public handle; spawns the driver task that owns the
//!   transport and the single pending retry timer
//! - [`machine::ConnectionMachine`]: IO-free state machine driven by transport
//!   events and commands
//! - [`backoff::ReconnectBackoff`]: exponential backoff with an attempt ceiling
//! - [`history::MessageHistory`]: bounded FIFO of received payloads
//! - [`MessageParser`]: trait for parsing incoming WebSocket frames
//!
//! # Example
//!
//! ```ignore
//! let connection = ConnectionManager::new(endpoint, Config::default(), JsonParser::<Value>::new())?;
//! connection.send(&json!({ "type": "subscribe", "debate": 42 }))?;
//! println!("{}", connection.status());
//! ```

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod history;
pub mod machine;
pub mod traits;

pub use connection::{ConnectionManager, ConnectionStatus};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
