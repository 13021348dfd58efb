#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Default endpoint of the debate platform's metrics stream.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws";

/// Environment variable overriding [`DEFAULT_ENDPOINT`] in the demo.
pub const ENDPOINT_VAR: &str = "DEBATE_WS_URL";
