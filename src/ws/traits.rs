//! Core traits for turning WebSocket frames into payloads.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use super::error::WsError;

/// Message parser trait for converting raw frame bytes to a payload.
///
/// # Example
///
/// ```ignore
/// pub struct ScoreParser;
///
/// impl MessageParser<Score> for ScoreParser {
///     fn parse(&self, bytes: &[u8]) -> crate::Result<Score> {
///         Ok(serde_json::from_slice(bytes)?)
///     }
/// }
/// ```
pub trait MessageParser<M>: Send + Sync + 'static {
    /// Parse one inbound frame.
    ///
    /// An error drops the frame; the connection is kept open.
    fn parse(&self, bytes: &[u8]) -> crate::Result<M>;
}

/// Parses each frame as one JSON document.
///
/// The server's schema is opaque to the client, so the default payload type is
/// [`serde_json::Value`]. Failures report the path at which deserialization
/// stopped.
pub struct JsonParser<M = serde_json::Value> {
    _phantom: PhantomData<fn() -> M>,
}

impl<M> JsonParser<M> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<M> Default for JsonParser<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for JsonParser<M> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for JsonParser<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonParser").finish()
    }
}

impl<M: DeserializeOwned + 'static> MessageParser<M> for JsonParser<M> {
    fn parse(&self, bytes: &[u8]) -> crate::Result<M> {
        let deserializer = &mut serde_json::Deserializer::from_slice(bytes);
        serde_path_to_error::deserialize(deserializer).map_err(|e| {
            let path = e.path().to_string();
            WsError::MessageParse {
                path,
                source: e.into_inner(),
            }
            .into()
        })
    }
}
