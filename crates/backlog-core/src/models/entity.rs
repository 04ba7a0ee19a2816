//! Typed payload codec used at the edges of the engine.
//!
//! The queue only sees `serde_json::Value` payloads keyed by entity type.
//! Domain code implements [`Entity`] to get typed encode/decode without the
//! engine depending on the domain types.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

pub trait Entity: Serialize + DeserializeOwned {
    /// Tag stored on queued operations and offline records
    const ENTITY_TYPE: &'static str;

    fn entity_id(&self) -> String;

    fn encode(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a payload, refusing payloads tagged for another entity type
    fn decode(entity_type: &str, payload: &serde_json::Value) -> Result<Self> {
        if entity_type != Self::ENTITY_TYPE {
            return Err(Error::InvalidInput(format!(
                "expected entity type '{}', got '{entity_type}'",
                Self::ENTITY_TYPE
            )));
        }
        Ok(serde_json::from_value(payload.clone())?)
    }
}
