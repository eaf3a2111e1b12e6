//! Store value codecs.
//!
//! Values written through a [`crate::store::base::Store`] are structured
//! records encoded to bytes before they reach the backend. The store is
//! serializer-agnostic; callers pick JSON (human readable, the default) or
//! MessagePack (compact binary) at construction time.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Serializer {
    #[default]
    Json,
    MessagePack,
}

impl Serializer {
    /// Resolve a serializer from its configured name.
    pub fn resolve(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "" | "json" => Ok(Serializer::Json),
            "msgpack" | "messagepack" => Ok(Serializer::MessagePack),
            other => Err(StoreError::UnsupportedSerializer(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Serializer::Json => "json",
            Serializer::MessagePack => "msgpack",
        }
    }

    pub fn dump<V: Serialize>(&self, key: &str, value: &V) -> Result<Vec<u8>> {
        match self {
            Serializer::Json => serde_json::to_vec(value).map_err(|e| StoreError::Encode {
                key: key.to_string(),
                message: e.to_string(),
            }),
            // Named serialization keeps struct field names in the payload so
            // both codecs accept the same serde models.
            Serializer::MessagePack => {
                rmp_serde::to_vec_named(value).map_err(|e| StoreError::Encode {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    pub fn load<V: DeserializeOwned>(&self, key: &str, payload: &[u8]) -> Result<V> {
        match self {
            Serializer::Json => serde_json::from_slice(payload).map_err(|e| StoreError::Decode {
                key: key.to_string(),
                message: e.to_string(),
            }),
            Serializer::MessagePack => {
                rmp_serde::from_slice(payload).map_err(|e| StoreError::Decode {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}

impl std::str::FromStr for Serializer {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::resolve(s)
    }
}
