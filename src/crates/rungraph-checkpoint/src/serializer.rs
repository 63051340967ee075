//! Serialization protocol for durable checkpoint backends

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Encodes values for storage. Backends are generic over it so the on-disk
/// format can change without touching the log logic.
pub trait SerializerProtocol: Send + Sync {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;
}

/// Compact JSON, one value per line when used by the file backend
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}
