use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::CodecError;

/// Converts between SQS message bodies and application values.
pub trait Codec: Send + Sync + 'static {
    type Item: Send + 'static;

    fn decode(&self, body: &str) -> Result<Self::Item, CodecError>;

    fn encode(&self, item: &Self::Item) -> Result<String, CodecError>;
}

/// Passes bodies through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Item = String;

    fn decode(&self, body: &str) -> Result<String, CodecError> {
        Ok(body.to_string())
    }

    fn encode(&self, item: &String) -> Result<String, CodecError> {
        Ok(item.clone())
    }
}

/// JSON bodies, decoded into `T` (a generic [`serde_json::Value`] by default).
pub struct JsonCodec<T = serde_json::Value> {
    _item: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        JsonCodec { _item: PhantomData }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Item = T;

    fn decode(&self, body: &str) -> Result<T, CodecError> {
        serde_json::from_str(body).map_err(CodecError::Decode)
    }

    fn encode(&self, item: &T) -> Result<String, CodecError> {
        serde_json::to_string(item).map_err(CodecError::Encode)
    }
}
