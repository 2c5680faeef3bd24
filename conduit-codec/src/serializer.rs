//! Serialization collaborators used by the object codec.
//!
//! The object codec only frames payloads; turning a value into bytes and back is delegated
//! to an [`ObjectSerializer`]. [`JsonSerializer`] covers any `serde` type.

use std::marker::PhantomData;

use bytes::{BufMut, BytesMut};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::CodecError;

/// Writes values of one type into a byte buffer and reads them back.
pub trait ObjectSerializer: Send + Sync + 'static {
    /// The value type this serializer handles.
    type Item: Send + 'static;

    /// Appends the serialized form of `item` to `out`.
    ///
    /// On error, `out` may hold a partial payload; callers truncate it.
    fn serialize(&self, item: &Self::Item, out: &mut BytesMut) -> Result<(), CodecError>;

    /// Reads one value from a complete payload.
    fn deserialize(&self, payload: &[u8]) -> Result<Self::Item, CodecError>;
}

/// JSON serialization through `serde_json`.
pub struct JsonSerializer<T> {
    _item: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    /// Creates a serializer for `T`.
    pub const fn new() -> Self {
        Self { _item: PhantomData }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonSerializer<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> ObjectSerializer for JsonSerializer<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Item = T;

    fn serialize(&self, item: &T, out: &mut BytesMut) -> Result<(), CodecError> {
        serde_json::to_writer(BufMut::writer(&mut *out), item)
            .map_err(|err| CodecError::Serialize(err.into()))
    }

    fn deserialize(&self, payload: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(payload).map_err(|err| CodecError::Deserialize(err.into()))
    }
}
