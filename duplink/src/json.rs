//! JSON document codec.
//!
//! Transforms a channel of raw bytes into a channel of typed values, one
//! message corresponding to one JSON document. An example of the
//! [transformer composition API](crate::transform); requires the `json`
//! feature.
//!
//! ```no_run
//! # async fn doc(raw: duplink::Channel<bytes::Bytes>) {
//! let channel: duplink::Channel<serde_json::Value> = raw.transform(&duplink::json::document());
//! # }
//! ```

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;

use crate::transform::{Codec, CodecTransformer};

/// Codec between raw bytes and JSON-serializable values.
///
/// Undecodable documents received from the other endpoint surface as
/// [protocol violations](crate::chan::RecvError::Protocol) on the stream.
/// A value rejected by serialization is refused synchronously from the
/// `send` call with [`SendError::Encode`](crate::chan::SendError::Encode);
/// nothing is sent and the sink remains usable.
pub struct JsonCodec<T> {
    marker: PhantomData<fn() -> T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self { marker: PhantomData }
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Wire = Bytes;
    type Message = T;
    type Error = serde_json::Error;

    fn decode(&self, wire: Bytes) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&wire)
    }

    fn encode(&self, message: T) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(&message).map(Bytes::from)
    }
}

/// Creates a transformer translating between raw bytes and JSON documents.
pub fn document<T>() -> CodecTransformer<JsonCodec<T>>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    CodecTransformer::new(JsonCodec::default())
}
