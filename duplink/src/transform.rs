//! Channel transformers.
//!
//! A [Transformer] turns a channel into another channel, usually by wrapping
//! both halves. Transformers compose through
//! [`Channel::transform`](crate::chan::Channel::transform). The
//! [CodecTransformer] applies a symmetric [Codec] that translates between a
//! transport representation and typed messages.

use futures::StreamExt;
use std::{fmt, sync::Arc};

use crate::chan::{Channel, Receiver, RecvError, SendError, SendRoute, Sender};

/// Turns a channel into another channel.
///
/// Implementations must preserve the channel lifecycle contract: if the
/// bound channel satisfies it, the returned channel does too.
pub trait Transformer<A, B> {
    /// Wraps the provided channel.
    fn bind(&self, channel: Channel<A>) -> Channel<B>;
}

/// A symmetric codec between a transport representation and typed messages.
///
/// Incoming `Wire` values are decoded into `Message`s; outgoing `Message`s
/// are encoded into `Wire` values. One wire value corresponds to exactly one
/// message.
pub trait Codec: Send + Sync + 'static {
    /// Transport-side representation.
    type Wire: Send + 'static;
    /// Message handed to the user.
    type Message: Send + 'static;
    /// Encoding or decoding failure.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Decodes an incoming wire value.
    fn decode(&self, wire: Self::Wire) -> Result<Self::Message, Self::Error>;

    /// Encodes an outgoing message.
    fn encode(&self, message: Self::Message) -> Result<Self::Wire, Self::Error>;
}

/// Transformer applying a [Codec] to both halves of a channel.
///
/// Decode failures are delivered as [`RecvError::Protocol`] events on the
/// transformed channel's stream. Encoding happens synchronously at the
/// `send` call site: an unencodable value is rejected with
/// [`SendError::Encode`], is never sent and leaves the sink usable.
pub struct CodecTransformer<C> {
    codec: Arc<C>,
}

impl<C> fmt::Debug for CodecTransformer<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CodecTransformer").finish()
    }
}

impl<C> Clone for CodecTransformer<C> {
    fn clone(&self) -> Self {
        Self { codec: self.codec.clone() }
    }
}

impl<C> CodecTransformer<C> {
    /// Creates a transformer applying the provided codec.
    pub fn new(codec: C) -> Self {
        Self { codec: Arc::new(codec) }
    }
}

impl<C> Transformer<C::Wire, C::Message> for CodecTransformer<C>
where
    C: Codec,
{
    fn bind(&self, channel: Channel<C::Wire>) -> Channel<C::Message> {
        let (tx, rx) = channel.split();
        let policy = tx.policy();
        let shared = tx.shared_handle();
        let done_rx = tx.done_watch();

        // Both transformed halves share the inner channel's lifecycle state,
        // so the close and silently-dropping transitions stay coupled.
        let decoder = self.codec.clone();
        let stream = rx.into_stream().map(move |item| {
            item.and_then(|wire| {
                decoder.decode(wire).map_err(|err| RecvError::Protocol(format!("undecodable message: {err}")))
            })
        });
        let receiver = Receiver::wrap_with(stream, shared.clone());

        let stage: Arc<dyn SendRoute<C::Message>> =
            Arc::new(CodecStage { inner: tx, codec: self.codec.clone() });
        let sender = Sender::staged(stage, shared, done_rx, policy);

        Channel::join(sender, receiver)
    }
}

/// Synchronous encoding stage in front of the inner channel's sender.
///
/// Error events pass through unencoded.
struct CodecStage<C: Codec> {
    inner: Sender<C::Wire>,
    codec: Arc<C>,
}

impl<C> SendRoute<C::Message> for CodecStage<C>
where
    C: Codec,
{
    fn send(&self, item: Result<C::Message, RecvError>) -> Result<(), SendError> {
        match item {
            Ok(message) => {
                let wire = self.codec.encode(message).map_err(|err| SendError::Encode(Arc::new(err)))?;
                self.inner.dispatch(Ok(wire))
            }
            Err(err) => self.inner.dispatch(Err(err)),
        }
    }

    fn close(&self) -> Result<(), SendError> {
        self.inner.close()
    }
}
