//! The channel contract.
//!
//! A [Channel] pairs a single-subscription incoming [Receiver] with a typed
//! outgoing [Sender]. Every channel produced by this crate satisfies one
//! lifecycle contract:
//!
//! 1. The stream is single-subscription (the [Receiver] is the subscription).
//! 2. Closing the sink terminates the stream before any further value.
//! 3. After the stream terminates, the sink silently drops further events
//!    while [`close`](Sender::close) still resolves [`done`](Sender::done).
//! 4. Dropping the receiver does not affect the sink; a later terminal from
//!    the other endpoint still resolves done.
//! 5. Errors are handled according to the [ErrorPolicy] chosen at
//!    construction.

mod receiver;
mod sender;

pub use receiver::{DynError, Receiver, ReceiverStream, RecvError};
pub use sender::{SendError, Sender, SenderSink};

pub(crate) use sender::SendRoute;

use futures::{Sink, Stream};
use std::fmt;

use crate::{guard, transform::Transformer};

/// Error handling mode of a channel's outgoing half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Errors added to the sink are forwarded to the other endpoint and
    /// delivered as events on its stream.
    #[default]
    Forward,
    /// Adding an error closes the sink: nothing more reaches the other
    /// endpoint and the sink's done future resolves with the error.
    Fail,
}

/// A bidirectional typed message channel.
///
/// One endpoint of a logical connection: an ordered incoming stream of `T`
/// values paired with an ordered outgoing sink of `T` values.
///
/// Use [`Channel::from_parts`] to adapt a raw stream/sink pair, or obtain
/// channels from [`pair`](crate::pair), [`mux`](crate::mux),
/// [`completer`](crate::completer) or a transport crate.
pub struct Channel<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Channel").finish()
    }
}

impl<T> Channel<T>
where
    T: Send + 'static,
{
    /// Adapts an arbitrary stream and sink pair into a channel satisfying
    /// the full lifecycle contract.
    ///
    /// A pump task owning `stream` and `sink` is spawned onto the ambient
    /// Tokio runtime. The wrapper buffers incoming events until the receiver
    /// is polled, delivers the stream terminal exactly once and gates the
    /// sink through the contract's closed, pumping and silently-dropping
    /// states, regardless of how loose the underlying parts are.
    pub fn from_parts<S, K>(stream: S, sink: K, policy: ErrorPolicy) -> Self
    where
        S: Stream<Item = Result<T, RecvError>> + Send + 'static,
        K: Sink<Result<T, RecvError>> + Send + 'static,
        K::Error: fmt::Display,
    {
        let (tx, rx) = guard::spawn(stream, sink, policy, None);
        Self { tx, rx }
    }

    /// Assembles a channel from previously split halves.
    ///
    /// The halves need not originate from the same channel; the caller is
    /// responsible for the pair making sense as one endpoint.
    pub fn join(tx: Sender<T>, rx: Receiver<T>) -> Self {
        Self { tx, rx }
    }

    /// Splits this channel into its sending and receiving halves.
    pub fn split(self) -> (Sender<T>, Receiver<T>) {
        let Self { tx, rx } = self;
        (tx, rx)
    }

    /// The sending half.
    pub fn sender(&self) -> &Sender<T> {
        &self.tx
    }

    /// The receiving half.
    pub fn receiver_mut(&mut self) -> &mut Receiver<T> {
        &mut self.rx
    }

    /// Receives the next value.
    #[inline]
    pub async fn recv(&mut self) -> Result<Option<T>, RecvError> {
        self.rx.recv().await
    }

    /// Enqueues a value for sending.
    #[inline]
    pub fn send(&self, value: T) -> Result<(), SendError> {
        self.tx.send(value)
    }

    /// Connects this channel with another channel.
    ///
    /// Each channel's stream is pumped into the other channel's sink; a
    /// terminal on either stream closes the opposite sink. Both channels are
    /// consumed; the relays run until both directions have finished.
    pub fn pipe(self, other: Channel<T>) {
        let (a_tx, a_rx) = self.split();
        let (b_tx, b_rx) = other.split();
        tokio::spawn(relay(a_rx, b_tx));
        tokio::spawn(relay(b_rx, a_tx));
    }

    /// Transforms this channel using the provided transformer.
    pub fn transform<B, X>(self, transformer: &X) -> Channel<B>
    where
        X: Transformer<T, B> + ?Sized,
    {
        transformer.bind(self)
    }

    /// Returns a channel with the receiving half replaced by `change`
    /// applied to it.
    ///
    /// The sending half is retained unchanged. `change` must preserve the
    /// stream side of the channel contract.
    pub fn change_stream<S, F>(self, change: F) -> Channel<T>
    where
        F: FnOnce(ReceiverStream<T>) -> S,
        S: Stream<Item = Result<T, RecvError>> + Send + 'static,
    {
        let Self { tx, rx } = self;
        Channel { tx, rx: Receiver::wrap(change(rx.into_stream())) }
    }

    /// Returns a channel with the sending half replaced by `change` applied
    /// to it.
    ///
    /// The receiving half is retained unchanged. `change` must preserve the
    /// sink side of the channel contract.
    pub fn change_sink<K, F>(self, change: F) -> Channel<T>
    where
        F: FnOnce(SenderSink<T>) -> K,
        K: Sink<Result<T, RecvError>> + Send + 'static,
        K::Error: fmt::Display,
    {
        let Self { tx, rx } = self;
        let policy = tx.policy();
        Channel { tx: Sender::wrap(change(tx.into_sink()), policy), rx }
    }
}

/// Pumps one channel's receiver into another channel's sender.
async fn relay<T>(mut rx: Receiver<T>, tx: Sender<T>)
where
    T: Send + 'static,
{
    loop {
        match rx.recv().await {
            Ok(Some(value)) => {
                if tx.send(value).is_err() {
                    break;
                }
            }
            Err(err) => {
                if tx.send_item(Err(err)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                let _ = tx.close();
                break;
            }
        }
    }
}
