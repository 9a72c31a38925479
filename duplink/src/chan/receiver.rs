//! Receiving half of a channel.

use futures::{channel::mpsc, ready, Stream, StreamExt};
use std::{
    error::Error,
    fmt, io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use crate::guard::Shared;

/// An arbitrary error carried over a channel.
///
/// Errors travel as values over channels, so they must be cloneable; wrapping
/// them in an [`Arc`] achieves that for any error type.
pub type DynError = Arc<dyn Error + Send + Sync + 'static>;

/// Error delivered on the receiving half of a channel.
///
/// Receive errors are events on the stream: they do not terminate it and each
/// error is delivered exactly once.
#[derive(Debug, Clone)]
pub enum RecvError {
    /// An error value forwarded from the other endpoint of the channel.
    Remote(DynError),
    /// The underlying transport of the channel failed.
    Transport(DynError),
    /// The other endpoint violated the channel protocol.
    Protocol(String),
}

impl RecvError {
    /// Creates a forwarded error from an arbitrary error value.
    pub fn remote(error: impl Error + Send + Sync + 'static) -> Self {
        Self::Remote(Arc::new(error))
    }

    /// Creates a transport error from an arbitrary error value.
    pub fn transport(error: impl Error + Send + Sync + 'static) -> Self {
        Self::Transport(Arc::new(error))
    }

    /// Creates a protocol violation error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Remote(err) => write!(f, "remote error: {err}"),
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::Protocol(msg) => write!(f, "protocol violation: {msg}"),
        }
    }
}

impl Error for RecvError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Remote(err) | Self::Transport(err) => Some(&**err),
            Self::Protocol(_) => None,
        }
    }
}

impl From<RecvError> for io::Error {
    fn from(err: RecvError) -> Self {
        let kind = match &err {
            RecvError::Remote(_) => io::ErrorKind::Other,
            RecvError::Transport(_) => io::ErrorKind::ConnectionAborted,
            RecvError::Protocol(_) => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

/// The receiving half of a channel.
///
/// The stream of a channel is single-subscription: ownership of the receiver
/// is the subscription, so a second subscriber cannot exist. Dropping the
/// receiver cancels the subscription without affecting the sending half.
pub struct Receiver<T> {
    /// Events forwarded by the channel's pump task.
    rx: mpsc::UnboundedReceiver<Result<T, RecvError>>,
    /// State shared with the sending half.
    shared: Arc<Shared>,
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Receiver").finish()
    }
}

impl<T> Receiver<T>
where
    T: Send + 'static,
{
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Result<T, RecvError>>, shared: Arc<Shared>) -> Self {
        Self { rx, shared }
    }

    /// Wraps an arbitrary stream as the receiving half of a channel.
    ///
    /// The stream is relayed through a buffering pump, so events emitted
    /// before the receiver is polled are retained in order.
    pub fn wrap<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, RecvError>> + Send + 'static,
    {
        Self::wrap_with(stream, Arc::new(Shared::new()))
    }

    /// Wraps a stream while sharing another channel's lifecycle state, so
    /// that closing that channel's sink cuts this receiver as well.
    pub(crate) fn wrap_with<S>(stream: S, shared: Arc<Shared>) -> Self
    where
        S: Stream<Item = Result<T, RecvError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded();
        tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(item) = stream.next().await {
                if tx.unbounded_send(item).is_err() {
                    break;
                }
            }
        });
        Self::new(rx, shared)
    }

    /// Receives the next value.
    ///
    /// Returns `Ok(None)` once the stream has terminated. An `Err` is an
    /// event on the stream; receiving may be resumed afterwards.
    #[inline]
    pub async fn recv(&mut self) -> Result<Option<T>, RecvError> {
        futures::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Polls to receive the next value.
    #[inline]
    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<Option<T>, RecvError>> {
        if self.shared.is_cut() {
            // The sending half was closed; terminate before delivering
            // anything still buffered.
            return Poll::Ready(Ok(None));
        }

        match ready!(self.rx.poll_next_unpin(cx)) {
            Some(Ok(value)) => Poll::Ready(Ok(Some(value))),
            Some(Err(err)) => Poll::Ready(Err(err)),
            None => Poll::Ready(Ok(None)),
        }
    }

    /// Converts this receiver into a [ReceiverStream] implementing [Stream].
    pub fn into_stream(self) -> ReceiverStream<T> {
        ReceiverStream { receiver: self }
    }
}

/// The receiving stream of a channel, implementing [Stream].
///
/// Stream errors are delivered as `Err` items; the stream continues after an
/// error and ends with `None` exactly once.
pub struct ReceiverStream<T> {
    receiver: Receiver<T>,
}

impl<T> fmt::Debug for ReceiverStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReceiverStream").finish()
    }
}

impl<T> From<Receiver<T>> for ReceiverStream<T>
where
    T: Send + 'static,
{
    fn from(receiver: Receiver<T>) -> Self {
        receiver.into_stream()
    }
}

impl<T> Stream for ReceiverStream<T>
where
    T: Send + 'static,
{
    type Item = Result<T, RecvError>;

    #[inline]
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let this = Pin::into_inner(self);
        Poll::Ready(ready!(this.receiver.poll_recv(cx)).transpose())
    }
}
