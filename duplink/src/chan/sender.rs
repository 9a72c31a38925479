//! Sending half of a channel.

use futures::{channel::mpsc, future::BoxFuture, FutureExt, Sink, Stream, StreamExt};
use std::{
    error::Error,
    fmt, io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use super::{DynError, ErrorPolicy, RecvError};
use crate::guard::{self, DoneRx, SendReq, Shared};

/// Error adding to the sending half of a channel.
///
/// All variants indicate misuse of the sink; a channel whose other endpoint
/// has gone away accepts further values and drops them silently instead.
#[derive(Debug, Clone)]
pub enum SendError {
    /// The sink has been closed by this endpoint.
    Closed,
    /// A pumped stream is in progress on this sink.
    Pumping,
    /// The value could not be encoded by a codec transformer.
    ///
    /// The value was not sent; the sink remains usable.
    Encode(DynError),
}

impl PartialEq for SendError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Closed, Self::Closed) | (Self::Pumping, Self::Pumping) => true,
            (Self::Encode(a), Self::Encode(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "sink is closed"),
            Self::Pumping => write!(f, "a pumped stream is in progress"),
            Self::Encode(err) => write!(f, "value could not be encoded: {err}"),
        }
    }
}

impl Error for SendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Encode(err) => Some(&**err),
            _ => None,
        }
    }
}

impl From<SendError> for io::Error {
    fn from(err: SendError) -> Self {
        let kind = match &err {
            SendError::Closed => io::ErrorKind::BrokenPipe,
            SendError::Pumping => io::ErrorKind::Other,
            SendError::Encode(_) => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

/// Synchronous dispatch stage in front of another sender.
///
/// Codec transformers implement this to encode values at the `send` call
/// site, so that encode failures are raised synchronously to the caller
/// instead of being discovered later on a pump task.
pub(crate) trait SendRoute<T>: Send + Sync {
    /// Delivers an event, transforming it as needed.
    fn send(&self, item: Result<T, RecvError>) -> Result<(), SendError>;

    /// Initiates closing of the sender behind this stage.
    fn close(&self) -> Result<(), SendError>;
}

/// Where a sender's events go after passing the lifecycle gates.
enum Route<T> {
    /// Queue to the channel's own pump task.
    Pump(mpsc::UnboundedSender<SendReq<T>>),
    /// Synchronous stage in front of another sender.
    Stage(Arc<dyn SendRoute<T>>),
}

impl<T> Clone for Route<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Pump(req_tx) => Self::Pump(req_tx.clone()),
            Self::Stage(stage) => Self::Stage(stage.clone()),
        }
    }
}

/// The sending half of a channel.
///
/// All operations apart from [`send_all`](Self::send_all) are synchronous and
/// never block: values are buffered and pumped to the underlying sink by the
/// channel's pump task. Clones refer to the same sink. Dropping the last
/// clone without calling [`close`](Self::close) closes the sink.
pub struct Sender<T> {
    /// Event destination.
    route: Route<T>,
    /// State shared with the receiving half and the pump task.
    shared: Arc<Shared>,
    /// Completion of the outgoing half.
    done_rx: DoneRx,
    /// Error handling mode.
    policy: ErrorPolicy,
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Sender").field("policy", &self.policy).finish()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            route: self.route.clone(),
            shared: self.shared.clone(),
            done_rx: self.done_rx.clone(),
            policy: self.policy,
        }
    }
}

impl<T> Sender<T>
where
    T: Send + 'static,
{
    pub(crate) fn new(
        req_tx: mpsc::UnboundedSender<SendReq<T>>, shared: Arc<Shared>, done_rx: DoneRx, policy: ErrorPolicy,
    ) -> Self {
        Self { route: Route::Pump(req_tx), shared, done_rx, policy }
    }

    /// Creates a sender that is a synchronous stage in front of another
    /// sender, sharing that sender's lifecycle state and done future.
    pub(crate) fn staged(
        stage: Arc<dyn SendRoute<T>>, shared: Arc<Shared>, done_rx: DoneRx, policy: ErrorPolicy,
    ) -> Self {
        Self { route: Route::Stage(stage), shared, done_rx, policy }
    }

    /// Wraps an arbitrary sink as the sending half of a channel.
    ///
    /// A pump task relaying to `sink` is spawned; the returned sender obeys
    /// the full sink lifecycle contract.
    pub fn wrap<K>(sink: K, policy: ErrorPolicy) -> Self
    where
        K: Sink<Result<T, RecvError>> + Send + 'static,
        K::Error: fmt::Display,
    {
        let (tx, _rx) = guard::spawn(futures::stream::pending(), sink, policy, None);
        tx
    }

    /// Error handling mode of this sink.
    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Enqueues a value for sending.
    #[inline]
    pub fn send(&self, value: T) -> Result<(), SendError> {
        self.send_item(Ok(value))
    }

    /// Enqueues an error for sending.
    ///
    /// In [`ErrorPolicy::Forward`] mode the error travels to the other
    /// endpoint and is delivered on its stream. In [`ErrorPolicy::Fail`] mode
    /// the sink closes, nothing more reaches the other endpoint and
    /// [`done`](Self::done) resolves with the error.
    #[inline]
    pub fn send_error(&self, error: impl Error + Send + Sync + 'static) -> Result<(), SendError> {
        self.send_item(Err(RecvError::remote(error)))
    }

    /// Enqueues a value or error event for sending.
    pub fn send_item(&self, item: Result<T, RecvError>) -> Result<(), SendError> {
        self.shared.check_send()?;
        self.dispatch(item)
    }

    /// Pumps a whole stream of events into the sink.
    ///
    /// While the pump is in progress all other operations on this sink fail
    /// with [`SendError::Pumping`]. The pump ends when the stream ends, an
    /// event fails to dispatch or the channel is severed, whichever comes
    /// first.
    pub async fn send_all<S>(&self, stream: S) -> Result<(), SendError>
    where
        S: Stream<Item = Result<T, RecvError>> + Send,
    {
        if !self.shared.begin_pump()? {
            return Ok(());
        }

        let mut stream = std::pin::pin!(stream);
        let done = guard::await_done(self.done_rx.clone());
        let mut done = std::pin::pin!(done);

        let mut result = Ok(());
        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(item) => {
                        // The channel may have been severed while awaiting
                        // the next event.
                        if self.shared.is_detached() {
                            break;
                        }
                        if let Err(err) = self.dispatch(item) {
                            result = Err(err);
                            break;
                        }
                        if self.shared.is_closed() {
                            // A failing error event ended the sink.
                            break;
                        }
                    }
                    None => break,
                },
                // The channel finished or was severed; the pump counts as
                // completed.
                _ = &mut done => break,
            }
        }

        self.shared.end_pump();
        result
    }

    /// Closes the sink.
    ///
    /// Closing is idempotent and synchronous: after `close` returns, the
    /// channel's stream terminates before delivering any further value.
    /// Values enqueued before closing are still flushed to the underlying
    /// sink. Await [`done`](Self::done) for completion of the outgoing half.
    pub fn close(&self) -> Result<(), SendError> {
        match &self.route {
            Route::Pump(req_tx) => {
                if !self.shared.begin_close()? {
                    return Ok(());
                }
                let _ = req_tx.unbounded_send(SendReq::Close);
                Ok(())
            }
            // The sender behind the stage owns the close handshake; the
            // shared state makes the transition observable here as well.
            Route::Stage(stage) => stage.close(),
        }
    }

    /// Completion of the outgoing half.
    ///
    /// Resolves when the sink has been closed, the channel's stream has
    /// terminated or the channel has been severed. Resolves with an error
    /// only in [`ErrorPolicy::Fail`] mode, with the error that closed the
    /// sink.
    pub async fn done(&self) -> Result<(), RecvError> {
        guard::await_done(self.done_rx.clone()).await
    }

    /// Converts this sender into a [SenderSink] implementing [Sink].
    pub fn into_sink(self) -> SenderSink<T> {
        SenderSink { sender: self, done: None }
    }

    pub(crate) fn done_watch(&self) -> DoneRx {
        self.done_rx.clone()
    }

    pub(crate) fn shared_handle(&self) -> Arc<Shared> {
        self.shared.clone()
    }

    /// Delivers an event past the lifecycle gates, honoring the error
    /// policy.
    ///
    /// Events on a detached channel are dropped silently without being
    /// encoded. Fails synchronously if a stage cannot transform the event.
    pub(crate) fn dispatch(&self, item: Result<T, RecvError>) -> Result<(), SendError> {
        if self.shared.is_detached() {
            return Ok(());
        }

        match &self.route {
            Route::Pump(req_tx) => {
                match (item, self.policy) {
                    (Err(err), ErrorPolicy::Fail) => {
                        // Failing: the error closes the sink and nothing
                        // more reaches the other endpoint.
                        self.shared.fail();
                        let _ = req_tx.unbounded_send(SendReq::FailStop(err));
                    }
                    (item, _) => {
                        let _ = req_tx.unbounded_send(SendReq::Item(item));
                    }
                }
                Ok(())
            }
            Route::Stage(stage) => stage.send(item),
        }
    }
}

/// The sending sink of a channel, implementing [Sink].
///
/// Accepts `Result` events: `Ok` values are sent, `Err` events are routed
/// like [`Sender::send_error`]. Closing the sink drives the channel's full
/// close sequence and waits for [`Sender::done`].
pub struct SenderSink<T> {
    sender: Sender<T>,
    done: Option<BoxFuture<'static, Result<(), RecvError>>>,
}

impl<T> fmt::Debug for SenderSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SenderSink").field("closing", &self.done.is_some()).finish()
    }
}

impl<T> From<Sender<T>> for SenderSink<T>
where
    T: Send + 'static,
{
    fn from(sender: Sender<T>) -> Self {
        sender.into_sink()
    }
}

impl<T> SenderSink<T> {
    /// The sender backing this sink.
    pub fn sender(&self) -> &Sender<T> {
        &self.sender
    }
}

impl<T> Sink<Result<T, RecvError>> for SenderSink<T>
where
    T: Send + 'static,
{
    type Error = SendError;

    #[inline]
    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        // Sending never blocks; backpressure is left to the transport.
        Poll::Ready(Ok(()))
    }

    #[inline]
    fn start_send(self: Pin<&mut Self>, item: Result<T, RecvError>) -> Result<(), Self::Error> {
        Pin::into_inner(self).sender.send_item(item)
    }

    #[inline]
    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        let this = Pin::into_inner(self);

        if this.done.is_none() {
            this.sender.close()?;
            this.done = Some(guard::await_done(this.sender.done_rx.clone()).boxed());
        }

        // A done error is reported through Sender::done, not through the
        // sink; closing itself succeeds.
        let _ = futures::ready!(this.done.as_mut().unwrap().poll_unpin(cx));
        Poll::Ready(Ok(()))
    }
}
