//! Contract-enforcing channel pump.
//!
//! Adapts an arbitrary stream and sink pair into a channel satisfying the
//! lifecycle contract. A [Sender](crate::chan::Sender) and
//! [Receiver](crate::chan::Receiver) front-end pair is connected through
//! unbounded queues to one [GuardTask] that owns the underlying parts,
//! relays events in both directions and performs the close handshake.

use futures::{channel::mpsc, future, Sink, SinkExt, Stream, StreamExt};
use std::{
    fmt,
    pin::Pin,
    sync::{Arc, Mutex},
};
use tokio::sync::watch;

use crate::chan::{ErrorPolicy, Receiver, RecvError, SendError, Sender};

/// Completion slot of a sink, resolved exactly once.
pub(crate) type DoneTx = watch::Sender<Option<Result<(), RecvError>>>;

/// Watch side of a sink's completion slot.
pub(crate) type DoneRx = watch::Receiver<Option<Result<(), RecvError>>>;

/// Awaits resolution of a sink's completion slot.
pub(crate) async fn await_done(mut rx: DoneRx) -> Result<(), RecvError> {
    loop {
        if let Some(res) = rx.borrow_and_update().clone() {
            return res;
        }
        if rx.changed().await.is_err() {
            // The pump resolves done on every exit path; reaching this means
            // it was cancelled by runtime shutdown.
            return Ok(());
        }
    }
}

/// A request to the channel pump task.
pub(crate) enum SendReq<T> {
    /// Relay an event to the underlying sink.
    Item(Result<T, RecvError>),
    /// Close the underlying sink and resolve done.
    Close,
    /// Close the underlying sink without relaying the error and resolve
    /// done with it.
    FailStop(RecvError),
}

/// Lifecycle state shared between the two channel halves and the pump task.
pub(crate) struct Shared {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// The sink has been closed by this endpoint.
    closed: bool,
    /// A pumped stream is in progress on the sink.
    pumping: bool,
    /// The channel is severed or its stream has terminated; events are
    /// silently dropped.
    detached: bool,
    /// The stream must terminate before delivering any further value.
    cut: bool,
}

impl Shared {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }

    /// Verifies that the sink accepts events.
    pub fn check_send(&self) -> Result<(), SendError> {
        let state = self.state.lock().unwrap();
        if state.pumping {
            return Err(SendError::Pumping);
        }
        if state.closed {
            return Err(SendError::Closed);
        }
        Ok(())
    }

    /// Enters the pumping state.
    ///
    /// Returns `Ok(false)` if the channel is detached and the pump should
    /// complete without consuming anything.
    pub fn begin_pump(&self) -> Result<bool, SendError> {
        let mut state = self.state.lock().unwrap();
        if state.pumping {
            return Err(SendError::Pumping);
        }
        if state.closed {
            return Err(SendError::Closed);
        }
        if state.detached {
            return Ok(false);
        }
        state.pumping = true;
        Ok(true)
    }

    /// Leaves the pumping state.
    pub fn end_pump(&self) {
        self.state.lock().unwrap().pumping = false;
    }

    /// Enters the closed state.
    ///
    /// Returns `Ok(false)` if the sink was already closed.
    pub fn begin_close(&self) -> Result<bool, SendError> {
        let mut state = self.state.lock().unwrap();
        if state.pumping {
            return Err(SendError::Pumping);
        }
        if state.closed {
            return Ok(false);
        }
        state.closed = true;
        state.cut = true;
        Ok(true)
    }

    /// Closes the sink because an error event ended it.
    pub fn fail(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.cut = true;
    }

    /// Puts the sink into the silently-dropping state.
    pub fn detach(&self) {
        self.state.lock().unwrap().detached = true;
    }

    /// Forces the stream to terminate before delivering any further value.
    pub fn cut(&self) {
        self.state.lock().unwrap().cut = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn is_detached(&self) -> bool {
        self.state.lock().unwrap().detached
    }

    pub fn is_cut(&self) -> bool {
        self.state.lock().unwrap().cut
    }
}

/// Creates a contract-satisfying channel around the provided stream and
/// sink, spawning its pump task.
///
/// When `kill_rx` is provided, the channel is severed as soon as it carries
/// `true`.
pub(crate) fn spawn<T, S, K>(
    stream: S, sink: K, policy: ErrorPolicy, kill_rx: Option<watch::Receiver<bool>>,
) -> (Sender<T>, Receiver<T>)
where
    T: Send + 'static,
    S: Stream<Item = Result<T, RecvError>> + Send + 'static,
    K: Sink<Result<T, RecvError>> + Send + 'static,
    K::Error: fmt::Display,
{
    let (req_tx, req_rx) = mpsc::unbounded();
    let (event_tx, event_rx) = mpsc::unbounded();
    let (done_tx, done_rx) = watch::channel(None);
    let shared = Arc::new(Shared::new());

    let task = GuardTask {
        stream: Box::pin(stream),
        sink: Some(Box::pin(sink)),
        req_rx,
        event_tx: Some(event_tx),
        shared: shared.clone(),
        done_tx,
        kill_rx,
    };
    tokio::spawn(task.run());

    let tx = Sender::new(req_tx, shared.clone(), done_rx, policy);
    let rx = Receiver::new(event_rx, shared);
    (tx, rx)
}

/// Task pumping a channel.
///
/// Owns the underlying stream and sink. Runs until the sink is closed, the
/// stream terminates or the channel is severed; resolves done on every exit
/// path.
struct GuardTask<T, S, K> {
    /// Underlying incoming stream.
    stream: Pin<Box<S>>,
    /// Underlying outgoing sink.
    ///
    /// `None` after the sink failed or was closed.
    sink: Option<Pin<Box<K>>>,
    /// Requests from the channel's senders.
    req_rx: mpsc::UnboundedReceiver<SendReq<T>>,
    /// Events to the channel's receiver.
    event_tx: Option<mpsc::UnboundedSender<Result<T, RecvError>>>,
    /// State shared with the channel halves.
    shared: Arc<Shared>,
    /// Completion slot of the sink.
    done_tx: DoneTx,
    /// Severance signal of a disconnector.
    kill_rx: Option<watch::Receiver<bool>>,
}

impl<T, S, K> GuardTask<T, S, K>
where
    T: Send + 'static,
    S: Stream<Item = Result<T, RecvError>> + Send + 'static,
    K: Sink<Result<T, RecvError>> + Send + 'static,
    K::Error: fmt::Display,
{
    /// Runs the channel pump.
    async fn run(mut self) {
        // The disconnector may have fired before this channel was bound.
        if self.kill_rx.as_ref().is_some_and(|rx| *rx.borrow()) {
            self.sever().await;
            return;
        }

        loop {
            tokio::select! {
                req = self.req_rx.next() => match req {
                    Some(SendReq::Item(item)) => self.feed(item).await,
                    Some(SendReq::FailStop(err)) => {
                        self.finish(Err(err)).await;
                        return;
                    }
                    // All senders dropping without close counts as close.
                    Some(SendReq::Close) | None => {
                        self.finish(Ok(())).await;
                        return;
                    }
                },
                event = self.stream.next() => match event {
                    Some(item) => self.deliver(item),
                    None => {
                        self.stream_ended().await;
                        return;
                    }
                },
                fired = kill_fired(&mut self.kill_rx) => {
                    if fired {
                        self.sever().await;
                        return;
                    }
                    // The disconnector was dropped without firing.
                    self.kill_rx = None;
                }
            }
        }
    }

    /// Relays an event to the underlying sink.
    async fn feed(&mut self, item: Result<T, RecvError>) {
        let Some(sink) = self.sink.as_mut() else { return };

        if let Err(err) = sink.send(item).await {
            tracing::debug!("underlying sink failed: {err}; dropping further output");
            self.sink = None;
            self.shared.detach();
            self.resolve_done(Ok(()));
        }
    }

    /// Delivers an event to the channel's receiver.
    fn deliver(&mut self, item: Result<T, RecvError>) {
        if let Some(event_tx) = &self.event_tx {
            if event_tx.unbounded_send(item).is_err() {
                // The receiver was dropped. Keep draining the stream so that
                // its terminal is still observed and resolves done.
                self.event_tx = None;
            }
        }
    }

    /// Completes the outgoing half: flushes and closes the underlying sink,
    /// resolves done and terminates the channel's stream.
    async fn finish(&mut self, res: Result<(), RecvError>) {
        self.shared.detach();

        if let Some(mut sink) = self.sink.take() {
            if let Err(err) = sink.close().await {
                tracing::debug!("closing underlying sink failed: {err}");
            }
        }

        self.event_tx = None;
        self.resolve_done(res);
    }

    /// The underlying stream has terminated: the sink transitions to
    /// silently dropping and done resolves.
    async fn stream_ended(&mut self) {
        self.shared.detach();

        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }

        self.event_tx = None;
        self.resolve_done(Ok(()));
    }

    /// Severs the channel: the stream terminates immediately, the sink
    /// drops silently and the underlying sink is closed.
    async fn sever(&mut self) {
        self.shared.detach();
        self.shared.cut();

        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }

        self.event_tx = None;
        self.resolve_done(Ok(()));
    }

    /// Resolves the sink's completion slot; only the first resolution takes
    /// effect.
    fn resolve_done(&self, res: Result<(), RecvError>) {
        self.done_tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(res);
                true
            } else {
                false
            }
        });
    }
}

/// Waits for the severance signal to fire.
///
/// Resolves with `false` if the signal's sender is dropped; pends forever if
/// there is no signal.
async fn kill_fired(kill_rx: &mut Option<watch::Receiver<bool>>) -> bool {
    match kill_rx {
        Some(rx) => loop {
            if *rx.borrow_and_update() {
                return true;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        },
        None => future::pending().await,
    }
}
