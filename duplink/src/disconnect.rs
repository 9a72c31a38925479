//! Severing channels on demand.

use std::{
    fmt,
    sync::{Arc, Mutex},
};
use tokio::sync::watch;

use crate::{
    chan::{Channel, ErrorPolicy},
    guard::{self, DoneRx},
    transform::Transformer,
};

/// A transformer that severs every channel it has wrapped on demand.
///
/// Each [bound](Self::bind) channel forwards to its inner channel until
/// [`disconnect`](Self::disconnect) is called. Disconnecting closes every
/// inner sink, terminates every wrapped stream, cuts short in-progress
/// pumped streams and leaves the wrapped sinks in the silently-dropping
/// state. Clones refer to the same disconnector.
pub struct Disconnector<T> {
    shared: Arc<Mutex<Inner>>,
    marker: std::marker::PhantomData<fn() -> T>,
}

struct Inner {
    /// Severance signal observed by all bound channels.
    kill_tx: watch::Sender<bool>,
    /// Completion of each bound channel's outgoing half.
    dones: Vec<DoneRx>,
}

impl<T> fmt::Debug for Disconnector<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.shared.lock().unwrap();
        let disconnected = *inner.kill_tx.borrow();
        f.debug_struct("Disconnector")
            .field("disconnected", &disconnected)
            .field("channels", &inner.dones.len())
            .finish()
    }
}

impl<T> Clone for Disconnector<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone(), marker: std::marker::PhantomData }
    }
}

impl<T> Default for Disconnector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Disconnector<T> {
    /// Creates a disconnector with no channels bound yet.
    pub fn new() -> Self {
        let (kill_tx, _kill_rx) = watch::channel(false);
        Self { shared: Arc::new(Mutex::new(Inner { kill_tx, dones: Vec::new() })), marker: std::marker::PhantomData }
    }

    /// Whether [`disconnect`](Self::disconnect) has been called.
    pub fn is_disconnected(&self) -> bool {
        *self.shared.lock().unwrap().kill_tx.borrow()
    }

    /// Severs all channels produced by this disconnector.
    ///
    /// Returns once every wrapped channel has quiesced: inner sinks closed,
    /// wrapped streams terminated and in-progress operations completed.
    /// Disconnecting is idempotent; channels bound afterwards are severed on
    /// creation.
    pub async fn disconnect(&self) {
        let dones = {
            let inner = self.shared.lock().unwrap();
            // send_replace updates the value even when nothing is bound yet.
            inner.kill_tx.send_replace(true);
            inner.dones.clone()
        };

        for done in dones {
            let _ = guard::await_done(done).await;
        }
    }
}

impl<T> Transformer<T, T> for Disconnector<T>
where
    T: Send + 'static,
{
    /// Wraps a channel so that it is severed when
    /// [`disconnect`](Disconnector::disconnect) is called.
    fn bind(&self, channel: Channel<T>) -> Channel<T> {
        let (inner_tx, inner_rx) = channel.split();

        let mut inner = self.shared.lock().unwrap();
        let kill_rx = inner.kill_tx.subscribe();
        let (tx, rx) =
            guard::spawn(inner_rx.into_stream(), inner_tx.into_sink(), ErrorPolicy::Forward, Some(kill_rx));
        inner.dones.push(tx.done_watch());

        Channel::join(tx, rx)
    }
}
