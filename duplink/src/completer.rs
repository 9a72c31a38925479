//! Deferred channels.
//!
//! A [ChannelCompleter] hands out a channel whose source is supplied later.
//! The channel is usable immediately: values added to its sink are buffered
//! in order and flushed into the source's sink once it arrives, and its
//! stream delivers the source's stream from that point on.

use futures::{channel::mpsc, join, Future, StreamExt};
use std::fmt;
use tokio::sync::oneshot;

use crate::chan::{Channel, ErrorPolicy, RecvError};

/// Fulfills a deferred channel with its source.
///
/// Created together with its channel by [`ChannelCompleter::new`]. The
/// completer is consumed by [`set_channel`](Self::set_channel) or
/// [`set_error`](Self::set_error), so it can be fulfilled at most once.
/// Dropping it unfulfilled terminates the channel cleanly.
pub struct ChannelCompleter<T> {
    src_tx: oneshot::Sender<Result<Channel<T>, RecvError>>,
}

impl<T> fmt::Debug for ChannelCompleter<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ChannelCompleter").finish()
    }
}

impl<T> ChannelCompleter<T>
where
    T: Send + 'static,
{
    /// Creates a completer and its deferred channel.
    pub fn new() -> (Self, Channel<T>) {
        let (src_tx, src_rx) = oneshot::channel();
        let (in_tx, in_rx) = mpsc::unbounded();
        let (out_tx, out_rx) = mpsc::unbounded();

        let channel = Channel::from_parts(in_rx, out_tx, ErrorPolicy::Forward);
        tokio::spawn(run(src_rx, in_tx, out_rx));

        (Self { src_tx }, channel)
    }

    /// Creates a channel that is fulfilled by the provided future.
    pub fn from_future<F>(fut: F) -> Channel<T>
    where
        F: Future<Output = Result<Channel<T>, RecvError>> + Send + 'static,
    {
        let (completer, channel) = Self::new();
        tokio::spawn(async move {
            match fut.await {
                Ok(src) => completer.set_channel(src),
                Err(err) => completer.set_error(err),
            }
        });
        channel
    }

    /// Supplies the source channel.
    ///
    /// Values buffered in the deferred channel's sink are flushed into the
    /// source's sink in order; the source's stream becomes the source of the
    /// deferred channel's stream.
    pub fn set_channel(self, source: Channel<T>) {
        let _ = self.src_tx.send(Ok(source));
    }

    /// Fulfills the deferred channel with an error.
    ///
    /// Its stream delivers the error and terminates; buffered and further
    /// outgoing values are discarded.
    pub fn set_error(self, error: RecvError) {
        let _ = self.src_tx.send(Err(error));
    }
}

/// Connects the deferred channel's raw halves to the source once supplied.
async fn run<T>(
    src_rx: oneshot::Receiver<Result<Channel<T>, RecvError>>,
    in_tx: mpsc::UnboundedSender<Result<T, RecvError>>,
    mut out_rx: mpsc::UnboundedReceiver<Result<T, RecvError>>,
) where
    T: Send + 'static,
{
    match src_rx.await {
        Ok(Ok(source)) => {
            let (src_tx, mut src_rx) = source.split();

            // Buffered output flushes first because the queue is FIFO.
            let outgoing = async move {
                while let Some(item) = out_rx.next().await {
                    if src_tx.send_item(item).is_err() {
                        break;
                    }
                }
                let _ = src_tx.close();
            };

            // Moves in_tx so that the deferred channel's stream terminates
            // as soon as the source's stream does.
            let incoming = async move {
                loop {
                    match src_rx.recv().await {
                        Ok(Some(value)) => {
                            if in_tx.unbounded_send(Ok(value)).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            if in_tx.unbounded_send(Err(err)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                    }
                }
            };

            join!(outgoing, incoming);
        }
        Ok(Err(err)) => {
            let _ = in_tx.unbounded_send(Err(err));
        }
        // Completer dropped unfulfilled; terminate cleanly.
        Err(_) => (),
    }

    // Dropping in_tx terminates the deferred channel's stream; dropping
    // out_rx detaches its sink.
}
