#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! [Duplink](duplink) transport: one-way message ports
//!
//! Adapts a pair of asynchronous one-way message ports into the
//! bidirectional [channel](duplink::Channel) contract. A [port](port) is an
//! unbounded in-process message queue whose messages are either values or
//! further [send endpoints](PortSender), so that a reply path can travel
//! over the port itself.
//!
//! [`channel`] builds a channel from an already established port pair. When
//! only a single one-way port connects the two parties, the symmetric
//! handshake factories bring up a full channel: the connecting party calls
//! [`connect_send`] with the send endpoint it was given, which transmits a
//! fresh reply endpoint as the very first message; the accepting party calls
//! [`connect_receive`], which awaits exactly that endpoint. Any other first
//! message is a protocol violation.
//!
//! One-way ports carry no close frames, so closing the incoming port is the
//! only disconnect signal at this transport level. The incoming port is
//! therefore owned by the channel; callers must not close it independently.

use futures::{channel::mpsc, Stream, StreamExt};
use std::{
    error::Error,
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use duplink::{
    chan::{Channel, ErrorPolicy, RecvError},
    completer::ChannelCompleter,
};

/// A message travelling over a one-way port.
#[derive(Debug)]
pub enum PortMsg<T> {
    /// A plain value.
    Value(T),
    /// A send endpoint, establishing a reply path.
    Port(PortSender<T>),
}

/// Sending endpoint of a one-way message port.
///
/// Sending never blocks; the port buffers without bound. Clones refer to the
/// same port.
pub struct PortSender<T> {
    tx: mpsc::UnboundedSender<PortMsg<T>>,
}

impl<T> fmt::Debug for PortSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PortSender").finish()
    }
}

impl<T> Clone for PortSender<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> PortSender<T> {
    /// Sends a value over the port.
    pub fn send(&self, value: T) -> Result<(), PortClosed> {
        self.send_msg(PortMsg::Value(value))
    }

    /// Sends a send endpoint over the port.
    pub fn send_port(&self, port: PortSender<T>) -> Result<(), PortClosed> {
        self.send_msg(PortMsg::Port(port))
    }

    fn send_msg(&self, msg: PortMsg<T>) -> Result<(), PortClosed> {
        self.tx.unbounded_send(msg).map_err(|_| PortClosed)
    }
}

/// Receiving endpoint of a one-way message port.
///
/// The port ends once every [PortSender] referring to it has been dropped.
pub struct PortReceiver<T> {
    rx: mpsc::UnboundedReceiver<PortMsg<T>>,
}

impl<T> fmt::Debug for PortReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PortReceiver").finish()
    }
}

impl<T> PortReceiver<T> {
    /// Receives the next message.
    pub async fn recv(&mut self) -> Option<PortMsg<T>> {
        self.rx.next().await
    }
}

impl<T> Stream for PortReceiver<T> {
    type Item = PortMsg<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        Pin::into_inner(self).rx.poll_next_unpin(cx)
    }
}

/// The receiving endpoint of the port has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortClosed;

impl fmt::Display for PortClosed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "port is closed")
    }
}

impl Error for PortClosed {}

/// Creates a one-way message port.
pub fn port<T>() -> (PortSender<T>, PortReceiver<T>) {
    let (tx, rx) = mpsc::unbounded();
    (PortSender { tx }, PortReceiver { rx })
}

/// Builds a channel from an established port pair.
///
/// The channel's stream is a view of `incoming`; its sink sends over
/// `outgoing`. A send endpoint received where a value is expected is
/// delivered as a [protocol violation](RecvError::Protocol) on the stream.
///
/// The channel is in fail-on-error mode: adding an error to the sink
/// resolves its done future with the error and closes the incoming port,
/// without transmitting anything. Closing the sink likewise closes the
/// incoming port, as one-way ports carry no close frames.
pub fn channel<T>(incoming: PortReceiver<T>, outgoing: PortSender<T>) -> Channel<T>
where
    T: Send + 'static,
{
    let stream = incoming.map(|msg| match msg {
        PortMsg::Value(value) => Ok(value),
        PortMsg::Port(_) => Err(RecvError::protocol("unexpected send endpoint")),
    });

    Channel::from_parts(stream, PortSink { outgoing }, ErrorPolicy::Fail)
}

/// Establishes a channel over a single one-way port, connecting side.
///
/// Creates a fresh receive port and transmits its send endpoint as the first
/// message over `outgoing`; the other party accepts it with
/// [`connect_receive`]. The channel is usable immediately.
pub fn connect_send<T>(outgoing: PortSender<T>) -> Channel<T>
where
    T: Send + 'static,
{
    let (reply_tx, reply_rx) = port();
    if outgoing.send_port(reply_tx).is_err() {
        tracing::debug!("peer port closed before handshake");
    }
    channel(reply_rx, outgoing)
}

/// Establishes a channel over a single one-way port, accepting side.
///
/// Takes ownership of `incoming` and awaits the peer's send endpoint as the
/// first message. The channel is usable immediately; values sent before the
/// handshake completes are buffered in order. If the first message is not a
/// send endpoint, or the port closes first, the channel's stream delivers a
/// single [protocol violation](RecvError::Protocol) and terminates.
pub fn connect_receive<T>(incoming: PortReceiver<T>) -> Channel<T>
where
    T: Send + 'static,
{
    ChannelCompleter::from_future(async move {
        let mut incoming = incoming;
        match incoming.recv().await {
            Some(PortMsg::Port(outgoing)) => Ok(channel(incoming, outgoing)),
            Some(PortMsg::Value(_)) => {
                Err(RecvError::protocol("expected send endpoint as first handshake message"))
            }
            None => Err(RecvError::protocol("port closed during handshake")),
        }
    })
}

/// Sink sending values over the outgoing port.
///
/// Error events never reach this sink: the channel is in fail-on-error mode,
/// which stops before forwarding.
struct PortSink<T> {
    outgoing: PortSender<T>,
}

impl<T> futures::Sink<Result<T, RecvError>> for PortSink<T> {
    type Error = PortClosed;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Result<T, RecvError>) -> Result<(), Self::Error> {
        match item {
            Ok(value) => Pin::into_inner(self).outgoing.send(value),
            Err(_) => Ok(()),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        // One-way ports carry no close frames; dropping the sender is the
        // only signal the other endpoint observes.
        Poll::Ready(Ok(()))
    }
}
