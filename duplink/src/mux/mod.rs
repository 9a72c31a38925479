//! Multiplexing many virtual channels over one channel.
//!
//! A [Multiplexer] wraps an underlying channel carrying [frames](Frame) and
//! fans any number of independent [virtual channels](VirtualChannel) out over
//! it. A default virtual channel with identifier `0` exists on both
//! endpoints without a handshake; further channels are opened with
//! [`open`](Multiplexer::open) on one endpoint and adopted with
//! [`open_with`](Multiplexer::open_with) on the other, using an identifier
//! communicated over an existing channel.
//!
//! Virtual channels are independent: closing one does not affect the others
//! and ordering is guaranteed only within a channel. The underlying channel
//! is closed once the default channel's sink and all other virtual channels
//! have been closed.
//!
//! ```no_run
//! # async fn doc(underlying: duplink::Channel<duplink::Frame<String>>) {
//! use duplink::Multiplexer;
//!
//! let (mux, default) = Multiplexer::new(underlying);
//! let chat = mux.open().await.unwrap();
//! default.send(format!("please connect to {}", chat.id())).unwrap();
//! # }
//! ```

mod task;

use futures::channel::mpsc;
use std::{error::Error, fmt, io};
use tokio::sync::oneshot;

use self::task::{MuxReq, MuxTask, VirtualParts};
use crate::{
    chan::{Channel, ErrorPolicy, Receiver, RecvError, SendError, Sender},
    frame::Frame,
    id::ChannelId,
};

/// Error opening a virtual channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    /// The multiplexer has been torn down because its underlying channel
    /// terminated or all virtual channels were closed.
    Terminated,
    /// A virtual channel with this identifier is already registered.
    DuplicateId(ChannelId),
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Terminated => write!(f, "multiplexer has been torn down"),
            Self::DuplicateId(id) => write!(f, "virtual channel {id} is already registered"),
        }
    }
}

impl Error for OpenError {}

impl From<OpenError> for io::Error {
    fn from(err: OpenError) -> Self {
        let kind = match &err {
            OpenError::Terminated => io::ErrorKind::NotConnected,
            OpenError::DuplicateId(_) => io::ErrorKind::AlreadyExists,
        };
        io::Error::new(kind, err)
    }
}

/// Multiplexes virtual channels over one underlying channel.
///
/// Created by [`Multiplexer::new`], which also returns the default virtual
/// channel. The multiplexer owns the underlying channel: nothing else may
/// write to it afterwards. Clones refer to the same multiplexer.
pub struct Multiplexer<T> {
    req_tx: mpsc::UnboundedSender<MuxReq<T>>,
}

impl<T> fmt::Debug for Multiplexer<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Multiplexer").finish()
    }
}

impl<T> Clone for Multiplexer<T> {
    fn clone(&self) -> Self {
        Self { req_tx: self.req_tx.clone() }
    }
}

impl<T> Multiplexer<T>
where
    T: Send + 'static,
{
    /// Wraps an underlying channel, returning the multiplexer and its
    /// default virtual channel.
    ///
    /// The default virtual channel has identifier `0` and exists on both
    /// endpoints without a handshake. Transport errors of the underlying
    /// channel are delivered on its stream.
    pub fn new(underlying: Channel<Frame<T>>) -> (Self, VirtualChannel<T>) {
        let (inner_tx, inner_rx) = underlying.split();
        let (req_tx, req_rx) = mpsc::unbounded();

        let mut task = MuxTask::new(inner_tx, inner_rx, req_rx);
        let parts = task.register(ChannelId::DEFAULT, ChannelId::DEFAULT);
        tokio::spawn(task.run());

        let mux = Self { req_tx };
        let default = mux.assemble(parts);
        (mux, default)
    }

    /// Opens a new virtual channel.
    ///
    /// The channel's identifier is assigned from this endpoint's allocator;
    /// communicate it to the other endpoint, which adopts the channel with
    /// [`open_with`](Self::open_with).
    pub async fn open(&self) -> Result<VirtualChannel<T>, OpenError> {
        self.open_req(None).await
    }

    /// Connects to a virtual channel opened by the other endpoint.
    pub async fn open_with(&self, id: ChannelId) -> Result<VirtualChannel<T>, OpenError> {
        self.open_req(Some(id)).await
    }

    async fn open_req(&self, id: Option<ChannelId>) -> Result<VirtualChannel<T>, OpenError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.req_tx.unbounded_send(MuxReq::Open { id, reply: reply_tx }).map_err(|_| OpenError::Terminated)?;
        let parts = reply_rx.await.map_err(|_| OpenError::Terminated)??;
        Ok(self.assemble(parts))
    }

    /// Builds the virtual channel front-end from its registered parts.
    fn assemble(&self, parts: VirtualParts<T>) -> VirtualChannel<T> {
        let VirtualParts { output, in_rx, out_tx } = parts;
        // Virtual channels cannot carry errors as values; adding an error
        // closes the virtual sink.
        let channel = Channel::from_parts(in_rx, out_tx, ErrorPolicy::Fail);
        VirtualChannel { id: output, channel, mux: self.clone() }
    }
}

/// One of many logical channels carried over a multiplexer.
///
/// Behaves as a regular channel with an [identifier](Self::id) attached.
/// Closing the sink closes the virtual channel on both endpoints; other
/// virtual channels on the same multiplexer are unaffected.
pub struct VirtualChannel<T> {
    id: ChannelId,
    channel: Channel<T>,
    mux: Multiplexer<T>,
}

impl<T> fmt::Debug for VirtualChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VirtualChannel").field("id", &self.id).finish()
    }
}

impl<T> VirtualChannel<T>
where
    T: Send + 'static,
{
    /// Identifier of this virtual channel.
    ///
    /// This is the identifier carried by outgoing frames; the other endpoint
    /// adopts the channel under the same number.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// The multiplexer carrying this channel.
    pub fn multiplexer(&self) -> &Multiplexer<T> {
        &self.mux
    }

    /// Opens a further virtual channel on the same multiplexer.
    pub async fn open(&self) -> Result<VirtualChannel<T>, OpenError> {
        self.mux.open().await
    }

    /// Connects to a virtual channel opened by the other endpoint, on the
    /// same multiplexer.
    pub async fn open_with(&self, id: ChannelId) -> Result<VirtualChannel<T>, OpenError> {
        self.mux.open_with(id).await
    }

    /// The sending half.
    pub fn sender(&self) -> &Sender<T> {
        self.channel.sender()
    }

    /// Receives the next value.
    #[inline]
    pub async fn recv(&mut self) -> Result<Option<T>, RecvError> {
        self.channel.recv().await
    }

    /// Enqueues a value for sending.
    #[inline]
    pub fn send(&self, value: T) -> Result<(), SendError> {
        self.channel.send(value)
    }

    /// Discards the identifier and multiplexer handle, leaving the plain
    /// channel.
    pub fn into_channel(self) -> Channel<T> {
        self.channel
    }

    /// Splits this virtual channel into its sending and receiving halves.
    pub fn split(self) -> (Sender<T>, Receiver<T>) {
        self.channel.split()
    }
}
