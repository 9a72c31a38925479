//! Multiplexer task.

use futures::{channel::mpsc, future, stream, Stream, StreamExt};
use std::{collections::HashMap, pin::Pin};
use tokio::sync::oneshot;
use tokio_stream::StreamMap;

use super::OpenError;
use crate::{
    chan::{Receiver, RecvError, Sender},
    frame::Frame,
    id::ChannelId,
};

/// A request to the multiplexer task.
pub(crate) enum MuxReq<T> {
    /// Register a virtual channel.
    Open {
        /// Identifier assigned by the other endpoint, or `None` to assign a
        /// fresh one.
        id: Option<ChannelId>,
        /// Registered parts for assembling the virtual channel front-end.
        reply: oneshot::Sender<Result<VirtualParts<T>, OpenError>>,
    },
}

/// Queue ends of a registered virtual channel.
pub(crate) struct VirtualParts<T> {
    /// Identifier carried by outgoing frames.
    pub output: ChannelId,
    /// Incoming messages, fed by the multiplexer task.
    pub in_rx: mpsc::UnboundedReceiver<Result<T, RecvError>>,
    /// Outgoing messages, drained by the multiplexer task.
    pub out_tx: mpsc::UnboundedSender<Result<T, RecvError>>,
}

/// An event on a virtual channel's outgoing queue.
enum OutEvent<T> {
    /// An event to be framed and sent.
    Item(Result<T, RecvError>),
    /// The virtual channel's sink has been closed.
    Closed,
}

/// Outgoing queue of a virtual channel, terminated by a close marker.
type OutStream<T> = Pin<Box<dyn Stream<Item = OutEvent<T>> + Send>>;

/// Task multiplexing virtual channels over the underlying channel.
///
/// Owns the underlying channel and the virtual channel registries, both
/// keyed by the identifier seen on incoming frames. Runs until the
/// underlying stream terminates or the last virtual channel is closed.
pub(crate) struct MuxTask<T> {
    /// Sending half of the underlying channel.
    inner_tx: Sender<Frame<T>>,
    /// Receiving half of the underlying channel.
    inner_rx: Receiver<Frame<T>>,
    /// Open requests from multiplexer handles.
    req_rx: mpsc::UnboundedReceiver<MuxReq<T>>,
    /// All multiplexer handles have been dropped.
    reqs_done: bool,
    /// Incoming-message queues by input identifier.
    inputs: HashMap<ChannelId, mpsc::UnboundedSender<Result<T, RecvError>>>,
    /// Outgoing-message queues by input identifier.
    outputs: StreamMap<ChannelId, OutStream<T>>,
    /// Output identifier of each registered virtual channel.
    out_ids: HashMap<ChannelId, ChannelId>,
    /// Next identifier for locally originated virtual channels.
    next_id: u64,
}

impl<T> MuxTask<T>
where
    T: Send + 'static,
{
    pub(crate) fn new(
        inner_tx: Sender<Frame<T>>, inner_rx: Receiver<Frame<T>>, req_rx: mpsc::UnboundedReceiver<MuxReq<T>>,
    ) -> Self {
        Self {
            inner_tx,
            inner_rx,
            req_rx,
            reqs_done: false,
            inputs: HashMap::new(),
            outputs: StreamMap::new(),
            out_ids: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registers a virtual channel under the given identifiers.
    pub(crate) fn register(&mut self, input: ChannelId, output: ChannelId) -> VirtualParts<T> {
        let (in_tx, in_rx) = mpsc::unbounded();
        let (out_tx, out_rx) = mpsc::unbounded();

        self.inputs.insert(input, in_tx);
        self.out_ids.insert(input, output);

        let out_stream: OutStream<T> =
            Box::pin(out_rx.map(OutEvent::Item).chain(stream::once(future::ready(OutEvent::Closed))));
        self.outputs.insert(input, out_stream);

        VirtualParts { output, in_rx, out_tx }
    }

    /// Runs the multiplexer.
    pub(crate) async fn run(mut self) {
        tracing::debug!("multiplexer task starting");

        loop {
            let reqs_done = self.reqs_done;
            let outputs_empty = self.outputs.is_empty();

            tokio::select! {
                frame = self.inner_rx.recv() => match frame {
                    Ok(Some(frame)) => self.handle_frame(frame),
                    Err(err) => {
                        // Transport errors surface on the default virtual
                        // channel only; frame processing continues.
                        if let Some(in_tx) = self.inputs.get(&ChannelId::DEFAULT) {
                            let _ = in_tx.unbounded_send(Err(err));
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("underlying channel terminated; tearing down");
                        return;
                    }
                },
                req = self.req_rx.next(), if !reqs_done => match req {
                    Some(MuxReq::Open { id, reply }) => self.handle_open(id, reply),
                    None => self.reqs_done = true,
                },
                Some((input, event)) = self.outputs.next(), if !outputs_empty => match event {
                    OutEvent::Item(Ok(payload)) => {
                        let id = self.out_ids[&input];
                        let _ = self.inner_tx.send(Frame::Message { id, payload });
                    }
                    // Virtual sinks fail on error events, so none arrive here.
                    OutEvent::Item(Err(_)) => (),
                    OutEvent::Closed => {
                        if self.unregister(input) {
                            return;
                        }
                    }
                },
            }
        }
    }

    /// Dispatches an incoming frame.
    fn handle_frame(&mut self, frame: Frame<T>) {
        match frame {
            Frame::Message { id, payload } => match self.inputs.get(&id) {
                Some(in_tx) => {
                    let _ = in_tx.unbounded_send(Ok(payload));
                }
                // Late arrival after close; expected race window.
                None => tracing::trace!("dropping message for unknown channel {id}"),
            },
            Frame::Close { id } => {
                if self.inputs.remove(&id).is_none() {
                    tracing::trace!("dropping close for unknown channel {id}");
                }
            }
        }
    }

    /// Registers a virtual channel for an open request.
    fn handle_open(
        &mut self, id: Option<ChannelId>, reply: oneshot::Sender<Result<VirtualParts<T>, OpenError>>,
    ) {
        let (input, output) = match id {
            // Each local origination consumes two identifiers, one per
            // direction.
            None => {
                let output = ChannelId(self.next_id);
                self.next_id += 2;
                (output.reply(), output)
            }
            Some(id) => (id, id.reply()),
        };

        if self.out_ids.contains_key(&input) || self.inputs.contains_key(&input) {
            let _ = reply.send(Err(OpenError::DuplicateId(input)));
            return;
        }

        tracing::debug!("registering virtual channel with input id {input} and output id {output}");
        let parts = self.register(input, output);
        let _ = reply.send(Ok(parts));
    }

    /// Removes a virtual channel whose sink has been closed and announces
    /// the closure.
    ///
    /// Returns whether this was the last registered channel, in which case
    /// the underlying sink has been closed and the task must exit.
    fn unregister(&mut self, input: ChannelId) -> bool {
        let Some(output) = self.out_ids.remove(&input) else { return false };
        self.inputs.remove(&input);
        self.outputs.remove(&input);

        let _ = self.inner_tx.send(Frame::Close { id: output });

        if self.out_ids.is_empty() {
            tracing::debug!("all virtual channels closed; closing underlying channel");
            let _ = self.inner_tx.close();
            true
        } else {
            false
        }
    }
}
