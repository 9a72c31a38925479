//! Multiplexer tests.

use futures::{channel::mpsc, stream, StreamExt};
use std::{error::Error, fmt};

use duplink::{
    chan::{Channel, ErrorPolicy, RecvError},
    mux::{Multiplexer, OpenError},
    pair::Pair,
    ChannelId, Frame,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct TestError(&'static str);

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for TestError {}

/// Two multiplexers connected back-to-back.
fn connected() -> (Multiplexer<String>, duplink::VirtualChannel<String>, Multiplexer<String>, duplink::VirtualChannel<String>)
{
    let Pair { local, foreign } = Pair::<Frame<String>>::new(ErrorPolicy::Forward);
    let (mux_x, default_x) = Multiplexer::new(local);
    let (mux_y, default_y) = Multiplexer::new(foreign);
    (mux_x, default_x, mux_y, default_y)
}

#[test_log::test(tokio::test)]
async fn handshake_over_default_channel() {
    let (mux_x, default_x, mux_y, mut default_y) = connected();

    // X originates a virtual channel and announces it over the default
    // channel.
    let virtual_x = mux_x.open().await.unwrap();
    assert_eq!(virtual_x.id(), ChannelId(1));
    default_x.send(virtual_x.id().to_string()).unwrap();

    // Y adopts the announced channel.
    let announced: u64 = default_y.recv().await.unwrap().unwrap().parse().unwrap();
    let mut virtual_y = mux_y.open_with(ChannelId(announced)).await.unwrap();
    assert_eq!(virtual_y.id(), ChannelId(2));

    virtual_x.send("hello".into()).unwrap();
    assert_eq!(virtual_y.recv().await.unwrap().as_deref(), Some("hello"));

    // Y closing its virtual sink terminates X's virtual stream.
    virtual_y.sender().close().unwrap();
    let mut virtual_x = virtual_x;
    assert_eq!(virtual_x.recv().await.unwrap(), None);
}

#[test_log::test(tokio::test)]
async fn originated_ids_are_odd_and_unique() {
    let (mux_x, _default_x, _mux_y, _default_y) = connected();

    let first = mux_x.open().await.unwrap();
    let second = mux_x.open().await.unwrap();
    let third = mux_x.open().await.unwrap();

    assert_eq!(first.id(), ChannelId(1));
    assert_eq!(second.id(), ChannelId(3));
    assert_eq!(third.id(), ChannelId(5));
    assert!(first.id().is_originator());
}

#[test_log::test(tokio::test)]
async fn duplicate_id_is_rejected() {
    let (_mux_x, _default_x, mux_y, _default_y) = connected();

    let _adopted = mux_y.open_with(ChannelId(1)).await.unwrap();
    assert_eq!(mux_y.open_with(ChannelId(1)).await.unwrap_err(), OpenError::DuplicateId(ChannelId(1)));

    // The default channel's identifier is taken as well.
    assert!(matches!(mux_y.open_with(ChannelId(0)).await, Err(OpenError::DuplicateId(_))));
}

#[test_log::test(tokio::test)]
async fn virtual_channels_are_independent() {
    let (mux_x, _default_x, mux_y, _default_y) = connected();

    let chat_x = mux_x.open().await.unwrap();
    let log_x = mux_x.open().await.unwrap();
    let mut chat_y = mux_y.open_with(chat_x.id()).await.unwrap();
    let mut log_y = mux_y.open_with(log_x.id()).await.unwrap();

    chat_x.send("one".into()).unwrap();
    log_x.send("two".into()).unwrap();
    assert_eq!(chat_y.recv().await.unwrap().as_deref(), Some("one"));
    assert_eq!(log_y.recv().await.unwrap().as_deref(), Some("two"));

    // Closing one virtual channel does not affect the other.
    chat_x.sender().close().unwrap();
    assert_eq!(chat_y.recv().await.unwrap(), None);

    log_x.send("three".into()).unwrap();
    assert_eq!(log_y.recv().await.unwrap().as_deref(), Some("three"));
}

#[test_log::test(tokio::test)]
async fn closing_all_channels_tears_down() {
    let (mux_x, default_x, _mux_y, mut default_y) = connected();

    let virtual_x = mux_x.open().await.unwrap();

    // Closing every virtual sink on X closes the underlying channel.
    virtual_x.sender().close().unwrap();
    default_x.sender().close().unwrap();

    // Y observes the terminal on its default channel.
    assert_eq!(default_y.recv().await.unwrap(), None);

    // The torn-down multiplexer refuses to open further channels.
    assert_eq!(mux_x.open().await.unwrap_err(), OpenError::Terminated);
}

#[test_log::test(tokio::test)]
async fn transport_errors_surface_on_default_channel() {
    let frames = stream::iter([
        Err(RecvError::transport(TestError("link down"))),
        Ok(Frame::Message { id: ChannelId::DEFAULT, payload: 42u32 }),
    ]);
    let (sink_tx, _sink_rx) = mpsc::unbounded();
    let underlying = Channel::from_parts(frames, sink_tx, ErrorPolicy::Forward);

    let (_mux, mut default) = Multiplexer::new(underlying);

    // The error arrives on the default channel and processing continues.
    match default.recv().await {
        Err(RecvError::Transport(err)) => assert_eq!(err.to_string(), "link down"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(default.recv().await.unwrap(), Some(42));
}

#[test_log::test(tokio::test)]
async fn unknown_channel_frames_are_dropped() {
    let frames = stream::iter([
        Ok(Frame::Message { id: ChannelId(7), payload: 1u32 }),
        Ok(Frame::Close { id: ChannelId(9) }),
        Ok(Frame::Message { id: ChannelId::DEFAULT, payload: 2 }),
    ]);
    let (sink_tx, _sink_rx) = mpsc::unbounded();
    let underlying = Channel::from_parts(frames, sink_tx, ErrorPolicy::Forward);

    let (_mux, mut default) = Multiplexer::new(underlying);

    // Frames for unregistered channels are dropped silently.
    assert_eq!(default.recv().await.unwrap(), Some(2));
}

#[test_log::test(tokio::test)]
async fn close_notification_is_sent_exactly_once() {
    let (frame_tx, frame_rx) = mpsc::unbounded();
    let (sink_tx, sink_rx) = mpsc::unbounded();
    let underlying = Channel::<Frame<u32>>::from_parts(frame_rx, sink_tx, ErrorPolicy::Forward);

    let (mux, default) = Multiplexer::new(underlying);
    let virtual_a = mux.open().await.unwrap();

    virtual_a.send(11).unwrap();
    virtual_a.sender().close().unwrap();
    default.sender().close().unwrap();

    // Ordering is guaranteed within a virtual channel, not across channels.
    let frames: Vec<_> = sink_rx.map(|item| item.unwrap()).collect().await;
    let channel_1: Vec<_> = frames.iter().filter(|frame| frame.id() == ChannelId(1)).cloned().collect();
    assert_eq!(
        channel_1,
        vec![Frame::Message { id: ChannelId(1), payload: 11 }, Frame::Close { id: ChannelId(1) }]
    );
    assert!(frames.contains(&Frame::Close { id: ChannelId::DEFAULT }));
    assert_eq!(frames.len(), 3);

    drop(frame_tx);
}

#[test_log::test(tokio::test)]
async fn underlying_terminal_cascades() {
    let (frame_tx, frame_rx) = mpsc::unbounded();
    let (sink_tx, _sink_rx) = mpsc::unbounded();
    let underlying = Channel::<Frame<u32>>::from_parts(frame_rx, sink_tx, ErrorPolicy::Forward);

    let (mux, mut default) = Multiplexer::new(underlying);
    let mut virtual_a = mux.open().await.unwrap();

    // The underlying stream terminates.
    drop(frame_tx);

    // Every virtual channel terminates and its done resolves.
    assert_eq!(default.recv().await.unwrap(), None);
    assert_eq!(virtual_a.recv().await.unwrap(), None);
    default.sender().done().await.unwrap();
    virtual_a.sender().done().await.unwrap();

    // Sends after the teardown are silently dropped.
    virtual_a.send(1).unwrap();

    assert_eq!(mux.open().await.unwrap_err(), OpenError::Terminated);
}
