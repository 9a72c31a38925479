//! Channel contract tests.

use futures::{channel::mpsc, stream, StreamExt};
use std::{error::Error, fmt};
use tokio::sync::oneshot;

use duplink::{
    chan::{Channel, ErrorPolicy, RecvError, SendError},
    pair::Pair,
};

/// Error used as a test payload.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TestError(&'static str);

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for TestError {}

#[test_log::test(tokio::test)]
async fn fail_on_error_resolves_done() {
    let (sink_tx, mut sink_rx) = mpsc::unbounded();
    let channel = Channel::<u32>::from_parts(stream::pending(), sink_tx, ErrorPolicy::Fail);
    let (tx, mut rx) = channel.split();

    tx.send_error(TestError("oh no")).unwrap();

    match tx.done().await {
        Err(RecvError::Remote(err)) => assert_eq!(err.to_string(), "oh no"),
        other => panic!("unexpected done result: {other:?}"),
    }

    // The stream terminates without having delivered a value and the
    // underlying sink received nothing.
    assert_eq!(rx.recv().await.unwrap(), None);
    assert!(sink_rx.next().await.is_none());

    // The sink counts as closed.
    assert_eq!(tx.send(1), Err(SendError::Closed));
}

#[test_log::test(tokio::test)]
async fn close_cuts_stream() {
    let (sink_tx, _sink_rx) = mpsc::unbounded();
    let source = stream::iter([Ok(1), Ok(2), Ok(3)]);
    let channel = Channel::<u32>::from_parts(source, sink_tx, ErrorPolicy::Forward);
    let (tx, mut rx) = channel.split();

    assert_eq!(rx.recv().await.unwrap(), Some(1));
    assert_eq!(rx.recv().await.unwrap(), Some(2));

    // Closing the sink terminates the stream before any further value.
    tx.close().unwrap();
    assert_eq!(rx.recv().await.unwrap(), None);

    tx.done().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn close_flushes_queued_values() {
    let (sink_tx, sink_rx) = mpsc::unbounded();
    let channel = Channel::<u32>::from_parts(stream::pending(), sink_tx, ErrorPolicy::Forward);
    let (tx, _rx) = channel.split();

    for i in 1..=5 {
        tx.send(i).unwrap();
    }
    tx.close().unwrap();
    tx.done().await.unwrap();

    let sent: Vec<_> = sink_rx.map(|item| item.unwrap()).collect().await;
    assert_eq!(sent, vec![1, 2, 3, 4, 5]);
}

#[test_log::test(tokio::test)]
async fn add_after_close_fails() {
    let (sink_tx, _sink_rx) = mpsc::unbounded();
    let channel = Channel::<u32>::from_parts(stream::pending(), sink_tx, ErrorPolicy::Forward);
    let (tx, _rx) = channel.split();

    tx.close().unwrap();
    assert_eq!(tx.send(1), Err(SendError::Closed));
    assert_eq!(tx.send_error(TestError("late")), Err(SendError::Closed));

    // Repeated close is allowed and resolves the same done.
    tx.close().unwrap();
    tx.done().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn terminal_puts_sink_into_silent_drop() {
    let (sink_tx, mut sink_rx) = mpsc::unbounded();
    let channel = Channel::<u32>::from_parts(stream::empty(), sink_tx, ErrorPolicy::Forward);
    let (tx, mut rx) = channel.split();

    // The source terminates immediately.
    assert_eq!(rx.recv().await.unwrap(), None);

    // Adds after the terminal succeed without reaching the underlying sink.
    tx.send(1).unwrap();
    tx.send_error(TestError("ignored")).unwrap();
    tx.close().unwrap();
    tx.done().await.unwrap();

    assert!(sink_rx.next().await.is_none());
}

#[test_log::test(tokio::test)]
async fn dropping_receiver_does_not_affect_sink() {
    let Pair { local, foreign } = Pair::<u32>::new(ErrorPolicy::Forward);
    let (local_tx, local_rx) = local.split();
    let (foreign_tx, mut foreign_rx) = foreign.split();

    // Cancel the subscription.
    drop(local_rx);

    // The sink remains usable.
    local_tx.send(7).unwrap();
    assert_eq!(foreign_rx.recv().await.unwrap(), Some(7));

    // A later terminal from the other endpoint still resolves done.
    foreign_tx.close().unwrap();
    local_tx.done().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn pair_drains_then_terminates() {
    let Pair { local, foreign } = Pair::<u32>::new(ErrorPolicy::Forward);
    let (local_tx, _local_rx) = local.split();
    let (_foreign_tx, mut foreign_rx) = foreign.split();

    local_tx.send(1).unwrap();
    local_tx.send(2).unwrap();
    local_tx.close().unwrap();

    assert_eq!(foreign_rx.recv().await.unwrap(), Some(1));
    assert_eq!(foreign_rx.recv().await.unwrap(), Some(2));
    assert_eq!(foreign_rx.recv().await.unwrap(), None);
}

#[test_log::test(tokio::test)]
async fn pair_forwards_errors() {
    let Pair { local, foreign } = Pair::<u32>::new(ErrorPolicy::Forward);
    let (local_tx, _local_rx) = local.split();
    let (_foreign_tx, mut foreign_rx) = foreign.split();

    local_tx.send(1).unwrap();
    local_tx.send_error(TestError("boom")).unwrap();
    local_tx.send(2).unwrap();

    assert_eq!(foreign_rx.recv().await.unwrap(), Some(1));
    match foreign_rx.recv().await {
        Err(RecvError::Remote(err)) => assert_eq!(err.to_string(), "boom"),
        other => panic!("unexpected event: {other:?}"),
    }
    // The stream continues after an error event.
    assert_eq!(foreign_rx.recv().await.unwrap(), Some(2));
}

#[test_log::test(tokio::test)]
async fn pipe_relays_both_directions() {
    let (a_src_tx, a_src_rx) = mpsc::unbounded();
    let (a_sink_tx, mut a_sink_rx) = mpsc::unbounded();
    let a = Channel::<u32>::from_parts(a_src_rx, a_sink_tx, ErrorPolicy::Forward);

    let (b_src_tx, b_src_rx) = mpsc::unbounded();
    let (b_sink_tx, mut b_sink_rx) = mpsc::unbounded();
    let b = Channel::<u32>::from_parts(b_src_rx, b_sink_tx, ErrorPolicy::Forward);

    a.pipe(b);

    for v in [1, 2, 3] {
        a_src_tx.unbounded_send(Ok(v)).unwrap();
    }
    for v in [4, 5, 6] {
        b_src_tx.unbounded_send(Ok(v)).unwrap();
    }

    for v in [1, 2, 3] {
        assert_eq!(b_sink_rx.next().await.unwrap().unwrap(), v);
    }
    for v in [4, 5, 6] {
        assert_eq!(a_sink_rx.next().await.unwrap().unwrap(), v);
    }

    // A terminal on A's stream closes B's sink.
    drop(a_src_tx);
    assert!(b_sink_rx.next().await.is_none());

    // The teardown cascades back and closes A's sink as well.
    assert!(a_sink_rx.next().await.is_none());
}

#[test_log::test(tokio::test)]
async fn send_all_is_exclusive_and_ordered() {
    let (sink_tx, sink_rx) = mpsc::unbounded();
    let channel = Channel::<u32>::from_parts(stream::pending(), sink_tx, ErrorPolicy::Forward);
    let (tx, _rx) = channel.split();

    let (started_tx, started_rx) = oneshot::channel();
    let (gate_tx, gate_rx) = oneshot::channel::<()>();

    let source = stream::once(async move {
        let _ = started_tx.send(());
        Ok(1)
    })
    .chain(stream::once(async move {
        let _ = gate_rx.await;
        Ok(2)
    }));

    let pump_tx = tx.clone();
    let pump = tokio::spawn(async move { pump_tx.send_all(source).await });

    // While the pump is in progress, all other sink operations fail.
    started_rx.await.unwrap();
    assert_eq!(tx.send(99), Err(SendError::Pumping));
    assert_eq!(tx.send_error(TestError("nested")), Err(SendError::Pumping));
    assert_eq!(tx.close(), Err(SendError::Pumping));

    gate_tx.send(()).unwrap();
    pump.await.unwrap().unwrap();

    // Afterwards the sink is usable again.
    tx.send(3).unwrap();
    tx.close().unwrap();
    tx.done().await.unwrap();

    let sent: Vec<_> = sink_rx.map(|item| item.unwrap()).collect().await;
    assert_eq!(sent, vec![1, 2, 3]);
}

#[test_log::test(tokio::test)]
async fn change_stream_keeps_sink() {
    let (src_tx, src_rx) = mpsc::unbounded();
    let (sink_tx, sink_rx) = mpsc::unbounded();
    let channel = Channel::<u32>::from_parts(src_rx, sink_tx, ErrorPolicy::Forward);

    let mut channel = channel.change_stream(|stream| stream.map(|item| item.map(|v| v * 10)));

    src_tx.unbounded_send(Ok(1)).unwrap();
    src_tx.unbounded_send(Ok(2)).unwrap();
    assert_eq!(channel.recv().await.unwrap(), Some(10));
    assert_eq!(channel.recv().await.unwrap(), Some(20));

    // The sending half is untouched by the stream change.
    channel.send(7).unwrap();
    let (tx, _rx) = channel.split();
    tx.close().unwrap();
    tx.done().await.unwrap();

    let sent: Vec<_> = sink_rx.map(|item| item.unwrap()).collect().await;
    assert_eq!(sent, vec![7]);
}

#[test_log::test(tokio::test)]
async fn change_sink_keeps_stream() {
    use futures::SinkExt;

    let (src_tx, src_rx) = mpsc::unbounded();
    let (sink_tx, sink_rx) = mpsc::unbounded();
    let channel = Channel::<u32>::from_parts(src_rx, sink_tx, ErrorPolicy::Forward);

    let mut channel = channel.change_sink(|sink| {
        sink.with(|item: Result<u32, RecvError>| async move { Ok::<_, SendError>(item.map(|v| v + 1)) })
    });

    channel.send(1).unwrap();
    channel.send(2).unwrap();

    // The receiving half is untouched by the sink change.
    src_tx.unbounded_send(Ok(5)).unwrap();
    assert_eq!(channel.recv().await.unwrap(), Some(5));

    let (tx, _rx) = channel.split();
    tx.close().unwrap();
    tx.done().await.unwrap();

    let sent: Vec<_> = sink_rx.map(|item| item.unwrap()).collect().await;
    assert_eq!(sent, vec![2, 3]);
}
