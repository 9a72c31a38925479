//! Back-to-back channel pairs.
//!
//! A [Pair] bridges two channels through in-memory unbounded FIFO queues:
//! everything sent on the [local](Pair::local) channel's sink is delivered on
//! the [foreign](Pair::foreign) channel's stream and vice versa. Closing
//! either sink terminates the opposite stream after queued values have
//! drained.
//!
//! Pairs are useful for testing channel-based code and for implementing
//! in-process endpoints of logical connections.

use futures::channel::mpsc;
use std::fmt;

use crate::chan::{Channel, ErrorPolicy};

/// Two channels connected back-to-back through in-memory queues.
///
/// Both channels satisfy the full lifecycle contract. With
/// [`ErrorPolicy::Forward`], errors added to one channel's sink are delivered
/// as stream errors on the other channel.
pub struct Pair<T> {
    /// Channel handed to the code under control of this endpoint.
    pub local: Channel<T>,
    /// Channel handed to the other party.
    pub foreign: Channel<T>,
}

impl<T> fmt::Debug for Pair<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Pair").finish()
    }
}

impl<T> Pair<T>
where
    T: Send + 'static,
{
    /// Creates a connected channel pair.
    pub fn new(policy: ErrorPolicy) -> Self {
        let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded();
        let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded();

        let local = Channel::from_parts(b_to_a_rx, a_to_b_tx, policy);
        let foreign = Channel::from_parts(a_to_b_rx, b_to_a_tx, policy);

        Self { local, foreign }
    }
}

impl<T> Default for Pair<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new(ErrorPolicy::default())
    }
}
