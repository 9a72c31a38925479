//
// Copyright 2023 duplink contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Bidirectional typed message channels.
//!
//! A [channel](Channel) pairs a single-subscription incoming stream of values
//! with a typed outgoing sink, together forming one endpoint of a logical
//! connection. Every channel produced by this crate honors one lifecycle
//! contract: closing the sink terminates the stream, a terminated stream puts
//! the sink into a silently-dropping state, and the sink's [done
//! future](chan::Sender::done) resolves exactly once.
//!
//! Duplink is written in 100% safe Rust and builds upon the
//! [Tokio](https://docs.rs/tokio) asynchronous runtime. Pump tasks driving
//! the channels are spawned onto the ambient runtime, so channels must be
//! created from within a runtime context.
//!
//! # Building channels
//!
//! [`Channel::from_parts`] adapts any pair of a [`Stream`](futures::Stream)
//! and a [`Sink`](futures::Sink) into a channel satisfying the contract.
//! [`pair::Pair`] creates two channels connected back-to-back through
//! in-memory queues. The `duplink-transport-port` crate adapts one-way
//! message ports.
//!
//! # Composing channels
//!
//! Channels are composed with [transformers](transform::Transformer):
//! [`disconnect::Disconnector`] severs every channel it has wrapped on
//! demand, and the [`json`] module (feature `json`) translates between raw
//! bytes and typed JSON documents. [`mux::Multiplexer`] carries any number of
//! independent virtual channels over one underlying channel.
//!
//! # Deferred channels
//!
//! [`completer::ChannelCompleter`] hands out a channel whose other end is
//! supplied later; values written in the meantime are buffered in order.

pub mod chan;
pub mod completer;
pub mod disconnect;
pub mod frame;
mod guard;
pub mod id;
pub mod mux;
pub mod pair;
pub mod transform;

#[cfg(feature = "json")]
#[cfg_attr(docsrs, doc(cfg(feature = "json")))]
pub mod json;

pub use chan::{Channel, ErrorPolicy, Receiver, RecvError, SendError, Sender};
pub use frame::Frame;
pub use id::ChannelId;
pub use mux::{Multiplexer, VirtualChannel};
