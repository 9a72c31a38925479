//! Multiplexer frames.

use crate::id::ChannelId;

/// A frame carried by the underlying channel of a
/// [multiplexer](crate::mux::Multiplexer).
///
/// On the wire a frame is an ordered record whose first element is the
/// virtual channel identifier: `[id, payload]` carries a message, `[id]`
/// announces closure of the virtual channel. No other shapes are accepted.
/// With the `serde` feature, the [serde](::serde) implementations produce
/// exactly this representation, leaving the concrete encoding of the record
/// to the transport transformer underneath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<T> {
    /// A message for the virtual channel with the given identifier.
    Message {
        /// Virtual channel the payload is for.
        id: ChannelId,
        /// Message payload.
        payload: T,
    },
    /// Closure of the virtual channel with the given identifier.
    Close {
        /// Virtual channel being closed.
        id: ChannelId,
    },
}

impl<T> Frame<T> {
    /// The virtual channel this frame belongs to.
    pub fn id(&self) -> ChannelId {
        match self {
            Self::Message { id, .. } => *id,
            Self::Close { id } => *id,
        }
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
mod serde_impl {
    use serde::{
        de::{self, IgnoredAny, SeqAccess, Visitor},
        ser::SerializeSeq,
        Deserialize, Deserializer, Serialize, Serializer,
    };
    use std::{fmt, marker::PhantomData};

    use super::{ChannelId, Frame};

    impl<T: Serialize> Serialize for Frame<T> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                Self::Message { id, payload } => {
                    let mut seq = serializer.serialize_seq(Some(2))?;
                    seq.serialize_element(&id.0)?;
                    seq.serialize_element(payload)?;
                    seq.end()
                }
                Self::Close { id } => {
                    let mut seq = serializer.serialize_seq(Some(1))?;
                    seq.serialize_element(&id.0)?;
                    seq.end()
                }
            }
        }
    }

    impl<'de, T: Deserialize<'de>> Deserialize<'de> for Frame<T> {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            struct FrameVisitor<T>(PhantomData<T>);

            impl<'de, T: Deserialize<'de>> Visitor<'de> for FrameVisitor<T> {
                type Value = Frame<T>;

                fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "a channel frame of one or two elements")
                }

                fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                    let id: u64 = seq.next_element()?.ok_or_else(|| de::Error::invalid_length(0, &self))?;
                    let id = ChannelId(id);

                    match seq.next_element::<T>()? {
                        Some(payload) => {
                            if seq.next_element::<IgnoredAny>()?.is_some() {
                                return Err(de::Error::invalid_length(3, &self));
                            }
                            Ok(Frame::Message { id, payload })
                        }
                        None => Ok(Frame::Close { id }),
                    }
                }
            }

            deserializer.deserialize_seq(FrameVisitor(PhantomData))
        }
    }
}
