//! Virtual channel identifiers.

use std::fmt;

/// Identifier of a virtual channel on a [multiplexer](crate::mux::Multiplexer).
///
/// The identifier `0` is reserved for the default virtual channel that exists
/// on both endpoints without a handshake. Each endpoint assigns odd
/// identifiers to the virtual channels it originates; messages travelling
/// back toward the originator use the following even identifier. The parity
/// of an identifier thus encodes which endpoint originated the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChannelId(pub u64);

impl ChannelId {
    /// Identifier of the default virtual channel.
    pub const DEFAULT: Self = Self(0);

    /// Whether this identifies the default virtual channel.
    pub fn is_default(self) -> bool {
        self.0 == 0
    }

    /// Whether this identifier was assigned by the endpoint that originated
    /// the virtual channel.
    pub fn is_originator(self) -> bool {
        self.0 % 2 == 1
    }

    /// The identifier used for messages travelling in the opposite direction.
    pub(crate) fn reply(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChannelId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChannelId> for u64 {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}
