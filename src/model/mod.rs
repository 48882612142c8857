//! Domain model: the gateway's in-memory view of backend accounts, channels,
//! and memberships.

pub mod channel;
pub mod member;

pub use channel::{Channel, ChannelKind, PendingChannel};
pub use member::Member;
