//! Minimal RFC 1459/2812-subset line protocol: just enough framing to
//! support the session's command table. A fuller IRCv3 stack (capability
//! negotiation, SASL, CRDT-synced state, S2S) has no counterpart here —
//! see DESIGN.md.

pub mod parse;
