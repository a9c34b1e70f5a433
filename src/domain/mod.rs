//! Endpoint model and probe cycle
//!
//! Parses configured resources into items and drives resolution and probing for them.

pub mod item;
pub mod probe;
