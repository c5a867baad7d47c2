//! Payloads and their ownership arena.

/// Generational ownership arena for walk payloads.
pub mod arena;
/// The payload variants.
pub mod data;
