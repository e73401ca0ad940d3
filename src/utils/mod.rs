//! Utility Module
//!
//! - [`Coroutines`]: single-shot continuations resolved when an event fires
//! - [`FrameClock`]: frame clock (std `Instant`, `web-time` on wasm)

pub mod coroutines;
pub mod time;

pub use coroutines::Coroutines;
pub use time::FrameClock;
