//! # Nexus Events
//!
//! In-process topic publish/subscribe for decoupled component
//! communication: wildcard subscriptions, bounded non-blocking publish,
//! and per-subscriber FIFO delivery with failure isolation.

pub mod bus;
pub mod event;
pub mod pattern;

pub use bus::{handler, EventBus, EventHandler, SubscribeOptions};
pub use event::{topics, Event};
pub use pattern::EventPattern;
