//! # Event Bus Module
//!
//! Publish/subscribe channel for lifecycle notices (data sent, command
//! completed, machine state changed, disconnected). Observers are optional;
//! the scheduler never waits on them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gcodelink_core::event_bus::{event_bus, AppEvent, EventCategory, EventFilter};
//!
//! let subscription = event_bus().subscribe(
//!     EventFilter::Categories(vec![EventCategory::Command]),
//!     |event| println!("{}", event.description()),
//! );
//!
//! event_bus().unsubscribe(subscription);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
