// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The two in-process pub/sub surfaces.
//!
//! - [`EventBus`]: statically typed fan-out for internal coordination.  The
//!   subscription key is the event's Rust type; delivery happens on a small
//!   worker pool behind a bounded queue, and saturation drops events rather
//!   than blocking publishers.
//! - [`EventRouter`]: pattern-matched (`entity.action` globs) fan-out of
//!   domain [`StreamEvent`]s to external subscribers, each behind its own
//!   bounded channel.
//!
//! Neither surface guarantees delivery — a subscriber that cannot keep up
//! loses events, and both count what they drop.

mod bus;
mod router;

pub use bus::{BusSubscription, EventBus};
pub use router::{EventRouter, RouterSubscription, StreamEvent, SubscribeOptions};
