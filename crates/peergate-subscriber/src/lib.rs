// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resilient subscription to the message-queue peer channel.
//!
//! The message queue pushes `ADD`/`REMOVE` peer events over a websocket.
//! The subscription reads frames for as long as the connection lives, and
//! on any failure redials with a fixed backoff until shutdown. Decoded
//! events are handed to the consumer in receive order over a rendezvous
//! channel; the consumer is expected to be idempotent, no deduplication
//! happens here.

pub mod error;
pub mod subscriber;

pub use error::SubscriberError;
pub use subscriber::{PeerEvent, Subscriber};
