// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fire-and-forget metrics for the peergate agent.
//!
//! Components record counters, gauges and timings through the
//! [`MetricsSink`] trait; the production sink ships them to statsd over
//! UDP. Emission never fails a caller: send errors are swallowed, which is
//! the contract statsd delivery has anyway.

pub mod statsd;

pub use statsd::StatsdSink;

use std::time::Duration;

/// Sink for operational metrics. Delivery is fire-and-forget.
pub trait MetricsSink: Send + Sync {
	/// Increments a counter by one.
	fn incr(&self, key: &str);

	/// Sets a gauge to the given value.
	fn gauge(&self, key: &str, value: u64);

	/// Records an elapsed time.
	fn timing(&self, key: &str, elapsed: Duration);
}

/// Sink that discards every metric. Used in tests and when metrics are
/// not wanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
	fn incr(&self, _key: &str) {}

	fn gauge(&self, _key: &str, _value: u64) {}

	fn timing(&self, _key: &str, _elapsed: Duration) {}
}
