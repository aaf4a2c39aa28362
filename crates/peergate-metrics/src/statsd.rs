// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::MetricsSink;
use cadence::{CountedExt, Gauged, StatsdClient, Timed, UdpMetricSink};
use std::net::UdpSocket;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
	#[error("socket error: {0}")]
	Socket(#[from] std::io::Error),

	#[error("statsd sink error: {0}")]
	Sink(#[from] cadence::MetricError),
}

/// Statsd sink over an unconnected UDP socket.
pub struct StatsdSink {
	client: StatsdClient,
}

impl StatsdSink {
	/// Binds a local UDP socket and targets the given statsd address.
	/// Fails only on local socket or address problems; once built, sends
	/// never surface errors.
	pub fn new(prefix: &str, address: &str) -> Result<Self, MetricsError> {
		let socket = UdpSocket::bind("0.0.0.0:0")?;
		socket.set_nonblocking(true)?;
		let sink = UdpMetricSink::from(address, socket)?;
		Ok(Self {
			client: StatsdClient::from_sink(prefix, sink),
		})
	}
}

impl MetricsSink for StatsdSink {
	fn incr(&self, key: &str) {
		let _ = self.client.incr(key);
	}

	fn gauge(&self, key: &str, value: u64) {
		let _ = self.client.gauge(key, value);
	}

	fn timing(&self, key: &str, elapsed: Duration) {
		let _ = self.client.time(key, elapsed);
	}
}
