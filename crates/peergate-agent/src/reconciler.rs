// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use peergate_api::RosterSource;
use peergate_metrics::MetricsSink;
use peergate_portforward::{PacketFilter, Portforward};
use peergate_subscriber::PeerEvent;
use peergate_tunnel::{DeviceControl, TunnelManager};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Serializes the periodic roster synchronization and the pushed events
/// into one consumer, so the appliers never run concurrently and need no
/// locking.
pub struct Reconciler<R, C, F> {
	api: R,
	tunnel: TunnelManager<C>,
	portforward: Portforward<F>,
	metrics: Arc<dyn MetricsSink>,
	interval: Duration,
	max_delay: Duration,
}

impl<R, C, F> Reconciler<R, C, F>
where
	R: RosterSource,
	C: DeviceControl,
	F: PacketFilter,
{
	pub fn new(
		api: R,
		tunnel: TunnelManager<C>,
		portforward: Portforward<F>,
		metrics: Arc<dyn MetricsSink>,
		interval: Duration,
		max_delay: Duration,
	) -> Self {
		Self {
			api,
			tunnel,
			portforward,
			metrics,
			interval,
			max_delay,
		}
	}

	/// Runs until the shutdown signal flips or the event channel closes.
	///
	/// Exactly one input is handled at a time. The tick deadline is
	/// re-armed only after a pass finishes, so ticks that would overlap a
	/// running pass are dropped rather than queued.
	pub async fn run(
		self,
		mut events: mpsc::Receiver<PeerEvent>,
		mut shutdown: watch::Receiver<bool>,
	) {
		let mut tick = Box::pin(time::sleep(self.tick_delay()));

		loop {
			tokio::select! {
				biased;

				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						info!("reconciler stopping");
						return;
					}
				}

				event = events.recv() => match event {
					Some(event) => self.handle_event(event),
					None => {
						info!("event channel closed, reconciler stopping");
						return;
					}
				},

				() = tick.as_mut() => {
					self.synchronize().await;
					tick.as_mut().reset(Instant::now() + self.tick_delay());
				}
			}
		}
	}

	/// The base interval plus a uniform random delay, so a fleet of
	/// agents does not hit the API in lockstep.
	fn tick_delay(&self) -> Duration {
		if self.max_delay.is_zero() {
			return self.interval;
		}
		self.interval + rand::thread_rng().gen_range(Duration::ZERO..=self.max_delay)
	}

	fn handle_event(&self, event: PeerEvent) {
		match event.action.as_str() {
			"ADD" => {
				self.tunnel.add_peer(&event.peer);
				self.portforward.add_portforwarding(&event.peer);
			}
			"REMOVE" => {
				self.tunnel.remove_peer(&event.peer);
				self.portforward.remove_portforwarding(&event.peer);
			}
			// Bad data from the queue; drop it.
			other => debug!(action = %other, "ignoring unknown event action"),
		}
	}

	/// One full pass: fetch the roster, converge the tunnel interfaces,
	/// then the port forwarding. A failed fetch leaves the last known
	/// good state installed.
	pub async fn synchronize(&self) {
		let pass = Instant::now();
		self.synchronize_inner().await;
		self.metrics.timing("synchronize_time", pass.elapsed());
	}

	async fn synchronize_inner(&self) {
		let fetch = Instant::now();
		let roster = match self.api.active_peers().await {
			Ok(roster) => roster,
			Err(error) => {
				self.metrics.incr("error_getting_peers");
				warn!(%error, "error getting peers");
				return;
			}
		};
		self.metrics.timing("get_cavpn_peers_time", fetch.elapsed());

		let update = Instant::now();
		self.tunnel.update_peers(&roster);
		self.metrics.timing("update_peers_time", update.elapsed());

		let update = Instant::now();
		self.portforward.update_portforwarding(&roster);
		self.metrics.timing("update_portforwarding_time", update.elapsed());
	}
}
