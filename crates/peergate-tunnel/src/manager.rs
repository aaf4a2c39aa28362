// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::device::{DeviceControl, PeerState, PeerUpdate};
use crate::error::TunnelError;
use ipnet::IpNet;
use peergate_common::{parse_peer, Peer, PublicKey};
use peergate_metrics::MetricsSink;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::warn;

/// Peers handshake roughly every two minutes, so a peer with a handshake
/// inside this window counts as connected.
const HANDSHAKE_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// A session cannot go silent for longer than this. Peers past the bound
/// are reset to clear their handshake timestamp and transfer counters.
const INACTIVITY_TIME: Duration = Duration::from_secs(3 * 60);

/// Applies roster changes to a set of tunnel interfaces.
pub struct TunnelManager<C> {
	control: C,
	interfaces: Vec<String>,
	metrics: Arc<dyn MetricsSink>,
}

impl<C: DeviceControl> TunnelManager<C> {
	/// Verifies that every configured interface is readable and returns
	/// the manager. A missing interface is a startup error.
	pub fn new(
		control: C,
		interfaces: Vec<String>,
		metrics: Arc<dyn MetricsSink>,
	) -> Result<Self, TunnelError> {
		if interfaces.is_empty() {
			return Err(TunnelError::NoInterfaces);
		}

		for interface in &interfaces {
			control
				.peers(interface)
				.map_err(|source| TunnelError::Interface {
					interface: interface.clone(),
					source,
				})?;
		}

		Ok(Self {
			control,
			interfaces,
			metrics,
		})
	}

	/// Converges every interface with the roster.
	///
	/// Interfaces are handled independently: a failure on one is logged
	/// and does not keep the rest from being configured. Peers that are
	/// present, unchanged and active produce no configuration call at all.
	pub fn update_peers(&self, roster: &[Peer]) {
		let desired = desired_peers(roster);
		let now = SystemTime::now();
		let mut connected = 0usize;

		for interface in &self.interfaces {
			let current = match self.control.peers(interface) {
				Ok(peers) => peers,
				Err(error) => {
					warn!(%interface, %error, "error connecting to tunnel interface");
					continue;
				}
			};

			connected += current.iter().filter(|peer| is_connected(peer, now)).count();

			let current: HashMap<PublicKey, &PeerState> = current
				.iter()
				.map(|peer| (peer.public_key, peer))
				.collect();

			let mut batch = Vec::new();
			let mut resets = Vec::new();

			// Add roster peers missing from the interface, and replace the
			// allowed IPs of peers whose networks changed.
			for (key, allowed_ips) in &desired {
				match current.get(key) {
					Some(peer) if peer.allowed_ips == *allowed_ips => {}
					_ => batch.push(PeerUpdate::replace(*key, allowed_ips.clone())),
				}
			}

			for (key, peer) in &current {
				if !desired.contains_key(key) {
					// Gone from the roster.
					batch.push(PeerUpdate::remove(*key));
				} else if needs_reset(peer, now) {
					// Remove now, re-add in a second pass. The round trip
					// zeroes the kernel's handshake and transfer counters
					// without losing the peer.
					batch.push(PeerUpdate::remove(*key));

					let mut readd = PeerUpdate::replace(*key, peer.allowed_ips.clone());
					if let Some(preshared) = peer.preshared_key.filter(|k| !k.is_zero()) {
						// Copied by value into the new record, never shared
						// with the observed peer.
						readd = readd.with_preshared_key(preshared);
					}
					resets.push(readd);
				}
			}

			if batch.is_empty() {
				continue;
			}

			if let Err(error) = self.control.apply(interface, &batch) {
				warn!(%interface, %error, "error configuring tunnel interface");
				continue;
			}

			if resets.is_empty() {
				continue;
			}

			if let Err(error) = self.control.apply(interface, &resets) {
				warn!(%interface, %error, "error configuring tunnel interface");
				continue;
			}
		}

		self.metrics.gauge("connected_peers", connected as u64);
	}

	/// Adds the peer to every interface without consulting current state.
	/// Malformed peers are dropped silently.
	pub fn add_peer(&self, peer: &Peer) {
		let Ok((key, ipv4, ipv6)) = parse_peer(peer) else {
			return;
		};
		let allowed_ips = vec![IpNet::V4(ipv4), IpNet::V6(ipv6)];

		for interface in &self.interfaces {
			let update = PeerUpdate::replace(key, allowed_ips.clone());
			if let Err(error) = self.control.apply(interface, &[update]) {
				warn!(%interface, %error, "error configuring tunnel interface");
			}
		}
	}

	/// Removes the peer from every interface without consulting current
	/// state. Malformed peers are dropped silently.
	pub fn remove_peer(&self, peer: &Peer) {
		let Ok((key, _, _)) = parse_peer(peer) else {
			return;
		};

		for interface in &self.interfaces {
			if let Err(error) = self.control.apply(interface, &[PeerUpdate::remove(key)]) {
				warn!(%interface, %error, "error configuring tunnel interface");
			}
		}
	}
}

/// Builds the desired view of the roster: key to allowed-IP pair, in
/// `[ipv4, ipv6]` order. Peers that fail to parse are dropped so bad API
/// data never poisons a batch; a key listed twice is last-write-wins.
fn desired_peers(roster: &[Peer]) -> HashMap<PublicKey, Vec<IpNet>> {
	roster
		.iter()
		.filter_map(|peer| parse_peer(peer).ok())
		.map(|(key, ipv4, ipv6)| (key, vec![IpNet::V4(ipv4), IpNet::V6(ipv6)]))
		.collect()
}

fn elapsed(handshake: SystemTime, now: SystemTime) -> Duration {
	now.duration_since(handshake).unwrap_or_default()
}

fn is_connected(peer: &PeerState, now: SystemTime) -> bool {
	peer.last_handshake
		.is_some_and(|handshake| elapsed(handshake, now) <= HANDSHAKE_INTERVAL)
}

fn needs_reset(peer: &PeerState, now: SystemTime) -> bool {
	peer.last_handshake
		.is_some_and(|handshake| elapsed(handshake, now) > INACTIVITY_TIME)
}

#[cfg(test)]
mod tests {
	use super::*;
	use base64::engine::general_purpose::STANDARD;
	use base64::Engine;
	use peergate_common::PresharedKey;
	use peergate_metrics::NoopSink;
	use std::collections::HashSet;
	use std::io;
	use std::sync::Mutex;

	/// In-memory device with kernel-like batch semantics.
	#[derive(Default)]
	struct FakeDevice {
		peers: Mutex<HashMap<String, Vec<PeerState>>>,
		batches: Mutex<Vec<(String, Vec<PeerUpdate>)>>,
		failing: Mutex<HashSet<String>>,
	}

	impl FakeDevice {
		fn with_interfaces(interfaces: &[&str]) -> Self {
			let device = Self::default();
			{
				let mut peers = device.peers.lock().unwrap();
				for interface in interfaces {
					peers.insert(interface.to_string(), Vec::new());
				}
			}
			device
		}

		fn fail(&self, interface: &str) {
			self.failing.lock().unwrap().insert(interface.to_string());
		}

		fn seed(&self, interface: &str, peer: PeerState) {
			self.peers
				.lock()
				.unwrap()
				.entry(interface.to_string())
				.or_default()
				.push(peer);
		}

		fn peers_on(&self, interface: &str) -> Vec<PeerState> {
			self.peers
				.lock()
				.unwrap()
				.get(interface)
				.cloned()
				.unwrap_or_default()
		}

		fn batch_count(&self) -> usize {
			self.batches.lock().unwrap().len()
		}

		fn batches_for(&self, interface: &str) -> Vec<Vec<PeerUpdate>> {
			self.batches
				.lock()
				.unwrap()
				.iter()
				.filter(|(name, _)| name == interface)
				.map(|(_, batch)| batch.clone())
				.collect()
		}
	}

	impl DeviceControl for FakeDevice {
		fn peers(&self, interface: &str) -> io::Result<Vec<PeerState>> {
			if self.failing.lock().unwrap().contains(interface) {
				return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
			}
			Ok(self.peers_on(interface))
		}

		fn apply(&self, interface: &str, updates: &[PeerUpdate]) -> io::Result<()> {
			if self.failing.lock().unwrap().contains(interface) {
				return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
			}

			self.batches
				.lock()
				.unwrap()
				.push((interface.to_string(), updates.to_vec()));

			let mut map = self.peers.lock().unwrap();
			let peers = map.entry(interface.to_string()).or_default();

			for update in updates {
				if update.remove {
					peers.retain(|peer| peer.public_key != update.public_key);
					continue;
				}

				match peers
					.iter_mut()
					.find(|peer| peer.public_key == update.public_key)
				{
					Some(existing) => {
						if update.replace_allowed_ips {
							existing.allowed_ips = update.allowed_ips.clone();
						} else {
							existing.allowed_ips.extend(update.allowed_ips.iter().cloned());
						}
						if let Some(preshared) = update.preshared_key {
							existing.preshared_key = Some(preshared);
						}
					}
					None => peers.push(PeerState {
						public_key: update.public_key,
						allowed_ips: update.allowed_ips.clone(),
						preshared_key: update.preshared_key,
						last_handshake: None,
					}),
				}
			}

			Ok(())
		}
	}

	fn pubkey(byte: u8) -> String {
		STANDARD.encode([byte; 32])
	}

	fn roster_peer(byte: u8, ipv4: &str, ipv6: &str) -> Peer {
		Peer {
			ipv4: ipv4.to_string(),
			ipv6: ipv6.to_string(),
			ports: vec![1234, 4321],
			pubkey: pubkey(byte),
		}
	}

	fn fixture_peer() -> Peer {
		roster_peer(b'a', "10.99.0.1/32", "fc00:bbbb:bbbb:bb01::1/128")
	}

	fn nets(ipv4: &str, ipv6: &str) -> Vec<IpNet> {
		vec![ipv4.parse().unwrap(), ipv6.parse().unwrap()]
	}

	fn manager(device: FakeDevice, interfaces: &[&str]) -> TunnelManager<FakeDevice> {
		TunnelManager::new(
			device,
			interfaces.iter().map(|s| s.to_string()).collect(),
			Arc::new(NoopSink),
		)
		.unwrap()
	}

	#[test]
	fn new_rejects_empty_interface_list() {
		let result = TunnelManager::new(FakeDevice::default(), Vec::new(), Arc::new(NoopSink));
		assert!(matches!(result, Err(TunnelError::NoInterfaces)));
	}

	#[test]
	fn new_rejects_unreadable_interface() {
		let device = FakeDevice::with_interfaces(&["wg0"]);
		device.fail("wg0");
		let result = TunnelManager::new(device, vec!["wg0".to_string()], Arc::new(NoopSink));
		assert!(matches!(result, Err(TunnelError::Interface { .. })));
	}

	#[test]
	fn add_update_remove_cycle() {
		let manager = manager(FakeDevice::with_interfaces(&["wg0"]), &["wg0"]);

		manager.update_peers(&[fixture_peer()]);
		let peers = manager.control.peers_on("wg0");
		assert_eq!(peers.len(), 1);
		assert_eq!(
			peers[0].allowed_ips,
			nets("10.99.0.1/32", "fc00:bbbb:bbbb:bb01::1/128")
		);

		manager.update_peers(&[roster_peer(
			b'a',
			"10.99.0.2/32",
			"fc00:bbbb:bbbb:bb01::2/128",
		)]);
		let peers = manager.control.peers_on("wg0");
		assert_eq!(peers.len(), 1);
		assert_eq!(
			peers[0].allowed_ips,
			nets("10.99.0.2/32", "fc00:bbbb:bbbb:bb01::2/128")
		);

		manager.update_peers(&[]);
		assert!(manager.control.peers_on("wg0").is_empty());
	}

	#[test]
	fn unchanged_peer_causes_no_configuration_call() {
		let device = FakeDevice::with_interfaces(&["wg0"]);
		device.seed(
			"wg0",
			PeerState {
				public_key: PublicKey::from_bytes([b'a'; 32]),
				allowed_ips: nets("10.99.0.1/32", "fc00:bbbb:bbbb:bb01::1/128"),
				preshared_key: None,
				last_handshake: Some(SystemTime::now()),
			},
		);
		let manager = manager(device, &["wg0"]);

		manager.update_peers(&[fixture_peer()]);
		assert_eq!(manager.control.batch_count(), 0);
	}

	#[test]
	fn removes_peer_absent_from_roster() {
		let device = FakeDevice::with_interfaces(&["wg0"]);
		device.seed(
			"wg0",
			PeerState {
				public_key: PublicKey::from_bytes([b'z'; 32]),
				allowed_ips: nets("10.99.0.9/32", "fc00:bbbb:bbbb:bb01::9/128"),
				preshared_key: None,
				last_handshake: None,
			},
		);
		let manager = manager(device, &["wg0"]);

		manager.update_peers(&[fixture_peer()]);
		let peers = manager.control.peers_on("wg0");
		assert_eq!(peers.len(), 1);
		assert_eq!(peers[0].public_key, PublicKey::from_bytes([b'a'; 32]));
	}

	#[test]
	fn reset_preserves_preshared_key() {
		let preshared = PresharedKey::from_bytes([7u8; 32]);
		let stale = SystemTime::now() - Duration::from_secs(4 * 60);

		let device = FakeDevice::with_interfaces(&["wg0"]);
		device.seed(
			"wg0",
			PeerState {
				public_key: PublicKey::from_bytes([b'a'; 32]),
				allowed_ips: nets("10.99.0.1/32", "fc00:bbbb:bbbb:bb01::1/128"),
				preshared_key: Some(preshared),
				last_handshake: Some(stale),
			},
		);
		let manager = manager(device, &["wg0"]);

		manager.update_peers(&[fixture_peer()]);

		// One remove-then-readd pair: the primary batch removes, the reset
		// batch re-adds with the copied secret.
		let batches = manager.control.batches_for("wg0");
		assert_eq!(batches.len(), 2);
		assert!(batches[0].iter().any(|u| u.remove));
		assert_eq!(batches[1].len(), 1);
		assert_eq!(batches[1][0].preshared_key, Some(preshared));

		let peers = manager.control.peers_on("wg0");
		assert_eq!(peers.len(), 1);
		assert_eq!(peers[0].public_key, PublicKey::from_bytes([b'a'; 32]));
		assert_eq!(
			peers[0].allowed_ips,
			nets("10.99.0.1/32", "fc00:bbbb:bbbb:bb01::1/128")
		);
		assert_eq!(peers[0].preshared_key, Some(preshared));
		assert_eq!(peers[0].last_handshake, None);
	}

	#[test]
	fn reset_skips_zero_preshared_key() {
		let stale = SystemTime::now() - Duration::from_secs(4 * 60);

		let device = FakeDevice::with_interfaces(&["wg0"]);
		device.seed(
			"wg0",
			PeerState {
				public_key: PublicKey::from_bytes([b'a'; 32]),
				allowed_ips: nets("10.99.0.1/32", "fc00:bbbb:bbbb:bb01::1/128"),
				preshared_key: Some(PresharedKey::from_bytes([0u8; 32])),
				last_handshake: Some(stale),
			},
		);
		let manager = manager(device, &["wg0"]);

		manager.update_peers(&[fixture_peer()]);

		let batches = manager.control.batches_for("wg0");
		assert_eq!(batches.len(), 2);
		assert_eq!(batches[1][0].preshared_key, None);
	}

	#[test]
	fn recently_active_peer_is_not_reset() {
		let device = FakeDevice::with_interfaces(&["wg0"]);
		device.seed(
			"wg0",
			PeerState {
				public_key: PublicKey::from_bytes([b'a'; 32]),
				allowed_ips: nets("10.99.0.1/32", "fc00:bbbb:bbbb:bb01::1/128"),
				preshared_key: None,
				last_handshake: Some(SystemTime::now() - Duration::from_secs(60)),
			},
		);
		let manager = manager(device, &["wg0"]);

		manager.update_peers(&[fixture_peer()]);
		assert_eq!(manager.control.batch_count(), 0);
	}

	#[test]
	fn malformed_peer_is_dropped_from_the_batch() {
		let manager = manager(FakeDevice::with_interfaces(&["wg0"]), &["wg0"]);

		let mut bad = fixture_peer();
		bad.pubkey = String::new();
		let good = roster_peer(b'b', "10.99.0.3/32", "fc00:bbbb:bbbb:bb01::3/128");

		manager.update_peers(&[bad, good]);

		let peers = manager.control.peers_on("wg0");
		assert_eq!(peers.len(), 1);
		assert_eq!(peers[0].public_key, PublicKey::from_bytes([b'b'; 32]));
	}

	#[test]
	fn duplicate_roster_key_is_last_write_wins() {
		let first = roster_peer(b'a', "10.99.0.1/32", "fc00:bbbb:bbbb:bb01::1/128");
		let second = roster_peer(b'a', "10.99.0.2/32", "fc00:bbbb:bbbb:bb01::2/128");

		let desired = desired_peers(&[first, second]);
		assert_eq!(
			desired[&PublicKey::from_bytes([b'a'; 32])],
			nets("10.99.0.2/32", "fc00:bbbb:bbbb:bb01::2/128")
		);
	}

	#[test]
	fn failing_interface_does_not_block_the_rest() {
		let manager = manager(FakeDevice::with_interfaces(&["wg0", "wg1"]), &["wg0", "wg1"]);

		// Break wg0 after construction; wg1 must still converge.
		manager.control.fail("wg0");

		manager.update_peers(&[fixture_peer()]);
		assert_eq!(manager.control.peers_on("wg1").len(), 1);
		assert!(manager.control.batches_for("wg0").is_empty());
	}

	#[test]
	fn add_peer_is_idempotent() {
		let manager = manager(FakeDevice::with_interfaces(&["wg0", "wg1"]), &["wg0", "wg1"]);

		manager.add_peer(&fixture_peer());
		manager.add_peer(&fixture_peer());

		for interface in ["wg0", "wg1"] {
			let peers = manager.control.peers_on(interface);
			assert_eq!(peers.len(), 1);
			assert_eq!(
				peers[0].allowed_ips,
				nets("10.99.0.1/32", "fc00:bbbb:bbbb:bb01::1/128")
			);
		}
	}

	#[test]
	fn remove_peer_clears_the_interface() {
		let manager = manager(FakeDevice::with_interfaces(&["wg0"]), &["wg0"]);

		manager.add_peer(&fixture_peer());
		manager.remove_peer(&fixture_peer());
		assert!(manager.control.peers_on("wg0").is_empty());

		// Removing an absent peer stays a no-op on the kernel side.
		manager.remove_peer(&fixture_peer());
		assert!(manager.control.peers_on("wg0").is_empty());
	}

	#[test]
	fn malformed_event_peer_is_ignored() {
		let manager = manager(FakeDevice::with_interfaces(&["wg0"]), &["wg0"]);

		let mut bad = fixture_peer();
		bad.pubkey = "short".to_string();
		manager.add_peer(&bad);
		manager.remove_peer(&bad);

		assert_eq!(manager.control.batch_count(), 0);
	}

	#[test]
	fn connected_peers_gauge_counts_recent_handshakes() {
		#[derive(Default)]
		struct GaugeSink {
			gauges: Mutex<Vec<(String, u64)>>,
		}

		impl MetricsSink for GaugeSink {
			fn incr(&self, _key: &str) {}

			fn gauge(&self, key: &str, value: u64) {
				self.gauges.lock().unwrap().push((key.to_string(), value));
			}

			fn timing(&self, _key: &str, _elapsed: Duration) {}
		}

		let device = FakeDevice::with_interfaces(&["wg0"]);
		device.seed(
			"wg0",
			PeerState {
				public_key: PublicKey::from_bytes([b'a'; 32]),
				allowed_ips: nets("10.99.0.1/32", "fc00:bbbb:bbbb:bb01::1/128"),
				preshared_key: None,
				last_handshake: Some(SystemTime::now() - Duration::from_secs(30)),
			},
		);
		device.seed(
			"wg0",
			PeerState {
				public_key: PublicKey::from_bytes([b'b'; 32]),
				allowed_ips: nets("10.99.0.2/32", "fc00:bbbb:bbbb:bb01::2/128"),
				preshared_key: None,
				last_handshake: Some(SystemTime::now() - Duration::from_secs(10 * 60)),
			},
		);

		let sink = Arc::new(GaugeSink::default());
		let manager =
			TunnelManager::new(device, vec!["wg0".to_string()], Arc::clone(&sink) as _).unwrap();

		manager.update_peers(&[
			roster_peer(b'a', "10.99.0.1/32", "fc00:bbbb:bbbb:bb01::1/128"),
			roster_peer(b'b', "10.99.0.2/32", "fc00:bbbb:bbbb:bb01::2/128"),
		]);

		let gauges = sink.gauges.lock().unwrap();
		assert_eq!(gauges.as_slice(), &[("connected_peers".to_string(), 1)]);
	}
}
