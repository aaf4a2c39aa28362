// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::device::{DeviceControl, PeerState, PeerUpdate};
use ipnet::IpNet;
use peergate_common::{PresharedKey, PublicKey};
use std::io;
use wireguard_control::{Backend, Device, DeviceUpdate, InterfaceName, Key, PeerConfigBuilder};

/// Tunnel capability backed by the kernel WireGuard control interface.
#[derive(Debug, Clone, Copy)]
pub struct KernelDevice {
	backend: Backend,
}

impl KernelDevice {
	pub fn new() -> Self {
		Self {
			backend: Backend::default(),
		}
	}
}

impl Default for KernelDevice {
	fn default() -> Self {
		Self::new()
	}
}

fn interface_name(interface: &str) -> io::Result<InterfaceName> {
	interface
		.parse::<InterfaceName>()
		.map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))
}

fn peer_state(peer: wireguard_control::PeerInfo) -> PeerState {
	PeerState {
		public_key: PublicKey::from_bytes(peer.config.public_key.0),
		allowed_ips: peer
			.config
			.allowed_ips
			.iter()
			.filter_map(|ip| IpNet::new(ip.address, ip.cidr).ok())
			.collect(),
		preshared_key: peer
			.config
			.preshared_key
			.map(|key| PresharedKey::from_bytes(key.0)),
		last_handshake: peer.stats.last_handshake_time,
	}
}

impl DeviceControl for KernelDevice {
	fn peers(&self, interface: &str) -> io::Result<Vec<PeerState>> {
		let name = interface_name(interface)?;
		let device = Device::get(&name, self.backend)?;
		Ok(device.peers.into_iter().map(peer_state).collect())
	}

	fn apply(&self, interface: &str, updates: &[PeerUpdate]) -> io::Result<()> {
		let name = interface_name(interface)?;

		let mut update = DeviceUpdate::new();
		for entry in updates {
			let key = Key(*entry.public_key.as_bytes());

			if entry.remove {
				update = update.remove_peer_by_key(&key);
				continue;
			}

			let mut peer = PeerConfigBuilder::new(&key);
			if entry.replace_allowed_ips {
				peer = peer.replace_allowed_ips();
			}
			for net in &entry.allowed_ips {
				peer = peer.add_allowed_ip(net.addr(), net.prefix_len());
			}
			if let Some(preshared) = &entry.preshared_key {
				peer = peer.set_preshared_key(Key(*preshared.as_bytes()));
			}
			update = update.add_peer(peer);
		}

		update.apply(&name, self.backend)
	}
}
