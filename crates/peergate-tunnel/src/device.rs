// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use ipnet::IpNet;
use peergate_common::{PresharedKey, PublicKey};
use std::io;
use std::time::SystemTime;

/// A peer as observed on a tunnel interface. Only device backends
/// construct these.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerState {
	pub public_key: PublicKey,
	pub allowed_ips: Vec<IpNet>,
	pub preshared_key: Option<PresharedKey>,
	/// Last completed handshake; `None` if the peer never handshook.
	pub last_handshake: Option<SystemTime>,
}

/// One entry of an additive configuration batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerUpdate {
	pub public_key: PublicKey,
	pub remove: bool,
	pub replace_allowed_ips: bool,
	pub allowed_ips: Vec<IpNet>,
	pub preshared_key: Option<PresharedKey>,
}

impl PeerUpdate {
	/// Marks the peer for removal.
	pub fn remove(public_key: PublicKey) -> Self {
		Self {
			public_key,
			remove: true,
			replace_allowed_ips: false,
			allowed_ips: Vec::new(),
			preshared_key: None,
		}
	}

	/// Adds the peer, or replaces its allowed-IP list if it exists.
	pub fn replace(public_key: PublicKey, allowed_ips: Vec<IpNet>) -> Self {
		Self {
			public_key,
			remove: false,
			replace_allowed_ips: true,
			allowed_ips,
			preshared_key: None,
		}
	}

	pub fn with_preshared_key(mut self, preshared_key: PresharedKey) -> Self {
		self.preshared_key = Some(preshared_key);
		self
	}
}

/// Capability handle for reading and configuring tunnel interfaces.
pub trait DeviceControl: Send + Sync {
	/// Reads the peers currently configured on the interface.
	fn peers(&self, interface: &str) -> io::Result<Vec<PeerState>>;

	/// Applies a configuration batch. The batch is additive: peers not
	/// named in it are left untouched.
	fn apply(&self, interface: &str, updates: &[PeerUpdate]) -> io::Result<()>;
}
