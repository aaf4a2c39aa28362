// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyError {
	#[error("invalid key length: expected 32 bytes, got {0}")]
	InvalidLength(usize),

	#[error("invalid base64 encoding: {0}")]
	InvalidBase64(#[from] base64::DecodeError),
}

/// A peer's public key. The key is the peer's identity: two records with
/// the same key describe the same peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey {
	bytes: [u8; 32],
}

impl PublicKey {
	pub fn from_bytes(bytes: [u8; 32]) -> Self {
		Self { bytes }
	}

	/// Decodes a key from its wire form (standard base64, padded).
	pub fn from_base64(s: &str) -> Result<Self, KeyError> {
		let bytes = STANDARD.decode(s)?;
		if bytes.len() != 32 {
			return Err(KeyError::InvalidLength(bytes.len()));
		}
		let mut arr = [0u8; 32];
		arr.copy_from_slice(&bytes);
		Ok(Self { bytes: arr })
	}

	pub fn to_base64(&self) -> String {
		STANDARD.encode(self.bytes)
	}

	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.bytes
	}
}

impl fmt::Debug for PublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let b64 = self.to_base64();
		let prefix = if b64.len() >= 8 { &b64[..8] } else { &b64 };
		f.debug_struct("PublicKey")
			.field("prefix", &format!("{}...", prefix))
			.finish()
	}
}

impl fmt::Display for PublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_base64())
	}
}

impl Serialize for PublicKey {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.to_base64())
	}
}

impl<'de> Deserialize<'de> for PublicKey {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Self::from_base64(&s).map_err(serde::de::Error::custom)
	}
}

/// A peer's preshared key as observed on a tunnel interface. The kernel
/// reports an all-zero key when none is set.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PresharedKey {
	bytes: [u8; 32],
}

impl PresharedKey {
	pub fn from_bytes(bytes: [u8; 32]) -> Self {
		Self { bytes }
	}

	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.bytes
	}

	pub fn is_zero(&self) -> bool {
		self.bytes == [0u8; 32]
	}
}

impl fmt::Debug for PresharedKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PresharedKey")
			.field("bytes", &"[REDACTED]")
			.finish()
	}
}

impl fmt::Display for PresharedKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("[REDACTED]")
	}
}
