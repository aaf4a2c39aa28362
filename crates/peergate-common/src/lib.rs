// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared peer types for the peergate agent.
//!
//! Holds the wire-level peer record served by the control API, the key
//! newtypes used to identify peers on tunnel interfaces, and the parser
//! that turns a wire peer into its typed form.

pub mod keys;
pub mod peer;

pub use keys::{KeyError, PresharedKey, PublicKey};
pub use peer::{parse_peer, ParseError, Peer};
