// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunnelError {
	#[error("no tunnel interfaces configured")]
	NoInterfaces,

	#[error("error getting tunnel interface {interface}: {source}")]
	Interface {
		interface: String,
		#[source]
		source: io::Error,
	},
}
