// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubscriberError {
	#[error("websocket error: {0}")]
	Websocket(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("credentials contain characters not allowed in a header")]
	InvalidCredentials,
}
