// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::ApiError;
use crate::RosterSource;
use peergate_common::Peer;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

const ACTIVE_PEERS_PATH: &str = "/cv/active-pubkeys/v2/";

/// Client for the control API.
pub struct ApiClient {
	base_url: Url,
	username: Option<String>,
	password: Option<String>,
	http: Client,
}

impl ApiClient {
	/// Builds a client with a per-request deadline. Credentials are only
	/// attached when both username and password are present.
	pub fn new(
		base_url: Url,
		username: Option<String>,
		password: Option<String>,
		timeout: Duration,
	) -> Result<Self, ApiError> {
		let http = Client::builder().timeout(timeout).build()?;
		Ok(Self {
			base_url,
			username,
			password,
			http,
		})
	}

	fn active_peers_url(&self) -> Result<Url, ApiError> {
		let joined = format!(
			"{}{}",
			self.base_url.as_str().trim_end_matches('/'),
			ACTIVE_PEERS_PATH
		);
		Ok(joined.parse()?)
	}
}

impl RosterSource for ApiClient {
	async fn active_peers(&self) -> Result<Vec<Peer>, ApiError> {
		let url = self.active_peers_url()?;
		debug!(%url, "fetching peer roster");

		let mut request = self.http.get(url);
		if let (Some(username), Some(password)) = (&self.username, &self.password) {
			request = request.basic_auth(username, Some(password));
		}

		let peers = request
			.send()
			.await?
			.error_for_status()?
			.json::<Vec<Peer>>()
			.await?;

		Ok(peers)
	}
}

impl std::fmt::Debug for ApiClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ApiClient")
			.field("base_url", &self.base_url.as_str())
			.field("has_credentials", &(self.username.is_some() && self.password.is_some()))
			.finish()
	}
}
