// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use clap::Parser;
use std::time::Duration;
use url::Url;

/// Keeps tunnel interfaces and port forwarding in sync with the peer
/// roster served by the control API.
#[derive(Parser, Debug)]
#[command(name = "peergate-agent")]
pub struct Args {
	/// How often peers are synchronized with the API.
	#[arg(long, env = "CV_INTERVAL", default_value = "60s", value_parser = humantime::parse_duration)]
	pub interval: Duration,

	/// Max random delay added to each synchronization.
	#[arg(long, env = "CV_DELAY", default_value = "45s", value_parser = humantime::parse_duration)]
	pub delay: Duration,

	/// Max duration for API requests.
	#[arg(long, env = "CV_API_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
	pub api_timeout: Duration,

	/// API url.
	#[arg(long, env = "CV_URL", default_value = "https://example.com")]
	pub url: Url,

	/// API username.
	#[arg(long, env = "CV_USERNAME")]
	pub username: Option<String>,

	/// API password.
	#[arg(long, env = "CV_PASSWORD")]
	pub password: Option<String>,

	/// Tunnel interfaces to configure. Pass a comma delimited list to
	/// configure multiple interfaces, eg 'wg0,wg1,wg2'.
	#[arg(long, env = "CV_INTERFACES", default_value = "wg0")]
	pub interfaces: String,

	/// iptables chain to use for portforwarding.
	#[arg(long, env = "CV_PORTFORWARDING_CHAIN", default_value = "PORTFORWARDING")]
	pub portforwarding_chain: String,

	/// ipset table to use for portforwarding for ipv4 addresses.
	#[arg(long, env = "CV_PORTFORWARDING_IPSET_IPV4", default_value = "PORTFORWARDING_IPV4")]
	pub portforwarding_ipset_ipv4: String,

	/// ipset table to use for portforwarding for ipv6 addresses.
	#[arg(long, env = "CV_PORTFORWARDING_IPSET_IPV6", default_value = "PORTFORWARDING_IPV6")]
	pub portforwarding_ipset_ipv6: String,

	/// statsd address to send metrics to.
	#[arg(long, env = "CV_STATSD_ADDRESS", default_value = "127.0.0.1:8125")]
	pub statsd_address: String,

	/// Message-queue url.
	#[arg(long, env = "CV_MQ_URL", default_value = "wss://example.com/mq")]
	pub mq_url: Url,

	/// Message-queue username.
	#[arg(long, env = "CV_MQ_USERNAME")]
	pub mq_username: Option<String>,

	/// Message-queue password.
	#[arg(long, env = "CV_MQ_PASSWORD")]
	pub mq_password: Option<String>,

	/// Message-queue channel.
	#[arg(long, env = "CV_MQ_CHANNEL", default_value = "peers")]
	pub mq_channel: String,

	/// Prints the current app version.
	#[arg(short = 'v')]
	pub version: bool,
}

impl Args {
	/// The configured interface names, trimmed and with empty entries
	/// dropped. An empty result is a startup error for the caller.
	pub fn interface_list(&self) -> Vec<String> {
		self.interfaces
			.split(',')
			.map(str::trim)
			.filter(|name| !name.is_empty())
			.map(str::to_string)
			.collect()
	}
}
