// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Control-plane agent for VPN gateway hosts.
//!
//! Wires the roster client, the message-queue subscription and the two
//! appliers together, runs one convergence pass up front, and then lets
//! the reconciler consume ticks and events until a signal arrives.

mod config;
mod reconciler;

use clap::Parser;
use config::Args;
use peergate_api::ApiClient;
use peergate_metrics::{MetricsSink, StatsdSink};
use peergate_portforward::{IptablesFilter, Portforward};
use peergate_subscriber::Subscriber;
use peergate_tunnel::{KernelDevice, TunnelManager};
use reconciler::Reconciler;
use std::process::exit;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const METRICS_PREFIX: &str = "peergate";

#[tokio::main]
async fn main() {
	let args = Args::parse();

	if args.version {
		println!("{VERSION}");
		return;
	}

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	info!(version = VERSION, "starting peergate-agent");

	let metrics: Arc<dyn MetricsSink> =
		match StatsdSink::new(METRICS_PREFIX, &args.statsd_address) {
			Ok(sink) => Arc::new(sink),
			Err(error) => {
				error!(%error, "error initializing metrics");
				exit(1);
			}
		};

	let api = match ApiClient::new(
		args.url.clone(),
		args.username.clone(),
		args.password.clone(),
		args.api_timeout,
	) {
		Ok(api) => api,
		Err(error) => {
			error!(%error, "error initializing API client");
			exit(1);
		}
	};

	let interfaces = args.interface_list();
	if interfaces.is_empty() {
		error!("no tunnel interfaces configured");
		exit(1);
	}

	let tunnel = match TunnelManager::new(KernelDevice::new(), interfaces, Arc::clone(&metrics)) {
		Ok(tunnel) => tunnel,
		Err(error) => {
			error!(%error, "error initializing tunnel interfaces");
			exit(1);
		}
	};

	let filter = IptablesFilter::new(
		args.portforwarding_chain.clone(),
		args.portforwarding_ipset_ipv4.clone(),
		args.portforwarding_ipset_ipv6.clone(),
	);
	let portforward = match Portforward::new(filter) {
		Ok(portforward) => portforward,
		Err(error) => {
			error!(%error, "error initializing portforwarding");
			exit(1);
		}
	};

	let reconciler = Reconciler::new(
		api,
		tunnel,
		portforward,
		Arc::clone(&metrics),
		args.interval,
		args.delay,
	);

	// Converge once before the event stream attaches; a slow message
	// queue must not delay the first pass.
	reconciler.synchronize().await;

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let (event_tx, event_rx) = mpsc::channel(1);

	let subscriber = Subscriber::new(
		args.mq_url.clone(),
		args.mq_channel.clone(),
		args.mq_username.clone(),
		args.mq_password.clone(),
		Arc::clone(&metrics),
	);
	if let Err(error) = subscriber.subscribe(shutdown_rx.clone(), event_tx).await {
		error!(%error, "error connecting to message queue");
		exit(1);
	}

	let reconciler_task = tokio::spawn(reconciler.run(event_rx, shutdown_rx));

	let cause = wait_for_interrupt().await;
	info!(%cause, "shutting down");

	let _ = shutdown_tx.send(true);
	let _ = reconciler_task.await;
}

async fn wait_for_interrupt() -> &'static str {
	let mut interrupt =
		signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
	let mut terminate =
		signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

	tokio::select! {
		_ = interrupt.recv() => "received signal interrupt",
		_ = terminate.recv() => "received signal terminate",
	}
}
