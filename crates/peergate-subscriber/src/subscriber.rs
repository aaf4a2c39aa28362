// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::SubscriberError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::StreamExt;
use peergate_common::Peer;
use peergate_metrics::MetricsSink;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

const SUBPROTOCOL: &str = "message-queue-v1";
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A peer event pushed by the message queue.
///
/// `action` is passed through verbatim; the consumer decides what `ADD`,
/// `REMOVE` or anything else means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEvent {
	pub action: String,
	pub peer: Peer,
}

/// Subscription to one message-queue channel.
pub struct Subscriber {
	base_url: Url,
	channel: String,
	username: Option<String>,
	password: Option<String>,
	metrics: Arc<dyn MetricsSink>,
}

enum ReadOutcome {
	/// The connection failed or closed; redial.
	Failed,
	/// Shutdown was requested or the consumer went away.
	Stopped,
}

impl Subscriber {
	pub fn new(
		base_url: Url,
		channel: String,
		username: Option<String>,
		password: Option<String>,
		metrics: Arc<dyn MetricsSink>,
	) -> Self {
		Self {
			base_url,
			channel,
			username,
			password,
			metrics,
		}
	}

	/// Dials the channel and spawns the reader task. The initial dial
	/// failure is returned to the caller; after that the subscription
	/// recovers on its own until `shutdown` flips.
	pub async fn subscribe(
		self,
		shutdown: watch::Receiver<bool>,
		events: mpsc::Sender<PeerEvent>,
	) -> Result<(), SubscriberError> {
		let stream = self.connect().await?;
		tokio::spawn(self.run(stream, shutdown, events));
		Ok(())
	}

	async fn run(
		self,
		stream: WsStream,
		mut shutdown: watch::Receiver<bool>,
		events: mpsc::Sender<PeerEvent>,
	) {
		let mut stream = stream;

		loop {
			let outcome = self.read(&mut stream, &mut shutdown, &events).await;
			drop(stream);

			if matches!(outcome, ReadOutcome::Stopped) {
				debug!("subscription stopped");
				return;
			}

			self.metrics.incr("websocket_error");

			stream = match self.reconnect(&mut shutdown).await {
				Some(stream) => stream,
				None => return,
			};
		}
	}

	/// Reads events off the connection until it fails or shutdown flips.
	async fn read(
		&self,
		stream: &mut WsStream,
		shutdown: &mut watch::Receiver<bool>,
		events: &mpsc::Sender<PeerEvent>,
	) -> ReadOutcome {
		loop {
			tokio::select! {
				biased;

				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						let _ = stream.close(None).await;
						return ReadOutcome::Stopped;
					}
				}

				message = stream.next() => match message {
					Some(Ok(Message::Text(text))) => {
						let event = match serde_json::from_str::<PeerEvent>(&text) {
							Ok(event) => event,
							Err(error) => {
								warn!(%error, "error reading from websocket, reconnecting");
								return ReadOutcome::Failed;
							}
						};

						if events.send(event).await.is_err() {
							return ReadOutcome::Stopped;
						}
					}
					Some(Ok(Message::Close(_))) | None => {
						warn!("websocket closed, reconnecting");
						return ReadOutcome::Failed;
					}
					Some(Ok(_)) => {}
					Some(Err(error)) => {
						warn!(%error, "error reading from websocket, reconnecting");
						return ReadOutcome::Failed;
					}
				}
			}
		}
	}

	/// Redials with a fixed backoff until it succeeds or shutdown flips.
	/// Returns `None` on shutdown.
	async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> Option<WsStream> {
		loop {
			tokio::select! {
				biased;

				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						return None;
					}
				}

				() = time::sleep(RECONNECT_BACKOFF) => {
					match self.connect().await {
						Ok(stream) => {
							info!("successfully reconnected to websocket");
							self.metrics.incr("websocket_reconnect_success");
							return Some(stream);
						}
						Err(error) => {
							warn!(%error, "websocket reconnect failed");
							self.metrics.incr("websocket_reconnect_error");
						}
					}
				}
			}
		}
	}

	async fn connect(&self) -> Result<WsStream, SubscriberError> {
		let url = format!(
			"{}/channel/{}",
			self.base_url.as_str().trim_end_matches('/'),
			self.channel
		);

		let mut request = url.into_client_request()?;
		let headers = request.headers_mut();
		headers.insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

		if let (Some(username), Some(password)) = (&self.username, &self.password) {
			let credentials = STANDARD.encode(format!("{username}:{password}"));
			let value = HeaderValue::from_str(&format!("Basic {credentials}"))
				.map_err(|_| SubscriberError::InvalidCredentials)?;
			headers.insert(header::AUTHORIZATION, value);
		}

		let (stream, _) = connect_async(request).await?;
		debug!(channel = %self.channel, "connected to message queue channel");

		Ok(stream)
	}
}

impl std::fmt::Debug for Subscriber {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscriber")
			.field("base_url", &self.base_url.as_str())
			.field("channel", &self.channel)
			.finish()
	}
}
