use std::future::Future;
use std::time::Duration;

use firehose_core::{Cursor, FirehoseEvent};
use firehose_util_error::FmtCompact as _;
use futures_util::StreamExt as _;
use snafu::ResultExt as _;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::envelope::Frame;
use crate::error::{self, StreamResult};
use crate::wire::{WireAccount, WireCommit, WireIdentity};
use crate::{decode, LOG_TARGET};

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub relay_url: String,
    pub max_frame_size: usize,
    pub reconnect_min_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            relay_url: "wss://bsky.network".to_string(),
            max_frame_size: 10 * 1024 * 1024,
            reconnect_min_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

/// Maintains the subscription and hands decoded events to `on_event`.
/// Reconnects with exponential backoff on any disconnect or frame error,
/// resuming from whatever cursor `on_event` last reported via its return
/// value (§4.4 "Reconnect policy").
pub struct StreamClient {
    config: StreamConfig,
}

impl StreamClient {
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    /// Runs until `should_stop` returns true between reconnects. `on_event`
    /// is awaited for every decoded event in order and returns the cursor
    /// to resume from if the connection drops right after.
    pub async fn run<F, Fut, S>(&self, mut cursor: Option<Cursor>, mut on_event: F, mut should_stop: S)
    where
        F: FnMut(FirehoseEvent) -> Fut,
        Fut: Future<Output = Cursor>,
        S: FnMut() -> bool,
    {
        let mut backoff = self.config.reconnect_min_delay;

        loop {
            if should_stop() {
                return;
            }

            match self.connect_and_drain(cursor, &mut on_event, &mut should_stop).await {
                Ok(last_cursor) => {
                    cursor = last_cursor.or(cursor);
                    backoff = self.config.reconnect_min_delay;
                }
                Err(err) => {
                    warn!(target: LOG_TARGET, err = %err.fmt_compact(), "stream disconnected, reconnecting");
                }
            }

            if should_stop() {
                return;
            }
            tokio::time::sleep(backoff).await;
            backoff = std::cmp::min(backoff * 2, self.config.reconnect_max_delay);
        }
    }

    async fn connect_and_drain<F, Fut, S>(
        &self,
        cursor: Option<Cursor>,
        on_event: &mut F,
        should_stop: &mut S,
    ) -> StreamResult<Option<Cursor>>
    where
        F: FnMut(FirehoseEvent) -> Fut,
        Fut: Future<Output = Cursor>,
        S: FnMut() -> bool,
    {
        let mut url = Url::parse(&format!("{}/xrpc/com.atproto.sync.subscribeRepos", self.config.relay_url))
            .context(error::UrlSnafu)?;
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("cursor", &cursor.to_string());
        }

        info!(target: LOG_TARGET, %url, "connecting to relay");
        let config = WebSocketConfig {
            max_message_size: Some(self.config.max_frame_size),
            max_frame_size: Some(self.config.max_frame_size),
            ..Default::default()
        };
        let (ws, _resp) = tokio_tungstenite::connect_async_with_config(url.as_str(), Some(config), false)
            .await
            .context(error::WebSocketSnafu)?;
        info!(target: LOG_TARGET, "relay connection established");

        let mut last_cursor = cursor;
        let (_write, mut read) = ws.split();

        loop {
            if should_stop() {
                return Ok(last_cursor);
            }
            let Some(msg) = read.next().await else {
                return Ok(last_cursor);
            };
            let msg = msg.context(error::WebSocketSnafu)?;
            let Message::Binary(data) = msg else {
                continue;
            };

            let frame = Frame::parse(&data)?;
            let Some(kind) = frame.kind.as_deref() else {
                continue;
            };

            let event = match kind {
                "#commit" => match serde_ipld_dagcbor::from_slice::<WireCommit>(&frame.body) {
                    Ok(commit) => decode::decode_commit(commit),
                    Err(err) => {
                        debug!(target: LOG_TARGET, %err, "commit body decode failed, skipping frame");
                        continue;
                    }
                },
                "#identity" => match serde_ipld_dagcbor::from_slice::<WireIdentity>(&frame.body) {
                    Ok(identity) => decode::decode_identity(identity),
                    Err(err) => {
                        debug!(target: LOG_TARGET, %err, "identity body decode failed, skipping frame");
                        continue;
                    }
                },
                "#account" => match serde_ipld_dagcbor::from_slice::<WireAccount>(&frame.body) {
                    Ok(account) => decode::decode_account(account),
                    Err(err) => {
                        debug!(target: LOG_TARGET, %err, "account body decode failed, skipping frame");
                        continue;
                    }
                },
                other => {
                    debug!(target: LOG_TARGET, kind = other, "unhandled frame kind");
                    continue;
                }
            };

            last_cursor = Some(on_event(event).await);
        }
    }
}
