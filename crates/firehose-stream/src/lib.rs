//! Stream client (C4): maintains the relay WebSocket subscription,
//! decodes frames into [`firehose_core::FirehoseEvent`]s, and reconnects
//! with backoff. Grounded on `other_examples`'s
//! `joshlacal-bluesky-push-notifier` firehose consumer for the
//! frame/commit decode shape and reconnect loop, adapted off the
//! `atrium-repo`/`ipld-core` crates it uses (not in this project's
//! dependency set) onto a hand-rolled block reader (see
//! [`blockmap::BlockMap`]).

mod blockmap;
mod client;
mod decode;
mod envelope;
pub mod error;
mod wire;

pub use client::{StreamClient, StreamConfig};
pub use error::{StreamError, StreamResult};

pub const LOG_TARGET: &str = "firehose::stream";
