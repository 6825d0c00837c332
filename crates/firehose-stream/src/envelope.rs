use serde::Deserialize;
use serde_bytes::ByteBuf;

use crate::error::{self, StreamResult};

/// The two-CBOR-object envelope every firehose frame is wrapped in: a
/// small header naming the message kind, followed immediately (same byte
/// stream, no length prefix between them) by the body for that kind.
#[derive(Debug, Deserialize)]
pub struct FrameHeader {
    pub op: i8,
    #[serde(rename = "t")]
    pub kind: Option<String>,
}

pub struct Frame {
    pub kind: Option<String>,
    pub body: Vec<u8>,
}

impl Frame {
    /// Splits a binary WebSocket message into its header and body. The
    /// body is returned as raw bytes since its shape depends on `kind`;
    /// the caller decodes it with the matching wire type.
    pub fn parse(data: &[u8]) -> StreamResult<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let header: FrameHeader = serde_ipld_dagcbor::from_reader(&mut cursor)
            .map_err(|err| error::StreamError::Envelope { reason: err.to_string() })?;
        let offset = cursor.position() as usize;
        Ok(Self {
            kind: header.kind,
            body: data[offset..].to_vec(),
        })
    }
}

/// Raw record bytes keyed by the block's multiformats CID. Decoded by
/// [`crate::blockmap::BlockMap`]; kept here only as the type alias used by
/// the wire structs below.
#[derive(Debug, Deserialize)]
pub struct RawBlocks(pub ByteBuf);
