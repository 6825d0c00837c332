use serde::Deserialize;
use serde_bytes::ByteBuf;

/// `#commit` body, decoded straight off the wire before any local
/// interpretation (action classification, URI construction, record
/// decoding happen in [`crate::decode`]).
#[derive(Debug, Deserialize)]
pub struct WireCommit {
    pub seq: i64,
    pub repo: String,
    pub ops: Vec<WireOp>,
    pub blocks: ByteBuf,
}

#[derive(Debug, Deserialize)]
pub struct WireOp {
    pub action: String,
    pub path: String,
    pub cid: Option<WireCidLink>,
}

/// A CBOR tag-42 CID link. Without a multiformats/ipld crate in the
/// dependency set, this is decoded as the raw identity-multibase bytes
/// (leading `0x00` stripped) the tag wraps, which is exactly the CID
/// encoding [`crate::blockmap::BlockMap`] keys its entries by.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct WireCidLink(ByteBuf);

impl WireCidLink {
    pub fn as_bytes(&self) -> &[u8] {
        let bytes = self.0.as_slice();
        bytes.strip_prefix(&[0u8]).unwrap_or(bytes)
    }
}

#[derive(Debug, Deserialize)]
pub struct WireIdentity {
    pub seq: i64,
    pub did: String,
    pub handle: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireAccount {
    pub seq: i64,
    pub did: String,
    pub active: bool,
    pub status: Option<String>,
}
