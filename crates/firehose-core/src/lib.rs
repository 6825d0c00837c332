pub mod event;
pub mod record;
pub mod status;
pub mod uri;

pub use event::{AccountEvent, CommitAction, CommitEvent, CommitOp, FirehoseEvent, IdentityEvent};
pub use record::{BlobRef, Embed, Facet, Record, RecordKind};
pub use status::AccountStatus;
pub use uri::AtUri;

/// Opaque globally-unique identifier for an account ("subject").
///
/// Two identifier families exist in the wild: centrally-registered (resolved
/// through a directory service) and domain-anchored (resolved through
/// `https://<domain>/.well-known/did.json`). Both round-trip through this
/// newtype unchanged; the family is distinguished by [`SubjectId::method`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier method, e.g. `plc` or `web`, per `did:<method>:...`.
    pub fn method(&self) -> Option<&str> {
        self.0.strip_prefix("did:")?.split(':').next()
    }

    pub fn is_domain_anchored(&self) -> bool {
        self.method() == Some("web")
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SubjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Content hash of a record's serialized bytes, as referenced from a commit
/// op and as the key into a commit's content-addressed archive of blocks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Cid(String);

impl Cid {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic sequence number assigned by the upstream relay to each event.
pub type Cursor = u64;

pub fn parse_rfc3339(s: &str) -> Option<time::OffsetDateTime> {
    time::OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339).ok()
}
