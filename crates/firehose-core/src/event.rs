//! Logical events emitted by the stream client (C4) or replayed by the
//! backfill controller (C6), consumed by the event router (C5). Kept
//! free of any transport detail so both can share one [`Record`] decode
//! path and one dispatch path.

use crate::{AtUri, Cid, Cursor, Record, SubjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitAction {
    Create,
    Update,
    Delete,
}

impl CommitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitAction::Create => "create",
            CommitAction::Update => "update",
            CommitAction::Delete => "delete",
        }
    }
}

/// One mutation within a commit. `record` is `None` for deletes and for
/// creates/updates whose block failed to decode (§4.4's "skip the op").
#[derive(Debug, Clone)]
pub struct CommitOp {
    pub action: CommitAction,
    pub collection: String,
    pub rkey: String,
    pub uri: AtUri,
    pub cid: Option<Cid>,
    pub record: Option<Record>,
}

#[derive(Debug, Clone)]
pub struct CommitEvent {
    pub seq: Cursor,
    pub repo: SubjectId,
    pub ops: Vec<CommitOp>,
}

#[derive(Debug, Clone)]
pub struct IdentityEvent {
    pub seq: Cursor,
    pub subject_id: SubjectId,
    pub handle: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccountEvent {
    pub seq: Cursor,
    pub subject_id: SubjectId,
    pub active: bool,
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub enum FirehoseEvent {
    Commit(CommitEvent),
    Identity(IdentityEvent),
    Account(AccountEvent),
}

impl FirehoseEvent {
    pub fn seq(&self) -> Cursor {
        match self {
            FirehoseEvent::Commit(e) => e.seq,
            FirehoseEvent::Identity(e) => e.seq,
            FirehoseEvent::Account(e) => e.seq,
        }
    }
}
