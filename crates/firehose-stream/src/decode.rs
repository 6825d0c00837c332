use firehose_core::{AccountEvent, AtUri, CommitAction, CommitEvent, CommitOp, Cid, FirehoseEvent, IdentityEvent, Record, SubjectId};
use tracing::debug;

use crate::blockmap::BlockMap;
use crate::wire::{WireAccount, WireCommit, WireIdentity};
use crate::LOG_TARGET;

/// Materializes a decoded `#commit` body into the record-level event this
/// system's router consumes. Decode failures on individual ops are
/// swallowed here (§4.4 "skip that op only") rather than aborting the
/// whole commit.
pub fn decode_commit(commit: WireCommit) -> FirehoseEvent {
    let repo = SubjectId::new(commit.repo.clone());
    let blocks = BlockMap::parse(commit.blocks.as_slice());

    let mut ops = Vec::with_capacity(commit.ops.len());
    for op in commit.ops {
        let Some((collection, rkey)) = op.path.split_once('/') else {
            debug!(target: LOG_TARGET, path = %op.path, "op path missing collection/rkey separator");
            continue;
        };
        let action = match op.action.as_str() {
            "create" => CommitAction::Create,
            "update" => CommitAction::Update,
            "delete" => CommitAction::Delete,
            other => {
                debug!(target: LOG_TARGET, action = other, "unrecognized op action");
                continue;
            }
        };
        let uri = AtUri::new(repo.clone(), collection, rkey);

        let cid = op.cid.as_ref().map(|link| Cid::new(data_encoding::HEXLOWER.encode(link.as_bytes())));

        let record = if matches!(action, CommitAction::Create | CommitAction::Update) {
            op.cid.as_ref().and_then(|link| {
                let bytes = blocks.get(link.as_bytes())?;
                match serde_ipld_dagcbor::from_slice::<serde_json::Value>(bytes) {
                    Ok(value) => match Record::from_collection_and_value(collection, value) {
                        Ok(record) => Some(record),
                        Err(err) => {
                            debug!(target: LOG_TARGET, %uri, %err, "record shape mismatch, skipping op");
                            None
                        }
                    },
                    Err(err) => {
                        debug!(target: LOG_TARGET, %uri, %err, "block decode failed, skipping op");
                        None
                    }
                }
            })
        } else {
            None
        };

        ops.push(CommitOp { action, collection: collection.to_string(), rkey: rkey.to_string(), uri, cid, record });
    }

    FirehoseEvent::Commit(CommitEvent { seq: commit.seq as u64, repo, ops })
}

pub fn decode_identity(wire: WireIdentity) -> FirehoseEvent {
    FirehoseEvent::Identity(IdentityEvent {
        seq: wire.seq as u64,
        subject_id: SubjectId::new(wire.did),
        handle: wire.handle,
    })
}

pub fn decode_account(wire: WireAccount) -> FirehoseEvent {
    FirehoseEvent::Account(AccountEvent {
        seq: wire.seq as u64,
        subject_id: SubjectId::new(wire.did),
        active: wire.active,
        status: wire.status,
    })
}
