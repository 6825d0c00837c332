//! Schema setup run once at startup. The teacher initializes its tables
//! with `init_tables_tx` on every open (`migration_ops.rs`); the relational
//! equivalent here is one idempotent batch of `CREATE TABLE IF NOT EXISTS`
//! statements, since Postgres has no in-process table handles to open.

use snafu::ResultExt as _;
use tracing::info;

use crate::error::{self, StoreResult};
use crate::{Store, LOG_TARGET};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    handle TEXT NOT NULL,
    incomplete BOOLEAN NOT NULL DEFAULT false,
    display_name TEXT,
    description TEXT,
    avatar_cid TEXT,
    banner_cid TEXT,
    upstream_status TEXT,
    data_collection_forbidden BOOLEAN NOT NULL DEFAULT false,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS users_handle_idx ON users (handle);

CREATE TABLE IF NOT EXISTS posts (
    uri TEXT PRIMARY KEY,
    author_id TEXT NOT NULL,
    text TEXT NOT NULL,
    reply_root TEXT,
    reply_parent TEXT,
    quoted_uri TEXT,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS posts_author_idx ON posts (author_id);
CREATE INDEX IF NOT EXISTS posts_reply_parent_idx ON posts (reply_parent);

CREATE TABLE IF NOT EXISTS post_aggregations (
    post_uri TEXT PRIMARY KEY REFERENCES posts (uri) ON DELETE CASCADE,
    like_count BIGINT NOT NULL DEFAULT 0,
    repost_count BIGINT NOT NULL DEFAULT 0,
    reply_count BIGINT NOT NULL DEFAULT 0,
    quote_count BIGINT NOT NULL DEFAULT 0,
    bookmark_count BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS thread_context (
    post_uri TEXT PRIMARY KEY REFERENCES posts (uri) ON DELETE CASCADE,
    root_uri TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notifications (
    id BIGSERIAL PRIMARY KEY,
    recipient_id TEXT NOT NULL,
    author_id TEXT NOT NULL,
    reason TEXT NOT NULL,
    subject_uri TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS notifications_recipient_idx ON notifications (recipient_id, created_at DESC);

CREATE TABLE IF NOT EXISTS likes (
    uri TEXT PRIMARY KEY,
    post_uri TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS likes_post_idx ON likes (post_uri);

CREATE TABLE IF NOT EXISTS reposts (
    uri TEXT PRIMARY KEY,
    post_uri TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS reposts_post_idx ON reposts (post_uri);

CREATE TABLE IF NOT EXISTS bookmarks (
    uri TEXT PRIMARY KEY,
    post_uri TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS bookmarks_post_idx ON bookmarks (post_uri);

CREATE TABLE IF NOT EXISTS quotes (
    quoting_uri TEXT NOT NULL,
    quoted_uri TEXT NOT NULL,
    PRIMARY KEY (quoting_uri, quoted_uri)
);

CREATE TABLE IF NOT EXISTS viewer_state (
    post_uri TEXT NOT NULL,
    viewer_id TEXT NOT NULL,
    like_uri TEXT,
    repost_uri TEXT,
    bookmarked BOOLEAN NOT NULL DEFAULT false,
    PRIMARY KEY (post_uri, viewer_id)
);

CREATE TABLE IF NOT EXISTS feed_items (
    uri TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    subject_uri TEXT NOT NULL,
    author_id TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS feed_items_author_idx ON feed_items (author_id, created_at DESC);

CREATE TABLE IF NOT EXISTS follows (
    uri TEXT PRIMARY KEY,
    follower_id TEXT NOT NULL,
    followee_id TEXT NOT NULL REFERENCES users (id),
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS follows_follower_idx ON follows (follower_id);
CREATE INDEX IF NOT EXISTS follows_followee_idx ON follows (followee_id);

CREATE TABLE IF NOT EXISTS blocks (
    uri TEXT PRIMARY KEY,
    blocker_id TEXT NOT NULL,
    blocked_id TEXT NOT NULL REFERENCES users (id),
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS lists (
    uri TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    purpose TEXT,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS list_items (
    uri TEXT PRIMARY KEY,
    list_uri TEXT NOT NULL REFERENCES lists (uri),
    subject_id TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS list_items_list_idx ON list_items (list_uri);

CREATE TABLE IF NOT EXISTS feed_generators (
    uri TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    did TEXT NOT NULL,
    display_name TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS starter_packs (
    uri TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    list_uri TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS labeler_services (
    uri TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    policies JSONB,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS labels (
    src TEXT NOT NULL,
    subject TEXT NOT NULL,
    value TEXT NOT NULL,
    negated BOOLEAN NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (src, subject, value)
);

CREATE TABLE IF NOT EXISTS verifications (
    uri TEXT PRIMARY KEY,
    issuer_id TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    handle TEXT NOT NULL,
    display_name TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS generic_records (
    uri TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    author_id TEXT NOT NULL,
    raw_json JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS cursors (
    service TEXT PRIMARY KEY,
    seq BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
";

impl Store {
    /// Applies the schema. Safe to call on every startup; every statement is
    /// `IF NOT EXISTS`.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        let client = self.client().await?;
        client.batch_execute(SCHEMA).await.context(error::QuerySnafu)?;
        info!(target: LOG_TARGET, "schema migrations applied");
        Ok(())
    }
}
