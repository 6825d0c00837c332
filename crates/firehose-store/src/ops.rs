use firehose_core::{AccountStatus, AtUri, SubjectId};
use firehose_util::{sanitize_text, sanitize_text_opt};
use snafu::ResultExt as _;
use time::OffsetDateTime;
use tracing::trace;

use crate::error::{self, StoreResult};
use crate::{Store, WriteOutcome, LOG_TARGET};

/// Maps a Postgres error to a [`WriteOutcome`] via `classify_write_error`,
/// propagating anything that isn't a recognized duplicate/FK-miss signal.
fn outcome_of(err: tokio_postgres::Error) -> StoreResult<WriteOutcome> {
    match crate::classify_write_error(&err) {
        Some(outcome) => Ok(outcome),
        None => Err(err).context(error::QuerySnafu),
    }
}

impl Store {
    /// Creates a subject row with a placeholder handle if it doesn't
    /// already exist (§4.5.5: initial create uses `"handle.invalid"`).
    pub async fn ensure_user(&self, id: &SubjectId, handle: Option<&str>) -> StoreResult<WriteOutcome> {
        let client = self.client().await?;
        let handle = handle.unwrap_or("handle.invalid");
        let result = client
            .execute(
                "INSERT INTO users (id, handle, incomplete) VALUES ($1, $2, $3) \
                 ON CONFLICT (id) DO NOTHING",
                &[&id.as_str(), &handle, &(handle == "handle.invalid")],
            )
            .await;
        match result {
            Ok(0) => Ok(WriteOutcome::AlreadyExists),
            Ok(_) => Ok(WriteOutcome::Inserted),
            Err(err) => outcome_of(err),
        }
    }

    pub async fn update_user_handle(&self, id: &SubjectId, handle: &str) -> StoreResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "UPDATE users SET handle = $2, incomplete = false WHERE id = $1",
                &[&id.as_str(), &handle],
            )
            .await
            .context(error::QuerySnafu)?;
        Ok(())
    }

    pub async fn update_user_status(&self, id: &SubjectId, status: AccountStatus) -> StoreResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "UPDATE users SET upstream_status = $2 WHERE id = $1",
                &[&id.as_str(), &status.as_str()],
            )
            .await
            .context(error::QuerySnafu)?;
        Ok(())
    }

    pub async fn set_data_collection_forbidden(&self, id: &SubjectId, forbidden: bool) -> StoreResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "UPDATE users SET data_collection_forbidden = $2 WHERE id = $1",
                &[&id.as_str(), &forbidden],
            )
            .await
            .context(error::QuerySnafu)?;
        Ok(())
    }

    /// Looks up a locally-known subject by exact handle match, used to
    /// resolve `@handle` mentions without a network round-trip (§4.5.3).
    pub async fn find_subject_by_handle(&self, handle: &str) -> StoreResult<Option<SubjectId>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT id FROM users WHERE handle = $1", &[&handle])
            .await
            .context(error::QuerySnafu)?;
        Ok(row.map(|r| SubjectId::new(r.get::<_, String>(0))))
    }

    pub async fn is_data_collection_forbidden(&self, id: &SubjectId) -> StoreResult<bool> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT data_collection_forbidden FROM users WHERE id = $1",
                &[&id.as_str()],
            )
            .await
            .context(error::QuerySnafu)?;
        Ok(row.map(|r| r.get::<_, bool>(0)).unwrap_or(false))
    }

    /// Creates a post row. When `reply_parent` is set, increments the
    /// parent's `reply_count`, inserts a thread-context row, and creates a
    /// reply notification, all inside the op's one transaction. When
    /// `quoted` is set, does the analogous quote-count bookkeeping. Both
    /// can raise a foreign-key miss if their target post hasn't streamed
    /// yet — the caller enqueues the whole op to `pending-ops` on that
    /// signal (§4.5.4).
    #[allow(clippy::too_many_arguments)]
    pub async fn create_post(
        &self,
        uri: &AtUri,
        author: &SubjectId,
        text: &str,
        reply_root: Option<&AtUri>,
        reply_parent: Option<&AtUri>,
        quoted: Option<&AtUri>,
        created_at: OffsetDateTime,
    ) -> StoreResult<WriteOutcome> {
        let text = sanitize_text(text);
        let mut client = self.client().await?;
        let tx = client.transaction().await.context(error::QuerySnafu)?;

        let inserted = tx
            .execute(
                "INSERT INTO posts (uri, author_id, text, reply_root, reply_parent, quoted_uri, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (uri) DO NOTHING",
                &[
                    &uri.to_string(),
                    &author.as_str(),
                    &text,
                    &reply_root.map(|u| u.to_string()),
                    &reply_parent.map(|u| u.to_string()),
                    &quoted.map(|u| u.to_string()),
                    &created_at,
                ],
            )
            .await;

        let inserted = match inserted {
            Ok(0) => {
                tx.commit().await.context(error::QuerySnafu)?;
                return Ok(WriteOutcome::AlreadyExists);
            }
            Ok(_) => true,
            Err(err) => {
                let _ = tx.rollback().await;
                return outcome_of(err);
            }
        };
        debug_assert!(inserted);

        if let Some(parent) = reply_parent {
            let bump = tx
                .execute(
                    "UPDATE post_aggregations SET reply_count = reply_count + 1 WHERE post_uri = $1",
                    &[&parent.to_string()],
                )
                .await;
            match bump {
                Ok(0) => {
                    let _ = tx.rollback().await;
                    return Ok(WriteOutcome::ForeignKeyMissing);
                }
                Ok(_) => {}
                Err(err) => {
                    let _ = tx.rollback().await;
                    return outcome_of(err);
                }
            }

            tx.execute(
                "INSERT INTO thread_context (post_uri, root_uri) VALUES ($1, $2) ON CONFLICT (post_uri) DO NOTHING",
                &[&uri.to_string(), &reply_root.unwrap_or(parent).to_string()],
            )
            .await
            .context(error::QuerySnafu)?;

            let recipient = tx
                .query_opt("SELECT author_id FROM posts WHERE uri = $1", &[&parent.to_string()])
                .await
                .context(error::QuerySnafu)?
                .map(|r| r.get::<_, String>(0));
            if let Some(recipient) = recipient {
                if recipient != author.as_str() {
                    tx.execute(
                        "INSERT INTO notifications (recipient_id, author_id, reason, subject_uri, created_at) \
                         VALUES ($1, $2, 'reply', $3, $4)",
                        &[&recipient, &author.as_str(), &uri.to_string(), &created_at],
                    )
                    .await
                    .context(error::QuerySnafu)?;
                }
            }
        }

        if let Some(quoted) = quoted {
            let bump = tx
                .execute(
                    "UPDATE post_aggregations SET quote_count = quote_count + 1 WHERE post_uri = $1",
                    &[&quoted.to_string()],
                )
                .await;
            match bump {
                Ok(0) => {
                    let _ = tx.rollback().await;
                    return Ok(WriteOutcome::ForeignKeyMissing);
                }
                Ok(_) => {}
                Err(err) => {
                    let _ = tx.rollback().await;
                    return outcome_of(err);
                }
            }

            tx.execute(
                "INSERT INTO quotes (quoting_uri, quoted_uri) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&uri.to_string(), &quoted.to_string()],
            )
            .await
            .context(error::QuerySnafu)?;

            let recipient = tx
                .query_opt("SELECT author_id FROM posts WHERE uri = $1", &[&quoted.to_string()])
                .await
                .context(error::QuerySnafu)?
                .map(|r| r.get::<_, String>(0));
            if let Some(recipient) = recipient {
                if recipient != author.as_str() {
                    tx.execute(
                        "INSERT INTO notifications (recipient_id, author_id, reason, subject_uri, created_at) \
                         VALUES ($1, $2, 'quote', $3, $4)",
                        &[&recipient, &author.as_str(), &uri.to_string(), &created_at],
                    )
                    .await
                    .context(error::QuerySnafu)?;
                }
            }
        }

        tx.execute(
            "INSERT INTO post_aggregations (post_uri) VALUES ($1) ON CONFLICT DO NOTHING",
            &[&uri.to_string()],
        )
        .await
        .context(error::QuerySnafu)?;

        tx.commit().await.context(error::QuerySnafu)?;
        trace!(target: LOG_TARGET, %uri, "post created");
        Ok(WriteOutcome::Inserted)
    }

    /// One mention-notification per distinct matched subject (§4.5.3). Run
    /// after `create_post` succeeds, outside its transaction: a failure to
    /// notify a mention must not roll back the post itself.
    pub async fn create_mention_notification(
        &self,
        post_uri: &AtUri,
        author: &SubjectId,
        mentioned: &SubjectId,
        created_at: OffsetDateTime,
    ) -> StoreResult<()> {
        if mentioned == author {
            return Ok(());
        }
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO notifications (recipient_id, author_id, reason, subject_uri, created_at) \
                 VALUES ($1, $2, 'mention', $3, $4)",
                &[&mentioned.as_str(), &author.as_str(), &post_uri.to_string(), &created_at],
            )
            .await
            .context(error::QuerySnafu)?;
        Ok(())
    }

    pub async fn create_like(
        &self,
        uri: &AtUri,
        post_uri: &AtUri,
        liker: &SubjectId,
        created_at: OffsetDateTime,
    ) -> StoreResult<WriteOutcome> {
        self.create_post_interaction(uri, post_uri, liker, "likes", "like_uri", "like", created_at)
            .await
    }

    pub async fn create_repost(
        &self,
        uri: &AtUri,
        post_uri: &AtUri,
        reposter: &SubjectId,
        created_at: OffsetDateTime,
    ) -> StoreResult<WriteOutcome> {
        let outcome = self
            .create_post_interaction(uri, post_uri, reposter, "reposts", "repost_uri", "repost", created_at)
            .await?;
        if outcome == WriteOutcome::Inserted {
            let client = self.client().await?;
            client
                .execute(
                    "INSERT INTO feed_items (uri, kind, subject_uri, author_id, created_at) \
                     VALUES ($1, 'repost', $2, $3, $4) ON CONFLICT (uri) DO NOTHING",
                    &[&uri.to_string(), &post_uri.to_string(), &reposter.as_str(), &created_at],
                )
                .await
                .context(error::QuerySnafu)?;
        }
        Ok(outcome)
    }

    pub async fn create_bookmark(
        &self,
        uri: &AtUri,
        post_uri: &AtUri,
        bookmarker: &SubjectId,
        created_at: OffsetDateTime,
    ) -> StoreResult<WriteOutcome> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.context(error::QuerySnafu)?;

        let inserted = tx
            .execute(
                "INSERT INTO bookmarks (uri, post_uri, subject_id, created_at) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (uri) DO NOTHING",
                &[&uri.to_string(), &post_uri.to_string(), &bookmarker.as_str(), &created_at],
            )
            .await;
        match inserted {
            Ok(0) => {
                tx.commit().await.context(error::QuerySnafu)?;
                return Ok(WriteOutcome::AlreadyExists);
            }
            Ok(_) => {}
            Err(err) => {
                let _ = tx.rollback().await;
                return outcome_of(err);
            }
        }

        let bump = tx
            .execute(
                "UPDATE post_aggregations SET bookmark_count = bookmark_count + 1 WHERE post_uri = $1",
                &[&post_uri.to_string()],
            )
            .await
            .context(error::QuerySnafu)?;
        if bump == 0 {
            let _ = tx.rollback().await;
            return Ok(WriteOutcome::ForeignKeyMissing);
        }

        tx.execute(
            "INSERT INTO viewer_state (post_uri, viewer_id, bookmarked) VALUES ($1, $2, true) \
             ON CONFLICT (post_uri, viewer_id) DO UPDATE SET bookmarked = true",
            &[&post_uri.to_string(), &bookmarker.as_str()],
        )
        .await
        .context(error::QuerySnafu)?;

        tx.commit().await.context(error::QuerySnafu)?;
        Ok(WriteOutcome::Inserted)
    }

    /// Shared body for like/repost: insert the interaction row, bump the
    /// matching counter, upsert the viewer-state column named by
    /// `viewer_state_col`, and notify unless self-interaction.
    async fn create_post_interaction(
        &self,
        uri: &AtUri,
        post_uri: &AtUri,
        subject: &SubjectId,
        table: &str,
        viewer_state_col: &str,
        reason: &str,
        created_at: OffsetDateTime,
    ) -> StoreResult<WriteOutcome> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.context(error::QuerySnafu)?;

        let insert_sql = format!(
            "INSERT INTO {table} (uri, post_uri, subject_id, created_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (uri) DO NOTHING"
        );
        let inserted = tx
            .execute(&insert_sql, &[&uri.to_string(), &post_uri.to_string(), &subject.as_str(), &created_at])
            .await;
        match inserted {
            Ok(0) => {
                tx.commit().await.context(error::QuerySnafu)?;
                return Ok(WriteOutcome::AlreadyExists);
            }
            Ok(_) => {}
            Err(err) => {
                let _ = tx.rollback().await;
                return outcome_of(err);
            }
        }

        let counter = format!("{reason}_count");
        let bump_sql =
            format!("UPDATE post_aggregations SET {counter} = {counter} + 1 WHERE post_uri = $1");
        let bump = tx
            .execute(&bump_sql, &[&post_uri.to_string()])
            .await
            .context(error::QuerySnafu)?;
        if bump == 0 {
            let _ = tx.rollback().await;
            return Ok(WriteOutcome::ForeignKeyMissing);
        }

        let viewer_sql = format!(
            "INSERT INTO viewer_state (post_uri, viewer_id, {viewer_state_col}) VALUES ($1, $2, $3) \
             ON CONFLICT (post_uri, viewer_id) DO UPDATE SET {viewer_state_col} = $3"
        );
        tx.execute(&viewer_sql, &[&post_uri.to_string(), &subject.as_str(), &uri.to_string()])
            .await
            .context(error::QuerySnafu)?;

        let recipient = tx
            .query_opt("SELECT author_id FROM posts WHERE uri = $1", &[&post_uri.to_string()])
            .await
            .context(error::QuerySnafu)?
            .map(|r| r.get::<_, String>(0));
        if let Some(recipient) = recipient {
            if recipient != subject.as_str() {
                tx.execute(
                    "INSERT INTO notifications (recipient_id, author_id, reason, subject_uri, created_at) \
                     VALUES ($1, $2, $3, $4, $5)",
                    &[&recipient, &subject.as_str(), &reason, &uri.to_string(), &created_at],
                )
                .await
                .context(error::QuerySnafu)?;
            }
        }

        tx.commit().await.context(error::QuerySnafu)?;
        Ok(WriteOutcome::Inserted)
    }

    pub async fn create_follow(
        &self,
        uri: &AtUri,
        follower: &SubjectId,
        followee: &SubjectId,
        created_at: OffsetDateTime,
    ) -> StoreResult<WriteOutcome> {
        let client = self.client().await?;
        let result = client
            .execute(
                "INSERT INTO follows (uri, follower_id, followee_id, created_at) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (uri) DO NOTHING",
                &[&uri.to_string(), &follower.as_str(), &followee.as_str(), &created_at],
            )
            .await;
        match result {
            Ok(0) => Ok(WriteOutcome::AlreadyExists),
            Ok(_) => {
                if followee != follower {
                    client
                        .execute(
                            "INSERT INTO notifications (recipient_id, author_id, reason, subject_uri, created_at) \
                             VALUES ($1, $2, 'follow', $3, $4)",
                            &[&followee.as_str(), &follower.as_str(), &uri.to_string(), &created_at],
                        )
                        .await
                        .context(error::QuerySnafu)?;
                }
                Ok(WriteOutcome::Inserted)
            }
            Err(err) => outcome_of(err),
        }
    }

    pub async fn create_block(
        &self,
        uri: &AtUri,
        blocker: &SubjectId,
        blocked: &SubjectId,
        created_at: OffsetDateTime,
    ) -> StoreResult<WriteOutcome> {
        let client = self.client().await?;
        let result = client
            .execute(
                "INSERT INTO blocks (uri, blocker_id, blocked_id, created_at) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (uri) DO NOTHING",
                &[&uri.to_string(), &blocker.as_str(), &blocked.as_str(), &created_at],
            )
            .await;
        match result {
            Ok(0) => Ok(WriteOutcome::AlreadyExists),
            Ok(_) => Ok(WriteOutcome::Inserted),
            Err(err) => outcome_of(err),
        }
    }

    pub async fn create_list(
        &self,
        uri: &AtUri,
        owner: &SubjectId,
        name: &str,
        purpose: Option<&str>,
        created_at: OffsetDateTime,
    ) -> StoreResult<WriteOutcome> {
        let client = self.client().await?;
        let result = client
            .execute(
                "INSERT INTO lists (uri, owner_id, name, purpose, created_at) VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (uri) DO NOTHING",
                &[&uri.to_string(), &owner.as_str(), &name, &purpose, &created_at],
            )
            .await;
        match result {
            Ok(0) => Ok(WriteOutcome::AlreadyExists),
            Ok(_) => Ok(WriteOutcome::Inserted),
            Err(err) => outcome_of(err),
        }
    }

    pub async fn create_list_item(
        &self,
        uri: &AtUri,
        list_uri: &AtUri,
        subject: &SubjectId,
        created_at: OffsetDateTime,
    ) -> StoreResult<WriteOutcome> {
        let client = self.client().await?;
        let result = client
            .execute(
                "INSERT INTO list_items (uri, list_uri, subject_id, created_at) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (uri) DO NOTHING",
                &[&uri.to_string(), &list_uri.to_string(), &subject.as_str(), &created_at],
            )
            .await;
        match result {
            Ok(0) => Ok(WriteOutcome::AlreadyExists),
            Ok(_) => Ok(WriteOutcome::Inserted),
            Err(err) => outcome_of(err),
        }
    }

    pub async fn create_feed_generator(
        &self,
        uri: &AtUri,
        owner: &SubjectId,
        did: &str,
        display_name: &str,
        created_at: OffsetDateTime,
    ) -> StoreResult<WriteOutcome> {
        let client = self.client().await?;
        let result = client
            .execute(
                "INSERT INTO feed_generators (uri, owner_id, did, display_name, created_at) \
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (uri) DO NOTHING",
                &[&uri.to_string(), &owner.as_str(), &did, &display_name, &created_at],
            )
            .await;
        match result {
            Ok(0) => Ok(WriteOutcome::AlreadyExists),
            Ok(_) => Ok(WriteOutcome::Inserted),
            Err(err) => outcome_of(err),
        }
    }

    pub async fn create_starter_pack(
        &self,
        uri: &AtUri,
        owner: &SubjectId,
        name: &str,
        list_uri: &AtUri,
        created_at: OffsetDateTime,
    ) -> StoreResult<WriteOutcome> {
        let client = self.client().await?;
        let result = client
            .execute(
                "INSERT INTO starter_packs (uri, owner_id, name, list_uri, created_at) \
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (uri) DO NOTHING",
                &[&uri.to_string(), &owner.as_str(), &name, &list_uri.to_string(), &created_at],
            )
            .await;
        match result {
            Ok(0) => Ok(WriteOutcome::AlreadyExists),
            Ok(_) => Ok(WriteOutcome::Inserted),
            Err(err) => outcome_of(err),
        }
    }

    pub async fn create_labeler_service(
        &self,
        uri: &AtUri,
        owner: &SubjectId,
        policies: Option<&serde_json::Value>,
        created_at: OffsetDateTime,
    ) -> StoreResult<WriteOutcome> {
        let client = self.client().await?;
        let result = client
            .execute(
                "INSERT INTO labeler_services (uri, owner_id, policies, created_at) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (uri) DO NOTHING",
                &[&uri.to_string(), &owner.as_str(), &policies, &created_at],
            )
            .await;
        match result {
            Ok(0) => Ok(WriteOutcome::AlreadyExists),
            Ok(_) => Ok(WriteOutcome::Inserted),
            Err(err) => outcome_of(err),
        }
    }

    pub async fn create_verification(
        &self,
        uri: &AtUri,
        issuer: &SubjectId,
        subject: &SubjectId,
        handle: &str,
        display_name: &str,
        created_at: OffsetDateTime,
    ) -> StoreResult<WriteOutcome> {
        let client = self.client().await?;
        let result = client
            .execute(
                "INSERT INTO verifications (uri, issuer_id, subject_id, handle, display_name, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (uri) DO NOTHING",
                &[&uri.to_string(), &issuer.as_str(), &subject.as_str(), &handle, &display_name, &created_at],
            )
            .await;
        match result {
            Ok(0) => Ok(WriteOutcome::AlreadyExists),
            Ok(_) => Ok(WriteOutcome::Inserted),
            Err(err) => outcome_of(err),
        }
    }

    pub async fn upsert_profile(
        &self,
        subject: &SubjectId,
        display_name: Option<&str>,
        description: Option<&str>,
        avatar_cid: Option<&str>,
        banner_cid: Option<&str>,
    ) -> StoreResult<()> {
        let display_name = sanitize_text_opt(display_name);
        let description = sanitize_text_opt(description);
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO users (id, display_name, description, avatar_cid, banner_cid) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (id) DO UPDATE SET \
                   display_name = EXCLUDED.display_name, \
                   description = EXCLUDED.description, \
                   avatar_cid = EXCLUDED.avatar_cid, \
                   banner_cid = EXCLUDED.banner_cid",
                &[&subject.as_str(), &display_name, &description, &avatar_cid, &banner_cid],
            )
            .await
            .context(error::QuerySnafu)?;
        Ok(())
    }

    /// Applies (or negates) a label (§3, I5). A later row with the same
    /// `(src, subject, value)` and `negated = true` cancels the prior
    /// assertion; we implement this with an upsert keyed by that triple
    /// rather than scanning history, since only the latest timestamp per
    /// key is ever observable.
    pub async fn apply_label(
        &self,
        src: &SubjectId,
        subject: &str,
        value: &str,
        negated: bool,
        created_at: OffsetDateTime,
    ) -> StoreResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO labels (src, subject, value, negated, created_at) VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (src, subject, value) DO UPDATE SET \
                   negated = EXCLUDED.negated, created_at = EXCLUDED.created_at \
                 WHERE labels.created_at <= EXCLUDED.created_at",
                &[&src.as_str(), &subject, &value, &negated, &created_at],
            )
            .await
            .context(error::QuerySnafu)?;
        Ok(())
    }

    pub async fn create_generic(
        &self,
        uri: &AtUri,
        collection: &str,
        author: &SubjectId,
        raw: &serde_json::Value,
        created_at: OffsetDateTime,
    ) -> StoreResult<WriteOutcome> {
        let client = self.client().await?;
        let result = client
            .execute(
                "INSERT INTO generic_records (uri, collection, author_id, raw_json, created_at) \
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (uri) DO NOTHING",
                &[&uri.to_string(), &collection, &author.as_str(), &raw, &created_at],
            )
            .await;
        match result {
            Ok(0) => Ok(WriteOutcome::AlreadyExists),
            Ok(_) => Ok(WriteOutcome::Inserted),
            Err(err) => outcome_of(err),
        }
    }

    /// Idempotent delete with inverse derived-count bookkeeping
    /// (`GREATEST(count - 1, 0)`, §4.5.3 / §4.5.8). `collection` picks
    /// which table (and which counter, if any) the URI belongs to.
    pub async fn delete_by_uri(&self, uri: &AtUri, collection: &str) -> StoreResult<()> {
        use firehose_core::RecordKind;

        let mut client = self.client().await?;
        let tx = client.transaction().await.context(error::QuerySnafu)?;

        match RecordKind::from_collection(collection) {
            RecordKind::Like => {
                let row = tx
                    .query_opt("DELETE FROM likes WHERE uri = $1 RETURNING post_uri, subject_id", &[&uri.to_string()])
                    .await
                    .context(error::QuerySnafu)?;
                if let Some(row) = row {
                    let post_uri: String = row.get(0);
                    let subject_id: String = row.get(1);
                    tx.execute(
                        "UPDATE post_aggregations SET like_count = GREATEST(like_count - 1, 0) WHERE post_uri = $1",
                        &[&post_uri],
                    )
                    .await
                    .context(error::QuerySnafu)?;
                    tx.execute(
                        "UPDATE viewer_state SET like_uri = NULL WHERE post_uri = $1 AND viewer_id = $2",
                        &[&post_uri, &subject_id],
                    )
                    .await
                    .context(error::QuerySnafu)?;
                }
            }
            RecordKind::Repost => {
                let row = tx
                    .query_opt(
                        "DELETE FROM reposts WHERE uri = $1 RETURNING post_uri, subject_id",
                        &[&uri.to_string()],
                    )
                    .await
                    .context(error::QuerySnafu)?;
                if let Some(row) = row {
                    let post_uri: String = row.get(0);
                    let subject_id: String = row.get(1);
                    tx.execute(
                        "UPDATE post_aggregations SET repost_count = GREATEST(repost_count - 1, 0) WHERE post_uri = $1",
                        &[&post_uri],
                    )
                    .await
                    .context(error::QuerySnafu)?;
                    tx.execute(
                        "UPDATE viewer_state SET repost_uri = NULL WHERE post_uri = $1 AND viewer_id = $2",
                        &[&post_uri, &subject_id],
                    )
                    .await
                    .context(error::QuerySnafu)?;
                    tx.execute("DELETE FROM feed_items WHERE uri = $1", &[&uri.to_string()])
                        .await
                        .context(error::QuerySnafu)?;
                }
            }
            RecordKind::Bookmark => {
                let row = tx
                    .query_opt(
                        "DELETE FROM bookmarks WHERE uri = $1 RETURNING post_uri, subject_id",
                        &[&uri.to_string()],
                    )
                    .await
                    .context(error::QuerySnafu)?;
                if let Some(row) = row {
                    let post_uri: String = row.get(0);
                    let subject_id: String = row.get(1);
                    tx.execute(
                        "UPDATE post_aggregations SET bookmark_count = GREATEST(bookmark_count - 1, 0) WHERE post_uri = $1",
                        &[&post_uri],
                    )
                    .await
                    .context(error::QuerySnafu)?;
                    tx.execute(
                        "UPDATE viewer_state SET bookmarked = false WHERE post_uri = $1 AND viewer_id = $2",
                        &[&post_uri, &subject_id],
                    )
                    .await
                    .context(error::QuerySnafu)?;
                }
            }
            RecordKind::Post => {
                let row = tx
                    .query_opt(
                        "DELETE FROM posts WHERE uri = $1 RETURNING reply_parent, quoted_uri",
                        &[&uri.to_string()],
                    )
                    .await
                    .context(error::QuerySnafu)?;
                if let Some(row) = row {
                    let reply_parent: Option<String> = row.get(0);
                    let quoted_uri: Option<String> = row.get(1);
                    if let Some(parent) = reply_parent {
                        tx.execute(
                            "UPDATE post_aggregations SET reply_count = GREATEST(reply_count - 1, 0) WHERE post_uri = $1",
                            &[&parent],
                        )
                        .await
                        .context(error::QuerySnafu)?;
                    }
                    if let Some(quoted) = quoted_uri {
                        tx.execute(
                            "UPDATE post_aggregations SET quote_count = GREATEST(quote_count - 1, 0) WHERE post_uri = $1",
                            &[&quoted],
                        )
                        .await
                        .context(error::QuerySnafu)?;
                    }
                    tx.execute("DELETE FROM post_aggregations WHERE post_uri = $1", &[&uri.to_string()])
                        .await
                        .context(error::QuerySnafu)?;
                    tx.execute("DELETE FROM thread_context WHERE post_uri = $1", &[&uri.to_string()])
                        .await
                        .context(error::QuerySnafu)?;
                }
            }
            RecordKind::Follow => {
                tx.execute("DELETE FROM follows WHERE uri = $1", &[&uri.to_string()])
                    .await
                    .context(error::QuerySnafu)?;
            }
            RecordKind::Block => {
                tx.execute("DELETE FROM blocks WHERE uri = $1", &[&uri.to_string()])
                    .await
                    .context(error::QuerySnafu)?;
            }
            RecordKind::List => {
                tx.execute("DELETE FROM lists WHERE uri = $1", &[&uri.to_string()])
                    .await
                    .context(error::QuerySnafu)?;
            }
            RecordKind::ListItem => {
                tx.execute("DELETE FROM list_items WHERE uri = $1", &[&uri.to_string()])
                    .await
                    .context(error::QuerySnafu)?;
            }
            RecordKind::FeedGenerator => {
                tx.execute("DELETE FROM feed_generators WHERE uri = $1", &[&uri.to_string()])
                    .await
                    .context(error::QuerySnafu)?;
            }
            RecordKind::StarterPack => {
                tx.execute("DELETE FROM starter_packs WHERE uri = $1", &[&uri.to_string()])
                    .await
                    .context(error::QuerySnafu)?;
            }
            RecordKind::LabelerService => {
                tx.execute("DELETE FROM labeler_services WHERE uri = $1", &[&uri.to_string()])
                    .await
                    .context(error::QuerySnafu)?;
            }
            RecordKind::Verification => {
                tx.execute("DELETE FROM verifications WHERE uri = $1", &[&uri.to_string()])
                    .await
                    .context(error::QuerySnafu)?;
            }
            RecordKind::Label | RecordKind::Profile => {
                // labels are negated, not deleted; profiles are never deleted (§3).
            }
            RecordKind::Generic => {
                tx.execute("DELETE FROM generic_records WHERE uri = $1", &[&uri.to_string()])
                    .await
                    .context(error::QuerySnafu)?;
            }
        }

        tx.commit().await.context(error::QuerySnafu)?;
        Ok(())
    }

    pub async fn save_cursor(&self, service: &str, cursor: u64, ts: OffsetDateTime) -> StoreResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO cursors (service, seq, updated_at) VALUES ($1, $2, $3) \
                 ON CONFLICT (service) DO UPDATE SET seq = EXCLUDED.seq, updated_at = EXCLUDED.updated_at \
                 WHERE cursors.seq <= EXCLUDED.seq",
                &[&service, &(cursor as i64), &ts],
            )
            .await
            .context(error::QuerySnafu)?;
        Ok(())
    }

    pub async fn load_cursor(&self, service: &str) -> StoreResult<Option<u64>> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT seq FROM cursors WHERE service = $1", &[&service])
            .await
            .context(error::QuerySnafu)?;
        Ok(row.map(|r| r.get::<_, i64>(0) as u64))
    }
}
