//! Tagged-variant model of the lexicon collections this pipeline
//! understands. Mirrors the original's per-collection `RecordPlugin`
//! dispatch, but as data: the stream decoder classifies a block by its
//! `$type`/collection once and produces one of these variants, instead of
//! passing an untyped map down the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AtUri;

/// The known lexicon collections, used to classify a commit op and to key
/// the pending-dependency queues (§4.5.4 of the spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Post,
    Like,
    Repost,
    Follow,
    Block,
    Bookmark,
    List,
    ListItem,
    FeedGenerator,
    StarterPack,
    LabelerService,
    Label,
    Verification,
    Profile,
    Generic,
}

impl RecordKind {
    pub fn from_collection(collection: &str) -> Self {
        match collection {
            "app.feed.post" => Self::Post,
            "app.feed.like" => Self::Like,
            "app.feed.repost" => Self::Repost,
            "app.graph.follow" => Self::Follow,
            "app.graph.block" => Self::Block,
            "app.bookmark" => Self::Bookmark,
            "app.graph.list" => Self::List,
            "app.graph.listitem" => Self::ListItem,
            "app.feed.generator" => Self::FeedGenerator,
            "app.graph.starterpack" => Self::StarterPack,
            "app.labeler.service" => Self::LabelerService,
            "com.atproto.label.label" => Self::Label,
            "app.graph.verification" => Self::Verification,
            "app.actor.profile" => Self::Profile,
            _ => Self::Generic,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: AtUri,
    pub parent: AtUri,
}

/// Normalizes the several shapes a blob reference is found in across
/// lexicon revisions into a single `{cid}` form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRef {
    pub cid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Embed {
    External {
        uri: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    Record {
        uri: AtUri,
        cid: String,
    },
    RecordWithMedia {
        record: AtUri,
        media: Box<Embed>,
    },
    Images {
        images: Vec<BlobRef>,
    },
    Video {
        video: BlobRef,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacetFeatureKind {
    Mention,
    Tag,
    Link,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facet {
    pub byte_start: u32,
    pub byte_end: u32,
    pub kind: FacetFeatureKind,
    /// Handle (for mentions) or tag text or link URI, depending on `kind`.
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub text: String,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
    #[serde(default)]
    pub embed: Option<Embed>,
    #[serde(default)]
    pub facets: Vec<Facet>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRecord {
    pub subject: AtUri,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepostRecord {
    pub subject: AtUri,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkRecord {
    pub subject: AtUri,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRecord {
    pub subject: crate::SubjectId,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub subject: crate::SubjectId,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRecord {
    pub name: String,
    #[serde(default)]
    pub purpose: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItemRecord {
    pub list: AtUri,
    pub subject: crate::SubjectId,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedGeneratorRecord {
    pub did: String,
    pub display_name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarterPackRecord {
    pub name: String,
    pub list: AtUri,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelerServiceRecord {
    #[serde(default)]
    pub policies: Option<Value>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelRecord {
    pub src: crate::SubjectId,
    pub subject: String,
    pub val: String,
    #[serde(default)]
    pub neg: bool,
    pub cts: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub subject: crate::SubjectId,
    pub handle: String,
    pub display_name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar: Option<BlobRef>,
    #[serde(default)]
    pub banner: Option<BlobRef>,
}

#[derive(Debug, Clone)]
pub enum Record {
    Post(PostRecord),
    Like(LikeRecord),
    Repost(RepostRecord),
    Follow(FollowRecord),
    Block(BlockRecord),
    Bookmark(BookmarkRecord),
    List(ListRecord),
    ListItem(ListItemRecord),
    FeedGenerator(FeedGeneratorRecord),
    StarterPack(StarterPackRecord),
    LabelerService(LabelerServiceRecord),
    Label(LabelRecord),
    Verification(VerificationRecord),
    Profile(ProfileRecord),
    /// Catch-all for any collection this pipeline doesn't special-case.
    /// Stored verbatim in the generic-records table (§4.5.1).
    Generic(Value, String),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Post(_) => RecordKind::Post,
            Record::Like(_) => RecordKind::Like,
            Record::Repost(_) => RecordKind::Repost,
            Record::Follow(_) => RecordKind::Follow,
            Record::Block(_) => RecordKind::Block,
            Record::Bookmark(_) => RecordKind::Bookmark,
            Record::List(_) => RecordKind::List,
            Record::ListItem(_) => RecordKind::ListItem,
            Record::FeedGenerator(_) => RecordKind::FeedGenerator,
            Record::StarterPack(_) => RecordKind::StarterPack,
            Record::LabelerService(_) => RecordKind::LabelerService,
            Record::Label(_) => RecordKind::Label,
            Record::Verification(_) => RecordKind::Verification,
            Record::Profile(_) => RecordKind::Profile,
            Record::Generic(_, _) => RecordKind::Generic,
        }
    }

    /// The record's own `createdAt`/`cts` field, where it has one, used by
    /// the backfill controller's time-window filter (§4.6). `Generic`
    /// records report their `createdAt` field if present in the raw JSON;
    /// `Profile` records have no creation timestamp and report `None`.
    pub fn created_at_raw(&self) -> Option<&str> {
        match self {
            Record::Post(r) => Some(&r.created_at),
            Record::Like(r) => Some(&r.created_at),
            Record::Repost(r) => Some(&r.created_at),
            Record::Bookmark(r) => Some(&r.created_at),
            Record::Follow(r) => Some(&r.created_at),
            Record::Block(r) => Some(&r.created_at),
            Record::List(r) => Some(&r.created_at),
            Record::ListItem(r) => Some(&r.created_at),
            Record::FeedGenerator(r) => Some(&r.created_at),
            Record::StarterPack(r) => Some(&r.created_at),
            Record::LabelerService(r) => Some(&r.created_at),
            Record::Label(r) => Some(&r.cts),
            Record::Verification(r) => Some(&r.created_at),
            Record::Profile(_) => None,
            Record::Generic(value, _) => value.get("createdAt").and_then(|v| v.as_str()),
        }
    }

    /// Classify a decoded block by its collection and deserialize it into
    /// the matching variant. An unrecognized collection is never an error:
    /// it becomes [`Record::Generic`] (§4.5.1). A recognized collection
    /// whose fields don't fit the expected shape IS an error — the caller
    /// skips that single op and continues the commit (§4.5.8).
    pub fn from_collection_and_value(collection: &str, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match RecordKind::from_collection(collection) {
            RecordKind::Post => Record::Post(serde_json::from_value(value)?),
            RecordKind::Like => Record::Like(serde_json::from_value(value)?),
            RecordKind::Repost => Record::Repost(serde_json::from_value(value)?),
            RecordKind::Follow => Record::Follow(serde_json::from_value(value)?),
            RecordKind::Block => Record::Block(serde_json::from_value(value)?),
            RecordKind::Bookmark => Record::Bookmark(serde_json::from_value(value)?),
            RecordKind::List => Record::List(serde_json::from_value(value)?),
            RecordKind::ListItem => Record::ListItem(serde_json::from_value(value)?),
            RecordKind::FeedGenerator => Record::FeedGenerator(serde_json::from_value(value)?),
            RecordKind::StarterPack => Record::StarterPack(serde_json::from_value(value)?),
            RecordKind::LabelerService => Record::LabelerService(serde_json::from_value(value)?),
            RecordKind::Label => Record::Label(serde_json::from_value(value)?),
            RecordKind::Verification => Record::Verification(serde_json::from_value(value)?),
            RecordKind::Profile => Record::Profile(serde_json::from_value(value)?),
            RecordKind::Generic => Record::Generic(value, collection.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_collection_becomes_generic() {
        let value = serde_json::json!({"foo": "bar"});
        let record = Record::from_collection_and_value("app.weird.thing", value).unwrap();
        assert_eq!(record.kind(), RecordKind::Generic);
    }

    #[test]
    fn known_collection_with_bad_shape_errors() {
        let value = serde_json::json!({"no_text_field": true});
        assert!(Record::from_collection_and_value("app.feed.post", value).is_err());
    }

    #[test]
    fn post_decodes() {
        let value = serde_json::json!({
            "text": "hello",
            "createdAt": "2024-01-01T00:00:00Z",
        });
        let record = Record::from_collection_and_value("app.feed.post", value).unwrap();
        assert!(matches!(record, Record::Post(_)));
    }
}
