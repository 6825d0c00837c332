use snafu::prelude::*;

use crate::SubjectId;

/// `proto://<subject-id>/<collection>/<rkey>` — the primary key of any
/// record. Grounded in the original's `extract_did_from_uri` /
/// `extract_collection_from_uri` / `extract_rkey_from_uri` helpers, folded
/// into a single parsed type instead of three string-splitting functions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtUri {
    authority: SubjectId,
    collection: String,
    rkey: String,
}

#[derive(Debug, Snafu)]
pub enum AtUriError {
    #[snafu(display("missing 'at://' scheme in {uri:?}"))]
    MissingScheme { uri: String },
    #[snafu(display("expected authority/collection/rkey in {uri:?}"))]
    Malformed { uri: String },
}

impl AtUri {
    pub fn new(authority: SubjectId, collection: impl Into<String>, rkey: impl Into<String>) -> Self {
        Self {
            authority,
            collection: collection.into(),
            rkey: rkey.into(),
        }
    }

    pub fn parse(uri: &str) -> Result<Self, AtUriError> {
        let rest = uri.strip_prefix("at://").context(MissingSchemeSnafu { uri })?;
        let mut parts = rest.splitn(3, '/');
        let authority = parts.next().context(MalformedSnafu { uri })?;
        let collection = parts.next().context(MalformedSnafu { uri })?;
        let rkey = parts.next().context(MalformedSnafu { uri })?;
        ensure!(
            !authority.is_empty() && !collection.is_empty() && !rkey.is_empty(),
            MalformedSnafu { uri }
        );
        Ok(Self {
            authority: SubjectId::from(authority),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        })
    }

    pub fn authority(&self) -> &SubjectId {
        &self.authority
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn rkey(&self) -> &str {
        &self.rkey
    }
}

impl std::fmt::Display for AtUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at://{}/{}/{}", self.authority, self.collection, self.rkey)
    }
}

impl serde::Serialize for AtUri {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for AtUri {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        AtUri::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_uri() {
        let uri = AtUri::parse("at://did:plc:abc123/app.feed.post/3k2x").unwrap();
        assert_eq!(uri.authority().as_str(), "did:plc:abc123");
        assert_eq!(uri.collection(), "app.feed.post");
        assert_eq!(uri.rkey(), "3k2x");
        assert_eq!(uri.to_string(), "at://did:plc:abc123/app.feed.post/3k2x");
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(AtUri::parse("did:plc:abc123/app.feed.post/3k2x").is_err());
    }

    #[test]
    fn rejects_missing_parts() {
        assert!(AtUri::parse("at://did:plc:abc123/app.feed.post").is_err());
    }
}
