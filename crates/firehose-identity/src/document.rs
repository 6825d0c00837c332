use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "serviceEndpoint")]
    pub endpoint: String,
}

/// A resolved identity document, either from the directory service (`did:plc`)
/// or from the domain-anchored `did:web` flow. Only the fields this system
/// reads are modeled; everything else round-trips through `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidDocument {
    pub id: String,
    #[serde(default, rename = "alsoKnownAs")]
    pub also_known_as: Vec<String>,
    #[serde(default)]
    pub service: Vec<Service>,
}

impl DidDocument {
    /// First service whose id/type denotes a personal data server, if its
    /// endpoint is a valid `http(s)://` URL.
    pub fn pds_endpoint(&self) -> Option<&str> {
        let svc = self.service.iter().find(|s| {
            matches!(s.id.as_str(), "#atproto_pds" | "atproto_pds")
                || matches!(s.kind.as_str(), "AtprotoPersonalDataServer" | "AtProtoPersonalDataServer")
        })?;
        if svc.endpoint.starts_with("https://") || svc.endpoint.starts_with("http://") {
            Some(svc.endpoint.as_str())
        } else {
            None
        }
    }

    /// Handle embedded as an `at://` URI in `alsoKnownAs`, if any.
    pub fn handle(&self) -> Option<&str> {
        self.also_known_as.iter().find_map(|uri| {
            let handle = uri.strip_prefix("at://")?;
            (!handle.is_empty() && handle.contains('.')).then_some(handle)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_pds_endpoint() {
        let doc = DidDocument {
            id: "did:plc:abc".into(),
            also_known_as: vec!["at://alice.example.com".into()],
            service: vec![Service {
                id: "#atproto_pds".into(),
                kind: "AtprotoPersonalDataServer".into(),
                endpoint: "https://pds.example.com".into(),
            }],
        };
        assert_eq!(doc.pds_endpoint(), Some("https://pds.example.com"));
        assert_eq!(doc.handle(), Some("alice.example.com"));
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let doc = DidDocument {
            id: "did:plc:abc".into(),
            also_known_as: vec![],
            service: vec![Service {
                id: "#atproto_pds".into(),
                kind: "AtprotoPersonalDataServer".into(),
                endpoint: "ftp://pds.example.com".into(),
            }],
        };
        assert_eq!(doc.pds_endpoint(), None);
    }
}
