//! Account lifecycle status, supplemented from the original's
//! `update_actor_status` which validates account events against a closed
//! set before writing the `upstream_status` column (§3, §4.5.6).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    Deactivated,
    Suspended,
    TakenDown,
    Deleted,
    Desynchronized,
    Throttled,
}

impl AccountStatus {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "active" => Self::Active,
            "deactivated" => Self::Deactivated,
            "suspended" => Self::Suspended,
            "takendown" => Self::TakenDown,
            "deleted" => Self::Deleted,
            "desynchronized" => Self::Desynchronized,
            "throttled" => Self::Throttled,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deactivated => "deactivated",
            Self::Suspended => "suspended",
            Self::TakenDown => "takendown",
            Self::Deleted => "deleted",
            Self::Desynchronized => "desynchronized",
            Self::Throttled => "throttled",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_status() {
        assert!(AccountStatus::parse("banned-forever").is_none());
    }

    #[test]
    fn round_trips_known_statuses() {
        for s in ["active", "deactivated", "suspended", "takendown", "deleted", "desynchronized", "throttled"] {
            assert_eq!(AccountStatus::parse(s).unwrap().as_str(), s);
        }
    }
}
