use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a registry entry was minted. Codes outside the known range map to `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OriginKind {
    Human,
    AgentSiwa,
    Api,
    Owner,
    #[serde(other)]
    Unknown,
}

impl OriginKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => OriginKind::Human,
            1 => OriginKind::AgentSiwa,
            2 => OriginKind::Api,
            3 => OriginKind::Owner,
            _ => OriginKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OriginKind::Human => "HUMAN",
            OriginKind::AgentSiwa => "AGENT_SIWA",
            OriginKind::Api => "API",
            OriginKind::Owner => "OWNER",
            OriginKind::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "HUMAN" => OriginKind::Human,
            "AGENT_SIWA" => OriginKind::AgentSiwa,
            "API" => OriginKind::Api,
            "OWNER" => OriginKind::Owner,
            _ => OriginKind::Unknown,
        }
    }
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cached projection of one registry entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: u64,
    pub display_name: String,
    pub owner_address: String,
    pub subject_address: String,
    pub category: String,
    pub verified: bool,
    /// Non-transferable flag
    pub locked: bool,
    pub origin_kind: OriginKind,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub weight: f64,
    pub created_at: DateTime<Utc>,
    /// Milliseconds since epoch, assigned by the store on every write
    #[serde(default)]
    pub last_updated: i64,
}

impl Record {
    /// Name check applied after the SQL length predicate.
    /// A name made of one repeated character (ignoring case) counts as spam.
    pub fn looks_like_spam(&self) -> bool {
        let name = self.display_name.trim().to_lowercase();
        let mut chars = name.chars();
        match chars.next() {
            None => true,
            Some(first) => chars.all(|c| c == first),
        }
    }

    // Helper to create a dummy record for testing
    #[cfg(test)]
    pub fn dummy(id: u64, name: &str) -> Self {
        Self {
            id,
            display_name: name.to_string(),
            owner_address: format!("0xowner{}", id),
            subject_address: format!("0xsubject{}", id),
            category: "eliza".to_string(),
            verified: false,
            locked: false,
            origin_kind: OriginKind::Human,
            score: 0.0,
            weight: 0.0,
            created_at: DateTime::from_timestamp(1_700_000_000 + id as i64, 0).unwrap_or_default(),
            last_updated: 0,
        }
    }
}

/// Core struct returned by the registry's per-id getter
#[derive(Clone, Debug, PartialEq)]
pub struct ChainRecord {
    pub display_name: String,
    pub subject_address: String,
    pub category: String,
    pub verified: bool,
    pub locked: bool,
    pub origin_code: u8,
    /// Unix seconds
    pub created_at: u64,
}

impl ChainRecord {
    /// Combine the core struct with auxiliary fields into a storable record
    pub fn into_record(self, id: u64, owner: Option<String>, score: f64, weight: f64) -> Record {
        let created_at = i64::try_from(self.created_at)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_default();
        Record {
            id,
            owner_address: owner.unwrap_or_else(|| self.subject_address.clone()),
            display_name: self.display_name,
            subject_address: self.subject_address,
            category: self.category,
            verified: self.verified,
            locked: self.locked,
            origin_kind: OriginKind::from_code(self.origin_code),
            score,
            weight,
            created_at,
            last_updated: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_codes_out_of_range_are_unknown() {
        assert_eq!(OriginKind::from_code(1), OriginKind::AgentSiwa);
        assert_eq!(OriginKind::from_code(3), OriginKind::Owner);
        assert_eq!(OriginKind::from_code(4), OriginKind::Unknown);
        assert_eq!(OriginKind::from_code(255), OriginKind::Unknown);
        assert_eq!(OriginKind::parse("garbage"), OriginKind::Unknown);
    }

    #[test]
    fn repeated_character_names_look_like_spam() {
        assert!(Record::dummy(1, "aaaa").looks_like_spam());
        assert!(Record::dummy(1, "  AaA ").looks_like_spam());
        assert!(Record::dummy(1, "").looks_like_spam());
        assert!(!Record::dummy(1, "Alpha").looks_like_spam());
        assert!(!Record::dummy(1, "ab").looks_like_spam());
    }

    #[test]
    fn owner_falls_back_to_subject_address() {
        let chain = ChainRecord {
            display_name: "Nova".into(),
            subject_address: "0xabc".into(),
            category: "openclaw".into(),
            verified: true,
            locked: false,
            origin_code: 9,
            created_at: 1_700_000_000,
        };
        let record = chain.into_record(4, None, 12.0, 3.0);
        assert_eq!(record.owner_address, "0xabc");
        assert_eq!(record.origin_kind, OriginKind::Unknown);
        assert_eq!(record.created_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn snapshot_records_parse_without_store_fields() {
        let json = r#"{
            "id": 3, "displayName": "Echo", "ownerAddress": "0x1", "subjectAddress": "0x2",
            "category": "eliza", "verified": true, "locked": true, "originKind": "API",
            "createdAt": "2025-01-01T00:00:00Z"
        }"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.origin_kind, OriginKind::Api);
        assert_eq!(record.score, 0.0);
        assert_eq!(record.last_updated, 0);
    }
}
