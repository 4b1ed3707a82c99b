//! Leads: discovered businesses tracked through the outreach lifecycle.
//!
//! A [`Business`] is what a discovery provider returns. The [`LeadStore`]
//! turns it into a [`Lead`] keyed by a stable [`dedup_key`], so the same
//! business seen twice is only ever contacted once.

mod store;

pub use store::{InsertOutcome, LeadCounts, LeadStore, LeadStoreHandle};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A business as returned by a discovery provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Business {
    /// Provider-assigned identifier (place id), if the provider has one.
    #[serde(default)]
    pub provider_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub address: Option<String>,
    pub city: String,
    pub state: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub review_count: u32,
    #[serde(default)]
    pub has_website: bool,
    #[serde(default)]
    pub website_url: Option<String>,
}

impl Business {
    /// Identity of this business across discovery runs.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        let identity = self
            .provider_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(&self.name);
        dedup_key(identity, &self.city, &self.state)
    }
}

/// Derive the dedup key from an identity (provider id, else name) and location.
///
/// Inputs are case-folded and whitespace-collapsed before hashing, so
/// "Smile Dental " in "austin" and "smile  dental" in "Austin" collide.
///
/// ```
/// use prospector::lead::dedup_key;
///
/// assert_eq!(
///     dedup_key("Smile Dental ", "austin", "tx"),
///     dedup_key("smile  dental", "Austin", "TX"),
/// );
/// assert_ne!(
///     dedup_key("Smile Dental", "Austin", "TX"),
///     dedup_key("Smile Dental", "Dallas", "TX"),
/// );
/// ```
#[must_use]
pub fn dedup_key(identity: &str, city: &str, state: &str) -> String {
    let normalized = [identity, city, state]
        .iter()
        .map(|part| normalize(part))
        .collect::<Vec<_>>()
        .join("|");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lifecycle status of a lead. Ordered: a lead only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Responded,
    Converted,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 4] = [
        LeadStatus::New,
        LeadStatus::Contacted,
        LeadStatus::Responded,
        LeadStatus::Converted,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Responded => "responded",
            Self::Converted => "converted",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "new" => Ok(Self::New),
            "contacted" => Ok(Self::Contacted),
            "responded" => Ok(Self::Responded),
            "converted" => Ok(Self::Converted),
            other => Err(format!("unknown lead status '{}'", other)),
        }
    }
}

/// A prospect tracked by the lead store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    pub dedup_key: String,
    pub provider_id: Option<String>,
    pub name: String,
    pub industry: String,
    pub address: Option<String>,
    pub city: String,
    pub state: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub rating: Option<f64>,
    pub review_count: u32,
    pub has_website: bool,
    pub website_url: Option<String>,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
    pub contacted_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub converted_at: Option<DateTime<Utc>>,
    /// Failed pipeline attempts. Status stays `new` on failure.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl Lead {
    /// "City, ST" as used in logs and discovery locations.
    #[must_use]
    pub fn location(&self) -> String {
        format!("{}, {}", self.city, self.state)
    }

    #[must_use]
    pub fn is_uncontacted(&self) -> bool {
        self.status == LeadStatus::New
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn business(name: &str, provider_id: Option<&str>) -> Business {
        Business {
            provider_id: provider_id.map(String::from),
            name: name.to_string(),
            industry: "dentist".into(),
            city: "Austin".into(),
            state: "TX".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_dedup_key_prefers_provider_id() {
        let a = business("Smile Dental", Some("place-1"));
        let b = business("Smile Dental Studio", Some("place-1"));
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_dedup_key_falls_back_to_name() {
        let a = business("Smile Dental", None);
        let b = business("SMILE DENTAL", Some("  "));
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), business("Bright Teeth", None).dedup_key());
    }

    #[test]
    fn test_dedup_key_is_hex_sha256() {
        let key = dedup_key("a", "b", "c");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_status_order_is_lifecycle_order() {
        assert!(LeadStatus::New < LeadStatus::Contacted);
        assert!(LeadStatus::Contacted < LeadStatus::Responded);
        assert!(LeadStatus::Responded < LeadStatus::Converted);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Contacted".parse::<LeadStatus>(), Ok(LeadStatus::Contacted));
        assert!("lost".parse::<LeadStatus>().is_err());
        for status in LeadStatus::ALL {
            assert_eq!(status.as_str().parse::<LeadStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_business_deserializes_with_defaults() {
        let json = r#"{"name": "Smile Dental", "city": "Austin", "state": "TX"}"#;
        let b: Business = serde_json::from_str(json).unwrap();
        assert_eq!(b.review_count, 0);
        assert!(!b.has_website);
        assert!(b.provider_id.is_none());
    }
}
