use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiKeyInfo {
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub permissions: Vec<Permission>,
    pub rate_limit: RateLimit,
    pub status: KeyStatus,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Submit and cancel jobs.
    Generate,
    /// List the stored job history. Single-task lookups and the event
    /// stream are open.
    Read,
    /// Manage API keys. Implies every other permission.
    Admin,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests_per_minute: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self { requests_per_minute: 60 }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum KeyStatus {
    #[default]
    Active,
    Suspended,
    Expired,
}
