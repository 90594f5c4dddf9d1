use serde::{Deserialize, Serialize};

const MAX_SIZE: u64 = 100;
// keeps offset() within i64 for the sql OFFSET
const MAX_INDEX: u64 = i64::MAX as u64 / MAX_SIZE;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Pagination {
    pub index: u64,
    pub size: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { index: 1, size: 10 }
    }
}

impl Pagination {
    pub fn offset(&self) -> u64 {
        self.index.saturating_sub(1).saturating_mul(self.size)
    }

    pub fn limit(&self) -> u64 {
        self.size
    }

    pub fn check(&self) -> Self {
        if self.index < 1 || self.size < 1 {
            return Self::default();
        }
        Self {
            index: self.index.min(MAX_INDEX),
            size: self.size.min(MAX_SIZE),
        }
    }
}
