use std::sync::RwLock;
use std::collections::HashMap;
use super::error::AuthError;
use super::types::{ApiKeyInfo, KeyStatus};

pub trait ApiKeyStorage: Send + Sync + 'static {
    fn get_key_info(&self, api_key: &str) -> Result<Option<ApiKeyInfo>, AuthError>;
    fn set_key_info(&self, api_key: String, info: ApiKeyInfo) -> Result<(), AuthError>;
    fn list_keys(&self) -> Result<Vec<ApiKeyInfo>, AuthError>;
    fn update_key_status(&self, api_key: &str, status: KeyStatus) -> Result<(), AuthError>;
}

#[derive(Default)]
pub struct InMemoryApiKeyStorage {
    keys: RwLock<HashMap<String, ApiKeyInfo>>,
}

impl InMemoryApiKeyStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ApiKeyStorage for InMemoryApiKeyStorage {
    fn get_key_info(&self, api_key: &str) -> Result<Option<ApiKeyInfo>, AuthError> {
        let keys = self.keys.read().map_err(|e| e.to_string())?;
        Ok(keys.get(api_key).cloned())
    }

    fn set_key_info(&self, api_key: String, info: ApiKeyInfo) -> Result<(), AuthError> {
        let mut keys = self.keys.write().map_err(|e| e.to_string())?;
        keys.insert(api_key, info);
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<ApiKeyInfo>, AuthError> {
        let keys = self.keys.read().map_err(|e| e.to_string())?;
        let mut list: Vec<ApiKeyInfo> = keys.values().cloned().collect();
        list.sort_by_key(|info| info.created_at);
        Ok(list)
    }

    fn update_key_status(&self, api_key: &str, status: KeyStatus) -> Result<(), AuthError> {
        let mut keys = self.keys.write().map_err(|e| e.to_string())?;
        match keys.get_mut(api_key) {
            Some(info) => {
                info.status = status;
                Ok(())
            }
            None => Err(AuthError::KeyNotFound),
        }
    }
}
