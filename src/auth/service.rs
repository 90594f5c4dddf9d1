use std::sync::Arc;
use uuid::Uuid;
use chrono::{Duration, Utc};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::error::AuthError;
use super::storage::{ApiKeyStorage, InMemoryApiKeyStorage};
use super::types::{ApiKeyInfo, Permission, RateLimit, KeyStatus};
use tracing::{debug, info};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct Auth {
    key_storage: Arc<dyn ApiKeyStorage>,
    rate_limiters: Arc<Mutex<HashMap<String, Arc<DirectRateLimiter>>>>,
}

impl Auth {
    pub fn new(key_storage: Arc<dyn ApiKeyStorage>) -> Self {
        Self {
            key_storage,
            rate_limiters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn new_with_memory_storage() -> Self {
        Self::new(Arc::new(InMemoryApiKeyStorage::new()))
    }

    /// Accepts a bare key or `Bearer <key>`.
    pub async fn verify_api_key(&self, api_key: Option<&str>, required_permission: Permission) -> Result<(), AuthError> {
        let api_key = api_key.ok_or(AuthError::MissingApiKey)?;
        let api_key = match api_key.split(' ').last() {
            Some(key) if !key.is_empty() => key,
            _ => return Err(AuthError::InvalidApiKey),
        };
        debug!(permission = ?required_permission, "Verifying API key");

        let key_info = self.key_storage
            .get_key_info(api_key)?
            .ok_or(AuthError::InvalidApiKey)?;

        // check key status
        match key_info.status {
            KeyStatus::Suspended => return Err(AuthError::KeySuspended),
            KeyStatus::Expired => return Err(AuthError::KeyExpired),
            KeyStatus::Active => {}
        }

        // check expiration time
        if let Some(expires_at) = key_info.expires_at {
            if expires_at < Utc::now() {
                return Err(AuthError::KeyExpired);
            }
        }

        // check permissions
        if !key_info.permissions.contains(&required_permission)
            && !key_info.permissions.contains(&Permission::Admin)
        {
            return Err(AuthError::InsufficientPermissions);
        }

        // check rate limit
        let mut limiters = self.rate_limiters.lock().await;
        let limiter = limiters.entry(api_key.to_string())
            .or_insert_with(|| {
                let per_minute = NonZeroU32::new(key_info.rate_limit.requests_per_minute)
                    .unwrap_or(NonZeroU32::MIN);
                Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
            });

        if limiter.check().is_err() {
            return Err(AuthError::RateLimitExceeded);
        }

        Ok(())
    }

    pub fn create_api_key(
        &self,
        name: String,
        permissions: Vec<Permission>,
        rate_limit: RateLimit,
        expires_in_days: Option<i64>,
    ) -> Result<ApiKeyInfo, AuthError> {
        let key = format!("key-{}", Uuid::new_v4());
        self.register_api_key(key, name, permissions, rate_limit, expires_in_days)
    }

    /// Store a caller-chosen key, e.g. the admin key from the environment.
    pub fn register_api_key(
        &self,
        key: String,
        name: String,
        permissions: Vec<Permission>,
        rate_limit: RateLimit,
        expires_in_days: Option<i64>,
    ) -> Result<ApiKeyInfo, AuthError> {
        let expires_at = expires_in_days.map(|days| Utc::now() + Duration::days(days));

        let key_info = ApiKeyInfo {
            key: key.clone(),
            name,
            created_at: Utc::now(),
            expires_at,
            permissions,
            rate_limit,
            status: KeyStatus::Active,
        };

        self.key_storage.set_key_info(key, key_info.clone())?;
        info!(name = %key_info.name, "API key registered");
        Ok(key_info)
    }

    pub async fn revoke_api_key(&self, api_key: &str) -> Result<(), AuthError> {
        self.key_storage.update_key_status(api_key, KeyStatus::Suspended)?;
        self.rate_limiters.lock().await.remove(api_key);
        info!("API key revoked");
        Ok(())
    }

    pub fn list_api_keys(&self) -> Result<Vec<ApiKeyInfo>, AuthError> {
        self.key_storage.list_keys()
    }
}
