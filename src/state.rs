use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db::build_pool;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    /// Club-membership rows keyed by "{club_id}:{user_id}". TTL-bounded so
    /// role changes propagate within the configured window.
    pub membership_cache: Cache<String, Option<Value>>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = build_pool(&config);
        if db_pool.is_none() {
            tracing::warn!("DATABASE_URL is not set — all data endpoints will report 503");
        }

        let membership_cache = Cache::builder()
            .max_capacity(config.membership_cache_max_entries)
            .time_to_live(Duration::from_secs(config.membership_cache_ttl_seconds.max(1)))
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            membership_cache,
        })
    }
}
