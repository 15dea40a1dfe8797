use crate::config::env_parse;
use crate::models::OnboardingResult;
use redis::AsyncCommands;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::warn;

pub const DEFAULT_TTL_SECS: u64 = 3600;
pub const DEFAULT_MEMORY_ENTRIES: usize = 1024;

const KEY_PREFIX: &str = "onboard:idem:";

/// Caches successful onboarding results by `Idempotency-Key`. Redis when
/// `REDIS_URL` is set, process memory otherwise. Failures are never cached.
///
/// The memory fallback honors the same TTL and holds at most
/// `memory_capacity` entries, evicting the one closest to expiry.
#[derive(Clone)]
pub struct IdempotencyStore {
    redis: Option<redis::Client>,
    memory: Arc<Mutex<HashMap<String, MemoryEntry>>>,
    ttl_secs: u64,
    memory_capacity: usize,
}

#[derive(Clone)]
struct MemoryEntry {
    result: OnboardingResult,
    expires_at: Instant,
}

impl IdempotencyStore {
    pub fn from_env() -> Self {
        let redis = std::env::var("REDIS_URL").ok().and_then(|url| {
            redis::Client::open(url)
                .map_err(|err| warn!(target = "onboard.api", error = %err, "invalid REDIS_URL"))
                .ok()
        });
        let ttl_secs = env_parse::<u64>("IDEMPOTENCY_TTL_SECS").unwrap_or(DEFAULT_TTL_SECS);
        let store = Self::new(redis, ttl_secs);
        match env_parse::<usize>("IDEMPOTENCY_MEMORY_ENTRIES").filter(|v| *v > 0) {
            Some(capacity) => store.with_memory_capacity(capacity),
            None => store,
        }
    }

    pub fn new(redis: Option<redis::Client>, ttl_secs: u64) -> Self {
        Self {
            redis,
            memory: Arc::new(Mutex::new(HashMap::new())),
            ttl_secs,
            memory_capacity: DEFAULT_MEMORY_ENTRIES,
        }
    }

    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity.max(1);
        self
    }

    pub async fn get(&self, key: &str) -> Option<OnboardingResult> {
        match &self.redis {
            Some(client) => redis_get(client, key).await,
            None => {
                let mut memory = self.memory.lock().await;
                match memory.get(key) {
                    Some(entry) if entry.expires_at > Instant::now() => Some(entry.result.clone()),
                    Some(_) => {
                        memory.remove(key);
                        None
                    }
                    None => None,
                }
            }
        }
    }

    pub async fn put(&self, key: &str, result: &OnboardingResult) {
        match &self.redis {
            Some(client) => redis_set(client, key, result, self.ttl_secs).await,
            None => {
                let now = Instant::now();
                let mut memory = self.memory.lock().await;
                memory.retain(|_, entry| entry.expires_at > now);
                if memory.len() >= self.memory_capacity && !memory.contains_key(key) {
                    let oldest = memory
                        .iter()
                        .min_by_key(|(_, entry)| entry.expires_at)
                        .map(|(k, _)| k.clone());
                    if let Some(oldest) = oldest {
                        memory.remove(&oldest);
                    }
                }
                memory.insert(
                    key.to_string(),
                    MemoryEntry {
                        result: result.clone(),
                        expires_at: now + Duration::from_secs(self.ttl_secs),
                    },
                );
            }
        }
    }

    #[cfg(test)]
    async fn memory_len(&self) -> usize {
        self.memory.lock().await.len()
    }
}

async fn redis_get(client: &redis::Client, key: &str) -> Option<OnboardingResult> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(err) => {
            warn!(target = "onboard.api", error = %err, "redis unavailable");
            return None;
        }
    };
    let s: Option<String> = conn.get(format!("{KEY_PREFIX}{key}")).await.ok();
    s.and_then(|v| serde_json::from_str(&v).ok())
}

async fn redis_set(client: &redis::Client, key: &str, value: &OnboardingResult, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(format!("{KEY_PREFIX}{key}"), json, ttl_secs).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::PropertyDetails;
    use crate::maps::resolver::ResolveStrategy;
    use crate::maps::{Coordinates, PlaceDetails, ResolvedPlace};
    use crate::models::PropertySnapshot;

    fn result(run_id: &str) -> OnboardingResult {
        OnboardingResult {
            run_id: run_id.to_string(),
            resolved_place: ResolvedPlace {
                place_id: "pid-hill".into(),
                name: "Hill Camp".into(),
            },
            resolution: ResolveStrategy::NearbyNameMatch,
            property: PropertySnapshot {
                name: "Hill Camp".into(),
                place_id: "pid-hill".into(),
                coordinates: Coordinates { lat: 27.05, lng: 88.47 },
                phone_number: String::new(),
                website: None,
                rating: None,
                total_reviews: None,
                photo_count: 0,
                photo_references: Vec::new(),
            },
            details: PlaceDetails::default(),
            description: None,
            inferred_fields: None,
            property_details: PropertyDetails::default(),
            sheet_outcome: None,
            publish_outcome: None,
            step_log: Vec::new(),
        }
    }

    #[tokio::test]
    async fn memory_replays_within_the_ttl() {
        let store = IdempotencyStore::new(None, 60);
        store.put("k1", &result("run-1")).await;
        assert_eq!(store.get("k1").await.expect("cached").run_id, "run-1");
        assert!(store.get("k2").await.is_none());
    }

    #[tokio::test]
    async fn expired_memory_entries_are_not_replayed() {
        let store = IdempotencyStore::new(None, 0);
        store.put("k1", &result("run-1")).await;
        assert!(store.get("k1").await.is_none());
        assert_eq!(store.memory_len().await, 0);
    }

    #[tokio::test]
    async fn memory_is_capped_and_evicts_the_oldest_entry() {
        let store = IdempotencyStore::new(None, 60).with_memory_capacity(2);
        store.put("k1", &result("run-1")).await;
        std::thread::sleep(Duration::from_millis(2));
        store.put("k2", &result("run-2")).await;
        std::thread::sleep(Duration::from_millis(2));
        store.put("k3", &result("run-3")).await;

        assert_eq!(store.memory_len().await, 2);
        assert!(store.get("k1").await.is_none());
        assert_eq!(store.get("k2").await.expect("kept").run_id, "run-2");
        assert_eq!(store.get("k3").await.expect("kept").run_id, "run-3");

        store.put("k3", &result("run-3b")).await;
        assert_eq!(store.memory_len().await, 2);
        assert_eq!(store.get("k3").await.expect("replaced").run_id, "run-3b");
    }
}
