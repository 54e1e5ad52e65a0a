//! Proxy configuration cache.
//!
//! [`ProxyConfigCache`] keeps one [`ProxyConfiguration`] per tenant so that
//! most authorizations never wait on the remote system.
//!
//! # Lifecycle of an entry
//!
//! - **Created** by the asynchronous population that follows a successful
//!   miss-path fetch, or by an explicit [`set`](ProxyConfigCache::set).
//! - **Refreshed** by [`refresh`](ProxyConfigCache::refresh) once
//!   `now + refresh_buffer >= expires_at`, replaying the stored
//!   [`RefetchParams`]. Success replaces the whole entry; failure removes it
//!   unless it was replaced while the refetch was in flight.
//! - **Removed** by [`flush`](ProxyConfigCache::flush) once
//!   `expires_at <= now`.
//!
//! Reads never check expiry; staleness past `expires_at` is bounded by the
//! flush cadence (one pass per `ttl`).
//!
//! # Capacity
//!
//! The cache holds at most `limit` entries. Inserting a new key into a full
//! cache is silently dropped; there is no eviction to make room. Replacing
//! an existing key is always allowed.
//!
//! # Concurrency
//!
//! One reader/writer lock guards the entry map. Remote fetches happen with no
//! lock held. Under [`MissStrategy::Independent`] two concurrent misses for
//! the same tenant both fetch and the later population wins;
//! [`MissStrategy::SingleFlight`] coalesces them onto one fetch.

mod clock;
mod worker;

pub use clock::{Clock, ManualClock, SystemClock};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::WorkerKind;
use crate::providers::{ConfigFetcher, fetch_recorded};
use crate::telemetry;
use crate::types::{ProxyConfiguration, TenantKey, TenantParams};
use crate::{Result, TollgateError};

use worker::Worker;

/// Upper bound for `ttl` and `refresh_buffer` (ten years).
pub const MAX_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// How concurrent misses for the same tenant are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissStrategy {
    /// Every miss fetches on its own; the last population wins.
    #[default]
    Independent,
    /// Concurrent misses share one in-flight fetch.
    SingleFlight,
}

/// Cache tunables.
///
/// ```rust
/// # use tollgate::cache::{CacheConfig, MissStrategy};
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .ttl(Duration::from_secs(120))
///     .refresh_buffer(Duration::from_secs(30))
///     .limit(10_000)
///     .miss_strategy(MissStrategy::SingleFlight);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Entry lifetime, and the sleep between worker passes. Default: 5 minutes.
    pub ttl: Duration,
    /// Lead time before expiry at which an entry becomes refreshable. Default: 1 minute.
    pub refresh_buffer: Duration,
    /// Maximum number of tenants held. Default: 1,000.
    pub limit: usize,
    /// Default: [`MissStrategy::Independent`].
    pub miss_strategy: MissStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            refresh_buffer: Duration::from_secs(60),
            limit: 1_000,
            miss_strategy: MissStrategy::Independent,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn miss_strategy(mut self, strategy: MissStrategy) -> Self {
        self.miss_strategy = strategy;
        self
    }

    /// Reject settings that would make the background loops spin or push
    /// expiry instants out of range.
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(TollgateError::Configuration(
                "cache ttl must be greater than zero".to_string(),
            ));
        }
        if self.ttl > MAX_DURATION {
            return Err(TollgateError::Configuration(format!(
                "cache ttl must not exceed {}s",
                MAX_DURATION.as_secs()
            )));
        }
        if self.refresh_buffer > MAX_DURATION {
            return Err(TollgateError::Configuration(format!(
                "cache refresh buffer must not exceed {}s",
                MAX_DURATION.as_secs()
            )));
        }
        Ok(())
    }
}

/// `now + ttl`, saturating instead of overflowing the platform's `Instant`.
fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(MAX_DURATION))
        .unwrap_or(now)
}

/// Everything needed to redo a fetch without the original request.
#[derive(Clone)]
pub struct RefetchParams {
    pub tenant: TenantParams,
    pub fetcher: Arc<dyn ConfigFetcher>,
}

impl RefetchParams {
    pub fn new(tenant: TenantParams, fetcher: Arc<dyn ConfigFetcher>) -> Self {
        Self { tenant, fetcher }
    }
}

impl fmt::Debug for RefetchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefetchParams")
            .field("tenant", &self.tenant)
            .field("fetcher", &self.fetcher.name())
            .finish()
    }
}

/// One cached tenant configuration.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub configuration: Arc<ProxyConfiguration>,
    pub expires_at: Instant,
    pub refetch: RefetchParams,
}

/// Result of one [`refresh`](ProxyConfigCache::refresh) pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Entries whose configuration was replaced.
    pub refreshed: usize,
    /// Entries removed because their refetch failed.
    pub evicted: usize,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<ProxyConfiguration>>>>;

struct CacheInner {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<TenantKey, CacheEntry>>,
    in_flight: Mutex<HashMap<TenantKey, SharedFetch>>,
}

impl CacheInner {
    // A panic while holding the lock cannot leave a half-written entry:
    // every mutation is a single map insert/remove/retain.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<TenantKey, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TenantKey, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: &TenantKey) -> Option<Arc<ProxyConfiguration>> {
        self.read().get(key).map(|e| Arc::clone(&e.configuration))
    }

    fn set(
        &self,
        key: TenantKey,
        configuration: Arc<ProxyConfiguration>,
        refetch: RefetchParams,
    ) -> bool {
        let expires_at = expiry_after(self.clock.now(), self.config.ttl);
        let mut entries = self.write();
        if !entries.contains_key(&key) && entries.len() >= self.config.limit {
            debug!(tenant = %key, limit = self.config.limit, "cache full, dropping insert");
            return false;
        }
        entries.insert(
            key,
            CacheEntry {
                configuration,
                expires_at,
                refetch,
            },
        );
        true
    }

    fn flush(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    async fn refresh(&self) -> RefreshSummary {
        let now = self.clock.now();
        // expires_at - now <= buffer, i.e. now + buffer >= expires_at without the overflow
        let due: Vec<(TenantKey, Arc<ProxyConfiguration>, RefetchParams)> = self
            .read()
            .iter()
            .filter(|(_, entry)| {
                entry.expires_at.saturating_duration_since(now) <= self.config.refresh_buffer
            })
            .map(|(key, entry)| {
                (
                    key.clone(),
                    Arc::clone(&entry.configuration),
                    entry.refetch.clone(),
                )
            })
            .collect();

        let mut summary = RefreshSummary::default();
        for (key, previous, refetch) in due {
            match fetch_recorded(refetch.fetcher.as_ref(), &refetch.tenant).await {
                Ok(configuration) => {
                    self.set(key, Arc::new(configuration), refetch);
                    summary.refreshed += 1;
                }
                Err(e) => {
                    let mut entries = self.write();
                    // only the entry the refetch was for; a newer one stays
                    let unchanged = entries
                        .get(&key)
                        .is_some_and(|current| Arc::ptr_eq(&current.configuration, &previous));
                    if unchanged {
                        warn!(tenant = %key, error = %e, "refresh failed, evicting cached configuration");
                        entries.remove(&key);
                        summary.evicted += 1;
                    } else {
                        debug!(tenant = %key, error = %e, "refresh failed for a replaced entry");
                    }
                }
            }
        }
        summary
    }
}

/// Tenant-keyed cache of proxy configurations with refresh-ahead.
///
/// See the [module docs](self) for the entry lifecycle.
pub struct ProxyConfigCache {
    inner: Arc<CacheInner>,
    flush_worker: Worker,
    refresh_worker: Worker,
}

impl ProxyConfigCache {
    /// Create an empty cache on the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an empty cache on a custom clock.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                clock,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
            flush_worker: Worker::new(WorkerKind::Flush),
            refresh_worker: Worker::new(WorkerKind::Refresh),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Look up a tenant's configuration, fetching it on a miss.
    ///
    /// A hit returns immediately. A miss fetches synchronously through
    /// `refetch.fetcher` and, on success only, schedules an asynchronous
    /// population of the cache. Must be called from within a tokio runtime.
    pub async fn get(
        &self,
        key: &TenantKey,
        refetch: RefetchParams,
    ) -> Result<Arc<ProxyConfiguration>> {
        if let Some(configuration) = self.inner.lookup(key) {
            telemetry::increment_cache_hit();
            debug!(tenant = %key, "proxy configuration cache hit");
            return Ok(configuration);
        }
        telemetry::increment_cache_miss();
        debug!(tenant = %key, "proxy configuration cache miss");

        match self.inner.config.miss_strategy {
            MissStrategy::Independent => {
                let configuration =
                    Arc::new(fetch_recorded(refetch.fetcher.as_ref(), &refetch.tenant).await?);
                self.populate(key.clone(), Arc::clone(&configuration), refetch);
                Ok(configuration)
            }
            MissStrategy::SingleFlight => self.get_coalesced(key, refetch).await,
        }
    }

    async fn get_coalesced(
        &self,
        key: &TenantKey,
        refetch: RefetchParams,
    ) -> Result<Arc<ProxyConfiguration>> {
        let flight = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            in_flight
                .entry(key.clone())
                .or_insert_with(|| {
                    let params = refetch.clone();
                    async move {
                        fetch_recorded(params.fetcher.as_ref(), &params.tenant)
                            .await
                            .map(Arc::new)
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };

        let result = flight.clone().await;

        // Whoever retires the flight schedules the population, exactly once.
        let retired = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(key) {
                Some(current) if current.ptr_eq(&flight) => {
                    in_flight.remove(key);
                    true
                }
                _ => false,
            }
        };
        if retired && let Ok(configuration) = &result {
            self.populate(key.clone(), Arc::clone(configuration), refetch);
        }
        result
    }

    fn populate(&self, key: TenantKey, configuration: Arc<ProxyConfiguration>, refetch: RefetchParams) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.set(key, configuration, refetch);
        });
    }

    /// Insert or replace an entry with `expires_at = now + ttl`.
    ///
    /// Returns `false` when the insert was dropped because the cache is
    /// full. Dropping is not an error.
    pub fn set(
        &self,
        key: TenantKey,
        configuration: impl Into<Arc<ProxyConfiguration>>,
        refetch: RefetchParams,
    ) -> bool {
        self.inner.set(key, configuration.into(), refetch)
    }

    /// Remove every entry whose expiry has passed. Returns how many went.
    pub fn flush(&self) -> usize {
        let removed = self.inner.flush();
        if removed > 0 {
            info!(removed, "flushed expired proxy configurations");
        }
        removed
    }

    /// Refetch every entry that is within `refresh_buffer` of expiry.
    pub async fn refresh(&self) -> RefreshSummary {
        let summary = self.inner.refresh().await;
        if summary != RefreshSummary::default() {
            info!(
                refreshed = summary.refreshed,
                evicted = summary.evicted,
                "refreshed proxy configurations"
            );
        }
        summary
    }

    /// Snapshot of one entry.
    pub fn entry(&self, key: &TenantKey) -> Option<CacheEntry> {
        self.inner.read().get(key).cloned()
    }

    pub fn contains(&self, key: &TenantKey) -> bool {
        self.inner.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Start the loop that runs [`flush`](Self::flush) once per `ttl`.
    pub fn start_flush_worker(&self) -> Result<()> {
        self.inner.config.validate()?;
        let inner = Arc::clone(&self.inner);
        self.flush_worker.start(self.inner.config.ttl, move || {
            let inner = Arc::clone(&inner);
            async move {
                let removed = inner.flush();
                if removed > 0 {
                    info!(removed, "flushed expired proxy configurations");
                }
            }
        })
    }

    /// Stop the flush loop and wait for it to exit.
    pub async fn stop_flush_worker(&self) -> Result<()> {
        self.flush_worker.stop().await
    }

    /// Start the loop that runs [`refresh`](Self::refresh) once per `ttl`.
    pub fn start_refresh_worker(&self) -> Result<()> {
        self.inner.config.validate()?;
        let inner = Arc::clone(&self.inner);
        self.refresh_worker.start(self.inner.config.ttl, move || {
            let inner = Arc::clone(&inner);
            async move {
                let summary = inner.refresh().await;
                debug!(
                    refreshed = summary.refreshed,
                    evicted = summary.evicted,
                    "refresh pass finished"
                );
            }
        })
    }

    /// Stop the refresh loop and wait for it to exit.
    pub async fn stop_refresh_worker(&self) -> Result<()> {
        self.refresh_worker.stop().await
    }

    pub fn is_flush_worker_running(&self) -> bool {
        self.flush_worker.is_running()
    }

    pub fn is_refresh_worker_running(&self) -> bool {
        self.refresh_worker.is_running()
    }
}

impl Default for ProxyConfigCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl fmt::Debug for ProxyConfigCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfigCache")
            .field("config", &self.inner.config)
            .field("len", &self.len())
            .field("flush_worker", &self.is_flush_worker_running())
            .field("refresh_worker", &self.is_refresh_worker_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(300));
        assert_eq!(config.refresh_buffer, Duration::from_secs(60));
        assert_eq!(config.limit, 1_000);
        assert_eq!(config.miss_strategy, MissStrategy::Independent);
    }

    #[test]
    fn zero_ttl_is_invalid() {
        let config = CacheConfig::new().ttl(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(TollgateError::Configuration(_))
        ));
    }

    #[test]
    fn out_of_range_durations_are_invalid() {
        let huge = Duration::from_secs(u64::MAX);
        assert!(CacheConfig::new().ttl(huge).validate().is_err());
        assert!(CacheConfig::new().refresh_buffer(huge).validate().is_err());
        let edge = CacheConfig::new().ttl(MAX_DURATION).refresh_buffer(MAX_DURATION);
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn expiry_saturates_instead_of_overflowing() {
        let now = Instant::now();
        assert_eq!(expiry_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert!(expiry_after(now, Duration::from_secs(u64::MAX)) >= now);
    }

    #[tokio::test]
    async fn worker_refuses_out_of_range_buffer() {
        let cache = ProxyConfigCache::new(
            CacheConfig::new().refresh_buffer(Duration::from_secs(u64::MAX)),
        );
        assert!(cache.start_refresh_worker().is_err());
        assert!(!cache.is_refresh_worker_running());
    }

    #[tokio::test]
    async fn worker_refuses_zero_ttl() {
        let cache = ProxyConfigCache::new(CacheConfig::new().ttl(Duration::ZERO));
        assert!(cache.start_flush_worker().is_err());
        assert!(!cache.is_flush_worker_running());
    }
}
