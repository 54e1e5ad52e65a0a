//! Integration tests for [`ProxyConfigCache`]: hit/miss paths, capacity,
//! flush/refresh passes on a manual clock, and worker lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use tollgate::cache::{
    CacheConfig, Clock, ManualClock, MissStrategy, ProxyConfigCache, RefetchParams, RefreshSummary,
};
use tollgate::providers::ConfigFetcher;
use tollgate::{
    BackendAuth, MappingRule, ProxyConfiguration, Result, TenantParams, TollgateError, WorkerKind,
};

// ============================================================================
// Mock fetcher
// ============================================================================

/// Returns a fresh configuration per call; the backend endpoint carries the
/// call number so replacements are observable.
struct CountingFetcher {
    calls: AtomicUsize,
    fail: AtomicBool,
    delay: Option<Duration>,
}

impl CountingFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay: None,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay: Some(delay),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConfigFetcher for CountingFetcher {
    fn name(&self) -> &str {
        "counting"
    }

    async fn fetch(&self, tenant: &TenantParams) -> Result<ProxyConfiguration> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TollgateError::Api {
                status: 503,
                message: "system down".into(),
            });
        }
        Ok(configuration(&tenant.service_id, n))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn configuration(service_id: &str, generation: usize) -> ProxyConfiguration {
    ProxyConfiguration::new(
        service_id,
        format!("https://backend-{generation}.example.net"),
        BackendAuth {
            kind: "service_token".into(),
            value: "st".into(),
        },
        vec![MappingRule::new("/", "GET", "hits", 1)],
    )
}

fn tenant(service_id: &str) -> TenantParams {
    TenantParams::new("https://acme-admin.example.com", service_id, "token")
}

fn refetch(tenant: &TenantParams, fetcher: &Arc<CountingFetcher>) -> RefetchParams {
    RefetchParams::new(tenant.clone(), fetcher.clone())
}

fn cache_on(clock: &Arc<ManualClock>, config: CacheConfig) -> ProxyConfigCache {
    let clock: Arc<dyn Clock> = clock.clone();
    ProxyConfigCache::with_clock(config, clock)
}

/// Let spawned population tasks run until `cache` holds `tenant`.
async fn wait_for_entry(cache: &ProxyConfigCache, tenant: &TenantParams) -> bool {
    for _ in 0..100 {
        if cache.contains(&tenant.key()) {
            return true;
        }
        tokio::task::yield_now().await;
    }
    false
}

const HOUR: Duration = Duration::from_secs(3600);

// ============================================================================
// Lookup
// ============================================================================

#[tokio::test]
async fn hit_does_not_contact_fetcher() {
    let fetcher = CountingFetcher::new();
    let cache = ProxyConfigCache::default();
    let t = tenant("42");

    assert!(cache.set(t.key(), configuration("42", 0), refetch(&t, &fetcher)));
    let got = cache.get(&t.key(), refetch(&t, &fetcher)).await.unwrap();

    assert_eq!(got.backend_endpoint, "https://backend-0.example.net");
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn miss_fetches_and_populates_asynchronously() {
    let fetcher = CountingFetcher::new();
    let cache = ProxyConfigCache::default();
    let t = tenant("42");

    let got = cache.get(&t.key(), refetch(&t, &fetcher)).await.unwrap();
    assert_eq!(got.service_id, "42");
    assert_eq!(fetcher.calls(), 1);

    assert!(wait_for_entry(&cache, &t).await, "miss result was never cached");
    cache.get(&t.key(), refetch(&t, &fetcher)).await.unwrap();
    assert_eq!(fetcher.calls(), 1, "second lookup should be a hit");
}

#[tokio::test]
async fn failed_miss_is_not_cached() {
    let fetcher = CountingFetcher::new();
    fetcher.set_failing(true);
    let cache = ProxyConfigCache::default();
    let t = tenant("42");

    let err = cache.get(&t.key(), refetch(&t, &fetcher)).await.unwrap_err();
    assert!(matches!(err, TollgateError::Api { status: 503, .. }));

    assert!(!wait_for_entry(&cache, &t).await);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn tenants_are_keyed_independently() {
    let fetcher = CountingFetcher::new();
    let cache = ProxyConfigCache::default();
    let a = tenant("1");
    let b = tenant("2");

    cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher));
    let got = cache.get(&b.key(), refetch(&b, &fetcher)).await.unwrap();

    assert_eq!(got.service_id, "2");
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn independent_misses_fetch_separately() {
    let fetcher = CountingFetcher::slow(Duration::from_millis(50));
    let cache = ProxyConfigCache::new(CacheConfig::new().miss_strategy(MissStrategy::Independent));
    let t = tenant("42");
    let key = t.key();

    let (first, second) = tokio::join!(
        cache.get(&key, refetch(&t, &fetcher)),
        cache.get(&key, refetch(&t, &fetcher)),
    );

    assert!(first.is_ok() && second.is_ok());
    assert_eq!(fetcher.calls(), 2);
    assert!(wait_for_entry(&cache, &t).await);
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn single_flight_coalesces_concurrent_misses() {
    let fetcher = CountingFetcher::slow(Duration::from_millis(50));
    let cache =
        ProxyConfigCache::new(CacheConfig::new().miss_strategy(MissStrategy::SingleFlight));
    let t = tenant("42");
    let key = t.key();

    let (first, second) = tokio::join!(
        cache.get(&key, refetch(&t, &fetcher)),
        cache.get(&key, refetch(&t, &fetcher)),
    );

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(fetcher.calls(), 1);
    assert!(wait_for_entry(&cache, &t).await);
}

// ============================================================================
// Capacity
// ============================================================================

#[tokio::test]
async fn full_cache_drops_new_keys() {
    let fetcher = CountingFetcher::new();
    let cache = ProxyConfigCache::new(CacheConfig::new().limit(1));
    let a = tenant("1");
    let b = tenant("2");

    assert!(cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher)));
    assert!(!cache.set(b.key(), configuration("2", 0), refetch(&b, &fetcher)));

    assert_eq!(cache.len(), 1);
    assert!(cache.contains(&a.key()));
    assert!(!cache.contains(&b.key()));
}

#[tokio::test]
async fn full_cache_still_replaces_existing_key() {
    let fetcher = CountingFetcher::new();
    let cache = ProxyConfigCache::new(CacheConfig::new().limit(1));
    let a = tenant("1");

    cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher));
    assert!(cache.set(a.key(), configuration("1", 7), refetch(&a, &fetcher)));

    let entry = cache.entry(&a.key()).unwrap();
    assert_eq!(entry.configuration.backend_endpoint, "https://backend-7.example.net");
}

// ============================================================================
// Flush
// ============================================================================

#[tokio::test]
async fn flush_removes_only_expired_entries() {
    let clock = Arc::new(ManualClock::new());
    let fetcher = CountingFetcher::new();
    let cache = cache_on(&clock, CacheConfig::new().ttl(HOUR));
    let a = tenant("1");
    let b = tenant("2");

    cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher));
    clock.advance(HOUR + Duration::from_secs(1));
    cache.set(b.key(), configuration("2", 0), refetch(&b, &fetcher));

    assert_eq!(cache.flush(), 1);
    assert!(!cache.contains(&a.key()));
    assert!(cache.contains(&b.key()));
}

#[tokio::test]
async fn flush_removes_entry_expiring_exactly_now() {
    let clock = Arc::new(ManualClock::new());
    let fetcher = CountingFetcher::new();
    let cache = cache_on(&clock, CacheConfig::new().ttl(HOUR));
    let a = tenant("1");

    cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher));
    clock.advance(HOUR - Duration::from_secs(1));
    assert_eq!(cache.flush(), 0);

    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.entry(&a.key()).unwrap().expires_at, clock.now());
    assert_eq!(cache.flush(), 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn huge_ttl_saturates_expiry() {
    let clock = Arc::new(ManualClock::new());
    let fetcher = CountingFetcher::new();
    let cache = cache_on(&clock, CacheConfig::new().ttl(Duration::from_secs(u64::MAX)));
    let a = tenant("1");

    assert!(cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher)));
    assert!(cache.entry(&a.key()).unwrap().expires_at > clock.now());
    assert_eq!(cache.flush(), 0);
}

#[tokio::test]
async fn reads_ignore_expiry_until_flushed() {
    let clock = Arc::new(ManualClock::new());
    let fetcher = CountingFetcher::new();
    let cache = cache_on(&clock, CacheConfig::new().ttl(HOUR));
    let a = tenant("1");

    cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher));
    clock.advance(2 * HOUR);

    cache.get(&a.key(), refetch(&a, &fetcher)).await.unwrap();
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn entry_expiry_is_set_from_clock() {
    let clock = Arc::new(ManualClock::new());
    let fetcher = CountingFetcher::new();
    let cache = cache_on(&clock, CacheConfig::new().ttl(HOUR));
    let a = tenant("1");

    cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher));
    let entry = cache.entry(&a.key()).unwrap();
    assert_eq!(entry.expires_at, clock.now() + HOUR);
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn refresh_replaces_entries_near_expiry() {
    let clock = Arc::new(ManualClock::new());
    let fetcher = CountingFetcher::new();
    let cache = cache_on(
        &clock,
        CacheConfig::new().ttl(HOUR).refresh_buffer(Duration::from_secs(60)),
    );
    let a = tenant("1");

    cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher));
    clock.advance(HOUR - Duration::from_secs(30));

    let summary = cache.refresh().await;
    assert_eq!(summary.refreshed, 1);
    assert_eq!(summary.evicted, 0);

    let entry = cache.entry(&a.key()).unwrap();
    assert_eq!(entry.configuration.backend_endpoint, "https://backend-1.example.net");
    assert_eq!(entry.expires_at, clock.now() + HOUR);
}

#[tokio::test]
async fn refresh_window_includes_its_far_edge() {
    let clock = Arc::new(ManualClock::new());
    let fetcher = CountingFetcher::new();
    let buffer = Duration::from_secs(60);
    let cache = cache_on(&clock, CacheConfig::new().ttl(HOUR).refresh_buffer(buffer));
    let a = tenant("1");

    cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher));
    clock.advance(HOUR - buffer - Duration::from_secs(1));
    assert_eq!(cache.refresh().await, RefreshSummary::default());

    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.entry(&a.key()).unwrap().expires_at, clock.now() + buffer);
    assert_eq!(cache.refresh().await.refreshed, 1);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn huge_refresh_buffer_makes_every_entry_due() {
    let clock = Arc::new(ManualClock::new());
    let fetcher = CountingFetcher::new();
    let cache = cache_on(
        &clock,
        CacheConfig::new().ttl(HOUR).refresh_buffer(Duration::from_secs(u64::MAX)),
    );
    let a = tenant("1");

    cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher));
    assert_eq!(cache.refresh().await.refreshed, 1);
}

#[tokio::test]
async fn refresh_fetches_once_per_eligible_entry() {
    let clock = Arc::new(ManualClock::new());
    let fetcher = CountingFetcher::new();
    let cache = cache_on(
        &clock,
        CacheConfig::new().ttl(HOUR).refresh_buffer(Duration::from_secs(60)),
    );
    let a = tenant("1");
    let b = tenant("2");

    cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher));
    clock.advance(Duration::from_secs(30 * 60));
    cache.set(b.key(), configuration("2", 0), refetch(&b, &fetcher));
    clock.advance(Duration::from_secs(29 * 60 + 30));

    let summary = cache.refresh().await;
    assert_eq!(summary.refreshed, 1);
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(
        cache.entry(&b.key()).unwrap().configuration.backend_endpoint,
        "https://backend-0.example.net"
    );
}

#[tokio::test]
async fn refresh_failure_evicts_entry() {
    let clock = Arc::new(ManualClock::new());
    let fetcher = CountingFetcher::new();
    fetcher.set_failing(true);
    let cache = cache_on(&clock, CacheConfig::new().ttl(HOUR));
    let a = tenant("1");

    cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher));
    clock.advance(HOUR);

    let summary = cache.refresh().await;
    assert_eq!(summary.evicted, 1);
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_keeps_entry_replaced_in_the_meantime() {
    let clock = Arc::new(ManualClock::new());
    let slow = CountingFetcher::slow(Duration::from_millis(100));
    slow.set_failing(true);
    let fetcher = CountingFetcher::new();
    let cache = cache_on(&clock, CacheConfig::new().ttl(HOUR));
    let a = tenant("1");

    cache.set(a.key(), configuration("1", 0), refetch(&a, &slow));
    clock.advance(HOUR);

    let (summary, ()) = tokio::join!(cache.refresh(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.flush(), 1);
        assert!(cache.set(a.key(), configuration("1", 9), refetch(&a, &fetcher)));
    });

    assert_eq!(slow.calls(), 1);
    assert_eq!(summary.evicted, 0);
    let entry = cache.entry(&a.key()).unwrap();
    assert_eq!(entry.configuration.backend_endpoint, "https://backend-9.example.net");
}

#[tokio::test]
async fn refresh_skips_fresh_entries() {
    let clock = Arc::new(ManualClock::new());
    let fetcher = CountingFetcher::new();
    let cache = cache_on(&clock, CacheConfig::new().ttl(HOUR));
    let a = tenant("1");

    cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher));

    assert_eq!(cache.refresh().await, RefreshSummary::default());
    assert_eq!(fetcher.calls(), 0);
}

// ============================================================================
// Workers
// ============================================================================

#[tokio::test]
async fn starting_a_running_worker_fails() {
    let cache = ProxyConfigCache::default();
    cache.start_flush_worker().unwrap();
    cache.start_refresh_worker().unwrap();

    assert_eq!(
        cache.start_flush_worker().unwrap_err(),
        TollgateError::WorkerAlreadyRunning(WorkerKind::Flush)
    );
    assert_eq!(
        cache.start_refresh_worker().unwrap_err(),
        TollgateError::WorkerAlreadyRunning(WorkerKind::Refresh)
    );

    cache.stop_flush_worker().await.unwrap();
    cache.stop_refresh_worker().await.unwrap();
}

#[tokio::test]
async fn stopping_an_idle_worker_fails() {
    let cache = ProxyConfigCache::default();
    assert_eq!(
        cache.stop_flush_worker().await.unwrap_err(),
        TollgateError::WorkerNotRunning(WorkerKind::Flush)
    );
    assert_eq!(
        cache.stop_refresh_worker().await.unwrap_err(),
        TollgateError::WorkerNotRunning(WorkerKind::Refresh)
    );
}

#[tokio::test]
async fn worker_can_restart_after_stop() {
    let cache = ProxyConfigCache::default();

    cache.start_flush_worker().unwrap();
    assert!(cache.is_flush_worker_running());
    cache.stop_flush_worker().await.unwrap();
    assert!(!cache.is_flush_worker_running());

    cache.start_flush_worker().unwrap();
    assert!(cache.is_flush_worker_running());
    cache.stop_flush_worker().await.unwrap();
}

#[tokio::test]
async fn flush_worker_runs_a_pass_on_start() {
    let clock = Arc::new(ManualClock::new());
    let fetcher = CountingFetcher::new();
    let cache = cache_on(&clock, CacheConfig::new().ttl(HOUR));
    let a = tenant("1");

    cache.set(a.key(), configuration("1", 0), refetch(&a, &fetcher));
    clock.advance(HOUR);
    cache.start_flush_worker().unwrap();

    for _ in 0..100 {
        if cache.is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(cache.is_empty());
    cache.stop_flush_worker().await.unwrap();
}
