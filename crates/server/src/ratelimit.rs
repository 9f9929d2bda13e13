//! Transport-level rate limiting for the HTTP surface.
//!
//! Two token-bucket layers: every request is metered per client IP before
//! authentication runs, and authenticated requests are additionally metered
//! per account. This is separate from the ledger-backed OTP windows in
//! `limits.rs`, which meter individual share operations.
//!
//! Forwarded-IP headers (`X-Forwarded-For`, `X-Real-IP`) are honored only
//! when the connecting peer matches `rate_limit.trusted_proxies`; otherwise
//! the socket address is used as-is, so a spoofed header cannot buy a
//! fresh bucket.

use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::{DashMap, mapref::entry::Entry};
use governor::{
    Quota, RateLimiter, clock::DefaultClock, middleware::NoOpMiddleware, state::InMemoryState,
};
use ipnet::IpNet;
use satchel_core::config::RateLimitConfig;
use time::OffsetDateTime;

use crate::error::ApiError;

type Buckets = RateLimiter<String, DashMap<String, InMemoryState>, DefaultClock, NoOpMiddleware>;

/// Evictions below this share of tracked keys do not justify a rebuild.
const REBUILD_EVICTION_FRACTION: f64 = 0.10;
/// Evictions below this absolute count never trigger a rebuild on their own.
const REBUILD_EVICTION_MIN: usize = 100;
/// Once keys are going stale, rebuild at least this often anyway.
const REBUILD_MIN_INTERVAL: Duration = Duration::from_secs(300);

/// One token-bucket layer keyed by an opaque string (a client IP or an
/// account id).
///
/// governor's dashmap store cannot drop individual keys, so `last_seen`
/// tracks per-key activity and the whole limiter is rebuilt once enough
/// keys have gone idle. A rebuild resets in-flight bucket state, which is
/// why small cleanups skip it.
struct KeyedLimiter {
    label: &'static str,
    quota: Quota,
    buckets: RwLock<Buckets>,
    last_seen: DashMap<String, Instant>,
    last_rebuild: RwLock<Instant>,
    max_entries: usize,
    entry_ttl: Duration,
    at_capacity_warned: AtomicBool,
}

impl KeyedLimiter {
    fn new(label: &'static str, quota: Quota, max_entries: usize, entry_ttl: Duration) -> Self {
        Self {
            label,
            quota,
            buckets: RwLock::new(RateLimiter::dashmap(quota)),
            last_seen: DashMap::new(),
            last_rebuild: RwLock::new(Instant::now()),
            max_entries,
            entry_ttl,
            at_capacity_warned: AtomicBool::new(false),
        }
    }

    /// Admit or reject one request for `key`. Rejections carry the
    /// suggested Retry-After in seconds.
    fn check(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let key = key.to_string();

        // DashMap::len would deadlock while an entry guard is held, so
        // capacity is read first; concurrent inserts can overshoot
        // max_entries by at most the number of racing threads.
        let at_capacity = self.last_seen.len() >= self.max_entries;
        match self.last_seen.entry(key.clone()) {
            Entry::Occupied(mut seen) => {
                seen.insert(now);
            }
            Entry::Vacant(slot) => {
                if at_capacity {
                    // Logged once per capacity episode, not per rejection.
                    if !self.at_capacity_warned.swap(true, Ordering::Relaxed) {
                        tracing::warn!(
                            layer = self.label,
                            max_entries = self.max_entries,
                            "rate limiter at capacity, rejecting unseen keys until cleanup"
                        );
                    }
                    return Err(60);
                }
                slot.insert(now);
            }
        }

        let buckets = self.buckets.read().unwrap_or_else(|poisoned| {
            tracing::warn!(layer = self.label, "bucket lock poisoned, recovering");
            poisoned.into_inner()
        });
        match buckets.check_key(&key) {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let wait =
                    not_until.wait_time_from(governor::clock::Clock::now(&DefaultClock::default()));
                Err(wait.as_secs() + 1)
            }
        }
    }

    /// Drop keys idle longer than the TTL. Returns the eviction count.
    fn cleanup(&self, now: Instant) -> usize {
        let stale: Vec<String> = self
            .last_seen
            .iter()
            .filter(|seen| now.duration_since(*seen.value()) > self.entry_ttl)
            .map(|seen| seen.key().clone())
            .collect();

        let mut evicted = 0;
        for key in stale {
            // remove_if re-checks staleness, so a key refreshed since the
            // scan above survives.
            if self
                .last_seen
                .remove_if(&key, |_, last| now.duration_since(*last) > self.entry_ttl)
                .is_some()
            {
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.at_capacity_warned.store(false, Ordering::Relaxed);
            if self.should_rebuild(evicted, now) {
                self.rebuild();
                tracing::debug!(
                    layer = self.label,
                    evicted,
                    remaining = self.last_seen.len(),
                    "rebuilt rate limiter after cleanup"
                );
            }
        }
        evicted
    }

    fn should_rebuild(&self, evicted: usize, now: Instant) -> bool {
        let entries_before = self.last_seen.len() + evicted;
        let threshold = ((entries_before as f64 * REBUILD_EVICTION_FRACTION) as usize)
            .max(REBUILD_EVICTION_MIN);
        if evicted >= threshold {
            return true;
        }
        let last = self.last_rebuild.read().unwrap_or_else(|poisoned| {
            tracing::warn!(layer = self.label, "rebuild clock lock poisoned, recovering");
            poisoned.into_inner()
        });
        now.duration_since(*last) >= REBUILD_MIN_INTERVAL
    }

    fn rebuild(&self) {
        let fresh = RateLimiter::dashmap(self.quota);
        {
            let mut buckets = self.buckets.write().unwrap_or_else(|poisoned| {
                tracing::warn!(
                    layer = self.label,
                    "bucket lock poisoned during rebuild, recovering"
                );
                poisoned.into_inner()
            });
            *buckets = fresh;
        }
        let mut last = self.last_rebuild.write().unwrap_or_else(|poisoned| {
            tracing::warn!(layer = self.label, "rebuild clock lock poisoned, recovering");
            poisoned.into_inner()
        });
        *last = Instant::now();
    }

    fn tracked(&self) -> usize {
        self.last_seen.len()
    }
}

/// Trusted sources for forwarded-IP headers.
#[derive(Clone, Debug)]
enum TrustedProxies {
    /// Forwarded headers are never trusted (the default).
    None,
    /// Forwarded headers are always trusted (`"*"`, development setups).
    All,
    /// Forwarded headers are trusted when the peer matches an entry.
    List(Vec<ProxyMatcher>),
}

#[derive(Clone, Debug)]
enum ProxyMatcher {
    Ip(IpAddr),
    Cidr(IpNet),
}

impl TrustedProxies {
    fn from_config(entries: &[String]) -> Self {
        if entries.is_empty() {
            return Self::None;
        }
        if entries.len() == 1 && entries[0] == "*" {
            return Self::All;
        }
        let matchers = entries
            .iter()
            .filter_map(|entry| {
                let parsed: Result<ProxyMatcher, String> = if entry.contains('/') {
                    entry
                        .parse::<IpNet>()
                        .map(ProxyMatcher::Cidr)
                        .map_err(|e| e.to_string())
                } else {
                    entry
                        .parse::<IpAddr>()
                        .map(ProxyMatcher::Ip)
                        .map_err(|e| e.to_string())
                };
                match parsed {
                    Ok(matcher) => Some(matcher),
                    Err(error) => {
                        tracing::warn!(
                            entry = %entry,
                            error = %error,
                            "ignoring unparseable trusted_proxies entry"
                        );
                        None
                    }
                }
            })
            .collect();
        Self::List(matchers)
    }

    fn is_trusted(&self, peer: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::List(matchers) => {
                let Ok(ip) = peer.parse::<IpAddr>() else {
                    return false;
                };
                matchers.iter().any(|matcher| match matcher {
                    ProxyMatcher::Ip(trusted) => *trusted == ip,
                    ProxyMatcher::Cidr(net) => net.contains(&ip),
                })
            }
        }
    }
}

/// Shared limiter handle. Holds `None` when rate limiting is disabled,
/// making every check a no-op.
#[derive(Clone)]
pub struct RateLimitState {
    inner: Option<Arc<Layers>>,
}

struct Layers {
    ip: KeyedLimiter,
    user: KeyedLimiter,
    trusted_proxies: TrustedProxies,
    connect_info_warned: AtomicBool,
}

impl RateLimitState {
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self { inner: None };
        }

        let ip_quota = Quota::per_minute(
            NonZeroU32::new(config.ip_requests_per_minute).unwrap_or(NonZeroU32::new(60).unwrap()),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::new(1).unwrap()));

        // Authenticated callers get a higher ceiling and double the burst.
        let user_quota = Quota::per_minute(
            NonZeroU32::new(config.user_requests_per_minute)
                .unwrap_or(NonZeroU32::new(600).unwrap()),
        )
        .allow_burst(
            NonZeroU32::new(config.burst_size.saturating_mul(2))
                .unwrap_or(NonZeroU32::new(1).unwrap()),
        );

        let max_entries = config.max_entries as usize;
        let entry_ttl = Duration::from_secs(config.entry_ttl_secs);
        Self {
            inner: Some(Arc::new(Layers {
                ip: KeyedLimiter::new("ip", ip_quota, max_entries, entry_ttl),
                user: KeyedLimiter::new("user", user_quota, max_entries, entry_ttl),
                trusted_proxies: TrustedProxies::from_config(&config.trusted_proxies),
                connect_info_warned: AtomicBool::new(false),
            })),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Admit one request from `ip`; Err carries the Retry-After seconds.
    pub fn check_ip(&self, ip: &str) -> Result<(), u64> {
        match &self.inner {
            Some(layers) => layers.ip.check(ip),
            None => Ok(()),
        }
    }

    /// Admit one request from the authenticated account `user_id`.
    pub fn check_user(&self, user_id: &str) -> Result<(), u64> {
        match &self.inner {
            Some(layers) => layers.user.check(user_id),
            None => Ok(()),
        }
    }

    /// Evict idle keys from both layers. Returns the eviction count.
    pub fn cleanup(&self) -> usize {
        let Some(layers) = &self.inner else {
            return 0;
        };
        let now = Instant::now();
        let evicted = layers.ip.cleanup(now) + layers.user.cleanup(now);
        if evicted > 0 {
            tracing::debug!(
                evicted,
                ip_tracked = layers.ip.tracked(),
                user_tracked = layers.user.tracked(),
                "rate limiter cleanup finished"
            );
        }
        evicted
    }

    /// Tracked key counts for the (ip, user) layers.
    pub fn entry_count(&self) -> (usize, usize) {
        match &self.inner {
            Some(layers) => (layers.ip.tracked(), layers.user.tracked()),
            None => (0, 0),
        }
    }
}

impl Layers {
    /// Resolve the key for the IP layer, honoring forwarded headers only
    /// when the peer is a trusted proxy.
    fn client_ip(&self, req: &Request<Body>) -> String {
        let peer = peer_ip(req);
        let trust_headers = match (&peer, &self.trusted_proxies) {
            // Without peer info a proxy list cannot be verified; only the
            // wildcard setting keeps headers trusted.
            (None, TrustedProxies::All) => true,
            (None, _) => false,
            (Some(peer), proxies) => proxies.is_trusted(peer),
        };
        if trust_headers && let Some(forwarded) = forwarded_ip(req) {
            return forwarded;
        }
        match peer {
            Some(ip) => ip,
            None => {
                if !self.connect_info_warned.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        "peer address unavailable, all requests share one rate-limit bucket; \
                         serve with into_make_service_with_connect_info to expose it"
                    );
                }
                "unknown".to_string()
            }
        }
    }
}

/// First hop of `X-Forwarded-For`, falling back to `X-Real-IP`.
fn forwarded_ip(req: &Request<Body>) -> Option<String> {
    if let Some(value) = req.headers().get("x-forwarded-for")
        && let Ok(chain) = value.to_str()
        && let Some(first) = chain.split(',').next()
    {
        return Some(first.trim().to_string());
    }
    if let Some(value) = req.headers().get("x-real-ip")
        && let Ok(ip) = value.to_str()
    {
        return Some(ip.trim().to_string());
    }
    None
}

fn peer_ip(req: &Request<Body>) -> Option<String> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
}

fn throttled(retry_after_secs: u64) -> Response {
    let reset_at = OffsetDateTime::now_utc() + time::Duration::seconds(retry_after_secs as i64);
    ApiError::RateLimited { reset_at }.into_response()
}

/// Meters every request by client IP. Applied outside authentication so
/// unauthenticated abuse is cut off early.
pub async fn ip_rate_limit_middleware(
    State(limits): State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(layers) = &limits.inner else {
        return next.run(req).await;
    };
    let ip = layers.client_ip(&req);
    match layers.ip.check(&ip) {
        Ok(()) => next.run(req).await,
        Err(retry_after_secs) => throttled(retry_after_secs),
    }
}

/// Meters authenticated requests by account id. Runs after the auth
/// middleware has attached [`UserIdExtension`]; anonymous requests pass
/// through on the IP layer alone.
pub async fn user_rate_limit_middleware(
    State(limits): State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(layers) = &limits.inner else {
        return next.run(req).await;
    };
    let Some(user) = req.extensions().get::<UserIdExtension>().cloned() else {
        return next.run(req).await;
    };
    match layers.user.check(&user.0) {
        Ok(()) => next.run(req).await,
        Err(retry_after_secs) => throttled(retry_after_secs),
    }
}

/// Account id attached by the auth middleware for the user limiter.
#[derive(Clone)]
pub struct UserIdExtension(pub String);

/// Periodically evicts stale limiter keys until the returned handle is
/// dropped or aborted.
pub fn spawn_cleanup_task(
    state: RateLimitState,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let evicted = state.cleanup();
            if evicted > 0 {
                tracing::info!(evicted, "rate limiter cleanup evicted stale entries");
            }
        }
    })
}
