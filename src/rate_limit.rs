//! Rate limiting with token buckets.
//!
//! Two request limits are checked in this order:
//! 1. Global limit (if configured)
//! 2. Per-IP limit (if configured)
//!
//! Independently, failed authentications are counted per client IP. An IP
//! that exhausts its failure budget is refused for a lockout period, even
//! with valid credentials.
//!
//! ```yaml
//! server:
//!   rate_limit:
//!     enabled: true
//!     global:
//!       requests_per_second: 1000
//!     per_ip:
//!       requests_per_second: 10
//! ```

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use crate::config::RateLimitConfigYaml;
use crate::constants::{AUTH_FAILURES_PER_MINUTE, AUTH_LOCKOUT_SECS};

/// Maximum number of per-IP entries tracked before unpinned ones are dropped
const DEFAULT_MAX_IP_LIMITERS: usize = 100_000;
/// Idle limiters are evicted after this long
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

struct TrackedLimiter {
    limiter: Arc<DirectLimiter>,
    last_accessed: Instant,
}

struct AuthFailureEntry {
    limiter: DirectLimiter,
    last_accessed: Instant,
    blocked_until: Option<Instant>,
}

impl AuthFailureEntry {
    fn is_locked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }
}

/// Drop unpinned entries idle for at least `ttl`. If the map is still over
/// `max`, every unpinned entry goes.
fn evict_idle<V>(
    map: &RwLock<HashMap<IpAddr, V>>,
    last_accessed: impl Fn(&V) -> Instant,
    pinned: impl Fn(&V, Instant) -> bool,
    ttl: Duration,
    max: usize,
    label: &'static str,
) -> usize {
    let now = Instant::now();
    // Collect under the read lock so the write lock is held briefly
    let expired: Vec<IpAddr> = map
        .read()
        .iter()
        .filter(|(_, v)| !pinned(v, now) && now.duration_since(last_accessed(v)) >= ttl)
        .map(|(ip, _)| *ip)
        .collect();

    if expired.is_empty() {
        return 0;
    }
    let mut guard = map.write();
    for ip in &expired {
        guard.remove(ip);
    }
    tracing::debug!(
        limiter = label,
        evicted = expired.len(),
        remaining = guard.len(),
        "Evicted idle rate limiters"
    );
    if guard.len() > max {
        tracing::warn!(
            limiter = label,
            count = guard.len(),
            max,
            "Rate limiters exceed max after TTL cleanup, dropping unpinned entries"
        );
        guard.retain(|_, v| pinned(v, now));
    }
    expired.len()
}

pub struct RateLimitManager {
    global: Option<DirectLimiter>,
    ips: Arc<RwLock<HashMap<IpAddr, TrackedLimiter>>>,
    per_ip_rps: Option<NonZeroU32>,
    auth_failures: Arc<RwLock<HashMap<IpAddr, AuthFailureEntry>>>,
    auth_quota: Quota,
    auth_lockout: Duration,
    max_ip_limiters: usize,
    idle_ttl: Duration,
    cleanup_shutdown: RwLock<Option<oneshot::Sender<()>>>,
}

impl RateLimitManager {
    /// Zero rates disable the corresponding limit
    pub fn new(global_rps: Option<u32>, per_ip_rps: Option<u32>) -> Self {
        let global = global_rps
            .and_then(NonZeroU32::new)
            .map(|nz| RateLimiter::direct(Quota::per_second(nz)));

        let auth_per_minute =
            NonZeroU32::new(AUTH_FAILURES_PER_MINUTE).unwrap_or(NonZeroU32::MIN);

        Self {
            global,
            ips: Arc::new(RwLock::new(HashMap::new())),
            per_ip_rps: per_ip_rps.and_then(NonZeroU32::new),
            auth_failures: Arc::new(RwLock::new(HashMap::new())),
            auth_quota: Quota::per_minute(auth_per_minute),
            auth_lockout: Duration::from_secs(AUTH_LOCKOUT_SECS),
            max_ip_limiters: DEFAULT_MAX_IP_LIMITERS,
            idle_ttl: DEFAULT_IDLE_TTL,
            cleanup_shutdown: RwLock::new(None),
        }
    }

    /// Request limits apply only when `enabled`; the auth-failure budget always applies
    pub fn from_config(config: Option<&RateLimitConfigYaml>) -> Self {
        match config.filter(|c| c.enabled) {
            Some(c) => Self::new(
                c.global.as_ref().map(|g| g.requests_per_second),
                c.per_ip.as_ref().map(|p| p.requests_per_second),
            ),
            None => Self::new(None, None),
        }
    }

    /// Override the failure budget and lockout
    pub fn with_auth_failure_limit(mut self, per_minute: u32, lockout: Duration) -> Self {
        if let Some(nz) = NonZeroU32::new(per_minute) {
            self.auth_quota = Quota::per_minute(nz).allow_burst(nz);
        }
        self.auth_lockout = lockout;
        self
    }

    /// Cap on tracked per-IP entries
    pub fn with_max_tracked_ips(mut self, max: usize) -> Self {
        self.max_ip_limiters = max.max(1);
        self
    }

    /// Evict idle limiters periodically. Later calls are ignored while a task runs.
    pub fn start_cleanup_task(&self, interval: Option<Duration>) {
        let interval = interval.unwrap_or(DEFAULT_CLEANUP_INTERVAL);
        let ips = Arc::clone(&self.ips);
        let auth_failures = Arc::clone(&self.auth_failures);
        let idle_ttl = self.idle_ttl;
        let max = self.max_ip_limiters;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        {
            let mut guard = self.cleanup_shutdown.write();
            if guard.is_some() {
                tracing::debug!("Rate limiter cleanup task already running");
                return;
            }
            *guard = Some(shutdown_tx);
        }

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        evict_idle(
                            &ips,
                            |e| e.last_accessed,
                            |_, _| false,
                            idle_ttl,
                            max,
                            "per_ip",
                        );
                        evict_idle(
                            &auth_failures,
                            |e| e.last_accessed,
                            AuthFailureEntry::is_locked,
                            idle_ttl,
                            max,
                            "auth_failures",
                        );
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Rate limiter cleanup task shutting down");
                        break;
                    }
                }
            }
        });

        tracing::info!(
            interval_secs = interval.as_secs(),
            idle_ttl_secs = idle_ttl.as_secs(),
            "Started rate limiter cleanup task"
        );
    }

    pub fn stop_cleanup_task(&self) {
        if let Some(shutdown_tx) = self.cleanup_shutdown.write().take() {
            let _ = shutdown_tx.send(());
        }
    }

    pub fn check_global(&self) -> bool {
        self.global
            .as_ref()
            .map_or(true, |limiter| limiter.check().is_ok())
    }

    pub fn check_ip(&self, ip: IpAddr) -> bool {
        let Some(rps) = self.per_ip_rps else {
            return true;
        };

        let mut limiters = self.ips.write();
        if limiters.len() >= self.max_ip_limiters {
            tracing::warn!(
                ip_count = limiters.len(),
                max_ips = self.max_ip_limiters,
                "Per-IP rate limiter count exceeded max, clearing all"
            );
            limiters.clear();
        }

        let entry = limiters.entry(ip).or_insert_with(|| TrackedLimiter {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
            last_accessed: Instant::now(),
        });
        entry.last_accessed = Instant::now();
        entry.limiter.check().is_ok()
    }

    /// Global first, then per-IP
    pub fn check_request(&self, client_ip: Option<IpAddr>) -> Result<(), RateLimitError> {
        if !self.check_global() {
            return Err(RateLimitError::Global);
        }
        if let Some(ip) = client_ip {
            if !self.check_ip(ip) {
                return Err(RateLimitError::PerIp(ip));
            }
        }
        Ok(())
    }

    /// Whether `ip` is currently locked out after too many failed logins
    pub fn is_auth_blocked(&self, ip: IpAddr) -> bool {
        self.auth_failures
            .read()
            .get(&ip)
            .is_some_and(|entry| entry.is_locked(Instant::now()))
    }

    /// Count one failed authentication. Returns false once the budget is spent,
    /// which also starts the lockout.
    pub fn record_auth_failure(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut failures = self.auth_failures.write();
        if !failures.contains_key(&ip) && failures.len() >= self.max_ip_limiters {
            // Active lockouts survive the overflow
            failures.retain(|_, entry| entry.is_locked(now));
            if failures.len() >= self.max_ip_limiters {
                tracing::warn!(
                    client_ip = %ip,
                    locked = failures.len(),
                    "Auth failure table full of active lockouts, not tracking client"
                );
                return true;
            }
        }

        let entry = failures.entry(ip).or_insert_with(|| AuthFailureEntry {
            limiter: RateLimiter::direct(self.auth_quota),
            last_accessed: now,
            blocked_until: None,
        });
        entry.last_accessed = now;

        if entry.limiter.check().is_ok() {
            return true;
        }
        entry.blocked_until = Some(now + self.auth_lockout);
        tracing::warn!(
            client_ip = %ip,
            lockout_secs = self.auth_lockout.as_secs(),
            "Too many failed authentications, client locked out"
        );
        false
    }

    pub fn tracked_ip_count(&self) -> usize {
        self.ips.read().len()
    }

    pub fn tracked_auth_failure_count(&self) -> usize {
        self.auth_failures.read().len()
    }

    /// Remove per-IP entries idle for at least `ttl`; returns how many were evicted
    pub fn cleanup_stale(&self, ttl: Duration) -> usize {
        let max = self.max_ip_limiters;
        evict_idle(&self.ips, |e| e.last_accessed, |_, _| false, ttl, max, "per_ip")
            + evict_idle(
                &self.auth_failures,
                |e| e.last_accessed,
                AuthFailureEntry::is_locked,
                ttl,
                max,
                "auth_failures",
            )
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }
}

impl Drop for RateLimitManager {
    fn drop(&mut self) {
        self.stop_cleanup_task();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("Global rate limit exceeded")]
    Global,
    #[error("Rate limit exceeded for IP: {0}")]
    PerIp(IpAddr),
    #[error("Too many failed authentications from IP: {0}")]
    AuthLockout(IpAddr),
}
