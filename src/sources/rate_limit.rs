use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use http::Extensions;
use reqwest::Url;
use reqwest_middleware::{Middleware, Next};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

#[derive(Clone, Debug)]
pub(crate) struct RateLimitPolicy {
    pub key: &'static str,
    pub prefix: Cow<'static, str>,
    pub min_interval: Duration,
}

/// Spaces requests to the same upstream by reserving send slots.
///
/// Each caller reserves the next free slot under the lock and sleeps outside
/// it, so the three concurrent batch lookups against Ensembl leave in order
/// without busy re-checking.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    policies: Vec<RateLimitPolicy>,
    default_min_interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub(crate) fn from_env() -> Self {
        // NCBI_API_KEY raises the E-utilities budget from 3 to 10 requests/sec.
        let has_ncbi_api_key = crate::sources::ncbi_api_key().is_some();
        let policies = vec![
            policy(
                "ncbi-eutils",
                "SNPFINDER_EUTILS_BASE",
                crate::sources::eutils::EUTILS_BASE,
                eutils_min_interval(has_ncbi_api_key),
            ),
            // Ensembl REST allows 15 requests/sec per client.
            policy(
                "ensembl",
                "SNPFINDER_ENSEMBL_BASE",
                crate::sources::ensembl::ENSEMBL_BASE,
                Duration::from_millis(67),
            ),
        ];
        Self::new(policies, Duration::from_millis(100))
    }

    pub(crate) fn new(policies: Vec<RateLimitPolicy>, default_min_interval: Duration) -> Self {
        Self {
            policies,
            default_min_interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    fn bucket_for(&self, url: &Url) -> (String, Duration) {
        let full = url.as_str();

        let matched = self
            .policies
            .iter()
            .filter(|p| full.starts_with(p.prefix.as_ref()))
            .max_by_key(|p| p.prefix.len());
        if let Some(policy) = matched {
            return (format!("policy:{}", policy.key), policy.min_interval);
        }

        let origin = format!(
            "{}://{}",
            url.scheme(),
            url.host_str().unwrap_or("unknown-host")
        );
        (format!("default:{origin}"), self.default_min_interval)
    }

    async fn reserve(&self, url: &Url) -> Instant {
        let (bucket, min_interval) = self.bucket_for(url);
        let now = Instant::now();
        let mut slots = self.next_slot.lock().await;
        let slot = match slots.get(&bucket) {
            Some(next) if *next > now => *next,
            _ => now,
        };
        slots.insert(bucket, slot + min_interval);
        slot
    }

    pub(crate) async fn wait_for_url(&self, url: &Url) {
        let slot = self.reserve(url).await;
        if slot > Instant::now() {
            debug!(url = url.as_str(), "rate limit: delaying request");
            sleep_until(slot).await;
        }
    }

    #[cfg(test)]
    fn bucket_for_str(&self, raw: &str) -> Option<String> {
        let url = Url::parse(raw).ok()?;
        Some(self.bucket_for(&url).0)
    }
}

fn eutils_min_interval(has_ncbi_api_key: bool) -> Duration {
    if has_ncbi_api_key {
        Duration::from_millis(100)
    } else {
        Duration::from_millis(334)
    }
}

fn policy(
    key: &'static str,
    env_var: &'static str,
    default_prefix: &'static str,
    min_interval: Duration,
) -> RateLimitPolicy {
    RateLimitPolicy {
        key,
        prefix: crate::sources::env_base(default_prefix, env_var),
        min_interval,
    }
}

static GLOBAL_RATE_LIMITER: OnceLock<Arc<RateLimiter>> = OnceLock::new();

fn global_limiter() -> Arc<RateLimiter> {
    GLOBAL_RATE_LIMITER
        .get_or_init(|| Arc::new(RateLimiter::from_env()))
        .clone()
}

#[derive(Clone, Debug)]
pub(crate) struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    pub(crate) fn new() -> Self {
        Self {
            limiter: global_limiter(),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        self.limiter.wait_for_url(req.url()).await;
        next.run(req, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_policy(key: &'static str, prefix: &str, ms: u64) -> RateLimitPolicy {
        RateLimitPolicy {
            key,
            prefix: Cow::Owned(prefix.to_string()),
            min_interval: Duration::from_millis(ms),
        }
    }

    #[tokio::test]
    async fn second_request_to_same_prefix_waits_for_its_slot() {
        let limiter = RateLimiter::new(
            vec![test_policy("eutils", "https://eutils.example.org/entrez", 120)],
            Duration::from_millis(1),
        );

        let url = Url::parse("https://eutils.example.org/entrez/esearch.fcgi").unwrap();
        let start = Instant::now();
        limiter.wait_for_url(&url).await;
        limiter.wait_for_url(&url).await;

        assert!(
            start.elapsed() >= Duration::from_millis(100),
            "second request should be throttled"
        );
    }

    #[tokio::test]
    async fn concurrent_requests_are_spaced_in_reservation_order() {
        let limiter = Arc::new(RateLimiter::new(
            vec![test_policy("ensembl", "https://rest.example.org", 50)],
            Duration::from_millis(1),
        ));
        let url = Url::parse("https://rest.example.org/variation/homo_sapiens").unwrap();

        let start = Instant::now();
        let (a, b, c) = tokio::join!(
            limiter.wait_for_url(&url),
            limiter.wait_for_url(&url),
            limiter.wait_for_url(&url)
        );
        let _ = (a, b, c);

        assert!(
            start.elapsed() >= Duration::from_millis(90),
            "three requests need two full intervals"
        );
    }

    #[tokio::test]
    async fn distinct_prefixes_on_one_host_do_not_block_each_other() {
        let limiter = RateLimiter::new(
            vec![
                test_policy("a", "https://rest.example.org/variation", 100),
                test_policy("b", "https://rest.example.org/info", 100),
            ],
            Duration::from_millis(1),
        );

        let url_a = Url::parse("https://rest.example.org/variation/homo_sapiens").unwrap();
        let url_b = Url::parse("https://rest.example.org/info/ping").unwrap();

        let start = Instant::now();
        limiter.wait_for_url(&url_a).await;
        limiter.wait_for_url(&url_b).await;

        assert!(start.elapsed() < Duration::from_millis(80));
    }

    #[test]
    fn longest_matching_prefix_wins() {
        let limiter = RateLimiter::new(
            vec![
                test_policy("short", "https://example.org/api", 10),
                test_policy("long", "https://example.org/api/v1", 10),
            ],
            Duration::from_millis(1),
        );

        let key = limiter
            .bucket_for_str("https://example.org/api/v1/variation/rs56116432")
            .unwrap();
        assert_eq!(key, "policy:long");
        let fallback = limiter
            .bucket_for_str("https://other.example.org/x")
            .unwrap();
        assert_eq!(fallback, "default:https://other.example.org");
    }

    #[test]
    fn eutils_interval_uses_key_aware_values() {
        assert_eq!(eutils_min_interval(false), Duration::from_millis(334));
        assert_eq!(eutils_min_interval(true), Duration::from_millis(100));
    }
}
