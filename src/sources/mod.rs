//! Source clients and shared HTTP utilities for NCBI E-utilities and Ensembl REST.

use std::borrow::Cow;
use std::future::Future;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use http_cache_reqwest::{
    CACacheManager, Cache, CacheMode, CacheOptions, HttpCache, HttpCacheOptions,
};
use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderValue};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use tracing::warn;

use crate::error::SnpFinderError;

pub(crate) mod ensembl;
pub(crate) mod eutils;
pub(crate) mod rate_limit;

const ERROR_BODY_MAX_BYTES: usize = 2048;
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

static HTTP_CLIENT: OnceLock<ClientWithMiddleware> = OnceLock::new();

tokio::task_local! {
    static NO_CACHE: bool;
}

pub(crate) async fn with_no_cache<R, F>(no_cache: bool, fut: F) -> R
where
    F: Future<Output = R>,
{
    NO_CACHE.scope(no_cache, fut).await
}

/// Cache mode of the calling task, for carrying it into spawned tasks.
pub(crate) fn current_no_cache() -> bool {
    NO_CACHE.try_with(|v| *v).unwrap_or(false)
}

pub(crate) fn apply_cache_mode(req: RequestBuilder) -> RequestBuilder {
    match NO_CACHE.try_with(|v| *v) {
        Ok(true) => req.with_extension(CacheMode::NoStore),
        _ => req,
    }
}

pub(crate) fn apply_cache_mode_with_auth(
    req: RequestBuilder,
    authenticated: bool,
) -> RequestBuilder {
    if authenticated {
        return req.with_extension(CacheMode::NoStore);
    }
    apply_cache_mode(req)
}

pub(crate) fn env_base(default: &'static str, env_var: &str) -> Cow<'static, str> {
    std::env::var(env_var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(Cow::Owned)
        .unwrap_or_else(|| Cow::Borrowed(default))
}

pub(crate) fn is_valid_gene_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

pub(crate) fn ncbi_api_key() -> Option<String> {
    std::env::var("NCBI_API_KEY")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn append_ncbi_api_key(req: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    if let Some(key) = api_key {
        return req.query(&[("api_key", key)]);
    }
    req
}

pub(crate) fn cache_dir() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join("snpfinder"),
        None => std::env::temp_dir().join("snpfinder"),
    }
}

/// Returns a shared HTTP client with retry, caching and rate-limit middleware.
///
/// - Retry: 3 attempts with exponential backoff for transient errors only
///   (connect failures, timeouts, 5xx, 429)
/// - Cache: Disk-based HTTP cache in XDG cache directory
/// - Cache TTL: `Cache-Control: max-stale=86400` makes “no caching headers” responses usable for 24h
pub(crate) fn shared_client() -> Result<ClientWithMiddleware, SnpFinderError> {
    if let Some(client) = HTTP_CLIENT.get() {
        return Ok(client.clone());
    }

    let mut default_headers = HeaderMap::new();
    default_headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-stale=86400"));

    let base_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("snpfinder/", env!("CARGO_PKG_VERSION")))
        .default_headers(default_headers)
        .build()
        .map_err(SnpFinderError::HttpClientInit)?;

    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

    let cache_path = cache_dir().join("http-cacache");
    std::fs::create_dir_all(&cache_path)?;

    let cache_options = HttpCacheOptions {
        cache_options: Some(CacheOptions {
            shared: true,
            ..CacheOptions::default()
        }),
        ..HttpCacheOptions::default()
    };

    let client = ClientBuilder::new(base_client)
        .with(Cache(HttpCache {
            // Mock servers reuse ports across tests; never serve a stale body.
            mode: if cfg!(test) {
                CacheMode::NoStore
            } else {
                CacheMode::Default
            },
            manager: CACacheManager { path: cache_path },
            options: cache_options,
        }))
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .with(rate_limit::RateLimitMiddleware::new())
        .build();

    match HTTP_CLIENT.set(client.clone()) {
        Ok(()) => Ok(client),
        Err(_) => HTTP_CLIENT.get().cloned().ok_or_else(|| SnpFinderError::Api {
            api: "http-client".into(),
            message: "Shared HTTP client initialization race".into(),
        }),
    }
}

pub(crate) fn body_excerpt(bytes: &[u8]) -> String {
    let full = String::from_utf8_lossy(bytes);

    let truncated: &str = if full.len() > ERROR_BODY_MAX_BYTES {
        let mut end = ERROR_BODY_MAX_BYTES;
        while end > 0 && !full.is_char_boundary(end) {
            end -= 1;
        }
        &full[..end]
    } else {
        full.as_ref()
    };

    let mut s = truncated.trim().replace(['\n', '\r', '\t'], " ");
    if full.len() > ERROR_BODY_MAX_BYTES {
        s.push_str(" …");
    }
    s
}

pub(crate) fn ensure_json_content_type(
    api: &str,
    content_type: Option<&HeaderValue>,
    body: &[u8],
) -> Result<(), SnpFinderError> {
    let Some(content_type) = content_type else {
        return Ok(());
    };

    let raw = match content_type.to_str() {
        Ok(v) => v.trim(),
        Err(_) => {
            warn!(
                source = api,
                "Response content-type header was not valid UTF-8; attempting JSON parse"
            );
            return Ok(());
        }
    };
    if raw.is_empty() {
        return Ok(());
    }

    let media_type = raw
        .split(';')
        .next()
        .map(str::trim)
        .unwrap_or_default()
        .to_ascii_lowercase();
    let is_html = matches!(media_type.as_str(), "text/html" | "application/xhtml+xml");
    if is_html {
        return Err(SnpFinderError::Api {
            api: api.to_string(),
            message: format!(
                "Unexpected HTML response (content-type: {raw}): {}",
                body_excerpt(body)
            ),
        });
    }

    let is_json = media_type == "application/json"
        || media_type == "text/json"
        || media_type.ends_with("+json");
    if !is_json {
        warn!(
            source = api,
            content_type = raw,
            "Unexpected non-JSON content type; attempting JSON parse for compatibility"
        );
    }

    Ok(())
}

pub(crate) async fn read_limited_body(
    mut resp: reqwest::Response,
    api: &str,
) -> Result<Vec<u8>, SnpFinderError> {
    let mut body: Vec<u8> = Vec::new();

    while let Some(chunk) = resp.chunk().await? {
        let next_len = body.len().saturating_add(chunk.len());
        if next_len > DEFAULT_MAX_BODY_BYTES {
            return Err(SnpFinderError::Api {
                api: api.to_string(),
                message: format!("Response body exceeded {DEFAULT_MAX_BODY_BYTES} bytes"),
            });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_json_content_type_rejects_html() {
        let err = ensure_json_content_type(
            "ensembl",
            Some(&HeaderValue::from_static("text/html; charset=utf-8")),
            b"<html><body>upstream error</body></html>",
        )
        .expect_err("html should be rejected");
        let msg = err.to_string();
        assert!(msg.contains("ensembl"));
        assert!(msg.contains("HTML"));
    }

    #[test]
    fn ensure_json_content_type_accepts_json() {
        let ok = ensure_json_content_type(
            "ensembl",
            Some(&HeaderValue::from_static("application/json; charset=utf-8")),
            b"{\"ok\":true}",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn ensure_json_content_type_allows_non_json_compat_mode() {
        let ok = ensure_json_content_type(
            "ncbi-eutils",
            Some(&HeaderValue::from_static("text/plain")),
            b"{\"ok\":true}",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn body_excerpt_flattens_and_truncates() {
        let short = body_excerpt(b"line one\nline two\t");
        assert_eq!(short, "line one line two");

        let long = vec![b'a'; ERROR_BODY_MAX_BYTES + 10];
        let excerpt = body_excerpt(&long);
        assert!(excerpt.ends_with(" …"));
        assert!(excerpt.len() <= ERROR_BODY_MAX_BYTES + " …".len());
    }

    #[test]
    fn gene_symbol_validation_rejects_query_syntax() {
        assert!(is_valid_gene_symbol("TP53"));
        assert!(is_valid_gene_symbol("HLA-A"));
        assert!(!is_valid_gene_symbol("TP53[Gene Name]"));
        assert!(!is_valid_gene_symbol("TP53 OR BRCA1"));
        assert!(!is_valid_gene_symbol(""));
    }

    #[tokio::test]
    async fn no_cache_scope_is_visible_to_current_task() {
        assert!(!current_no_cache());
        let seen = with_no_cache(true, async { current_no_cache() }).await;
        assert!(seen);
    }
}
