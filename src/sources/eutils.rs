use std::borrow::Cow;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::SnpFinderError;
use crate::utils::serde::de_opt_u64;

// NCBI Entrez E-utilities
// Docs: https://www.ncbi.nlm.nih.gov/books/NBK25499/
pub(crate) const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
pub(crate) const EUTILS_API: &str = "ncbi-eutils";
const EUTILS_BASE_ENV: &str = "SNPFINDER_EUTILS_BASE";

/// A fully assembled dbSNP esearch request.
///
/// Results are always sorted by `SNP_ID` so that repeating the same query
/// with the same window returns the same page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsearchQuery {
    term: String,
    retstart: u32,
    retmax: u32,
}

impl EsearchQuery {
    pub(crate) fn new(term: String, retstart: u32, retmax: u32) -> Self {
        Self {
            term,
            retstart,
            retmax,
        }
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn retstart(&self) -> u32 {
        self.retstart
    }

    pub fn retmax(&self) -> u32 {
        self.retmax
    }

    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("db", "snp".to_string()),
            ("term", self.term.clone()),
            ("retstart", self.retstart.to_string()),
            ("retmax", self.retmax.to_string()),
            ("retmode", "json".to_string()),
            ("sort", "SNP_ID".to_string()),
        ]
    }
}

#[derive(Clone)]
pub struct EutilsClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    api_key: Option<String>,
}

impl EutilsClient {
    pub fn new() -> Result<Self, SnpFinderError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(EUTILS_BASE, EUTILS_BASE_ENV),
            api_key: crate::sources::ncbi_api_key(),
        })
    }

    pub(crate) fn with_base(base: String, api_key: Option<String>) -> Result<Self, SnpFinderError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
            api_key: api_key
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        req: reqwest_middleware::RequestBuilder,
    ) -> Result<T, SnpFinderError> {
        let resp = crate::sources::apply_cache_mode_with_auth(req, self.api_key.is_some())
            .send()
            .await?;
        let status = resp.status();
        let content_type = resp.headers().get(reqwest::header::CONTENT_TYPE).cloned();
        let bytes = crate::sources::read_limited_body(resp, EUTILS_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(SnpFinderError::Api {
                api: EUTILS_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }
        crate::sources::ensure_json_content_type(EUTILS_API, content_type.as_ref(), &bytes)?;
        serde_json::from_slice(&bytes).map_err(|source| SnpFinderError::ApiJson {
            api: EUTILS_API.to_string(),
            source,
        })
    }

    /// Runs one esearch and returns the raw result block.
    pub async fn esearch(&self, query: &EsearchQuery) -> Result<ESearchResult, SnpFinderError> {
        debug!(term = query.term(), retstart = query.retstart(), retmax = query.retmax(), "dbSNP esearch");
        let req = crate::sources::append_ncbi_api_key(
            self.client
                .get(self.endpoint("esearch.fcgi"))
                .query(&query.pairs()),
            self.api_key.as_deref(),
        );
        let envelope: ESearchEnvelope = self.get_json(req).await?;
        envelope
            .esearchresult
            .ok_or_else(|| SnpFinderError::MissingField {
                api: EUTILS_API.to_string(),
                path: "esearchresult".into(),
            })
    }
}

#[derive(Debug, Deserialize)]
struct ESearchEnvelope {
    #[serde(default)]
    esearchresult: Option<ESearchResult>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ESearchResult {
    #[serde(default)]
    pub idlist: Option<Vec<String>>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub count: Option<u64>,
    #[serde(default, rename = "ERROR")]
    pub error: Option<String>,
    #[serde(default, rename = "querytranslation")]
    pub query_translation: Option<String>,
}
