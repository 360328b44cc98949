use std::borrow::Cow;
use std::collections::HashMap;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SnpFinderError;
use crate::utils::serde::{StringOrVec, de_opt_f64, null_as_default};

// Ensembl REST variation endpoints
// Docs: https://rest.ensembl.org/documentation/info/variation_id
pub(crate) const ENSEMBL_BASE: &str = "https://rest.ensembl.org";
const ENSEMBL_API: &str = "ensembl";
const ENSEMBL_BASE_ENV: &str = "SNPFINDER_ENSEMBL_BASE";

/// Maximum number of ids Ensembl accepts in one variation POST.
pub(crate) const ENSEMBL_POST_MAX_IDS: usize = 200;

/// Which expansion a batch variation lookup asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchInclude {
    Phenotypes,
    Populations,
    Genotypes,
}

impl BatchInclude {
    fn query_flag(self) -> &'static str {
        match self {
            Self::Phenotypes => "phenotypes",
            Self::Populations => "pops",
            Self::Genotypes => "population_genotypes",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Phenotypes => "phenotypes",
            Self::Populations => "populations",
            Self::Genotypes => "genotypes",
        }
    }
}

#[derive(Clone)]
pub struct EnsemblClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    ids: &'a [String],
}

impl EnsemblClient {
    pub fn new() -> Result<Self, SnpFinderError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(ENSEMBL_BASE, ENSEMBL_BASE_ENV),
        })
    }

    pub(crate) fn with_base(base: String) -> Result<Self, SnpFinderError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest_middleware::RequestBuilder,
        missing_is_none: bool,
    ) -> Result<Option<T>, SnpFinderError> {
        let resp = crate::sources::apply_cache_mode(req).send().await?;
        let status = resp.status();
        let content_type = resp.headers().get(CONTENT_TYPE).cloned();
        let bytes = crate::sources::read_limited_body(resp, ENSEMBL_API).await?;

        if missing_is_none && is_missing_variation(status, &bytes) {
            return Ok(None);
        }

        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(SnpFinderError::Api {
                api: ENSEMBL_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }

        crate::sources::ensure_json_content_type(ENSEMBL_API, content_type.as_ref(), &bytes)?;

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SnpFinderError::ApiJson {
                api: ENSEMBL_API.to_string(),
                source,
            })
    }

    /// Single-variant lookup with phenotype annotations.
    ///
    /// Returns `Ok(None)` when Ensembl has no record for the id.
    pub async fn variation(&self, rsid: &str) -> Result<Option<EnsemblVariation>, SnpFinderError> {
        let url = self.endpoint(&format!("variation/human/{rsid}"));
        let req = self
            .client
            .get(&url)
            .query(&[("phenotypes", "1")])
            .header(CONTENT_TYPE, "application/json");
        self.send_json(req, true).await
    }

    /// Batch lookup keyed by the id strings Ensembl echoes back.
    ///
    /// Requests larger than [`ENSEMBL_POST_MAX_IDS`] are split into several
    /// POSTs and the per-chunk mappings merged. Ids Ensembl does not know are
    /// simply absent from the returned map.
    pub async fn variations(
        &self,
        rsids: &[String],
        include: BatchInclude,
    ) -> Result<HashMap<String, EnsemblVariation>, SnpFinderError> {
        let mut merged: HashMap<String, EnsemblVariation> = HashMap::with_capacity(rsids.len());
        let url = self.endpoint("variation/homo_sapiens");

        for chunk in rsids.chunks(ENSEMBL_POST_MAX_IDS) {
            debug!(include = include.label(), ids = chunk.len(), "Ensembl batch lookup");
            let req = self
                .client
                .post(&url)
                .query(&[(include.query_flag(), "1")])
                .header(ACCEPT, "application/json")
                .json(&BatchRequest { ids: chunk });
            let part: Option<HashMap<String, EnsemblVariation>> = self.send_json(req, false).await?;
            merged.extend(part.unwrap_or_default());
        }

        Ok(merged)
    }
}

fn is_missing_variation(status: reqwest::StatusCode, body: &[u8]) -> bool {
    if status == reqwest::StatusCode::NOT_FOUND {
        return true;
    }
    if status != reqwest::StatusCode::BAD_REQUEST {
        return false;
    }
    // Ensembl answers unknown ids with 400 and {"error":"No variation found for ID ..."}.
    let text = String::from_utf8_lossy(body).to_ascii_lowercase();
    text.contains("no variation found") || text.contains("not found")
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EnsemblVariation {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mappings: Vec<EnsemblMapping>,
    #[serde(default)]
    pub minor_allele: Option<String>,
    #[serde(default)]
    pub most_severe_consequence: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub phenotypes: Vec<EnsemblPhenotype>,
    #[serde(default)]
    pub clinical_significance: Option<Vec<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub populations: Vec<EnsemblPopulationFrequency>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub population_genotypes: Vec<EnsemblPopulationGenotype>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EnsemblMapping {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub allele_string: Option<String>,
    #[serde(default)]
    pub ancestral_allele: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EnsemblPhenotype {
    #[serde(default)]
    pub risk_allele: Option<String>,
    #[serde(default, rename = "trait")]
    pub trait_name: Option<String>,
    #[serde(default)]
    pub genes: StringOrVec,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EnsemblPopulationFrequency {
    #[serde(default)]
    pub population: Option<String>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub frequency: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EnsemblPopulationGenotype {
    #[serde(default)]
    pub population: Option<String>,
    #[serde(default)]
    pub genotype: Option<String>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub frequency: Option<f64>,
}
