//! Upstream readiness check built from the pipeline's own requests.

use std::time::Instant;

use serde::Serialize;

use crate::entities::search::{SearchCriteria, discover};
use crate::error::SnpFinderError;
use crate::sources::ensembl::{BatchInclude, ENSEMBL_BASE, EnsemblClient};
use crate::sources::eutils::{EUTILS_BASE, EutilsClient};

/// Well-annotated variant (APOE) used for the batch lookup.
const REFERENCE_RSID: &str = "rs7412";

#[derive(Debug, Clone, Serialize)]
pub struct HealthRow {
    pub check: String,
    pub status: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: usize,
    pub total: usize,
    pub rows: Vec<HealthRow>,
}

impl HealthReport {
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# SNP Finder Health Check\n\n");
        out.push_str("| Check | Status | Detail |\n");
        out.push_str("|-------|--------|--------|\n");
        for row in &self.rows {
            out.push_str(&format!("| {} | {} | {} |\n", row.check, row.status, row.detail));
        }
        out.push_str(&format!(
            "\nStatus: {}/{} checks healthy\n",
            self.healthy, self.total
        ));
        out
    }
}

async fn timed<T, F>(check: &str, fut: F, describe: impl FnOnce(&T) -> String) -> HealthRow
where
    F: Future<Output = Result<T, SnpFinderError>>,
{
    let start = Instant::now();
    let result = fut.await;
    let ms = start.elapsed().as_millis();
    let (status, detail) = match result {
        Ok(value) => ("ok", format!("{} ({ms}ms)", describe(&value))),
        Err(err) => ("error", format!("{:?} ({ms}ms)", err.category())),
    };
    HealthRow {
        check: check.to_string(),
        status: status.to_string(),
        detail,
    }
}

/// One-row discovery with the default filters, envelope fully validated.
async fn check_dbsnp(client: &EutilsClient) -> Result<u64, SnpFinderError> {
    discover(client, &SearchCriteria::new(1))
        .await
        .map(|page| page.total)
}

/// Population lookup for the reference variant via the batch POST endpoint.
async fn check_ensembl(client: &EnsemblClient) -> Result<usize, SnpFinderError> {
    let ids = [REFERENCE_RSID.to_string()];
    let records = client.variations(&ids, BatchInclude::Populations).await?;
    let record = records
        .get(REFERENCE_RSID)
        .ok_or_else(|| SnpFinderError::MissingField {
            api: "ensembl".into(),
            path: REFERENCE_RSID.into(),
        })?;
    Ok(record.populations.len())
}

async fn check_bases(
    eutils_base: &str,
    ensembl_base: &str,
) -> Result<HealthReport, SnpFinderError> {
    let eutils = EutilsClient::with_base(eutils_base.to_string(), crate::sources::ncbi_api_key())?;
    let ensembl = EnsemblClient::with_base(ensembl_base.to_string())?;

    let (dbsnp, batch) = tokio::join!(
        timed("dbSNP esearch", check_dbsnp(&eutils), |total| {
            format!("{total} SNPs match the default query")
        }),
        timed("Ensembl variation POST", check_ensembl(&ensembl), |count| {
            format!("{REFERENCE_RSID}: {count} population frequencies")
        }),
    );

    let rows = vec![dbsnp, batch];
    let healthy = rows.iter().filter(|r| r.status == "ok").count();
    Ok(HealthReport {
        healthy,
        total: rows.len(),
        rows,
    })
}

/// Runs one discovery and one batch lookup against the configured upstreams,
/// bypassing the HTTP cache.
///
/// # Errors
///
/// Returns an error only when the HTTP clients cannot be created. Upstream
/// failures are reported as rows.
pub async fn check() -> Result<HealthReport, SnpFinderError> {
    let eutils = crate::sources::env_base(EUTILS_BASE, "SNPFINDER_EUTILS_BASE");
    let ensembl = crate::sources::env_base(ENSEMBL_BASE, "SNPFINDER_ENSEMBL_BASE");
    crate::sources::with_no_cache(true, check_bases(&eutils, &ensembl)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_esearch(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .and(query_param("db", "snp"))
            .and(query_param("retmax", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn reports_both_pipeline_requests() {
        let server = MockServer::start().await;
        mount_esearch(
            &server,
            serde_json::json!({"esearchresult": {"count": "812", "idlist": ["3"]}}),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/variation/homo_sapiens"))
            .and(query_param("pops", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "rs7412": {"populations": [
                    {"population": "1000GENOMES:phase_3:ALL", "frequency": 0.92},
                    {"population": "1000GENOMES:phase_3:EUR", "frequency": 0.94}
                ]}
            })))
            .mount(&server)
            .await;

        let report = check_bases(&server.uri(), &server.uri()).await.unwrap();
        assert_eq!((report.healthy, report.total), (2, 2));
        assert!(report.rows[0].detail.starts_with("812 SNPs"));
        assert!(report.rows[1].detail.starts_with("rs7412: 2 population"));
    }

    #[tokio::test]
    async fn malformed_envelope_and_missing_record_are_unhealthy() {
        let server = MockServer::start().await;
        mount_esearch(&server, serde_json::json!({"esearchresult": {"count": "1"}})).await;
        Mock::given(method("POST"))
            .and(path("/variation/homo_sapiens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let report = check_bases(&server.uri(), &server.uri()).await.unwrap();
        assert_eq!(report.healthy, 0);
        assert!(report.rows.iter().all(|r| r.detail.starts_with("UpstreamFormat")));

        let md = report.to_markdown();
        assert!(md.contains("| Ensembl variation POST | error |"));
        assert!(md.contains("Status: 0/2 checks healthy"));
    }
}
