//! Variant discovery against dbSNP: criteria, locus classification, query
//! assembly and the sorted id page.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info};

use crate::entities::variant::VariantId;
use crate::error::SnpFinderError;
use crate::sources::eutils::{ESearchResult, EUTILS_API, EutilsClient};

pub use crate::sources::eutils::EsearchQuery;

const BASE_CLAUSES: &str = "1000genomes has frequency filter[Filter] AND snv[SNP Class]";
const COMMON_BAND: &str = "AND 00000.0100: 00001.0000[GLOBAL_MAF]";
const NONZERO_FREQUENCY: &str = "NOT 00000.0000[Global Minor Allele Frequency]";

/// Placeholder text shown in an untouched locus field.
const LOCUS_PLACEHOLDER: &str = "(optional)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClinicalFilter {
    #[default]
    NoFiltering,
    Benign,
    BenignLikelyBenign,
    LikelyBenign,
    Pathogenic,
    PathogenicLikelyPathogenic,
    LikelyPathogenic,
    ConflictingInterpretations,
    DrugResponse,
    Protective,
    RiskFactor,
    UncertainSignificance,
}

impl ClinicalFilter {
    pub const VALUES: [ClinicalFilter; 12] = [
        Self::NoFiltering,
        Self::Benign,
        Self::BenignLikelyBenign,
        Self::LikelyBenign,
        Self::Pathogenic,
        Self::PathogenicLikelyPathogenic,
        Self::LikelyPathogenic,
        Self::ConflictingInterpretations,
        Self::DrugResponse,
        Self::Protective,
        Self::RiskFactor,
        Self::UncertainSignificance,
    ];

    /// Category text as dbSNP indexes it, `None` for no filtering.
    pub fn term(self) -> Option<&'static str> {
        match self {
            Self::NoFiltering => None,
            Self::Benign => Some("benign"),
            Self::BenignLikelyBenign => Some("benign likely benign"),
            Self::LikelyBenign => Some("likely benign"),
            Self::Pathogenic => Some("pathogenic"),
            Self::PathogenicLikelyPathogenic => Some("pathogenic likely pathogenic"),
            Self::LikelyPathogenic => Some("likely pathogenic"),
            Self::ConflictingInterpretations => {
                Some("conflicting interpretations of pathogenicity")
            }
            Self::DrugResponse => Some("drug response"),
            Self::Protective => Some("protective"),
            Self::RiskFactor => Some("risk factor"),
            Self::UncertainSignificance => Some("uncertain significance"),
        }
    }

    pub fn label(self) -> &'static str {
        self.term().unwrap_or("No Filtering")
    }
}

impl fmt::Display for ClinicalFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn normalize_filter_key(value: &str) -> String {
    value
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-' || c == '/' || c == ',')
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

impl FromStr for ClinicalFilter {
    type Err = SnpFinderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = normalize_filter_key(value);
        if key.is_empty() || matches!(key.as_str(), "no filtering" | "none" | "any") {
            return Ok(Self::NoFiltering);
        }
        Self::VALUES
            .into_iter()
            .find(|filter| filter.term() == Some(key.as_str()))
            .ok_or_else(|| {
                let options = Self::VALUES
                    .iter()
                    .map(|f| format!("- {}", f.label()))
                    .collect::<Vec<_>>()
                    .join("\n");
                SnpFinderError::InvalidArgument(format!(
                    "Unknown clinical significance filter '{}'. Expected one of:\n{options}",
                    value.trim()
                ))
            })
    }
}

/// Locus restriction, classified once from the user's free-text token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locus {
    Default,
    Chromosome(String),
    Gene(String),
    Region { chrom: String, start: u64, end: u64 },
}

impl Locus {
    fn clause(&self) -> Option<String> {
        match self {
            Self::Default => None,
            Self::Chromosome(chrom) => Some(format!("{chrom}[Chromosome]")),
            Self::Gene(gene) => Some(format!("{gene}[Gene Name]")),
            Self::Region { chrom, start, end } => Some(format!(
                "({chrom}[Chromosome] AND ({start}[CHRPOS] : {end}[CHRPOS]))"
            )),
        }
    }
}

fn is_chromosome_token(token: &str) -> bool {
    token == "X" || token == "Y" || (!token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()))
}

fn parse_coordinate(raw: &str, what: &str, locus: &str) -> Result<u64, SnpFinderError> {
    raw.trim().parse::<u64>().map_err(|_| {
        SnpFinderError::InvalidArgument(format!(
            "Region '{locus}' has a non-numeric {what} position. Expected chrom:start-end, e.g. 8:1-50000"
        ))
    })
}

/// Classifies a locus token by its shape.
///
/// Digits, `X` and `Y` name a chromosome; `chrom:start-end` names a region;
/// anything else without a `:` is taken as a gene symbol.
pub fn classify_locus(raw: &str) -> Result<Locus, SnpFinderError> {
    let token = raw.trim();
    if token.is_empty() || token == LOCUS_PLACEHOLDER {
        return Ok(Locus::Default);
    }
    if is_chromosome_token(token) {
        return Ok(Locus::Chromosome(token.to_string()));
    }

    if let Some((chrom, range)) = token.split_once(':') {
        let Some((start, end)) = range.split_once('-') else {
            return Err(SnpFinderError::InvalidArgument(format!(
                "Unrecognized locus '{token}'. A region needs both ':' and '-', e.g. 8:1-50000"
            )));
        };
        let chrom = chrom.trim();
        if chrom.is_empty() || !chrom.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SnpFinderError::InvalidArgument(format!(
                "Region '{token}' has an invalid chromosome. Expected chrom:start-end, e.g. 8:1-50000"
            )));
        }
        let start = parse_coordinate(start, "start", token)?;
        let end = parse_coordinate(end, "end", token)?;
        if start > end {
            return Err(SnpFinderError::InvalidArgument(format!(
                "Region '{token}' starts after it ends"
            )));
        }
        return Ok(Locus::Region {
            chrom: chrom.to_string(),
            start,
            end,
        });
    }

    if !crate::sources::is_valid_gene_symbol(token) {
        return Err(SnpFinderError::InvalidArgument(format!(
            "Unrecognized locus '{token}'. Use a chromosome (8, X), a gene symbol (TP53) or a region (8:1-50000)"
        )));
    }
    Ok(Locus::Gene(token.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchCriteria {
    pub row_offset: u32,
    pub row_limit: u32,
    pub locus: String,
    pub clinical_filter: ClinicalFilter,
    pub common_only: bool,
}

impl SearchCriteria {
    pub fn new(row_limit: u32) -> Self {
        Self {
            row_limit,
            ..Self::default()
        }
    }
}

/// Assembles the esearch request for a set of criteria. No I/O.
pub fn build_query(criteria: &SearchCriteria) -> Result<EsearchQuery, SnpFinderError> {
    if criteria.row_limit == 0 {
        return Err(SnpFinderError::InvalidArgument(
            "--limit must be greater than 0".into(),
        ));
    }
    let locus = classify_locus(&criteria.locus)?;

    let mut term = String::from(BASE_CLAUSES);
    term.push(' ');
    term.push_str(if criteria.common_only {
        COMMON_BAND
    } else {
        NONZERO_FREQUENCY
    });

    let clauses = [
        criteria
            .clinical_filter
            .term()
            .map(|t| format!("{t}[Clinical Significance]")),
        locus.clause(),
    ];
    for clause in clauses.into_iter().flatten() {
        term.push_str(" AND ");
        term.push_str(&clause);
    }

    Ok(EsearchQuery::new(term, criteria.row_offset, criteria.row_limit))
}

/// One discovery page: ascending ids plus the upstream hit count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryPage {
    pub ids: Vec<VariantId>,
    pub total: u64,
}

impl DiscoveryPage {
    pub fn status_line(&self) -> String {
        format!("SNPs: {}/{}", self.ids.len(), self.total)
    }
}

fn page_from_result(result: ESearchResult) -> Result<DiscoveryPage, SnpFinderError> {
    if let Some(message) = result.error.filter(|m| !m.trim().is_empty()) {
        return Err(SnpFinderError::UnexpectedValue {
            api: EUTILS_API.to_string(),
            path: "esearchresult.ERROR".into(),
            value: message,
        });
    }
    let raw_ids = result.idlist.ok_or_else(|| SnpFinderError::MissingField {
        api: EUTILS_API.to_string(),
        path: "esearchresult.idlist".into(),
    })?;
    let total = result.count.ok_or_else(|| SnpFinderError::MissingField {
        api: EUTILS_API.to_string(),
        path: "esearchresult.count".into(),
    })?;

    let mut ids = raw_ids
        .iter()
        .map(|raw| {
            raw.parse::<VariantId>()
                .map_err(|_| SnpFinderError::UnexpectedValue {
                    api: EUTILS_API.to_string(),
                    path: "esearchresult.idlist".into(),
                    value: raw.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    ids.sort_unstable();
    ids.dedup();

    Ok(DiscoveryPage { ids, total })
}

pub(crate) async fn discover(
    client: &EutilsClient,
    criteria: &SearchCriteria,
) -> Result<DiscoveryPage, SnpFinderError> {
    let query = build_query(criteria)?;
    let result = client.esearch(&query).await?;
    if let Some(translation) = result.query_translation.as_deref() {
        debug!(translation, "dbSNP query translation");
    }
    let page = page_from_result(result)?;
    info!("{}", page.status_line());
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn criteria(locus: &str) -> SearchCriteria {
        SearchCriteria {
            row_offset: 0,
            row_limit: 5,
            locus: locus.to_string(),
            clinical_filter: ClinicalFilter::NoFiltering,
            common_only: true,
        }
    }

    #[test]
    fn classify_locus_by_shape() {
        assert_eq!(classify_locus("8").unwrap(), Locus::Chromosome("8".into()));
        assert_eq!(classify_locus("X").unwrap(), Locus::Chromosome("X".into()));
        assert_eq!(classify_locus("TP53").unwrap(), Locus::Gene("TP53".into()));
        assert_eq!(
            classify_locus("8:1-50000").unwrap(),
            Locus::Region {
                chrom: "8".into(),
                start: 1,
                end: 50000
            }
        );
        assert_eq!(classify_locus("").unwrap(), Locus::Default);
        assert_eq!(classify_locus("(optional)").unwrap(), Locus::Default);
    }

    #[test]
    fn classify_locus_rejects_incomplete_region() {
        let err = classify_locus("8:1").unwrap_err();
        assert!(matches!(err, SnpFinderError::InvalidArgument(_)));
        assert!(err.to_string().contains("8:1"));

        assert!(classify_locus("8:a-10").is_err());
        assert!(classify_locus(":1-10").is_err());
        assert!(classify_locus("8:10-1").is_err());
        assert!(classify_locus("TP53 OR BRCA1").is_err());
    }

    #[test]
    fn build_query_rejects_zero_limit() {
        let mut c = criteria("");
        c.row_limit = 0;
        let err = build_query(&c).unwrap_err();
        assert!(err.to_string().contains("--limit"));
    }

    #[test]
    fn build_query_carries_window_exactly() {
        for (offset, limit) in [(0, 1), (20, 5), (4_000_000, 10_000)] {
            let mut c = criteria("TP53");
            c.row_offset = offset;
            c.row_limit = limit;
            let query = build_query(&c).unwrap();
            assert_eq!(query.retstart(), offset);
            assert_eq!(query.retmax(), limit);
        }
    }

    #[test]
    fn build_query_common_band_and_nonzero_frequency() {
        let common = build_query(&criteria("")).unwrap();
        assert_eq!(
            common.term(),
            "1000genomes has frequency filter[Filter] AND snv[SNP Class] AND 00000.0100: 00001.0000[GLOBAL_MAF]"
        );

        let mut c = criteria("");
        c.common_only = false;
        let any = build_query(&c).unwrap();
        assert_eq!(
            any.term(),
            "1000genomes has frequency filter[Filter] AND snv[SNP Class] NOT 00000.0000[Global Minor Allele Frequency]"
        );
    }

    #[test]
    fn build_query_tags_every_clause() {
        let mut c = criteria("8:1-50000");
        c.clinical_filter = ClinicalFilter::BenignLikelyBenign;
        let query = build_query(&c).unwrap();
        assert!(query.term().ends_with(
            "AND benign likely benign[Clinical Significance] AND (8[Chromosome] AND (1[CHRPOS] : 50000[CHRPOS]))"
        ));

        let query = build_query(&criteria("X")).unwrap();
        assert!(query.term().ends_with("AND X[Chromosome]"));

        let query = build_query(&criteria("BRCA1")).unwrap();
        assert!(query.term().ends_with("AND BRCA1[Gene Name]"));
    }

    #[test]
    fn clinical_filter_parses_leniently() {
        assert_eq!(
            "Drug_Response".parse::<ClinicalFilter>().unwrap(),
            ClinicalFilter::DrugResponse
        );
        assert_eq!(
            "benign-likely-benign".parse::<ClinicalFilter>().unwrap(),
            ClinicalFilter::BenignLikelyBenign
        );
        assert_eq!(
            "No Filtering".parse::<ClinicalFilter>().unwrap(),
            ClinicalFilter::NoFiltering
        );
        assert_eq!("".parse::<ClinicalFilter>().unwrap(), ClinicalFilter::NoFiltering);
        let err = "harmless".parse::<ClinicalFilter>().unwrap_err();
        assert!(err.to_string().contains("risk factor"));
    }

    #[test]
    fn page_sorts_ids_numerically() {
        let page = page_from_result(ESearchResult {
            idlist: Some(vec!["10".into(), "3".into(), "7".into()]),
            count: Some(3),
            ..ESearchResult::default()
        })
        .unwrap();
        assert_eq!(
            page.ids,
            vec![VariantId::new(3), VariantId::new(7), VariantId::new(10)]
        );
        assert_eq!(page.total, 3);
    }

    #[test]
    fn page_reports_missing_fields_by_path() {
        let err = page_from_result(ESearchResult {
            count: Some(3),
            ..ESearchResult::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("esearchresult.idlist"));

        let err = page_from_result(ESearchResult {
            idlist: Some(vec![]),
            ..ESearchResult::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("esearchresult.count"));

        let err = page_from_result(ESearchResult {
            error: Some("Invalid query".into()),
            ..ESearchResult::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("Invalid query"));
        assert_eq!(err.category(), crate::error::ErrorCategory::UpstreamFormat);
    }

    #[test]
    fn page_rejects_non_numeric_ids_as_format_errors() {
        let err = page_from_result(ESearchResult {
            idlist: Some(vec!["12".into(), "abc".into()]),
            count: Some(2),
            ..ESearchResult::default()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            SnpFinderError::UnexpectedValue { ref path, ref value, .. }
                if path == "esearchresult.idlist" && value == "abc"
        ));
        assert_eq!(err.category(), crate::error::ErrorCategory::UpstreamFormat);
    }

    #[tokio::test]
    async fn discover_reports_page_size_against_total() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .and(query_param("retstart", "0"))
            .and(query_param("retmax", "5"))
            .and(query_param("sort", "SNP_ID"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "esearchresult": {
                    "count": "120",
                    "idlist": ["99", "12", "5000", "7", "431"]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = EutilsClient::with_base(server.uri(), None).unwrap();
        let page = discover(&client, &criteria("")).await.unwrap();

        assert_eq!(page.status_line(), "SNPs: 5/120");
        assert_eq!(page.ids.len(), 5);
        assert!(page.ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn discover_validates_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = EutilsClient::with_base(server.uri(), None).unwrap();
        let err = discover(&client, &criteria("8:1")).await.unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Configuration);
    }
}
