use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::entities::population::{AlleleFrequency, GenotypeFrequencies, PopulationTable};
use crate::error::SnpFinderError;
use crate::sources::ensembl::{BatchInclude, EnsemblClient, EnsemblVariation};
use crate::transform;

/// dbSNP reference SNP number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariantId(u64);

impl VariantId {
    pub const fn new(number: u64) -> Self {
        Self(number)
    }

    /// `rs`-prefixed form used by Ensembl.
    pub fn rsid(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rs{}", self.0)
    }
}

fn variant_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?i:rs)?(\d+)$").expect("valid regex"))
}

impl FromStr for VariantId {
    type Err = SnpFinderError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        variant_id_re()
            .captures(raw)
            .and_then(|caps| caps[1].parse::<u64>().ok())
            .map(Self)
            .ok_or_else(|| {
                SnpFinderError::InvalidArgument(format!(
                    "Unrecognized variant id '{raw}'. Expected an rsID such as rs1042522 or its number"
                ))
            })
    }
}

impl Serialize for VariantId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Flat summary of one variant's annotations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantSummary {
    pub id: VariantId,
    pub name: String,
    pub minor_allele: Option<String>,
    /// Allele string of the first genomic mapping.
    pub sequence: Option<String>,
    pub genes: Vec<String>,
    pub consequence: Option<String>,
    pub risk_traits: Vec<String>,
    pub other_traits: Vec<String>,
    /// `None` when the record carries no clinical significance at all.
    pub clinical_significance: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhenotypeRow {
    pub id: VariantId,
    pub consequence: Option<String>,
    pub genes: Vec<String>,
    pub risk_traits: Vec<String>,
    pub other_traits: Vec<String>,
    pub clinical_significance: Vec<String>,
}

impl PhenotypeRow {
    pub(crate) fn empty(id: VariantId) -> Self {
        Self {
            id,
            consequence: None,
            genes: Vec::new(),
            risk_traits: Vec::new(),
            other_traits: Vec::new(),
            clinical_significance: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulationRow {
    pub id: VariantId,
    pub chromosome: Option<String>,
    pub position: Option<String>,
    pub minor_allele: Option<String>,
    pub major_allele: Option<String>,
    pub frequencies: PopulationTable<AlleleFrequency>,
}

impl PopulationRow {
    pub(crate) fn empty(id: VariantId) -> Self {
        Self {
            id,
            chromosome: None,
            position: None,
            minor_allele: None,
            major_allele: None,
            frequencies: PopulationTable::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenotypeRow {
    pub id: VariantId,
    pub frequencies: PopulationTable<GenotypeFrequencies>,
}

impl GenotypeRow {
    pub(crate) fn empty(id: VariantId) -> Self {
        Self {
            id,
            frequencies: PopulationTable::default(),
        }
    }
}

/// Rows produced by the batch fetchers, keyed by variant.
pub trait BatchRow {
    fn variant_id(&self) -> VariantId;
}

impl BatchRow for PhenotypeRow {
    fn variant_id(&self) -> VariantId {
        self.id
    }
}

impl BatchRow for PopulationRow {
    fn variant_id(&self) -> VariantId {
        self.id
    }
}

impl BatchRow for GenotypeRow {
    fn variant_id(&self) -> VariantId {
        self.id
    }
}

/// Ascending, duplicate-free id order shared by every batch fetcher.
pub fn canonical_ids(ids: &[VariantId]) -> Vec<VariantId> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn index_batch(raw: HashMap<String, EnsemblVariation>) -> BTreeMap<VariantId, EnsemblVariation> {
    let mut indexed = BTreeMap::new();
    for (key, variation) in raw {
        match key.parse::<VariantId>() {
            Ok(id) => {
                indexed.insert(id, variation);
            }
            Err(_) => warn!(key = key.as_str(), "Skipping batch entry with unparseable id"),
        }
    }
    indexed
}

/// Extract-then-sort step: one row per canonical id, defaulted when the
/// batch response has no entry for it.
fn ordered_rows<R>(
    ids: &[VariantId],
    raw: HashMap<String, EnsemblVariation>,
    include: BatchInclude,
    build: impl Fn(VariantId, Option<&EnsemblVariation>) -> R,
) -> Vec<R> {
    let indexed = index_batch(raw);
    ids.iter()
        .map(|&id| {
            let variation = indexed.get(&id);
            if variation.is_none() {
                warn!(
                    id = %id,
                    source = include.label(),
                    "Variant missing from batch response; using defaults"
                );
            }
            build(id, variation)
        })
        .collect()
}

async fn fetch_rows<R>(
    client: &EnsemblClient,
    ids: &[VariantId],
    include: BatchInclude,
    build: impl Fn(VariantId, Option<&EnsemblVariation>) -> R,
) -> Result<Vec<R>, SnpFinderError> {
    let ids = canonical_ids(ids);
    let rsids = ids.iter().map(|id| id.rsid()).collect::<Vec<_>>();
    let raw = client.variations(&rsids, include).await?;
    debug!(
        source = include.label(),
        requested = ids.len(),
        returned = raw.len(),
        "Batch lookup complete"
    );
    Ok(ordered_rows(&ids, raw, include, build))
}

pub(crate) async fn fetch_phenotypes(
    client: &EnsemblClient,
    ids: &[VariantId],
) -> Result<Vec<PhenotypeRow>, SnpFinderError> {
    fetch_rows(client, ids, BatchInclude::Phenotypes, transform::variant::phenotype_row).await
}

pub(crate) async fn fetch_populations(
    client: &EnsemblClient,
    ids: &[VariantId],
) -> Result<Vec<PopulationRow>, SnpFinderError> {
    fetch_rows(client, ids, BatchInclude::Populations, transform::variant::population_row).await
}

pub(crate) async fn fetch_genotypes(
    client: &EnsemblClient,
    ids: &[VariantId],
) -> Result<Vec<GenotypeRow>, SnpFinderError> {
    fetch_rows(client, ids, BatchInclude::Genotypes, transform::variant::genotype_row).await
}

pub(crate) async fn summary(
    client: &EnsemblClient,
    id: VariantId,
) -> Result<VariantSummary, SnpFinderError> {
    let Some(variation) = client.variation(&id.rsid()).await? else {
        return Err(SnpFinderError::NotFound {
            entity: "variant".into(),
            id: id.rsid(),
            suggestion: "Check the identifier, or discover variants with: snpfinder search --limit 10"
                .into(),
        });
    };
    Ok(transform::variant::summary_from_variation(id, &variation))
}
