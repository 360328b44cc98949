//! Row assembly: the merged per-variant export table and the concurrent
//! fan-out that produces it.

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::entities::population::{AlleleFrequency, GenotypeFrequencies, Population, PopulationTable};
use crate::entities::variant::{
    self, BatchRow, GenotypeRow, PhenotypeRow, PopulationRow, VariantId, canonical_ids,
};
use crate::error::SnpFinderError;
use crate::sources::ensembl::{BatchInclude, EnsemblClient};

pub const NA: &str = "NA";
pub const NOT_SPECIFIED: &str = "Not specified";

const BATCH_SOURCES: usize = 3;

/// One merged export row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantRecord {
    pub id: VariantId,
    pub chromosome: Option<String>,
    pub position: Option<String>,
    pub minor_allele: Option<String>,
    pub major_allele: Option<String>,
    pub allele_frequencies: PopulationTable<AlleleFrequency>,
    pub consequence: Option<String>,
    pub genes: Vec<String>,
    pub risk_traits: Vec<String>,
    pub other_traits: Vec<String>,
    pub clinical_significance: Vec<String>,
    pub genotype_frequencies: PopulationTable<GenotypeFrequencies>,
}

fn text_or_na(value: Option<&str>) -> String {
    value.unwrap_or(NA).to_string()
}

fn frequency_or_na(value: Option<f64>) -> String {
    value.map_or_else(|| NA.to_string(), |v| v.to_string())
}

fn joined_or_default(values: &[String], separator: &str) -> String {
    if values.is_empty() {
        NOT_SPECIFIED.to_string()
    } else {
        values.join(separator)
    }
}

impl VariantRecord {
    fn from_rows(population: PopulationRow, phenotype: PhenotypeRow, genotype: GenotypeRow) -> Self {
        Self {
            id: population.id,
            chromosome: population.chromosome,
            position: population.position,
            minor_allele: population.minor_allele,
            major_allele: population.major_allele,
            allele_frequencies: population.frequencies,
            consequence: phenotype.consequence,
            genes: phenotype.genes,
            risk_traits: phenotype.risk_traits,
            other_traits: phenotype.other_traits,
            clinical_significance: phenotype.clinical_significance,
            genotype_frequencies: genotype.frequencies,
        }
    }

    /// String cells in [`ResultTable::columns`] order.
    pub fn cells(&self) -> Vec<String> {
        let mut cells = Vec::with_capacity(ResultTable::COLUMN_COUNT);
        cells.push(self.id.rsid());
        cells.push(text_or_na(self.chromosome.as_deref()));
        cells.push(text_or_na(self.position.as_deref()));
        cells.push(text_or_na(self.minor_allele.as_deref()));
        cells.push(text_or_na(self.major_allele.as_deref()));
        for population in Population::TABLE_ORDER {
            let frequency = self.allele_frequencies[population];
            cells.push(frequency_or_na(frequency.minor));
            cells.push(frequency_or_na(frequency.major));
        }
        cells.push(
            self.consequence
                .clone()
                .unwrap_or_else(|| NOT_SPECIFIED.to_string()),
        );
        cells.push(joined_or_default(&self.genes, ", "));
        // No phenotype annotation leaves the trait cells blank.
        cells.push(self.risk_traits.join("; "));
        cells.push(self.other_traits.join("; "));
        cells.push(joined_or_default(&self.clinical_significance, ", "));
        for population in Population::TABLE_ORDER {
            let genotypes = self.genotype_frequencies[population];
            cells.push(genotypes.heterozygous.to_string());
            cells.push(genotypes.minor_homozygous.to_string());
            cells.push(genotypes.major_homozygous.to_string());
        }
        cells
    }
}

/// Merged rows in ascending id order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResultTable {
    pub records: Vec<VariantRecord>,
}

impl ResultTable {
    pub const COLUMN_COUNT: usize = 40;

    pub fn columns() -> Vec<String> {
        let mut columns = ["SNP", "Chromosome", "Position", "Minor allele", "Major allele"]
            .map(String::from)
            .to_vec();
        for population in Population::TABLE_ORDER {
            let name = population.display_name();
            columns.push(format!("{name} minor allele frequency"));
            columns.push(format!("{name} major allele frequency"));
        }
        columns.extend(
            [
                "Function",
                "Gene",
                "Minor allele traits",
                "Major allele traits",
                "Clinical Significance",
            ]
            .map(String::from),
        );
        for population in Population::TABLE_ORDER {
            let name = population.display_name();
            columns.push(format!("{name} heterozygous"));
            columns.push(format!("{name} minor allele homozygous"));
            columns.push(format!("{name} major allele homozygous"));
        }
        columns
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<VariantId> {
        self.records.iter().map(|r| r.id).collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        self.records.iter().map(VariantRecord::cells)
    }
}

fn misaligned(reason: String) -> SnpFinderError {
    SnpFinderError::PartialBatch {
        failed: "row alignment".into(),
        reason,
    }
}

fn check_order<R: BatchRow>(
    ids: &[VariantId],
    rows: &[R],
    include: BatchInclude,
) -> Result<(), SnpFinderError> {
    if rows.len() != ids.len() {
        return Err(misaligned(format!(
            "{} returned {} rows for {} variants",
            include.label(),
            rows.len(),
            ids.len()
        )));
    }
    if let Some((expected, row)) = ids
        .iter()
        .zip(rows)
        .find(|(expected, row)| row.variant_id() != **expected)
    {
        return Err(misaligned(format!(
            "{} row for {} found where {expected} was expected",
            include.label(),
            row.variant_id()
        )));
    }
    Ok(())
}

/// Zips the three per-variant row sequences into one table.
///
/// Every sequence must hold exactly one row per id in ascending id order;
/// anything else is reported as a batch failure and nothing is merged.
pub fn merge(
    ids: &[VariantId],
    populations: Vec<PopulationRow>,
    phenotypes: Vec<PhenotypeRow>,
    genotypes: Vec<GenotypeRow>,
) -> Result<ResultTable, SnpFinderError> {
    let ids = canonical_ids(ids);
    check_order(&ids, &populations, BatchInclude::Populations)?;
    check_order(&ids, &phenotypes, BatchInclude::Phenotypes)?;
    check_order(&ids, &genotypes, BatchInclude::Genotypes)?;

    let records = populations
        .into_iter()
        .zip(phenotypes)
        .zip(genotypes)
        .map(|((population, phenotype), genotype)| {
            VariantRecord::from_rows(population, phenotype, genotype)
        })
        .collect();
    Ok(ResultTable { records })
}

fn batch_failure(failures: Vec<(BatchInclude, SnpFinderError)>) -> SnpFinderError {
    let failed = failures
        .iter()
        .map(|(include, _)| include.label())
        .collect::<Vec<_>>()
        .join(", ");
    let reason = failures
        .iter()
        .map(|(include, err)| format!("{}: {err}", include.label()))
        .collect::<Vec<_>>()
        .join("; ");

    // Nothing succeeded, so the underlying error describes the outcome best.
    if failures.len() == BATCH_SOURCES
        && let Some((_, err)) = failures.into_iter().next()
    {
        return err;
    }
    SnpFinderError::PartialBatch { failed, reason }
}

/// Runs the population, phenotype and genotype lookups concurrently and
/// merges them once all three have finished.
pub(crate) async fn get_data(
    client: &EnsemblClient,
    ids: &[VariantId],
) -> Result<ResultTable, SnpFinderError> {
    let ids = canonical_ids(ids);
    if ids.is_empty() {
        return Err(SnpFinderError::InvalidArgument(
            "No variants selected. Provide at least one rsID.".into(),
        ));
    }
    debug!(variants = ids.len(), "Fetching batch data");

    let (populations, phenotypes, genotypes) = tokio::join!(
        variant::fetch_populations(client, &ids),
        variant::fetch_phenotypes(client, &ids),
        variant::fetch_genotypes(client, &ids),
    );

    let table = match (populations, phenotypes, genotypes) {
        (Ok(populations), Ok(phenotypes), Ok(genotypes)) => {
            merge(&ids, populations, phenotypes, genotypes)?
        }
        (populations, phenotypes, genotypes) => {
            let failures = [
                (BatchInclude::Populations, populations.err()),
                (BatchInclude::Phenotypes, phenotypes.err()),
                (BatchInclude::Genotypes, genotypes.err()),
            ]
            .into_iter()
            .filter_map(|(include, err)| err.map(|err| (include, err)))
            .collect::<Vec<_>>();
            return Err(batch_failure(failures));
        }
    };

    info!(rows = table.len(), "Result table assembled");
    Ok(table)
}

/// In-flight "get data" operation.
pub struct GetDataHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<ResultTable, SnpFinderError>>,
}

impl GetDataHandle {
    /// Stops the operation before its merge; no table is produced.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn join(self) -> Result<ResultTable, SnpFinderError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(SnpFinderError::Cancelled {
                operation: "get data".into(),
            }),
        }
    }
}

pub(crate) fn spawn_get_data(client: EnsemblClient, ids: Vec<VariantId>) -> GetDataHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let no_cache = crate::sources::current_no_cache();

    let task = tokio::spawn(crate::sources::with_no_cache(no_cache, async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(SnpFinderError::Cancelled {
                operation: "get data".into(),
            }),
            result = get_data(&client, &ids) => result,
        }
    }));

    GetDataHandle { cancel, task }
}
