//! Pipeline workflows: discovery, single-variant summaries and the merged
//! batch table.

pub mod population;
pub mod search;
pub mod session;
pub mod table;
pub mod variant;

use crate::error::SnpFinderError;
use crate::sources::ensembl::EnsemblClient;
use crate::sources::eutils::EutilsClient;

use search::{DiscoveryPage, SearchCriteria};
use table::{GetDataHandle, ResultTable};
use variant::{VariantId, VariantSummary};

/// Upstream clients bundled for the pipeline operations.
#[derive(Clone)]
pub struct Pipeline {
    eutils: EutilsClient,
    ensembl: EnsemblClient,
}

impl Pipeline {
    pub fn new() -> Result<Self, SnpFinderError> {
        Ok(Self {
            eutils: EutilsClient::new()?,
            ensembl: EnsemblClient::new()?,
        })
    }

    /// Points the pipeline at alternative E-utilities and Ensembl bases.
    pub fn with_bases(
        eutils_base: impl Into<String>,
        ensembl_base: impl Into<String>,
    ) -> Result<Self, SnpFinderError> {
        Ok(Self {
            eutils: EutilsClient::with_base(eutils_base.into(), crate::sources::ncbi_api_key())?,
            ensembl: EnsemblClient::with_base(ensembl_base.into())?,
        })
    }

    pub async fn discover(&self, criteria: &SearchCriteria) -> Result<DiscoveryPage, SnpFinderError> {
        search::discover(&self.eutils, criteria).await
    }

    pub async fn summary(&self, id: VariantId) -> Result<VariantSummary, SnpFinderError> {
        variant::summary(&self.ensembl, id).await
    }

    pub async fn get_data(&self, ids: &[VariantId]) -> Result<ResultTable, SnpFinderError> {
        table::get_data(&self.ensembl, ids).await
    }

    /// Starts a "get data" operation in the background.
    pub fn spawn_get_data(&self, ids: Vec<VariantId>) -> GetDataHandle {
        table::spawn_get_data(self.ensembl.clone(), ids)
    }
}
