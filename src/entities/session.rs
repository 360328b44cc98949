//! Interactive state: the discovered id list, the user's selection and the
//! last assembled table.

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::entities::Pipeline;
use crate::entities::search::{DiscoveryPage, SearchCriteria};
use crate::entities::table::ResultTable;
use crate::entities::variant::{VariantId, VariantSummary};
use crate::error::SnpFinderError;

#[derive(Debug, Default)]
struct SessionState {
    discovered: Vec<VariantId>,
    selected: Vec<VariantId>,
    table: Option<ResultTable>,
    status: Option<String>,
    /// Bumped by `clear` so that a fetch started earlier cannot repopulate
    /// the table afterwards.
    generation: u64,
}

/// Shared by a UI layer; every method takes `&self`.
///
/// At most one "get data" operation runs per session. Discovery and
/// summaries are independent and may overlap with it.
pub struct Session {
    pipeline: Pipeline,
    state: Mutex<SessionState>,
    fetch_gate: Mutex<()>,
}

impl Session {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            state: Mutex::new(SessionState::default()),
            fetch_gate: Mutex::new(()),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Runs discovery and replaces the id list. On failure nothing changes.
    pub async fn retrieve(&self, criteria: &SearchCriteria) -> Result<DiscoveryPage, SnpFinderError> {
        let page = self.pipeline.discover(criteria).await?;
        let mut state = self.state.lock().await;
        state.discovered = page.ids.clone();
        state.status = Some(page.status_line());
        Ok(page)
    }

    pub async fn summary(&self, id: VariantId) -> Result<VariantSummary, SnpFinderError> {
        self.pipeline.summary(id).await
    }

    pub async fn discovered(&self) -> Vec<VariantId> {
        self.state.lock().await.discovered.clone()
    }

    pub async fn selection(&self) -> Vec<VariantId> {
        self.state.lock().await.selected.clone()
    }

    pub async fn status(&self) -> Option<String> {
        self.state.lock().await.status.clone()
    }

    pub async fn table(&self) -> Option<ResultTable> {
        self.state.lock().await.table.clone()
    }

    /// Returns `false` if the id was already selected.
    pub async fn select(&self, id: VariantId) -> bool {
        let mut state = self.state.lock().await;
        if state.selected.contains(&id) {
            return false;
        }
        state.selected.push(id);
        true
    }

    pub async fn select_all(&self) {
        let mut state = self.state.lock().await;
        let SessionState {
            discovered,
            selected,
            ..
        } = &mut *state;
        for id in discovered.iter() {
            if !selected.contains(id) {
                selected.push(*id);
            }
        }
    }

    pub async fn deselect(&self, id: VariantId) -> bool {
        let mut state = self.state.lock().await;
        let before = state.selected.len();
        state.selected.retain(|selected| *selected != id);
        state.selected.len() != before
    }

    pub async fn clear_selection(&self) {
        self.state.lock().await.selected.clear();
    }

    /// Fetches and merges the selected variants, then replaces the table.
    ///
    /// Cancelling `cancel` or failing any of the three lookups leaves the
    /// previous table in place.
    pub async fn get_data(&self, cancel: CancellationToken) -> Result<ResultTable, SnpFinderError> {
        let _gate = self.fetch_gate.lock().await;
        let (ids, generation) = {
            let state = self.state.lock().await;
            (state.selected.clone(), state.generation)
        };
        debug!(variants = ids.len(), "Session get data");

        let table = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SnpFinderError::Cancelled {
                operation: "get data".into(),
            }),
            result = self.pipeline.get_data(&ids) => result,
        }?;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            info!("Session cleared during fetch; discarding result table");
            return Err(SnpFinderError::Cancelled {
                operation: "get data".into(),
            });
        }
        state.table = Some(table.clone());
        Ok(table)
    }

    /// Empties the id list, selection, table and status.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        let generation = state.generation.wrapping_add(1);
        *state = SessionState {
            generation,
            ..SessionState::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_search(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "esearchresult": {"count": "40", "idlist": ["30", "10", "20"]}
            })))
            .mount(server)
            .await;
    }

    async fn mount_batch(server: &MockServer, status: u16) {
        Mock::given(method("POST"))
            .and(path("/variation/homo_sapiens"))
            .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({
                "rs10": {"minor_allele": "G"},
                "rs20": {"minor_allele": "T"}
            })))
            .mount(server)
            .await;
    }

    fn session(server: &MockServer) -> Session {
        Session::new(Pipeline::with_bases(server.uri(), server.uri()).unwrap())
    }

    #[tokio::test]
    async fn retrieve_replaces_ids_and_status() {
        let server = MockServer::start().await;
        mount_search(&server).await;
        let session = session(&server);

        session.retrieve(&SearchCriteria::new(3)).await.unwrap();
        assert_eq!(
            session.discovered().await,
            vec![VariantId::new(10), VariantId::new(20), VariantId::new(30)]
        );
        assert_eq!(session.status().await.as_deref(), Some("SNPs: 3/40"));
    }

    #[tokio::test]
    async fn selection_has_no_duplicates_and_keeps_insertion_order() {
        let server = MockServer::start().await;
        mount_search(&server).await;
        let session = session(&server);
        session.retrieve(&SearchCriteria::new(3)).await.unwrap();

        assert!(session.select(VariantId::new(30)).await);
        assert!(!session.select(VariantId::new(30)).await);
        session.select_all().await;
        assert_eq!(
            session.selection().await,
            vec![VariantId::new(30), VariantId::new(10), VariantId::new(20)]
        );

        assert!(session.deselect(VariantId::new(10)).await);
        assert!(!session.deselect(VariantId::new(10)).await);
        session.clear_selection().await;
        assert!(session.selection().await.is_empty());
    }

    #[tokio::test]
    async fn get_data_replaces_table_and_clear_empties_everything() {
        let server = MockServer::start().await;
        mount_search(&server).await;
        mount_batch(&server, 200).await;
        let session = session(&server);
        session.retrieve(&SearchCriteria::new(3)).await.unwrap();
        session.select(VariantId::new(20)).await;
        session.select(VariantId::new(10)).await;

        let table = session.get_data(CancellationToken::new()).await.unwrap();
        assert_eq!(table.ids(), vec![VariantId::new(10), VariantId::new(20)]);
        assert_eq!(session.table().await, Some(table));

        session.clear().await;
        assert!(session.discovered().await.is_empty());
        assert!(session.selection().await.is_empty());
        assert!(session.table().await.is_none());
        assert!(session.status().await.is_none());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_previous_table() {
        let server = MockServer::start().await;
        mount_search(&server).await;
        mount_batch(&server, 200).await;
        let session = session(&server);
        session.retrieve(&SearchCriteria::new(3)).await.unwrap();
        session.select(VariantId::new(10)).await;
        let first = session.get_data(CancellationToken::new()).await.unwrap();

        server.reset().await;
        mount_batch(&server, 400).await;
        session.select(VariantId::new(20)).await;
        assert!(session.get_data(CancellationToken::new()).await.is_err());
        assert_eq!(session.table().await, Some(first));
    }

    #[tokio::test]
    async fn cancelled_fetch_leaves_previous_table() {
        let server = MockServer::start().await;
        mount_search(&server).await;
        let session = session(&server);
        session.retrieve(&SearchCriteria::new(3)).await.unwrap();
        session.select_all().await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = session.get_data(cancel).await.unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Cancelled);
        assert!(session.table().await.is_none());
    }
}
