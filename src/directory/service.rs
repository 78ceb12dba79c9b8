use crate::config::RasConfig;
use crate::directory::model::{
    build_selector, AllDocsPage, FindRequest, FoundRuns, RunResult, SearchCriteria, SortField, TestClass, ViewResponse,
};
use crate::error::RasError;
use crate::fs::service::ArtifactFileSystem;
use crate::http::{HttpRequest, StoreClient};
use crate::path::model::{ArtifactMeta, ArtifactPath};
use crate::persistence::model::QueryResult;
use crate::persistence::repo::{ArtifactDatabase, Database, LogDatabase, RunDatabase};
use crate::schema::model::{BUNDLE_TESTNAMES_VIEW, DESIGN_DOCUMENT, REQUESTORS_VIEW, RESULT_VIEW, RUNS_DB};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use tracing::{debug, warn};

const LOG_FETCH_CONCURRENCY: usize = 4;

/// Read-only catalog of every run archived in the store.
pub struct DirectoryService {
    client: StoreClient,
    page_size: u32,
}

impl DirectoryService {
    pub fn new(config: &RasConfig) -> Result<Self, RasError> {
        Ok(Self::with_client(StoreClient::new(config)?, config))
    }

    pub fn with_client(client: StoreClient, config: &RasConfig) -> Self {
        DirectoryService {
            client,
            page_size: config.find_page_size.max(1),
        }
    }

    /// All runs matching every criteria, or every run when there are none.
    pub async fn search(&self, criteria: &[SearchCriteria]) -> Result<Vec<RunResult>, RasError> {
        if criteria.is_empty() {
            return self.all_runs().await;
        }

        let mut runs = vec![];
        let mut bookmark = None;
        loop {
            let request = FindRequest {
                selector: build_selector(criteria),
                limit: self.page_size,
                execution_stats: true,
                bookmark: bookmark.take(),
                sort: None,
            };
            let (page, found) = self.find(&request).await?;
            if found == 0 {
                break;
            }
            runs.extend(page.items);
            match page.next_page_key {
                Some(next) => bookmark = Some(next),
                None => break,
            }
        }
        debug!("search found {} runs", runs.len());
        Ok(runs)
    }

    /// One page of matching runs and the cursor of the page after it.
    pub async fn runs_page(
        &self,
        max_results: u32,
        sort: Option<SortField>,
        page_token: Option<String>,
        criteria: &[SearchCriteria],
    ) -> Result<QueryResult<RunResult>, RasError> {
        let request = FindRequest {
            selector: build_selector(criteria),
            limit: max_results,
            execution_stats: true,
            bookmark: page_token,
            sort: sort.map(|sort| sort.to_json()),
        };
        self.find(&request).await.map(|(page, _)| page)
    }

    /// Looks up a run by the id handed out for it. Ids from other archives,
    /// unknown ids and unreadable runs all give `None`.
    pub async fn run_by_id(&self, run_id: &str) -> Option<RunResult> {
        let id = run_id.strip_prefix("cdb-")?;
        match RunDatabase::fetch(&self.client, id).await {
            Ok(document) => document.and_then(RunResult::from_document),
            Err(e) => {
                debug!("unable to read run {}: {}", run_id, e);
                None
            }
        }
    }

    pub async fn requestors(&self) -> Result<Vec<String>, RasError> {
        self.view_keys(REQUESTORS_VIEW).await
    }

    pub async fn result_names(&self) -> Result<Vec<String>, RasError> {
        self.view_keys(RESULT_VIEW).await
    }

    pub async fn tests(&self) -> Result<Vec<TestClass>, RasError> {
        let keys = self.view_keys(BUNDLE_TESTNAMES_VIEW).await?;
        Ok(keys.iter().filter_map(|key| TestClass::from_view_key(key)).collect())
    }

    /// The run's log, chunk after chunk. Chunks that have gone are skipped.
    pub async fn run_log(&self, run: &RunResult) -> Result<String, RasError> {
        let chunks: Vec<_> = stream::iter(run.structure.log_record_ids.iter())
            .map(|id| LogDatabase::fetch(&self.client, id))
            .buffered(LOG_FETCH_CONCURRENCY)
            .try_collect()
            .await?;
        let lines: Vec<String> = chunks.into_iter().flatten().flat_map(|chunk| chunk.lines).collect();
        Ok(lines.join("\n"))
    }

    /// The run's artifacts as a read-only file system.
    pub async fn run_artifacts(&self, run: &RunResult) -> Result<ArtifactFileSystem, RasError> {
        let file_system = ArtifactFileSystem::read_only(self.client.clone());
        for document_id in &run.structure.artifact_record_ids {
            let Some(document) = ArtifactDatabase::fetch(&self.client, document_id).await? else {
                debug!("artifact document {} of run {} is missing", document_id, run.run_name());
                continue;
            };
            for (name, details) in &document.attachments {
                file_system.add_path(ArtifactPath::from_attachment(name, details, document_id));
            }
            if let (Some(path), Some(bytes)) = (&document.inline_artifact_path, document.inline_bytes()) {
                file_system.add_path(ArtifactPath::parse(path).with_meta(ArtifactMeta {
                    content_type: document.inline_content_type.clone().unwrap_or_else(|| "unknown".to_string()),
                    length: bytes.len() as u64,
                    document_id: document_id.clone(),
                }));
            }
        }
        Ok(file_system)
    }

    async fn all_runs(&self) -> Result<Vec<RunResult>, RasError> {
        let mut runs = vec![];
        let mut seen = HashSet::new();
        let mut last_id: Option<String> = None;
        loop {
            let mut request = HttpRequest::get(self.client.url(&[RUNS_DB, "_all_docs"]))
                .query("include_docs", "true")
                .query("limit", self.page_size.to_string());
            if let Some(last_id) = &last_id {
                request = request
                    .query("startkey", serde_json::Value::String(last_id.clone()).to_string())
                    .query("skip", "1");
            }

            let response = self.client.execute(request).await?;
            if response.status != 200 {
                return Err(response.unexpected());
            }
            let rows = response
                .json::<AllDocsPage>()?
                .rows
                .ok_or_else(|| RasError::malformed(&response.url, "no rows in response"))?;
            if rows.is_empty() {
                break;
            }

            for row in rows {
                last_id = Some(row.id.clone());
                if row.id.starts_with("_design/") || !seen.insert(row.id.clone()) {
                    continue;
                }
                match row.doc.and_then(RunResult::from_json) {
                    Some(run) => runs.push(run),
                    None => debug!("skipping document {} which is not a valid run", row.id),
                }
            }
        }
        debug!("found {} runs", runs.len());
        Ok(runs)
    }

    /// Runs one `_find` page. Also returns how many documents the store sent,
    /// valid or not.
    async fn find(&self, request: &FindRequest) -> Result<(QueryResult<RunResult>, usize), RasError> {
        let url = self.client.url(&[RUNS_DB, "_find"]);
        let response = self.client.execute(HttpRequest::post_json(url, request)?).await?;
        if response.status != 200 {
            return Err(response.unexpected());
        }

        let found = response.json::<FoundRuns>()?;
        if let Some(warning) = &found.warning {
            warn!("document store warning: {}", warning);
        }
        let next_page_key = found.next_bookmark();
        let docs = found
            .docs
            .ok_or_else(|| RasError::malformed(&response.url, "no docs in response"))?;
        let returned = docs.len();
        let runs: Vec<RunResult> = docs.into_iter().filter_map(RunResult::from_json).collect();
        if runs.len() < returned {
            debug!("skipped {} documents that are not valid runs", returned - runs.len());
        }
        Ok((QueryResult::new(runs, next_page_key), returned))
    }

    async fn view_keys(&self, view: &str) -> Result<Vec<String>, RasError> {
        let url = self.client.url(&[RUNS_DB, "_design", DESIGN_DOCUMENT, "_view", view]);
        let response = self.client.execute(HttpRequest::get(url).query("group", "true")).await?;
        if response.status != 200 {
            return Err(response.unexpected());
        }
        let rows = response
            .json::<ViewResponse>()?
            .rows
            .ok_or_else(|| RasError::malformed(&response.url, "no rows in response"))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.key.as_str().map(str::to_string))
            .collect())
    }
}
