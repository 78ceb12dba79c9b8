use crate::config::RasConfig;
use crate::error::RasError;
use crate::http::StoreClient;
use crate::path::model::{ArtifactMeta, ArtifactPath};
use crate::persistence::model::{DocumentRef, WriteOutcome};
use crate::persistence::repo::{ArtifactDatabase, Database, LogDatabase, RunDatabase};
use crate::run::model::{ArtifactsDocument, LogChunk, RunDocument, RunState, TestStructure};
use crate::schema::model::{ARTIFACTS_DB, RUNS_DB};
use crate::schema::service::SchemaValidator;
use regex::Regex;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, error, info};

/// Supplies the name of the run being archived.
pub trait RunIdentity: Send + Sync {
    fn run_name(&self) -> String;
}

pub struct NamedRun(pub String);

impl RunIdentity for NamedRun {
    fn run_name(&self) -> String {
        self.0.clone()
    }
}

/// Called when another engine has taken over this run's documents. After it
/// returns the store stays aborted.
pub trait Terminator: Send + Sync {
    fn terminate(&self, message: &str);
}

/// Ends the process, the default for a test engine that lost its run.
pub struct ProcessTerminator;

impl Terminator for ProcessTerminator {
    fn terminate(&self, message: &str) {
        error!("{}, terminating the engine", message);
        std::process::exit(1);
    }
}

struct RunDocumentState {
    id: String,
    rev: String,
    structure: TestStructure,
    log_chunk_ids: Vec<String>,
    artifact_document_ids: Vec<String>,
}

struct LogBuffer {
    lines: Vec<String>,
    last_order: u64,
}

fn line_break() -> &'static Regex {
    static LINE_BREAK: OnceLock<Regex> = OnceLock::new();
    LINE_BREAK.get_or_init(|| Regex::new(r"\r\n?|\n").expect("line break pattern is valid"))
}

fn advance(run_name: &str, from: RunState, to: RunState) -> RunState {
    debug!("run store for {} moved from {:?} to {:?}", run_name, from, to);
    to
}

/// Splits on `\r\n`, `\r` or `\n`, dropping trailing empty lines.
pub fn split_lines(message: &str) -> Vec<String> {
    let mut lines: Vec<String> = line_break().split(message).map(str::to_string).collect();
    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines
}

/// Archives one run: its run document, its log and its artifacts.
///
/// Every document this store writes is owned by it, so the cached revision is
/// always the latest one. A revision conflict means another engine is writing
/// the same run, which the store treats as fatal.
pub struct RunStore {
    client: StoreClient,
    config: RasConfig,
    run_name: String,
    run_document_id: String,
    terminator: Arc<dyn Terminator>,
    state: Mutex<RunState>,
    run_document: tokio::sync::Mutex<RunDocumentState>,
    log_buffer: Mutex<LogBuffer>,
    log_flush: tokio::sync::Mutex<()>,
    artifact_document: tokio::sync::Mutex<Option<DocumentRef>>,
}

impl RunStore {
    pub async fn open(config: RasConfig, identity: &dyn RunIdentity) -> Result<Self, RasError> {
        Self::open_with_terminator(config, identity, Arc::new(ProcessTerminator)).await
    }

    pub async fn open_with_terminator(
        config: RasConfig,
        identity: &dyn RunIdentity,
        terminator: Arc<dyn Terminator>,
    ) -> Result<Self, RasError> {
        let client = StoreClient::new(&config)?;
        let run_name = identity.run_name();
        let mut state = RunState::Uninitialized;

        if let Err(e) = SchemaValidator::new(client.clone(), &config).ensure_valid_once().await {
            error!("unable to validate document store {}: {}", config.store_uri, e);
            return Err(e);
        }
        state = advance(&run_name, state, RunState::SchemaValidated);

        let structure = TestStructure::for_run(run_name.clone());
        let created = RunDatabase::create(&client, &RunDocument::for_write(structure.clone())).await?;
        info!("run {} archived in run document {}", run_name, created.id);
        state = advance(&run_name, state, RunState::RunDocumentCreated);

        let bundled = !config.one_artifact_per_document;
        let artifact_document = if bundled {
            let document = ArtifactsDocument::new(Some(created.id.clone()), run_name.clone());
            Some(ArtifactDatabase::create(&client, &document).await?)
        } else {
            None
        };

        let store = RunStore {
            client,
            config,
            run_name,
            run_document_id: created.id.clone(),
            terminator,
            state: Mutex::new(state),
            run_document: tokio::sync::Mutex::new(RunDocumentState {
                id: created.id,
                rev: created.rev,
                structure,
                log_chunk_ids: vec![],
                artifact_document_ids: vec![],
            }),
            log_buffer: Mutex::new(LogBuffer {
                lines: vec![],
                last_order: 0,
            }),
            log_flush: tokio::sync::Mutex::new(()),
            artifact_document: tokio::sync::Mutex::new(artifact_document.clone()),
        };

        if let Some(artifact_document) = artifact_document {
            store.set_state(RunState::ArtifactDocumentCreated);
            debug!("run {} artifacts go to document {}", store.run_name, artifact_document.id);
            {
                let mut run_document = store.run_document.lock().await;
                run_document.artifact_document_ids.push(artifact_document.id);
                store.save_run_document(&mut run_document).await?;
            }
        }
        store.set_state(RunState::Active);
        Ok(store)
    }

    pub fn state(&self) -> RunState {
        *self.lock_state()
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn run_document_id(&self) -> &str {
        &self.run_document_id
    }

    /// Id the result archive hands out for this run.
    pub fn ras_run_id(&self) -> String {
        format!("cdb-{}", self.run_document_id)
    }

    pub fn config(&self) -> &RasConfig {
        &self.config
    }

    pub async fn log_chunk_ids(&self) -> Vec<String> {
        self.run_document.lock().await.log_chunk_ids.clone()
    }

    pub async fn artifact_document_ids(&self) -> Vec<String> {
        self.run_document.lock().await.artifact_document_ids.clone()
    }

    pub async fn test_structure(&self) -> TestStructure {
        self.run_document.lock().await.structure.clone()
    }

    /// Lines buffered but not yet written to the log database.
    pub fn pending_log_lines(&self) -> usize {
        self.lock_log_buffer().lines.len()
    }

    pub async fn write_log(&self, message: &str) -> Result<(), RasError> {
        self.append_log(split_lines(message)).await
    }

    pub async fn append_log<I, S>(&self, lines: I) -> Result<(), RasError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_open()?;
        let full = {
            let mut buffer = self.lock_log_buffer();
            buffer.lines.extend(lines.into_iter().map(Into::into));
            buffer.lines.len() >= self.flush_threshold()
        };
        if full {
            self.drain_log(false).await?;
        }
        Ok(())
    }

    /// Writes every buffered log line, including a final partial chunk.
    /// Does nothing once the store is closed, shutdown has written everything.
    pub async fn flush(&self) -> Result<(), RasError> {
        if self.state() == RunState::Closed {
            return Ok(());
        }
        self.ensure_open()?;
        self.drain_log(true).await
    }

    pub async fn update_test_structure(&self, mut structure: TestStructure) -> Result<(), RasError> {
        self.ensure_open()?;
        if structure.run_name.is_none() {
            structure.run_name = Some(self.run_name.clone());
        }
        let mut run_document = self.run_document.lock().await;
        run_document.structure = structure;
        self.save_run_document(&mut run_document).await
    }

    /// Stores `bytes` as the artifact at `path` and returns the path with its
    /// metadata filled in.
    pub async fn write_attachment(
        &self,
        path: &ArtifactPath,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<ArtifactPath, RasError> {
        self.ensure_open()?;
        let path = path.to_absolute();
        let name = path.to_string();
        let length = bytes.len() as u64;

        let mut artifact_document = self.artifact_document.lock().await;
        let document_id = if self.config.one_artifact_per_document {
            let inline = self.config.inlines(bytes.len());
            let mut document = ArtifactsDocument::new(Some(self.run_document_id.clone()), self.run_name.clone());
            if inline {
                document = document.with_inline(&name, content_type, &bytes);
            }
            let created = ArtifactDatabase::create(&self.client, &document).await?;
            let written = if inline {
                debug!("artifact {} stored inline in document {}", name, created.id);
                created
            } else {
                self.put_attachment(&created, &name, content_type, bytes).await?
            };
            let document_id = written.id.clone();
            *artifact_document = Some(written);

            let mut run_document = self.run_document.lock().await;
            run_document.artifact_document_ids.push(document_id.clone());
            self.save_run_document(&mut run_document).await?;
            document_id
        } else {
            let current = artifact_document
                .clone()
                .ok_or_else(|| RasError::NotFound(format!("artifact document of run {}", self.run_name)))?;
            let written = self.put_attachment(&current, &name, content_type, bytes).await?;
            let document_id = written.id.clone();
            *artifact_document = Some(written);
            document_id
        };

        Ok(path.with_meta(ArtifactMeta {
            content_type: content_type.to_string(),
            length,
            document_id,
        }))
    }

    /// Reads the artifact at `path` from the document named in its metadata,
    /// or from this run's artifact documents, newest first.
    pub async fn read_attachment(&self, path: &ArtifactPath) -> Result<Vec<u8>, RasError> {
        let name = path.to_absolute().to_string();
        let candidates = match path.meta() {
            Some(meta) => vec![meta.document_id.clone()],
            None => {
                let mut ids = self.artifact_document_ids().await;
                ids.reverse();
                ids
            }
        };
        for document_id in candidates {
            if let Some(bytes) = read_artifact(&self.client, &document_id, &name).await? {
                return Ok(bytes);
            }
        }
        Err(RasError::NotFound(format!("artifact {} of run {}", name, self.run_name)))
    }

    /// Writes remaining log lines and closes the store. Calling it again does
    /// nothing.
    pub async fn shutdown(&self) -> Result<(), RasError> {
        {
            let mut state = self.lock_state();
            match *state {
                RunState::Closed => return Ok(()),
                RunState::Aborted => return Err(RasError::Aborted),
                _ => *state = RunState::ShuttingDown,
            }
        }
        let flushed = self.drain_log(true).await;
        self.set_state(RunState::Closed);
        info!("run store for {} closed", self.run_name);
        flushed
    }

    fn flush_threshold(&self) -> usize {
        self.config.log_flush_threshold.max(1)
    }

    /// Writes full chunks while there are enough lines, then the remainder if
    /// `everything` is set.
    async fn drain_log(&self, everything: bool) -> Result<(), RasError> {
        let _flushing = self.log_flush.lock().await;
        let threshold = self.flush_threshold();
        loop {
            let chunk = {
                let mut buffer = self.lock_log_buffer();
                let available = buffer.lines.len();
                let take = if available >= threshold {
                    threshold
                } else if everything && available > 0 {
                    available
                } else {
                    break;
                };
                buffer.last_order += 1;
                LogChunk {
                    run_id: Some(self.run_document_id.clone()),
                    run_name: self.run_name.clone(),
                    order: buffer.last_order,
                    lines: buffer.lines.drain(..take).collect(),
                }
            };
            self.store_log_chunk(chunk).await?;
        }
        Ok(())
    }

    async fn store_log_chunk(&self, chunk: LogChunk) -> Result<(), RasError> {
        let created = LogDatabase::create(&self.client, &chunk).await?;
        debug!("log chunk {} of run {} stored as {}", chunk.order, self.run_name, created.id);
        let mut run_document = self.run_document.lock().await;
        run_document.log_chunk_ids.push(created.id);
        self.save_run_document(&mut run_document).await
    }

    async fn save_run_document(&self, run_document: &mut RunDocumentState) -> Result<(), RasError> {
        run_document.structure.log_record_ids = run_document.log_chunk_ids.clone();
        run_document.structure.artifact_record_ids = run_document.artifact_document_ids.clone();
        let body = RunDocument::for_write(run_document.structure.clone());
        match RunDatabase::replace(&self.client, &run_document.id, &run_document.rev, &body).await? {
            WriteOutcome::Written(written) => {
                debug!("run document {} now at {}", written.id, written.rev);
                run_document.rev = written.rev;
                Ok(())
            }
            WriteOutcome::Conflict => Err(self.abort(RUNS_DB, &run_document.id)),
        }
    }

    async fn put_attachment(
        &self,
        document: &DocumentRef,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<DocumentRef, RasError> {
        match ArtifactDatabase::put_attachment(&self.client, &document.id, &document.rev, name, content_type, bytes).await? {
            WriteOutcome::Written(written) => {
                debug!("artifact {} stored in document {} at {}", name, written.id, written.rev);
                Ok(written)
            }
            WriteOutcome::Conflict => Err(self.abort(ARTIFACTS_DB, &document.id)),
        }
    }

    fn abort(&self, database: &str, id: &str) -> RasError {
        self.set_state(RunState::Aborted);
        let message = format!(
            "{} document {} of run {} has been updated by another engine",
            database, id, self.run_name
        );
        error!("{}", message);
        self.terminator.terminate(&message);
        RasError::OwnershipConflict {
            database: database.to_string(),
            id: id.to_string(),
        }
    }

    fn ensure_open(&self) -> Result<(), RasError> {
        match self.state() {
            RunState::Aborted => Err(RasError::Aborted),
            RunState::Closed => Err(RasError::Closed),
            _ => Ok(()),
        }
    }

    fn set_state(&self, next: RunState) {
        let mut state = self.lock_state();
        if *state != RunState::Aborted {
            *state = next;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_log_buffer(&self) -> MutexGuard<'_, LogBuffer> {
        self.log_buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fetches attachment `name` of an artifact document, falling back to an
/// artifact stored inline in the document under the same path.
pub(crate) async fn read_artifact(
    client: &StoreClient,
    document_id: &str,
    name: &str,
) -> Result<Option<Vec<u8>>, RasError> {
    if let Some(bytes) = ArtifactDatabase::fetch_attachment(client, document_id, name).await? {
        return Ok(Some(bytes));
    }
    let inline = ArtifactDatabase::fetch(client, document_id)
        .await?
        .filter(|document| document.inline_artifact_path.as_deref() == Some(name))
        .and_then(|document| document.inline_bytes());
    Ok(inline)
}
