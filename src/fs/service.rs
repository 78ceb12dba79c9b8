use crate::error::RasError;
use crate::fs::model::{FileMetadata, ReadChannel, WriteChannel, DEFAULT_CONTENT_TYPE};
use crate::http::StoreClient;
use crate::path::model::{ArtifactPath, PathKey};
use crate::run::service::{read_artifact, RunStore};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

enum Backend {
    Run(Arc<RunStore>),
    /// Artifacts of an archived run, looked up through their recorded
    /// document ids.
    ReadOnly(StoreClient),
}

struct Inner {
    backend: Backend,
    paths: RwLock<BTreeMap<PathKey, ArtifactPath>>,
    content_types: Mutex<HashMap<PathKey, String>>,
}

/// A run's artifacts seen as a directory tree. Directories exist only here,
/// synthesized from the paths of known artifacts.
#[derive(Clone)]
pub struct ArtifactFileSystem {
    inner: Arc<Inner>,
}

impl ArtifactFileSystem {
    pub fn for_run(store: Arc<RunStore>) -> Self {
        Self::with_backend(Backend::Run(store))
    }

    pub(crate) fn read_only(client: StoreClient) -> Self {
        Self::with_backend(Backend::ReadOnly(client))
    }

    fn with_backend(backend: Backend) -> Self {
        let root = ArtifactPath::root();
        let mut paths = BTreeMap::new();
        paths.insert(root.key().clone(), root);
        ArtifactFileSystem {
            inner: Arc::new(Inner {
                backend,
                paths: RwLock::new(paths),
                content_types: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn root(&self) -> ArtifactPath {
        ArtifactPath::root()
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.inner.backend, Backend::ReadOnly(_))
    }

    /// Registers a path and any ancestor directories not yet known. Adding a
    /// known path again replaces its metadata.
    pub fn add_path(&self, path: ArtifactPath) {
        let path = path.to_absolute();
        let mut paths = self.inner.paths.write().unwrap_or_else(PoisonError::into_inner);
        for ancestor in path.ancestors() {
            paths.entry(ancestor.key().clone()).or_insert(ancestor);
        }
        paths.insert(path.key().clone(), path);
    }

    pub fn exists(&self, path: &ArtifactPath) -> bool {
        self.known(path).is_some()
    }

    pub fn metadata(&self, path: &ArtifactPath) -> Result<FileMetadata, RasError> {
        let known = self
            .known(path)
            .ok_or_else(|| RasError::NotFound(path.to_absolute().to_string()))?;
        Ok(FileMetadata {
            content_type: known.content_type().map(str::to_string),
            size: known.length(),
            directory: known.is_directory(),
            path: known,
        })
    }

    /// Known paths directly under `directory` that pass `filter`, in path
    /// order.
    pub fn list<F>(&self, directory: &ArtifactPath, filter: F) -> Vec<ArtifactPath>
    where
        F: Fn(&ArtifactPath) -> bool,
    {
        let directory = directory.to_absolute();
        let paths = self.inner.paths.read().unwrap_or_else(PoisonError::into_inner);
        paths
            .values()
            .filter(|path| path.parent().as_ref() == Some(&directory))
            .filter(|path| filter(path))
            .cloned()
            .collect()
    }

    pub async fn open_for_read(&self, path: &ArtifactPath) -> Result<ReadChannel, RasError> {
        let path = self.known(path).unwrap_or_else(|| path.to_absolute());
        if path.is_directory() {
            return Err(RasError::NotFound(format!("{} is a directory", path)));
        }
        let bytes = match &self.inner.backend {
            Backend::Run(store) => store.read_attachment(&path).await?,
            Backend::ReadOnly(client) => {
                let name = path.to_string();
                let document_id = path
                    .meta()
                    .map(|meta| meta.document_id.clone())
                    .ok_or_else(|| RasError::NotFound(name.clone()))?;
                read_artifact(client, &document_id, &name)
                    .await?
                    .ok_or_else(|| RasError::NotFound(name.clone()))?
            }
        };
        debug!("downloaded {} bytes of {}", bytes.len(), path);
        ReadChannel::new(path, &bytes)
    }

    /// Opens `path` for writing. Without a content type the one given on an
    /// earlier open of the same path is used, else `text/plain`.
    pub fn open_for_write(&self, path: &ArtifactPath, content_type: Option<&str>) -> Result<WriteChannel, RasError> {
        if self.is_read_only() {
            return Err(RasError::ReadOnly);
        }
        let path = path.to_absolute();
        let content_type = {
            let mut content_types = self.inner.content_types.lock().unwrap_or_else(PoisonError::into_inner);
            match content_type {
                Some(content_type) => {
                    content_types.insert(path.key().clone(), content_type.to_string());
                    content_type.to_string()
                }
                None => content_types
                    .get(path.key())
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            }
        };
        WriteChannel::new(self.clone(), path, content_type)
    }

    pub(crate) async fn upload(
        &self,
        path: &ArtifactPath,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<ArtifactPath, RasError> {
        let Backend::Run(store) = &self.inner.backend else {
            return Err(RasError::ReadOnly);
        };
        let written = store.write_attachment(path, content_type, bytes).await?;
        self.add_path(written.clone());
        Ok(written)
    }

    fn known(&self, path: &ArtifactPath) -> Option<ArtifactPath> {
        let path = path.to_absolute();
        let paths = self.inner.paths.read().unwrap_or_else(PoisonError::into_inner);
        paths.get(path.key()).cloned()
    }
}
