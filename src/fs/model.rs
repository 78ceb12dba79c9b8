use crate::error::RasError;
use crate::fs::service::ArtifactFileSystem;
use crate::path::model::ArtifactPath;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::warn;

pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

#[derive(Clone, Debug, PartialEq)]
pub struct FileMetadata {
    pub path: ArtifactPath,
    pub content_type: Option<String>,
    pub size: u64,
    pub directory: bool,
}

/// Seekable view of a downloaded artifact, backed by a scratch file that is
/// removed when the channel is closed or dropped.
pub struct ReadChannel {
    path: ArtifactPath,
    scratch: NamedTempFile,
}

impl ReadChannel {
    pub(crate) fn new(path: ArtifactPath, bytes: &[u8]) -> Result<Self, RasError> {
        let mut scratch = NamedTempFile::new()?;
        scratch.write_all(bytes)?;
        scratch.flush()?;
        scratch.seek(SeekFrom::Start(0))?;
        Ok(ReadChannel { path, scratch })
    }

    pub fn path(&self) -> &ArtifactPath {
        &self.path
    }

    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    pub fn close(self) {
        if let Err(e) = self.scratch.close() {
            warn!("unable to remove scratch file for {}: {}", self.path, e);
        }
    }
}

impl Read for ReadChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.scratch.read(buf)
    }
}

impl Seek for ReadChannel {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.scratch.seek(pos)
    }
}

/// Collects an artifact in a scratch file. Nothing reaches the store until
/// [`WriteChannel::close`]; a dropped channel uploads nothing.
pub struct WriteChannel {
    file_system: ArtifactFileSystem,
    path: ArtifactPath,
    content_type: String,
    scratch: NamedTempFile,
}

impl WriteChannel {
    pub(crate) fn new(file_system: ArtifactFileSystem, path: ArtifactPath, content_type: String) -> Result<Self, RasError> {
        Ok(WriteChannel {
            file_system,
            path,
            content_type,
            scratch: NamedTempFile::new()?,
        })
    }

    pub fn path(&self) -> &ArtifactPath {
        &self.path
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    /// Uploads what was written and registers the path. The scratch file is
    /// removed whether or not the upload worked.
    pub async fn close(mut self) -> Result<ArtifactPath, RasError> {
        let uploaded = self.upload().await;
        if let Err(e) = self.scratch.close() {
            warn!("unable to remove scratch file for {}: {}", self.path, e);
        }
        uploaded
    }

    async fn upload(&mut self) -> Result<ArtifactPath, RasError> {
        self.scratch.flush()?;
        let bytes = std::fs::read(self.scratch.path())?;
        self.file_system.upload(&self.path, &self.content_type, bytes).await
    }
}

impl Write for WriteChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.scratch.flush()
    }
}

impl Seek for WriteChannel {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.scratch.seek(pos)
    }
}
