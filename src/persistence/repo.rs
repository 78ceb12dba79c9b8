use crate::error::RasError;
use crate::http::{HttpRequest, StoreClient};
use crate::persistence::model::{DocumentRef, WriteOutcome, WriteResponse};
use crate::run::model::{ArtifactsDocument, LogChunk, RunDocument};
use crate::schema::model::{ARTIFACTS_DB, LOG_DB, RUNS_DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// One database of the store, holding documents of type `T`.
pub(crate) trait Database<T>
where
    T: Serialize + DeserializeOwned,
{
    fn database_name() -> &'static str;

    async fn create(client: &StoreClient, document: &T) -> Result<DocumentRef, RasError> {
        let request = HttpRequest::post_json(client.url(&[Self::database_name()]), document)?;
        let response = client.execute(request).await?;
        if response.status != 201 && response.status != 202 {
            return Err(response.unexpected());
        }
        let created = response.json::<WriteResponse>()?.into_document_ref(&response.url)?;
        debug!("created {} document {} at {}", Self::database_name(), created.id, created.rev);
        Ok(created)
    }

    /// Replaces the document, provided it is still at `revision`.
    async fn replace(client: &StoreClient, id: &str, revision: &str, document: &T) -> Result<WriteOutcome, RasError> {
        let request = HttpRequest::put_json(client.url(&[Self::database_name(), id]), document)?.if_match(revision);
        let response = client.execute(request).await?;
        if response.is_conflict() {
            return Ok(WriteOutcome::Conflict);
        }
        if response.status != 201 && response.status != 202 {
            return Err(response.unexpected());
        }
        let written = response.json::<WriteResponse>()?.into_document_ref(&response.url)?;
        Ok(WriteOutcome::Written(written))
    }

    async fn fetch(client: &StoreClient, id: &str) -> Result<Option<T>, RasError> {
        let response = client
            .execute(HttpRequest::get(client.url(&[Self::database_name(), id])))
            .await?;
        if response.is_not_found() {
            return Ok(None);
        }
        if response.status != 200 {
            return Err(response.unexpected());
        }
        response.json::<T>().map(Some)
    }
}

pub(crate) struct RunDatabase;

impl Database<RunDocument> for RunDatabase {
    fn database_name() -> &'static str {
        RUNS_DB
    }
}

pub(crate) struct LogDatabase;

impl Database<LogChunk> for LogDatabase {
    fn database_name() -> &'static str {
        LOG_DB
    }
}

pub(crate) struct ArtifactDatabase;

impl Database<ArtifactsDocument> for ArtifactDatabase {
    fn database_name() -> &'static str {
        ARTIFACTS_DB
    }
}

impl ArtifactDatabase {
    pub(crate) async fn put_attachment(
        client: &StoreClient,
        document_id: &str,
        revision: &str,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<WriteOutcome, RasError> {
        let url = client.url(&[ARTIFACTS_DB, document_id, name]);
        let request = HttpRequest::put_bytes(url, bytes, content_type).if_match(revision);
        let response = client.execute(request).await?;
        if response.is_conflict() {
            return Ok(WriteOutcome::Conflict);
        }
        if response.status != 201 && response.status != 202 {
            return Err(response.unexpected());
        }
        let written = response.json::<WriteResponse>()?.into_document_ref(&response.url)?;
        Ok(WriteOutcome::Written(written))
    }

    pub(crate) async fn fetch_attachment(
        client: &StoreClient,
        document_id: &str,
        name: &str,
    ) -> Result<Option<Vec<u8>>, RasError> {
        let url = client.url(&[ARTIFACTS_DB, document_id, name]);
        let response = client.execute(HttpRequest::get(url)).await?;
        if response.is_not_found() {
            return Ok(None);
        }
        if response.status != 200 {
            return Err(response.unexpected());
        }
        Ok(Some(response.body))
    }
}
