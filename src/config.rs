use crate::error::RasError;
use crate::schema::model::StoreVersion;
use crate::schema::retry::RetryPolicy;
use bon::Builder;
use std::env;

pub const STORE_URI_ENV: &str = "RAS_STORE_URI";
pub const STORE_TOKEN_ENV: &str = "RAS_STORE_TOKEN";
pub const ONE_ARTIFACT_PER_DOCUMENT_ENV: &str = "RAS_ONE_ARTIFACT_PER_DOCUMENT";
pub const INLINE_ARTIFACT_MAX_SIZE_ENV: &str = "RAS_INLINE_ARTIFACT_MAX_SIZE";

pub const MIN_STORE_VERSION: StoreVersion = StoreVersion::new(3, 3, 3);

#[derive(Builder, Clone, Debug)]
pub struct RasConfig {
    /// Base URI of the document store, e.g. `http://couchdb:5984`.
    #[builder(into)]
    pub store_uri: String,
    /// Sent verbatim as the `Authorization` header.
    #[builder(into)]
    pub token: Option<String>,
    /// Store every artifact in its own artifact document instead of one
    /// shared document per run.
    #[builder(default = false)]
    pub one_artifact_per_document: bool,
    /// Artifacts up to this many bytes are stored inline in their artifact
    /// document. Only applies with `one_artifact_per_document`; 0 disables it.
    #[builder(default = 0)]
    pub inline_artifact_max_size: usize,
    #[builder(default = 100)]
    pub log_flush_threshold: usize,
    #[builder(default = 100)]
    pub find_page_size: u32,
    #[builder(default)]
    pub retry: RetryPolicy,
    #[builder(default = MIN_STORE_VERSION)]
    pub min_store_version: StoreVersion,
}

impl RasConfig {
    pub fn from_env() -> Result<Self, RasError> {
        let store_uri = env::var(STORE_URI_ENV)
            .map_err(|_| RasError::Config(format!("{} is not set", STORE_URI_ENV)))?;
        let one_artifact_per_document = match env::var(ONE_ARTIFACT_PER_DOCUMENT_ENV) {
            Ok(value) => value.trim().parse::<bool>().map_err(|_| {
                RasError::Config(format!("{} must be true or false, got '{}'", ONE_ARTIFACT_PER_DOCUMENT_ENV, value))
            })?,
            Err(_) => false,
        };
        let inline_artifact_max_size = match env::var(INLINE_ARTIFACT_MAX_SIZE_ENV) {
            Ok(value) => value.trim().parse::<usize>().map_err(|_| {
                RasError::Config(format!("{} must be a byte count, got '{}'", INLINE_ARTIFACT_MAX_SIZE_ENV, value))
            })?,
            Err(_) => 0,
        };

        Ok(RasConfig::builder()
            .store_uri(store_uri)
            .maybe_token(env::var(STORE_TOKEN_ENV).ok())
            .one_artifact_per_document(one_artifact_per_document)
            .inline_artifact_max_size(inline_artifact_max_size)
            .build())
    }

    pub fn inlines(&self, length: usize) -> bool {
        self.one_artifact_per_document && self.inline_artifact_max_size > 0 && length <= self.inline_artifact_max_size
    }
}
