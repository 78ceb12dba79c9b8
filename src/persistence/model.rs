use crate::error::RasError;
use serde::{Deserialize, Serialize};

/// A page of results plus the cursor for the page after it, if any.
#[derive(Clone, Serialize, Debug, PartialEq)]
pub struct QueryResult<T>
where
    T: Serialize + Clone,
{
    pub items: Vec<T>,
    pub next_page_key: Option<String>,
}

impl<T> QueryResult<T>
where
    T: Serialize + Clone,
{
    pub fn new(items: Vec<T>, next_page_key: Option<String>) -> Self {
        Self { items, next_page_key }
    }
}

/// Identity and current revision of a stored document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: String,
    pub rev: String,
}

/// Body the store answers every document write with.
#[derive(Deserialize, Debug, Default)]
pub struct WriteResponse {
    pub ok: Option<bool>,
    pub id: Option<String>,
    pub rev: Option<String>,
}

impl WriteResponse {
    pub fn into_document_ref(self, url: &str) -> Result<DocumentRef, RasError> {
        match (self.id, self.rev) {
            (Some(id), Some(rev)) => Ok(DocumentRef { id, rev }),
            (None, _) => Err(RasError::malformed(url, "write response has no id")),
            (_, None) => Err(RasError::malformed(url, "write response has no rev")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(DocumentRef),
    /// The document was no longer at the revision the write was based on.
    Conflict,
}
