use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Execution state of one test run, as stored in the run document.
///
/// Fields this engine does not interpret (test methods, gherkin steps, ...)
/// are carried in `extra` so they survive a round trip through the store.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestStructure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_short_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requestor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub log_record_ids: Vec<String>,
    #[serde(default)]
    pub artifact_record_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TestStructure {
    pub fn for_run(run_name: impl Into<String>) -> Self {
        TestStructure {
            run_name: Some(run_name.into()),
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.run_name.as_deref().is_some_and(|name| !name.is_empty())
    }
}

/// A run document as held by the store.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RunDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub structure: TestStructure,
}

impl RunDocument {
    /// Body for a write; identity and revision travel in the url and headers.
    pub fn for_write(structure: TestStructure) -> Self {
        RunDocument {
            id: None,
            rev: None,
            structure,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub run_name: String,
    pub order: u64,
    #[serde(default)]
    pub lines: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactsDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub run_name: String,
    /// Upper-case hex of a small artifact stored in the document itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_artifact_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_artifact_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_content_type: Option<String>,
    #[serde(rename = "_attachments", default, skip_serializing)]
    pub attachments: Map<String, Value>,
}

impl ArtifactsDocument {
    pub fn new(run_id: Option<String>, run_name: impl Into<String>) -> Self {
        ArtifactsDocument {
            run_id,
            run_name: run_name.into(),
            ..Default::default()
        }
    }

    pub fn with_inline(mut self, path: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.inline_artifact_data = Some(hex::encode_upper(bytes));
        self.inline_artifact_path = Some(path.to_string());
        self.inline_content_type = Some(content_type.to_string());
        self
    }

    pub fn inline_bytes(&self) -> Option<Vec<u8>> {
        self.inline_artifact_data
            .as_deref()
            .and_then(|data| hex::decode(data).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Uninitialized,
    SchemaValidated,
    RunDocumentCreated,
    ArtifactDocumentCreated,
    Active,
    ShuttingDown,
    Closed,
    Aborted,
}
