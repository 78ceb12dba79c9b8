use crate::run::model::{RunDocument, TestStructure};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// One condition of a run search. All conditions of a search must hold.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchCriteria {
    Requestors(Vec<String>),
    /// Queued at or after.
    QueuedFrom(DateTime<Utc>),
    /// Queued strictly before.
    QueuedTo(DateTime<Utc>),
    TestNames(Vec<String>),
    Bundles(Vec<String>),
    Results(Vec<String>),
    Statuses(Vec<String>),
    RunNames(Vec<String>),
}

impl SearchCriteria {
    /// The `_find` selector clause for this condition. An empty list matches
    /// anything and contributes no clause.
    pub fn clause(&self) -> Option<Value> {
        match self {
            SearchCriteria::Requestors(values) => any_of("requestor", values),
            SearchCriteria::QueuedFrom(from) => Some(json!({"queued": {"$gte": timestamp(from)}})),
            SearchCriteria::QueuedTo(to) => Some(json!({"queued": {"$lt": timestamp(to)}})),
            SearchCriteria::TestNames(values) => any_of("testName", values),
            SearchCriteria::Bundles(values) => any_of("bundle", values),
            SearchCriteria::Results(values) => any_of("result", values),
            SearchCriteria::Statuses(values) => any_of("status", values),
            SearchCriteria::RunNames(values) => any_of("runName", values),
        }
    }
}

fn any_of(field: &str, values: &[String]) -> Option<Value> {
    if values.is_empty() {
        return None;
    }
    Some(json!({ field: { "$in": values } }))
}

fn timestamp(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn build_selector(criteria: &[SearchCriteria]) -> Value {
    let clauses: Vec<Value> = criteria.iter().filter_map(SearchCriteria::clause).collect();
    json!({ "$and": clauses })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Ascending => f.write_str("asc"),
            SortDirection::Descending => f.write_str("desc"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

impl SortField {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        SortField {
            field: field.into(),
            direction,
        }
    }

    pub fn to_json(&self) -> Value {
        json!([{ self.field.as_str(): self.direction.to_string() }])
    }
}

/// Body of a `_find` query.
#[derive(Serialize, Debug)]
pub struct FindRequest {
    pub selector: Value,
    pub limit: u32,
    pub execution_stats: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Value>,
}

#[derive(Deserialize, Debug, Default)]
pub struct FoundRuns {
    pub docs: Option<Vec<Value>>,
    pub bookmark: Option<String>,
    pub warning: Option<String>,
}

impl FoundRuns {
    /// The store sends `nil` when there is no further page.
    pub fn next_bookmark(&self) -> Option<String> {
        self.bookmark.clone().filter(|bookmark| bookmark != "nil" && !bookmark.is_empty())
    }
}

#[derive(Deserialize, Debug)]
pub struct AllDocsPage {
    pub rows: Option<Vec<AllDocsRow>>,
}

#[derive(Deserialize, Debug)]
pub struct AllDocsRow {
    pub id: String,
    pub doc: Option<Value>,
}

#[derive(Deserialize, Debug)]
pub struct ViewResponse {
    pub rows: Option<Vec<ViewRow>>,
}

#[derive(Deserialize, Debug)]
pub struct ViewRow {
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Value,
}

/// An archived run found in the catalog.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RunResult {
    pub id: String,
    pub structure: TestStructure,
}

impl RunResult {
    /// Keeps documents that carry an id and a run name, anything else is not
    /// a run.
    pub fn from_document(document: RunDocument) -> Option<Self> {
        if !document.structure.is_valid() {
            return None;
        }
        Some(RunResult {
            id: document.id?,
            structure: document.structure,
        })
    }

    pub fn from_json(document: Value) -> Option<Self> {
        serde_json::from_value::<RunDocument>(document)
            .ok()
            .and_then(Self::from_document)
    }

    pub fn run_id(&self) -> String {
        format!("cdb-{}", self.id)
    }

    pub fn run_name(&self) -> &str {
        self.structure.run_name.as_deref().unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TestClass {
    pub bundle: String,
    pub test_name: String,
}

impl TestClass {
    /// Splits a `bundle/testName` view key at its first `/`.
    pub fn from_view_key(key: &str) -> Option<Self> {
        if key == "undefined/undefined" {
            return None;
        }
        let (bundle, test_name) = key.split_once('/')?;
        Some(TestClass {
            bundle: bundle.to_string(),
            test_name: test_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn selector_combines_every_criteria() {
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 3, 2, 12, 30, 0).unwrap();
        let selector = build_selector(&[
            SearchCriteria::Requestors(vec!["alice".to_string(), "bob".to_string()]),
            SearchCriteria::QueuedFrom(from),
            SearchCriteria::QueuedTo(to),
            SearchCriteria::Results(vec!["Failed".to_string()]),
        ]);

        assert_eq!(
            selector,
            json!({"$and": [
                {"requestor": {"$in": ["alice", "bob"]}},
                {"queued": {"$gte": "2024-03-01T00:00:00Z"}},
                {"queued": {"$lt": "2024-03-02T12:30:00Z"}},
                {"result": {"$in": ["Failed"]}}
            ]})
        );
    }

    #[test]
    fn empty_lists_add_no_clause() {
        let selector = build_selector(&[
            SearchCriteria::TestNames(vec![]),
            SearchCriteria::Bundles(vec!["dev.example".to_string()]),
            SearchCriteria::Statuses(vec![]),
        ]);
        assert_eq!(selector, json!({"$and": [{"bundle": {"$in": ["dev.example"]}}]}));
    }

    #[test]
    fn find_request_omits_missing_bookmark_and_sort() {
        let request = FindRequest {
            selector: build_selector(&[SearchCriteria::RunNames(vec!["U1".to_string()])]),
            limit: 100,
            execution_stats: true,
            bookmark: None,
            sort: None,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body.get("bookmark"), None);
        assert_eq!(body.get("sort"), None);
        assert_eq!(body["execution_stats"], true);

        let sorted = FindRequest {
            bookmark: Some("g1AAAA".to_string()),
            sort: Some(SortField::new("queued", SortDirection::Descending).to_json()),
            ..request
        };
        let body = serde_json::to_value(&sorted).unwrap();
        assert_eq!(body["sort"], json!([{"queued": "desc"}]));
        assert_eq!(body["bookmark"], "g1AAAA");
    }

    #[test]
    fn nil_bookmark_means_no_more_pages() {
        let found: FoundRuns = serde_json::from_value(json!({"docs": [], "bookmark": "nil"})).unwrap();
        assert_eq!(found.next_bookmark(), None);
        let found: FoundRuns = serde_json::from_value(json!({"docs": [], "bookmark": "abc"})).unwrap();
        assert_eq!(found.next_bookmark().as_deref(), Some("abc"));
    }

    #[test]
    fn documents_without_run_name_are_not_runs() {
        assert!(RunResult::from_json(json!({"_id": "x", "_rev": "1-a", "requestor": "bob"})).is_none());
        assert!(RunResult::from_json(json!({"runName": "U1"})).is_none());
        assert!(RunResult::from_json(json!({"_id": "x", "runName": 12})).is_none());

        let run = RunResult::from_json(json!({"_id": "x", "_rev": "1-a", "runName": "U1"})).unwrap();
        assert_eq!(run.run_id(), "cdb-x");
        assert_eq!(run.run_name(), "U1");
    }

    #[test]
    fn test_class_splits_at_first_slash() {
        assert_eq!(
            TestClass::from_view_key("dev.example/dev.example.a/B"),
            Some(TestClass {
                bundle: "dev.example".to_string(),
                test_name: "dev.example.a/B".to_string()
            })
        );
        assert_eq!(TestClass::from_view_key("undefined/undefined"), None);
        assert_eq!(TestClass::from_view_key("no-slash"), None);
    }
}
