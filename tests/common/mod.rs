#![allow(dead_code)]

use result_archive::schema::model::{index_name, INDEXED_FIELDS, RUN_VIEWS};
use result_archive::schema::retry::RetryPolicy;
use result_archive::{RasConfig, Terminator};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const RUN_DOCUMENT_ID: &str = "run1";
pub const ARTIFACT_DOCUMENT_ID: &str = "art1";

/// Config pointing at the mock store, retrying without sleeping.
pub fn test_config(server: &MockServer) -> RasConfig {
    result_archive::init_tracing();
    RasConfig::builder()
        .store_uri(server.uri())
        .retry(immediate_retry(10))
        .build()
}

/// As [`test_config`], with one artifact document per artifact.
pub fn separate_documents_config(server: &MockServer, inline_artifact_max_size: usize) -> RasConfig {
    result_archive::init_tracing();
    RasConfig::builder()
        .store_uri(server.uri())
        .retry(immediate_retry(10))
        .one_artifact_per_document(true)
        .inline_artifact_max_size(inline_artifact_max_size)
        .build()
}

pub fn immediate_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(max_attempts)
        .base_delay(Duration::ZERO)
        .jitter(Duration::ZERO)
        .build()
}

pub fn welcome(version: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"couchdb": "Welcome", "version": version}))
}

pub fn converged_design_document() -> Value {
    let mut views = Map::new();
    for view in &RUN_VIEWS {
        views.insert(
            view.name.to_string(),
            json!({"map": view.map, "reduce": view.reduce, "language": "javascript"}),
        );
    }
    json!({"_id": "_design/docs", "_rev": "7-d0c", "language": "javascript", "views": views})
}

pub fn converged_indexes() -> Value {
    let mut indexes = vec![json!({"ddoc": null, "name": "_all_docs", "type": "special", "def": {"fields": [{"_id": "asc"}]}})];
    for field in INDEXED_FIELDS {
        indexes.push(json!({
            "ddoc": format!("_design/{}", field),
            "name": index_name(field),
            "type": "json",
            "def": {"fields": [{field: "asc"}]}
        }));
    }
    json!({"total_rows": indexes.len(), "indexes": indexes})
}

/// A store whose databases, views and indexes are all in place.
pub async fn mount_converged_schema(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(welcome("3.3.3"))
        .mount(server)
        .await;
    Mock::given(method("HEAD"))
        .and(path_regex(r"^/galasa_(run|log|artifacts)$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/galasa_run/_design/docs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(converged_design_document()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/galasa_run/_index"))
        .respond_with(ResponseTemplate::new(200).set_body_json(converged_indexes()))
        .mount(server)
        .await;
}

pub fn created(id: &str, rev: &str) -> ResponseTemplate {
    ResponseTemplate::new(201).set_body_json(json!({"ok": true, "id": id, "rev": rev}))
}

pub fn conflict() -> ResponseTemplate {
    ResponseTemplate::new(409).set_body_json(json!({"error": "conflict", "reason": "Document update conflict."}))
}

/// Answers document creation with `{prefix}1`, `{prefix}2`, ...
pub struct CreatedInSequence {
    prefix: &'static str,
    count: AtomicUsize,
}

impl CreatedInSequence {
    pub fn new(prefix: &'static str) -> Self {
        CreatedInSequence {
            prefix,
            count: AtomicUsize::new(0),
        }
    }
}

impl Respond for CreatedInSequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let next = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        created(&format!("{}{}", self.prefix, next), "1-a")
    }
}

/// Accepts a revision-checked write and answers with the next revision,
/// `3-x` after `If-Match: 2-x`.
pub struct NextRevision;

impl Respond for NextRevision {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let current = if_match(request).unwrap_or_else(|| "0-new".to_string());
        let (generation, suffix) = current.split_once('-').unwrap_or(("0", "new"));
        let generation: u64 = generation.parse().unwrap_or(0);
        let id = request.url.path_segments().and_then(|mut segments| segments.nth(1)).unwrap_or("unknown");
        created(id, &format!("{}-{}", generation + 1, suffix))
    }
}

pub fn if_match(request: &Request) -> Option<String> {
    request
        .headers
        .get("if-match")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Creation of the run document and of (bundled mode) the artifact document.
pub async fn mount_run_documents(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/galasa_run"))
        .respond_with(created(RUN_DOCUMENT_ID, "1-a"))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/galasa_artifacts"))
        .respond_with(created(ARTIFACT_DOCUMENT_ID, "1-b"))
        .mount(server)
        .await;
}

pub async fn mount_run_document_updates(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path(format!("/galasa_run/{}", RUN_DOCUMENT_ID)))
        .respond_with(NextRevision)
        .mount(server)
        .await;
}

pub async fn requests_to(server: &MockServer, verb: &str, url_path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.method.as_str() == verb && request.url.path() == url_path)
        .collect()
}

/// Records terminations instead of ending the test process.
#[derive(Default)]
pub struct RecordingTerminator {
    messages: Mutex<Vec<String>>,
}

impl RecordingTerminator {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
