use crate::error::RasError;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub const RUNS_DB: &str = "galasa_run";
pub const LOG_DB: &str = "galasa_log";
pub const ARTIFACTS_DB: &str = "galasa_artifacts";

pub const REQUIRED_DATABASES: [&str; 3] = [RUNS_DB, LOG_DB, ARTIFACTS_DB];

pub const DESIGN_DOCUMENT: &str = "docs";

pub const REQUESTORS_VIEW: &str = "requestors-view";
pub const RESULT_VIEW: &str = "result-view";
pub const TESTNAMES_VIEW: &str = "testnames-view";
pub const BUNDLE_TESTNAMES_VIEW: &str = "bundle-testnames-view";

/// Fields of the run database that get a single-field json index.
pub const INDEXED_FIELDS: [&str; 8] = [
    "runName",
    "requestor",
    "queued",
    "startTime",
    "endTime",
    "testName",
    "bundle",
    "result",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreVersion {
    pub version: u32,
    pub release: u32,
    pub modification: u32,
}

impl StoreVersion {
    pub const fn new(version: u32, release: u32, modification: u32) -> Self {
        Self {
            version,
            release,
            modification,
        }
    }
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)$").expect("version pattern is valid"))
}

impl FromStr for StoreVersion {
    type Err = RasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = version_pattern()
            .captures(s)
            .ok_or_else(|| RasError::InvalidVersion(s.to_string()))?;
        let part = |index: usize| -> Result<u32, RasError> {
            captures[index]
                .parse::<u32>()
                .map_err(|_| RasError::InvalidVersion(s.to_string()))
        };
        Ok(StoreVersion::new(part(1)?, part(2)?, part(3)?))
    }
}

impl fmt::Display for StoreVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.version, self.release, self.modification)
    }
}

/// Body of `GET /` on the store.
#[derive(Deserialize, Debug)]
pub struct Welcome {
    pub couchdb: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewDefinition {
    pub name: &'static str,
    pub map: &'static str,
    pub reduce: &'static str,
}

impl ViewDefinition {
    /// Overwrites any of `map`, `reduce` or `language` on `view` that differ
    /// from this definition. Returns true when something changed.
    pub fn merge_into(&self, view: &mut Map<String, Value>) -> bool {
        let mut updated = false;
        for (field, value) in [("map", self.map), ("reduce", self.reduce), ("language", "javascript")] {
            if view.get(field).and_then(Value::as_str) != Some(value) {
                view.insert(field.to_string(), Value::String(value.to_string()));
                updated = true;
            }
        }
        updated
    }
}

/// These function bodies run inside the store, so they are kept exactly as the
/// store expects them.
pub const RUN_VIEWS: [ViewDefinition; 4] = [
    ViewDefinition {
        name: REQUESTORS_VIEW,
        map: "function (doc) { emit(doc.requestor, 1); }",
        reduce: "_count",
    },
    ViewDefinition {
        name: RESULT_VIEW,
        map: "function (doc) { emit(doc.result, 1); }",
        reduce: "_count",
    },
    ViewDefinition {
        name: TESTNAMES_VIEW,
        map: "function (doc) { emit(doc.testName, 1); }",
        reduce: "_count",
    },
    ViewDefinition {
        name: BUNDLE_TESTNAMES_VIEW,
        map: "function (doc) { emit(doc.bundle + '/' + doc.testName, 1); }",
        reduce: "_count",
    },
];

pub fn index_name(field: &str) -> String {
    format!("{}-index", field)
}

pub fn index_definition(field: &str) -> Value {
    let mut fields = Map::new();
    fields.insert(field.to_string(), Value::String("asc".to_string()));
    json!({
        "index": { "fields": [Value::Object(fields)] },
        "name": index_name(field),
        "type": "json",
    })
}
