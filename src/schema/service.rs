use crate::config::RasConfig;
use crate::error::RasError;
use crate::http::{HttpRequest, StoreClient};
use crate::schema::model::{
    index_definition, index_name, StoreVersion, ViewDefinition, Welcome, DESIGN_DOCUMENT, INDEXED_FIELDS,
    REQUIRED_DATABASES, RUNS_DB, RUN_VIEWS,
};
use crate::schema::retry::RetryPolicy;
use reqwest::Url;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, PoisonError};
use tracing::{debug, info};

/// A store-side document (or collection) that should look a certain way.
pub(crate) trait DesiredShape {
    fn describe(&self) -> String;

    /// Where the current state is read from. A 404 there reads as `{}`.
    fn location(&self, client: &StoreClient) -> Url;

    /// The write that moves `current` to the desired shape, or `None` when it
    /// already matches.
    fn reconcile(&self, client: &StoreClient, current: Value) -> Result<Option<HttpRequest>, RasError>;
}

/// Reads the current state of `shape`, and writes it back when it differs.
/// A 409 on the write is reported as [`RasError::UpdateClash`] so a
/// [`RetryPolicy`] can start over from the read. Returns true if a write was
/// made.
pub(crate) async fn converge<S: DesiredShape>(client: &StoreClient, shape: &S) -> Result<bool, RasError> {
    let response = client.execute(HttpRequest::get(shape.location(client))).await?;
    let current = if response.is_not_found() {
        Value::Object(Map::new())
    } else if response.status == 200 {
        response.json::<Value>()?
    } else {
        return Err(response.unexpected());
    };

    let Some(request) = shape.reconcile(client, current)? else {
        debug!("{} is up to date", shape.describe());
        return Ok(false);
    };

    info!("updating {}", shape.describe());
    let response = client.execute(request).await?;
    if response.is_conflict() {
        return Err(RasError::UpdateClash(shape.describe()));
    }
    if !response.is_success() {
        return Err(response.unexpected());
    }
    Ok(true)
}

pub(crate) struct DesignDocumentShape {
    pub views: &'static [ViewDefinition],
}

impl DesiredShape for DesignDocumentShape {
    fn describe(&self) -> String {
        format!("{} design document", RUNS_DB)
    }

    fn location(&self, client: &StoreClient) -> Url {
        client.url(&[RUNS_DB, "_design", DESIGN_DOCUMENT])
    }

    fn reconcile(&self, client: &StoreClient, current: Value) -> Result<Option<HttpRequest>, RasError> {
        let mut document = match current {
            Value::Object(document) => document,
            _ => Map::new(),
        };
        document.remove("_id");
        let revision = document.get("_rev").and_then(Value::as_str).map(str::to_string);

        let mut updated = false;
        let mut views = match document.remove("views") {
            Some(Value::Object(views)) => views,
            _ => {
                updated = true;
                Map::new()
            }
        };
        for definition in self.views {
            let mut view = match views.remove(definition.name) {
                Some(Value::Object(view)) => view,
                _ => {
                    updated = true;
                    Map::new()
                }
            };
            updated |= definition.merge_into(&mut view);
            views.insert(definition.name.to_string(), Value::Object(view));
        }
        document.insert("views".to_string(), Value::Object(views));

        if !updated {
            return Ok(None);
        }
        let request = HttpRequest::put_json(self.location(client), &document)?;
        Ok(Some(match revision {
            Some(revision) => request.if_match(revision),
            None => request,
        }))
    }
}

pub(crate) struct IndexShape {
    pub field: &'static str,
}

impl DesiredShape for IndexShape {
    fn describe(&self) -> String {
        format!("{} index {}", RUNS_DB, index_name(self.field))
    }

    fn location(&self, client: &StoreClient) -> Url {
        client.url(&[RUNS_DB, "_index"])
    }

    fn reconcile(&self, client: &StoreClient, current: Value) -> Result<Option<HttpRequest>, RasError> {
        let name = index_name(self.field);
        let present = current
            .get("indexes")
            .and_then(Value::as_array)
            .is_some_and(|indexes| indexes.iter().any(|index| index.get("name").and_then(Value::as_str) == Some(name.as_str())));
        if present {
            return Ok(None);
        }
        HttpRequest::post_json(self.location(client), &index_definition(self.field)).map(Some)
    }
}

fn validated_stores() -> &'static Mutex<HashSet<String>> {
    static VALIDATED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    VALIDATED.get_or_init(Default::default)
}

/// Brings the store's databases, views and indexes to the layout the engine
/// needs. Every step is safe to repeat and safe to race with other engines.
pub struct SchemaValidator {
    client: StoreClient,
    retry: RetryPolicy,
    min_version: StoreVersion,
}

impl SchemaValidator {
    pub fn new(client: StoreClient, config: &RasConfig) -> Self {
        SchemaValidator {
            client,
            retry: config.retry.clone(),
            min_version: config.min_store_version,
        }
    }

    /// Validates the store unless this process already validated the same
    /// store uri.
    pub async fn ensure_valid_once(&self) -> Result<(), RasError> {
        let key = self.client.base_uri().to_string();
        if validated_stores()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
        {
            debug!("document store at {} already validated", key);
            return Ok(());
        }
        self.ensure_schema_valid().await?;
        validated_stores()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        Ok(())
    }

    pub async fn ensure_schema_valid(&self) -> Result<(), RasError> {
        let version = self.welcome_version().await?;
        if version < self.min_version {
            return Err(RasError::VersionTooLow {
                actual: version.to_string(),
                minimum: self.min_version.to_string(),
            });
        }

        for database in REQUIRED_DATABASES {
            self.retry
                .run(&format!("create database {}", database), || self.ensure_database(database))
                .await?;
        }

        let design = DesignDocumentShape { views: &RUN_VIEWS };
        self.retry
            .run(&format!("update of {}", design.describe()), || converge(&self.client, &design))
            .await?;

        for field in INDEXED_FIELDS {
            let index = IndexShape { field };
            self.retry
                .run(&format!("create of {}", index.describe()), || converge(&self.client, &index))
                .await?;
        }

        info!("document store at {} validated", self.client.base_uri());
        Ok(())
    }

    async fn welcome_version(&self) -> Result<StoreVersion, RasError> {
        let response = self.client.execute(HttpRequest::get(self.client.url(&[]))).await?;
        if response.status != 200 {
            return Err(response.unexpected());
        }
        let welcome = response.json::<Welcome>()?;
        match (welcome.couchdb.as_deref(), welcome.version) {
            (Some("Welcome"), Some(version)) => {
                debug!("document store reports version {}", version);
                version.parse()
            }
            _ => Err(RasError::malformed(&response.url, "not a CouchDB welcome message")),
        }
    }

    async fn ensure_database(&self, database: &str) -> Result<(), RasError> {
        let url = self.client.url(&[database]);
        let probe = self.client.execute(HttpRequest::head(url.clone())).await?;
        if probe.status == 200 {
            return Ok(());
        }
        if !probe.is_not_found() {
            return Err(probe.unexpected());
        }

        info!("database {} is missing, creating", database);
        let created = self.client.execute(HttpRequest::put_empty(url)).await?;
        if created.is_conflict() {
            return Err(RasError::UpdateClash(format!("database {}", database)));
        }
        if created.status != 201 && created.status != 202 {
            return Err(created.unexpected());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ReqBody;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn client() -> StoreClient {
        StoreClient::new(&RasConfig::builder().store_uri("http://couchdb.example:5984").build()).unwrap()
    }

    fn body(request: &HttpRequest) -> Value {
        match &request.req_body {
            ReqBody::Json(bytes) => serde_json::from_slice(bytes).unwrap(),
            other => panic!("expected a json body, got {:?}", other),
        }
    }

    fn converged_design_document() -> Value {
        let mut views = Map::new();
        for definition in &RUN_VIEWS {
            views.insert(
                definition.name.to_string(),
                json!({"map": definition.map, "reduce": definition.reduce, "language": "javascript"}),
            );
        }
        json!({"_id": "_design/docs", "_rev": "4-abc", "views": views})
    }

    #[test]
    fn empty_design_document_gets_all_views() {
        let shape = DesignDocumentShape { views: &RUN_VIEWS };
        let request = shape.reconcile(&client(), json!({})).unwrap().unwrap();

        assert_eq!(request.if_match, None);
        assert_eq!(request.endpoint.url.path(), "/galasa_run/_design/docs");
        let written = body(&request);
        assert_eq!(
            written["views"]["bundle-testnames-view"]["map"],
            "function (doc) { emit(doc.bundle + '/' + doc.testName, 1); }"
        );
        assert_eq!(written["views"]["testnames-view"]["map"], "function (doc) { emit(doc.testName, 1); }");
        assert_eq!(written["views"].as_object().unwrap().len(), 4);
    }

    #[test]
    fn converged_design_document_needs_no_write() {
        let shape = DesignDocumentShape { views: &RUN_VIEWS };
        assert!(shape.reconcile(&client(), converged_design_document()).unwrap().is_none());
    }

    #[test]
    fn drifted_view_is_rewritten_against_the_fetched_revision() {
        let mut current = converged_design_document();
        current["views"]["result-view"]["reduce"] = json!("_sum");
        current["views"]["custom-view"] = json!({"map": "function (doc) {}"});

        let shape = DesignDocumentShape { views: &RUN_VIEWS };
        let request = shape.reconcile(&client(), current).unwrap().unwrap();

        assert_eq!(request.if_match.as_deref(), Some("4-abc"));
        let written = body(&request);
        assert_eq!(written.get("_id"), None);
        assert_eq!(written["_rev"], "4-abc");
        assert_eq!(written["views"]["result-view"]["reduce"], "_count");
        assert_eq!(written["views"]["custom-view"]["map"], "function (doc) {}");
    }

    #[test]
    fn index_is_created_only_when_missing() {
        let shape = IndexShape { field: "requestor" };
        let present = json!({"total_rows": 2, "indexes": [
            {"ddoc": null, "name": "_all_docs", "type": "special"},
            {"ddoc": "_design/x", "name": "requestor-index", "type": "json"}
        ]});
        assert!(shape.reconcile(&client(), present).unwrap().is_none());

        let request = shape
            .reconcile(&client(), json!({"indexes": [{"name": "runName-index"}]}))
            .unwrap()
            .unwrap();
        assert_eq!(request.endpoint.url.path(), "/galasa_run/_index");
        assert_eq!(body(&request), index_definition("requestor"));
    }
}
