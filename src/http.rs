use crate::config::RasConfig;
use crate::error::RasError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, IF_MATCH};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

pub const APPLICATION_JSON: &str = "application/json";

#[derive(Clone, Debug, PartialEq)]
pub struct ReqParam {
    pub key: String,
    pub value: String,
}

impl ReqParam {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        ReqParam {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReqBody {
    Empty,
    Json(Vec<u8>),
    Bytes(Vec<u8>),
}

impl ReqBody {
    pub fn empty() -> Self {
        ReqBody::Empty
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, RasError> {
        serde_json::to_vec(value)
            .map(ReqBody::Json)
            .map_err(|e| RasError::Config(format!("unable to serialise request body: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    GET,
    HEAD,
    POST,
    PUT,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::GET => "GET",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
        };
        f.write_str(name)
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::GET => Method::GET,
            HttpMethod::HEAD => Method::HEAD,
            HttpMethod::POST => Method::POST,
            HttpMethod::PUT => Method::PUT,
        }
    }
}

pub struct Endpoint {
    pub method: HttpMethod,
    pub url: Url,
    pub query_params: Vec<ReqParam>,
}

impl Endpoint {
    pub fn new(method: HttpMethod, url: Url) -> Endpoint {
        Endpoint {
            method,
            url,
            query_params: vec![],
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push(ReqParam::new(key, value));
        self
    }

    pub fn to_url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for param in &self.query_params {
                pairs.append_pair(&param.key, &param.value);
            }
        }
        url
    }
}

pub struct HttpRequest {
    pub endpoint: Endpoint,
    pub req_body: ReqBody,
    pub content_type: String,
    pub if_match: Option<String>,
}

impl HttpRequest {
    pub fn new(endpoint: Endpoint, req_body: ReqBody, content_type: impl Into<String>) -> HttpRequest {
        HttpRequest {
            endpoint,
            req_body,
            content_type: content_type.into(),
            if_match: None,
        }
    }

    pub fn get(url: Url) -> HttpRequest {
        Self::new(Endpoint::new(HttpMethod::GET, url), ReqBody::empty(), APPLICATION_JSON)
    }

    pub fn head(url: Url) -> HttpRequest {
        Self::new(Endpoint::new(HttpMethod::HEAD, url), ReqBody::empty(), APPLICATION_JSON)
    }

    pub fn put_empty(url: Url) -> HttpRequest {
        Self::new(Endpoint::new(HttpMethod::PUT, url), ReqBody::empty(), APPLICATION_JSON)
    }

    pub fn post_json<T: Serialize + ?Sized>(url: Url, body: &T) -> Result<HttpRequest, RasError> {
        Ok(Self::new(Endpoint::new(HttpMethod::POST, url), ReqBody::json(body)?, APPLICATION_JSON))
    }

    pub fn put_json<T: Serialize + ?Sized>(url: Url, body: &T) -> Result<HttpRequest, RasError> {
        Ok(Self::new(Endpoint::new(HttpMethod::PUT, url), ReqBody::json(body)?, APPLICATION_JSON))
    }

    pub fn put_bytes(url: Url, bytes: Vec<u8>, content_type: impl Into<String>) -> HttpRequest {
        Self::new(Endpoint::new(HttpMethod::PUT, url), ReqBody::Bytes(bytes), content_type)
    }

    /// Makes the write conditional on the document still being at `revision`.
    pub fn if_match(mut self, revision: impl Into<String>) -> Self {
        self.if_match = Some(revision.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.endpoint = self.endpoint.query(key, value);
        self
    }

    pub fn describe(&self) -> (String, String) {
        (self.endpoint.method.to_string(), self.endpoint.to_url().to_string())
    }
}

pub struct StoreResponse {
    pub operation: String,
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl StoreResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RasError> {
        serde_json::from_slice(&self.body).map_err(|e| RasError::malformed(&self.url, e.to_string()))
    }

    pub fn unexpected(&self) -> RasError {
        RasError::UnexpectedStatus {
            operation: self.operation.clone(),
            url: self.url.clone(),
            status: self.status,
            body: self.text(),
        }
    }
}

/// Builds and sends requests to the document store. Cheap to clone, all
/// clones share one connection pool.
#[derive(Clone)]
pub struct StoreClient {
    client: Client,
    base: Url,
    authorization: Option<HeaderValue>,
}

impl StoreClient {
    pub fn new(config: &RasConfig) -> Result<Self, RasError> {
        let base = Url::parse(&config.store_uri)
            .map_err(|e| RasError::Config(format!("invalid store uri '{}': {}", config.store_uri, e)))?;
        if base.cannot_be_a_base() {
            return Err(RasError::Config(format!("store uri '{}' cannot be used as a base", config.store_uri)));
        }
        let authorization = match &config.token {
            Some(token) => Some(
                HeaderValue::from_str(token)
                    .map_err(|_| RasError::Config("store token is not a valid header value".to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            client: Client::new(),
            base,
            authorization,
        })
    }

    pub fn base_uri(&self) -> &Url {
        &self.base
    }

    /// `{base}/{segment}/{segment}...` with every segment percent-encoded, so
    /// an attachment name like `/dir/file.txt` stays one segment.
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn build_request(&self, request: &HttpRequest) -> RequestBuilder {
        let endpoint = &request.endpoint;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
        if !matches!(endpoint.method, HttpMethod::GET | HttpMethod::HEAD) {
            insert_header(&mut headers, CONTENT_TYPE, &request.content_type);
        }
        if let Some(token) = &self.authorization {
            headers.insert(AUTHORIZATION, token.clone());
        }
        if let Some(revision) = &request.if_match {
            insert_header(&mut headers, IF_MATCH, revision);
        }

        let mut builder = self
            .client
            .request(endpoint.method.into(), endpoint.to_url())
            .headers(headers);
        match &request.req_body {
            ReqBody::Empty => {}
            ReqBody::Json(bytes) | ReqBody::Bytes(bytes) => builder = builder.body(bytes.clone()),
        }
        builder
    }

    pub async fn execute(&self, request: HttpRequest) -> Result<StoreResponse, RasError> {
        let (operation, url) = request.describe();
        debug!("{} {}", operation, url);
        let response = self
            .build_request(&request)
            .send()
            .await
            .map_err(|source| RasError::Transport {
                operation: operation.clone(),
                url: url.clone(),
                source,
            })?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|source| RasError::Transport {
            operation: operation.clone(),
            url: url.clone(),
            source,
        })?;
        debug!("{} {} returned {}", operation, url, status);
        Ok(StoreResponse {
            operation,
            url,
            status,
            body: body.to_vec(),
        })
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!("dropping header {} with an invalid value", name),
    }
}
