//! Terraform Cloud/Enterprise API client and pager
//!
//! Requests carry bearer auth and the JSON:API content type. Collections are
//! paged by following `links.next` until it is absent. A 404 means the
//! endpoint does not exist on this source version and yields an empty result.

use crate::config::ExporterConfig;
use crate::error::{MigrationError, Result};
use crate::http::{truncate, HttpRequest, Method, ReqwestTransport, Transport};
use crate::pattern::NamePattern;
use crate::record::Record;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const CONTENT_TYPE: &str = "application/vnd.api+json";

/// A paged fetch of one resource path
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub path: String,
    pub method: Method,
    pub body: Option<Value>,
    /// Dotted properties to keep; empty keeps the whole record
    pub properties: &'a [&'a str],
    /// Dotted properties removed from every record before projection
    pub drop_properties: &'a [&'a str],
    pub include: Option<&'a NamePattern>,
}

impl<'a> FetchRequest<'a> {
    pub fn get(path: impl Into<String>, properties: &'a [&'a str]) -> Self {
        Self {
            path: path.into(),
            method: Method::Get,
            body: None,
            properties,
            drop_properties: &[],
            include: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value, properties: &'a [&'a str]) -> Self {
        Self {
            method: Method::Post,
            body: Some(body),
            ..Self::get(path, properties)
        }
    }

    pub fn include(mut self, pattern: &'a NamePattern) -> Self {
        self.include = Some(pattern);
        self
    }

    pub fn drop_properties(mut self, properties: &'a [&'a str]) -> Self {
        self.drop_properties = properties;
        self
    }
}

/// Source platform REST client
#[derive(Clone)]
pub struct TfcClient {
    base_url: String,
    token: String,
    transport: Arc<dyn Transport>,
}

impl TfcClient {
    /// `endpoint` is the site URL, e.g. `https://app.terraform.io`
    pub fn new(endpoint: &str, token: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url: format!("{}/api/v2", endpoint.trim_end_matches('/')),
            token: token.to_string(),
            transport,
        }
    }

    pub fn from_config(config: &ExporterConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::new(&config.api_endpoint, config.token()?, Arc::new(transport)))
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn display_path<'p>(&self, url: &'p str) -> &'p str {
        url.strip_prefix(self.base_url.as_str()).unwrap_or(url)
    }

    /// Send one request; `None` for 404 or an empty body
    pub fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<Value>> {
        let url = self.url(path);
        let path = self.display_path(&url);

        let mut request = HttpRequest::new(method, url.as_str())
            .bearer(&self.token)
            .header("Content-Type", CONTENT_TYPE);
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        debug!(method = %method, path, "Calling source API");
        let response = self
            .transport
            .send(&request)
            .map_err(|e| e.into_error(path))?;

        if response.status == 404 {
            warn!(path, "Not found, the endpoint may not exist on this source version");
            return Ok(None);
        }
        if !response.is_success() {
            return Err(MigrationError::Http {
                path: path.to_string(),
                status: response.status,
                message: truncate(&response.body, 500),
            });
        }
        if response.body.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&response.body)
            .map(Some)
            .map_err(|e| MigrationError::UnexpectedResponse {
                path: path.to_string(),
                message: e.to_string(),
            })
    }

    /// Materialize every page of `request`, then filter and project
    pub fn fetch(&self, request: &FetchRequest<'_>) -> Result<Vec<Record>> {
        let mut raw = Vec::new();
        let mut next = Some(request.path.clone());

        while let Some(path) = next.take() {
            let Some(payload) = self.call(request.method, &path, request.body.as_ref())? else {
                break;
            };

            match payload.get("data") {
                Some(Value::Array(items)) => raw.extend(items.iter().cloned()),
                Some(item @ Value::Object(_)) => raw.push(item.clone()),
                _ => {}
            }

            next = payload
                .pointer("/links/next")
                .and_then(Value::as_str)
                .filter(|link| !link.is_empty() && self.url(link) != self.url(&path))
                .map(str::to_string);
        }

        let records: Vec<Record> = raw
            .into_iter()
            .filter_map(Record::from_value)
            .filter(|record| request.include.map_or(true, |p| p.matches(record.name())))
            .map(|mut record| {
                for property in request.drop_properties {
                    record.remove(property);
                }
                record.project(request.properties)
            })
            .collect();

        debug!(path = %request.path, count = records.len(), "Fetched records");
        Ok(records)
    }

    /// Fetch a single record, `None` when absent
    pub fn fetch_one(&self, request: &FetchRequest<'_>) -> Result<Option<Record>> {
        Ok(self.fetch(request)?.into_iter().next())
    }

    /// Download a plain text resource (plan log, state file)
    pub fn download_text(&self, url: &str) -> Result<String> {
        info!("Start downloading text file");
        let request = HttpRequest::new(Method::Get, url).bearer(&self.token);
        let path = self.display_path(url);
        let response = self
            .transport
            .send(&request)
            .map_err(|e| e.into_error(path))?;
        if !response.is_success() {
            return Err(MigrationError::Http {
                path: path.to_string(),
                status: response.status,
                message: truncate(&response.body, 500),
            });
        }
        info!("Stop downloading text file");
        Ok(response.body)
    }
}
