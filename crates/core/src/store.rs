//! Paginated resource retrieval from a FHIR server.
//!
//! The [`DataStore`] executes a group's population query and walks the
//! server's `next` links page by page. Idempotent fetches are retried with
//! exponential backoff on serverside and not-found failures, up to a fixed
//! budget; client errors are never retried. Report upload goes through the
//! same client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde_json::Value;

use crate::config::EvaluatorConfig;
use crate::error::{StoreError, StoreResult};

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// One resource of the record stream, together with the `include` resources
/// of its page for reference resolution.
#[derive(Debug, Clone)]
pub struct Record {
    resource: Value,
    includes: Arc<HashMap<String, Value>>,
}

impl Record {
    pub fn new(resource: Value, includes: Arc<HashMap<String, Value>>) -> Record {
        Record { resource, includes }
    }

    /// A record without any included resources.
    pub fn detached(resource: Value) -> Record {
        Record {
            resource,
            includes: Arc::new(HashMap::new()),
        }
    }

    pub fn resource(&self) -> &Value {
        &self.resource
    }

    /// Look up an included resource by literal reference (`Type/id`).
    pub fn include(&self, reference: &str) -> Option<&Value> {
        self.includes.get(reference)
    }
}

/// Client for the FHIR server the records are drawn from.
pub struct DataStore {
    client: reqwest::Client,
    base_url: String,
    page_count: u32,
    basic_auth: Option<(String, String)>,
}

impl DataStore {
    pub fn new(config: &EvaluatorConfig) -> StoreResult<DataStore> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/fhir+json"));
        if let Some(token) = &config.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| StoreError::InvalidBearerToken)?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(StoreError::Client)?;

        Ok(DataStore {
            client,
            base_url: config.server_base_url.trim_end_matches('/').to_owned(),
            page_count: config.page_count,
            basic_auth: config
                .basic_auth
                .as_ref()
                .map(|(u, p)| (u.clone(), p.clone())),
        })
    }

    /// Start the record stream for `query` (a FHIR search query relative to
    /// the server base, e.g. `Condition?code=...`).
    pub fn resources(&self, query: &str) -> ResourcePages<'_> {
        let url = format!(
            "{}/{}",
            self.base_url,
            append_page_count(query.trim_start_matches('/'), self.page_count)
        );
        ResourcePages {
            store: self,
            next_url: Some(url),
        }
    }

    /// Post a serialised report to the server.
    pub async fn post_report(&self, report: String) -> StoreResult<()> {
        let url = self.base_url.clone();
        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/fhir+json")
            .body(report);
        if let Some((user, password)) = &self.basic_auth {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await.map_err(|e| StoreError::Transport {
            url: url.clone(),
            source: e,
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::ReportUpload {
            status: status.as_u16(),
            body,
        })
    }

    /// Fetch one bundle, retrying retryable failures with exponential
    /// backoff up to the retry budget.
    async fn fetch_bundle(&self, url: &str) -> StoreResult<fhir::Bundle> {
        let mut attempt = 0;
        loop {
            match self.try_fetch_bundle(url).await {
                Ok(bundle) => return Ok(bundle),
                Err(e) if e.is_retryable() => {
                    if attempt == MAX_RETRIES {
                        return Err(StoreError::RetriesExhausted {
                            attempts: MAX_RETRIES,
                            source: Box::new(e),
                        });
                    }
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    tracing::debug!(url, attempt, ?delay, "retrying fetch: {e}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_fetch_bundle(&self, url: &str) -> StoreResult<fhir::Bundle> {
        let mut request = self.client.get(url);
        if let Some((user, password)) = &self.basic_auth {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await.map_err(|e| StoreError::Transport {
            url: url.to_owned(),
            source: e,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| StoreError::Transport {
            url: url.to_owned(),
            source: e,
        })?;
        fhir::Bundle::from_json_str(&body).map_err(|e| StoreError::InvalidBundle {
            url: url.to_owned(),
            source: Box::new(e),
        })
    }
}

/// Lazy page walker over one population query.
pub struct ResourcePages<'a> {
    store: &'a DataStore,
    next_url: Option<String>,
}

impl ResourcePages<'_> {
    /// Fetch the next page of records, or `None` after the last page.
    ///
    /// A failed fetch or a malformed record terminates the stream; the same
    /// walker must not be polled again afterwards.
    pub async fn next_page(&mut self) -> Option<StoreResult<Vec<Record>>> {
        let url = self.next_url.take()?;

        let bundle = match self.store.fetch_bundle(&url).await {
            Ok(bundle) => bundle,
            Err(e) => return Some(Err(e)),
        };
        tracing::trace!(url = %url, entries = bundle.entry.len(), "fetched page");

        self.next_url = bundle.next_link().map(str::to_owned);
        Some(page_records(bundle))
    }
}

/// Split a page's entries into match records and shared includes.
///
/// A malformed entry anywhere in the page aborts the whole stream with an
/// error naming the offending resource as far as it can be recovered.
fn page_records(bundle: fhir::Bundle) -> StoreResult<Vec<Record>> {
    let mut matches = Vec::new();
    let mut includes = HashMap::new();

    for entry in bundle.entry {
        let mode = entry.search_mode().to_owned();
        let resource = entry.resource.unwrap_or(Value::Null);
        let (res_type, id) = resource_identity(&resource);

        if !resource.is_object() || res_type.is_empty() || id.is_empty() {
            return Err(StoreError::MalformedResource {
                res_type: fallback_unknown(res_type),
                id: fallback_unknown(id),
            });
        }

        if mode == "include" {
            includes.insert(format!("{res_type}/{id}"), resource);
        } else {
            matches.push(resource);
        }
    }

    let includes = Arc::new(includes);
    Ok(matches
        .into_iter()
        .map(|resource| Record::new(resource, Arc::clone(&includes)))
        .collect())
}

fn resource_identity(resource: &Value) -> (String, String) {
    let res_type = resource
        .get("resourceType")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let id = resource
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    (res_type, id)
}

fn fallback_unknown(value: String) -> String {
    if value.is_empty() {
        "unknown".to_owned()
    } else {
        value
    }
}

/// Append the page size to a query, respecting existing parameters.
fn append_page_count(query: &str, page_count: u32) -> String {
    if query.contains('?') {
        format!("{query}&_count={page_count}")
    } else {
        format!("{query}?_count={page_count}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_page_count_without_params() {
        assert_eq!(append_page_count("Condition", 100), "Condition?_count=100");
    }

    #[test]
    fn test_append_page_count_with_params() {
        assert_eq!(
            append_page_count("Condition?code=J44", 100),
            "Condition?code=J44&_count=100"
        );
    }

    fn bundle_of(entries: Vec<fhir::BundleEntry>) -> fhir::Bundle {
        fhir::Bundle {
            entry: entries,
            ..fhir::Bundle::default()
        }
    }

    fn entry(resource: Value, mode: Option<&str>) -> fhir::BundleEntry {
        fhir::BundleEntry {
            resource: Some(resource),
            search: mode.map(|m| fhir::BundleEntrySearch {
                mode: Some(m.into()),
            }),
        }
    }

    #[test]
    fn test_page_records_partitions_matches_and_includes() {
        let bundle = bundle_of(vec![
            entry(
                json!({"resourceType": "Condition", "id": "c1", "subject": {"reference": "Patient/p1"}}),
                Some("match"),
            ),
            entry(json!({"resourceType": "Patient", "id": "p1"}), Some("include")),
        ]);

        let records = page_records(bundle).unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.resource()["id"], "c1");
        assert_eq!(
            record.include("Patient/p1").map(|r| r["id"].clone()),
            Some(json!("p1"))
        );
    }

    #[test]
    fn test_page_records_absent_mode_is_match() {
        let bundle = bundle_of(vec![entry(
            json!({"resourceType": "Condition", "id": "c1"}),
            None,
        )]);

        let records = page_records(bundle).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_malformed_record_aborts_page() {
        let bundle = bundle_of(vec![
            entry(json!({"resourceType": "Condition", "id": "c1"}), Some("match")),
            entry(json!({"resourceType": "Condition"}), Some("match")),
        ]);

        let err = page_records(bundle).unwrap_err();
        match err {
            StoreError::MalformedResource { res_type, id } => {
                assert_eq!(res_type, "Condition");
                assert_eq!(id, "unknown");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_object_resource_is_malformed() {
        let bundle = bundle_of(vec![entry(json!("not a resource"), Some("match"))]);

        let err = page_records(bundle).unwrap_err();
        match err {
            StoreError::MalformedResource { res_type, id } => {
                assert_eq!(res_type, "unknown");
                assert_eq!(id, "unknown");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
