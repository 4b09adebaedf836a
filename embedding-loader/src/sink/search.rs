use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client, Response, StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{DocumentFailure, UploadReport, UploadSink};
use crate::{error::UploadError, record::CombinedRecord};

const API_KEY_HEADER: &str = "api-key";
const UPLOAD_ACTION: &str = "mergeOrUpload";

/// Longest response body kept in an error.
const ERROR_BODY_LEN: usize = 512;

#[derive(Serialize)]
struct IndexAction<'a> {
    #[serde(rename = "@search.action")]
    action: &'static str,
    #[serde(flatten)]
    record: &'a CombinedRecord,
}

#[derive(Serialize)]
struct IndexBatch<'a> {
    value: Vec<IndexAction<'a>>,
}

#[derive(Deserialize)]
struct IndexResponse {
    value: Vec<IndexResult>,
}

#[derive(Deserialize)]
struct IndexResult {
    key: String,
    status: bool,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
    #[serde(rename = "statusCode", default)]
    status_code: u16,
}

/// Per-document statuses the search service documents as transient.
fn is_retryable_document_status(status: u16) -> bool {
    matches!(status, 409 | 422 | 429 | 503)
}

/// Uploads batches to a vector search index over its REST API.
pub struct SearchIndexSink {
    client: Client,
    endpoint: String,
    index_name: String,
    api_version: String,
}

impl SearchIndexSink {
    pub fn new(
        endpoint: String,
        index_name: String,
        api_key: Option<String>,
        api_version: String,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let mut value = HeaderValue::from_str(&key)
                .map_err(|_| UploadError::Config("api key is not a valid header value".into()))?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            index_name,
            api_version,
        })
    }

    fn index_url(&self) -> String {
        format!("{}/indexes/{}", self.endpoint, self.index_name)
    }

    fn documents_url(&self) -> String {
        format!("{}/docs/index", self.index_url())
    }

    /// Creates the index, or updates its schema, with vector fields of the given dimension.
    pub async fn ensure_index(&self, dimensions: usize) -> Result<(), UploadError> {
        let vector_field = |name: &str| {
            json!({
                "name": name,
                "type": "Collection(Edm.Single)",
                "searchable": true,
                "retrievable": true,
                "dimensions": dimensions,
                "vectorSearchProfile": "embedding-profile",
            })
        };
        let schema = json!({
            "name": self.index_name,
            "fields": [
                {"name": "id", "type": "Edm.String", "key": true, "filterable": true},
                {"name": "text", "type": "Edm.String", "searchable": true, "retrievable": true},
                {"name": "DocumentName", "type": "Edm.String", "filterable": true, "retrievable": true},
                {"name": "DocumentURL", "type": "Edm.String", "retrievable": true},
                vector_field("data_embedding"),
                vector_field("citation_embedding"),
            ],
            "vectorSearch": {
                "algorithms": [{"name": "embedding-hnsw", "kind": "hnsw"}],
                "profiles": [{"name": "embedding-profile", "algorithm": "embedding-hnsw"}],
            },
        });

        info!(index = %self.index_name, dimensions, "Ensuring search index exists");
        let response = self
            .client
            .put(self.index_url())
            .query(&[("api-version", &self.api_version)])
            .json(&schema)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }
}

async fn status_error(response: Response) -> UploadError {
    let status = response.status().as_u16();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > ERROR_BODY_LEN {
        let mut end = ERROR_BODY_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    UploadError::Status { status, body }
}

#[async_trait]
impl UploadSink for SearchIndexSink {
    async fn upload(&self, batch: &[CombinedRecord]) -> Result<UploadReport, UploadError> {
        let payload = IndexBatch {
            value: batch
                .iter()
                .map(|record| IndexAction {
                    action: UPLOAD_ACTION,
                    record,
                })
                .collect(),
        };
        let body = serde_json::to_vec(&payload)?;

        let response = self
            .client
            .post(self.documents_url())
            .query(&[("api-version", &self.api_version)])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let err = status_error(response).await;
            warn!(index = %self.index_name, error = %err, "Search service rejected batch");
            return Err(err);
        }

        let body = response.bytes().await?;
        let results: IndexResponse = match serde_json::from_slice(&body) {
            Ok(results) => results,
            // A plain 200 means every document was stored
            Err(e) if status == StatusCode::OK => {
                warn!(index = %self.index_name, error = %e, "Unreadable response to a successful batch");
                return Ok(UploadReport::success());
            }
            Err(e) => {
                return Err(UploadError::UnreadableResponse {
                    status: status.as_u16(),
                    reason: e.to_string(),
                })
            }
        };
        let failures: Vec<DocumentFailure> = results
            .value
            .into_iter()
            .filter(|r| !r.status)
            .map(|r| DocumentFailure {
                retryable: is_retryable_document_status(r.status_code),
                reason: format!(
                    "{}: {}",
                    r.status_code,
                    r.error_message.unwrap_or_default()
                ),
                id: r.key,
            })
            .collect();

        debug!(
            index = %self.index_name,
            documents = batch.len(),
            failed = failures.len(),
            status = status.as_u16(),
            "Uploaded batch to search service"
        );
        Ok(UploadReport { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, Method::PUT, MockServer};

    const API_VERSION: &str = "2023-11-01";

    fn record(id: &str) -> CombinedRecord {
        CombinedRecord {
            id: id.to_string(),
            text: format!("text of {id}"),
            data_embedding: vec![0.5, 0.25],
            document_name: "Doc".to_string(),
            document_url: "http://doc".to_string(),
            citation_embedding: vec![1.0, 2.0],
        }
    }

    fn sink(server: &MockServer) -> SearchIndexSink {
        SearchIndexSink::new(
            server.base_url(),
            "embeddings".to_string(),
            Some("secret".to_string()),
            API_VERSION.to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_upload_sends_merge_or_upload_actions() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/indexes/embeddings/docs/index")
                .query_param("api-version", API_VERSION)
                .header("api-key", "secret")
                .json_body(json!({
                    "value": [{
                        "@search.action": "mergeOrUpload",
                        "id": "a_0",
                        "text": "text of a_0",
                        "data_embedding": [0.5, 0.25],
                        "DocumentName": "Doc",
                        "DocumentURL": "http://doc",
                        "citation_embedding": [1.0, 2.0],
                    }]
                }));
            then.status(200).json_body(json!({
                "value": [{"key": "a_0", "status": true, "errorMessage": null, "statusCode": 201}]
            }));
        });

        let report = sink(&server).upload(&[record("a_0")]).await.unwrap();

        mock.assert_async().await;
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_partial_failure_is_reported_per_document() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(POST).path("/indexes/embeddings/docs/index");
            then.status(207).json_body(json!({
                "value": [
                    {"key": "a", "status": true, "errorMessage": null, "statusCode": 200},
                    {"key": "b", "status": false, "errorMessage": "throttled", "statusCode": 503},
                    {"key": "c", "status": false, "errorMessage": "bad field", "statusCode": 400},
                ]
            }));
        });

        let report = sink(&server)
            .upload(&[record("a"), record("b"), record("c")])
            .await
            .unwrap();

        assert_eq!(
            report.failures,
            vec![
                DocumentFailure {
                    id: "b".to_string(),
                    reason: "503: throttled".to_string(),
                    retryable: true,
                },
                DocumentFailure {
                    id: "c".to_string(),
                    reason: "400: bad field".to_string(),
                    retryable: false,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_unreadable_response_bodies() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(POST).path("/indexes/embeddings/docs/index");
            then.status(200).body("<html>ok</html>");
        });
        let report = sink(&server).upload(&[record("a")]).await.unwrap();
        assert!(report.is_success());

        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(POST).path("/indexes/embeddings/docs/index");
            then.status(207).body("{\"value\": [");
        });
        let err = sink(&server).upload(&[record("a")]).await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::UnreadableResponse { status: 207, .. }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_document_status_code() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(POST).path("/indexes/embeddings/docs/index");
            then.status(207).json_body(json!({
                "value": [{"key": "a", "status": false, "errorMessage": "failed"}]
            }));
        });

        let report = sink(&server).upload(&[record("a")]).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "a");
        assert!(!report.failures[0].retryable);
    }

    #[tokio::test]
    async fn test_request_failure_status() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(POST).path("/indexes/embeddings/docs/index");
            then.status(503).body("service unavailable");
        });

        let err = sink(&server).upload(&[record("a")]).await.unwrap_err();
        assert!(err.is_retryable());
        match err {
            UploadError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "service unavailable");
            }
            other => panic!("unexpected error {other:?}"),
        }

        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(POST).path("/indexes/embeddings/docs/index");
            then.status(400).body("invalid document");
        });
        let err = sink(&server).upload(&[record("a")]).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_ensure_index_puts_schema() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/indexes/embeddings")
                .query_param("api-version", API_VERSION)
                .json_body_partial(r#"{"name": "embeddings", "vectorSearch": {"algorithms": [{"name": "embedding-hnsw", "kind": "hnsw"}]}}"#);
            then.status(201);
        });

        sink(&server).ensure_index(1536).await.unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_invalid_api_key_is_config_error() {
        let res = SearchIndexSink::new(
            "http://localhost".to_string(),
            "embeddings".to_string(),
            Some("bad\nkey".to_string()),
            API_VERSION.to_string(),
            Duration::from_secs(1),
        );
        assert!(matches!(res, Err(UploadError::Config(_))));
    }
}
