//! HTTP remote backed by a PostgREST entity API and an object storage API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{BlobReference, Filter, Predicate, RemoteBackend};
use crate::config::RemoteConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::models::Table;
use crate::util::{compact_text, is_http_url, trim_object_path};
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote backend speaking the Supabase-style REST and storage endpoints.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    config: RemoteConfig,
    client: reqwest::Client,
    connectivity: Option<ConnectivityMonitor>,
}

impl HttpRemote {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| Error::Config(format!("Failed to construct HTTP client: {error}")))?;
        Ok(Self {
            config,
            client,
            connectivity: None,
        })
    }

    /// Report connection failures to `monitor` so callers stop issuing requests.
    #[must_use]
    pub fn with_connectivity(mut self, monitor: ConnectivityMonitor) -> Self {
        self.connectivity = Some(monitor);
        self
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(self.config.bearer_token())
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.config.api_url, table.name())
    }

    fn object_url(&self, route: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{route}{}/{}",
            self.config.api_url,
            urlencoding::encode(&self.config.storage_bucket),
            encode_object_path(path)
        )
    }

    async fn send(&self, action: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|error| self.map_send_error(action, &error))?;
        if let Some(monitor) = &self.connectivity {
            monitor.set_online(true);
        }

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!(
                "{action}: {}",
                compact_text(&body)
            )));
        }
        Err(Error::RemoteRejected(format!(
            "{action} failed with HTTP {}: {}",
            status.as_u16(),
            compact_text(&body)
        )))
    }

    fn map_send_error(&self, action: &str, error: &reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::Timeout(format!("{action}: {error}"))
        } else if error.is_connect() {
            if let Some(monitor) = &self.connectivity {
                monitor.set_online(false);
            }
            Error::Connectivity(format!("{action}: {error}"))
        } else {
            Error::RemoteRejected(format!("{action}: {error}"))
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(action: &str, response: Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|error| Error::RemoteRejected(format!("{action}: invalid response body: {error}")))
    }
}

#[async_trait]
impl RemoteBackend for HttpRemote {
    async fn fetch_entity(&self, table: Table, id: &str) -> Result<Option<Value>> {
        let filter = Filter::new().eq("id", id);
        let mut records = self.fetch_entities(table, &filter).await?;
        Ok(if records.is_empty() {
            None
        } else {
            Some(records.swap_remove(0))
        })
    }

    async fn fetch_entities(&self, table: Table, filter: &Filter) -> Result<Vec<Value>> {
        let action = format!("fetch {table}");
        let mut query = vec![("select".to_string(), "*".to_string())];
        query.extend(filter.predicates().iter().map(encode_predicate));

        let request = self
            .request(Method::GET, self.table_url(table))
            .header("Accept", "application/json")
            .query(&query);
        let response = self.send(&action, request).await?;
        Self::read_json(&action, response).await
    }

    async fn upsert_entity(&self, table: Table, record: &Value) -> Result<()> {
        let action = format!("upsert {table}");
        let request = self
            .request(Method::POST, self.table_url(table))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(record);
        self.send(&action, request).await?;
        Ok(())
    }

    async fn delete_entity(&self, table: Table, id: &str) -> Result<()> {
        let action = format!("delete {table} {id}");
        let request = self
            .request(Method::DELETE, self.table_url(table))
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{id}"))]);
        let response = self.send(&action, request).await?;
        let deleted: Vec<Value> = Self::read_json(&action, response).await?;
        if deleted.is_empty() {
            return Err(Error::NotFound(format!("{table} {id}")));
        }
        Ok(())
    }

    async fn blob_reference(&self, path: &str, ttl_secs: u64) -> Result<BlobReference> {
        let action = format!("sign {path}");
        let request = self
            .request(Method::POST, self.object_url("sign/", path))
            .json(&serde_json::json!({ "expiresIn": ttl_secs }));
        let response = self.send(&action, request).await?;
        let payload: SignResponse = Self::read_json(&action, response).await?;

        let url = if is_http_url(&payload.signed_url) {
            payload.signed_url
        } else {
            format!(
                "{}/storage/v1/{}",
                self.config.api_url,
                payload.signed_url.trim_start_matches('/')
            )
        };
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        Ok(BlobReference {
            url,
            expires_at: Utc::now() + chrono::Duration::seconds(ttl),
        })
    }

    async fn upload_blob(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let action = format!("upload {path}");
        let request = self
            .request(Method::POST, self.object_url("", path))
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        self.send(&action, request).await?;
        Ok(())
    }

    async fn download_blob(&self, path: &str) -> Result<Vec<u8>> {
        let action = format!("download {path}");
        let request = self.request(Method::GET, self.object_url("authenticated/", path));
        let response = self.send(&action, request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|error| self.map_send_error(&action, &error))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

fn encode_object_path(path: &str) -> String {
    trim_object_path(path)
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn encode_predicate(predicate: &Predicate) -> (String, String) {
    match predicate {
        Predicate::Eq { column, value } if value.is_null() => {
            (column.clone(), "is.null".to_string())
        }
        Predicate::Eq { column, value } => (column.clone(), format!("eq.{}", literal(value))),
        Predicate::In { column, values } => {
            let items = values
                .iter()
                .map(|value| format!("\"{}\"", literal(value).replace('"', "\\\"")))
                .collect::<Vec<_>>()
                .join(",");
            (column.clone(), format!("in.({items})"))
        }
        Predicate::IsNull { column } => (column.clone(), "is.null".to_string()),
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, headers, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn remote_for(server: &MockServer) -> HttpRemote {
        HttpRemote::new(RemoteConfig {
            api_url: server.uri(),
            anon_key: "anon".to_string(),
            access_token: Some("user-token".to_string()),
            storage_bucket: "photos".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn encodes_filters_as_postgrest_operators() {
        let filter = Filter::new()
            .eq("company_id", "c1")
            .in_list("status", ["upcoming", "active"])
            .is_null("sale_id")
            .eq("is_primary", true);
        let encoded: Vec<_> = filter.predicates().iter().map(encode_predicate).collect();

        assert_eq!(
            encoded,
            vec![
                ("company_id".to_string(), "eq.c1".to_string()),
                ("status".to_string(), "in.(\"upcoming\",\"active\")".to_string()),
                ("sale_id".to_string(), "is.null".to_string()),
                ("is_primary".to_string(), "eq.true".to_string()),
            ]
        );
    }

    #[test]
    fn object_paths_are_encoded_per_segment() {
        assert_eq!(
            encode_object_path("/lots/l 1/a#b.jpg"),
            "lots/l%201/a%23b.jpg"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_entities_sends_filters_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/sales"))
            .and(query_param("company_id", "eq.c1"))
            .and(query_param("status", "in.(\"upcoming\",\"active\")"))
            .and(header("apikey", "anon"))
            .and(header("authorization", "Bearer user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "s1", "company_id": "c1", "status": "active"}
            ])))
            .mount(&server)
            .await;

        let filter = Filter::new()
            .eq("company_id", "c1")
            .in_list("status", ["upcoming", "active"]);
        let records = remote_for(&server)
            .fetch_entities(Table::Sales, &filter)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], "s1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_entity_returns_none_for_empty_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/companies"))
            .and(query_param("id", "eq.missing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let company = remote_for(&server)
            .fetch_entity(Table::Companies, "missing")
            .await
            .unwrap();
        assert!(company.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_requests_merge_resolution() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/lots"))
            .and(headers("prefer", vec!["resolution=merge-duplicates", "return=minimal"]))
            .and(body_json(json!({"id": "l1", "sale_id": "s1"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        remote_for(&server)
            .upsert_entity(Table::Lots, &json!({"id": "l1", "sale_id": "s1"}))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_of_missing_row_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/lots"))
            .and(query_param("id", "eq.l9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let error = remote_for(&server)
            .delete_entity(Table::Lots, "l9")
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_requests_carry_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/photos"))
            .respond_with(ResponseTemplate::new(403).set_body_string("row-level security"))
            .mount(&server)
            .await;

        let error = remote_for(&server)
            .upsert_entity(Table::Photos, &json!({"id": "p1"}))
            .await
            .unwrap_err();
        match error {
            Error::RemoteRejected(message) => {
                assert!(message.contains("HTTP 403"));
                assert!(message.contains("row-level security"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blob_reference_resolves_relative_signed_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/sign/photos/lots/l1/a.jpg"))
            .and(body_json(json!({"expiresIn": 3600})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signedURL": "/object/sign/photos/lots/l1/a.jpg?token=abc"
            })))
            .mount(&server)
            .await;

        let reference = remote_for(&server)
            .blob_reference("lots/l1/a.jpg", 3600)
            .await
            .unwrap();
        assert_eq!(
            reference.url,
            format!(
                "{}/storage/v1/object/sign/photos/lots/l1/a.jpg?token=abc",
                server.uri()
            )
        );
        assert!(reference.expires_at > Utc::now() + chrono::Duration::minutes(59));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_and_download_blob() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/photos/lots/l1/a.jpg"))
            .and(header("x-upsert", "true"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/object/authenticated/photos/lots/l1/a.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1_u8, 2, 3]))
            .mount(&server)
            .await;

        let remote = remote_for(&server);
        remote.upload_blob("lots/l1/a.jpg", vec![9, 9]).await.unwrap();
        let bytes = remote.download_blob("lots/l1/a.jpg").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn connection_failure_marks_offline() {
        let monitor = ConnectivityMonitor::new(true);
        let remote = HttpRemote::new(RemoteConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            anon_key: "anon".to_string(),
            access_token: None,
            storage_bucket: "photos".to_string(),
        })
        .unwrap()
        .with_connectivity(monitor.clone());

        let error = remote
            .fetch_entity(Table::Companies, "c1")
            .await
            .unwrap_err();
        assert!(error.is_connectivity());
        assert!(!monitor.is_online());
    }
}
