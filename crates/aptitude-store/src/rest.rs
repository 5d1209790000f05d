//! PostgREST-style HTTP data service.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use aptitude_core::error::DataError;
use aptitude_core::traits::{Condition, DataService, Filter, Op, Row};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP client for a PostgREST-compatible relational API.
pub struct RestDataService {
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct RestErrorBody {
    message: String,
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("({})", inner.join(","))
        }
        other => other.to_string(),
    }
}

fn condition_param(condition: &Condition) -> (String, String) {
    let value = match condition.op {
        Op::IsNull => "is.null".to_string(),
        op => format!("{}.{}", op.token(), format_value(&condition.value)),
    };
    (condition.column.clone(), value)
}

/// Query parameters for a filter.
pub fn query_params(filter: &Filter) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = filter.conditions.iter().map(condition_param).collect();
    if !filter.include_deleted {
        params.push(("deleted_at".into(), "is.null".into()));
    }
    if let Some(fields) = &filter.fields {
        params.push(("select".into(), fields.join(",")));
    }
    if let Some(order) = &filter.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".into(), format!("{}.{direction}", order.column)));
    }
    if let Some(limit) = filter.limit {
        params.push(("limit".into(), limit.to_string()));
    }
    if let Some(offset) = filter.offset {
        params.push(("offset".into(), offset.to_string()));
    }
    params
}

impl RestDataService {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: Option<u64>) -> Result<Self> {
        let timeout_secs = timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout_secs,
            client,
        })
    }

    fn url(&self, path: &str, params: &[(String, String)]) -> Result<Url> {
        let raw = format!("{}/rest/v1/{path}", self.base_url);
        let url = if params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, params)
        };
        url.with_context(|| format!("invalid data service URL: {raw}"))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("accept", "application/json")
    }

    async fn send(&self, builder: RequestBuilder, target: &str) -> Result<Response> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                DataError::Timeout(self.timeout_secs)
            } else {
                DataError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status < 400 {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<RestErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        tracing::warn!(status, target, "data service request failed: {message}");

        let err = match status {
            401 | 403 => DataError::Unauthorized(message),
            404 => DataError::MissingCollection(target.to_string()),
            502..=504 => DataError::Unavailable(format!("HTTP {status}: {message}")),
            _ => DataError::Rejected { status, message },
        };
        Err(err.into())
    }

    async fn rows(&self, response: Response, table: &str) -> Result<Vec<Row>> {
        response.json::<Vec<Row>>().await.map_err(|e| {
            DataError::Decode {
                table: table.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    async fn patch(&self, table: &str, params: &[(String, String)], patch: Row) -> Result<Vec<Row>> {
        let url = self.url(table, params)?;
        let builder = self
            .request(Method::PATCH, url)
            .header("prefer", "return=representation")
            .json(&patch);
        let response = self.send(builder, table).await?;
        self.rows(response, table).await
    }
}

#[async_trait]
impl DataService for RestDataService {
    fn name(&self) -> &str {
        "rest"
    }

    #[instrument(skip(self, filter))]
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>> {
        let url = self.url(table, &query_params(filter))?;
        let response = self.send(self.request(Method::GET, url), table).await?;
        self.rows(response, table).await
    }

    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        let url = self.url(table, &[])?;
        let builder = self
            .request(Method::POST, url)
            .header("prefer", "return=representation")
            .json(&rows);
        let response = self.send(builder, table).await?;
        self.rows(response, table).await
    }

    #[instrument(skip(self, filter, patch))]
    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<Vec<Row>> {
        self.patch(table, &query_params(filter), patch).await
    }

    #[instrument(skip(self, filter))]
    async fn soft_delete(&self, table: &str, filter: &Filter) -> Result<u64> {
        let mut patch = Row::new();
        patch.insert("deleted_at".into(), Value::String(Utc::now().to_rfc3339()));
        let live = Filter {
            include_deleted: false,
            ..filter.clone()
        };
        let rows = self.patch(table, &query_params(&live), patch).await?;
        Ok(rows.len() as u64)
    }

    #[instrument(skip(self, filter))]
    async fn restore(&self, table: &str, filter: &Filter) -> Result<u64> {
        let mut patch = Row::new();
        patch.insert("deleted_at".into(), Value::Null);
        let mut params = query_params(&filter.clone().include_deleted());
        params.push(("deleted_at".into(), "not.is.null".into()));
        let rows = self.patch(table, &params, patch).await?;
        Ok(rows.len() as u64)
    }

    #[instrument(skip(self, params))]
    async fn lookup(&self, name: &str, params: Value) -> Result<Value> {
        let url = self.url(&format!("rpc/{name}"), &[])?;
        let target = format!("rpc/{name}");
        let response = self
            .send(self.request(Method::POST, url).json(&params), &target)
            .await?;
        response.json::<Value>().await.map_err(|e| {
            DataError::Decode {
                table: target,
                message: e.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aptitude_core::error::is_systemic_error;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn filter_to_query_params() {
        let filter = Filter::all()
            .eq("subject_id", "s1")
            .one_of("aptitude_code", vec![json!("V"), json!("N")])
            .order_by("timestamp", false)
            .page(10, 5);
        let params = query_params(&filter);
        assert!(params.contains(&("subject_id".into(), "eq.s1".into())));
        assert!(params.contains(&("aptitude_code".into(), "in.(V,N)".into())));
        assert!(params.contains(&("deleted_at".into(), "is.null".into())));
        assert!(params.contains(&("order".into(), "timestamp.desc".into())));
        assert!(params.contains(&("limit".into(), "5".into())));
        assert!(params.contains(&("offset".into(), "10".into())));

        let params = query_params(&Filter::all().include_deleted());
        assert!(params.is_empty());
    }

    #[tokio::test]
    async fn select_sends_filters_and_key() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/results"))
            .and(query_param("subject_id", "eq.s1"))
            .and(query_param("deleted_at", "is.null"))
            .and(header("apikey", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "r1", "subject_id": "s1", "aptitude_code": "V", "percentile": 80}
            ])))
            .mount(&server)
            .await;

        let service = RestDataService::new(&server.uri(), "test-key", None).unwrap();
        let rows = service
            .select("results", &Filter::all().eq("subject_id", "s1"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["aptitude_code"], json!("V"));
    }

    #[tokio::test]
    async fn unauthorized_is_systemic() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "JWT expired"})),
            )
            .mount(&server)
            .await;

        let service = RestDataService::new(&server.uri(), "bad-key", None).unwrap();
        let err = service.select("subjects", &Filter::all()).await.unwrap_err();
        assert!(is_systemic_error(&err));
        assert!(err.to_string().contains("JWT expired"));
    }

    #[tokio::test]
    async fn missing_table_is_systemic() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/resultados"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let service = RestDataService::new(&server.uri(), "k", None).unwrap();
        let err = service.select("resultados", &Filter::all()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::MissingCollection(t)) if t == "resultados"
        ));
    }

    #[tokio::test]
    async fn conflict_is_not_systemic() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/reports"))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(json!({"message": "duplicate key"})),
            )
            .mount(&server)
            .await;

        let service = RestDataService::new(&server.uri(), "k", None).unwrap();
        let err = service.insert("reports", vec![Row::new()]).await.unwrap_err();
        assert!(!is_systemic_error(&err));
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::Rejected { status: 409, .. })
        ));
    }

    #[tokio::test]
    async fn insert_returns_representation() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/reports"))
            .and(header("prefer", "return=representation"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{"id": "rep-1"}])))
            .mount(&server)
            .await;

        let service = RestDataService::new(&server.uri(), "k", None).unwrap();
        let rows = service.insert("reports", vec![Row::new()]).await.unwrap();
        assert_eq!(rows[0]["id"], json!("rep-1"));
    }

    #[tokio::test]
    async fn soft_delete_counts_patched_rows() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/rest/v1/results"))
            .and(query_param("id", "eq.r1"))
            .and(query_param("deleted_at", "is.null"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "r1"}])))
            .mount(&server)
            .await;

        let service = RestDataService::new(&server.uri(), "k", None).unwrap();
        let count = service
            .soft_delete("results", &Filter::all().eq("id", "r1"))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn lookup_calls_rpc() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/subject_external_id"))
            .and(body_json(json!({"subject_id": "s1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("ID-0001")))
            .mount(&server)
            .await;

        let service = RestDataService::new(&server.uri(), "k", None).unwrap();
        let value = service
            .lookup("subject_external_id", json!({"subject_id": "s1"}))
            .await
            .unwrap();
        assert_eq!(value, json!("ID-0001"));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let service = RestDataService::new("http://127.0.0.1:9", "k", Some(1)).unwrap();
        let err = service.select("subjects", &Filter::all()).await.unwrap_err();
        assert!(is_systemic_error(&err));
    }
}
