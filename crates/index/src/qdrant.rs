use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{IndexError, Result};
use crate::filter::Filter;
use crate::{Point, ScoredPoint, VectorIndex};

/// Qdrant over its REST API.
pub struct QdrantIndex {
    http: Client,
    base_url: String,
    headers: HeaderMap,
}

impl QdrantIndex {
    pub fn new(url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            headers.insert(
                HeaderName::from_static("api-key"),
                HeaderValue::from_str(key).map_err(|e| IndexError::Header(e.to_string()))?,
            );
        }
        Ok(Self {
            http,
            base_url: url.trim_end_matches('/').to_string(),
            headers,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<Response> {
        let response = request.headers(self.headers.clone()).send()?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Err(IndexError::Status {
            operation,
            status,
            body,
        })
    }
}

#[derive(Serialize)]
struct WirePoint<'a> {
    id: &'a str,
    vector: &'a [f32],
    payload: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct WireHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct WireCount {
    count: u64,
}

impl VectorIndex for QdrantIndex {
    fn collection_exists(&self, name: &str) -> Result<bool> {
        let response = self
            .http
            .get(self.url(&format!("/collections/{name}")))
            .headers(self.headers.clone())
            .send()?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(IndexError::Status {
                operation: "collection_exists",
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            }),
        }
    }

    fn create_collection(&self, name: &str, dims: usize) -> Result<()> {
        let body = json!({
            "vectors": {
                "size": dims,
                "distance": "Cosine"
            }
        });
        let response = self
            .http
            .put(self.url(&format!("/collections/{name}")))
            .headers(self.headers.clone())
            .json(&body)
            .send()?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::CONFLICT => {
                debug!(collection = name, dims, "qdrant collection ready");
                Ok(())
            }
            status => Err(IndexError::Status {
                operation: "create_collection",
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            }),
        }
    }

    fn upsert(&self, name: &str, points: Vec<Point>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let wire: Vec<WirePoint<'_>> = points
            .iter()
            .map(|p| WirePoint {
                id: &p.id,
                vector: &p.vector,
                payload: &p.payload,
            })
            .collect();
        let request = self
            .http
            .put(self.url(&format!("/collections/{name}/points")))
            .query(&[("wait", "true")])
            .json(&json!({ "points": wire }));
        self.send("upsert", request)?;
        Ok(())
    }

    fn search(
        &self,
        name: &str,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(rendered) = filter.to_qdrant() {
            body["filter"] = rendered;
        }
        let request = self
            .http
            .post(self.url(&format!("/collections/{name}/points/search")))
            .json(&body);
        let parsed: Envelope<Vec<WireHit>> = self.send("search", request)?.json()?;
        Ok(parsed
            .result
            .into_iter()
            .map(|hit| ScoredPoint {
                id: match hit.id {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
                score: hit.score,
                payload: hit.payload.unwrap_or_default(),
            })
            .collect())
    }

    fn count(&self, name: &str) -> Result<u64> {
        let request = self
            .http
            .post(self.url(&format!("/collections/{name}/points/count")))
            .json(&json!({ "exact": true }));
        let parsed: Envelope<WireCount> = self.send("count", request)?.json()?;
        Ok(parsed.result.count)
    }

    fn drop_collection(&self, name: &str) -> Result<bool> {
        let response = self
            .http
            .delete(self.url(&format!("/collections/{name}")))
            .headers(self.headers.clone())
            .send()?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => {
                let parsed: Envelope<bool> = response.json()?;
                Ok(parsed.result)
            }
            status => Err(IndexError::Status {
                operation: "drop_collection",
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_api_key_header() {
        let err = QdrantIndex::new("http://localhost:6333", Some("bad\nkey"), Duration::from_secs(1));
        assert!(matches!(err, Err(IndexError::Header(_))));
    }

    #[test]
    fn hit_ids_accept_numbers_and_strings() {
        let raw = r#"{"result": [{"id": 7, "score": 0.5}, {"id": "abc", "score": 0.4, "payload": {"text": "x"}}]}"#;
        let parsed: Envelope<Vec<WireHit>> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.result.len(), 2);
        assert_eq!(parsed.result[0].id, json!(7));
        assert!(parsed.result[0].payload.is_none());
    }
}
