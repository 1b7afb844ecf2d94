//! Photo lookup for plan illustrations.
//!
//! [`ImageLookup`] resolves a free-text query to a single photo URL.
//! [`UnsplashClient`] implements it over the Unsplash search API.

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde_json::Value;

use crate::config::UnsplashSettings;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; tripcrew)";

/// Resolve a query to a photo URL.
#[async_trait]
pub trait ImageLookup: Send + Sync {
    /// `Ok(None)` when the service has no match.
    async fn photo_url(&self, query: &str) -> anyhow::Result<Option<String>>;
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub url: String,
    pub description: String,
    pub photographer: String,
}

// ============================================================================
// Unsplash
// ============================================================================

#[derive(Debug, Clone)]
pub struct UnsplashClient {
    http: reqwest::Client,
    base_url: String,
    access_key: Option<String>,
}

impl UnsplashClient {
    pub fn new(base_url: impl Into<String>, access_key: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .context("building Unsplash HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            access_key,
        })
    }

    pub fn from_settings(settings: &UnsplashSettings) -> anyhow::Result<Self> {
        Self::new(settings.base_url.clone(), settings.access_key.clone())
    }

    /// `GET /search/photos`, at most `per_page` hits.
    pub async fn search_photos(&self, query: &str, per_page: usize) -> anyhow::Result<Vec<Photo>> {
        let key = self
            .access_key
            .as_deref()
            .ok_or_else(|| anyhow!("Unsplash access key not configured"))?;
        let url = format!("{}/search/photos", self.base_url.trim_end_matches('/'));
        let per_page = per_page.to_string();

        let response = self
            .http
            .get(&url)
            .query(&[("query", query), ("per_page", per_page.as_str()), ("client_id", key)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            bail!("Unsplash returned HTTP {}", status);
        }
        let body: Value = response.json().await.context("decoding Unsplash response")?;
        Ok(parse_photos(&body))
    }
}

#[async_trait]
impl ImageLookup for UnsplashClient {
    async fn photo_url(&self, query: &str) -> anyhow::Result<Option<String>> {
        log::debug!("Unsplash photo search - query: {}", query);
        let photos = self.search_photos(query, 1).await?;
        Ok(photos.into_iter().next().map(|p| p.url))
    }
}

/// Hits of a `/search/photos` response; entries without a regular URL are skipped.
pub fn parse_photos(body: &Value) -> Vec<Photo> {
    let text = |v: Option<&Value>| v.and_then(Value::as_str).unwrap_or("").to_string();
    body.get("results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|r| {
                    let url = r.get("urls")?.get("regular")?.as_str()?.to_string();
                    Some(Photo {
                        url,
                        description: text(r.get("description")),
                        photographer: text(r.get("user").and_then(|u| u.get("name"))),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Router};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_parse_photos() {
        let body = json!({
            "results": [
                {"urls": {"regular": "https://img/1.jpg"}, "description": null,
                 "user": {"name": "Li"}},
                {"urls": {}},
                {"urls": {"regular": "https://img/2.jpg"}, "description": "gate"}
            ]
        });
        let photos = parse_photos(&body);
        assert_eq!(photos.len(), 2);
        assert_eq!(photos[0].photographer, "Li");
        assert_eq!(photos[0].description, "");
        assert_eq!(photos[1].url, "https://img/2.jpg");
        assert!(parse_photos(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_request() {
        let client = UnsplashClient::new("http://127.0.0.1:9", None).unwrap();
        let err = client.photo_url("temple").await.unwrap_err();
        assert!(err.to_string().contains("access key"));
    }

    #[tokio::test]
    async fn test_photo_url_against_local_server() {
        let app = Router::new().route(
            "/search/photos",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                if q.get("client_id").map(String::as_str) != Some("k") {
                    return Err(axum::http::StatusCode::UNAUTHORIZED);
                }
                let query = q.get("query").cloned().unwrap_or_default();
                if query == "nothing" {
                    return Ok(axum::Json(json!({"results": []})));
                }
                Ok(axum::Json(json!({
                    "results": [{"urls": {"regular": format!("https://img/{}.jpg", query)},
                                 "user": {"name": "n"}}]
                })))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base = format!("http://{}", addr);
        let client = UnsplashClient::new(base.clone(), Some("k".into())).unwrap();
        assert_eq!(
            client.photo_url("temple").await.unwrap(),
            Some("https://img/temple.jpg".to_string())
        );
        assert_eq!(client.photo_url("nothing").await.unwrap(), None);

        let bad = UnsplashClient::new(base, Some("wrong".into())).unwrap();
        let err = bad.photo_url("temple").await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}
