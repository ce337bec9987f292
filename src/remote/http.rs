//! Favorites over the gallery's HTTP API.
//!
//! `GET {list_path}?cursor=&limit=` returns a [`FavoritesPage`];
//! `POST {toggle_path}` with `{"key", "favorite"}` writes one key. Error
//! responses carry `{"error": "..."}`, which is surfaced when present.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client as HttpClient, RequestBuilder, Response};
use serde::Deserialize;

use super::{FavoritesPage, FavoritesRemote, ToggleFavoriteRequest};
use crate::config::RemoteConfig;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

pub struct HttpFavoritesClient {
    http_client: HttpClient,
    list_url: String,
    toggle_url: String,
    api_token: Option<String>,
}

impl HttpFavoritesClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;

        let api_token = config
            .api_token
            .clone()
            .or_else(|| std::env::var(&config.token_env).ok())
            .filter(|token| !token.trim().is_empty());

        Ok(Self {
            http_client,
            list_url: join_url(&config.base_url, &config.list_path),
            toggle_url: join_url(&config.base_url, &config.toggle_path),
            api_token,
        })
    }

    pub fn has_token(&self) -> bool {
        self.api_token.is_some()
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_token {
            Some(ref token) => request.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn error_for(context: &str, resp: Response) -> anyhow::Error {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow!("{context}: {}", error_message(status.as_u16(), &body))
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// `{"error": ...}` from the body if present, otherwise the status code.
fn error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .map(|message| format!("{message} ({status})"))
        .unwrap_or_else(|| format!("favorites API error {status}"))
}

#[async_trait]
impl FavoritesRemote for HttpFavoritesClient {
    fn backend_name(&self) -> &str {
        "http"
    }

    async fn list_favorites(&self, cursor: Option<&str>, limit: Option<u32>) -> Result<FavoritesPage> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let resp = self
            .authorize(self.http_client.get(&self.list_url))
            .header(header::CACHE_CONTROL, "no-store")
            .query(&query)
            .send()
            .await
            .map_err(|e| anyhow!("Network error loading favorites: {}", e))?;

        if !resp.status().is_success() {
            return Err(Self::error_for("Failed to load favorites", resp).await);
        }

        resp.json::<FavoritesPage>()
            .await
            .context("Failed to parse favorites listing")
    }

    async fn set_favorite(&self, key: &str, favorite: bool) -> Result<()> {
        let body = ToggleFavoriteRequest {
            key: key.to_string(),
            favorite,
        };

        let resp = self
            .authorize(self.http_client.post(&self.toggle_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Network error updating favorite: {}", e))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_for("Toggle failed", resp).await)
        }
    }
}
