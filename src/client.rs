//! HTTP client for the admin rate-limiting API.
//!
//! Each fetch reads a bearer token from a [`TokenProvider`] first and fails
//! without touching the network when there is none. Requests are never
//! retried.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::models::metrics::MetricsResponse;
use crate::models::usage::UsageResponse;
use crate::models::violations::{TopUsersResponse, ViolationsResponse};
use crate::models::DateRange;

const API_PREFIX: &str = "api/admin/rate-limiting";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Source of the current session's access token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}

/// A fixed token, e.g. from `RATEWATCH_ACCESS_TOKEN` or `--token`.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()))
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Clone)]
pub struct RateLimitClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl RateLimitClient {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenProvider>) -> anyhow::Result<Self> {
        let parsed = Url::parse(base_url)?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub async fn fetch_metrics(&self, range: DateRange) -> Result<MetricsResponse, ClientError> {
        self.get_json("metrics", range, None, "Failed to fetch metrics")
            .await
    }

    pub async fn fetch_violations(
        &self,
        range: DateRange,
    ) -> Result<ViolationsResponse, ClientError> {
        self.get_json("violations", range, Some("summary"), "Failed to fetch violations")
            .await
    }

    pub async fn fetch_usage(&self, range: DateRange) -> Result<UsageResponse, ClientError> {
        self.get_json("usage", range, Some("overview"), "Failed to fetch usage")
            .await
    }

    pub async fn fetch_top_users(&self, range: DateRange) -> Result<TopUsersResponse, ClientError> {
        self.get_json("violations", range, Some("users"), "Failed to fetch top users")
            .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        route: &str,
        range: DateRange,
        view: Option<&str>,
        fallback: &str,
    ) -> Result<T, ClientError> {
        let token = self
            .tokens
            .access_token()
            .await
            .ok_or(ClientError::Unauthenticated)?;

        let url = format!("{}/{}/{}", self.base_url, API_PREFIX, route);
        let mut query = vec![
            (
                "startDate",
                range.start_date.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            (
                "endDate",
                range.end_date.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        ];
        if let Some(view) = view {
            query.push(("view", view.to_string()));
        }

        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&query)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }

        let message = resp
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string());

        tracing::debug!(route, status = status.as_u16(), %message, "rate-limiting API error");

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ClientError::Unauthorized(message))
            }
            _ => Err(ClientError::Api {
                status: status.as_u16(),
                message,
            }),
        }
    }
}
