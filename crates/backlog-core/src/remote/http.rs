//! HTTP transport for the remote authority

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, Url};

use super::{parse_api_error, RemoteAuthority, RemoteRequest, RemoteResponse, TokenSource};
use crate::config::RemoteConfig;
use crate::error::{Error, RemoteError, Result};
use crate::models::SyncAction;
use crate::util::{is_http_url, normalize_text_option};

/// REST client: `POST /{collection}`, `PUT|DELETE /{collection}/{id}`
#[derive(Clone)]
pub struct HttpRemote {
    base_url: Url,
    probe_url: Url,
    config: RemoteConfig,
    tokens: Arc<dyn TokenSource>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("base_url", &self.base_url.as_str())
            .field("probe_url", &self.probe_url.as_str())
            .field("tokens", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(config: &RemoteConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let raw = normalize_text_option(config.base_url.clone())
            .ok_or_else(|| Error::Config("remote base_url is not configured".to_string()))?;
        if !is_http_url(&raw) {
            return Err(Error::Config(
                "remote base_url must include http:// or https://".to_string(),
            ));
        }
        let base_url = Url::parse(raw.trim_end_matches('/'))
            .map_err(|error| Error::Config(format!("invalid remote base_url: {error}")))?;
        let probe_url = join_path(&base_url, &[config.probe_path.trim_matches('/')])?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url,
            probe_url,
            config: config.clone(),
            tokens,
            client,
        })
    }

    fn url_for(&self, request: &RemoteRequest) -> Result<Url> {
        let collection = self.config.collection_for(&request.entity_type);
        match request.action {
            SyncAction::Create => join_path(&self.base_url, &[collection]),
            SyncAction::Update | SyncAction::Delete => {
                join_path(&self.base_url, &[collection, &request.entity_id])
            }
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemote {
    async fn send(&self, request: RemoteRequest) -> std::result::Result<RemoteResponse, RemoteError> {
        let url = self
            .url_for(&request)
            .map_err(|error| RemoteError::InvalidResponse(error.to_string()))?;
        let method = match request.action {
            SyncAction::Create => Method::POST,
            SyncAction::Update => Method::PUT,
            SyncAction::Delete => Method::DELETE,
        };

        let mut builder = self
            .authorized(self.client.request(method, url))
            .header(reqwest::header::ACCEPT, "application/json");
        if request.action != SyncAction::Delete {
            builder = builder.json(&request.payload);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        let mut result = RemoteResponse::new(status);
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) {
            result.body = Some(json);
        }
        if !result.is_success() {
            result.message = Some(parse_api_error(status, &body));
        }
        Ok(result)
    }

    async fn probe(&self) -> std::result::Result<(), RemoteError> {
        let response = self
            .authorized(self.client.get(self.probe_url.clone()))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RemoteError::Network(format!(
                "probe returned HTTP {}",
                status.as_u16()
            )))
        }
    }
}

fn join_path(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| Error::Config(format!("remote URL cannot be a base: {base}")))?
        .pop_if_empty()
        .extend(segments.iter().filter(|segment| !segment.is_empty()));
    Ok(url)
}
