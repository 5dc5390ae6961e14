//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN: INT. SERVER ROOM, 3:47 AM
//!
//! The scheduler fires. A feed wakes up and asks the cluster a simple question:
//! "what changed since last time?" The cluster answers in pages of a thousand,
//! one scroll id at a time, until it has nothing left to say.
//!
//! 🧠 Knowledge graph:
//! - `ElasticsearchConfig`: the `[backend]` section. URL, credentials, TLS and proxy toggles,
//!   page size and scroll keep-alive.
//! - `ElasticsearchScanExecutor::open_scan`: `POST /{index}/_search?scroll=..` with the rendered query
//! - `ElasticsearchCursor::next_hit`: drains the current page, then `POST /_search/scroll`
//!   for the next one; clears the scroll context with `DELETE /_search/scroll` when done
//! - `probe`: `GET /` with basic auth. Cheap, and separate from the scan path.
//! - Send failures become `FeedError::Connectivity`, error statuses `FeedError::BackendStatus`
//!
//! ⚠️ No retries. A failed call ends the cycle and the watermark stays where it was. 🦆

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::backends::{HitCursor, ProbeOutcome, ScanCursor, ScanExecutor};
use crate::common::RawHit;
use crate::errors::{ConfigurationError, FeedError};
use crate::query::ScanSpec;

/// 📡 The `[backend]` section: how to reach the cluster.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchConfig {
    /// Scheme, host and port. A trailing `/` is fine, we trim it.
    #[serde(default)]
    pub url: String,
    /// 🔒 Basic auth, used only when both halves are set.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 🔓 Skip TLS certificate verification.
    #[serde(default)]
    pub insecure: bool,
    /// 🌐 Honor `HTTP(S)_PROXY` from the environment. Off means no proxy at all.
    #[serde(default)]
    pub proxy: bool,
    /// 📦 Hits per scroll page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_scroll_keep_alive")]
    pub scroll_keep_alive: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_page_size() -> usize {
    1000
}

fn default_scroll_keep_alive() -> String {
    "1m".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: None,
            password: None,
            insecure: false,
            proxy: false,
            page_size: default_page_size(),
            scroll_keep_alive: default_scroll_keep_alive(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ElasticsearchConfig {
    pub fn base_url(&self) -> &str {
        self.url.trim().trim_end_matches('/')
    }

    pub fn validate(&self) -> Vec<ConfigurationError> {
        if self.base_url().is_empty() {
            vec![ConfigurationError::MissingServerUrl]
        } else {
            Vec::new()
        }
    }
}

/// 🔌 Client plus config, shared by the executor and every cursor it opens.
#[derive(Debug, Clone)]
struct Connection {
    client: reqwest::Client,
    config: ElasticsearchConfig,
}

impl Connection {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url(), path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.config.username, &self.config.password) {
            (Some(username), Some(password)) => request.basic_auth(username, Some(password)),
            _ => request,
        }
    }

    /// 📡 Send, then sort failures into "never arrived" and "arrived, got told off".
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(request)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(FeedError::connectivity)?;
        if let Err(err) = response.error_for_status_ref() {
            return Err(FeedError::from_status(response.status().as_u16(), err.to_string()).into());
        }
        Ok(response)
    }

    async fn scroll_page(&self, request: RequestBuilder, what: &str) -> Result<ScrollPage> {
        let response = self.send(request).await?;
        let body = response
            .text()
            .await
            .with_context(|| format!("💀 The cluster started answering the {what} and then trailed off."))?;
        serde_json::from_str(&body)
            .with_context(|| format!("💀 The {what} response is not the JSON we were promised."))
    }
}

#[derive(Debug, Deserialize)]
struct ScrollPage {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: Option<String>,
    #[serde(default)]
    hits: HitsEnvelope,
}

#[derive(Debug, Default, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<HitEnvelope>,
}

#[derive(Debug, Deserialize)]
struct HitEnvelope {
    #[serde(rename = "_source", default)]
    source: Option<Value>,
}

impl ScrollPage {
    fn into_hits(self) -> (Option<String>, VecDeque<RawHit>) {
        let hits = self
            .hits
            .hits
            .into_iter()
            .filter_map(|hit| hit.source)
            .map(RawHit::from_value)
            .collect();
        (self.scroll_id, hits)
    }
}

/// 📡 Runs scans against a real cluster.
#[derive(Debug, Clone)]
pub struct ElasticsearchScanExecutor {
    connection: Connection,
}

impl ElasticsearchScanExecutor {
    /// 🚀 Build the HTTP client. Nothing is sent yet.
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.insecure);
        if !config.proxy {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .context("💀 The HTTP client refused to be born. Probably a TLS stack with opinions.")?;
        Ok(Self {
            connection: Connection { client, config },
        })
    }
}

#[async_trait]
impl ScanExecutor for ElasticsearchScanExecutor {
    async fn open_scan(&self, spec: &ScanSpec) -> Result<HitCursor> {
        let config = &self.connection.config;
        let url = self.connection.url(&format!(
            "{}/_search?scroll={}",
            spec.index_pattern.as_str(),
            config.scroll_keep_alive
        ));
        let body = json!({
            "size": config.page_size,
            "sort": ["_doc"],
            "query": spec.to_query(),
        });
        debug!("📡 opening scroll on '{}'", spec.index_pattern.as_str());
        trace!("📜 search body: {}", body);

        let page = self
            .connection
            .scroll_page(self.connection.client.post(url).body(body.to_string()), "search")
            .await?;
        let (scroll_id, buffer) = page.into_hits();
        debug!("📦 first page: {} hits", buffer.len());

        let mut cursor = ElasticsearchCursor {
            connection: self.connection.clone(),
            scroll_id,
            buffer,
            exhausted: false,
        };
        if cursor.buffer.is_empty() {
            cursor.finish().await;
        }
        Ok(HitCursor::Elasticsearch(cursor))
    }

    async fn probe(&self) -> Result<ProbeOutcome> {
        let request = self.connection.client.get(self.connection.url(""));
        let response = self
            .connection
            .authorize(request)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(FeedError::connectivity)?;
        let status = response.status().as_u16();
        let error = response.error_for_status_ref().err().map(|err| err.to_string());
        debug!("🏓 probe answered {}", status);
        Ok(ProbeOutcome { status, error })
    }
}

/// 🚰 One scroll, consumed front to back.
#[derive(Debug)]
pub struct ElasticsearchCursor {
    connection: Connection,
    scroll_id: Option<String>,
    buffer: VecDeque<RawHit>,
    exhausted: bool,
}

impl ElasticsearchCursor {
    /// 🗑️ Release the server-side scroll context. A failure here costs the cluster
    /// a little memory until keep-alive runs out, so it only warns.
    async fn finish(&mut self) {
        self.exhausted = true;
        let Some(scroll_id) = self.scroll_id.take() else {
            return;
        };
        let request = self
            .connection
            .client
            .delete(self.connection.url("_search/scroll"))
            .body(json!({ "scroll_id": [scroll_id] }).to_string());
        match self.connection.send(request).await {
            Ok(_) => trace!("🗑️ scroll context cleared"),
            Err(err) => warn!("⚠️ couldn't clear the scroll context: {:#}", err),
        }
    }
}

#[async_trait]
impl ScanCursor for ElasticsearchCursor {
    async fn next_hit(&mut self) -> Result<Option<RawHit>> {
        if let Some(hit) = self.buffer.pop_front() {
            return Ok(Some(hit));
        }
        if self.exhausted {
            return Ok(None);
        }
        let Some(scroll_id) = self.scroll_id.clone() else {
            self.exhausted = true;
            return Ok(None);
        };

        let request = self
            .connection
            .client
            .post(self.connection.url("_search/scroll"))
            .body(
                json!({
                    "scroll": self.connection.config.scroll_keep_alive,
                    "scroll_id": scroll_id,
                })
                .to_string(),
            );
        let page = self.connection.scroll_page(request, "scroll").await?;
        let (next_id, buffer) = page.into_hits();
        trace!("📦 next page: {} hits", buffer.len());
        if next_id.is_some() {
            self.scroll_id = next_id;
        }
        self.buffer = buffer;

        match self.buffer.pop_front() {
            Some(hit) => Ok(Some(hit)),
            None => {
                self.finish().await;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        self.buffer.clear();
        if !self.exhausted {
            debug!("✂️ scroll abandoned early, clearing it");
            self.finish().await;
        }
    }
}
