//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🚀 This module sends companies into the elastic void and, when asked
//! nicely, brings them back sorted by name. It is equal parts HTTP client,
//! bulk API whisperer, and coping mechanism.
//!
//! How the document-store vocabulary lands on Elasticsearch:
//! - the collection is one index, created on open with `name` mapped as `keyword`
//! - the unique key is the document `_id`, which is the company name, so two
//!   documents with one name cannot exist, no matter how many writers race
//! - an upsert is a bulk `update` action with `doc_as_upsert`, which reports
//!   `created`, `updated`, or `noop` per item. Matched/modified/upserted, basically.
//! - the bulk API is unordered by nature: every item succeeds or fails on its own
//! - full reads go through a scroll, and the scroll is always cleared, even when
//!   a page fails to decode halfway through
//!
//! ⚠️ This module does not retry. Retries are the caller's problem. Upserts are
//! idempotent, so for batches that's a small problem.
//!
//! 🦆

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, trace, warn};

use crate::app_config::RuntimeConfig;
use crate::backends::CompanyStore;
use crate::common::{BulkUpsertReport, Company, UpdateReport};

// ⏳ how long the cluster keeps a scroll context alive between pages
const SCROLL_KEEP_ALIVE: &str = "1m";

/// 📡 `[store.Elasticsearch]`: where the companies live.
///
/// 🔧 auth is tri-modal: api_key, username+password, or "I hope anonymous works".
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchStoreConfig {
    /// 📡 Cluster URL. Scheme + host + port. Yes, all of it.
    pub url: String,
    /// 📦 The collection. Lowercase, because Elasticsearch has opinions.
    pub index: String,
    /// 🏷️ Optional namespace, joined as `{prefix}-{index}`. The "database name", more or less.
    #[serde(default)]
    pub index_prefix: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 Preferred over basic auth when both are present.
    #[serde(default)]
    pub api_key: Option<String>,
    /// 🔄 Refresh policy for writes. `wait_for` makes a write visible to the next read.
    #[serde(default = "default_refresh")]
    pub refresh: String,
}

fn default_refresh() -> String {
    String::from("wait_for")
}

impl ElasticsearchStoreConfig {
    /// 📦 Fully-qualified collection name.
    pub fn collection(&self) -> String {
        match self.index_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{}-{}", prefix, self.index),
            _ => self.index.clone(),
        }
    }
}

/// 📡 A pooled handle to one collection on one cluster.
///
/// `reqwest::Client` is the pool. It is cheap to share, safe across tasks, and
/// keeps up to `pool_size` idle connections per host warm between requests.
#[derive(Debug)]
pub struct ElasticsearchStore {
    client: reqwest::Client,
    config: Arc<ElasticsearchStoreConfig>,
    base_url: Url,
    collection: String,
    page_size: usize,
    server_selection_timeout: Duration,
    connect_timeout: Duration,
}

// ===== wire shapes =====

#[derive(Debug, Deserialize)]
struct ClusterHealth {
    status: String,
    #[serde(default)]
    timed_out: bool,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct UpdateResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ScrollPage {
    hits: ScrollHits,
}

#[derive(Debug, Deserialize)]
struct ScrollHits {
    #[serde(default)]
    hits: Vec<ScrollHit>,
}

#[derive(Debug, Deserialize)]
struct ScrollHit {
    #[serde(rename = "_source")]
    source: Value,
}

/// 🔒 Auth priority: API key wins over basic auth. This is not a democracy.
fn authorize(request: RequestBuilder, config: &ElasticsearchStoreConfig) -> RequestBuilder {
    if let Some(ref api_key) = config.api_key {
        request.header("Authorization", format!("ApiKey {}", api_key))
    } else if let Some(ref username) = config.username {
        request.basic_auth(username, config.password.as_ref())
    } else {
        request
    }
}

/// 🗑️ Release a scroll context on the server.
async fn clear_scroll(
    client: &reqwest::Client,
    url: Url,
    config: &ElasticsearchStoreConfig,
    scroll_id: &str,
) -> Result<()> {
    let body = json!({ "scroll_id": [scroll_id] });

    let response = authorize(client.delete(url), config)
        .header("Content-Type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .context("💀 Could not reach Elasticsearch to clear the scroll")?;

    let status = response.status();
    // 404: already expired or cleared, which is the outcome we wanted anyway
    if !status.is_success() && status != StatusCode::NOT_FOUND {
        let body = response.text().await.unwrap_or_default();
        bail!("💀 Clearing the scroll failed with '{}': {}", status, body);
    }
    trace!("🗑️ Scroll cleared");
    Ok(())
}

/// 🧹 Owns the live scroll id for one full read.
///
/// [`ScrollGuard::release`] clears it inline. If the read future is dropped
/// first (deadline, client disconnect), `Drop` hands the clear to a spawned
/// task so the cursor still goes away.
struct ScrollGuard {
    client: reqwest::Client,
    clear_url: Url,
    config: Arc<ElasticsearchStoreConfig>,
    scroll_id: Option<String>,
}

impl ScrollGuard {
    async fn release(mut self) {
        let Some(id) = self.scroll_id.take() else {
            return;
        };
        if let Err(err) = clear_scroll(&self.client, self.clear_url.clone(), &self.config, &id).await
        {
            // the read already has its answer; a leaked scroll expires on its own
            warn!("⚠️ Failed to clear scroll: {:#}", err);
        }
    }
}

impl Drop for ScrollGuard {
    fn drop(&mut self) {
        let Some(id) = self.scroll_id.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("⚠️ Scroll abandoned outside a runtime; it will expire on its own");
            return;
        };
        debug!("🧹 Read was cut short, clearing its scroll in the background");
        let client = self.client.clone();
        let clear_url = self.clear_url.clone();
        let config = Arc::clone(&self.config);
        runtime.spawn(async move {
            if let Err(err) = clear_scroll(&client, clear_url, &config, &id).await {
                warn!("⚠️ Failed to clear an abandoned scroll: {:#}", err);
            }
        });
    }
}

/// 🔎 Pull a human-readable reason out of an Elasticsearch error object.
fn error_reason(error: &Value) -> String {
    match (error.get("type"), error.get("reason")) {
        (Some(kind), Some(reason)) => format!(
            "{}: {}",
            kind.as_str().unwrap_or_default(),
            reason.as_str().unwrap_or_default()
        ),
        _ => error.to_string(),
    }
}

impl ElasticsearchStore {
    /// 🚀 Build the pool, ping the cluster, make sure the collection exists.
    ///
    /// Fails fast: the connect timeout and the primary-allocation wait are both
    /// bounded by the runtime config, so a dead cluster costs seconds, not forever.
    pub async fn open(config: ElasticsearchStoreConfig, runtime: &RuntimeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(runtime.connect_timeout())
            .pool_max_idle_per_host(runtime.effective_pool_size())
            .build()
            .context("💀 The HTTP client refused to be born. Probably TLS. It's always TLS.")?;

        let base_url = Url::parse(&config.url)
            .with_context(|| format!("💀 '{}' is not a URL we can talk to", config.url))?;

        let store = Self {
            client,
            collection: config.collection(),
            base_url,
            page_size: runtime.batch_size_hint.max(1),
            server_selection_timeout: runtime.server_selection_timeout(),
            connect_timeout: runtime.connect_timeout(),
            config: Arc::new(config),
        };

        store
            .ping()
            .await
            .context("💀 The initial ping went unanswered. Is the cluster actually running?")?;
        store.ensure_collection().await?;
        Ok(store)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// 🔧 `base_url` + path segments, each one percent-encoded. Company names
    /// with slashes in them stay one segment, as they should.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| anyhow!("💀 '{}' cannot be used as a base URL", self.base_url))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        authorize(request, &self.config)
    }

    /// 📦 Create the collection with `name` as a keyword, unless it already exists.
    async fn ensure_collection(&self) -> Result<()> {
        let url = self.endpoint(&[&self.collection])?;
        let body = json!({
            "mappings": {
                "properties": {
                    "name": { "type": "keyword" },
                    // stored, never searched: no term-length limit, no doc values
                    "address": { "type": "keyword", "index": false, "doc_values": false },
                    "treated": { "type": "boolean" }
                }
            }
        });

        let response = self
            .authorize(self.client.put(url))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .context("💀 Tried to create the collection. The network had other plans.")?;

        let status = response.status();
        if status.is_success() {
            info!("📦 Created collection '{}' with a unique name key", self.collection);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            debug!("✅ Collection '{}' already exists, nothing to do", self.collection);
            return Ok(());
        }

        bail!(
            "💀 Could not ensure collection '{}': Elasticsearch said '{}' and '{}'",
            self.collection,
            status,
            body
        )
    }

    /// 📡 Open a scroll over the whole collection, sorted by name.
    async fn open_scroll(&self, scroll_id: &mut Option<String>) -> Result<ScrollPage> {
        let mut url = self.endpoint(&[&self.collection, "_search"])?;
        url.query_pairs_mut().append_pair("scroll", SCROLL_KEEP_ALIVE);
        let body = json!({
            "size": self.page_size,
            "sort": [ { "name": "asc" } ],
            "query": { "match_all": {} }
        });

        let response = self
            .authorize(self.client.post(url))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .context("💀 The search request never made it to Elasticsearch")?;
        Self::decode_page(response, scroll_id).await
    }

    async fn next_scroll_page(&self, scroll_id: &mut Option<String>) -> Result<ScrollPage> {
        let url = self.endpoint(&["_search", "scroll"])?;
        let body = json!({ "scroll": SCROLL_KEEP_ALIVE, "scroll_id": scroll_id.as_deref() });

        let response = self
            .authorize(self.client.post(url))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .context("💀 Lost the thread mid-scroll. The next page never arrived.")?;
        Self::decode_page(response, scroll_id).await
    }

    /// 📄 Record the page's scroll id before anything else can fail, then
    /// decode the hits.
    async fn decode_page(
        response: reqwest::Response,
        scroll_id: &mut Option<String>,
    ) -> Result<ScrollPage> {
        let status = response.status();
        let body = response
            .text()
            .await
            .context("💀 The search response body evaporated before we could read it")?;
        if !status.is_success() {
            bail!("💀 Search failed with '{}': {}", status, body);
        }

        let raw: Value =
            serde_json::from_str(&body).context("💀 The search response was not even JSON")?;
        if let Some(id) = raw.get("_scroll_id").and_then(Value::as_str) {
            *scroll_id = Some(id.to_owned());
        }
        serde_json::from_value(raw).context("💀 The search response was not the shape we expected")
    }

    /// 📚 Open the scroll and drain every page, keeping `scroll_id` pointed at
    /// the latest live cursor so the caller can clear it whatever happens here.
    async fn collect_pages(&self, scroll_id: &mut Option<String>) -> Result<Vec<Company>> {
        let mut page = self.open_scroll(scroll_id).await?;
        let mut companies = Vec::new();
        loop {
            let page_len = page.hits.hits.len();
            for hit in page.hits.hits {
                let company: Company = serde_json::from_value(hit.source)
                    .context("💀 A stored document does not decode as a company")?;
                companies.push(company);
            }

            if page_len < self.page_size || scroll_id.is_none() {
                return Ok(companies);
            }
            page = self.next_scroll_page(scroll_id).await?;
        }
    }

    /// 📦 One NDJSON line pair per company: `update` by id, full doc, upsert on miss.
    fn render_bulk_body(companies: &[Company]) -> Result<String> {
        let mut body = String::with_capacity(companies.len() * 128);
        for company in companies {
            let action = json!({ "update": { "_id": company.name } });
            let source = json!({ "doc": company, "doc_as_upsert": true });
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(&source)?);
            body.push('\n');
        }
        Ok(body)
    }

    /// 📊 Count created/updated/noop/error across the bulk response items.
    fn tally(response: BulkResponse) -> BulkUpsertReport {
        let mut report = BulkUpsertReport::default();
        for item in response.items {
            let Some(outcome) = item.into_values().next() else {
                continue;
            };
            if let Some(error) = outcome.error {
                report.rejected += 1;
                report.first_rejection.get_or_insert_with(|| error_reason(&error));
                continue;
            }
            match outcome.result.as_deref() {
                Some("created") => report.upserted += 1,
                Some("updated") => report.modified += 1,
                _ => {}
            }
        }
        if response.errors && report.rejected == 0 {
            warn!("⚠️ Bulk response flagged errors but no item carried one. Trusting the items.");
        }
        report
    }
}

#[async_trait]
impl CompanyStore for ElasticsearchStore {
    /// 🩺 Ask the cluster whether primaries are allocated (status yellow or better).
    async fn ping(&self) -> Result<()> {
        let mut url = self.endpoint(&["_cluster", "health"])?;
        url.query_pairs_mut()
            .append_pair("wait_for_status", "yellow")
            .append_pair(
                "timeout",
                &format!("{}s", self.server_selection_timeout.as_secs().max(1)),
            );

        let response = self
            .authorize(self.client.get(url))
            .timeout(self.server_selection_timeout + self.connect_timeout)
            .send()
            .await
            .context("💀 Pinged the cluster. The cluster did not ping back.")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("💀 Cluster health answered '{}': {}", status, body);
        }

        let health: ClusterHealth = serde_json::from_str(&body)
            .context("💀 Cluster health came back in a shape we don't recognise")?;
        if health.timed_out || health.status == "red" {
            bail!(
                "💀 Cluster is '{}' (timed out: {}). Primaries are not all home.",
                health.status,
                health.timed_out
            );
        }
        trace!("🩺 Cluster is {}", health.status);
        Ok(())
    }

    async fn bulk_upsert(&self, companies: &[Company]) -> Result<BulkUpsertReport> {
        let body = Self::render_bulk_body(companies)
            .context("💀 Could not render the bulk body. The JSON that describes JSON failed to become JSON.")?;

        let mut url = self.endpoint(&[&self.collection, "_bulk"])?;
        url.query_pairs_mut().append_pair("refresh", &self.config.refresh);

        debug!(
            "📡 Sending {} upserts ({} bytes) to {}",
            companies.len(),
            body.len(),
            url
        );
        let response = self
            .authorize(self.client.post(url))
            // ⚠️ application/x-ndjson, not application/json
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context("💀 The bulk request never made it to Elasticsearch. Check connectivity, check timeouts.")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("💀 The bulk response body vanished on the way back")?;
        if !status.is_success() {
            bail!(
                "💀 The bulk request arrived, but Elasticsearch said '{}': {}",
                status,
                body
            );
        }

        let parsed: BulkResponse = serde_json::from_str(&body)
            .context("💀 The bulk response was not the shape we expected")?;
        Ok(Self::tally(parsed))
    }

    async fn set_treated(&self, name: &str) -> Result<UpdateReport> {
        let mut url = self.endpoint(&[&self.collection, "_update", name])?;
        url.query_pairs_mut().append_pair("refresh", &self.config.refresh);
        let body = json!({ "doc": { "treated": true } });

        let response = self
            .authorize(self.client.post(url))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .context("💀 The update request never made it to Elasticsearch")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("💀 The update response body vanished on the way back")?;

        if status == StatusCode::NOT_FOUND && body.contains("document_missing_exception") {
            return Ok(UpdateReport {
                matched: false,
                modified: false,
            });
        }
        if !status.is_success() {
            bail!("💀 Update answered '{}': {}", status, body);
        }

        let parsed: UpdateResponse = serde_json::from_str(&body)
            .context("💀 The update response was not the shape we expected")?;
        match parsed.result.as_str() {
            "updated" => Ok(UpdateReport {
                matched: true,
                modified: true,
            }),
            "noop" => Ok(UpdateReport {
                matched: true,
                modified: false,
            }),
            other => bail!("💀 Update came back with an unexpected result '{}'", other),
        }
    }

    /// 📚 Scroll the whole collection in name order, then clear the scroll no
    /// matter what: on success, on error, and when this future is dropped.
    async fn fetch_sorted_by_name(&self) -> Result<Vec<Company>> {
        let mut scroll = ScrollGuard {
            client: self.client.clone(),
            clear_url: self.endpoint(&["_search", "scroll"])?,
            config: Arc::clone(&self.config),
            scroll_id: None,
        };
        let collected = self.collect_pages(&mut scroll.scroll_id).await;
        scroll.release().await;
        collected
    }

    /// 🗑️ Nothing to release here. The connection pool lives in the
    /// `reqwest::Client`, and it drains when the last owner of this store
    /// (the engine) is dropped.
    async fn close(&self) -> Result<()> {
        debug!("🗑️ Elasticsearch store closed; the pool drains when the engine drops");
        Ok(())
    }
}
