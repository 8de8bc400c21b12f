//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN: INT. SERVER ROOM. 3:47 AM.
//!
//! Three nodes in the host list. One is rebooting. One was decommissioned in March and
//! nobody updated the config. One is fine. The bulk request knocks on each door in turn,
//! and the first one that opens gets the documents.
//!
//! If no door opens, we say so with a very specific error, [`StoreError::NoNodeAvailable`],
//! because that is the one failure the flush action is willing to retry.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, trace, warn};

use super::{
    BulkItem, BulkRequest, BulkResponse, Document, DocumentStore, SearchQuery, StoreError,
};

// -- 📏 the HTTP port. the transport port (9300) belongs to a previous era and we do not speak of it.
const DEFAULT_PORT: u16 = 9200;

// 📡 ElasticsearchConfig: where the cluster lives and how to get past the bouncer.
//
// 🔧 auth is tri-modal: username+password, api_key, or "I hope anonymous works".
// api_key wins when both are set. This is not a democracy.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchConfig {
    /// 📡 `host`, `host:port` or a full URL. Bare hosts get `http://` and port 9200.
    pub hosts: Vec<String>,
    /// 📦 The index every document lands in.
    pub index: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 🏚️ Send `_type` in bulk action lines and typed mapping URLs. Only for clusters older
    /// than 7.x, which still believe in document types.
    #[serde(default)]
    pub emit_document_type: bool,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// 📦 A request body plus the content type Elasticsearch insists on.
struct Payload {
    content_type: &'static str,
    body: String,
}

// -- 🧾 raw shapes of the _bulk response. only the bits we read.
#[derive(Debug, Deserialize)]
struct RawBulkResponse {
    #[serde(default)]
    took: u64,
    #[serde(default)]
    items: Vec<HashMap<String, RawBulkItem>>,
}

#[derive(Debug, Deserialize)]
struct RawBulkItem {
    #[serde(rename = "_index", default)]
    index: Option<String>,
    #[serde(rename = "_type", default)]
    document_type: Option<String>,
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawGetResponse {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawSearchResponse {
    hits: RawHits,
}

#[derive(Debug, Deserialize)]
struct RawHits {
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
}

/// 💀 Turn an ES error object into one readable line: `type: reason`, or the raw JSON
/// when the cluster got creative.
fn describe_error(error: &Value) -> String {
    match (error.get("type"), error.get("reason")) {
        (Some(Value::String(kind)), Some(Value::String(reason))) => format!("{kind}: {reason}"),
        (_, Some(Value::String(reason))) => reason.clone(),
        _ => match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

/// 🔧 `es1` → `http://es1:9200/`, `es1:9201` → `http://es1:9201/`, URLs pass through.
fn normalize_host(raw: &str) -> Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    let has_scheme = trimmed.contains("://");
    let candidate = if has_scheme {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let mut url = Url::parse(&candidate).context(format!(
        "💀 '{raw}' is not a host we can talk to. Expected `host`, `host:port` or a full URL."
    ))?;
    if !has_scheme && url.port().is_none() {
        url.set_port(Some(DEFAULT_PORT))
            .map_err(|_| anyhow::anyhow!("💀 Could not put a port on host '{raw}'."))?;
    }
    Ok(url)
}

/// 📡 The Elasticsearch store. HTTP client, a host list, an index, some credentials.
///
/// Requests try hosts in config order. A host that refuses the connection is skipped;
/// any other failure (timeouts included) is returned as-is, because a timeout might mean
/// the node got our request and is still chewing on it.
#[derive(Debug)]
pub struct ElasticsearchStore {
    client: reqwest::Client,
    hosts: Vec<Url>,
    config: ElasticsearchConfig,
}

impl ElasticsearchStore {
    /// 🏗️ Build the client and normalise the host list. No network traffic yet; see [`Self::ping`].
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        if config.hosts.is_empty() {
            anyhow::bail!(
                "💀 No Elasticsearch hosts configured. We'd love to index your documents. Where, though?"
            );
        }
        if config.index.trim().is_empty() {
            anyhow::bail!("💀 The Elasticsearch index name is empty. Documents need an address.");
        }
        let hosts = config
            .hosts
            .iter()
            .map(|h| normalize_host(h))
            .collect::<Result<Vec<_>>>()?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a TLS thing. It's usually a TLS thing.")?;

        Ok(Self {
            client,
            hosts,
            config,
        })
    }

    /// 📡 "Hello? Is this thing on?" GET the cluster root so a bad URL or bad credentials
    /// fail here instead of 50,000 rows later.
    pub async fn ping(&self) -> Result<()> {
        let response = self.send(Method::GET, &[], &[], None).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 The cluster answered the ping with '{}'. Body: '{}'. Check credentials before checking your feelings.",
                status,
                body
            );
        }
        info!("✅ Elasticsearch is home and taking visitors");
        Ok(())
    }

    // -- 🏚️ the type to put in a URL, only when talking to a cluster that still has types
    fn typed<'a>(&self, document_type: &'a str) -> Option<&'a str> {
        (self.config.emit_document_type && !document_type.is_empty()).then_some(document_type)
    }

    // -- 🔒 api_key beats basic auth in this club
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    fn url_for(&self, host: &Url, segments: &[&str], query: &[(&str, String)]) -> Result<Url> {
        let mut url = host.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("💀 Host '{host}' cannot carry a path."))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// 🚪 Knock on each host in turn until one answers.
    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        payload: Option<Payload>,
    ) -> Result<reqwest::Response> {
        let mut unreachable = Vec::with_capacity(self.hosts.len());
        for host in &self.hosts {
            let url = self.url_for(host, segments, query)?;
            let mut request = self.authorize(self.client.request(method.clone(), url.clone()));
            if let Some(ref payload) = payload {
                request = request
                    .header("Content-Type", payload.content_type)
                    .body(payload.body.clone());
            }

            match request.send().await {
                Ok(response) => {
                    trace!("📡 {} {} -> {}", method, url, response.status());
                    return Ok(response);
                }
                // -- ⏱️ a connect timeout also reports is_connect; the node may just be slow
                Err(err) if err.is_connect() && !err.is_timeout() => {
                    warn!("🚪 {} refused the connection, trying the next host: {}", host, err);
                    unreachable.push(host.to_string());
                }
                Err(err) => {
                    return Err(err).context(format!(
                        "💀 {} {} never came back. Not a refused connection, something weirder.",
                        method, url
                    ));
                }
            }
        }
        Err(StoreError::NoNodeAvailable { hosts: unreachable }.into())
    }

    /// 📦 Render a bulk request as NDJSON: action line, source line, repeat, trailing `\n`.
    fn render_bulk_body(&self, request: &BulkRequest) -> Result<String> {
        let estimated_size: usize = request.len() * 128;
        let mut body = String::with_capacity(estimated_size);
        for operation in &request.operations {
            let mut action = Map::new();
            action.insert("_index".into(), json!(self.config.index));
            if self.config.emit_document_type {
                action.insert("_type".into(), json!(request.document_type));
            }
            action.insert("_id".into(), json!(operation.id));

            body.push_str(&serde_json::to_string(&json!({ "index": action }))?);
            body.push('\n');
            body.push_str(
                &serde_json::to_string(&operation.source)
                    .context(format!("💀 Document '{}' refused to become JSON.", operation.id))?,
            );
            body.push('\n');
        }
        Ok(body)
    }

    fn parse_bulk_response(raw: RawBulkResponse) -> BulkResponse {
        let items = raw
            .items
            .into_iter()
            .filter_map(|entry| entry.into_values().next())
            .map(|item| BulkItem {
                failure: item.error.as_ref().map(describe_error),
                index: item.index,
                document_type: item.document_type,
                id: item.id,
                status: item.status,
            })
            .collect();
        BulkResponse {
            took_ms: raw.took,
            items,
        }
    }
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse> {
        let body = self.render_bulk_body(request)?;
        debug!(
            "📡 Sending {} documents ({} bytes) to /_bulk",
            request.len(),
            body.len()
        );
        let response = self
            .send(
                Method::POST,
                &["_bulk"],
                &[],
                Some(Payload {
                    // ⚠️ x-ndjson, not json. ES gets very particular about this.
                    content_type: "application/x-ndjson",
                    body,
                }),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 The bulk request arrived, but Elasticsearch said '{}'. Body: '{}'.",
                status,
                body
            );
        }
        let raw: RawBulkResponse = response
            .json()
            .await
            .context("💀 The bulk response was not the JSON we were promised.")?;
        Ok(Self::parse_bulk_response(raw))
    }

    async fn ensure_index(&self) -> Result<()> {
        let index = self.config.index.as_str();
        let response = self.send(Method::HEAD, &[index], &[], None).await?;
        match response.status() {
            status if status.is_success() => {
                debug!("✅ Index '{}' already exists", index);
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                info!("🏗️ Index '{}' does not exist yet. Creating it.", index);
                let created = self.send(Method::PUT, &[index], &[], None).await?;
                let status = created.status();
                if !status.is_success() {
                    let body = created.text().await.unwrap_or_default();
                    anyhow::bail!(
                        "💀 Tried to create index '{}' and got '{}'. Body: '{}'.",
                        index,
                        status,
                        body
                    );
                }
                Ok(())
            }
            status => anyhow::bail!(
                "💀 Asked whether index '{}' exists and got '{}', which is neither yes nor no.",
                index,
                status
            ),
        }
    }

    async fn put_mapping(&self, document_type: &str, date_detection: bool) -> Result<()> {
        let index = self.config.index.as_str();
        let segments: Vec<&str> = if self.config.emit_document_type {
            vec![index, "_mapping", document_type]
        } else {
            vec![index, "_mapping"]
        };
        let body = serde_json::to_string(&json!({ "date_detection": date_detection }))?;
        let response = self
            .send(
                Method::PUT,
                &segments,
                &[],
                Some(Payload {
                    content_type: "application/json",
                    body,
                }),
            )
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 Putting the mapping on '{}' failed with '{}'. Body: '{}'.",
                index,
                status,
                body
            );
        }
        debug!("🗺️ Mapping updated, date_detection = {}", date_detection);
        Ok(())
    }

    async fn get_document(
        &self,
        document_type: &str,
        id: &str,
        fields: &[String],
    ) -> Result<Option<Document>> {
        let index = self.config.index.as_str();
        let query = if fields.is_empty() {
            Vec::new()
        } else {
            vec![("_source_includes", fields.join(","))]
        };
        let segments = match self.typed(document_type) {
            Some(document_type) => [index, document_type, id],
            None => [index, "_doc", id],
        };
        let response = self.send(Method::GET, &segments, &query, None).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 Fetching document '{}' failed with '{}'. Body: '{}'.",
                id,
                status,
                body
            );
        }
        let raw: RawGetResponse = response
            .json()
            .await
            .context("💀 The get response was not the JSON we were promised.")?;
        Ok(raw.found.then(|| Document {
            id: raw.id,
            source: raw.source,
        }))
    }

    async fn search_first(&self, query: &SearchQuery) -> Result<Option<Document>> {
        let index = self.config.index.as_str();
        let mut clause = Map::new();
        clause.insert("query".into(), json!(query.text));
        if let Some(ref analyzer) = query.analyzer {
            clause.insert("analyzer".into(), json!(analyzer));
        }
        let es_query = match query.field {
            Some(ref field) => json!({ "match": { field: clause } }),
            None => json!({ "multi_match": clause }),
        };
        let body = serde_json::to_string(&json!({ "size": 1, "query": es_query }))?;
        let segments: Vec<&str> = match self.typed(&query.document_type) {
            Some(document_type) => vec![index, document_type, "_search"],
            None => vec![index, "_search"],
        };

        let response = self
            .send(
                Method::POST,
                &segments,
                &[],
                Some(Payload {
                    content_type: "application/json",
                    body,
                }),
            )
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 Search on '{}' failed with '{}'. Body: '{}'.",
                index,
                status,
                body
            );
        }
        let raw: RawSearchResponse = response
            .json()
            .await
            .context("💀 The search response was not the JSON we were promised.")?;
        Ok(raw.hits.hits.into_iter().next().map(|hit| Document {
            id: hit.id,
            source: hit.source,
        }))
    }

    async fn close(&self) -> Result<()> {
        debug!("🗑️ Elasticsearch store closing. The connection pool says goodbye.");
        Ok(())
    }
}
