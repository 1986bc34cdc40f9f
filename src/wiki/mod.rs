//! Company wiki pages kept as records in a Pinecone index.
//!
//! Each page is one vector whose metadata carries the title and markdown
//! body. Vectors come from a hashed bag-of-words, so similar wording lands
//! near each other without an embedding service.

use chrono::Utc;
use log::{ info, warn };
use serde::{ Deserialize, Serialize };
use std::collections::HashMap;
use uuid::Uuid;

use crate::cli::Args;
use crate::error::ProviderError;
use crate::llm::chat::check_status;
use crate::models::chat::iso_millis;

const API_VERSION: &str = "2024-07";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WikiPage {
    pub id: String,
    pub title: String,
    pub content_md: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WikiSummary {
    pub id: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WikiSearchHit {
    pub id: String,
    pub score: f32,
    pub title: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PageMetadata {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content_md: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

#[derive(Serialize)]
struct UpsertRecord<'a> {
    id: &'a str,
    values: Vec<f32>,
    metadata: PageMetadata,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertRecord<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    vector: Vec<f32>,
    top_k: usize,
    include_metadata: bool,
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, FetchedRecord>,
}

#[derive(Deserialize)]
struct FetchedRecord {
    id: String,
    #[serde(default)]
    metadata: Option<PageMetadata>,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    vectors: Vec<ListedId>,
}

#[derive(Deserialize)]
struct ListedId {
    id: String,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<PageMetadata>,
}

/// FNV-1a, stable across runs and platforms.
fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Unit-length hashed term-frequency vector of `text`.
pub fn embed(text: &str, dimension: usize) -> Vec<f32> {
    let dimension = dimension.max(1);
    let mut vector = vec![0f32; dimension];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let bucket = fnv1a(&word.to_lowercase()) % (dimension as u64);
        vector[bucket as usize] += 1.0;
    }

    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        // Pinecone rejects all-zero dense vectors.
        vector[0] = 1.0;
    } else {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
    vector
}

fn new_page_id() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(5).collect();
    format!("wiki-{}-{}", Utc::now().timestamp_millis(), suffix)
}

pub struct WikiIndex {
    http: reqwest::Client,
    host: String,
    api_key: String,
    dimension: usize,
}

impl WikiIndex {
    pub fn new(http: reqwest::Client, host: String, api_key: String, dimension: usize) -> Self {
        Self {
            http,
            host: host.trim_end_matches('/').to_string(),
            api_key,
            dimension,
        }
    }

    /// `None` unless both the index host and the Pinecone key are set.
    pub fn from_args(args: &Args, http: reqwest::Client) -> Option<Self> {
        let non_blank = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        match (non_blank(&args.pinecone_index_host), non_blank(&args.pinecone_api_key)) {
            (Some(host), Some(key)) => {
                info!("Wiki index enabled at {}", host);
                Some(Self::new(http, host, key, args.wiki_embedding_dimension))
            }
            (None, _) => None,
            (Some(_), None) => {
                warn!("PINECONE_INDEX_HOST is set but PINECONE_API_KEY is not; wiki disabled.");
                None
            }
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, FetchedRecord>, ProviderError> {
        let query: Vec<(&str, &str)> = ids
            .iter()
            .map(|id| ("ids", id.as_str()))
            .collect();
        let resp = self.get("/vectors/fetch").query(&query).send().await?;
        let data: FetchResponse = check_status(resp).await?
            .json().await
            .map_err(|e| ProviderError::Protocol(format!("wiki fetch: {}", e)))?;
        Ok(data.vectors)
    }

    /// The page stored under `id`, or `None` when there is no such record.
    pub async fn page(&self, id: &str) -> Result<Option<WikiPage>, ProviderError> {
        let mut records = self.fetch(&[id.to_string()]).await?;
        Ok(
            records.remove(id).and_then(|record| {
                record.metadata.map(|meta| WikiPage {
                    id: record.id,
                    title: meta.title.unwrap_or_default(),
                    content_md: meta.content_md.unwrap_or_default(),
                })
            })
        )
    }

    /// Creates or replaces a page. A missing id gets a fresh `wiki-…` id.
    pub async fn upsert(
        &self,
        id: Option<String>,
        title: &str,
        content_md: &str
    ) -> Result<WikiPage, ProviderError> {
        let id = id.filter(|i| !i.is_empty()).unwrap_or_else(new_page_id);
        let request = UpsertRequest {
            vectors: vec![UpsertRecord {
                id: &id,
                values: embed(&format!("{}\n{}", title, content_md), self.dimension),
                metadata: PageMetadata {
                    title: Some(title.to_string()),
                    content_md: Some(content_md.to_string()),
                    updated_at: Some(iso_millis::format(&Utc::now())),
                },
            }],
        };

        let resp = self.post("/vectors/upsert").json(&request).send().await?;
        check_status(resp).await?;
        info!("Wiki page {} upserted.", id);

        Ok(WikiPage { id, title: title.to_string(), content_md: content_md.to_string() })
    }

    /// Up to `limit` pages in index order, with their titles.
    pub async fn list(&self, limit: usize) -> Result<Vec<WikiSummary>, ProviderError> {
        let resp = self.get("/vectors/list").query(&[("limit", limit)]).send().await?;
        let listed: ListResponse = check_status(resp).await?
            .json().await
            .map_err(|e| ProviderError::Protocol(format!("wiki list: {}", e)))?;

        let ids: Vec<String> = listed.vectors.into_iter().map(|v| v.id).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut records = self.fetch(&ids).await?;
        Ok(
            ids
                .into_iter()
                .map(|id| {
                    let title = records
                        .remove(&id)
                        .and_then(|r| r.metadata)
                        .and_then(|m| m.title);
                    WikiSummary { id, title }
                })
                .collect()
        )
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<WikiSearchHit>, ProviderError> {
        let request = QueryRequest {
            vector: embed(query, self.dimension),
            top_k,
            include_metadata: true,
        };
        let resp = self.post("/query").json(&request).send().await?;
        let data: QueryResponse = check_status(resp).await?
            .json().await
            .map_err(|e| ProviderError::Protocol(format!("wiki query: {}", e)))?;

        Ok(
            data.matches
                .into_iter()
                .map(|m| WikiSearchHit {
                    id: m.id,
                    score: m.score,
                    title: m.metadata.and_then(|meta| meta.title),
                })
                .collect()
        )
    }
}
