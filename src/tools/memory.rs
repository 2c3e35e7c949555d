//! Memory collaborators used by the assistant's tools

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Something the assistant remembered about the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    /// Identifier assigned by the store
    pub id: String,
    /// Remembered text
    pub content: String,
    /// Free-form category, e.g. `preference`
    pub category: String,
    /// When the record was saved
    pub created_at: DateTime<Utc>,
    /// Marked as a favourite
    #[serde(default)]
    pub favourite: bool,
}

impl MemoryRecord {
    /// A fresh record with a random id
    #[must_use]
    pub fn new(content: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            category: category.into(),
            created_at: Utc::now(),
            favourite: false,
        }
    }

    /// Mark the record as a favourite
    #[must_use]
    pub const fn favourite(mut self) -> Self {
        self.favourite = true;
        self
    }
}

/// Search, listing and persistence of user memories
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    /// Best `top_k` matches for `query`
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<MemoryRecord>>;

    /// Up to `limit` favourite records, newest first
    async fn list_favourites(&self, limit: usize) -> Result<Vec<MemoryRecord>>;

    /// Persist `text` under `category`
    async fn add_memory(&self, text: &str, category: &str) -> Result<MemoryRecord>;
}

/// Process-local store used when no memory service is configured
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<MemoryRecord>>,
}

impl InMemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `records`
    #[must_use]
    pub fn with_records(records: Vec<MemoryRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryStore {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<MemoryRecord>> {
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let records = self.records.lock();

        let mut scored: Vec<(usize, &MemoryRecord)> = records
            .iter()
            .filter_map(|record| {
                let content = record.content.to_lowercase();
                let hits = terms.iter().filter(|t| content.contains(t.as_str())).count();
                (hits > 0).then_some((hits, record))
            })
            .collect();

        // Most term hits first, newest first among ties
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.created_at.cmp(&a.1.created_at)));

        Ok(scored.into_iter().take(top_k).map(|(_, r)| r.clone()).collect())
    }

    async fn list_favourites(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        let mut favourites: Vec<MemoryRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.favourite)
            .cloned()
            .collect();
        favourites.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        favourites.truncate(limit);
        Ok(favourites)
    }

    async fn add_memory(&self, text: &str, category: &str) -> Result<MemoryRecord> {
        let record = MemoryRecord::new(text, category);
        self.records.lock().push(record.clone());
        Ok(record)
    }
}

/// Request body for saving a memory
#[derive(Debug, Serialize)]
struct AddMemoryRequest<'a> {
    content: &'a str,
    category: &'a str,
}

/// Client for a remote memory service
#[derive(Debug, Clone)]
pub struct HttpMemoryStore {
    client: Client,
    base_url: String,
}

impl HttpMemoryStore {
    /// Create a client for the service at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    async fn read_records(response: reqwest::Response, what: &str) -> Result<Vec<MemoryRecord>> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tool(format!("{what} failed: {status} - {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Tool(format!("invalid {what} response: {e}")))
    }
}

#[async_trait::async_trait]
impl MemoryStore for HttpMemoryStore {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<MemoryRecord>> {
        let limit = top_k.to_string();
        let response = self
            .client
            .get(self.url("/memories/search"))
            .query(&[("q", query), ("limit", limit.as_str())])
            .send()
            .await?;
        Self::read_records(response, "memory search").await
    }

    async fn list_favourites(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        let response = self
            .client
            .get(self.url("/memories/favourites"))
            .query(&[("limit", limit)])
            .send()
            .await?;
        Self::read_records(response, "favourites listing").await
    }

    async fn add_memory(&self, text: &str, category: &str) -> Result<MemoryRecord> {
        let response = self
            .client
            .post(self.url("/memories"))
            .json(&AddMemoryRequest {
                content: text,
                category,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tool(format!("memory save failed: {status} - {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Tool(format!("invalid memory save response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_ranks_by_term_hits() {
        let store = InMemoryStore::with_records(vec![
            MemoryRecord::new("likes basil", "preference"),
            MemoryRecord::new("likes basil and fresh tomatoes", "preference"),
            MemoryRecord::new("allergic to peanuts", "fact"),
        ]);

        let results = store.search("basil tomatoes", 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "likes basil and fresh tomatoes");

        let limited = store.search("basil", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn favourites_are_filtered_and_limited() {
        let store = InMemoryStore::with_records(vec![
            MemoryRecord::new("shakshuka", "recipe").favourite(),
            MemoryRecord::new("ramen", "recipe").favourite(),
            MemoryRecord::new("toast", "recipe"),
        ]);

        assert_eq!(store.list_favourites(10).await.unwrap().len(), 2);
        assert_eq!(store.list_favourites(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn add_memory_persists() {
        let store = InMemoryStore::new();
        let record = store.add_memory("prefers oat milk", "preference").await.unwrap();
        assert_eq!(record.category, "preference");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn record_uses_camel_case() {
        let json = serde_json::to_value(MemoryRecord::new("x", "y")).unwrap();
        assert!(json.get("createdAt").is_some());
    }
}
