//! Azure Cosmos DB (NoSQL API) vector collection
//!
//! Talks to the REST gateway directly with master-key authorization.
//! The container is expected to carry a cosine vector-embedding policy on
//! `/embedding` and to be partitioned by `/category`.
//!
//! The gateway does not serve cross-partition `TOP`/`ORDER BY` queries, so
//! a nearest-neighbour search runs once per partition key range and the
//! per-range results are merged here.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::cmp::Ordering;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use super::remote::VectorCollection;
use super::RetrievedEntry;
use crate::error::RagError;
use crate::knowledge::KnowledgeEntry;
use crate::Result;

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2018-12-31";

const NEAREST_QUERY: &str = "SELECT TOP @k c.id, c.topic, c.category, c.content_en, c.content_vi, c.keywords, \
     VectorDistance(c.embedding, @embedding) AS score \
     FROM c ORDER BY VectorDistance(c.embedding, @embedding)";

#[derive(Debug, Clone)]
pub struct CosmosConfig {
    pub endpoint: String,
    /// Base64 master key
    pub key: String,
    pub database: String,
    pub container: String,
}

/// One knowledge entry as stored in the remote collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub topic: String,
    pub category: String,
    pub content_en: String,
    pub content_vi: String,
    pub keywords: Vec<String>,
    pub text_content: String,
    pub embedding: Vec<f32>,
}

impl RemoteDocument {
    pub fn from_entry(entry: &KnowledgeEntry, embedding: Vec<f32>) -> Self {
        Self {
            id: entry.id.clone(),
            topic: entry.topic.clone(),
            category: entry.category.clone(),
            content_en: entry.content_en.clone(),
            content_vi: entry.content_vi.clone(),
            keywords: entry.keywords.clone(),
            text_content: entry.embedding_text(),
            embedding,
        }
    }
}

pub struct CosmosCollection {
    client: Client,
    endpoint: String,
    key: Vec<u8>,
    collection_link: String,
    /// Partition key range ids, fetched on first use
    ranges: RwLock<Vec<String>>,
}

impl CosmosCollection {
    pub fn new(config: CosmosConfig) -> Result<Self> {
        let key = STANDARD
            .decode(config.key.trim())
            .map_err(|e| RagError::Config(format!("COSMOS_DB_KEY is not valid base64: {}", e)))?;

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            key,
            collection_link: format!("dbs/{}/colls/{}", config.database, config.container),
            ranges: RwLock::new(Vec::new()),
        })
    }

    /// Master-key authorization token for one request, URL-encoded.
    fn authorization(
        &self,
        verb: &str,
        resource_type: &str,
        resource_link: &str,
        date: &str,
    ) -> Result<String> {
        let payload = format!(
            "{}\n{}\n{}\n{}\n\n",
            verb.to_lowercase(),
            resource_type.to_lowercase(),
            resource_link,
            date.to_lowercase()
        );

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| RagError::Config(format!("invalid Cosmos key: {}", e)))?;
        mac.update(payload.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        Ok(urlencoding::encode(&format!("type=master&ver=1.0&sig={}", signature)).into_owned())
    }

    fn signed(
        &self,
        builder: RequestBuilder,
        verb: &str,
        resource_type: &str,
    ) -> Result<RequestBuilder> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let token = self.authorization(verb, resource_type, &self.collection_link, &date)?;

        Ok(builder
            .header("authorization", token)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION))
    }

    /// Ids of the collection's partition key ranges, cached after the
    /// first successful lookup.
    async fn partition_key_ranges(&self) -> Result<Vec<String>> {
        {
            let cached = self.ranges.read().await;
            if !cached.is_empty() {
                return Ok(cached.clone());
            }
        }

        let url = format!("{}/{}/pkranges", self.endpoint, self.collection_link);
        let response = self
            .signed(self.client.get(&url), "GET", "pkranges")?
            .send()
            .await
            .map_err(|e| RagError::RemoteStore(format!("partition key range lookup failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::RemoteStore(format!(
                "partition key range lookup HTTP {}: {}",
                status, body
            )));
        }

        let parsed: PartitionKeyRanges = response
            .json()
            .await
            .map_err(|e| RagError::RemoteStore(format!("partition key range parse error: {}", e)))?;

        let ids: Vec<String> = parsed.ranges.into_iter().map(|r| r.id).collect();
        if ids.is_empty() {
            return Err(RagError::RemoteStore(
                "collection reported no partition key ranges".into(),
            ));
        }

        debug!("Cosmos DB collection has {} partition key ranges", ids.len());
        *self.ranges.write().await = ids.clone();
        Ok(ids)
    }

    /// Run the nearest-neighbour query against one partition key range.
    async fn nearest_in_range(&self, range_id: &str, body: &[u8]) -> Result<Vec<VectorRow>> {
        let url = format!("{}/{}/docs", self.endpoint, self.collection_link);

        let request = self
            .signed(self.client.post(&url), "POST", "docs")?
            .header("content-type", "application/query+json")
            .header("x-ms-documentdb-isquery", "True")
            .header("x-ms-documentdb-query-enablecrosspartition", "True")
            .header("x-ms-documentdb-partitionkeyrangeid", range_id)
            .body(body.to_vec());

        let response = request
            .send()
            .await
            .map_err(|e| RagError::RemoteStore(format!("query failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::GONE {
            // split or merged ranges; refetch on the next query
            warn!(range = %range_id, "Partition key range is gone, refreshing ranges");
            self.ranges.write().await.clear();
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::RemoteStore(format!(
                "query on range {} HTTP {}: {}",
                range_id, status, body
            )));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| RagError::RemoteStore(format!("query parse error: {}", e)))?;

        Ok(parsed.documents)
    }

    /// Insert or replace one document.
    pub async fn upsert(&self, document: &RemoteDocument) -> Result<()> {
        let url = format!("{}/{}/docs", self.endpoint, self.collection_link);
        let partition_key = serde_json::to_string(&[&document.category])?;

        let request = self
            .signed(self.client.post(&url), "POST", "docs")?
            .header("x-ms-documentdb-is-upsert", "True")
            .header("x-ms-documentdb-partitionkey", partition_key)
            .json(document);

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::RemoteStore(format!(
                "upsert {} failed: HTTP {}: {}",
                document.id, status, body
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl VectorCollection for CosmosCollection {
    async fn count_documents(&self) -> Result<usize> {
        let url = format!("{}/{}", self.endpoint, self.collection_link);

        let request = self
            .signed(self.client.get(&url), "GET", "colls")?
            .header("x-ms-documentdb-populatequotainfo", "True");

        let response = request.send().await.map_err(|e| {
            error!("Cosmos DB collection lookup failed: {}", e);
            RagError::RemoteStore(format!("collection lookup failed: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::RemoteStore(format!("collection lookup HTTP {}: {}", status, body)));
        }

        let count = response
            .headers()
            .get("x-ms-resource-usage")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_documents_count)
            .unwrap_or(0);

        self.partition_key_ranges().await?;

        Ok(count)
    }

    async fn nearest(&self, embedding: &[f32], top_k: usize) -> Result<Vec<RetrievedEntry>> {
        let body = serde_json::to_vec(&serde_json::json!({
            "query": NEAREST_QUERY,
            "parameters": [
                {"name": "@k", "value": top_k},
                {"name": "@embedding", "value": embedding},
            ],
        }))?;

        let mut hits = Vec::new();
        for range_id in self.partition_key_ranges().await? {
            let rows = self.nearest_in_range(&range_id, &body).await?;
            hits.extend(rows.into_iter().map(VectorRow::into_hit));
        }

        debug!("Cosmos DB returned {} documents across ranges", hits.len());

        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// `documentsCount=<n>` out of an `x-ms-resource-usage` header
fn parse_documents_count(usage: &str) -> Option<usize> {
    usage
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| name.trim() == "documentsCount")
        .and_then(|(_, value)| value.trim().parse().ok())
}

#[derive(Debug, Deserialize)]
struct PartitionKeyRanges {
    #[serde(rename = "PartitionKeyRanges", default)]
    ranges: Vec<PartitionKeyRange>,
}

#[derive(Debug, Deserialize)]
struct PartitionKeyRange {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(rename = "Documents", default)]
    documents: Vec<VectorRow>,
}

#[derive(Debug, Deserialize)]
struct VectorRow {
    #[serde(default)]
    id: String,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    content_en: String,
    #[serde(default)]
    content_vi: String,
    #[serde(default)]
    keywords: Vec<String>,
    /// Cosine similarity as computed by VectorDistance
    score: f32,
}

impl VectorRow {
    fn into_hit(self) -> RetrievedEntry {
        RetrievedEntry {
            distance: 1.0 - self.score,
            entry: KnowledgeEntry {
                id: self.id,
                topic: self.topic,
                category: self.category,
                content_en: self.content_en,
                content_vi: self.content_vi,
                keywords: self.keywords,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_ranges(server: &MockServer, ids: &[&str]) {
        let ranges: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| serde_json::json!({"id": id, "minInclusive": "", "maxExclusive": "FF"}))
            .collect();

        Mock::given(method("GET"))
            .and(path("/dbs/mymoney/colls/knowledge_vectors/pkranges"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "_rid": "abc",
                "PartitionKeyRanges": ranges,
                "_count": ids.len(),
            })))
            .mount(server)
            .await;
    }

    /// The gateway's answer to a `TOP`/`ORDER BY` query without a range
    async fn reject_cross_partition(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/dbs/mymoney/colls/knowledge_vectors/docs"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": "BadRequest",
                "message": "The provided cross partition query can not be directly served by the gateway."
            })))
            .with_priority(10)
            .mount(server)
            .await;
    }

    fn range_rows(rows: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "_rid": "abc",
            "Documents": rows,
        }))
    }

    fn collection(endpoint: &str) -> CosmosCollection {
        CosmosCollection::new(CosmosConfig {
            endpoint: format!("{}/", endpoint),
            key: STANDARD.encode(b"test-master-key"),
            database: "mymoney".into(),
            container: "knowledge_vectors".into(),
        })
        .unwrap()
    }

    #[test]
    fn test_rejects_non_base64_key() {
        let result = CosmosCollection::new(CosmosConfig {
            endpoint: "https://acct.documents.azure.com:443/".into(),
            key: "not base64!!".into(),
            database: "db".into(),
            container: "c".into(),
        });
        assert!(matches!(result, Err(RagError::Config(_))));
    }

    #[test]
    fn test_authorization_is_url_encoded_and_deterministic() {
        let cosmos = collection("https://acct.documents.azure.com:443");
        let date = "Tue, 01 Oct 2024 10:00:00 GMT";

        let a = cosmos
            .authorization("GET", "colls", "dbs/mymoney/colls/knowledge_vectors", date)
            .unwrap();
        let b = cosmos
            .authorization("GET", "colls", "dbs/mymoney/colls/knowledge_vectors", date)
            .unwrap();
        let other_verb = cosmos
            .authorization("POST", "colls", "dbs/mymoney/colls/knowledge_vectors", date)
            .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, other_verb);
        assert!(a.starts_with("type%3Dmaster%26ver%3D1.0%26sig%3D"));
    }

    #[test]
    fn test_parse_documents_count() {
        let usage = "documentSize=0;documentsSize=12;documentsCount=42;collectionSize=13";
        assert_eq!(parse_documents_count(usage), Some(42));
        assert_eq!(parse_documents_count("documentSize=0"), None);
    }

    #[tokio::test]
    async fn test_count_reads_resource_usage() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/dbs/mymoney/colls/knowledge_vectors"))
            .and(header_exists("authorization"))
            .and(header("x-ms-version", API_VERSION))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ms-resource-usage", "documentsSize=3;documentsCount=27")
                    .set_body_json(serde_json::json!({"id": "knowledge_vectors"})),
            )
            .mount(&server)
            .await;
        mount_ranges(&server, &["0"]).await;

        assert_eq!(collection(&server.uri()).count_documents().await.unwrap(), 27);
    }

    #[tokio::test]
    async fn test_count_unauthorized_is_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/dbs/mymoney/colls/knowledge_vectors"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad signature"))
            .mount(&server)
            .await;

        let err = collection(&server.uri()).count_documents().await.unwrap_err();
        assert!(matches!(err, RagError::RemoteStore(_)));
    }

    #[tokio::test]
    async fn test_nearest_maps_similarity_to_distance() {
        let server = MockServer::start().await;
        mount_ranges(&server, &["0"]).await;
        reject_cross_partition(&server).await;

        Mock::given(method("POST"))
            .and(path("/dbs/mymoney/colls/knowledge_vectors/docs"))
            .and(header("x-ms-documentdb-isquery", "True"))
            .and(header("content-type", "application/query+json"))
            .and(header("x-ms-documentdb-partitionkeyrangeid", "0"))
            .and(body_partial_json(serde_json::json!({"parameters": [{"name": "@k", "value": 2}]})))
            .respond_with(range_rows(serde_json::json!([
                {"id": "save_001", "topic": "Emergency fund", "category": "saving",
                 "content_en": "Keep 3-6 months", "content_vi": "Giữ 3-6 tháng",
                 "keywords": ["emergency"], "score": 0.92},
                {"id": "budget_001", "topic": "50/30/20", "category": "budgeting",
                 "score": 0.55}
            ])))
            .with_priority(1)
            .mount(&server)
            .await;

        let hits = collection(&server.uri())
            .nearest(&[0.1; 4], 2)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.id, "save_001");
        assert_eq!(hits[0].entry.category, "saving");
        assert!((hits[0].distance - 0.08).abs() < 1e-5);
        assert!(hits[0].distance < hits[1].distance);
        assert!(hits[1].entry.content_en.is_empty());
    }

    #[tokio::test]
    async fn test_nearest_merges_partition_ranges() {
        let server = MockServer::start().await;
        mount_ranges(&server, &["0", "1"]).await;
        reject_cross_partition(&server).await;

        Mock::given(method("POST"))
            .and(path("/dbs/mymoney/colls/knowledge_vectors/docs"))
            .and(header("x-ms-documentdb-partitionkeyrangeid", "0"))
            .respond_with(range_rows(serde_json::json!([
                {"id": "save_001", "category": "saving", "score": 0.81},
                {"id": "save_002", "category": "saving", "score": 0.40}
            ])))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/dbs/mymoney/colls/knowledge_vectors/docs"))
            .and(header("x-ms-documentdb-partitionkeyrangeid", "1"))
            .respond_with(range_rows(serde_json::json!([
                {"id": "debt_001", "category": "debt", "score": 0.95},
                {"id": "debt_002", "category": "debt", "score": 0.60}
            ])))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;

        let hits = collection(&server.uri())
            .nearest(&[0.1; 4], 3)
            .await
            .unwrap();

        let ids: Vec<&str> = hits.iter().map(|h| h.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["debt_001", "save_001", "debt_002"]);
    }

    #[tokio::test]
    async fn test_gone_range_is_refetched() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/dbs/mymoney/colls/knowledge_vectors/pkranges"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "PartitionKeyRanges": [{"id": "0"}]
            })))
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/dbs/mymoney/colls/knowledge_vectors/docs"))
            .and(header("x-ms-documentdb-partitionkeyrangeid", "0"))
            .respond_with(ResponseTemplate::new(410))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/dbs/mymoney/colls/knowledge_vectors/docs"))
            .and(header("x-ms-documentdb-partitionkeyrangeid", "0"))
            .respond_with(range_rows(serde_json::json!([
                {"id": "save_001", "category": "saving", "score": 0.9}
            ])))
            .with_priority(2)
            .mount(&server)
            .await;

        let cosmos = collection(&server.uri());
        let err = cosmos.nearest(&[0.1; 4], 1).await.unwrap_err();
        assert!(matches!(err, RagError::RemoteStore(_)));

        let hits = cosmos.nearest(&[0.1; 4], 1).await.unwrap();
        assert_eq!(hits[0].entry.id, "save_001");
    }

    #[tokio::test]
    async fn test_upsert_sends_partition_key() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/dbs/mymoney/colls/knowledge_vectors/docs"))
            .and(header("x-ms-documentdb-is-upsert", "True"))
            .and(header("x-ms-documentdb-partitionkey", "[\"saving\"]"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let entry = KnowledgeEntry {
            id: "save_001".into(),
            topic: "Emergency fund".into(),
            category: "saving".into(),
            content_en: "Keep 3-6 months".into(),
            content_vi: String::new(),
            keywords: vec!["emergency".into()],
        };
        let document = RemoteDocument::from_entry(&entry, vec![0.0; 4]);
        assert!(document.text_content.starts_with("Topic: Emergency fund"));

        collection(&server.uri()).upsert(&document).await.unwrap();
    }
}
