use crate::traits::VectorIndex;
use crate::{ChunkPayload, CollectionStats, IndexRecord, SearchError, SearchFilters, VectorHit};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

/// Collection layout applied by [`QdrantStore::initialize_collection`].
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSettings {
    pub hnsw_m: u32,
    pub hnsw_ef_construct: u32,
    pub full_scan_threshold: u32,
    pub quantile: f32,
    pub always_ram: bool,
    pub memmap_threshold: u32,
    pub indexing_threshold: u32,
    pub flush_interval_sec: u32,
    pub upsert_batch_size: usize,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            hnsw_m: 32,
            hnsw_ef_construct: 200,
            full_scan_threshold: 10_000,
            quantile: 0.99,
            always_ram: true,
            memmap_threshold: 50_000,
            indexing_threshold: 10_000,
            flush_interval_sec: 5,
            upsert_batch_size: 100,
        }
    }
}

/// Payload fields indexed for filtering, with their Qdrant schema.
pub const PAYLOAD_INDEXES: [(&str, &str); 3] =
    [("page", "integer"), ("type", "keyword"), ("has_image", "bool")];

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    settings: CollectionSettings,
}

impl QdrantStore {
    pub fn new(endpoint: &str, collection: impl Into<String>) -> Result<Self, SearchError> {
        let parsed = Url::parse(endpoint)?;
        Ok(Self {
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            settings: CollectionSettings::default(),
        })
    }

    pub fn with_settings(mut self, settings: CollectionSettings) -> Self {
        self.settings = settings;
        self
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    async fn create_payload_indexes(&self) {
        for (field_name, field_schema) in PAYLOAD_INDEXES {
            let result = self
                .client
                .put(format!("{}/index?wait=true", self.collection_url()))
                .json(&json!({ "field_name": field_name, "field_schema": field_schema }))
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    info!(field = field_name, schema = field_schema, "payload index created");
                }
                Ok(response) => {
                    warn!(field = field_name, status = %response.status(), "payload index not created (non-critical)");
                }
                Err(error) => {
                    warn!(field = field_name, %error, "payload index not created (non-critical)");
                }
            }
        }
    }
}

pub fn collection_body(vector_size: usize, settings: &CollectionSettings) -> Value {
    json!({
        "vectors": {
            "size": vector_size,
            "distance": "Cosine",
            "hnsw_config": {
                "m": settings.hnsw_m,
                "ef_construct": settings.hnsw_ef_construct,
                "full_scan_threshold": settings.full_scan_threshold,
            },
            "quantization_config": {
                "scalar": {
                    "type": "int8",
                    "quantile": settings.quantile,
                    "always_ram": settings.always_ram,
                }
            }
        },
        "optimizers_config": {
            "memmap_threshold": settings.memmap_threshold,
            "indexing_threshold": settings.indexing_threshold,
            "flush_interval_sec": settings.flush_interval_sec,
        }
    })
}

/// Builds a `must` filter from the equality conditions that are set.
pub fn filter_body(filters: &SearchFilters) -> Option<Value> {
    let mut must = Vec::new();
    if let Some(kind) = &filters.kind {
        must.push(json!({ "key": "type", "match": { "value": kind } }));
    }
    if let Some(has_image) = filters.has_image {
        must.push(json!({ "key": "has_image", "match": { "value": has_image } }));
    }
    if let Some(page) = filters.page {
        must.push(json!({ "key": "page", "match": { "value": page } }));
    }

    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}

pub fn search_body(
    query_vector: &[f32],
    filters: &SearchFilters,
    limit: usize,
    score_threshold: f64,
) -> Value {
    let mut body = json!({
        "vector": query_vector,
        "limit": limit,
        "with_payload": true,
        "score_threshold": score_threshold,
    });
    if let Some(filter) = filter_body(filters) {
        body["filter"] = filter;
    }
    body
}

fn point_id(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => String::new(),
    }
}

pub fn parse_search_hits(parsed: &Value) -> Vec<VectorHit> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    hits.into_iter()
        .map(|hit| {
            let id = point_id(hit.get("id"));
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            let payload = match hit.get("payload").cloned() {
                Some(raw) => serde_json::from_value::<ChunkPayload>(raw).unwrap_or_else(|error| {
                    warn!(point = %id, %error, "payload is not an object, using empty payload");
                    ChunkPayload::default()
                }),
                None => ChunkPayload::default(),
            };
            VectorHit { id, score, payload }
        })
        .collect()
}

pub fn parse_statistics(parsed: &Value) -> CollectionStats {
    let text = |pointer: &str| {
        parsed
            .pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let count = |pointer: &str| parsed.pointer(pointer).and_then(Value::as_u64);

    let optimizer_status = match parsed.pointer("/result/optimizer_status") {
        Some(Value::String(status)) => status.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };

    CollectionStats {
        status: text("/result/status"),
        optimizer_status,
        vectors_count: count("/result/vectors_count"),
        indexed_vectors_count: count("/result/indexed_vectors_count"),
        points_count: count("/result/points_count"),
        segments_count: count("/result/segments_count"),
        vector_size: count("/result/config/params/vectors/size"),
        distance: parsed
            .pointer("/result/config/params/vectors/distance")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn ensure_success(response: &Response) -> Result<(), SearchError> {
    if !response.status().is_success() {
        return Err(SearchError::BackendResponse {
            backend: "qdrant".to_string(),
            details: response.status().to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn initialize_collection(&self, vector_size: usize) -> Result<(), SearchError> {
        let deleted = self.client.delete(self.collection_url()).send().await?;
        if deleted.status().is_success() {
            info!(collection = %self.collection, "previous collection deleted");
        } else if deleted.status() != StatusCode::NOT_FOUND {
            warn!(collection = %self.collection, status = %deleted.status(), "collection delete was not acknowledged");
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&collection_body(vector_size, &self.settings))
            .send()
            .await?;
        ensure_success(&response)?;

        info!(
            collection = %self.collection,
            vector_size,
            hnsw_m = self.settings.hnsw_m,
            "collection created with int8 scalar quantization"
        );

        self.create_payload_indexes().await;
        Ok(())
    }

    async fn upsert_records(&self, records: &[IndexRecord]) -> Result<Vec<String>, SearchError> {
        let mut all_ids = Vec::with_capacity(records.len());
        let batch_size = self.settings.upsert_batch_size.max(1);

        for (batch_number, batch) in records.chunks(batch_size).enumerate() {
            let mut batch_ids = Vec::with_capacity(batch.len());
            let points = batch
                .iter()
                .map(|record| -> Result<Value, SearchError> {
                    let id = Uuid::new_v4().to_string();
                    batch_ids.push(id.clone());
                    Ok(json!({
                        "id": id,
                        "vector": record.vector,
                        "payload": serde_json::to_value(&record.payload)?,
                    }))
                })
                .collect::<Result<Vec<_>, SearchError>>()?;

            let response = self
                .client
                .put(format!("{}/points?wait=true", self.collection_url()))
                .json(&json!({ "points": points }))
                .send()
                .await?;
            ensure_success(&response)?;

            info!(batch = batch_number + 1, points = batch_ids.len(), "batch upserted");
            all_ids.extend(batch_ids);
        }

        Ok(all_ids)
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        filters: &SearchFilters,
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<VectorHit>, SearchError> {
        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&search_body(query_vector, filters, limit, score_threshold))
            .send()
            .await?;
        ensure_success(&response)?;

        let parsed: Value = response.json().await?;
        Ok(parse_search_hits(&parsed))
    }

    async fn statistics(&self) -> Result<CollectionStats, SearchError> {
        let response = self.client.get(self.collection_url()).send().await?;
        ensure_success(&response)?;
        let parsed: Value = response.json().await?;
        Ok(parse_statistics(&parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Chunk;
    use axum::extract::{Path, State};
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::{delete, put};
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    /// Local stand-in for the Qdrant REST API: the collection is missing,
    /// payload indexes fail and point upserts are recorded.
    #[derive(Default)]
    struct QdrantServer {
        log: Mutex<Vec<String>>,
        batches: Mutex<Vec<Vec<(String, u64)>>>,
    }

    async fn drop_collection(
        State(server): State<Arc<QdrantServer>>,
        Path(name): Path<String>,
    ) -> HttpStatus {
        server.log.lock().unwrap().push(format!("delete {name}"));
        HttpStatus::NOT_FOUND
    }

    async fn create_collection(
        State(server): State<Arc<QdrantServer>>,
        Path(name): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let size = body.pointer("/vectors/size").cloned().unwrap_or(Value::Null);
        server.log.lock().unwrap().push(format!("create {name} size={size}"));
        Json(json!({ "result": true, "status": "ok" }))
    }

    async fn create_index(
        State(server): State<Arc<QdrantServer>>,
        Json(body): Json<Value>,
    ) -> HttpStatus {
        let field = body["field_name"].as_str().unwrap_or_default().to_string();
        server.log.lock().unwrap().push(format!("index {field}"));
        HttpStatus::INTERNAL_SERVER_ERROR
    }

    async fn upsert_points(
        State(server): State<Arc<QdrantServer>>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let points = body["points"].as_array().cloned().unwrap_or_default();
        let batch = points
            .iter()
            .map(|point| {
                let id = point["id"].as_str().unwrap_or_default().to_string();
                let chunk_id = point
                    .pointer("/payload/chunk_id")
                    .and_then(Value::as_u64)
                    .unwrap_or_default();
                (id, chunk_id)
            })
            .collect();
        server.batches.lock().unwrap().push(batch);
        Json(json!({ "result": { "status": "completed" }, "status": "ok" }))
    }

    async fn start(server: Arc<QdrantServer>) -> String {
        let app = Router::new()
            .route("/collections/{name}", delete(drop_collection).put(create_collection))
            .route("/collections/{name}/index", put(create_index))
            .route("/collections/{name}/points", put(upsert_points))
            .with_state(server);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}")
    }

    fn records(count: u64) -> Vec<IndexRecord> {
        (0..count)
            .map(|id| IndexRecord {
                vector: vec![0.1, 0.2],
                payload: ChunkPayload::for_chunk(
                    &Chunk::new(id, format!("chunk {id}")),
                    1,
                    "doc.pdf",
                ),
            })
            .collect()
    }

    #[tokio::test]
    async fn missing_collection_and_failed_indexes_do_not_stop_initialization() {
        let server = Arc::new(QdrantServer::default());
        let store = QdrantStore::new(&start(server.clone()).await, "docs").unwrap();

        store.initialize_collection(768).await.unwrap();

        assert_eq!(
            *server.log.lock().unwrap(),
            vec![
                "delete docs".to_string(),
                "create docs size=768".to_string(),
                "index page".to_string(),
                "index type".to_string(),
                "index has_image".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn upserts_are_split_by_batch_size_and_ids_follow_input_order() {
        let server = Arc::new(QdrantServer::default());
        let store = QdrantStore::new(&start(server.clone()).await, "docs")
            .unwrap()
            .with_settings(CollectionSettings {
                upsert_batch_size: 2,
                ..CollectionSettings::default()
            });

        let ids = store.upsert_records(&records(5)).await.unwrap();

        let batches = server.batches.lock().unwrap();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        let sent: Vec<&(String, u64)> = batches.iter().flatten().collect();
        let sent_ids: Vec<String> = sent.iter().map(|(id, _)| id.clone()).collect();
        let sent_chunks: Vec<u64> = sent.iter().map(|(_, chunk_id)| *chunk_id).collect();
        assert_eq!(ids, sent_ids);
        assert_eq!(sent_chunks, vec![0, 1, 2, 3, 4]);
        assert!(ids.iter().all(|id| Uuid::parse_str(id).is_ok()));
    }

    #[tokio::test]
    async fn unreachable_server_fails_initialization() {
        let store = QdrantStore::new("http://127.0.0.1:1", "docs").unwrap();
        assert!(store.initialize_collection(4).await.is_err());
    }

    #[test]
    fn collection_body_carries_hnsw_and_quantization() {
        let body = collection_body(768, &CollectionSettings::default());
        assert_eq!(body.pointer("/vectors/size"), Some(&json!(768)));
        assert_eq!(body.pointer("/vectors/distance"), Some(&json!("Cosine")));
        assert_eq!(body.pointer("/vectors/hnsw_config/m"), Some(&json!(32)));
        assert_eq!(body.pointer("/vectors/hnsw_config/ef_construct"), Some(&json!(200)));
        assert_eq!(
            body.pointer("/vectors/quantization_config/scalar/type"),
            Some(&json!("int8"))
        );
        assert_eq!(
            body.pointer("/optimizers_config/indexing_threshold"),
            Some(&json!(10_000))
        );
    }

    #[test]
    fn search_body_omits_filter_when_none_set() {
        let body = search_body(&[0.1, 0.2], &SearchFilters::default(), 6, 0.3);
        assert!(body.get("filter").is_none());
        assert_eq!(body["limit"], json!(6));
        assert_eq!(body["score_threshold"], json!(0.3));
        assert_eq!(body["with_payload"], json!(true));
    }

    #[test]
    fn search_body_builds_must_conditions() {
        let filters = SearchFilters {
            kind: Some("text".to_string()),
            has_image: Some(true),
            page: None,
        };
        let body = search_body(&[0.1], &filters, 4, 0.3);
        let must = body.pointer("/filter/must").and_then(Value::as_array).unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0], json!({ "key": "type", "match": { "value": "text" } }));
        assert_eq!(must[1], json!({ "key": "has_image", "match": { "value": true } }));
    }

    #[test]
    fn search_hits_are_parsed_with_tolerant_payloads() {
        let response = json!({
            "result": [
                {
                    "id": "6a1f0c3e-0000-4000-8000-000000000001",
                    "score": 0.91,
                    "payload": { "content": "full text", "text": "full", "page": 3, "chunk_id": 7 }
                },
                { "id": 42, "score": 0.5 },
                { "id": 43, "score": 0.4, "payload": { "content": 12, "page": 5, "chunk_id": 8 } },
                { "id": 44, "score": 0.3, "payload": "not an object" }
            ]
        });

        let hits = parse_search_hits(&response);
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].payload.chunk_id, 7);
        assert_eq!(hits[0].payload.page, 3);
        assert_eq!(hits[1].id, "42");
        assert!(hits[1].payload.content.is_empty());
        assert!(hits[2].payload.content.is_empty());
        assert_eq!(hits[2].payload.page, 5);
        assert_eq!(hits[2].payload.chunk_id, 8);
        assert_eq!(hits[3].payload, ChunkPayload::default());
    }

    #[test]
    fn statistics_are_read_from_collection_info() {
        let response = json!({
            "result": {
                "status": "green",
                "optimizer_status": "ok",
                "vectors_count": 40,
                "indexed_vectors_count": 0,
                "points_count": 40,
                "segments_count": 2,
                "config": { "params": { "vectors": { "size": 768, "distance": "Cosine" } } }
            }
        });

        let stats = parse_statistics(&response);
        assert_eq!(stats.status, "green");
        assert_eq!(stats.optimizer_status, "ok");
        assert_eq!(stats.points_count, Some(40));
        assert_eq!(stats.vector_size, Some(768));
        assert_eq!(stats.distance.as_deref(), Some("Cosine"));
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        assert!(matches!(
            QdrantStore::new("not a url", "docs"),
            Err(SearchError::Url(_))
        ));
    }
}
