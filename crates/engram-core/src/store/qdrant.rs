//! Qdrant vector store adapter.
//!
//! Points carry the serialized [`MemoryUnit`] as payload, flattened at the
//! top level so metadata predicates translate to native payload conditions.
//! Numeric sidecar fields (`*_ts`) mirror the timestamps for range
//! filtering. A fixed-size client pool bounds backend concurrency; every
//! outbound call runs under the configured ceiling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qdrant_client::qdrant::{
    value::Kind, Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder,
    Distance, Filter, GetPointsBuilder, ListValue, PointId, PointStruct, Range,
    ScrollPointsBuilder, SearchPointsBuilder, Struct, UpsertPointsBuilder, Value,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::{EngramError, Result};
use crate::model::{
    MemoryUnit, ProjectStats, ScoredUnit, SearchFilters, SortField, SortOrder,
};
use crate::store::{
    breakdown_for, sort_units, DeleteByFilterReport, MemoryPatch, VectorStore, MAX_DELETE_BATCH,
};

/// Page size for scroll-based operations.
const SCROLL_PAGE: u32 = 256;

/// Upper bound on scroll-backed listing and aggregation scans.
const SCAN_CAP: usize = 100_000;

// ============================================================================
// CLIENT POOL
// ============================================================================

/// Fixed-size pool of Qdrant client handles.
///
/// Acquire is bounded by the configured wait timeout; exceeding it surfaces
/// STORAGE_UNAVAILABLE. The permit returns the slot on drop, including on
/// error paths.
struct ClientPool {
    clients: Vec<Qdrant>,
    slots: Semaphore,
    next: AtomicUsize,
    acquire_timeout: Duration,
    url: String,
}

impl ClientPool {
    fn connect(url: &str, size: usize, acquire_timeout: Duration) -> Result<Self> {
        let mut clients = Vec::with_capacity(size);
        for _ in 0..size {
            let client = Qdrant::from_url(url)
                .skip_compatibility_check()
                .build()
                .map_err(|e| EngramError::Connection {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
            clients.push(client);
        }
        Ok(Self {
            slots: Semaphore::new(size),
            next: AtomicUsize::new(0),
            clients,
            acquire_timeout,
            url: url.to_string(),
        })
    }

    async fn acquire(&self) -> Result<(&Qdrant, SemaphorePermit<'_>)> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.slots.acquire())
            .await
            .map_err(|_| EngramError::StorageUnavailable {
                message: format!(
                    "connection pool exhausted after {:?} wait",
                    self.acquire_timeout
                ),
                url: Some(self.url.clone()),
            })?
            .map_err(|e| EngramError::storage(format!("pool closed: {e}")))?;
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        Ok((&self.clients[index], permit))
    }
}

// ============================================================================
// ADAPTER
// ============================================================================

/// Qdrant-backed implementation of the store trait.
pub struct QdrantStore {
    pool: ClientPool,
    collection: String,
    dimensions: usize,
    call_timeout: Duration,
    /// Points whose payload failed to deserialize; skipped, never surfaced
    /// as silent corruption.
    skipped_payloads: AtomicU64,
}

impl QdrantStore {
    /// Connect and ensure the collection exists with a cosine vector index.
    pub async fn connect(
        url: &str,
        collection: &str,
        dimensions: usize,
        pool_size: usize,
        acquire_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self> {
        let store = Self {
            pool: ClientPool::connect(url, pool_size.max(1), acquire_timeout)?,
            collection: collection.to_string(),
            dimensions,
            call_timeout,
            skipped_payloads: AtomicU64::new(0),
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    pub fn skipped_payload_count(&self) -> u64 {
        self.skipped_payloads.load(Ordering::Relaxed)
    }

    async fn ensure_collection(&self) -> Result<()> {
        let (client, _permit) = self.pool.acquire().await?;
        let exists = self
            .run(client.collection_exists(&self.collection))
            .await
            .map_err(|e| self.map_err("collection_exists", e))?;
        if exists {
            return Ok(());
        }
        tracing::info!("creating qdrant collection: {}", self.collection);
        let create = client.create_collection(
            CreateCollectionBuilder::new(&self.collection).vectors_config(
                VectorParamsBuilder::new(self.dimensions as u64, Distance::Cosine),
            ),
        );
        match self.run(create).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("already exists") => {
                // Lost the creation race to another process.
                tracing::debug!("collection {} already exists", self.collection);
                Ok(())
            }
            Err(e) => Err(self.map_err("create_collection", e)),
        }
    }

    /// Apply the per-call ceiling to an outbound future.
    async fn run<T>(
        &self,
        fut: impl std::future::Future<Output = std::result::Result<T, qdrant_client::QdrantError>>,
    ) -> std::result::Result<T, CallError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CallError::Backend(e.to_string())),
            Err(_) => Err(CallError::Timeout),
        }
    }

    fn map_err(&self, operation: &'static str, err: CallError) -> EngramError {
        match err {
            CallError::Timeout => EngramError::timeout(operation, self.call_timeout.as_secs()),
            CallError::Backend(message) => {
                let lower = message.to_lowercase();
                if lower.contains("connect")
                    || lower.contains("connection refused")
                    || lower.contains("transport")
                    || lower.contains("unavailable")
                {
                    EngramError::StorageUnavailable {
                        message,
                        url: Some(self.pool.url.clone()),
                    }
                } else {
                    EngramError::retrieval(format!("{operation}: {message}"))
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Payload mapping
    // ------------------------------------------------------------------

    fn payload_for(unit: &MemoryUnit) -> Result<HashMap<String, Value>> {
        let json = serde_json::to_value(unit)
            .map_err(|e| EngramError::storage(format!("serialize unit: {e}")))?;
        let serde_json::Value::Object(fields) = json else {
            return Err(EngramError::storage("unit did not serialize to an object"));
        };
        let mut payload: HashMap<String, Value> = fields
            .iter()
            .map(|(k, v)| (k.clone(), json_to_value(v)))
            .collect();
        // Numeric mirrors for range predicates.
        payload.insert(
            "created_at_ts".to_string(),
            (unit.created_at.timestamp()).into(),
        );
        payload.insert(
            "updated_at_ts".to_string(),
            (unit.updated_at.timestamp()).into(),
        );
        payload.insert(
            "last_accessed_ts".to_string(),
            (unit.last_accessed.timestamp()).into(),
        );
        Ok(payload)
    }

    fn unit_from_payload(&self, payload: &HashMap<String, Value>) -> Option<MemoryUnit> {
        let mut fields = serde_json::Map::new();
        for (key, value) in payload {
            if key.ends_with("_ts") {
                continue;
            }
            fields.insert(key.clone(), value_to_json(value));
        }
        match serde_json::from_value::<MemoryUnit>(serde_json::Value::Object(fields)) {
            Ok(mut unit) => {
                unit.refresh_lifecycle(Utc::now());
                Some(unit)
            }
            Err(e) => {
                self.skipped_payloads.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("skipping point with invalid payload: {e}");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Scroll helpers
    // ------------------------------------------------------------------

    /// Collect every unit matching `filter`, up to `cap`.
    async fn scroll_units(&self, filter: Option<Filter>, cap: usize) -> Result<Vec<MemoryUnit>> {
        let (client, _permit) = self.pool.acquire().await?;
        let mut units = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let mut builder = ScrollPointsBuilder::new(&self.collection)
                .limit(SCROLL_PAGE)
                .with_payload(true)
                .with_vectors(false);
            if let Some(ref f) = filter {
                builder = builder.filter(f.clone());
            }
            if let Some(ref off) = offset {
                builder = builder.offset(off.clone());
            }
            let response = self
                .run(client.scroll(builder))
                .await
                .map_err(|e| self.map_err("scroll", e))?;
            if response.result.is_empty() {
                break;
            }
            offset = response.result.last().and_then(|p| p.id.clone());
            let page_len = response.result.len();
            for point in response.result {
                let payload = point.payload;
                if let Some(unit) = self.unit_from_payload(&payload) {
                    units.push(unit);
                }
                if units.len() >= cap {
                    return Ok(units);
                }
            }
            if page_len < SCROLL_PAGE as usize {
                break;
            }
        }
        Ok(units)
    }

    async fn upsert_unit(&self, unit: &MemoryUnit, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(EngramError::validation(
                "embedding",
                format!(
                    "vector has {} dimensions, collection expects {}",
                    vector.len(),
                    self.dimensions
                ),
            ));
        }
        let payload = Self::payload_for(unit)?;
        let point = PointStruct::new(unit.id.clone(), vector, payload);
        let (client, _permit) = self.pool.acquire().await?;
        // wait(true) gives read-your-writes for immediate retrieval.
        self.run(
            client.upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true)),
        )
        .await
        .map_err(|e| self.map_err("upsert", e))?;
        Ok(())
    }
}

// ============================================================================
// CALL ERROR PLUMBING
// ============================================================================

/// Backend call outcome before taxonomy mapping.
enum CallError {
    Timeout,
    Backend(String),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Timeout => write!(f, "timeout"),
            CallError::Backend(m) => write!(f, "{m}"),
        }
    }
}

// ============================================================================
// JSON <-> QDRANT VALUE
// ============================================================================

fn json_to_value(v: &serde_json::Value) -> Value {
    let kind = match v {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Kind::IntegerValue(i)
            } else {
                Kind::DoubleValue(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Kind::StringValue(s.clone()),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.iter().map(json_to_value).collect(),
        }),
        serde_json::Value::Object(fields) => Kind::StructValue(Struct {
            fields: fields
                .iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect(),
        }),
    };
    Value { kind: Some(kind) }
}

fn value_to_json(v: &Value) -> serde_json::Value {
    match &v.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(*b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(*i),
        Some(Kind::DoubleValue(d)) => {
            serde_json::Number::from_f64(*d).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        Some(Kind::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.iter().map(value_to_json).collect())
        }
        Some(Kind::StructValue(fields)) => serde_json::Value::Object(
            fields
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
    }
}

// ============================================================================
// FILTER TRANSLATION
// ============================================================================

fn any_of(field: &str, values: impl IntoIterator<Item = String>) -> Condition {
    let should: Vec<Condition> = values
        .into_iter()
        .map(|v| Condition::matches(field, v))
        .collect();
    Condition::from(Filter {
        should,
        ..Default::default()
    })
}

/// Translate the engine's filter contract into a native payload filter.
///
/// Every predicate in the contract has a native translation; a filter that
/// cannot be expressed would surface as a VALIDATION error rather than being
/// silently dropped.
fn build_filter(filters: &SearchFilters) -> Result<Option<Filter>> {
    if filters.is_empty() {
        return Ok(None);
    }
    let mut must: Vec<Condition> = Vec::new();
    let mut must_not: Vec<Condition> = Vec::new();

    if let Some(level) = filters.context_level {
        must.push(Condition::matches("context_level", level.as_str().to_string()));
    }
    if let Some(scope) = filters.scope {
        must.push(Condition::matches("scope", scope.as_str().to_string()));
    }
    if let Some(ref project) = filters.project_name {
        must.push(Condition::matches("project_name", project.clone()));
    }
    if let Some(category) = filters.category {
        must.push(Condition::matches("category", category.as_str().to_string()));
    }
    if filters.min_importance > 0.0 || filters.max_importance < 1.0 {
        must.push(Condition::range(
            "importance",
            Range {
                gte: Some(filters.min_importance),
                lte: Some(filters.max_importance),
                ..Default::default()
            },
        ));
    }
    if !filters.tags.is_empty() {
        must.push(any_of("tags", filters.tags.iter().cloned()));
    }
    push_ts_range(
        &mut must,
        "created_at_ts",
        filters.created_after,
        filters.created_before,
    );

    if let Some(ref advanced) = filters.advanced {
        push_ts_range(
            &mut must,
            "created_at_ts",
            advanced.created_after,
            advanced.created_before,
        );
        push_ts_range(
            &mut must,
            "updated_at_ts",
            advanced.updated_after,
            advanced.updated_before,
        );
        push_ts_range(
            &mut must,
            "last_accessed_ts",
            advanced.accessed_after,
            advanced.accessed_before,
        );
        if let Some(ref any) = advanced.tags_any {
            if !any.is_empty() {
                must.push(any_of("tags", any.iter().cloned()));
            }
        }
        if let Some(ref all) = advanced.tags_all {
            for tag in all {
                must.push(Condition::matches("tags", tag.clone()));
            }
        }
        if let Some(ref none) = advanced.tags_none {
            for tag in none {
                must_not.push(Condition::matches("tags", tag.clone()));
            }
        }
        if let Some(ref states) = advanced.lifecycle_states {
            if !states.is_empty() {
                must.push(any_of(
                    "lifecycle_state",
                    states.iter().map(|s| s.as_str().to_string()),
                ));
            }
        }
        if let Some(ref excluded) = advanced.exclude_categories {
            for category in excluded {
                must_not.push(Condition::matches("category", category.as_str().to_string()));
            }
        }
        if let Some(ref excluded) = advanced.exclude_projects {
            for project in excluded {
                must_not.push(Condition::matches("project_name", project.clone()));
            }
        }
        if let Some(min_trust) = advanced.min_trust_score {
            must.push(Condition::range(
                "provenance.confidence",
                Range {
                    gte: Some(min_trust),
                    ..Default::default()
                },
            ));
        }
        if let Some(source) = advanced.source {
            must.push(Condition::matches(
                "provenance.source",
                source.as_str().to_string(),
            ));
        }
    }

    Ok(Some(Filter {
        must,
        must_not,
        ..Default::default()
    }))
}

fn push_ts_range(
    must: &mut Vec<Condition>,
    field: &str,
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
) {
    if after.is_none() && before.is_none() {
        return;
    }
    must.push(Condition::range(
        field,
        Range {
            gte: after.map(|t| t.timestamp() as f64),
            lte: before.map(|t| t.timestamp() as f64),
            ..Default::default()
        },
    ));
}

// ============================================================================
// STORE TRAIT IMPL
// ============================================================================

#[async_trait]
impl VectorStore for QdrantStore {
    async fn store(&self, unit: &MemoryUnit, vector: Vec<f32>) -> Result<String> {
        self.upsert_unit(unit, vector).await?;
        tracing::debug!("stored point {} in {}", unit.id, self.collection);
        Ok(unit.id.clone())
    }

    async fn batch_store(&self, items: Vec<(MemoryUnit, Vec<f32>)>) -> Result<Vec<String>> {
        let mut points = Vec::with_capacity(items.len());
        let mut ids = Vec::with_capacity(items.len());
        for (unit, vector) in &items {
            points.push(PointStruct::new(
                unit.id.clone(),
                vector.clone(),
                Self::payload_for(unit)?,
            ));
            ids.push(unit.id.clone());
        }
        let (client, _permit) = self.pool.acquire().await?;
        self.run(
            client.upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true)),
        )
        .await
        .map_err(|e| self.map_err("batch_upsert", e))?;
        Ok(ids)
    }

    async fn retrieve(
        &self,
        query_vector: &[f32],
        filters: Option<&SearchFilters>,
        limit: usize,
    ) -> Result<Vec<ScoredUnit>> {
        let filter = match filters {
            Some(f) => build_filter(f)?,
            None => None,
        };
        let mut builder =
            SearchPointsBuilder::new(&self.collection, query_vector.to_vec(), limit as u64)
                .with_payload(true);
        if let Some(f) = filter {
            builder = builder.filter(f);
        }
        let (client, _permit) = self.pool.acquire().await?;
        let response = self
            .run(client.search_points(builder))
            .await
            .map_err(|e| self.map_err("search", e))?;

        let mut results = Vec::with_capacity(response.result.len());
        for point in response.result {
            // Cosine similarity lands in [-1, 1]; map into the contract
            // range [0, 1].
            let score = ((point.score + 1.0) / 2.0).clamp(0.0, 1.0);
            if let Some(unit) = self.unit_from_payload(&point.payload) {
                results.push(ScoredUnit { unit, score });
            }
        }
        Ok(results)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<MemoryUnit>> {
        let (client, _permit) = self.pool.acquire().await?;
        let response = self
            .run(client.get_points(
                GetPointsBuilder::new(&self.collection, vec![id.to_string().into()])
                    .with_payload(true),
            ))
            .await
            .map_err(|e| self.map_err("get_points", e))?;
        Ok(response
            .result
            .first()
            .and_then(|point| self.unit_from_payload(&point.payload)))
    }

    async fn update(
        &self,
        id: &str,
        patch: MemoryPatch,
        new_vector: Option<Vec<f32>>,
    ) -> Result<bool> {
        // Read-modify-upsert: the upsert replaces the whole point, so
        // readers see either the old or the new record.
        let (existing, old_vector) = {
            let (client, _permit) = self.pool.acquire().await?;
            let response = self
                .run(client.get_points(
                    GetPointsBuilder::new(&self.collection, vec![id.to_string().into()])
                        .with_payload(true)
                        .with_vectors(true),
                ))
                .await
                .map_err(|e| self.map_err("get_points", e))?;
            let Some(point) = response.result.into_iter().next() else {
                return Ok(false);
            };
            let vector = point.vectors.clone().and_then(extract_vector);
            (self.unit_from_payload(&point.payload), vector)
        };
        let Some(mut unit) = existing else {
            // A corrupt payload is already warned about; treat as missing.
            return Ok(false);
        };
        patch.apply(&mut unit, Utc::now());
        unit.validate()?;
        let vector = match new_vector.or(old_vector) {
            Some(v) => v,
            None => {
                return Err(EngramError::storage(format!(
                    "point {id} has no stored vector"
                )))
            }
        };
        self.upsert_unit(&unit, vector).await?;
        Ok(true)
    }

    async fn touch(&self, ids: &[String], at: DateTime<Utc>) -> Result<()> {
        for id in ids {
            let patch = MemoryPatch {
                last_accessed: Some(at),
                ..Default::default()
            };
            if let Err(e) = self.update(id, patch, None).await {
                tracing::warn!("failed to touch {id}: {e}");
            }
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        if self.get_by_id(id).await?.is_none() {
            return Ok(false);
        }
        let (client, _permit) = self.pool.acquire().await?;
        self.run(
            client.delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(vec![PointId::from(id.to_string())])
                    .wait(true),
            ),
        )
        .await
        .map_err(|e| self.map_err("delete", e))?;
        Ok(true)
    }

    async fn delete_by_filter(
        &self,
        filters: &SearchFilters,
        max_count: usize,
    ) -> Result<DeleteByFilterReport> {
        let cap = max_count.min(MAX_DELETE_BATCH);
        let filter = build_filter(filters)?;

        let total_matches = self.count(Some(filters)).await?;
        let mut victims = self.scroll_units(filter, cap).await?;
        sort_units(&mut victims, SortField::CreatedAt, SortOrder::Asc);
        victims.truncate(cap);

        if !victims.is_empty() {
            let ids: Vec<PointId> = victims
                .iter()
                .map(|u| PointId::from(u.id.clone()))
                .collect();
            let (client, _permit) = self.pool.acquire().await?;
            self.run(
                client.delete_points(
                    DeletePointsBuilder::new(&self.collection)
                        .points(ids)
                        .wait(true),
                ),
            )
            .await
            .map_err(|e| self.map_err("delete_by_filter", e))?;
        }

        Ok(DeleteByFilterReport {
            deleted_count: victims.len(),
            total_matches,
            breakdown: breakdown_for(&victims),
        })
    }

    async fn list(
        &self,
        filters: &SearchFilters,
        sort_by: SortField,
        sort_order: SortOrder,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<MemoryUnit>, usize)> {
        let filter = build_filter(filters)?;
        let mut units = self.scroll_units(filter, SCAN_CAP).await?;
        let total = units.len();
        sort_units(&mut units, sort_by, sort_order);
        let page = units.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    async fn count(&self, filters: Option<&SearchFilters>) -> Result<usize> {
        let mut builder = CountPointsBuilder::new(&self.collection).exact(true);
        if let Some(filters) = filters {
            if let Some(filter) = build_filter(filters)? {
                builder = builder.filter(filter);
            }
        }
        let (client, _permit) = self.pool.acquire().await?;
        let response = self
            .run(client.count(builder))
            .await
            .map_err(|e| self.map_err("count", e))?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn all_projects(&self) -> Result<Vec<String>> {
        let units = self.scroll_units(None, SCAN_CAP).await?;
        let mut projects: Vec<String> = units
            .into_iter()
            .filter_map(|unit| unit.project_name)
            .collect();
        projects.sort();
        projects.dedup();
        Ok(projects)
    }

    async fn project_stats(&self, project: &str) -> Result<ProjectStats> {
        let filters = SearchFilters::for_project(project);
        let units = self.scroll_units(build_filter(&filters)?, SCAN_CAP).await?;
        if units.is_empty() {
            return Err(EngramError::not_found(project));
        }
        let mut stats = ProjectStats {
            project_name: project.to_string(),
            memory_count: units.len(),
            ..Default::default()
        };
        let mut importance_sum = 0.0;
        for unit in &units {
            *stats
                .categories
                .entry(unit.category.as_str().to_string())
                .or_default() += 1;
            *stats
                .lifecycle_states
                .entry(unit.lifecycle_state.as_str().to_string())
                .or_default() += 1;
            importance_sum += unit.importance;
        }
        stats.avg_importance = importance_sum / units.len() as f64;
        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool> {
        let (client, _permit) = match self.pool.acquire().await {
            Ok(pair) => pair,
            Err(_) => return Ok(false),
        };
        match self.run(client.collection_exists(&self.collection)).await {
            Ok(exists) => Ok(exists),
            Err(e) => {
                tracing::warn!("qdrant health check failed: {e}");
                Ok(false)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        // Clients hold no server-side state; draining is waiting for
        // permits, which callers do by stopping new operations.
        Ok(())
    }
}

/// Pull the dense vector out of the qdrant output wrapper.
fn extract_vector(vectors: qdrant_client::qdrant::VectorsOutput) -> Option<Vec<f32>> {
    match vectors.vectors_options {
        Some(qdrant_client::qdrant::vectors_output::VectorsOptions::Vector(v)) => {
            match v.into_vector() {
                qdrant_client::qdrant::vector_output::Vector::Dense(dense) => Some(dense.data),
                _ => None,
            }
        }
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContextLevel, MemoryCategory, MemoryScope};

    fn unit() -> MemoryUnit {
        MemoryUnit::create(
            "qdrant payload mapping",
            MemoryCategory::Fact,
            ContextLevel::ProjectContext,
            MemoryScope::Project,
            Some("engram".to_string()),
            0.7,
            "test-model",
            &["alpha".to_string(), "beta".to_string()],
            serde_json::Map::from_iter([(
                "file_path".to_string(),
                serde_json::Value::String("src/lib.rs".to_string()),
            )]),
        )
        .unwrap()
    }

    #[test]
    fn test_payload_round_trip() {
        let original = unit();
        let payload = QdrantStore::payload_for(&original).unwrap();
        assert!(payload.contains_key("created_at_ts"));
        assert!(payload.contains_key("content"));

        // Reverse through the same path the adapter uses on reads.
        let mut fields = serde_json::Map::new();
        for (k, v) in &payload {
            if !k.ends_with("_ts") {
                fields.insert(k.clone(), value_to_json(v));
            }
        }
        let back: MemoryUnit =
            serde_json::from_value(serde_json::Value::Object(fields)).unwrap();
        assert_eq!(back.id, original.id);
        assert_eq!(back.content, original.content);
        assert_eq!(back.tags, original.tags);
        assert_eq!(back.metadata, original.metadata);
    }

    #[test]
    fn test_json_value_conversion_covers_nesting() {
        let json = serde_json::json!({
            "s": "text",
            "i": 42,
            "f": 0.5,
            "b": true,
            "n": null,
            "list": [1, "two"],
            "nested": {"inner": [true]},
        });
        let value = json_to_value(&json);
        assert_eq!(value_to_json(&value), json);
    }

    #[test]
    fn test_build_filter_empty_is_none() {
        assert!(build_filter(&SearchFilters::default()).unwrap().is_none());
    }

    #[test]
    fn test_build_filter_translates_predicates() {
        let filters = SearchFilters {
            category: Some(MemoryCategory::Code),
            project_name: Some("engram".to_string()),
            min_importance: 0.3,
            tags: vec!["alpha".to_string(), "beta".to_string()],
            ..Default::default()
        };
        let filter = build_filter(&filters).unwrap().unwrap();
        // category + project + importance range + tag disjunction
        assert_eq!(filter.must.len(), 4);
        assert!(filter.must_not.is_empty());
    }

    #[test]
    fn test_build_filter_advanced_exclusions() {
        let filters = SearchFilters {
            advanced: Some(crate::model::AdvancedSearchFilters {
                tags_none: Some(vec!["noise".to_string()]),
                exclude_projects: Some(vec!["scratch".to_string()]),
                min_trust_score: Some(0.5),
                ..Default::default()
            }),
            ..Default::default()
        };
        let filter = build_filter(&filters).unwrap().unwrap();
        assert_eq!(filter.must_not.len(), 2);
        assert_eq!(filter.must.len(), 1);
    }
}
