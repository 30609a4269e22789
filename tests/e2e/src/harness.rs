//! Wired engine harness over the in-process store.

use std::sync::Arc;
use std::time::Duration;

use engram_core::{
    AlertEngine, AnalyticsService, ConsentRegistry, ConversationTracker, CrossProjectService,
    Embedder, EmbeddingCache, EngramConfig, HealthService, MemoryCategory, MemoryScope,
    MemoryService, MemoryStore, MetricsCollector, QueryRequest, StoreMemoryRequest,
    UsageTracker,
};

use crate::mocks::BagOfStemsBackend;

/// Everything a journey test needs, wired like the server does it.
pub struct Engine {
    pub config: Arc<EngramConfig>,
    pub store: Arc<MemoryStore>,
    pub backend: Arc<BagOfStemsBackend>,
    pub embedder: Arc<Embedder>,
    pub service: MemoryService,
    pub cross: CrossProjectService,
    pub health: HealthService,
    pub analytics: AnalyticsService,
}

/// Build a fully wired engine over the in-process store.
pub fn engine(read_only: bool) -> Engine {
    let config = Arc::new(EngramConfig {
        read_only_mode: read_only,
        ..Default::default()
    });
    let store = Arc::new(MemoryStore::new());
    let backend = Arc::new(BagOfStemsBackend::new());
    let cache = Arc::new(EmbeddingCache::in_memory(Duration::from_secs(3600)).unwrap());
    let embedder = Arc::new(Embedder::new(backend.clone(), Some(cache)));
    let metrics = Arc::new(MetricsCollector::new());
    let usage = Arc::new(UsageTracker::new(config.analytics.rerank_weights));
    let tracker = Arc::new(ConversationTracker::new(
        config.memory.recent_query_window,
        config.memory.shown_id_cap,
        Duration::from_secs(config.session_ttl_hours * 3600),
    ));

    let service = MemoryService::new(
        store.clone(),
        embedder.clone(),
        config.clone(),
        Some(usage.clone()),
        Some(tracker),
        Some(metrics.clone()),
        None,
    );
    let cross = CrossProjectService::new(
        store.clone(),
        embedder.clone(),
        Arc::new(ConsentRegistry::ephemeral()),
    );
    let health = HealthService::new(store.clone(), metrics.clone(), Arc::new(AlertEngine::new()));
    let analytics = AnalyticsService::new(store.clone(), metrics, Some(usage));

    Engine {
        config,
        store,
        backend,
        embedder,
        service,
        cross,
        health,
        analytics,
    }
}

/// A minimal store request.
pub fn store_request(content: &str, category: MemoryCategory) -> StoreMemoryRequest {
    StoreMemoryRequest {
        content: content.to_string(),
        category,
        scope: MemoryScope::Global,
        project_name: None,
        importance: 0.5,
        tags: Vec::new(),
        metadata: serde_json::Map::new(),
        context_level: None,
    }
}

/// A project-scoped store request.
pub fn project_request(
    content: &str,
    category: MemoryCategory,
    project: &str,
) -> StoreMemoryRequest {
    StoreMemoryRequest {
        scope: MemoryScope::Project,
        project_name: Some(project.to_string()),
        ..store_request(content, category)
    }
}

/// A plain query with a limit.
pub fn query(text: &str, limit: usize) -> QueryRequest {
    QueryRequest {
        query: text.to_string(),
        limit,
        context_level: None,
        scope: None,
        project_name: None,
        category: None,
        min_importance: 0.0,
        tags: Vec::new(),
        advanced_filters: None,
    }
}
