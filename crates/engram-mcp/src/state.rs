//! Shared server state: every service wired over one store and embedder.

use std::sync::Arc;
use std::time::Duration;

use engram_core::{
    AnalyticsService, AlertEngine, CodeService, ConsentRegistry, ConversationTracker,
    CrossProjectService, DuplicateDetector, Embedder, EngramConfig, Exporter, HealthService,
    Importer, MemoryService, MetricsCollector, OperationDriver, UsageTracker, VectorStore,
};

pub struct AppState {
    pub config: Arc<EngramConfig>,
    pub memory: Arc<MemoryService>,
    pub cross: Arc<CrossProjectService>,
    pub health: Arc<HealthService>,
    pub analytics: Arc<AnalyticsService>,
    pub code: Arc<CodeService>,
    pub exporter: Arc<Exporter>,
    pub importer: Arc<Importer>,
    pub detector: Arc<DuplicateDetector>,
    pub embedder: Arc<Embedder>,
    pub metrics: Arc<MetricsCollector>,
    pub driver: OperationDriver,
}

impl AppState {
    /// Wire every service per the configuration toggles.
    pub fn build(
        config: Arc<EngramConfig>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<Embedder>,
        consent: Arc<ConsentRegistry>,
        project_name: Option<String>,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let usage = config
            .analytics
            .usage_tracking
            .then(|| Arc::new(UsageTracker::new(config.analytics.rerank_weights)));
        let tracker = Some(Arc::new(ConversationTracker::new(
            config.memory.recent_query_window,
            config.memory.shown_id_cap,
            Duration::from_secs(config.session_ttl_hours * 3600),
        )));

        let memory = Arc::new(MemoryService::new(
            store.clone(),
            embedder.clone(),
            config.clone(),
            usage.clone(),
            tracker,
            Some(metrics.clone()),
            project_name,
        ));
        let cross = Arc::new(CrossProjectService::new(
            store.clone(),
            embedder.clone(),
            consent,
        ));
        let health = Arc::new(HealthService::new(
            store.clone(),
            metrics.clone(),
            Arc::new(AlertEngine::new()),
        ));
        let analytics = Arc::new(AnalyticsService::new(
            store.clone(),
            metrics.clone(),
            usage,
        ));
        let code = Arc::new(CodeService::new(
            store.clone(),
            embedder.clone(),
            config.clone(),
        ));
        let exporter = Arc::new(Exporter::new(store.clone(), embedder.clone()));
        let importer = Arc::new(Importer::new(store.clone(), embedder.clone(), config.clone()));
        let detector = Arc::new(DuplicateDetector::new(store, embedder.clone()));
        let driver = OperationDriver::new(config.operation_timeout());

        Self {
            config,
            memory,
            cross,
            health,
            analytics,
            code,
            exporter,
            importer,
            detector,
            embedder,
            metrics,
            driver,
        }
    }

    /// Push embedding cache counters into the metrics snapshot.
    pub fn refresh_cache_metrics(&self) {
        self.metrics
            .set_cache_hit_rate(self.embedder.cache_stats().hit_rate());
    }
}
