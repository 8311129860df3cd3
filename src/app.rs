//! Application state and service initialization
//!
//! This module centralizes service construction and dependency injection so
//! the HTTP server and the tests build the same graph.

use std::sync::Arc;

use actix_web::web;

use crate::model::{Config, ConfigError, ProviderConfigError};
use crate::retriever::{SignalFetcher, SignalSource};
use crate::service::{AnalysisService, JsonDirectorySink, ReportSink, ScanAggregator, WorkerPool};

/// Application state containing all services and shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// AI analysis orchestrator
    pub analysis: Arc<AnalysisService>,
    /// Workers serving asynchronous analysis requests
    pub pool: Arc<WorkerPool>,
    /// Scan lifecycle and finding enrichment
    pub aggregator: Arc<ScanAggregator>,
}

impl AppState {
    /// Build the service graph against the public signal feeds
    ///
    /// Spawns the worker pool, so it must run inside a Tokio runtime.
    pub fn new(config: Config) -> Result<Self, AppError> {
        let source: Arc<dyn SignalSource> = Arc::new(SignalFetcher::new(&config.feeds));
        Self::with_source(config, source)
    }

    /// Build the service graph with a custom signal source
    pub fn with_source(config: Config, source: Arc<dyn SignalSource>) -> Result<Self, AppError> {
        config.validate()?;

        let analysis = Arc::new(AnalysisService::from_config(&config)?);
        Ok(Self::assemble(config, analysis, source))
    }

    /// Wire already-built services together
    pub fn assemble(
        config: Config,
        analysis: Arc<AnalysisService>,
        source: Arc<dyn SignalSource>,
    ) -> Self {
        let pool = Arc::new(WorkerPool::start(
            Arc::clone(&analysis),
            config.service.worker_pool_size,
            config.service.queue_depth,
        ));

        let mut aggregator = ScanAggregator::new(&config, source).with_analysis(Arc::clone(&analysis));
        if let Some(dir) = &config.scan.report_dir {
            tracing::info!(dir = %dir, "Scan reports will be written to disk");
            let sink: Arc<dyn ReportSink> = Arc::new(JsonDirectorySink::new(dir));
            aggregator = aggregator.with_sink(sink);
        }

        Self {
            config: Arc::new(config),
            analysis,
            pool,
            aggregator: Arc::new(aggregator),
        }
    }

    /// Register shared services and all API routes on an actix app
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::Data::from(Arc::clone(&self.analysis)))
            .app_data(web::Data::from(Arc::clone(&self.pool)))
            .app_data(web::Data::from(Arc::clone(&self.aggregator)))
            .configure(crate::api::health::configure)
            .configure(crate::api::metrics::configure)
            .configure(crate::api::analysis::configure)
            .configure(crate::api::scans::configure);
    }

    /// Drain the worker pool and stop the analysis service
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        self.analysis.shutdown();
    }
}

/// Application-level errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AppError {
    /// Configuration could not be loaded or is inconsistent
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A configured provider failed validation
    #[error("Invalid provider configuration: {0}")]
    Provider(#[from] ProviderConfigError),
}
