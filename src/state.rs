//! # Application State Management
//!
//! Shared state handed to every request handler through `web::Data`.
//!
//! ## Contents:
//! - **config**: Immutable after startup, so a plain `Arc` is enough
//! - **transcriber**: The lazily-loading speech adapter (one per process)
//! - **store**: Scratch directory for uploads
//! - **metrics**: Request and transcription counters behind an `RwLock`
//!
//! ## Lock poisoning
//! A panic while a metrics lock is held would poison it. Counters are still
//! meaningful after such a panic, so every accessor recovers the guard with
//! `into_inner()` instead of propagating the poison.

use crate::config::AppConfig;
use crate::storage::TransientStore;
use crate::transcription::Transcriber;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub transcriber: Arc<Transcriber>,
    pub store: TransientStore,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Requests answered with a 4xx or 5xx status
    pub error_count: u64,

    /// Key: endpoint name (e.g., "POST /upload")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    pub transcriptions: TranscriptionMetrics,
}

/// Outcome counters for engine runs.
///
/// Validation failures never reach the engine and are not counted here.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct TranscriptionMetrics {
    pub completed: u64,
    pub no_speech: u64,
    pub failed: u64,
}

/// Performance metrics for one API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// How an engine run ended, from the handler's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptionResult {
    Completed,
    NoSpeech,
    Failed,
}

impl AppState {
    pub fn new(config: AppConfig, transcriber: Arc<Transcriber>) -> Self {
        let store = TransientStore::new(&config.upload.dir);
        Self {
            config: Arc::new(config),
            transcriber,
            store,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one finished request (called by the telemetry middleware).
    ///
    /// The first time an endpoint is seen a zeroed [`EndpointMetric`] is
    /// created for it.
    pub fn record_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn record_transcription(&self, result: TranscriptionResult) {
        let mut metrics = self.metrics_write();
        match result {
            TranscriptionResult::Completed => metrics.transcriptions.completed += 1,
            TranscriptionResult::NoSpeech => metrics.transcriptions.no_speech += 1,
            TranscriptionResult::Failed => metrics.transcriptions.failed += 1,
        }
    }

    /// Copy of the current metrics, so no lock is held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
