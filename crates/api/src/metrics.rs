use extract::GraphResult;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,
    cache_hits: AtomicUsize,

    // Timing (in microseconds)
    total_extract_time_us: AtomicU64,
    extractions: AtomicUsize,

    // Counts
    nodes_extracted: AtomicUsize,
    relationships_extracted: AtomicUsize,
    warnings: AtomicUsize,
    statements_generated: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            total_extract_time_us: AtomicU64::new(0),
            extractions: AtomicUsize::new(0),
            nodes_extracted: AtomicUsize::new(0),
            relationships_extracted: AtomicUsize::new(0),
            warnings: AtomicUsize::new(0),
            statements_generated: AtomicUsize::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A backend extraction that produced `graph`. Cache hits are not recorded here.
    pub fn record_extract(&self, duration: Duration, graph: &GraphResult) {
        self.total_extract_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.extractions.fetch_add(1, Ordering::Relaxed);
        self.nodes_extracted.fetch_add(graph.nodes().len(), Ordering::Relaxed);
        self.relationships_extracted
            .fetch_add(graph.relationships().len(), Ordering::Relaxed);
        self.warnings.fetch_add(graph.warnings().len(), Ordering::Relaxed);
    }

    pub fn record_statements(&self, count: usize) {
        self.statements_generated.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let extractions = self.extractions.load(Ordering::Relaxed);
        let total_us = self.total_extract_time_us.load(Ordering::Relaxed) as f64;

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            extractions,
            avg_extract_time_ms: if extractions > 0 {
                total_us / extractions as f64 / 1000.0
            } else {
                0.0
            },
            nodes_extracted: self.nodes_extracted.load(Ordering::Relaxed),
            relationships_extracted: self.relationships_extracted.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
            statements_generated: self.statements_generated.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub cache_hits: usize,
    pub extractions: usize,
    pub avg_extract_time_ms: f64,
    pub nodes_extracted: usize,
    pub relationships_extracted: usize,
    pub warnings: usize,
    pub statements_generated: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
