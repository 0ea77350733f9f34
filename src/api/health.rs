//! Shared liveness markers for the /health endpoint.
//! Updated by the sampler and notifier.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::types::now_ms;

pub struct HealthState {
    pub started_at_ms: i64,
    /// Epoch ms of the last persisted sample (0 = none this process).
    pub last_sample_at_ms: AtomicI64,
    /// Epoch ms of the last confirmed delivery (0 = none this process).
    pub last_delivery_at_ms: AtomicI64,
    pub samples_written: AtomicU64,
    pub messages_delivered: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            started_at_ms: now_ms(),
            last_sample_at_ms: AtomicI64::new(0),
            last_delivery_at_ms: AtomicI64::new(0),
            samples_written: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
        }
    }

    pub fn record_sample(&self, at_ms: i64) {
        self.last_sample_at_ms.store(at_ms, Ordering::Relaxed);
        self.samples_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, at_ms: i64) {
        self.last_delivery_at_ms.store(at_ms, Ordering::Relaxed);
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_sample_at_ms(&self) -> Option<i64> {
        Some(self.last_sample_at_ms.load(Ordering::Relaxed)).filter(|t| *t > 0)
    }

    pub fn last_delivery_at_ms(&self) -> Option<i64> {
        Some(self.last_delivery_at_ms.load(Ordering::Relaxed)).filter(|t| *t > 0)
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written.load(Ordering::Relaxed)
    }

    pub fn messages_delivered(&self) -> u64 {
        self.messages_delivered.load(Ordering::Relaxed)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
