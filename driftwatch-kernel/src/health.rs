use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::drift::DriftTransition;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub heartbeats_accepted: u32,
    pub heartbeats_rejected: u32,
    pub heartbeats_failed: u32,
    pub drift_detections: u32,
    pub drift_resolutions: u32,
    pub refreshes_triggered: u32,
    pub instances_tracked: u32,
    pub backoff_entries: u32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    accepted: Arc<AtomicU32>,
    rejected: Arc<AtomicU32>,
    failed: Arc<AtomicU32>,
    detections: Arc<AtomicU32>,
    resolutions: Arc<AtomicU32>,
    refreshes: Arc<AtomicU32>,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<parking_lot::Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            accepted: Arc::default(),
            rejected: Arc::default(),
            failed: Arc::default(),
            detections: Arc::default(),
            resolutions: Arc::default(),
            refreshes: Arc::default(),
            mqtt_reconnects: Arc::default(),
            mqtt_status: Arc::new(parking_lot::Mutex::new("disabled".to_string())),
        }
    }

    pub fn record_accepted(&self, transition: DriftTransition, refresh_triggered: bool) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        match transition {
            DriftTransition::Detected => {
                self.detections.fetch_add(1, Ordering::Relaxed);
            }
            DriftTransition::Resolved => {
                self.resolutions.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        if refresh_triggered {
            self.refreshes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_mqtt_connecting(&self) {
        *self.mqtt_status.lock() = "connecting".to_string();
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn get_health(&self, instances_tracked: usize, backoff_entries: usize) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            heartbeats_accepted: self.accepted.load(Ordering::Relaxed),
            heartbeats_rejected: self.rejected.load(Ordering::Relaxed),
            heartbeats_failed: self.failed.load(Ordering::Relaxed),
            drift_detections: self.detections.load(Ordering::Relaxed),
            drift_resolutions: self.resolutions.load(Ordering::Relaxed),
            refreshes_triggered: self.refreshes.load(Ordering::Relaxed),
            instances_tracked: instances_tracked as u32,
            backoff_entries: backoff_entries as u32,
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }
}
