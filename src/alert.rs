//! Damage level and the bounded alert feed.
//!
//! The damage level is binary: a dangerous classification sets it to
//! `threshold + 1`, anything else sets it to 0. Only the former appends an
//! alert. The feed is newest-first and never longer than `ALERT_FEED_CAPACITY`.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::detect::Classification;

pub const DEFAULT_DAMAGE_THRESHOLD: u32 = 70;
pub const ALERT_FEED_CAPACITY: usize = 5;
pub const DEFAULT_ALERT_MESSAGE: &str = "Threat analysis completed.";

static NEXT_ALERT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub id: u64,
    pub message: String,
    pub severity: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl Alert {
    fn new(message: String, severity: String) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            id: NEXT_ALERT_ID.fetch_add(1, Ordering::Relaxed),
            message,
            severity,
            created_at,
        }
    }
}

/// Newest-first alert list with fixed capacity.
#[derive(Clone, Debug, Default)]
pub struct AlertFeed {
    alerts: VecDeque<Alert>,
}

impl AlertFeed {
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Most recent alert.
    pub fn latest(&self) -> Option<&Alert> {
        self.alerts.front()
    }

    pub fn get(&self, index: usize) -> Option<&Alert> {
        self.alerts.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    pub fn to_vec(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }
}

/// The only writer of the alert feed.
#[derive(Debug, Default)]
pub struct AlertSink {
    feed: AlertFeed,
}

impl AlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend an alert, evicting the oldest beyond capacity.
    pub fn push(&mut self, message: impl Into<String>, severity: impl Into<String>) -> &Alert {
        self.feed
            .alerts
            .push_front(Alert::new(message.into(), severity.into()));
        self.feed.alerts.truncate(ALERT_FEED_CAPACITY);
        &self.feed.alerts[0]
    }

    pub fn feed(&self) -> &AlertFeed {
        &self.feed
    }

    pub fn clear(&mut self) {
        self.feed.alerts.clear();
    }
}

/// Turns classifications into the damage level.
#[derive(Clone, Debug)]
pub struct DamageGate {
    threshold: u32,
    level: u32,
}

impl DamageGate {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            level: 0,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Level above threshold: the "high damage" banner condition.
    pub fn is_alarming(&self) -> bool {
        self.level > self.threshold
    }

    /// Apply one classification. Returns the alert it produced, if any.
    pub fn apply(&mut self, classification: &Classification, sink: &mut AlertSink) -> Option<Alert> {
        self.level = if classification.label.is_dangerous() {
            self.threshold.saturating_add(1)
        } else {
            0
        };
        if !self.is_alarming() {
            return None;
        }
        let message = classification
            .description
            .clone()
            .unwrap_or_else(|| DEFAULT_ALERT_MESSAGE.to_string());
        let alert = sink.push(message, classification.label.as_str()).clone();
        log::warn!(
            "DamageGate: level {} (threshold {}): {}",
            self.level,
            self.threshold,
            alert.message
        );
        Some(alert)
    }

    pub fn reset(&mut self) {
        self.level = 0;
    }
}

impl Default for DamageGate {
    fn default() -> Self {
        Self::new(DEFAULT_DAMAGE_THRESHOLD)
    }
}
