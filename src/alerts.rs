//! In-memory alert sink
//!
//! Fire-and-forget notifications consumed by the dashboard surface. Keeps
//! the most recent 100 alerts; nothing acknowledges back to the core.

use chrono::Utc;
use std::sync::Mutex;
use tracing::info;

use crate::types::{Alert, Severity};

const MAX_ALERTS: usize = 100;

#[derive(Default)]
pub struct AlertManager {
    inner: Mutex<AlertLog>,
}

#[derive(Default)]
struct AlertLog {
    alerts: Vec<Alert>,
    next_id: u64,
}

impl AlertManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one alert, evicting the oldest past the cap
    pub fn raise(&self, category: &str, title: &str, message: &str, severity: Severity) {
        info!(category, severity = %severity, "{}: {}", title, message);
        let mut log = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        log.next_id += 1;
        let id = log.next_id;
        log.alerts.push(Alert {
            id,
            category: category.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            severity,
            timestamp: Utc::now(),
            read: false,
        });
        if log.alerts.len() > MAX_ALERTS {
            log.alerts.remove(0);
        }
    }

    /// Most recent alerts first
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        let log = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        log.alerts.iter().rev().take(limit).cloned().collect()
    }

    pub fn mark_read(&self, alert_id: u64) {
        let mut log = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(alert) = log.alerts.iter_mut().find(|a| a.id == alert_id) {
            alert.read = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_log_is_bounded() {
        let mgr = AlertManager::new();
        for i in 0..150 {
            mgr.raise("test", "t", &format!("m{i}"), Severity::Info);
        }
        let all = mgr.recent(usize::MAX);
        assert_eq!(all.len(), 100);
        // Newest first, oldest 50 evicted
        assert_eq!(all[0].id, 150);
        assert_eq!(all.last().unwrap().id, 51);
    }

    #[test]
    fn test_mark_read() {
        let mgr = AlertManager::new();
        mgr.raise("trade", "opened", "CE at 100", Severity::Success);
        let id = mgr.recent(1)[0].id;
        mgr.mark_read(id);
        assert!(mgr.recent(1)[0].read);
    }
}
