//! Desktop notifications via notify-rust (D-Bus).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use notify_rust::Notification;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Notifier {
    enabled: bool,
    shown: Arc<Mutex<HashSet<String>>>,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            shown: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn notify(&self, summary: &str, body: &str) {
        if !self.enabled {
            return;
        }

        debug!("Notification: {summary}");

        if let Err(e) = Notification::new()
            .summary(summary)
            .body(body)
            .icon("audio-input-microphone")
            .timeout(5000)
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }

    /// Log and notify the first time `key` is reported. Returns whether it
    /// was new.
    pub fn notify_once(&self, key: &str, summary: &str, body: &str) -> bool {
        if !self.shown.lock().unwrap().insert(key.to_string()) {
            return false;
        }
        warn!("{summary}: {body}");
        self.notify(summary, body);
        true
    }
}
