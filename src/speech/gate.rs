//! Mutual exclusion between speech capture and everything that must not be
//! captured (assistant playback, an in-flight turn).
//!
//! The gate is open while nobody holds it. Holders are counted, so playback
//! and a turn can overlap without reopening the gate early.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct SpeechGate {
    holders: Arc<watch::Sender<usize>>,
}

/// Keeps the gate closed until dropped.
#[derive(Debug)]
pub struct GateHold {
    holders: Arc<watch::Sender<usize>>,
}

impl Drop for GateHold {
    fn drop(&mut self) {
        self.holders.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl Default for SpeechGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0usize);
        Self {
            holders: Arc::new(tx),
        }
    }

    pub fn hold(&self) -> GateHold {
        self.holders.send_modify(|n| *n += 1);
        GateHold {
            holders: Arc::clone(&self.holders),
        }
    }

    pub fn is_open(&self) -> bool {
        *self.holders.borrow() == 0
    }

    pub async fn wait_open(&self) {
        let mut rx = self.holders.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub async fn wait_closed(&self) {
        let mut rx = self.holders.subscribe();
        let _ = rx.wait_for(|n| *n > 0).await;
    }
}
