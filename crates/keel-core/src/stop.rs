// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// Edge-triggered cancellation flag for one in-flight turn.
///
/// `set` is sticky: once set the signal stays set, and both the flag check
/// and the async wait observe it.
#[derive(Default)]
pub struct StopSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once the signal is set.  Returns immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            // Register interest before re-checking the flag so a `set` racing
            // with this call cannot be missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Process-wide registry of stop signals keyed by assistant message id.
#[derive(Default)]
pub struct StopRegistry {
    signals: Mutex<HashMap<i64, Arc<StopSignal>>>,
}

impl StopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, key: i64) -> Arc<StopSignal> {
        let signal = Arc::new(StopSignal::new());
        self.signals
            .lock()
            .expect("stop registry poisoned")
            .insert(key, signal.clone());
        signal
    }

    pub fn get(&self, key: i64) -> Option<Arc<StopSignal>> {
        self.signals
            .lock()
            .expect("stop registry poisoned")
            .get(&key)
            .cloned()
    }

    /// Fire the signal for `key`.  Returns false when no turn is registered
    /// under that id.
    pub fn stop(&self, key: i64) -> bool {
        match self.get(key) {
            Some(signal) => {
                signal.set();
                true
            }
            None => false,
        }
    }

    pub fn clear(&self, key: i64) {
        self.signals
            .lock()
            .expect("stop registry poisoned")
            .remove(&key);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
