// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::process::{PtyProcess, PtyStatus};

/// Process-wide registry mapping `(session_id, pty_id)` to live processes.
///
/// The registry-level mutex covers only lookup/insert/remove; buffer access
/// goes through each process's own lock.
#[derive(Default)]
pub struct PtyManager {
    sessions: Mutex<HashMap<String, HashMap<String, Arc<PtyProcess>>>>,
}

impl PtyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, proc: Arc<PtyProcess>) -> String {
        let mut sessions = self.sessions.lock().expect("pty registry poisoned");
        let id = proc.id.clone();
        sessions
            .entry(proc.session_id.clone())
            .or_default()
            .insert(id.clone(), proc);
        id
    }

    pub fn get(&self, session_id: &str, pty_id: &str) -> Option<Arc<PtyProcess>> {
        self.sessions
            .lock()
            .expect("pty registry poisoned")
            .get(session_id)
            .and_then(|m| m.get(pty_id))
            .cloned()
    }

    pub fn list(&self, session_id: &str) -> Vec<Arc<PtyProcess>> {
        self.sessions
            .lock()
            .expect("pty registry poisoned")
            .get(session_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Close and deregister one process.  Returns false when unknown.
    pub fn close(&self, session_id: &str, pty_id: &str) -> bool {
        let proc = {
            let mut sessions = self.sessions.lock().expect("pty registry poisoned");
            let Some(map) = sessions.get_mut(session_id) else {
                return false;
            };
            let proc = map.remove(pty_id);
            if map.is_empty() {
                sessions.remove(session_id);
            }
            proc
        };
        match proc {
            Some(p) => {
                p.close();
                true
            }
            None => false,
        }
    }

    /// Close every process of a session.  Returns the number closed.
    pub fn close_session(&self, session_id: &str) -> usize {
        let map = self
            .sessions
            .lock()
            .expect("pty registry poisoned")
            .remove(session_id)
            .unwrap_or_default();
        for proc in map.values() {
            proc.close();
        }
        map.len()
    }

    pub fn close_all(&self) -> usize {
        let sessions = std::mem::take(&mut *self.sessions.lock().expect("pty registry poisoned"));
        let mut count = 0;
        for map in sessions.values() {
            for proc in map.values() {
                proc.close();
                count += 1;
            }
        }
        count
    }

    /// Collect processes whose idle timeout elapsed and close them.
    /// Returns the ids closed; exposed for the sweeper task and tests.
    pub fn sweep_idle(&self) -> Vec<String> {
        let stale: Vec<(String, String)> = {
            let sessions = self.sessions.lock().expect("pty registry poisoned");
            sessions
                .iter()
                .flat_map(|(sid, map)| {
                    map.values()
                        .filter(|p| {
                            p.idle_timeout_ms > 0
                                && p.status() == PtyStatus::Running
                                && p.idle_for_ms() >= p.idle_timeout_ms
                        })
                        .map(|p| (sid.clone(), p.id.clone()))
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        let mut closed = Vec::new();
        for (sid, pid) in stale {
            if self.close(&sid, &pid) {
                info!(session = %sid, pty = %pid, "closed idle pty process");
                closed.push(pid);
            }
        }
        closed
    }

    /// Background sweeper comparing `now - last_output_at` against each
    /// process's idle timeout.
    pub fn spawn_idle_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            debug!(interval_ms = interval.as_millis() as u64, "pty idle sweeper started");
            loop {
                tokio::time::sleep(interval).await;
                manager.sweep_idle();
            }
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
