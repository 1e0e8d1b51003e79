// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use std::path::Path;

/// Injectable producer of a code-map (or similar) annotation prepended to the
/// model history.  Opaque to the runtime: whatever string it returns is
/// inserted as a pseudo-assistant message after the context summary.
#[async_trait]
pub trait ContextAnnotator: Send + Sync {
    async fn annotate(&self, session_id: &str, work_path: Option<&Path>) -> Option<String>;
}

/// Default annotator: contributes nothing.
pub struct NoopAnnotator;

#[async_trait]
impl ContextAnnotator for NoopAnnotator {
    async fn annotate(&self, _session_id: &str, _work_path: Option<&Path>) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_annotator_returns_none() {
        assert!(NoopAnnotator.annotate("s1", None).await.is_none());
    }
}
