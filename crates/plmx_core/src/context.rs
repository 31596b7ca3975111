//! Per-run mutable state shared by the converter stages.

use std::collections::BTreeSet;

use serde::Serialize;

/// Running counters for one conversion.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunStats {
    /// GeometryRefs processed, including those that became placeholders
    pub files_processed: usize,
    /// Distinct geometry paths loaded (or substituted)
    pub unique_geometry: usize,
    pub placeholders: usize,
    pub groups: usize,
    pub instances: usize,
    pub materials_created: usize,
    pub materials_reused: usize,
    pub total_polygons: usize,
    pub skipped_subtrees: usize,
}

impl RunStats {
    /// Fraction of geometry loads avoided by instancing, 0 when nothing ran.
    pub fn memory_saved(&self) -> f64 {
        if self.files_processed == 0 {
            return 0.0;
        }
        self.files_processed.saturating_sub(self.unique_geometry) as f64 / self.files_processed as f64
    }
}

/// State threaded through material inference and the caches for one run.
#[derive(Clone, Debug, Default)]
pub struct RunContext {
    /// Material text tokens no keyword family recognised.
    pub unknown_keywords: BTreeSet<String>,
    pub stats: RunStats,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a token; returns true the first time it is seen.
    pub fn note_unknown(&mut self, token: &str) -> bool {
        if self.unknown_keywords.contains(token) {
            return false;
        }
        self.unknown_keywords.insert(token.to_string())
    }

    /// Log the collected unknown keywords once.
    pub fn report_unknown(&self) {
        if self.unknown_keywords.is_empty() {
            return;
        }
        let words: Vec<&str> = self.unknown_keywords.iter().map(String::as_str).collect();
        log::info!(
            "{} unrecognised material keyword(s): {}",
            words.len(),
            words.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_saved() {
        let mut stats = RunStats::default();
        assert_eq!(stats.memory_saved(), 0.0);

        stats.files_processed = 2;
        stats.unique_geometry = 1;
        assert!((stats.memory_saved() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_note_unknown_once() {
        let mut ctx = RunContext::new();
        assert!(ctx.note_unknown("zz9"));
        assert!(!ctx.note_unknown("zz9"));
        assert_eq!(ctx.unknown_keywords.len(), 1);
    }
}
