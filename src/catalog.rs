//! Searchable collection of fingerprints.
//!
//! The LSH index narrows a query down to a shortlist, then the exact
//! comparator scores and ranks the shortlist. `exhaustive_search` skips
//! the index and scores every entry, which is the baseline the shortlist
//! is measured against.

use crate::compare::{Candidate, Comparator, Match, MatchThresholds};
use crate::error::Result;
use crate::extractor::FingerprintRecord;
use crate::lsh::{LshConfig, LshIndex, LshStats};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

struct Entry {
    // Shared with the index when the length already equals `input_dim`
    vector: Arc<[f64]>,
    duration: f64,
}

pub struct FingerprintCatalog {
    index: LshIndex,
    comparator: Comparator,
    thresholds: MatchThresholds,
    entries: HashMap<String, Entry>,
    order: Vec<String>,
}

impl FingerprintCatalog {
    /// `input_dim` is the compact vector length every entry is fitted to.
    pub fn new(
        input_dim: usize,
        lsh: LshConfig,
        comparator: Comparator,
        thresholds: MatchThresholds,
    ) -> Result<Self> {
        Ok(Self {
            index: LshIndex::with_config(input_dim, lsh)?,
            comparator,
            thresholds,
            entries: HashMap::new(),
            order: Vec::new(),
        })
    }

    /// Add or replace a record. Replacing keeps the original position.
    pub fn insert(&mut self, id: impl Into<String>, record: &FingerprintRecord) {
        let id = id.into();
        let vector: Arc<[f64]> = Arc::from(record.compact().values());
        self.index.index_shared(id.clone(), Arc::clone(&vector));

        let entry = Entry {
            vector,
            duration: record.duration(),
        };
        if self.entries.insert(id.clone(), entry).is_none() {
            self.order.push(id);
        }
    }

    /// LSH shortlist of at most `max_candidates`, ranked exactly.
    pub fn search(&self, query: &FingerprintRecord, max_candidates: usize) -> Vec<Match> {
        let started = Instant::now();
        let vector = query.compact().values();

        let shortlist: Vec<Candidate<'_>> = self
            .index
            .query(vector, max_candidates)
            .into_iter()
            .filter_map(|c| self.candidate(c.id))
            .collect();

        let matches = self
            .comparator
            .rank_matches(vector, &shortlist, &self.thresholds);

        debug!(
            shortlist = shortlist.len(),
            matches = matches.len(),
            catalog = self.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "lsh search"
        );
        matches
    }

    /// Rank every entry, in insertion order before sorting.
    pub fn exhaustive_search(&self, query: &FingerprintRecord) -> Vec<Match> {
        let started = Instant::now();
        let candidates: Vec<Candidate<'_>> = self
            .order
            .iter()
            .filter_map(|id| self.candidate(id))
            .collect();

        let matches = self
            .comparator
            .rank_matches(query.compact().values(), &candidates, &self.thresholds);

        debug!(
            scanned = candidates.len(),
            matches = matches.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "exhaustive search"
        );
        matches
    }

    // Full stored vector, not the LSH-fitted copy, so scoring sees the same
    // data as a direct comparison would.
    fn candidate<'a>(&'a self, id: &'a str) -> Option<Candidate<'a>> {
        self.entries.get(id).map(|entry| Candidate {
            id,
            vector: &entry.vector,
            duration: entry.duration,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
        self.order.clear();
    }

    pub fn stats(&self) -> LshStats {
        self.index.stats()
    }

    pub fn thresholds(&self) -> &MatchThresholds {
        &self.thresholds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::extractor::{extract, ExtractionParams};

    const SR: u32 = 22050;

    fn tone(freqs: &[f64], seconds: f64) -> FingerprintRecord {
        let n = (seconds * SR as f64) as usize;
        let samples = (0..n)
            .map(|i| {
                let t = i as f64 / SR as f64;
                // Slow amplitude wobble so frames differ over time
                let env = 0.6 + 0.4 * (2.0 * std::f64::consts::PI * 1.5 * t).sin();
                env * freqs
                    .iter()
                    .map(|f| (2.0 * std::f64::consts::PI * f * t).sin())
                    .sum::<f64>()
                    * 0.2
            })
            .collect();
        let buffer = AudioBuffer::new(samples, SR).unwrap();
        extract(&buffer, &ExtractionParams::default()).unwrap()
    }

    fn catalog(thresholds: MatchThresholds) -> FingerprintCatalog {
        let dim = (1 + SR as usize / 512) * 6;
        FingerprintCatalog::new(dim, LshConfig::default(), Comparator::default(), thresholds).unwrap()
    }

    // ==========================================================================
    // SEARCH TESTS
    // ==========================================================================

    #[test]
    fn test_search_finds_exact_entry() {
        let mut cat = catalog(MatchThresholds::default());
        let songs = [
            ("low", tone(&[110.0, 330.0], 1.0)),
            ("mid", tone(&[700.0, 1400.0], 1.0)),
            ("high", tone(&[3000.0, 6000.0], 1.0)),
        ];
        for (id, record) in &songs {
            cat.insert(*id, record);
        }

        let matches = cat.search(&songs[1].1, 10);
        assert_eq!(matches[0].id, "mid");
        assert!((matches[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_search_agrees_with_exhaustive_on_top_hit() {
        let mut cat = catalog(MatchThresholds::permissive());
        let records: Vec<FingerprintRecord> = [200.0, 450.0, 900.0, 2200.0, 5000.0]
            .iter()
            .map(|&f| tone(&[f], 1.0))
            .collect();
        for (i, record) in records.iter().enumerate() {
            cat.insert(format!("track_{}", i), record);
        }

        let exhaustive = cat.exhaustive_search(&records[3]);
        let lsh = cat.search(&records[3], 100);
        assert_eq!(exhaustive.len(), 5);
        assert_eq!(exhaustive[0].id, "track_3");
        assert_eq!(lsh[0].id, "track_3");
        assert!(lsh.len() <= exhaustive.len());
    }

    #[test]
    fn test_insert_replaces_existing_id() {
        let mut cat = catalog(MatchThresholds::permissive());
        cat.insert("a", &tone(&[440.0], 1.0));
        cat.insert("a", &tone(&[880.0], 0.5));

        assert_eq!(cat.len(), 1);
        let matches = cat.exhaustive_search(&tone(&[880.0], 0.5));
        assert_eq!(matches.len(), 1);
        assert!((matches[0].duration - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reinsert_does_not_grow_index() {
        let mut cat = catalog(MatchThresholds::permissive());
        let record = tone(&[440.0], 1.0);
        cat.insert("a", &record);
        cat.insert("b", &tone(&[2000.0], 1.0));
        let before = cat.stats();

        for _ in 0..4 {
            cat.insert("a", &record);
        }
        assert_eq!(cat.stats(), before);
        assert_eq!(cat.len(), 2);
    }

    #[test]
    fn test_entry_vector_shared_with_index() {
        let mut cat = catalog(MatchThresholds::permissive());
        cat.insert("a", &tone(&[440.0], 1.0));
        let entry = &cat.entries["a"];
        // Catalog entry plus the index slot
        assert_eq!(Arc::strong_count(&entry.vector), 2);
    }

    #[test]
    fn test_thresholds_applied_to_search() {
        let strict = MatchThresholds {
            min_score: 1.01,
            ..MatchThresholds::permissive()
        };
        let mut cat = catalog(strict);
        let record = tone(&[440.0], 1.0);
        cat.insert("a", &record);

        assert_eq!(cat.thresholds().min_score, 1.01);
        assert!(cat.search(&record, 10).is_empty());
        assert!(cat.exhaustive_search(&record).is_empty());
    }

    #[test]
    fn test_clear() {
        let mut cat = catalog(MatchThresholds::permissive());
        let record = tone(&[440.0], 1.0);
        cat.insert("a", &record);
        assert!(cat.contains("a"));
        assert_eq!(cat.stats().num_indexed, 1);

        cat.clear();
        assert!(cat.is_empty());
        assert!(cat.search(&record, 10).is_empty());
        assert!(cat.exhaustive_search(&record).is_empty());
    }

    #[test]
    fn test_invalid_lsh_config_rejected() {
        let lsh = LshConfig {
            num_tables: 0,
            ..LshConfig::default()
        };
        assert!(FingerprintCatalog::new(60, lsh, Comparator::default(), MatchThresholds::default()).is_err());
    }
}
