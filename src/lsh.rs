//! Random-hyperplane locality-sensitive hashing over compact fingerprints.
//!
//! # Algorithm
//!
//! Each of `num_tables` tables holds `hash_size` random unit-length
//! hyperplanes of dimension `input_dim`. A vector's key in a table is one
//! bit per hyperplane, set when the dot product is `>= 0`:
//!
//! ```text
//! key = b0 b1 ... b(hash_size-1)        (b0 is the most significant bit)
//! b_i = dot(plane_i, v) >= 0
//! ```
//!
//! Vectors at a small angle land in the same bucket of at least one table
//! with high probability, so a query only scans the buckets its own keys
//! point at instead of the whole collection. An unmodified vector always
//! hashes to its own bucket, so exact re-queries are always found.
//!
//! # Reproducibility
//!
//! Hyperplanes are drawn from a xoshiro256** stream seeded by `seed`
//! (Box-Muller for normal deviates) and are identical across restarts for
//! the same `(input_dim, num_tables, hash_size, seed)`. Use a distinct seed
//! per service if independent indexes should not share hyperplanes.
//!
//! # Storage
//!
//! Each identifier owns one slot holding its fitted vector and its per-table
//! keys. Buckets only hold slot numbers, so a vector is stored once no
//! matter how many tables there are, and re-indexing an identifier moves
//! its slot instead of appending a second copy.
//!
//! # Concurrency
//!
//! [`LshIndex::index`] takes `&mut self`. To share an index between threads
//! wrap it in a `RwLock`, keep a single writer, or shard by identifier.

use crate::error::{FingerprintError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Default hyperplane seed. Fixed so indexes rebuild identically.
pub const DEFAULT_LSH_SEED: u64 = 42;
pub const DEFAULT_NUM_TABLES: usize = 5;
pub const DEFAULT_HASH_SIZE: usize = 10;
/// Keys are stored in a `u64`.
pub const MAX_HASH_SIZE: usize = 64;

/// Construction parameters apart from the input dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LshConfig {
    pub num_tables: usize,
    pub hash_size: usize,
    pub seed: u64,
}

impl Default for LshConfig {
    fn default() -> Self {
        Self {
            num_tables: DEFAULT_NUM_TABLES,
            hash_size: DEFAULT_HASH_SIZE,
            seed: DEFAULT_LSH_SEED,
        }
    }
}

impl LshConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_tables == 0 {
            return Err(FingerprintError::invalid("num_tables must be > 0"));
        }
        if self.hash_size == 0 || self.hash_size > MAX_HASH_SIZE {
            return Err(FingerprintError::invalid(format!(
                "hash_size must be in 1..={}, got {}",
                MAX_HASH_SIZE, self.hash_size
            )));
        }
        Ok(())
    }
}

/// A bucket member returned by [`LshIndex::query`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LshCandidate<'a> {
    pub id: &'a str,
    pub vector: &'a [f64],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LshStats {
    pub num_indexed: usize,
    pub num_tables: usize,
    pub hash_size: usize,
    pub avg_bucket_size: f64,
    pub max_bucket_size: usize,
    pub total_buckets: usize,
}

struct Table {
    planes: Vec<Vec<f64>>, // hash_size x input_dim, unit rows
    buckets: HashMap<u64, Vec<usize>>,
}

impl Table {
    fn detach(&mut self, key: u64, slot: usize) {
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.retain(|&s| s != slot);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }
}

struct Slot {
    id: String,
    vector: Arc<[f64]>,
    keys: Vec<u64>, // one per table
}

pub struct LshIndex {
    input_dim: usize,
    config: LshConfig,
    tables: Vec<Table>,
    slots: Vec<Slot>,
    slot_of: HashMap<String, usize>,
}

impl LshIndex {
    pub fn new(input_dim: usize, num_tables: usize, hash_size: usize, seed: u64) -> Result<Self> {
        Self::with_config(
            input_dim,
            LshConfig {
                num_tables,
                hash_size,
                seed,
            },
        )
    }

    pub fn with_config(input_dim: usize, config: LshConfig) -> Result<Self> {
        if input_dim == 0 {
            return Err(FingerprintError::invalid("input_dim must be > 0"));
        }
        config.validate()?;

        let mut rng = Xoshiro256ss::new(config.seed);
        let tables = (0..config.num_tables)
            .map(|_| Table {
                planes: (0..config.hash_size)
                    .map(|_| random_unit_vector(&mut rng, input_dim))
                    .collect(),
                buckets: HashMap::new(),
            })
            .collect();

        Ok(Self {
            input_dim,
            config,
            tables,
            slots: Vec::new(),
            slot_of: HashMap::new(),
        })
    }

    /// Add `vector` under `id` to one bucket per table.
    ///
    /// The vector is zero-padded or truncated to `input_dim` first.
    /// Re-indexing an identifier replaces its vector and moves it to the
    /// buckets of the new keys.
    pub fn index(&mut self, id: impl Into<String>, vector: &[f64]) {
        let fitted: Arc<[f64]> = Arc::from(self.fit(vector).as_ref());
        self.insert_slot(id.into(), fitted);
    }

    /// Like [`index`](Self::index), but keeps `vector`'s allocation when it
    /// already has length `input_dim`.
    pub fn index_shared(&mut self, id: impl Into<String>, vector: Arc<[f64]>) {
        let fitted = if vector.len() == self.input_dim {
            vector
        } else {
            Arc::from(self.fit(&vector).as_ref())
        };
        self.insert_slot(id.into(), fitted);
    }

    fn insert_slot(&mut self, id: String, vector: Arc<[f64]>) {
        let keys: Vec<u64> = self
            .tables
            .iter()
            .map(|t| hash_key(&t.planes, &vector))
            .collect();

        match self.slot_of.get(&id).copied() {
            Some(slot) => {
                let old_keys = std::mem::take(&mut self.slots[slot].keys);
                for (table, (&old, &new)) in self.tables.iter_mut().zip(old_keys.iter().zip(keys.iter())) {
                    if old != new {
                        table.detach(old, slot);
                        table.buckets.entry(new).or_default().push(slot);
                    }
                }
                self.slots[slot].vector = vector;
                self.slots[slot].keys = keys;
                debug!(id = %id, slot, "re-indexed vector");
            }
            None => {
                let slot = self.slots.len();
                for (table, &key) in self.tables.iter_mut().zip(keys.iter()) {
                    table.buckets.entry(key).or_default().push(slot);
                }
                debug!(id = %id, slot, tables = self.tables.len(), "indexed vector");
                self.slot_of.insert(id.clone(), slot);
                self.slots.push(Slot { id, vector, keys });
            }
        }
    }

    /// Candidates sharing a bucket with `vector` in any table.
    ///
    /// Tables are visited in order; an identifier is reported once, with
    /// the vector from the first table it was found in. Stops as soon as
    /// `max_candidates` identifiers were collected.
    pub fn query(&self, vector: &[f64], max_candidates: usize) -> Vec<LshCandidate<'_>> {
        let fitted = self.fit(vector);
        let mut seen: HashSet<usize> = HashSet::new();
        let mut out = Vec::new();
        if max_candidates == 0 {
            return out;
        }

        for table in &self.tables {
            let key = hash_key(&table.planes, &fitted);
            let Some(bucket) = table.buckets.get(&key) else {
                continue;
            };
            for &slot in bucket {
                if seen.insert(slot) {
                    let entry = &self.slots[slot];
                    out.push(LshCandidate {
                        id: entry.id.as_str(),
                        vector: &entry.vector,
                    });
                    if out.len() >= max_candidates {
                        return out;
                    }
                }
            }
        }

        out
    }

    pub fn stats(&self) -> LshStats {
        let sizes = self
            .tables
            .iter()
            .flat_map(|t| t.buckets.values().map(Vec::len));

        let mut total_buckets = 0usize;
        let mut total_entries = 0usize;
        let mut max_bucket_size = 0usize;
        for size in sizes {
            total_buckets += 1;
            total_entries += size;
            max_bucket_size = max_bucket_size.max(size);
        }

        LshStats {
            num_indexed: self.slots.len(),
            num_tables: self.config.num_tables,
            hash_size: self.config.hash_size,
            avg_bucket_size: if total_buckets == 0 {
                0.0
            } else {
                total_entries as f64 / total_buckets as f64
            },
            max_bucket_size,
            total_buckets,
        }
    }

    /// Drop every indexed vector. Hyperplanes are kept.
    pub fn clear(&mut self) {
        for table in &mut self.tables {
            table.buckets.clear();
        }
        self.slots.clear();
        self.slot_of.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slot_of.contains_key(id)
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn config(&self) -> &LshConfig {
        &self.config
    }

    /// Keys of `vector` in every table, in table order.
    pub fn keys(&self, vector: &[f64]) -> Vec<u64> {
        let fitted = self.fit(vector);
        self.tables
            .iter()
            .map(|t| hash_key(&t.planes, &fitted))
            .collect()
    }

    fn fit<'v>(&self, vector: &'v [f64]) -> Cow<'v, [f64]> {
        match vector.len().cmp(&self.input_dim) {
            std::cmp::Ordering::Equal => Cow::Borrowed(vector),
            std::cmp::Ordering::Greater => Cow::Borrowed(&vector[..self.input_dim]),
            std::cmp::Ordering::Less => {
                let mut padded = vector.to_vec();
                padded.resize(self.input_dim, 0.0);
                Cow::Owned(padded)
            }
        }
    }
}

fn hash_key(planes: &[Vec<f64>], vector: &[f64]) -> u64 {
    planes.iter().fold(0u64, |key, plane| {
        let bit = dot(plane, vector) >= 0.0;
        (key << 1) | bit as u64
    })
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn random_unit_vector(rng: &mut Xoshiro256ss, dim: usize) -> Vec<f64> {
    let mut v: Vec<f64> = (0..dim).map(|_| rng.norm_float64()).collect();
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

// ---------------------------------------------------------------------------
// xoshiro256** PRNG + Box-Muller normal deviates
//
// Self-contained so hyperplanes never change with a dependency upgrade.
// ---------------------------------------------------------------------------

struct Xoshiro256ss {
    s: [u64; 4],
    spare: Option<f64>,
}

impl Xoshiro256ss {
    fn new(seed: u64) -> Self {
        // SplitMix64 expands the seed into the four state words.
        let mut z = seed;
        let mut s = [0u64; 4];
        for slot in &mut s {
            z = z.wrapping_add(0x9e3779b97f4a7c15);
            let mut x = z;
            x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
            x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
            *slot = x ^ (x >> 31);
        }
        Self { s, spare: None }
    }

    fn next_u64(&mut self) -> u64 {
        let result = self.s[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let t = self.s[1] << 17;
        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];
        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);
        result
    }

    /// Uniform in `[0, 1)`.
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn norm_float64(&mut self) -> f64 {
        if let Some(spare) = self.spare.take() {
            return spare;
        }
        loop {
            let u1 = self.next_f64();
            let u2 = self.next_f64();
            if u1 > 0.0 {
                let mag = (-2.0 * u1.ln()).sqrt();
                let angle = 2.0 * std::f64::consts::PI * u2;
                self.spare = Some(mag * angle.sin());
                return mag * angle.cos();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_unit_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let v: Vec<f64> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
                let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
                v.into_iter().map(|x| x / norm).collect()
            })
            .collect()
    }

    // ==========================================================================
    // CONSTRUCTION TESTS
    // ==========================================================================

    #[test]
    fn test_invalid_construction() {
        assert!(LshIndex::new(0, 5, 10, 42).is_err());
        assert!(LshIndex::new(10, 0, 10, 42).is_err());
        assert!(LshIndex::new(10, 5, 0, 42).is_err());
        assert!(LshIndex::new(10, 5, 65, 42).is_err());
        assert!(LshIndex::new(10, 5, 64, 42).is_ok());
    }

    #[test]
    fn test_planes_are_unit_length() {
        let index = LshIndex::new(32, 3, 8, 7).unwrap();
        for table in &index.tables {
            assert_eq!(table.planes.len(), 8);
            for plane in &table.planes {
                assert_eq!(plane.len(), 32);
                let norm = plane.iter().map(|x| x * x).sum::<f64>().sqrt();
                assert!((norm - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_same_seed_same_keys() {
        let a = LshIndex::new(16, 4, 12, DEFAULT_LSH_SEED).unwrap();
        let b = LshIndex::new(16, 4, 12, DEFAULT_LSH_SEED).unwrap();
        for v in random_unit_vectors(20, 16, 1) {
            assert_eq!(a.keys(&v), b.keys(&v));
        }
    }

    #[test]
    fn test_different_seed_different_planes() {
        let a = LshIndex::new(16, 1, 12, 1).unwrap();
        let b = LshIndex::new(16, 1, 12, 2).unwrap();
        assert_ne!(a.tables[0].planes, b.tables[0].planes);
    }

    // ==========================================================================
    // KEY TESTS
    // ==========================================================================

    #[test]
    fn test_hash_key_bit_order() {
        let planes = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![-1.0, 0.0, 0.0],
        ];
        // Dot products: 1, 1, 1, -1 -> 1110
        assert_eq!(hash_key(&planes, &[1.0, 1.0, 1.0]), 0b1110);
        // Dot products: -1, -1, -1, 1 -> 0001
        assert_eq!(hash_key(&planes, &[-1.0, -1.0, -1.0]), 0b0001);
        // Zero dot product counts as a set bit
        assert_eq!(hash_key(&planes, &[0.0, 0.0, 0.0]), 0b1111);
    }

    #[test]
    fn test_keys_fit_to_input_dim() {
        let index = LshIndex::new(8, 3, 10, 3).unwrap();
        let short = [0.3, -0.2, 0.9];
        let padded = [0.3, -0.2, 0.9, 0.0, 0.0, 0.0, 0.0, 0.0];
        let long = [0.3, -0.2, 0.9, 0.0, 0.0, 0.0, 0.0, 0.0, 5.0, -5.0];

        assert_eq!(index.keys(&short), index.keys(&padded));
        assert_eq!(index.keys(&long), index.keys(&padded));
    }

    // ==========================================================================
    // INDEX / QUERY TESTS
    // ==========================================================================

    #[test]
    fn test_exact_vector_always_found() {
        let vectors = random_unit_vectors(50, 100, 99);
        let mut index = LshIndex::new(100, 5, 6, DEFAULT_LSH_SEED).unwrap();
        for (i, v) in vectors.iter().enumerate() {
            index.index(format!("fp_{}", i), v);
        }

        for (i, v) in vectors.iter().enumerate() {
            let id = format!("fp_{}", i);
            let found = index.query(v, usize::MAX);
            assert!(found.iter().any(|c| c.id == id), "{} not recalled", id);
        }
    }

    #[test]
    fn test_query_deduplicates_across_tables() {
        let mut index = LshIndex::new(4, 5, 8, 11).unwrap();
        index.index("only", &[0.5, 0.5, 0.5, 0.5]);

        let found = index.query(&[0.5, 0.5, 0.5, 0.5], 100);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "only");
        assert_eq!(found[0].vector, &[0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_query_respects_max_candidates() {
        let mut index = LshIndex::new(4, 2, 4, 5).unwrap();
        for i in 0..10 {
            index.index(format!("dup_{}", i), &[1.0, 2.0, 3.0, 4.0]);
        }

        assert_eq!(index.query(&[1.0, 2.0, 3.0, 4.0], 3).len(), 3);
        assert!(index.query(&[1.0, 2.0, 3.0, 4.0], 0).is_empty());
        // Insertion order within a bucket is preserved
        let ids: Vec<&str> = index
            .query(&[1.0, 2.0, 3.0, 4.0], 2)
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["dup_0", "dup_1"]);
    }

    #[test]
    fn test_stored_vector_is_fitted() {
        let mut index = LshIndex::new(4, 1, 4, 5).unwrap();
        index.index("short", &[1.0, 2.0]);
        let found = index.query(&[1.0, 2.0, 0.0, 0.0], 10);
        assert_eq!(found[0].vector, &[1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_query_empty_index() {
        let index = LshIndex::new(4, 2, 4, 5).unwrap();
        assert!(index.query(&[1.0, 0.0, 0.0, 0.0], 10).is_empty());
    }

    // ==========================================================================
    // STATS / CLEAR TESTS
    // ==========================================================================

    #[test]
    fn test_stats() {
        let mut index = LshIndex::new(4, 3, 6, 21).unwrap();
        let empty = index.stats();
        assert_eq!(empty.num_indexed, 0);
        assert_eq!(empty.total_buckets, 0);
        assert_eq!(empty.avg_bucket_size, 0.0);

        index.index("a", &[1.0, 0.0, 0.0, 0.0]);
        index.index("b", &[1.0, 0.0, 0.0, 0.0]);

        let stats = index.stats();
        assert_eq!(stats.num_indexed, 2);
        assert_eq!(stats.num_tables, 3);
        assert_eq!(stats.hash_size, 6);
        // Identical vectors share one bucket per table
        assert_eq!(stats.total_buckets, 3);
        assert_eq!(stats.max_bucket_size, 2);
        assert_eq!(stats.avg_bucket_size, 2.0);
    }

    #[test]
    fn test_reindex_same_id_keeps_bucket_totals() {
        let mut index = LshIndex::new(16, 5, 8, DEFAULT_LSH_SEED).unwrap();
        let vectors = random_unit_vectors(3, 16, 4);
        index.index("a", &vectors[0]);
        index.index("b", &vectors[1]);
        let before = index.stats();

        for _ in 0..4 {
            index.index("a", &vectors[0]);
        }

        assert_eq!(index.stats(), before);
        assert_eq!(index.len(), 2);
        assert_eq!(index.slots.len(), 2);
    }

    #[test]
    fn test_reindex_moves_to_new_vector() {
        let mut index = LshIndex::new(16, 5, 8, DEFAULT_LSH_SEED).unwrap();
        let vectors = random_unit_vectors(2, 16, 8);
        index.index("a", &vectors[0]);
        index.index("a", &vectors[1]);

        // One entry per table, wherever the new keys put it
        let stats = index.stats();
        assert_eq!(stats.num_indexed, 1);
        assert_eq!(stats.avg_bucket_size * stats.total_buckets as f64, 5.0);

        let found = index.query(&vectors[1], 10);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].vector, vectors[1].as_slice());
        for table in &index.tables {
            assert!(table.buckets.values().all(|b| !b.is_empty()));
        }
    }

    #[test]
    fn test_index_shared_keeps_allocation() {
        let mut index = LshIndex::new(4, 5, 6, 3).unwrap();
        let exact: Arc<[f64]> = Arc::from(vec![0.4, -0.1, 0.2, 0.7]);
        index.index_shared("exact", Arc::clone(&exact));
        // One slot, no per-table copies
        assert_eq!(Arc::strong_count(&exact), 2);

        let short: Arc<[f64]> = Arc::from(vec![0.4, -0.1]);
        index.index_shared("short", Arc::clone(&short));
        assert_eq!(Arc::strong_count(&short), 1);
        let found = index.query(&[0.4, -0.1, 0.0, 0.0], 10);
        assert!(found
            .iter()
            .any(|c| c.id == "short" && c.vector == [0.4, -0.1, 0.0, 0.0].as_slice()));
    }

    #[test]
    fn test_config_accessor() {
        let index = LshIndex::with_config(8, LshConfig::default()).unwrap();
        assert_eq!(index.config(), &LshConfig::default());
        assert_eq!(index.input_dim(), 8);
    }

    #[test]
    fn test_clear_keeps_planes() {
        let mut index = LshIndex::new(4, 2, 6, 21).unwrap();
        let v = [0.1, 0.2, 0.3, 0.4];
        let keys_before = index.keys(&v);

        index.index("a", &v);
        assert_eq!(index.len(), 1);
        assert!(index.contains("a"));

        index.clear();
        assert!(index.is_empty());
        assert!(index.query(&v, 10).is_empty());
        assert_eq!(index.stats().total_buckets, 0);
        assert_eq!(index.keys(&v), keys_before);
    }

    // ==========================================================================
    // PRNG TESTS
    // ==========================================================================

    #[test]
    fn test_xoshiro_deterministic() {
        let mut a = Xoshiro256ss::new(42);
        let mut b = Xoshiro256ss::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_normal_distribution() {
        let mut rng = Xoshiro256ss::new(0);
        let n = 10_000;
        let samples: Vec<f64> = (0..n).map(|_| rng.norm_float64()).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let variance = samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;

        assert!(mean.abs() < 0.1, "mean should be ~0, got {}", mean);
        assert!((variance - 1.0).abs() < 0.1, "variance should be ~1, got {}", variance);
    }
}
