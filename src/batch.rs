//! Parallel extraction over many buffers.
//!
//! Two dispatch modes, both returning results in input order:
//!
//! - [`DispatchMode::Thread`]: a dedicated rayon pool sized to the worker
//!   count. Each rayon split builds its own extractor (`map_init`).
//! - [`DispatchMode::Isolated`]: long-lived worker threads pull buffer
//!   indices from a bounded crossbeam queue. Each worker owns one extractor
//!   for its whole life and contains panics, so one bad buffer surfaces as
//!   a [`FingerprintError::Worker`] instead of tearing down the batch.
//!   Each worker runs its extractor inside a private rayon pool of
//!   [`ISOLATED_WORKER_THREADS`], so `max_workers` bounds total compute.
//!
//! A single-buffer batch skips dispatch and runs on the calling thread.

use crate::audio::AudioBuffer;
use crate::error::{FingerprintError, Result};
use crate::extractor::{ExtractionParams, ExtractorKind, FingerprintExtractor, FingerprintRecord};
use crossbeam_channel::bounded;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Thread,
    Isolated,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::Thread => write!(f, "thread"),
            DispatchMode::Isolated => write!(f, "isolated"),
        }
    }
}

impl FromStr for DispatchMode {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "thread" => Ok(DispatchMode::Thread),
            "isolated" | "process" => Ok(DispatchMode::Isolated),
            other => Err(FingerprintError::invalid(format!(
                "unknown dispatch mode '{}' (expected thread or isolated)",
                other
            ))),
        }
    }
}

/// Batch settings as they appear in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub mode: DispatchMode,
    /// `None` means one worker per CPU core.
    pub max_workers: Option<usize>,
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == Some(0) {
            return Err(FingerprintError::invalid("max_workers must be > 0"));
        }
        Ok(())
    }
}

/// What the host offers for extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub cpu_cores: usize,
    pub accelerator_available: bool,
    /// Only true when extraction actually runs on the accelerator.
    pub accelerator_enabled: bool,
    pub accelerator_name: Option<String>,
}

/// Report the compute available to [`BatchExtractor`].
///
/// No accelerator backend is built into this crate, so the accelerator
/// fields are always false/`None`. The optimized extractor is a CPU path.
pub fn device_info() -> DeviceInfo {
    DeviceInfo {
        cpu_cores: cpu_cores(),
        accelerator_available: false,
        accelerator_enabled: false,
        accelerator_name: None,
    }
}

fn cpu_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, Copy)]
pub struct BatchExtractor {
    kind: ExtractorKind,
    params: ExtractionParams,
    mode: DispatchMode,
    max_workers: Option<usize>,
}

impl BatchExtractor {
    pub fn new(
        kind: ExtractorKind,
        params: ExtractionParams,
        mode: DispatchMode,
        max_workers: Option<usize>,
    ) -> Result<Self> {
        params.validate()?;
        BatchConfig { mode, max_workers }.validate()?;
        Ok(Self {
            kind,
            params,
            mode,
            max_workers,
        })
    }

    pub fn from_config(kind: ExtractorKind, params: ExtractionParams, config: &BatchConfig) -> Result<Self> {
        Self::new(kind, params, config.mode, config.max_workers)
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Workers that would be used for a batch of `len` buffers.
    pub fn worker_count(&self, len: usize) -> usize {
        self.max_workers.unwrap_or_else(cpu_cores).min(len).max(1)
    }

    /// Fingerprint every buffer, failing on the first error.
    pub fn batch_extract(&self, buffers: &[AudioBuffer]) -> Result<Vec<FingerprintRecord>> {
        self.batch_extract_each(buffers).into_iter().collect()
    }

    /// Fingerprint every buffer, keeping one result per buffer.
    pub fn batch_extract_each(&self, buffers: &[AudioBuffer]) -> Vec<Result<FingerprintRecord>> {
        match buffers {
            [] => Vec::new(),
            [single] => {
                let extractor = self.kind.build();
                vec![guarded_extract(extractor.as_ref(), single, &self.params)]
            }
            _ => {
                let workers = self.worker_count(buffers.len());
                let started = Instant::now();
                info!(
                    count = buffers.len(),
                    mode = %self.mode,
                    workers,
                    extractor = %self.kind,
                    "starting batch extraction"
                );

                let results = match self.mode {
                    DispatchMode::Thread => self.run_threaded(buffers, workers),
                    DispatchMode::Isolated => self.run_isolated(buffers, workers),
                };

                let failed = results.iter().filter(|r| r.is_err()).count();
                if failed > 0 {
                    warn!(failed, count = buffers.len(), "batch finished with errors");
                }
                info!(
                    count = buffers.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "batch extraction finished"
                );
                results
            }
        }
    }

    fn run_threaded(&self, buffers: &[AudioBuffer], workers: usize) -> Vec<Result<FingerprintRecord>> {
        let pool = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool,
            Err(e) => {
                let msg = format!("failed to build thread pool: {}", e);
                return buffers
                    .iter()
                    .map(|_| Err(FingerprintError::Worker(msg.clone())))
                    .collect();
            }
        };

        let kind = self.kind;
        let params = self.params;
        pool.install(|| {
            buffers
                .par_iter()
                .map_init(
                    || kind.build(),
                    |extractor, buffer| guarded_extract(&**extractor, buffer, &params),
                )
                .collect()
        })
    }

    fn run_isolated(&self, buffers: &[AudioBuffer], workers: usize) -> Vec<Result<FingerprintRecord>> {
        let kind = self.kind;
        self.run_isolated_with(buffers, workers, move || kind.build())
    }

    fn run_isolated_with<F>(
        &self,
        buffers: &[AudioBuffer],
        workers: usize,
        build: F,
    ) -> Vec<Result<FingerprintRecord>>
    where
        F: Fn() -> Box<dyn FingerprintExtractor> + Sync,
    {
        let (task_tx, task_rx) = bounded::<usize>(workers * 2);
        let (result_tx, result_rx) = bounded::<(usize, Result<FingerprintRecord>)>(buffers.len());
        let params = self.params;
        let build = &build;

        std::thread::scope(|scope| {
            for worker in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    // Frame-level parallelism stays inside this worker's own pool
                    let pool = match worker_pool(worker) {
                        Ok(pool) => pool,
                        Err(msg) => {
                            warn!(worker, error = %msg, "worker pool unavailable");
                            for index in task_rx.iter() {
                                let err = FingerprintError::Worker(msg.clone());
                                if result_tx.send((index, Err(err))).is_err() {
                                    break;
                                }
                            }
                            return;
                        }
                    };
                    let extractor = build();
                    for index in task_rx.iter() {
                        let result =
                            pool.install(|| guarded_extract(extractor.as_ref(), &buffers[index], &params));
                        if let Err(e) = &result {
                            warn!(worker, index, error = %e, "extraction failed");
                        }
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(task_rx);
            drop(result_tx);

            for index in 0..buffers.len() {
                if task_tx.send(index).is_err() {
                    break;
                }
            }
            drop(task_tx);
        });

        let mut slots: Vec<Option<Result<FingerprintRecord>>> = buffers.iter().map(|_| None).collect();
        for (index, result) in result_rx.try_iter() {
            slots[index] = Some(result);
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    Err(FingerprintError::Worker(format!(
                        "no result produced for buffer {}",
                        index
                    )))
                })
            })
            .collect()
    }
}

/// Threads each isolated worker may use for frame-level parallelism.
pub const ISOLATED_WORKER_THREADS: usize = 1;

fn worker_pool(worker: usize) -> std::result::Result<rayon::ThreadPool, String> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(ISOLATED_WORKER_THREADS)
        .thread_name(move |i| format!("sonoprint-worker-{}-{}", worker, i))
        .build()
        .map_err(|e| format!("failed to build worker pool: {}", e))
}

fn guarded_extract(
    extractor: &dyn FingerprintExtractor,
    buffer: &AudioBuffer,
    params: &ExtractionParams,
) -> Result<FingerprintRecord> {
    match catch_unwind(AssertUnwindSafe(|| extractor.extract(buffer, params))) {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(FingerprintError::Worker(format!(
                "{} extractor panicked: {}",
                extractor.name(),
                reason
            )))
        }
    }
}
