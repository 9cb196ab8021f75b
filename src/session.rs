use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::SessionConfig;
use crate::error::PoolError;
use crate::threadpool::ThreadPool;

/// Everything a render shares across calls: the worker pool and the seed
/// stream. Created once and handed to the integrator by reference.
pub struct RenderSession {
    pub pool: ThreadPool,
    pub config: SessionConfig,
    batches: AtomicU64,
}

impl RenderSession {
    pub fn new(config: SessionConfig) -> Result<RenderSession, PoolError> {
        Ok(RenderSession {
            pool: ThreadPool::new(&config)?,
            config,
            batches: AtomicU64::new(0),
        })
    }

    /// Seed for the next batch. Consecutive batches never reuse a random stream.
    pub fn next_batch_seed(&self) -> u64 {
        let batch = self.batches.fetch_add(1, Ordering::Relaxed);
        self.config.seed.wrapping_add(batch.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}
