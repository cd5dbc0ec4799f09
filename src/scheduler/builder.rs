/*!
 * Scheduler Builder
 * Builder pattern for Scheduler construction
 */

use super::config::{SchedulerConfig, UnitConfig};
use super::Scheduler;
use crate::core::errors::SchedulerResult;
use crate::core::types::Context;
use crate::process::{JobDriver, ThreadJobDriver};
use std::sync::Arc;
use std::time::Duration;

/// Builder for Scheduler
#[must_use]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    job_driver: Option<Arc<dyn JobDriver>>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            job_driver: None,
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Apply TICKFLOW_* environment overrides on top of the current config
    pub fn with_env(mut self) -> SchedulerResult<Self> {
        self.config = self.config.apply_env()?;
        Ok(self)
    }

    /// Capacity of every unit without an override
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.default_unit.capacity = capacity;
        self
    }

    pub fn with_unit(mut self, context: Context, unit: UnitConfig) -> Self {
        self.config.overrides.insert(context, unit);
        self
    }

    pub fn with_max_worker_threads(mut self, workers: usize) -> Self {
        self.config.max_worker_threads = workers;
        self
    }

    pub fn with_worker_idle_sleep(mut self, sleep: Duration) -> Self {
        self.config.worker_idle_sleep = sleep;
        self
    }

    pub fn with_async_budget(mut self, budget: Duration) -> Self {
        self.config.async_budget = budget;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.config.pool_capacity = capacity;
        self
    }

    /// Back-end used by `Scheduler::spawn_job` (default: one thread per job)
    pub fn with_job_driver(mut self, driver: Arc<dyn JobDriver>) -> Self {
        self.job_driver = Some(driver);
        self
    }

    /// Validate the configuration and build the Scheduler
    pub fn build(self) -> SchedulerResult<Scheduler> {
        let driver = self
            .job_driver
            .unwrap_or_else(|| Arc::new(ThreadJobDriver::new()));
        Scheduler::with_driver(self.config, driver)
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
