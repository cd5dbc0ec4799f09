/*!
 * Scheduler Configuration
 *
 * Per-context unit sizing, batch policies, time budgets and worker limits.
 * Loaded from defaults, JSON, or environment overrides.
 */

use crate::core::errors::{SchedulerError, SchedulerResult};
use crate::core::limits::{
    default_worker_threads, DEFAULT_ADD_BATCH_DIVISOR, DEFAULT_ASYNC_BUDGET,
    DEFAULT_HANDLE_POOL_CAPACITY, DEFAULT_QUEUE_CAPACITY, DEFAULT_UNIT_CAPACITY,
    DEFAULT_WORKER_IDLE_SLEEP, MAX_UNIT_CAPACITY, MAX_WORKER_THREADS,
};
use crate::core::serde::{duration_micros, duration_millis, optional_duration_millis};
use crate::core::types::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// How many queued requests a unit drains per tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Drain everything pending
    All,
    /// Drain `pending / divisor`, at least one
    Fraction { divisor: usize },
    /// Drain at most `count`
    Fixed { count: usize },
}

impl BatchPolicy {
    /// Default for additions: a quarter of pending
    pub const fn quarter() -> Self {
        BatchPolicy::Fraction {
            divisor: DEFAULT_ADD_BATCH_DIVISOR,
        }
    }

    /// Number of requests to take when `pending` are waiting
    #[inline]
    pub fn batch(self, pending: usize) -> usize {
        if pending == 0 {
            return 0;
        }
        match self {
            BatchPolicy::All => pending,
            BatchPolicy::Fraction { divisor } => (pending / divisor.max(1)).max(1),
            BatchPolicy::Fixed { count } => count.min(pending),
        }
    }

    fn validate(self, what: &str) -> SchedulerResult<()> {
        match self {
            BatchPolicy::Fraction { divisor: 0 } => Err(SchedulerError::Config(format!(
                "{} batch divisor must be non-zero",
                what
            ))),
            BatchPolicy::Fixed { count: 0 } => Err(SchedulerError::Config(format!(
                "{} batch count must be non-zero",
                what
            ))),
            _ => Ok(()),
        }
    }
}

/// Sizing and draining policy of one execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Maximum processes joined to the unit (queued or slotted)
    pub capacity: usize,
    /// Maximum additions waiting to be drained
    pub queue_capacity: usize,
    pub add_batch: BatchPolicy,
    pub remove_batch: BatchPolicy,
    /// Per-tick polling budget; only time-sliced units honor it
    #[serde(default, with = "optional_duration_millis")]
    pub time_budget: Option<Duration>,
}

impl UnitConfig {
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            add_batch: BatchPolicy::quarter(),
            remove_batch: BatchPolicy::All,
            time_budget: None,
        }
    }

    pub const fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub const fn with_add_batch(mut self, policy: BatchPolicy) -> Self {
        self.add_batch = policy;
        self
    }

    pub const fn with_remove_batch(mut self, policy: BatchPolicy) -> Self {
        self.remove_batch = policy;
        self
    }

    pub const fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    fn validate(&self, context: Context) -> SchedulerResult<()> {
        if self.capacity == 0 || self.capacity > MAX_UNIT_CAPACITY {
            return Err(SchedulerError::Config(format!(
                "{} capacity must be in 1..={}, got {}",
                context, MAX_UNIT_CAPACITY, self.capacity
            )));
        }
        if self.queue_capacity == 0 {
            return Err(SchedulerError::Config(format!(
                "{} queue capacity must be non-zero",
                context
            )));
        }
        self.add_batch.validate("add")?;
        self.remove_batch.validate("remove")
    }
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_UNIT_CAPACITY)
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Applied to every context without an override
    pub default_unit: UnitConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<Context, UnitConfig>,
    /// Upper bound on lazily spawned worker threads
    pub max_worker_threads: usize,
    /// Sleep between ticks of an idle worker
    #[serde(with = "duration_micros")]
    pub worker_idle_sleep: Duration,
    /// Budget of the async unit unless its override sets one
    #[serde(with = "duration_millis")]
    pub async_budget: Duration,
    /// Evicted handles kept for reuse
    pub pool_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_unit: UnitConfig::default(),
            overrides: BTreeMap::new(),
            max_worker_threads: default_worker_threads(),
            worker_idle_sleep: DEFAULT_WORKER_IDLE_SLEEP,
            async_budget: DEFAULT_ASYNC_BUDGET,
            pool_capacity: DEFAULT_HANDLE_POOL_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    /// Small footprint for tests and tools: one worker, small units
    pub fn minimal() -> Self {
        Self {
            default_unit: UnitConfig::new(64).with_queue_capacity(128),
            overrides: BTreeMap::new(),
            max_worker_threads: 1,
            worker_idle_sleep: DEFAULT_WORKER_IDLE_SLEEP,
            async_budget: DEFAULT_ASYNC_BUDGET,
            pool_capacity: 16,
        }
    }

    /// Defaults with environment overrides applied
    ///
    /// Environment variables:
    /// - TICKFLOW_MAX_PROCESSES: default unit capacity
    /// - TICKFLOW_WORKER_THREADS: worker thread bound
    /// - TICKFLOW_ASYNC_BUDGET_MS: async unit budget in milliseconds
    pub fn from_env() -> SchedulerResult<Self> {
        Self::default().apply_env()
    }

    pub fn apply_env(mut self) -> SchedulerResult<Self> {
        if let Some(capacity) = env_usize("TICKFLOW_MAX_PROCESSES")? {
            self.default_unit.capacity = capacity;
        }
        if let Some(workers) = env_usize("TICKFLOW_WORKER_THREADS")? {
            self.max_worker_threads = workers;
        }
        if let Some(millis) = env_usize("TICKFLOW_ASYNC_BUDGET_MS")? {
            self.async_budget = Duration::from_millis(millis as u64);
        }
        Ok(self)
    }

    pub fn from_json_str(json: &str) -> SchedulerResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SchedulerResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn to_json(&self) -> SchedulerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_unit(mut self, context: Context, unit: UnitConfig) -> Self {
        self.overrides.insert(context, unit);
        self
    }

    pub fn with_default_unit(mut self, unit: UnitConfig) -> Self {
        self.default_unit = unit;
        self
    }

    pub fn with_max_worker_threads(mut self, workers: usize) -> Self {
        self.max_worker_threads = workers;
        self
    }

    pub fn with_async_budget(mut self, budget: Duration) -> Self {
        self.async_budget = budget;
        self
    }

    /// Effective unit configuration for a context
    pub fn unit(&self, context: Context) -> UnitConfig {
        let mut unit = self
            .overrides
            .get(&context)
            .copied()
            .unwrap_or(self.default_unit);
        if context.is_time_sliced() && unit.time_budget.is_none() {
            unit.time_budget = Some(self.async_budget);
        }
        unit
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        for context in Context::ALL {
            self.unit(context).validate(context)?;
        }
        if self.max_worker_threads == 0 || self.max_worker_threads > MAX_WORKER_THREADS {
            return Err(SchedulerError::Config(format!(
                "max_worker_threads must be in 1..={}, got {}",
                MAX_WORKER_THREADS, self.max_worker_threads
            )));
        }
        if self.async_budget.is_zero() {
            return Err(SchedulerError::Config(
                "async_budget must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> SchedulerResult<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| SchedulerError::Config(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}
