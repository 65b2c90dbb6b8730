/*!
 * Pool Configuration
 *
 * Thread bounds, timeouts and hill-climbing constants, loadable from the
 * environment or JSON.
 */

use crate::core::limits::{MAX_POSSIBLE_THREAD_COUNT, SLOW_WORK_ITEM_THRESHOLD, WORKER_IDLE_TIMEOUT};
use crate::core::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Constants of the hill-climbing control law
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HillClimbingConfig {
    /// Period, in samples, of the square wave added to the thread count
    pub wave_period: u32,
    pub max_wave_magnitude: u32,
    pub wave_magnitude_multiplier: f64,
    /// Samples kept, in wave periods
    pub wave_history_size: u32,
    pub target_throughput_ratio: f64,
    pub target_signal_to_noise_ratio: f64,
    pub max_change_per_second: f64,
    pub max_change_per_sample: f64,
    pub sample_interval_low_ms: u32,
    pub sample_interval_high_ms: u32,
    pub error_smoothing_factor: f64,
    pub gain_exponent: f64,
    pub max_sample_error: f64,
}

impl Default for HillClimbingConfig {
    fn default() -> Self {
        Self {
            wave_period: 4,
            max_wave_magnitude: 20,
            wave_magnitude_multiplier: 1.0,
            wave_history_size: 8,
            target_throughput_ratio: 0.15,
            target_signal_to_noise_ratio: 3.0,
            max_change_per_second: 4.0,
            max_change_per_sample: 20.0,
            sample_interval_low_ms: 10,
            sample_interval_high_ms: 200,
            error_smoothing_factor: 0.01,
            gain_exponent: 2.0,
            max_sample_error: 0.15,
        }
    }
}

impl HillClimbingConfig {
    pub fn validate(&self) -> SyncResult<()> {
        if self.wave_period < 2 {
            return Err(SyncError::invalid_argument("wave_period must be at least 2"));
        }
        if self.wave_history_size == 0 {
            return Err(SyncError::invalid_argument("wave_history_size must be positive"));
        }
        if self.sample_interval_low_ms == 0
            || self.sample_interval_low_ms > self.sample_interval_high_ms
        {
            return Err(SyncError::invalid_argument(format!(
                "sample interval range {}..={} ms is empty or zero",
                self.sample_interval_low_ms, self.sample_interval_high_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.error_smoothing_factor) {
            return Err(SyncError::invalid_argument(
                "error_smoothing_factor must be within 0..=1",
            ));
        }
        Ok(())
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_threads: u16,
    pub max_threads: u16,
    /// Processors the pool sizes itself against
    pub processor_count: u16,
    pub worker_idle_timeout_ms: u64,
    pub slow_work_item_threshold_ms: u64,
    pub hill_climbing: HillClimbingConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let processor_count = detected_processor_count();
        Self {
            min_threads: processor_count,
            max_threads: MAX_POSSIBLE_THREAD_COUNT,
            processor_count,
            worker_idle_timeout_ms: WORKER_IDLE_TIMEOUT.as_millis() as u64,
            slow_work_item_threshold_ms: SLOW_WORK_ITEM_THRESHOLD.as_millis() as u64,
            hill_climbing: HillClimbingConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Defaults overlaid with `KERNEL_SYNC_MIN_THREADS`,
    /// `KERNEL_SYNC_MAX_THREADS` and `KERNEL_SYNC_IDLE_TIMEOUT_MS`
    pub fn from_env() -> SyncResult<Self> {
        let mut config = Self::default();
        if let Some(min) = env_number::<u16>("KERNEL_SYNC_MIN_THREADS")? {
            config.min_threads = min;
        }
        if let Some(max) = env_number::<u16>("KERNEL_SYNC_MAX_THREADS")? {
            config.max_threads = max;
        }
        if let Some(ms) = env_number::<u64>("KERNEL_SYNC_IDLE_TIMEOUT_MS")? {
            config.worker_idle_timeout_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SyncError::invalid_argument(format!("pool config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the thread bounds and nested hill-climbing settings
    pub fn validate(&self) -> SyncResult<()> {
        if self.processor_count == 0 {
            return Err(SyncError::invalid_argument("processor_count must be positive"));
        }
        if self.min_threads == 0 {
            return Err(SyncError::invalid_argument("min_threads must be positive"));
        }
        if self.min_threads > self.max_threads {
            return Err(SyncError::invalid_argument(format!(
                "min_threads {} exceeds max_threads {}",
                self.min_threads, self.max_threads
            )));
        }
        if self.max_threads < self.processor_count {
            return Err(SyncError::invalid_argument(format!(
                "max_threads {} is below the processor count {}",
                self.max_threads, self.processor_count
            )));
        }
        if self.max_threads > MAX_POSSIBLE_THREAD_COUNT {
            return Err(SyncError::invalid_argument(format!(
                "max_threads {} exceeds {}",
                self.max_threads, MAX_POSSIBLE_THREAD_COUNT
            )));
        }
        if self.worker_idle_timeout_ms == 0 {
            return Err(SyncError::invalid_argument("worker_idle_timeout_ms must be positive"));
        }
        self.hill_climbing.validate()
    }

    #[inline]
    pub fn worker_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_idle_timeout_ms)
    }

    #[inline]
    pub fn slow_work_item_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_work_item_threshold_ms)
    }
}

fn detected_processor_count() -> u16 {
    std::thread::available_parallelism()
        .map(|n| n.get().min(MAX_POSSIBLE_THREAD_COUNT as usize) as u16)
        .unwrap_or(1)
}

fn env_number<T: std::str::FromStr>(key: &str) -> SyncResult<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SyncError::invalid_argument(format!("{}={:?} is not a number", key, value))),
        Err(_) => Ok(None),
    }
}
