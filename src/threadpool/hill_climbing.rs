/*!
 * Hill Climbing
 *
 * Feedback controller that picks the pool's target concurrency. A square
 * wave is superimposed on the thread count; the throughput response at the
 * wave's frequency (measured with the Goertzel algorithm) tells whether more
 * threads help or hurt. Noise is estimated from the two adjacent frequency
 * bands and damps the move through a confidence factor.
 *
 * # Inputs and Output
 *
 * `update` takes the current goal, the sample duration and the completions
 * seen in it; it returns a new goal clamped to `[min, max]` and the length
 * of the next sample interval.
 */

use super::config::HillClimbingConfig;
use crate::core::limits::HILL_CLIMBING_ACCUMULATE_INTERVAL_MS;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::ops::{Div, Mul, Sub};
use tracing::debug;

/// Why the controller changed the thread count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HillClimbingTransition {
    Warmup,
    Initializing,
    RandomMove,
    ClimbingMove,
    ChangePoint,
    Stabilizing,
    Starvation,
    ThreadTimedOut,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Complex {
    re: f64,
    im: f64,
}

impl Complex {
    const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    #[inline]
    fn abs(self) -> f64 {
        self.re.hypot(self.im)
    }
}

impl Mul<Complex> for f64 {
    type Output = Complex;
    fn mul(self, c: Complex) -> Complex {
        Complex::new(self * c.re, self * c.im)
    }
}

impl Div<f64> for Complex {
    type Output = Complex;
    fn div(self, scalar: f64) -> Complex {
        Complex::new(self.re / scalar, self.im / scalar)
    }
}

impl Sub for Complex {
    type Output = Complex;
    fn sub(self, rhs: Complex) -> Complex {
        Complex::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl Div for Complex {
    type Output = Complex;
    fn div(self, rhs: Complex) -> Complex {
        let denom = rhs.re * rhs.re + rhs.im * rhs.im;
        Complex::new(
            (self.re * rhs.re + self.im * rhs.im) / denom,
            (self.im * rhs.re - self.re * rhs.im) / denom,
        )
    }
}

/// Controller state
pub struct HillClimbing {
    config: HillClimbingConfig,
    samples_to_measure: usize,

    current_control_setting: f64,
    total_samples: usize,
    last_thread_count: u16,
    average_throughput_noise: f64,
    seconds_elapsed_since_last_change: f64,
    completions_since_last_change: f64,
    accumulated_completion_count: u64,
    accumulated_sample_duration: f64,
    samples: Vec<f64>,
    thread_counts: Vec<f64>,
    current_sample_interval_ms: u32,
    last_transition: HillClimbingTransition,
    rng: StdRng,
}

impl HillClimbing {
    pub fn new(config: HillClimbingConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic controller for reproducible runs
    pub fn with_seed(config: HillClimbingConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: HillClimbingConfig, mut rng: StdRng) -> Self {
        let samples_to_measure = (config.wave_period * config.wave_history_size) as usize;
        let current_sample_interval_ms =
            rng.gen_range(config.sample_interval_low_ms..=config.sample_interval_high_ms);

        Self {
            samples_to_measure,
            current_control_setting: 0.0,
            total_samples: 0,
            last_thread_count: 0,
            average_throughput_noise: 0.0,
            seconds_elapsed_since_last_change: 0.0,
            completions_since_last_change: 0.0,
            accumulated_completion_count: 0,
            accumulated_sample_duration: 0.0,
            samples: vec![0.0; samples_to_measure],
            thread_counts: vec![0.0; samples_to_measure],
            current_sample_interval_ms,
            last_transition: HillClimbingTransition::Warmup,
            rng,
            config,
        }
    }

    /// Interval to wait before the next [`update`](Self::update)
    #[inline]
    pub fn sample_interval_ms(&self) -> u32 {
        self.current_sample_interval_ms
    }

    #[inline]
    pub fn last_transition(&self) -> HillClimbingTransition {
        self.last_transition
    }

    /// Thread count the controller last moved to or was told about
    #[inline]
    pub fn last_thread_count(&self) -> u16 {
        self.last_thread_count
    }

    /// Feed one throughput sample; returns `(new_goal, next_interval_ms)`
    pub fn update(
        &mut self,
        current_thread_count: u16,
        mut sample_duration_secs: f64,
        mut num_completions: u64,
        min_threads: u16,
        max_threads: u16,
    ) -> (u16, u32) {
        // Someone else moved the count; resync
        if current_thread_count != self.last_thread_count {
            self.force_change(current_thread_count, HillClimbingTransition::Initializing);
        }

        self.seconds_elapsed_since_last_change += sample_duration_secs;
        self.completions_since_last_change += num_completions as f64;

        sample_duration_secs += self.accumulated_sample_duration;
        num_completions += self.accumulated_completion_count;

        // Completion counts are off by up to (threads - 1) items. Keep
        // accumulating until that error is small enough.
        if self.total_samples > 0
            && (f64::from(current_thread_count) - 1.0) / num_completions as f64
                >= self.config.max_sample_error
        {
            self.accumulated_sample_duration = sample_duration_secs;
            self.accumulated_completion_count = num_completions;
            return (current_thread_count, HILL_CLIMBING_ACCUMULATE_INTERVAL_MS);
        }

        self.accumulated_sample_duration = 0.0;
        self.accumulated_completion_count = 0;

        let throughput = num_completions as f64 / sample_duration_secs;
        let slot = self.total_samples % self.samples_to_measure;
        self.samples[slot] = throughput;
        self.thread_counts[slot] = f64::from(current_thread_count);
        self.total_samples += 1;

        let wave_period = self.config.wave_period as usize;
        let mut ratio = Complex::default();
        let mut confidence = 0.0;
        let mut transition = HillClimbingTransition::Warmup;

        // Whole wave periods only, so the wave frequency lands on a band
        let sample_count =
            (self.total_samples - 1).min(self.samples_to_measure) / wave_period * wave_period;

        if sample_count > wave_period {
            let (sample_sum, thread_sum) = (0..sample_count).fold((0.0, 0.0), |(s, t), i| {
                let slot = self.history_slot(sample_count, i);
                (s + self.samples[slot], t + self.thread_counts[slot])
            });
            let average_throughput = sample_sum / sample_count as f64;
            let average_thread_count = thread_sum / sample_count as f64;

            if average_throughput > 0.0 && average_thread_count > 0.0 {
                let n = sample_count as f64;
                let period = f64::from(self.config.wave_period);
                let adjacent_period_1 = n / (n / period + 1.0);
                let adjacent_period_2 = n / (n / period - 1.0);

                let throughput_wave =
                    self.wave_component(&self.samples, sample_count, period) / average_throughput;
                let mut throughput_error = (self
                    .wave_component(&self.samples, sample_count, adjacent_period_1)
                    / average_throughput)
                    .abs();
                if adjacent_period_2 <= n {
                    throughput_error = throughput_error.max(
                        (self.wave_component(&self.samples, sample_count, adjacent_period_2)
                            / average_throughput)
                            .abs(),
                    );
                }

                // Thread counts are exact; no noise estimate needed
                let thread_wave = self.wave_component(&self.thread_counts, sample_count, period)
                    / average_thread_count;

                self.average_throughput_noise = if self.average_throughput_noise == 0.0 {
                    throughput_error
                } else {
                    let alpha = self.config.error_smoothing_factor;
                    alpha * throughput_error + (1.0 - alpha) * self.average_throughput_noise
                };

                if thread_wave.abs() > 0.0 {
                    ratio = (throughput_wave - self.config.target_throughput_ratio * thread_wave)
                        / thread_wave;
                    transition = HillClimbingTransition::ClimbingMove;
                } else {
                    transition = HillClimbingTransition::Stabilizing;
                }

                let noise = self.average_throughput_noise.max(throughput_error);
                confidence = if noise > 0.0 {
                    thread_wave.abs() / noise / self.config.target_signal_to_noise_ratio
                } else {
                    1.0
                };
            }
        }

        // In phase: climb. Out of phase: back off. Quadrature: stay.
        let mut step = ratio.re.clamp(-1.0, 1.0);
        step *= confidence.clamp(0.0, 1.0);

        // Small moves are attenuated, large ones amplified
        let gain = self.config.max_change_per_second * sample_duration_secs;
        step = step.abs().powf(self.config.gain_exponent) * step.signum() * gain;
        step = step.min(self.config.max_change_per_sample);

        self.current_control_setting += step;

        let wave_magnitude = (0.5
            + self.current_control_setting
                * self.average_throughput_noise
                * self.config.target_signal_to_noise_ratio
                * self.config.wave_magnitude_multiplier
                * 2.0) as i64;
        let wave_magnitude = wave_magnitude.clamp(1, i64::from(self.config.max_wave_magnitude));

        let min = f64::from(min_threads);
        let max = f64::from(max_threads);
        self.current_control_setting = self
            .current_control_setting
            .min(max - wave_magnitude as f64)
            .max(min);

        let wave_on = (self.total_samples / (wave_period / 2)) % 2;
        let new_thread_count = (self.current_control_setting as i64
            + wave_magnitude * wave_on as i64)
            .clamp(i64::from(min_threads), i64::from(max_threads)) as u16;

        if new_thread_count != current_thread_count {
            self.change_thread_count(new_thread_count, transition);
        }

        // Pinned at the minimum and more threads hurt: sample rarely
        let next_interval = if ratio.re < 0.0 && new_thread_count == min_threads {
            (0.5 + f64::from(self.current_sample_interval_ms) * (10.0 * (-ratio.re).max(1.0)))
                as u32
        } else {
            self.current_sample_interval_ms
        };

        (new_thread_count, next_interval)
    }

    /// Record a thread-count change made outside the controller
    pub fn force_change(&mut self, new_thread_count: u16, transition: HillClimbingTransition) {
        if self.last_thread_count != new_thread_count {
            self.current_control_setting +=
                f64::from(new_thread_count) - f64::from(self.last_thread_count);
            self.change_thread_count(new_thread_count, transition);
        }
    }

    fn change_thread_count(&mut self, new_thread_count: u16, transition: HillClimbingTransition) {
        self.last_thread_count = new_thread_count;
        self.last_transition = transition;
        self.current_sample_interval_ms = self
            .rng
            .gen_range(self.config.sample_interval_low_ms..=self.config.sample_interval_high_ms);

        let throughput = if self.seconds_elapsed_since_last_change > 0.0 {
            self.completions_since_last_change / self.seconds_elapsed_since_last_change
        } else {
            0.0
        };
        debug!(
            new_thread_count,
            ?transition,
            throughput,
            "hill climbing thread count change"
        );

        self.seconds_elapsed_since_last_change = 0.0;
        self.completions_since_last_change = 0.0;
    }

    #[inline]
    fn history_slot(&self, sample_count: usize, i: usize) -> usize {
        (self.total_samples - sample_count + i) % self.samples_to_measure
    }

    /// Goertzel filter over the last `sample_count` history entries
    fn wave_component(&self, history: &[f64], sample_count: usize, period: f64) -> Complex {
        debug_assert!(sample_count as f64 >= period);
        debug_assert!(period >= 2.0);

        let w = 2.0 * PI / period;
        let cos = w.cos();
        let coeff = 2.0 * cos;
        let (mut q1, mut q2) = (0.0, 0.0);
        for i in 0..sample_count {
            let q0 = coeff * q1 - q2 + history[self.history_slot(sample_count, i)];
            q2 = q1;
            q1 = q0;
        }

        let n = sample_count as f64;
        Complex::new((q1 - q2 * cos) / n, q2 * w.sin() / n)
    }
}
