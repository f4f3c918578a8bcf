use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

/// How much activation work a single scheduler tick may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickBudget {
    /// Never defer. Used by tooling and blocking flushes.
    Unbounded,
    /// Defer once this much wall-clock time has been spent in the tick.
    Time { millis: u64 },
    /// Defer after this many activation steps. Deterministic, for tests and replays.
    Steps { count: u32 },
}

impl TickBudget {
    pub fn millis(millis: u64) -> Self {
        Self::Time { millis }
    }

    pub fn steps(count: u32) -> Self {
        Self::Steps { count }
    }
}

impl Default for TickBudget {
    fn default() -> Self {
        Self::Time { millis: 5 }
    }
}

/// Errors from loading a streaming configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Streaming configuration: per-tick budgets, batch sizes and GC behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Budget used by `flush` and by hosts that tick with the configured default.
    pub time_budget: TickBudget,
    /// Actors whose components are attached per sub-batch. 0 attaches all at once.
    pub component_batch: usize,
    /// Actors whose physics bodies are created per sub-batch. 0 creates all at once.
    pub physics_batch: usize,
    /// Maximum entries in the scratch table used to match cross-level referents.
    pub cross_level_table_cap: usize,
    /// When false, every level is pinned loaded and loads complete synchronously.
    pub background_streaming: bool,
    /// A single activation step slower than this logs a warning.
    pub slow_step_warning_ms: u64,
    /// Guard for the busy-wait loop in `flush`.
    pub max_flush_iterations: usize,
    /// Skip starting level sequences when they are attached to the root sequence.
    pub disallow_sequence_begin_play: bool,
    /// Scan for references into collected levels after every collection.
    pub verify_after_collection: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            time_budget: TickBudget::default(),
            component_batch: 50,
            physics_batch: 50,
            cross_level_table_cap: levelflow_kernel::DEFAULT_TABLE_CAP,
            background_streaming: true,
            slow_step_warning_ms: 20,
            max_flush_iterations: 10_000,
            disallow_sequence_begin_play: false,
            verify_after_collection: cfg!(debug_assertions),
        }
    }
}

impl StreamConfig {
    /// Configuration for editor-style tooling: no time slicing, no batching.
    pub fn unbounded() -> Self {
        Self {
            time_budget: TickBudget::Unbounded,
            component_batch: 0,
            physics_batch: 0,
            ..Self::default()
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn slow_step_warning(&self) -> Duration {
        Duration::from_millis(self.slow_step_warning_ms)
    }
}

/// Tracks budget consumption within one tick.
#[derive(Debug)]
pub struct BudgetTracker {
    budget: TickBudget,
    start: Instant,
    steps: u32,
}

impl BudgetTracker {
    pub fn start(budget: TickBudget) -> Self {
        Self {
            budget,
            start: Instant::now(),
            steps: 0,
        }
    }

    pub fn budget(&self) -> TickBudget {
        self.budget
    }

    /// Count one finished activation step against the budget.
    pub fn record_step(&mut self) {
        self.steps += 1;
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whether further activation work must wait for the next tick.
    pub fn is_exceeded(&self) -> bool {
        match self.budget {
            TickBudget::Unbounded => false,
            TickBudget::Time { millis } => self.start.elapsed() > Duration::from_millis(millis),
            TickBudget::Steps { count } => self.steps >= count,
        }
    }

    /// Whether wall-clock time ran out. Sub-batch loops inside a step only check this,
    /// so a step budget always lets a started step finish.
    pub fn time_exceeded(&self) -> bool {
        match self.budget {
            TickBudget::Time { millis } => self.start.elapsed() > Duration::from_millis(millis),
            _ => false,
        }
    }
}

/// Per-tick streaming statistics for instrumentation.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub loads_requested_this_tick: usize,
    pub steps_this_tick: u32,
    pub levels_deactivated_this_tick: usize,
    pub unloads_requested_this_tick: usize,
    pub visible_levels: usize,
    pub loaded_levels: usize,
    pub tick_time: Duration,
}

/// Rolling window of recent scheduler tick durations.
#[derive(Debug)]
pub struct FrameTimer {
    window: VecDeque<Duration>,
    capacity: usize,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push one tick's duration, evicting the oldest once the window is full.
    pub fn record(&mut self, dt: Duration) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(dt);
    }

    pub fn average(&self) -> Duration {
        match u32::try_from(self.window.len()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.window.iter().sum::<Duration>() / n,
        }
    }

    pub fn max(&self) -> Duration {
        self.window.iter().max().copied().unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.window.len()
    }
}
