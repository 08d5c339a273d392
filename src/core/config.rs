/*!
 * Configuration
 *
 * Layered configuration: built-in defaults, an optional JSON file, then
 * environment overrides. The running system reads it through a
 * [`ConfigHandle`] so per-process settings can be swapped without
 * stopping the schedulers; changes apply at the next login.
 */

use super::errors::{ConfigError, ConfigResult};
use super::limits::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_CYCLE_DELAY, DEFAULT_CYCLE_DIVISOR, DEFAULT_EMERGENCY_MIN_AGE,
    DEFAULT_LOCK_TIMEOUT, DEFAULT_PERIOD_NS, DEFAULT_PRIORITY, DEFAULT_RETIRE_DELAY,
    DEFAULT_TERMINATION_TIMEOUT_S, MAX_SCHEDULERS,
};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable naming a config file
pub const CONFIG_PATH_ENV: &str = "SCHED_CONFIG";

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CoreConfig {
    pub scheduler: SchedulerConfig,
    pub process: ProcessDefaults,
    /// Registered schedulers; empty means a single default scheduler
    pub schedulers: Vec<SchedulerSpec>,
    /// Per-process settings keyed by process name
    pub processes: HashMap<String, ProcessSettings>,
    pub login: LoginConfig,
}

/// Engine-wide timing behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Simulated time added per cycle
    pub period_ns: u64,
    /// Pace the main scheduler against the wall clock
    pub not_faster_than_realtime: bool,
    /// Busy-wait instead of sleeping while ahead of schedule
    pub dont_call_sleep: bool,
    /// Run reference and init in separate scheduler cycles
    pub separate_cycles_for_ref_and_init: bool,
    pub termination_timeout_s: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period_ns: DEFAULT_PERIOD_NS,
            not_faster_than_realtime: true,
            dont_call_sleep: false,
            separate_cycles_for_ref_and_init: false,
            termination_timeout_s: DEFAULT_TERMINATION_TIMEOUT_S,
        }
    }
}

/// Defaults applied when neither login nor per-process settings override
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessDefaults {
    pub priority: i32,
    pub divisor: i32,
    pub delay: i32,
    pub call_timeout_ms: u64,
    pub lock_timeout_ms: u64,
    pub retire_delay_ms: u64,
    pub emergency_min_age_ms: u64,
}

impl Default for ProcessDefaults {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            divisor: DEFAULT_CYCLE_DIVISOR,
            delay: DEFAULT_CYCLE_DELAY,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT.as_millis() as u64,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
            retire_delay_ms: DEFAULT_RETIRE_DELAY.as_millis() as u64,
            emergency_min_age_ms: DEFAULT_EMERGENCY_MIN_AGE.as_millis() as u64,
        }
    }
}

impl ProcessDefaults {
    #[inline]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    #[inline]
    pub fn retire_delay(&self) -> Duration {
        Duration::from_millis(self.retire_delay_ms)
    }

    #[inline]
    pub fn emergency_min_age(&self) -> Duration {
        Duration::from_millis(self.emergency_min_age_ms)
    }
}

/// Barrier names split by position and wait mode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct BarrierNames {
    pub before_signal_only: Vec<String>,
    pub before_signal_and_wait: Vec<String>,
    pub behind_signal_only: Vec<String>,
    pub behind_signal_and_wait: Vec<String>,
}

impl BarrierNames {
    pub fn is_empty(&self) -> bool {
        self.before_signal_only.is_empty()
            && self.before_signal_and_wait.is_empty()
            && self.behind_signal_only.is_empty()
            && self.behind_signal_and_wait.is_empty()
    }
}

/// One registered scheduler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SchedulerSpec {
    pub name: String,
    pub barriers: BarrierNames,
    /// Scheduler only reports information and never runs a loop
    pub external_only_info: bool,
}

impl SchedulerSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_barriers(mut self, barriers: BarrierNames) -> Self {
        self.barriers = barriers;
        self
    }
}

/// Per-process settings, already parsed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ProcessSettings {
    pub priority: Option<i32>,
    pub divisor: Option<i32>,
    pub delay: Option<i32>,
    pub call_timeout_ms: Option<u64>,
    /// Scheduler name; the main scheduler when absent
    pub scheduler: Option<String>,
    pub barriers: BarrierNames,
    pub loop_out: BarrierNames,
    pub range_control: bool,
}

/// Login listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoginConfig {
    pub instance: String,
    /// TCP port; 0 disables the socket listener
    pub port: u16,
    pub unix_socket: Option<String>,
    /// Log every frame exchanged with external workers
    pub trace_wire: bool,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            instance: String::from("default"),
            port: 1800,
            unix_socket: None,
            trace_wire: false,
        }
    }
}

impl CoreConfig {
    /// Load configuration: file (explicit path, else `SCHED_CONFIG`), then env overrides
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let env_path = std::env::var(CONFIG_PATH_ENV).ok();
        let mut config = match path.or(env_path.as_deref().map(Path::new)) {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> ConfigResult<Self> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// `SCHED_INSTANCE`, `SCHED_PORT`, `SCHED_PERIOD_NS`
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        if let Ok(instance) = std::env::var("SCHED_INSTANCE") {
            self.login.instance = instance;
        }
        if let Ok(port) = std::env::var("SCHED_PORT") {
            self.login.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("SCHED_PORT={}", port)))?;
        }
        if let Ok(period) = std::env::var("SCHED_PERIOD_NS") {
            self.scheduler.period_ns = period
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("SCHED_PERIOD_NS={}", period)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.period_ns == 0 {
            return Err(ConfigError::Invalid("scheduler.period_ns must be > 0".into()));
        }
        if self.schedulers.len() > MAX_SCHEDULERS {
            return Err(ConfigError::Invalid(format!(
                "{} schedulers configured, limit is {}",
                self.schedulers.len(),
                MAX_SCHEDULERS
            )));
        }
        Ok(())
    }

    /// Configured schedulers, or the single default one
    pub fn scheduler_specs(&self) -> Vec<SchedulerSpec> {
        if self.schedulers.is_empty() {
            vec![SchedulerSpec::named("Scheduler")]
        } else {
            self.schedulers.clone()
        }
    }

    pub fn process_settings(&self, name: &str) -> Option<&ProcessSettings> {
        self.processes.get(name)
    }
}

/// Lock-free, swappable view of the active configuration
#[derive(Debug)]
pub struct ConfigHandle {
    current: ArcSwap<CoreConfig>,
}

impl ConfigHandle {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
        }
    }

    /// Snapshot of the active configuration
    #[inline]
    pub fn get(&self) -> Arc<CoreConfig> {
        self.current.load_full()
    }

    pub fn replace(&self, config: CoreConfig) {
        self.current.store(Arc::new(config));
    }

    /// Update one process's settings in place (copy-on-write)
    pub fn set_process_settings(&self, name: &str, settings: ProcessSettings) {
        self.current.rcu(|cur| {
            let mut next = CoreConfig::clone(cur);
            next.processes.insert(name.to_string(), settings.clone());
            next
        });
    }
}
