//! Transmission budget enforcement.
//!
//! The limiter counts the bytes it forwards within the current period. Once
//! a message would cross the budget, or forwarding it crosses 90% of the
//! budget, everything is dropped until the period rolls over. Counters and
//! the period boundary are persisted after every change so a restart does
//! not reset the budget.

use crate::error::{PipelineError, PipelineResult};
use crate::message::{self, Message, MessageSink, MessageStream};
use crate::persistor::Persistor;
use agent_config_and_utils::CellularConfig;
use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Persisted limiter counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterState {
    /// Bytes allowed per period. Ignored unless `has_budget`.
    pub budget: u64,
    pub has_budget: bool,
    /// Bytes forwarded in the current period.
    pub count: u64,
    pub period_end: DateTime<Utc>,
}

impl LimiterState {
    /// No budget; the boundary is rolled forward on the first step.
    pub fn unlimited(now: DateTime<Utc>) -> Self {
        Self {
            budget: 0,
            has_budget: false,
            count: 0,
            period_end: now,
        }
    }

    pub fn with_budget(budget: u64, now: DateTime<Utc>) -> Self {
        Self {
            budget,
            has_budget: true,
            count: 0,
            period_end: now,
        }
    }

    fn threshold(&self) -> u64 {
        self.budget.saturating_mul(9) / 10
    }
}

/// Length of one accounting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// Calendar months.
    Months(u32),
    Fixed(Duration),
}

impl Default for Period {
    fn default() -> Self {
        Period::Months(1)
    }
}

impl Period {
    fn validate(&self) -> PipelineResult<()> {
        match self {
            Period::Months(0) => Err(PipelineError::Config(
                "limiter period must be at least one month".to_string(),
            )),
            Period::Fixed(d) if d.is_zero() => Err(PipelineError::Config(
                "limiter period must be non-zero".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Period::Months(n) => from
                .checked_add_months(Months::new(*n))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Period::Fixed(d) => chrono::Duration::from_std(*d)
                .ok()
                .and_then(|d| from.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Advance `end` in whole periods until it is after `now`.
    fn ensure_future(&self, mut end: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        while end <= now {
            end = self.advance(end);
        }
        end
    }
}

/// Midnight on `day` of the month containing `now`.
fn day_this_month(day: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), day, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterMode {
    UnderBudget,
    OverBudget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEvent {
    /// A message of this many bytes arrived.
    Message(u64),
    /// The period timer fired.
    PeriodElapsed,
    Configured(CellularConfig),
}

/// What the driver must do after a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterEffects {
    /// Pass the message downstream.
    pub forward: bool,
    /// Save the state.
    pub persist: bool,
}

/// Limiter counters plus mode, advanced one event at a time.
#[derive(Debug)]
pub struct LimiterMachine {
    state: LimiterState,
    mode: LimiterMode,
    period: Period,
}

impl LimiterMachine {
    pub fn new(state: LimiterState, period: Period) -> PipelineResult<Self> {
        period.validate()?;
        let mut machine = Self {
            state,
            mode: LimiterMode::UnderBudget,
            period,
        };
        machine.derive_mode();
        Ok(machine)
    }

    pub fn state(&self) -> &LimiterState {
        &self.state
    }

    pub fn mode(&self) -> LimiterMode {
        self.mode
    }

    /// Time left in the current period.
    pub fn until_period_end(&self, now: DateTime<Utc>) -> Duration {
        (self.state.period_end - now).to_std().unwrap_or(Duration::ZERO)
    }

    fn derive_mode(&mut self) {
        self.mode = if self.state.has_budget && self.state.count > self.state.threshold() {
            LimiterMode::OverBudget
        } else {
            LimiterMode::UnderBudget
        };
    }

    pub fn step(&mut self, event: LimiterEvent, now: DateTime<Utc>) -> LimiterEffects {
        let mut effects = LimiterEffects::default();

        if now >= self.state.period_end {
            self.state.period_end = self.period.ensure_future(self.state.period_end, now);
            self.state.count = 0;
            self.derive_mode();
            effects.persist = true;
            info!(period_end = %self.state.period_end, "limiter period rolled over");
        }

        match event {
            LimiterEvent::PeriodElapsed => {}
            LimiterEvent::Configured(config) => {
                if self.apply(&config, now) {
                    effects.persist = true;
                }
            }
            LimiterEvent::Message(size) => {
                if self.mode == LimiterMode::OverBudget {
                    return effects;
                }
                let next = self.state.count.saturating_add(size);
                if self.state.has_budget && next > self.state.budget {
                    self.mode = LimiterMode::OverBudget;
                    info!(count = self.state.count, size, budget = self.state.budget, "data budget exhausted");
                    return effects;
                }
                self.state.count = next;
                effects.forward = true;
                effects.persist = true;
                if self.state.has_budget && next > self.state.threshold() {
                    self.mode = LimiterMode::OverBudget;
                    info!(count = next, budget = self.state.budget, "data budget 90% used");
                }
            }
        }

        effects
    }

    /// The count of a forwarded message could not be saved. Stops forwarding
    /// when a budget is set.
    pub fn persist_failed(&mut self) {
        if self.state.has_budget {
            self.mode = LimiterMode::OverBudget;
        }
    }

    /// Returns false when the config matches what is already in effect, so
    /// re-reading an unchanged feed never resets the count.
    fn apply(&mut self, config: &CellularConfig, now: DateTime<Utc>) -> bool {
        let period_end = self
            .period
            .ensure_future(day_this_month(config.plan_day, now), now);
        let (budget, has_budget) = match config.budget_bytes() {
            Some(budget) => (budget, true),
            None => (0, false),
        };

        if period_end == self.state.period_end
            && budget == self.state.budget
            && has_budget == self.state.has_budget
        {
            debug!("cellular config unchanged");
            return false;
        }

        info!(from = %self.state.period_end, to = %period_end, "moving limiter period boundary");
        if has_budget {
            info!(budget_bytes = budget, "setting data budget");
        } else {
            info!("setting data budget to unlimited");
        }

        self.state.period_end = period_end;
        self.state.budget = budget;
        self.state.has_budget = has_budget;
        self.state.count = 0;
        self.derive_mode();
        true
    }
}

/// Somewhere to keep [`LimiterState`] between runs.
pub trait StateStore: Send + 'static {
    fn load(&self) -> PipelineResult<LimiterState>;
    fn save(&mut self, state: &LimiterState) -> PipelineResult<()>;
}

/// JSON state file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> PipelineResult<LimiterState> {
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Replace the file atomically: write a sibling temp file, sync it, then
    /// rename it over the old one. A crash mid-write leaves the previous
    /// state intact.
    fn save(&mut self, state: &LimiterState) -> PipelineResult<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let file_name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                PipelineError::LimiterState(format!("bad state path {}", self.path.display()))
            })?;
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let tmp_path = dir.join(format!(".{file_name}.tmp.{nanos}"));
        let content = serde_json::to_vec(state)?;

        let result = (|| -> std::io::Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp_path)?;
            file.write_all(&content)?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, &self.path)?;
            if let Ok(dir) = std::fs::File::open(&dir) {
                let _ = dir.sync_all();
            }
            Ok(())
        })();

        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

/// In-memory store. Clones share contents, so a test can keep one clone to
/// inspect what the limiter saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    state: Arc<Mutex<Option<LimiterState>>>,
    fail_saves: Arc<AtomicBool>,
}

impl MemoryStateStore {
    pub fn new(state: Option<LimiterState>) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            fail_saves: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn snapshot(&self) -> Option<LimiterState> {
        self.state.lock().clone()
    }

    /// Make every subsequent save fail.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> PipelineResult<LimiterState> {
        self.state
            .lock()
            .clone()
            .ok_or_else(|| PipelineError::LimiterState("no saved state".to_string()))
    }

    fn save(&mut self, state: &LimiterState) -> PipelineResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PipelineError::LimiterState("save rejected".to_string()));
        }
        *self.state.lock() = Some(state.clone());
        Ok(())
    }
}

/// Task side of the limiter.
pub struct DataLimiter<S: StateStore> {
    machine: LimiterMachine,
    store: S,
    input: MessageStream,
    output: MessageSink,
    config: mpsc::Receiver<CellularConfig>,
    persistor: Arc<Persistor>,
}

impl<S: StateStore> DataLimiter<S> {
    /// Restore state from `store` and wire the limiter between `input` and
    /// the returned stream. Without saved state the budget is unlimited.
    ///
    /// Messages dropped over budget are deleted through `persistor`, so they
    /// are neither recovered on restart nor held against the storage quota.
    pub fn new(
        store: S,
        period: Period,
        input: MessageStream,
        config: mpsc::Receiver<CellularConfig>,
        persistor: Arc<Persistor>,
    ) -> PipelineResult<(Self, MessageStream)> {
        let state = match store.load() {
            Ok(state) => state,
            Err(e) => {
                info!(error = %e, "no usable limiter state, starting without a budget");
                LimiterState::unlimited(Utc::now())
            }
        };
        info!(
            budget = state.budget,
            has_budget = state.has_budget,
            count = state.count,
            period_end = %state.period_end,
            "limiter state restored"
        );

        let machine = LimiterMachine::new(state, period)?;
        let (output, stream) = message::channel();
        Ok((
            Self {
                machine,
                store,
                input,
                output,
                config,
                persistor,
            },
            stream,
        ))
    }

    /// Run until the input closes, then close the output.
    pub async fn serve(mut self) {
        loop {
            let period_timer = tokio::time::sleep(self.machine.until_period_end(Utc::now()));

            let (event, message) = tokio::select! {
                _ = period_timer => (LimiterEvent::PeriodElapsed, None),
                message = self.input.recv() => match message {
                    Some(message) => (LimiterEvent::Message(message.size()), Some(message)),
                    None => break,
                },
                Some(config) = self.config.recv() => (LimiterEvent::Configured(config), None),
            };

            let effects = self.machine.step(event, Utc::now());

            if let Some(message) = message {
                if effects.forward {
                    if self.output.send(message).await.is_err() {
                        warn!("limiter output closed");
                        break;
                    }
                } else {
                    debug!(topic = %message.topic(), bytes = message.size(), "over budget, message dropped");
                    self.persistor.remove(&message).await;
                }
            }

            if effects.persist {
                if let Err(e) = self.store.save(self.machine.state()) {
                    warn!(error = %e, "failed to persist limiter state");
                    if effects.forward {
                        self.machine.persist_failed();
                    }
                }
            }
        }

        debug!("limiter input closed");
    }
}
