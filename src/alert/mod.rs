//! # Alert Aggregator
//!
//! Accumulates abnormal events (I/O failures, measurements outside expected
//! thresholds) into per-category histories, promotes a severity level per
//! category, and emits log lines and notifications with per-severity rate
//! limiting so a recurring condition does not flood the log.
//!
//! ## Rate Limiting
//!
//! For a history with `count > reported_count` at level WARN or ERROR, a
//! poll emits iff forced or `now` is past the level's last emission plus its
//! interval. Emission advances `reported_count` to `count` and stamps the
//! level's last-emission time. NORMAL never emits. A history's first poll
//! emits immediately (there is no prior emission to rate against).
//!
//! ## Log Shape
//!
//! A single accumulated event logs as itself. A recurring history (count
//! above one) logs a compound message carrying the count and the seconds
//! between the first and last event.
//!
//! ## History Truncation
//!
//! Each history keeps its most recent `history_length` events. The first
//! event ever added is retained separately and stays retrievable after
//! truncation.
//!
//! ## Dispatch
//!
//! One mutex guards the category map across `post`, `poll`, `reset`, and
//! the configuration setters. Notifications are handed to a bounded queue
//! drained by a single worker thread, so delivery never re-enters the
//! aggregator and a slow consumer costs dropped notifications (counted),
//! not a stalled engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::thread::JoinHandle;

use eyre::{Result, ensure};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::{
    DEFAULT_ERROR_INTERVAL_MS, DEFAULT_HISTORY_LENGTH, DEFAULT_WARN_INTERVAL_MS,
    MAXIMUM_ERROR_INTERVAL_MS, MAXIMUM_HISTORY_LENGTH, MAXIMUM_WARN_INTERVAL_MS,
    MINIMUM_ERROR_INTERVAL_MS, MINIMUM_HISTORY_LENGTH, MINIMUM_WARN_INTERVAL_MS,
    NOTIFICATION_QUEUE_DEPTH,
};
use crate::error::ErrorKind;
use crate::pattern::glob_match;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertLevel {
    Normal,
    /// Running, but trending toward trouble: journal backlog, disk filling,
    /// pruning falling behind.
    Warn,
    /// Failing: disk full, persistent I/O errors.
    Error,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AlertLevel::Normal => "NORMAL",
            AlertLevel::Warn => "WARN",
            AlertLevel::Error => "ERROR",
        })
    }
}

/// One recorded occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub time_ms: u64,
    pub message: String,
}

impl Event {
    pub fn new(time_ms: u64, message: impl Into<String>) -> Self {
        Self { time_ms, message: message.into() }
    }
}

/// What the emitter worker delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub sequence: u64,
    pub category: String,
    pub level: AlertLevel,
    pub description: String,
}

#[derive(Debug, Default)]
struct History {
    level: AlertLevel,
    events: VecDeque<Event>,
    first_event: Option<Event>,
    count: usize,
    reported_count: usize,
    last_warn_log_ms: Option<u64>,
    last_error_log_ms: Option<u64>,
}

impl Default for AlertLevel {
    fn default() -> Self {
        AlertLevel::Normal
    }
}

impl History {
    fn add_event(&mut self, event: Event, level: AlertLevel, history_length: usize) {
        while self.events.len() > history_length.saturating_sub(1) {
            self.events.pop_front();
        }
        if self.first_event.is_none() {
            self.first_event = Some(event.clone());
        }
        self.events.push_back(event);
        self.count += 1;
        self.level = level;
    }

    fn trim(&mut self, history_length: usize) {
        while self.events.len() > history_length {
            self.events.pop_front();
        }
    }

    fn last_event(&self) -> Option<&Event> {
        self.events.back()
    }

    /// Seconds between the first and the most recent event.
    fn duration_seconds(&self) -> u64 {
        match (self.first_event.as_ref(), self.last_event()) {
            (Some(first), Some(last)) => (last.time_ms.saturating_sub(first.time_ms)) / 1000,
            _ => 0,
        }
    }

    /// Returns the description to emit, if the rate limiter allows one now.
    fn poll(&mut self, now_ms: u64, force: bool, warn_interval: u64, error_interval: u64) -> Option<String> {
        if self.count <= self.reported_count {
            return None;
        }
        let (last_log, interval) = match self.level {
            AlertLevel::Normal => return None,
            AlertLevel::Warn => (&mut self.last_warn_log_ms, warn_interval),
            AlertLevel::Error => (&mut self.last_error_log_ms, error_interval),
        };
        let due = force || last_log.is_none_or(|last| now_ms > last + interval);
        if !due {
            return None;
        }
        *last_log = Some(now_ms);
        self.reported_count = self.count;

        let event = self.last_event()?;
        Some(if self.count == 1 {
            event.message.clone()
        } else {
            format!(
                "{} (recurring, count={} duration={}s)",
                event.message,
                self.count,
                self.duration_seconds()
            )
        })
    }
}

struct MonitorState {
    histories: HashMap<String, History>,
    history_length: usize,
    warn_interval_ms: u64,
    error_interval_ms: u64,
}

type Handler = Box<dyn Fn(Notification) + Send + 'static>;

pub struct AlertMonitor {
    state: Mutex<MonitorState>,
    sender: Option<SyncSender<Notification>>,
    worker: Option<JoinHandle<()>>,
    sequence: AtomicU64,
    dropped: AtomicU64,
}

impl Default for AlertMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertMonitor {
    /// A monitor whose notifications go to the log.
    pub fn new() -> Self {
        Self::with_handler(Box::new(|notification: Notification| match notification.level {
            AlertLevel::Error => {
                error!(category = %notification.category, seq = notification.sequence, "{}", notification.description)
            }
            _ => {
                warn!(category = %notification.category, seq = notification.sequence, "{}", notification.description)
            }
        }))
    }

    /// A monitor delivering notifications to `handler` on a dedicated
    /// worker thread. The handler must not call back into the monitor.
    pub fn with_handler(handler: Handler) -> Self {
        let (sender, receiver): (SyncSender<Notification>, Receiver<Notification>) =
            sync_channel(NOTIFICATION_QUEUE_DEPTH);
        let worker = std::thread::Builder::new()
            .name("alert-emitter".to_string())
            .spawn(move || {
                while let Ok(notification) = receiver.recv() {
                    handler(notification);
                }
            })
            .expect("failed to spawn the alert emitter thread");
        Self {
            state: Mutex::new(MonitorState {
                histories: HashMap::new(),
                history_length: DEFAULT_HISTORY_LENGTH,
                warn_interval_ms: DEFAULT_WARN_INTERVAL_MS,
                error_interval_ms: DEFAULT_ERROR_INTERVAL_MS,
            }),
            sender: Some(sender),
            worker: Some(worker),
            sequence: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append an event to the category's history and poll that history
    /// (non-forced) at the event's own time.
    pub fn post(&self, category: &str, event: Event, level: AlertLevel) {
        let mut state = self.state.lock();
        let history_length = state.history_length;
        let (warn_interval, error_interval) = (state.warn_interval_ms, state.error_interval_ms);
        let history = state.histories.entry_ref(category).or_default();
        let time = event.time_ms;
        history.add_event(event, level, history_length);
        let emission = history.poll(time, false, warn_interval, error_interval);
        let level = history.level;
        drop(state);
        if let Some(description) = emission {
            self.emit(category, level, description);
        }
    }

    /// Emit pending messages for every category whose interval has elapsed,
    /// or all pending when forced.
    pub fn poll(&self, now_ms: u64, force: bool) {
        let mut state = self.state.lock();
        let (warn_interval, error_interval) = (state.warn_interval_ms, state.error_interval_ms);
        let mut emissions = Vec::new();
        for (category, history) in state.histories.iter_mut() {
            if let Some(description) = history.poll(now_ms, force, warn_interval, error_interval) {
                emissions.push((category.clone(), history.level, description));
            }
        }
        drop(state);
        for (category, level, description) in emissions {
            self.emit(&category, level, description);
        }
    }

    /// Drop every history. Intervals and history length are unchanged.
    pub fn reset(&self) {
        self.state.lock().histories.clear();
    }

    pub fn set_history_length(&self, history_length: usize) -> Result<()> {
        ensure!(
            (MINIMUM_HISTORY_LENGTH..=MAXIMUM_HISTORY_LENGTH).contains(&history_length),
            ErrorKind::InvalidArgument(format!(
                "history length {} outside [{}, {}]",
                history_length, MINIMUM_HISTORY_LENGTH, MAXIMUM_HISTORY_LENGTH
            ))
        );
        let mut state = self.state.lock();
        state.history_length = history_length;
        for history in state.histories.values_mut() {
            history.trim(history_length);
        }
        Ok(())
    }

    pub fn set_warn_interval_ms(&self, interval: u64) -> Result<()> {
        ensure!(
            (MINIMUM_WARN_INTERVAL_MS..=MAXIMUM_WARN_INTERVAL_MS).contains(&interval),
            ErrorKind::InvalidArgument(format!(
                "warn interval {} outside [{}, {}]",
                interval, MINIMUM_WARN_INTERVAL_MS, MAXIMUM_WARN_INTERVAL_MS
            ))
        );
        self.state.lock().warn_interval_ms = interval;
        Ok(())
    }

    pub fn set_error_interval_ms(&self, interval: u64) -> Result<()> {
        ensure!(
            (MINIMUM_ERROR_INTERVAL_MS..=MAXIMUM_ERROR_INTERVAL_MS).contains(&interval),
            ErrorKind::InvalidArgument(format!(
                "error interval {} outside [{}, {}]",
                interval, MINIMUM_ERROR_INTERVAL_MS, MAXIMUM_ERROR_INTERVAL_MS
            ))
        );
        self.state.lock().error_interval_ms = interval;
        Ok(())
    }

    pub fn warn_interval_ms(&self) -> u64 {
        self.state.lock().warn_interval_ms
    }

    pub fn error_interval_ms(&self) -> u64 {
        self.state.lock().error_interval_ms
    }

    pub fn history_length(&self) -> usize {
        self.state.lock().history_length
    }

    pub fn event_count(&self, category: &str) -> usize {
        self.state.lock().histories.get(category).map_or(0, |h| h.count)
    }

    pub fn reported_count(&self, category: &str) -> usize {
        self.state.lock().histories.get(category).map_or(0, |h| h.reported_count)
    }

    /// The first event ever posted to the category, surviving truncation.
    pub fn first_event(&self, category: &str) -> Option<Event> {
        self.state.lock().histories.get(category).and_then(|h| h.first_event.clone())
    }

    pub fn recent_events(&self, category: &str) -> Vec<Event> {
        self.state
            .lock()
            .histories
            .get(category)
            .map_or_else(Vec::new, |h| h.events.iter().cloned().collect())
    }

    /// The highest level among all categories.
    pub fn alert_level(&self) -> AlertLevel {
        self.state
            .lock()
            .histories
            .values()
            .map(|h| h.level)
            .max()
            .unwrap_or(AlertLevel::Normal)
    }

    /// One line per category: level, count, and the latest event.
    pub fn summary(&self) -> String {
        let state = self.state.lock();
        let mut categories: Vec<&String> = state.histories.keys().collect();
        categories.sort();
        let mut out = String::new();
        for category in categories {
            let history = &state.histories[category];
            if let Some(event) = history.last_event() {
                out.push_str(&format!(
                    "{:>12}: [{}] event {}: {}\n",
                    category, history.level, history.count, event.message
                ));
            }
        }
        out
    }

    /// Full event listing for categories matching a glob pattern. The first
    /// event is shown even when truncation has dropped it from the recent
    /// list.
    pub fn detailed_history(&self, select: &str) -> String {
        let state = self.state.lock();
        let mut categories: Vec<&String> = state.histories.keys().collect();
        categories.sort();
        let mut out = String::new();
        for category in categories {
            if !glob_match(select, category) {
                continue;
            }
            let history = &state.histories[category];
            out.push_str(&format!("{}:\n", category));
            if let Some(first) = &history.first_event {
                let in_recent = history.count <= history.events.len();
                if !in_recent {
                    out.push_str(&format!("  event 1: {}\n", first.message));
                }
            }
            let start = history.count - history.events.len();
            for (index, event) in history.events.iter().enumerate() {
                out.push_str(&format!("  event {}: {}\n", start + index + 1, event.message));
            }
        }
        out
    }

    /// Notifications dropped because the outbound queue was full.
    pub fn dropped_notifications(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn emit(&self, category: &str, level: AlertLevel, description: String) {
        match level {
            AlertLevel::Error => error!(category, "{}", description),
            AlertLevel::Warn => warn!(category, "{}", description),
            AlertLevel::Normal => info!(category, "{}", description),
        }
        let notification = Notification {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            category: category.to_string(),
            level,
            description,
        };
        if let Some(sender) = &self.sender {
            match sender.try_send(notification) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

impl Drop for AlertMonitor {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
