//! Per-API isolation compartments: concurrency cap, time budget, circuit
//! breaker.
//!
//! Every `(service, api)` pair owns exactly one [`Bulkhead`] process-wide,
//! handed out by the [`BulkheadRegistry`]. A compartment admits at most
//! `concurrency` simultaneous calls (FIFO among briefly-waiting callers,
//! fail-fast beyond a few milliseconds), bounds each call by `timeout_ms`,
//! and feeds every completion into a sliding-window breaker.
//!
//! The breaker evaluates the last `request_volume` completions; once the
//! window has filled and the error share reaches `error_threshold_percent`,
//! the circuit opens and calls fail fast. After `sleep_window_ms` a single
//! trial call is admitted: success closes the circuit, failure re-opens it
//! and restarts the sleep timer.

use crate::models::service::RuntimeConfig;
use ahash::HashMap as AHashMap;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// How long an over-limit caller may wait for a permit before being shed.
const PERMIT_WAIT_MS: u64 = 5;

/// Breaker state of a compartment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed = 0,
    /// Shedding load, calls fail fast.
    Open = 1,
    /// Sleep window elapsed, a single trial call is in flight.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Typed outcome of a bulkhead execution that did not produce a value.
#[derive(Debug)]
pub enum BulkheadError<E> {
    /// No permit became available within the wait budget.
    CapacityExceeded { retry_after_ms: u64 },
    /// The circuit is open; no upstream call was made.
    CircuitOpen { retry_after_ms: u64 },
    /// The wrapped operation exceeded the compartment's time budget. The
    /// operation future is dropped, which cancels any in-flight upstream I/O.
    TimedOut { timeout_ms: u64 },
    /// The operation ran and failed; counted against the breaker window.
    Failed(E),
}

/// Last-N sliding window of completion outcomes.
#[derive(Debug)]
struct Window {
    outcomes: VecDeque<bool>,
    errors: usize,
    capacity: usize,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            errors: 0,
            capacity,
        }
    }

    /// Records one completion and reports whether the breaker should trip.
    fn record(&mut self, success: bool, threshold_percent: u8) -> bool {
        if self.outcomes.len() == self.capacity {
            if let Some(evicted) = self.outcomes.pop_front() {
                if !evicted {
                    self.errors -= 1;
                }
            }
        }
        self.outcomes.push_back(success);
        if !success {
            self.errors += 1;
        }
        // Never trip before the window has filled once.
        self.outcomes.len() == self.capacity
            && self.errors * 100 >= threshold_percent as usize * self.capacity
    }

    fn reset(&mut self) {
        self.outcomes.clear();
        self.errors = 0;
    }
}

/// Isolation compartment for one `(service, api)` pair.
#[derive(Debug)]
pub struct Bulkhead {
    name: String,
    runtime: RuntimeConfig,
    semaphore: Arc<Semaphore>,
    state: AtomicU8,
    opened_at: Mutex<Option<Instant>>,
    trial_in_flight: AtomicBool,
    window: Mutex<Window>,
}

impl Bulkhead {
    pub fn new(name: String, runtime: RuntimeConfig) -> Arc<Self> {
        let permits = runtime.concurrency.max(1);
        Arc::new(Self {
            name,
            semaphore: Arc::new(Semaphore::new(permits)),
            state: AtomicU8::new(CircuitState::Closed as u8),
            opened_at: Mutex::new(None),
            trial_in_flight: AtomicBool::new(false),
            window: Mutex::new(Window::new(runtime.circuit.request_volume.max(1))),
            runtime,
        })
    }

    /// Runs `operation` inside the compartment.
    ///
    /// Admission order: breaker check, permit acquisition (bounded wait),
    /// then the operation under the time budget. Every executed call is
    /// recorded in the breaker window; timeouts count as failures.
    pub async fn execute<F, T, E>(&self, operation: F) -> Result<T, BulkheadError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        let is_trial = self.admit()?;

        let permit = match tokio::time::timeout(
            Duration::from_millis(PERMIT_WAIT_MS),
            self.semaphore.acquire(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            _ => {
                if is_trial {
                    self.trial_in_flight.store(false, Ordering::Release);
                }
                return Err(BulkheadError::CapacityExceeded {
                    retry_after_ms: self.runtime.circuit.sleep_window_ms,
                });
            }
        };

        let result =
            tokio::time::timeout(Duration::from_millis(self.runtime.timeout_ms), operation).await;
        drop(permit);

        match result {
            Ok(Ok(value)) => {
                self.record(true, is_trial);
                Ok(value)
            }
            Ok(Err(error)) => {
                self.record(false, is_trial);
                Err(BulkheadError::Failed(error))
            }
            Err(_) => {
                self.record(false, is_trial);
                Err(BulkheadError::TimedOut {
                    timeout_ms: self.runtime.timeout_ms,
                })
            }
        }
    }

    /// Breaker admission. Returns whether this call is the half-open trial.
    fn admit<E>(&self) -> Result<bool, BulkheadError<E>> {
        match CircuitState::from(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let sleep_window = Duration::from_millis(self.runtime.circuit.sleep_window_ms);
                let elapsed = self
                    .opened_at
                    .lock()
                    .expect("opened_at lock poisoned")
                    .map(|at| at.elapsed());
                match elapsed {
                    Some(elapsed) if elapsed >= sleep_window => {
                        // Sleep window elapsed; exactly one caller wins the
                        // transition and becomes the trial.
                        if self
                            .state
                            .compare_exchange(
                                CircuitState::Open as u8,
                                CircuitState::HalfOpen as u8,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                            .is_ok()
                        {
                            self.trial_in_flight.store(true, Ordering::Release);
                            info!("bulkhead {} half-open, admitting trial", self.name);
                            Ok(true)
                        } else {
                            Err(BulkheadError::CircuitOpen {
                                retry_after_ms: self.runtime.circuit.sleep_window_ms,
                            })
                        }
                    }
                    _ => {
                        let remaining = elapsed
                            .map(|e| sleep_window.saturating_sub(e).as_millis() as u64)
                            .unwrap_or(self.runtime.circuit.sleep_window_ms);
                        Err(BulkheadError::CircuitOpen {
                            retry_after_ms: remaining.max(1),
                        })
                    }
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight.swap(true, Ordering::AcqRel) {
                    Err(BulkheadError::CircuitOpen {
                        retry_after_ms: self.runtime.circuit.sleep_window_ms,
                    })
                } else {
                    Ok(true)
                }
            }
        }
    }

    fn record(&self, success: bool, is_trial: bool) {
        if is_trial {
            self.trial_in_flight.store(false, Ordering::Release);
            if success {
                self.transition_to_closed();
            } else {
                self.transition_to_open();
            }
            return;
        }

        // Completions that raced a trip are not counted against the next
        // window.
        if CircuitState::from(self.state.load(Ordering::Acquire)) != CircuitState::Closed {
            return;
        }

        let tripped = {
            let mut window = self.window.lock().expect("window lock poisoned");
            window.record(success, self.runtime.circuit.error_threshold_percent)
        };
        if tripped {
            self.transition_to_open();
        }
    }

    fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        *self.opened_at.lock().expect("opened_at lock poisoned") = Some(Instant::now());
        self.window.lock().expect("window lock poisoned").reset();
        warn!("bulkhead {} circuit opened", self.name);
    }

    fn transition_to_closed(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        *self.opened_at.lock().expect("opened_at lock poisoned") = None;
        self.window.lock().expect("window lock poisoned").reset();
        info!("bulkhead {} circuit closed", self.name);
    }

    /// Current breaker state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Errors currently held in the sliding window.
    pub fn window_errors(&self) -> usize {
        self.window.lock().expect("window lock poisoned").errors
    }

    /// Permits currently available.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Process-wide registry of compartments, keyed by `service.api`.
///
/// Compartments are created lazily on first use. A config swap replaces the
/// whole map; calls already in flight finish on the compartment they
/// acquired, new calls build against the new runtime.
#[derive(Debug, Default)]
pub struct BulkheadRegistry {
    inner: RwLock<AHashMap<String, Arc<Bulkhead>>>,
}

impl BulkheadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches the compartment for `(service, api)`, creating it with the
    /// given runtime if absent.
    pub fn get_or_create(&self, service: &str, api: &str, runtime: &RuntimeConfig) -> Arc<Bulkhead> {
        let key = format!("{}.{}", service, api);
        if let Some(found) = self.inner.read().expect("registry lock poisoned").get(&key) {
            return Arc::clone(found);
        }
        let mut map = self.inner.write().expect("registry lock poisoned");
        Arc::clone(
            map.entry(key.clone())
                .or_insert_with(|| {
                    debug!("creating bulkhead {}", key);
                    Bulkhead::new(key.clone(), runtime.clone())
                }),
        )
    }

    /// Drops every compartment; they are rebuilt lazily against the new
    /// configuration. The swap is atomic at the map level.
    pub fn rebuild(&self) {
        self.inner
            .write()
            .expect("registry lock poisoned")
            .clear();
    }

    /// Snapshot of `(name, state, window_errors)` for the admin surface.
    pub fn states(&self) -> Vec<(String, CircuitState, usize)> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .iter()
            .map(|(name, b)| (name.clone(), b.state(), b.window_errors()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_trips_only_when_full() {
        let mut window = Window::new(4);
        assert!(!window.record(false, 50));
        assert!(!window.record(false, 50));
        assert!(!window.record(false, 50));
        // Fourth completion fills the window: 3/4 errors >= 50%.
        assert!(window.record(true, 50));
    }

    #[test]
    fn window_slides() {
        let mut window = Window::new(3);
        window.record(false, 100);
        window.record(true, 100);
        window.record(true, 100);
        // The failure is evicted; all three outcomes are now successes.
        assert!(!window.record(true, 34));
        assert_eq!(window.errors, 0);
    }
}
