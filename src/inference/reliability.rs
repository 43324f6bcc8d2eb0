use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::inference::{
    error::{InferenceError, InferenceErrorKind},
    types::{ReliabilityConfig, ServiceId},
};

/// Per-service circuit breaker shared by every clone of the inference client.
#[derive(Clone)]
pub struct ReliabilityLayer {
    config: ReliabilityConfig,
    breakers: Arc<Mutex<HashMap<ServiceId, BreakerState>>>,
}

#[derive(Debug, Clone, Default)]
struct BreakerState {
    failure_streak: u32,
    open_until: Option<Instant>,
    trial_in_flight: bool,
}

/// Admission for one call. A half-open trial that is dropped before its
/// outcome is recorded hands the trial slot back.
#[must_use]
pub struct CallPermit {
    layer: ReliabilityLayer,
    service_id: ServiceId,
    trial: bool,
    settled: bool,
}

impl CallPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.layer.record_success(&self.service_id);
    }

    pub fn record_failure(mut self, count_toward_breaker: bool) {
        self.settled = true;
        self.layer
            .record_failure(&self.service_id, count_toward_breaker);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.layer.release_trial(&self.service_id);
        }
    }
}

impl ReliabilityLayer {
    pub fn new(config: ReliabilityConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ServiceId, BreakerState>> {
        self.breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn ensure_service_allowed(&self, service_id: &str) -> Result<CallPermit, InferenceError> {
        let now = Instant::now();
        let mut guard = self.lock();
        let state = guard.entry(service_id.to_string()).or_default();

        let mut trial = false;
        if let Some(open_until) = state.open_until {
            if now < open_until {
                return Err(InferenceError::new(
                    InferenceErrorKind::CircuitOpen,
                    format!("circuit breaker is open for service '{}'", service_id),
                )
                .with_retryable(false)
                .with_service_id(service_id));
            }

            if state.trial_in_flight {
                return Err(InferenceError::new(
                    InferenceErrorKind::CircuitOpen,
                    format!(
                        "half-open trial call is already in flight for service '{}'",
                        service_id
                    ),
                )
                .with_retryable(false)
                .with_service_id(service_id));
            }

            state.trial_in_flight = true;
            trial = true;
        }

        Ok(CallPermit {
            layer: self.clone(),
            service_id: service_id.to_string(),
            trial,
            settled: false,
        })
    }

    pub fn record_success(&self, service_id: &str) {
        let mut guard = self.lock();
        let state = guard.entry(service_id.to_string()).or_default();
        state.failure_streak = 0;
        state.open_until = None;
        state.trial_in_flight = false;
    }

    pub fn record_failure(&self, service_id: &str, count_toward_breaker: bool) {
        let mut guard = self.lock();
        let state = guard.entry(service_id.to_string()).or_default();
        state.trial_in_flight = false;

        if !count_toward_breaker {
            return;
        }

        state.failure_streak = state.failure_streak.saturating_add(1);
        if state.failure_streak >= self.config.breaker_failure_threshold.max(1) {
            state.open_until =
                Some(Instant::now() + Duration::from_millis(self.config.breaker_open_ms.max(1)));
        }
    }

    fn release_trial(&self, service_id: &str) {
        if let Some(state) = self.lock().get_mut(service_id) {
            state.trial_in_flight = false;
        }
    }

    pub fn counts_toward_breaker(err: &InferenceError) -> bool {
        matches!(
            err.kind,
            InferenceErrorKind::BackendTransient
                | InferenceErrorKind::Timeout
                | InferenceErrorKind::RateLimited
        )
    }
}
