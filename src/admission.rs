//! Admission gate for background evaluations.
//!
//! A counting semaphore whose capacity can be changed while admissions are
//! outstanding. Growing adds credits immediately. Shrinking forgets idle
//! credits and records the rest as debt, which is paid off as outstanding
//! admissions are released, so no admitted evaluation is ever revoked.

use std::{
    cmp::Ordering as CapacityChange,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::default_admission_capacity;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Admission capacity must be between 1 and {max}, got {requested}")]
    InvalidCapacity { requested: usize, max: usize },
    #[error("Admission gate is closed")]
    Closed,
}

struct GateInner {
    permits: Arc<Semaphore>,
    capacity: Mutex<usize>,
    // credits still to be retired after a shrink
    debt: AtomicUsize,
    in_flight: AtomicUsize,
}

impl GateInner {
    fn take_debt(&self) -> bool {
        self.debt
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |debt| debt.checked_sub(1))
            .is_ok()
    }

    /// Cancels up to `credits` of debt and returns how many were cancelled.
    fn cancel_debt(&self, credits: usize) -> usize {
        let previous = self
            .debt
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |debt| {
                Some(debt.saturating_sub(credits))
            })
            .unwrap_or_default();
        previous.min(credits)
    }
}

#[derive(Clone)]
pub struct AdmissionGate {
    inner: Arc<GateInner>,
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::with_capacity(default_admission_capacity())
    }
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Result<Self, AdmissionError> {
        validate_capacity(capacity)?;
        Ok(Self::with_capacity(capacity))
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(GateInner {
                permits: Arc::new(Semaphore::new(capacity)),
                capacity: Mutex::new(capacity),
                debt: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Waits until a credit is free and takes it. There is no timeout; the
    /// only failure is a closed gate.
    pub async fn acquire(&self) -> Result<Admission, AdmissionError> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(Admission {
            permit: Some(permit),
            inner: self.inner.clone(),
        })
    }

    pub fn resize(&self, capacity: usize) -> Result<(), AdmissionError> {
        validate_capacity(capacity)?;
        let mut current = self
            .inner
            .capacity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match capacity.cmp(&*current) {
            CapacityChange::Greater => {
                let grow = capacity - *current;
                let cancelled = self.inner.cancel_debt(grow);
                if grow > cancelled {
                    self.inner.permits.add_permits(grow - cancelled);
                }
            }
            CapacityChange::Less => {
                let shrink = *current - capacity;
                let forgotten = self.inner.permits.forget_permits(shrink);
                if shrink > forgotten {
                    self.inner
                        .debt
                        .fetch_add(shrink - forgotten, Ordering::SeqCst);
                }
            }
            CapacityChange::Equal => return Ok(()),
        }

        debug!(from = *current, to = capacity, "admission capacity resized");
        *current = capacity;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        *self
            .inner
            .capacity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Refuses further admissions. Outstanding admissions are unaffected.
    pub fn close(&self) {
        self.inner.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }
}

fn validate_capacity(capacity: usize) -> Result<(), AdmissionError> {
    if capacity == 0 || capacity > Semaphore::MAX_PERMITS {
        return Err(AdmissionError::InvalidCapacity {
            requested: capacity,
            max: Semaphore::MAX_PERMITS,
        });
    }
    Ok(())
}

/// One admitted background evaluation. The credit returns to the gate on drop.
pub struct Admission {
    permit: Option<OwnedSemaphorePermit>,
    inner: Arc<GateInner>,
}

impl Admission {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(permit) = self.permit.take() {
            if self.inner.take_debt() {
                permit.forget();
            }
        }
    }
}
