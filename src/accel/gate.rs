use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::foundation::error::{StratumError, StratumResult};

/// What happens when a job is submitted while every slot is taken.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Wait until a running job releases its slot.
    #[default]
    Block,
    /// Fail immediately with a resource error.
    Reject,
}

#[derive(Debug)]
struct GateState {
    active: usize,
    peak: usize,
}

#[derive(Debug)]
struct GateInner {
    limit: usize,
    state: Mutex<GateState>,
    freed: Condvar,
}

impl GateInner {
    // Poisoning only means another job panicked while holding the lock; the counters stay valid.
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Counting gate bounding how many jobs hold device resources at once.
#[derive(Clone, Debug)]
pub struct AdmissionGate {
    inner: Arc<GateInner>,
    policy: AdmissionPolicy,
}

impl AdmissionGate {
    /// A gate with `limit` slots. A limit of zero is treated as one.
    pub fn new(limit: usize, policy: AdmissionPolicy) -> Self {
        Self {
            inner: Arc::new(GateInner {
                limit: limit.max(1),
                state: Mutex::new(GateState { active: 0, peak: 0 }),
                freed: Condvar::new(),
            }),
            policy,
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Jobs currently holding a slot.
    pub fn active(&self) -> usize {
        self.inner.lock().active
    }

    /// Highest number of simultaneously admitted jobs seen so far.
    pub fn peak(&self) -> usize {
        self.inner.lock().peak
    }

    /// Take a slot, blocking or rejecting per the gate's policy.
    pub fn acquire(&self) -> StratumResult<AdmissionPermit> {
        if self.policy == AdmissionPolicy::Reject {
            return self.try_acquire().ok_or_else(|| {
                StratumError::resource(
                    "admission",
                    0,
                    format!("all {} job slots are in use", self.inner.limit),
                )
            });
        }
        let mut st = self.inner.lock();
        while st.active >= self.inner.limit {
            st = self
                .inner
                .freed
                .wait(st)
                .unwrap_or_else(|p| p.into_inner());
        }
        Ok(self.admit_locked(st))
    }

    /// Take a slot only if one is free right now, regardless of policy.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        let st = self.inner.lock();
        if st.active >= self.inner.limit {
            return None;
        }
        Some(self.admit_locked(st))
    }

    fn admit_locked(&self, mut st: MutexGuard<'_, GateState>) -> AdmissionPermit {
        st.active += 1;
        st.peak = st.peak.max(st.active);
        tracing::trace!(active = st.active, limit = self.inner.limit, "job admitted");
        AdmissionPermit {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// One admitted job's slot. Released on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    inner: Arc<GateInner>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let mut st = self.inner.lock();
        st.active = st.active.saturating_sub(1);
        drop(st);
        self.inner.freed.notify_one();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/accel/gate.rs"]
mod tests;
