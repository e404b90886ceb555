use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Per-policy mutual exclusion for select + dispatch.
///
/// Only one firing of a policy runs at a time inside this process; other
/// policies are not blocked.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    running: Arc<Mutex<HashSet<String>>>,
}

/// Held while a firing runs; releases the policy on drop
#[derive(Debug)]
pub struct FlightGuard {
    running: Arc<Mutex<HashSet<String>>>,
    policy_id: String,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` when the policy is already running
    pub fn try_acquire(&self, policy_id: &str) -> Option<FlightGuard> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(policy_id.to_string()) {
            return None;
        }

        Some(FlightGuard {
            running: Arc::clone(&self.running),
            policy_id: policy_id.to_string(),
        })
    }

    pub fn is_running(&self, policy_id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(policy_id)
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.policy_id);
    }
}
