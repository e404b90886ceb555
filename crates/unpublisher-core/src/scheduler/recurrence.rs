use chrono::{DateTime, Utc};

use crate::policy::Policy;

/// Outcome of checking a policy against the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub due: bool,
    pub next_due_at: Option<DateTime<Utc>>,
}

/// Decide whether a policy fires at `now`, updating its schedule in place.
///
/// A disabled policy never fires and loses its `next_due_at`. An enabled
/// policy without a schedule is seeded from its activation time. Elapsed
/// periods are not replayed: one call fires at most once.
pub fn tick(policy: &mut Policy, now: DateTime<Utc>) -> Tick {
    if !policy.enabled {
        policy.next_due_at = None;
        return Tick {
            due: false,
            next_due_at: None,
        };
    }

    let next_due_at = match policy.next_due_at {
        Some(at) => at,
        None => {
            let seeded = policy.activation_time(now);
            policy.next_due_at = Some(seeded);
            seeded
        }
    };

    if now >= next_due_at {
        fire(policy, now)
    } else {
        Tick {
            due: false,
            next_due_at: Some(next_due_at),
        }
    }
}

/// Fire regardless of the schedule (manual runs)
pub fn fire(policy: &mut Policy, now: DateTime<Utc>) -> Tick {
    let next_due_at = now + policy.recurrence.period();
    policy.last_run_at = Some(now);
    policy.next_due_at = policy.enabled.then_some(next_due_at);

    Tick {
        due: true,
        next_due_at: policy.next_due_at,
    }
}
