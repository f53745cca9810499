//! Cycle-driven waits for asynchronous anchor persistence
//!
//! Nothing here blocks. The host polls a wait once per cycle, passing the
//! time elapsed since the previous poll, until it reports a terminal status.

use std::time::Duration;
use tether_core::{DurableId, PersistKey, PersistState, StableId};
use tether_provider::TrackingProvider;

use crate::persistence::PersistenceError;
use crate::session::TrackingSession;

#[derive(Debug, Clone, PartialEq)]
pub enum WaitStatus<T> {
    Waiting,
    Reached(T),
    TimedOut,
    Failed(PersistenceError),
}

impl<T> WaitStatus<T> {
    pub fn is_finished(&self) -> bool {
        !matches!(self, WaitStatus::Waiting)
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    timeout: Option<Duration>,
    elapsed: Duration,
}

impl Deadline {
    fn new() -> Self {
        Self {
            timeout: None,
            elapsed: Duration::ZERO,
        }
    }

    fn resolve<T>(&mut self, dt: Duration, observed: Result<Option<T>, PersistenceError>) -> WaitStatus<T> {
        self.elapsed += dt;
        match observed {
            Err(e) => WaitStatus::Failed(e),
            Ok(Some(value)) => WaitStatus::Reached(value),
            Ok(None) if self.timeout.is_some_and(|t| self.elapsed >= t) => WaitStatus::TimedOut,
            Ok(None) => WaitStatus::Waiting,
        }
    }
}

/// Waits for an anchor to reach a persistence state
#[derive(Debug, Clone)]
pub struct PersistWait {
    key: PersistKey,
    target: PersistState,
    deadline: Deadline,
}

impl PersistWait {
    /// Wait for `key` to become [`PersistState::Persisted`]
    pub fn new(key: impl Into<PersistKey>) -> Self {
        Self {
            key: key.into(),
            target: PersistState::Persisted,
            deadline: Deadline::new(),
        }
    }

    pub fn until(mut self, target: PersistState) -> Self {
        self.target = target;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline.timeout = Some(timeout);
        self
    }

    pub fn key(&self) -> PersistKey {
        self.key
    }

    pub fn elapsed(&self) -> Duration {
        self.deadline.elapsed
    }

    pub fn poll<P: TrackingProvider>(
        &mut self,
        session: &mut TrackingSession<P>,
        dt: Duration,
    ) -> WaitStatus<PersistState> {
        let observed = session
            .persist_state(self.key)
            .map(|state| (state == self.target).then_some(state));
        self.deadline.resolve(dt, observed)
    }
}

/// Waits for a loaded anchor to become live
#[derive(Debug, Clone)]
pub struct LoadWait {
    durable: DurableId,
    deadline: Deadline,
}

impl LoadWait {
    pub fn new(durable: DurableId) -> Self {
        Self {
            durable,
            deadline: Deadline::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline.timeout = Some(timeout);
        self
    }

    pub fn durable_id(&self) -> DurableId {
        self.durable
    }

    pub fn elapsed(&self) -> Duration {
        self.deadline.elapsed
    }

    pub fn poll<P: TrackingProvider>(&mut self, session: &TrackingSession<P>, dt: Duration) -> WaitStatus<StableId> {
        let observed = Ok(session.stable_id(self.durable));
        self.deadline.resolve(dt, observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(16);

    #[test]
    fn test_deadline_times_out() {
        let mut deadline = Deadline {
            timeout: Some(Duration::from_millis(40)),
            elapsed: Duration::ZERO,
        };
        assert_eq!(deadline.resolve::<u32>(FRAME, Ok(None)), WaitStatus::Waiting);
        assert_eq!(deadline.resolve::<u32>(FRAME, Ok(None)), WaitStatus::Waiting);
        assert_eq!(deadline.resolve::<u32>(FRAME, Ok(None)), WaitStatus::TimedOut);
    }

    #[test]
    fn test_reached_beats_timeout() {
        let mut deadline = Deadline {
            timeout: Some(Duration::ZERO),
            elapsed: Duration::ZERO,
        };
        assert_eq!(deadline.resolve(FRAME, Ok(Some(3))), WaitStatus::Reached(3));
    }

    #[test]
    fn test_no_timeout_waits_forever() {
        let mut deadline = Deadline::new();
        for _ in 0..1000 {
            assert_eq!(deadline.resolve::<u32>(Duration::from_secs(1), Ok(None)), WaitStatus::Waiting);
        }
        assert!(!WaitStatus::<u32>::Waiting.is_finished());
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut deadline = Deadline::new();
        let status = deadline.resolve::<u32>(FRAME, Err(PersistenceError::Disabled));
        assert!(status.is_finished());
        assert_eq!(status, WaitStatus::Failed(PersistenceError::Disabled));
    }
}
