//! Tracking session
//!
//! Owns the provider and one subsystem per trackable kind. The host calls
//! [`TrackingSession::tick`] once per frame; each tick pulls at most one
//! batch per kind and reports what changed.

use serde::Serialize;
use std::collections::BTreeSet;
use tether_core::{
    ActivatedConfiguration, ApplyReport, DurableId, ImagePayload, MarkerPayload, ObjectPayload,
    PersistKey, PersistState, PlanePayload, Pose, ReferenceParseError, StableId, TrackableKind,
    TrackableRegistry, ValidationErrors,
};
use tether_provider::{ProviderError, TrackingProvider};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapter::AdapterError;
use crate::anchors::AnchorSubsystem;
use crate::config::SessionConfig;
use crate::persistence::PersistenceError;
use crate::subsystem::TrackableSubsystem;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Tracking provider is not ready")]
    NotReady,
    #[error("Session already started")]
    AlreadyStarted,
    #[error("{kind} reference library has {} invalid name(s)", .errors.len())]
    InvalidReferenceNames {
        kind: TrackableKind,
        errors: Vec<ReferenceParseError>,
    },
    #[error("{kind} reference library rejected: {source}")]
    InvalidLibrary {
        kind: TrackableKind,
        #[source]
        source: ValidationErrors,
    },
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("Provider refused to enable anchor persistence")]
    PersistenceRefused,
    #[error("Session configuration rejected ({} problem(s)): {}", .0.len(), join_problems(.0))]
    InvalidConfiguration(Vec<SessionError>),
}

fn join_problems(problems: &[SessionError]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Something observable that happened during a tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Added {
        kind: TrackableKind,
        id: StableId,
    },
    Updated {
        kind: TrackableKind,
        id: StableId,
    },
    Removed {
        kind: TrackableKind,
        id: StableId,
    },
    /// A live anchor now holds a durable id
    AnchorLinked {
        id: StableId,
        durable_id: DurableId,
    },
    /// Summary closing a tick that changed something
    Cycle {
        cycle: u64,
        added: usize,
        updated: usize,
        removed: usize,
    },
}

pub struct TrackingSession<P: TrackingProvider> {
    provider: P,
    config: SessionConfig,
    cycle: u64,
    started: bool,
    planes: TrackableSubsystem<PlanePayload>,
    anchors: AnchorSubsystem,
    objects: TrackableSubsystem<ObjectPayload>,
    markers: TrackableSubsystem<MarkerPayload>,
    images: TrackableSubsystem<ImagePayload>,
}

impl<P: TrackingProvider> TrackingSession<P> {
    pub fn new(provider: P, config: SessionConfig) -> Self {
        Self {
            provider,
            config,
            cycle: 0,
            started: false,
            planes: TrackableSubsystem::new(),
            anchors: AnchorSubsystem::new(),
            objects: TrackableSubsystem::new(),
            markers: TrackableSubsystem::new(),
            images: TrackableSubsystem::new(),
        }
    }

    /// Validate configuration, activate reference libraries and enable
    /// tracking for every configured kind.
    ///
    /// Every library is validated before anything is handed to the
    /// provider, and every problem found is reported together. A
    /// reference-driven kind with an empty library is left off and reports
    /// nothing. If the provider refuses a step, the kinds already started
    /// are stopped again.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.started {
            return Err(SessionError::AlreadyStarted);
        }
        if !self.provider.is_ready() {
            return Err(SessionError::NotReady);
        }

        let activations = self.validate_libraries()?;
        if let Err(e) = self.enable(activations) {
            warn!(error = %e, "Session start failed, stopping started kinds");
            self.stop();
            return Err(e);
        }

        self.started = true;
        let kinds: Vec<&str> = TrackableKind::ALL
            .iter()
            .filter(|k| self.is_tracking(**k))
            .map(|k| k.as_str())
            .collect();
        info!(kinds = ?kinds, persistence = self.config.persistence, "Tracking session started");
        Ok(())
    }

    fn validate_libraries(&self) -> Result<Vec<ActivatedConfiguration>, SessionError> {
        let mut activations = Vec::new();
        let mut problems = Vec::new();
        for kind in [TrackableKind::Object, TrackableKind::Marker, TrackableKind::Image] {
            if !self.config.is_enabled(kind) {
                continue;
            }
            let library = match self.config.library(kind) {
                Ok(library) => library,
                Err(errors) => {
                    problems.push(SessionError::InvalidReferenceNames { kind, errors });
                    continue;
                }
            };
            if library.entries().is_empty() {
                info!(kind = %kind, "No reference library configured, kind stays silent");
                continue;
            }
            match library.build() {
                Ok(activated) => activations.push(activated),
                Err(source) => problems.push(SessionError::InvalidLibrary { kind, source }),
            }
        }
        if problems.is_empty() {
            Ok(activations)
        } else {
            Err(SessionError::InvalidConfiguration(problems))
        }
    }

    fn enable(&mut self, activations: Vec<ActivatedConfiguration>) -> Result<(), SessionError> {
        for activated in activations {
            self.configure(activated)?;
        }
        if self.config.planes {
            self.planes.start(&mut self.provider)?;
        }
        if self.config.anchors {
            self.anchors.start(&mut self.provider)?;
        }
        if self.objects.adapter().configuration().is_some() {
            self.objects.start(&mut self.provider)?;
        }
        if self.markers.adapter().configuration().is_some() {
            self.markers.start(&mut self.provider)?;
        }
        if self.images.adapter().configuration().is_some() {
            self.images.start(&mut self.provider)?;
        }
        if self.config.anchors
            && self.config.persistence
            && !self.anchors.set_persistence_enabled(&mut self.provider, true)
        {
            return Err(SessionError::PersistenceRefused);
        }
        Ok(())
    }

    fn configure(&mut self, activated: ActivatedConfiguration) -> Result<(), AdapterError> {
        match activated.kind() {
            TrackableKind::Object => self.objects.configure(&mut self.provider, activated),
            TrackableKind::Marker => self.markers.configure(&mut self.provider, activated),
            TrackableKind::Image => self.images.configure(&mut self.provider, activated),
            TrackableKind::Plane | TrackableKind::Anchor => Ok(()),
        }
    }

    /// Stop every kind and evict all live trackables
    pub fn stop(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        let evicted = [
            (TrackableKind::Plane, self.planes.stop(&mut self.provider)),
            (TrackableKind::Anchor, self.anchors.stop(&mut self.provider)),
            (TrackableKind::Object, self.objects.stop(&mut self.provider)),
            (TrackableKind::Marker, self.markers.stop(&mut self.provider)),
            (TrackableKind::Image, self.images.stop(&mut self.provider)),
        ];
        for (kind, ids) in evicted {
            events.extend(ids.into_iter().map(|id| SessionEvent::Removed { kind, id }));
        }
        if self.started {
            info!(cycle = self.cycle, evicted = events.len(), "Tracking session stopped");
        }
        self.started = false;
        events
    }

    /// Run one synchronization cycle.
    ///
    /// Does nothing until the session is started and the provider is
    /// actively tracking.
    pub fn tick(&mut self) -> Vec<SessionEvent> {
        if !self.started || !self.provider.is_ready() || !self.provider.is_tracking_active() {
            return Vec::new();
        }
        self.cycle += 1;
        let cycle = self.cycle;
        let mut events = Vec::new();

        let report = self.planes.sync(&mut self.provider, cycle);
        push_report(&mut events, TrackableKind::Plane, &report);

        let (report, linked) = self.anchors.sync(&mut self.provider, cycle);
        push_report(&mut events, TrackableKind::Anchor, &report);
        events.extend(
            linked
                .into_iter()
                .map(|(id, durable_id)| SessionEvent::AnchorLinked { id, durable_id }),
        );

        let report = self.objects.sync(&mut self.provider, cycle);
        push_report(&mut events, TrackableKind::Object, &report);
        let report = self.markers.sync(&mut self.provider, cycle);
        push_report(&mut events, TrackableKind::Marker, &report);
        let report = self.images.sync(&mut self.provider, cycle);
        push_report(&mut events, TrackableKind::Image, &report);

        if !events.is_empty() {
            let count = |f: fn(&SessionEvent) -> bool| events.iter().filter(|e| f(e)).count();
            let summary = SessionEvent::Cycle {
                cycle,
                added: count(|e| matches!(e, SessionEvent::Added { .. })),
                updated: count(|e| matches!(e, SessionEvent::Updated { .. })),
                removed: count(|e| matches!(e, SessionEvent::Removed { .. })),
            };
            debug!(?summary, "Cycle complete");
            events.push(summary);
        }
        events
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    /// End the session and hand the provider back
    pub fn into_provider(mut self) -> P {
        self.stop();
        self.provider
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of cycles processed so far
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_tracking(&self, kind: TrackableKind) -> bool {
        match kind {
            TrackableKind::Plane => self.planes.is_started(),
            TrackableKind::Anchor => self.anchors.is_started(),
            TrackableKind::Object => self.objects.is_started(),
            TrackableKind::Marker => self.markers.is_started(),
            TrackableKind::Image => self.images.is_started(),
        }
    }

    /// Reference library activated for a kind, if any
    pub fn library(&self, kind: TrackableKind) -> Option<&ActivatedConfiguration> {
        match kind {
            TrackableKind::Object => self.objects.adapter().configuration(),
            TrackableKind::Marker => self.markers.adapter().configuration(),
            TrackableKind::Image => self.images.adapter().configuration(),
            TrackableKind::Plane | TrackableKind::Anchor => None,
        }
    }

    /// Batches dropped as malformed, per kind
    pub fn dropped_batches(&self, kind: TrackableKind) -> usize {
        match kind {
            TrackableKind::Plane => self.planes.dropped_batches(),
            TrackableKind::Anchor => self.anchors.dropped_batches(),
            TrackableKind::Object => self.objects.dropped_batches(),
            TrackableKind::Marker => self.markers.dropped_batches(),
            TrackableKind::Image => self.images.dropped_batches(),
        }
    }

    pub fn planes(&self) -> &TrackableRegistry<PlanePayload> {
        self.planes.registry()
    }

    pub fn anchors(&self) -> &AnchorSubsystem {
        &self.anchors
    }

    pub fn objects(&self) -> &TrackableRegistry<ObjectPayload> {
        self.objects.registry()
    }

    pub fn markers(&self) -> &TrackableRegistry<MarkerPayload> {
        self.markers.registry()
    }

    pub fn images(&self) -> &TrackableRegistry<ImagePayload> {
        self.images.registry()
    }

    // Anchor requests

    pub fn create_anchor(&mut self, pose: Pose) -> Result<StableId, ProviderError> {
        self.anchors.create(&mut self.provider, pose)
    }

    pub fn destroy_anchor(&mut self, id: StableId) -> bool {
        let destroyed = self.anchors.destroy(&mut self.provider, id);
        if !destroyed {
            warn!(id = %id, "Destroy requested for unknown anchor");
        }
        destroyed
    }

    pub fn set_persistence_enabled(&mut self, enabled: bool) -> bool {
        self.anchors.set_persistence_enabled(&mut self.provider, enabled)
    }

    pub fn persistence_enabled(&self) -> bool {
        self.provider.persistence_enabled()
    }

    pub fn persist(&mut self, id: StableId) -> Result<DurableId, PersistenceError> {
        self.anchors.persist(&mut self.provider, id)
    }

    pub fn persist_state(&mut self, key: impl Into<PersistKey>) -> Result<PersistState, PersistenceError> {
        self.anchors.persist_state(&self.provider, key)
    }

    pub fn load(&mut self, id: DurableId) -> Result<Option<StableId>, PersistenceError> {
        self.anchors.load(&mut self.provider, id)
    }

    pub fn unpersist(&mut self, key: impl Into<PersistKey>) -> Result<(), PersistenceError> {
        self.anchors.unpersist(&mut self.provider, key)
    }

    pub fn enumerate_durable_ids(&mut self) -> BTreeSet<DurableId> {
        self.anchors.enumerate_durable_ids(&self.provider)
    }

    pub fn persistent_id(&self, id: StableId) -> Option<DurableId> {
        self.anchors.persistent_id(id)
    }

    pub fn stable_id(&self, id: DurableId) -> Option<StableId> {
        self.anchors.stable_id(id)
    }
}

/// Events for one applied batch, in application order
fn push_report(events: &mut Vec<SessionEvent>, kind: TrackableKind, report: &ApplyReport) {
    events.extend(report.removed.iter().map(|&id| SessionEvent::Removed { kind, id }));
    events.extend(report.added.iter().map(|&id| SessionEvent::Added { kind, id }));
    events.extend(report.updated.iter().map(|&id| SessionEvent::Updated { kind, id }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReferenceConfig;
    use crate::wait::{LoadWait, PersistWait, WaitStatus};
    use std::time::Duration;
    use tether_core::{
        DurableStore, PlaneAlignment, PlaneClass, ReferenceScheme, ReferenceViolation,
    };
    use tether_provider::{encode_record, SimChange, SimConfig, SimulatedProvider};

    const FRAME: Duration = Duration::from_millis(16);

    fn persistent_config() -> SessionConfig {
        SessionConfig {
            persistence: true,
            ..SessionConfig::default()
        }
    }

    fn sim(store: DurableStore) -> SimulatedProvider {
        SimulatedProvider::with_store(
            SimConfig {
                persist_latency_ticks: 3,
                load_latency_ticks: 2,
            },
            store,
        )
    }

    fn frame(session: &mut TrackingSession<SimulatedProvider>) -> Vec<SessionEvent> {
        session.provider_mut().tick();
        session.tick()
    }

    fn table() -> PlanePayload {
        PlanePayload {
            pose: Pose::from_position([0.0, 0.7, 0.0]),
            extents: [1.2, 0.8],
            alignment: PlaneAlignment::HorizontalUp,
            class: PlaneClass::Table,
        }
    }

    fn marker(scheme: ReferenceScheme, marker_id: u32) -> MarkerPayload {
        MarkerPayload {
            pose: Pose::IDENTITY,
            scheme,
            marker_id,
            physical_size: 0.1,
            decoded: None,
        }
    }

    #[test]
    fn test_anchor_survives_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anchors.json");

        let mut first = TrackingSession::new(sim(DurableStore::open(&path).unwrap()), persistent_config());
        first.start().unwrap();
        let stable = first.create_anchor(Pose::from_position([1.0, 0.0, 2.0])).unwrap();
        assert!(first.anchors().registry().is_empty());
        frame(&mut first);
        assert!(first.anchors().registry().contains(stable));

        let durable = first.persist(stable).unwrap();
        let mut wait = PersistWait::new(durable).with_timeout(Duration::from_secs(1));
        let mut status = WaitStatus::Waiting;
        for _ in 0..10 {
            frame(&mut first);
            status = wait.poll(&mut first, FRAME);
            if status.is_finished() {
                break;
            }
        }
        assert_eq!(status, WaitStatus::Reached(PersistState::Persisted));
        drop(first);

        let mut second = TrackingSession::new(sim(DurableStore::open(&path).unwrap()), persistent_config());
        second.start().unwrap();
        assert!(second.enumerate_durable_ids().contains(&durable));
        assert_eq!(second.load(durable), Ok(None));

        let mut wait = LoadWait::new(durable).with_timeout(Duration::from_secs(1));
        let mut status = WaitStatus::Waiting;
        for _ in 0..10 {
            frame(&mut second);
            status = wait.poll(&second, FRAME);
            if status.is_finished() {
                break;
            }
        }
        let reloaded = match status {
            WaitStatus::Reached(id) => id,
            other => panic!("anchor never loaded: {other:?}"),
        };
        assert!(second.anchors().registry().contains(reloaded));
        assert_eq!(second.persistent_id(reloaded), Some(durable));
        assert_eq!(second.persist_state(reloaded), Ok(PersistState::Persisted));
    }

    #[test]
    fn test_unpersist_without_live_anchor() {
        let store = {
            let mut first = TrackingSession::new(sim(DurableStore::in_memory()), persistent_config());
            first.start().unwrap();
            let stable = first.create_anchor(Pose::IDENTITY).unwrap();
            frame(&mut first);
            first.persist(stable).unwrap();
            for _ in 0..3 {
                frame(&mut first);
            }
            first.into_provider().into_store()
        };
        let durable = store.ids()[0];

        let mut second = TrackingSession::new(sim(store), persistent_config());
        second.start().unwrap();
        assert_eq!(second.stable_id(durable), None);
        second.unpersist(durable).unwrap();
        assert!(!second.enumerate_durable_ids().contains(&durable));
        assert!(second.persist_state(durable).is_err());
    }

    #[test]
    fn test_persist_wait_times_out_when_writes_stall() {
        let mut session = TrackingSession::new(
            SimulatedProvider::new(SimConfig {
                persist_latency_ticks: 100,
                ..SimConfig::default()
            }),
            persistent_config(),
        );
        session.start().unwrap();
        let stable = session.create_anchor(Pose::IDENTITY).unwrap();
        frame(&mut session);
        session.persist(stable).unwrap();

        let mut wait = PersistWait::new(stable).with_timeout(FRAME * 3);
        let statuses: Vec<_> = (0..3)
            .map(|_| {
                frame(&mut session);
                wait.poll(&mut session, FRAME)
            })
            .collect();
        assert_eq!(statuses[1], WaitStatus::Waiting);
        assert_eq!(statuses[2], WaitStatus::TimedOut);
    }

    #[test]
    fn test_persistence_disabled_by_default() {
        let mut session = TrackingSession::new(SimulatedProvider::new(SimConfig::default()), SessionConfig::default());
        session.start().unwrap();
        let stable = session.create_anchor(Pose::IDENTITY).unwrap();
        frame(&mut session);
        assert_eq!(session.persist(stable), Err(PersistenceError::Disabled));

        assert!(session.set_persistence_enabled(true));
        assert!(session.persist(stable).is_ok());
    }

    #[test]
    fn test_tick_reports_changes_in_order() {
        let mut session = TrackingSession::new(SimulatedProvider::new(SimConfig::default()), SessionConfig::default());
        session.start().unwrap();
        assert!(session.tick().is_empty());

        let id = session.provider_mut().detect(table()).unwrap();
        let events = session.tick();
        assert_eq!(
            events,
            vec![
                SessionEvent::Added { kind: TrackableKind::Plane, id },
                SessionEvent::Cycle { cycle: 2, added: 1, updated: 0, removed: 0 },
            ]
        );

        session.provider_mut().push_change(TrackableKind::Plane, SimChange::Removed(id));
        session
            .provider_mut()
            .push_change(TrackableKind::Plane, SimChange::Added(encode_record(id, &table())));
        let events = session.tick();
        assert_eq!(events[0], SessionEvent::Removed { kind: TrackableKind::Plane, id });
        assert_eq!(events[1], SessionEvent::Added { kind: TrackableKind::Plane, id });
        assert_eq!(session.planes().len(), 1);
    }

    #[test]
    fn test_markers_without_library_report_nothing() {
        let config = SessionConfig {
            markers: true,
            ..SessionConfig::default()
        };
        let mut session = TrackingSession::new(SimulatedProvider::new(SimConfig::default()), config);
        session.start().unwrap();
        assert!(!session.is_tracking(TrackableKind::Marker));

        assert!(session.provider_mut().detect(marker(ReferenceScheme::Qr, 0)).is_none());
        for _ in 0..5 {
            assert!(session.tick().is_empty());
        }
        assert!(session.markers().is_empty());
    }

    #[test]
    fn test_markers_follow_library() {
        let config = SessionConfig {
            markers: true,
            marker_library: vec![ReferenceConfig::named("aruco4x4_50-3")],
            ..SessionConfig::default()
        };
        let mut session = TrackingSession::new(SimulatedProvider::new(SimConfig::default()), config);
        session.start().unwrap();
        assert!(session.library(TrackableKind::Marker).is_some());

        let provider = session.provider_mut();
        assert!(provider.detect(marker(ReferenceScheme::Aruco4x4_50, 4)).is_none());
        let id = provider.detect(marker(ReferenceScheme::Aruco4x4_50, 3)).unwrap();
        session.tick();
        assert_eq!(session.markers().ids(), vec![id]);
    }

    #[test]
    fn test_invalid_library_blocks_start() {
        let config = SessionConfig {
            markers: true,
            marker_library: vec![ReferenceConfig::named("qr"), ReferenceConfig::named("qr-3")],
            ..SessionConfig::default()
        };
        let mut session = TrackingSession::new(SimulatedProvider::new(SimConfig::default()), config);

        let (kind, source) = match session.start() {
            Err(SessionError::InvalidConfiguration(mut problems)) if problems.len() == 1 => {
                match problems.remove(0) {
                    SessionError::InvalidLibrary { kind, source } => (kind, source),
                    other => panic!("unexpected problem: {other:?}"),
                }
            }
            other => panic!("unexpected start result: {other:?}"),
        };
        assert_eq!(kind, TrackableKind::Marker);
        assert_eq!(
            source.violations(),
            &[ReferenceViolation::MatchAllConflict(ReferenceScheme::Qr)]
        );
        assert!(session.provider().library(TrackableKind::Marker).is_none());
        assert!(!session.is_started());
    }

    #[test]
    fn test_idle_provider_skips_cycles() {
        let mut provider = SimulatedProvider::new(SimConfig::default());
        provider.set_ready(false);
        let mut session = TrackingSession::new(provider, SessionConfig::default());
        assert!(matches!(session.start(), Err(SessionError::NotReady)));

        session.provider_mut().set_ready(true);
        session.start().unwrap();
        assert!(matches!(session.start(), Err(SessionError::AlreadyStarted)));

        session.provider_mut().set_running(false);
        session.provider_mut().detect(table());
        assert!(session.tick().is_empty());
        assert_eq!(session.cycle(), 0);

        session.provider_mut().set_running(true);
        assert_eq!(session.tick().len(), 2);
        assert_eq!(session.cycle(), 1);
    }

    #[test]
    fn test_stop_evicts_everything() {
        let mut session = TrackingSession::new(SimulatedProvider::new(SimConfig::default()), SessionConfig::default());
        session.start().unwrap();
        let plane = session.provider_mut().detect(table()).unwrap();
        let anchor = session.create_anchor(Pose::IDENTITY).unwrap();
        session.tick();

        let events = session.stop();
        assert!(events.contains(&SessionEvent::Removed { kind: TrackableKind::Plane, id: plane }));
        assert!(events.contains(&SessionEvent::Removed { kind: TrackableKind::Anchor, id: anchor }));
        assert!(session.planes().is_empty());
        assert!(session.tick().is_empty());
    }

    #[test]
    fn test_every_library_problem_is_reported() {
        let config = SessionConfig {
            objects: true,
            markers: true,
            object_library: vec![ReferenceConfig::named("object-x")],
            marker_library: vec![ReferenceConfig::named("qr"), ReferenceConfig::named("qr-3")],
            ..SessionConfig::default()
        };
        let mut session = TrackingSession::new(SimulatedProvider::new(SimConfig::default()), config);

        let problems = match session.start() {
            Err(SessionError::InvalidConfiguration(problems)) => problems,
            other => panic!("unexpected start result: {other:?}"),
        };
        assert_eq!(problems.len(), 2);
        assert!(matches!(
            problems[0],
            SessionError::InvalidReferenceNames { kind: TrackableKind::Object, .. }
        ));
        assert!(matches!(
            problems[1],
            SessionError::InvalidLibrary { kind: TrackableKind::Marker, .. }
        ));
        assert!(!session.provider().is_tracking_enabled(TrackableKind::Plane));
        assert!(!session.provider().is_tracking_enabled(TrackableKind::Anchor));
    }

    #[test]
    fn test_refused_persistence_stops_started_kinds() {
        let mut provider = SimulatedProvider::new(SimConfig::default());
        provider.set_persistence_supported(false);
        let mut session = TrackingSession::new(provider, persistent_config());

        assert!(matches!(session.start(), Err(SessionError::PersistenceRefused)));
        assert!(!session.is_started());
        assert!(!session.is_tracking(TrackableKind::Plane));
        assert!(!session.is_tracking(TrackableKind::Anchor));
        assert!(!session.provider().is_tracking_enabled(TrackableKind::Plane));
        assert!(!session.provider().is_tracking_enabled(TrackableKind::Anchor));

        session.provider_mut().set_persistence_supported(true);
        session.start().unwrap();
        assert!(session.persistence_enabled());
        assert!(session.is_tracking(TrackableKind::Anchor));
    }
}
