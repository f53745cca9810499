//! Application state management

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{DurableStore, TrackableKind};
use tether_provider::SimulatedProvider;
use tether_sync::{SessionEvent, TrackingSession};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info};

use crate::config::Config;
use crate::scenario::Scenario;

pub type Session = TrackingSession<SimulatedProvider>;

/// Shared application state
pub struct AppState {
    /// Tracking session driven by the frame loop
    pub session: RwLock<Session>,
    /// Scripted sightings, advanced once per cycle
    scenario: Mutex<Scenario>,
    /// Configuration
    pub config: Config,
    pub started_at: DateTime<Utc>,
    /// Event broadcast for WebSocket clients
    pub events: broadcast::Sender<SessionEvent>,
}

/// Per-kind view of the session
#[derive(Debug, Clone, Serialize)]
pub struct KindStatus {
    pub kind: TrackableKind,
    pub tracking: bool,
    pub live: usize,
    pub dropped_batches: usize,
}

/// Session overview for the API and headless summaries
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub cycle: u64,
    pub started: bool,
    pub started_at: DateTime<Utc>,
    pub persistence_enabled: bool,
    pub durable_anchors: usize,
    pub kinds: Vec<KindStatus>,
}

impl AppState {
    /// Create new application state and start the session
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let store = DurableStore::open(&config.store.path)
            .with_context(|| format!("Failed to open anchor store {}", config.store.path))?;
        info!(path = %config.store.path, anchors = store.len(), "Durable anchor store ready");

        let provider = SimulatedProvider::with_store(config.simulation.provider.clone(), store);
        let mut session = TrackingSession::new(provider, config.session.clone());
        session.start().context("Failed to start tracking session")?;

        let scenario = Scenario::new(config.simulation.sightings.clone());

        // Create event channel
        let (events, _) = broadcast::channel(256);

        Ok(Arc::new(Self {
            session: RwLock::new(session),
            scenario: Mutex::new(scenario),
            config,
            started_at: Utc::now(),
            events,
        }))
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Advance the simulated runtime one tick, play due sightings, then run
    /// one synchronization cycle and broadcast its events
    pub async fn run_cycle(&self) -> Vec<SessionEvent> {
        let mut session = self.session.write().await;
        let mut scenario = self.scenario.lock().await;

        let next_cycle = session.cycle() + 1;
        let provider = session.provider_mut();
        provider.tick();
        scenario.advance(next_cycle, provider);

        let events = session.tick();
        for event in &events {
            // No subscribers is fine
            let _ = self.events.send(event.clone());
        }
        events
    }

    /// Drive cycles at the configured rate until the task is dropped
    pub fn spawn_frame_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = self.clone();
        let period = cycle_period(state.config.daemon.cycle_hz);
        info!(period_ms = period.as_millis() as u64, "Starting frame loop");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let events = state.run_cycle().await;
                if !events.is_empty() {
                    debug!(events = events.len(), "Cycle produced events");
                }
            }
        })
    }

    pub async fn status(&self) -> SessionStatus {
        let session = self.session.read().await;
        SessionStatus {
            cycle: session.cycle(),
            started: session.is_started(),
            started_at: self.started_at,
            persistence_enabled: session.persistence_enabled(),
            durable_anchors: session.provider().store().len(),
            kinds: TrackableKind::ALL
                .into_iter()
                .map(|kind| KindStatus {
                    kind,
                    tracking: session.is_tracking(kind),
                    live: live_count(&session, kind),
                    dropped_batches: session.dropped_batches(kind),
                })
                .collect(),
        }
    }
}

pub fn live_count(session: &Session, kind: TrackableKind) -> usize {
    match kind {
        TrackableKind::Plane => session.planes().len(),
        TrackableKind::Anchor => session.anchors().registry().len(),
        TrackableKind::Object => session.objects().len(),
        TrackableKind::Marker => session.markers().len(),
        TrackableKind::Image => session.images().len(),
    }
}

fn cycle_period(cycle_hz: f64) -> Duration {
    if cycle_hz.is_finite() && cycle_hz > 0.0 {
        Duration::from_secs_f64(1.0 / cycle_hz)
    } else {
        Duration::from_secs(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Sighting, SightingAction, SightingTarget};
    use tether_core::PlaneClass;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.store.path = dir.path().join("anchors.json").display().to_string();
        config.session.persistence = true;
        config.simulation.provider.persist_latency_ticks = 1;
        config.simulation.sightings = vec![Sighting {
            at: 1,
            key: "floor".to_string(),
            action: SightingAction::Appear,
            position: [0.0, 0.0, 0.0],
            target: SightingTarget::Plane {
                extents: [3.0, 3.0],
                class: PlaneClass::Floor,
            },
        }];
        config
    }

    #[tokio::test]
    async fn test_cycles_play_scenario_and_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(test_config(&dir)).unwrap();
        let mut rx = state.subscribe();

        let events = state.run_cycle().await;
        assert!(matches!(
            events[0],
            SessionEvent::Added {
                kind: TrackableKind::Plane,
                ..
            }
        ));
        assert_eq!(rx.recv().await.unwrap(), events[0]);

        let status = state.status().await;
        assert_eq!(status.cycle, 1);
        assert!(status.persistence_enabled);
        let planes = status.kinds.iter().find(|k| k.kind == TrackableKind::Plane).unwrap();
        assert_eq!(planes.live, 1);
    }

    #[test]
    fn test_cycle_period_guards_bad_rates() {
        assert_eq!(cycle_period(0.0), Duration::from_secs(1));
        assert_eq!(cycle_period(f64::NAN), Duration::from_secs(1));
        assert_eq!(cycle_period(4.0), Duration::from_millis(250));
    }
}
