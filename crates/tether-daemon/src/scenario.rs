//! Scripted sightings played into the simulated provider

use std::collections::HashMap;
use tether_core::{
    ImagePayload, MarkerPayload, ObjectPayload, PlaneAlignment, PlaneClass, PlanePayload, Pose,
    StableId, TrackableKind, TrackingState,
};
use tether_provider::SimulatedProvider;
use tracing::{debug, info, warn};

use crate::config::{Sighting, SightingAction, SightingTarget};

/// Plays sightings in cycle order, remembering which stable id each key got
#[derive(Debug, Default)]
pub struct Scenario {
    sightings: Vec<Sighting>,
    next: usize,
    live: HashMap<String, (TrackableKind, StableId)>,
}

impl Scenario {
    pub fn new(mut sightings: Vec<Sighting>) -> Self {
        sightings.sort_by_key(|s| s.at);
        Self {
            sightings,
            next: 0,
            live: HashMap::new(),
        }
    }

    /// Sightings not yet played
    pub fn remaining(&self) -> usize {
        self.sightings.len() - self.next
    }

    pub fn stable_id(&self, key: &str) -> Option<StableId> {
        self.live.get(key).map(|(_, id)| *id)
    }

    /// Play every sighting due at or before `cycle`
    pub fn advance(&mut self, cycle: u64, provider: &mut SimulatedProvider) {
        while let Some(sighting) = self.sightings.get(self.next) {
            if sighting.at > cycle {
                break;
            }
            let sighting = sighting.clone();
            self.next += 1;
            self.play(&sighting, provider);
        }
    }

    fn play(&mut self, sighting: &Sighting, provider: &mut SimulatedProvider) {
        let kind = target_kind(&sighting.target);
        match sighting.action {
            SightingAction::Appear => {
                if self.live.contains_key(&sighting.key) {
                    warn!(key = %sighting.key, "Sighting key already live, ignoring appearance");
                    return;
                }
                let detected = match build(sighting) {
                    Built::Plane(p) => provider.detect(p),
                    Built::Object(p) => provider.detect(p),
                    Built::Marker(p) => provider.detect(p),
                    Built::Image(p) => provider.detect(p),
                };
                match detected {
                    Some(id) => {
                        info!(key = %sighting.key, kind = %kind, id = %id, "Scripted trackable appeared");
                        self.live.insert(sighting.key.clone(), (kind, id));
                    }
                    None => {
                        debug!(key = %sighting.key, kind = %kind, "Provider is not reporting this sighting")
                    }
                }
            }
            SightingAction::Move => {
                let Some(&(_, id)) = self.live.get(&sighting.key) else {
                    warn!(key = %sighting.key, "Move for unknown sighting key");
                    return;
                };
                let moved = match build(sighting) {
                    Built::Plane(p) => provider.update(id, p),
                    Built::Object(p) => provider.update(id, p),
                    Built::Marker(p) => provider.update(id, p),
                    Built::Image(p) => provider.update(id, p),
                };
                if !moved {
                    warn!(key = %sighting.key, id = %id, "Provider rejected scripted move");
                }
            }
            SightingAction::Lose => match self.live.remove(&sighting.key) {
                Some((kind, id)) => {
                    provider.lose(kind, id);
                    info!(key = %sighting.key, kind = %kind, id = %id, "Scripted trackable lost");
                }
                None => warn!(key = %sighting.key, "Loss for unknown sighting key"),
            },
        }
    }
}

enum Built {
    Plane(PlanePayload),
    Object(ObjectPayload),
    Marker(MarkerPayload),
    Image(ImagePayload),
}

fn target_kind(target: &SightingTarget) -> TrackableKind {
    match target {
        SightingTarget::Plane { .. } => TrackableKind::Plane,
        SightingTarget::Object { .. } => TrackableKind::Object,
        SightingTarget::Marker { .. } => TrackableKind::Marker,
        SightingTarget::Image { .. } => TrackableKind::Image,
    }
}

fn build(sighting: &Sighting) -> Built {
    let pose = Pose::from_position(sighting.position);
    match &sighting.target {
        SightingTarget::Plane { extents, class } => Built::Plane(PlanePayload {
            pose,
            extents: *extents,
            alignment: match class {
                PlaneClass::Floor | PlaneClass::Table => PlaneAlignment::HorizontalUp,
                PlaneClass::Ceiling => PlaneAlignment::HorizontalDown,
                PlaneClass::Wall => PlaneAlignment::Vertical,
                PlaneClass::Unknown => PlaneAlignment::Arbitrary,
            },
            class: *class,
        }),
        SightingTarget::Object { label, confidence } => Built::Object(ObjectPayload {
            pose,
            label: *label,
            confidence: *confidence,
            extents: [0.2, 0.2, 0.2],
        }),
        SightingTarget::Marker {
            scheme,
            id,
            decoded,
        } => Built::Marker(MarkerPayload {
            pose,
            scheme: *scheme,
            marker_id: *id,
            physical_size: 0.1,
            decoded: decoded.clone(),
        }),
        SightingTarget::Image { index } => Built::Image(ImagePayload {
            pose,
            reference_index: *index,
            extents: [0.3, 0.2],
            tracking_state: TrackingState::Tracking,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_provider::{LibraryProvider, SimConfig};

    fn plane_sighting(at: u64, key: &str, action: SightingAction) -> Sighting {
        Sighting {
            at,
            key: key.to_string(),
            action,
            position: [0.0, 0.0, 0.0],
            target: SightingTarget::Plane {
                extents: [2.0, 2.0],
                class: PlaneClass::Floor,
            },
        }
    }

    #[test]
    fn test_sightings_play_in_cycle_order() {
        let mut provider = SimulatedProvider::new(SimConfig::default());
        provider.set_tracking_enabled(TrackableKind::Plane, true);
        let mut scenario = Scenario::new(vec![
            plane_sighting(5, "floor", SightingAction::Lose),
            plane_sighting(1, "floor", SightingAction::Appear),
            plane_sighting(3, "floor", SightingAction::Move),
        ]);

        scenario.advance(0, &mut provider);
        assert_eq!(scenario.remaining(), 3);

        scenario.advance(1, &mut provider);
        let id = scenario.stable_id("floor").unwrap();
        assert!(provider.is_live(TrackableKind::Plane, id));

        scenario.advance(10, &mut provider);
        assert_eq!(scenario.remaining(), 0);
        assert!(!provider.is_live(TrackableKind::Plane, id));
        assert_eq!(scenario.stable_id("floor"), None);
    }

    #[test]
    fn test_untracked_kind_is_skipped() {
        let mut provider = SimulatedProvider::new(SimConfig::default());
        let mut scenario = Scenario::new(vec![plane_sighting(1, "floor", SightingAction::Appear)]);
        scenario.advance(1, &mut provider);
        assert_eq!(scenario.stable_id("floor"), None);
    }
}
