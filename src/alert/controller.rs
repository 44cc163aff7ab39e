//! Per-zone cooldown state machine.
//!
//! Each alert-enabled zone cycles `Idle -> Intruded -> Cooldown -> Idle`.
//! A zone transitions out of cooldown only once the interval has elapsed
//! AND the zone has been observed clear since the last dispatch; continuous
//! occupancy therefore suppresses re-alerts until the intruder leaves.
//! Intrusions observed during cooldown are counted for logging but never
//! dispatched.
//!
//! State is mutated only inside the zone+alert worker; hand-off of an
//! `AlertEvent` to the blocking outbound queue commits exactly one dispatch
//! attempt per `Idle -> Intruded` transition.

use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime};

use crate::detect::Detection;
use crate::frame::Frame;
use crate::zones::Zone;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZonePhase {
    Idle,
    Intruded,
    Cooldown,
}

struct ZoneState {
    phase: ZonePhase,
    last_alert_at: Option<Instant>,
    currently_intruded: bool,
    /// True once a clear frame has been seen since the last dispatch.
    cleared_since_alert: bool,
    /// Intrusions observed while cooling down (logged, not dispatched).
    suppressed: u64,
}

impl ZoneState {
    fn new() -> Self {
        Self {
            phase: ZonePhase::Idle,
            last_alert_at: None,
            currently_intruded: false,
            cleared_since_alert: true,
            suppressed: 0,
        }
    }
}

/// Pixel snapshot carried by an alert event, decoupled from frame ownership.
#[derive(Clone, Debug)]
pub struct FrameSnapshot {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence_id: u64,
}

impl FrameSnapshot {
    pub fn of(frame: &Frame) -> Self {
        Self {
            pixels: frame.pixels.clone(),
            width: frame.width,
            height: frame.height,
            sequence_id: frame.sequence_id,
        }
    }
}

/// Emitted when a zone transitions into intrusion outside cooldown.
/// Consumed exactly once by the dispatch worker.
#[derive(Clone, Debug)]
pub struct AlertEvent {
    pub zone_id: String,
    pub detections: Vec<Detection>,
    pub snapshot: FrameSnapshot,
    pub raised_at: SystemTime,
}

/// Turns zone-intrusion observations into debounced alert events.
pub struct AlertController {
    cooldown: Duration,
    states: BTreeMap<String, ZoneState>,
}

impl AlertController {
    /// Tracks only alert-enabled zones; matches for other zones are ignored.
    pub fn new(zones: &[Zone], cooldown: Duration) -> Self {
        let states = zones
            .iter()
            .filter(|z| z.alert_enabled)
            .map(|z| (z.id.clone(), ZoneState::new()))
            .collect();
        Self { cooldown, states }
    }

    /// Feed one frame's zone matches through the state machine.
    ///
    /// `now` is injected so cooldown arithmetic is testable; production
    /// callers pass `Instant::now()`.
    pub fn observe(
        &mut self,
        now: Instant,
        matches: &BTreeMap<String, Vec<Detection>>,
        frame: &Frame,
    ) -> Vec<AlertEvent> {
        let mut events = Vec::new();

        for (zone_id, state) in &mut self.states {
            let matched = matches.get(zone_id).map(Vec::as_slice).unwrap_or(&[]);
            let occupied = !matched.is_empty();
            state.currently_intruded = occupied;

            let cooldown_elapsed = state
                .last_alert_at
                .map(|t| now.saturating_duration_since(t) >= self.cooldown)
                .unwrap_or(true);

            let mut raise = false;
            match state.phase {
                ZonePhase::Idle => {
                    if occupied {
                        raise = true;
                    }
                }
                // Transient within the raise block below; never observed
                // across calls.
                ZonePhase::Intruded => {}
                ZonePhase::Cooldown => {
                    if !occupied {
                        state.cleared_since_alert = true;
                        if cooldown_elapsed {
                            state.phase = ZonePhase::Idle;
                        }
                    } else if cooldown_elapsed && state.cleared_since_alert {
                        // Fresh entry after the zone went clear: re-alert.
                        raise = true;
                    } else {
                        state.suppressed += 1;
                        log::debug!(
                            "zone {zone_id}: intrusion during cooldown suppressed ({} total)",
                            state.suppressed
                        );
                    }
                }
            }

            if raise {
                state.phase = ZonePhase::Intruded;
                events.push(AlertEvent {
                    zone_id: zone_id.clone(),
                    detections: matched.to_vec(),
                    snapshot: FrameSnapshot::of(frame),
                    raised_at: SystemTime::now(),
                });
                // Intruded collapses straight to Cooldown: pushing the event
                // onto the blocking outbound queue is the single dispatch
                // attempt for this transition.
                state.phase = ZonePhase::Cooldown;
                state.last_alert_at = Some(now);
                state.cleared_since_alert = false;
            }
        }

        events
    }

    pub fn phase(&self, zone_id: &str) -> Option<ZonePhase> {
        self.states.get(zone_id).map(|s| s.phase)
    }

    pub fn currently_intruded(&self, zone_id: &str) -> bool {
        self.states
            .get(zone_id)
            .map(|s| s.currently_intruded)
            .unwrap_or(false)
    }

    pub fn suppressed(&self, zone_id: &str) -> u64 {
        self.states.get(zone_id).map(|s| s.suppressed).unwrap_or(0)
    }

    pub fn tracked_zones(&self) -> usize {
        self.states.len()
    }
}
