use libm::sqrtf;
use scarab_geom::{Anomalies, Frame, Kinematics};

use crate::{MachineState, Segment, SegmentQueue, MIN_MOVE};

/// What happened to one move.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MoveSummary {
    /// How many segments were enqueued. Zero means the move was dropped.
    pub segments: u32,
    /// The number of segments whose inverse transform needed correcting.
    pub corrected: u32,
    /// The corrections made to the first such segment.
    pub first_anomalies: Anomalies,
}

/// Splits the move from `current_position` to `destination` into short straight
/// pieces, transforms each endpoint and enqueues it.
///
/// On a SCARA arm a straight line in actuator space is a curve on the bed, so the
/// pieces have to be short; we aim for `segments_per_second` of them per second of
/// motion. `current_position` is only updated once the whole move is queued.
pub fn segment_and_emit(
    state: &mut MachineState,
    kinematics: &dyn Kinematics,
    frame: &Frame<'_>,
    segments_per_second: f32,
    queue: &mut dyn SegmentQueue,
) -> MoveSummary {
    if state.soft_endstops_enabled {
        state.clamp_to_soft_endstops();
    }

    let mut difference = [0.0f32; 4];
    for (i, d) in difference.iter_mut().enumerate() {
        *d = state.destination[i] - state.current_position[i];
    }

    let mut length = sqrtf(difference[..3].iter().map(|d| d * d).sum::<f32>());
    if length < MIN_MOVE {
        length = difference[3].abs();
    }
    if length < MIN_MOVE {
        log::trace!("dropping empty move");
        return MoveSummary::default();
    }

    let seconds = 6000.0 * length / state.feed_rate / state.feed_multiplier;
    if !(seconds.is_finite() && seconds > 0.0) {
        log::warn!(
            "dropping move at feed rate {} and multiplier {}%",
            state.feed_rate,
            state.feed_multiplier
        );
        return MoveSummary::default();
    }
    let count = ((segments_per_second * seconds) as u32).max(1);
    let feed_rate = state.feed_rate * state.feed_multiplier / 60.0 / 100.0;
    log::trace!("{length:.3}mm over {seconds:.3}s in {count} segments");

    let mut summary = MoveSummary {
        segments: count,
        ..Default::default()
    };
    let start = state.current_position;
    for s in 1..=count {
        let fraction = s as f32 / count as f32;
        let mut waypoint = [0.0f32; 4];
        for i in 0..4 {
            waypoint[i] = start[i] + difference[i] * fraction;
        }

        let out = kinematics.inverse([waypoint[0], waypoint[1], waypoint[2]], frame);
        if !out.anomalies.is_empty() {
            if summary.corrected == 0 {
                summary.first_anomalies = out.anomalies;
            }
            summary.corrected += 1;
            for a in out.anomalies.iter() {
                log::debug!("segment {s}/{count} at {waypoint:?}: {a}");
            }
        }

        queue.enqueue(Segment {
            actuators: out.coords,
            e: waypoint[3],
            feed_rate,
            tool: state.active_tool,
        });
    }

    state.current_position = state.destination;
    summary
}
