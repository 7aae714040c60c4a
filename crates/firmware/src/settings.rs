//! The run-time tunables that `M500` stores and `M501` loads.

use scarab_planner::{MotionTunables, RetractionState};
use scarab_protocol::response::{Response, ResponseSink};

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Settings {
    pub tunables: MotionTunables,
    /// For X, Y and Z. On a SCARA arm the first two are theta and psi offsets in degrees.
    pub home_offset: [f32; 3],
    pub retraction: RetractionState,
}

impl Settings {
    /// Prints the settings as the commands that would set them, like `M503` does.
    pub fn report(&self, sink: &mut dyn ResponseSink) {
        let t = &self.tunables;
        let r = &self.retraction;
        let [sx, sy, sz, se] = t.axis_steps_per_unit;
        let [fx, fy, fz, fe] = t.max_feedrate;
        let [ax, ay, az, ae] = t.max_acceleration;
        let [hx, hy, hz] = self.home_offset;

        let mut echo = |line: core::fmt::Arguments<'_>| sink.send(&Response::Echo(line));
        echo(format_args!("Steps per unit:"));
        echo(format_args!("  M92 X{sx:.2} Y{sy:.2} Z{sz:.2} E{se:.2}"));
        echo(format_args!("Maximum feedrates (mm/s):"));
        echo(format_args!("  M203 X{fx:.2} Y{fy:.2} Z{fz:.2} E{fe:.2}"));
        echo(format_args!("Maximum Acceleration (mm/s2):"));
        echo(format_args!("  M201 X{ax:.0} Y{ay:.0} Z{az:.0} E{ae:.0}"));
        echo(format_args!("Acceleration: S=acceleration, T=retract acceleration"));
        echo(format_args!("  M204 S{:.2} T{:.2}", t.acceleration, t.retract_acceleration));
        echo(format_args!("Advanced variables: S=Min feedrate (mm/s), T=Min travel feedrate (mm/s), B=minimum segment time (ms), X=maximum XY jerk (mm/s), Z=maximum Z jerk (mm/s), E=maximum E jerk (mm/s)"));
        echo(format_args!(
            "  M205 S{:.2} T{:.2} B{:.0} X{:.2} Z{:.2} E{:.2}",
            t.min_feedrate,
            t.min_travel_feedrate,
            t.min_segment_time,
            t.max_xy_jerk,
            t.max_z_jerk,
            t.max_e_jerk
        ));
        echo(format_args!("Home offset (mm):"));
        echo(format_args!("  M206 X{hx:.2} Y{hy:.2} Z{hz:.2}"));
        echo(format_args!("Retract: S=length, F=feed rate, Z=lift; recover: S=extra length, F=feed rate"));
        echo(format_args!(
            "  M207 S{:.2} F{:.2} Z{:.2} M208 S{:.2} F{:.2} M209 S{}",
            r.length,
            r.feed_rate,
            r.zlift,
            r.recover_length,
            r.recover_feed_rate,
            r.auto_retract_enabled as u8
        ));
    }
}
