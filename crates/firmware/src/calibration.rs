//! Bed-height calibration.
//!
//! A session walks the nozzle over the corners of the grid cells, row by row. At
//! each point the user jogs Z down to the bed and then captures the height with
//! `M372`, which also moves on to the next point.

use scarab_planner::Axis;

use crate::wait::Activity;
use crate::Firmware;

/// Z height for moving between points, in mm.
const TRAVEL_Z: f32 = 5.0;

/// mm/min.
const TRAVEL_FEED_RATE: f32 = 10000.0;

/// Where a calibration session is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GridSession {
    active: bool,
    ix: usize,
    iy: usize,
}

impl GridSession {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The grid point the session is at.
    pub fn position(&self) -> (usize, usize) {
        (self.ix, self.iy)
    }

    /// Moves to the next point in row-major order. Returns `true` if that wrapped
    /// back to the first point.
    fn advance(&mut self, divisions: (usize, usize)) -> bool {
        self.ix += 1;
        if self.ix > divisions.0 {
            self.ix = 0;
            self.iy += 1;
            if self.iy > divisions.1 {
                self.iy = 0;
                return true;
            }
        }
        false
    }
}

/// The parameters of `M370`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct GridPlan {
    /// Points per side; the grid gets one division fewer.
    pub points: (Option<f32>, Option<f32>),
    pub clear: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Stage {
    #[default]
    Lift,
    Travel,
    Lower,
    Report,
}

/// The three moves to a grid point: up, across, and down to the stored height.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct GridMove {
    stage: Stage,
    /// The feed rate to go back to once the nozzle is at the point.
    saved_feed_rate: f32,
}

impl GridMove {
    pub(crate) fn step(mut self, fw: &mut Firmware) -> Option<Activity> {
        if fw.hal.queue.has_pending() {
            return Some(Activity::GridMove(self));
        }
        let (x, y, z) = (Axis::X.index(), Axis::Y.index(), Axis::Z.index());
        fw.state.destination = fw.state.current_position;
        match self.stage {
            Stage::Lift => {
                fw.state.destination[z] = TRAVEL_Z;
                self.saved_feed_rate = fw.state.feed_rate;
                fw.state.feed_rate = TRAVEL_FEED_RATE;
                self.stage = Stage::Travel;
            }
            Stage::Travel => {
                let (ix, iy) = fw.grid_session.position();
                let (step_x, step_y) = fw.grid.step();
                // One past the corner, so the point falls inside its own cell.
                fw.state.destination[x] = ix as f32 * step_x + 1.0;
                fw.state.destination[y] = iy as f32 * step_y + 1.0;
                self.stage = Stage::Lower;
            }
            Stage::Lower => {
                let [cx, cy, ..] = fw.state.current_position;
                fw.state.destination[z] = fw.grid.sample_at(cx, cy);
                self.stage = Stage::Report;
            }
            Stage::Report => {
                let [cx, cy, cz, _] = fw.state.current_position;
                echo!(fw, "Moved to lookup position :");
                echo!(fw, " X:{cx:.2} Y:{cy:.2} Z:{cz:.2}");
                fw.state.feed_rate = self.saved_feed_rate;
                return None;
            }
        }
        fw.emit_move();
        Some(Activity::GridMove(self))
    }
}

impl Firmware {
    /// Opens a session after the homing that `M370` starts.
    pub(crate) fn start_grid(&mut self, plan: GridPlan) -> Activity {
        let (mut div_x, mut div_y) = self.grid.divisions();
        if let Some(points) = plan.points.0 {
            div_x = (points as i64 - 1).max(1) as usize;
        }
        if let Some(points) = plan.points.1 {
            div_y = (points as i64 - 1).max(1) as usize;
        }
        self.grid.set_divisions(div_x, div_y);
        self.grid_session = GridSession {
            active: true,
            ix: 0,
            iy: 0,
        };
        log::info!("grid calibration with {:?} divisions", self.grid.divisions());

        if plan.clear {
            self.grid.clear();
            echo!(self, " Y-level grid cleared");
        } else {
            echo!(self, " Using Y-level grid from previous calibration. Use M370 C to clear it.");
        }
        Activity::GridMove(GridMove::default())
    }

    /// Stores the current Z for the current point, then moves on.
    pub(crate) fn capture_grid_point(&mut self) -> Option<Activity> {
        if !self.grid_session.active {
            echo!(self, "No GridCal");
            return None;
        }
        let [x, y, z, _] = self.state.current_position;
        echo!(self, "Storing lookup for:");
        echo!(self, " X:{x:.2} Y:{y:.2} Z:{z:.2}");
        let (ix, iy) = self.grid.capture(x, y, z);
        log::debug!("grid[{ix}][{iy}] = {z}");
        echo!(self, " - OK");
        self.next_grid_point()
    }

    pub(crate) fn next_grid_point(&mut self) -> Option<Activity> {
        if !self.grid_session.active {
            return None;
        }
        if self.grid_session.advance(self.grid.divisions()) {
            echo!(self, " - Last calibration point...");
        }
        Some(Activity::GridMove(GridMove::default()))
    }

    pub(crate) fn end_grid(&mut self) {
        self.grid_session.active = false;
    }

    pub(crate) fn report_grid(&mut self) {
        use core::fmt::Write as _;

        for row in self.grid.rows() {
            let mut line = String::new();
            for sample in row {
                let _ = write!(line, " {sample:.2}");
            }
            self.hal.sink.send(&scarab_protocol::Response::Raw(format_args!("{line}")));
        }
    }
}
