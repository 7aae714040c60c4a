use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _};
use clap::Parser;
use indicatif::ProgressBar;
use reedline::{DefaultPrompt, Reedline, Signal};
use scarab_firmware::hal::{Clock, Media, NoMedia};
use scarab_firmware::{ConfigBuilder, Firmware, Hal, KinematicsKind, MachineConfig};

use crate::link::Link;
use crate::media::DirMedia;
use crate::sim::{SimClock, SimDisplay, SimHeaters, SimQueue, SimSteppers, Stats};
use crate::storage::FileStore;
use crate::stream::Streamer;

mod link;
mod media;
mod sim;
mod storage;
mod stream;

/// Runs the printer firmware against simulated hardware, either streaming a
/// G-code file or reading commands from the terminal.
#[derive(Parser)]
struct Args {
    /// G-code file to print. Without one, commands are read interactively.
    path: Option<PathBuf>,
    /// Where the stored settings live.
    #[arg(long, default_value = "scarab-settings.bin")]
    settings: PathBuf,
    /// Directory to use as the SD card.
    #[arg(long)]
    media: Option<PathBuf>,
    /// Simulate a Cartesian machine instead of a SCARA arm.
    #[arg(long)]
    cartesian: bool,
    /// Allow moves before the machine has been homed.
    #[arg(long)]
    no_homing: bool,
    /// Simulated milliseconds per tick.
    #[arg(long, default_value_t = 10)]
    tick_ms: u64,
}

struct Machine {
    fw: Firmware,
    link: Link,
    clock: SimClock,
    stats: Stats,
    tick_ms: u64,
}

impl Machine {
    fn new(args: &Args) -> Self {
        let config = machine_config(args);
        let clock = SimClock::default();
        let stats = Stats::default();
        let link = Link::printing();
        let media: Box<dyn Media> = match &args.media {
            Some(dir) => Box::new(DirMedia::new(dir)),
            None => Box::new(NoMedia),
        };
        let hal = Hal {
            queue: Box::new(SimQueue::new(
                clock.clone(),
                stats.clone(),
                config.segments_per_second,
            )),
            heaters: Box::new(SimHeaters::new(clock.clone(), config.extruders)),
            steppers: Box::new(SimSteppers::new(&config)),
            settings: Box::new(FileStore::new(&args.settings)),
            display: Box::new(SimDisplay::default()),
            media,
            serial: Box::new(link.clone()),
            clock: Box::new(clock.clone()),
            sink: Box::new(link.clone()),
        };
        Machine {
            fw: Firmware::new(config, hal),
            link,
            clock,
            stats,
            tick_ms: args.tick_ms.max(1),
        }
    }

    fn tick(&mut self) -> anyhow::Result<()> {
        self.fw.tick().context("firmware halted")?;
        self.clock.advance(self.tick_ms);
        Ok(())
    }

    /// Ticks until everything sent so far has been read and carried out.
    fn settle(&mut self) -> anyhow::Result<()> {
        while !(self.link.is_drained() && self.fw.is_idle()) {
            self.tick()?;
        }
        Ok(())
    }
}

fn machine_config(args: &Args) -> MachineConfig {
    let mut builder = ConfigBuilder::default();
    if args.cartesian {
        builder.with_kinematics(KinematicsKind::Cartesian);
    }
    if args.no_homing {
        builder.with_require_homing(false);
    }
    builder.build()
}

fn send_file(machine: &mut Machine, path: &Path) -> anyhow::Result<()> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut streamer = Streamer::new(&text);
    if streamer.line_count() == 0 {
        return Err(anyhow!("{} has no commands", path.display()));
    }

    let bar = ProgressBar::new(streamer.line_count() as u64);
    while !(streamer.is_finished() && machine.fw.is_idle()) {
        streamer.pump(&machine.link);
        machine.tick()?;
        bar.set_position(streamer.done() as u64);
    }
    bar.finish();

    let seconds = machine.clock.now_ms() as f64 / 1000.0;
    log::info!(
        "{} lines, {} segments, {seconds:.1}s of machine time",
        streamer.line_count(),
        machine.stats.segments.get()
    );
    Ok(())
}

fn command_mode(machine: &mut Machine) -> anyhow::Result<()> {
    let mut reed = Reedline::create();
    let prompt = DefaultPrompt::default();
    machine.settle()?;
    loop {
        let line = match reed.read_line(&prompt)? {
            Signal::Success(s) => s,
            Signal::CtrlC | Signal::CtrlD => break,
        };
        let line = line.trim();
        if line == "quit" {
            break;
        }
        if line.is_empty() {
            continue;
        }
        machine.link.send_line(line);
        machine.settle()?;
        // Nobody counts acknowledgements in this mode.
        machine.link.take_feedback();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let mut machine = Machine::new(&args);
    match &args.path {
        Some(path) => send_file(&mut machine, path),
        None => command_mode(&mut machine),
    }
}
