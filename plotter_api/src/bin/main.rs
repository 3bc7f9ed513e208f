//! Loader binary: parses a configuration file, builds a simulated
//! `Machine`, and runs the dispatcher to completion (or until a
//! limit-switch fault).
//!
//! Mirrors `evo_api::main`'s own placeholder stance for the HTTP surface
//! ("in full implementation this would start an HTTP server") — real GPIO
//! and a real HTTP framework are both out of scope, so this binary wires
//! the simulation backend from [`plotter_api::sim`] and logs the routes a
//! host server would need to register, rather than starting one.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use plotter_api::registrar::{register_all, EndpointRegistrar, HttpMethod};
use plotter_api::sim::{sim_axis_pins, SimPwmPin};
use plotter_common::config::{ConfigLoader, KinematicParams, MachineConfig};
use plotter_core::machine::{CartesianKinematics, Kinematics, Machine, ScaraKinematics};

#[derive(Parser, Debug)]
#[command(name = "plotter-core", about = "Plotter motion-control dispatcher loader")]
struct Cli {
    /// Path to the machine configuration JSON file.
    #[arg(long)]
    config: PathBuf,

    /// Root directory sketches are read from (overrides the config file's
    /// `user_data_root`).
    #[arg(long)]
    sketch_root: Option<PathBuf>,

    /// Dispatcher tick period, in milliseconds.
    #[arg(long, default_value_t = 10)]
    period_ms: u64,
}

struct LoggingRegistrar;

impl EndpointRegistrar for LoggingRegistrar {
    fn register(&mut self, path: &str, method: HttpMethod) {
        info!(path, method = ?method, "would register HTTP endpoint");
    }
}

async fn run<K: Kinematics + 'static>(kinematics: K, config: &MachineConfig, period_ms: u64) {
    let (primary_pins, _primary_limit) = sim_axis_pins();
    let (secondary_pins, _secondary_limit) = sim_axis_pins();
    let driver = plotter_core::stepper::StepperDriver::new(
        plotter_core::stepper::StepperAxis::new(
            primary_pins,
            config.backlash_steps_primary,
            config.step_delay_ms_rapid,
        ),
        plotter_core::stepper::StepperAxis::new(
            secondary_pins,
            config.backlash_steps_secondary,
            config.step_delay_ms_rapid,
        ),
    );
    let pen = Box::new(SimPwmPin::new(config.min_pen_duty));

    let mut machine = match Machine::new(kinematics, driver, pen, config) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "failed to construct machine");
            return;
        }
    };

    plotter_core::dispatcher::control_task(&mut machine, period_ms).await;
}

fn main() {
    tracing_subscriber::fmt().compact().init();
    let cli = Cli::parse();

    let mut config = match MachineConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Some(root) = cli.sketch_root {
        config.user_data_root = Some(root.to_string_lossy().into_owned());
    }

    info!("plotter loader starting");
    let mut registrar = LoggingRegistrar;
    register_all(&mut registrar);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to build tokio runtime");
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async {
        match config.kinematic_params {
            KinematicParams::Cartesian { unit_per_revolution } => {
                let kinematics = CartesianKinematics { unit_per_revolution };
                run(kinematics, &config, cli.period_ms).await;
            }
            KinematicParams::Scara {
                radius_primary,
                radius_secondary,
            } => {
                let kinematics = ScaraKinematics {
                    radius_primary,
                    radius_secondary,
                };
                run(kinematics, &config, cli.period_ms).await;
            }
        }
    });
}
