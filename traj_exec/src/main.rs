//! Trajectory optimisation executable entry point.
//!
//! # Architecture
//!
//! The execution consists of:
//!
//!     - Initialise the session and logger
//!     - Load the executable and vehicle parameters
//!     - Build the race track from the boundary and centerline files
//!     - Build the initial trajectory:
//!         - Simulate a speed profile along the centerline, or
//!         - Load the warm start arrays of a previous run
//!     - Optimise the lap
//!     - Write the optimised trajectory, the diagnostic arrays and the
//!       session report

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::path::PathBuf;
use color_eyre::{eyre::{eyre, WrapErr}, Report};
use log::{info, warn};
use ndarray::{Array1, Axis};
use serde::Serialize;
use structopt::StructOpt;

// Internal
use traj_lib::{
    min_time_optm::{optimize, OptimizationStatus, WarmStart},
    nlp::AugLagSolver,
    params::TrajExecParams,
    race_track::{RaceTrack, Topology},
    simulator::Simulator,
    trajectory::{Column, Trajectory},
    vehicle::{DoubleTrack, DoubleTrackParams, Vehicle},
};
use util::{
    archive::{self, Archiver},
    logger::{logger_init, parse_level},
    session::Session,
    time::format_lap_time,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "traj_exec", about = "Minimum lap time trajectory optimisation")]
struct Args {
    /// Path to the executable parameters file
    #[structopt(parse(from_os_str), default_value = "params/traj_exec.toml")]
    config: PathBuf,

    /// Directory in which the session directory is created
    #[structopt(long, parse(from_os_str), default_value = "sessions")]
    sessions: PathBuf,

    /// Minimum log level, `info` or more verbose
    #[structopt(long, default_value = "info")]
    log_level: String,
}

/// Summary of a run saved in the session directory.
#[derive(Debug, Serialize)]
struct RunReport {
    track: String,
    closed: bool,
    num_samples: usize,
    initial_lap_time_s: Option<f64>,
    lap_time_s: f64,
    lap_time: String,
    optimal: bool,
    degraded_reason: Option<String>,
    solver_iterations: usize,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let args = Args::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new("traj_exec", &args.sessions)
        .wrap_err("Failed to create the session")?;

    let level = parse_level(&args.log_level)
        .ok_or_else(|| eyre!("Unknown log level {:?}", args.log_level))?;
    logger_init(level, &session).wrap_err("Failed to initialise logging")?;

    info!("Trajectory Optimisation Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params: TrajExecParams = util::params::load(&args.config)
        .wrap_err("Could not load the executable parameters")?;
    params.validate().wrap_err("Invalid executable parameters")?;

    let vehicle_params: DoubleTrackParams = util::params::load(&params.vehicle)
        .wrap_err("Could not load the vehicle parameters")?;
    let model = DoubleTrack::new(vehicle_params).wrap_err("Invalid vehicle parameters")?;

    info!("Exec parameters loaded");

    // ---- RACE TRACK ----

    let left = Trajectory::load(&params.left_boundary).wrap_err("Could not load the left boundary")?;
    let right =
        Trajectory::load(&params.right_boundary).wrap_err("Could not load the right boundary")?;
    let center = Trajectory::load(&params.centerline).wrap_err("Could not load the centerline")?;

    let name = params
        .centerline
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let track = RaceTrack::from_trajectories(
        &name,
        &left,
        &right,
        &center,
        params.direction,
        params.interval,
        params.closed_loop.map(|c| if c { Topology::Closed } else { Topology::Open }),
    )
    .wrap_err("Could not build the race track")?;

    info!(
        "Track {:?}: {:.1} m, {} samples, {:?}",
        track.name(),
        track.length(),
        track.len(),
        track.topology()
    );

    // ---- INITIAL TRAJECTORY ----

    let mut initial = track.center_trajectory();
    let mut initial_lap_time = None;

    let warm_start = match (&params.x0, &params.u0, &params.t0) {
        (Some(x0), Some(u0), Some(t0)) => {
            info!("Loading the warm start from {:?}, {:?} and {:?}", x0, u0, t0);

            let x = archive::load_array(x0).wrap_err("Could not load x0")?;
            let u = archive::load_array(u0).wrap_err("Could not load u0")?;
            let t = archive::load_array(t0).wrap_err("Could not load t0")?;

            if x.nrows() == initial.len() && x.ncols() > 5 {
                initial.column_mut(Column::Speed).assign(&x.column(5));
            }

            WarmStart::Arrays {
                x,
                u,
                t: Array1::from_iter(t.iter().cloned()),
            }
        }
        _ => {
            let estimates = params
                .estimates
                .clone()
                .ok_or_else(|| eyre!("Vehicle estimates are required without a warm start"))?;
            let vehicle = Vehicle::new(estimates).wrap_err("Invalid vehicle estimates")?;
            let simulator = Simulator::with_params(vehicle, params.simulator.clone());

            let sim = simulator
                .run_simulation(&initial, track.is_closed())
                .wrap_err("Could not simulate the initial speed profile")?;
            if !sim.converged {
                warn!("Using an unconverged initial speed profile");
            }

            initial = sim.trajectory;
            let lap_time = initial.lap_time(track.is_closed());
            initial_lap_time = Some(lap_time);
            info!("Initial lap time {}", format_lap_time(lap_time));

            WarmStart::FromTrajectory
        }
    };

    if let Some(ref path) = params.ttl_input_output {
        initial
            .save_through(path, Column::Bank)
            .wrap_err("Could not save the initial trajectory")?;
    }

    // ---- OPTIMISATION ----

    let solver = AugLagSolver::new(params.optimizer.solver.clone());
    let outcome = optimize(&initial, &track, &model, &params.optimizer, warm_start, &solver)
        .wrap_err("Optimisation failed")?;

    let mut history_arch = Archiver::from_path(&session, "solver_history.csv")
        .wrap_err("Could not create the solver history archive")?;
    for record in outcome.history.iter() {
        history_arch
            .serialise(record)
            .wrap_err("Could not archive the solver history")?;
    }

    // ---- OUTPUTS ----

    let rec = &outcome.reconstruction;

    rec.trajectory
        .save_through(&params.output, Column::Time)
        .wrap_err("Could not save the optimised trajectory")?;

    if let Some(ref path) = params.ttl_output {
        rec.trajectory
            .save_through(path, Column::Vy)
            .wrap_err("Could not save the full optimised trajectory")?;
    }
    if let Some(ref path) = params.x_output {
        archive::save_array(path, rec.x.view()).wrap_err("Could not save the states")?;
    }
    if let Some(ref path) = params.u_output {
        archive::save_array(path, rec.u.view()).wrap_err("Could not save the controls")?;
    }
    if let Some(ref path) = params.t_output {
        archive::save_array(path, rec.t.view().insert_axis(Axis(1)))
            .wrap_err("Could not save the interval times")?;
    }

    let degraded_reason = match &outcome.status {
        OptimizationStatus::Optimal => None,
        OptimizationStatus::Degraded { reason } => Some(reason.clone()),
    };

    let report = RunReport {
        track: track.name().to_string(),
        closed: track.is_closed(),
        num_samples: track.len(),
        initial_lap_time_s: initial_lap_time,
        lap_time_s: outcome.lap_time,
        lap_time: format_lap_time(outcome.lap_time),
        optimal: outcome.status.is_optimal(),
        degraded_reason,
        solver_iterations: outcome.history.len(),
    };
    session
        .save_json("report.json", &report)
        .wrap_err("Could not save the run report")?;

    match outcome.status {
        OptimizationStatus::Optimal => info!("Optimal lap time {}", report.lap_time),
        OptimizationStatus::Degraded { .. } => {
            warn!("Degraded lap time {} (not optimal)", report.lap_time)
        }
    }

    info!("End of execution");

    Ok(())
}
