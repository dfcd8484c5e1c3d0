//! # Double-Track Model Benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use nalgebra::Vector2;
use traj_lib::{
    race_track::RaceTrack,
    simulator::Simulator,
    vehicle::{Control, DoubleTrack, DoubleTrackParams, State, TireParams, Vehicle, VehicleParams},
};

fn model_params() -> DoubleTrackParams {
    let tire = TireParams {
        b: 10.0,
        c: 1.6,
        e: 0.9,
        load_sensitivity: -0.05,
        nominal_load_n: 3000.0,
    };

    DoubleTrackParams {
        mass_kg: 1200.0,
        yaw_inertia_kgm2: 1500.0,
        cog_to_front_m: 1.2,
        cog_to_rear_m: 1.4,
        track_width_front_m: 1.6,
        track_width_rear_m: 1.5,
        cog_height_m: 0.4,
        half_width_m: 1.0,
        drag_coeff: 0.4,
        lift_coeff_front: 0.3,
        lift_coeff_rear: 0.4,
        rolling_resistance: 0.01,
        drive_split_front: 0.0,
        brake_split_front: 0.6,
        roll_stiffness_front: 0.5,
        mu_lon: 1.2,
        mu_lat: 1.2,
        tire_front: tire,
        tire_rear: tire,
        max_drive_force_n: 6000.0,
        max_brake_force_n: 15000.0,
        max_steer_rad: 0.4,
        max_power_w: 200_000.0,
        max_drive_rate_nps: None,
        max_brake_rate_nps: None,
        max_steer_rate_radps: None,
        max_yaw_rate_rads: 1.5,
        max_slip_rad: 0.3,
        max_heading_dev_rad: 1.2,
        min_speed_mps: 1.0,
        max_speed_mps: 60.0,
    }
}

fn double_track_benchmark(c: &mut Criterion) {
    let model = DoubleTrack::new(model_params()).unwrap();
    let state = State {
        n_m: 1.0,
        xi_rad: 0.05,
        yaw_rate_rads: 0.3,
        slip_rad: -0.02,
        speed_mps: 25.0,
        ..Default::default()
    };
    let control = Control {
        drive_force_n: 2000.0,
        steer_rad: 0.06,
        load_transfer_n: 1500.0,
        ..Default::default()
    };

    c.bench_function("double_track_derivative", |b| {
        b.iter(|| model.derivative(black_box(&state), black_box(&control), black_box(0.01)))
    });
}

fn simulator_benchmark(c: &mut Criterion) {
    // Closed circular track, 200 m radius, 2 m grid
    let circle = |r: f64| -> Vec<Vector2<f64>> {
        (0..720)
            .map(|i| {
                let a = i as f64 * std::f64::consts::PI / 360.0;
                Vector2::new(r * a.cos(), r * a.sin())
            })
            .collect()
    };
    let track = RaceTrack::new("bench", &circle(194.0), &circle(206.0), &circle(200.0), 1.0, 2.0)
        .unwrap();

    let vehicle = Vehicle::new(VehicleParams {
        acc_speed_lookup: vec![[0.0, 8.0], [30.0, 6.0], [60.0, 2.0]],
        dcc_speed_lookup: vec![[0.0, -10.0], [60.0, -12.0]],
        max_lon_acc_mpss: 8.0,
        max_lon_dcc_mpss: 12.0,
        max_left_acc_mpss: 14.0,
        max_right_acc_mpss: 14.0,
        max_speed_mps: 60.0,
        max_jerk_mpsc: 50.0,
    })
    .unwrap();
    let simulator = Simulator::new(vehicle);
    let center = track.center_trajectory();

    c.bench_function("simulator_closed_loop", |b| {
        b.iter(|| simulator.run_simulation(black_box(&center), true).unwrap())
    });
}

criterion_group!(benches, double_track_benchmark, simulator_benchmark);
criterion_main!(benches);
