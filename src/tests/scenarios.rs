use nalgebra::Vector3;
use rstest::*;

use crate::{
    geometry,
    prelude::{
        AmbiguityMode, BaseState, Config, EpochInput, Error, FilterVariant, RtkSolver, Solution,
        SolutionStatus,
    },
    tests::Scenario,
};

#[fixture]
fn static_scenario() -> Scenario {
    Scenario::gps_static(8, 5000.0)
}

fn base_tuple(scenario: &Scenario) -> (f64, f64, f64) {
    (scenario.base0[0], scenario.base0[1], scenario.base0[2])
}

/// Drives one generated epoch through the solver
fn step(
    solver: &mut RtkSolver,
    scenario: &Scenario,
    k: usize,
    moving_base: bool,
) -> Result<Solution, Error> {
    let (observations, states) = scenario.epoch(k);

    let input = EpochInput {
        t: scenario.sampling(k),
        t_base: scenario.sampling(k),
        observations: &observations,
        states: &states,
        rover_seed_ecef_m: scenario.seed(k),
        rover_seed_velocity_m_s: scenario.rover_velocity,
        moving_base: if moving_base {
            Some(BaseState {
                t: scenario.sampling(k),
                position_ecef_m: scenario.base_position(k),
                velocity_ecef_m_s: scenario.base_velocity,
            })
        } else {
            None
        },
        kb_model: None,
    };

    solver.step(&input)
}

fn assert_covariance_sane(solver: &RtkSolver) {
    let state = solver.filter_state();
    let nx = state.nx();

    for i in 0..nx {
        if state.is_active(i) {
            assert!(state.p[(i, i)] > 0.0, "active state with null variance");
        }

        for j in 0..nx {
            let (a, b) = (state.p[(i, j)], state.p[(j, i)]);
            let scale = a.abs().max(b.abs()).max(1.0);
            assert!(
                ((a - b) / scale).abs() < 1.0E-9,
                "state covariance lost symmetry at ({}, {})",
                i,
                j
            );
        }
    }
}

#[rstest]
fn static_baseline_converges_and_fixes(static_scenario: Scenario) {
    let scenario = static_scenario;
    let cfg = Config::static_preset(base_tuple(&scenario));

    let mut solver = RtkSolver::new(&cfg);
    let mut first_fix: Option<usize> = None;

    for k in 0..60 {
        let solution = step(&mut solver, &scenario, k, false).unwrap();

        assert_ne!(solution.status, SolutionStatus::None, "lost epoch {}", k);
        assert_covariance_sane(&solver);

        let enu = scenario.enu_error(k, solution.position_ecef_m);

        if k >= 20 {
            let horizontal = (enu[0].powi(2) + enu[1].powi(2)).sqrt();
            assert!(
                horizontal < 0.3,
                "float convergence failed at {} ({}m)",
                k,
                horizontal
            );
        }

        if solution.status == SolutionStatus::Fixed {
            first_fix.get_or_insert(k);

            assert!(solution.ratio >= cfg.ar_ratio_threshold);
            assert!(
                enu.norm() < 0.05,
                "fixed solution off truth at {} ({}m)",
                k,
                enu.norm()
            );
        }
    }

    let first_fix = first_fix.expect("never resolved the ambiguities");
    assert!(first_fix <= 30, "first fix too late ({})", first_fix);
}

#[rstest]
#[case(FilterVariant::Ekf)]
#[case(FilterVariant::Akf)]
#[case(FilterVariant::Ukf)]
#[case(FilterVariant::Nls)]
fn every_filter_variant_converges(static_scenario: Scenario, #[case] variant: FilterVariant) {
    let scenario = static_scenario;

    let mut cfg = Config::static_preset(base_tuple(&scenario));
    cfg.filter = variant;

    let mut solver = RtkSolver::new(&cfg);

    for k in 0..25 {
        let solution = step(&mut solver, &scenario, k, false).unwrap();

        assert_ne!(
            solution.status,
            SolutionStatus::None,
            "{:?} lost epoch {}",
            variant,
            k
        );

        if k >= 15 {
            let enu = scenario.enu_error(k, solution.position_ecef_m);
            assert!(
                enu.norm() < 1.0,
                "{:?} did not converge at {} ({}m)",
                variant,
                k,
                enu.norm()
            );
        }
    }
}

#[rstest]
#[case(AmbiguityMode::Continuous)]
#[case(AmbiguityMode::Instantaneous)]
#[case(AmbiguityMode::FixAndHold)]
fn every_ambiguity_mode_keeps_resolving(
    static_scenario: Scenario,
    #[case] mode: AmbiguityMode,
) {
    let scenario = static_scenario;

    let mut cfg = Config::static_preset(base_tuple(&scenario));
    cfg.ambiguity = mode;

    let mut solver = RtkSolver::new(&cfg);

    for k in 0..20 {
        let solution = step(&mut solver, &scenario, k, false).unwrap();
        assert_ne!(
            solution.status,
            SolutionStatus::None,
            "{:?} lost epoch {}",
            mode,
            k
        );
    }
}

#[rstest]
fn cycle_slip_is_reset_then_refixed(static_scenario: Scenario) {
    let scenario = static_scenario;
    let cfg = Config::static_preset(base_tuple(&scenario));

    let mut solver = RtkSolver::new(&cfg);

    for k in 0..60 {
        let (mut observations, states) = scenario.epoch(k);

        // G05 rover track slips at epoch 20: the carrier jumps by a
        // few cycles and the receiver raises the loss of lock bit
        if k >= 20 {
            let g05 = observations
                .iter()
                .position(|obs| obs.sv.prn == 5)
                .unwrap();

            observations[g05].phase_cycles += 5.0;
            if k == 20 {
                observations[g05].lli = 1;
            }
        }

        let input = EpochInput {
            t: scenario.sampling(k),
            t_base: scenario.sampling(k),
            observations: &observations,
            states: &states,
            rover_seed_ecef_m: scenario.seed(k),
            rover_seed_velocity_m_s: Vector3::zeros(),
            moving_base: None,
            kb_model: None,
        };

        let solution = solver.step(&input).unwrap();

        assert_ne!(solution.status, SolutionStatus::None, "lost epoch {}", k);

        // had the slipped ambiguity survived, the biased carrier would
        // wreck the late solutions
        if k >= 50 {
            assert_eq!(solution.status, SolutionStatus::Fixed, "no refix by {}", k);

            let enu = scenario.enu_error(k, solution.position_ecef_m);
            assert!(enu.norm() < 0.05, "post-slip accuracy lost ({}m)", enu.norm());
        }
    }
}

#[rstest]
fn kinematic_rover_with_dynamics(static_scenario: Scenario) {
    let scenario = static_scenario.with_rover_velocity(1.0);
    let cfg = Config::kinematic_preset(base_tuple(&scenario));

    let mut solver = RtkSolver::new(&cfg);

    for k in 0..50 {
        let solution = step(&mut solver, &scenario, k, false).unwrap();

        assert_ne!(solution.status, SolutionStatus::None, "lost epoch {}", k);

        if k >= 40 {
            let enu = scenario.enu_error(k, solution.position_ecef_m);
            assert!(enu.norm() < 0.1, "kinematic accuracy at {} ({}m)", k, enu.norm());

            let vel_err = (solution.velocity_ecef_m_s - scenario.rover_velocity).norm();
            assert!(vel_err < 0.1, "velocity estimate at {} ({}m/s)", k, vel_err);
        }
    }
}

#[rstest]
fn moving_base_length_constraint() {
    let scenario = Scenario::gps_static(8, 10.0).with_carrier_velocity(1.0);

    let mut cfg = Config::moving_base_preset(10.0, 0.001);
    cfg.dynamics = false;

    let mut solver = RtkSolver::new(&cfg);
    let mut late_fixes = 0_usize;

    for k in 0..100 {
        let solution = step(&mut solver, &scenario, k, true).unwrap();

        assert_ne!(solution.status, SolutionStatus::None, "lost epoch {}", k);

        if k >= 50 {
            let baseline = (solution.position_ecef_m - scenario.base_position(k)).norm();
            assert!(
                (baseline - 10.0).abs() < 0.05,
                "baseline length diverged at {} ({}m)",
                k,
                baseline
            );

            if solution.status == SolutionStatus::Fixed {
                late_fixes += 1;
                assert!((baseline - 10.0).abs() < 0.01);
            }
        }
    }

    assert!(late_fixes > 25, "fix never settled ({}/50)", late_fixes);
}

#[rstest]
fn masked_epoch_retains_the_state(static_scenario: Scenario) {
    let scenario = static_scenario;
    let cfg = Config::static_preset(base_tuple(&scenario));

    let mut solver = RtkSolver::new(&cfg);

    for k in 0..6 {
        step(&mut solver, &scenario, k, false).unwrap();
    }

    let x_before = solver.filter_state().x.clone();
    let p_before = solver.filter_state().p.clone();

    // same vehicles, dragged down to 3° of elevation: everything is
    // below the visibility mask
    let mut low = scenario.clone();
    let enu_to_ecef =
        geometry::ecef_to_enu_rotation(geometry::geodetic(low.rover0)).transpose();

    for (i, sat) in low.sats.iter_mut().enumerate() {
        let az = (i as f64) * std::f64::consts::TAU / 8.0;
        let el = 3.0_f64.to_radians();
        let los = enu_to_ecef * Vector3::new(el.cos() * az.sin(), el.cos() * az.cos(), el.sin());
        sat.position_ecef_m = low.rover0 + los * 22.0E6;
    }

    let solution = step(&mut solver, &low, 6, false).unwrap();

    assert_eq!(solution.status, SolutionStatus::None);
    assert_eq!(solver.filter_state().x, x_before);
    assert_eq!(solver.filter_state().p, p_before);

    // session recovers on the next clean epoch
    let solution = step(&mut solver, &scenario, 7, false).unwrap();
    assert_ne!(solution.status, SolutionStatus::None);
}

#[rstest]
fn duplicated_satellite_is_rejected_and_the_session_survives(static_scenario: Scenario) {
    let scenario = static_scenario;
    let cfg = Config::static_preset(base_tuple(&scenario));

    let mut solver = RtkSolver::new(&cfg);

    for k in 0..5 {
        step(&mut solver, &scenario, k, false).unwrap();
    }

    let before = solver.solution();

    // two identical satellites in the rover block
    let (mut observations, mut states) = scenario.epoch(5);
    observations.insert(1, observations[0]);
    states.insert(1, states[0]);

    let input = EpochInput {
        t: scenario.sampling(5),
        t_base: scenario.sampling(5),
        observations: &observations,
        states: &states,
        rover_seed_ecef_m: scenario.seed(5),
        rover_seed_velocity_m_s: Vector3::zeros(),
        moving_base: None,
        kb_model: None,
    };

    assert!(solver.step(&input).is_err());
    assert_eq!(solver.solution(), before);

    // next clean epoch succeeds
    let solution = step(&mut solver, &scenario, 6, false).unwrap();
    assert_ne!(solution.status, SolutionStatus::None);
}
