//! Synthetic GPS constellation and observation generator: the
//! observables are built with the same geometric and tropospheric
//! models the solver applies, plus per satellite integer ambiguities
//! and deterministic measurement noise.

use std::str::FromStr;

use nalgebra::Vector3;

use crate::{
    bias::tropo,
    constants::L1_WAVELENGTH_M,
    geometry,
    prelude::{Constellation, Epoch, Observation, SatelliteState, Station, SV},
    tests::REFERENCE_COORDS_ECEF_M,
};

/// Deterministic white-ish noise in [-1, 1], keyed on the scenario
/// indices (epoch, satellite, station, channel)
pub(crate) fn noise(key: u64) -> f64 {
    let mut s = key
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    s ^= s >> 33;
    s = s.wrapping_mul(0xFF51AFD7ED558CCD);
    s ^= s >> 33;

    (s % 20001) as f64 / 10000.0 - 1.0
}

#[derive(Clone)]
pub(crate) struct SatDef {
    pub sv: SV,
    pub position_ecef_m: Vector3<f64>,
    /// True integer ambiguity, rover and base
    pub ambiguity: [i64; 2],
}

#[derive(Clone)]
pub(crate) struct Scenario {
    pub t0: Epoch,
    pub rover0: Vector3<f64>,
    pub rover_velocity: Vector3<f64>,
    pub base0: Vector3<f64>,
    pub base_velocity: Vector3<f64>,
    pub sats: Vec<SatDef>,
    pub code_noise_m: f64,
    pub phase_noise_m: f64,
    pub seed_noise_m: f64,
}

impl Scenario {
    /// Static rover, static reference site at `baseline_m` to the
    /// east, `nsats` GPS satellites spread in azimuth and elevation.
    pub fn gps_static(nsats: usize, baseline_m: f64) -> Self {
        const PRNS: [u8; 10] = [2, 5, 7, 13, 15, 20, 24, 26, 29, 31];
        assert!(nsats <= PRNS.len());

        let rover0 = Vector3::new(
            REFERENCE_COORDS_ECEF_M.0,
            REFERENCE_COORDS_ECEF_M.1,
            REFERENCE_COORDS_ECEF_M.2,
        );

        let enu_to_ecef = geometry::ecef_to_enu_rotation(geometry::geodetic(rover0)).transpose();

        let base0 = rover0 + enu_to_ecef * Vector3::new(baseline_m, 0.0, 0.0);

        let sats = (0..nsats)
            .map(|i| {
                let az = (i as f64) * std::f64::consts::TAU / (nsats as f64);
                let el = (25.0 + ((i * 37) % 50) as f64).to_radians();

                let los = enu_to_ecef
                    * Vector3::new(el.cos() * az.sin(), el.cos() * az.cos(), el.sin());

                let prn = PRNS[i];

                SatDef {
                    sv: SV::new(Constellation::GPS, prn),
                    position_ecef_m: rover0 + los * 22.0E6,
                    ambiguity: [
                        (prn as i64 * 37) % 100 - 50,
                        (prn as i64 * 91) % 100 - 50,
                    ],
                }
            })
            .collect();

        Self {
            t0: Epoch::from_str("2020-06-25T00:00:00 GPST").unwrap(),
            rover0,
            rover_velocity: Vector3::zeros(),
            base0,
            base_velocity: Vector3::zeros(),
            sats,
            code_noise_m: 0.3,
            phase_noise_m: 0.002,
            seed_noise_m: 1.5,
        }
    }

    /// Rover roaming east at the given speed
    pub fn with_rover_velocity(mut self, east_m_s: f64) -> Self {
        let enu_to_ecef =
            geometry::ecef_to_enu_rotation(geometry::geodetic(self.rover0)).transpose();
        self.rover_velocity = enu_to_ecef * Vector3::new(east_m_s, 0.0, 0.0);
        self
    }

    /// Both sites roaming together (rigid carrier)
    pub fn with_carrier_velocity(mut self, east_m_s: f64) -> Self {
        self = self.with_rover_velocity(east_m_s);
        self.base_velocity = self.rover_velocity;
        self
    }

    pub fn sampling(&self, k: usize) -> Epoch {
        self.t0 + (k as f64) * hifitime::Unit::Second
    }

    pub fn rover_position(&self, k: usize) -> Vector3<f64> {
        self.rover0 + self.rover_velocity * (k as f64)
    }

    pub fn base_position(&self, k: usize) -> Vector3<f64> {
        self.base0 + self.base_velocity * (k as f64)
    }

    /// Rover position seed: truth perturbed like a single point fix
    pub fn seed(&self, k: usize) -> Vector3<f64> {
        let mut pos = self.rover_position(k);
        for axis in 0..3 {
            pos[axis] += self.seed_noise_m * noise((k as u64) << 8 | (axis as u64) << 3 | 0x55);
        }
        pos
    }

    fn observable(&self, sat: &SatDef, rcv: Vector3<f64>, t: Epoch) -> f64 {
        let (r, los) = geometry::geometric_range(sat.position_ecef_m, rcv)
            .expect("scenario geometry is not physical");

        let pos = geometry::geodetic(rcv);
        let (_, el) = geometry::azimuth_elevation(pos, los);

        let (zhd, _) = tropo::zenith_delays(pos, 0.0);
        let (m_h, _) = tropo::niell_mapping(t, pos, el);

        r + m_h * zhd
    }

    /// One full epoch: rover block then base block, sorted by PRN.
    /// Returns (observations, satellite states).
    pub fn epoch(&self, k: usize) -> (Vec<Observation>, Vec<SatelliteState>) {
        let t = self.sampling(k);
        let stations = [
            (Station::Rover, self.rover_position(k)),
            (Station::Base, self.base_position(k)),
        ];

        let mut observations = Vec::new();
        let mut states = Vec::new();

        for (s, (station, rcv)) in stations.iter().enumerate() {
            for sat in self.sats.iter() {
                let model = self.observable(sat, *rcv, t);

                let key = |channel: u64| {
                    (k as u64) << 20
                        | (sat.sv.prn as u64) << 8
                        | (s as u64) << 4
                        | channel
                };

                let code = model + self.code_noise_m * noise(key(1));
                let phase = (model + self.phase_noise_m * noise(2 * key(2))) / L1_WAVELENGTH_M
                    + sat.ambiguity[s] as f64;

                observations.push(Observation {
                    sv: sat.sv,
                    station: *station,
                    phase_cycles: phase,
                    pseudo_range_m: code,
                    snr: 180,
                    lli: 0,
                });

                states.push(SatelliteState {
                    sv: sat.sv,
                    position_ecef_m: sat.position_ecef_m,
                    velocity_ecef_m_s: Vector3::zeros(),
                    clock_bias_s: 0.0,
                    clock_drift_s_s: 0.0,
                    healthy: true,
                    brdc_var_m2: 0.0,
                    wavelength_m: L1_WAVELENGTH_M,
                    antenna_delta_m: 0.0,
                });
            }
        }

        (observations, states)
    }

    /// Local frame position error of an estimate at epoch k
    pub fn enu_error(&self, k: usize, estimate: Vector3<f64>) -> Vector3<f64> {
        let truth = self.rover_position(k);
        geometry::ecef_to_enu_rotation(geometry::geodetic(truth)) * (estimate - truth)
    }
}

#[cfg(test)]
mod test {
    use super::Scenario;
    use crate::observation::is_sorted;

    #[test]
    fn generated_epochs_are_ordered() {
        let scenario = Scenario::gps_static(8, 5000.0);
        let (observations, states) = scenario.epoch(0);

        assert_eq!(observations.len(), 16);
        assert_eq!(states.len(), 16);
        assert!(is_sorted(&observations));
    }

    #[test]
    fn double_differences_cancel_to_integer_ambiguities() {
        let scenario = Scenario::gps_static(4, 1000.0);
        let mut quiet = scenario;
        quiet.code_noise_m = 0.0;
        quiet.phase_noise_m = 0.0;

        let (obs, _) = quiet.epoch(0);

        // phase DD minus geometry DD reduces exactly to the DD of the
        // generated integer ambiguities
        let n = quiet.sats.len();
        let t = quiet.sampling(0);

        let model = |s: usize, station: usize| {
            let rcv = if station == 0 {
                quiet.rover_position(0)
            } else {
                quiet.base_position(0)
            };
            quiet.observable(&quiet.sats[s], rcv, t) / crate::constants::L1_WAVELENGTH_M
        };

        for j in 1..n {
            let dd_obs = (obs[0].phase_cycles - obs[n].phase_cycles)
                - (obs[j].phase_cycles - obs[n + j].phase_cycles);
            let dd_model = (model(0, 0) - model(0, 1)) - (model(j, 0) - model(j, 1));

            let dd_amb = (quiet.sats[0].ambiguity[0] - quiet.sats[0].ambiguity[1])
                - (quiet.sats[j].ambiguity[0] - quiet.sats[j].ambiguity[1]);

            assert!((dd_obs - dd_model - dd_amb as f64).abs() < 1.0E-6);
        }
    }
}
