use crate::prelude::{Epoch, Observation, Station, SV};

/// Ambiguity status of one satellite for the ongoing epoch
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub(crate) enum FixState {
    /// Not part of the solution
    #[default]
    None,
    /// Contributes as a float ambiguity
    Float,
    /// Integer fixed
    Fixed,
    /// Integer fixed and held
    Held,
}

/// Per satellite slot bookkeeping, retained across epochs.
#[derive(Debug, Default, Clone)]
pub(crate) struct SatelliteTrack {
    /// Identity, attached when first sighted
    pub sv: Option<SV>,

    /// Last known (azimuth, elevation) [rad]
    pub azel: (f64, f64),

    /// Contributes a valid phase double difference this epoch
    pub vsat: bool,

    /// Rover C/N0 (0.25 dB.Hz)
    pub snr: u16,

    /// [FixState] of the ongoing epoch
    pub fix: FixState,

    /// Slip flags. Bit 0: cycle slip detected. Bit 1: parity unknown.
    pub slip: u8,

    /// Previous loss of lock bits, per station
    lli: [u8; 2],

    /// Half cycle ambiguity resolved on both sites
    pub half_valid: bool,

    /// Continuous tracking count: negative right after a reset
    pub lock: i32,

    /// Epochs since last contribution (phase, code)
    pub outage: [u32; 2],

    /// Cycle slip events since session start
    pub slip_count: u32,

    /// Rejected (outlier) double differences
    pub reject_count: u32,

    /// Last phase / code double difference residual (m)
    pub phase_residual_m: f64,
    pub code_residual_m: f64,

    /// Last sampled carrier phase (cycles), per station
    pub last_phase: [f64; 2],

    /// Last phase sampling instant, per station
    pub last_phase_t: [Option<Epoch>; 2],

    /// Carrier windup accumulator (cycles), per station, fed by
    /// external correctors and consumed by the observation model
    pub windup: [f64; 2],
}

fn station_index(station: Station) -> usize {
    match station {
        Station::Rover => 0,
        Station::Base => 1,
    }
}

impl SatelliteTrack {
    /// Clears the per-epoch flags, keeping the lifetime counters
    pub fn new_epoch(&mut self, sv: SV) {
        self.sv = Some(sv);
        self.vsat = false;
        self.slip &= 0xFC;
    }

    /// Cycle slip detection from the loss of lock indicator:
    /// flagged on LLI bit 0 (current bits on a forward run, the
    /// retained bits on a backward run), or on any transition of the
    /// parity unknown bit.
    pub fn detect_slip_lli(&mut self, obs: &Observation, forward: bool) {
        if obs.phase_cycles == 0.0 {
            return;
        }

        let rcv = station_index(obs.station);
        let previous = self.lli[rcv];

        let mut slip = if forward { obs.lli } else { previous };

        if (previous & 2) != (obs.lli & 2) {
            slip |= 1;
        }

        if slip & 1 > 0 {
            log::warn!("{} - cycle slip detected (rcv={})", obs.sv, rcv + 1);
        }

        self.lli[rcv] = obs.lli & 3;
        self.slip |= slip & 3;
    }

    /// Half cycle status from both sites
    pub fn update_half_valid(&mut self, rover: &Observation, base: &Observation) {
        self.half_valid = (rover.lli & 2) == 0 && (base.lli & 2) == 0;
    }

    /// Archive the sampled carrier phase for the next epoch
    pub fn save_phase(&mut self, obs: &Observation, t: Epoch) {
        if obs.phase_cycles != 0.0 {
            let rcv = station_index(obs.station);
            self.last_phase[rcv] = obs.phase_cycles;
            self.last_phase_t[rcv] = Some(t);
        }
    }

    /// External windup corrector entry point
    pub fn set_windup(&mut self, station: Station, cycles: f64) {
        self.windup[station_index(station)] = cycles;
    }

    pub fn windup_cycles(&self, station: Station) -> f64 {
        self.windup[station_index(station)]
    }
}
