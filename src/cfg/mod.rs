#[cfg(feature = "serde")]
use serde::Deserialize;

mod mask;

pub use mask::SnrMask;

fn default_elmin_deg() -> f64 {
    15.0
}

fn default_elmask_ar_deg() -> f64 {
    15.0
}

fn default_niter() -> usize {
    1
}

fn default_max_innovation() -> f64 {
    30.0
}

fn default_max_outage() -> u32 {
    5
}

fn default_min_fix() -> u32 {
    10
}

fn default_max_age() -> f64 {
    30.0
}

fn default_process_noise() -> [f64; 5] {
    [1.0E-4, 1.0E-3, 1.0E-4, 1.0E-1, 1.0E-2]
}

fn default_initial_std() -> [f64; 3] {
    [30.0, 0.03, 0.3]
}

fn default_code_phase_ratio() -> f64 {
    100.0
}

fn default_phase_err() -> f64 {
    0.003
}

fn default_sclk_stability() -> f64 {
    5.0E-12
}

fn default_ar_ratio() -> f64 {
    3.0
}

/// Positioning technique. Only differential techniques engage the
/// estimation core: [PositioningMode::Single] is resolved upstream
/// (it is also what seeds the kinematic modes).
#[derive(Debug, Default, Copy, Clone, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PositioningMode {
    /// Single point positioning (upstream, bypasses the core)
    Single,
    /// Differential code positioning
    DGps,
    /// Roaming rover, static reference site
    Kinematic,
    /// Static rover, full accuracy surveying
    #[default]
    Static,
    /// Both sites roaming, known separation
    MovingBase,
    /// Rover coordinates known and held, observation residual analysis
    Fixed,
}

impl PositioningMode {
    /// True when carrier phase ambiguities are part of the state
    pub(crate) fn estimates_ambiguities(&self) -> bool {
        *self > Self::DGps
    }
}

/// Ionosphere delay handling
#[derive(Debug, Default, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum IonoOption {
    /// No compensation
    Off,
    /// Klobuchar model from broadcast parameters
    #[default]
    Broadcast,
    /// Per satellite vertical delay estimation
    Estimate,
    /// Iono free combination (requires dual frequency sampling)
    Iflc,
}

/// Troposphere delay handling
#[derive(Debug, Default, Copy, Clone, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TropoOption {
    /// No compensation
    Off,
    /// Saastamoinen hydrostatic model
    #[default]
    Saastamoinen,
    /// Model + zenith wet delay estimation (one per site)
    Estimate,
    /// Zenith wet delay and horizontal gradients estimation
    EstimateGradient,
}

/// Carrier phase ambiguity fixing strategy
#[derive(Debug, Default, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AmbiguityMode {
    /// Float ambiguities only
    Off,
    /// Ambiguities survive across epochs
    #[default]
    Continuous,
    /// Ambiguities are resolved from scratch every epoch
    Instantaneous,
    /// Validated integers are fed back into the float state
    FixAndHold,
}

/// Estimation filter variant, see [Config]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FilterVariant {
    /// Extended Kalman filter (default)
    #[default]
    Ekf,
    /// Adaptive (fading memory) Kalman filter
    Akf,
    /// Unscented Kalman filter
    Ukf,
    /// Nonlinear (Huber weighted) least squares, epoch wise
    Nls,
}

/// Measurement error model with per constellation terms,
/// overriding the standard elevation dependent model when provided.
/// Index 0: GPS/QZSS/SBAS, 1: Glonass, 2: Galileo/BeiDou.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct ExtendedErrorModel {
    /// Code (constant, elevation dependent) sigmas, in meters
    pub code: [(f64, f64); 3],
    /// Phase (constant, elevation dependent) sigmas, in meters
    pub phase: [(f64, f64); 3],
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct Config {
    /// Positioning technique to deploy
    #[cfg_attr(feature = "serde", serde(default))]
    pub mode: PositioningMode,

    /// Estimate velocity and acceleration along the position.
    /// Only meaningful for roaming applications.
    #[cfg_attr(feature = "serde", serde(default))]
    pub dynamics: bool,

    /// Ionosphere delay handling
    #[cfg_attr(feature = "serde", serde(default))]
    pub iono: IonoOption,

    /// Troposphere delay handling
    #[cfg_attr(feature = "serde", serde(default))]
    pub tropo: TropoOption,

    /// Ambiguity resolution strategy
    #[cfg_attr(feature = "serde", serde(default))]
    pub ambiguity: AmbiguityMode,

    /// Estimation filter variant
    #[cfg_attr(feature = "serde", serde(default))]
    pub filter: FilterVariant,

    /// Minimal elevation angle (deg) for an SV to contribute at all
    #[cfg_attr(feature = "serde", serde(default = "default_elmin_deg"))]
    pub elmin_deg: f64,

    /// Minimal elevation angle (deg) for an ambiguity to enter the
    /// integer search
    #[cfg_attr(feature = "serde", serde(default = "default_elmask_ar_deg"))]
    pub elmask_ar_deg: f64,

    /// Minimal elevation angle (deg) for a fixed ambiguity to be held
    #[cfg_attr(feature = "serde", serde(default = "default_elmask_ar_deg"))]
    pub elmask_hold_deg: f64,

    /// SNR masking, per elevation bin
    #[cfg_attr(feature = "serde", serde(default))]
    pub snr_mask: SnrMask,

    /// Number of measurement update iterations per epoch
    #[cfg_attr(feature = "serde", serde(default = "default_niter"))]
    pub niter: usize,

    /// Double difference innovation rejection threshold (m)
    #[cfg_attr(feature = "serde", serde(default = "default_max_innovation"))]
    pub max_innovation_m: f64,

    /// Observation outage (epochs) above which an ambiguity is reset
    #[cfg_attr(feature = "serde", serde(default = "default_max_outage"))]
    pub max_outage: u32,

    /// Consecutive validated fixes required before holding integers
    #[cfg_attr(feature = "serde", serde(default = "default_min_fix"))]
    pub min_fix: u32,

    /// Lock count penalty applied on reset: a freshly reset ambiguity
    /// must be continuously tracked this many epochs before fixing
    #[cfg_attr(feature = "serde", serde(default))]
    pub min_lock: i32,

    /// Maximal age of differential corrections (s)
    #[cfg_attr(feature = "serde", serde(default = "default_max_age"))]
    pub max_age_s: f64,

    /// Process noise standard deviations:
    /// [0] ambiguity (cycle/√s), [1] vertical iono (m/√s per 10 km),
    /// [2] zenith tropo (m/√s), [3] horizontal accel (m/s²/√s),
    /// [4] vertical accel (m/s²/√s)
    #[cfg_attr(feature = "serde", serde(default = "default_process_noise"))]
    pub process_noise_std: [f64; 5],

    /// Initial state standard deviations:
    /// [0] ambiguity (cycle), [1] vertical iono (m per 10 km), [2] zenith tropo (m)
    #[cfg_attr(feature = "serde", serde(default = "default_initial_std"))]
    pub initial_std: [f64; 3],

    /// Code sigma / phase sigma ratio
    #[cfg_attr(feature = "serde", serde(default = "default_code_phase_ratio"))]
    pub code_phase_ratio: f64,

    /// Carrier phase constant error term (m)
    #[cfg_attr(feature = "serde", serde(default = "default_phase_err"))]
    pub phase_err_m: f64,

    /// Carrier phase elevation dependent error term (m)
    #[cfg_attr(feature = "serde", serde(default = "default_phase_err"))]
    pub phase_err_el_m: f64,

    /// Baseline length dependent error term (m per 10 km)
    #[cfg_attr(feature = "serde", serde(default))]
    pub baseline_err_m: f64,

    /// Satellite clock stability (s/s), scales the differential age term
    #[cfg_attr(feature = "serde", serde(default = "default_sclk_stability"))]
    pub sclk_stability: f64,

    /// Possible extended error model override
    #[cfg_attr(feature = "serde", serde(default))]
    pub exterr: Option<ExtendedErrorModel>,

    /// Minimal acceptable (2nd best / best) squared norm ratio
    /// for an integer solution to be validated
    #[cfg_attr(feature = "serde", serde(default = "default_ar_ratio"))]
    pub ar_ratio_threshold: f64,

    /// Resolve Glonass ambiguities (requires calibrated channels)
    #[cfg_attr(feature = "serde", serde(default))]
    pub glo_ar: bool,

    /// Resolve BeiDou ambiguities
    #[cfg_attr(feature = "serde", serde(default))]
    pub bds_ar: bool,

    /// Known separation between both sites (m), moving base only.
    /// Zero deactivates the length constraint.
    #[cfg_attr(feature = "serde", serde(default))]
    pub baseline_nominal_m: f64,

    /// Sigma of the length constraint (m)
    #[cfg_attr(feature = "serde", serde(default))]
    pub baseline_sigma_m: f64,

    /// Reference site coordinates, in ECEF [m].
    /// Must be defined for any technique but [PositioningMode::MovingBase],
    /// where the reference state comes with every epoch.
    #[cfg_attr(feature = "serde", serde(default))]
    pub base_position_ecef_m: Option<(f64, f64, f64)>,

    /// Rover coordinates, in ECEF [m]: [PositioningMode::Fixed] only
    #[cfg_attr(feature = "serde", serde(default))]
    pub rover_position_ecef_m: Option<(f64, f64, f64)>,

    /// Interpolate reference site residuals to the rover sampling
    /// instant (post processing only)
    #[cfg_attr(feature = "serde", serde(default))]
    pub time_interpolation: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Default::default(),
            dynamics: false,
            iono: Default::default(),
            tropo: Default::default(),
            ambiguity: Default::default(),
            filter: Default::default(),
            elmin_deg: default_elmin_deg(),
            elmask_ar_deg: default_elmask_ar_deg(),
            elmask_hold_deg: default_elmask_ar_deg(),
            snr_mask: Default::default(),
            niter: default_niter(),
            max_innovation_m: default_max_innovation(),
            max_outage: default_max_outage(),
            min_fix: default_min_fix(),
            min_lock: 0,
            max_age_s: default_max_age(),
            process_noise_std: default_process_noise(),
            initial_std: default_initial_std(),
            code_phase_ratio: default_code_phase_ratio(),
            phase_err_m: default_phase_err(),
            phase_err_el_m: default_phase_err(),
            baseline_err_m: 0.0,
            sclk_stability: default_sclk_stability(),
            exterr: None,
            ar_ratio_threshold: default_ar_ratio(),
            glo_ar: false,
            bds_ar: false,
            baseline_nominal_m: 0.0,
            baseline_sigma_m: 0.0,
            base_position_ecef_m: None,
            rover_position_ecef_m: None,
            time_interpolation: false,
        }
    }
}

impl Config {
    /// Returns [Config] for static surveying with respect to the
    /// reference site coordinates, in meters ECEF.
    /// You can then customize [Self] as you will.
    pub fn static_preset(base_position_ecef_m: (f64, f64, f64)) -> Self {
        let mut s = Self::default();
        s.mode = PositioningMode::Static;
        s.base_position_ecef_m = Some(base_position_ecef_m);
        s
    }

    /// Returns [Config] for a roaming rover with respect to the
    /// reference site coordinates, in meters ECEF.
    /// You can then customize [Self] as you will.
    pub fn kinematic_preset(base_position_ecef_m: (f64, f64, f64)) -> Self {
        let mut s = Self::default();
        s.mode = PositioningMode::Kinematic;
        s.dynamics = true;
        s.base_position_ecef_m = Some(base_position_ecef_m);
        s
    }

    /// Returns [Config] for two roaming receivers separated by a known
    /// distance (typically: both antennas rigidly mounted on one carrier).
    /// You can then customize [Self] as you will.
    pub fn moving_base_preset(baseline_nominal_m: f64, baseline_sigma_m: f64) -> Self {
        let mut s = Self::default();
        s.mode = PositioningMode::MovingBase;
        s.dynamics = true;
        s.baseline_nominal_m = baseline_nominal_m;
        s.baseline_sigma_m = baseline_sigma_m;
        s
    }

    pub(crate) fn elmin_rad(&self) -> f64 {
        self.elmin_deg.to_radians()
    }

    pub(crate) fn elmask_ar_rad(&self) -> f64 {
        self.elmask_ar_deg.to_radians()
    }

    pub(crate) fn elmask_hold_rad(&self) -> f64 {
        self.elmask_hold_deg.to_radians()
    }
}
