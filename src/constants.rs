/// Speed of light in m.s⁻¹
pub const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;

/// Earth angular velocity, in WGS84 frame rad/s
pub const EARTH_ANGULAR_VEL_RAD: f64 = 7.2921151467E-5;

/// WGS84 Earth Frame Ellipsoid semi-major axis
pub const EARTH_SEMI_MAJOR_AXIS_WGS84: f64 = 6378137.0_f64;

/// L1/E1/B1-C carrier frequency (Hz)
pub const L1_FREQ_HZ: f64 = 1575.42E6;

/// L1 carrier wavelength (m), reference of the ionosphere frequency scaling
pub const L1_WAVELENGTH_M: f64 = SPEED_OF_LIGHT_M_S / L1_FREQ_HZ;

pub(crate) const NSAT_GPS: usize = 32;
pub(crate) const NSAT_GLO: usize = 27;
pub(crate) const NSAT_GAL: usize = 36;
pub(crate) const NSAT_BDS: usize = 46;
pub(crate) const NSAT_SBS: usize = 23;

/// Total number of satellite slots tracked by one session
pub const MAXSAT: usize = NSAT_GPS + NSAT_GLO + NSAT_GAL + NSAT_BDS + NSAT_SBS;

/// Initial variance of the receiver position (m²)
pub(crate) const VAR_POS: f64 = 30.0 * 30.0;

/// Initial variance of the receiver velocity ((m/s)²)
pub(crate) const VAR_VEL: f64 = 10.0 * 10.0;

/// Initial variance of the receiver acceleration ((m/s²)²)
pub(crate) const VAR_ACC: f64 = 10.0 * 10.0;

/// Initial variance of a troposphere gradient state (m²)
pub(crate) const VAR_GRADIENT: f64 = 0.001 * 0.001;

/// Initial zenith wet delay (m)
pub(crate) const INIT_ZWD_M: f64 = 0.15;

/// Obs outage (in epochs) above which an ionosphere state is dropped
pub(crate) const GAP_RESET_IONO: u32 = 120;

/// Pseudo measurement variance used when holding fixed ambiguities (cycle²)
pub(crate) const VAR_HOLD_AMB: f64 = 0.001;

/// Broadcast ionosphere model standard error factor
pub(crate) const ERR_BRDC_IONO: f64 = 0.5;

/// Nonlinearity threshold of the moving base length constraint
pub(crate) const BASELINE_NONLINEARITY: f64 = 0.1;

/// Reported AR ratio saturation
pub(crate) const MAX_RATIO: f64 = 999.9;

/// Time sync tolerance between both receivers, moving base scenario (s)
pub(crate) const MOVING_BASE_TTOL_S: f64 = 1.05;

/// Two time stamps closer than this are the same epoch (s)
pub(crate) const DTTOL_S: f64 = 0.005;
