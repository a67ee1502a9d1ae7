//! End to end scenarios over synthetic constellations.

mod data;
mod scenarios;

pub(crate) use data::Scenario;

/// Surveyed rover coordinates used throughout the scenarios (ECEF, m)
pub(crate) const REFERENCE_COORDS_ECEF_M: (f64, f64, f64) = (3977260.0, 1022249.0, 4858614.0);
