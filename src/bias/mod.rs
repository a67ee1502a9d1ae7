//! Atmosphere delay models: pure functions of the receiver position,
//! line of sight geometry and (ionosphere) broadcast parameters.

pub(crate) mod iono;
pub(crate) mod tropo;

pub use iono::KbModel;
