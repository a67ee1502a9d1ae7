#![doc = include_str!("../README.md")]
#![cfg_attr(docrs, feature(doc_cfg))]

extern crate gnss_rs as gnss;

// private modules
mod bias;
mod cfg;
mod constants;
mod error;
mod geometry;
mod navigation;
mod observation;
mod rtk;
mod solutions;
mod track;

#[cfg(test)]
mod tests;

// prelude
pub mod prelude {
    pub use crate::bias::KbModel;
    pub use crate::cfg::{
        AmbiguityMode, Config, ExtendedErrorModel, FilterVariant, IonoOption, PositioningMode,
        SnrMask, TropoOption,
    };
    pub use crate::constants::MAXSAT;
    pub use crate::error::Error;
    pub use crate::observation::{Observation, SatelliteState, Station};
    pub use crate::rtk::{BaseState, EpochInput, RtkSolver};
    pub use crate::solutions::{Solution, SolutionStatus};
    // re-export
    pub use gnss::prelude::{Constellation, SV};
    pub use hifitime::{Duration, Epoch, TimeScale};
    pub use nalgebra::Vector3;
}
