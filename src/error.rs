use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Sampling instants must be monotonically increasing.
    /// The retained state is preserved when we abort with this error.
    #[error("non monotonic sampling instant")]
    NonMonotonicEpoch,

    /// Epoch observations must come rover first, reference site
    /// second, sorted by satellite within each block.
    #[error("unsorted observations")]
    UnsortedEpoch,

    /// Rover position is completely unknown (null seed and
    /// no retained state): undifferenced residuals cannot be formed.
    #[error("unknown rover position")]
    UnknownRoverPosition,

    /// Reference site coordinates are needed by any differential technique.
    #[error("unknown reference site position")]
    UnknownBasePosition,

    /// All satellites in sight were either masked, unhealthy or not
    /// observed by both sites: no double difference may be formed.
    #[error("no common satellite between rover and reference site")]
    NoCommonSatellites,

    /// Invalid orbital states or bad signal data may cause the algebric
    /// calculations to wind up here.
    #[error("failed to invert matrix")]
    MatrixInversion,

    /// The measurement covariance could not be inverted. Usually the
    /// sign of duplicated measurements being proposed.
    #[error("singular measurement covariance")]
    SingularMeasurementCovariance,

    /// State covariance is expected to remain positive definite
    /// through every update.
    #[error("state covariance is not positive definite")]
    NotPositiveDefinite,

    /// The residual model could not be evaluated at a proposed state
    /// (sigma point or iteration out of physical range).
    #[error("measurement model evaluation failed")]
    MeasurementModel,

    /// Factorization of the ambiguity covariance failed: the float
    /// solution is kept for this epoch.
    #[error("ambiguity factorization error")]
    AmbiguityFactorization,

    /// The integer search did not return any candidate.
    #[error("ambiguity search returned no candidate")]
    AmbiguitySearch,

    /// Best integer candidate did not pass the ratio test:
    /// the float solution is kept for this epoch.
    #[error("ambiguity validation failed")]
    AmbiguityValidation,

    /// The moving base length constraint was dropped for this epoch
    /// (linearization no longer holds).
    #[error("baseline length constraint rejected")]
    BaselineConstraintRejected,
}
