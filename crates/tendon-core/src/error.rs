use thiserror::Error;

use crate::skeleton::BoneId;

/// Top-level error type for tendon-core.
#[derive(Debug, Error)]
pub enum TendonError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Skeleton error: {0}")]
    Skeleton(#[from] SkeletonError),

    #[error("Solve error: {0}")]
    Solve(#[from] SolveError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid tolerance: {0} (must be > 0)")]
    InvalidTolerance(f32),

    #[error("Iteration count must be >= 1")]
    InvalidIterations,

    #[error("Invalid mass for joint {joint}: {mass} (must be > 0)")]
    InvalidMass { joint: usize, mass: f32 },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Structural errors raised while building or editing a skeleton.
///
/// Copy so it can be handed back from hot lookup paths without allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SkeletonError {
    #[error("Unknown bone: {0}")]
    UnknownBone(BoneId),

    #[error("Unknown parent bone: {0}")]
    UnknownParent(BoneId),

    #[error("A bone with this name already exists")]
    DuplicateName,

    #[error("Parenting {0} there would create a cycle")]
    CyclicParent(BoneId),

    #[error("Parent frame of {0} is not invertible")]
    SingularTransform(BoneId),

    #[error("Root transform is not invertible")]
    SingularRootTransform,
}

/// Conditions that abort one modifier for one tick.
///
/// These never cross the stack boundary: the stack logs them and moves on
/// to the next entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolveError {
    #[error("No target bound")]
    MissingTarget,

    #[error("No tip bound")]
    MissingTip,

    #[error("No pole bound")]
    MissingPole,

    #[error("No bone bound for joint {joint}")]
    MissingBone { joint: usize },

    #[error("No curve bound")]
    MissingCurve,

    #[error("Curve has no baked points")]
    EmptyCurve,

    #[error("Modifier has no joints")]
    NoJoints,

    #[error("Bone for joint {joint} has no length")]
    UnsetLength { joint: usize },

    #[error("Unknown bone: {0}")]
    UnknownBone(BoneId),

    #[error("Reference could not be resolved: {0}")]
    MissingReference(String),
}

impl From<SkeletonError> for SolveError {
    fn from(err: SkeletonError) -> Self {
        match err {
            SkeletonError::UnknownBone(id)
            | SkeletonError::UnknownParent(id)
            | SkeletonError::CyclicParent(id)
            | SkeletonError::SingularTransform(id) => Self::UnknownBone(id),
            other => Self::MissingReference(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tendon_error_from_config_error() {
        let err = ConfigError::InvalidTolerance(-1.0);
        let tendon_err: TendonError = err.into();
        assert!(matches!(tendon_err, TendonError::Config(_)));
        assert!(tendon_err.to_string().contains("-1"));
    }

    #[test]
    fn tendon_error_from_skeleton_error() {
        let err = SkeletonError::UnknownBone(BoneId(4));
        let tendon_err: TendonError = err.into();
        assert!(matches!(tendon_err, TendonError::Skeleton(_)));
        assert!(tendon_err.to_string().contains('4'));
    }

    #[test]
    fn tendon_error_from_solve_error() {
        let tendon_err: TendonError = SolveError::MissingTarget.into();
        assert!(matches!(tendon_err, TendonError::Solve(_)));
        assert!(tendon_err.to_string().contains("target"));
    }

    #[test]
    fn skeleton_error_converts_to_solve_error() {
        let solve: SolveError = SkeletonError::UnknownBone(BoneId(2)).into();
        assert_eq!(solve, SolveError::UnknownBone(BoneId(2)));

        let solve: SolveError = SkeletonError::SingularRootTransform.into();
        assert!(matches!(solve, SolveError::MissingReference(_)));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidMass { joint: 3, mass: 0.0 };
        assert_eq!(
            err.to_string(),
            "Invalid mass for joint 3: 0 (must be > 0)"
        );

        let err = ConfigError::InvalidValue {
            field: "tolerance".into(),
            message: "must be finite".into(),
        };
        assert_eq!(err.to_string(), "Invalid value for tolerance: must be finite");
    }

    #[test]
    fn solve_error_display() {
        assert_eq!(
            SolveError::MissingBone { joint: 1 }.to_string(),
            "No bone bound for joint 1"
        );
        assert_eq!(
            SolveError::MissingReference("arm/target".into()).to_string(),
            "Reference could not be resolved: arm/target"
        );
    }
}
