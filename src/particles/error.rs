use std::path::PathBuf;

use crate::particles::system::SystemId;

/// Errors raised while building or loading particle systems.
///
/// Everything here is a configuration problem. Running out of pool slots is
/// not an error: those spawn requests are dropped and counted in the stats.
#[derive(Debug, thiserror::Error)]
pub enum ParticleError {
    #[error("bezier curve has no control points")]
    EmptyBezierCurve,

    #[error("bezier anchor percentages must be non-decreasing (point {index})")]
    InvalidCurveAnchors { index: usize },

    #[error("invalid particle system config: {0}")]
    InvalidConfig(String),

    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported config format: {}", .0.display())]
    UnsupportedConfigFormat(PathBuf),

    #[error("unknown particle system: {0}")]
    UnknownSystem(SystemId),
}

pub type Result<T> = std::result::Result<T, ParticleError>;
