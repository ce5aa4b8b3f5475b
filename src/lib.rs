pub mod particles;

pub use particles::{
    EmitterShape, EmitterTransform, FrameCycle, ParticleError, ParticleStats, ParticleSystem, ParticleSystemConfig,
    ParticleWorld, Result, SystemId, ValueExpression,
};
