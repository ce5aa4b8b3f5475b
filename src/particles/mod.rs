pub mod config;
pub mod constants;
pub mod curve;
pub mod easing;
pub mod emission;
pub mod error;
pub mod particle_data;
pub mod render_data;
pub mod shape;
pub mod system;
pub mod update;
pub mod value;
pub mod world;

pub use config::{
    Blending, BurstConfig, ColorRange, ConfigFormat, EmissionConfig, ParticleSystemConfig, RendererHints, Rgb,
    SimulationSpace, TextureHandle, TextureSheetAnimation, TimeMode,
};
pub use curve::{BezierCurve, BezierPoint, BezierPoints, CurveCache, CurveId};
pub use easing::Easing;
pub use emission::{BurstState, EmissionState, EmissionTick};
pub use error::{ParticleError, Result};
pub use particle_data::{ParticlePool, ParticleTemplate};
pub use render_data::{AttributeView, DirtyAttributes, ParticleUniforms};
pub use shape::{BoxEmitFrom, BoxShape, CircleShape, ConeShape, EmitterShape, RectangleShape, SphereShape};
pub use system::{
    CompleteEvent, EmitterTransform, FrameCycle, ParticleStats, ParticleSystem, SystemId, UpdateEvent,
};
pub use update::ModifierPipeline;
pub use value::{CurveValue, LifetimeCurve, ResolvedValue, ValueExpression};
pub use world::ParticleWorld;
