//! Simulation constants - single source of truth for the particle kernels.
//!
//! The "feel" values below were tuned by eye. Keep them numerically stable;
//! emitters authored against them depend on the exact magnitudes.

/// Hard upper bound for `max_particles` on a single system
pub const MAX_PARTICLES: usize = 1_000_000;

/// Milliseconds per second, used for every ms <-> s conversion
pub const MS_PER_SECOND: f64 = 1000.0;

/// Rotation-over-lifetime rate scale, applied as `rate * delta * SCALE`
pub const ROTATION_OVER_LIFETIME_SCALE: f32 = 0.02;

/// Noise lookup coordinate scale: `(lifetime + offset) * SCALE * strength`
pub const NOISE_POSITION_SCALE: f32 = 10.0;

/// Noise amplitude scale: `SCALE * strength`
pub const NOISE_POWER_SCALE: f32 = 0.15;

/// Per-particle noise phase offsets are drawn from `[0, NOISE_OFFSET_RANGE)`
pub const NOISE_OFFSET_RANGE: f32 = 100.0;

/// Octave limits accepted for the fractal noise sampler
pub const MIN_NOISE_OCTAVES: usize = 1;
pub const MAX_NOISE_OCTAVES: usize = 8;
