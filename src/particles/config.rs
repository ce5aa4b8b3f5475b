use glam::{UVec2, Vec3};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::particles::constants::{MAX_NOISE_OCTAVES, MAX_PARTICLES, MIN_NOISE_OCTAVES};
use crate::particles::curve::BezierPoints;
use crate::particles::error::{ParticleError, Result};
use crate::particles::shape::EmitterShape;
use crate::particles::value::ValueExpression;

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(ConfigFormat::Json),
            Some("toml") => Some(ConfigFormat::Toml),
            _ => None,
        }
    }
}

/// Where particles live once spawned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationSpace {
    /// Particles follow the emitter
    #[default]
    Local,
    /// Particles stay where they were spawned when the emitter moves
    World,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn to_vec3(self) -> Vec3 {
        Vec3::new(self.r, self.g, self.b)
    }
}

/// Start color range. One random ratio per particle interpolates all three
/// channels together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorRange {
    pub min: Rgb,
    pub max: Rgb,
}

impl ColorRange {
    pub fn solid(color: Rgb) -> Self {
        Self {
            min: color,
            max: color,
        }
    }
}

impl Default for ColorRange {
    fn default() -> Self {
        Self::solid(Rgb::WHITE)
    }
}

/// Scheduled burst emission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    /// Offset into the loop in seconds
    pub time: f64,
    /// How many times the burst repeats per loop
    pub cycles: u32,
    /// Seconds between cycles
    pub interval: f64,
    /// Chance in [0, 1] that this loop's occurrence fires at all
    pub probability: f64,
    /// Particles per cycle
    pub count: ValueExpression,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            time: 0.0,
            cycles: 1,
            interval: 0.0,
            probability: 1.0,
            count: ValueExpression::constant(1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmissionConfig {
    /// Particles per second
    pub rate_over_time: ValueExpression,
    /// Particles per unit of emitter travel
    pub rate_over_distance: ValueExpression,
    pub bursts: Vec<BurstConfig>,
}

impl Default for EmissionConfig {
    fn default() -> Self {
        Self {
            rate_over_time: ValueExpression::constant(10.0),
            rate_over_distance: ValueExpression::constant(0.0),
            bursts: Vec::new(),
        }
    }
}

/// Optional per-axis values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisExpressions {
    pub x: Option<ValueExpression>,
    pub y: Option<ValueExpression>,
    pub z: Option<ValueExpression>,
}

impl AxisExpressions {
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none()
    }

    pub fn axes(&self) -> [Option<&ValueExpression>; 3] {
        [self.x.as_ref(), self.y.as_ref(), self.z.as_ref()]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityOverLifetime {
    pub is_active: bool,
    /// Units per second along each axis
    pub linear: AxisExpressions,
    /// Radians per second around each axis of the spawn origin
    pub orbital: AxisExpressions,
}

/// Multiplier curve over a particle's lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveOverLifetime {
    pub is_active: bool,
    pub lifetime_curve: ValueExpression,
}

impl Default for CurveOverLifetime {
    fn default() -> Self {
        Self {
            is_active: false,
            lifetime_curve: ValueExpression::bezier(BezierPoints::flat(1.0), 1.0),
        }
    }
}

/// Per-channel multipliers against the start color
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorOverLifetime {
    pub is_active: bool,
    pub r: ValueExpression,
    pub g: ValueExpression,
    pub b: ValueExpression,
}

impl Default for ColorOverLifetime {
    fn default() -> Self {
        Self {
            is_active: false,
            r: ValueExpression::constant(1.0),
            g: ValueExpression::constant(1.0),
            b: ValueExpression::constant(1.0),
        }
    }
}

/// Constant spin; each particle draws its rate from `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationOverLifetime {
    pub is_active: bool,
    pub min: f64,
    pub max: f64,
}

impl Default for RotationOverLifetime {
    fn default() -> Self {
        Self {
            is_active: false,
            min: 0.0,
            max: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub is_active: bool,
    /// Give each particle its own phase so simultaneous spawns diverge
    pub use_random_offset: bool,
    pub strength: f32,
    pub position_amount: f32,
    pub rotation_amount: f32,
    pub size_amount: f32,
    pub frequency: f64,
    pub octaves: usize,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            is_active: false,
            use_random_offset: false,
            strength: 1.0,
            position_amount: 1.0,
            rotation_amount: 0.0,
            size_amount: 0.0,
            frequency: 0.5,
            octaves: 1,
        }
    }
}

/// How the renderer advances texture-sheet frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeMode {
    /// Walk the whole sheet once over the particle lifetime
    #[default]
    Lifetime,
    /// Advance at a fixed frame rate
    Fps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureSheetAnimation {
    pub tiles: UVec2,
    pub time_mode: TimeMode,
    pub fps: f32,
    pub start_frame: ValueExpression,
}

impl Default for TextureSheetAnimation {
    fn default() -> Self {
        Self {
            tiles: UVec2::ONE,
            time_mode: TimeMode::Lifetime,
            fps: 30.0,
            start_frame: ValueExpression::constant(0.0),
        }
    }
}

/// Opaque texture reference, passed through to the renderer untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Blending {
    None,
    #[default]
    Normal,
    Additive,
    Subtractive,
    Multiply,
}

/// Hints forwarded to the renderer; the simulation never reads them
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererHints {
    pub blending: Blending,
    pub transparent: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub texture: Option<TextureHandle>,
}

impl Default for RendererHints {
    fn default() -> Self {
        Self {
            blending: Blending::Normal,
            transparent: true,
            depth_test: true,
            depth_write: false,
            texture: None,
        }
    }
}

/// Full description of one particle system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleSystemConfig {
    /// Loop length in seconds
    pub duration: f32,
    pub looping: bool,
    /// Seconds before emission starts
    pub start_delay: f32,
    /// Seconds
    pub start_lifetime: ValueExpression,
    pub start_speed: ValueExpression,
    pub start_size: ValueExpression,
    pub start_opacity: ValueExpression,
    pub start_rotation: ValueExpression,
    pub start_color: ColorRange,
    /// Downward acceleration in world space
    pub gravity: f32,
    pub simulation_space: SimulationSpace,
    pub max_particles: usize,
    pub emission: EmissionConfig,
    pub shape: EmitterShape,
    pub velocity_over_lifetime: VelocityOverLifetime,
    pub size_over_lifetime: CurveOverLifetime,
    pub opacity_over_lifetime: CurveOverLifetime,
    pub color_over_lifetime: ColorOverLifetime,
    pub rotation_over_lifetime: RotationOverLifetime,
    pub noise: NoiseConfig,
    pub texture_sheet_animation: TextureSheetAnimation,
    pub renderer: RendererHints,
    /// Seed for the system's random source; entropy when absent
    pub seed: Option<u64>,
}

impl Default for ParticleSystemConfig {
    fn default() -> Self {
        Self {
            duration: 5.0,
            looping: true,
            start_delay: 0.0,
            start_lifetime: ValueExpression::constant(5.0),
            start_speed: ValueExpression::constant(1.0),
            start_size: ValueExpression::constant(1.0),
            start_opacity: ValueExpression::constant(1.0),
            start_rotation: ValueExpression::constant(0.0),
            start_color: ColorRange::default(),
            gravity: 0.0,
            simulation_space: SimulationSpace::Local,
            max_particles: 100,
            emission: EmissionConfig::default(),
            shape: EmitterShape::default(),
            velocity_over_lifetime: VelocityOverLifetime::default(),
            size_over_lifetime: CurveOverLifetime::default(),
            opacity_over_lifetime: CurveOverLifetime::default(),
            color_over_lifetime: ColorOverLifetime::default(),
            rotation_over_lifetime: RotationOverLifetime::default(),
            noise: NoiseConfig::default(),
            texture_sheet_animation: TextureSheetAnimation::default(),
            renderer: RendererHints::default(),
            seed: None,
        }
    }
}

impl ParticleSystemConfig {
    pub fn from_json_str(source: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a `.json` or `.toml` config file
    pub fn load(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| ParticleError::UnsupportedConfigFormat(path.to_path_buf()))?;
        let source = std::fs::read_to_string(path)?;

        let config = match format {
            ConfigFormat::Json => Self::from_json_str(&source)?,
            ConfigFormat::Toml => Self::from_toml_str(&source)?,
        };
        log::debug!("Loaded particle config: {}", path.display());
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Structural checks the type system cannot express
    pub fn validate(&self) -> Result<()> {
        if self.max_particles == 0 || self.max_particles > MAX_PARTICLES {
            return Err(ParticleError::InvalidConfig(format!(
                "max_particles must be in 1..={}, got {}",
                MAX_PARTICLES, self.max_particles
            )));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(ParticleError::InvalidConfig(format!(
                "duration must be a non-negative number of seconds, got {}",
                self.duration
            )));
        }
        if !self.start_delay.is_finite() || self.start_delay < 0.0 {
            return Err(ParticleError::InvalidConfig(format!(
                "start_delay must be non-negative, got {}",
                self.start_delay
            )));
        }
        for (index, burst) in self.emission.bursts.iter().enumerate() {
            if !(0.0..=1.0).contains(&burst.probability) {
                return Err(ParticleError::InvalidConfig(format!(
                    "burst {} probability must be in [0, 1], got {}",
                    index, burst.probability
                )));
            }
            if burst.time < 0.0 || burst.interval < 0.0 {
                return Err(ParticleError::InvalidConfig(format!(
                    "burst {} time and interval must be non-negative",
                    index
                )));
            }
        }
        let tiles = self.texture_sheet_animation.tiles;
        if tiles.x == 0 || tiles.y == 0 {
            return Err(ParticleError::InvalidConfig(format!(
                "texture sheet needs at least one tile per axis, got {}x{}",
                tiles.x, tiles.y
            )));
        }
        if self.noise.is_active && !(MIN_NOISE_OCTAVES..=MAX_NOISE_OCTAVES).contains(&self.noise.octaves) {
            return Err(ParticleError::InvalidConfig(format!(
                "noise octaves must be in {}..={}, got {}",
                MIN_NOISE_OCTAVES, MAX_NOISE_OCTAVES, self.noise.octaves
            )));
        }
        Ok(())
    }
}
