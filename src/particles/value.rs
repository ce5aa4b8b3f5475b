use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::particles::curve::{BezierCurve, BezierPoints, CurveCache};
use crate::particles::easing::Easing;
use crate::particles::error::{ParticleError, Result};
use crate::particles::system::SystemId;

/// Authored value: a constant, a random range or a lifetime curve.
///
/// Serialized as a bare number, a `{ "min", "max" }` object, or a curve
/// object tagged with `"type": "bezier" | "easing"`. Anything else fails to
/// deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueExpression {
    Constant(f64),
    RandomRange { min: f64, max: f64 },
    LifetimeCurve(LifetimeCurve),
}

/// Curve sampled against a normalized time, pre-multiplied by `scale`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifetimeCurve {
    Bezier {
        points: BezierPoints,
        #[serde(default = "default_scale")]
        scale: f64,
    },
    Easing {
        function: Easing,
        #[serde(default = "default_scale")]
        scale: f64,
    },
}

fn default_scale() -> f64 {
    1.0
}

impl ValueExpression {
    pub fn constant(value: f64) -> Self {
        ValueExpression::Constant(value)
    }

    pub fn random(min: f64, max: f64) -> Self {
        ValueExpression::RandomRange { min, max }
    }

    pub fn bezier(points: BezierPoints, scale: f64) -> Self {
        ValueExpression::LifetimeCurve(LifetimeCurve::Bezier { points, scale })
    }

    pub fn easing(function: Easing, scale: f64) -> Self {
        ValueExpression::LifetimeCurve(LifetimeCurve::Easing { function, scale })
    }

    pub fn is_lifetime_curve(&self) -> bool {
        matches!(self, ValueExpression::LifetimeCurve(_))
    }

    /// Resolve into a runtime value, compiling Bezier curves through `cache`
    /// on behalf of `owner`
    pub fn resolve(&self, owner: SystemId, cache: &mut CurveCache) -> Result<ResolvedValue> {
        match self {
            ValueExpression::RandomRange { min, max } => Ok(ResolvedValue::RandomRange {
                min: *min,
                max: *max,
            }),
            _ => self.resolve_curve(owner, cache).map(ResolvedValue::Curve),
        }
    }

    /// Resolve a value that is sampled every frame. Random ranges have no
    /// meaning there and are rejected.
    pub fn resolve_curve(&self, owner: SystemId, cache: &mut CurveCache) -> Result<CurveValue> {
        match self {
            ValueExpression::Constant(value) => Ok(CurveValue::Constant(*value)),
            ValueExpression::RandomRange { min, max } => Err(ParticleError::InvalidConfig(format!(
                "random range {{ min: {}, max: {} }} cannot be sampled over lifetime",
                min, max
            ))),
            ValueExpression::LifetimeCurve(LifetimeCurve::Bezier { points, scale }) => {
                Ok(CurveValue::Bezier {
                    curve: cache.get_or_create(owner, points)?,
                    scale: *scale,
                })
            }
            ValueExpression::LifetimeCurve(LifetimeCurve::Easing { function, scale }) => {
                Ok(CurveValue::Easing {
                    function: *function,
                    scale: *scale,
                })
            }
        }
    }
}

impl From<f64> for ValueExpression {
    fn from(value: f64) -> Self {
        ValueExpression::Constant(value)
    }
}

/// Deterministic value of a normalized time
#[derive(Debug, Clone)]
pub enum CurveValue {
    Constant(f64),
    Bezier { curve: Arc<BezierCurve>, scale: f64 },
    Easing { function: Easing, scale: f64 },
}

impl CurveValue {
    pub fn sample(&self, t: f64) -> f64 {
        match self {
            CurveValue::Constant(value) => *value,
            CurveValue::Bezier { curve, scale } => curve.evaluate(t) * scale,
            CurveValue::Easing { function, scale } => function.apply(t) * scale,
        }
    }

    /// Whether the value actually changes with `t`
    pub fn varies_over_time(&self) -> bool {
        !matches!(self, CurveValue::Constant(_))
    }
}

/// Runtime form of a [`ValueExpression`]
#[derive(Debug, Clone)]
pub enum ResolvedValue {
    RandomRange { min: f64, max: f64 },
    Curve(CurveValue),
}

impl ResolvedValue {
    /// Evaluate at normalized time `t`. Random ranges ignore `t`, and a
    /// degenerate range returns `min` without touching `rng`.
    pub fn evaluate<R: Rng + ?Sized>(&self, t: f64, rng: &mut R) -> f64 {
        match self {
            ResolvedValue::RandomRange { min, max } => {
                if min == max {
                    *min
                } else {
                    min + rng.gen::<f64>() * (max - min)
                }
            }
            ResolvedValue::Curve(curve) => curve.sample(t),
        }
    }

    /// Evaluate at the start of a lifetime (`t = 0`)
    pub fn evaluate_at_start<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.evaluate(0.0, rng)
    }

    /// The lifetime curve behind this value, if it varies over time
    pub fn lifetime_curve(&self) -> Option<&CurveValue> {
        match self {
            ResolvedValue::Curve(curve) if curve.varies_over_time() => Some(curve),
            _ => None,
        }
    }
}
