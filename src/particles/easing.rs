use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Easing functions usable as lifetime curves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    Linear,
    QuadraticIn,
    QuadraticOut,
    QuadraticInOut,
    CubicIn,
    CubicOut,
    CubicInOut,
    QuarticIn,
    QuarticOut,
    QuarticInOut,
    QuinticIn,
    QuinticOut,
    QuinticInOut,
    SinusoidalIn,
    SinusoidalOut,
    SinusoidalInOut,
    ExponentialIn,
    ExponentialOut,
    ExponentialInOut,
    CircularIn,
    CircularOut,
    CircularInOut,
    ElasticIn,
    ElasticOut,
    ElasticInOut,
    BackIn,
    BackOut,
    BackInOut,
    BounceIn,
    BounceOut,
    BounceInOut,
}

const BACK_OVERSHOOT: f64 = 1.70158;
const BACK_IN_OUT_OVERSHOOT: f64 = BACK_OVERSHOOT * 1.525;

impl Easing {
    /// Evaluate the easing at `t` in `[0, 1]`
    pub fn apply(self, t: f64) -> f64 {
        match self {
            Easing::Linear => t,

            Easing::QuadraticIn => t * t,
            Easing::QuadraticOut => t * (2.0 - t),
            Easing::QuadraticInOut => {
                let k = t * 2.0;
                if k < 1.0 {
                    0.5 * k * k
                } else {
                    let k = k - 1.0;
                    -0.5 * (k * (k - 2.0) - 1.0)
                }
            }

            Easing::CubicIn => t * t * t,
            Easing::CubicOut => {
                let k = t - 1.0;
                k * k * k + 1.0
            }
            Easing::CubicInOut => {
                let k = t * 2.0;
                if k < 1.0 {
                    0.5 * k * k * k
                } else {
                    let k = k - 2.0;
                    0.5 * (k * k * k + 2.0)
                }
            }

            Easing::QuarticIn => t.powi(4),
            Easing::QuarticOut => 1.0 - (t - 1.0).powi(4),
            Easing::QuarticInOut => {
                let k = t * 2.0;
                if k < 1.0 {
                    0.5 * k.powi(4)
                } else {
                    -0.5 * ((k - 2.0).powi(4) - 2.0)
                }
            }

            Easing::QuinticIn => t.powi(5),
            Easing::QuinticOut => (t - 1.0).powi(5) + 1.0,
            Easing::QuinticInOut => {
                let k = t * 2.0;
                if k < 1.0 {
                    0.5 * k.powi(5)
                } else {
                    0.5 * ((k - 2.0).powi(5) + 2.0)
                }
            }

            Easing::SinusoidalIn => 1.0 - (t * PI / 2.0).cos(),
            Easing::SinusoidalOut => (t * PI / 2.0).sin(),
            Easing::SinusoidalInOut => 0.5 * (1.0 - (PI * t).cos()),

            Easing::ExponentialIn => {
                if t == 0.0 {
                    0.0
                } else {
                    1024f64.powf(t - 1.0)
                }
            }
            Easing::ExponentialOut => {
                if t == 1.0 {
                    1.0
                } else {
                    1.0 - 2f64.powf(-10.0 * t)
                }
            }
            Easing::ExponentialInOut => {
                if t == 0.0 {
                    return 0.0;
                }
                if t == 1.0 {
                    return 1.0;
                }
                let k = t * 2.0;
                if k < 1.0 {
                    0.5 * 1024f64.powf(k - 1.0)
                } else {
                    0.5 * (2.0 - 2f64.powf(-10.0 * (k - 1.0)))
                }
            }

            Easing::CircularIn => 1.0 - (1.0 - t * t).max(0.0).sqrt(),
            Easing::CircularOut => {
                let k = t - 1.0;
                (1.0 - k * k).max(0.0).sqrt()
            }
            Easing::CircularInOut => {
                let k = t * 2.0;
                if k < 1.0 {
                    -0.5 * ((1.0 - k * k).max(0.0).sqrt() - 1.0)
                } else {
                    let k = k - 2.0;
                    0.5 * ((1.0 - k * k).max(0.0).sqrt() + 1.0)
                }
            }

            Easing::ElasticIn => {
                if t == 0.0 || t == 1.0 {
                    return t;
                }
                -(2f64.powf(10.0 * (t - 1.0))) * ((t - 1.1) * 5.0 * PI).sin()
            }
            Easing::ElasticOut => {
                if t == 0.0 || t == 1.0 {
                    return t;
                }
                2f64.powf(-10.0 * t) * ((t - 0.1) * 5.0 * PI).sin() + 1.0
            }
            Easing::ElasticInOut => {
                if t == 0.0 || t == 1.0 {
                    return t;
                }
                let k = t * 2.0;
                if k < 1.0 {
                    -0.5 * 2f64.powf(10.0 * (k - 1.0)) * ((k - 1.1) * 5.0 * PI).sin()
                } else {
                    0.5 * 2f64.powf(-10.0 * (k - 1.0)) * ((k - 1.1) * 5.0 * PI).sin() + 1.0
                }
            }

            Easing::BackIn => t * t * ((BACK_OVERSHOOT + 1.0) * t - BACK_OVERSHOOT),
            Easing::BackOut => {
                let k = t - 1.0;
                k * k * ((BACK_OVERSHOOT + 1.0) * k + BACK_OVERSHOOT) + 1.0
            }
            Easing::BackInOut => {
                let s = BACK_IN_OUT_OVERSHOOT;
                let k = t * 2.0;
                if k < 1.0 {
                    0.5 * (k * k * ((s + 1.0) * k - s))
                } else {
                    let k = k - 2.0;
                    0.5 * (k * k * ((s + 1.0) * k + s) + 2.0)
                }
            }

            Easing::BounceIn => 1.0 - bounce_out(1.0 - t),
            Easing::BounceOut => bounce_out(t),
            Easing::BounceInOut => {
                if t < 0.5 {
                    (1.0 - bounce_out(1.0 - t * 2.0)) * 0.5
                } else {
                    bounce_out(t * 2.0 - 1.0) * 0.5 + 0.5
                }
            }
        }
    }
}

fn bounce_out(t: f64) -> f64 {
    if t < 1.0 / 2.75 {
        7.5625 * t * t
    } else if t < 2.0 / 2.75 {
        let k = t - 1.5 / 2.75;
        7.5625 * k * k + 0.75
    } else if t < 2.5 / 2.75 {
        let k = t - 2.25 / 2.75;
        7.5625 * k * k + 0.9375
    } else {
        let k = t - 2.625 / 2.75;
        7.5625 * k * k + 0.984375
    }
}
