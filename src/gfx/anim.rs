use super::math::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum AnimError {
    #[error("duration must be a positive number of seconds, got {0}")]
    NonPositiveDuration(f32),
}

/// A strictly positive, finite duration in seconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Span(f32);

impl Span {
    pub fn new(secs: f32) -> Result<Self, AnimError> {
        if secs.is_finite() && secs > 0.0 {
            Ok(Self(secs))
        } else {
            Err(AnimError::NonPositiveDuration(secs))
        }
    }

    pub fn secs(self) -> f32 {
        self.0
    }
}

pub fn ease_in_out(t: f32) -> f32 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        -1.0 + (4.0 - 2.0 * t) * t
    }
}

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

// Overshoot constant for the back curves (~10% past the target).
const BACK_C1: f32 = 1.70158;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    #[default]
    Linear,
    QuadIn,
    QuadOut,
    QuadInOut,
    CubicInOut,
    SineInOut,
    BackOut,
}

impl Easing {
    /// Maps progress in [0, 1] onto the curve. `BackOut` leaves [0, 1] on the
    /// way to its end point.
    pub fn apply(self, t: f32) -> f32 {
        match self {
            Easing::Linear => t,
            Easing::QuadIn => t * t,
            Easing::QuadOut => t * (2.0 - t),
            Easing::QuadInOut => ease_in_out(t),
            Easing::CubicInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    let u = -2.0 * t + 2.0;
                    1.0 - u * u * u / 2.0
                }
            }
            Easing::SineInOut => -((std::f32::consts::PI * t).cos() - 1.0) / 2.0,
            Easing::BackOut => {
                let c3 = BACK_C1 + 1.0;
                let u = t - 1.0;
                1.0 + c3 * u * u * u + BACK_C1 * u * u
            }
        }
    }
}

/// Values that can be blended componentwise.
pub trait Lerp: Copy {
    fn lerp(self, to: Self, k: f32) -> Self;
}

impl Lerp for f32 {
    fn lerp(self, to: f32, k: f32) -> f32 {
        lerp(self, to, k)
    }
}

impl Lerp for Vec3 {
    fn lerp(self, to: Vec3, k: f32) -> Vec3 {
        Vec3::new(lerp(self.x, to.x, k), lerp(self.y, to.y, k), lerp(self.z, to.z, k))
    }
}

/// Value at fraction `t` along `curve`. The endpoints are returned exactly so
/// float error in a curve never leaves a property just shy of its target.
pub fn evaluate<T: Lerp>(start: T, end: T, t: f32, curve: Easing) -> T {
    if t <= 0.0 {
        start
    } else if t >= 1.0 {
        end
    } else {
        start.lerp(end, curve.apply(t))
    }
}

#[derive(Debug, Clone)]
pub struct Timeline {
    pub start_time: f32,
    pub duration: Span,
    pub current_time: f32,
}

impl Timeline {
    pub fn new(duration: Span) -> Self {
        Self {
            start_time: 0.0,
            duration,
            current_time: 0.0,
        }
    }

    pub fn start(&mut self, now: f32) {
        self.start_time = now;
        self.current_time = now;
    }

    pub fn update(&mut self, now: f32) {
        self.current_time = now;
    }

    pub fn progress(&self) -> f32 {
        let elapsed = self.current_time - self.start_time;
        (elapsed / self.duration.secs()).clamp(0.0, 1.0)
    }

    pub fn is_complete(&self) -> bool {
        self.progress() >= 1.0
    }
}
