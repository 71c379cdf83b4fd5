//! Force descriptors and falloff
//!
//! A descriptor says whether an entity emits and/or feels a force category,
//! how strong the force is at the source (signed: positive attracts, negative
//! repels), how far it reaches, and how it fades with distance.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::vec2::Vec2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DescriptorError {
    #[error("max force value must be finite, got {0}")]
    NonFiniteForce(f32),
    #[error("max range must be finite and non-negative, got {0}")]
    InvalidRange(f32),
    #[error("an applier needs a positive max range, got {0}")]
    ApplierWithoutRange(f32),
    #[error("descriptor is neither applier nor receiver")]
    NoRole,
    #[error("falloff curve needs at least one key")]
    EmptyCurve,
    #[error("falloff curve key ({t}, {value}) is not finite")]
    NonFiniteCurveKey { t: f32, value: f32 },
}

/// How force fades from the source (t = 0) to the edge of its range (t = 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FalloffPolicy {
    /// 1 - t
    #[default]
    Linear,
    /// 1 - t²
    Quadratic,
    /// Sampled from the descriptor's curve; linear when no curve is set
    CustomCurve,
}

/// Keyframe of a custom falloff curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveKey {
    pub t: f32,
    pub value: f32,
}

/// Piecewise-linear falloff curve, clamped to its first and last keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FalloffCurve {
    keys: Vec<CurveKey>,
}

impl FalloffCurve {
    /// Build a curve from `(t, value)` keys in any order
    pub fn new(keys: impl IntoIterator<Item = (f32, f32)>) -> Result<Self, DescriptorError> {
        let mut keys: Vec<CurveKey> = keys.into_iter().map(|(t, value)| CurveKey { t, value }).collect();
        if keys.is_empty() {
            return Err(DescriptorError::EmptyCurve);
        }
        if let Some(bad) = keys.iter().find(|k| !k.t.is_finite() || !k.value.is_finite()) {
            return Err(DescriptorError::NonFiniteCurveKey { t: bad.t, value: bad.value });
        }
        keys.sort_by(|a, b| a.t.total_cmp(&b.t));
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[CurveKey] {
        &self.keys
    }

    pub fn evaluate(&self, t: f32) -> f32 {
        let (Some(first), Some(last)) = (self.keys.first(), self.keys.last()) else {
            return 0.0;
        };
        if t <= first.t {
            return first.value;
        }
        if t >= last.t {
            return last.value;
        }

        // First key strictly past t; t > first.t so idx >= 1
        let idx = self.keys.partition_point(|k| k.t <= t);
        let (a, b) = (self.keys[idx - 1], self.keys[idx]);
        let span = b.t - a.t;
        if span <= 0.0 {
            return b.value;
        }
        a.value + (b.value - a.value) * ((t - a.t) / span)
    }
}

/// Which way a source pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarity {
    Attract,
    Repel,
}

impl Polarity {
    /// Polarity of a signed force value; zero has none
    pub fn of(force_value: f32) -> Option<Polarity> {
        if force_value > 0.0 {
            Some(Polarity::Attract)
        } else if force_value < 0.0 {
            Some(Polarity::Repel)
        } else {
            None
        }
    }
}

/// Multiplier for normalized distance `t` (clamped to [0, 1])
pub fn falloff_multiplier(policy: FalloffPolicy, curve: Option<&FalloffCurve>, t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    let multiplier = match (policy, curve) {
        (FalloffPolicy::Linear, _) | (FalloffPolicy::CustomCurve, None) => 1.0 - t,
        (FalloffPolicy::Quadratic, _) => 1.0 - t * t,
        (FalloffPolicy::CustomCurve, Some(curve)) => curve.evaluate(t),
    };
    if multiplier.is_finite() {
        multiplier
    } else {
        0.0
    }
}

/// Force a source at `source` exerts on a receiver at `receiver`
///
/// Points from the receiver toward the source, reversed for negative force values.
/// Returns None when the pair is out of range or coincident (no direction).
pub fn contribution(
    source: Vec2,
    receiver: Vec2,
    force_value: f32,
    max_range: f32,
    falloff: FalloffPolicy,
    curve: Option<&FalloffCurve>,
) -> Option<Vec2> {
    if max_range <= 0.0 || force_value == 0.0 {
        return None;
    }

    let (direction, distance) = (source - receiver).normalize_with_length();
    if distance == 0.0 || distance > max_range {
        return None;
    }

    let magnitude = force_value.abs() * falloff_multiplier(falloff, curve, distance / max_range);
    let direction = if force_value < 0.0 { -direction } else { direction };
    Some(direction * magnitude)
}

/// Per-entity, per-force-category role and strength
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceDescriptor {
    pub is_applier: bool,
    pub is_receiver: bool,
    /// Signed strength at the source: positive attracts, negative repels
    pub max_force_value: f32,
    /// Force scales from full strength at the source to zero at this distance
    pub max_range: f32,
    pub falloff: FalloffPolicy,
    /// Only used with `FalloffPolicy::CustomCurve`
    #[serde(default)]
    pub curve: Option<FalloffCurve>,
}

impl ForceDescriptor {
    /// Source that also feels the force (the usual case for massive bodies)
    pub fn new(max_force_value: f32, max_range: f32) -> Self {
        Self {
            is_applier: true,
            is_receiver: true,
            max_force_value,
            max_range,
            falloff: FalloffPolicy::Linear,
            curve: None,
        }
    }

    /// Source only
    pub fn applier(max_force_value: f32, max_range: f32) -> Self {
        Self {
            is_receiver: false,
            ..Self::new(max_force_value, max_range)
        }
    }

    /// Feels the force but emits none
    pub fn receiver() -> Self {
        Self {
            is_applier: false,
            ..Self::new(0.0, 0.0)
        }
    }

    pub fn with_falloff(mut self, falloff: FalloffPolicy) -> Self {
        self.falloff = falloff;
        self
    }

    pub fn with_curve(mut self, curve: FalloffCurve) -> Self {
        self.falloff = FalloffPolicy::CustomCurve;
        self.curve = Some(curve);
        self
    }

    pub fn validate(&self) -> Result<(), DescriptorError> {
        if !self.is_applier && !self.is_receiver {
            return Err(DescriptorError::NoRole);
        }
        if !self.max_force_value.is_finite() {
            return Err(DescriptorError::NonFiniteForce(self.max_force_value));
        }
        if !self.max_range.is_finite() || self.max_range < 0.0 {
            return Err(DescriptorError::InvalidRange(self.max_range));
        }
        if self.is_applier && self.max_range == 0.0 {
            return Err(DescriptorError::ApplierWithoutRange(self.max_range));
        }
        Ok(())
    }

    pub fn polarity(&self) -> Option<Polarity> {
        Polarity::of(self.max_force_value)
    }

    /// Force magnitude at `distance`, or None beyond max range
    pub fn magnitude_at(&self, distance: f32) -> Option<f32> {
        if distance < 0.0 || distance > self.max_range {
            return None;
        }
        let t = if self.max_range > 0.0 { distance / self.max_range } else { 0.0 };
        Some(self.max_force_value.abs() * falloff_multiplier(self.falloff, self.curve.as_ref(), t))
    }

    /// Force this descriptor's source at `source` exerts on a receiver at `receiver`
    pub fn force_on(&self, source: Vec2, receiver: Vec2) -> Option<Vec2> {
        contribution(
            source,
            receiver,
            self.max_force_value,
            self.max_range,
            self.falloff,
            self.curve.as_ref(),
        )
    }
}

impl Default for ForceDescriptor {
    fn default() -> Self {
        Self::new(100.0, 10.0)
    }
}
