use std::{f64::consts::TAU, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::RouterError;

/// Waveform of a low-frequency oscillator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LfoShape {
    #[default]
    Sine,
    Square,
    Triangle,
    Sawtooth,
    /// Rising sawtooth.
    #[serde(rename = "rSawtooth")]
    RSawtooth,
    Noise,
}

impl FromStr for LfoShape {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sine" => Ok(Self::Sine),
            "square" => Ok(Self::Square),
            "triangle" => Ok(Self::Triangle),
            "sawtooth" => Ok(Self::Sawtooth),
            "rSawtooth" => Ok(Self::RSawtooth),
            "noise" => Ok(Self::Noise),
            other => Err(RouterError::msg(format!("unknown LFO shape `{other}`"))),
        }
    }
}

impl fmt::Display for LfoShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sine => "sine",
            Self::Square => "square",
            Self::Triangle => "triangle",
            Self::Sawtooth => "sawtooth",
            Self::RSawtooth => "rSawtooth",
            Self::Noise => "noise",
        };
        f.write_str(name)
    }
}

/// Evaluates `shape` at clock phase `delta` scaled by `rate`.
///
/// `delta` is the accumulated clock phase in radians. The result is always in
/// [0, 1] and depends only on the arguments.
pub fn evaluate(delta: f64, shape: LfoShape, rate: f64) -> f64 {
    let phase = delta * rate;
    let cycle = phase.rem_euclid(TAU) / TAU;

    let value = match shape {
        LfoShape::Sine => phase.sin() * 0.5 + 0.5,
        LfoShape::Square => {
            if cycle < 0.5 {
                1.0
            } else {
                0.0
            }
        }
        LfoShape::Triangle => 1.0 - (cycle * 2.0 - 1.0).abs(),
        LfoShape::Sawtooth => 1.0 - cycle,
        LfoShape::RSawtooth => cycle,
        LfoShape::Noise => value_noise(phase),
    };

    value.clamp(0.0, 1.0)
}

/// Smooth value noise: one lattice point per radian, cosine interpolated.
fn value_noise(x: f64) -> f64 {
    let cell = x.floor();
    let t = x - cell;
    let a = lattice(cell as i64);
    let b = lattice(cell as i64 + 1);
    let blend = (1.0 - (t * std::f64::consts::PI).cos()) * 0.5;
    a + (b - a) * blend
}

fn lattice(index: i64) -> f64 {
    let mut h = index as u64;
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    (h >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    const SHAPES: [LfoShape; 6] = [
        LfoShape::Sine,
        LfoShape::Square,
        LfoShape::Triangle,
        LfoShape::Sawtooth,
        LfoShape::RSawtooth,
        LfoShape::Noise,
    ];

    #[test]
    fn stays_in_unit_range() {
        for shape in SHAPES {
            for step in 0..500 {
                let value = evaluate(step as f64 * 0.37, shape, 1.7);
                assert!((0.0..=1.0).contains(&value), "{shape} produced {value}");
            }
        }
    }

    #[test]
    fn is_deterministic() {
        for shape in SHAPES {
            assert_eq!(evaluate(3.3, shape, 2.0), evaluate(3.3, shape, 2.0));
        }
    }

    #[test]
    fn known_points() {
        assert_relative_eq!(evaluate(0.0, LfoShape::Sine, 1.0), 0.5);
        assert_relative_eq!(evaluate(TAU / 4.0, LfoShape::Sine, 1.0), 1.0);
        assert_relative_eq!(evaluate(TAU / 4.0, LfoShape::Sine, 2.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(evaluate(TAU / 2.0, LfoShape::Triangle, 1.0), 1.0);
        assert_relative_eq!(evaluate(TAU / 4.0, LfoShape::RSawtooth, 1.0), 0.25);
        assert_relative_eq!(evaluate(TAU / 4.0, LfoShape::Sawtooth, 1.0), 0.75);
        assert_eq!(evaluate(1.0, LfoShape::Square, 1.0), 1.0);
        assert_eq!(evaluate(4.0, LfoShape::Square, 1.0), 0.0);
    }

    #[test]
    fn parses_shape_names() {
        assert_eq!("rSawtooth".parse::<LfoShape>().unwrap(), LfoShape::RSawtooth);
        assert_eq!(LfoShape::Noise.to_string(), "noise");
        assert!("wobble".parse::<LfoShape>().is_err());
    }
}
