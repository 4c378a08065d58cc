//! Perceptual interpolation between two chromaticities in OKLab / OKLCH.

use std::f64::consts::PI;

use super::{clamp_to, Gamut, WHITE_POINT, XY};

/// Below this chroma a colour is treated as achromatic and its hue ignored.
pub const ACHROMATIC_CHROMA: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OkLab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

impl OkLab {
    /// Converts a chromaticity at unit luminance.
    pub fn from_xy(xy: XY) -> Self {
        let y = xy.y.max(f64::EPSILON);
        let xyz = [xy.x / y, 1.0, (1.0 - xy.x - xy.y) / y];

        let lms = [
            0.818_933_010_1 * xyz[0] + 0.361_866_742_4 * xyz[1] - 0.128_859_713_7 * xyz[2],
            0.032_984_543_6 * xyz[0] + 0.929_311_871_5 * xyz[1] + 0.036_145_638_7 * xyz[2],
            0.048_200_301_8 * xyz[0] + 0.264_366_269_1 * xyz[1] + 0.633_851_707_0 * xyz[2],
        ]
        .map(f64::cbrt);

        Self {
            l: 0.210_454_255_3 * lms[0] + 0.793_617_785_0 * lms[1] - 0.004_072_046_8 * lms[2],
            a: 1.977_998_495_1 * lms[0] - 2.428_592_205_0 * lms[1] + 0.450_593_709_9 * lms[2],
            b: 0.025_904_037_1 * lms[0] + 0.782_771_766_2 * lms[1] - 0.808_675_766_0 * lms[2],
        }
    }

    pub fn to_xy(self) -> XY {
        let lms = [
            self.l + 0.396_337_777_4 * self.a + 0.215_803_757_3 * self.b,
            self.l - 0.105_561_345_8 * self.a - 0.063_854_172_8 * self.b,
            self.l - 0.089_484_177_5 * self.a - 1.291_485_548_0 * self.b,
        ]
        .map(|c| c * c * c);

        let x = 1.227_013_851_1 * lms[0] - 0.557_799_980_7 * lms[1] + 0.281_256_149_0 * lms[2];
        let y = -0.040_580_178_4 * lms[0] + 1.112_256_869_6 * lms[1] - 0.071_676_678_7 * lms[2];
        let z = -0.076_381_284_5 * lms[0] - 0.421_481_978_4 * lms[1] + 1.586_163_220_4 * lms[2];

        let sum = x + y + z;
        if sum <= 0.0 || !sum.is_finite() {
            return WHITE_POINT;
        }
        XY::new(x / sum, y / sum)
    }

    pub fn chroma(&self) -> f64 {
        self.a.hypot(self.b)
    }

    pub fn hue(&self) -> f64 {
        self.b.atan2(self.a)
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a * (1.0 - t) + b * t
}

/// Blends from `a` to `b` by `t` in `[0, 1]`.
///
/// Both endpoints and the result are clamped into `gamut`. `t == 0` and
/// `t == 1` return the clamped endpoints exactly, and swapping the endpoints
/// while mirroring `t` yields the same colour.
pub fn interpolate(a: XY, b: XY, t: f64, gamut: Option<&Gamut>) -> XY {
    let t = t.clamp(0.0, 1.0);
    // Evaluate in a fixed endpoint order so (a, b, t) and (b, a, 1 - t) run
    // the exact same arithmetic.
    if (a.x, a.y) > (b.x, b.y) {
        return interpolate_ordered(b, a, 1.0 - t, gamut);
    }
    interpolate_ordered(a, b, t, gamut)
}

fn interpolate_ordered(a: XY, b: XY, t: f64, gamut: Option<&Gamut>) -> XY {
    let start = clamp_to(gamut, a);
    let end = clamp_to(gamut, b);
    if t <= 0.0 {
        return start;
    }
    if t >= 1.0 {
        return end;
    }

    let from = OkLab::from_xy(start);
    let to = OkLab::from_xy(end);
    let (from_chroma, to_chroma) = (from.chroma(), to.chroma());
    let from_chromatic = from_chroma >= ACHROMATIC_CHROMA;
    let to_chromatic = to_chroma >= ACHROMATIC_CHROMA;

    let mixed = if !from_chromatic && !to_chromatic {
        OkLab {
            l: lerp(from.l, to.l, t),
            a: lerp(from.a, to.a, t),
            b: lerp(from.b, to.b, t),
        }
    } else {
        let hue = match (from_chromatic, to_chromatic) {
            (true, true) => {
                from.hue() + hue_delta(from.hue(), to.hue(), from_chroma, to_chroma) * t
            }
            (true, false) => from.hue(),
            _ => to.hue(),
        };
        let chroma = lerp(from_chroma, to_chroma, t);
        OkLab {
            l: lerp(from.l, to.l, t),
            a: chroma * hue.cos(),
            b: chroma * hue.sin(),
        }
    };

    clamp_to(gamut, mixed.to_xy())
}

/// Signed shortest arc from `from` to `to`. Opposite hues turn in the
/// direction of the more saturated endpoint.
fn hue_delta(from: f64, to: f64, from_chroma: f64, to_chroma: f64) -> f64 {
    let mut delta = (to - from).rem_euclid(2.0 * PI);
    if delta > PI {
        delta -= 2.0 * PI;
    }
    if (delta.abs() - PI).abs() < 1e-12 {
        delta = if to_chroma >= from_chroma { PI } else { -PI };
    }
    delta
}
