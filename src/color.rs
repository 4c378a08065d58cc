//! Colour math: gamut handling and RGB <-> xy / HSV conversions.
//!
//! The controller scales are used at the edges of every function: brightness
//! and saturation in `[0, 254]`, hue in `[0, 65535]`, RGB channels in
//! `[0, 255]`.

use serde::{Deserialize, Serialize};

pub mod convert;
pub mod kelvin;
pub mod oklab;

/// Tolerance of the triangle containment test. Points on an edge (up to
/// floating point noise) are considered inside, which makes clamping idempotent.
const CONTAINS_EPSILON: f64 = 1e-12;

/// D65 white point, returned for colours without any chromaticity (black).
pub const WHITE_POINT: XY = XY {
    x: 0.3127,
    y: 0.3290,
};

pub const MAX_BRIGHTNESS: u16 = 254;
pub const MAX_HUE: u16 = 65535;
pub const MAX_SATURATION: u16 = 254;

/// A point in CIE 1931 xy chromaticity space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct XY {
    pub x: f64,
    pub y: f64,
}

impl XY {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn sub(self, other: XY) -> XY {
        XY::new(self.x - other.x, self.y - other.y)
    }

    fn dot(self, other: XY) -> f64 {
        self.x * other.x + self.y * other.y
    }

    fn distance_squared(self, other: XY) -> f64 {
        let d = self.sub(other);
        d.dot(d)
    }
}

/// The triangle of colours a light can reproduce.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gamut {
    pub red: XY,
    pub green: XY,
    pub blue: XY,
}

impl Gamut {
    /// Gamut A: older LivingColors and LightStrips.
    pub const A: Gamut = Gamut {
        red: XY::new(0.704, 0.296),
        green: XY::new(0.2151, 0.7106),
        blue: XY::new(0.138, 0.08),
    };

    /// Gamut B: first generation Hue bulbs.
    pub const B: Gamut = Gamut {
        red: XY::new(0.675, 0.322),
        green: XY::new(0.409, 0.518),
        blue: XY::new(0.167, 0.04),
    };

    /// Gamut C: current generation Hue colour lights.
    pub const C: Gamut = Gamut {
        red: XY::new(0.6915, 0.3083),
        green: XY::new(0.17, 0.7),
        blue: XY::new(0.1532, 0.0475),
    };

    pub fn for_type(gamut_type: &str) -> Option<Gamut> {
        match gamut_type {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            _ => None,
        }
    }

    pub fn area(&self) -> f64 {
        (cross(self.red, self.green, self.blue) / 2.0).abs()
    }

    pub fn contains(&self, p: XY) -> bool {
        let d1 = cross(p, self.red, self.green);
        let d2 = cross(p, self.green, self.blue);
        let d3 = cross(p, self.blue, self.red);
        let has_neg = d1 < -CONTAINS_EPSILON || d2 < -CONTAINS_EPSILON || d3 < -CONTAINS_EPSILON;
        let has_pos = d1 > CONTAINS_EPSILON || d2 > CONTAINS_EPSILON || d3 > CONTAINS_EPSILON;
        !(has_neg && has_pos)
    }

    /// Returns `p` if it lies inside the triangle, otherwise the closest point
    /// on the triangle's boundary.
    pub fn clamp(&self, p: XY) -> XY {
        if self.contains(p) {
            return p;
        }
        [
            closest_point_on_segment(self.red, self.green, p),
            closest_point_on_segment(self.green, self.blue, p),
            closest_point_on_segment(self.blue, self.red, p),
        ]
        .into_iter()
        .min_by(|a, b| a.distance_squared(p).total_cmp(&b.distance_squared(p)))
        .unwrap_or(p)
    }
}

/// Clamps into `gamut` when one is known.
pub fn clamp_to(gamut: Option<&Gamut>, p: XY) -> XY {
    gamut.map_or(p, |g| g.clamp(p))
}

fn cross(p: XY, a: XY, b: XY) -> f64 {
    (p.x - b.x) * (a.y - b.y) - (a.x - b.x) * (p.y - b.y)
}

fn closest_point_on_segment(a: XY, b: XY, p: XY) -> XY {
    let ab = b.sub(a);
    let len = ab.dot(ab);
    if len == 0.0 {
        return a;
    }
    let t = (p.sub(a).dot(ab) / len).clamp(0.0, 1.0);
    XY::new(a.x + ab.x * t, a.y + ab.y * t)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    fn channels(self) -> [f64; 3] {
        [self.r, self.g, self.b].map(|c| f64::from(c) / 255.0)
    }

    fn from_unit(channels: [f64; 3]) -> Self {
        let [r, g, b] = channels.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        Self { r, g, b }
    }
}

fn gamma_expand(c: f64) -> f64 {
    if c > 0.04045 {
        ((c + 0.055) / 1.055).powf(2.4)
    } else {
        c / 12.92
    }
}

fn gamma_compress(c: f64) -> f64 {
    if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

pub(crate) fn linear_rgb_to_xyz([r, g, b]: [f64; 3]) -> [f64; 3] {
    [
        0.412_456_4 * r + 0.357_576_1 * g + 0.180_437_5 * b,
        0.212_672_9 * r + 0.715_152_2 * g + 0.072_175_0 * b,
        0.019_333_9 * r + 0.119_192_0 * g + 0.950_304_1 * b,
    ]
}

pub(crate) fn xyz_to_linear_rgb([x, y, z]: [f64; 3]) -> [f64; 3] {
    [
        3.240_454_2 * x - 1.537_138_5 * y - 0.498_531_4 * z,
        -0.969_266_0 * x + 1.876_010_8 * y + 0.041_556_0 * z,
        0.055_643_4 * x - 0.204_025_9 * y + 1.057_225_2 * z,
    ]
}

/// Chromaticity and relative luminance (`Y` in `[0, 1]`) of an sRGB colour.
pub fn rgb_to_xy_luminance(rgb: Rgb) -> (XY, f64) {
    let [x, y, z] = linear_rgb_to_xyz(rgb.channels().map(gamma_expand));
    let sum = x + y + z;
    if sum <= 0.0 {
        return (WHITE_POINT, 0.0);
    }
    (XY::new(x / sum, y / sum), y)
}

/// Converts an sRGB colour to xy, clamped into `gamut` when given.
pub fn rgb_to_xy(rgb: Rgb, gamut: Option<&Gamut>) -> XY {
    clamp_to(gamut, rgb_to_xy_luminance(rgb).0)
}

/// Renders an xy colour at controller brightness `bri` (`0..=254`) as sRGB.
///
/// Channels exceeding full scale are brought back by dividing all three by the
/// largest one, which keeps the hue intact.
pub fn xy_to_rgb(xy: XY, bri: u16) -> Rgb {
    if xy.y <= 0.0 {
        return Rgb::new(0, 0, 0);
    }
    let luminance = f64::from(bri.min(MAX_BRIGHTNESS)) / f64::from(MAX_BRIGHTNESS);
    let x = luminance / xy.y * xy.x;
    let z = luminance / xy.y * (1.0 - xy.x - xy.y);
    let mut linear = xyz_to_linear_rgb([x, luminance, z]).map(|c| c.max(0.0));
    let max = linear.iter().copied().fold(0.0, f64::max);
    if max > 1.0 {
        linear = linear.map(|c| c / max);
    }
    Rgb::from_unit(linear.map(gamma_compress))
}

/// Hue, saturation and value on the controller scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub hue: u16,
    pub sat: u16,
    pub bri: u16,
}

pub fn rgb_to_hsv(rgb: Rgb) -> Hsv {
    let [r, g, b] = rgb.channels();
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let degrees = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };

    Hsv {
        hue: (degrees / 360.0 * f64::from(MAX_HUE)).round() as u16,
        sat: (saturation * f64::from(MAX_SATURATION)).round() as u16,
        bri: (max * f64::from(MAX_BRIGHTNESS)).round() as u16,
    }
}

pub fn hsv_to_rgb(hsv: Hsv) -> Rgb {
    let h = f64::from(hsv.hue) / f64::from(MAX_HUE) * 360.0;
    let s = f64::from(hsv.sat.min(MAX_SATURATION)) / f64::from(MAX_SATURATION);
    let v = f64::from(hsv.bri.min(MAX_BRIGHTNESS)) / f64::from(MAX_BRIGHTNESS);

    let c = v * s;
    let h_prime = (h / 60.0).rem_euclid(6.0);
    let x = c * (1.0 - (h_prime.rem_euclid(2.0) - 1.0).abs());
    let (r, g, b) = match h_prime as u8 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    Rgb::from_unit([r + m, g + m, b + m])
}
