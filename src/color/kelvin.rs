//! Colour temperature approximations.

use std::sync::LazyLock;

use super::{Rgb, XY};

pub const MIN_KELVIN: u32 = 1000;
pub const MAX_KELVIN: u32 = 40000;

const TABLE_STEP: u32 = 50;

/// Normalized RGB for every `TABLE_STEP` Kelvin between the supported bounds.
static KELVIN_TABLE: LazyLock<Vec<(u32, [f64; 3])>> = LazyLock::new(|| {
    (MIN_KELVIN..=MAX_KELVIN)
        .step_by(TABLE_STEP as usize)
        .map(|kelvin| (kelvin, normalized(kelvin_to_rgb(kelvin))))
        .collect()
});

pub fn mirek_to_kelvin(mirek: u16) -> u32 {
    1_000_000 / u32::from(mirek.max(1))
}

pub fn kelvin_to_mirek(kelvin: u32) -> u16 {
    let mirek = (1_000_000.0 / f64::from(kelvin.max(1))).round();
    mirek.min(f64::from(u16::MAX)) as u16
}

/// Empirical blackbody approximation (Tanner Helland), valid for 1000K–40000K.
///
/// Each channel is flat on one side of its threshold: red saturates below
/// 6600K, blue saturates above 6600K and is off below 1900K.
pub fn kelvin_to_rgb(kelvin: u32) -> Rgb {
    let temp = f64::from(kelvin.clamp(MIN_KELVIN, MAX_KELVIN)) / 100.0;

    let red = if temp <= 66.0 {
        255.0
    } else {
        329.698_727_446 * (temp - 60.0).powf(-0.133_204_759_2)
    };
    let green = if temp <= 66.0 {
        99.470_802_586_1 * temp.ln() - 161.119_568_166_1
    } else {
        288.122_169_528_3 * (temp - 60.0).powf(-0.075_514_849_2)
    };
    let blue = if temp >= 66.0 {
        255.0
    } else if temp <= 19.0 {
        0.0
    } else {
        138.517_731_223_1 * (temp - 10.0).ln() - 305.044_792_730_7
    };

    let channel = |c: f64| c.clamp(0.0, 255.0).round() as u8;
    Rgb::new(channel(red), channel(green), channel(blue))
}

/// Inverse of [`kelvin_to_rgb`] by nearest neighbour over a precomputed table.
///
/// Colours are compared after normalizing by their brightest channel, with
/// channel weights following perceived luminance.
pub fn rgb_to_kelvin(rgb: Rgb) -> u32 {
    let target = normalized(rgb);
    KELVIN_TABLE
        .iter()
        .min_by(|(_, a), (_, b)| {
            weighted_distance(a, &target).total_cmp(&weighted_distance(b, &target))
        })
        .map_or(MIN_KELVIN, |(kelvin, _)| *kelvin)
}

fn normalized(rgb: Rgb) -> [f64; 3] {
    let channels = [rgb.r, rgb.g, rgb.b].map(f64::from);
    let max = channels.iter().copied().fold(0.0, f64::max);
    if max == 0.0 {
        return [0.0; 3];
    }
    channels.map(|c| c / max)
}

fn weighted_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    const WEIGHTS: [f64; 3] = [0.299, 0.587, 0.114];
    (0..3).map(|i| WEIGHTS[i] * (a[i] - b[i]).powi(2)).sum()
}

/// Correlated colour temperature of a chromaticity (McCamy's cubic).
pub fn xy_to_kelvin(xy: XY) -> u32 {
    let n = (xy.x - 0.3320) / (0.1858 - xy.y);
    let cct = 449.0 * n.powi(3) + 3525.0 * n.powi(2) + 6823.3 * n + 5520.33;
    if !cct.is_finite() {
        return MAX_KELVIN;
    }
    cct.round().clamp(f64::from(MIN_KELVIN), f64::from(MAX_KELVIN)) as u32
}

pub fn xy_to_mirek(xy: XY) -> u16 {
    kelvin_to_mirek(xy_to_kelvin(xy))
}
