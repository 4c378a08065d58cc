//! Translating a [`PutCall`] from one colour representation to another.

use crate::state::{ColorMode, PutCall};

use super::kelvin::{
    kelvin_to_mirek, kelvin_to_rgb, mirek_to_kelvin, rgb_to_kelvin, xy_to_mirek,
};
use super::{
    hsv_to_rgb, rgb_to_hsv, rgb_to_xy, xy_to_rgb, Gamut, Hsv, Rgb, MAX_BRIGHTNESS, MAX_SATURATION,
};

/// Re-expresses the colour of `call` from `from` to `to`.
///
/// Exactly one transcoding happens: through RGB for every pair except
/// XY → CT, which uses the chromaticity directly. XY and HS results are
/// clamped into `gamut`. The source fields are cleared, so the returned call
/// carries a single colour representation. A call without the `from` fields,
/// or with `from == to`, is returned unchanged.
pub fn convert(call: PutCall, gamut: Option<&Gamut>, from: ColorMode, to: ColorMode) -> PutCall {
    if from == to {
        return call;
    }

    if let (ColorMode::Xy, ColorMode::Ct) = (from, to) {
        let Some(xy) = call.xy() else {
            return call;
        };
        return call.without_color().with_ct(xy_to_mirek(xy));
    }

    let Some(rgb) = source_rgb(&call, from) else {
        return call;
    };
    log::trace!("converting {} from {from:?} to {to:?} via {rgb:?}", call.id);

    let call = call.without_color();
    match to {
        ColorMode::Xy => {
            let xy = rgb_to_xy(rgb, gamut);
            call.with_xy(xy.x, xy.y)
        }
        ColorMode::Hs => {
            let rgb = match gamut {
                Some(_) => xy_to_rgb(rgb_to_xy(rgb, gamut), MAX_BRIGHTNESS),
                None => rgb,
            };
            let hsv = rgb_to_hsv(rgb);
            call.with_hue_sat(hsv.hue, hsv.sat)
        }
        ColorMode::Ct => call.with_ct(kelvin_to_mirek(rgb_to_kelvin(rgb))),
    }
}

fn source_rgb(call: &PutCall, from: ColorMode) -> Option<Rgb> {
    match from {
        ColorMode::Ct => call.ct.map(|mirek| kelvin_to_rgb(mirek_to_kelvin(mirek))),
        ColorMode::Xy => call.xy().map(|xy| xy_to_rgb(xy, MAX_BRIGHTNESS)),
        ColorMode::Hs => {
            if call.hue.is_none() && call.sat.is_none() {
                return None;
            }
            Some(hsv_to_rgb(Hsv {
                hue: call.hue.unwrap_or(0),
                sat: call.sat.unwrap_or(MAX_SATURATION),
                bri: MAX_BRIGHTNESS,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::XY;

    fn base() -> PutCall {
        PutCall::light("/lights/7")
            .with_brightness(120)
            .with_transition_time(10)
    }

    #[test]
    fn ct_to_xy_lands_near_planckian_locus() {
        let call = convert(base().with_ct(370), Some(&Gamut::C), ColorMode::Ct, ColorMode::Xy);
        assert_eq!(call.ct, None);
        assert_eq!(call.hue, None);
        let xy = call.xy().unwrap();
        // 2700K sits around (0.46, 0.41)
        assert!((xy.x - 0.46).abs() < 0.03, "{xy:?}");
        assert!((xy.y - 0.41).abs() < 0.03, "{xy:?}");
        assert_eq!(call.bri, Some(120));
        assert_eq!(call.transition_time, Some(10));
    }

    #[test]
    fn xy_to_ct_uses_mccamy() {
        let call = convert(base().with_xy(0.3127, 0.3290), None, ColorMode::Xy, ColorMode::Ct);
        assert_eq!((call.x, call.y), (None, None));
        let mirek = call.ct.unwrap();
        assert!((150..=156).contains(&mirek), "{mirek}");
    }

    #[test]
    fn hs_to_xy_is_clamped() {
        let call = convert(
            base().with_hue_sat(0, 254),
            Some(&Gamut::B),
            ColorMode::Hs,
            ColorMode::Xy,
        );
        assert_eq!((call.hue, call.sat), (None, None));
        assert!(Gamut::B.contains(call.xy().unwrap()));
    }

    #[test]
    fn xy_to_hs_red() {
        let call = convert(base().with_xy(0.64, 0.33), None, ColorMode::Xy, ColorMode::Hs);
        assert_eq!((call.x, call.y), (None, None));
        let hue = call.hue.unwrap();
        assert!(hue < 1000 || hue > 64535, "{hue}");
        assert!(call.sat.unwrap() > 240);
    }

    #[test]
    fn ct_to_hs_is_orange() {
        let call = convert(base().with_ct(454), None, ColorMode::Ct, ColorMode::Hs);
        assert_eq!(call.ct, None);
        let degrees = f64::from(call.hue.unwrap()) / 65535.0 * 360.0;
        assert!((15.0..45.0).contains(&degrees), "{degrees}");
    }

    #[test]
    fn hs_to_ct_uses_lookup() {
        let warm = rgb_to_hsv(kelvin_to_rgb(3000));
        let call = convert(
            base().with_hue_sat(warm.hue, warm.sat),
            None,
            ColorMode::Hs,
            ColorMode::Ct,
        );
        let mirek = call.ct.unwrap();
        assert!((310..=360).contains(&mirek), "{mirek}");
    }

    #[test]
    fn same_mode_or_missing_fields_is_identity() {
        let call = base().with_ct(300);
        assert_eq!(convert(call.clone(), None, ColorMode::Ct, ColorMode::Ct), call);
        assert_eq!(convert(base(), None, ColorMode::Xy, ColorMode::Ct), base());
        assert_eq!(convert(base(), None, ColorMode::Hs, ColorMode::Xy), base());
    }

    #[test]
    fn single_representation_after_conversion() {
        let call = convert(base().with_ct(250), Some(&Gamut::A), ColorMode::Ct, ColorMode::Xy);
        assert_eq!(call.color_mode(), Some(ColorMode::Xy));
        assert!(call.xy().is_some_and(|xy: XY| Gamut::A.contains(xy)));
    }
}
