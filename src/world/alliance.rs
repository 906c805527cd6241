//! Alliance tags and their deterministic colors.

use crate::error::WorldError;

/// Normalize and validate an alliance tag.
///
/// `None` means "leave alliance". A non-null tag is trimmed, upcased and
/// must then match `^[A-Z0-9]{3,4}$`; anything else is a programmer error.
pub fn normalize_tag(tag: Option<&str>) -> Result<Option<String>, WorldError> {
    let Some(raw) = tag else {
        return Ok(None);
    };
    let normalized = raw.trim().to_ascii_uppercase();
    let valid = (3..=4).contains(&normalized.len())
        && normalized.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
    if !valid {
        return Err(WorldError::invalid(format!(
            "alliance tag must be 3-4 of [A-Z0-9], got {raw:?}"
        )));
    }
    Ok(Some(normalized))
}

/// Deterministic `#RRGGBB` color for a normalized tag.
///
/// Hue is the polynomial 31-hash of the tag modulo 360, rendered at
/// HSL saturation 68% and lightness 56%.
pub fn color_for_tag(tag: &str) -> String {
    let mut hash: u64 = 0;
    for b in tag.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(b as u64);
    }
    let hue = (hash % 360) as f64;
    let (r, g, b) = hsl_to_rgb(hue, 0.68, 0.56);
    format!("#{r:02X}{g:02X}{b:02X}")
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    let channel = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    (channel(r1), channel(g1), channel(b1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_trimmed_and_upcased() {
        assert_eq!(normalize_tag(Some(" fox ")).unwrap(), Some("FOX".to_string()));
        assert_eq!(normalize_tag(Some("AB12")).unwrap(), Some("AB12".to_string()));
        assert_eq!(normalize_tag(None).unwrap(), None);
    }

    #[test]
    fn bad_tags_are_rejected() {
        for raw in ["", "AB", "TOOLONG", "F-X", "ab!", "    "] {
            assert!(normalize_tag(Some(raw)).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn color_is_deterministic_and_well_formed() {
        let color = color_for_tag("FOX");
        assert_eq!(color, color_for_tag("FOX"));
        assert_eq!(color.len(), 7);
        assert!(color.starts_with('#'));
        assert!(color[1..].bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(color, color.to_ascii_uppercase());
    }

    #[test]
    fn different_tags_usually_differ() {
        assert_ne!(color_for_tag("FOX"), color_for_tag("WLF"));
        assert_ne!(color_for_tag("AAA"), color_for_tag("AAB"));
    }
}
