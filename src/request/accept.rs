//! `Accept` header negotiation for `format=auto` requests.

/// Candidates for animated output, most preferred first.
pub const ANIMATED_TYPES: &[&str] = &["image/webp", "image/gif"];

/// Candidates for still output, most preferred first.
pub const STATIC_TYPES: &[&str] = &[
    "image/avif",
    "image/webp",
    "image/jpeg",
    "image/png",
    "image/tiff",
    "image/heif",
    "image/gif",
];

struct Preference {
    value: String,
    q: f32,
}

fn parse_preference(part: &str) -> Option<Preference> {
    let mut pieces = part.split(';');
    let value = pieces.next()?.trim().to_ascii_lowercase();
    if value.is_empty() {
        return None;
    }
    let q = match pieces.find_map(|p| p.trim().strip_prefix("q=").map(str::to_owned)) {
        Some(raw) => raw.trim().parse::<f32>().ok()?,
        None => 1.0,
    };
    Some(Preference { value, q })
}

/// Picks the supported value the client weighs highest.
///
/// Only exact matches and the bare `*` wildcard count, so `*/*` does not
/// select an arbitrary image type. An exact entry wins over the wildcard for
/// the same value, entries with `q=0` are refused, and ties go to the value
/// listed first in `supported`.
pub fn negotiate<'a>(header: &str, supported: &[&'a str]) -> Option<&'a str> {
    let preferences: Vec<Preference> = header.split(',').filter_map(parse_preference).collect();
    let wildcard = preferences.iter().find(|p| p.value == "*").map(|p| p.q);

    let mut best: Option<(&'a str, f32)> = None;
    for &candidate in supported {
        let q = preferences
            .iter()
            .find(|p| p.value == candidate)
            .map(|p| p.q)
            .or(wildcard);
        match q {
            Some(q) if q > 0.0 => {
                if best.map_or(true, |(_, best_q)| q > best_q) {
                    best = Some((candidate, q));
                }
            }
            _ => {}
        }
    }
    best.map(|(value, _)| value)
}

/// Resolves the output format for `format=auto`.
pub fn auto_format(accept: &str, animated: bool) -> &'static str {
    let (supported, fallback) = if animated {
        (ANIMATED_TYPES, "gif")
    } else {
        (STATIC_TYPES, "jpeg")
    };
    negotiate(accept, supported)
        .and_then(|mime| mime.split('/').nth(1))
        .unwrap_or(fallback)
}
