//! Slug generation and semver comparison shared by the business store and
//! the bundled adapter seeder.

use rand::Rng as _;

/// Maximum length of a generated slug
pub const SLUG_MAX_LEN: usize = 48;

/// Fallback slug used when `name` normalizes to nothing.
pub const SLUG_FALLBACK: &str = "business";

/// Normalize `name` into a lowercase, ASCII, hyphen-separated slug of at
/// most [`SLUG_MAX_LEN`] characters, falling back to [`SLUG_FALLBACK`] if
/// the input normalizes to the empty string.
#[must_use]
pub fn to_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_hyphen = true; // suppress a leading hyphen
    for ch in name.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric {
            slug.push(lower);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug.truncate(SLUG_MAX_LEN);
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        SLUG_FALLBACK.to_string()
    } else {
        slug
    }
}

/// Append a random 4-hex-digit suffix to `slug` to resolve an id collision.
#[must_use]
pub fn with_collision_suffix(slug: &str) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..=0xFFFF);
    let base_len = SLUG_MAX_LEN.saturating_sub(5); // "-xxxx"
    let truncated = if slug.len() > base_len {
        &slug[..base_len]
    } else {
        slug
    };
    format!("{truncated}-{suffix:04x}")
}

/// Parse up to three numeric components of a semver-ish string
/// (`"1.2.3"`), treating missing components as `0`. Non-numeric or
/// malformed input parses each unparsable component as `0` as well, per
/// "missing -> 0" rule.
#[must_use]
pub fn parse_semver_loose(version: &str) -> (u64, u64, u64) {
    let mut parts = version.trim().splitn(3, '.');
    let mut next = || {
        parts
            .next()
            .and_then(|p| p.trim().parse::<u64>().ok())
            .unwrap_or(0)
    };
    (next, next, next)
}

/// Returns `true` if `candidate` is strictly newer than `current` under
/// loose semver comparison.
#[must_use]
pub fn is_strictly_newer(candidate: &str, current: &str) -> bool {
    parse_semver_loose(candidate) > parse_semver_loose(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugifies_basic_name() {
        assert_eq!(to_slug("Joe's Pizza & Subs"), "joe-s-pizza-subs");
    }

    #[test]
    fn falls_back_on_empty_normalization() {
        assert_eq!(to_slug("!!!"), SLUG_FALLBACK);
    }

    #[test]
    fn truncates_to_max_len() {
        let long = "a".repeat(100);
        let slug = to_slug(&long);
        assert_eq!(slug.len(), SLUG_MAX_LEN);
    }

    #[test]
    fn collision_suffix_has_four_hex_digits() {
        let suffixed = with_collision_suffix("joes-pizza");
        let suffix = suffixed.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 4);
        assert!(u16::from_str_radix(suffix, 16).is_ok());
    }

    #[test]
    fn semver_missing_components_are_zero() {
        assert_eq!(parse_semver_loose("2"), (2, 0, 0));
        assert_eq!(parse_semver_loose("2.1"), (2, 1, 0));
        assert_eq!(parse_semver_loose("2.1.5"), (2, 1, 5));
    }

    #[test]
    fn strictly_newer_compares_numerically_not_lexically() {
        assert!(is_strictly_newer("1.10.0", "1.9.0"));
        assert!(!is_strictly_newer("1.0.0", "1.0.0"));
        assert!(!is_strictly_newer("1.0.0", "1.0.1"));
    }
}
