use once_cell::sync::Lazy;
use regex::Regex;

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?\d[\d.,]*").expect("valid regex"));

/// Parses an amount written with either decimal-comma or decimal-point conventions.
///
/// Dots are treated as the primary thousands mark (`62.000` is sixty-two thousand).
/// A lone comma followed by exactly three digits could be either a thousands mark or
/// a three-place decimal, so it yields `None`, as does anything that does not form
/// valid digit groups.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let token = NUMBER_RE.find(&compact)?.as_str();
    let token = token.trim_end_matches(&['.', ','][..]);
    let (negative, digits) = match token.as_bytes().first() {
        Some(b'-') => (true, &token[1..]),
        Some(b'+') => (false, &token[1..]),
        _ => (false, token),
    };
    let canonical = canonical_number(digits)?;
    let value: f64 = canonical.parse().ok()?;
    Some(if negative { -value } else { value })
}

fn canonical_number(token: &str) -> Option<String> {
    let last_dot = token.rfind('.');
    let last_comma = token.rfind(',');
    match (last_dot, last_comma) {
        (None, None) => Some(token.to_string()),
        (Some(dot), Some(comma)) => {
            let (decimal_at, thousands) = if dot > comma { (dot, ',') } else { (comma, '.') };
            let (int_part, frac) = token.split_at(decimal_at);
            let frac = &frac[1..];
            if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let int_digits = grouped_digits(int_part, thousands)?;
            Some(format!("{int_digits}.{frac}"))
        }
        (Some(_), None) => single_separator(token, '.', true),
        (None, Some(_)) => single_separator(token, ',', false),
    }
}

fn single_separator(token: &str, sep: char, three_digit_tail_is_thousands: bool) -> Option<String> {
    let count = token.matches(sep).count();
    if count > 1 {
        return grouped_digits(token, sep);
    }
    let (int_part, frac) = token.split_once(sep)?;
    if int_part.is_empty() || frac.is_empty() {
        return None;
    }
    if frac.len() == 3 && int_part.len() <= 3 && !int_part.starts_with('0') {
        return if three_digit_tail_is_thousands {
            Some(format!("{int_part}{frac}"))
        } else {
            None
        };
    }
    Some(format!("{int_part}.{frac}"))
}

/// Validates `1.234.567`-style grouping and returns the bare digits.
fn grouped_digits(value: &str, sep: char) -> Option<String> {
    let mut groups = value.split(sep);
    let head = groups.next()?;
    if head.is_empty() || head.len() > 3 || !head.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut out = head.to_string();
    for group in groups {
        if group.len() != 3 || !group.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        out.push_str(group);
    }
    Some(out)
}

pub fn parse_count(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value);
    }
    // spreadsheets hand back integral counts as "12.0"
    let value = trimmed.parse::<f64>().ok()?;
    (value.fract() == 0.0 && value.is_finite()).then_some(value as i64)
}

pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "s" | "si" | "sí" | "true" | "1" | "y" | "yes"
    )
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_latin_amounts() {
        assert_eq!(parse_amount("$ 62.000,00"), Some(62000.0));
        assert_eq!(parse_amount("62.000"), Some(62000.0));
        assert_eq!(parse_amount("1.234.567,5"), Some(1234567.5));
        assert_eq!(parse_amount("12,5"), Some(12.5));
        assert_eq!(parse_amount("0,500"), Some(0.5));
    }

    #[test]
    fn parses_point_decimal_amounts() {
        assert_eq!(parse_amount("1234.5"), Some(1234.5));
        assert_eq!(parse_amount("USD 1,234,567.25"), Some(1234567.25));
        assert_eq!(parse_amount("45000"), Some(45000.0));
        assert_eq!(parse_amount("-12.75"), Some(-12.75));
    }

    #[test]
    fn rejects_non_numbers_and_ambiguity() {
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("1,234"), None);
        assert_eq!(parse_amount("1.23.4"), None);
        assert_eq!(parse_amount("12.34,5.6"), None);
    }

    #[test]
    fn counts_and_flags() {
        assert_eq!(parse_count("10"), Some(10));
        assert_eq!(parse_count("12.0"), Some(12));
        assert_eq!(parse_count("doce"), None);
        assert!(parse_flag("Sí"));
        assert!(parse_flag(" yes "));
        assert!(!parse_flag("no"));
    }
}
