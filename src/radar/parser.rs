//! Priority-ordered radar line parser.
//!
//! A total function from a raw line to `Option<ParsedLine>`: every format
//! recognized by the real sensor either parses or the line is logged and
//! dropped. Sign is preserved throughout; `mps` readings are converted to
//! mph by `×2.237` before the caller ever sees them.

use crate::config::MPS_TO_MPH;
use crate::types::SourceFormat;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub speed_mph: f64,
    pub magnitude: String,
    pub unit: String,
    pub format: SourceFormat,
}

/// Try each format in priority order. Returns `None` if nothing matches.
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    parse_csv(trimmed)
        .or_else(|| parse_json(trimmed))
        .or_else(|| parse_bare_number(trimmed))
        .or_else(|| parse_space_separated(trimmed))
        .or_else(|| parse_comma_separated(trimmed))
}

/// `"<mag>",<speed>` — quoted magnitude, comma, bare numeric speed (mph).
fn parse_csv(line: &str) -> Option<ParsedLine> {
    if !line.starts_with('"') {
        return None;
    }
    let rest = &line[1..];
    let end_quote = rest.find('"')?;
    let magnitude = rest[..end_quote].to_string();
    let after_quote = rest[end_quote + 1..].trim_start();
    let after_comma = after_quote.strip_prefix(',')?.trim();
    let speed_mph: f64 = after_comma.parse().ok()?;

    Some(ParsedLine {
        speed_mph,
        magnitude,
        unit: "mph".to_string(),
        format: SourceFormat::Csv,
    })
}

/// JSON object carrying `speed`, optional `unit` (default mph), optional
/// `magnitude`.
fn parse_json(line: &str) -> Option<ParsedLine> {
    if !line.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let obj = value.as_object()?;
    let raw_speed = obj.get("speed")?.as_f64()?;
    let unit = obj
        .get("unit")
        .and_then(|v| v.as_str())
        .unwrap_or("mph")
        .to_string();
    let magnitude = obj
        .get("magnitude")
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();

    let speed_mph = if unit.eq_ignore_ascii_case("mps") {
        raw_speed * MPS_TO_MPH
    } else {
        raw_speed
    };

    Some(ParsedLine {
        speed_mph,
        magnitude,
        unit,
        format: SourceFormat::Json,
    })
}

/// A bare float, e.g. `12.3`. Must be the whole line (no separators) or
/// the space/comma formats below would have matched instead.
fn parse_bare_number(line: &str) -> Option<ParsedLine> {
    if line.contains([' ', ',']) {
        return None;
    }
    let speed_mph: f64 = line.parse().ok()?;
    Some(ParsedLine {
        speed_mph,
        magnitude: String::new(),
        unit: "mph".to_string(),
        format: SourceFormat::Bare,
    })
}

/// `<speed> <unit>`, e.g. `12.3 mph` or `-8.0 mps`.
fn parse_space_separated(line: &str) -> Option<ParsedLine> {
    let mut parts = line.split_whitespace();
    let speed_part = parts.next()?;
    let unit_part = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let raw_speed: f64 = speed_part.parse().ok()?;
    let unit = unit_part.to_lowercase();
    let speed_mph = if unit == "mps" {
        raw_speed * MPS_TO_MPH
    } else if unit == "mph" {
        raw_speed
    } else {
        return None;
    };

    Some(ParsedLine {
        speed_mph,
        magnitude: String::new(),
        unit,
        format: SourceFormat::SpaceSeparated,
    })
}

/// `<mag>,<speed>`, e.g. `m,12.3` — unquoted magnitude.
fn parse_comma_separated(line: &str) -> Option<ParsedLine> {
    let (magnitude, speed_part) = line.split_once(',')?;
    if magnitude.is_empty() || magnitude.contains(' ') {
        return None;
    }
    let speed_mph: f64 = speed_part.trim().parse().ok()?;
    Some(ParsedLine {
        speed_mph,
        magnitude: magnitude.to_string(),
        unit: "mph".to_string(),
        format: SourceFormat::CommaSeparated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_csv_format() {
        let p = parse_line(r#""m",12.3"#).unwrap();
        assert_eq!(p.format, SourceFormat::Csv);
        assert_eq!(p.magnitude, "m");
        assert!((p.speed_mph - 12.3).abs() < 1e-9);
    }

    #[test]
    fn parses_csv_with_negative_speed() {
        let p = parse_line(r#""m",-15.0"#).unwrap();
        assert!((p.speed_mph - -15.0).abs() < 1e-9);
    }

    #[test]
    fn parses_json_mps_conversion() {
        let p = parse_line(r#"{"speed": 10.0, "unit": "mps", "magnitude": "l"}"#).unwrap();
        assert_eq!(p.format, SourceFormat::Json);
        assert!((p.speed_mph - 22.37).abs() < 1e-6);
    }

    #[test]
    fn parses_json_default_unit_mph() {
        let p = parse_line(r#"{"speed": 12.3}"#).unwrap();
        assert!((p.speed_mph - 12.3).abs() < 1e-9);
    }

    #[test]
    fn parses_bare_number() {
        let p = parse_line("12.3").unwrap();
        assert_eq!(p.format, SourceFormat::Bare);
    }

    #[test]
    fn parses_space_separated_mph() {
        let p = parse_line("12.3 mph").unwrap();
        assert_eq!(p.format, SourceFormat::SpaceSeparated);
        assert!((p.speed_mph - 12.3).abs() < 1e-9);
    }

    #[test]
    fn parses_space_separated_mps() {
        let p = parse_line("10.0 mps").unwrap();
        assert!((p.speed_mph - 22.37).abs() < 1e-6);
    }

    #[test]
    fn parses_comma_separated() {
        let p = parse_line("m,12.3").unwrap();
        assert_eq!(p.format, SourceFormat::CommaSeparated);
        assert_eq!(p.magnitude, "m");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_line("not a reading").is_none());
        assert!(parse_line("").is_none());
    }

    #[test]
    fn priority_prefers_csv_over_comma_separated() {
        // Quoted form must be tried first even though the unquoted parser
        // would also eventually fail on the leading quote.
        let p = parse_line(r#""mag",5.0"#).unwrap();
        assert_eq!(p.format, SourceFormat::Csv);
    }
}
