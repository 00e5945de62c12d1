//! Coordinate synthesiser, building the `joinNew` outer coordinate variable
//! by deriving one value per member from its declared `coordValue` or
//! location, rather than reading+concatenating bytes.
//!
//! Priority order for a `joinNew` outer coordinate, per member:
//! 1. a numeric `coordValue` -> `Float64`
//! 2. a non-numeric `coordValue` -> `String`
//! 3. a `dateFormatMark` applied to the member's location -> ISO-8601 `String`
//! 4. fallback -> the member's location string, or `Virtual_Dataset_<index>`
//!    if the location is empty (an in-memory member with no path).

use chrono::{DateTime, Utc};

use crate::member::MemberHandle;
use crate::model::VarData;
use crate::{AggError, AggResult};

/// One synthesised coordinate value, tagged with which rule produced it so
/// callers can detect a mixed numeric/string run across members.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordValue {
    Numeric(f64),
    Text(String),
}

fn synthesize_one(member: &MemberHandle, index: usize, date_format_mark: Option<&str>) -> AggResult<CoordValue> {
    if let Some(raw) = &member.coord_value {
        if let Ok(n) = raw.parse::<f64>() {
            return Ok(CoordValue::Numeric(n));
        }
        return Ok(CoordValue::Text(raw.clone()));
    }

    if let Some(mark) = date_format_mark {
        let ts = extract_timestamp(member.get_location(), mark)?;
        return Ok(CoordValue::Text(ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)));
    }

    let loc = member.get_location();
    if loc.is_empty() {
        return Ok(CoordValue::Text(format!("Virtual_Dataset_{}", index)));
    }
    Ok(CoordValue::Text(loc.to_string()))
}

/// Synthesise one coordinate value per member and fold them into a single
/// `VarData`, rejecting a run that mixes numeric and text values: a
/// `joinNew` coordinate variable has one element kind.
pub fn synthesize_coordinates(members: &[&MemberHandle], date_format_mark: Option<&str>) -> AggResult<VarData> {
    let mut values = Vec::with_capacity(members.len());
    for (i, m) in members.iter().enumerate() {
        values.push(synthesize_one(m, i, date_format_mark)?);
    }

    let all_numeric = values.iter().all(|v| matches!(v, CoordValue::Numeric(_)));
    let all_text = values.iter().all(|v| matches!(v, CoordValue::Text(_)));

    if all_numeric {
        Ok(VarData::Float64(
            values
                .into_iter()
                .map(|v| match v {
                    CoordValue::Numeric(n) => n,
                    CoordValue::Text(_) => unreachable!(),
                })
                .collect(),
        ))
    } else if all_text {
        Ok(VarData::Strings(
            values
                .into_iter()
                .map(|v| match v {
                    CoordValue::Text(s) => s,
                    CoordValue::Numeric(_) => unreachable!(),
                })
                .collect(),
        ))
    } else {
        Err(AggError::aggregation(
            "coordinate synthesis produced a mix of numeric and text values across members",
        ))
    }
}

/// Convert a `dateFormatMark` (`<prefix>#<sdfPattern>`) into a `chrono`
/// strftime pattern and apply it to `filename`, the way
/// `DateFromString::getDateUsingSimpleDateFormat` extracts a timestamp from
/// a scanned file's name.
pub fn extract_timestamp(filename: &str, mark: &str) -> AggResult<DateTime<Utc>> {
    let (prefix, sdf_pattern) = mark.split_once('#').ok_or_else(|| {
        AggError::syntax(format!("dateFormatMark must contain '#': {}", mark))
    })?;

    let base = std::path::Path::new(filename)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());

    let rest = base
        .strip_prefix(prefix)
        .ok_or_else(|| AggError::syntax(format!("{} does not start with dateFormatMark prefix {}", base, prefix)))?;

    let strftime_pattern = simple_date_format_to_strftime(sdf_pattern);
    let width = estimate_consumed_width(sdf_pattern);
    let date_text = if rest.len() >= width { &rest[..width] } else { rest };

    let naive = chrono::NaiveDateTime::parse_from_str(date_text, &strftime_pattern)
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(date_text, &strftime_pattern)
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap())
        })
        .map_err(|e| AggError::parse(format!("cannot parse date {} with pattern {}: {}", date_text, sdf_pattern, e)))?;

    Ok(DateTime::<Utc>::from_utc(naive, Utc))
}

/// Java `SimpleDateFormat` letters we actually see in NcML `dateFormatMark`
/// values, mapped onto `chrono`'s strftime tokens.
fn simple_date_format_to_strftime(sdf: &str) -> String {
    let mut out = String::new();
    let mut chars = sdf.chars().peekable();
    while let Some(c) = chars.next() {
        let mut run = 1;
        while chars.peek() == Some(&c) {
            chars.next();
            run += 1;
        }
        match c {
            'y' => out.push_str(if run >= 4 { "%Y" } else { "%y" }),
            'M' => out.push_str(if run >= 3 { "%b" } else { "%m" }),
            'd' => out.push_str("%d"),
            'H' => out.push_str("%H"),
            'm' => out.push_str("%M"),
            's' => out.push_str("%S"),
            other => {
                for _ in 0..run {
                    out.push(other);
                }
            }
        }
    }
    out
}

fn estimate_consumed_width(sdf: &str) -> usize {
    let mut width = 0;
    let mut chars = sdf.chars().peekable();
    while let Some(c) = chars.next() {
        let mut run = 1;
        while chars.peek() == Some(&c) {
            chars.next();
            run += 1;
        }
        width += match c {
            'y' if run >= 4 => 4,
            'M' if run >= 3 => 3,
            _ => run,
        };
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn member(location: &str, coord_value: Option<&str>) -> MemberHandle {
        MemberHandle::from_tree(
            location,
            coord_value.map(|s| s.to_string()),
            Arc::new(crate::model::DatasetTree::default()),
        )
    }

    #[test]
    fn numeric_coord_value_wins() {
        let a = member("a.nc", Some("1.5"));
        let b = member("b.nc", Some("2.5"));
        let data = synthesize_coordinates(&[&a, &b], None).unwrap();
        assert!(matches!(data, VarData::Float64(v) if v == vec![1.5, 2.5]));
    }

    #[test]
    fn text_coord_value_used_when_not_numeric() {
        let a = member("a.nc", Some("alpha"));
        let b = member("b.nc", Some("beta"));
        let data = synthesize_coordinates(&[&a, &b], None).unwrap();
        assert!(matches!(data, VarData::Strings(v) if v == vec!["alpha".to_string(), "beta".to_string()]));
    }

    #[test]
    fn fallback_uses_location_or_virtual_placeholder() {
        let a = member("/data/m0.nc", None);
        let b = member("", None);
        let data = synthesize_coordinates(&[&a, &b], None).unwrap();
        assert!(matches!(
            data,
            VarData::Strings(v) if v == vec!["/data/m0.nc".to_string(), "Virtual_Dataset_1".to_string()]
        ));
    }

    #[test]
    fn mixed_numeric_and_text_is_an_error() {
        let a = member("a.nc", Some("1.5"));
        let b = member("b.nc", Some("beta"));
        assert!(synthesize_coordinates(&[&a, &b], None).is_err());
    }

    #[test]
    fn date_format_mark_extracts_timestamp() {
        let ts = extract_timestamp("model_20240102_1200.nc", "model_#yyyyMMdd_HHmm").unwrap();
        assert_eq!(ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true), "2024-01-02T12:00:00Z");
    }
}
