// src/expression/date.rs
//! Date part extraction, formatting and `$toDate`.
//!
//! Dates are UTC instants. Operators that accept a `timezone` argument take a
//! fixed offset (`"+05:30"`, `"-0800"`, `"+02"`) or `"UTC"`/`"GMT"`/`"Z"`.

use super::{evaluate, named_args, required_arg, type_mismatch, ExpressionFn, Scope};
use crate::error::{DocMatchError, Result};
use crate::value::Value;
use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use std::collections::HashMap;
use std::fmt::Write;

pub(super) fn register(registry: &mut HashMap<&'static str, ExpressionFn>) {
    registry.insert("$year", year);
    registry.insert("$month", month);
    registry.insert("$dayOfMonth", day_of_month);
    registry.insert("$dayOfWeek", day_of_week);
    registry.insert("$dayOfYear", day_of_year);
    registry.insert("$hour", hour);
    registry.insert("$minute", minute);
    registry.insert("$second", second);
    registry.insert("$millisecond", millisecond);
    registry.insert("$dateToString", date_to_string);
    registry.insert("$toDate", to_date);
}

/// Default `$dateToString` format
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%LZ";

fn parse_timezone(op: &str, tz: &Value) -> Result<FixedOffset> {
    let name = tz
        .as_str()
        .ok_or_else(|| type_mismatch(op, "a string timezone", tz))?;
    let invalid = || DocMatchError::QueryShape(format!("{}: unrecognized timezone '{}'", op, name));

    if matches!(name, "UTC" | "GMT" | "Z" | "Etc/UTC") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, digits) = if let Some(rest) = name.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = name.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(invalid());
    };
    let digits: String = digits.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().map_err(|_| invalid())?, 0),
        4 => (
            digits[..2].parse::<i32>().map_err(|_| invalid())?,
            digits[2..].parse::<i32>().map_err(|_| invalid())?,
        ),
        _ => return Err(invalid()),
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Wall-clock time of `date` in the optional timezone
fn local_time(op: &str, date: &DateTime<Utc>, timezone: Option<&Value>) -> Result<NaiveDateTime> {
    match timezone {
        Some(tz) if !tz.is_nullish() => {
            let offset = parse_timezone(op, tz)?;
            Ok(date.with_timezone(&offset).naive_local())
        }
        _ => Ok(date.naive_utc()),
    }
}

/// Extraction argument forms: `date`, `[date]` or `{date, timezone?}`
fn extract(op: &str, args: &Value, scope: &Scope<'_>, part: fn(&NaiveDateTime) -> i64) -> Result<Value> {
    let (date_expr, tz_expr) = match args {
        Value::Array(items) if items.len() == 1 => (&items[0], None),
        Value::Object(doc) if doc.contains_key("date") => {
            let spec = named_args(op, args, &["date", "timezone"])?;
            (required_arg(op, spec, "date")?, spec.get("timezone"))
        }
        single => (single, None),
    };

    let timezone = match tz_expr {
        Some(expr) => Some(evaluate(expr, scope)?),
        None => None,
    };
    match evaluate(date_expr, scope)? {
        v if v.is_nullish() => Ok(Value::Null),
        Value::Date(date) => {
            let local = local_time(op, &date, timezone.as_ref())?;
            Ok(Value::Int(part(&local)))
        }
        other => Err(type_mismatch(op, "a date", &other)),
    }
}

fn year(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    extract("$year", args, scope, |d| d.year() as i64)
}

fn month(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    extract("$month", args, scope, |d| d.month() as i64)
}

fn day_of_month(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    extract("$dayOfMonth", args, scope, |d| d.day() as i64)
}

/// 1 (Sunday) through 7 (Saturday)
fn day_of_week(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    extract("$dayOfWeek", args, scope, |d| {
        d.weekday().num_days_from_sunday() as i64 + 1
    })
}

fn day_of_year(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    extract("$dayOfYear", args, scope, |d| d.ordinal() as i64)
}

fn hour(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    extract("$hour", args, scope, |d| d.hour() as i64)
}

fn minute(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    extract("$minute", args, scope, |d| d.minute() as i64)
}

fn second(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    extract("$second", args, scope, |d| d.second() as i64)
}

fn millisecond(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    extract("$millisecond", args, scope, |d| {
        (d.nanosecond() / 1_000_000).min(999) as i64
    })
}

/// `{date, format?, timezone?, onNull?}`
fn date_to_string(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    let op = "$dateToString";
    let spec = named_args(op, args, &["date", "format", "timezone", "onNull"])?;

    let date = evaluate(required_arg(op, spec, "date")?, scope)?;
    let date = match date {
        v if v.is_nullish() => {
            return match spec.get("onNull") {
                Some(on_null) => evaluate(on_null, scope),
                None => Ok(Value::Null),
            }
        }
        Value::Date(date) => date,
        other => return Err(type_mismatch(op, "a date", &other)),
    };

    let format = match spec.get("format") {
        Some(expr) => match evaluate(expr, scope)? {
            Value::String(s) => s,
            other => return Err(type_mismatch(op, "a string format", &other)),
        },
        None => DEFAULT_DATE_FORMAT.to_string(),
    };
    let timezone = match spec.get("timezone") {
        Some(expr) => Some(evaluate(expr, scope)?),
        None => None,
    };

    let local = local_time(op, &date, timezone.as_ref())?;
    Ok(Value::String(format_date(&local, &format)?))
}

/// Render `date` with `%`-tokens: %Y %m %d %H %M %S %L %j %u %%
pub(crate) fn format_date(date: &NaiveDateTime, format: &str) -> Result<String> {
    let mut out = String::with_capacity(format.len() + 8);
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let token = chars.next().ok_or_else(|| {
            DocMatchError::QueryShape("$dateToString format cannot end with '%'".to_string())
        })?;
        // write! into a String cannot fail
        let _ = match token {
            'Y' => write!(out, "{:04}", date.year()),
            'm' => write!(out, "{:02}", date.month()),
            'd' => write!(out, "{:02}", date.day()),
            'H' => write!(out, "{:02}", date.hour()),
            'M' => write!(out, "{:02}", date.minute()),
            'S' => write!(out, "{:02}", date.second()),
            'L' => write!(out, "{:03}", (date.nanosecond() / 1_000_000).min(999)),
            'j' => write!(out, "{:03}", date.ordinal()),
            'u' => write!(out, "{}", date.weekday().number_from_monday()),
            '%' => write!(out, "%"),
            other => {
                return Err(DocMatchError::QueryShape(format!(
                    "$dateToString has an invalid format specifier: %{}",
                    other
                )))
            }
        };
    }
    Ok(out)
}

fn to_date(args: &Value, scope: &Scope<'_>) -> Result<Value> {
    match super::evaluate_unary("$toDate", args, scope)? {
        v if v.is_nullish() => Ok(Value::Null),
        Value::Date(date) => Ok(Value::Date(date)),
        Value::Int(millis) => millis_to_date(millis),
        Value::Double(f) if f.is_finite() => millis_to_date(f.trunc() as i64),
        Value::String(s) => parse_date_string(&s).map(Value::Date).ok_or_else(|| {
            DocMatchError::TypeMismatch(format!("$toDate cannot parse '{}' as a date", s))
        }),
        other => Err(type_mismatch("$toDate", "a string, number or date", &other)),
    }
}

fn millis_to_date(millis: i64) -> Result<Value> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(Value::Date)
        .ok_or_else(|| {
            DocMatchError::TypeMismatch(format!("$toDate: {} is out of the date range", millis))
        })
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS[.fff]` and `YYYY-MM-DD HH:MM:SS[.fff]`
/// (both read as UTC), and a bare `YYYY-MM-DD`
pub(crate) fn parse_date_string(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
