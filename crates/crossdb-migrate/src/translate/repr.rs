//! Building blocks for literal rendering shared by the engine reprs.

use chrono::{DateTime, FixedOffset, NaiveDateTime, NaiveTime, Timelike};

use crate::error::Result;

/// A piece of a string split at control characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Control(char),
}

/// Split text into printable runs and single control characters (< 0x20).
pub fn split_control_chars(s: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if (c as u32) < 0x20 {
            if start < i {
                segments.push(Segment::Text(&s[start..i]));
            }
            segments.push(Segment::Control(c));
            start = i + c.len_utf8();
        }
    }
    if start < s.len() {
        segments.push(Segment::Text(&s[start..]));
    }
    segments
}

/// Render a string as quoted runs joined with the engine's concatenation
/// operator, control characters going through `control`.
pub fn render_text<Q, C>(s: &str, concat_op: &str, quote: Q, control: C) -> Result<String>
where
    Q: Fn(&str) -> String,
    C: Fn(char) -> Result<String>,
{
    let segments = split_control_chars(s);
    if segments.is_empty() {
        return Ok(quote(""));
    }
    let parts = segments
        .into_iter()
        .map(|seg| match seg {
            Segment::Text(t) => Ok(quote(t)),
            Segment::Control(c) => control(c),
        })
        .collect::<Result<Vec<_>>>()?;
    if parts.len() == 1 {
        Ok(parts.into_iter().next().unwrap_or_default())
    } else {
        Ok(format!("({})", parts.join(&format!(" {} ", concat_op))))
    }
}

/// Drop trailing zeros of a fractional part, and the dot if nothing remains.
pub fn trim_fraction(s: &str) -> String {
    match s.find('.') {
        Some(dot) => {
            let end = s[dot + 1..]
                .find(|c: char| !c.is_ascii_digit())
                .map(|i| i + dot + 1)
                .unwrap_or(s.len());
            let digits = s[dot + 1..end].trim_end_matches('0');
            let mut out = s[..dot].to_string();
            if !digits.is_empty() {
                out.push('.');
                out.push_str(digits);
            }
            out.push_str(&s[end..]);
            out
        }
        None => s.to_string(),
    }
}

pub fn format_time(t: &NaiveTime) -> String {
    trim_fraction(&format!(
        "{:02}:{:02}:{:02}.{:09}",
        t.hour(),
        t.minute(),
        t.second(),
        t.nanosecond()
    ))
}

/// Date and time joined by `separator` (`' '` or `'T'`).
pub fn format_datetime(dt: &NaiveDateTime, separator: char) -> String {
    format!("{}{}{}", dt.date().format("%Y-%m-%d"), separator, format_time(&dt.time()))
}

pub fn format_datetime_offset(dt: &DateTime<FixedOffset>, separator: char) -> String {
    format!(
        "{}{}",
        format_datetime(&dt.naive_local(), separator),
        dt.offset()
    )
}
