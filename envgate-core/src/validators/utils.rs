//! Shared helpers for payload validation
//!
//! ## Timestamp Grammar
//!
//! ```text
//! YYYY-MM-DDTHH:MM:SS[zone]
//!
//! zone := "Z" | ("+" | "-") HH [ [":"] MM ]
//! ```
//!
//! The shape is checked byte by byte first; `chrono` then confirms the date
//! and time exist (month 1 to 12, day within the month, leap years, etc).
//! Fractional seconds, date-only strings and space separators are refused.

use std::borrow::Cow;

use chrono::NaiveDateTime;

/// Length of `YYYY-MM-DDTHH:MM:SS`
const DATETIME_LEN: usize = 19;

/// Positions that must hold a digit within the date-time part
const DIGIT_POSITIONS: [usize; 14] = [0, 1, 2, 3, 5, 6, 8, 9, 11, 12, 14, 15, 17, 18];

/// Separator bytes and their positions
const SEPARATORS: [(usize, u8); 5] = [(4, b'-'), (7, b'-'), (10, b'T'), (13, b':'), (16, b':')];

/// Decode UTF-8, dropping any byte sequence that is not valid
///
/// Never fails. Valid input is returned borrowed.
pub fn decode_utf8_ignoring_invalid(raw: &[u8]) -> Cow<'_, str> {
    let mut rest = match std::str::from_utf8(raw) {
        Ok(text) => return Cow::Borrowed(text),
        Err(_) => raw,
    };

    let mut out = String::with_capacity(raw.len());
    loop {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                out.push_str(text);
                break;
            }
            Err(err) => {
                let (valid, after) = rest.split_at(err.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match err.error_len() {
                    Some(skip) => rest = &after[skip..],
                    // Truncated sequence at the very end
                    None => break,
                }
            }
        }
    }
    Cow::Owned(out)
}

/// Check `ts` against the accepted ISO-8601 grammar
pub fn is_iso8601_timestamp(ts: &str) -> bool {
    let bytes = ts.as_bytes();
    if bytes.len() < DATETIME_LEN {
        return false;
    }

    if !DIGIT_POSITIONS.iter().all(|&i| bytes[i].is_ascii_digit()) {
        return false;
    }
    if !SEPARATORS.iter().all(|&(i, sep)| bytes[i] == sep) {
        return false;
    }
    // chrono accepts :60 as a leap second, ISO clocks in the field do not send it
    if two_digits(&bytes[17..19]) > 59 {
        return false;
    }

    // All 19 leading bytes are ASCII, so slicing here is on a char boundary
    let (datetime, zone) = ts.split_at(DATETIME_LEN);
    if NaiveDateTime::parse_from_str(datetime, "%Y-%m-%dT%H:%M:%S").is_err() {
        return false;
    }

    is_zone_designator(zone.as_bytes())
}

fn is_zone_designator(zone: &[u8]) -> bool {
    match zone {
        [] | [b'Z'] => true,
        [sign, offset @ ..] if *sign == b'+' || *sign == b'-' => match offset {
            [h1, h2] => valid_offset(&[*h1, *h2], None),
            [h1, h2, m1, m2] => valid_offset(&[*h1, *h2], Some(&[*m1, *m2])),
            [h1, h2, b':', m1, m2] => valid_offset(&[*h1, *h2], Some(&[*m1, *m2])),
            _ => false,
        },
        _ => false,
    }
}

fn valid_offset(hours: &[u8; 2], minutes: Option<&[u8; 2]>) -> bool {
    if !hours.iter().all(u8::is_ascii_digit) || two_digits(hours) > 23 {
        return false;
    }
    match minutes {
        Some(m) => m.iter().all(u8::is_ascii_digit) && two_digits(m) <= 59,
        None => true,
    }
}

/// Caller guarantees both bytes are ASCII digits
fn two_digits(pair: &[u8]) -> u8 {
    (pair[0] - b'0') * 10 + (pair[1] - b'0')
}
