use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

// ═══════════════════════════════════════════════════════════════════
// Fetch requests
// ═══════════════════════════════════════════════════════════════════

/// Key for a raw metric fetch. The planner emits these with `from`/`until`
/// as offsets relative to the caller's base window (0 for unshifted
/// subtrees); the evaluator looks series up under the absolute window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricRequest {
    pub metric: String,
    pub from: i32,
    pub until: i32,
}

impl MetricRequest {
    pub fn new(metric: impl Into<String>, from: i32, until: i32) -> Self {
        MetricRequest { metric: metric.into(), from, until }
    }
}

/// Fetched results, keyed by the exact requests the planner emitted (with
/// the caller's base window applied). One selector may resolve to many
/// series via globs. Owned by the caller; the evaluator only reads it.
pub type ValuesMap = HashMap<MetricRequest, Vec<Series>>;

// ═══════════════════════════════════════════════════════════════════
// Series
// ═══════════════════════════════════════════════════════════════════

/// An evenly-sampled time-series over `[start_time, stop_time)` with a
/// parallel absence vector. `is_absent[i] == true` means "no data at this
/// point"; the stored `values[i]` is normalized to 0.0 and must be ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub start_time: i32,
    pub stop_time: i32,
    pub step_time: i32,
    pub values: Vec<f64>,
    pub is_absent: Vec<bool>,

    // Presentation attributes, passed through untouched by the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub dashed: bool,
    #[serde(default)]
    pub draw_as_infinite: bool,
    #[serde(default)]
    pub second_y_axis: bool,
}

impl Series {
    /// A fresh all-absent series with the given shape.
    pub fn blank(name: impl Into<String>, start: i32, stop: i32, step: i32, len: usize) -> Self {
        Series {
            name: name.into(),
            start_time: start,
            stop_time: stop,
            step_time: step,
            values: vec![0.0; len],
            is_absent: vec![true; len],
            color: None,
            dashed: false,
            draw_as_infinite: false,
            second_y_axis: false,
        }
    }

    /// A derived series shaped like `self`, all-absent, carrying the same
    /// window, step, and presentation attributes under a new name.
    pub fn derived(&self, name: impl Into<String>) -> Series {
        Series {
            name: name.into(),
            values: vec![0.0; self.values.len()],
            is_absent: vec![true; self.values.len()],
            ..self.clone()
        }
    }

    /// Store a sample, normalizing NaN and ±∞ to absent.
    pub fn set(&mut self, i: usize, v: f64) {
        if v.is_finite() {
            self.values[i] = v;
            self.is_absent[i] = false;
        } else {
            self.values[i] = 0.0;
            self.is_absent[i] = true;
        }
    }

    /// The sample at `i`, or None when absent or out of range.
    pub fn at(&self, i: usize) -> Option<f64> {
        if i < self.values.len() && !self.is_absent[i] {
            Some(self.values[i])
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterator over present samples.
    pub fn present(&self) -> impl Iterator<Item = f64> + '_ {
        self.values
            .iter()
            .zip(self.is_absent.iter())
            .filter(|&(_, &absent)| !absent)
            .map(|(&v, _)| v)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Interval strings
// ═══════════════════════════════════════════════════════════════════

const UNITS: &[(&str, i32)] = &[
    ("seconds", 1),
    ("minutes", 60),
    ("hours", 3600),
    ("days", 86400),
    ("weeks", 7 * 86400),
    ("months", 30 * 86400),
    ("years", 365 * 86400),
];

/// Parse an interval string like `"1min"`, `"7d"`, `"-30s"` into signed
/// seconds. Units match case-insensitively on any unambiguous prefix of the
/// full unit name, so `s`, `sec`, `mon`, `hour` all work while a bare `m`
/// (minutes vs months) is rejected. `default_sign` (+1 or -1) applies only
/// when the literal carries no sign of its own.
pub fn parse_interval(s: &str, default_sign: i32) -> Result<i32, EvalError> {
    let mut s = s;
    let mut sign = default_sign;
    match s.as_bytes().first() {
        Some(b'-') => {
            sign = -1;
            s = &s[1..];
        }
        Some(b'+') => {
            sign = 1;
            s = &s[1..];
        }
        _ => {}
    }

    let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return Err(EvalError::BadType);
    }
    let magnitude: i32 = s[..digits].parse().map_err(|_| EvalError::BadType)?;

    let unit = s[digits..].to_ascii_lowercase();
    if unit.is_empty() {
        return Err(EvalError::BadType);
    }
    let mut matches = UNITS.iter().filter(|(name, _)| name.starts_with(unit.as_str()));
    match (matches.next(), matches.next()) {
        (Some(&(_, seconds)), None) => Ok(sign * magnitude * seconds),
        _ => Err(EvalError::BadType),
    }
}

// ═══════════════════════════════════════════════════════════════════
// Metric names
// ═══════════════════════════════════════════════════════════════════

pub(crate) fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, b'.' | b'_' | b'-' | b'*' | b'?' | b':' | b'[' | b']')
}

/// Find the metric path inside a display name such as
/// `"scale(servers.web1.cpu,2)"` → `"servers.web1.cpu"`. A metric is a run
/// of name characters terminated by `)` or a top-level comma; brace groups
/// keep their inner commas.
pub fn extract_metric(name: &str) -> &str {
    let bytes = name.as_bytes();
    let mut start = 0;
    let mut braces = 0;
    for (end, &c) in bytes.iter().enumerate() {
        match c {
            b'{' => braces += 1,
            b'}' => braces -= 1,
            b')' => return &name[start..end],
            b',' if braces == 0 => return &name[start..end],
            _ if !is_name_char(c) && c != b',' => start = end + 1,
            _ => {}
        }
    }
    &name[start..]
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════
