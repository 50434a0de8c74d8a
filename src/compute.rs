use std::cmp::Ordering;

use crate::types::Series;

// ═══════════════════════════════════════════════════════════════════
// Whole-series reducers
// ═══════════════════════════════════════════════════════════════════

/// Average of the present samples; NaN when the series is all-absent.
pub fn avg_value(s: &Series) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in s.present() {
        sum += v;
        n += 1;
    }
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// The last present sample; NaN when the series is all-absent.
pub fn current_value(s: &Series) -> f64 {
    for i in (0..s.len()).rev() {
        if let Some(v) = s.at(i) {
            return v;
        }
    }
    f64::NAN
}

pub fn max_value(s: &Series) -> f64 {
    s.present().fold(f64::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc })
}

pub fn min_value(s: &Series) -> f64 {
    s.present().fold(f64::NAN, |acc, v| if acc.is_nan() || v < acc { v } else { acc })
}

/// Population variance of the present samples; NaN when all-absent.
pub fn variance_value(s: &Series) -> f64 {
    let mean = avg_value(s);
    if mean.is_nan() {
        return f64::NAN;
    }
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in s.present() {
        sum += (v - mean) * (v - mean);
        n += 1;
    }
    sum / n as f64
}

// ═══════════════════════════════════════════════════════════════════
// Percentiles
// ═══════════════════════════════════════════════════════════════════

/// Percentile by partial selection. The rank is `k = (len-1)·p/100`; the
/// smallest `⌈k⌉+1` elements are partitioned to the front, the largest of
/// those is the ceiling-rank answer, and interpolation mixes in the second
/// largest when `k` is fractional. Scrambles `values`.
pub fn percentile(values: &mut [f64], percent: f64, interpolate: bool) -> f64 {
    if values.is_empty() || !(0.0..=100.0).contains(&percent) {
        return f64::NAN;
    }
    if values.len() == 1 {
        return values[0];
    }

    let k = (values.len() - 1) as f64 * percent / 100.0;
    let length = k.ceil() as usize + 1;
    values.select_nth_unstable_by(length - 1, |a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mut top = f64::NEG_INFINITY;
    let mut second = f64::NEG_INFINITY;
    for &v in &values[..length] {
        if v > top {
            second = top;
            top = v;
        } else if v > second {
            second = v;
        }
    }

    let remainder = k - k.floor();
    if remainder == 0.0 || !interpolate {
        top
    } else {
        top * remainder + second * (1.0 - remainder)
    }
}

/// Bucket reducer used by `summarize` and friends: `sum`, `avg`, `max`,
/// `min`, `last`, or `pNN` for the NN-th percentile. NaN for an empty
/// bucket or an unknown reducer name.
pub fn summarize_values(func: &str, values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    match func {
        "sum" => values.iter().sum(),
        "avg" => values.iter().sum::<f64>() / values.len() as f64,
        "max" => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        "min" => values.iter().cloned().fold(f64::INFINITY, f64::min),
        "last" => values[values.len() - 1],
        _ => match func.strip_prefix('p').and_then(|p| p.parse::<f64>().ok()) {
            Some(percent) => percentile(&mut values.to_vec(), percent, true),
            None => f64::NAN,
        },
    }
}

// ═══════════════════════════════════════════════════════════════════
// Bucket alignment
// ═══════════════════════════════════════════════════════════════════

/// Widen `[start, stop]` outward to whole bucket multiples.
pub fn align_to_bucket_size(start: i32, stop: i32, bucket: i32) -> (i32, i32) {
    let start = start - start.rem_euclid(bucket);
    let rem = stop.rem_euclid(bucket);
    let stop = if rem == 0 { stop } else { stop - rem + bucket };
    (start, stop)
}

/// Snap `start` back to the coarsest calendar unit the bucket spans, the
/// way Graphite's hitcount aligns.
pub fn align_start_to_interval(start: i32, bucket: i32) -> i32 {
    for unit in [86400, 3600, 60] {
        if bucket >= unit {
            return start - start.rem_euclid(unit);
        }
    }
    start
}

pub fn bucket_count(start: i32, stop: i32, bucket: i32) -> usize {
    (((stop - start) as f64) / bucket as f64).ceil() as usize
}

// ═══════════════════════════════════════════════════════════════════
// Moving windows
// ═══════════════════════════════════════════════════════════════════

/// Fixed-size ring buffer over the last N samples. Absent inputs are
/// pushed as NaN; they occupy a slot but are excluded from the moments, so
/// results stay comparable across gaps.
pub struct Windowed {
    data: Vec<f64>,
    head: usize,
    sum: f64,
    sum_sq: f64,
    nans: usize,
}

impl Windowed {
    pub fn new(size: usize) -> Self {
        Windowed {
            data: vec![f64::NAN; size],
            head: 0,
            sum: 0.0,
            sum_sq: 0.0,
            nans: size,
        }
    }

    pub fn push(&mut self, v: f64) {
        let old = self.data[self.head];
        if old.is_nan() {
            self.nans -= 1;
        } else {
            self.sum -= old;
            self.sum_sq -= old * old;
        }
        if v.is_nan() {
            self.nans += 1;
        } else {
            self.sum += v;
            self.sum_sq += v * v;
        }
        self.data[self.head] = v;
        self.head = (self.head + 1) % self.data.len();
    }

    /// Number of non-NaN samples currently in the window.
    pub fn len(&self) -> usize {
        self.data.len() - self.nans
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of NaN slots currently in the window.
    pub fn nans(&self) -> usize {
        self.nans
    }

    /// Raw window slots, NaN included. The ring rotates, but two windows
    /// of the same size fed in lockstep stay index-aligned with each
    /// other.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn mean(&self) -> f64 {
        if self.len() == 0 {
            return f64::NAN;
        }
        self.sum / self.len() as f64
    }

    pub fn median(&self) -> f64 {
        let mut vals: Vec<f64> = self.data.iter().cloned().filter(|v| !v.is_nan()).collect();
        if vals.is_empty() {
            return f64::NAN;
        }
        vals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let mid = vals.len() / 2;
        if vals.len() % 2 == 1 {
            vals[mid]
        } else {
            (vals[mid - 1] + vals[mid]) / 2.0
        }
    }

    /// Biased standard deviation, `sqrt(n·Σx² − (Σx)²) / n`. The single-pass
    /// formula loses precision on large offsets but matches what dashboards
    /// have historically rendered.
    pub fn stdev(&self) -> f64 {
        let n = self.len() as f64;
        if n == 0.0 {
            return f64::NAN;
        }
        (n * self.sum_sq - self.sum * self.sum).max(0.0).sqrt() / n
    }
}

// ═══════════════════════════════════════════════════════════════════
// Correlation and distribution distance
// ═══════════════════════════════════════════════════════════════════

/// Pearson correlation over the positions where both inputs are non-NaN.
/// NaN when fewer than two shared samples or either side has zero
/// variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys.iter())
        .filter(|(x, y)| !x.is_nan() && !y.is_nan())
        .map(|(&x, &y)| (x, y))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in &pairs {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x) * (x - mean_x);
        var_y += (y - mean_y) * (y - mean_y);
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

/// Two-sample Kolmogorov-Smirnov statistic: the largest gap between the
/// empirical CDFs of the non-NaN samples of each input.
pub fn ks_statistic(xs: &[f64], ys: &[f64]) -> f64 {
    let mut a: Vec<f64> = xs.iter().cloned().filter(|v| !v.is_nan()).collect();
    let mut b: Vec<f64> = ys.iter().cloned().filter(|v| !v.is_nan()).collect();
    if a.is_empty() || b.is_empty() {
        return f64::NAN;
    }
    a.sort_by(|x, y| x.partial_cmp(y).unwrap_or(Ordering::Equal));
    b.sort_by(|x, y| x.partial_cmp(y).unwrap_or(Ordering::Equal));

    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;
    while i < a.len() && j < b.len() {
        match a[i].partial_cmp(&b[j]).unwrap_or(Ordering::Equal) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
        d = d.max((i as f64 / na - j as f64 / nb).abs());
    }
    d
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════
