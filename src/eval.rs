//! Recursive expression evaluator.
//!
//! `eval_expr` walks a parsed [`Expr`] against a caller-populated
//! [`ValuesMap`] and produces derived series. Functions fail closed: any
//! argument, lookup, or shape failure yields an empty result rather than
//! aborting the enclosing evaluation, so a dashboard target renders
//! whatever subset of its expression still works.

use std::cmp::Ordering;

use rand::Rng;
use regex::Regex;

use crate::ast::Expr;
use crate::combine;
use crate::compute::{self, Windowed};
use crate::error::EvalError;
use crate::holtwinters;
use crate::parse;
use crate::plan::HOLT_WINTERS_BOOTSTRAP;
use crate::rank;
use crate::types::{extract_metric, parse_interval, MetricRequest, Series, ValuesMap};

// ═══════════════════════════════════════════════════════════════════
// Entry point
// ═══════════════════════════════════════════════════════════════════

/// Evaluate an expression over `[from, until]`. Selector lookups are keyed
/// by `{target, from, until}`, so the caller must have fetched under the
/// exact windows the planner emitted.
pub fn eval_expr(expr: &Expr, from: i32, until: i32, values: &ValuesMap) -> Vec<Series> {
    match expr {
        Expr::Name { target } => values
            .get(&MetricRequest::new(target.clone(), from, until))
            .cloned()
            .unwrap_or_default(),
        Expr::Const { val } => vec![const_series(*val, from, until)],
        Expr::String { .. } => Vec::new(),
        Expr::Func { target, args, arg_string } => {
            match eval_func(target, args, arg_string, from, until, values) {
                Ok(series) => series,
                Err(err) => {
                    tracing::debug!("{target}({arg_string}): {err}, returning empty");
                    Vec::new()
                }
            }
        }
    }
}

/// Degenerate single-sample series for a bare numeric literal.
fn const_series(val: f64, from: i32, until: i32) -> Series {
    let mut s = Series::blank(format!("{val}"), from, until, (until - from).max(1), 1);
    s.set(0, val);
    s
}

// ═══════════════════════════════════════════════════════════════════
// Argument helpers
// ═══════════════════════════════════════════════════════════════════

fn get_series_arg(
    arg: &Expr,
    from: i32,
    until: i32,
    values: &ValuesMap,
) -> Result<Vec<Series>, EvalError> {
    if !arg.is_series() {
        return Err(EvalError::MissingTimeseries);
    }
    let series = eval_expr(arg, from, until, values);
    if series.is_empty() {
        return Err(EvalError::MissingTimeseries);
    }
    Ok(series)
}

fn get_series_args(
    args: &[Expr],
    from: i32,
    until: i32,
    values: &ValuesMap,
) -> Result<Vec<Series>, EvalError> {
    let mut out = Vec::new();
    for arg in args {
        out.extend(get_series_arg(arg, from, until, values)?);
    }
    if out.is_empty() {
        return Err(EvalError::MissingTimeseries);
    }
    Ok(out)
}

fn first_series_arg(
    args: &[Expr],
    from: i32,
    until: i32,
    values: &ValuesMap,
) -> Result<Vec<Series>, EvalError> {
    get_series_arg(args.first().ok_or(EvalError::MissingArgument)?, from, until, values)
}

/// Unwrap a series-list argument that must resolve to exactly one series.
fn single_series(mut series: Vec<Series>) -> Result<Series, EvalError> {
    if series.len() == 1 {
        Ok(series.remove(0))
    } else {
        Err(EvalError::MissingTimeseries)
    }
}

fn get_float_arg(args: &[Expr], n: usize) -> Result<f64, EvalError> {
    match args.get(n) {
        Some(Expr::Const { val }) => Ok(*val),
        Some(_) => Err(EvalError::BadType),
        None => Err(EvalError::MissingArgument),
    }
}

fn get_float_arg_default(args: &[Expr], n: usize, default: f64) -> Result<f64, EvalError> {
    if args.len() <= n { Ok(default) } else { get_float_arg(args, n) }
}

fn get_int_arg(args: &[Expr], n: usize) -> Result<i64, EvalError> {
    get_float_arg(args, n).map(|v| v as i64)
}

fn get_int_arg_default(args: &[Expr], n: usize, default: i64) -> Result<i64, EvalError> {
    if args.len() <= n { Ok(default) } else { get_int_arg(args, n) }
}

/// Every argument from position `start` onward, as integers.
fn get_int_args(args: &[Expr], start: usize) -> Result<Vec<i64>, EvalError> {
    if start >= args.len() {
        return Err(EvalError::MissingArgument);
    }
    (start..args.len()).map(|i| get_int_arg(args, i)).collect()
}

fn get_string_arg(args: &[Expr], n: usize) -> Result<String, EvalError> {
    match args.get(n) {
        Some(Expr::String { val }) => Ok(val.clone()),
        Some(_) => Err(EvalError::BadType),
        None => Err(EvalError::MissingArgument),
    }
}

fn get_string_arg_default(args: &[Expr], n: usize, default: &str) -> Result<String, EvalError> {
    if args.len() <= n { Ok(default.to_string()) } else { get_string_arg(args, n) }
}

/// Booleans arrive from the parser as bare names: `true`, `True`, `false`,
/// `False`.
fn get_bool_arg_default(args: &[Expr], n: usize, default: bool) -> Result<bool, EvalError> {
    match args.get(n) {
        None => Ok(default),
        Some(Expr::Name { target }) => match target.as_str() {
            "true" | "True" => Ok(true),
            "false" | "False" => Ok(false),
            _ => Err(EvalError::BadType),
        },
        Some(_) => Err(EvalError::BadType),
    }
}

fn get_interval_arg(args: &[Expr], n: usize, default_sign: i32) -> Result<i32, EvalError> {
    match args.get(n) {
        Some(Expr::String { val }) => parse_interval(val, default_sign),
        Some(_) => Err(EvalError::BadType),
        None => Err(EvalError::MissingArgument),
    }
}

/// Window-length argument for moving statistics: either a sample count or
/// an interval string divided by the input step.
fn get_window_arg(args: &[Expr], n: usize, step: i32) -> Result<usize, EvalError> {
    let samples = match args.get(n) {
        Some(Expr::Const { val }) => *val as i64,
        Some(Expr::String { val }) => (parse_interval(val, 1)? / step.max(1)) as i64,
        Some(_) => return Err(EvalError::BadType),
        None => return Err(EvalError::MissingArgument),
    };
    if samples < 1 {
        return Err(EvalError::BadType);
    }
    Ok(samples as usize)
}

fn compile_regex(pattern: &str) -> Result<Regex, EvalError> {
    Regex::new(pattern).map_err(|_| EvalError::BadType)
}

// ═══════════════════════════════════════════════════════════════════
// Shared shapes
// ═══════════════════════════════════════════════════════════════════

/// Map each input series into a fresh derived series via `f`.
fn map_series(
    series: &[Series],
    name: impl Fn(&Series) -> String,
    f: impl Fn(&Series, &mut Series),
) -> Vec<Series> {
    series
        .iter()
        .map(|a| {
            let mut r = a.derived(name(a));
            f(a, &mut r);
            r
        })
        .collect()
}

/// The `forEachSeriesDo` template: evaluate the first argument and apply a
/// per-series transform, naming outputs `target(input)`.
fn for_each_series(
    target: &str,
    args: &[Expr],
    from: i32,
    until: i32,
    values: &ValuesMap,
    f: impl Fn(&Series, &mut Series),
) -> Result<Vec<Series>, EvalError> {
    let series = first_series_arg(args, from, until, values)?;
    Ok(map_series(&series, |a| format!("{target}({})", a.name), f))
}

/// Clone inputs under a new name, keeping samples and attributes.
fn rename_series(series: &[Series], name: impl Fn(&Series) -> String) -> Vec<Series> {
    series
        .iter()
        .map(|a| {
            let mut r = a.clone();
            r.name = name(a);
            r
        })
        .collect()
}

/// Sort by a score, NaN-scored series last, stable so re-sorting is a
/// no-op.
fn sort_series_by(
    series: Vec<Series>,
    descending: bool,
    score: impl Fn(&Series) -> f64,
) -> Vec<Series> {
    let worst = if descending { f64::NEG_INFINITY } else { f64::INFINITY };
    let mut scored: Vec<(f64, Series)> = series
        .into_iter()
        .map(|s| {
            let v = score(&s);
            (if v.is_nan() { worst } else { v }, s)
        })
        .collect();
    scored.sort_by(|(x, _), (y, _)| {
        let ord = x.partial_cmp(y).unwrap_or(Ordering::Equal);
        if descending { ord.reverse() } else { ord }
    });
    scored.into_iter().map(|(_, s)| s).collect()
}

/// Sample vector with NaN standing in for absent, for kernels that carry
/// gaps through a window.
fn nan_values(s: &Series) -> Vec<f64> {
    (0..s.len()).map(|i| s.at(i).unwrap_or(f64::NAN)).collect()
}

// ═══════════════════════════════════════════════════════════════════
// Function dispatch
// ═══════════════════════════════════════════════════════════════════

fn eval_func(
    target: &str,
    args: &[Expr],
    arg_string: &str,
    from: i32,
    until: i32,
    values: &ValuesMap,
) -> Result<Vec<Series>, EvalError> {
    match target {
        // ── Per-point transforms over one series ──────────────────
        "absolute" => for_each_series(target, args, from, until, values, |a, r| {
            for i in 0..a.len() {
                if let Some(v) = a.at(i) {
                    r.set(i, v.abs());
                }
            }
        }),

        "derivative" => for_each_series(target, args, from, until, values, |a, r| {
            let mut prev = None;
            for i in 0..a.len() {
                let Some(v) = a.at(i) else { continue };
                if let Some(p) = prev {
                    r.set(i, v - p);
                }
                prev = Some(v);
            }
        }),

        "integral" => for_each_series(target, args, from, until, values, |a, r| {
            let mut total = 0.0;
            for i in 0..a.len() {
                if let Some(v) = a.at(i) {
                    total += v;
                    r.set(i, total);
                }
            }
        }),

        "invert" => for_each_series(target, args, from, until, values, |a, r| {
            for i in 0..a.len() {
                if let Some(v) = a.at(i) {
                    if v != 0.0 {
                        r.set(i, 1.0 / v);
                    }
                }
            }
        }),

        "squareRoot" => for_each_series(target, args, from, until, values, |a, r| {
            for i in 0..a.len() {
                if let Some(v) = a.at(i) {
                    r.set(i, v.sqrt());
                }
            }
        }),

        "isNonNull" => for_each_series(target, args, from, until, values, |a, r| {
            for i in 0..a.len() {
                r.set(i, if a.at(i).is_some() { 1.0 } else { 0.0 });
            }
        }),

        "offsetToZero" => for_each_series(target, args, from, until, values, |a, r| {
            let min = compute::min_value(a);
            for i in 0..a.len() {
                if let Some(v) = a.at(i) {
                    r.set(i, v - min);
                }
            }
        }),

        "logarithm" | "log" => {
            let series = first_series_arg(args, from, until, values)?;
            let base = get_float_arg_default(args, 1, 10.0)?;
            let name = |a: &Series| {
                if args.len() == 1 {
                    format!("logarithm({})", a.name)
                } else {
                    format!("logarithm({},{base})", a.name)
                }
            };
            Ok(map_series(&series, name, |a, r| {
                for i in 0..a.len() {
                    if let Some(v) = a.at(i) {
                        r.set(i, v.log(base));
                    }
                }
            }))
        }

        // ── Per-point transforms with a scalar ────────────────────
        "scale" => {
            let series = first_series_arg(args, from, until, values)?;
            let factor = get_float_arg(args, 1)?;
            Ok(map_series(
                &series,
                |a| format!("scale({},{factor})", a.name),
                |a, r| {
                    for i in 0..a.len() {
                        if let Some(v) = a.at(i) {
                            r.set(i, v * factor);
                        }
                    }
                },
            ))
        }

        "offset" => {
            let series = first_series_arg(args, from, until, values)?;
            let amount = get_float_arg(args, 1)?;
            Ok(map_series(
                &series,
                |a| format!("offset({},{amount})", a.name),
                |a, r| {
                    for i in 0..a.len() {
                        if let Some(v) = a.at(i) {
                            r.set(i, v + amount);
                        }
                    }
                },
            ))
        }

        "pow" => {
            let series = first_series_arg(args, from, until, values)?;
            let exponent = get_float_arg(args, 1)?;
            Ok(map_series(
                &series,
                |a| format!("pow({},{exponent})", a.name),
                |a, r| {
                    for i in 0..a.len() {
                        if let Some(v) = a.at(i) {
                            r.set(i, v.powf(exponent));
                        }
                    }
                },
            ))
        }

        "scaleToSeconds" => {
            let series = first_series_arg(args, from, until, values)?;
            let seconds = get_int_arg(args, 1)?;
            Ok(map_series(
                &series,
                |a| format!("scaleToSeconds({},{seconds})", a.name),
                |a, r| {
                    let factor = seconds as f64 / a.step_time.max(1) as f64;
                    for i in 0..a.len() {
                        if let Some(v) = a.at(i) {
                            r.set(i, v * factor);
                        }
                    }
                },
            ))
        }

        "transformNull" => {
            let series = first_series_arg(args, from, until, values)?;
            let default = get_float_arg_default(args, 1, 0.0)?;
            let name = |a: &Series| {
                if args.len() == 1 {
                    format!("transformNull({})", a.name)
                } else {
                    format!("transformNull({},{default})", a.name)
                }
            };
            Ok(map_series(&series, name, |a, r| {
                for i in 0..a.len() {
                    r.set(i, a.at(i).unwrap_or(default));
                }
            }))
        }

        "keepLastValue" => {
            let series = first_series_arg(args, from, until, values)?;
            let limit = get_int_arg_default(args, 1, -1)?;
            let name = |a: &Series| {
                if args.len() == 1 {
                    format!("keepLastValue({})", a.name)
                } else {
                    format!("keepLastValue({},{limit})", a.name)
                }
            };
            Ok(map_series(&series, name, |a, r| {
                let mut last = f64::NAN;
                let mut missed = 0i64;
                for i in 0..a.len() {
                    match a.at(i) {
                        Some(v) => {
                            last = v;
                            missed = 0;
                            r.set(i, v);
                        }
                        None => {
                            if !last.is_nan() && (limit < 0 || missed < limit) {
                                missed += 1;
                                r.set(i, last);
                            }
                        }
                    }
                }
            }))
        }

        // ── Rate-likes ────────────────────────────────────────────
        "nonNegativeDerivative" | "perSecond" => {
            let series = first_series_arg(args, from, until, values)?;
            let max_value = get_float_arg_default(args, 1, f64::NAN)?;
            let per_second = target == "perSecond";
            let name = |a: &Series| {
                if args.len() == 1 {
                    format!("{target}({})", a.name)
                } else {
                    format!("{target}({},{max_value})", a.name)
                }
            };
            Ok(map_series(&series, name, |a, r| {
                let step = if per_second { a.step_time.max(1) as f64 } else { 1.0 };
                for i in 1..a.len() {
                    let (Some(v), Some(prev)) = (a.at(i), a.at(i - 1)) else { continue };
                    let diff = v - prev;
                    if diff >= 0.0 {
                        r.set(i, diff / step);
                    } else if !max_value.is_nan() && max_value >= v {
                        // counter wrapped: distance to the cap plus the
                        // restarted count
                        r.set(i, ((max_value - prev) + v + 1.0) / step);
                    }
                }
            }))
        }

        // ── Name transforms ───────────────────────────────────────
        "alias" => {
            let series = first_series_arg(args, from, until, values)?;
            let name = get_string_arg(args, 1)?;
            Ok(rename_series(&series, |_| name.clone()))
        }

        "aliasByMetric" => {
            let series = first_series_arg(args, from, until, values)?;
            Ok(rename_series(&series, |a| {
                let metric = extract_metric(&a.name);
                metric.rsplit('.').next().unwrap_or(metric).to_string()
            }))
        }

        "aliasByNode" => {
            let series = first_series_arg(args, from, until, values)?;
            let fields = get_int_args(args, 1)?;
            Ok(rename_series(&series, |a| {
                let metric = extract_metric(&a.name);
                let nodes: Vec<&str> = metric.split('.').collect();
                let mut parts = Vec::new();
                for &f in &fields {
                    let idx = if f < 0 { f + nodes.len() as i64 } else { f };
                    if (0..nodes.len() as i64).contains(&idx) {
                        parts.push(nodes[idx as usize]);
                    }
                }
                parts.join(".")
            }))
        }

        "aliasSub" => {
            let series = first_series_arg(args, from, until, values)?;
            let re = compile_regex(&get_string_arg(args, 1)?)?;
            let replacement = get_string_arg(args, 2)?;
            Ok(rename_series(&series, |a| {
                re.replace_all(extract_metric(&a.name), replacement.as_str()).into_owned()
            }))
        }

        // ── Filters ───────────────────────────────────────────────
        "grep" | "exclude" => {
            let series = first_series_arg(args, from, until, values)?;
            let re = compile_regex(&get_string_arg(args, 1)?)?;
            let keep_matches = target == "grep";
            Ok(series.into_iter().filter(|a| re.is_match(&a.name) == keep_matches).collect())
        }

        "averageAbove" | "averageBelow" | "currentAbove" | "currentBelow" | "maximumAbove"
        | "maximumBelow" | "minimumAbove" | "minimumBelow" => {
            let series = first_series_arg(args, from, until, values)?;
            let n = get_float_arg(args, 1)?;
            let reduce: fn(&Series) -> f64 = if target.starts_with("average") {
                compute::avg_value
            } else if target.starts_with("current") {
                compute::current_value
            } else if target.starts_with("maximum") {
                compute::max_value
            } else {
                compute::min_value
            };
            // the extremum variants are strict on the Above side
            let strict = target.starts_with("maximum") || target.starts_with("minimum");
            let above = target.ends_with("Above");
            Ok(series
                .into_iter()
                .filter(|a| {
                    let v = reduce(a);
                    match (above, strict) {
                        (true, true) => v > n,
                        (true, false) => v >= n,
                        (false, _) => v <= n,
                    }
                })
                .collect())
        }

        // ── Multi-series reductions ───────────────────────────────
        "sum" | "sumSeries" | "avg" | "averageSeries" | "maxSeries" | "minSeries"
        | "countSeries" => {
            let series = get_series_args(args, from, until, values)?;
            let reduce: fn(&[f64]) -> f64 = match target {
                "sum" | "sumSeries" => |v| v.iter().sum(),
                "avg" | "averageSeries" => |v| v.iter().sum::<f64>() / v.len() as f64,
                "maxSeries" => |v| v.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                "minSeries" => |v| v.iter().cloned().fold(f64::INFINITY, f64::min),
                _ => |v| v.len() as f64,
            };
            Ok(combine::reduce(format!("{target}({arg_string})"), &series, reduce)
                .into_iter()
                .collect())
        }

        "sumSeriesWithWildcards" | "averageSeriesWithWildcards" => {
            let series = first_series_arg(args, from, until, values)?;
            let fields = get_int_args(args, 1)?;
            let reduce: fn(&[f64]) -> f64 = if target == "sumSeriesWithWildcards" {
                |v| v.iter().sum()
            } else {
                |v| v.iter().sum::<f64>() / v.len() as f64
            };
            let groups =
                combine::group_by_key(&series, |s| Some(combine::drop_nodes(&s.name, &fields)));
            let mut out = Vec::new();
            for (key, members) in groups {
                if let Some(r) = combine::reduce(format!("{target}({key})"), &members, reduce) {
                    out.push(r);
                }
            }
            Ok(out)
        }

        "percentileOfSeries" => {
            let series = first_series_arg(args, from, until, values)?;
            let percent = get_float_arg(args, 1)?;
            let interpolate = get_bool_arg_default(args, 2, false)?;
            Ok(combine::reduce(format!("percentileOfSeries({arg_string})"), &series, |vals| {
                compute::percentile(&mut vals.to_vec(), percent, interpolate)
            })
            .into_iter()
            .collect())
        }

        // ── Series arithmetic ─────────────────────────────────────
        "diffSeries" => {
            let series = get_series_args(args, from, until, values)?;
            let minuend = &series[0];
            let mut r = minuend.derived(format!("diffSeries({arg_string})"));
            for i in 0..minuend.len() {
                let Some(v) = minuend.at(i) else { continue };
                // absent subtrahend samples count as zero
                let sub: f64 = series[1..].iter().filter_map(|s| s.at(i)).sum();
                r.set(i, v - sub);
            }
            Ok(vec![r])
        }

        "divideSeries" => {
            let numerator = single_series(first_series_arg(args, from, until, values)?)?;
            let denominator = single_series(get_series_arg(
                args.get(1).ok_or(EvalError::MissingArgument)?,
                from,
                until,
                values,
            )?)?;
            if numerator.step_time != denominator.step_time
                || numerator.len() != denominator.len()
            {
                return Err(EvalError::BadType);
            }
            let mut r = numerator.derived(format!("divideSeries({arg_string})"));
            for i in 0..numerator.len() {
                if let (Some(n), Some(d)) = (numerator.at(i), denominator.at(i)) {
                    if d != 0.0 {
                        r.set(i, n / d);
                    }
                }
            }
            Ok(vec![r])
        }

        "multiplySeries" => {
            let name = format!("multiplySeries({arg_string})");
            let mut acc: Option<Series> = None;
            for arg in args {
                let factor = single_series(get_series_arg(arg, from, until, values)?)?;
                acc = Some(match acc {
                    None => {
                        let mut r = factor.derived(name.clone());
                        for i in 0..factor.len() {
                            if let Some(v) = factor.at(i) {
                                r.set(i, v);
                            }
                        }
                        r
                    }
                    Some(product) => {
                        if product.step_time != factor.step_time
                            || product.len() != factor.len()
                        {
                            return Err(EvalError::BadType);
                        }
                        let mut r = product.derived(name.clone());
                        for i in 0..product.len() {
                            if let (Some(x), Some(y)) = (product.at(i), factor.at(i)) {
                                r.set(i, x * y);
                            }
                        }
                        r
                    }
                });
            }
            Ok(vec![acc.ok_or(EvalError::MissingTimeseries)?])
        }

        "asPercent" => {
            let series = first_series_arg(args, from, until, values)?;
            enum Total {
                OfInputs,
                Fixed(f64),
                PerPoint(Series),
            }
            let total = match args.get(1) {
                None => Total::OfInputs,
                Some(Expr::Const { val }) => Total::Fixed(*val),
                Some(other) => {
                    let t = single_series(get_series_arg(other, from, until, values)?)?;
                    Total::PerPoint(t)
                }
            };
            let mut out = Vec::new();
            for a in &series {
                if let Total::PerPoint(t) = &total {
                    if t.step_time != a.step_time || t.len() != a.len() {
                        return Err(EvalError::BadType);
                    }
                }
                let name = match &total {
                    Total::OfInputs => format!("asPercent({})", a.name),
                    Total::Fixed(v) => format!("asPercent({},{v})", a.name),
                    Total::PerPoint(t) => format!("asPercent({},{})", a.name, t.name),
                };
                let mut r = a.derived(name);
                for i in 0..a.len() {
                    let Some(v) = a.at(i) else { continue };
                    let t = match &total {
                        Total::OfInputs => {
                            let sum: f64 = series.iter().filter_map(|s| s.at(i)).sum();
                            Some(sum)
                        }
                        Total::Fixed(c) => Some(*c),
                        Total::PerPoint(ts) => ts.at(i),
                    };
                    if let Some(t) = t {
                        if t != 0.0 {
                            r.set(i, v / t * 100.0);
                        }
                    }
                }
                out.push(r);
            }
            Ok(out)
        }

        // ── Comparators ───────────────────────────────────────────
        "checkLess" | "checkLessEqual" | "checkGreater" | "checkGreaterEqual" | "checkEqual" => {
            let series = first_series_arg(args, from, until, values)?;
            let threshold = single_series(get_series_arg(
                args.get(1).ok_or(EvalError::MissingArgument)?,
                from,
                until,
                values,
            )?)?;
            let holds: fn(f64, f64) -> bool = match target {
                "checkLess" => |v, t| v < t,
                "checkLessEqual" => |v, t| v <= t,
                "checkGreater" => |v, t| v > t,
                "checkGreaterEqual" => |v, t| v >= t,
                _ => |v, t| v == t,
            };
            // a constantLine threshold arrives as a two-point series
            let fixed = threshold.len() == 2;
            let mut out = Vec::new();
            for a in &series {
                if !fixed && (threshold.len() != a.len() || threshold.step_time != a.step_time) {
                    return Err(EvalError::BadType);
                }
                let mut r = a.derived(format!("{target}({arg_string})"));
                r.draw_as_infinite = true;
                r.second_y_axis = true;
                for i in 0..a.len() {
                    let t = if fixed { threshold.at(0) } else { threshold.at(i) };
                    if let (Some(v), Some(t)) = (a.at(i), t) {
                        r.set(i, if holds(v, t) { 0.0 } else { 1.0 });
                    }
                }
                out.push(r);
            }
            Ok(out)
        }

        "checkVariance" => {
            let series = first_series_arg(args, from, until, values)?;
            let acceptable = get_float_arg(args, 1)?;
            let windows = get_int_arg(args, 2)?;
            if windows < 1 {
                return Err(EvalError::BadType);
            }
            let len = series.iter().map(Series::len).max().unwrap_or(0);
            let mut mean = vec![f64::NAN; len];
            let mut stdev = vec![f64::NAN; len];
            let mut bucket = Vec::with_capacity(series.len());
            for i in 0..len {
                bucket.clear();
                bucket.extend(series.iter().filter_map(|s| s.at(i)));
                if bucket.is_empty() {
                    continue;
                }
                let m = bucket.iter().sum::<f64>() / bucket.len() as f64;
                let var =
                    bucket.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / bucket.len() as f64;
                mean[i] = m;
                stdev[i] = var.sqrt();
            }
            Ok(map_series(
                &series,
                |a| format!("checkVariance({})", a.name),
                |a, r| {
                    r.draw_as_infinite = true;
                    r.second_y_axis = true;
                    let flags: Vec<bool> = (0..a.len())
                        .map(|i| match a.at(i) {
                            Some(v) if stdev[i] > 0.0 => {
                                (v - mean[i]).abs() / stdev[i] >= acceptable
                            }
                            _ => false,
                        })
                        .collect();
                    for i in 0..a.len() {
                        r.set(i, 0.0);
                    }
                    // only runs of at least `windows` consecutive flagged
                    // samples count as anomalies
                    let mut i = 0;
                    while i < flags.len() {
                        if !flags[i] {
                            i += 1;
                            continue;
                        }
                        let start = i;
                        while i < flags.len() && flags[i] {
                            i += 1;
                        }
                        if (i - start) as i64 >= windows {
                            for j in start..i {
                                r.set(j, 1.0);
                            }
                        }
                    }
                },
            ))
        }

        // ── Ranking ───────────────────────────────────────────────
        "highestAverage" | "highestCurrent" | "highestMax" => {
            let series = first_series_arg(args, from, until, values)?;
            let n = get_int_arg(args, 1)?;
            if n < 0 {
                return Err(EvalError::BadType);
            }
            let score: fn(&Series) -> f64 = match target {
                "highestAverage" => compute::avg_value,
                "highestCurrent" => compute::current_value,
                _ => compute::max_value,
            };
            let picked =
                rank::top_n(series.iter().enumerate().map(|(i, s)| (i, score(s))), n as usize);
            Ok(picked.into_iter().rev().map(|i| series[i].clone()).collect())
        }

        "lowestAverage" | "lowestCurrent" => {
            let series = first_series_arg(args, from, until, values)?;
            let n = get_int_arg(args, 1)?;
            if n < 0 {
                return Err(EvalError::BadType);
            }
            let score: fn(&Series) -> f64 = if target == "lowestAverage" {
                compute::avg_value
            } else {
                compute::current_value
            };
            let picked =
                rank::bottom_n(series.iter().enumerate().map(|(i, s)| (i, score(s))), n as usize);
            Ok(picked.into_iter().map(|i| series[i].clone()).collect())
        }

        "mostDeviant" => {
            // mostDeviant(n, seriesList)
            let n = get_int_arg(args, 0)?;
            if n < 0 {
                return Err(EvalError::BadType);
            }
            let series = get_series_arg(
                args.get(1).ok_or(EvalError::MissingArgument)?,
                from,
                until,
                values,
            )?;
            let picked = rank::top_n(
                series.iter().enumerate().map(|(i, s)| (i, compute::variance_value(s))),
                n as usize,
            );
            Ok(picked.into_iter().map(|i| series[i].clone()).collect())
        }

        "sortByName" => {
            let mut series = first_series_arg(args, from, until, values)?;
            series.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(series)
        }

        "sortByMaxima" => {
            let series = first_series_arg(args, from, until, values)?;
            Ok(sort_series_by(series, true, compute::max_value))
        }

        "sortByMinima" => {
            let series = first_series_arg(args, from, until, values)?;
            Ok(sort_series_by(series, false, compute::min_value))
        }

        "sortByTotal" => {
            let series = first_series_arg(args, from, until, values)?;
            Ok(sort_series_by(series, true, |s| {
                let total: f64 = s.present().sum();
                if s.present().next().is_none() { f64::NAN } else { total }
            }))
        }

        "pearsonClosest" => {
            // pearsonClosest(refSeries, seriesList, n, direction='abs')
            let reference = single_series(first_series_arg(args, from, until, values)?)?;
            let candidates = get_series_arg(
                args.get(1).ok_or(EvalError::MissingArgument)?,
                from,
                until,
                values,
            )?;
            let n = get_int_arg(args, 2)?;
            if n < 0 {
                return Err(EvalError::BadType);
            }
            let direction = get_string_arg_default(args, 3, "abs")?;
            if !matches!(direction.as_str(), "pos" | "neg" | "abs") {
                return Err(EvalError::BadType);
            }
            let ref_vals = nan_values(&reference);
            let scored = candidates.iter().enumerate().filter_map(|(i, c)| {
                let corr = compute::pearson(&ref_vals, &nan_values(c));
                if corr.is_nan() {
                    return None;
                }
                let score = match direction.as_str() {
                    "pos" if corr >= 0.0 => corr,
                    "neg" if corr <= 0.0 => -corr,
                    "abs" => corr.abs(),
                    _ => return None,
                };
                Some((i, score))
            });
            let picked = rank::top_n(scored, n as usize);
            Ok(picked.into_iter().rev().map(|i| candidates[i].clone()).collect())
        }

        // ── Windowed statistics ───────────────────────────────────
        "movingAverage" | "movingMedian" => {
            let series = first_series_arg(args, from, until, values)?;
            let average = target == "movingAverage";
            let mut out = Vec::new();
            for a in &series {
                let window = get_window_arg(args, 1, a.step_time)?;
                let mut r = a.derived(format!("{target}({},{window})", a.name));
                let mut w = Windowed::new(window);
                for i in 0..a.len() {
                    // the window trails the current sample
                    let m = if average { w.mean() } else { w.median() };
                    w.push(a.at(i).unwrap_or(f64::NAN));
                    if i >= window {
                        r.set(i, m);
                    }
                }
                out.push(r);
            }
            Ok(out)
        }

        "stdev" | "stddev" => {
            let series = first_series_arg(args, from, until, values)?;
            let points = get_int_arg(args, 1)?;
            if points < 1 {
                return Err(EvalError::BadType);
            }
            let points = points as usize;
            let missing_threshold = get_float_arg_default(args, 2, 0.1)?;
            Ok(map_series(
                &series,
                |a| format!("stdev({},{points})", a.name),
                |a, r| {
                    let mut w = Windowed::new(points);
                    for i in 0..a.len() {
                        w.push(a.at(i).unwrap_or(f64::NAN));
                        if i + 1 < points {
                            continue;
                        }
                        if w.nans() as f64 > points as f64 * missing_threshold {
                            continue;
                        }
                        r.set(i, w.stdev());
                    }
                },
            ))
        }

        "pearson" | "kolmogorovSmirnovTest2" | "ksTest2" => {
            let s1 = single_series(first_series_arg(args, from, until, values)?)?;
            let s2 = single_series(get_series_arg(
                args.get(1).ok_or(EvalError::MissingArgument)?,
                from,
                until,
                values,
            )?)?;
            if s1.step_time != s2.step_time {
                return Err(EvalError::BadType);
            }
            let window = get_window_arg(args, 2, s1.step_time)?;
            let correlate = target == "pearson";
            let label = if correlate { "pearson" } else { "kolmogorovSmirnovTest2" };
            let mut r =
                s1.derived(format!("{label}({},{},{window})", s1.name, s2.name));
            let mut w1 = Windowed::new(window);
            let mut w2 = Windowed::new(window);
            for i in 0..s1.len().min(s2.len()) {
                w1.push(s1.at(i).unwrap_or(f64::NAN));
                w2.push(s2.at(i).unwrap_or(f64::NAN));
                if i + 1 < window {
                    continue;
                }
                let v = if correlate {
                    compute::pearson(w1.data(), w2.data())
                } else {
                    compute::ks_statistic(w1.data(), w2.data())
                };
                r.set(i, v);
            }
            Ok(vec![r])
        }

        // ── Percentiles ───────────────────────────────────────────
        "nPercentile" => {
            let series = first_series_arg(args, from, until, values)?;
            let percent = get_float_arg(args, 1)?;
            Ok(map_series(
                &series,
                |a| format!("nPercentile({},{percent})", a.name),
                |a, r| {
                    let mut vals: Vec<f64> = a.present().collect();
                    let p = compute::percentile(&mut vals, percent, true);
                    for i in 0..a.len() {
                        r.set(i, p);
                    }
                },
            ))
        }

        // ── Buckets ───────────────────────────────────────────────
        "summarize" | "hitcount" => {
            let series = first_series_arg(args, from, until, values)?;
            let bucket_size = get_interval_arg(args, 1, 1)?;
            if bucket_size <= 0 {
                return Err(EvalError::BadType);
            }
            let (start, stop, func) = if target == "summarize" {
                let func = get_string_arg_default(args, 2, "sum")?;
                let align_to_from = get_bool_arg_default(args, 3, false)?;
                let (start, stop) = if align_to_from {
                    (from, until)
                } else {
                    compute::align_to_bucket_size(from, until, bucket_size)
                };
                (start, stop, func)
            } else {
                let align_to_interval = get_bool_arg_default(args, 2, false)?;
                let start = if align_to_interval {
                    compute::align_start_to_interval(from, bucket_size)
                } else {
                    from
                };
                (start, until, "sum".to_string())
            };
            let buckets = compute::bucket_count(start, stop, bucket_size);
            let hitcount = target == "hitcount";
            let mut out = Vec::new();
            for a in &series {
                let mut r = Series::blank(
                    format!("{target}({arg_string})"),
                    start,
                    stop,
                    bucket_size,
                    buckets,
                );
                let mut t = a.start_time;
                let mut bucket_end = start + bucket_size;
                let mut vals: Vec<f64> = Vec::new();
                let mut ridx = 0usize;
                let mut pending = false;
                for i in 0..a.len() {
                    pending = true;
                    if let Some(v) = a.at(i) {
                        // hitcount treats a rate as a count of events
                        vals.push(if hitcount { v * a.step_time as f64 } else { v });
                    }
                    t += a.step_time;
                    if t >= stop {
                        break;
                    }
                    if t >= bucket_end {
                        if ridx < buckets {
                            r.set(ridx, compute::summarize_values(&func, &vals));
                        }
                        ridx += 1;
                        bucket_end += bucket_size;
                        vals.clear();
                        pending = false;
                    }
                }
                if pending && ridx < buckets {
                    r.set(ridx, compute::summarize_values(&func, &vals));
                }
                out.push(r);
            }
            Ok(out)
        }

        "maxDataPoints" => {
            let series = first_series_arg(args, from, until, values)?;
            let points = get_int_arg(args, 1)?;
            if points < 1 {
                return Err(EvalError::BadType);
            }
            let points = points as usize;
            let mut out = Vec::new();
            for a in &series {
                if a.len() <= points {
                    out.push(a.clone());
                    continue;
                }
                let per = a.len().div_ceil(points);
                let new_len = a.len().div_ceil(per);
                let new_step = a.step_time * per as i32;
                let mut r = Series {
                    values: vec![0.0; new_len],
                    is_absent: vec![true; new_len],
                    stop_time: a.start_time + new_step * new_len as i32,
                    step_time: new_step,
                    ..a.clone()
                };
                for j in 0..new_len {
                    let lo = j * per;
                    let hi = ((j + 1) * per).min(a.len());
                    let bucket: Vec<f64> = (lo..hi).filter_map(|i| a.at(i)).collect();
                    if !bucket.is_empty() {
                        r.set(j, bucket.iter().sum::<f64>() / bucket.len() as f64);
                    }
                }
                out.push(r);
            }
            Ok(out)
        }

        // ── Time windows and forecasting ──────────────────────────
        "timeShift" => {
            // timeShift(seriesList, shift, resetEnd=true); the window
            // relabeling below is what resetEnd asks for, so the flag is
            // accepted and otherwise unused
            let offset = get_interval_arg(args, 1, -1)?;
            let _reset_end = get_bool_arg_default(args, 2, true)?;
            let series = get_series_arg(
                args.first().ok_or(EvalError::MissingArgument)?,
                from + offset,
                until + offset,
                values,
            )?;
            Ok(series
                .into_iter()
                .map(|mut a| {
                    a.start_time -= offset;
                    a.stop_time -= offset;
                    a
                })
                .collect())
        }

        "holtWintersForecast" => {
            let mut out = Vec::new();
            for arg in args {
                let series =
                    get_series_arg(arg, from - HOLT_WINTERS_BOOTSTRAP, until, values)?;
                for a in &series {
                    let step = a.step_time.max(1);
                    let predictions = holtwinters::analysis(&nan_values(a), step);
                    let skip = (HOLT_WINTERS_BOOTSTRAP / step) as usize;
                    let kept = predictions.get(skip..).unwrap_or(&[]);
                    let mut r = Series::blank(
                        format!("holtWintersForecast({})", a.name),
                        a.start_time + HOLT_WINTERS_BOOTSTRAP,
                        a.stop_time,
                        step,
                        kept.len(),
                    );
                    for (i, &p) in kept.iter().enumerate() {
                        r.set(i, p);
                    }
                    out.push(r);
                }
            }
            Ok(out)
        }

        // ── Thresholded removals ──────────────────────────────────
        "removeAboveValue" | "removeBelowValue" => {
            let series = first_series_arg(args, from, until, values)?;
            let n = get_float_arg(args, 1)?;
            let above = target == "removeAboveValue";
            Ok(map_series(
                &series,
                |a| format!("{target}({},{n})", a.name),
                |a, r| {
                    for i in 0..a.len() {
                        if let Some(v) = a.at(i) {
                            if (above && v > n) || (!above && v < n) {
                                continue;
                            }
                            r.set(i, v);
                        }
                    }
                },
            ))
        }

        // ── Grouping ──────────────────────────────────────────────
        "group" => get_series_args(args, from, until, values),

        "groupByNode" => {
            let series = first_series_arg(args, from, until, values)?;
            let field = get_int_arg(args, 1)?;
            if field < 0 {
                return Err(EvalError::BadType);
            }
            let callback = get_string_arg(args, 2)?;
            let groups =
                combine::group_by_key(&series, |s| combine::node_at(&s.name, field as usize));
            let mut out = Vec::new();
            for (key, members) in groups {
                // run the callback as a one-selector expression with the
                // group bound under its key
                let synthetic = format!("{callback}({key})");
                let Ok((expr, rest)) = parse::parse(&synthetic) else {
                    return Err(EvalError::BadType);
                };
                if !rest.is_empty() {
                    return Err(EvalError::BadType);
                }
                let mut local = ValuesMap::new();
                local.insert(
                    MetricRequest::new(key, from, until),
                    members.into_iter().cloned().collect(),
                );
                out.extend(eval_expr(&expr, from, until, &local));
            }
            Ok(out)
        }

        // ── Ancillary ─────────────────────────────────────────────
        "constantLine" => {
            let value = get_float_arg(args, 0)?;
            let mut r = Series::blank(format!("{value}"), from, until, (until - from).max(1), 2);
            r.set(0, value);
            r.set(1, value);
            Ok(vec![r])
        }

        "ensure" => {
            let arg = args.first().ok_or(EvalError::MissingArgument)?;
            match get_series_arg(arg, from, until, values) {
                Ok(series) => Ok(series),
                Err(_) => {
                    let len = ((until - from).max(0) / 60) as usize;
                    Ok(vec![Series::blank("unknown", from, until, 60, len)])
                }
            }
        }

        "limit" => {
            let series = first_series_arg(args, from, until, values)?;
            let n = get_int_arg(args, 1)?;
            if n < 0 {
                return Err(EvalError::BadType);
            }
            Ok(series.into_iter().take(n as usize).collect())
        }

        "changed" => for_each_series(target, args, from, until, values, |a, r| {
            let mut prev = None;
            for i in 0..a.len() {
                let current = a.at(i);
                let changed = matches!((prev, current), (Some(p), Some(v)) if p != v);
                r.set(i, if changed { 1.0 } else { 0.0 });
                if current.is_some() {
                    prev = current;
                }
            }
        }),

        "randomWalk" | "randomWalkFunction" => {
            let name = get_string_arg_default(args, 0, "randomWalk")?;
            let step = 60;
            let len = ((until - from).max(0) / step) as usize;
            let mut r = Series::blank(name, from, from + step * len as i32, step, len);
            let mut rng = rand::rng();
            let mut value = 0.0;
            for i in 0..len {
                r.set(i, value);
                value += rng.random::<f64>() - 0.5;
            }
            Ok(vec![r])
        }

        // ── Presentation tags ─────────────────────────────────────
        "color" => {
            let series = first_series_arg(args, from, until, values)?;
            let color = get_string_arg(args, 1)?;
            Ok(series
                .into_iter()
                .map(|mut a| {
                    a.color = Some(color.clone());
                    a
                })
                .collect())
        }

        "dashed" | "drawAsInfinite" | "secondYAxis" => {
            let series = first_series_arg(args, from, until, values)?;
            Ok(series
                .into_iter()
                .map(|mut a| {
                    a.name = format!("{target}({})", a.name);
                    match target {
                        "dashed" => a.dashed = true,
                        "drawAsInfinite" => a.draw_as_infinite = true,
                        _ => a.second_y_axis = true,
                    }
                    a
                })
                .collect())
        }

        "severity" | "failureThreshold" => {
            let series = first_series_arg(args, from, until, values)?;
            let n = get_float_arg(args, 1)?;
            Ok(rename_series(&series, |a| format!("{target}({},{n})", a.name)))
        }

        _ => {
            tracing::warn!("unknown function: {target}");
            Ok(Vec::new())
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════
