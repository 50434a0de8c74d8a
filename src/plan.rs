//! Metric-request planner: walk an [`Expr`] and collect the raw fetches it
//! needs, applying time-window rewrites for time-aware functions. The
//! planner only collects and rewrites offsets; it never evaluates.

use crate::ast::Expr;
use crate::types::{parse_interval, MetricRequest};

/// Seconds of history `holtWintersForecast` needs ahead of the render
/// window to warm up its seasonal state.
pub const HOLT_WINTERS_BOOTSTRAP: i32 = 7 * 86400;

/// Collect the fetch requests for an expression. `from`/`until` on the
/// returned requests are offsets relative to the caller's base window:
/// zero for plain selectors, shifted for `timeShift` subtrees, and pulled
/// back a week for `holtWintersForecast` inputs. The caller adds its base
/// window and hands the result to the fetcher; duplicates are the
/// fetcher's to collapse.
pub fn requests(expr: &Expr) -> Vec<MetricRequest> {
    match expr {
        Expr::Name { target } => vec![MetricRequest::new(target.clone(), 0, 0)],
        Expr::Const { .. } | Expr::String { .. } => Vec::new(),
        Expr::Func { target, args, .. } => {
            let mut reqs: Vec<MetricRequest> = args.iter().flat_map(requests).collect();
            match target.as_str() {
                "timeShift" => {
                    let Some(Expr::String { val }) = args.get(1) else {
                        return Vec::new();
                    };
                    let Ok(offset) = parse_interval(val, -1) else {
                        return Vec::new();
                    };
                    for r in &mut reqs {
                        r.from += offset;
                        r.until += offset;
                    }
                }
                "holtWintersForecast" => {
                    for r in &mut reqs {
                        r.from -= HOLT_WINTERS_BOOTSTRAP;
                    }
                }
                _ => {}
            }
            reqs
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════
