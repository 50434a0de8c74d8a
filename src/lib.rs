//! Core of a Graphite-style metrics query engine: parse a textual target
//! expression, plan the raw metric fetches it needs, and evaluate it over
//! fetched series.
//!
//! Storage is someone else's problem. The caller parses, asks the planner
//! which `(metric, from, until)` windows to fetch, loads them into a
//! [`ValuesMap`], and hands everything to the evaluator:
//!
//! ```
//! use carbon_query::{eval_expr, parse, requests, MetricRequest, Series, ValuesMap};
//!
//! let (expr, rest) = parse("scale(foo.bar,2)").unwrap();
//! assert!(rest.is_empty());
//!
//! // plan the fetches; offsets are relative to the render window
//! assert_eq!(requests(&expr), vec![MetricRequest::new("foo.bar", 0, 0)]);
//!
//! // fetch (here: by hand), then evaluate
//! let (from, until) = (0, 120);
//! let mut fetched = Series::blank("foo.bar", from, until, 60, 2);
//! fetched.set(0, 1.0);
//! fetched.set(1, 2.0);
//! let mut values = ValuesMap::new();
//! values.insert(MetricRequest::new("foo.bar", from, until), vec![fetched]);
//!
//! let out = eval_expr(&expr, from, until, &values);
//! assert_eq!(out[0].name, "scale(foo.bar,2)");
//! assert_eq!(out[0].values, vec![2.0, 4.0]);
//! ```

pub mod ast;
pub mod combine;
pub mod compute;
pub mod error;
pub mod eval;
pub mod holtwinters;
pub mod parse;
pub mod plan;
pub mod rank;
pub mod types;

// Re-export the public API
pub use ast::Expr;
pub use error::EvalError;
pub use eval::eval_expr;
pub use parse::{parse, ParseError};
pub use plan::requests;
pub use types::{MetricRequest, Series, ValuesMap};
