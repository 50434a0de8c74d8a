use thiserror::Error;

/// Failure modes shared by the parser, the argument helpers, and the
/// evaluator. The evaluator never surfaces these to callers: every failure
/// degrades to an empty series list so a partially-broken dashboard target
/// still renders whatever it can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("missing expression")]
    MissingExpr,
    #[error("missing argument")]
    MissingArgument,
    #[error("missing comma")]
    MissingComma,
    #[error("missing quote")]
    MissingQuote,
    #[error("unexpected character")]
    UnexpectedCharacter,
    #[error("bad argument type")]
    BadType,
    #[error("missing time series argument")]
    MissingTimeseries,
}
