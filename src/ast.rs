//! Expression tree produced by [`crate::parse::parse`].

/// A parsed target expression. Immutable once built; evaluation and
/// planning both walk it by reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A metric selector, possibly containing glob and brace-expansion
    /// characters (`servers.{a,b}.cpu`). The selector text is preserved
    /// verbatim.
    Name { target: String },
    /// A numeric literal.
    Const { val: f64 },
    /// A quoted string literal, quotes stripped.
    String { val: String },
    /// A function call. `arg_string` is the verbatim text between the outer
    /// parentheses, used to build canonical display names in output series.
    Func {
        target: String,
        args: Vec<Expr>,
        arg_string: String,
    },
}

impl Expr {
    pub fn name(target: impl Into<String>) -> Self {
        Expr::Name { target: target.into() }
    }

    /// The function or selector name; empty for literals.
    pub fn target(&self) -> &str {
        match self {
            Expr::Name { target } | Expr::Func { target, .. } => target,
            _ => "",
        }
    }

    pub fn args(&self) -> &[Expr] {
        match self {
            Expr::Func { args, .. } => args,
            _ => &[],
        }
    }

    /// The verbatim argument text of a call, e.g. `"foo.bar,2"` for
    /// `scale(foo.bar,2)`.
    pub fn arg_string(&self) -> &str {
        match self {
            Expr::Func { arg_string, .. } => arg_string,
            _ => "",
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Expr::Const { .. })
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Expr::String { .. })
    }

    /// Whether evaluating this node can produce series (a selector or call,
    /// as opposed to a literal).
    pub fn is_series(&self) -> bool {
        matches!(self, Expr::Name { .. } | Expr::Func { .. })
    }
}
