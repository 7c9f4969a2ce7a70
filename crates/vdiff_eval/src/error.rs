use thiserror::Error;

/// Evaluation failures that must keep their MySQL-compatible message shape.
///
/// `ValueOutOfRange` and `OperandShouldContainColumns` are matched textually
/// by the cross-check oracle against MySQL's own error strings; do not
/// reword them. Everything else degrades to NULL at the operator layer and
/// never reaches callers as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("{kind} value is out of range in '{expr}'")]
    ValueOutOfRange { kind: &'static str, expr: String },

    #[error("Operand should contain {0} column(s)")]
    OperandShouldContainColumns(usize),

    /// Structurally invalid comparison, e.g. a non-tuple right operand for
    /// IN, or an operator this kernel does not evaluate locally.
    #[error("unsupported comparison: {0}")]
    Unsupported(&'static str),
}

impl EvalError {
    pub fn bigint_out_of_range(expr: String) -> Self {
        EvalError::ValueOutOfRange {
            kind: "BIGINT",
            expr,
        }
    }

    pub fn double_out_of_range(expr: String) -> Self {
        EvalError::ValueOutOfRange {
            kind: "DOUBLE",
            expr,
        }
    }

    pub fn decimal_out_of_range(expr: String) -> Self {
        EvalError::ValueOutOfRange {
            kind: "DECIMAL",
            expr,
        }
    }
}
