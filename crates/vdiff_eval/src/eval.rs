use std::cmp::Ordering;
use std::fmt;

use crate::compare::{compare, null_safe_equal};
use crate::error::EvalError;
use crate::like::wildcard_match;
use crate::value::{Collation, Value};

/// Comparison operator kinds.
///
/// Every operator is a tag; evaluation is one table-driven function keyed on
/// the operator and the operand type classes rather than one implementation
/// per operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    NullSafeEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Like,
    NotLike,
    Regexp,
    NotRegexp,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::NullSafeEq => "<=>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Like => "like",
            CmpOp::NotLike => "not like",
            CmpOp::Regexp => "regexp",
            CmpOp::NotRegexp => "not regexp",
        };
        f.write_str(s)
    }
}

/// SQL three-valued logic outcome of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Null,
}

impl Truth {
    pub fn from_bool(b: bool) -> Truth {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }

    pub fn negate(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Null => Truth::Null,
        }
    }

    /// Render as the SQL integer result of a comparison.
    pub fn into_value(self) -> Value {
        match self {
            Truth::True => Value::Int64(1),
            Truth::False => Value::Int64(0),
            Truth::Null => Value::Null,
        }
    }
}

/// Evaluate a comparison operator over two operands.
///
/// Every operator except `<=>` yields NULL as soon as either operand is
/// NULL; `<=>` is the only null-safe entry point.
pub fn evaluate(op: CmpOp, left: &Value, right: &Value) -> Result<Truth, EvalError> {
    if op != CmpOp::NullSafeEq && (left.is_null() || right.is_null()) {
        return Ok(Truth::Null);
    }

    match op {
        CmpOp::Eq | CmpOp::Ne | CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            Ok(ordered(op, compare(left, right)?))
        }
        CmpOp::NullSafeEq => Ok(Truth::from_bool(null_safe_equal(left, right)?)),
        CmpOp::In => eval_in(left, right),
        CmpOp::NotIn => eval_in(left, right).map(Truth::negate),
        CmpOp::Like => eval_like(left, right),
        CmpOp::NotLike => eval_like(left, right).map(Truth::negate),
        CmpOp::Regexp | CmpOp::NotRegexp => {
            Err(EvalError::Unsupported("regexp is not evaluated locally"))
        }
    }
}

fn ordered(op: CmpOp, cmp: Option<Ordering>) -> Truth {
    let Some(ord) = cmp else {
        return Truth::Null;
    };
    let hit = match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
        _ => unreachable!("ordered() is only called for ordering operators"),
    };
    Truth::from_bool(hit)
}

/// Membership test. Short-circuits on the first match; NULL members
/// contaminate the outcome only when no member matched.
fn eval_in(left: &Value, right: &Value) -> Result<Truth, EvalError> {
    let Value::Tuple(members) = right else {
        return Err(EvalError::Unsupported("IN requires a tuple right operand"));
    };

    let mut saw_null = false;
    for member in members {
        match compare(left, member)? {
            Some(Ordering::Equal) => return Ok(Truth::True),
            Some(_) => {}
            None => saw_null = true,
        }
    }
    if saw_null {
        Ok(Truth::Null)
    } else {
        Ok(Truth::False)
    }
}

fn eval_like(left: &Value, right: &Value) -> Result<Truth, EvalError> {
    let (target, tc) = coerce_str(left)?;
    let (pattern, pc) = coerce_str(right)?;

    let (pattern, target) = match tc.merge(pc) {
        Collation::Binary => (pattern, target),
        Collation::Utf8GeneralCi => (fold(&pattern), fold(&target)),
    };
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = target.chars().collect();
    Ok(Truth::from_bool(wildcard_match(&p, &t)))
}

fn fold(s: &str) -> String {
    s.chars().flat_map(char::to_lowercase).collect()
}

/// String coercion for LIKE operands: numbers and temporals match against
/// their decimal text form, binary values keep binary collation.
fn coerce_str(v: &Value) -> Result<(String, Collation), EvalError> {
    let out = match v {
        Value::Text(c, s) => (s.clone(), *c),
        Value::Binary(b) => (String::from_utf8_lossy(b).into_owned(), Collation::Binary),
        Value::Int64(i) => (i.to_string(), Collation::Utf8GeneralCi),
        Value::Uint64(u) => (u.to_string(), Collation::Utf8GeneralCi),
        Value::Float64(f) => (f.to_string(), Collation::Utf8GeneralCi),
        Value::Decimal(d) => (d.to_string(), Collation::Utf8GeneralCi),
        Value::Date(d) => (d.to_string(), Collation::Utf8GeneralCi),
        Value::Time(t) => (t.to_string(), Collation::Utf8GeneralCi),
        Value::Tuple(items) => {
            return Err(EvalError::OperandShouldContainColumns(items.len()));
        }
        Value::Null => unreachable!("NULL operands are gated before coercion"),
    };
    Ok(out)
}
