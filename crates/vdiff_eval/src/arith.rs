use bigdecimal::{BigDecimal, Zero};

use crate::error::EvalError;
use crate::value::Value;

/// Arithmetic operator kinds for the expression corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum NumClass {
    Int,
    Uint,
    Decimal,
    Float,
}

fn class_of(v: &Value) -> NumClass {
    match v {
        Value::Int64(_) => NumClass::Int,
        Value::Uint64(_) => NumClass::Uint,
        Value::Decimal(_) => NumClass::Decimal,
        // Strings, temporals and floats all take the double path.
        _ => NumClass::Float,
    }
}

/// MySQL numeric arithmetic: integer ops stay integral and fail loudly on
/// overflow, unsigned operands force the unsigned domain, decimals keep
/// exact precision, and everything touching a float (or a string) computes
/// as a double. Division by zero yields NULL.
pub fn arithmetic(op: ArithOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    if let Value::Tuple(items) = left {
        return Err(EvalError::OperandShouldContainColumns(items.len()));
    }
    if let Value::Tuple(_) = right {
        return Err(EvalError::OperandShouldContainColumns(1));
    }

    let expr = || format!("({left} {} {right})", op.symbol());

    // The integer `/` produces an exact decimal, so division never takes the
    // integer path.
    let class = class_of(left).max(class_of(right));
    let class = if op == ArithOp::Div && class < NumClass::Decimal {
        NumClass::Decimal
    } else {
        class
    };

    match class {
        NumClass::Float => {
            let (a, b) = (left.as_f64(), right.as_f64());
            if op == ArithOp::Div && b == 0.0 {
                return Ok(Value::Null);
            }
            let out = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
            };
            if !out.is_finite() {
                return Err(EvalError::double_out_of_range(expr()));
            }
            Ok(Value::Float64(out))
        }
        NumClass::Decimal => {
            let a = as_decimal(left);
            let b = as_decimal(right);
            let out = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => {
                    if b.is_zero() {
                        return Ok(Value::Null);
                    }
                    // MySQL div_precision_increment: four more fractional
                    // digits than the dividend.
                    let scale = a.fractional_digit_count().max(0) + 4;
                    (a / b).with_scale_round(scale, bigdecimal::RoundingMode::HalfUp)
                }
            };
            Ok(Value::Decimal(out))
        }
        NumClass::Uint => {
            let a = int_of(left);
            let b = int_of(right);
            // The i128 accumulator itself can overflow: u64::MAX squared is
            // past i128::MAX, so even the widened math must be checked.
            let out = match op {
                ArithOp::Add => a.checked_add(b),
                ArithOp::Sub => a.checked_sub(b),
                ArithOp::Mul => a.checked_mul(b),
                ArithOp::Div => unreachable!("division is handled as decimal"),
            };
            out.and_then(|out| u64::try_from(out).ok())
                .map(Value::Uint64)
                .ok_or_else(|| EvalError::ValueOutOfRange {
                    kind: "BIGINT UNSIGNED",
                    expr: expr(),
                })
        }
        NumClass::Int => {
            let (Value::Int64(a), Value::Int64(b)) = (left, right) else {
                unreachable!("Int class implies two signed operands");
            };
            let out = match op {
                ArithOp::Add => a.checked_add(*b),
                ArithOp::Sub => a.checked_sub(*b),
                ArithOp::Mul => a.checked_mul(*b),
                ArithOp::Div => unreachable!("division is handled as decimal"),
            };
            out.map(Value::Int64)
                .ok_or_else(|| EvalError::bigint_out_of_range(expr()))
        }
    }
}

fn as_decimal(v: &Value) -> BigDecimal {
    match v {
        Value::Decimal(d) => d.clone(),
        Value::Int64(i) => BigDecimal::from(*i),
        Value::Uint64(u) => BigDecimal::from(*u),
        _ => unreachable!("decimal class only mixes decimal and integer operands"),
    }
}

fn int_of(v: &Value) -> i128 {
    match v {
        Value::Int64(i) => *i as i128,
        Value::Uint64(u) => *u as i128,
        _ => unreachable!("unsigned class only mixes integer operands"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Value {
        Value::Decimal(BigDecimal::from_str(s).unwrap())
    }

    #[test]
    fn signed_overflow_keeps_mysql_error_shape() {
        let err = arithmetic(ArithOp::Add, &Value::Int64(i64::MAX), &Value::Int64(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "BIGINT value is out of range in '(9223372036854775807 + 1)'"
        );
    }

    #[test]
    fn unsigned_underflow_is_an_error() {
        let err = arithmetic(ArithOp::Sub, &Value::Uint64(0), &Value::Int64(1)).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("BIGINT UNSIGNED value is out of range in"));
    }

    #[test]
    fn integer_division_yields_decimal() {
        let out = arithmetic(ArithOp::Div, &Value::Int64(7), &Value::Int64(2)).unwrap();
        assert_eq!(out, dec("3.5000"));
    }

    #[test]
    fn division_by_zero_is_null() {
        assert_eq!(
            arithmetic(ArithOp::Div, &Value::Int64(1), &Value::Int64(0)).unwrap(),
            Value::Null
        );
        assert_eq!(
            arithmetic(ArithOp::Div, &Value::Float64(1.0), &Value::Float64(0.0)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn strings_compute_as_doubles() {
        assert_eq!(
            arithmetic(ArithOp::Add, &Value::text("foo"), &Value::Int64(1)).unwrap(),
            Value::Float64(1.0)
        );
    }

    #[test]
    fn null_propagates() {
        assert_eq!(
            arithmetic(ArithOp::Mul, &Value::Null, &Value::Int64(3)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn decimal_addition_is_exact() {
        let out = arithmetic(ArithOp::Add, &dec("0.1"), &dec("0.2")).unwrap();
        assert_eq!(out, dec("0.3"));
    }
}
