use std::cmp::Ordering;

use bigdecimal::BigDecimal;

use crate::error::EvalError;
use crate::value::Value;

/// Three-valued ordered comparison. `Ok(None)` means the SQL result is NULL.
///
/// Tuples compare lexicographically and must have equal arity; a NULL
/// element ends the comparison with NULL unless an earlier element already
/// decided the ordering.
pub fn compare(l: &Value, r: &Value) -> Result<Option<Ordering>, EvalError> {
    match (l, r) {
        (Value::Tuple(a), Value::Tuple(b)) => {
            if a.len() != b.len() {
                return Err(EvalError::OperandShouldContainColumns(a.len()));
            }
            for (x, y) in a.iter().zip(b) {
                match compare(x, y)? {
                    None => return Ok(None),
                    Some(Ordering::Equal) => continue,
                    Some(other) => return Ok(Some(other)),
                }
            }
            Ok(Some(Ordering::Equal))
        }
        (Value::Tuple(a), _) => Err(EvalError::OperandShouldContainColumns(a.len())),
        (_, Value::Tuple(_)) => Err(EvalError::OperandShouldContainColumns(1)),
        _ if l.is_null() || r.is_null() => Ok(None),
        _ => cmp_scalars(l, r).map(Some),
    }
}

/// Scalar comparison under the MySQL type-conversion rules. Callers have
/// already excluded NULL and tuples.
fn cmp_scalars(l: &Value, r: &Value) -> Result<Ordering, EvalError> {
    match (l, r) {
        (Value::Text(cl, a), Value::Text(cr, b)) => Ok(cl.merge(*cr).str_cmp(a, b)),
        (Value::Binary(a), Value::Binary(b)) => Ok(a.cmp(b)),
        (Value::Binary(a), Value::Text(_, b)) => Ok(a.as_slice().cmp(b.as_bytes())),
        (Value::Text(_, a), Value::Binary(b)) => Ok(a.as_bytes().cmp(b.as_slice())),
        (Value::Date(a), Value::Date(b)) => Ok(a.cmp(b)),
        (Value::Time(a), Value::Time(b)) => Ok(a.cmp(b)),

        (Value::Int64(a), Value::Int64(b)) => Ok(a.cmp(b)),
        (Value::Uint64(a), Value::Uint64(b)) => Ok(a.cmp(b)),
        (Value::Int64(a), Value::Uint64(b)) => Ok(cmp_int_uint(*a, *b)),
        (Value::Uint64(a), Value::Int64(b)) => Ok(cmp_int_uint(*b, *a).reverse()),

        // Decimal against decimal or integer compares at the wider scale.
        // Decimal against float falls through to the double path below.
        (Value::Decimal(a), Value::Decimal(b)) => Ok(a.cmp(b)),
        (Value::Decimal(a), Value::Int64(b)) => Ok(a.cmp(&BigDecimal::from(*b))),
        (Value::Decimal(a), Value::Uint64(b)) => Ok(a.cmp(&BigDecimal::from(*b))),
        (Value::Int64(a), Value::Decimal(b)) => Ok(BigDecimal::from(*a).cmp(b)),
        (Value::Uint64(a), Value::Decimal(b)) => Ok(BigDecimal::from(*a).cmp(b)),

        // "In all other cases, the arguments are compared as floating-point
        // (real) numbers." -- MySQL type-conversion rules.
        _ => Ok(l.as_f64().total_cmp(&r.as_f64())),
    }
}

fn cmp_int_uint(i: i64, u: u64) -> Ordering {
    if i < 0 {
        Ordering::Less
    } else {
        (i as u64).cmp(&u)
    }
}

/// The `<=>` primitive, also the row-equality oracle for the diff engine.
/// Never yields NULL: two NULLs are equal, a NULL and a non-NULL are not.
pub fn null_safe_equal(l: &Value, r: &Value) -> Result<bool, EvalError> {
    match (l, r) {
        (Value::Null, Value::Null) => Ok(true),
        (Value::Null, _) | (_, Value::Null) => Ok(false),
        (Value::Tuple(a), Value::Tuple(b)) => {
            if a.len() != b.len() {
                return Err(EvalError::OperandShouldContainColumns(a.len()));
            }
            for (x, y) in a.iter().zip(b) {
                if !null_safe_equal(x, y)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Tuple(a), _) => Err(EvalError::OperandShouldContainColumns(a.len())),
        (_, Value::Tuple(_)) => Err(EvalError::OperandShouldContainColumns(1)),
        _ => Ok(cmp_scalars(l, r)? == Ordering::Equal),
    }
}

/// Total order on primary-key tuples, used to align row streams. Key columns
/// are scalars; a NULL key column sorts before everything else.
pub fn row_key_cmp(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => cmp_scalars(x, y).unwrap_or(Ordering::Equal),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Collation;
    use std::str::FromStr;

    fn dec(s: &str) -> Value {
        Value::Decimal(BigDecimal::from_str(s).unwrap())
    }

    #[test]
    fn integers_compare_without_widening() {
        assert_eq!(
            compare(&Value::Int64(-1), &Value::Uint64(u64::MAX)).unwrap(),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare(&Value::Uint64(u64::MAX), &Value::Int64(-1)).unwrap(),
            Some(Ordering::Greater)
        );
        // The same pair widened through f64 would collide; the integer path
        // must keep full precision.
        assert_eq!(
            compare(&Value::Uint64(u64::MAX), &Value::Uint64(u64::MAX - 1)).unwrap(),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn decimal_compares_at_wider_scale() {
        assert_eq!(compare(&dec("1.10"), &dec("1.1")).unwrap(), Some(Ordering::Equal));
        assert_eq!(compare(&dec("1.10"), &Value::Int64(1)).unwrap(), Some(Ordering::Greater));
        assert_eq!(compare(&Value::Int64(2), &dec("1.99")).unwrap(), Some(Ordering::Greater));
        // Decimal vs float is explicitly a double comparison.
        assert_eq!(
            compare(&dec("1.5"), &Value::Float64(1.5)).unwrap(),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn string_against_number_compares_as_double() {
        assert_eq!(
            compare(&Value::text("1"), &Value::Int64(1)).unwrap(),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare(&Value::text("sad"), &Value::Int64(0)).unwrap(),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare(&Value::text("2.5x"), &Value::Float64(2.5)).unwrap(),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn null_propagates_unless_decided_earlier() {
        assert_eq!(compare(&Value::Null, &Value::Int64(1)).unwrap(), None);
        let l = Value::Tuple(vec![Value::Int64(1), Value::Null]);
        let r = Value::Tuple(vec![Value::Int64(1), Value::Int64(2)]);
        assert_eq!(compare(&l, &r).unwrap(), None);
        let l = Value::Tuple(vec![Value::Int64(0), Value::Null]);
        assert_eq!(compare(&l, &r).unwrap(), Some(Ordering::Less));
    }

    #[test]
    fn tuple_arity_mismatch_keeps_mysql_error_shape() {
        let l = Value::Tuple(vec![Value::Int64(1), Value::Int64(2)]);
        let err = compare(&l, &Value::Int64(1)).unwrap_err();
        assert_eq!(err.to_string(), "Operand should contain 2 column(s)");
        let err = compare(&Value::Int64(1), &l).unwrap_err();
        assert_eq!(err.to_string(), "Operand should contain 1 column(s)");
    }

    #[test]
    fn null_safe_equal_never_yields_null() {
        assert!(null_safe_equal(&Value::Null, &Value::Null).unwrap());
        assert!(!null_safe_equal(&Value::Null, &Value::Int64(0)).unwrap());
        assert!(!null_safe_equal(&Value::text(""), &Value::Null).unwrap());
        assert!(null_safe_equal(&Value::text("foo"), &Value::text("FOO")).unwrap());
    }

    #[test]
    fn empty_string_and_null_stay_distinct() {
        // An empty enum value decodes as '' with binary collation; it must
        // not collapse into NULL or into the CI empty string semantics.
        let empty = Value::Text(Collation::Binary, String::new());
        assert!(!null_safe_equal(&empty, &Value::Null).unwrap());
        assert!(null_safe_equal(&empty, &Value::Text(Collation::Binary, String::new())).unwrap());
    }

    #[test]
    fn key_ordering_is_total_and_antisymmetric() {
        let rows = [
            vec![Value::Null],
            vec![Value::Int64(-5)],
            vec![Value::Int64(3)],
            vec![Value::Uint64(9)],
        ];
        for (i, a) in rows.iter().enumerate() {
            for (j, b) in rows.iter().enumerate() {
                let fwd = row_key_cmp(a, b);
                let back = row_key_cmp(b, a);
                assert_eq!(fwd.reverse(), back);
                if i == j {
                    assert_eq!(fwd, Ordering::Equal);
                }
            }
        }
    }
}
