//! Operators, subscripts and slices.

use crate::restricted::ast::{BinOp, CmpOp, UnaryOp};
use crate::restricted::error::{ErrorKind, ScriptError, ScriptResult};
use crate::restricted::value::{
    check_len, collect, key_error, partial_compare, values_equal, RangeObj, Value,
};
use std::cmp::Ordering;
use std::rc::Rc;

fn unsupported(op: BinOp, a: &Value, b: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        a.type_name(),
        b.type_name()
    ))
}

fn is_number(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::Bool(_) | Value::Float(_))
}

pub fn binary_op(op: BinOp, a: &Value, b: &Value) -> ScriptResult<Value> {
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return int_op(op, x, y);
    }
    if is_number(a) && is_number(b) {
        if matches!(
            op,
            BinOp::LShift | BinOp::RShift | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor
        ) {
            return Err(unsupported(op, a, b));
        }
        let x = a.as_float().unwrap_or_default();
        let y = b.as_float().unwrap_or_default();
        return float_op(op, x, y);
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            let mut s = String::with_capacity(check_len(x.len().checked_add(y.len()))?);
            s.push_str(x);
            s.push_str(y);
            Ok(Value::str(&s))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            check_len(x.borrow().len().checked_add(y.borrow().len()))?;
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            check_len(x.len().checked_add(y.len()))?;
            let mut items = x.to_vec();
            items.extend(y.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinOp::Mul, seq, count) | (BinOp::Mul, count, seq)
            if count.as_int().is_some()
                && matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_)) =>
        {
            repeat(seq, count.as_int().unwrap_or_default())
        }
        (BinOp::BitOr, Value::Dict(x), Value::Dict(y)) => {
            let mut merged = x.borrow().clone();
            for (key, value) in y.borrow().items() {
                merged.insert(key, value)?;
            }
            Ok(Value::dict(merged))
        }
        (BinOp::Mod, Value::Str(_), _) => Err(ScriptError::type_error(
            "printf-style string formatting is not supported",
        )),
        _ => Err(unsupported(op, a, b)),
    }
}

fn repeat(seq: &Value, count: i64) -> ScriptResult<Value> {
    let count = usize::try_from(count).unwrap_or(0);
    let unit = match seq {
        Value::Str(s) => s.len(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        _ => 0,
    };
    check_len(unit.checked_mul(count))?;
    let count = if unit == 0 { 0 } else { count };
    Ok(match seq {
        Value::Str(s) => Value::str(&s.repeat(count)),
        Value::List(items) => Value::list(repeat_items(&items.borrow(), count)),
        Value::Tuple(items) => Value::tuple(repeat_items(items, count)),
        other => other.clone(),
    })
}

fn repeat_items(items: &[Value], count: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

fn int_op(op: BinOp, x: i64, y: i64) -> ScriptResult<Value> {
    let overflow = ScriptError::overflow;
    let value = match op {
        BinOp::Add => x.checked_add(y).ok_or_else(overflow)?,
        BinOp::Sub => x.checked_sub(y).ok_or_else(overflow)?,
        BinOp::Mul => x.checked_mul(y).ok_or_else(overflow)?,
        BinOp::Div => {
            if y == 0 {
                return Err(ScriptError::zero_division("division by zero"));
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(ScriptError::zero_division(
                    "integer division or modulo by zero",
                ));
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            if (x % y != 0) && ((x < 0) != (y < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(ScriptError::zero_division("integer modulo by zero"));
            }
            let r = x.checked_rem(y).unwrap_or(0);
            if r != 0 && ((r < 0) != (y < 0)) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(ScriptError::zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            let exp = u32::try_from(y).map_err(|_| overflow())?;
            x.checked_pow(exp).ok_or_else(overflow)?
        }
        BinOp::LShift => {
            if y < 0 {
                return Err(ScriptError::value_error("negative shift count"));
            }
            if x == 0 {
                0
            } else {
                let shifted = if y >= 64 { None } else { x.checked_shl(y as u32) };
                match shifted {
                    Some(v) if v >> y == x => v,
                    _ => return Err(overflow()),
                }
            }
        }
        BinOp::RShift => {
            if y < 0 {
                return Err(ScriptError::value_error("negative shift count"));
            }
            x >> y.min(63)
        }
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        BinOp::BitXor => x ^ y,
    };
    Ok(Value::Int(value))
}

fn float_op(op: BinOp, x: f64, y: f64) -> ScriptResult<Value> {
    let value = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(ScriptError::zero_division("float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(ScriptError::zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(ScriptError::zero_division("float modulo by zero"));
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(ScriptError::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if x < 0.0 && y.fract() != 0.0 {
                return Err(ScriptError::value_error(
                    "complex results are not supported",
                ));
            }
            let result = x.powf(y);
            if result.is_infinite() && x.is_finite() && y.is_finite() {
                return Err(ScriptError::new(
                    ErrorKind::OverflowError,
                    "(34, 'Numerical result out of range')",
                ));
            }
            result
        }
        BinOp::LShift | BinOp::RShift | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
            return Err(unsupported(op, &Value::Float(x), &Value::Float(y)))
        }
    };
    Ok(Value::Float(value))
}

pub fn unary_op(op: UnaryOp, v: &Value) -> ScriptResult<Value> {
    let bad = |symbol: &str| {
        ScriptError::type_error(format!(
            "bad operand type for unary {symbol}: '{}'",
            v.type_name()
        ))
    };
    match op {
        UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
        UnaryOp::Neg => match v {
            Value::Float(f) => Ok(Value::Float(-f)),
            other => match other.as_int() {
                Some(i) => i.checked_neg().map(Value::Int).ok_or_else(ScriptError::overflow),
                None => Err(bad("-")),
            },
        },
        UnaryOp::Pos => match v {
            Value::Float(f) => Ok(Value::Float(*f)),
            other => other.as_int().map(Value::Int).ok_or_else(|| bad("+")),
        },
        UnaryOp::Invert => match v {
            Value::Float(_) => Err(bad("~")),
            other => other.as_int().map(|i| Value::Int(!i)).ok_or_else(|| bad("~")),
        },
    }
}

pub fn compare(op: CmpOp, a: &Value, b: &Value) -> ScriptResult<bool> {
    Ok(match op {
        CmpOp::Eq => values_equal(a, b)?,
        CmpOp::NotEq => !values_equal(a, b)?,
        CmpOp::Is => a.is_same(b),
        CmpOp::IsNot => !a.is_same(b),
        CmpOp::In => contains(b, a)?,
        CmpOp::NotIn => !contains(b, a)?,
        CmpOp::Lt => partial_compare(a, b, "<")? == Some(Ordering::Less),
        CmpOp::Gt => partial_compare(a, b, ">")? == Some(Ordering::Greater),
        CmpOp::LtE => matches!(
            partial_compare(a, b, "<=")?,
            Some(Ordering::Less | Ordering::Equal)
        ),
        CmpOp::GtE => matches!(
            partial_compare(a, b, ">=")?,
            Some(Ordering::Greater | Ordering::Equal)
        ),
    })
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value) -> ScriptResult<bool> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => any_equal(&items.borrow().clone(), item),
        Value::Tuple(items) => any_equal(items, item),
        Value::Dict(dict) => dict.borrow().contains(item),
        Value::Range(r) => Ok(match item {
            Value::Float(f) => f.fract() == 0.0 && r.contains(*f as i64),
            other => other.as_int().is_some_and(|i| r.contains(i)),
        }),
        Value::Iter(_) => any_equal(&collect(container)?, item),
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn any_equal(items: &[Value], item: &Value) -> ScriptResult<bool> {
    for candidate in items {
        if candidate.is_same(item) || values_equal(candidate, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Resolve a possibly negative index against `len`.
fn normalize_index(index: i64, len: usize, what: &str) -> ScriptResult<usize> {
    let len = len as i64;
    let resolved = if index < 0 { index + len } else { index };
    if resolved < 0 || resolved >= len {
        return Err(ScriptError::index_error(format!("{what} index out of range")));
    }
    Ok(resolved as usize)
}

fn index_of(index: &Value, container: &Value) -> ScriptResult<i64> {
    index.as_int().ok_or_else(|| {
        ScriptError::type_error(format!(
            "{} indices must be integers or slices, not {}",
            container.type_name(),
            index.type_name()
        ))
    })
}

pub fn get_item(container: &Value, index: &Value) -> ScriptResult<Value> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let i = normalize_index(index_of(index, container)?, items.len(), "list")?;
            Ok(items[i].clone())
        }
        Value::Tuple(items) => {
            let i = normalize_index(index_of(index, container)?, items.len(), "tuple")?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let i = index_of(index, container)?;
            let count = s.chars().count();
            let i = normalize_index(i, count, "string")?;
            let c = s.chars().nth(i).unwrap_or_default();
            Ok(Value::str(c.encode_utf8(&mut [0u8; 4])))
        }
        Value::Range(r) => {
            let i = index_of(index, container)?;
            let len = usize::try_from(r.len()).unwrap_or(usize::MAX);
            let i = normalize_index(i, len, "range object")?;
            Ok(Value::Int(r.at(i as u64)))
        }
        Value::Dict(dict) => dict
            .borrow()
            .get(index)?
            .ok_or_else(|| key_error(index)),
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_item(container: &Value, index: &Value, value: Value) -> ScriptResult<()> {
    match container {
        Value::List(items) => {
            let i = index_of(index, container)?;
            let mut items = items.borrow_mut();
            let i = normalize_index(i, items.len(), "list assignment")?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(dict) => dict.borrow_mut().insert(index.clone(), value),
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub fn del_item(container: &Value, index: &Value) -> ScriptResult<()> {
    match container {
        Value::List(items) => {
            let i = index_of(index, container)?;
            let mut items = items.borrow_mut();
            let i = normalize_index(i, items.len(), "list assignment")?;
            items.remove(i);
            Ok(())
        }
        Value::Dict(dict) => match dict.borrow_mut().remove(index)? {
            Some(_) => Ok(()),
            None => Err(key_error(index)),
        },
        other => Err(ScriptError::type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

/// Slice bounds as written; `None` means omitted.
#[derive(Clone, Copy, Debug)]
pub struct SliceArgs {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl SliceArgs {
    pub fn from_values(
        start: Option<Value>,
        stop: Option<Value>,
        step: Option<Value>,
    ) -> ScriptResult<Self> {
        let bound = |v: Option<Value>| -> ScriptResult<Option<i64>> {
            match v {
                None | Some(Value::None) => Ok(None),
                Some(other) => other.as_int().map(Some).ok_or_else(|| {
                    ScriptError::type_error(
                        "slice indices must be integers or None or have an __index__ method",
                    )
                }),
            }
        };
        Ok(Self {
            start: bound(start)?,
            stop: bound(stop)?,
            step: bound(step)?,
        })
    }

    /// First position, stride and element count over a sequence of `len`.
    pub fn adjust(&self, len: i64) -> ScriptResult<(i64, i64, u64)> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(ScriptError::value_error("slice step cannot be zero"));
        }
        let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
        let clamp = |v: Option<i64>, default: i64| match v {
            None => default,
            Some(v) if v < 0 => v.saturating_add(len).max(lower),
            Some(v) => v.min(upper),
        };
        let (start, stop) = if step > 0 {
            (clamp(self.start, 0), clamp(self.stop, len))
        } else {
            (clamp(self.start, len - 1), clamp(self.stop, -1))
        };
        let (start128, stop128, step128) = (i128::from(start), i128::from(stop), i128::from(step));
        let count = if step > 0 && start < stop {
            (stop128 - start128 - 1) / step128 + 1
        } else if step < 0 && stop < start {
            (start128 - stop128 - 1) / (-step128) + 1
        } else {
            0
        };
        Ok((start, step, count as u64))
    }

    /// Positions selected from a sequence of `len` elements.
    pub fn indices(&self, len: usize) -> ScriptResult<Vec<usize>> {
        let (start, step, count) = self.adjust(len as i64)?;
        Ok((0..count as i64)
            .map(|k| (start + k * step) as usize)
            .collect())
    }

    /// Contiguous `[start, stop)` window, for step-one slice assignment.
    fn window(&self, len: usize) -> (usize, usize) {
        let len_i = len as i64;
        let resolve = |v: Option<i64>, default: i64| match v {
            None => default,
            Some(v) if v < 0 => v.saturating_add(len_i).max(0),
            Some(v) => v.min(len_i),
        };
        let start = resolve(self.start, 0) as usize;
        let stop = (resolve(self.stop, len_i) as usize).max(start);
        (start, stop)
    }
}

pub fn get_slice(container: &Value, slice: &SliceArgs) -> ScriptResult<Value> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice.indices(items.len())?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => {
            let picked = slice.indices(items.len())?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice.indices(chars.len())?;
            let text: String = picked.into_iter().map(|i| chars[i]).collect();
            Ok(Value::Str(Rc::from(text)))
        }
        Value::Range(r) => {
            let len = i64::try_from(r.len()).unwrap_or(i64::MAX);
            let (first, step, count) = slice.adjust(len)?;
            let step = r.step.saturating_mul(step);
            let start = if count == 0 { r.start } else { r.at(first as u64) };
            let stop = start.saturating_add((count as i64).saturating_mul(step));
            Ok(Value::Range(RangeObj::new(start, stop, step)?))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_slice(container: &Value, slice: &SliceArgs, value: &Value) -> ScriptResult<()> {
    let Value::List(items) = container else {
        return Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            container.type_name()
        )));
    };
    let replacement = collect(value).map_err(|_| {
        ScriptError::type_error("can only assign an iterable")
    })?;
    let mut items = items.borrow_mut();
    if slice.step.unwrap_or(1) == 1 {
        let (start, stop) = slice.window(items.len());
        items.splice(start..stop, replacement);
        return Ok(());
    }
    let picked = slice.indices(items.len())?;
    if picked.len() != replacement.len() {
        return Err(ScriptError::value_error(format!(
            "attempt to assign sequence of size {} to extended slice of size {}",
            replacement.len(),
            picked.len()
        )));
    }
    for (i, v) in picked.into_iter().zip(replacement) {
        items[i] = v;
    }
    Ok(())
}

pub fn del_slice(container: &Value, slice: &SliceArgs) -> ScriptResult<()> {
    let Value::List(items) = container else {
        return Err(ScriptError::type_error(format!(
            "'{}' object doesn't support item deletion",
            container.type_name()
        )));
    };
    let mut items = items.borrow_mut();
    let mut picked = slice.indices(items.len())?;
    picked.sort_unstable();
    for i in picked.into_iter().rev() {
        items.remove(i);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Value {
        Value::Int(v)
    }

    #[test]
    fn floor_semantics_for_negative_operands() {
        assert_eq!(binary_op(BinOp::FloorDiv, &int(-7), &int(2)).unwrap().repr().unwrap(), "-4");
        assert_eq!(binary_op(BinOp::Mod, &int(-7), &int(2)).unwrap().repr().unwrap(), "1");
        assert_eq!(binary_op(BinOp::Mod, &int(7), &int(-2)).unwrap().repr().unwrap(), "-1");
        assert_eq!(
            binary_op(BinOp::Mod, &Value::Float(-7.5), &int(2)).unwrap().repr().unwrap(),
            "0.5"
        );
    }

    #[test]
    fn true_division_yields_float() {
        assert_eq!(binary_op(BinOp::Div, &int(7), &int(2)).unwrap().repr().unwrap(), "3.5");
        assert_eq!(binary_op(BinOp::Div, &int(4), &int(2)).unwrap().repr().unwrap(), "2.0");
        let err = binary_op(BinOp::Div, &int(1), &int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivisionError);
        assert_eq!(err.message, "division by zero");
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let err = binary_op(BinOp::Pow, &int(10), &int(30)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OverflowError);
        let err = binary_op(BinOp::Mul, &int(i64::MAX), &int(2)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OverflowError);
        assert_eq!(binary_op(BinOp::Pow, &int(2), &int(-1)).unwrap().repr().unwrap(), "0.5");
    }

    #[test]
    fn sequence_concatenation_and_repetition() {
        let a = Value::list(vec![int(1)]);
        let b = Value::list(vec![int(2)]);
        assert_eq!(binary_op(BinOp::Add, &a, &b).unwrap().repr().unwrap(), "[1, 2]");
        assert_eq!(binary_op(BinOp::Mul, &Value::str("ab"), &int(3)).unwrap().repr().unwrap(), "'ababab'");
        assert_eq!(binary_op(BinOp::Mul, &int(2), &a).unwrap().repr().unwrap(), "[1, 1]");
        let huge = binary_op(BinOp::Mul, &a, &int(1 << 40)).unwrap_err();
        assert_eq!(huge.kind, ErrorKind::MemoryError);
    }

    #[test]
    fn mixed_type_addition_is_a_type_error() {
        let err = binary_op(BinOp::Add, &int(1), &Value::str("a")).unwrap_err();
        assert_eq!(err.message, "unsupported operand type(s) for +: 'int' and 'str'");
    }

    #[test]
    fn slices_follow_sequence_rules() {
        let list = Value::list((0..6).map(int).collect());
        let all = |start, stop, step| SliceArgs { start, stop, step };
        assert_eq!(get_slice(&list, &all(Some(1), Some(4), None)).unwrap().repr().unwrap(), "[1, 2, 3]");
        assert_eq!(get_slice(&list, &all(None, None, Some(-1))).unwrap().repr().unwrap(), "[5, 4, 3, 2, 1, 0]");
        assert_eq!(get_slice(&list, &all(Some(-2), None, None)).unwrap().repr().unwrap(), "[4, 5]");
        assert_eq!(get_slice(&list, &all(None, None, Some(2))).unwrap().repr().unwrap(), "[0, 2, 4]");
        assert_eq!(get_slice(&Value::str("hello"), &all(None, None, Some(-1))).unwrap().repr().unwrap(), "'olleh'");
        assert!(get_slice(&list, &all(None, None, Some(0))).is_err());
    }

    #[test]
    fn slice_assignment_and_deletion() {
        let list = Value::list((0..5).map(int).collect());
        let window = SliceArgs { start: Some(1), stop: Some(3), step: None };
        set_slice(&list, &window, &Value::list(vec![int(9)])).unwrap();
        assert_eq!(list.repr().unwrap(), "[0, 9, 3, 4]");
        let evens = SliceArgs { start: None, stop: None, step: Some(2) };
        del_slice(&list, &evens).unwrap();
        assert_eq!(list.repr().unwrap(), "[9, 4]");
    }

    #[test]
    fn indexing_errors() {
        let list = Value::list(vec![int(1)]);
        assert_eq!(get_item(&list, &int(-1)).unwrap().repr().unwrap(), "1");
        assert_eq!(get_item(&list, &int(1)).unwrap_err().message, "list index out of range");
        let err = get_item(&Value::dict(Default::default()), &Value::str("k")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyError);
        assert_eq!(err.message, "'k'");
        assert!(get_item(&int(1), &int(0)).is_err());
    }

    #[test]
    fn comparisons_and_membership() {
        assert!(compare(CmpOp::Lt, &int(1), &Value::Float(1.5)).unwrap());
        assert!(compare(CmpOp::In, &Value::str("ell"), &Value::str("hello")).unwrap());
        assert!(compare(CmpOp::NotIn, &int(3), &Value::list(vec![int(1)])).unwrap());
        let r = Value::Range(RangeObj::new(0, 10, 2).unwrap());
        assert!(compare(CmpOp::In, &int(4), &r).unwrap());
        assert!(compare(CmpOp::Lt, &Value::list(vec![int(1), int(2)]), &Value::list(vec![int(1), int(3)])).unwrap());
        assert!(!compare(CmpOp::Lt, &Value::Float(f64::NAN), &int(1)).unwrap());
    }
}
