//! The closed whitelist of callable primitives.
//!
//! Only the names in [`WHITELIST`] resolve as globals inside a snippet.
//! Anything else (`open`, `__import__`, `eval`, `getattr`, ...) is simply
//! absent from the namespace and fails with `NameError`.

use crate::restricted::ast::{BinOp, Ident};
use crate::restricted::error::{ErrorKind, ScriptError, ScriptResult};
use crate::restricted::ops::binary_op;
use crate::restricted::value::{
    collect, iterate, partial_compare, str_repr, Dict, Host, IterObj, IterState, RangeObj,
    Value,
};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Range,
    Len,
    Int,
    Str,
    List,
    Tuple,
    Dict,
    Enumerate,
    Sum,
    Min,
    Max,
    Abs,
}

/// Every name a snippet can resolve besides its own bindings.
pub const WHITELIST: &[(&str, Builtin)] = &[
    ("print", Builtin::Print),
    ("range", Builtin::Range),
    ("len", Builtin::Len),
    ("int", Builtin::Int),
    ("str", Builtin::Str),
    ("list", Builtin::List),
    ("tuple", Builtin::Tuple),
    ("dict", Builtin::Dict),
    ("enumerate", Builtin::Enumerate),
    ("sum", Builtin::Sum),
    ("min", Builtin::Min),
    ("max", Builtin::Max),
    ("abs", Builtin::Abs),
];

pub fn lookup(name: &str) -> Option<Builtin> {
    WHITELIST
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, builtin)| *builtin)
}

impl Builtin {
    pub fn name(self) -> &'static str {
        WHITELIST
            .iter()
            .find(|(_, builtin)| *builtin == self)
            .map(|(name, _)| *name)
            .unwrap_or("<builtin>")
    }
}

pub(crate) type Kwargs = Vec<(Ident, Value)>;

pub fn call(
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Kwargs,
    host: &mut dyn Host,
) -> ScriptResult<Value> {
    match builtin {
        Builtin::Print => print(args, kwargs, host),
        Builtin::Range => range(args, &kwargs),
        Builtin::Len => len(args, &kwargs),
        Builtin::Int => int(args, kwargs),
        Builtin::Str => {
            no_kwargs("str", &kwargs)?;
            arity("str", &args, 0, 1)?;
            Ok(match args.first() {
                Some(Value::Str(s)) => Value::Str(s.clone()),
                Some(other) => Value::str(&other.to_str()?),
                None => Value::str(""),
            })
        }
        Builtin::List => {
            no_kwargs("list", &kwargs)?;
            arity("list", &args, 0, 1)?;
            match args.first() {
                Some(iterable) => Ok(Value::list(collect(iterable)?)),
                None => Ok(Value::list(Vec::new())),
            }
        }
        Builtin::Tuple => {
            no_kwargs("tuple", &kwargs)?;
            arity("tuple", &args, 0, 1)?;
            match args.first() {
                Some(Value::Tuple(items)) => Ok(Value::Tuple(items.clone())),
                Some(iterable) => Ok(Value::tuple(collect(iterable)?)),
                None => Ok(Value::tuple(Vec::new())),
            }
        }
        Builtin::Dict => dict(args, kwargs),
        Builtin::Enumerate => enumerate(args, kwargs),
        Builtin::Sum => sum(args, kwargs),
        Builtin::Min => extremum("min", Ordering::Less, args, kwargs, host),
        Builtin::Max => extremum("max", Ordering::Greater, args, kwargs, host),
        Builtin::Abs => {
            no_kwargs("abs", &kwargs)?;
            arity("abs", &args, 1, 1)?;
            match &args[0] {
                Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(ScriptError::overflow),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(ScriptError::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ))),
            }
        }
    }
}

pub(crate) fn no_kwargs(name: &str, kwargs: &Kwargs) -> ScriptResult<()> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(ScriptError::type_error(format!(
            "{name}() takes no keyword arguments"
        )))
    }
}

pub(crate) fn arity(name: &str, args: &[Value], min: usize, max: usize) -> ScriptResult<()> {
    let n = args.len();
    if n >= min && n <= max {
        return Ok(());
    }
    let message = if min == max {
        let plural = if min == 1 { "one argument" } else { "arguments" };
        format!("{name}() takes exactly {plural} ({n} given)")
    } else if n < min {
        format!("{name} expected at least {min} argument, got {n}")
    } else {
        format!("{name} expected at most {max} arguments, got {n}")
    };
    Err(ScriptError::type_error(message))
}

fn print(args: Vec<Value>, kwargs: Kwargs, host: &mut dyn Host) -> ScriptResult<Value> {
    let mut sep = " ".to_string();
    let mut end = "\n".to_string();
    for (key, value) in kwargs {
        let slot = match &*key {
            "sep" => &mut sep,
            "end" => &mut end,
            "flush" => continue,
            other => {
                return Err(ScriptError::type_error(format!(
                    "'{other}' is an invalid keyword argument for print()"
                )))
            }
        };
        match value {
            Value::None => {}
            Value::Str(s) => *slot = s.to_string(),
            other => {
                return Err(ScriptError::type_error(format!(
                    "{key} must be None or a string, not {}",
                    other.type_name()
                )))
            }
        }
    }
    let mut text = args
        .iter()
        .map(Value::to_str)
        .collect::<ScriptResult<Vec<_>>>()?
        .join(&sep);
    text.push_str(&end);
    host.write(&text)?;
    Ok(Value::None)
}

fn range(args: Vec<Value>, kwargs: &Kwargs) -> ScriptResult<Value> {
    no_kwargs("range", kwargs)?;
    arity("range", &args, 1, 3)?;
    let ints = args
        .iter()
        .map(Value::expect_int)
        .collect::<ScriptResult<Vec<_>>>()?;
    let range = match ints.as_slice() {
        [stop] => RangeObj::new(0, *stop, 1)?,
        [start, stop] => RangeObj::new(*start, *stop, 1)?,
        [start, stop, step] => RangeObj::new(*start, *stop, *step)?,
        _ => return Err(ScriptError::type_error("range expected at most 3 arguments")),
    };
    Ok(Value::Range(range))
}

fn len(args: Vec<Value>, kwargs: &Kwargs) -> ScriptResult<Value> {
    no_kwargs("len", kwargs)?;
    arity("len", &args, 1, 1)?;
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(dict) => dict.borrow().len(),
        Value::Range(r) => {
            return i64::try_from(r.len())
                .map(Value::Int)
                .map_err(|_| ScriptError::new(ErrorKind::OverflowError, "range too large"))
        }
        other => {
            return Err(ScriptError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(n as i64))
}

fn int(args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    let mut args = args;
    for (key, value) in kwargs {
        if &*key != "base" || args.len() > 1 {
            return Err(ScriptError::type_error(format!(
                "'{key}' is an invalid keyword argument for int()"
            )));
        }
        if args.is_empty() {
            return Err(ScriptError::type_error("int() missing string argument"));
        }
        args.push(value);
    }
    arity("int", &args, 0, 2)?;

    if args.len() == 2 {
        let base = args[1].expect_int()?;
        return match &args[0] {
            Value::Str(s) => parse_int(s, base).map(Value::Int),
            _ => Err(ScriptError::type_error(
                "int() can't convert non-string with explicit base",
            )),
        };
    }
    match args.first() {
        None => Ok(Value::Int(0)),
        Some(Value::Int(i)) => Ok(Value::Int(*i)),
        Some(Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
        Some(Value::Float(f)) => float_to_int(*f).map(Value::Int),
        Some(Value::Str(s)) => parse_int(s, 10).map(Value::Int),
        Some(other) => Err(ScriptError::type_error(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

fn float_to_int(f: f64) -> ScriptResult<i64> {
    if f.is_nan() {
        return Err(ScriptError::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(ScriptError::new(
            ErrorKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    let truncated = f.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(ScriptError::overflow());
    }
    Ok(truncated as i64)
}

/// `int(text, base)` parsing: surrounding whitespace, a sign, an optional
/// radix prefix and single underscores between digits are accepted.
fn parse_int(text: &str, base: i64) -> ScriptResult<i64> {
    if base != 0 && !(2..=36).contains(&base) {
        return Err(ScriptError::value_error(
            "int() base must be >= 2 and <= 36, or 0",
        ));
    }
    let invalid = || {
        ScriptError::value_error(format!(
            "invalid literal for int() with base {base}: {}",
            str_repr(text)
        ))
    };

    let trimmed = text.trim();
    let (negative, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = body.to_ascii_lowercase();
    let prefixed = |p: &str| lower.starts_with(p);
    let (radix, digits, prefixed_literal) = match base {
        0 if prefixed("0x") => (16, &body[2..], true),
        0 if prefixed("0o") => (8, &body[2..], true),
        0 if prefixed("0b") => (2, &body[2..], true),
        0 => (10, body, false),
        16 if prefixed("0x") => (16, &body[2..], true),
        8 if prefixed("0o") => (8, &body[2..], true),
        2 if prefixed("0b") => (2, &body[2..], true),
        b => (b as u32, body, false),
    };
    let leading_zeros = base == 0 && radix == 10 && digits.len() > 1 && digits.starts_with('0');
    if leading_zeros && digits.chars().any(|c| c != '0' && c != '_') {
        return Err(invalid());
    }

    let digits = if prefixed_literal {
        digits.strip_prefix('_').unwrap_or(digits)
    } else {
        digits
    };
    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
        || !digits.chars().all(|c| c == '_' || c.is_digit(radix))
    {
        return Err(invalid());
    }
    let clean: String = digits.chars().filter(|c| *c != '_').collect();
    let signed = if negative { format!("-{clean}") } else { clean };
    i64::from_str_radix(&signed, radix).map_err(|_| ScriptError::overflow())
}

fn dict(args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    arity("dict", &args, 0, 1)?;
    let mut dict = Dict::new();
    if let Some(source) = args.first() {
        update_dict(&mut dict, source)?;
    }
    for (key, value) in kwargs {
        dict.insert(Value::Str(key.clone()), value)?;
    }
    Ok(Value::dict(dict))
}

/// Merge a mapping or an iterable of pairs into `dict`.
pub fn update_dict(dict: &mut Dict, source: &Value) -> ScriptResult<()> {
    if let Value::Dict(other) = source {
        let items = other.borrow().items();
        for (key, value) in items {
            dict.insert(key, value)?;
        }
        return Ok(());
    }
    for (position, item) in collect(source)?.into_iter().enumerate() {
        let pair = collect(&item).map_err(|_| {
            ScriptError::type_error(format!(
                "cannot convert dictionary update sequence element #{position} to a sequence"
            ))
        })?;
        let [key, value]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
            ScriptError::value_error(format!(
                "dictionary update sequence element #{position} has length {}; 2 is required",
                pair.len()
            ))
        })?;
        dict.insert(key, value)?;
    }
    Ok(())
}

fn enumerate(args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    let mut args = args;
    for (key, value) in kwargs {
        match &*key {
            "start" if args.len() == 1 => args.push(value),
            "iterable" if args.is_empty() => args.push(value),
            _ => {
                return Err(ScriptError::type_error(format!(
                    "'{key}' is an invalid keyword argument for enumerate()"
                )))
            }
        }
    }
    arity("enumerate", &args, 1, 2)?;
    let count = match args.get(1) {
        Some(start) => start.expect_int()?,
        None => 0,
    };
    let state = IterState::Enumerate {
        inner: Box::new(iterate(&args[0])?),
        count,
    };
    Ok(Value::Iter(Rc::new(RefCell::new(IterObj::new(
        "enumerate",
        state,
    )))))
}

fn sum(args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    let mut args = args;
    for (key, value) in kwargs {
        if &*key == "start" && args.len() == 1 {
            args.push(value);
        } else {
            return Err(ScriptError::type_error(format!(
                "'{key}' is an invalid keyword argument for sum()"
            )));
        }
    }
    arity("sum", &args, 1, 2)?;
    let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(ScriptError::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    let mut items = iterate(&args[0])?;
    while let Some(item) = items.next_value()? {
        total = binary_op(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn extremum(
    name: &str,
    wanted: Ordering,
    args: Vec<Value>,
    kwargs: Kwargs,
    host: &mut dyn Host,
) -> ScriptResult<Value> {
    let mut key_fn = None;
    let mut default = None;
    for (key, value) in kwargs {
        match &*key {
            "key" => key_fn = Some(value).filter(|v| !matches!(v, Value::None)),
            "default" => default = Some(value),
            other => {
                return Err(ScriptError::type_error(format!(
                    "'{other}' is an invalid keyword argument for {name}()"
                )))
            }
        }
    }

    let candidates = match args.len() {
        0 => {
            return Err(ScriptError::type_error(format!(
                "{name} expected at least 1 argument, got 0"
            )))
        }
        1 => collect(&args[0])?,
        _ => {
            if default.is_some() {
                return Err(ScriptError::type_error(format!(
                    "Cannot specify a default for {name}() with multiple positional arguments"
                )));
            }
            args
        }
    };

    let op = if wanted == Ordering::Less { "<" } else { ">" };
    let mut best: Option<(Value, Value)> = None;
    for item in candidates {
        let key = match &key_fn {
            Some(f) => host.call(f, vec![item.clone()])?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) => partial_compare(&key, best_key, op)? == Some(wanted),
        };
        if replace {
            best = Some((key, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ScriptError::value_error(format!(
            "{name}() arg is an empty sequence"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        out: String,
    }

    impl Host for Recorder {
        fn call(&mut self, func: &Value, args: Vec<Value>) -> ScriptResult<Value> {
            match func {
                Value::Builtin(b) => call(*b, args, Vec::new(), self),
                other => Err(ScriptError::type_error(format!(
                    "'{}' object is not callable",
                    other.type_name()
                ))),
            }
        }

        fn write(&mut self, text: &str) -> ScriptResult<()> {
            self.out.push_str(text);
            Ok(())
        }
    }

    fn run(builtin: Builtin, args: Vec<Value>) -> ScriptResult<Value> {
        call(builtin, args, Vec::new(), &mut Recorder::default())
    }

    #[test]
    fn whitelist_is_closed() {
        let names: Vec<&str> = WHITELIST.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                "print", "range", "len", "int", "str", "list", "tuple", "dict", "enumerate",
                "sum", "min", "max", "abs"
            ]
        );
        for forbidden in ["open", "eval", "exec", "__import__", "getattr", "globals", "type"] {
            assert!(lookup(forbidden).is_none(), "{forbidden} must not resolve");
        }
    }

    #[test]
    fn print_honours_sep_and_end() {
        let mut host = Recorder::default();
        call(
            Builtin::Print,
            vec![Value::Int(1), Value::str("a")],
            vec![(Rc::from("sep"), Value::str("-")), (Rc::from("end"), Value::str("!"))],
            &mut host,
        )
        .unwrap();
        assert_eq!(host.out, "1-a!");
    }

    #[test]
    fn int_parsing() {
        assert_eq!(parse_int(" 42 ", 10).unwrap(), 42);
        assert_eq!(parse_int("-1_000", 10).unwrap(), -1000);
        assert_eq!(parse_int("ff", 16).unwrap(), 255);
        assert_eq!(parse_int("0x1F", 0).unwrap(), 31);
        let err = parse_int("abc", 10).unwrap_err();
        assert_eq!(err.message, "invalid literal for int() with base 10: 'abc'");
        assert!(parse_int("1__0", 10).is_err());
        assert_eq!(
            run(Builtin::Int, vec![Value::Float(-2.9)]).unwrap().repr().unwrap(),
            "-2"
        );
    }

    #[test]
    fn len_rejects_scalars() {
        let err = run(Builtin::Len, vec![Value::Int(3)]).unwrap_err();
        assert_eq!(err.message, "object of type 'int' has no len()");
        assert_eq!(
            run(Builtin::Len, vec![Value::str("héllo")]).unwrap().repr().unwrap(),
            "5"
        );
    }

    #[test]
    fn extremum_with_key_and_default() {
        let mut host = Recorder::default();
        let words = Value::list(vec![Value::str("ccc"), Value::str("a"), Value::str("bb")]);
        let shortest = call(
            Builtin::Min,
            vec![words],
            vec![(Rc::from("key"), Value::Builtin(Builtin::Len))],
            &mut host,
        )
        .unwrap();
        assert_eq!(shortest.to_str().unwrap(), "a");

        let empty = run(Builtin::Max, vec![Value::list(vec![])]).unwrap_err();
        assert_eq!(empty.message, "max() arg is an empty sequence");
        assert_eq!(
            run(Builtin::Max, vec![Value::Int(3), Value::Int(9), Value::Int(1)])
                .unwrap()
                .repr().unwrap(),
            "9"
        );
    }

    #[test]
    fn sum_of_range_and_floats() {
        let r = Value::Range(RangeObj::new(1, 11, 1).unwrap());
        assert_eq!(run(Builtin::Sum, vec![r]).unwrap().repr().unwrap(), "55");
        let floats = Value::list(vec![Value::Float(0.5), Value::Int(1)]);
        assert_eq!(run(Builtin::Sum, vec![floats]).unwrap().repr().unwrap(), "1.5");
    }

    #[test]
    fn dict_from_pairs() {
        let pairs = Value::list(vec![
            Value::tuple(vec![Value::str("a"), Value::Int(1)]),
            Value::list(vec![Value::str("b"), Value::Int(2)]),
        ]);
        assert_eq!(
            run(Builtin::Dict, vec![pairs]).unwrap().repr().unwrap(),
            "{'a': 1, 'b': 2}"
        );
        let bad = Value::list(vec![Value::tuple(vec![Value::Int(1)])]);
        assert!(run(Builtin::Dict, vec![bad]).is_err());
    }

    #[test]
    fn abs_overflow_is_reported() {
        let err = run(Builtin::Abs, vec![Value::Int(i64::MIN)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OverflowError);
    }
}
