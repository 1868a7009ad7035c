//! Methods reachable through attribute access on container values.
//!
//! The table is closed: underscore-prefixed names never resolve, so there is
//! no route from a value back to its type or to interpreter internals.

use crate::restricted::builtins::{arity, no_kwargs, update_dict, Kwargs};
use crate::restricted::error::{ErrorKind, ScriptError, ScriptResult};
use crate::restricted::format::format_value;
use crate::restricted::value::{
    check_len, collect, extend_list, key_error, sort_compare, str_repr, values_equal, Dict,
    DictRef, Host, ListRef, Value,
};
use std::cmp::Ordering;
use std::rc::Rc;

const STR_METHODS: &[&str] = &[
    "join",
    "split",
    "strip",
    "lstrip",
    "rstrip",
    "upper",
    "lower",
    "replace",
    "startswith",
    "endswith",
    "find",
    "index",
    "count",
    "isdigit",
    "isalpha",
    "isspace",
    "splitlines",
    "zfill",
    "format",
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "remove", "index", "count", "reverse", "sort", "copy",
    "clear",
];

const DICT_METHODS: &[&str] = &[
    "get",
    "keys",
    "values",
    "items",
    "pop",
    "setdefault",
    "update",
    "copy",
    "clear",
];

const TUPLE_METHODS: &[&str] = &["index", "count"];

/// A method together with the value it was looked up on.
pub struct BoundMethod {
    pub receiver: Value,
    pub name: &'static str,
}

pub fn lookup(receiver: &Value, attr: &str) -> Option<&'static str> {
    if attr.starts_with('_') {
        return None;
    }
    let table = match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        _ => &[],
    };
    table.iter().copied().find(|name| *name == attr)
}

/// `receiver.attr` as a callable value.
pub fn bind(receiver: &Value, attr: &str) -> ScriptResult<Value> {
    lookup(receiver, attr)
        .map(|name| {
            Value::Method(Rc::new(BoundMethod {
                receiver: receiver.clone(),
                name,
            }))
        })
        .ok_or_else(|| ScriptError::attribute_error(receiver.type_name(), attr))
}

pub fn call(
    method: &BoundMethod,
    args: Vec<Value>,
    kwargs: Kwargs,
    host: &mut dyn Host,
) -> ScriptResult<Value> {
    match &method.receiver {
        Value::Str(s) => str_method(s, method.name, args, kwargs),
        Value::List(items) => list_method(items, method.name, args, kwargs, host),
        Value::Dict(dict) => dict_method(dict, method.name, args, kwargs),
        Value::Tuple(items) => {
            no_kwargs(method.name, &kwargs)?;
            sequence_method("tuple", items, method.name, &args)
        }
        other => Err(ScriptError::attribute_error(other.type_name(), method.name)),
    }
}

fn expect_str<'a>(value: &'a Value, what: &str) -> ScriptResult<&'a str> {
    match value {
        Value::Str(s) => Ok(&**s),
        other => Err(ScriptError::type_error(format!(
            "{what} must be str, not {}",
            other.type_name()
        ))),
    }
}

fn optional_int(value: Option<&Value>, default: i64) -> ScriptResult<i64> {
    match value {
        None | Some(Value::None) => Ok(default),
        Some(v) => v.expect_int(),
    }
}

fn char_index(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn str_method(s: &Rc<str>, name: &str, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    let mut args = args;
    if name == "format" {
        return str_format(s, &args, &kwargs).map(|text| Value::str(&text));
    }
    if name == "split" {
        for (key, value) in kwargs {
            match (&*key, args.len()) {
                ("sep", 0) => args.push(value),
                ("maxsplit", 0) => args.extend([Value::None, value]),
                ("maxsplit", 1) => args.push(value),
                _ => {
                    return Err(ScriptError::type_error(format!(
                        "'{key}' is an invalid keyword argument for split()"
                    )))
                }
            }
        }
    } else {
        no_kwargs(name, &kwargs)?;
    }

    match name {
        "join" => {
            arity("join", &args, 1, 1)?;
            let mut parts = Vec::new();
            let mut total = 0usize;
            for (i, item) in collect(&args[0])?.iter().enumerate() {
                match item {
                    Value::Str(part) => {
                        total = check_len(
                            total
                                .checked_add(part.len())
                                .and_then(|n| n.checked_add(if i > 0 { s.len() } else { 0 })),
                        )?;
                        parts.push(part.to_string());
                    }
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::str(&parts.join(&**s)))
        }
        "split" => {
            arity("split", &args, 0, 2)?;
            let maxsplit = optional_int(args.get(1), -1)?;
            let parts = match args.first() {
                None | Some(Value::None) => split_whitespace(s, maxsplit),
                Some(sep) => {
                    let sep = expect_str(sep, "sep")?;
                    if sep.is_empty() {
                        return Err(ScriptError::value_error("empty separator"));
                    }
                    if maxsplit < 0 {
                        s.split(sep).map(Value::str).collect()
                    } else {
                        let limit = usize::try_from(maxsplit).unwrap_or(usize::MAX - 1) + 1;
                        s.splitn(limit, sep).map(Value::str).collect()
                    }
                }
            };
            Ok(Value::list(parts))
        }
        "strip" | "lstrip" | "rstrip" => {
            arity(name, &args, 0, 1)?;
            let chars: Option<Vec<char>> = match args.first() {
                None | Some(Value::None) => None,
                Some(v) => Some(expect_str(v, name)?.chars().collect()),
            };
            let matches = |c: char| match &chars {
                None => c.is_whitespace(),
                Some(set) => set.contains(&c),
            };
            let text: &str = s;
            let stripped = match name {
                "strip" => text.trim_matches(matches),
                "lstrip" => text.trim_start_matches(matches),
                _ => text.trim_end_matches(matches),
            };
            Ok(Value::str(stripped))
        }
        "upper" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::str(&s.to_uppercase()))
        }
        "lower" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::str(&s.to_lowercase()))
        }
        "replace" => {
            arity("replace", &args, 2, 3)?;
            let old = expect_str(&args[0], "replace() argument 1")?;
            let new = expect_str(&args[1], "replace() argument 2")?;
            let count = optional_int(args.get(2), -1)?;
            if new.len() > old.len() {
                let hits = if old.is_empty() {
                    s.chars().count() + 1
                } else {
                    s.matches(old).count()
                };
                let hits = match usize::try_from(count) {
                    Ok(limit) => hits.min(limit),
                    Err(_) => hits,
                };
                let growth = hits.checked_mul(new.len() - old.len());
                check_len(growth.and_then(|extra| extra.checked_add(s.len())))?;
            }
            let replaced = if count < 0 {
                s.replace(old, new)
            } else {
                s.replacen(old, new, usize::try_from(count).unwrap_or(usize::MAX))
            };
            Ok(Value::str(&replaced))
        }
        "startswith" | "endswith" => {
            arity(name, &args, 1, 1)?;
            let candidates = match &args[0] {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            for candidate in &candidates {
                let Value::Str(affix) = candidate else {
                    return Err(ScriptError::type_error(format!(
                        "{name} first arg must be str or a tuple of str, not {}",
                        candidate.type_name()
                    )));
                };
                let hit = if name == "startswith" {
                    s.starts_with(&**affix)
                } else {
                    s.ends_with(&**affix)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "find" | "index" => {
            arity(name, &args, 1, 1)?;
            let needle = expect_str(&args[0], "substring")?;
            match s.find(needle) {
                Some(byte) => Ok(Value::Int(char_index(s, byte))),
                None if name == "find" => Ok(Value::Int(-1)),
                None => Err(ScriptError::value_error("substring not found")),
            }
        }
        "count" => {
            arity("count", &args, 1, 1)?;
            let needle = expect_str(&args[0], "substring")?;
            let n = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Ok(Value::Int(n as i64))
        }
        "isdigit" | "isalpha" | "isspace" => {
            arity(name, &args, 0, 0)?;
            let test: fn(char) -> bool = match name {
                "isdigit" => |c| c.is_ascii_digit(),
                "isalpha" => char::is_alphabetic,
                _ => char::is_whitespace,
            };
            Ok(Value::Bool(!s.is_empty() && s.chars().all(test)))
        }
        "splitlines" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(s.lines().map(Value::str).collect()))
        }
        "zfill" => {
            arity("zfill", &args, 1, 1)?;
            let width = usize::try_from(args[0].expect_int()?).unwrap_or(0);
            let len = s.chars().count();
            if width <= len {
                return Ok(Value::Str(s.clone()));
            }
            check_len(Some(width))?;
            let (sign, digits) = match s.chars().next() {
                Some(c @ ('+' | '-')) => (Some(c), &s[1..]),
                _ => (None, &s[..]),
            };
            let mut out = String::with_capacity(width);
            out.extend(sign);
            out.push_str(&"0".repeat(width - len));
            out.push_str(digits);
            Ok(Value::str(&out))
        }
        other => Err(ScriptError::attribute_error("str", other)),
    }
}

fn split_whitespace(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && out.len() as i64 == maxsplit {
            out.push(Value::str(rest));
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        out.push(Value::str(&rest[..end]));
        rest = rest[end..].trim_start();
    }
    out
}

/// `template.format(*args, **kwargs)` with positional, numbered and named
/// fields, `!r`/`!s` conversions and format specs.
fn str_format(template: &str, args: &[Value], kwargs: &Kwargs) -> ScriptResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut auto = 0usize;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(ScriptError::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        None => {
                            return Err(ScriptError::value_error(
                                "expected '}' before end of string",
                            ))
                        }
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                    }
                }
                let (head, spec) = field.split_once(':').unwrap_or((&field, ""));
                let (name, conversion) = match head.split_once('!') {
                    Some((name, conv)) => (name, Some(conv)),
                    None => (head, None),
                };
                let value = if name.is_empty() {
                    let position = auto;
                    auto += 1;
                    positional(args, position)?
                } else if let Ok(position) = name.parse::<usize>() {
                    positional(args, position)?
                } else {
                    kwargs
                        .iter()
                        .find(|(key, _)| &**key == name)
                        .map(|(_, value)| value.clone())
                        .ok_or_else(|| ScriptError::new(ErrorKind::KeyError, str_repr(name)))?
                };
                let value = match conversion {
                    None => value,
                    Some("r") => Value::str(&value.repr()?),
                    Some("s") => Value::str(&value.to_str()?),
                    Some(other) => {
                        return Err(ScriptError::value_error(format!(
                            "Unknown conversion specifier {other}"
                        )))
                    }
                };
                out.push_str(&format_value(&value, spec)?);
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn positional(args: &[Value], position: usize) -> ScriptResult<Value> {
    args.get(position).cloned().ok_or_else(|| {
        ScriptError::index_error(format!(
            "Replacement index {position} out of range for positional args tuple"
        ))
    })
}

/// `index` and `count`, shared by lists and tuples.
fn sequence_method(kind: &str, items: &[Value], name: &str, args: &[Value]) -> ScriptResult<Value> {
    arity(name, args, 1, 1)?;
    let needle = &args[0];
    match name {
        "index" => {
            for (i, item) in items.iter().enumerate() {
                if values_equal(item, needle)? {
                    return Ok(Value::Int(i as i64));
                }
            }
            let message = if kind == "list" {
                format!("{} is not in list", needle.repr()?)
            } else {
                "tuple.index(x): x not in tuple".to_string()
            };
            Err(ScriptError::value_error(message))
        }
        "count" => {
            let mut n = 0i64;
            for item in items {
                if values_equal(item, needle)? {
                    n += 1;
                }
            }
            Ok(Value::Int(n))
        }
        other => Err(ScriptError::attribute_error(kind, other)),
    }
}

fn list_method(
    list: &ListRef,
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
    host: &mut dyn Host,
) -> ScriptResult<Value> {
    if name == "sort" {
        return sort_list(list, args, kwargs, host);
    }
    no_kwargs(name, &kwargs)?;
    match name {
        "append" => {
            arity("append", &args, 1, 1)?;
            extend_list(list, args)?;
            Ok(Value::None)
        }
        "extend" => {
            arity("extend", &args, 1, 1)?;
            let extra = collect(&args[0])?;
            extend_list(list, extra)?;
            Ok(Value::None)
        }
        "pop" => {
            arity("pop", &args, 0, 1)?;
            let index = optional_int(args.first(), -1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(ScriptError::index_error("pop from empty list"));
            }
            let len = items.len() as i64;
            let resolved = if index < 0 { index + len } else { index };
            if resolved < 0 || resolved >= len {
                return Err(ScriptError::index_error("pop index out of range"));
            }
            Ok(items.remove(resolved as usize))
        }
        "insert" => {
            arity("insert", &args, 2, 2)?;
            let index = args[0].expect_int()?;
            let mut items = list.borrow_mut();
            check_len(items.len().checked_add(1))?;
            let len = items.len() as i64;
            let at = if index < 0 {
                (index + len).max(0)
            } else {
                index.min(len)
            };
            items.insert(at as usize, args[1].clone());
            Ok(Value::None)
        }
        "remove" => {
            arity("remove", &args, 1, 1)?;
            let snapshot = list.borrow().clone();
            let mut position = None;
            for (i, item) in snapshot.iter().enumerate() {
                if values_equal(item, &args[0])? {
                    position = Some(i);
                    break;
                }
            }
            match position {
                Some(i) => {
                    list.borrow_mut().remove(i);
                    Ok(Value::None)
                }
                None => Err(ScriptError::value_error("list.remove(x): x not in list")),
            }
        }
        "index" | "count" => {
            let snapshot = list.borrow().clone();
            sequence_method("list", &snapshot, name, &args)
        }
        "reverse" => {
            arity("reverse", &args, 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => {
            arity("copy", &args, 0, 0)?;
            Ok(Value::list(list.borrow().clone()))
        }
        "clear" => {
            arity("clear", &args, 0, 0)?;
            list.borrow_mut().clear();
            Ok(Value::None)
        }
        other => Err(ScriptError::attribute_error("list", other)),
    }
}

/// Stable in-place sort; the first comparison fault aborts the sort and
/// leaves the list unchanged.
fn sort_list(
    list: &ListRef,
    args: Vec<Value>,
    kwargs: Kwargs,
    host: &mut dyn Host,
) -> ScriptResult<Value> {
    if !args.is_empty() {
        return Err(ScriptError::type_error(
            "sort() takes no positional arguments",
        ));
    }
    let mut key_fn = None;
    let mut reverse = false;
    for (key, value) in kwargs {
        match &*key {
            "key" => key_fn = Some(value).filter(|v| !matches!(v, Value::None)),
            "reverse" => reverse = value.truthy(),
            other => {
                return Err(ScriptError::type_error(format!(
                    "'{other}' is an invalid keyword argument for sort()"
                )))
            }
        }
    }

    let items = list.borrow().clone();
    let keys = match &key_fn {
        Some(func) => items
            .iter()
            .map(|item| host.call(func, vec![item.clone()]))
            .collect::<ScriptResult<Vec<_>>>()?,
        None => items.clone(),
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut fault = None;
    order.sort_by(|&a, &b| {
        if fault.is_some() {
            return Ordering::Equal;
        }
        match sort_compare(&keys[a], &keys[b]) {
            Ok(ordering) if reverse => ordering.reverse(),
            Ok(ordering) => ordering,
            Err(err) => {
                fault = Some(err);
                Ordering::Equal
            }
        }
    });
    if let Some(err) = fault {
        return Err(err);
    }
    *list.borrow_mut() = order.into_iter().map(|i| items[i].clone()).collect();
    Ok(Value::None)
}

fn dict_method(dict: &DictRef, name: &str, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
    if name == "update" {
        arity("update", &args, 0, 1)?;
        let mut staged = Dict::new();
        if let Some(source) = args.first() {
            update_dict(&mut staged, source)?;
        }
        for (key, value) in kwargs {
            staged.insert(Value::Str(key), value)?;
        }
        let mut target = dict.borrow_mut();
        for (key, value) in staged.items() {
            target.insert(key, value)?;
        }
        return Ok(Value::None);
    }
    no_kwargs(name, &kwargs)?;
    match name {
        "get" => {
            arity("get", &args, 1, 2)?;
            let found = dict.borrow().get(&args[0])?;
            Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
        }
        "keys" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().keys()))
        }
        "values" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().values()))
        }
        "items" => {
            arity(name, &args, 0, 0)?;
            let pairs = dict
                .borrow()
                .items()
                .into_iter()
                .map(|(key, value)| Value::tuple(vec![key, value]))
                .collect();
            Ok(Value::list(pairs))
        }
        "pop" => {
            arity("pop", &args, 1, 2)?;
            let removed = dict.borrow_mut().remove(&args[0])?;
            match (removed, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(key_error(&args[0])),
            }
        }
        "setdefault" => {
            arity("setdefault", &args, 1, 2)?;
            let existing = dict.borrow().get(&args[0])?;
            if let Some(value) = existing {
                return Ok(value);
            }
            let default = args.get(1).cloned().unwrap_or(Value::None);
            dict.borrow_mut().insert(args[0].clone(), default.clone())?;
            Ok(default)
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        other => Err(ScriptError::attribute_error("dict", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoHost;

    impl Host for NoHost {
        fn call(&mut self, func: &Value, args: Vec<Value>) -> ScriptResult<Value> {
            match func {
                Value::Builtin(b) => crate::restricted::builtins::call(*b, args, Vec::new(), self),
                other => Err(ScriptError::type_error(format!(
                    "'{}' object is not callable",
                    other.type_name()
                ))),
            }
        }

        fn write(&mut self, _text: &str) -> ScriptResult<()> {
            Ok(())
        }
    }

    fn invoke(receiver: &Value, name: &str, args: Vec<Value>) -> ScriptResult<Value> {
        invoke_kw(receiver, name, args, Vec::new())
    }

    fn invoke_kw(
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> ScriptResult<Value> {
        let Value::Method(method) = bind(receiver, name)? else {
            unreachable!("bind always yields a method");
        };
        call(&method, args, kwargs, &mut NoHost)
    }

    #[test]
    fn underscore_attributes_never_resolve() {
        let err = bind(&Value::str("x"), "__class__").unwrap_err();
        assert_eq!(err.kind, ErrorKind::AttributeError);
        assert_eq!(err.message, "'str' object has no attribute '__class__'");
        assert!(bind(&Value::Int(1), "real").is_err());
    }

    #[test]
    fn string_splitting_and_joining() {
        let text = Value::str("  a b\tc  ");
        assert_eq!(invoke(&text, "split", vec![]).unwrap().repr().unwrap(), "['a', 'b', 'c']");
        let csv = Value::str("1,2,,3");
        assert_eq!(
            invoke(&csv, "split", vec![Value::str(",")]).unwrap().repr().unwrap(),
            "['1', '2', '', '3']"
        );
        assert_eq!(
            invoke(&csv, "split", vec![Value::str(","), Value::Int(1)]).unwrap().repr().unwrap(),
            "['1', '2,,3']"
        );
        let joined = invoke(
            &Value::str(", "),
            "join",
            vec![Value::list(vec![Value::str("x"), Value::str("y")])],
        )
        .unwrap();
        assert_eq!(joined.to_str().unwrap(), "x, y");
        let err = invoke(&Value::str(""), "join", vec![Value::list(vec![Value::Int(1)])]).unwrap_err();
        assert_eq!(err.message, "sequence item 0: expected str instance, int found");
    }

    #[test]
    fn string_queries() {
        let text = Value::str("héllo");
        assert_eq!(invoke(&text, "find", vec![Value::str("l")]).unwrap().repr().unwrap(), "2");
        assert_eq!(invoke(&text, "count", vec![Value::str("l")]).unwrap().repr().unwrap(), "2");
        assert!(invoke(&text, "index", vec![Value::str("z")]).is_err());
        assert_eq!(invoke(&Value::str("42"), "isdigit", vec![]).unwrap().repr().unwrap(), "True");
        assert_eq!(invoke(&Value::str(""), "isalpha", vec![]).unwrap().repr().unwrap(), "False");
        assert_eq!(invoke(&Value::str("-7"), "zfill", vec![Value::Int(4)]).unwrap().to_str().unwrap(), "-007");
    }

    #[test]
    fn string_format_fields() {
        let template = Value::str("{} + {1} = {total:>4}{{!}}");
        let out = invoke_kw(
            &template,
            "format",
            vec![Value::Int(1), Value::Int(2)],
            vec![(Rc::from("total"), Value::Int(3))],
        )
        .unwrap();
        assert_eq!(out.to_str().unwrap(), "1 + 2 =    3{!}");
        let repr = invoke(&Value::str("{!r}"), "format", vec![Value::str("a")]).unwrap();
        assert_eq!(repr.to_str().unwrap(), "'a'");
    }

    #[test]
    fn list_mutation() {
        let list = Value::list(vec![Value::Int(3), Value::Int(1)]);
        invoke(&list, "append", vec![Value::Int(2)]).unwrap();
        invoke(&list, "insert", vec![Value::Int(0), Value::Int(9)]).unwrap();
        assert_eq!(list.repr().unwrap(), "[9, 3, 1, 2]");
        assert_eq!(invoke(&list, "pop", vec![]).unwrap().repr().unwrap(), "2");
        invoke(&list, "remove", vec![Value::Int(9)]).unwrap();
        assert_eq!(list.repr().unwrap(), "[3, 1]");
        let err = invoke(&list, "index", vec![Value::Int(7)]).unwrap_err();
        assert_eq!(err.message, "7 is not in list");
        invoke(&list, "extend", vec![list.clone()]).unwrap();
        assert_eq!(list.repr().unwrap(), "[3, 1, 3, 1]");
    }

    #[test]
    fn sort_is_stable_with_key_and_reverse() {
        let words = Value::list(
            ["bb", "a", "cc", "d"].iter().map(|w| Value::str(w)).collect(),
        );
        invoke_kw(
            &words,
            "sort",
            vec![],
            vec![
                (Rc::from("key"), Value::Builtin(crate::restricted::builtins::Builtin::Len)),
                (Rc::from("reverse"), Value::Bool(true)),
            ],
        )
        .unwrap();
        assert_eq!(words.repr().unwrap(), "['bb', 'cc', 'a', 'd']");
    }

    #[test]
    fn failed_sort_leaves_list_untouched() {
        let mixed = Value::list(vec![Value::Int(2), Value::str("a"), Value::Int(1)]);
        let err = invoke(&mixed, "sort", vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
        assert_eq!(mixed.repr().unwrap(), "[2, 'a', 1]");
    }

    #[test]
    fn dict_methods() {
        let dict = Value::dict(Dict::new());
        invoke(&dict, "setdefault", vec![Value::str("a"), Value::Int(1)]).unwrap();
        invoke_kw(&dict, "update", vec![], vec![(Rc::from("b"), Value::Int(2))]).unwrap();
        assert_eq!(invoke(&dict, "keys", vec![]).unwrap().repr().unwrap(), "['a', 'b']");
        assert_eq!(invoke(&dict, "items", vec![]).unwrap().repr().unwrap(), "[('a', 1), ('b', 2)]");
        assert_eq!(invoke(&dict, "get", vec![Value::str("z"), Value::Int(0)]).unwrap().repr().unwrap(), "0");
        assert_eq!(invoke(&dict, "pop", vec![Value::str("a")]).unwrap().repr().unwrap(), "1");
        assert_eq!(invoke(&dict, "pop", vec![Value::str("a")]).unwrap_err().kind, ErrorKind::KeyError);
        invoke(&dict, "update", vec![dict.clone()]).unwrap();
        assert_eq!(dict.repr().unwrap(), "{'b': 2}");
    }

    #[test]
    fn oversized_string_results_are_memory_errors() {
        let err = invoke(&Value::str("1"), "zfill", vec![Value::Int(i64::MAX)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MemoryError);

        let big = Value::str(&"a".repeat(10_000));
        let wide = Value::str(&"b".repeat(10_000));
        let err = invoke(&big, "replace", vec![Value::str("a"), wide]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MemoryError);
        let limited = invoke(&big, "replace", vec![Value::str("a"), Value::str("bb"), Value::Int(2)]).unwrap();
        assert_eq!(limited.to_str().unwrap().len(), 10_002);

        let parts = Value::list(vec![Value::str(&"c".repeat(1_000_000)); 11]);
        let err = invoke(&Value::str(""), "join", vec![parts]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MemoryError);
    }

    #[test]
    fn index_and_count_use_structural_equality() {
        let items = Value::list(vec![
            Value::list(vec![Value::Int(1)]),
            Value::Int(2),
            Value::list(vec![Value::Int(1)]),
        ]);
        let needle = Value::list(vec![Value::Int(1)]);
        assert_eq!(invoke(&items, "count", vec![needle.clone()]).unwrap().repr().unwrap(), "2");
        assert_eq!(invoke(&items, "index", vec![Value::Float(2.0)]).unwrap().repr().unwrap(), "1");
        invoke(&items, "remove", vec![needle]).unwrap();
        assert_eq!(items.repr().unwrap(), "[2, [1]]");
    }
}
