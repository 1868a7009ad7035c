//! Runtime values of the restricted environment.

use crate::restricted::ast::{FunctionDef, Ident};
use crate::restricted::builtins::Builtin;
use crate::restricted::error::{ErrorKind, ScriptError, ScriptResult};
use crate::restricted::format::float_repr;
use crate::restricted::methods::BoundMethod;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Nesting at which comparing or rendering containers raises RecursionError.
const MAX_DEPTH: usize = 1000;

/// Longest string or sequence a single operation may produce.
pub const MAX_SEQUENCE_LEN: usize = 10_000_000;

/// MemoryError when a result of `len` items (`None`: the size computation
/// overflowed) would exceed [`MAX_SEQUENCE_LEN`].
pub fn check_len(len: Option<usize>) -> ScriptResult<usize> {
    match len {
        Some(n) if n <= MAX_SEQUENCE_LEN => Ok(n),
        _ => Err(ScriptError::new(ErrorKind::MemoryError, "")),
    }
}

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<Dict>>;
pub type IterRef = Rc<RefCell<IterObj>>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(ListRef),
    Tuple(Rc<Vec<Value>>),
    Dict(DictRef),
    Range(RangeObj),
    Iter(IterRef),
    Function(Rc<Closure>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.repr() {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "<{} object>", self.type_name()),
        }
    }
}

/// Services the evaluator provides to builtins and methods.
pub trait Host {
    /// Invoke any callable value with positional arguments.
    fn call(&mut self, func: &Value, args: Vec<Value>) -> ScriptResult<Value>;
    /// Append text to the execution's output buffer.
    fn write(&mut self, text: &str) -> ScriptResult<()>;
}

impl Value {
    pub fn str(text: &str) -> Value {
        Value::Str(Rc::from(text))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range(_) => "range",
            Value::Iter(it) => it.borrow().label,
            Value::Function(_) => "function",
            Value::Builtin(_) | Value::Method(_) => "builtin_function_or_method",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Range(range) => range.len() > 0,
            Value::Iter(_) | Value::Function(_) | Value::Builtin(_) | Value::Method(_) => true,
        }
    }

    /// Integer view of ints and bools.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float view of any real number.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    /// Index-like integer, or the conventional TypeError.
    pub fn expect_int(&self) -> ScriptResult<i64> {
        self.as_int().ok_or_else(|| {
            ScriptError::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                self.type_name()
            ))
        })
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Builtin(_) | Value::Method(_)
        )
    }

    pub fn repr(&self) -> ScriptResult<String> {
        let mut writer = ReprWriter::default();
        writer.write(self)?;
        Ok(writer.out)
    }

    /// Text produced by `str(value)` and `print`.
    pub fn to_str(&self) -> ScriptResult<String> {
        match self {
            Value::Str(s) => Ok(s.to_string()),
            other => other.repr(),
        }
    }

    pub fn hash_key(&self) -> ScriptResult<HashKey> {
        Ok(match self {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(i64::from(*b)),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                    HashKey::Int(*f as i64)
                } else {
                    HashKey::Float(f.to_bits())
                }
            }
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(Value::hash_key)
                    .collect::<ScriptResult<Vec<_>>>()?,
            ),
            Value::Range(r) => HashKey::Range(r.start, r.stop, r.step),
            Value::Function(f) => HashKey::Identity(Rc::as_ptr(f) as *const () as usize),
            Value::Iter(it) => HashKey::Identity(Rc::as_ptr(it) as *const () as usize),
            Value::Builtin(b) => HashKey::Str(Rc::from(format!("<builtin {}>", b.name()))),
            Value::List(_) | Value::Dict(_) | Value::Method(_) => {
                return Err(ScriptError::type_error(format!(
                    "unhashable type: '{}'",
                    self.type_name()
                )))
            }
        })
    }

    /// Identity comparison backing `is`.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || (a.len() <= 1 && a == b),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => {
                Rc::ptr_eq(a, b) || (a.is_empty() && b.is_empty())
            }
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Iter(a), Value::Iter(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            _ => false,
        }
    }
}

/// Structural equality (`==`). Shared containers compare equal by identity;
/// nesting past [`MAX_DEPTH`] raises RecursionError.
pub fn values_equal(a: &Value, b: &Value) -> ScriptResult<bool> {
    equal_at(a, b, 0)
}

fn depth_exceeded(during: &str) -> ScriptError {
    ScriptError::new(
        ErrorKind::RecursionError,
        format!("maximum recursion depth exceeded {during}"),
    )
}

fn equal_at(a: &Value, b: &Value, depth: usize) -> ScriptResult<bool> {
    let nested = matches!(a, Value::List(_) | Value::Tuple(_) | Value::Dict(_));
    if nested && depth >= MAX_DEPTH {
        return Err(depth_exceeded("in comparison"));
    }
    Ok(match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            sequences_equal(&x, &y, depth)?
        }
        (Value::Tuple(x), Value::Tuple(y)) => sequences_equal(x, y, depth)?,
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return Ok(false);
            }
            for (key, (_, value)) in &x.entries {
                match y.entries.get(key) {
                    Some((_, other)) if equal_at(value, other, depth + 1)? => {}
                    _ => return Ok(false),
                }
            }
            true
        }
        (Value::Range(x), Value::Range(y)) => {
            let (lx, ly) = (x.len(), y.len());
            lx == ly && (lx == 0 || (x.start == y.start && (lx == 1 || x.step == y.step)))
        }
        (Value::Bool(_) | Value::Int(_), Value::Bool(_) | Value::Int(_)) => {
            a.as_int() == b.as_int()
        }
        (Value::Float(_), Value::Bool(_) | Value::Int(_) | Value::Float(_))
        | (Value::Bool(_) | Value::Int(_), Value::Float(_)) => a.as_float() == b.as_float(),
        _ => a.is_same(b),
    })
}

fn sequences_equal(x: &[Value], y: &[Value], depth: usize) -> ScriptResult<bool> {
    if x.len() != y.len() {
        return Ok(false);
    }
    for (a, b) in x.iter().zip(y) {
        if !(a.is_same(b) || equal_at(a, b, depth + 1)?) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Ordering for `<`, `<=`, `>`, `>=`, sorting, `min` and `max`.
/// `None` means unordered (NaN involved).
pub fn partial_compare(a: &Value, b: &Value, op: &str) -> ScriptResult<Option<Ordering>> {
    compare_at(a, b, op, 0)
}

fn compare_at(a: &Value, b: &Value, op: &str, depth: usize) -> ScriptResult<Option<Ordering>> {
    match (a, b) {
        (Value::Bool(_) | Value::Int(_), Value::Bool(_) | Value::Int(_)) => {
            Ok(a.as_int().partial_cmp(&b.as_int()))
        }
        (
            Value::Bool(_) | Value::Int(_) | Value::Float(_),
            Value::Bool(_) | Value::Int(_) | Value::Float(_),
        ) => {
            let x = a.as_float().unwrap_or(f64::NAN);
            let y = b.as_float().unwrap_or(f64::NAN);
            Ok(x.partial_cmp(&y))
        }
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            compare_sequences(&x, &y, op, depth)
        }
        (Value::Tuple(x), Value::Tuple(y)) => compare_sequences(x, y, op, depth),
        _ => Err(ScriptError::type_error(format!(
            "'{op}' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn compare_sequences(
    x: &[Value],
    y: &[Value],
    op: &str,
    depth: usize,
) -> ScriptResult<Option<Ordering>> {
    if depth >= MAX_DEPTH {
        return Err(depth_exceeded("in comparison"));
    }
    for (a, b) in x.iter().zip(y) {
        if !(a.is_same(b) || equal_at(a, b, depth + 1)?) {
            return compare_at(a, b, op, depth + 1);
        }
    }
    Ok(Some(x.len().cmp(&y.len())))
}

/// Total order for sorting; unordered pairs compare equal.
pub fn sort_compare(a: &Value, b: &Value) -> ScriptResult<Ordering> {
    Ok(partial_compare(a, b, "<")?.unwrap_or(Ordering::Equal))
}

/// Renders `repr` text. Containers already on the render path print as
/// `[...]` or `{...}`.
#[derive(Default)]
struct ReprWriter {
    out: String,
    active: Vec<usize>,
    depth: usize,
}

impl ReprWriter {
    fn enter(&mut self) -> ScriptResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(depth_exceeded("while getting the repr of an object"));
        }
        self.depth += 1;
        Ok(())
    }

    fn write(&mut self, value: &Value) -> ScriptResult<()> {
        match value {
            Value::None => self.out.push_str("None"),
            Value::Bool(true) => self.out.push_str("True"),
            Value::Bool(false) => self.out.push_str("False"),
            Value::Int(i) => self.out.push_str(&i.to_string()),
            Value::Float(f) => self.out.push_str(&float_repr(*f)),
            Value::Str(s) => self.out.push_str(&str_repr(s)),
            Value::List(items) => {
                let id = Rc::as_ptr(items) as *const () as usize;
                if self.active.contains(&id) {
                    self.out.push_str("[...]");
                    return Ok(());
                }
                self.enter()?;
                self.active.push(id);
                self.out.push('[');
                self.items(&items.borrow())?;
                self.out.push(']');
                self.active.pop();
                self.depth -= 1;
            }
            Value::Tuple(items) => {
                self.enter()?;
                self.out.push('(');
                self.items(items)?;
                if items.len() == 1 {
                    self.out.push(',');
                }
                self.out.push(')');
                self.depth -= 1;
            }
            Value::Dict(dict) => {
                let id = Rc::as_ptr(dict) as *const () as usize;
                if self.active.contains(&id) {
                    self.out.push_str("{...}");
                    return Ok(());
                }
                self.enter()?;
                self.active.push(id);
                self.out.push('{');
                for (i, (key, value)) in dict.borrow().entries.values().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.write(key)?;
                    self.out.push_str(": ");
                    self.write(value)?;
                    check_len(Some(self.out.len()))?;
                }
                self.out.push('}');
                self.active.pop();
                self.depth -= 1;
            }
            Value::Range(r) => {
                if r.step == 1 {
                    self.out.push_str(&format!("range({}, {})", r.start, r.stop));
                } else {
                    self.out
                        .push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
                }
            }
            Value::Iter(it) => self
                .out
                .push_str(&format!("<{} object>", it.borrow().label)),
            Value::Function(f) => self.out.push_str(&format!("<function {}>", f.def.name)),
            Value::Builtin(b) => self
                .out
                .push_str(&format!("<built-in function {}>", b.name())),
            Value::Method(m) => self.out.push_str(&format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            )),
        }
        Ok(())
    }

    fn items(&mut self, items: &[Value]) -> ScriptResult<()> {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.write(item)?;
            check_len(Some(self.out.len()))?;
        }
        Ok(())
    }
}

/// Quoted, escaped string literal form.
pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Dictionary key identity: equal numbers hash alike, as do equal tuples.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Range(i64, i64, i64),
    Identity(usize),
}

/// Insertion-ordered mapping. The first key object inserted is kept.
#[derive(Clone, Default)]
pub struct Dict {
    entries: IndexMap<HashKey, (Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> ScriptResult<Option<Value>> {
        Ok(self.entries.get(&key.hash_key()?).map(|(_, v)| v.clone()))
    }

    pub fn contains(&self, key: &Value) -> ScriptResult<bool> {
        Ok(self.entries.contains_key(&key.hash_key()?))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> ScriptResult<()> {
        let hashed = key.hash_key()?;
        match self.entries.get_mut(&hashed) {
            Some(slot) => slot.1 = value,
            None => {
                self.entries.insert(hashed, (key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> ScriptResult<Option<Value>> {
        Ok(self
            .entries
            .shift_remove(&key.hash_key()?)
            .map(|(_, v)| v))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.values().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.values().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.entries.values().cloned().collect()
    }
}

pub fn key_error(key: &Value) -> ScriptError {
    match key.repr() {
        Ok(text) => ScriptError::new(ErrorKind::KeyError, text),
        Err(err) => err,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeObj {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeObj {
    pub fn new(start: i64, stop: i64, step: i64) -> ScriptResult<Self> {
        if step == 0 {
            return Err(ScriptError::value_error("range() arg 3 must not be zero"));
        }
        Ok(Self { start, stop, step })
    }

    pub fn len(&self) -> u64 {
        let (start, stop, step) = (
            i128::from(self.start),
            i128::from(self.stop),
            i128::from(self.step),
        );
        let count = if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && start > stop {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };
        count as u64
    }

    /// Element at a non-negative position known to be in range.
    pub fn at(&self, index: u64) -> i64 {
        (i128::from(self.start) + i128::from(index) * i128::from(self.step)) as i64
    }

    pub fn contains(&self, value: i64) -> bool {
        let (start, step, v) = (
            i128::from(self.start),
            i128::from(self.step),
            i128::from(value),
        );
        let in_bounds = if step > 0 {
            v >= start && v < i128::from(self.stop)
        } else {
            v <= start && v > i128::from(self.stop)
        };
        in_bounds && (v - start) % step == 0
    }
}

/// Iterator object (`enumerate(...)`, generator expressions).
pub struct IterObj {
    pub label: &'static str,
    state: IterState,
}

impl IterObj {
    pub fn new(label: &'static str, state: IterState) -> Self {
        Self { label, state }
    }

    pub fn next_value(&mut self) -> ScriptResult<Option<Value>> {
        self.state.next_value()
    }
}

pub enum IterState {
    Items(std::vec::IntoIter<Value>),
    Range { next: i64, remaining: u64, step: i64 },
    Enumerate { inner: Box<IterState>, count: i64 },
    Shared(IterRef),
}

impl IterState {
    pub fn next_value(&mut self) -> ScriptResult<Option<Value>> {
        match self {
            IterState::Items(items) => Ok(items.next()),
            IterState::Range {
                next,
                remaining,
                step,
            } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                let current = *next;
                *remaining -= 1;
                if *remaining > 0 {
                    *next = next.wrapping_add(*step);
                }
                Ok(Some(Value::Int(current)))
            }
            IterState::Enumerate { inner, count } => {
                let Some(item) = inner.next_value()? else {
                    return Ok(None);
                };
                let index = *count;
                *count = count.checked_add(1).ok_or_else(ScriptError::overflow)?;
                Ok(Some(Value::tuple(vec![Value::Int(index), item])))
            }
            IterState::Shared(iter) => iter.borrow_mut().next_value(),
        }
    }
}

/// Begin iterating any iterable value.
pub fn iterate(value: &Value) -> ScriptResult<IterState> {
    Ok(match value {
        Value::List(items) => IterState::Items(items.borrow().clone().into_iter()),
        Value::Tuple(items) => IterState::Items(items.to_vec().into_iter()),
        Value::Str(s) => IterState::Items(
            s.chars()
                .map(|c| Value::str(c.encode_utf8(&mut [0u8; 4])))
                .collect::<Vec<_>>()
                .into_iter(),
        ),
        Value::Dict(dict) => IterState::Items(dict.borrow().keys().into_iter()),
        Value::Range(r) => IterState::Range {
            next: r.start,
            remaining: r.len(),
            step: r.step,
        },
        Value::Iter(iter) => IterState::Shared(iter.clone()),
        other => {
            return Err(ScriptError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )))
        }
    })
}

/// Append `extra` to `list`, raising MemoryError past [`MAX_SEQUENCE_LEN`].
pub fn extend_list(list: &ListRef, extra: Vec<Value>) -> ScriptResult<()> {
    let mut items = list.borrow_mut();
    check_len(items.len().checked_add(extra.len()))?;
    items.extend(extra);
    Ok(())
}

/// Drain an iterable into a vector.
pub fn collect(value: &Value) -> ScriptResult<Vec<Value>> {
    if let Value::List(items) = value {
        return Ok(items.borrow().clone());
    }
    if let Value::Range(r) = value {
        check_len(usize::try_from(r.len()).ok())?;
    }
    let mut state = iterate(value)?;
    let mut out = Vec::new();
    while let Some(item) = state.next_value()? {
        check_len(Some(out.len() + 1))?;
        out.push(item);
    }
    Ok(out)
}

/// Variables of one function activation, chained to the defining scope.
#[derive(Debug, Default)]
pub struct Scope {
    pub vars: RefCell<HashMap<Ident, Value>>,
    pub parent: Option<Rc<Scope>>,
    /// Function whose activation this is; `None` for captured comprehension
    /// variables.
    pub owner: Option<Rc<FunctionDef>>,
}

impl Scope {
    pub fn child(parent: Option<Rc<Scope>>, owner: Option<Rc<FunctionDef>>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent,
            owner,
        })
    }

    /// Whether `name` is a local of the owning function, bound or not.
    pub fn declares(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
            || self
                .owner
                .as_ref()
                .is_some_and(|def| def.scope.locals.contains(name))
    }

    /// Nearest scope (self included) that owns `name`.
    pub fn owner_of(self: &Rc<Self>, name: &str) -> Option<Rc<Scope>> {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            if scope.declares(name) {
                return Some(scope);
            }
            current = scope.parent.clone();
        }
        None
    }
}

/// User function together with its evaluated defaults and defining scope.
#[derive(Debug)]
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
    pub kw_defaults: Vec<Option<Value>>,
    pub env: Option<Rc<Scope>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_crosses_types() {
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)).unwrap());
        assert!(values_equal(&Value::Bool(true), &Value::Int(1)).unwrap());
        assert!(!values_equal(&Value::Int(1), &Value::str("1")).unwrap());
    }

    #[test]
    fn equal_numbers_share_a_dict_slot() {
        let mut dict = Dict::new();
        dict.insert(Value::Int(1), Value::str("int")).unwrap();
        dict.insert(Value::Float(1.0), Value::str("float")).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.keys()[0].repr().unwrap(), "1");
        assert_eq!(dict.values()[0].to_str().unwrap(), "float");
    }

    #[test]
    fn lists_are_unhashable() {
        let err = Value::list(vec![]).hash_key().unwrap_err();
        assert_eq!(err.message, "unhashable type: 'list'");
    }

    #[test]
    fn container_reprs() {
        let value = Value::list(vec![
            Value::Int(1),
            Value::str("a'b"),
            Value::tuple(vec![Value::None]),
            Value::Float(2.5),
        ]);
        assert_eq!(value.repr().unwrap(), "[1, \"a'b\", (None,), 2.5]");
    }

    fn nested(depth: usize) -> Value {
        let mut value = Value::list(vec![]);
        for _ in 0..depth {
            value = Value::list(vec![value]);
        }
        value
    }

    #[test]
    fn self_referential_containers_render_once() {
        let list = Rc::new(RefCell::new(vec![Value::Int(1)]));
        list.borrow_mut().push(Value::List(list.clone()));
        assert_eq!(Value::List(list.clone()).repr().unwrap(), "[1, [...]]");
        list.borrow_mut().clear();

        let dict = Rc::new(RefCell::new(Dict::new()));
        dict.borrow_mut()
            .insert(Value::str("me"), Value::Dict(dict.clone()))
            .unwrap();
        assert_eq!(Value::Dict(dict.clone()).repr().unwrap(), "{'me': {...}}");
        dict.borrow_mut().clear();
    }

    #[test]
    fn shared_but_acyclic_values_render_in_full() {
        let inner = Value::list(vec![Value::Int(7)]);
        let outer = Value::list(vec![inner.clone(), inner]);
        assert_eq!(outer.repr().unwrap(), "[[7], [7]]");
    }

    #[test]
    fn deep_nesting_compares_and_renders_structurally() {
        let (x, y) = (nested(300), nested(300));
        assert!(values_equal(&x, &y).unwrap());
        assert!(!values_equal(&x, &nested(299)).unwrap());
        assert_eq!(x.repr().unwrap().len(), 602);
        assert_eq!(
            partial_compare(&nested(299), &x, "<").unwrap(),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn nesting_past_the_limit_is_a_recursion_error() {
        let (x, y) = (nested(MAX_DEPTH + 5), nested(MAX_DEPTH + 5));
        let err = values_equal(&x, &y).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecursionError);
        assert_eq!(err.message, "maximum recursion depth exceeded in comparison");
        let err = x.repr().unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecursionError);
        assert!(err.message.contains("while getting the repr"));
    }

    #[test]
    fn distinct_cycles_do_not_compare_forever() {
        let a = Rc::new(RefCell::new(Vec::new()));
        a.borrow_mut().push(Value::List(a.clone()));
        let b = Rc::new(RefCell::new(Vec::new()));
        b.borrow_mut().push(Value::List(b.clone()));
        let same = values_equal(&Value::List(a.clone()), &Value::List(a.clone())).unwrap();
        assert!(same);
        let err = values_equal(&Value::List(a.clone()), &Value::List(b.clone())).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecursionError);
        a.borrow_mut().clear();
        b.borrow_mut().clear();
    }

    #[test]
    fn oversized_collections_are_memory_errors() {
        let huge = Value::Range(RangeObj::new(0, 1_000_000_000, 1).unwrap());
        assert_eq!(collect(&huge).unwrap_err().kind, ErrorKind::MemoryError);
        assert!(check_len(Some(MAX_SEQUENCE_LEN)).is_ok());
        assert!(check_len(None).is_err());
        assert!(check_len(Some(MAX_SEQUENCE_LEN + 1)).is_err());
    }

    #[test]
    fn range_length_and_membership() {
        let r = RangeObj::new(0, 10, 3).unwrap();
        assert_eq!(r.len(), 4);
        assert!(r.contains(9));
        assert!(!r.contains(10));
        let down = RangeObj::new(5, -1, -2).unwrap();
        assert_eq!(down.len(), 3);
        assert_eq!(down.at(2), 1);
        assert!(RangeObj::new(0, 1, 0).is_err());
    }

    #[test]
    fn ordering_rejects_mixed_types() {
        let err = partial_compare(&Value::str("a"), &Value::Int(1), "<").unwrap_err();
        assert_eq!(
            err.message,
            "'<' not supported between instances of 'str' and 'int'"
        );
    }

    #[test]
    fn enumerate_state_yields_pairs() {
        let mut state = IterState::Enumerate {
            inner: Box::new(iterate(&Value::str("ab")).unwrap()),
            count: 1,
        };
        let first = state.next_value().unwrap().unwrap();
        assert_eq!(first.repr().unwrap(), "(1, 'a')");
    }
}
