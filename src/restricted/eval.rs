//! Tree-walking evaluator.
//!
//! Name resolution: comprehension variables, then the function's own locals
//! (a name assigned anywhere in a body is local for the whole body), then the
//! enclosing function scopes, then module globals, then the whitelist.

use crate::restricted::ast::{
    Arg, BinOp, BoolOp, Comprehension, DictItem, ExceptHandler, Expr, ExprKind, FPart, FunctionDef,
    Ident, Index, Module, Stmt, StmtKind, Target,
};
use crate::restricted::builtins::{self, update_dict, Kwargs};
use crate::restricted::error::{ErrorKind, ScriptError, ScriptResult};
use crate::restricted::format::format_value;
use crate::restricted::methods;
use crate::restricted::ops::{
    binary_op, compare, del_item, del_slice, get_item, get_slice, set_item, set_slice, unary_op,
    SliceArgs,
};
use crate::restricted::value::{
    check_len, collect, extend_list, iterate, Closure, Dict, Host, IterObj, IterState, Scope, Value,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

const MODULE_FRAME: &str = "<module>";

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    name: Ident,
    def: Option<Rc<FunctionDef>>,
    /// Function locals; `None` at module level.
    locals: Option<Rc<Scope>>,
    /// Closure environment the function was defined in.
    env: Option<Rc<Scope>>,
    /// Comprehension variables, innermost last.
    overlays: Vec<HashMap<Ident, Value>>,
    line: usize,
}

impl Frame {
    fn module() -> Self {
        Self {
            name: Rc::from(MODULE_FRAME),
            def: None,
            locals: None,
            env: None,
            overlays: Vec::new(),
            line: 1,
        }
    }

    fn is_global(&self, name: &str) -> bool {
        self.def
            .as_ref()
            .map_or(true, |def| def.scope.globals.contains(name))
    }

    fn is_local(&self, name: &str) -> bool {
        self.def
            .as_ref()
            .is_some_and(|def| def.scope.locals.contains(name))
    }

    fn is_nonlocal(&self, name: &str) -> bool {
        self.def
            .as_ref()
            .is_some_and(|def| def.scope.nonlocals.contains(name))
    }
}

/// Interpreter state for one snippet execution.
pub struct Interpreter {
    globals: HashMap<Ident, Value>,
    frames: Vec<Frame>,
    output: String,
    max_output_bytes: usize,
    recursion_limit: usize,
}

impl Interpreter {
    pub fn new(max_output_bytes: usize, recursion_limit: usize) -> Self {
        Self {
            globals: HashMap::new(),
            frames: Vec::new(),
            output: String::new(),
            max_output_bytes,
            recursion_limit,
        }
    }

    /// Text printed so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn into_output(self) -> String {
        self.output
    }

    pub fn run(&mut self, module: &Module) -> ScriptResult<()> {
        self.frames.clear();
        self.frames.push(Frame::module());
        let result = self.exec_block(&module.body);
        self.leave_frame(result).map(|_| ())
    }

    /// Pop the innermost frame, attributing a fault raised inside it.
    fn leave_frame<T>(&mut self, result: ScriptResult<T>) -> ScriptResult<T> {
        match (result, self.frames.pop()) {
            (Err(err), Some(frame)) => Err(err.with_frame(&frame.name, frame.line)),
            (result, _) => result,
        }
    }

    fn frame(&self) -> &Frame {
        // run() always pushes the module frame before evaluation starts
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    // ---- statements ----

    fn exec_block(&mut self, body: &[Stmt]) -> ScriptResult<Flow> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> ScriptResult<Flow> {
        self.frame_mut().line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::AnnAssign { target, value } => {
                if let Some(value) = value {
                    let value = self.eval(value)?;
                    self.assign(target, value)?;
                }
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test)?.truthy() { body } else { orelse };
                return self.exec_block(branch);
            }
            StmtKind::While { test, body, orelse } => {
                loop {
                    self.frame_mut().line = stmt.line;
                    if !self.eval(test)?.truthy() {
                        return self.exec_block(orelse);
                    }
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter)?;
                let mut state = iterate(&iterable)?;
                loop {
                    let Some(item) = state.next_value()? else {
                        return self.exec_block(orelse);
                    };
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass | StmtKind::Global(_) | StmtKind::Nonlocal(_) => {}
            StmtKind::FunctionDef(def) => {
                let closure = self.make_closure(def)?;
                self.store(&def.name, closure)?;
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.truthy() {
                    let message = match msg {
                        Some(expr) => self.eval(expr)?.to_str()?,
                        None => String::new(),
                    };
                    return Err(ScriptError::new(ErrorKind::AssertionError, message));
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let outcome = self.exec_try(body, handlers, orelse);
                if finalbody.is_empty() {
                    return outcome;
                }
                if matches!(&outcome, Err(err) if !err.kind.is_catchable()) {
                    return outcome;
                }
                let line = self.frame().line;
                return match self.exec_block(finalbody)? {
                    Flow::Normal => {
                        self.frame_mut().line = line;
                        outcome
                    }
                    flow => Ok(flow),
                };
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
    ) -> ScriptResult<Flow> {
        let err = match self.exec_block(body) {
            Ok(Flow::Normal) => return self.exec_block(orelse),
            Ok(flow) => return Ok(flow),
            Err(err) if err.kind.is_catchable() => err,
            Err(err) => return Err(err),
        };
        let fault_line = self.frame().line;
        for handler in handlers {
            self.frame_mut().line = handler.line;
            if !handles(handler, &err)? {
                continue;
            }
            if let Some(name) = &handler.name {
                self.store(name, Value::str(&err.message))?;
            }
            return self.exec_block(&handler.body);
        }
        self.frame_mut().line = fault_line;
        Err(err)
    }

    fn aug_assign(
        &mut self,
        target: &Target,
        op: BinOp,
        value: &Expr,
    ) -> ScriptResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.load(name)?;
                let rhs = self.eval(value)?;
                let updated = in_place(op, &current, &rhs)?;
                self.store(name, updated)
            }
            Target::Subscript(container, index) => {
                let container = self.eval(container)?;
                match index.as_ref() {
                    Index::Single(key) => {
                        let key = self.eval(key)?;
                        let current = get_item(&container, &key)?;
                        let rhs = self.eval(value)?;
                        let updated = in_place(op, &current, &rhs)?;
                        set_item(&container, &key, updated)
                    }
                    Index::Slice(lower, upper, step) => {
                        let slice = self.slice_args(lower, upper, step)?;
                        let current = get_slice(&container, &slice)?;
                        let rhs = self.eval(value)?;
                        let updated = binary_op(op, &current, &rhs)?;
                        set_slice(&container, &slice, &updated)
                    }
                }
            }
            Target::Attribute(object, attr) => {
                let object = self.eval(object)?;
                Err(ScriptError::attribute_error(object.type_name(), attr))
            }
            Target::Unpack(_) | Target::Starred(_) => Err(ScriptError::syntax(
                "illegal expression for augmented assignment",
                self.frame().line,
            )),
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> ScriptResult<()> {
        match target {
            Target::Name(name) => self.store(name, value),
            Target::Unpack(targets) => self.unpack(targets, value),
            Target::Starred(_) => Err(ScriptError::syntax(
                "starred assignment target must be in a list or tuple",
                self.frame().line,
            )),
            Target::Subscript(container, index) => {
                let container = self.eval(container)?;
                match index.as_ref() {
                    Index::Single(key) => {
                        let key = self.eval(key)?;
                        set_item(&container, &key, value)
                    }
                    Index::Slice(lower, upper, step) => {
                        let slice = self.slice_args(lower, upper, step)?;
                        set_slice(&container, &slice, &value)
                    }
                }
            }
            Target::Attribute(object, attr) => {
                let object = self.eval(object)?;
                Err(ScriptError::attribute_error(object.type_name(), attr))
            }
        }
    }

    fn unpack(&mut self, targets: &[Target], value: Value) -> ScriptResult<()> {
        let items = collect(&value).map_err(|_| {
            ScriptError::type_error(format!(
                "cannot unpack non-iterable {} object",
                value.type_name()
            ))
        })?;
        let starred = targets
            .iter()
            .position(|t| matches!(t, Target::Starred(_)));
        match starred {
            None => {
                if items.len() < targets.len() {
                    return Err(ScriptError::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(ScriptError::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
            }
            Some(star) => {
                let after = targets.len() - star - 1;
                if items.len() < targets.len() - 1 {
                    return Err(ScriptError::value_error(format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        targets.len() - 1,
                        items.len()
                    )));
                }
                let mut items = items;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(star);
                for (target, item) in targets[..star].iter().zip(items) {
                    self.assign(target, item)?;
                }
                if let Target::Starred(inner) = &targets[star] {
                    self.assign(inner, Value::list(middle))?;
                }
                for (target, item) in targets[star + 1..].iter().zip(tail) {
                    self.assign(target, item)?;
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, target: &Target) -> ScriptResult<()> {
        match target {
            Target::Name(name) => self.unbind(name),
            Target::Unpack(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
            Target::Subscript(container, index) => {
                let container = self.eval(container)?;
                match index.as_ref() {
                    Index::Single(key) => {
                        let key = self.eval(key)?;
                        del_item(&container, &key)
                    }
                    Index::Slice(lower, upper, step) => {
                        let slice = self.slice_args(lower, upper, step)?;
                        del_slice(&container, &slice)
                    }
                }
            }
            Target::Starred(_) | Target::Attribute(..) => Err(ScriptError::syntax(
                "cannot delete this expression",
                self.frame().line,
            )),
        }
    }

    // ---- names ----

    fn load(&self, name: &Ident) -> ScriptResult<Value> {
        let frame = self.frame();
        for overlay in frame.overlays.iter().rev() {
            if let Some(value) = overlay.get(name) {
                return Ok(value.clone());
            }
        }
        if !frame.is_global(name) {
            if frame.is_local(name) {
                let locals = frame.locals.as_ref().map(|scope| scope.vars.borrow().get(name).cloned());
                return locals.flatten().ok_or_else(|| {
                    ScriptError::new(
                        ErrorKind::UnboundLocalError,
                        format!(
                            "cannot access local variable '{name}' where it is not associated with a value"
                        ),
                    )
                });
            }
            if let Some(scope) = frame.env.as_ref().and_then(|env| env.owner_of(name)) {
                return scope.vars.borrow().get(name).cloned().ok_or_else(|| {
                    ScriptError::new(
                        ErrorKind::NameError,
                        format!(
                            "cannot access free variable '{name}' where it is not associated with a value in enclosing scope"
                        ),
                    )
                });
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        builtins::lookup(name)
            .map(Value::Builtin)
            .ok_or_else(|| ScriptError::name_error(name))
    }

    fn store(&mut self, name: &Ident, value: Value) -> ScriptResult<()> {
        let Self {
            frames, globals, ..
        } = self;
        let Some(frame) = frames.last_mut() else {
            globals.insert(name.clone(), value);
            return Ok(());
        };
        if let Some(overlay) = frame.overlays.last_mut() {
            overlay.insert(name.clone(), value);
            return Ok(());
        }
        if frame.is_global(name) {
            globals.insert(name.clone(), value);
            return Ok(());
        }
        if frame.is_nonlocal(name) {
            let scope = frame
                .env
                .as_ref()
                .and_then(|env| env.owner_of(name))
                .ok_or_else(|| {
                    ScriptError::syntax(
                        format!("no binding for nonlocal '{name}' found"),
                        frame.line,
                    )
                })?;
            scope.vars.borrow_mut().insert(name.clone(), value);
            return Ok(());
        }
        if let Some(locals) = &frame.locals {
            locals.vars.borrow_mut().insert(name.clone(), value);
        }
        Ok(())
    }

    fn unbind(&mut self, name: &Ident) -> ScriptResult<()> {
        let Self {
            frames, globals, ..
        } = self;
        let Some(frame) = frames.last() else {
            return Err(ScriptError::name_error(name));
        };
        let removed = if frame.is_global(name) {
            globals.remove(name).is_some()
        } else if frame.is_nonlocal(name) {
            frame
                .env
                .as_ref()
                .and_then(|env| env.owner_of(name))
                .is_some_and(|scope| scope.vars.borrow_mut().remove(name).is_some())
        } else {
            frame
                .locals
                .as_ref()
                .is_some_and(|scope| scope.vars.borrow_mut().remove(name).is_some())
        };
        if removed {
            Ok(())
        } else if frame.is_local(name) {
            Err(ScriptError::new(
                ErrorKind::UnboundLocalError,
                format!("cannot access local variable '{name}' where it is not associated with a value"),
            ))
        } else {
            Err(ScriptError::name_error(name))
        }
    }

    // ---- functions ----

    /// Environment captured by a function defined at the current point.
    fn capture_env(&self) -> Option<Rc<Scope>> {
        let frame = self.frame();
        if frame.overlays.is_empty() {
            return frame.locals.clone();
        }
        let captured = Scope::child(frame.locals.clone(), None);
        {
            let mut vars = captured.vars.borrow_mut();
            for overlay in &frame.overlays {
                vars.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        Some(captured)
    }

    fn make_closure(&mut self, def: &Rc<FunctionDef>) -> ScriptResult<Value> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr)?),
                None => None,
            });
        }
        let mut kw_defaults = Vec::with_capacity(def.kwonly.len());
        for param in &def.kwonly {
            kw_defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr)?),
                None => None,
            });
        }
        Ok(Value::Function(Rc::new(Closure {
            def: def.clone(),
            defaults,
            kw_defaults,
            env: self.capture_env(),
        })))
    }

    fn call_value(&mut self, func: &Value, args: Vec<Value>, kwargs: Kwargs) -> ScriptResult<Value> {
        match func {
            Value::Builtin(builtin) => builtins::call(*builtin, args, kwargs, self),
            Value::Method(method) => methods::call(method, args, kwargs, self),
            Value::Function(closure) => self.call_function(closure, args, kwargs),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        closure: &Rc<Closure>,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> ScriptResult<Value> {
        if self.frames.len() >= self.recursion_limit {
            return Err(ScriptError::new(
                ErrorKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let def = &closure.def;
        let locals = Scope::child(closure.env.clone(), Some(def.clone()));
        self.bind_arguments(closure, args, kwargs, &locals)?;

        self.frames.push(Frame {
            name: def.name.clone(),
            def: Some(def.clone()),
            locals: Some(locals),
            env: closure.env.clone(),
            overlays: Vec::new(),
            line: def.line,
        });
        let result = self.exec_block(&def.body);
        match self.leave_frame(result)? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn bind_arguments(
        &self,
        closure: &Closure,
        args: Vec<Value>,
        kwargs: Kwargs,
        locals: &Scope,
    ) -> ScriptResult<()> {
        let def = &closure.def;
        let name = &def.name;
        let mut slots: Vec<Option<Value>> = vec![None; def.params.len()];
        let mut kw_slots: Vec<Option<Value>> = vec![None; def.kwonly.len()];
        let given = args.len();
        let mut extra = Vec::new();
        for (i, value) in args.into_iter().enumerate() {
            match slots.get_mut(i) {
                Some(slot) => *slot = Some(value),
                None => extra.push(value),
            }
        }
        if !extra.is_empty() && def.vararg.is_none() {
            let required = closure.defaults.iter().filter(|d| d.is_none()).count();
            let total = def.params.len();
            let takes = if required == total {
                format!("{total} positional argument{}", plural(total))
            } else {
                format!("from {required} to {total} positional arguments")
            };
            let were = if given == 1 { "was" } else { "were" };
            return Err(ScriptError::type_error(format!(
                "{name}() takes {takes} but {given} {were} given"
            )));
        }

        let mut kwarg_dict = Dict::new();
        for (key, value) in kwargs {
            if let Some(i) = def.params.iter().position(|p| p.name == key) {
                if slots[i].is_some() {
                    return Err(ScriptError::type_error(format!(
                        "{name}() got multiple values for argument '{key}'"
                    )));
                }
                slots[i] = Some(value);
            } else if let Some(i) = def.kwonly.iter().position(|p| p.name == key) {
                kw_slots[i] = Some(value);
            } else if def.kwarg.is_some() {
                kwarg_dict.insert(Value::Str(key), value)?;
            } else {
                return Err(ScriptError::type_error(format!(
                    "{name}() got an unexpected keyword argument '{key}'"
                )));
            }
        }

        let mut vars = locals.vars.borrow_mut();
        let mut missing = Vec::new();
        for ((param, slot), default) in def.params.iter().zip(slots).zip(&closure.defaults) {
            match slot.or_else(|| default.clone()) {
                Some(value) => {
                    vars.insert(param.name.clone(), value);
                }
                None => missing.push(param.name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(missing_arguments(name, "positional", &missing));
        }
        for ((param, slot), default) in def.kwonly.iter().zip(kw_slots).zip(&closure.kw_defaults) {
            match slot.or_else(|| default.clone()) {
                Some(value) => {
                    vars.insert(param.name.clone(), value);
                }
                None => missing.push(param.name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(missing_arguments(name, "keyword-only", &missing));
        }
        if let Some(vararg) = &def.vararg {
            vars.insert(vararg.clone(), Value::tuple(extra));
        }
        if let Some(kwarg) = &def.kwarg {
            vars.insert(kwarg.clone(), Value::dict(kwarg_dict));
        }
        Ok(())
    }

    fn eval_call(&mut self, func: &Expr, args: &[Arg], line: usize) -> ScriptResult<Value> {
        let callee = self.eval(func)?;
        let mut positional = Vec::with_capacity(args.len());
        let mut keywords: Kwargs = Vec::new();
        for arg in args {
            match arg {
                Arg::Positional(expr) => positional.push(self.eval(expr)?),
                Arg::Star(expr) => {
                    let value = self.eval(expr)?;
                    let items = collect(&value).map_err(|_| {
                        ScriptError::type_error(format!(
                            "argument after * must be an iterable, not {}",
                            value.type_name()
                        ))
                    })?;
                    positional.extend(items);
                }
                Arg::Keyword(key, expr) => {
                    let value = self.eval(expr)?;
                    push_keyword(&mut keywords, key.clone(), value)?;
                }
                Arg::DoubleStar(expr) => {
                    let value = self.eval(expr)?;
                    let Value::Dict(dict) = &value else {
                        return Err(ScriptError::type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            value.type_name()
                        )));
                    };
                    let items = dict.borrow().items();
                    for (key, value) in items {
                        let Value::Str(key) = key else {
                            return Err(ScriptError::type_error("keywords must be strings"));
                        };
                        push_keyword(&mut keywords, key, value)?;
                    }
                }
            }
        }
        self.frame_mut().line = line;
        self.call_value(&callee, positional, keywords)
    }

    // ---- expressions ----

    fn eval(&mut self, expr: &Expr) -> ScriptResult<Value> {
        match &expr.kind {
            ExprKind::None => Ok(Value::None),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Int(i) => Ok(Value::Int(*i)),
            ExprKind::Float(f) => Ok(Value::Float(*f)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::FString(parts) => self.render_fstring(parts).map(|s| Value::str(&s)),
            ExprKind::Name(name) => self.load(name),
            ExprKind::List(items) => self.eval_items(items).map(Value::list),
            ExprKind::Tuple(items) => self.eval_items(items).map(Value::tuple),
            ExprKind::Dict(items) => {
                let mut dict = Dict::new();
                for item in items {
                    match item {
                        DictItem::Pair(key, value) => {
                            let key = self.eval(key)?;
                            let value = self.eval(value)?;
                            dict.insert(key, value)?;
                        }
                        DictItem::Unpack(source) => {
                            let source = self.eval(source)?;
                            if !matches!(source, Value::Dict(_)) {
                                return Err(ScriptError::type_error(format!(
                                    "'{}' object is not a mapping",
                                    source.type_name()
                                )));
                            }
                            update_dict(&mut dict, &source)?;
                        }
                    }
                }
                Ok(Value::dict(dict))
            }
            ExprKind::Starred(_) => Err(ScriptError::syntax(
                "can't use starred expression here",
                expr.line,
            )),
            ExprKind::BinOp(left, op, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary_op(*op, &left, &right)
            }
            ExprKind::Unary(op, operand) => {
                let operand = self.eval(operand)?;
                unary_op(*op, &operand)
            }
            ExprKind::BoolOp(op, values) => {
                let mut last = Value::None;
                for value in values {
                    last = self.eval(value)?;
                    let decided = match op {
                        BoolOp::And => !last.truthy(),
                        BoolOp::Or => last.truthy(),
                    };
                    if decided {
                        break;
                    }
                }
                Ok(last)
            }
            ExprKind::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            ExprKind::Lambda(def) => self.make_closure(def),
            ExprKind::Call { func, args } => self.eval_call(func, args, expr.line),
            ExprKind::Attribute(object, attr) => {
                let object = self.eval(object)?;
                methods::bind(&object, attr)
            }
            ExprKind::Subscript(container, index) => {
                let container = self.eval(container)?;
                match index.as_ref() {
                    Index::Single(key) => {
                        let key = self.eval(key)?;
                        get_item(&container, &key)
                    }
                    Index::Slice(lower, upper, step) => {
                        let slice = self.slice_args(lower, upper, step)?;
                        get_slice(&container, &slice)
                    }
                }
            }
            ExprKind::ListComp { elt, generators } => {
                let mut out = Vec::new();
                self.comprehend(generators, &mut |interp| {
                    let item = interp.eval(elt)?;
                    check_len(Some(out.len() + 1))?;
                    out.push(item);
                    Ok(())
                })?;
                Ok(Value::list(out))
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                let mut dict = Dict::new();
                self.comprehend(generators, &mut |interp| {
                    let k = interp.eval(key)?;
                    let v = interp.eval(value)?;
                    check_len(Some(dict.len() + 1))?;
                    dict.insert(k, v)
                })?;
                Ok(Value::dict(dict))
            }
            ExprKind::GenExp { elt, generators } => {
                let mut out = Vec::new();
                self.comprehend(generators, &mut |interp| {
                    let item = interp.eval(elt)?;
                    check_len(Some(out.len() + 1))?;
                    out.push(item);
                    Ok(())
                })?;
                let state = IterState::Items(out.into_iter());
                Ok(Value::Iter(Rc::new(RefCell::new(IterObj::new(
                    "generator",
                    state,
                )))))
            }
        }
    }

    fn eval_items(&mut self, items: &[Expr]) -> ScriptResult<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if let ExprKind::Starred(inner) = &item.kind {
                let value = self.eval(inner)?;
                let extra = collect(&value)?;
                check_len(out.len().checked_add(extra.len()))?;
                out.extend(extra);
            } else {
                out.push(self.eval(item)?);
            }
        }
        Ok(out)
    }

    fn slice_args(
        &mut self,
        lower: &Option<Expr>,
        upper: &Option<Expr>,
        step: &Option<Expr>,
    ) -> ScriptResult<SliceArgs> {
        let mut bound = |expr: &Option<Expr>| -> ScriptResult<Option<Value>> {
            expr.as_ref().map(|e| self.eval(e)).transpose()
        };
        let lower = bound(lower)?;
        let upper = bound(upper)?;
        let step = bound(step)?;
        SliceArgs::from_values(lower, upper, step)
    }

    fn render_fstring(&mut self, parts: &[FPart]) -> ScriptResult<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                FPart::Literal(text) => out.push_str(text),
                FPart::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr)?;
                    let value = match conversion {
                        Some('r' | 'a') => Value::str(&value.repr()?),
                        Some(_) => Value::str(&value.to_str()?),
                        None => value,
                    };
                    let spec = self.render_fstring(spec)?;
                    out.push_str(&format_value(&value, &spec)?);
                }
            }
        }
        Ok(out)
    }

    /// Drive nested comprehension loops, calling `sink` once per produced
    /// element. The first iterable is evaluated in the enclosing scope.
    fn comprehend(
        &mut self,
        generators: &[Comprehension],
        sink: &mut dyn FnMut(&mut Self) -> ScriptResult<()>,
    ) -> ScriptResult<()> {
        let Some(first) = generators.first() else {
            return Ok(());
        };
        let iterable = self.eval(&first.iter)?;
        self.frame_mut().overlays.push(HashMap::new());
        let result = self.comprehend_level(generators, 0, iterable, sink);
        self.frame_mut().overlays.pop();
        result
    }

    fn comprehend_level(
        &mut self,
        generators: &[Comprehension],
        level: usize,
        iterable: Value,
        sink: &mut dyn FnMut(&mut Self) -> ScriptResult<()>,
    ) -> ScriptResult<()> {
        let generator = &generators[level];
        let mut state = iterate(&iterable)?;
        while let Some(item) = state.next_value()? {
            self.assign(&generator.target, item)?;
            let mut keep = true;
            for condition in &generator.ifs {
                if !self.eval(condition)?.truthy() {
                    keep = false;
                    break;
                }
            }
            if !keep {
                continue;
            }
            match generators.get(level + 1) {
                Some(next) => {
                    let inner = self.eval(&next.iter)?;
                    self.comprehend_level(generators, level + 1, inner, sink)?;
                }
                None => sink(self)?,
            }
        }
        Ok(())
    }
}

impl Host for Interpreter {
    fn call(&mut self, func: &Value, args: Vec<Value>) -> ScriptResult<Value> {
        self.call_value(func, args, Vec::new())
    }

    fn write(&mut self, text: &str) -> ScriptResult<()> {
        let room = self.max_output_bytes.saturating_sub(self.output.len());
        if text.len() <= room {
            self.output.push_str(text);
            return Ok(());
        }
        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.output.push_str(&text[..cut]);
        Err(ScriptError::new(
            ErrorKind::OutputLimitError,
            format!("output exceeds {} bytes", self.max_output_bytes),
        ))
    }
}

/// `+=` on a list extends it in place; everything else rebinds.
fn in_place(op: BinOp, current: &Value, rhs: &Value) -> ScriptResult<Value> {
    if let (BinOp::Add, Value::List(items)) = (op, current) {
        extend_list(items, collect(rhs)?)?;
        return Ok(current.clone());
    }
    binary_op(op, current, rhs)
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn push_keyword(keywords: &mut Kwargs, key: Ident, value: Value) -> ScriptResult<()> {
    if keywords.iter().any(|(existing, _)| *existing == key) {
        return Err(ScriptError::type_error(format!(
            "got multiple values for keyword argument '{key}'"
        )));
    }
    keywords.push((key, value));
    Ok(())
}

fn missing_arguments(function: &str, kind: &str, names: &[Ident]) -> ScriptError {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    let listed = match quoted.as_slice() {
        [one] => one.clone(),
        [first, second] => format!("{first} and {second}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
        [] => String::new(),
    };
    ScriptError::type_error(format!(
        "{function}() missing {} required {kind} argument{}: {listed}",
        names.len(),
        plural(names.len())
    ))
}

/// Whether an `except` clause intercepts `err`. Naming an unknown class is
/// itself a `NameError`, as it would be when the clause is evaluated.
fn handles(handler: &ExceptHandler, err: &ScriptError) -> ScriptResult<bool> {
    if handler.classes.is_empty() {
        return Ok(true);
    }
    let mut caught = false;
    for class in &handler.classes {
        caught |= err
            .kind
            .caught_by(class)
            .ok_or_else(|| ScriptError::name_error(class))?;
    }
    Ok(caught)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restricted::parser::parse;

    fn run(source: &str) -> (String, Option<ScriptError>) {
        let module = parse(source).unwrap();
        let mut interp = Interpreter::new(1 << 20, 1000);
        let result = interp.run(&module);
        (interp.into_output(), result.err())
    }

    fn output(source: &str) -> String {
        let (out, err) = run(source);
        if let Some(err) = err {
            panic!("unexpected fault: {}", err.render(source));
        }
        out
    }

    fn fault(source: &str) -> ScriptError {
        run(source).1.expect("expected a fault")
    }

    #[test]
    fn recursive_fibonacci() {
        let source = "def fib(n):\n    return n if n < 2 else fib(n - 1) + fib(n - 2)\n\
                      print([fib(i) for i in range(10)])\n";
        assert_eq!(output(source), "[0, 1, 1, 2, 3, 5, 8, 13, 21, 34]\n");
    }

    #[test]
    fn loops_with_else_and_break() {
        let source = "for i in range(3):\n    if i == 5:\n        break\nelse:\n    print('done')\n\
                      n = 0\nwhile True:\n    n += 1\n    if n > 3:\n        break\nprint(n)\n";
        assert_eq!(output(source), "done\n4\n");
    }

    #[test]
    fn closures_and_nonlocal() {
        let source = "def counter():\n    count = 0\n    def bump():\n        nonlocal count\n        count += 1\n        return count\n    return bump\n\
                      c = counter()\nc()\nprint(c(), c())\n";
        assert_eq!(output(source), "2 3\n");
    }

    #[test]
    fn global_declaration_rebinds_module_name() {
        let source = "total = 0\ndef add(x):\n    global total\n    total += x\nadd(2)\nadd(3)\nprint(total)\n";
        assert_eq!(output(source), "5\n");
    }

    #[test]
    fn unbound_local_is_reported() {
        let err = fault("x = 1\ndef f():\n    print(x)\n    x = 2\nf()\n");
        assert_eq!(err.kind, ErrorKind::UnboundLocalError);
        assert_eq!(err.traceback[0].function, "f");
        assert_eq!(err.traceback[0].line, 3);
        assert_eq!(err.traceback[1].function, "<module>");
        assert_eq!(err.traceback[1].line, 5);
    }

    #[test]
    fn argument_binding() {
        let source = "def f(a, b=2, *rest, key=None, **extra):\n    return (a, b, rest, key, extra)\n\
                      print(f(1))\nprint(f(1, 3, 4, 5, key='k', other=1))\nprint(f(*[7, 8], **{'key': 9}))\n";
        assert_eq!(
            output(source),
            "(1, 2, (), None, {})\n(1, 3, (4, 5), 'k', {'other': 1})\n(7, 8, (), 9, {})\n"
        );
        let err = fault("def f(a, b):\n    pass\nf(1)\n");
        assert_eq!(err.message, "f() missing 1 required positional argument: 'b'");
        let err = fault("def f(a):\n    pass\nf(1, 2)\n");
        assert_eq!(err.message, "f() takes 1 positional argument but 2 were given");
        let err = fault("def f(a):\n    pass\nf(1, a=2)\n");
        assert_eq!(err.message, "f() got multiple values for argument 'a'");
    }

    #[test]
    fn unpacking_assignment() {
        let source = "a, *b, c = range(5)\nprint(a, b, c)\nx, y = y, x = 1, 2\nprint(x, y)\n";
        assert_eq!(output(source), "0 [1, 2, 3] 4\n2 1\n");
        let err = fault("a, b = [1]\n");
        assert_eq!(err.message, "not enough values to unpack (expected 2, got 1)");
    }

    #[test]
    fn comprehensions_do_not_leak_variables() {
        let source = "i = 'outer'\nsquares = {i: i * i for i in range(4) if i % 2 == 0}\n\
                      pairs = [(i, j) for i in range(2) for j in range(i)]\nprint(squares, pairs, i)\n";
        assert_eq!(output(source), "{0: 0, 2: 4} [(1, 0)] outer\n");
    }

    #[test]
    fn lambda_sort_key_and_generator_argument() {
        let source = "words = ['ccc', 'a', 'bb']\nwords.sort(key=lambda w: len(w))\n\
                      print(words, sum(len(w) for w in words))\n";
        assert_eq!(output(source), "['a', 'bb', 'ccc'] 6\n");
    }

    #[test]
    fn fstring_formatting() {
        let source = "x = 3.14159\nname = 'pi'\nprint(f'{name!r}={x:.2f} {x=}')\n";
        assert_eq!(output(source), "'pi'=3.14 x=3.14159\n");
    }

    #[test]
    fn list_augmented_add_mutates_in_place() {
        let source = "a = [1]\nb = a\na += [2]\nprint(b)\n";
        assert_eq!(output(source), "[1, 2]\n");
    }

    #[test]
    fn recursion_limit_is_enforced() {
        let source = "def down(n):\n    return down(n + 1)\ndown(0)\n";
        let module = parse(source).unwrap();
        let mut interp = Interpreter::new(1024, 20);
        let err = interp.run(&module).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecursionError);
        assert_eq!(err.traceback.len(), 20);
        let text = err.render(source);
        assert!(text.contains("[Previous line repeated 16 more times]"));
    }

    #[test]
    fn unknown_names_are_name_errors() {
        for name in ["open", "eval", "__import__", "getattr", "__name__"] {
            let err = fault(&format!("{name}\n"));
            assert_eq!(err.kind, ErrorKind::NameError, "{name}");
        }
    }

    #[test]
    fn output_limit_keeps_partial_text() {
        let module = parse("for i in range(100):\n    print('abcdefghij')\n").unwrap();
        let mut interp = Interpreter::new(25, 1000);
        let err = interp.run(&module).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutputLimitError);
        assert_eq!(interp.output(), "abcdefghij\nabcdefghij\nabc");
    }

    #[test]
    fn assertion_and_deletion() {
        let err = fault("x = 1\ndel x\nprint(x)\n");
        assert_eq!(err.message, "name 'x' is not defined");
        let err = fault("assert 1 == 2, 'nope'\n");
        assert_eq!(err.summary(), "AssertionError: nope");
        let source = "d = {'a': 1, 'b': 2}\ndel d['a']\nl = [0, 1, 2, 3]\ndel l[::2]\nprint(d, l)\n";
        assert_eq!(output(source), "{'b': 2} [1, 3]\n");
    }

    #[test]
    fn try_runs_handler_else_and_finally() {
        let source = "def safe_div(a, b):\n    try:\n        q = a // b\n    except ZeroDivisionError as err:\n        print('caught', err)\n        return None\n    else:\n        print('ok')\n        return q\n    finally:\n        print('cleanup')\n\
                      print(safe_div(7, 2))\nprint(safe_div(1, 0))\n";
        assert_eq!(
            output(source),
            "ok\ncleanup\n3\ncaught integer division or modulo by zero\ncleanup\nNone\n"
        );
    }

    #[test]
    fn except_clauses_match_by_class() {
        let source = "try:\n    [][1]\nexcept (KeyError, ValueError):\n    print('wrong')\nexcept LookupError:\n    print('lookup')\n\
                      try:\n    undefined\nexcept:\n    print('bare')\n\
                      for i in range(5):\n    try:\n        if i == 2:\n            break\n    finally:\n        print(i)\n";
        assert_eq!(output(source), "lookup\nbare\n0\n1\n2\n");
    }

    #[test]
    fn unmatched_faults_propagate_after_finally() {
        let (out, err) = run("try:\n    x = 1\n    {}['k']\nexcept TypeError:\n    pass\nfinally:\n    print('done')\n");
        let err = err.expect("expected a fault");
        assert_eq!(out, "done\n");
        assert_eq!(err.kind, ErrorKind::KeyError);
        assert_eq!(err.traceback[0].function, "<module>");
        assert_eq!(err.traceback[0].line, 3);
    }

    #[test]
    fn finally_flow_overrides_the_outcome() {
        let source = "def f():\n    try:\n        return 1\n    finally:\n        return 2\n\
                      def g():\n    try:\n        1 / 0\n    finally:\n        return 'swallowed'\nprint(f(), g())\n";
        assert_eq!(output(source), "2 swallowed\n");
    }

    #[test]
    fn unknown_except_class_is_a_name_error_only_when_reached() {
        let err = fault("try:\n    1 / 0\nexcept Bogus:\n    pass\n");
        assert_eq!(err.kind, ErrorKind::NameError);
        assert_eq!(err.message, "name 'Bogus' is not defined");
        assert_eq!(output("try:\n    pass\nexcept Bogus:\n    pass\nprint('fine')\n"), "fine\n");
    }

    #[test]
    fn output_limit_cannot_be_caught() {
        let module = parse(
            "try:\n    for i in range(100):\n        print('abcdefghij')\nexcept Exception:\n    pass\nfinally:\n    x = 1\n",
        )
        .unwrap();
        let mut interp = Interpreter::new(25, 1000);
        let err = interp.run(&module).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutputLimitError);
    }
}
