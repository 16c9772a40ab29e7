//! Tree-walking interpreter for Noir
//!
//! Executes a program that has already passed the checker. Values are
//! converted to the declared type of every slot they are stored into
//! (variables, parameters, fields, elements, return values), so numeric
//! widening and `empty` behave the same at run time as the checker assumed.
//!
//! Each `async func` call runs on its own task with its own interpreter and
//! its own copy of the bindings it can reach. Tasks share the type registry,
//! the [`Runtime`] and the shared resources it owns.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::ast::{
    AccessMode, Arg, BinaryOp, EnumDecl, Expr, FuncDecl, LogicalOp, MatchArm, Pattern, Program,
    Stmt, StructDecl, TypeExpr, UnaryOp,
};
use crate::environment::{Environment, ScopeCopies};
use crate::error::{ErrorKind, NoirError, Result, Stage};
use crate::methods;
use crate::runtime::{GrabGuard, Runtime, SharedResource, TaskId, MAIN_TASK};
use crate::types::{self, Type};
use crate::value::{Closure, Slot, Value};

/// Maximum call depth
const FRAMES_MAX: usize = 256;

/// Where `print` writes
#[derive(Debug, Clone, Default)]
pub enum Output {
    #[default]
    Stdout,
    /// Collect printed lines instead of writing them
    Capture(Arc<Mutex<Vec<String>>>),
}

impl Output {
    /// A capturing output and the buffer it fills
    pub fn capture() -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        (Output::Capture(Arc::clone(&lines)), lines)
    }

    fn emit(&self, line: String) {
        match self {
            Output::Stdout => println!("{}", line),
            Output::Capture(lines) => lines.lock().push(line),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InterpreterOptions {
    /// Report task, grab and await events on stderr
    pub trace: bool,
    pub output: Output,
}

#[derive(Debug, Clone)]
struct FieldDef {
    name: String,
    ty: Type,
    default: Option<Expr>,
}

/// A struct after composing in its base type
#[derive(Debug, Clone, Default)]
struct StructDef {
    fields: Vec<FieldDef>,
    methods: HashMap<String, Arc<FuncDecl>>,
}

#[derive(Debug, Default)]
struct EnumDef {
    variants: IndexMap<String, Vec<Type>>,
    methods: HashMap<String, Arc<FuncDecl>>,
}

/// Declared types, shared by every task
#[derive(Debug, Default)]
struct Registry {
    types: HashMap<String, Type>,
    structs: HashMap<String, Arc<StructDef>>,
    enums: HashMap<String, Arc<EnumDef>>,
}

impl Registry {
    fn resolve(&self, expr: &TypeExpr) -> Result<Type> {
        types::resolve(expr, &|name| self.types.get(name).cloned())
    }

    fn field_type(&self, struct_name: &str, field: &str) -> Type {
        self.structs
            .get(struct_name)
            .and_then(|def| def.fields.iter().find(|f| f.name == field))
            .map_or(Type::Void, |f| f.ty.clone())
    }

    /// User-defined method for a struct or enum value
    fn method(&self, value: &Value, name: &str) -> Option<Arc<FuncDecl>> {
        match value {
            Value::Struct { name: type_name, .. } => {
                self.structs.get(type_name)?.methods.get(name).cloned()
            }
            Value::Enum { enum_name, .. } => self.enums.get(enum_name)?.methods.get(name).cloned(),
            _ => None,
        }
    }

    fn struct_def(&self, decl: &StructDecl) -> Result<StructDef> {
        let mut def = match &decl.base {
            Some(base) => match self.structs.get(base) {
                Some(base) => (**base).clone(),
                None => return Err(runtime_error(format!("unknown base type '{}'", base))),
            },
            None => StructDef::default(),
        };
        for field in &decl.fields {
            def.fields.push(FieldDef {
                name: field.name.clone(),
                ty: self.resolve(&field.ty)?,
                default: field.default.clone(),
            });
        }
        for method in &decl.methods {
            def.methods.insert(method.name.clone(), Arc::clone(method));
        }
        Ok(def)
    }

    fn enum_def(&self, decl: &EnumDecl) -> Result<EnumDef> {
        let mut def = EnumDef::default();
        for variant in &decl.variants {
            let payload = variant
                .fields
                .iter()
                .map(|p| self.resolve(&p.ty))
                .collect::<Result<Vec<_>>>()?;
            def.variants.insert(variant.name.clone(), payload);
        }
        for method in &decl.methods {
            def.methods.insert(method.name.clone(), Arc::clone(method));
        }
        Ok(def)
    }
}

/// Control flow signal from statement execution
enum Flow {
    Normal,
    Return(Value),
}

/// One step from a variable into the storage it contains
enum Segment {
    Field(String),
    Index(Value),
}

/// A storage location: a variable plus field/element steps
struct Place {
    root: String,
    segments: Vec<Segment>,
}

fn runtime_error(msg: String) -> NoirError {
    NoirError::new(ErrorKind::RuntimeError(msg), None)
}

/// Follow `segments` from a variable's value down to the addressed slot,
/// tracking the declared type along the way
fn navigate<'v>(
    mut value: &'v mut Value,
    mut ty: Type,
    segments: &[Segment],
    registry: &Registry,
) -> Result<(&'v mut Value, Type)> {
    for segment in segments {
        let current = value;
        value = match segment {
            Segment::Field(field) => match current {
                Value::Struct { name, fields } => {
                    ty = registry.field_type(name, field);
                    fields.get_mut(field).ok_or_else(|| {
                        NoirError::new(ErrorKind::MissingMember(format!("{}.{}", name, field)), None)
                    })?
                }
                other => {
                    return Err(runtime_error(format!(
                        "cannot assign to field '{}' of {}",
                        field,
                        other.type_name()
                    )))
                }
            },
            Segment::Index(index) => {
                ty = match &ty {
                    Type::Array(t) => (**t).clone(),
                    Type::Dict(_, v) => (**v).clone(),
                    _ => Type::Void,
                };
                methods::index_mut(current, index)?
            }
        };
    }
    Ok((value, ty))
}

/// The interpreter
pub struct Interpreter {
    globals: Environment,
    env: Environment,
    registry: Arc<RwLock<Registry>>,
    runtime: Runtime,
    task: TaskId,
    /// Active grabs of this task, innermost last
    grabs: Vec<GrabGuard>,
    depth: usize,
    options: InterpreterOptions,
}

impl Interpreter {
    pub fn new(options: InterpreterOptions) -> Self {
        let globals = Environment::new();
        Self {
            env: globals.clone(),
            globals,
            registry: Arc::new(RwLock::new(Registry::default())),
            runtime: Runtime::new(options.trace),
            task: MAIN_TASK,
            grabs: Vec::new(),
            depth: 0,
            options,
        }
    }

    /// Run a program to completion, including every task it starts.
    /// The first fatal error of any task is returned. Calling this again
    /// continues in the same global scope (used by the REPL).
    pub fn execute(&mut self, program: &Program) -> Result<()> {
        let result = self.run_program(program);
        self.grabs.clear();
        self.env = self.globals.clone();
        self.depth = 0;
        if let Err(err) = result {
            self.runtime.fail(err);
        }
        self.runtime.join_all()
    }

    /// Current value of a global variable
    pub fn global(&self, name: &str) -> Option<Value> {
        match self.globals.lookup(name)?.value {
            Value::Resource(resource) => Some(resource.read()),
            value => Some(value),
        }
    }

    fn run_program(&mut self, program: &Program) -> Result<()> {
        self.declare_types(&program.statements)?;
        self.run_stmts(&program.statements)?;
        Ok(())
    }

    fn declare_types(&mut self, stmts: &[Stmt]) -> Result<()> {
        let mut registry = self.registry.write();
        let mut pending: Vec<&Arc<StructDecl>> = Vec::new();
        for stmt in stmts {
            match stmt {
                Stmt::Struct(decl) => {
                    registry.types.insert(decl.name.clone(), Type::Struct(decl.name.clone()));
                    pending.push(decl);
                }
                Stmt::Enum(decl) => {
                    registry.types.insert(decl.name.clone(), Type::Enum(decl.name.clone()));
                }
                Stmt::Protocol(decl) => {
                    registry.types.insert(decl.name.clone(), Type::Protocol(decl.name.clone()));
                }
                _ => {}
            }
        }

        for stmt in stmts {
            if let Stmt::Enum(decl) = stmt {
                let def = registry.enum_def(decl)?;
                registry.enums.insert(decl.name.clone(), Arc::new(def));
            }
        }

        // bases before the classes composed from them
        while !pending.is_empty() {
            let before = pending.len();
            let mut waiting = Vec::new();
            for decl in pending {
                match &decl.base {
                    Some(base) if !registry.structs.contains_key(base) => waiting.push(decl),
                    _ => {
                        let def = registry.struct_def(decl)?;
                        registry.structs.insert(decl.name.clone(), Arc::new(def));
                    }
                }
            }
            if waiting.len() == before {
                return Err(runtime_error(format!(
                    "cannot resolve the base of '{}'",
                    waiting[0].name
                )));
            }
            pending = waiting;
        }
        Ok(())
    }

    fn resolve(&self, ty: &TypeExpr) -> Result<Type> {
        self.registry.read().resolve(ty)
    }

    fn trace(&self, message: impl AsRef<str>) {
        self.runtime.trace(self.task, message);
    }

    // ==================== Statements ====================

    /// Execute statements in the current scope, hoisting its functions
    fn run_stmts(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        for stmt in stmts {
            if let Stmt::Func(decl) = stmt {
                self.define_function(decl)?;
            }
        }
        for stmt in stmts {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    /// Execute a block in `env`, restoring the current scope afterwards
    fn execute_block(&mut self, stmts: &[Stmt], env: Environment) -> Result<Flow> {
        let previous = std::mem::replace(&mut self.env, env);
        let result = self.run_stmts(stmts);
        self.env = previous;
        result
    }

    fn scoped(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        let env = Environment::with_parent(&self.env);
        self.execute_block(stmts, env)
    }

    fn define_function(&mut self, decl: &Arc<FuncDecl>) -> Result<()> {
        let params = decl
            .params
            .iter()
            .map(|p| self.resolve(&p.ty))
            .collect::<Result<Vec<_>>>()?;
        let ret = self.return_type(decl)?;
        let closure = Closure {
            decl: Arc::clone(decl),
            env: self.env.clone(),
        };
        self.env.define(
            decl.name.clone(),
            Slot::new(Value::Function(Arc::new(closure)), Type::Func(params, Box::new(ret))),
        );
        Ok(())
    }

    fn return_type(&self, decl: &FuncDecl) -> Result<Type> {
        match &decl.return_type {
            Some(ty) => self.resolve(ty),
            None => Ok(Type::Void),
        }
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow> {
        self.statement(stmt).map_err(|err| err.or_span(stmt.span()))
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Expr { expr } => {
                self.eval(expr)?;
            }

            Stmt::VarDecl { name, ty, value, .. } => {
                let ty = self.resolve(ty)?;
                let value = self.eval(value)?.coerce(&ty);
                self.env.define(name.clone(), Slot::new(value, ty));
            }

            Stmt::SharedDecl { name, ty, value, .. } => {
                let ty = self.resolve(ty)?;
                let value = self.eval(value)?.coerce(&ty);
                let resource = self.runtime.declare(name, value)?;
                self.env.define(name.clone(), Slot::new(Value::Resource(resource), ty));
            }

            Stmt::Assign { target, value, .. } => {
                let value = self.eval(value)?;
                let place = self.place(target)?;
                self.update_place(&place, |slot, ty| {
                    *slot = value.coerce(ty);
                    Ok(())
                })?;
            }

            Stmt::If { branches, else_branch, .. } => {
                for (condition, body) in branches {
                    if self.eval(condition)?.as_bool()? {
                        return self.scoped(body);
                    }
                }
                if let Some(body) = else_branch {
                    return self.scoped(body);
                }
            }

            Stmt::For { var, start, end, step, inclusive, body, .. } => {
                let start = self.eval(start)?.as_int()?;
                let end = self.eval(end)?.as_int()?;
                let step = match step {
                    Some(step) => self.eval(step)?.as_int()?,
                    None => 1,
                };
                if step == 0 {
                    return Err(NoirError::new(ErrorKind::ZeroStep, None));
                }

                let mut i = start;
                loop {
                    let in_range = match (step > 0, *inclusive) {
                        (true, true) => i <= end,
                        (true, false) => i < end,
                        (false, true) => i >= end,
                        (false, false) => i > end,
                    };
                    if !in_range {
                        break;
                    }
                    let env = Environment::with_parent(&self.env);
                    env.define(var.clone(), Slot::new(Value::Int(i), Type::Int));
                    if let Flow::Return(value) = self.execute_block(body, env)? {
                        return Ok(Flow::Return(value));
                    }
                    i = match i.checked_add(step) {
                        Some(next) => next,
                        None => break,
                    };
                }
            }

            Stmt::ForEach { var, iterable, body, .. } => {
                let items = methods::iterate(&self.eval(iterable)?)?;
                for item in items {
                    let env = Environment::with_parent(&self.env);
                    let ty = item.type_of();
                    env.define(var.clone(), Slot::new(item, ty));
                    if let Flow::Return(value) = self.execute_block(body, env)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }

            Stmt::While { condition, body, .. } => {
                while self.eval(condition)?.as_bool()? {
                    if let Flow::Return(value) = self.scoped(body)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }

            // hoisted by run_stmts / declare_types
            Stmt::Func(_) | Stmt::Struct(_) | Stmt::Enum(_) | Stmt::Protocol(_) => {}

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(value) => self.eval(value)?,
                    None => Value::Void,
                };
                return Ok(Flow::Return(value));
            }

            Stmt::Print { args, .. } => {
                let mut parts = Vec::with_capacity(args.len());
                for arg in args {
                    parts.push(self.eval(arg)?.to_string());
                }
                self.options.output.emit(parts.join(" "));
            }

            Stmt::Match { subject, arms, .. } => return self.match_stmt(subject, arms),

            Stmt::Grab { resources, mode, body, .. } => {
                let mut targets = Vec::with_capacity(resources.len());
                for (name, span) in resources {
                    match self.env.get(name).map_err(|e| e.or_span(*span))?.value {
                        Value::Resource(resource) => targets.push(resource),
                        _ => {
                            return Err(NoirError::new(
                                ErrorKind::RuntimeError(format!("'{}' is not a shared resource", name)),
                                Some(*span),
                            ))
                        }
                    }
                }
                let guard = self.runtime.grab(self.task, targets, *mode, &self.grabs)?;
                self.grabs.push(guard);
                let result = self.scoped(body);
                self.grabs.pop();
                return result;
            }

            Stmt::Await { condition, body, .. } => {
                while !self.eval(condition)?.as_bool()? {
                    self.runtime.wait_for_change(&mut self.grabs)?;
                }
                return self.scoped(body);
            }

            Stmt::Within { body, catch_name, handler, .. } => {
                return match self.scoped(body) {
                    Err(err) if err.stage() == Stage::Runtime && err.kind != ErrorKind::Aborted => {
                        let env = Environment::with_parent(&self.env);
                        if let Some(name) = catch_name {
                            env.define(
                                name.clone(),
                                Slot::new(Value::Str(err.catch_message()), Type::String),
                            );
                        }
                        self.execute_block(handler, env)
                    }
                    result => result,
                };
            }

            Stmt::Raise { value, .. } => {
                let message = self.eval(value)?.to_string();
                return Err(NoirError::new(ErrorKind::Raised(message), None));
            }
        }
        Ok(Flow::Normal)
    }

    fn match_stmt(&mut self, subject: &Expr, arms: &[MatchArm]) -> Result<Flow> {
        let (enum_name, variant, payload) = match self.eval(subject)? {
            Value::Enum { enum_name, variant, payload } => (enum_name, variant, payload),
            other => {
                return Err(runtime_error(format!(
                    "match requires an enum value, got {}",
                    other.type_name()
                )))
            }
        };

        let arm = arms
            .iter()
            .find(|arm| matches!(&arm.pattern, Pattern::Variant { variant: v, .. } if *v == variant))
            .or_else(|| arms.iter().find(|arm| matches!(arm.pattern, Pattern::Else)));
        let arm = match arm {
            Some(arm) => arm,
            None => return Ok(Flow::Normal),
        };

        let env = Environment::with_parent(&self.env);
        if let Pattern::Variant { bindings, .. } = &arm.pattern {
            let types = self
                .registry
                .read()
                .enums
                .get(&enum_name)
                .and_then(|def| def.variants.get(&variant).cloned())
                .unwrap_or_default();
            for (i, (binding, value)) in bindings.iter().zip(payload).enumerate() {
                if binding != "_" {
                    let ty = types.get(i).cloned().unwrap_or_else(|| value.type_of());
                    env.define(binding.clone(), Slot::new(value, ty));
                }
            }
        }
        self.execute_block(&arm.body, env)
    }

    // ==================== Places ====================

    fn place(&mut self, expr: &Expr) -> Result<Place> {
        match expr {
            Expr::Ident { name, .. } => Ok(Place {
                root: name.clone(),
                segments: Vec::new(),
            }),
            Expr::Field { object, name, .. } => {
                let mut place = self.place(object)?;
                place.segments.push(Segment::Field(name.clone()));
                Ok(place)
            }
            Expr::Index { object, index, .. } => {
                let mut place = self.place(object)?;
                let index = self.eval(index)?;
                place.segments.push(Segment::Index(index));
                Ok(place)
            }
            Expr::Grouping { expr, .. } => self.place(expr),
            _ => Err(runtime_error("expression is not assignable".to_string())),
        }
    }

    fn read_place(&self, place: &Place) -> Result<Value> {
        let mut value = self.read_variable(&place.root)?;
        for segment in &place.segments {
            value = match segment {
                Segment::Field(name) => field(value, name)?,
                Segment::Index(index) => methods::index(&value, index)?,
            };
        }
        Ok(value)
    }

    /// Run `f` on the slot a place addresses, with the slot's declared type.
    /// Writing through a shared name needs a write grab on it.
    fn update_place<R>(
        &self,
        place: &Place,
        f: impl FnOnce(&mut Value, &Type) -> Result<R>,
    ) -> Result<R> {
        let registry = self.registry.read();
        self.env.with_mut(&place.root, |slot| {
            let ty = slot.ty.clone();
            let resource = match &slot.value {
                Value::Resource(resource) => Some(Arc::clone(resource)),
                _ => None,
            };
            match resource {
                Some(resource) => {
                    self.check_held(&resource, AccessMode::Write)?;
                    resource.update(|value| {
                        let (target, ty) = navigate(value, ty, &place.segments, &registry)?;
                        f(target, &ty)
                    })
                }
                None => {
                    let (target, ty) = navigate(&mut slot.value, ty, &place.segments, &registry)?;
                    f(target, &ty)
                }
            }
        })?
    }

    fn read_variable(&self, name: &str) -> Result<Value> {
        match self.env.get(name)?.value {
            Value::Resource(resource) => {
                self.check_held(&resource, AccessMode::Read)?;
                Ok(resource.read())
            }
            value => Ok(value),
        }
    }

    fn check_held(&self, resource: &SharedResource, needed: AccessMode) -> Result<()> {
        match self.grabs.iter().rev().find(|g| g.holds(resource.id)) {
            Some(guard) if needed == AccessMode::Read || guard.mode() == AccessMode::Write => Ok(()),
            Some(_) => Err(runtime_error(format!(
                "shared resource '{}' is held for read and cannot be modified",
                resource.name
            ))),
            None => Err(runtime_error(format!(
                "shared resource '{}' used outside a grab on it",
                resource.name
            ))),
        }
    }

    // ==================== Expressions ====================

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        self.evaluate(expr).map_err(|err| err.or_span(expr.span()))
    }

    fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Int { value, .. } => Ok(Value::Int(*value)),
            Expr::Float { value, .. } => Ok(Value::Float(*value)),
            Expr::Str { value, .. } => Ok(Value::Str(value.clone())),
            Expr::Char { value, .. } => Ok(Value::Char(*value)),
            Expr::Bool { value, .. } => Ok(Value::Bool(*value)),
            // shaped by the slot it is stored into
            Expr::Empty { .. } => Ok(Value::Array(Vec::new())),

            Expr::Ident { name, .. } => self.read_variable(name),

            Expr::Path { type_name, member, .. } => self.variant(type_name, member, &[]),

            Expr::Array { elements, .. } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval(element)?);
                }
                Ok(Value::Array(items))
            }

            Expr::Dict { entries, .. } => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(Value::Dict(map))
            }

            Expr::Binary { left, op, right, .. } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, left, right)
            }

            Expr::Logical { left, op, right, .. } => {
                let left = self.eval(left)?.as_bool()?;
                let result = match op {
                    LogicalOp::And => left && self.eval(right)?.as_bool()?,
                    LogicalOp::Or => left || self.eval(right)?.as_bool()?,
                };
                Ok(Value::Bool(result))
            }

            Expr::Unary { op, operand, .. } => {
                let value = self.eval(operand)?;
                match (op, value) {
                    (UnaryOp::Neg, Value::Int(n)) => n
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| NoirError::new(ErrorKind::IntegerOverflow, None)),
                    (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
                    (UnaryOp::Neg, Value::Double(x)) => Ok(Value::Double(-x)),
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (op, value) => Err(runtime_error(format!(
                        "operator '{}' cannot be applied to {}",
                        op,
                        value.type_name()
                    ))),
                }
            }

            Expr::Cast { expr, target, .. } => {
                let target = self.resolve(target)?;
                self.eval(expr)?.cast(&target)
            }

            Expr::Call { callee, args, .. } => self.call(callee, args),

            Expr::MethodCall { receiver, method, args, .. } => {
                self.method_call(receiver, method, args)
            }

            Expr::Field { object, name, .. } => {
                let object = self.eval(object)?;
                field(object, name)
            }

            Expr::Index { object, index, .. } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                methods::index(&object, &index)
            }

            Expr::Try { expr, .. } | Expr::Grouping { expr, .. } => self.eval(expr),
        }
    }

    fn eval_args(&mut self, args: &[Arg]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(&arg.value)?);
        }
        Ok(values)
    }

    // ==================== Calls ====================

    fn call(&mut self, callee: &Expr, args: &[Arg]) -> Result<Value> {
        match callee {
            Expr::Ident { name, .. } => {
                let def = self.registry.read().structs.get(name).cloned();
                if let Some(def) = def {
                    return self.construct(name, &def, args);
                }
            }
            Expr::Path { type_name, member, .. } => {
                let args = self.eval_args(args)?;
                return self.variant(type_name, member, &args);
            }
            _ => {}
        }

        let callee = self.eval(callee)?;
        let args = self.eval_args(args)?;
        self.call_value(callee, args)
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>) -> Result<Value> {
        match callee {
            Value::Function(closure) => {
                let (value, _) = self.call_function(&closure.decl, &closure.env, args, None)?;
                Ok(value)
            }
            other => Err(NoirError::new(
                ErrorKind::NotCallable(other.type_name().to_string()),
                None,
            )),
        }
    }

    /// Call a function declared in `env`. With a receiver, the function is a
    /// method: `self` is bound to it, and its final value is returned too.
    fn call_function(
        &mut self,
        decl: &Arc<FuncDecl>,
        env: &Environment,
        args: Vec<Value>,
        receiver: Option<Value>,
    ) -> Result<(Value, Option<Value>)> {
        if args.len() != decl.params.len() {
            return Err(NoirError::new(
                ErrorKind::WrongArity(decl.name.clone(), decl.params.len(), args.len()),
                None,
            ));
        }

        let scope = Environment::with_parent(env);
        let is_method = receiver.is_some();
        if let Some(receiver) = receiver {
            let ty = receiver.type_of();
            scope.define("self", Slot::new(receiver, ty));
        }
        for (param, arg) in decl.params.iter().zip(args) {
            let ty = self.resolve(&param.ty)?;
            scope.define(param.name.clone(), Slot::new(arg.coerce(&ty), ty));
        }

        if decl.is_async {
            self.spawn_task(decl, scope);
            return Ok((Value::Void, None));
        }

        if self.depth >= FRAMES_MAX {
            return Err(NoirError::new(ErrorKind::StackOverflow, None));
        }
        let ret = self.return_type(decl)?;

        self.depth += 1;
        let flow = self.execute_block(&decl.body, scope.clone());
        self.depth -= 1;

        let value = match flow? {
            Flow::Return(value) => value.coerce(&ret),
            Flow::Normal => Value::Void,
        };
        let receiver = if is_method {
            scope.lookup("self").map(|slot| slot.value)
        } else {
            None
        };
        Ok((value, receiver))
    }

    /// Run an async function body on a new task. The task works on its own
    /// copy of every plain binding it can reach; only shared resources are
    /// common to both sides.
    fn spawn_task(&self, decl: &Arc<FuncDecl>, scope: Environment) {
        let mut copies = ScopeCopies::new();
        let env = scope.isolate(&mut copies);
        let globals = self.globals.isolate(&mut copies);
        let mut task = Interpreter {
            globals,
            env,
            registry: Arc::clone(&self.registry),
            runtime: self.runtime.clone(),
            task: MAIN_TASK,
            grabs: Vec::new(),
            depth: 0,
            options: self.options.clone(),
        };
        let body = Arc::clone(decl);
        let id = self.runtime.spawn(move |id| {
            task.task = id;
            let env = task.env.clone();
            task.execute_block(&body.body, env).map(|_| ())
        });
        self.trace(format!("started task {} for '{}'", id, decl.name));
    }

    fn construct(&mut self, name: &str, def: &StructDef, args: &[Arg]) -> Result<Value> {
        if args.len() > def.fields.len() {
            return Err(NoirError::new(
                ErrorKind::WrongArity(name.to_string(), def.fields.len(), args.len()),
                None,
            ));
        }
        let mut values = self.eval_args(args)?.into_iter();
        let mut fields = IndexMap::with_capacity(def.fields.len());
        for field in &def.fields {
            let value = match (values.next(), &field.default) {
                (Some(value), _) => value,
                (None, Some(default)) => {
                    let globals = self.globals.clone();
                    let previous = std::mem::replace(&mut self.env, globals);
                    let value = self.eval(default);
                    self.env = previous;
                    value?
                }
                (None, None) => {
                    return Err(NoirError::new(
                        ErrorKind::WrongArity(name.to_string(), def.fields.len(), args.len()),
                        None,
                    ))
                }
            };
            fields.insert(field.name.clone(), value.coerce(&field.ty));
        }
        Ok(Value::Struct {
            name: name.to_string(),
            fields,
        })
    }

    fn variant(&self, enum_name: &str, variant: &str, args: &[Value]) -> Result<Value> {
        let payload_types = self
            .registry
            .read()
            .enums
            .get(enum_name)
            .and_then(|def| def.variants.get(variant).cloned())
            .ok_or_else(|| {
                NoirError::new(
                    ErrorKind::MissingMember(format!("{}::{}", enum_name, variant)),
                    None,
                )
            })?;
        if args.len() != payload_types.len() {
            return Err(NoirError::new(
                ErrorKind::WrongArity(
                    format!("{}::{}", enum_name, variant),
                    payload_types.len(),
                    args.len(),
                ),
                None,
            ));
        }
        Ok(Value::Enum {
            enum_name: enum_name.to_string(),
            variant: variant.to_string(),
            payload: args
                .iter()
                .zip(&payload_types)
                .map(|(value, ty)| value.clone().coerce(ty))
                .collect(),
        })
    }

    fn method_call(&mut self, receiver: &Expr, method: &str, args: &[Arg]) -> Result<Value> {
        let (object, place) = if receiver.is_place() {
            let place = self.place(receiver)?;
            (self.read_place(&place)?, Some(place))
        } else {
            (self.eval(receiver)?, None)
        };
        let args = self.eval_args(args)?;

        let user_method = self.registry.read().method(&object, method);
        if let Some(decl) = user_method {
            let before = object.clone();
            let globals = self.globals.clone();
            let (value, after) = self.call_function(&decl, &globals, args, Some(object))?;
            // value semantics: a method that changed `self` changes the receiver
            if let (Some(place), Some(after)) = (place, after) {
                if after != before {
                    self.update_place(&place, |slot, _| {
                        *slot = after;
                        Ok(())
                    })?;
                }
            }
            return Ok(value);
        }

        if let Value::Struct { fields, .. } = &object {
            if let Some(callee @ Value::Function(_)) = fields.get(method) {
                let callee = callee.clone();
                return self.call_value(callee, args);
            }
        }

        if methods::is_mutating(method) {
            let place = place.ok_or_else(|| {
                runtime_error(format!("'{}' needs a variable, field or element to change", method))
            })?;
            return self.update_place(&place, |slot, ty| {
                let args: Vec<Value> = match methods::method_signature(ty, method) {
                    Some(sig) => args
                        .into_iter()
                        .zip(sig.params.iter())
                        .map(|(arg, ty)| arg.coerce(ty))
                        .collect(),
                    None => args,
                };
                methods::call_method(slot, method, &args)
            });
        }

        let mut object = object;
        methods::call_method(&mut object, method, &args)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(InterpreterOptions::default())
    }
}

/// Read a struct field or a built-in property
fn field(object: Value, name: &str) -> Result<Value> {
    match object {
        Value::Struct { name: type_name, mut fields } => {
            fields.shift_remove(name).ok_or_else(|| {
                NoirError::new(ErrorKind::MissingMember(format!("{}.{}", type_name, name)), None)
            })
        }
        other => methods::get_property(&other, name),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value> {
    if op.is_equality() {
        let equal = values_equal(&left, &right);
        return Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }));
    }
    if op.is_comparison() {
        return compare(op, &left, &right);
    }

    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_arithmetic(op, a, b),
        (l @ (Value::Str(_) | Value::Char(_)), r @ (Value::Str(_) | Value::Char(_)))
            if op == BinaryOp::Add =>
        {
            Ok(Value::Str(format!("{}{}", l, r)))
        }
        (l, r) => match (l.as_f64(), r.as_f64()) {
            (Some(x), Some(y)) => {
                let result = float_arithmetic(op, x, y)?;
                if matches!(l, Value::Double(_)) || matches!(r, Value::Double(_)) {
                    Ok(Value::Double(result))
                } else {
                    Ok(Value::Float(result))
                }
            }
            _ => Err(runtime_error(format!(
                "operator '{}' cannot be applied to {} and {}",
                op,
                l.type_name(),
                r.type_name()
            ))),
        },
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> Result<Value> {
    if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0 {
        return Err(NoirError::new(ErrorKind::DivisionByZero, None));
    }
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Mod => a.checked_rem(b),
        _ => unreachable!("comparison handled by caller"),
    };
    result
        .map(Value::Int)
        .ok_or_else(|| NoirError::new(ErrorKind::IntegerOverflow, None))
}

fn float_arithmetic(op: BinaryOp, x: f64, y: f64) -> Result<f64> {
    if matches!(op, BinaryOp::Div | BinaryOp::Mod) && y == 0.0 {
        return Err(NoirError::new(ErrorKind::DivisionByZero, None));
    }
    Ok(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Mod => x % y,
        _ => unreachable!("comparison handled by caller"),
    })
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a == b,
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => left == right,
        },
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => {
                return Err(runtime_error(format!(
                    "operator '{}' cannot be applied to {} and {}",
                    op,
                    left.type_name(),
                    right.type_name()
                )))
            }
        },
    };
    // NaN compares false
    let result = ordering.map_or(false, |ordering| match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    });
    Ok(Value::Bool(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::check;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn run(source: &str) -> Result<Vec<String>> {
        let program = parse(tokenize(source)?)?;
        check(&program)?;
        let (output, lines) = Output::capture();
        let mut interpreter = Interpreter::new(InterpreterOptions { trace: false, output });
        crate::with_large_stack(|| interpreter.execute(&program))?;
        let lines = lines.lock().clone();
        Ok(lines)
    }

    fn output(source: &str) -> Vec<String> {
        match run(source) {
            Ok(lines) => lines,
            Err(err) => panic!("{}\nsource:\n{}", err, source),
        }
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(output("print(1 + 2 * 3, 7 / 2, 7 % 3, -4 + 1)"), vec!["7 3 1 -3"]);
        assert_eq!(output("x: Float = 7\nprint(x / 2)"), vec!["3.5"]);
        assert_eq!(output("print(\"a\" + 'b' + \"c\")"), vec!["abc"]);
    }

    #[test]
    fn test_division_by_zero() {
        let err = run("x: Int = 0\nprint(1 / x)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
        assert_eq!(err.span.map(|s| s.line), Some(2));
    }

    #[test]
    fn test_range_loops() {
        assert_eq!(output("for i in 0 to 3: print(i) ::"), vec!["0", "1", "2"]);
        assert_eq!(output("for i in 0 thru 2: print(i) ::"), vec!["0", "1", "2"]);
        assert_eq!(output("for i in 10 to 0 by -4: print(i) ::"), vec!["10", "6", "2"]);
        assert!(output("for i in 3 to 3: print(i) ::").is_empty());

        let err = run("s: Int = 0\nfor i in 0 to 10 by s: print(i) ::").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroStep);
    }

    #[test]
    fn test_slots_convert_on_write() {
        let source = "a: [Float] = [1, 2]\na[0] = 5\na.append(3)\nprint(a)";
        assert_eq!(output(source), vec!["[5.0, 2.0, 3.0]"]);
        let source = "d: [String: Double] = empty\nd[\"x\"] = 1\nprint(d[\"x\"] / 2)";
        assert_eq!(output(source), vec!["0.5"]);
    }

    #[test]
    fn test_value_semantics() {
        let source = "a: [Int] = [1]\nb: [Int] = a\nb.append(2)\nprint(a.count, b.count)";
        assert_eq!(output(source), vec!["1 2"]);
    }

    #[test]
    fn test_method_updates_receiver() {
        let source = "struct Counter:\n  n: Int = 0\n  func bump():\n    self.n = self.n + 1\n  ::\n::\nc: Counter = Counter()\nc.bump()\nc.bump()\nprint(c.n)";
        assert_eq!(output(source), vec!["2"]);
    }

    #[test]
    fn test_within_catches_runtime_errors() {
        let source = "a: [Int] = [1]\nwithin:\n  print(a[3])\n:: catch e:\n  print(e)\n::";
        assert_eq!(
            output(source),
            vec!["index 3 out of range for collection of length 1"]
        );
        let source = "within:\n  raise \"boom\"\n  print(\"unreachable\")\n:: catch e:\n  print(\"caught\", e)\n::";
        assert_eq!(output(source), vec!["caught boom"]);
    }

    #[test]
    fn test_uncaught_raise() {
        let err = run("raise \"fatal\"").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Raised("fatal".to_string()));
        assert_eq!(err.to_string(), "[line 1:1] Runtime error: uncaught error: fatal");
    }

    #[test]
    fn test_stack_overflow_is_reported() {
        let source = "func down(n: Int) -> Int:\n  return down(n + 1)\n::\nprint(down(0))";
        let err = run(source).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StackOverflow);
    }
}
