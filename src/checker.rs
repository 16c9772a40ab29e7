//! Static checker for Noir
//!
//! Walks the AST before anything runs and rejects programs that break the
//! typing rules: declared types and conversions, protocol conformance,
//! exhaustive matches, return paths, `raise`/`try` placement, and the
//! lexical rules for shared resources and async functions.
//!
//! The checker is persistent: the REPL feeds it one chunk at a time and
//! earlier declarations stay visible.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::ast::{
    AccessMode, Arg, EnumDecl, Expr, FuncDecl, LogicalOp, MatchArm, Pattern, Program,
    ProtocolDecl, Stmt, StructDecl, TypeExpr, UnaryOp,
};
use crate::environment::Environment;
use crate::error::{ErrorKind, NoirError, Result};
use crate::methods;
use crate::token::Span;
use crate::types::{self, Type};

/// What a name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Function { throws: bool },
    Shared,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub ty: Type,
    pub kind: SymbolKind,
}

/// Signature of a user-defined method or protocol requirement
#[derive(Debug, Clone, PartialEq)]
struct MethodInfo {
    params: Vec<(String, Type)>,
    ret: Type,
    throws: bool,
    /// Calling it may change the receiver, so the receiver must be writable
    mutates_self: bool,
    effects: SelfEffects,
}

/// What a method body does to `self`, as written
#[derive(Debug, Clone, Default, PartialEq)]
struct SelfEffects {
    writes: bool,
    /// Methods called on `self` itself
    self_calls: Vec<String>,
    /// Methods called on a field or element of `self`
    member_calls: Vec<String>,
}

impl SelfEffects {
    fn of(body: &[Stmt]) -> Self {
        let mut effects = SelfEffects::default();
        effects.stmts(body);
        effects
    }

    fn stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr { expr } => self.expr(expr),
            Stmt::VarDecl { value, .. } | Stmt::SharedDecl { value, .. } => self.expr(value),
            Stmt::Assign { target, value, .. } => {
                if target.place_root() == Some("self") {
                    self.writes = true;
                }
                self.expr(target);
                self.expr(value);
            }
            Stmt::If { branches, else_branch, .. } => {
                for (condition, body) in branches {
                    self.expr(condition);
                    self.stmts(body);
                }
                if let Some(body) = else_branch {
                    self.stmts(body);
                }
            }
            Stmt::For { start, end, step, body, .. } => {
                self.expr(start);
                self.expr(end);
                if let Some(step) = step {
                    self.expr(step);
                }
                self.stmts(body);
            }
            Stmt::ForEach { iterable, body, .. } => {
                self.expr(iterable);
                self.stmts(body);
            }
            Stmt::While { condition, body, .. } | Stmt::Await { condition, body, .. } => {
                self.expr(condition);
                self.stmts(body);
            }
            // a nested function can capture and change `self`
            Stmt::Func(decl) => self.stmts(&decl.body),
            Stmt::Struct(_) | Stmt::Enum(_) | Stmt::Protocol(_) => {}
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            Stmt::Print { args, .. } => {
                for arg in args {
                    self.expr(arg);
                }
            }
            Stmt::Match { subject, arms, .. } => {
                self.expr(subject);
                for arm in arms {
                    self.stmts(&arm.body);
                }
            }
            Stmt::Grab { body, .. } => self.stmts(body),
            Stmt::Within { body, handler, .. } => {
                self.stmts(body);
                self.stmts(handler);
            }
            Stmt::Raise { value, .. } => self.expr(value),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::MethodCall { receiver, method, args, .. } => {
                if receiver.place_root() == Some("self") {
                    if matches!(&**receiver, Expr::Ident { .. }) {
                        self.self_calls.push(method.clone());
                    } else if methods::is_mutating(method) {
                        self.writes = true;
                    } else {
                        self.member_calls.push(method.clone());
                    }
                }
                self.expr(receiver);
                for arg in args {
                    self.expr(&arg.value);
                }
            }
            Expr::Call { callee, args, .. } => {
                self.expr(callee);
                for arg in args {
                    self.expr(&arg.value);
                }
            }
            Expr::Array { elements, .. } => {
                for element in elements {
                    self.expr(element);
                }
            }
            Expr::Dict { entries, .. } => {
                for (key, value) in entries {
                    self.expr(key);
                    self.expr(value);
                }
            }
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Index { object, index, .. } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::Unary { operand: inner, .. }
            | Expr::Cast { expr: inner, .. }
            | Expr::Field { object: inner, .. }
            | Expr::Try { expr: inner, .. }
            | Expr::Grouping { expr: inner, .. } => self.expr(inner),
            Expr::Int { .. }
            | Expr::Float { .. }
            | Expr::Str { .. }
            | Expr::Char { .. }
            | Expr::Bool { .. }
            | Expr::Empty { .. }
            | Expr::Ident { .. }
            | Expr::Path { .. } => {}
        }
    }
}

/// Mark the methods of one type that change `self` through a call to
/// another method. Returns whether anything changed.
fn mark_mutating_calls(
    methods: &mut IndexMap<String, MethodInfo>,
    mutating_anywhere: &HashSet<String>,
) -> bool {
    let own: HashSet<String> = methods
        .iter()
        .filter(|(_, m)| m.mutates_self)
        .map(|(name, _)| name.clone())
        .collect();
    let mut changed = false;
    for info in methods.values_mut() {
        if info.mutates_self {
            continue;
        }
        let calls_mutating = info.effects.self_calls.iter().any(|m| own.contains(m))
            || info
                .effects
                .member_calls
                .iter()
                .any(|m| mutating_anywhere.contains(m));
        if calls_mutating {
            info.mutates_self = true;
            changed = true;
        }
    }
    changed
}

impl MethodInfo {
    fn param_types(&self) -> Vec<&Type> {
        self.params.iter().map(|(_, t)| t).collect()
    }
}

#[derive(Debug, Clone)]
struct FieldInfo {
    ty: Type,
    has_default: bool,
}

#[derive(Debug, Clone, Default)]
struct StructInfo {
    fields: IndexMap<String, FieldInfo>,
    methods: IndexMap<String, MethodInfo>,
}

#[derive(Debug, Clone, Default)]
struct EnumInfo {
    variants: IndexMap<String, Vec<(String, Type)>>,
    methods: IndexMap<String, MethodInfo>,
}

#[derive(Debug, Clone, Default)]
struct ProtocolInfo {
    properties: IndexMap<String, Type>,
    methods: IndexMap<String, MethodInfo>,
}

/// The function whose body is being checked
#[derive(Debug, Clone)]
struct FuncContext {
    ret: Type,
    throws: bool,
    is_async: bool,
    /// Depth of the body scope; bindings found shallower are captured
    boundary: usize,
}

/// Static checker state
pub struct Checker {
    env: Environment<Symbol>,
    type_names: HashMap<String, Type>,
    structs: HashMap<String, StructInfo>,
    enums: HashMap<String, EnumInfo>,
    protocols: HashMap<String, ProtocolInfo>,
    conformances: HashSet<(String, String)>,
    functions: Vec<FuncContext>,
    grabs: Vec<(Vec<String>, AccessMode)>,
    within_depth: usize,
}

fn error<T>(kind: ErrorKind, span: Span) -> Result<T> {
    Err(NoirError::new(kind, Some(span)))
}

fn mismatch<T>(expected: &Type, got: &Type, span: Span) -> Result<T> {
    error(
        ErrorKind::TypeMismatch(expected.to_string(), got.to_string()),
        span,
    )
}

/// A float literal, possibly negated or parenthesised
fn is_float_literal(expr: &Expr) -> bool {
    match expr {
        Expr::Float { .. } => true,
        Expr::Unary { op: UnaryOp::Neg, operand, .. } => is_float_literal(operand),
        Expr::Grouping { expr, .. } => is_float_literal(expr),
        _ => false,
    }
}

impl Checker {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
            type_names: HashMap::new(),
            structs: HashMap::new(),
            enums: HashMap::new(),
            protocols: HashMap::new(),
            conformances: HashSet::new(),
            functions: Vec::new(),
            grabs: Vec::new(),
            within_depth: 0,
        }
    }

    /// Independent copy of the checker's top-level state. The REPL checks
    /// each chunk on a fork and keeps it only when the chunk is accepted.
    pub fn fork(&self) -> Self {
        Self {
            env: self.env.snapshot(),
            type_names: self.type_names.clone(),
            structs: self.structs.clone(),
            enums: self.enums.clone(),
            protocols: self.protocols.clone(),
            conformances: self.conformances.clone(),
            functions: Vec::new(),
            grabs: Vec::new(),
            within_depth: 0,
        }
    }

    /// Check a whole program (or one REPL chunk)
    pub fn check(&mut self, program: &Program) -> Result<()> {
        self.declare_types(&program.statements)?;
        self.block(&program.statements)
    }

    // ==================== Type declarations ====================

    fn declare_types(&mut self, stmts: &[Stmt]) -> Result<()> {
        let mut structs: Vec<&Arc<StructDecl>> = Vec::new();
        let mut enums: Vec<&Arc<EnumDecl>> = Vec::new();
        let mut protocols: Vec<&Arc<ProtocolDecl>> = Vec::new();

        for stmt in stmts {
            let (name, ty, span) = match stmt {
                Stmt::Struct(d) => {
                    structs.push(d);
                    (&d.name, Type::Struct(d.name.clone()), d.span)
                }
                Stmt::Enum(d) => {
                    enums.push(d);
                    (&d.name, Type::Enum(d.name.clone()), d.span)
                }
                Stmt::Protocol(d) => {
                    protocols.push(d);
                    (&d.name, Type::Protocol(d.name.clone()), d.span)
                }
                _ => continue,
            };
            if self.type_names.contains_key(name) {
                return error(ErrorKind::Redeclaration(name.clone()), span);
            }
            self.type_names.insert(name.clone(), ty);
        }

        for decl in &protocols {
            let mut info = ProtocolInfo::default();
            for prop in &decl.properties {
                let ty = self.resolve(&prop.ty)?;
                if info.properties.insert(prop.name.clone(), ty).is_some() {
                    return error(ErrorKind::Redeclaration(prop.name.clone()), prop.span);
                }
            }
            for sig in &decl.methods {
                let params = sig
                    .params
                    .iter()
                    .map(|p| Ok((p.name.clone(), self.resolve(&p.ty)?)))
                    .collect::<Result<Vec<_>>>()?;
                let ret = self.resolve_return(sig.return_type.as_ref())?;
                let sig_info = MethodInfo {
                    params,
                    ret,
                    throws: false,
                    mutates_self: false,
                    effects: SelfEffects::default(),
                };
                info.methods.insert(sig.name.clone(), sig_info);
            }
            self.protocols.insert(decl.name.clone(), info);
        }

        for decl in &enums {
            let mut info = EnumInfo::default();
            for variant in &decl.variants {
                let fields = variant
                    .fields
                    .iter()
                    .map(|p| Ok((p.name.clone(), self.resolve(&p.ty)?)))
                    .collect::<Result<Vec<_>>>()?;
                if info.variants.insert(variant.name.clone(), fields).is_some() {
                    return error(ErrorKind::Redeclaration(variant.name.clone()), variant.span);
                }
            }
            for method in &decl.methods {
                let sig = self.method_info(method)?;
                if info.methods.insert(method.name.clone(), sig).is_some() {
                    return error(ErrorKind::Redeclaration(method.name.clone()), method.span);
                }
            }
            self.enums.insert(decl.name.clone(), info);
        }

        let by_name: HashMap<&str, &Arc<StructDecl>> =
            structs.iter().map(|d| (d.name.as_str(), *d)).collect();
        let mut visiting = Vec::new();
        for decl in &structs {
            self.declare_struct(decl, &by_name, &mut visiting)?;
        }

        self.resolve_self_mutation();

        for decl in &structs {
            self.check_conformance(&decl.name, &decl.conforms, decl.span)?;
        }
        for decl in &enums {
            self.check_conformance(&decl.name, &decl.conforms, decl.span)?;
        }
        self.mark_protocol_mutation();
        Ok(())
    }

    /// Follow method calls until every method that can change `self` is marked
    fn resolve_self_mutation(&mut self) {
        loop {
            let mutating: HashSet<String> = self
                .structs
                .values()
                .flat_map(|s| s.methods.iter())
                .chain(self.enums.values().flat_map(|e| e.methods.iter()))
                .filter(|(_, m)| m.mutates_self)
                .map(|(name, _)| name.clone())
                .collect();

            let mut changed = false;
            for info in self.structs.values_mut() {
                changed |= mark_mutating_calls(&mut info.methods, &mutating);
            }
            for info in self.enums.values_mut() {
                changed |= mark_mutating_calls(&mut info.methods, &mutating);
            }
            if !changed {
                break;
            }
        }
    }

    /// A protocol method changes its receiver when any conforming type's does
    fn mark_protocol_mutation(&mut self) {
        for (type_name, protocol_name) in &self.conformances {
            let methods = match (self.structs.get(type_name), self.enums.get(type_name)) {
                (Some(s), _) => &s.methods,
                (None, Some(e)) => &e.methods,
                (None, None) => continue,
            };
            if let Some(protocol) = self.protocols.get_mut(protocol_name) {
                for (name, required) in protocol.methods.iter_mut() {
                    if methods.get(name).map_or(false, |m| m.mutates_self) {
                        required.mutates_self = true;
                    }
                }
            }
        }
    }

    /// Register a struct, composing in its base first when it has one
    fn declare_struct(
        &mut self,
        decl: &StructDecl,
        by_name: &HashMap<&str, &Arc<StructDecl>>,
        visiting: &mut Vec<String>,
    ) -> Result<()> {
        if self.structs.contains_key(&decl.name) {
            return Ok(());
        }
        if visiting.contains(&decl.name) {
            return error(
                ErrorKind::TypeError(format!("'{}' inherits from itself", decl.name)),
                decl.span,
            );
        }

        let mut info = StructInfo::default();
        if let Some(base) = &decl.base {
            if let Some(base_decl) = by_name.get(base.as_str()) {
                visiting.push(decl.name.clone());
                self.declare_struct(base_decl, by_name, visiting)?;
                visiting.pop();
            }
            match self.structs.get(base) {
                Some(base_info) => info = base_info.clone(),
                None => return error(ErrorKind::UnknownType(base.clone()), decl.span),
            }
        }

        for field in &decl.fields {
            let ty = self.resolve(&field.ty)?;
            let field_info = FieldInfo { ty, has_default: field.default.is_some() };
            if info.fields.insert(field.name.clone(), field_info).is_some() {
                return error(ErrorKind::Redeclaration(field.name.clone()), field.span);
            }
        }

        let mut own = HashSet::new();
        for method in &decl.methods {
            if !own.insert(method.name.as_str()) {
                return error(ErrorKind::Redeclaration(method.name.clone()), method.span);
            }
            let sig = self.method_info(method)?;
            info.methods.insert(method.name.clone(), sig);
        }

        self.structs.insert(decl.name.clone(), info);
        Ok(())
    }

    fn method_info(&self, decl: &FuncDecl) -> Result<MethodInfo> {
        let params = decl
            .params
            .iter()
            .map(|p| Ok((p.name.clone(), self.resolve(&p.ty)?)))
            .collect::<Result<Vec<_>>>()?;
        let ret = self.resolve_return(decl.return_type.as_ref())?;
        let effects = SelfEffects::of(&decl.body);
        Ok(MethodInfo {
            params,
            ret,
            throws: decl.throws,
            mutates_self: effects.writes,
            effects,
        })
    }

    fn check_conformance(&mut self, type_name: &str, protocols: &[String], span: Span) -> Result<()> {
        for protocol_name in protocols {
            let protocol = match self.protocols.get(protocol_name) {
                Some(p) => p,
                None => return error(ErrorKind::UnknownType(protocol_name.clone()), span),
            };

            let (fields, methods) = match (self.structs.get(type_name), self.enums.get(type_name)) {
                (Some(s), _) => (Some(&s.fields), &s.methods),
                (None, Some(e)) => (None, &e.methods),
                (None, None) => return error(ErrorKind::UnknownType(type_name.to_string()), span),
            };

            for (prop, ty) in &protocol.properties {
                let found = fields
                    .and_then(|f| f.get(prop))
                    .map_or(false, |f| &f.ty == ty);
                if !found {
                    return error(
                        ErrorKind::MissingRequirement(
                            type_name.to_string(),
                            protocol_name.clone(),
                            format!("{}: {}", prop, ty),
                        ),
                        span,
                    );
                }
            }

            for (name, required) in &protocol.methods {
                let found = methods.get(name).map_or(false, |m| {
                    m.param_types() == required.param_types() && m.ret == required.ret
                });
                if !found {
                    let params: Vec<String> =
                        required.params.iter().map(|(_, t)| t.to_string()).collect();
                    return error(
                        ErrorKind::MissingRequirement(
                            type_name.to_string(),
                            protocol_name.clone(),
                            format!("{}({}) -> {}", name, params.join(", "), required.ret),
                        ),
                        span,
                    );
                }
            }

            self.conformances
                .insert((type_name.to_string(), protocol_name.clone()));
        }
        Ok(())
    }

    // ==================== Helpers ====================

    fn resolve(&self, expr: &TypeExpr) -> Result<Type> {
        let lookup = |name: &str| self.type_names.get(name).cloned();
        types::resolve(expr, &lookup)
    }

    fn resolve_return(&self, expr: Option<&TypeExpr>) -> Result<Type> {
        match expr {
            Some(t) => self.resolve(t),
            None => Ok(Type::Void),
        }
    }

    fn conforms(&self, type_name: &str, protocol: &str) -> bool {
        self.conformances
            .contains(&(type_name.to_string(), protocol.to_string()))
    }

    fn convertible(&self, from: &Type, to: &Type) -> bool {
        types::can_convert(from, to, &|t, p| self.conforms(t, p))
    }

    /// Fail unless a value of type `from` may be stored where `to` is expected
    fn expect_assignable(&self, from: &Type, to: &Type, span: Span) -> Result<()> {
        if self.convertible(from, to) {
            return Ok(());
        }
        if types::can_cast(from, to, &|t, p| self.conforms(t, p)) {
            return error(
                ErrorKind::InvalidConversion(from.to_string(), to.to_string()),
                span,
            );
        }
        mismatch(to, from, span)
    }

    fn expect_bool(&mut self, expr: &Expr) -> Result<()> {
        let ty = self.expr(expr, Some(&Type::Bool))?;
        if ty != Type::Bool {
            return mismatch(&Type::Bool, &ty, expr.span());
        }
        Ok(())
    }

    fn at_top_level(&self) -> bool {
        self.functions.is_empty() && self.env.depth() == 0
    }

    fn define(&mut self, name: &str, symbol: Symbol, span: Span) -> Result<()> {
        if self.env.is_local(name) {
            return error(ErrorKind::Redeclaration(name.to_string()), span);
        }
        self.env.define(name, symbol);
        Ok(())
    }

    fn lookup(&self, name: &str, span: Span) -> Result<(Symbol, usize)> {
        match self.env.lookup_with_depth(name) {
            Some(found) => Ok(found),
            None => error(ErrorKind::UndeclaredIdentifier(name.to_string()), span),
        }
    }

    fn grabbed_mode(&self, name: &str) -> Option<AccessMode> {
        self.grabs
            .iter()
            .rev()
            .find(|(names, _)| names.iter().any(|n| n == name))
            .map(|(_, mode)| *mode)
    }

    /// Run `f` in a fresh child scope
    fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let parent = self.env.clone();
        self.env = Environment::with_parent(&parent);
        let result = f(self);
        self.env = parent;
        result
    }

    // ==================== Statements ====================

    /// Check a statement list in the current scope, hoisting its functions
    fn block(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            if let Stmt::Func(decl) = stmt {
                let ty = self.func_type(decl)?;
                let symbol = Symbol { ty, kind: SymbolKind::Function { throws: decl.throws } };
                self.define(&decl.name, symbol, decl.span)?;
            }
        }
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn scoped_block(&mut self, stmts: &[Stmt]) -> Result<()> {
        self.scoped(|c| c.block(stmts))
    }

    fn func_type(&self, decl: &FuncDecl) -> Result<Type> {
        let params = decl
            .params
            .iter()
            .map(|p| self.resolve(&p.ty))
            .collect::<Result<Vec<_>>>()?;
        let ret = self.resolve_return(decl.return_type.as_ref())?;
        Ok(Type::Func(params, Box::new(ret)))
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr { expr } => {
                self.expr(expr, None)?;
                Ok(())
            }

            Stmt::VarDecl { name, ty, value, span } => {
                let declared = self.resolve(ty)?;
                let actual = self.expr(value, Some(&declared))?;
                self.expect_assignable(&actual, &declared, value.span())?;
                self.define(name, Symbol { ty: declared, kind: SymbolKind::Variable }, *span)
            }

            Stmt::SharedDecl { name, ty, value, span } => {
                if !self.at_top_level() {
                    return error(
                        ErrorKind::TypeError("shared resources must be declared at top level".to_string()),
                        *span,
                    );
                }
                let declared = self.resolve(ty)?;
                let actual = self.expr(value, Some(&declared))?;
                self.expect_assignable(&actual, &declared, value.span())?;
                self.define(name, Symbol { ty: declared, kind: SymbolKind::Shared }, *span)
            }

            Stmt::Assign { target, value, .. } => {
                let target_ty = self.place(target, target.span())?;
                let actual = self.expr(value, Some(&target_ty))?;
                self.expect_assignable(&actual, &target_ty, value.span())
            }

            Stmt::If { branches, else_branch, .. } => {
                for (condition, body) in branches {
                    self.expect_bool(condition)?;
                    self.scoped_block(body)?;
                }
                if let Some(body) = else_branch {
                    self.scoped_block(body)?;
                }
                Ok(())
            }

            Stmt::For { var, start, end, step, body, span, .. } => {
                for bound in [Some(start), Some(end), step.as_ref()].into_iter().flatten() {
                    let ty = self.expr(bound, Some(&Type::Int))?;
                    if ty != Type::Int {
                        return mismatch(&Type::Int, &ty, bound.span());
                    }
                }
                self.scoped(|c| {
                    c.define(var, Symbol { ty: Type::Int, kind: SymbolKind::Variable }, *span)?;
                    c.block(body)
                })
            }

            Stmt::ForEach { var, iterable, body, span } => {
                let ty = self.expr(iterable, None)?;
                let element = match ty.element() {
                    Some(element) => element,
                    None => {
                        return error(
                            ErrorKind::TypeError(format!("cannot iterate over {}", ty)),
                            iterable.span(),
                        )
                    }
                };
                self.scoped(|c| {
                    c.define(var, Symbol { ty: element, kind: SymbolKind::Variable }, *span)?;
                    c.block(body)
                })
            }

            Stmt::While { condition, body, .. } => {
                self.expect_bool(condition)?;
                self.scoped_block(body)
            }

            // signature was hoisted by `block`
            Stmt::Func(decl) => self.function_body(decl, None),

            Stmt::Struct(decl) => {
                self.require_top_level("struct", decl.span)?;
                for field in &decl.fields {
                    if let Some(default) = &field.default {
                        let ty = self.resolve(&field.ty)?;
                        let actual = self.expr(default, Some(&ty))?;
                        self.expect_assignable(&actual, &ty, default.span())?;
                    }
                }
                let self_ty = Type::Struct(decl.name.clone());
                for method in &decl.methods {
                    self.function_body(method, Some(&self_ty))?;
                }
                Ok(())
            }

            Stmt::Enum(decl) => {
                self.require_top_level("enum", decl.span)?;
                let self_ty = Type::Enum(decl.name.clone());
                for method in &decl.methods {
                    self.function_body(method, Some(&self_ty))?;
                }
                Ok(())
            }

            Stmt::Protocol(decl) => self.require_top_level("protocol", decl.span),

            Stmt::Return { value, span } => {
                let ret = match self.functions.last() {
                    Some(ctx) => ctx.ret.clone(),
                    None => return error(ErrorKind::ReturnOutsideFunction, *span),
                };
                match (value, &ret) {
                    (None, Type::Void) => Ok(()),
                    (None, _) => mismatch(&ret, &Type::Void, *span),
                    (Some(value), Type::Void) => {
                        let actual = self.expr(value, None)?;
                        mismatch(&Type::Void, &actual, value.span())
                    }
                    (Some(value), _) => {
                        let actual = self.expr(value, Some(&ret))?;
                        self.expect_assignable(&actual, &ret, value.span())
                    }
                }
            }

            Stmt::Print { args, .. } => {
                for arg in args {
                    self.expr(arg, None)?;
                }
                Ok(())
            }

            Stmt::Match { subject, arms, span } => self.match_stmt(subject, arms, *span),

            Stmt::Grab { resources, mode, body, .. } => {
                let mut names = Vec::new();
                for (name, span) in resources {
                    let (symbol, _) = self.lookup(name, *span)?;
                    if symbol.kind != SymbolKind::Shared {
                        return error(
                            ErrorKind::TypeError(format!("'{}' is not a shared resource", name)),
                            *span,
                        );
                    }
                    if names.contains(name) {
                        return error(
                            ErrorKind::TypeError(format!("'{}' is grabbed twice", name)),
                            *span,
                        );
                    }
                    names.push(name.clone());
                }
                self.grabs.push((names, *mode));
                let result = self.scoped_block(body);
                self.grabs.pop();
                result
            }

            Stmt::Await { condition, body, span } => {
                if self.grabs.is_empty() {
                    return error(ErrorKind::AwaitOutsideGrab, *span);
                }
                self.expect_bool(condition)?;
                self.scoped_block(body)
            }

            Stmt::Within { body, catch_name, handler, span } => {
                self.within_depth += 1;
                let result = self.scoped_block(body);
                self.within_depth -= 1;
                result?;

                self.scoped(|c| {
                    if let Some(name) = catch_name {
                        c.define(name, Symbol { ty: Type::String, kind: SymbolKind::Variable }, *span)?;
                    }
                    c.block(handler)
                })
            }

            Stmt::Raise { value, span } => {
                let allowed = self.within_depth > 0
                    || match self.functions.last() {
                        Some(ctx) => ctx.throws,
                        None => true,
                    };
                if !allowed {
                    return error(ErrorKind::RaiseNotAllowed, *span);
                }
                let ty = self.expr(value, Some(&Type::String))?;
                if ty != Type::String {
                    return mismatch(&Type::String, &ty, value.span());
                }
                Ok(())
            }
        }
    }

    fn require_top_level(&self, what: &str, span: Span) -> Result<()> {
        if self.at_top_level() {
            Ok(())
        } else {
            error(
                ErrorKind::TypeError(format!("{} declarations are only allowed at top level", what)),
                span,
            )
        }
    }

    /// Check a function or method body in a new scope below the current one
    fn function_body(&mut self, decl: &FuncDecl, self_ty: Option<&Type>) -> Result<()> {
        let ret = self.resolve_return(decl.return_type.as_ref())?;
        if decl.is_async && ret != Type::Void {
            return error(
                ErrorKind::TypeError(format!("async function '{}' must return Void", decl.name)),
                decl.span,
            );
        }

        let params = decl
            .params
            .iter()
            .map(|p| Ok((p, self.resolve(&p.ty)?)))
            .collect::<Result<Vec<_>>>()?;

        let saved_grabs = std::mem::take(&mut self.grabs);
        let saved_within = std::mem::replace(&mut self.within_depth, 0);

        let result = self.scoped(|c| {
            c.functions.push(FuncContext {
                ret: ret.clone(),
                throws: decl.throws,
                is_async: decl.is_async,
                boundary: c.env.depth(),
            });
            let result = (|| {
                if let Some(self_ty) = self_ty {
                    c.env.define("self", Symbol { ty: self_ty.clone(), kind: SymbolKind::Variable });
                }
                for (param, ty) in params {
                    c.define(&param.name, Symbol { ty, kind: SymbolKind::Variable }, param.span)?;
                }
                c.block(&decl.body)
            })();
            c.functions.pop();
            result
        });

        self.grabs = saved_grabs;
        self.within_depth = saved_within;
        result?;

        if ret != Type::Void && !always_exits(&decl.body) {
            return error(ErrorKind::MissingReturn(decl.name.clone()), decl.span);
        }
        Ok(())
    }

    fn match_stmt(&mut self, subject: &Expr, arms: &[MatchArm], span: Span) -> Result<()> {
        let subject_ty = self.expr(subject, None)?;
        let enum_name = match &subject_ty {
            Type::Enum(name) => name.clone(),
            other => {
                return error(
                    ErrorKind::TypeError(format!("match requires an enum value, got {}", other)),
                    subject.span(),
                )
            }
        };
        let variants = match self.enums.get(&enum_name) {
            Some(info) => info.variants.clone(),
            None => return error(ErrorKind::UnknownType(enum_name), span),
        };

        let mut covered = HashSet::new();
        let mut has_else = false;
        for arm in arms {
            match &arm.pattern {
                Pattern::Else => {
                    if has_else {
                        return error(
                            ErrorKind::TypeError("match has more than one else arm".to_string()),
                            arm.span,
                        );
                    }
                    has_else = true;
                    self.scoped_block(&arm.body)?;
                }
                Pattern::Variant { enum_name: written, variant, bindings } => {
                    if let Some(written) = written {
                        if *written != enum_name {
                            return mismatch(&subject_ty, &Type::Enum(written.clone()), arm.span);
                        }
                    }
                    let fields = match variants.get(variant) {
                        Some(fields) => fields,
                        None => {
                            return error(
                                ErrorKind::UnknownMember(enum_name.clone(), variant.clone()),
                                arm.span,
                            )
                        }
                    };
                    if !covered.insert(variant.clone()) {
                        return error(
                            ErrorKind::TypeError(format!("duplicate match arm for '{}'", variant)),
                            arm.span,
                        );
                    }
                    if !bindings.is_empty() && bindings.len() != fields.len() {
                        return error(
                            ErrorKind::WrongArity(variant.clone(), fields.len(), bindings.len()),
                            arm.span,
                        );
                    }
                    self.scoped(|c| {
                        for (binding, (_, ty)) in bindings.iter().zip(fields) {
                            if binding != "_" {
                                let symbol = Symbol { ty: ty.clone(), kind: SymbolKind::Variable };
                                c.define(binding, symbol, arm.span)?;
                            }
                        }
                        c.block(&arm.body)
                    })?;
                }
            }
        }

        if !has_else {
            let missing: Vec<String> = variants
                .keys()
                .filter(|v| !covered.contains(*v))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return error(ErrorKind::NonExhaustiveMatch(enum_name, missing), span);
            }
        }
        Ok(())
    }

    /// Type of an assignment target, after checking it may be written
    fn place(&mut self, target: &Expr, span: Span) -> Result<Type> {
        let root = match target.place_root() {
            Some(root) => root,
            None => return error(ErrorKind::InvalidAssignmentTarget, span),
        };
        let (symbol, depth) = self.lookup(root, span)?;
        match symbol.kind {
            SymbolKind::Function { .. } => {
                return error(
                    ErrorKind::TypeError(format!("cannot assign to function '{}'", root)),
                    span,
                )
            }
            SymbolKind::Shared => match self.grabbed_mode(root) {
                Some(AccessMode::Write) => {}
                Some(AccessMode::Read) => {
                    return error(ErrorKind::ReadOnlyResource(root.to_string()), span)
                }
                None => return error(ErrorKind::SharedOutsideGrab(root.to_string()), span),
            },
            SymbolKind::Variable => {
                let captured = self
                    .functions
                    .iter()
                    .any(|ctx| ctx.is_async && depth < ctx.boundary);
                if captured {
                    return error(ErrorKind::AsyncCapture(root.to_string()), span);
                }
            }
        }
        self.expr(target, None)
    }

    // ==================== Expressions ====================

    /// Type of an expression. `expected` is the type of the slot the value
    /// is headed for; it lets `empty` and float literals take their type
    /// from context.
    fn expr(&mut self, expr: &Expr, expected: Option<&Type>) -> Result<Type> {
        match expr {
            Expr::Int { .. } => Ok(Type::Int),
            Expr::Float { .. } => Ok(match expected {
                Some(Type::Double) => Type::Double,
                _ => Type::Float,
            }),
            Expr::Str { .. } => Ok(Type::String),
            Expr::Char { .. } => Ok(Type::Char),
            Expr::Bool { .. } => Ok(Type::Bool),

            Expr::Empty { span } => match expected {
                Some(ty) if ty.is_collection() => Ok(ty.clone()),
                _ => error(ErrorKind::CannotInferEmpty, *span),
            },

            Expr::Ident { name, span } => {
                let (symbol, _) = self.lookup(name, *span)?;
                if symbol.kind == SymbolKind::Shared && self.grabbed_mode(name).is_none() {
                    return error(ErrorKind::SharedOutsideGrab(name.clone()), *span);
                }
                Ok(symbol.ty)
            }

            Expr::Path { type_name, member, span } => {
                let fields = self.variant_fields(type_name, member, *span)?;
                if !fields.is_empty() {
                    return error(
                        ErrorKind::WrongArity(format!("{}::{}", type_name, member), fields.len(), 0),
                        *span,
                    );
                }
                Ok(Type::Enum(type_name.clone()))
            }

            Expr::Array { elements, span } => {
                if let (true, Some(ty)) = (elements.is_empty(), expected) {
                    if ty.is_collection() {
                        return Ok(ty.clone());
                    }
                }
                let element_hint = match expected {
                    Some(Type::Array(t) | Type::Set(t) | Type::OrderedSet(t)) => Some((**t).clone()),
                    _ => None,
                };
                if let (Some(hint), Some(expected)) = (&element_hint, expected) {
                    for element in elements {
                        let ty = self.expr(element, Some(hint))?;
                        self.expect_assignable(&ty, hint, element.span())?;
                    }
                    return Ok(expected.clone());
                }
                let element = self.join_types(elements.iter(), *span)?;
                Ok(Type::Array(Box::new(element)))
            }

            Expr::Dict { entries, span } => {
                if let Some(Type::Dict(k, v)) = expected {
                    for (key, value) in entries {
                        let kt = self.expr(key, Some(k))?;
                        self.expect_assignable(&kt, k, key.span())?;
                        let vt = self.expr(value, Some(v))?;
                        self.expect_assignable(&vt, v, value.span())?;
                    }
                    return Ok(Type::Dict(k.clone(), v.clone()));
                }
                let key = self.join_types(entries.iter().map(|(k, _)| k), *span)?;
                let value = self.join_types(entries.iter().map(|(_, v)| v), *span)?;
                Ok(Type::Dict(Box::new(key), Box::new(value)))
            }

            Expr::Binary { left, op, right, span } => {
                let hint = match expected {
                    Some(Type::Double) if !op.is_comparison() && !op.is_equality() => {
                        Some(&Type::Double)
                    }
                    _ => None,
                };
                let mut lt = self.expr(left, hint)?;
                let mut rt = self.expr(right, hint)?;
                if lt == Type::Double && is_float_literal(right) {
                    rt = Type::Double;
                }
                if rt == Type::Double && is_float_literal(left) {
                    lt = Type::Double;
                }
                match types::binary_result(*op, &lt, &rt) {
                    Some(ty) => Ok(ty),
                    None => error(
                        ErrorKind::InvalidOperands(op.to_string(), lt.to_string(), rt.to_string()),
                        *span,
                    ),
                }
            }

            Expr::Logical { left, op, right, span } => {
                let lt = self.expr(left, Some(&Type::Bool))?;
                let rt = self.expr(right, Some(&Type::Bool))?;
                if lt != Type::Bool || rt != Type::Bool {
                    let op = match op {
                        LogicalOp::And => "and",
                        LogicalOp::Or => "or",
                    };
                    return error(
                        ErrorKind::InvalidOperands(op.to_string(), lt.to_string(), rt.to_string()),
                        *span,
                    );
                }
                Ok(Type::Bool)
            }

            Expr::Unary { op, operand, span } => {
                let ty = self.expr(operand, expected)?;
                let ok = match op {
                    UnaryOp::Neg => ty.is_numeric(),
                    UnaryOp::Not => ty == Type::Bool,
                };
                if !ok {
                    return error(
                        ErrorKind::TypeError(format!("operator '{}' cannot be applied to {}", op, ty)),
                        *span,
                    );
                }
                Ok(ty)
            }

            Expr::Cast { expr: inner, target, span } => {
                let to = self.resolve(target)?;
                let from = self.expr(inner, None)?;
                if !types::can_cast(&from, &to, &|t, p| self.conforms(t, p)) {
                    return error(ErrorKind::InvalidCast(from.to_string(), to.to_string()), *span);
                }
                Ok(to)
            }

            Expr::Call { callee, args, span } => self.call(callee, args, *span, false),

            Expr::MethodCall { receiver, method, args, span } => {
                self.method_call(receiver, method, args, *span, false)
            }

            Expr::Field { object, name, span } => {
                let ty = self.expr(object, None)?;
                self.field_type(&ty, name, *span)
            }

            Expr::Index { object, index, span } => {
                let ty = self.expr(object, None)?;
                let (key, element) = match &ty {
                    Type::Array(t) | Type::OrderedSet(t) => (Type::Int, (**t).clone()),
                    Type::Dict(k, v) => ((**k).clone(), (**v).clone()),
                    Type::String => (Type::Int, Type::Char),
                    other => {
                        return error(
                            ErrorKind::TypeError(format!("cannot index into {}", other)),
                            *span,
                        )
                    }
                };
                let actual = self.expr(index, Some(&key))?;
                self.expect_assignable(&actual, &key, index.span())?;
                Ok(element)
            }

            Expr::Try { expr: inner, span } => match inner.as_ref() {
                Expr::Call { callee, args, span } => self.call(callee, args, *span, true),
                Expr::MethodCall { receiver, method, args, span } => {
                    self.method_call(receiver, method, args, *span, true)
                }
                _ => error(
                    ErrorKind::TypeError("'try' must be applied to a call".to_string()),
                    *span,
                ),
            },

            Expr::Grouping { expr: inner, .. } => self.expr(inner, expected),
        }
    }

    /// Common type of a literal's elements
    fn join_types<'e>(&mut self, items: impl Iterator<Item = &'e Expr>, span: Span) -> Result<Type> {
        let mut joined: Option<Type> = None;
        for item in items {
            let ty = self.expr(item, None)?;
            joined = Some(match joined {
                None => ty,
                Some(current) if self.convertible(&ty, &current) => current,
                Some(current) if self.convertible(&current, &ty) => ty,
                Some(current) => return mismatch(&current, &ty, item.span()),
            });
        }
        match joined {
            Some(ty) => Ok(ty),
            None => error(ErrorKind::CannotInferEmpty, span),
        }
    }

    fn variant_fields(&self, enum_name: &str, variant: &str, span: Span) -> Result<Vec<(String, Type)>> {
        let info = match self.enums.get(enum_name) {
            Some(info) => info,
            None => return error(ErrorKind::UnknownType(enum_name.to_string()), span),
        };
        match info.variants.get(variant) {
            Some(fields) => Ok(fields.clone()),
            None => error(
                ErrorKind::UnknownMember(enum_name.to_string(), variant.to_string()),
                span,
            ),
        }
    }

    fn field_type(&self, ty: &Type, name: &str, span: Span) -> Result<Type> {
        let found = match ty {
            Type::Struct(s) => self
                .structs
                .get(s)
                .and_then(|info| info.fields.get(name))
                .map(|f| f.ty.clone()),
            Type::Protocol(p) => self
                .protocols
                .get(p)
                .and_then(|info| info.properties.get(name))
                .cloned(),
            other => methods::property_type(other, name),
        };
        match found {
            Some(ty) => Ok(ty),
            None => error(ErrorKind::UnknownMember(ty.to_string(), name.to_string()), span),
        }
    }

    /// Check arguments against parameters, including optional labels
    fn arguments(&mut self, what: &str, args: &[Arg], params: &[(String, Type)], required: usize, span: Span) -> Result<()> {
        if args.len() < required || args.len() > params.len() {
            return error(
                ErrorKind::WrongArity(what.to_string(), params.len(), args.len()),
                span,
            );
        }
        for (arg, (name, ty)) in args.iter().zip(params) {
            if let Some(label) = &arg.label {
                if label != name {
                    return error(
                        ErrorKind::TypeError(format!(
                            "argument label '{}' does not match parameter '{}' of '{}'",
                            label, name, what
                        )),
                        arg.value.span(),
                    );
                }
            }
            let actual = self.expr(&arg.value, Some(ty))?;
            self.expect_assignable(&actual, ty, arg.value.span())?;
        }
        Ok(())
    }

    fn call(&mut self, callee: &Expr, args: &[Arg], span: Span, tried: bool) -> Result<Type> {
        match callee {
            Expr::Ident { name, .. } if self.structs.contains_key(name) => {
                let info = &self.structs[name];
                let params: Vec<(String, Type)> = info
                    .fields
                    .iter()
                    .map(|(n, f)| (n.clone(), f.ty.clone()))
                    .collect();
                let required = info
                    .fields
                    .values()
                    .rposition(|f| !f.has_default)
                    .map_or(0, |i| i + 1);
                self.arguments(name, args, &params, required, span)?;
                Ok(Type::Struct(name.clone()))
            }

            Expr::Path { type_name, member, span: path_span } => {
                let fields = self.variant_fields(type_name, member, *path_span)?;
                let what = format!("{}::{}", type_name, member);
                self.arguments(&what, args, &fields, fields.len(), span)?;
                Ok(Type::Enum(type_name.clone()))
            }

            Expr::Ident { name, span: name_span } => {
                let (symbol, _) = self.lookup(name, *name_span)?;
                if let SymbolKind::Function { throws: true } = symbol.kind {
                    if !tried {
                        return error(ErrorKind::UnmarkedThrowingCall(name.clone()), span);
                    }
                }
                self.call_value(name, &symbol.ty, args, span)
            }

            other => {
                let ty = self.expr(other, None)?;
                self.call_value("function value", &ty, args, span)
            }
        }
    }

    fn call_value(&mut self, what: &str, ty: &Type, args: &[Arg], span: Span) -> Result<Type> {
        match ty {
            Type::Func(params, ret) => {
                let params: Vec<(String, Type)> =
                    params.iter().map(|t| (String::new(), t.clone())).collect();
                let unlabelled: Vec<Arg> = args
                    .iter()
                    .map(|a| Arg { label: None, value: a.value.clone() })
                    .collect();
                self.arguments(what, &unlabelled, &params, params.len(), span)?;
                Ok((**ret).clone())
            }
            other => error(ErrorKind::NotCallable(format!("value of type {}", other)), span),
        }
    }

    fn method_call(
        &mut self,
        receiver: &Expr,
        method: &str,
        args: &[Arg],
        span: Span,
        tried: bool,
    ) -> Result<Type> {
        let receiver_ty = self.expr(receiver, None)?;

        if let Some(sig) = methods::method_signature(&receiver_ty, method) {
            if sig.mutating {
                if !receiver.is_place() {
                    return error(
                        ErrorKind::TypeError(format!(
                            "'{}' changes its receiver, which must be a variable, field or element",
                            method
                        )),
                        span,
                    );
                }
                self.place(receiver, receiver.span())?;
            }
            let params: Vec<(String, Type)> =
                sig.params.iter().map(|t| (String::new(), t.clone())).collect();
            self.arguments(method, args, &params, params.len(), span)?;
            return Ok(sig.ret);
        }

        let user_method = match &receiver_ty {
            Type::Struct(name) => self.structs.get(name).and_then(|s| s.methods.get(method)),
            Type::Enum(name) => self.enums.get(name).and_then(|e| e.methods.get(method)),
            Type::Protocol(name) => self.protocols.get(name).and_then(|p| p.methods.get(method)),
            _ => None,
        }
        .cloned();

        if let Some(info) = user_method {
            if info.throws && !tried {
                return error(ErrorKind::UnmarkedThrowingCall(method.to_string()), span);
            }
            if info.mutates_self && receiver.is_place() {
                self.place(receiver, receiver.span())?;
            }
            self.arguments(method, args, &info.params, info.params.len(), span)?;
            return Ok(info.ret);
        }

        // a struct field holding a function value
        if let Type::Struct(name) = &receiver_ty {
            let field = self
                .structs
                .get(name)
                .and_then(|s| s.fields.get(method))
                .map(|f| f.ty.clone());
            if let Some(ty @ Type::Func(..)) = field {
                return self.call_value(method, &ty, args, span);
            }
        }

        error(
            ErrorKind::UnknownMember(receiver_ty.to_string(), method.to_string()),
            span,
        )
    }
}

impl Default for Checker {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether control can never fall off the end of `stmts`
fn always_exits(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|stmt| match stmt {
        Stmt::Return { .. } | Stmt::Raise { .. } => true,
        Stmt::If { branches, else_branch: Some(else_body), .. } => {
            branches.iter().all(|(_, body)| always_exits(body)) && always_exits(else_body)
        }
        Stmt::Match { arms, .. } => !arms.is_empty() && arms.iter().all(|arm| always_exits(&arm.body)),
        Stmt::Grab { body, .. } | Stmt::Await { body, .. } => always_exits(body),
        Stmt::Within { body, handler, .. } => always_exits(body) && always_exits(handler),
        _ => false,
    })
}

/// Check a program with a fresh checker
pub fn check(program: &Program) -> Result<()> {
    Checker::new().check(program)
}
