//! Variable environment for Noir
//!
//! Handles lexically scoped storage. The same structure backs the checker
//! (bindings are static symbol information) and the interpreter (bindings
//! are values). Scopes are reference-counted so closures and spawned tasks
//! can keep their defining scope alive.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ErrorKind, NoirError, Result};
use crate::value::Slot;

#[derive(Debug)]
struct Scope<T> {
    values: HashMap<String, T>,
    parent: Option<Environment<T>>,
    depth: usize,
}

/// A chain of scopes; cloning shares the scope rather than copying it
#[derive(Debug)]
pub struct Environment<T = Slot> {
    scope: Arc<RwLock<Scope<T>>>,
}

impl<T> Clone for Environment<T> {
    fn clone(&self) -> Self {
        Self {
            scope: Arc::clone(&self.scope),
        }
    }
}

impl<T: Clone> Environment<T> {
    /// Create a new global environment
    pub fn new() -> Self {
        Self {
            scope: Arc::new(RwLock::new(Scope {
                values: HashMap::new(),
                parent: None,
                depth: 0,
            })),
        }
    }

    /// Create a child environment with parent scope
    pub fn with_parent(parent: &Environment<T>) -> Self {
        let depth = parent.depth() + 1;
        Self {
            scope: Arc::new(RwLock::new(Scope {
                values: HashMap::new(),
                parent: Some(parent.clone()),
                depth,
            })),
        }
    }

    /// Copy of this scope's own bindings, sharing the parent chain
    pub fn snapshot(&self) -> Self {
        let scope = self.scope.read();
        Self {
            scope: Arc::new(RwLock::new(Scope {
                values: scope.values.clone(),
                parent: scope.parent.clone(),
                depth: scope.depth,
            })),
        }
    }

    /// Number of scopes between this one and the root
    pub fn depth(&self) -> usize {
        self.scope.read().depth
    }

    /// Define a name in this scope, replacing any previous binding here
    pub fn define(&self, name: impl Into<String>, value: T) {
        self.scope.write().values.insert(name.into(), value);
    }

    /// Whether `name` is bound in this very scope
    pub fn is_local(&self, name: &str) -> bool {
        self.scope.read().values.contains_key(name)
    }

    /// Find a binding together with the depth of the scope that holds it
    pub fn lookup_with_depth(&self, name: &str) -> Option<(T, usize)> {
        let scope = self.scope.read();
        if let Some(value) = scope.values.get(name) {
            return Some((value.clone(), scope.depth));
        }
        let parent = scope.parent.clone();
        drop(scope);
        parent.and_then(|p| p.lookup_with_depth(name))
    }

    pub fn lookup(&self, name: &str) -> Option<T> {
        self.lookup_with_depth(name).map(|(value, _)| value)
    }

    /// Get a variable's value
    pub fn get(&self, name: &str) -> Result<T> {
        self.lookup(name).ok_or_else(|| {
            NoirError::new(ErrorKind::UndefinedVariable(name.to_string()), None)
        })
    }

    /// Run `f` on the binding in place. The scope stays locked while `f`
    /// runs, so `f` must not touch this environment.
    pub fn with_mut<R>(&self, name: &str, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut scope = self.scope.write();
        if let Some(slot) = scope.values.get_mut(name) {
            return Ok(f(slot));
        }
        let parent = scope.parent.clone();
        drop(scope);
        match parent {
            Some(parent) => parent.with_mut(name, f),
            None => Err(NoirError::new(
                ErrorKind::UndefinedVariable(name.to_string()),
                None,
            )),
        }
    }
}

/// Scopes already copied by [`Environment::isolate`], keyed by the
/// address of the original scope
pub type ScopeCopies = HashMap<usize, Environment>;

impl Environment<Slot> {
    /// Deep copy of the whole scope chain for a new task. Plain values are
    /// duplicated and functions are rebound to the copied scopes, so the
    /// task cannot reach the caller's bindings. Shared resources stay shared.
    pub fn isolate(&self, copies: &mut ScopeCopies) -> Environment {
        let key = Arc::as_ptr(&self.scope) as usize;
        if let Some(copy) = copies.get(&key) {
            return copy.clone();
        }

        let (values, parent, depth) = {
            let scope = self.scope.read();
            (scope.values.clone(), scope.parent.clone(), scope.depth)
        };
        let parent = parent.map(|p| p.isolate(copies));
        let copy = Environment {
            scope: Arc::new(RwLock::new(Scope {
                values: HashMap::with_capacity(values.len()),
                parent,
                depth,
            })),
        };
        // registered before the values so closures over this scope find it
        copies.insert(key, copy.clone());

        for (name, slot) in values {
            let value = slot.value.isolate(copies);
            copy.define(name, Slot::new(value, slot.ty));
        }
        copy
    }
}

impl<T: Clone> Default for Environment<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_get() {
        let env: Environment<i64> = Environment::new();
        env.define("x", 1);
        assert_eq!(env.get("x").unwrap(), 1);
        assert!(matches!(
            env.get("y").unwrap_err().kind,
            ErrorKind::UndefinedVariable(_)
        ));
    }

    #[test]
    fn test_lookup_walks_outward() {
        let global: Environment<i64> = Environment::new();
        global.define("x", 1);
        let inner = Environment::with_parent(&global);
        inner.define("y", 2);

        assert_eq!(inner.get("x").unwrap(), 1);
        assert_eq!(inner.lookup_with_depth("x"), Some((1, 0)));
        assert_eq!(inner.lookup_with_depth("y"), Some((2, 1)));
        assert!(global.lookup("y").is_none());
    }

    #[test]
    fn test_shadowing() {
        let global: Environment<i64> = Environment::new();
        global.define("x", 1);
        let inner = Environment::with_parent(&global);
        inner.define("x", 10);
        assert!(inner.is_local("x"));
        assert_eq!(inner.get("x").unwrap(), 10);
        assert_eq!(global.get("x").unwrap(), 1);
    }

    #[test]
    fn test_with_mut_reaches_defining_scope() {
        let global: Environment<i64> = Environment::new();
        global.define("count", 0);
        let inner = Environment::with_parent(&global);
        inner.with_mut("count", |n| *n = 5).unwrap();
        assert_eq!(global.get("count").unwrap(), 5);
        assert!(inner.with_mut("missing", |n| *n = 1).is_err());
    }

    #[test]
    fn test_snapshot_is_independent() {
        let env: Environment<i64> = Environment::new();
        env.define("x", 1);
        let copy = env.snapshot();
        copy.define("y", 2);
        copy.with_mut("x", |n| *n = 5).unwrap();
        assert_eq!(env.get("x").unwrap(), 1);
        assert!(env.lookup("y").is_none());
    }

    #[test]
    fn test_clones_share_the_scope() {
        let env: Environment<Vec<i64>> = Environment::new();
        env.define("items", vec![1]);
        let captured = env.clone();
        captured.with_mut("items", |items| items.push(2)).unwrap();
        assert_eq!(env.get("items").unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_isolate_copies_the_chain() {
        use crate::ast::FuncDecl;
        use crate::token::Span;
        use crate::types::Type;
        use crate::value::{Closure, Value};

        let global: Environment = Environment::new();
        global.define("count", Slot::new(Value::Int(1), Type::Int));
        let decl = Arc::new(FuncDecl {
            name: "bump".to_string(),
            params: Vec::new(),
            return_type: None,
            throws: false,
            is_async: false,
            body: Vec::new(),
            span: Span::default(),
        });
        let bump = Value::Function(Arc::new(Closure { decl, env: global.clone() }));
        global.define("bump", Slot::new(bump, Type::Void));
        let local = Environment::with_parent(&global);

        let copy = local.isolate(&mut ScopeCopies::new());
        copy.with_mut("count", |slot| slot.value = Value::Int(7)).unwrap();
        assert_eq!(global.get("count").unwrap().value, Value::Int(1));

        // the copied function sees the copied globals, not the originals
        match copy.get("bump").unwrap().value {
            Value::Function(closure) => {
                assert_eq!(closure.env.get("count").unwrap().value, Value::Int(7));
            }
            other => panic!("expected a function, got {:?}", other),
        }
    }
}
