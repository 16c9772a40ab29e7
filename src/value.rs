//! Runtime value types for Noir
//!
//! Collections and structs are plain values: assigning one copies it.
//! Only functions (which share their defining scope) and shared resources
//! are reference types.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::ast::FuncDecl;
use crate::environment::{Environment, ScopeCopies};
use crate::error::{ErrorKind, NoirError, Result};
use crate::runtime::SharedResource;
use crate::types::Type;

/// A function together with the scope it was defined in
pub struct Closure {
    pub decl: Arc<FuncDecl>,
    pub env: Environment,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<func {}>", self.decl.name)
    }
}

/// A variable binding: its value and the declared type of the slot.
/// Later writes into the slot are converted to that type.
#[derive(Debug, Clone)]
pub struct Slot {
    pub value: Value,
    pub ty: Type,
}

impl Slot {
    pub fn new(value: Value, ty: Type) -> Self {
        Self { value, ty }
    }
}

/// Runtime values in Noir
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Double(f64),
    Char(char),
    Bool(bool),
    Str(String),
    Array(Vec<Value>),
    Dict(IndexMap<Value, Value>),
    Set(IndexSet<Value>),
    OrderedSet(IndexSet<Value>),

    /// Enum instance: variant tag plus positional payload
    Enum {
        enum_name: String,
        variant: String,
        payload: Vec<Value>,
    },

    /// Struct instance with fields in declaration order
    Struct {
        name: String,
        fields: IndexMap<String, Value>,
    },

    Function(Arc<Closure>),

    /// Binding of a `shared` name; the value itself lives in the resource
    Resource(Arc<SharedResource>),

    Void,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Double(_) => "Double",
            Value::Char(_) => "Char",
            Value::Bool(_) => "Bool",
            Value::Str(_) => "String",
            Value::Array(_) => "Array",
            Value::Dict(_) => "Dict",
            Value::Set(_) => "Set",
            Value::OrderedSet(_) => "OrderedSet",
            Value::Enum { .. } => "enum",
            Value::Struct { .. } => "struct",
            Value::Function(_) => "function",
            Value::Resource(_) => "shared resource",
            Value::Void => "Void",
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(NoirError::new(
                ErrorKind::RuntimeError(format!("expected Bool, got {}", other.type_name())),
                None,
            )),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(NoirError::new(
                ErrorKind::RuntimeError(format!("expected Int, got {}", other.type_name())),
                None,
            )),
        }
    }

    /// Best-effort static type of a value, for bindings that have no
    /// declared type (loop variables)
    pub fn type_of(&self) -> Type {
        match self {
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Double(_) => Type::Double,
            Value::Char(_) => Type::Char,
            Value::Bool(_) => Type::Bool,
            Value::Str(_) => Type::String,
            Value::Array(items) => Type::Array(first_type(items.iter())),
            Value::Set(items) => Type::Set(first_type(items.iter())),
            Value::OrderedSet(items) => Type::OrderedSet(first_type(items.iter())),
            Value::Dict(entries) => Type::Dict(
                first_type(entries.keys()),
                first_type(entries.values()),
            ),
            Value::Enum { enum_name, .. } => Type::Enum(enum_name.clone()),
            Value::Struct { name, .. } => Type::Struct(name.clone()),
            Value::Function(_) | Value::Resource(_) | Value::Void => Type::Void,
        }
    }

    /// Numeric payload as f64, for mixed arithmetic and comparison
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) | Value::Double(x) => Some(*x),
            _ => None,
        }
    }

    /// Adapt a value to the slot type it is stored into: widen numbers,
    /// convert element-wise and give `empty` its declared collection kind.
    pub fn coerce(self, ty: &Type) -> Value {
        match (self, ty) {
            (Value::Int(n), Type::Float) => Value::Float(n as f64),
            (Value::Int(n), Type::Double) => Value::Double(n as f64),
            (Value::Float(x), Type::Double) => Value::Double(x),
            (Value::Array(items), Type::Array(elem)) => {
                Value::Array(items.into_iter().map(|v| v.coerce(elem)).collect())
            }
            (Value::Array(items), Type::Set(elem)) => {
                Value::Set(items.into_iter().map(|v| v.coerce(elem)).collect())
            }
            (Value::Array(items), Type::OrderedSet(elem)) => {
                Value::OrderedSet(items.into_iter().map(|v| v.coerce(elem)).collect())
            }
            (Value::Array(items), Type::Dict(..)) if items.is_empty() => {
                Value::Dict(IndexMap::new())
            }
            (Value::Set(items), Type::Set(elem)) => {
                Value::Set(items.into_iter().map(|v| v.coerce(elem)).collect())
            }
            (Value::OrderedSet(items), Type::OrderedSet(elem)) => {
                Value::OrderedSet(items.into_iter().map(|v| v.coerce(elem)).collect())
            }
            (Value::Dict(entries), Type::Dict(k, v)) => Value::Dict(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.coerce(k), value.coerce(v)))
                    .collect(),
            ),
            (value, _) => value,
        }
    }

    /// Copy for another task: functions inside the value are rebound to
    /// the task's copied scopes
    pub fn isolate(self, copies: &mut ScopeCopies) -> Value {
        match self {
            Value::Function(closure) => Value::Function(Arc::new(Closure {
                decl: Arc::clone(&closure.decl),
                env: closure.env.isolate(copies),
            })),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| v.isolate(copies)).collect())
            }
            Value::Set(items) => Value::Set(items.into_iter().map(|v| v.isolate(copies)).collect()),
            Value::OrderedSet(items) => {
                Value::OrderedSet(items.into_iter().map(|v| v.isolate(copies)).collect())
            }
            Value::Dict(entries) => Value::Dict(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.isolate(copies), value.isolate(copies)))
                    .collect(),
            ),
            Value::Enum { enum_name, variant, payload } => Value::Enum {
                enum_name,
                variant,
                payload: payload.into_iter().map(|v| v.isolate(copies)).collect(),
            },
            Value::Struct { name, fields } => Value::Struct {
                name,
                fields: fields
                    .into_iter()
                    .map(|(field, value)| (field, value.isolate(copies)))
                    .collect(),
            },
            other => other,
        }
    }

    /// Explicit `as` conversion
    pub fn cast(self, ty: &Type) -> Result<Value> {
        match (self, ty) {
            (Value::Float(x) | Value::Double(x), Type::Int) => {
                let truncated = x.trunc();
                if !truncated.is_finite()
                    || truncated < i64::MIN as f64
                    || truncated >= i64::MAX as f64
                {
                    return Err(NoirError::new(
                        ErrorKind::RuntimeError(format!("{} cannot be converted to Int", x)),
                        None,
                    ));
                }
                Ok(Value::Int(truncated as i64))
            }
            (Value::Double(x), Type::Float) => Ok(Value::Float(x)),
            (value, ty) => Ok(value.coerce(ty)),
        }
    }

    /// Rendering used inside collections: text is quoted
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("\"{}\"", s),
            Value::Char(c) => format!("'{}'", c),
            other => other.to_string(),
        }
    }
}

fn first_type<'a>(mut items: impl Iterator<Item = &'a Value>) -> Box<Type> {
    Box::new(items.next().map_or(Type::Void, Value::type_of))
}

fn format_float(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

fn join<'a>(items: impl Iterator<Item = &'a Value>) -> String {
    items.map(|v| v.repr()).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) | Value::Double(x) => write!(f, "{}", format_float(*x)),
            Value::Char(c) => write!(f, "{}", c),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(items) => write!(f, "[{}]", join(items.iter())),
            Value::Set(items) | Value::OrderedSet(items) => write!(f, "{{{}}}", join(items.iter())),
            Value::Dict(entries) => {
                let entries: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                if entries.is_empty() {
                    write!(f, "[:]")
                } else {
                    write!(f, "[{}]", entries.join(", "))
                }
            }
            Value::Enum { enum_name, variant, payload } => {
                write!(f, "{}::{}", enum_name, variant)?;
                if !payload.is_empty() {
                    write!(f, "({})", join(payload.iter()))?;
                }
                Ok(())
            }
            Value::Struct { name, fields } => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.repr()))
                    .collect();
                write!(f, "{}({})", name, fields.join(", "))
            }
            Value::Function(closure) => write!(f, "<func {}>", closure.decl.name),
            Value::Resource(resource) => write!(f, "<shared {}>", resource.name),
            Value::Void => write!(f, "void"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) | (Value::Double(a), Value::Double(b)) => {
                a.to_bits() == b.to_bits()
            }
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::OrderedSet(a), Value::OrderedSet(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
            }
            (
                Value::Enum { enum_name: e1, variant: v1, payload: p1 },
                Value::Enum { enum_name: e2, variant: v2, payload: p2 },
            ) => e1 == e2 && v1 == v2 && p1 == p2,
            (
                Value::Struct { name: n1, fields: f1 },
                Value::Struct { name: n2, fields: f2 },
            ) => n1 == n2 && f1 == f2,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Resource(a), Value::Resource(b)) => Arc::ptr_eq(a, b),
            (Value::Void, Value::Void) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Int(n) => n.hash(state),
            Value::Float(x) | Value::Double(x) => x.to_bits().hash(state),
            Value::Char(c) => c.hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Str(s) => s.hash(state),
            Value::Array(items) => items.hash(state),
            // unordered containers: equal values may iterate differently
            Value::Dict(entries) => entries.len().hash(state),
            Value::Set(items) => items.len().hash(state),
            Value::OrderedSet(items) => {
                for item in items {
                    item.hash(state);
                }
            }
            Value::Enum { enum_name, variant, payload } => {
                enum_name.hash(state);
                variant.hash(state);
                payload.hash(state);
            }
            Value::Struct { name, fields } => {
                name.hash(state);
                for (k, v) in fields {
                    k.hash(state);
                    v.hash(state);
                }
            }
            Value::Function(closure) => (Arc::as_ptr(closure) as usize).hash(state),
            Value::Resource(resource) => resource.id.hash(state),
            Value::Void => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Double(2.5).to_string(), "2.5");
        assert_eq!(
            Value::Array(vec![Value::Str("a".into()), Value::Char('b')]).to_string(),
            "[\"a\", 'b']"
        );
        let circle = Value::Enum {
            enum_name: "Shape".into(),
            variant: "Circle".into(),
            payload: vec![Value::Float(1.0)],
        };
        assert_eq!(circle.to_string(), "Shape::Circle(1.0)");
        let mut fields = IndexMap::new();
        fields.insert("x".to_string(), Value::Int(1));
        fields.insert("y".to_string(), Value::Int(2));
        let point = Value::Struct { name: "Point".into(), fields };
        assert_eq!(point.to_string(), "Point(x: 1, y: 2)");
    }

    #[test]
    fn test_coerce_widens_and_shapes_collections() {
        let ints = Value::Array(vec![Value::Int(1), Value::Int(1), Value::Int(2)]);
        let set = ints.coerce(&Type::Set(Box::new(Type::Float)));
        match set {
            Value::Set(items) => {
                assert_eq!(items.len(), 2);
                assert!(items.contains(&Value::Float(1.0)));
            }
            other => panic!("expected set, got {}", other),
        }

        let dict = Value::Array(Vec::new())
            .coerce(&Type::Dict(Box::new(Type::String), Box::new(Type::Int)));
        assert!(matches!(dict, Value::Dict(d) if d.is_empty()));
    }

    #[test]
    fn test_cast_truncates() {
        assert_eq!(Value::Float(3.9).cast(&Type::Int).unwrap(), Value::Int(3));
        assert_eq!(Value::Double(-2.5).cast(&Type::Int).unwrap(), Value::Int(-2));
        assert!(Value::Double(f64::NAN).cast(&Type::Int).is_err());
        assert_eq!(Value::Float(1.5).cast(&Type::Double).unwrap(), Value::Double(1.5));
    }

    #[test]
    fn test_set_equality_ignores_order() {
        let a: IndexSet<Value> = [Value::Int(1), Value::Int(2)].into_iter().collect();
        let b: IndexSet<Value> = [Value::Int(2), Value::Int(1)].into_iter().collect();
        assert_eq!(Value::Set(a.clone()), Value::Set(b.clone()));
        assert_ne!(Value::OrderedSet(a), Value::OrderedSet(b));
    }
}
