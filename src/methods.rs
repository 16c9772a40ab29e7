//! Built-in members of collections and strings
//!
//! Static signatures for the checker and the run-time implementations for
//! the interpreter live side by side so they cannot drift apart.

use indexmap::IndexSet;

use crate::error::{ErrorKind, NoirError, Result};
use crate::types::Type;
use crate::value::Value;

/// Signature of a built-in method
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltinSig {
    pub params: Vec<Type>,
    pub ret: Type,
    /// Whether the call changes its receiver
    pub mutating: bool,
}

fn sig(params: Vec<Type>, ret: Type, mutating: bool) -> Option<BuiltinSig> {
    Some(BuiltinSig { params, ret, mutating })
}

/// Type of a built-in property (`count`, `isEmpty`)
pub fn property_type(receiver: &Type, name: &str) -> Option<Type> {
    if !(receiver.is_collection() || *receiver == Type::String) {
        return None;
    }
    match name {
        "count" => Some(Type::Int),
        "isEmpty" => Some(Type::Bool),
        _ => None,
    }
}

/// Signature of a built-in method on `receiver`
pub fn method_signature(receiver: &Type, name: &str) -> Option<BuiltinSig> {
    match receiver {
        Type::Array(t) => {
            let t = (**t).clone();
            match name {
                "append" => sig(vec![t], Type::Void, true),
                "insert" => sig(vec![t, Type::Int], Type::Void, true),
                "remove" => sig(vec![Type::Int], t, true),
                "pop" => sig(vec![], t, true),
                "contains" => sig(vec![t], Type::Bool, false),
                _ => None,
            }
        }
        Type::Dict(k, v) => {
            let (k, v) = ((**k).clone(), (**v).clone());
            match name {
                "contains" => sig(vec![k], Type::Bool, false),
                "remove" => sig(vec![k], v, true),
                "keys" => sig(vec![], Type::Array(Box::new(k)), false),
                "values" => sig(vec![], Type::Array(Box::new(v)), false),
                _ => None,
            }
        }
        Type::Set(t) | Type::OrderedSet(t) => {
            let t = (**t).clone();
            match name {
                "insert" => sig(vec![t], Type::Void, true),
                "contains" => sig(vec![t], Type::Bool, false),
                "remove" => sig(vec![t], Type::Bool, true),
                _ => None,
            }
        }
        Type::String => match name {
            "contains" => sig(vec![Type::String], Type::Bool, false),
            _ => None,
        },
        _ => None,
    }
}

/// Whether a built-in method of this name changes its receiver
pub fn is_mutating(name: &str) -> bool {
    matches!(name, "append" | "insert" | "remove" | "pop")
}

fn runtime_error(msg: String) -> NoirError {
    NoirError::new(ErrorKind::RuntimeError(msg), None)
}

fn index_in(index: i64, len: usize) -> Result<usize> {
    if index >= 0 && (index as usize) < len {
        Ok(index as usize)
    } else {
        Err(NoirError::new(ErrorKind::IndexOutOfRange(index, len), None))
    }
}

/// Read a built-in property
pub fn get_property(receiver: &Value, name: &str) -> Result<Value> {
    let len = match receiver {
        Value::Array(items) => items.len(),
        Value::Dict(entries) => entries.len(),
        Value::Set(items) | Value::OrderedSet(items) => items.len(),
        Value::Str(s) => s.chars().count(),
        other => {
            return Err(NoirError::new(
                ErrorKind::MissingMember(format!("{}.{}", other.type_name(), name)),
                None,
            ))
        }
    };
    match name {
        "count" => Ok(Value::Int(len as i64)),
        "isEmpty" => Ok(Value::Bool(len == 0)),
        _ => Err(NoirError::new(
            ErrorKind::MissingMember(format!("{}.{}", receiver.type_name(), name)),
            None,
        )),
    }
}

/// Element at `index`, for `a[i]`, `d[k]`, `s[i]` on ordered sets and strings
pub fn index(receiver: &Value, index: &Value) -> Result<Value> {
    match receiver {
        Value::Array(items) => Ok(items[index_in(index.as_int()?, items.len())?].clone()),
        Value::OrderedSet(items) => {
            let i = index_in(index.as_int()?, items.len())?;
            items
                .get_index(i)
                .cloned()
                .ok_or_else(|| NoirError::new(ErrorKind::IndexOutOfRange(i as i64, items.len()), None))
        }
        Value::Dict(entries) => entries
            .get(index)
            .cloned()
            .ok_or_else(|| NoirError::new(ErrorKind::MissingKey(index.repr()), None)),
        Value::Str(s) => {
            let n = index.as_int()?;
            let len = s.chars().count();
            let i = index_in(n, len)?;
            s.chars()
                .nth(i)
                .map(Value::Char)
                .ok_or_else(|| NoirError::new(ErrorKind::IndexOutOfRange(n, len), None))
        }
        other => Err(runtime_error(format!("cannot index into {}", other.type_name()))),
    }
}

/// Slot at `index` for element assignment (`a[i] = v`, `d[k] = v`)
pub fn index_mut<'a>(receiver: &'a mut Value, index: &Value) -> Result<&'a mut Value> {
    match receiver {
        Value::Array(items) => {
            let i = index_in(index.as_int()?, items.len())?;
            Ok(&mut items[i])
        }
        Value::Dict(entries) => Ok(entries.entry(index.clone()).or_insert(Value::Void)),
        other => Err(runtime_error(format!(
            "cannot assign into an element of {}",
            other.type_name()
        ))),
    }
}

/// Elements visited by `for x in value`
pub fn iterate(value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::Set(items) | Value::OrderedSet(items) => Ok(items.iter().cloned().collect()),
        Value::Dict(entries) => Ok(entries.keys().cloned().collect()),
        Value::Str(s) => Ok(s.chars().map(Value::Char).collect()),
        other => Err(runtime_error(format!("cannot iterate over {}", other.type_name()))),
    }
}

fn arg(args: &[Value], i: usize, method: &str) -> Result<Value> {
    args.get(i).cloned().ok_or_else(|| {
        NoirError::new(
            ErrorKind::WrongArity(method.to_string(), i + 1, args.len()),
            None,
        )
    })
}

/// Call a built-in method. Mutating methods change `receiver` in place.
pub fn call_method(receiver: &mut Value, name: &str, args: &[Value]) -> Result<Value> {
    match receiver {
        Value::Array(items) => match name {
            "append" => {
                items.push(arg(args, 0, name)?);
                Ok(Value::Void)
            }
            "insert" => {
                let value = arg(args, 0, name)?;
                let at = arg(args, 1, name)?.as_int()?;
                // inserting at the end is allowed
                let i = index_in(at, items.len() + 1)?;
                items.insert(i, value);
                Ok(Value::Void)
            }
            "remove" => {
                let i = index_in(arg(args, 0, name)?.as_int()?, items.len())?;
                Ok(items.remove(i))
            }
            "pop" => items
                .pop()
                .ok_or_else(|| runtime_error("pop from an empty array".to_string())),
            "contains" => Ok(Value::Bool(items.contains(&arg(args, 0, name)?))),
            _ => Err(missing(name, "Array")),
        },
        Value::Dict(entries) => match name {
            "contains" => Ok(Value::Bool(entries.contains_key(&arg(args, 0, name)?))),
            "remove" => {
                let key = arg(args, 0, name)?;
                entries
                    .shift_remove(&key)
                    .ok_or_else(|| NoirError::new(ErrorKind::MissingKey(key.repr()), None))
            }
            "keys" => Ok(Value::Array(entries.keys().cloned().collect())),
            "values" => Ok(Value::Array(entries.values().cloned().collect())),
            _ => Err(missing(name, "Dict")),
        },
        Value::Set(items) | Value::OrderedSet(items) => set_method(items, name, args),
        Value::Str(s) => match name {
            "contains" => match arg(args, 0, name)? {
                Value::Str(needle) => Ok(Value::Bool(s.contains(needle.as_str()))),
                Value::Char(c) => Ok(Value::Bool(s.contains(c))),
                other => Err(runtime_error(format!(
                    "String.contains expects a String, got {}",
                    other.type_name()
                ))),
            },
            _ => Err(missing(name, "String")),
        },
        other => Err(missing(name, other.type_name())),
    }
}

fn set_method(items: &mut IndexSet<Value>, name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "insert" => {
            items.insert(arg(args, 0, name)?);
            Ok(Value::Void)
        }
        "contains" => Ok(Value::Bool(items.contains(&arg(args, 0, name)?))),
        // shift keeps insertion order for ordered sets
        "remove" => Ok(Value::Bool(items.shift_remove(&arg(args, 0, name)?))),
        _ => Err(missing(name, "Set")),
    }
}

fn missing(name: &str, ty: &str) -> NoirError {
    NoirError::new(ErrorKind::MissingMember(format!("{}.{}", ty, name)), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signatures() {
        let ints = Type::Array(Box::new(Type::Int));
        let append = method_signature(&ints, "append").unwrap();
        assert_eq!(append.params, vec![Type::Int]);
        assert!(append.mutating);
        assert!(!method_signature(&ints, "contains").unwrap().mutating);
        assert!(method_signature(&Type::Int, "append").is_none());
        assert_eq!(property_type(&Type::String, "count"), Some(Type::Int));
        assert_eq!(property_type(&Type::Bool, "count"), None);
    }

    #[test]
    fn test_array_methods() {
        let mut a = Value::Array(vec![Value::Int(1), Value::Int(3)]);
        call_method(&mut a, "insert", &[Value::Int(2), Value::Int(1)]).unwrap();
        call_method(&mut a, "append", &[Value::Int(4)]).unwrap();
        assert_eq!(a.to_string(), "[1, 2, 3, 4]");
        assert_eq!(call_method(&mut a, "pop", &[]).unwrap(), Value::Int(4));
        assert_eq!(call_method(&mut a, "remove", &[Value::Int(0)]).unwrap(), Value::Int(1));
        assert!(matches!(
            call_method(&mut a, "remove", &[Value::Int(5)]).unwrap_err().kind,
            ErrorKind::IndexOutOfRange(5, 2)
        ));
    }

    #[test]
    fn test_ordered_set_keeps_order_after_remove() {
        let mut s = Value::OrderedSet(
            [Value::Int(3), Value::Int(1), Value::Int(2)].into_iter().collect(),
        );
        assert_eq!(call_method(&mut s, "remove", &[Value::Int(1)]).unwrap(), Value::Bool(true));
        assert_eq!(call_method(&mut s, "remove", &[Value::Int(9)]).unwrap(), Value::Bool(false));
        assert_eq!(index(&s, &Value::Int(1)).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_dict_lookup() {
        let mut d = Value::Dict(Default::default());
        *index_mut(&mut d, &Value::Str("a".into())).unwrap() = Value::Int(1);
        assert_eq!(index(&d, &Value::Str("a".into())).unwrap(), Value::Int(1));
        assert!(matches!(
            index(&d, &Value::Str("b".into())).unwrap_err().kind,
            ErrorKind::MissingKey(_)
        ));
        assert_eq!(
            call_method(&mut d, "keys", &[]).unwrap(),
            Value::Array(vec![Value::Str("a".into())])
        );
    }

    #[test]
    fn test_string_members() {
        let s = Value::Str("héllo".into());
        assert_eq!(get_property(&s, "count").unwrap(), Value::Int(5));
        assert_eq!(index(&s, &Value::Int(1)).unwrap(), Value::Char('é'));
        assert_eq!(iterate(&s).unwrap().len(), 5);
    }
}
