//! Static types for Noir
//!
//! The checker and the interpreter share this module: the checker uses it to
//! validate declarations and conversions, the interpreter to coerce values
//! when they land in a typed slot.

use std::fmt;

use crate::ast::{BinaryOp, TypeExpr};
use crate::error::{ErrorKind, NoirError, Result};

/// A resolved type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Float,
    Double,
    Char,
    Bool,
    String,
    Array(Box<Type>),
    Dict(Box<Type>, Box<Type>),
    Set(Box<Type>),
    OrderedSet(Box<Type>),
    Enum(String),
    Struct(String),
    Protocol(String),
    Func(Vec<Type>, Box<Type>),
    Void,
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float | Type::Double)
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            Type::Array(_) | Type::Dict(..) | Type::Set(_) | Type::OrderedSet(_)
        )
    }

    /// Element type produced by iterating a value of this type
    pub fn element(&self) -> Option<Type> {
        match self {
            Type::Array(t) | Type::Set(t) | Type::OrderedSet(t) => Some((**t).clone()),
            Type::Dict(k, _) => Some((**k).clone()),
            Type::String => Some(Type::Char),
            _ => None,
        }
    }

    /// Name of a user-defined type
    pub fn nominal(&self) -> Option<&str> {
        match self {
            Type::Enum(n) | Type::Struct(n) | Type::Protocol(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "Int"),
            Type::Float => write!(f, "Float"),
            Type::Double => write!(f, "Double"),
            Type::Char => write!(f, "Char"),
            Type::Bool => write!(f, "Bool"),
            Type::String => write!(f, "String"),
            Type::Array(t) => write!(f, "Array<{}>", t),
            Type::Dict(k, v) => write!(f, "Dict<{}, {}>", k, v),
            Type::Set(t) => write!(f, "Set<{}>", t),
            Type::OrderedSet(t) => write!(f, "OrderedSet<{}>", t),
            Type::Enum(n) | Type::Struct(n) | Type::Protocol(n) => write!(f, "{}", n),
            Type::Func(params, ret) => {
                let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
                write!(f, "func({}) -> {}", params.join(", "), ret)
            }
            Type::Void => write!(f, "Void"),
        }
    }
}

/// Resolve a written type. `lookup` maps user-defined names to their type.
pub fn resolve(expr: &TypeExpr, lookup: &dyn Fn(&str) -> Option<Type>) -> Result<Type> {
    match expr {
        TypeExpr::Func { params, ret, .. } => {
            let params = params
                .iter()
                .map(|p| resolve(p, lookup))
                .collect::<Result<Vec<_>>>()?;
            let ret = match ret {
                Some(r) => resolve(r, lookup)?,
                None => Type::Void,
            };
            Ok(Type::Func(params, Box::new(ret)))
        }
        TypeExpr::Named { name, args, span } => {
            let arity = |expected: usize| -> Result<()> {
                if args.len() == expected {
                    Ok(())
                } else {
                    Err(NoirError::new(
                        ErrorKind::TypeError(format!(
                            "type '{}' takes {} type argument(s), got {}",
                            name,
                            expected,
                            args.len()
                        )),
                        Some(*span),
                    ))
                }
            };
            let arg = |i: usize| resolve(&args[i], lookup).map(Box::new);

            let ty = match name.as_str() {
                "Int" => Type::Int,
                "Float" => Type::Float,
                "Double" => Type::Double,
                "Char" => Type::Char,
                "Bool" => Type::Bool,
                "String" => Type::String,
                "Void" => Type::Void,
                "Array" => {
                    arity(1)?;
                    return Ok(Type::Array(arg(0)?));
                }
                "Dict" => {
                    arity(2)?;
                    return Ok(Type::Dict(arg(0)?, arg(1)?));
                }
                "Set" => {
                    arity(1)?;
                    return Ok(Type::Set(arg(0)?));
                }
                "OSet" | "OrderedSet" => {
                    arity(1)?;
                    return Ok(Type::OrderedSet(arg(0)?));
                }
                other => match lookup(other) {
                    Some(ty) => ty,
                    None => {
                        return Err(NoirError::new(
                            ErrorKind::UnknownType(other.to_string()),
                            Some(*span),
                        ))
                    }
                },
            };
            arity(0)?;
            Ok(ty)
        }
    }
}

/// Whether a value of type `from` may be stored where `to` is expected
/// without a cast. `conforms(type_name, protocol)` answers declared conformance.
pub fn can_convert(from: &Type, to: &Type, conforms: &dyn Fn(&str, &str) -> bool) -> bool {
    if from == to {
        return true;
    }
    match (from, to) {
        (Type::Int, Type::Float) | (Type::Int, Type::Double) => true,
        (Type::Array(a), Type::Array(b))
        | (Type::Set(a), Type::Set(b))
        | (Type::OrderedSet(a), Type::OrderedSet(b)) => can_convert(a, b, conforms),
        (Type::Dict(k1, v1), Type::Dict(k2, v2)) => {
            can_convert(k1, k2, conforms) && can_convert(v1, v2, conforms)
        }
        (Type::Struct(name) | Type::Enum(name), Type::Protocol(protocol)) => {
            conforms(name, protocol)
        }
        _ => false,
    }
}

/// Whether `expr as to` is legal for an expression of type `from`
pub fn can_cast(from: &Type, to: &Type, conforms: &dyn Fn(&str, &str) -> bool) -> bool {
    if can_convert(from, to, conforms) {
        return true;
    }
    matches!(
        (from, to),
        (Type::Float, Type::Double)
            | (Type::Double, Type::Float)
            | (Type::Float, Type::Int)
            | (Type::Double, Type::Int)
    )
}

/// Result type of mixing two numeric operands, if they may be mixed
pub fn numeric_join(left: &Type, right: &Type) -> Option<Type> {
    match (left, right) {
        (Type::Int, Type::Int) => Some(Type::Int),
        (Type::Float, Type::Float) | (Type::Int, Type::Float) | (Type::Float, Type::Int) => {
            Some(Type::Float)
        }
        (Type::Double, Type::Double) | (Type::Int, Type::Double) | (Type::Double, Type::Int) => {
            Some(Type::Double)
        }
        _ => None,
    }
}

/// Result type of a binary operator, or `None` if the operands are invalid
pub fn binary_result(op: BinaryOp, left: &Type, right: &Type) -> Option<Type> {
    match op {
        BinaryOp::Add => {
            let textual = |t: &Type| matches!(t, Type::String | Type::Char);
            if textual(left) && textual(right) {
                Some(Type::String)
            } else {
                numeric_join(left, right)
            }
        }
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            numeric_join(left, right)
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordered = numeric_join(left, right).is_some()
                || (left == right && matches!(left, Type::String | Type::Char));
            ordered.then_some(Type::Bool)
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            let comparable = left == right || numeric_join(left, right).is_some();
            comparable.then_some(Type::Bool)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::Parser;
    use crate::ast::Stmt;

    fn no_conformance(_: &str, _: &str) -> bool {
        false
    }

    fn written(source: &str) -> TypeExpr {
        let tokens = tokenize(&format!("x: {} = empty", source)).unwrap();
        match Parser::new(tokens).parse().unwrap().statements.remove(0) {
            Stmt::VarDecl { ty, .. } => ty,
            _ => panic!("expected declaration"),
        }
    }

    fn builtin(name: &str) -> Option<Type> {
        (name == "Shape").then(|| Type::Enum("Shape".to_string()))
    }

    #[test]
    fn test_resolve_collections() {
        let ty = resolve(&written("[String: [Int]]"), &builtin).unwrap();
        assert_eq!(
            ty,
            Type::Dict(Box::new(Type::String), Box::new(Type::Array(Box::new(Type::Int))))
        );
        assert_eq!(
            resolve(&written("OSet<Shape>"), &builtin).unwrap(),
            Type::OrderedSet(Box::new(Type::Enum("Shape".to_string())))
        );
    }

    #[test]
    fn test_resolve_errors() {
        assert!(matches!(
            resolve(&written("Widget"), &builtin).unwrap_err().kind,
            ErrorKind::UnknownType(_)
        ));
        assert!(resolve(&written("Array<Int, Int>"), &builtin).is_err());
        assert!(resolve(&written("Int<Bool>"), &builtin).is_err());
    }

    #[test]
    fn test_implicit_widening() {
        assert!(can_convert(&Type::Int, &Type::Float, &no_conformance));
        assert!(can_convert(&Type::Int, &Type::Double, &no_conformance));
        assert!(!can_convert(&Type::Float, &Type::Int, &no_conformance));
        assert!(!can_convert(&Type::Float, &Type::Double, &no_conformance));
        assert!(!can_convert(&Type::Double, &Type::Float, &no_conformance));
        assert!(!can_convert(&Type::String, &Type::Int, &no_conformance));
    }

    #[test]
    fn test_explicit_casts() {
        assert!(can_cast(&Type::Float, &Type::Int, &no_conformance));
        assert!(can_cast(&Type::Double, &Type::Int, &no_conformance));
        assert!(can_cast(&Type::Float, &Type::Double, &no_conformance));
        assert!(can_cast(&Type::Double, &Type::Float, &no_conformance));
        assert!(!can_cast(&Type::String, &Type::Int, &no_conformance));
        assert!(!can_cast(&Type::Int, &Type::String, &no_conformance));
        assert!(!can_cast(&Type::Bool, &Type::Int, &no_conformance));
    }

    #[test]
    fn test_collections_convert_element_wise() {
        let ints = Type::Array(Box::new(Type::Int));
        let floats = Type::Array(Box::new(Type::Float));
        assert!(can_convert(&ints, &floats, &no_conformance));
        assert!(!can_convert(&floats, &ints, &no_conformance));
    }

    #[test]
    fn test_protocol_conversion_needs_declaration() {
        let shape = Type::Struct("Circle".to_string());
        let proto = Type::Protocol("Drawable".to_string());
        assert!(!can_convert(&shape, &proto, &no_conformance));
        assert!(can_convert(&shape, &proto, &|t, p| t == "Circle" && p == "Drawable"));
    }

    #[test]
    fn test_mixed_arithmetic() {
        assert_eq!(binary_result(BinaryOp::Add, &Type::Int, &Type::Float), Some(Type::Float));
        assert_eq!(binary_result(BinaryOp::Mul, &Type::Double, &Type::Int), Some(Type::Double));
        assert_eq!(binary_result(BinaryOp::Add, &Type::Float, &Type::Double), None);
        assert_eq!(binary_result(BinaryOp::Add, &Type::String, &Type::Char), Some(Type::String));
        assert_eq!(binary_result(BinaryOp::Sub, &Type::String, &Type::String), None);
        assert_eq!(binary_result(BinaryOp::Lt, &Type::Int, &Type::Double), Some(Type::Bool));
        assert_eq!(binary_result(BinaryOp::Eq, &Type::Bool, &Type::Int), None);
    }
}
