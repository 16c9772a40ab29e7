//! Abstract Syntax Tree definitions for Noir
//!
//! Represents the structure of programs after parsing. Function and type
//! declarations are reference-counted so that closures, method tables and
//! spawned tasks can hold on to them after the parser's tree is dropped.

use std::fmt;
use std::sync::Arc;

use crate::token::Span;

/// A type as written in source: `Int`, `[String]`, `Dict<K, V>`, `func(Int) -> Bool`
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Named {
        name: String,
        args: Vec<TypeExpr>,
        span: Span,
    },
    Func {
        params: Vec<TypeExpr>,
        ret: Option<Box<TypeExpr>>,
        span: Span,
    },
}

impl TypeExpr {
    pub fn span(&self) -> Span {
        match self {
            TypeExpr::Named { span, .. } => *span,
            TypeExpr::Func { span, .. } => *span,
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Named { name, args, .. } => {
                write!(f, "{}", name)?;
                if !args.is_empty() {
                    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                    write!(f, "<{}>", args.join(", "))?;
                }
                Ok(())
            }
            TypeExpr::Func { params, ret, .. } => {
                let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
                write!(f, "func({})", params.join(", "))?;
                if let Some(ret) = ret {
                    write!(f, " -> {}", ret)?;
                }
                Ok(())
            }
        }
    }
}

/// Expression nodes
#[derive(Debug, Clone)]
pub enum Expr {
    /// Integer literal: 42
    Int { value: i64, span: Span },

    /// Floating literal: 3.14 (Float unless the context asks for Double)
    Float { value: f64, span: Span },

    /// String literal: "hello"
    Str { value: String, span: Span },

    /// Character literal: 'c'
    Char { value: char, span: Span },

    /// Boolean literal: true, false
    Bool { value: bool, span: Span },

    /// `empty`: an empty collection of whatever type the context declares
    Empty { span: Span },

    /// Variable reference: foo
    Ident { name: String, span: Span },

    /// Path: Color::Red
    Path {
        type_name: String,
        member: String,
        span: Span,
    },

    /// Array literal: [1, 2, 3]
    Array { elements: Vec<Expr>, span: Span },

    /// Dictionary literal: ["a": 1, "b": 2]
    Dict {
        entries: Vec<(Expr, Expr)>,
        span: Span,
    },

    /// Binary operation: a + b, x < y
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },

    /// Logical and/or (short-circuit)
    Logical {
        left: Box<Expr>,
        op: LogicalOp,
        right: Box<Expr>,
        span: Span,
    },

    /// Unary operation: -x, !y
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },

    /// Explicit conversion: x as Float
    Cast {
        expr: Box<Expr>,
        target: TypeExpr,
        span: Span,
    },

    /// Call: foo(a, b), Point(x: 1, y: 2), Shape::Circle(2.0)
    Call {
        callee: Box<Expr>,
        args: Vec<Arg>,
        span: Span,
    },

    /// Method call: list.append(x), shape.area()
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Arg>,
        span: Span,
    },

    /// Member access: point.x, list.count
    Field {
        object: Box<Expr>,
        name: String,
        span: Span,
    },

    /// Indexing: list[0], dict["key"]
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },

    /// `try expr`: call a throwing function
    Try { expr: Box<Expr>, span: Span },

    /// Grouping: (expr)
    Grouping { expr: Box<Expr>, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Int { span, .. }
            | Expr::Float { span, .. }
            | Expr::Str { span, .. }
            | Expr::Char { span, .. }
            | Expr::Bool { span, .. }
            | Expr::Empty { span }
            | Expr::Ident { span, .. }
            | Expr::Path { span, .. }
            | Expr::Array { span, .. }
            | Expr::Dict { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Logical { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Cast { span, .. }
            | Expr::Call { span, .. }
            | Expr::MethodCall { span, .. }
            | Expr::Field { span, .. }
            | Expr::Index { span, .. }
            | Expr::Try { span, .. }
            | Expr::Grouping { span, .. } => *span,
        }
    }

    /// Whether the expression names a storage location (variable, field or element)
    pub fn is_place(&self) -> bool {
        match self {
            Expr::Ident { .. } => true,
            Expr::Field { object, .. } | Expr::Index { object, .. } => object.is_place(),
            Expr::Grouping { expr, .. } => expr.is_place(),
            _ => false,
        }
    }

    /// The variable at the root of a place expression
    pub fn place_root(&self) -> Option<&str> {
        match self {
            Expr::Ident { name, .. } => Some(name),
            Expr::Field { object, .. } | Expr::Index { object, .. } => object.place_root(),
            Expr::Grouping { expr, .. } => expr.place_root(),
            _ => None,
        }
    }
}

/// A call argument, optionally labelled: `x: 1`
#[derive(Debug, Clone)]
pub struct Arg {
    pub label: Option<String>,
    pub value: Expr,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add, // +
    Sub, // -
    Mul, // *
    Div, // /
    Mod, // %
    Eq,  // ==
    Ne,  // !=
    Lt,  // <
    Le,  // <=
    Gt,  // >
    Ge,  // >=
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
    }

    pub fn is_equality(self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
            BinaryOp::Mod => write!(f, "%"),
            BinaryOp::Eq => write!(f, "=="),
            BinaryOp::Ne => write!(f, "!="),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::Le => write!(f, "<="),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::Ge => write!(f, ">="),
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Neg, // -
    Not, // !
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Not => write!(f, "!"),
        }
    }
}

/// Logical operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogicalOp {
    And,
    Or,
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOp::And => write!(f, "and"),
            LogicalOp::Or => write!(f, "or"),
        }
    }
}

/// Access requested by a grab
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => write!(f, "read"),
            AccessMode::Write => write!(f, "write"),
        }
    }
}

/// A typed parameter or payload field: `name: Type`
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

/// Function definition: func name(params) -> Ret: body ::
#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeExpr>,
    pub throws: bool,
    pub is_async: bool,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// Struct field: name: Type [= default]
#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub default: Option<Expr>,
    pub span: Span,
}

/// struct/class declaration
#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub is_class: bool,
    pub base: Option<String>,
    pub conforms: Vec<String>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<Arc<FuncDecl>>,
    pub span: Span,
}

/// Enum variant with optional payload fields
#[derive(Debug, Clone)]
pub struct VariantDecl {
    pub name: String,
    pub fields: Vec<Param>,
    pub span: Span,
}

/// enum/union declaration
#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub name: String,
    pub is_union: bool,
    pub conforms: Vec<String>,
    pub variants: Vec<VariantDecl>,
    pub methods: Vec<Arc<FuncDecl>>,
    pub span: Span,
}

/// Method requirement inside a protocol
#[derive(Debug, Clone)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeExpr>,
    pub span: Span,
}

/// protocol declaration; `empty` yields no requirements
#[derive(Debug, Clone)]
pub struct ProtocolDecl {
    pub name: String,
    pub properties: Vec<Param>,
    pub methods: Vec<MethodSig>,
    pub span: Span,
}

/// Pattern of a match arm
#[derive(Debug, Clone)]
pub enum Pattern {
    Variant {
        enum_name: Option<String>,
        variant: String,
        bindings: Vec<String>,
    },
    Else,
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// Statement nodes
#[derive(Debug, Clone)]
pub enum Stmt {
    /// Expression statement
    Expr { expr: Expr },

    /// Typed declaration: x: Int = expr
    VarDecl {
        name: String,
        ty: TypeExpr,
        value: Expr,
        span: Span,
    },

    /// Shared resource declaration: shared x: Int = expr
    SharedDecl {
        name: String,
        ty: TypeExpr,
        value: Expr,
        span: Span,
    },

    /// Assignment to a place: x = e, p.x = e, a[i] = e
    Assign {
        target: Expr,
        value: Expr,
        span: Span,
    },

    /// if / else if / else chain
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        else_branch: Option<Vec<Stmt>>,
        span: Span,
    },

    /// Range loop: for i in a to b by s
    For {
        var: String,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        inclusive: bool,
        body: Vec<Stmt>,
        span: Span,
    },

    /// Collection loop: for x in items
    ForEach {
        var: String,
        iterable: Expr,
        body: Vec<Stmt>,
        span: Span,
    },

    /// While loop
    While {
        condition: Expr,
        body: Vec<Stmt>,
        span: Span,
    },

    Func(Arc<FuncDecl>),
    Struct(Arc<StructDecl>),
    Enum(Arc<EnumDecl>),
    Protocol(Arc<ProtocolDecl>),

    /// Return statement
    Return { value: Option<Expr>, span: Span },

    /// print(a, b, ...)
    Print { args: Vec<Expr>, span: Span },

    /// match subject: arms ::
    Match {
        subject: Expr,
        arms: Vec<MatchArm>,
        span: Span,
    },

    /// grab a, b to read: body ::
    Grab {
        resources: Vec<(String, Span)>,
        mode: AccessMode,
        body: Vec<Stmt>,
        span: Span,
    },

    /// await predicate: body ::
    Await {
        condition: Expr,
        body: Vec<Stmt>,
        span: Span,
    },

    /// within: body :: catch e: handler ::
    Within {
        body: Vec<Stmt>,
        catch_name: Option<String>,
        handler: Vec<Stmt>,
        span: Span,
    },

    /// raise expr
    Raise { value: Expr, span: Span },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr { expr } => expr.span(),
            Stmt::Func(decl) => decl.span,
            Stmt::Struct(decl) => decl.span,
            Stmt::Enum(decl) => decl.span,
            Stmt::Protocol(decl) => decl.span,
            Stmt::VarDecl { span, .. }
            | Stmt::SharedDecl { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::If { span, .. }
            | Stmt::For { span, .. }
            | Stmt::ForEach { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Print { span, .. }
            | Stmt::Match { span, .. }
            | Stmt::Grab { span, .. }
            | Stmt::Await { span, .. }
            | Stmt::Within { span, .. }
            | Stmt::Raise { span, .. } => *span,
        }
    }
}

/// A complete program
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}
