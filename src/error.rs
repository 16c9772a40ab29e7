//! Error types for the Noir language
//!
//! Provides structured error handling with source locations. Every stage of
//! the pipeline reports through the same [`NoirError`]; [`ErrorKind::stage`]
//! tells callers which stage produced it.

use crate::token::Span;
use std::fmt;

/// Pipeline stage an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lex,
    Parse,
    Type,
    Runtime,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Lex => write!(f, "Lexer"),
            Stage::Parse => write!(f, "Parser"),
            Stage::Type => write!(f, "Type"),
            Stage::Runtime => write!(f, "Runtime"),
        }
    }
}

/// Error kinds in Noir
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    // Lexer errors
    UnexpectedCharacter(char),
    UnterminatedString,
    UnterminatedChar,
    InvalidCharLiteral,
    InvalidEscape(char),
    InvalidNumber(String),

    // Parser errors
    ExpectedToken(String, String),
    ExpectedExpression(String),
    ExpectedType(String),
    InvalidAssignmentTarget,
    UnclosedBlock(String, usize),
    UnmatchedTerminator,

    // Type errors
    TypeMismatch(String, String),
    InvalidConversion(String, String),
    InvalidCast(String, String),
    UndeclaredIdentifier(String),
    UnknownType(String),
    Redeclaration(String),
    MissingRequirement(String, String, String),
    NonExhaustiveMatch(String, Vec<String>),
    UnknownMember(String, String),
    WrongArity(String, usize, usize),
    InvalidOperands(String, String, String),
    ReturnOutsideFunction,
    MissingReturn(String),
    RaiseNotAllowed,
    UnmarkedThrowingCall(String),
    SharedOutsideGrab(String),
    ReadOnlyResource(String),
    AwaitOutsideGrab,
    AsyncCapture(String),
    CannotInferEmpty,
    TypeError(String),

    // Runtime errors
    UndefinedVariable(String),
    IndexOutOfRange(i64, usize),
    MissingKey(String),
    DivisionByZero,
    IntegerOverflow,
    NotCallable(String),
    StackOverflow,
    MissingMember(String),
    ZeroStep,
    SelfDeadlock(String),
    LockOrder(String, String),
    ResourceRedeclared(String),
    Raised(String),
    Aborted,
    RuntimeError(String),
}

impl ErrorKind {
    /// The pipeline stage this error kind belongs to
    pub fn stage(&self) -> Stage {
        use ErrorKind::*;
        match self {
            UnexpectedCharacter(_)
            | UnterminatedString
            | UnterminatedChar
            | InvalidCharLiteral
            | InvalidEscape(_)
            | InvalidNumber(_) => Stage::Lex,

            ExpectedToken(..)
            | ExpectedExpression(_)
            | ExpectedType(_)
            | InvalidAssignmentTarget
            | UnclosedBlock(..)
            | UnmatchedTerminator => Stage::Parse,

            TypeMismatch(..)
            | InvalidConversion(..)
            | InvalidCast(..)
            | UndeclaredIdentifier(_)
            | UnknownType(_)
            | Redeclaration(_)
            | MissingRequirement(..)
            | NonExhaustiveMatch(..)
            | UnknownMember(..)
            | WrongArity(..)
            | InvalidOperands(..)
            | ReturnOutsideFunction
            | MissingReturn(_)
            | RaiseNotAllowed
            | UnmarkedThrowingCall(_)
            | SharedOutsideGrab(_)
            | ReadOnlyResource(_)
            | AwaitOutsideGrab
            | AsyncCapture(_)
            | CannotInferEmpty
            | TypeError(_) => Stage::Type,

            UndefinedVariable(_)
            | IndexOutOfRange(..)
            | MissingKey(_)
            | DivisionByZero
            | IntegerOverflow
            | NotCallable(_)
            | StackOverflow
            | MissingMember(_)
            | ZeroStep
            | SelfDeadlock(_)
            | LockOrder(..)
            | ResourceRedeclared(_)
            | Raised(_)
            | Aborted
            | RuntimeError(_) => Stage::Runtime,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UnexpectedCharacter(c) => write!(f, "unexpected character '{}'", c),
            ErrorKind::UnterminatedString => write!(f, "unterminated string"),
            ErrorKind::UnterminatedChar => write!(f, "unterminated character literal"),
            ErrorKind::InvalidCharLiteral => {
                write!(f, "character literal must contain exactly one character")
            }
            ErrorKind::InvalidEscape(c) => write!(f, "invalid escape sequence '\\{}'", c),
            ErrorKind::InvalidNumber(s) => write!(f, "invalid number '{}'", s),
            ErrorKind::ExpectedToken(expected, got) => {
                write!(f, "expected {}, got '{}'", expected, got)
            }
            ErrorKind::ExpectedExpression(got) => write!(f, "expected expression, got '{}'", got),
            ErrorKind::ExpectedType(got) => write!(f, "expected type, got '{}'", got),
            ErrorKind::InvalidAssignmentTarget => write!(f, "invalid assignment target"),
            ErrorKind::UnclosedBlock(kind, line) => {
                write!(f, "missing '::' to close {} block opened on line {}", kind, line)
            }
            ErrorKind::UnmatchedTerminator => write!(f, "'::' does not close any open block"),
            ErrorKind::TypeMismatch(expected, got) => {
                write!(f, "type mismatch: expected {}, got {}", expected, got)
            }
            ErrorKind::InvalidConversion(from, to) => write!(
                f,
                "cannot convert {} to {} implicitly (use 'as' where the conversion is allowed)",
                from, to
            ),
            ErrorKind::InvalidCast(from, to) => write!(f, "cannot cast {} to {}", from, to),
            ErrorKind::UndeclaredIdentifier(name) => write!(f, "undeclared identifier '{}'", name),
            ErrorKind::UnknownType(name) => write!(f, "unknown type '{}'", name),
            ErrorKind::Redeclaration(name) => {
                write!(f, "'{}' is already declared in this scope", name)
            }
            ErrorKind::MissingRequirement(ty, protocol, member) => write!(
                f,
                "'{}' does not implement '{}' required by protocol '{}'",
                ty, member, protocol
            ),
            ErrorKind::NonExhaustiveMatch(name, missing) => write!(
                f,
                "match on '{}' is not exhaustive: missing {}",
                name,
                missing.join(", ")
            ),
            ErrorKind::UnknownMember(ty, member) => {
                write!(f, "type {} has no member '{}'", ty, member)
            }
            ErrorKind::WrongArity(name, expected, got) => write!(
                f,
                "'{}' expects {} arguments, got {}",
                name, expected, got
            ),
            ErrorKind::InvalidOperands(op, left, right) => write!(
                f,
                "operator '{}' cannot be applied to {} and {}",
                op, left, right
            ),
            ErrorKind::ReturnOutsideFunction => write!(f, "return outside of function"),
            ErrorKind::MissingReturn(name) => {
                write!(f, "function '{}' does not return a value on every path", name)
            }
            ErrorKind::RaiseNotAllowed => write!(
                f,
                "'raise' is only allowed in a 'throws' function or a 'within' block"
            ),
            ErrorKind::UnmarkedThrowingCall(name) => {
                write!(f, "call to throwing function '{}' must be marked with 'try'", name)
            }
            ErrorKind::SharedOutsideGrab(name) => {
                write!(f, "shared resource '{}' used outside a grab on it", name)
            }
            ErrorKind::ReadOnlyResource(name) => write!(
                f,
                "shared resource '{}' is held for read and cannot be modified",
                name
            ),
            ErrorKind::AwaitOutsideGrab => write!(f, "'await' must appear inside a grab block"),
            ErrorKind::AsyncCapture(name) => write!(
                f,
                "async function cannot modify captured variable '{}'; use a shared resource",
                name
            ),
            ErrorKind::CannotInferEmpty => {
                write!(f, "cannot infer the collection type of 'empty' here")
            }
            ErrorKind::TypeError(msg) => write!(f, "{}", msg),
            ErrorKind::UndefinedVariable(name) => write!(f, "undefined variable '{}'", name),
            ErrorKind::IndexOutOfRange(index, len) => write!(
                f,
                "index {} out of range for collection of length {}",
                index, len
            ),
            ErrorKind::MissingKey(key) => write!(f, "key {} not found", key),
            ErrorKind::DivisionByZero => write!(f, "division by zero"),
            ErrorKind::IntegerOverflow => write!(f, "integer overflow"),
            ErrorKind::NotCallable(what) => write!(f, "{} is not callable", what),
            ErrorKind::StackOverflow => write!(f, "stack overflow: too many nested calls"),
            ErrorKind::MissingMember(name) => write!(f, "member '{}' not found", name),
            ErrorKind::ZeroStep => write!(f, "for loop step cannot be 0"),
            ErrorKind::SelfDeadlock(name) => write!(
                f,
                "self-deadlock: shared resource '{}' is already held by this task",
                name
            ),
            ErrorKind::LockOrder(requested, held) => write!(
                f,
                "lock order violation: cannot grab '{}' while holding '{}'",
                requested, held
            ),
            ErrorKind::ResourceRedeclared(name) => {
                write!(f, "shared resource '{}' is already declared", name)
            }
            ErrorKind::Raised(msg) => write!(f, "uncaught error: {}", msg),
            ErrorKind::Aborted => write!(f, "task aborted after a fatal error in another task"),
            ErrorKind::RuntimeError(msg) => write!(f, "{}", msg),
        }
    }
}

/// A Noir error with location information
#[derive(Debug, Clone)]
pub struct NoirError {
    pub kind: ErrorKind,
    pub span: Option<Span>,
    pub source_line: Option<String>,
}

impl NoirError {
    pub fn new(kind: ErrorKind, span: Option<Span>) -> Self {
        Self {
            kind,
            span,
            source_line: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.kind.stage()
    }

    /// Attach a span if the error does not carry one yet
    pub fn or_span(mut self, span: Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    /// Message bound to the variable of a `catch` clause
    pub fn catch_message(&self) -> String {
        match &self.kind {
            ErrorKind::Raised(msg) => msg.clone(),
            kind => kind.to_string(),
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        if let Some(span) = &self.span {
            let lines: Vec<&str> = source.lines().collect();
            if span.line > 0 && span.line <= lines.len() {
                self.source_line = Some(lines[span.line - 1].to_string());
            }
        }
        self
    }
}

impl fmt::Display for NoirError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(span) = &self.span {
            write!(
                f,
                "[line {}:{}] {} error: {}",
                span.line,
                span.column,
                self.stage(),
                self.kind
            )?;

            if let Some(ref line) = self.source_line {
                write!(f, "\n  | {}", line)?;
                write!(f, "\n  | {}^", " ".repeat(span.column.saturating_sub(1)))?;
            }
        } else {
            write!(f, "{} error: {}", self.stage(), self.kind)?;
        }
        Ok(())
    }
}

impl std::error::Error for NoirError {}

/// Result type for Noir operations
pub type Result<T> = std::result::Result<T, NoirError>;
