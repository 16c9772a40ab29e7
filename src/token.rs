//! Token definitions for Noir
//!
//! Tokens represent the atomic units of meaning in source code.

use std::fmt;

/// Location in source code for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, column: usize) -> Self {
        Self { start, end, line, column }
    }

    /// Span covering `self` through `other`, keeping `self`'s position.
    pub fn to(self, other: Span) -> Span {
        Span::new(self.start, other.end.max(self.end), self.line, self.column)
    }
}

/// Token types in Noir
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Int(i64),
    Float(f64),
    Str(String),
    Char(char),
    True,
    False,

    // Identifiers
    Ident(String),

    // Keywords
    If,
    Else,
    For,
    In,
    To,
    Thru,
    By,
    While,
    Func,
    Async,
    Shared,
    Grab,
    Await,
    Enum,
    Protocol,
    Struct,
    Class,
    Union,
    Conforms,
    Empty,
    Return,
    Print,
    Match,
    Within,
    Catch,
    Try,
    Raise,
    Throws,
    As,
    And,
    Or,

    // Operators
    Plus,         // +
    Minus,        // -
    Star,         // *
    Slash,        // /
    Percent,      // %
    Equal,        // =
    EqualEqual,   // ==
    BangEqual,    // !=
    Less,         // <
    LessEqual,    // <=
    Greater,      // >
    GreaterEqual, // >=
    Bang,         // !
    Arrow,        // ->
    LeftArrow,    // <- (protocol conformance)

    // Delimiters
    LeftParen,    // (
    RightParen,   // )
    LeftBracket,  // [
    RightBracket, // ]
    Comma,        // ,
    Colon,        // :
    DoubleColon,  // :: (block terminator or path delimiter)
    Dot,          // .

    // Special tokens
    Newline,
    Eof,
}

impl TokenKind {
    /// Name used by the token dump
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Int(_) => "Int",
            TokenKind::Float(_) => "Float",
            TokenKind::Str(_) => "String",
            TokenKind::Char(_) => "Char",
            TokenKind::True | TokenKind::False => "Bool",
            TokenKind::Ident(_) => "Ident",
            TokenKind::Newline => "Newline",
            TokenKind::Eof => "Eof",
            TokenKind::DoubleColon => "Terminator",
            k if lookup_keyword(&k.to_string()).is_some() => "Keyword",
            _ => "Symbol",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Int(n) => write!(f, "{}", n),
            TokenKind::Float(n) => write!(f, "{:?}", n),
            TokenKind::Str(s) => write!(f, "\"{}\"", s),
            TokenKind::Char(c) => write!(f, "'{}'", c),
            TokenKind::True => write!(f, "true"),
            TokenKind::False => write!(f, "false"),
            TokenKind::Ident(s) => write!(f, "{}", s),
            TokenKind::If => write!(f, "if"),
            TokenKind::Else => write!(f, "else"),
            TokenKind::For => write!(f, "for"),
            TokenKind::In => write!(f, "in"),
            TokenKind::To => write!(f, "to"),
            TokenKind::Thru => write!(f, "thru"),
            TokenKind::By => write!(f, "by"),
            TokenKind::While => write!(f, "while"),
            TokenKind::Func => write!(f, "func"),
            TokenKind::Async => write!(f, "async"),
            TokenKind::Shared => write!(f, "shared"),
            TokenKind::Grab => write!(f, "grab"),
            TokenKind::Await => write!(f, "await"),
            TokenKind::Enum => write!(f, "enum"),
            TokenKind::Protocol => write!(f, "protocol"),
            TokenKind::Struct => write!(f, "struct"),
            TokenKind::Class => write!(f, "class"),
            TokenKind::Union => write!(f, "union"),
            TokenKind::Conforms => write!(f, "conforms"),
            TokenKind::Empty => write!(f, "empty"),
            TokenKind::Return => write!(f, "return"),
            TokenKind::Print => write!(f, "print"),
            TokenKind::Match => write!(f, "match"),
            TokenKind::Within => write!(f, "within"),
            TokenKind::Catch => write!(f, "catch"),
            TokenKind::Try => write!(f, "try"),
            TokenKind::Raise => write!(f, "raise"),
            TokenKind::Throws => write!(f, "throws"),
            TokenKind::As => write!(f, "as"),
            TokenKind::And => write!(f, "and"),
            TokenKind::Or => write!(f, "or"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Percent => write!(f, "%"),
            TokenKind::Equal => write!(f, "="),
            TokenKind::EqualEqual => write!(f, "=="),
            TokenKind::BangEqual => write!(f, "!="),
            TokenKind::Less => write!(f, "<"),
            TokenKind::LessEqual => write!(f, "<="),
            TokenKind::Greater => write!(f, ">"),
            TokenKind::GreaterEqual => write!(f, ">="),
            TokenKind::Bang => write!(f, "!"),
            TokenKind::Arrow => write!(f, "->"),
            TokenKind::LeftArrow => write!(f, "<-"),
            TokenKind::LeftParen => write!(f, "("),
            TokenKind::RightParen => write!(f, ")"),
            TokenKind::LeftBracket => write!(f, "["),
            TokenKind::RightBracket => write!(f, "]"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::DoubleColon => write!(f, "::"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Newline => write!(f, "\\n"),
            TokenKind::Eof => write!(f, "EOF"),
        }
    }
}

/// A token with its kind and location
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub lexeme: String,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span, lexeme: String) -> Self {
        Self { kind, span, lexeme }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lexeme = self.lexeme.replace('\n', "\\n");
        write!(
            f,
            "{}:{}\t{}\t'{}'",
            self.span.line,
            self.span.column,
            self.kind.name(),
            lexeme
        )
    }
}

/// Render a token sequence for debug output, one token per line
pub fn render_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        out.push_str(&token.to_string());
        out.push('\n');
    }
    out
}

/// Check if a string is a keyword and return the corresponding token kind
pub fn lookup_keyword(ident: &str) -> Option<TokenKind> {
    match ident {
        "if" => Some(TokenKind::If),
        "else" => Some(TokenKind::Else),
        "for" => Some(TokenKind::For),
        "in" => Some(TokenKind::In),
        "to" => Some(TokenKind::To),
        "thru" => Some(TokenKind::Thru),
        "by" => Some(TokenKind::By),
        "while" => Some(TokenKind::While),
        "func" => Some(TokenKind::Func),
        "async" => Some(TokenKind::Async),
        "shared" => Some(TokenKind::Shared),
        "grab" => Some(TokenKind::Grab),
        "await" => Some(TokenKind::Await),
        "enum" => Some(TokenKind::Enum),
        "protocol" => Some(TokenKind::Protocol),
        "struct" => Some(TokenKind::Struct),
        "class" => Some(TokenKind::Class),
        "union" => Some(TokenKind::Union),
        "conforms" => Some(TokenKind::Conforms),
        "empty" => Some(TokenKind::Empty),
        "return" => Some(TokenKind::Return),
        "print" => Some(TokenKind::Print),
        "match" => Some(TokenKind::Match),
        "within" => Some(TokenKind::Within),
        "catch" => Some(TokenKind::Catch),
        "try" => Some(TokenKind::Try),
        "raise" => Some(TokenKind::Raise),
        "throws" => Some(TokenKind::Throws),
        "as" => Some(TokenKind::As),
        "and" => Some(TokenKind::And),
        "or" => Some(TokenKind::Or),
        "true" => Some(TokenKind::True),
        "false" => Some(TokenKind::False),
        _ => None,
    }
}
