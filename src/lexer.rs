//! Lexer for Noir
//!
//! Converts source code into a stream of tokens. Newlines are kept as
//! tokens because they separate statements; comments and other whitespace
//! are dropped. The `::` terminator is always emitted as a single
//! [`TokenKind::DoubleColon`]; whether it closes a block or joins a path is
//! decided by the parser.

use crate::error::{ErrorKind, NoirError, Result};
use crate::token::{lookup_keyword, Span, Token, TokenKind};

/// The lexer state
pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer from source code
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the entire source
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }

        tokens.push(Token::new(
            TokenKind::Eof,
            Span::new(self.current_pos, self.current_pos, self.line, self.column),
            String::new(),
        ));

        Ok(tokens)
    }

    /// Get the next token
    fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip_whitespace_and_comments();

        let Some(&(start_pos, ch)) = self.chars.peek() else {
            return Ok(None);
        };

        let start_line = self.line;
        let start_column = self.column;
        let start_span = Span::new(start_pos, start_pos + ch.len_utf8(), start_line, start_column);

        let kind = match ch {
            '(' => { self.advance(); TokenKind::LeftParen }
            ')' => { self.advance(); TokenKind::RightParen }
            '[' => { self.advance(); TokenKind::LeftBracket }
            ']' => { self.advance(); TokenKind::RightBracket }
            ',' => { self.advance(); TokenKind::Comma }
            '.' => { self.advance(); TokenKind::Dot }
            '+' => { self.advance(); TokenKind::Plus }
            '*' => { self.advance(); TokenKind::Star }
            '%' => { self.advance(); TokenKind::Percent }
            '/' => { self.advance(); TokenKind::Slash }

            ':' => {
                self.advance();
                if self.peek_char() == Some(':') {
                    self.advance();
                    TokenKind::DoubleColon
                } else {
                    TokenKind::Colon
                }
            }
            '-' => {
                self.advance();
                if self.peek_char() == Some('>') {
                    self.advance();
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '=' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                }
            }
            '!' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                self.advance();
                match self.peek_char() {
                    Some('=') => { self.advance(); TokenKind::LessEqual }
                    Some('-') => { self.advance(); TokenKind::LeftArrow }
                    _ => TokenKind::Less,
                }
            }
            '>' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                }
            }

            '\n' => {
                self.advance();
                self.line += 1;
                self.column = 1;
                TokenKind::Newline
            }

            '"' => self.scan_string(start_span)?,
            '\'' => self.scan_char(start_span)?,
            c if c.is_ascii_digit() => self.scan_number(start_span)?,
            c if c.is_alphabetic() || c == '_' => self.scan_identifier(),

            _ => {
                self.advance();
                return Err(NoirError::new(
                    ErrorKind::UnexpectedCharacter(ch),
                    Some(start_span),
                ));
            }
        };

        let lexeme = self.source[start_pos..self.current_pos].to_string();

        Ok(Some(Token::new(
            kind,
            Span::new(start_pos, self.current_pos, start_line, start_column),
            lexeme,
        )))
    }

    /// Advance and return the current character
    fn advance(&mut self) -> Option<char> {
        if let Some((pos, ch)) = self.chars.next() {
            self.current_pos = pos + ch.len_utf8();
            self.column += 1;
            Some(ch)
        } else {
            None
        }
    }

    /// Peek at the next character without advancing
    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, ch)| ch)
    }

    /// Peek one character past the next one
    fn peek_second(&self) -> Option<char> {
        let mut rest = self.source[self.current_pos..].chars();
        rest.next();
        rest.next()
    }

    /// Skip whitespace (except newlines) and comments
    fn skip_whitespace_and_comments(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            match ch {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '/' if self.source[self.current_pos..].starts_with("//") => {
                    while let Some(&(_, c)) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    /// Consume the character after a backslash and translate it
    fn scan_escape(&mut self, span: Span) -> Result<Option<char>> {
        let Some(c) = self.advance() else {
            return Ok(None);
        };
        let translated = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '"' => '"',
            '\'' => '\'',
            '\\' => '\\',
            other => {
                return Err(NoirError::new(ErrorKind::InvalidEscape(other), Some(span)));
            }
        };
        Ok(Some(translated))
    }

    /// Scan a string literal
    fn scan_string(&mut self, span: Span) -> Result<TokenKind> {
        self.advance();

        let mut value = String::new();

        loop {
            match self.peek_char() {
                Some('"') => {
                    self.advance();
                    return Ok(TokenKind::Str(value));
                }
                Some('\\') => {
                    self.advance();
                    match self.scan_escape(span)? {
                        Some(c) => value.push(c),
                        None => break,
                    }
                }
                Some('\n') => {
                    value.push('\n');
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
                None => break,
            }
        }

        Err(NoirError::new(ErrorKind::UnterminatedString, Some(span)))
    }

    /// Scan a character literal: exactly one character or one escape
    fn scan_char(&mut self, span: Span) -> Result<TokenKind> {
        self.advance();

        let value = match self.peek_char() {
            None | Some('\n') => {
                return Err(NoirError::new(ErrorKind::UnterminatedChar, Some(span)));
            }
            Some('\'') => {
                self.advance();
                return Err(NoirError::new(ErrorKind::InvalidCharLiteral, Some(span)));
            }
            Some('\\') => {
                self.advance();
                match self.scan_escape(span)? {
                    Some(c) => c,
                    None => return Err(NoirError::new(ErrorKind::UnterminatedChar, Some(span))),
                }
            }
            Some(c) => {
                self.advance();
                c
            }
        };

        if self.peek_char() == Some('\'') {
            self.advance();
            return Ok(TokenKind::Char(value));
        }

        // More than one character before the closing quote, or no quote at all
        let rest_of_line = self.source[self.current_pos..].split('\n').next().unwrap_or("");
        let kind = if rest_of_line.contains('\'') {
            ErrorKind::InvalidCharLiteral
        } else {
            ErrorKind::UnterminatedChar
        };
        Err(NoirError::new(kind, Some(span)))
    }

    /// Scan a number literal. No `.` means Int, one `.digits` means Float.
    fn scan_number(&mut self, span: Span) -> Result<TokenKind> {
        let start = self.current_pos;
        self.consume_digits();

        let mut is_float = false;
        if self.peek_char() == Some('.') && self.peek_second().map_or(false, |c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            self.consume_digits();
        }

        let malformed = match self.peek_char() {
            Some('.') => is_float && self.peek_second().map_or(false, |c| c.is_ascii_digit()),
            Some(c) => c.is_alphabetic() || c == '_',
            None => false,
        };
        if malformed {
            while let Some(c) = self.peek_char() {
                if c.is_alphanumeric() || c == '_' || c == '.' {
                    self.advance();
                } else {
                    break;
                }
            }
            let text = self.source[start..self.current_pos].to_string();
            return Err(NoirError::new(ErrorKind::InvalidNumber(text), Some(span)));
        }

        let text = &self.source[start..self.current_pos];
        let parsed = if is_float {
            text.parse::<f64>().map(TokenKind::Float).ok()
        } else {
            text.parse::<i64>().map(TokenKind::Int).ok()
        };
        parsed.ok_or_else(|| {
            NoirError::new(ErrorKind::InvalidNumber(text.to_string()), Some(span))
        })
    }

    fn consume_digits(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Scan an identifier or keyword
    fn scan_identifier(&mut self) -> TokenKind {
        let start = self.current_pos;

        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text = &self.source[start..self.current_pos];
        lookup_keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()))
    }
}

/// Tokenize a whole source string
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .filter(|k| !matches!(k, TokenKind::Newline | TokenKind::Eof))
            .collect()
    }

    fn lex_error(source: &str) -> ErrorKind {
        tokenize(source).unwrap_err().kind
    }

    #[test]
    fn test_keywords() {
        let tokens = kinds("if else for in to thru by while func async shared grab await");
        assert_eq!(tokens, vec![
            TokenKind::If,
            TokenKind::Else,
            TokenKind::For,
            TokenKind::In,
            TokenKind::To,
            TokenKind::Thru,
            TokenKind::By,
            TokenKind::While,
            TokenKind::Func,
            TokenKind::Async,
            TokenKind::Shared,
            TokenKind::Grab,
            TokenKind::Await,
        ]);
    }

    #[test]
    fn test_read_write_are_identifiers() {
        let tokens = kinds("grab counter to write:");
        assert_eq!(tokens, vec![
            TokenKind::Grab,
            TokenKind::Ident("counter".to_string()),
            TokenKind::To,
            TokenKind::Ident("write".to_string()),
            TokenKind::Colon,
        ]);
    }

    #[test]
    fn test_operators() {
        let tokens = kinds("+ - * / % = == != < <= > >= -> <- ! : ::");
        assert_eq!(tokens, vec![
            TokenKind::Plus,
            TokenKind::Minus,
            TokenKind::Star,
            TokenKind::Slash,
            TokenKind::Percent,
            TokenKind::Equal,
            TokenKind::EqualEqual,
            TokenKind::BangEqual,
            TokenKind::Less,
            TokenKind::LessEqual,
            TokenKind::Greater,
            TokenKind::GreaterEqual,
            TokenKind::Arrow,
            TokenKind::LeftArrow,
            TokenKind::Bang,
            TokenKind::Colon,
            TokenKind::DoubleColon,
        ]);
    }

    #[test]
    fn test_numbers() {
        let tokens = kinds("42 3.14 0 100.0");
        assert_eq!(tokens, vec![
            TokenKind::Int(42),
            TokenKind::Float(3.14),
            TokenKind::Int(0),
            TokenKind::Float(100.0),
        ]);
    }

    #[test]
    fn test_int_literal_round_trip() {
        for literal in ["0", "7", "42", "1000000", "9223372036854775807"] {
            let tokens = tokenize(literal).unwrap();
            assert_eq!(tokens[0].kind.to_string(), literal);
            assert_eq!(tokens[0].lexeme, literal);
        }
    }

    #[test]
    fn test_member_access_after_int() {
        let tokens = kinds("3.count");
        assert_eq!(tokens, vec![
            TokenKind::Int(3),
            TokenKind::Dot,
            TokenKind::Ident("count".to_string()),
        ]);
    }

    #[test]
    fn test_malformed_numbers() {
        assert!(matches!(lex_error("1.2.3"), ErrorKind::InvalidNumber(s) if s == "1.2.3"));
        assert!(matches!(lex_error("12abc"), ErrorKind::InvalidNumber(s) if s == "12abc"));
        assert!(matches!(lex_error("99999999999999999999"), ErrorKind::InvalidNumber(_)));
    }

    #[test]
    fn test_strings_and_escapes() {
        let tokens = kinds(r#""hello" "a\tb\n\"q\"\\""#);
        assert_eq!(tokens, vec![
            TokenKind::Str("hello".to_string()),
            TokenKind::Str("a\tb\n\"q\"\\".to_string()),
        ]);
    }

    #[test]
    fn test_string_errors() {
        assert_eq!(lex_error("\"never closed"), ErrorKind::UnterminatedString);
        assert_eq!(lex_error(r#""bad \q escape""#), ErrorKind::InvalidEscape('q'));
    }

    #[test]
    fn test_chars() {
        assert_eq!(kinds(r"'a' '\n'"), vec![TokenKind::Char('a'), TokenKind::Char('\n')]);
        assert_eq!(lex_error("''"), ErrorKind::InvalidCharLiteral);
        assert_eq!(lex_error("'ab'"), ErrorKind::InvalidCharLiteral);
        assert_eq!(lex_error("'a"), ErrorKind::UnterminatedChar);
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = kinds("x // the rest is ignored :: 'x\ny");
        assert_eq!(tokens, vec![
            TokenKind::Ident("x".to_string()),
            TokenKind::Ident("y".to_string()),
        ]);
    }

    #[test]
    fn test_invalid_character_position() {
        let err = tokenize("x: Int = 1\n  y @").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnexpectedCharacter('@'));
        let span = err.span.unwrap();
        assert_eq!((span.line, span.column), (2, 5));
    }

    #[test]
    fn test_ends_with_eof() {
        let tokens = tokenize("").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }
}
