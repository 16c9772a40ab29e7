//! Parser for Noir
//!
//! Converts tokens into an Abstract Syntax Tree. Every compound construct
//! opens with a header ending in `:` and is closed by one `::`. The parser
//! keeps the open constructs on an explicit stack: each header pushes, each
//! terminator pops, a terminator with nothing open or end of input with
//! something still open is a parse error. `else` / `else if` / `catch`
//! continuations open a fresh level after the previous one closed, so a
//! whole chain sits at a single nesting level.

use std::sync::Arc;

use crate::ast::{
    AccessMode, Arg, BinaryOp, EnumDecl, Expr, FieldDecl, FuncDecl, LogicalOp, MatchArm,
    MethodSig, Param, Pattern, Program, ProtocolDecl, Stmt, StructDecl, TypeExpr, UnaryOp,
    VariantDecl,
};
use crate::error::{ErrorKind, NoirError, Result};
use crate::token::{Span, Token, TokenKind};

/// A construct waiting for its `::`
#[derive(Debug, Clone)]
struct OpenBlock {
    kind: &'static str,
    span: Span,
}

/// The parser state
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    open_blocks: Vec<OpenBlock>,
}

impl Parser {
    /// Create a new parser from tokens
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            open_blocks: Vec::new(),
        }
    }

    /// Parse the tokens into a program
    pub fn parse(&mut self) -> Result<Program> {
        let mut statements = Vec::new();

        loop {
            self.skip_newlines();
            if self.is_at_end() {
                break;
            }
            if self.check(&TokenKind::DoubleColon) {
                return Err(NoirError::new(
                    ErrorKind::UnmatchedTerminator,
                    Some(self.peek().span),
                ));
            }
            statements.push(self.declaration()?);
        }

        if let Some(open) = self.open_blocks.last() {
            return Err(NoirError::new(
                ErrorKind::UnclosedBlock(open.kind.to_string(), open.span.line),
                Some(self.peek().span),
            ));
        }

        Ok(Program::new(statements))
    }

    // ==================== Blocks ====================

    fn open_block(&mut self, kind: &'static str, span: Span) {
        self.open_blocks.push(OpenBlock { kind, span });
    }

    fn close_block(&mut self) -> Result<()> {
        self.skip_newlines();
        if self.check(&TokenKind::DoubleColon) {
            let span = self.advance().span;
            return match self.open_blocks.pop() {
                Some(_) => Ok(()),
                None => Err(NoirError::new(ErrorKind::UnmatchedTerminator, Some(span))),
            };
        }

        let err = match self.open_blocks.last() {
            Some(open) if self.is_at_end() => {
                ErrorKind::UnclosedBlock(open.kind.to_string(), open.span.line)
            }
            _ => ErrorKind::ExpectedToken("'::'".to_string(), self.peek().kind.to_string()),
        };
        Err(NoirError::new(err, Some(self.peek().span)))
    }

    /// Statements up to and including the `::` that closes this level
    fn block(&mut self, kind: &'static str, span: Span) -> Result<Vec<Stmt>> {
        self.open_block(kind, span);

        let mut stmts = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::DoubleColon) && !self.is_at_end() {
            stmts.push(self.declaration()?);
            self.skip_newlines();
        }

        self.close_block()?;
        Ok(stmts)
    }

    // ==================== Declarations ====================

    fn declaration(&mut self) -> Result<Stmt> {
        match &self.peek().kind {
            TokenKind::Shared => self.shared_declaration(),
            TokenKind::Async => {
                let span = self.advance().span;
                if !self.check(&TokenKind::Func) {
                    return Err(self.error_expected("'func' after 'async'"));
                }
                Ok(Stmt::Func(Arc::new(self.function_declaration(true, span)?)))
            }
            TokenKind::Func => {
                let span = self.peek().span;
                Ok(Stmt::Func(Arc::new(self.function_declaration(false, span)?)))
            }
            TokenKind::Struct | TokenKind::Class => self.struct_declaration(),
            TokenKind::Enum | TokenKind::Union => self.enum_declaration(),
            TokenKind::Protocol => self.protocol_declaration(),
            TokenKind::Ident(_) if self.next_is(&TokenKind::Colon) => self.var_declaration(),
            _ => self.statement(),
        }
    }

    fn var_declaration(&mut self) -> Result<Stmt> {
        let span = self.peek().span;
        let name = self.expect_ident("variable name")?;
        self.expect(&TokenKind::Colon, "':' after variable name")?;
        let ty = self.parse_type()?;
        self.expect(&TokenKind::Equal, "'=' (variables must be initialized)")?;
        let value = self.expression()?;
        Ok(Stmt::VarDecl { name, ty, value, span })
    }

    fn shared_declaration(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'shared'
        let name = self.expect_ident("shared resource name")?;
        self.expect(&TokenKind::Colon, "':' after shared resource name")?;
        let ty = self.parse_type()?;
        self.expect(&TokenKind::Equal, "'=' (shared resources must be initialized)")?;
        let value = self.expression()?;
        Ok(Stmt::SharedDecl { name, ty, value, span })
    }

    fn function_declaration(&mut self, is_async: bool, span: Span) -> Result<FuncDecl> {
        self.advance(); // consume 'func'
        let name = self.expect_ident("function name")?;

        self.expect(&TokenKind::LeftParen, "'(' after function name")?;
        let params = self.params()?;

        let mut throws = self.match_token(&TokenKind::Throws);
        let return_type = if self.match_token(&TokenKind::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };
        throws |= self.match_token(&TokenKind::Throws);

        self.expect(&TokenKind::Colon, "':' before function body")?;
        let body = self.block("func", span)?;

        Ok(FuncDecl {
            name,
            params,
            return_type,
            throws,
            is_async,
            body,
            span,
        })
    }

    /// `name: Type, ...` up to and including the closing parenthesis
    fn params(&mut self) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        self.skip_newlines();
        if !self.check(&TokenKind::RightParen) {
            loop {
                self.skip_newlines();
                let span = self.peek().span;
                let name = self.expect_ident("parameter name")?;
                self.expect(&TokenKind::Colon, "':' after parameter name")?;
                let ty = self.parse_type()?;
                params.push(Param { name, ty, span });
                self.skip_newlines();
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RightParen, "')' after parameters")?;
        Ok(params)
    }

    fn conformances(&mut self) -> Result<Vec<String>> {
        let mut protocols = Vec::new();
        if self.match_token(&TokenKind::LeftArrow) || self.match_token(&TokenKind::Conforms) {
            loop {
                protocols.push(self.expect_ident("protocol name")?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(protocols)
    }

    fn struct_declaration(&mut self) -> Result<Stmt> {
        let is_class = self.check(&TokenKind::Class);
        let span = self.advance().span;
        let name = self.expect_ident("type name")?;

        let base = if is_class && self.match_token(&TokenKind::LeftParen) {
            let base = self.expect_ident("base type name")?;
            self.expect(&TokenKind::RightParen, "')' after base type")?;
            Some(base)
        } else {
            None
        };
        let conforms = self.conformances()?;
        self.expect(&TokenKind::Colon, "':' after type header")?;

        self.open_block(if is_class { "class" } else { "struct" }, span);
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::DoubleColon) && !self.is_at_end() {
            match &self.peek().kind {
                TokenKind::Func => {
                    let span = self.peek().span;
                    methods.push(Arc::new(self.function_declaration(false, span)?));
                }
                TokenKind::Ident(_) => {
                    let span = self.peek().span;
                    let name = self.expect_ident("field name")?;
                    self.expect(&TokenKind::Colon, "':' after field name")?;
                    let ty = self.parse_type()?;
                    let default = if self.match_token(&TokenKind::Equal) {
                        Some(self.expression()?)
                    } else {
                        None
                    };
                    fields.push(FieldDecl { name, ty, default, span });
                }
                _ => return Err(self.error_expected("field or method declaration")),
            }
            self.skip_newlines();
        }
        self.close_block()?;

        Ok(Stmt::Struct(Arc::new(StructDecl {
            name,
            is_class,
            base,
            conforms,
            fields,
            methods,
            span,
        })))
    }

    fn enum_declaration(&mut self) -> Result<Stmt> {
        let is_union = self.check(&TokenKind::Union);
        let span = self.advance().span;
        let name = self.expect_ident("enum name")?;
        let conforms = self.conformances()?;
        self.expect(&TokenKind::Colon, "':' after enum name")?;

        self.open_block(if is_union { "union" } else { "enum" }, span);
        let mut variants = Vec::new();
        let mut methods = Vec::new();
        self.skip_separators();
        while !self.check(&TokenKind::DoubleColon) && !self.is_at_end() {
            match &self.peek().kind {
                TokenKind::Func => {
                    let span = self.peek().span;
                    methods.push(Arc::new(self.function_declaration(false, span)?));
                }
                TokenKind::Ident(_) => {
                    let span = self.peek().span;
                    let name = self.expect_ident("variant name")?;
                    let fields = if self.match_token(&TokenKind::LeftParen) {
                        self.payload_fields()?
                    } else {
                        Vec::new()
                    };
                    variants.push(VariantDecl { name, fields, span });
                }
                _ => return Err(self.error_expected("variant or method declaration")),
            }
            self.skip_separators();
        }
        self.close_block()?;

        Ok(Stmt::Enum(Arc::new(EnumDecl {
            name,
            is_union,
            conforms,
            variants,
            methods,
            span,
        })))
    }

    /// Payload of a variant: named `(radius: Float)` or positional `(Float, Float)`
    fn payload_fields(&mut self) -> Result<Vec<Param>> {
        let mut fields = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                let span = self.peek().span;
                let name = if matches!(self.peek().kind, TokenKind::Ident(_))
                    && self.next_is(&TokenKind::Colon)
                {
                    let name = self.expect_ident("payload field name")?;
                    self.advance(); // ':'
                    name
                } else {
                    format!("_{}", fields.len())
                };
                let ty = self.parse_type()?;
                fields.push(Param { name, ty, span });
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RightParen, "')' after variant payload")?;
        Ok(fields)
    }

    fn protocol_declaration(&mut self) -> Result<Stmt> {
        let span = self.advance().span;
        let name = self.expect_ident("protocol name")?;
        self.expect(&TokenKind::Colon, "':' after protocol name")?;

        self.open_block("protocol", span);
        let mut properties = Vec::new();
        let mut methods = Vec::new();
        self.skip_newlines();
        if self.match_token(&TokenKind::Empty) {
            self.skip_newlines();
        } else {
            while !self.check(&TokenKind::DoubleColon) && !self.is_at_end() {
                self.match_token(&TokenKind::Func);
                let member_span = self.peek().span;
                let member = self.expect_ident("protocol member name")?;
                if self.match_token(&TokenKind::Colon) {
                    let ty = self.parse_type()?;
                    properties.push(Param { name: member, ty, span: member_span });
                } else if self.match_token(&TokenKind::LeftParen) {
                    let params = self.params()?;
                    let return_type = if self.match_token(&TokenKind::Arrow) {
                        Some(self.parse_type()?)
                    } else {
                        None
                    };
                    methods.push(MethodSig {
                        name: member,
                        params,
                        return_type,
                        span: member_span,
                    });
                } else {
                    return Err(self.error_expected("':' or '(' after protocol member name"));
                }
                self.skip_newlines();
            }
        }
        self.close_block()?;

        Ok(Stmt::Protocol(Arc::new(ProtocolDecl {
            name,
            properties,
            methods,
            span,
        })))
    }

    // ==================== Types ====================

    fn parse_type(&mut self) -> Result<TypeExpr> {
        let span = self.peek().span;

        if self.match_token(&TokenKind::LeftBracket) {
            let element = self.parse_type()?;
            if self.match_token(&TokenKind::Colon) {
                let value = self.parse_type()?;
                self.expect(&TokenKind::RightBracket, "']' after dictionary type")?;
                return Ok(TypeExpr::Named {
                    name: "Dict".to_string(),
                    args: vec![element, value],
                    span,
                });
            }
            self.expect(&TokenKind::RightBracket, "']' after array element type")?;
            return Ok(TypeExpr::Named {
                name: "Array".to_string(),
                args: vec![element],
                span,
            });
        }

        if self.match_token(&TokenKind::Func) {
            self.expect(&TokenKind::LeftParen, "'(' in function type")?;
            let mut params = Vec::new();
            if !self.check(&TokenKind::RightParen) {
                loop {
                    params.push(self.parse_type()?);
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RightParen, "')' in function type")?;
            let ret = if self.match_token(&TokenKind::Arrow) {
                Some(Box::new(self.parse_type()?))
            } else {
                None
            };
            return Ok(TypeExpr::Func { params, ret, span });
        }

        if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            let mut args = Vec::new();
            if self.match_token(&TokenKind::Less) {
                loop {
                    args.push(self.parse_type()?);
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::Greater, "'>' after type arguments")?;
            }
            return Ok(TypeExpr::Named { name, args, span });
        }

        Err(NoirError::new(
            ErrorKind::ExpectedType(self.peek().kind.to_string()),
            Some(span),
        ))
    }

    // ==================== Statements ====================

    fn statement(&mut self) -> Result<Stmt> {
        match &self.peek().kind {
            TokenKind::If => self.if_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Print => self.print_statement(),
            TokenKind::Match => self.match_statement(),
            TokenKind::Grab => self.grab_statement(),
            TokenKind::Await => self.await_statement(),
            TokenKind::Within => self.within_statement(),
            TokenKind::Raise => {
                let span = self.advance().span;
                let value = self.expression()?;
                Ok(Stmt::Raise { value, span })
            }
            _ => self.expression_or_assignment(),
        }
    }

    fn expression_or_assignment(&mut self) -> Result<Stmt> {
        let expr = self.expression()?;

        if self.check(&TokenKind::Equal) {
            let equals = self.advance().span;
            if !expr.is_place() {
                return Err(NoirError::new(ErrorKind::InvalidAssignmentTarget, Some(equals)));
            }
            let value = self.expression()?;
            let span = expr.span();
            return Ok(Stmt::Assign { target: expr, value, span });
        }

        Ok(Stmt::Expr { expr })
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'if'

        let condition = self.expression()?;
        self.expect(&TokenKind::Colon, "':' after if condition")?;
        let body = self.block("if", span)?;

        let mut branches = vec![(condition, body)];
        let mut else_branch = None;

        loop {
            let resume = self.current;
            self.skip_newlines();
            if !self.check(&TokenKind::Else) {
                self.current = resume;
                break;
            }
            let else_span = self.advance().span;

            if self.match_token(&TokenKind::If) {
                let condition = self.expression()?;
                self.expect(&TokenKind::Colon, "':' after else if condition")?;
                let body = self.block("else if", else_span)?;
                branches.push((condition, body));
            } else {
                self.expect(&TokenKind::Colon, "':' after else")?;
                else_branch = Some(self.block("else", else_span)?);
                break;
            }
        }

        Ok(Stmt::If { branches, else_branch, span })
    }

    fn for_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'for'

        let var = self.expect_ident("loop variable name")?;
        self.expect(&TokenKind::In, "'in' after loop variable")?;
        let start = self.expression()?;

        let inclusive = if self.match_token(&TokenKind::To) {
            false
        } else if self.match_token(&TokenKind::Thru) {
            true
        } else {
            self.expect(&TokenKind::Colon, "'to', 'thru' or ':' in for loop")?;
            let body = self.block("for", span)?;
            return Ok(Stmt::ForEach { var, iterable: start, body, span });
        };

        let end = self.expression()?;
        let step = if self.match_token(&TokenKind::By) {
            Some(self.expression()?)
        } else {
            None
        };

        self.expect(&TokenKind::Colon, "':' after for loop range")?;
        let body = self.block("for", span)?;

        Ok(Stmt::For { var, start, end, step, inclusive, body, span })
    }

    fn while_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'while'

        let condition = self.expression()?;
        self.expect(&TokenKind::Colon, "':' after while condition")?;
        let body = self.block("while", span)?;

        Ok(Stmt::While { condition, body, span })
    }

    fn return_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'return'

        let value = if self.check(&TokenKind::Newline)
            || self.check(&TokenKind::DoubleColon)
            || self.is_at_end()
        {
            None
        } else {
            Some(self.expression()?)
        };

        Ok(Stmt::Return { value, span })
    }

    fn print_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'print'
        self.expect(&TokenKind::LeftParen, "'(' after print")?;
        let mut args = Vec::new();
        self.skip_newlines();
        if !self.check(&TokenKind::RightParen) {
            loop {
                self.skip_newlines();
                args.push(self.expression()?);
                self.skip_newlines();
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RightParen, "')' after print arguments")?;
        Ok(Stmt::Print { args, span })
    }

    fn match_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'match'
        let subject = self.expression()?;
        self.expect(&TokenKind::Colon, "':' after match subject")?;

        self.open_block("match", span);
        let mut arms = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::DoubleColon) && !self.is_at_end() {
            arms.push(self.match_arm()?);
            self.skip_newlines();
        }
        self.close_block()?;

        Ok(Stmt::Match { subject, arms, span })
    }

    fn match_arm(&mut self) -> Result<MatchArm> {
        let span = self.peek().span;

        let pattern = if self.match_token(&TokenKind::Else) {
            Pattern::Else
        } else {
            let first = self.expect_ident("variant name in match arm")?;
            let (enum_name, variant) = if self.path_follows() {
                self.advance(); // '::'
                (Some(first), self.expect_ident("variant name")?)
            } else {
                (None, first)
            };

            let mut bindings = Vec::new();
            if self.match_token(&TokenKind::LeftParen) {
                if !self.check(&TokenKind::RightParen) {
                    loop {
                        bindings.push(self.expect_ident("binding name")?);
                        if !self.match_token(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RightParen, "')' after bindings")?;
            }
            Pattern::Variant { enum_name, variant, bindings }
        };

        self.expect(&TokenKind::Colon, "':' after match pattern")?;
        let body = self.block("match arm", span)?;
        Ok(MatchArm { pattern, body, span })
    }

    fn grab_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'grab'

        let mut resources = Vec::new();
        loop {
            let resource_span = self.peek().span;
            resources.push((self.expect_ident("shared resource name")?, resource_span));
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }

        let mode = if self.match_token(&TokenKind::To) {
            match &self.peek().kind {
                TokenKind::Ident(word) if word == "read" => {
                    self.advance();
                    AccessMode::Read
                }
                TokenKind::Ident(word) if word == "write" => {
                    self.advance();
                    AccessMode::Write
                }
                _ => return Err(self.error_expected("'read' or 'write' after 'to'")),
            }
        } else {
            AccessMode::Write
        };

        self.expect(&TokenKind::Colon, "':' after grab header")?;
        let body = self.block("grab", span)?;

        Ok(Stmt::Grab { resources, mode, body, span })
    }

    fn await_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'await'
        let condition = self.expression()?;
        self.expect(&TokenKind::Colon, "':' after await condition")?;
        let body = self.block("await", span)?;
        Ok(Stmt::Await { condition, body, span })
    }

    fn within_statement(&mut self) -> Result<Stmt> {
        let span = self.advance().span; // consume 'within'
        self.expect(&TokenKind::Colon, "':' after within")?;
        let body = self.block("within", span)?;

        self.skip_newlines();
        let catch_span = self.peek().span;
        self.expect(&TokenKind::Catch, "'catch' after within block")?;
        let catch_name = if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            Some(name)
        } else {
            None
        };
        self.expect(&TokenKind::Colon, "':' after catch")?;
        let handler = self.block("catch", catch_span)?;

        Ok(Stmt::Within { body, catch_name, handler, span })
    }

    // ==================== Expressions ====================

    fn expression(&mut self) -> Result<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;

        while self.match_token(&TokenKind::Or) {
            let right = self.and_expr()?;
            let span = left.span().to(right.span());
            left = Expr::Logical {
                left: Box::new(left),
                op: LogicalOp::Or,
                right: Box::new(right),
                span,
            };
        }

        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.equality()?;

        while self.match_token(&TokenKind::And) {
            let right = self.equality()?;
            let span = left.span().to(right.span());
            left = Expr::Logical {
                left: Box::new(left),
                op: LogicalOp::And,
                right: Box::new(right),
                span,
            };
        }

        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;

        loop {
            let op = if self.match_token(&TokenKind::EqualEqual) {
                BinaryOp::Eq
            } else if self.match_token(&TokenKind::BangEqual) {
                BinaryOp::Ne
            } else {
                break;
            };

            let right = self.comparison()?;
            left = binary(left, op, right);
        }

        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.term()?;

        loop {
            let op = if self.match_token(&TokenKind::Less) {
                BinaryOp::Lt
            } else if self.match_token(&TokenKind::LessEqual) {
                BinaryOp::Le
            } else if self.match_token(&TokenKind::Greater) {
                BinaryOp::Gt
            } else if self.match_token(&TokenKind::GreaterEqual) {
                BinaryOp::Ge
            } else if self.check(&TokenKind::LeftArrow) {
                // `a <-b` in expression position is `a < -b`
                let span = self.advance().span;
                let operand = self.term()?;
                let right = Expr::Unary {
                    op: UnaryOp::Neg,
                    span: span.to(operand.span()),
                    operand: Box::new(operand),
                };
                left = binary(left, BinaryOp::Lt, right);
                continue;
            } else {
                break;
            };

            let right = self.term()?;
            left = binary(left, op, right);
        }

        Ok(left)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.factor()?;

        loop {
            let op = if self.match_token(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.match_token(&TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };

            let right = self.factor()?;
            left = binary(left, op, right);
        }

        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr> {
        let mut left = self.cast()?;

        loop {
            let op = if self.match_token(&TokenKind::Star) {
                BinaryOp::Mul
            } else if self.match_token(&TokenKind::Slash) {
                BinaryOp::Div
            } else if self.match_token(&TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };

            let right = self.cast()?;
            left = binary(left, op, right);
        }

        Ok(left)
    }

    /// `as` binds tighter than every binary operator and looser than unary ones
    fn cast(&mut self) -> Result<Expr> {
        let mut expr = self.unary()?;

        while self.match_token(&TokenKind::As) {
            let target = self.parse_type()?;
            let span = expr.span().to(target.span());
            expr = Expr::Cast {
                expr: Box::new(expr),
                target,
                span,
            };
        }

        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = if self.check(&TokenKind::Minus) {
            Some(UnaryOp::Neg)
        } else if self.check(&TokenKind::Bang) {
            Some(UnaryOp::Not)
        } else {
            None
        };

        if let Some(op) = op {
            let span = self.advance().span;
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op,
                span: span.to(operand.span()),
                operand: Box::new(operand),
            });
        }

        if self.check(&TokenKind::Try) {
            let span = self.advance().span;
            let expr = self.unary()?;
            return Ok(Expr::Try {
                span: span.to(expr.span()),
                expr: Box::new(expr),
            });
        }

        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.match_token(&TokenKind::LeftParen) {
                let args = self.arguments()?;
                let span = expr.span().to(self.previous().span);
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    span,
                };
            } else if self.match_token(&TokenKind::LeftBracket) {
                self.skip_newlines();
                let index = self.expression()?;
                self.skip_newlines();
                self.expect(&TokenKind::RightBracket, "']' after index")?;
                let span = expr.span().to(self.previous().span);
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    span,
                };
            } else if self.match_token(&TokenKind::Dot) {
                let name = self.expect_ident("member name after '.'")?;
                if self.match_token(&TokenKind::LeftParen) {
                    let args = self.arguments()?;
                    let span = expr.span().to(self.previous().span);
                    expr = Expr::MethodCall {
                        receiver: Box::new(expr),
                        method: name,
                        args,
                        span,
                    };
                } else {
                    let span = expr.span().to(self.previous().span);
                    expr = Expr::Field {
                        object: Box::new(expr),
                        name,
                        span,
                    };
                }
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Call arguments after the opening parenthesis
    fn arguments(&mut self) -> Result<Vec<Arg>> {
        let mut args = Vec::new();

        self.skip_newlines();
        if !self.check(&TokenKind::RightParen) {
            loop {
                self.skip_newlines();
                let label = match &self.peek().kind {
                    TokenKind::Ident(name) if self.next_is(&TokenKind::Colon) => {
                        let name = name.clone();
                        self.advance();
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                let value = self.expression()?;
                args.push(Arg { label, value });
                self.skip_newlines();
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }

        self.expect(&TokenKind::RightParen, "')' after arguments")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr> {
        let token = self.peek().clone();
        let span = token.span;

        match &token.kind {
            TokenKind::Int(value) => {
                self.advance();
                Ok(Expr::Int { value: *value, span })
            }
            TokenKind::Float(value) => {
                self.advance();
                Ok(Expr::Float { value: *value, span })
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr::Str { value: value.clone(), span })
            }
            TokenKind::Char(value) => {
                self.advance();
                Ok(Expr::Char { value: *value, span })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool { value: true, span })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool { value: false, span })
            }
            TokenKind::Empty => {
                self.advance();
                Ok(Expr::Empty { span })
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                if self.path_follows() {
                    self.advance(); // '::'
                    let member = self.expect_ident("member name after '::'")?;
                    let span = span.to(self.previous().span);
                    return Ok(Expr::Path { type_name: name, member, span });
                }
                Ok(Expr::Ident { name, span })
            }
            TokenKind::LeftParen => {
                self.advance();
                self.skip_newlines();
                let expr = self.expression()?;
                self.skip_newlines();
                self.expect(&TokenKind::RightParen, "')' after expression")?;
                Ok(Expr::Grouping {
                    expr: Box::new(expr),
                    span,
                })
            }
            TokenKind::LeftBracket => self.collection_literal(),
            other => Err(NoirError::new(
                ErrorKind::ExpectedExpression(other.to_string()),
                Some(span),
            )),
        }
    }

    /// `[a, b, c]` or `[k: v, ...]`
    fn collection_literal(&mut self) -> Result<Expr> {
        let span = self.advance().span; // consume '['
        self.skip_newlines();

        if self.match_token(&TokenKind::RightBracket) {
            return Ok(Expr::Array {
                elements: Vec::new(),
                span: span.to(self.previous().span),
            });
        }

        let first = self.expression()?;
        if self.match_token(&TokenKind::Colon) {
            let value = self.expression()?;
            let mut entries = vec![(first, value)];
            self.skip_newlines();
            while self.match_token(&TokenKind::Comma) {
                self.skip_newlines();
                let key = self.expression()?;
                self.expect(&TokenKind::Colon, "':' between dictionary key and value")?;
                let value = self.expression()?;
                entries.push((key, value));
                self.skip_newlines();
            }
            self.expect(&TokenKind::RightBracket, "']' after dictionary literal")?;
            return Ok(Expr::Dict {
                entries,
                span: span.to(self.previous().span),
            });
        }

        let mut elements = vec![first];
        self.skip_newlines();
        while self.match_token(&TokenKind::Comma) {
            self.skip_newlines();
            elements.push(self.expression()?);
            self.skip_newlines();
        }
        self.expect(&TokenKind::RightBracket, "']' after array elements")?;
        Ok(Expr::Array {
            elements,
            span: span.to(self.previous().span),
        })
    }

    // ==================== Helpers ====================

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn peek_next(&self) -> Option<&Token> {
        self.tokens.get(self.current + 1)
    }

    fn next_is(&self, kind: &TokenKind) -> bool {
        self.peek_next()
            .map_or(false, |t| std::mem::discriminant(&t.kind) == std::mem::discriminant(kind))
    }

    /// A `::` glued between the previous identifier and a following one is a
    /// path delimiter rather than a block terminator.
    fn path_follows(&self) -> bool {
        if !self.check(&TokenKind::DoubleColon) || self.current == 0 {
            return false;
        }
        let colons = self.peek();
        let before = self.previous();
        match self.peek_next() {
            Some(after) => {
                matches!(after.kind, TokenKind::Ident(_))
                    && before.span.end == colons.span.start
                    && colons.span.end == after.span.start
            }
            None => false,
        }
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_expected(&self, what: &str) -> NoirError {
        NoirError::new(
            ErrorKind::ExpectedToken(what.to_string(), self.peek().kind.to_string()),
            Some(self.peek().span),
        )
    }

    fn expect(&mut self, kind: &TokenKind, message: &str) -> Result<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_expected(message))
        }
    }

    fn expect_ident(&mut self, message: &str) -> Result<String> {
        if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error_expected(message))
        }
    }

    fn skip_newlines(&mut self) {
        while self.match_token(&TokenKind::Newline) {}
    }

    fn skip_separators(&mut self) {
        while self.match_token(&TokenKind::Newline) || self.match_token(&TokenKind::Comma) {}
    }
}

fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    let span = left.span().to(right.span());
    Expr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
        span,
    }
}

/// Parse a token sequence into a program
pub fn parse(tokens: Vec<Token>) -> Result<Program> {
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_source(source: &str) -> Result<Program> {
        parse(tokenize(source)?)
    }

    fn parse_ok(source: &str) -> Program {
        parse_source(source).expect("parse failed")
    }

    fn parse_err(source: &str) -> ErrorKind {
        parse_source(source).unwrap_err().kind
    }

    #[test]
    fn test_var_declaration() {
        let program = parse_ok("x: Int = 42");
        assert_eq!(program.statements.len(), 1);
        match &program.statements[0] {
            Stmt::VarDecl { name, ty, .. } => {
                assert_eq!(name, "x");
                assert_eq!(ty.to_string(), "Int");
            }
            _ => panic!("expected variable declaration"),
        }
    }

    #[test]
    fn test_collection_types() {
        let program = parse_ok("a: [Int] = empty\nd: [String: Float] = empty\ns: OSet<Char> = empty");
        let types: Vec<String> = program
            .statements
            .iter()
            .map(|s| match s {
                Stmt::VarDecl { ty, .. } => ty.to_string(),
                _ => panic!("expected declaration"),
            })
            .collect();
        assert_eq!(types, vec!["Array<Int>", "Dict<String, Float>", "OSet<Char>"]);
    }

    #[test]
    fn test_one_line_for() {
        let program = parse_ok("for i in 1 to 4: print(i) ::");
        match &program.statements[0] {
            Stmt::For { var, inclusive, step, body, .. } => {
                assert_eq!(var, "i");
                assert!(!inclusive);
                assert!(step.is_none());
                assert_eq!(body.len(), 1);
            }
            _ => panic!("expected for loop"),
        }
    }

    #[test]
    fn test_for_thru_by() {
        let program = parse_ok("for i in 10 thru 0 by -2:\n  print(i)\n::");
        assert!(matches!(
            &program.statements[0],
            Stmt::For { inclusive: true, step: Some(_), .. }
        ));
    }

    #[test]
    fn test_for_each() {
        let program = parse_ok("for x in items:\n print(x)\n::");
        assert!(matches!(&program.statements[0], Stmt::ForEach { .. }));
    }

    #[test]
    fn test_if_else_chain_is_one_level() {
        let program = parse_ok(
            "if x > 0:\n  print(1)\n:: else if x < 0:\n  print(2)\n::\nelse:\n  print(3)\n::\nprint(4)",
        );
        assert_eq!(program.statements.len(), 2);
        match &program.statements[0] {
            Stmt::If { branches, else_branch, .. } => {
                assert_eq!(branches.len(), 2);
                assert!(else_branch.is_some());
            }
            _ => panic!("expected if statement"),
        }
    }

    #[test]
    fn test_nested_terminators_on_one_line() {
        let program = parse_ok("while a:\n  while b:\n    print(1)\n:: ::");
        assert_eq!(program.statements.len(), 1);
    }

    #[test]
    fn test_extra_terminator_is_error() {
        assert_eq!(
            parse_err("for i in 1 to 4: print(i) :: ::"),
            ErrorKind::UnmatchedTerminator
        );
        assert_eq!(parse_err("::"), ErrorKind::UnmatchedTerminator);
    }

    #[test]
    fn test_missing_terminator_is_error() {
        let err = parse_err("func f():\n  if true:\n    print(1)\n  ::\n");
        assert_eq!(err, ErrorKind::UnclosedBlock("func".to_string(), 1));
    }

    #[test]
    fn test_function() {
        let program = parse_ok("func add(a: Int, b: Int) -> Int:\n  return a + b\n::");
        match &program.statements[0] {
            Stmt::Func(decl) => {
                assert_eq!(decl.name, "add");
                assert_eq!(decl.params.len(), 2);
                assert!(decl.return_type.is_some());
                assert!(!decl.is_async && !decl.throws);
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn test_async_throws_function() {
        let program = parse_ok("async func worker(id: Int):\n::\nfunc risky() throws -> Int:\n return 1\n::");
        assert!(matches!(&program.statements[0], Stmt::Func(d) if d.is_async));
        assert!(matches!(&program.statements[1], Stmt::Func(d) if d.throws));
    }

    #[test]
    fn test_enum_conformance_forms_are_equivalent() {
        for source in [
            "enum Color <- Named:\n  Red, Green\n  Blue\n::",
            "enum Color conforms Named:\n  Red\n  Green, Blue\n::",
        ] {
            match &parse_ok(source).statements[0] {
                Stmt::Enum(decl) => {
                    assert_eq!(decl.conforms, vec!["Named".to_string()]);
                    let names: Vec<&str> = decl.variants.iter().map(|v| v.name.as_str()).collect();
                    assert_eq!(names, vec!["Red", "Green", "Blue"]);
                }
                _ => panic!("expected enum"),
            }
        }
    }

    #[test]
    fn test_enum_payloads() {
        let program = parse_ok("union Shape:\n  Circle(radius: Float)\n  Rect(Float, Float)\n::");
        match &program.statements[0] {
            Stmt::Enum(decl) => {
                assert!(decl.is_union);
                assert_eq!(decl.variants[0].fields[0].name, "radius");
                assert_eq!(decl.variants[1].fields[1].name, "_1");
            }
            _ => panic!("expected enum"),
        }
    }

    #[test]
    fn test_empty_protocol() {
        let program = parse_ok("protocol Marker: empty ::");
        match &program.statements[0] {
            Stmt::Protocol(decl) => {
                assert!(decl.properties.is_empty());
                assert!(decl.methods.is_empty());
            }
            _ => panic!("expected protocol"),
        }
    }

    #[test]
    fn test_protocol_requirements() {
        let program = parse_ok("protocol Shape:\n  name: String\n  area() -> Float\n  func scale(factor: Float)\n::");
        match &program.statements[0] {
            Stmt::Protocol(decl) => {
                assert_eq!(decl.properties.len(), 1);
                assert_eq!(decl.methods.len(), 2);
            }
            _ => panic!("expected protocol"),
        }
    }

    #[test]
    fn test_class_with_base() {
        let program = parse_ok("class Dog(Animal) <- Trainable:\n  name: String = \"rex\"\n  func bark() -> String:\n    return \"woof\"\n  ::\n::");
        match &program.statements[0] {
            Stmt::Struct(decl) => {
                assert!(decl.is_class);
                assert_eq!(decl.base.as_deref(), Some("Animal"));
                assert_eq!(decl.conforms, vec!["Trainable".to_string()]);
                assert_eq!(decl.fields.len(), 1);
                assert_eq!(decl.methods.len(), 1);
            }
            _ => panic!("expected class"),
        }
    }

    #[test]
    fn test_path_versus_terminator() {
        let program = parse_ok("if c == Color::Red:\n  x = Color::Green\n::");
        match &program.statements[0] {
            Stmt::If { branches, .. } => match &branches[0].0 {
                Expr::Binary { right, .. } => {
                    assert!(matches!(right.as_ref(), Expr::Path { member, .. } if member == "Red"))
                }
                _ => panic!("expected comparison"),
            },
            _ => panic!("expected if"),
        }
    }

    #[test]
    fn test_match_arms() {
        let program = parse_ok(
            "match s:\n  Circle(r):\n    print(r)\n  ::\n  Shape::Rect(w, h):\n  ::\n  else:\n  ::\n::",
        );
        match &program.statements[0] {
            Stmt::Match { arms, .. } => {
                assert_eq!(arms.len(), 3);
                assert!(matches!(&arms[1].pattern, Pattern::Variant { enum_name: Some(e), bindings, .. } if e == "Shape" && bindings.len() == 2));
                assert!(matches!(arms[2].pattern, Pattern::Else));
            }
            _ => panic!("expected match"),
        }
    }

    #[test]
    fn test_grab_modes() {
        let program = parse_ok("grab a, b to read:\n::\ngrab c:\n::\ngrab d to write:\n  await d > 0:\n  ::\n::");
        assert!(matches!(&program.statements[0], Stmt::Grab { mode: AccessMode::Read, resources, .. } if resources.len() == 2));
        assert!(matches!(&program.statements[1], Stmt::Grab { mode: AccessMode::Write, .. }));
        match &program.statements[2] {
            Stmt::Grab { body, .. } => assert!(matches!(body[0], Stmt::Await { .. })),
            _ => panic!("expected grab"),
        }
    }

    #[test]
    fn test_within_catch() {
        let program = parse_ok("within:\n  x = try f()\n:: catch e:\n  print(e)\n::");
        assert!(matches!(&program.statements[0], Stmt::Within { catch_name: Some(n), .. } if n == "e"));
    }

    #[test]
    fn test_cast_precedence() {
        // `as` binds tighter than `+` but looser than unary minus
        let program = parse_ok("y: Float = -x as Float + 1");
        match &program.statements[0] {
            Stmt::VarDecl { value: Expr::Binary { left, op: BinaryOp::Add, .. }, .. } => match left.as_ref() {
                Expr::Cast { expr, .. } => assert!(matches!(expr.as_ref(), Expr::Unary { .. })),
                _ => panic!("expected cast on the left"),
            },
            _ => panic!("expected addition"),
        }
    }

    #[test]
    fn test_left_arrow_in_expression() {
        let program = parse_ok("b: Bool = a<-1");
        match &program.statements[0] {
            Stmt::VarDecl { value: Expr::Binary { op: BinaryOp::Lt, right, .. }, .. } => {
                assert!(matches!(right.as_ref(), Expr::Unary { op: UnaryOp::Neg, .. }))
            }
            _ => panic!("expected comparison"),
        }
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert_eq!(parse_err("f() = 3"), ErrorKind::InvalidAssignmentTarget);
    }

    #[test]
    fn test_dict_and_labelled_args() {
        let program = parse_ok("d: [String: Int] = [\"a\": 1, \"b\": 2]\np: Point = Point(x: 1, y: 2)");
        assert!(matches!(&program.statements[0], Stmt::VarDecl { value: Expr::Dict { entries, .. }, .. } if entries.len() == 2));
        match &program.statements[1] {
            Stmt::VarDecl { value: Expr::Call { args, .. }, .. } => {
                assert_eq!(args[0].label.as_deref(), Some("x"));
            }
            _ => panic!("expected call"),
        }
    }
}
