//! Parser for the Moonlet language
//!
//! A recursive-descent parser that converts a token stream into an AST.
//! Binary operator sequences are collected into an [`OperatorChain`] and
//! resolved by precedence on commit; `^` is handled separately through
//! [`create_power_expression`] so that it binds tighter than unary operators.
//!
//! # Example
//!
//! ```
//! use moonlet_core::parser::Parser;
//!
//! let block = Parser::parse_chunk("local x = 1 + 2 * 3 return x");
//! assert!(block.is_ok());
//!
//! let expr = Parser::parse_expression("a or b and c");
//! assert!(expr.is_ok());
//! ```

mod error;

pub use error::{ParseError, ParseErrorKind};

use crate::ast::{
    create_power_expression, Block, Expr, ExprKind, FunctionBody, OperatorChain, Stmt, StmtKind,
    TableField, UnaryOp,
};
use crate::bytecode::parse_number;
use crate::lexer::{Lexer, Span, Token, TokenKind};

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;

/// The Moonlet parser
pub struct Parser {
    /// All tokens from the source, ending with `Eof`
    tokens: Vec<Token>,
    /// Current position in the token stream
    position: usize,
}

impl Parser {
    /// Create a new parser from source code
    pub fn new(source: &str) -> ParseResult<Self> {
        let tokens = Lexer::tokenize(source)?;
        Ok(Self {
            tokens,
            position: 0,
        })
    }

    /// Parse a whole chunk
    pub fn parse_chunk(source: &str) -> ParseResult<Block> {
        let mut parser = Parser::new(source)?;
        let block = parser.block()?;
        parser.expect(TokenKind::Eof, "<eof>")?;
        Ok(block)
    }

    /// Parse a single expression (dynamic expressions, watches)
    pub fn parse_expression(source: &str) -> ParseResult<Expr> {
        let mut parser = Parser::new(source)?;
        let expr = parser.expression()?;
        parser.expect(TokenKind::Eof, "<eof>")?;
        Ok(expr)
    }

    // ==================== Token Management ====================

    fn current(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.position.min(last)]
    }

    fn current_kind(&self) -> TokenKind {
        self.current().kind
    }

    fn peek_kind(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.position + offset)
            .map_or(TokenKind::Eof, |t| t.kind)
    }

    fn previous_span(&self) -> Span {
        self.position
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or_else(Span::default, |t| t.span)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if token.kind != TokenKind::Eof {
            self.position += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_name(&mut self) -> ParseResult<String> {
        if self.check(TokenKind::Name) {
            Ok(self.advance().lexeme)
        } else {
            Err(ParseError::new(ParseErrorKind::ExpectedName, self.current().span)
                .with_hint(format!("found {}", self.current_kind())))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::new(
            ParseErrorKind::UnexpectedToken {
                found: self.current_kind(),
                expected: expected.to_string(),
            },
            self.current().span,
        )
    }

    fn span_from(&self, start: Span) -> Span {
        start.to(self.previous_span())
    }

    // ==================== Blocks and Statements ====================

    fn block_ends(&self) -> bool {
        matches!(
            self.current_kind(),
            TokenKind::End | TokenKind::Else | TokenKind::ElseIf | TokenKind::Until | TokenKind::Eof
        )
    }

    fn block(&mut self) -> ParseResult<Block> {
        let mut stmts = Vec::new();
        while !self.block_ends() {
            if self.eat(TokenKind::Semicolon) {
                continue;
            }
            if self.check(TokenKind::Return) {
                stmts.push(self.return_stmt()?);
                if !self.block_ends() {
                    return Err(ParseError::new(ParseErrorKind::ReturnNotLast, self.current().span));
                }
                break;
            }
            stmts.push(self.statement()?);
        }
        Ok(Block::new(stmts, self.current().span))
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        let start = self.current().span;
        let kind = match self.current_kind() {
            TokenKind::Break => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Do => {
                self.advance();
                let body = self.block()?;
                self.expect(TokenKind::End, "'end'")?;
                StmtKind::Do(body)
            }
            TokenKind::While => {
                self.advance();
                let condition = self.expression()?;
                self.expect(TokenKind::Do, "'do'")?;
                let body = self.block()?;
                self.expect(TokenKind::End, "'end'")?;
                StmtKind::While { condition, body }
            }
            TokenKind::Repeat => {
                self.advance();
                let body = self.block()?;
                self.expect(TokenKind::Until, "'until'")?;
                let condition = self.expression()?;
                StmtKind::Repeat { body, condition }
            }
            TokenKind::If => self.if_stmt()?,
            TokenKind::For => self.for_stmt()?,
            TokenKind::Function => self.function_stmt()?,
            TokenKind::Local => self.local_stmt()?,
            _ => self.expr_stmt()?,
        };
        Ok(Stmt::new(kind, self.span_from(start)))
    }

    fn return_stmt(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let values = if self.block_ends() || self.check(TokenKind::Semicolon) {
            Vec::new()
        } else {
            self.expression_list()?
        };
        self.eat(TokenKind::Semicolon);
        Ok(Stmt::new(StmtKind::Return(values), self.span_from(start)))
    }

    fn if_stmt(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let mut branches = Vec::new();
        let condition = self.expression()?;
        self.expect(TokenKind::Then, "'then'")?;
        branches.push((condition, self.block()?));

        let mut else_block = None;
        loop {
            match self.current_kind() {
                TokenKind::ElseIf => {
                    self.advance();
                    let condition = self.expression()?;
                    self.expect(TokenKind::Then, "'then'")?;
                    branches.push((condition, self.block()?));
                }
                TokenKind::Else => {
                    self.advance();
                    else_block = Some(self.block()?);
                    self.expect(TokenKind::End, "'end'")?;
                    break;
                }
                _ => {
                    self.expect(TokenKind::End, "'end'")?;
                    break;
                }
            }
        }
        Ok(StmtKind::If {
            branches,
            else_block,
        })
    }

    fn for_stmt(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let first = self.expect_name()?;

        if self.eat(TokenKind::Assign) {
            let start = self.expression()?;
            self.expect(TokenKind::Comma, "','")?;
            let limit = self.expression()?;
            let step = if self.eat(TokenKind::Comma) {
                Some(self.expression()?)
            } else {
                None
            };
            self.expect(TokenKind::Do, "'do'")?;
            let body = self.block()?;
            self.expect(TokenKind::End, "'end'")?;
            return Ok(StmtKind::NumericFor {
                var: first,
                start,
                limit,
                step,
                body,
            });
        }

        let mut names = vec![first];
        while self.eat(TokenKind::Comma) {
            names.push(self.expect_name()?);
        }
        self.expect(TokenKind::In, "'=' or 'in'")?;
        let exprs = self.expression_list()?;
        self.expect(TokenKind::Do, "'do'")?;
        let body = self.block()?;
        self.expect(TokenKind::End, "'end'")?;
        Ok(StmtKind::GenericFor { names, exprs, body })
    }

    fn function_stmt(&mut self) -> ParseResult<StmtKind> {
        let start = self.advance().span;
        let mut path = vec![self.expect_name()?];
        while self.eat(TokenKind::Dot) {
            path.push(self.expect_name()?);
        }
        let method = if self.eat(TokenKind::Colon) {
            Some(self.expect_name()?)
        } else {
            None
        };

        let name = match &method {
            Some(m) => format!("{}:{m}", path.join(".")),
            None => path.join("."),
        };
        let body = self.function_body(Some(name), method.is_some(), start)?;
        Ok(StmtKind::Function { path, method, body })
    }

    fn local_stmt(&mut self) -> ParseResult<StmtKind> {
        let start = self.advance().span;
        if self.eat(TokenKind::Function) {
            let name = self.expect_name()?;
            let body = self.function_body(Some(name.clone()), false, start)?;
            return Ok(StmtKind::LocalFunction { name, body });
        }

        let mut names = vec![self.expect_name()?];
        while self.eat(TokenKind::Comma) {
            names.push(self.expect_name()?);
        }
        let values = if self.eat(TokenKind::Assign) {
            self.expression_list()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::Local { names, values })
    }

    fn expr_stmt(&mut self) -> ParseResult<StmtKind> {
        let first = self.suffixed_exp()?;

        if self.check(TokenKind::Assign) || self.check(TokenKind::Comma) {
            let mut targets = vec![first];
            while self.eat(TokenKind::Comma) {
                targets.push(self.suffixed_exp()?);
            }
            for target in &targets {
                if !matches!(target.kind, ExprKind::Name(_) | ExprKind::Index { .. }) {
                    return Err(ParseError::new(
                        ParseErrorKind::InvalidAssignmentTarget,
                        target.span,
                    ));
                }
            }
            self.expect(TokenKind::Assign, "'='")?;
            let values = self.expression_list()?;
            return Ok(StmtKind::Assign { targets, values });
        }

        if matches!(first.kind, ExprKind::Call { .. } | ExprKind::MethodCall { .. }) {
            Ok(StmtKind::Call(first))
        } else {
            Err(ParseError::new(ParseErrorKind::ExpectedStatement, first.span))
        }
    }

    /// `(params) block end`; `start` is the span of the introducing keyword
    fn function_body(
        &mut self,
        name: Option<String>,
        is_method: bool,
        start: Span,
    ) -> ParseResult<FunctionBody> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if is_method {
            params.push("self".to_string());
        }
        let mut is_vararg = false;
        if !self.check(TokenKind::RParen) {
            loop {
                if self.eat(TokenKind::Ellipsis) {
                    is_vararg = true;
                    break;
                }
                params.push(self.expect_name()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.block()?;
        self.expect(TokenKind::End, "'end'")?;
        Ok(FunctionBody {
            name,
            params,
            is_vararg,
            body,
            span: self.span_from(start),
        })
    }

    // ==================== Expressions ====================

    fn expression_list(&mut self) -> ParseResult<Vec<Expr>> {
        let mut exprs = vec![self.expression()?];
        while self.eat(TokenKind::Comma) {
            exprs.push(self.expression()?);
        }
        Ok(exprs)
    }

    /// Binary expressions go through an operator chain
    fn expression(&mut self) -> ParseResult<Expr> {
        let first = self.unary_exp()?;
        if !self.current_kind().is_binary_operator() {
            return Ok(first);
        }

        let mut chain = OperatorChain::begin();
        chain.add_expression(first)?;
        while self.current_kind().is_binary_operator() {
            let operator = self.advance();
            chain.add_operator(&operator)?;
            chain.add_expression(self.unary_exp()?)?;
        }
        Ok(chain.commit()?)
    }

    fn unary_exp(&mut self) -> ParseResult<Expr> {
        let op = match self.current_kind() {
            TokenKind::Not => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Hash => Some(UnaryOp::Len),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        };
        let Some(op) = op else {
            return self.power_exp();
        };

        let start = self.advance().span;
        let operand = self.unary_exp()?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            self.span_from(start),
        ))
    }

    /// `simple ^ unary`, nesting the exponent first
    fn power_exp(&mut self) -> ParseResult<Expr> {
        let base = self.simple_exp()?;
        if self.eat(TokenKind::Caret) {
            let exponent = self.unary_exp()?;
            return Ok(create_power_expression(base, exponent));
        }
        Ok(base)
    }

    fn simple_exp(&mut self) -> ParseResult<Expr> {
        let token = self.current().clone();
        let kind = match token.kind {
            TokenKind::Nil => ExprKind::Nil,
            TokenKind::True => ExprKind::True,
            TokenKind::False => ExprKind::False,
            TokenKind::Ellipsis => ExprKind::Vararg,
            TokenKind::Number | TokenKind::HexNumber => ExprKind::Number(self.number(&token)?),
            TokenKind::String => ExprKind::String(unescape(&token)?),
            TokenKind::LongString => ExprKind::String(long_string(&token.lexeme)),
            TokenKind::Function => {
                self.advance();
                let body = self.function_body(None, false, token.span)?;
                let span = body.span;
                return Ok(Expr::new(ExprKind::Function(Box::new(body)), span));
            }
            TokenKind::LBrace => return self.table_constructor(),
            _ => return self.suffixed_exp(),
        };
        self.advance();
        Ok(Expr::new(kind, token.span))
    }

    fn number(&self, token: &Token) -> ParseResult<f64> {
        let value = if token.kind == TokenKind::HexNumber {
            parse_number(&token.lexeme)
        } else {
            token.lexeme.parse::<f64>().ok()
        };
        value.ok_or_else(|| {
            ParseError::new(ParseErrorKind::InvalidNumber(token.lexeme.clone()), token.span)
        })
    }

    fn primary_exp(&mut self) -> ParseResult<Expr> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Name => {
                self.advance();
                Ok(Expr::new(ExprKind::Name(token.lexeme), token.span))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Expr::new(ExprKind::Paren(Box::new(inner)), self.span_from(token.span)))
            }
            TokenKind::Eof => Err(ParseError::new(ParseErrorKind::ExpectedExpression, token.span)),
            other => Err(ParseError::new(ParseErrorKind::UnexpectedSymbol(other), token.span)),
        }
    }

    fn suffixed_exp(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary_exp()?;
        let start = expr.span;
        loop {
            match self.current_kind() {
                TokenKind::Dot => {
                    self.advance();
                    let name_token = self.expect(TokenKind::Name, "name")?;
                    let key = Expr::new(ExprKind::String(name_token.lexeme), name_token.span);
                    expr = Expr::new(
                        ExprKind::Index {
                            object: Box::new(expr),
                            key: Box::new(key),
                        },
                        self.span_from(start),
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.expression()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr::new(
                        ExprKind::Index {
                            object: Box::new(expr),
                            key: Box::new(key),
                        },
                        self.span_from(start),
                    );
                }
                TokenKind::Colon => {
                    self.advance();
                    let method = self.expect_name()?;
                    let args = self.call_args()?;
                    expr = Expr::new(
                        ExprKind::MethodCall {
                            object: Box::new(expr),
                            method,
                            args,
                        },
                        self.span_from(start),
                    );
                }
                TokenKind::LParen | TokenKind::LBrace | TokenKind::String | TokenKind::LongString => {
                    let args = self.call_args()?;
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        self.span_from(start),
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> ParseResult<Vec<Expr>> {
        match self.current_kind() {
            TokenKind::String | TokenKind::LongString => Ok(vec![self.simple_exp()?]),
            TokenKind::LBrace => Ok(vec![self.table_constructor()?]),
            _ => {
                self.expect(TokenKind::LParen, "function arguments")?;
                if self.eat(TokenKind::RParen) {
                    return Ok(Vec::new());
                }
                let args = self.expression_list()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(args)
            }
        }
    }

    fn table_constructor(&mut self) -> ParseResult<Expr> {
        let start = self.expect(TokenKind::LBrace, "'{'")?.span;
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) {
            let field = if self.check(TokenKind::LBracket) {
                self.advance();
                let key = self.expression()?;
                self.expect(TokenKind::RBracket, "']'")?;
                self.expect(TokenKind::Assign, "'='")?;
                TableField::Keyed(key, self.expression()?)
            } else if self.check(TokenKind::Name) && self.peek_kind(1) == TokenKind::Assign {
                let name = self.advance().lexeme;
                self.advance();
                TableField::Named(name, self.expression()?)
            } else {
                TableField::Positional(self.expression()?)
            };
            fields.push(field);
            if !self.eat(TokenKind::Comma) && !self.eat(TokenKind::Semicolon) {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Expr::new(ExprKind::Table(fields), self.span_from(start)))
    }
}

/// Contents of a `[[...]]` literal; a leading newline is dropped
fn long_string(lexeme: &str) -> String {
    let inner = &lexeme[2..lexeme.len() - 2];
    let inner = inner
        .strip_prefix("\r\n")
        .or_else(|| inner.strip_prefix('\n'))
        .unwrap_or(inner);
    inner.to_string()
}

/// Decode the escapes of a quoted string literal
fn unescape(token: &Token) -> ParseResult<String> {
    let body = &token.lexeme[1..token.lexeme.len() - 1];
    let invalid =
        |seq: String| ParseError::new(ParseErrorKind::InvalidEscape(seq), token.span);

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(e) = chars.next() else {
            return Err(invalid(String::new()));
        };
        match e {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\u{7}'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '\\' | '"' | '\'' | '\n' => out.push(e),
            'z' => {
                while chars.peek().is_some_and(|c| c.is_whitespace()) {
                    chars.next();
                }
            }
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                let code = u8::from_str_radix(&hex, 16).map_err(|_| invalid(format!("x{hex}")))?;
                out.push(char::from(code));
            }
            d if d.is_ascii_digit() => {
                let mut digits = d.to_string();
                while digits.len() < 3 && chars.peek().is_some_and(char::is_ascii_digit) {
                    digits.extend(chars.next());
                }
                let code = digits
                    .parse::<u8>()
                    .map_err(|_| invalid(digits.clone()))?;
                out.push(char::from(code));
            }
            other => return Err(invalid(other.to_string())),
        }
    }
    Ok(out)
}
