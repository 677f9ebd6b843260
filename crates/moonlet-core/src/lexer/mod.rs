//! Lexer for Moonlet source text
//!
//! Tokenization is driven by a `logos`-generated state machine. The lexer
//! produces a flat token vector terminated by an `Eof` token, which the parser
//! consumes front to back.

mod span;
mod token;

pub use span::{LineIndex, Location, Span};
pub use token::TokenKind;

use logos::Logos;
use thiserror::Error;

/// A token with its kind, span, and source text
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub lexeme: String,
}

impl Token {
    #[must_use]
    pub fn new(kind: TokenKind, span: Span, lexeme: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            lexeme: lexeme.into(),
        }
    }
}

/// Lexer error with the offending span
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("unexpected character '{found}' at {span}")]
    UnexpectedChar { found: String, span: Span },
    #[error("unfinished string at {span}")]
    UnfinishedString { span: Span },
}

impl LexError {
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedChar { span, .. } | LexError::UnfinishedString { span } => *span,
        }
    }
}

/// The Moonlet lexer
pub struct Lexer;

impl Lexer {
    /// Tokenize the whole source text
    ///
    /// Stops at the first invalid character.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
        let mut lexer = TokenKind::lexer(source);
        let mut tokens = Vec::new();

        while let Some(result) = lexer.next() {
            let span = Span::from(lexer.span());
            let lexeme = lexer.slice();
            match result {
                Ok(kind) => tokens.push(Token::new(kind, span, lexeme)),
                Err(()) if lexeme.starts_with('"') || lexeme.starts_with('\'') => {
                    return Err(LexError::UnfinishedString { span });
                }
                Err(()) => {
                    return Err(LexError::UnexpectedChar {
                        found: lexeme.to_string(),
                        span,
                    });
                }
            }
        }

        let end = source.len() as u32;
        tokens.push(Token::new(TokenKind::Eof, Span::new(end, end), ""));
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_names_and_numbers() {
        assert_eq!(
            kinds("local x = 0x1F + 2.5e3"),
            vec![
                TokenKind::Local,
                TokenKind::Name,
                TokenKind::Assign,
                TokenKind::HexNumber,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn longest_operator_wins() {
        assert_eq!(
            kinds("a // b .. c ... ~= <<"),
            vec![
                TokenKind::Name,
                TokenKind::DoubleSlash,
                TokenKind::Name,
                TokenKind::DotDot,
                TokenKind::Name,
                TokenKind::Ellipsis,
                TokenKind::NotEq,
                TokenKind::ShiftLeft,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("-- line comment\nx --[[ block\ncomment ]] y"),
            vec![TokenKind::Name, TokenKind::Name, TokenKind::Eof]
        );
    }

    #[test]
    fn strings_keep_their_quotes() {
        let tokens = Lexer::tokenize(r#"'it''s' "a\"b""#).unwrap();
        assert_eq!(tokens[0].lexeme, "'it'");
        assert_eq!(tokens[1].lexeme, "'s'");
        assert_eq!(tokens[2].lexeme, r#""a\"b""#);
    }

    #[test]
    fn invalid_character_is_reported() {
        let err = Lexer::tokenize("x = $").unwrap_err();
        assert!(matches!(err, LexError::UnexpectedChar { .. }));
        assert_eq!(err.span(), Span::new(4, 5));
    }
}
