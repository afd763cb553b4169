//! Token kinds and structures for GraphQL.

use morpher_core::Span;

/// The kind of a GraphQL token.
///
/// Keywords are not separate kinds: GraphQL keywords are contextual, so
/// `type` or `query` lex as [`TokenKind::Name`] and the parser decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenKind {
    // Special tokens
    Eof,
    Error,
    /// A quoted or block string missing its closing quotes.
    UnterminatedString,

    // Literals
    Name,
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    BlockStringLiteral,

    // Punctuation
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
    Spread,
    Eq,
    Pipe,
    Amp,
    At,
    Bang,
    Dollar,
}

impl TokenKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eof => "<EOF>",
            Self::Error => "<error>",
            Self::UnterminatedString => "<unterminated string>",
            Self::Name => "Name",
            Self::IntLiteral => "Int",
            Self::FloatLiteral => "Float",
            Self::StringLiteral => "String",
            Self::BlockStringLiteral => "BlockString",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Colon => ":",
            Self::Spread => "...",
            Self::Eq => "=",
            Self::Pipe => "|",
            Self::Amp => "&",
            Self::At => "@",
            Self::Bang => "!",
            Self::Dollar => "$",
        }
    }

    /// Returns true for string and block string literals.
    #[must_use]
    pub const fn is_string(self) -> bool {
        matches!(self, Self::StringLiteral | Self::BlockStringLiteral)
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A token with its kind and source span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    #[must_use]
    #[inline]
    pub const fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    #[must_use]
    #[inline]
    pub const fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}
