//! Syntax layer for Morpher.
//!
//! This crate provides:
//! - `token`: Token kinds and token structures
//! - `lexer`: Tokenization
//! - `ast`: Abstract syntax tree types
//! - `parser`: Recursive descent parser for type-system and executable documents

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::*;
pub use lexer::Lexer;
pub use parser::{parse, parse_document, ParseResult};
pub use token::{Token, TokenKind};
