//! Parser module for Apache configuration
//!
//! This module provides the lexer, AST, and parser for Apache2 config syntax.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod variables;

pub use ast::*;
pub use lexer::{lex, tokenize, LexError, Line, LineKind, Location, Spanned, Token};
pub use parser::{parse, ParseError, Parser};
pub use variables::VariableResolver;
