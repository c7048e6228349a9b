//! Syntax module: lexer, parser, and parse trees.

pub mod ast;
mod config;
mod parser;
mod token;

pub use ast::{Connective, Formula, Quantifier, Term};
pub use config::{Junctor, ParserConfig, ParserConfigBuilder, QuantifierStyle};
pub use parser::{parse, parse_term, parse_with, Parser};
pub use token::{is_reserved_word, Token};
