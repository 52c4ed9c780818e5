// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Front end for the C subset fixtures are written in.

pub mod ast;
mod lexer;
mod parser;

pub use parser::{parse_function_body, parse_translation_unit};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}
