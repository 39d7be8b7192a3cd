/*!
# Language Module

Lexical analysis and parsing of the BASIC dialect, plus the static
metadata pass that downstream code generation consumes.

*/

#[macro_use]
mod error;
mod lex;
mod meta;
mod parse;

pub mod ast;
pub mod token;

pub use error::Diagnostic;
pub use error::Error;
pub use error::ErrorCode;
pub use error::Severity;
pub use lex::tokenize;
pub use meta::SymbolEntry;
pub use meta::SymbolKind;
pub use meta::Symbols;
pub use parse::parse;

/// 1-based source line number.
pub type LineNumber = usize;
