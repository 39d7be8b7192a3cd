//! # Basic-Ten
//!
//! A compiler from a BASIC dialect to IC10 MIPS assembly - the
//! language of programmable chips in Stationeers - and an
//! instruction-level simulator for testing programs outside the game.
//!
//! The pipeline: [`lang::tokenize`] turns source text into tokens,
//! [`lang::parse`] builds the AST, [`mach::compile`] lowers it to
//! assembly with a bidirectional source map, and [`mach::Machine`]
//! executes assembly (generated or hand-written) one instruction at a
//! time with registers, stack, devices and breakpoints exposed.
//!
//! ```
//! use basicten::mach::{compile, CompileOptions, Machine};
//!
//! let result = compile("VAR x = 5\nPRINT x", &CompileOptions::default());
//! assert!(result.success);
//! let mut machine = Machine::new();
//! machine.load(result.code.as_ref().unwrap());
//! machine.run(100);
//! assert_eq!(machine.register("r0"), Some(5.0));
//! ```

pub mod lang;
pub mod mach;
