/*!
## Machine Module

The IC10 side of the toolchain: code generation from the AST, the
assembly parser and decompiler, and the simulator that executes
assembly with exact register, stack and device semantics.

*/

pub mod asm;

mod codegen;
mod compile;
mod decompile;
mod device;
mod link;
mod machine;
mod operation;
mod reg;
mod srcmap;

pub use codegen::generate;
pub use codegen::Assembly;
pub use compile::compile;
pub use compile::Compilation;
pub use compile::CompileOptions;
pub use compile::LINE_LIMIT;
pub use decompile::decompile;
pub use decompile::decompile_text;
pub use device::name_hash;
pub use device::BatchMode;
pub use device::DeviceRef;
pub use link::resolve;
pub use machine::Device;
pub use machine::DeviceSel;
pub use machine::Machine;
pub use machine::Snapshot;
pub use machine::PIN_COUNT;
pub use machine::STACK_SIZE;
pub use srcmap::SourceMap;
