//! SPIR-V binary decoding and shader reflection for the Prism engine.
//!
//! This crate provides:
//! - A word-stream decoder for compiled SPIR-V modules
//! - Reflection of entry points, input variables, descriptor bindings,
//!   and push-constant blocks
//!
//! It is intentionally free of any Vulkan dependency; `prism-gpu` maps the
//! reflected records onto `ash` types.

use thiserror::Error;

pub mod decode;
pub mod reflect;

pub use decode::{words_from_bytes, Instruction, ModuleReader};
pub use reflect::{
    DescriptorBinding, DescriptorKind, ExecutionModel, InputVariable, NumericKind,
    PushConstantBlock, StageReflection,
};

/// SPIR-V magic number.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Reflection errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReflectError {
    /// The blob is not a SPIR-V module.
    #[error("invalid SPIR-V binary: {0}")]
    InvalidBinary(String),

    /// An instruction ran past the end of the word stream.
    #[error("truncated SPIR-V instruction at word {0}")]
    Truncated(usize),

    /// A construct the reflector does not handle.
    #[error("unsupported SPIR-V construct: {0}")]
    Unsupported(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, ReflectError>;
