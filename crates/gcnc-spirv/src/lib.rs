//! SPIR-V front-end for gcnc.
//!
//! Parses a SPIR-V 1.x binary with [rspirv](https://crates.io/crates/rspirv)
//! and lowers the selected entry point to a [`gcnc_ir::hir::Program`]. Only
//! the `Shader` capability and the small opcode subset the backend can
//! compile are accepted; anything else is a fatal [`LoadError`].

mod lower;

use rspirv::spirv;

/// Parses a SPIR-V module from raw 32-bit words.
pub fn parse_words(words: &[u32], entry: &str) -> Result<gcnc_ir::hir::Program, LoadError> {
    let mut loader = rspirv::dr::Loader::new();
    rspirv::binary::parse_words(words, &mut loader)
        .map_err(|state| LoadError::Malformed(format!("{state:?}")))?;
    let module = loader.module();
    lower::lower_module(&module, entry)
}

/// Parses a SPIR-V module from little-endian bytes.
pub fn parse_bytes(bytes: &[u8], entry: &str) -> Result<gcnc_ir::hir::Program, LoadError> {
    if bytes.len() % 4 != 0 {
        return Err(LoadError::Malformed(format!(
            "byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    parse_words(&words, entry)
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The binary failed word-level parsing (truncation, bad magic, bad
    /// operand counts).
    #[error("malformed SPIR-V: {0}")]
    Malformed(String),

    /// Only the `Shader` capability is supported.
    #[error("unsupported capability {0:?}")]
    UnsupportedCapability(spirv::Capability),

    /// Only the GLSL.std.450 extended set may be imported.
    #[error("unsupported extended instruction set '{0}'")]
    UnsupportedExtSet(String),

    /// No entry point with the requested name.
    #[error("entry point '{0}' not found")]
    MissingEntryPoint(String),

    #[error("unsupported execution model {0:?}")]
    UnsupportedExecutionModel(spirv::ExecutionModel),

    #[error("unsupported storage class {0:?}")]
    UnsupportedStorageClass(spirv::StorageClass),

    #[error("unsupported instruction {0:?}")]
    UnsupportedOpcode(spirv::Op),

    #[error("unsupported scalar width {0}")]
    UnsupportedWidth(u32),

    /// Entry-point interface variables must be pointers to vectors.
    #[error("shader interface variable must point to a vector")]
    NonVectorInterface,

    #[error("variable initializers are not supported")]
    UnsupportedInitializer,

    /// An id was used as something it does not name.
    #[error("id %{0} is not a {1}")]
    WrongIdKind(u32, &'static str),

    /// An instruction is missing or mistypes an operand.
    #[error("malformed operand list for {0:?}")]
    MalformedOperands(spirv::Op),
}
