use crate::types::encoding::DecodeError;
use basm_derive::Error;

/// Errors that can occur while loading or executing a BASM module.
#[derive(Debug, Error)]
pub enum VmError {
    /// Malformed construct in assembly text, with 1-based line number.
    #[error("line {line}: {reason}")]
    ModuleLoad { line: usize, reason: String },
    /// Binary input does not start with the `BASM` magic bytes.
    #[error("bad magic: not a BASMB module")]
    BadMagic,
    /// Binary module was produced for an incompatible format revision.
    #[error("unsupported format version {version} (major {major}, expected 1)")]
    UnsupportedVersion { version: u32, major: u8 },
    /// Binary data ended early or held an invalid field.
    #[error("malformed binary module: {reason}")]
    Decode { reason: &'static str },
    /// The binary writer cannot represent this construct in BASMB.
    #[error("`{mnemonic}` has no binary encoding")]
    Unencodable { mnemonic: String },
    /// Export alias or internal function name does not resolve.
    #[error("unknown function: {name}")]
    FunctionNotFound { name: String },
    /// `data.load` of a data builder that was never declared.
    #[error("unknown data builder: {name}")]
    UnknownData { name: String },
    /// Frame count would exceed the depth cap.
    #[error("call stack overflow: depth {depth} exceeds {max}")]
    CallStackOverflow { depth: usize, max: usize },
    /// Division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// `call.indirect` on an ID not present in the function-pointer table.
    #[error("invalid function pointer {id}")]
    InvalidFunctionPointer { id: i64 },
    /// Expected a register operand (e.g. `r0`) but got something else.
    #[error("expected register, got {0}")]
    ExpectedRegister(String),
    /// Register index out of range or malformed.
    #[error("invalid register {token}")]
    InvalidRegister { token: String },
    /// Operand token matches no recognized form.
    #[error("invalid operand {token}")]
    InvalidOperand { token: String },
    /// An instruction reached the engine with too few operands.
    #[error("{opcode} expects {expected} operands, got {actual}")]
    OperandCount {
        opcode: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Name bytes in a binary module are not valid UTF-8.
    #[error("invalid utf8 in name")]
    InvalidUtf8,
}

impl From<DecodeError> for VmError {
    fn from(err: DecodeError) -> Self {
        VmError::Decode {
            reason: match err {
                DecodeError::UnexpectedEof => "unexpected end of data",
                DecodeError::InvalidValue => "invalid field value",
            },
        }
    }
}
