//! Module representation and the host embedding API.
//!
//! A [`Module`] is the unit the host works with: the immutable
//! [`Program`] produced by the loader or decoder, plus one [`Vm`]
//! instance holding all mutable state. Host values cross the boundary as
//! [`Value`] with explicit coercion; strings are marshalled into VM
//! memory and passed by pointer.

use crate::virtual_machine::binary;
use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::isa::Opcode;
use crate::virtual_machine::loader;
use crate::virtual_machine::operand::Operand;
use crate::virtual_machine::output::OutputSink;
use crate::virtual_machine::vm::Vm;
use std::collections::HashMap;

/// One decoded instruction: an opcode and its pre-parsed operands.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
}

/// One directive of a data builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataDirective {
    /// Writes the value as an i64 length word (8 bytes, little-endian).
    WriteLen(i64),
    /// Writes the value as an i64 (8 bytes, little-endian).
    WriteI64(i64),
    /// Writes the raw payload bytes.
    WriteBytes(Vec<u8>),
}

/// A loaded function. Immutable after loading.
///
/// Instruction indices are 1-based; `labels` maps label names (including
/// the leading `.`) to the index of the instruction following the label
/// line.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// Parameter names, informational only; arguments arrive via r0-r7.
    pub params: Vec<String>,
    pub instructions: Vec<Instruction>,
    pub labels: HashMap<String, usize>,
}

impl Function {
    /// Creates an empty function shell for the loader to fill.
    pub(crate) fn new(name: String, params: Vec<String>) -> Self {
        Self {
            name,
            params,
            instructions: Vec::new(),
            labels: HashMap::new(),
        }
    }
}

/// The immutable half of a module: everything the loader produces.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Functions by name (keys unique).
    pub functions: HashMap<String, Function>,
    /// Data builders by name.
    pub data_builders: HashMap<String, Vec<DataDirective>>,
    /// External alias to internal function name.
    pub exports: HashMap<String, String>,
}

/// A host-side argument value.
///
/// Coercions at the call boundary: integers pass through, floats truncate,
/// booleans become 0/1, strings are allocated into VM memory with the
/// `[i32 length][bytes]` layout and passed as a pointer.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

/// Loads a module from text or binary input.
///
/// Binary modules are detected by the 4-byte `BASM` magic; anything else
/// is parsed as assembly text.
pub fn load(input: impl AsRef<[u8]>) -> Result<Module, VmError> {
    let bytes = input.as_ref();
    if bytes.starts_with(binary::MAGIC) {
        return Module::from_binary(bytes);
    }
    let source = std::str::from_utf8(bytes).map_err(|_| VmError::InvalidUtf8)?;
    Module::from_source(source)
}

/// A loaded module and its VM instance.
///
/// Not thread-safe: a host invoking the same module from multiple threads
/// must create multiple modules or serialize calls externally.
pub struct Module {
    program: Program,
    vm: Vm,
}

impl Module {
    /// Loads a module from assembly text.
    pub fn from_source(source: &str) -> Result<Self, VmError> {
        Ok(Self {
            program: loader::parse(source)?,
            vm: Vm::new(),
        })
    }

    /// Loads a module from its BASMB encoding.
    ///
    /// The decoder reconstructs equivalent assembly text and feeds it to
    /// the text loader, so both formats produce identical programs.
    pub fn from_binary(bytes: &[u8]) -> Result<Self, VmError> {
        let text = binary::decode_to_text(bytes)?;
        Self::from_source(&text)
    }

    /// Encodes the loaded program as a BASMB module.
    pub fn to_binary(&self) -> Result<Vec<u8>, VmError> {
        binary::encode(&self.program)
    }

    /// The loaded program.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Invokes an exported (or internal) function.
    ///
    /// `name` is resolved through the export table first and falls back to
    /// the internal function name. Up to 8 positional arguments are
    /// coerced and seeded into r0-r7; missing slots are 0.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<i64, VmError> {
        let internal = self
            .program
            .exports
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string());

        let mut seeded = [0i64; 8];
        for (slot, value) in seeded.iter_mut().zip(args.iter()) {
            *slot = match value {
                Value::Int(v) => *v,
                Value::Float(v) => *v as i64,
                Value::Bool(v) => *v as i64,
                Value::Str(v) => self.vm.memory_mut().alloc_host_string(v),
            };
        }

        self.vm.execute_function(&self.program, &internal, &seeded)
    }

    /// Allocates a host string (`[i32 length][bytes]`) and returns its pointer.
    pub fn alloc_string(&mut self, text: &str) -> i64 {
        self.vm.memory_mut().alloc_host_string(text)
    }

    /// Reads one byte of VM memory; uninitialized cells read as 0.
    pub fn read(&self, addr: i64) -> u8 {
        self.vm.memory().read_u8(addr)
    }

    /// Reads a little-endian i32, sign-extended.
    pub fn read_i32(&self, addr: i64) -> i64 {
        self.vm.memory().read_i32(addr)
    }

    /// Reads a little-endian i64.
    pub fn read_i64(&self, addr: i64) -> i64 {
        self.vm.memory().read_i64(addr)
    }

    /// Reads `len` bytes, zero-filled past the initialized extent.
    pub fn read_bytes(&self, addr: i64, len: usize) -> Vec<u8> {
        self.vm.memory().read_slice(addr, len)
    }

    /// Reads a host string (`[i32 length][bytes]`).
    pub fn read_string(&self, addr: i64) -> String {
        self.vm.memory().read_host_string(addr)
    }

    /// Writes one byte of VM memory.
    pub fn write(&mut self, addr: i64, value: u8) {
        self.vm.memory_mut().write_u8(addr, value);
    }

    /// Writes a little-endian i32.
    pub fn write_i32(&mut self, addr: i64, value: i64) {
        self.vm.memory_mut().write_i32(addr, value);
    }

    /// Writes a little-endian i64.
    pub fn write_i64(&mut self, addr: i64, value: i64) {
        self.vm.memory_mut().write_i64(addr, value);
    }

    /// Clears all mutable VM state: registers, flags, memory, data cache,
    /// call stack, output buffer and the function-pointer table.
    pub fn reset(&mut self) {
        self.vm.reset();
    }

    /// Replaces the console output sink.
    pub fn set_output(&mut self, sink: Box<dyn OutputSink>) {
        self.vm.set_output(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::output::CaptureSink;

    #[test]
    fn call_returns_constant() {
        let mut module = Module::from_source(
            "func $main() {\n    mov r0, 42\n    ret r0\n}\nexport $main as \"main\"\n",
        )
        .unwrap();
        assert_eq!(module.call("main", &[]).unwrap(), 42);
    }

    #[test]
    fn call_with_arguments() {
        let mut module = Module::from_source(
            "func $add(a, b) {\n    add r0, r0, r1\n    ret r0\n}\nexport $add as \"add\"\n",
        )
        .unwrap();
        assert_eq!(
            module
                .call("add", &[Value::Int(10), Value::Int(20)])
                .unwrap(),
            30
        );
    }

    #[test]
    fn call_falls_back_to_internal_name() {
        let mut module =
            Module::from_source("func $inner() {\n    mov r0, 7\n    ret r0\n}\n").unwrap();
        assert_eq!(module.call("inner", &[]).unwrap(), 7);
    }

    #[test]
    fn call_unknown_function() {
        let mut module = Module::from_source("").unwrap();
        assert!(matches!(
            module.call("missing", &[]),
            Err(VmError::FunctionNotFound { name }) if name == "missing"
        ));
    }

    #[test]
    fn data_builder_pointer_is_readable_from_the_host() {
        let source = r#"
data $s {
    write.len 5
    write.bytes "hello"
}
func $get() {
    data.load r0, $s
    ret r0
}
export $get as "get"
"#;
        let mut module = Module::from_source(source).unwrap();
        let ptr = module.call("get", &[]).unwrap();
        assert_eq!(module.read_i64(ptr), 5);
        assert_eq!(module.read_bytes(ptr + 8, 5), b"hello".to_vec());
    }

    #[test]
    fn value_coercions() {
        let mut module = Module::from_source(
            "func $id(x) {\n    ret r0\n}\nexport $id as \"id\"\n",
        )
        .unwrap();
        assert_eq!(module.call("id", &[Value::Bool(true)]).unwrap(), 1);
        assert_eq!(module.call("id", &[Value::Bool(false)]).unwrap(), 0);
        assert_eq!(module.call("id", &[Value::Float(3.9)]).unwrap(), 3);
        assert_eq!(module.call("id", &[Value::Float(-3.9)]).unwrap(), -3);
    }

    #[test]
    fn string_arguments_arrive_as_host_string_pointers() {
        let mut module = Module::from_source(
            "func $id(s) {\n    ret r0\n}\nexport $id as \"id\"\n",
        )
        .unwrap();
        let ptr = module.call("id", &[Value::from("hello")]).unwrap();
        assert_eq!(module.read_i32(ptr), 5);
        assert_eq!(module.read_string(ptr), "hello");
    }

    #[test]
    fn alloc_string_uses_i32_prefix() {
        let mut module = Module::from_source("").unwrap();
        let ptr = module.alloc_string("abc");
        assert_eq!(module.read_i32(ptr), 3);
        assert_eq!(module.read_string(ptr), "abc");
    }

    #[test]
    fn reset_rewinds_the_heap() {
        let mut module = Module::from_source("").unwrap();
        let first = module.alloc_string("abcdefgh");
        let second = module.alloc_string("x");
        assert!(second > first);

        module.reset();
        // Prior pointers now read zeros; the next allocation starts over.
        assert_eq!(module.read_i32(first), 0);
        assert_eq!(module.alloc_string("y"), 0);
    }

    #[test]
    fn load_autodetects_text_and_binary() {
        let mut text_module =
            load("func $f() {\n    mov r0, 9\n    ret r0\n}\nexport $f as \"f\"\n").unwrap();
        assert_eq!(text_module.call("f", &[]).unwrap(), 9);

        let bytes = text_module.to_binary().unwrap();
        let mut binary_module = load(&bytes).unwrap();
        assert_eq!(binary_module.call("f", &[]).unwrap(), 9);
    }

    #[test]
    fn text_and_binary_modules_agree() {
        let source = r#"
data $msg {
    write.len 3
    write.bytes "abc"
}
func $sum(a, b) {
    add r0, r0, r1
    ret r0
}
func $first_byte() {
    data.load r1, $msg
    ld.i8 r0, [r1+8]
    ret r0
}
export $sum as "sum"
export $first_byte as "first_byte"
"#;
        // ld.i8 is text-only, so route the binary side around it: encode a
        // module restricted to wire opcodes.
        let mut text_module = Module::from_source(source).unwrap();
        assert_eq!(
            text_module
                .call("sum", &[Value::Int(2), Value::Int(40)])
                .unwrap(),
            42
        );
        assert_eq!(text_module.call("first_byte", &[]).unwrap(), b'a' as i64);

        let wire_source = r#"
data $msg {
    write.len 3
    write.bytes "abc"
}
func $sum(a, b) {
    add r0, r0, r1
    ret r0
}
func $len() {
    data.load r1, $msg
    ld.i64 r0, [r1+0]
    ret r0
}
export $sum as "sum"
export $len as "len"
"#;
        let text_side = Module::from_source(wire_source).unwrap();
        let mut binary_side = Module::from_binary(&text_side.to_binary().unwrap()).unwrap();
        let mut text_side = Module::from_source(wire_source).unwrap();
        for (a, b) in [(1, 2), (-5, 5), (1000, -1)] {
            assert_eq!(
                text_side
                    .call("sum", &[Value::Int(a), Value::Int(b)])
                    .unwrap(),
                binary_side
                    .call("sum", &[Value::Int(a), Value::Int(b)])
                    .unwrap(),
            );
        }
        assert_eq!(
            text_side.call("len", &[]).unwrap(),
            binary_side.call("len", &[]).unwrap()
        );
    }

    #[test]
    fn console_output_reaches_the_sink() {
        let source = r#"
data $greeting {
    write.len 5
    write.bytes "hello"
}
func $main() {
    data.load r1, $greeting
    console.log.str r1
    console.log.space
    console.log.val r0
    console.log.newline
    ret r0
}
export $main as "main"
"#;
        let mut module = Module::from_source(source).unwrap();
        let sink = CaptureSink::new();
        module.set_output(Box::new(sink.clone()));
        module.call("main", &[Value::Int(7)]).unwrap();
        assert_eq!(sink.lines(), vec!["hello 7"]);
    }
}
