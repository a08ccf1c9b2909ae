//! Instruction Set Architecture (ISA) definitions.
//!
//! Defines the VM's opcode set. The [`for_each_opcode!`](crate::for_each_opcode)
//! macro holds the canonical opcode table (variant, mnemonic, optional wire
//! byte) and invokes a callback macro for code generation, so the loader,
//! the binary codec and the engine all share one definition.
//!
//! This module generates:
//! - The [`Opcode`] enum
//! - `mnemonic()` / `from_mnemonic()` for the textual format
//! - `wire_byte()` / `from_wire_byte()` for the BASMB format
//!
//! Opcodes without a wire byte exist only in the textual format; the BASMB
//! writer rejects them. Unknown wire bytes decode to `nop`, mirroring the
//! engine rule that undefined instructions execute as no-ops. `je`/`jne`
//! are textual aliases of `jz`/`jnz` and share their wire bytes; decoding
//! always yields the canonical `jz`/`jnz` form.

/// Invokes a callback macro with the complete opcode definition list.
///
/// This macro enables code generation for opcodes in multiple modules
/// without duplicating the definitions.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Data movement
            // =========================
            /// mov dst, src ; dst = src
            Mov, "mov", Some(0x01),
            /// data.load dst, $name ; build the named data segment, dst = base pointer
            DataLoad, "data.load", Some(0x02),
            // =========================
            // Memory
            // =========================
            /// ld.i8 dst, [addr] ; dst = one byte, zero-extended
            LdI8, "ld.i8", None,
            /// ld.i32 dst, [addr] ; dst = four bytes LE, sign-extended
            LdI32, "ld.i32", Some(0x11),
            /// ld.i64 dst, [addr] ; dst = eight bytes LE
            LdI64, "ld.i64", Some(0x10),
            /// st.i8 [addr], src ; store the low byte of src
            StI8, "st.i8", None,
            /// st.i32 [addr], src ; store the low four bytes of src, LE
            StI32, "st.i32", Some(0x21),
            /// st.i64 [addr], src ; store all eight bytes of src, LE
            StI64, "st.i64", Some(0x20),
            /// heap.alloc dst, size ; dst = pointer to a fresh 8-byte-aligned block
            HeapAlloc, "heap.alloc", Some(0x28),
            /// heap.realloc dst, old, size ; dst = fresh block holding size bytes copied from old
            HeapRealloc, "heap.realloc", Some(0x29),
            // =========================
            // Integer arithmetic
            // =========================
            /// add dst, a, b ; dst = a + b
            Add, "add", Some(0x30),
            /// sub dst, a, b ; dst = a - b
            Sub, "sub", Some(0x31),
            /// mul dst, a, b ; dst = a * b
            Mul, "mul", Some(0x32),
            /// div dst, a, b ; dst = floor(a / b), traps on b == 0
            Div, "div", Some(0x33),
            /// rem dst, a, b ; dst = a mod b (floor remainder), traps on b == 0
            Rem, "rem", Some(0x34),
            /// neg dst [, src] ; dst = -src (in place when src is omitted)
            Neg, "neg", Some(0x35),
            /// inc dst ; dst += 1
            Inc, "inc", Some(0x36),
            /// dec dst ; dst -= 1
            Dec, "dec", Some(0x37),
            // =========================
            // Float arithmetic (register slots reinterpreted as f64 bits)
            // =========================
            /// fmov dst, src ; dst = src (float literal or register bits)
            FMov, "fmov", None,
            /// fadd dst, a, b ; dst = a + b
            FAdd, "fadd", None,
            /// fsub dst, a, b ; dst = a - b
            FSub, "fsub", None,
            /// fmul dst, a, b ; dst = a * b
            FMul, "fmul", None,
            /// fdiv dst, a, b ; dst = a / b (no flooring), traps on b == 0
            FDiv, "fdiv", None,
            /// frem dst, a, b ; dst = fmod(a, b), traps on b == 0
            FRem, "frem", None,
            /// ffloor dst [, src] ; dst = floor(src)
            FFloor, "ffloor", None,
            /// fceil dst [, src] ; dst = ceil(src)
            FCeil, "fceil", None,
            /// fsqrt dst [, src] ; dst = sqrt(src)
            FSqrt, "fsqrt", None,
            /// fabs dst [, src] ; dst = |src|
            FAbs, "fabs", None,
            /// fneg dst [, src] ; dst = -src
            FNeg, "fneg", None,
            /// i2f dst, src ; dst = src as f64 bits
            I2F, "i2f", None,
            /// f2i dst, src ; dst = floor(src) as integer
            F2I, "f2i", None,
            // =========================
            // Comparison / predicates
            // =========================
            /// cmp a, b ; Z = (a - b == 0), N = (a - b < 0)
            Cmp, "cmp", Some(0x50),
            /// setz dst ; dst = Z
            SetZ, "setz", Some(0x51),
            /// setnz dst ; dst = !Z
            SetNz, "setnz", Some(0x52),
            /// setl dst ; dst = N
            SetL, "setl", Some(0x53),
            /// setle dst ; dst = N || Z
            SetLe, "setle", Some(0x54),
            /// setg dst ; dst = !N && !Z
            SetG, "setg", Some(0x55),
            /// setge dst ; dst = !N
            SetGe, "setge", Some(0x56),
            // =========================
            // Bitwise (64-bit two's complement)
            // =========================
            /// and dst, a, b ; dst = a & b
            And, "and", Some(0x40),
            /// or dst, a, b ; dst = a | b
            Or, "or", Some(0x41),
            /// xor dst, a, b ; dst = a ^ b
            Xor, "xor", Some(0x42),
            /// not dst [, src] ; dst = !src
            Not, "not", Some(0x43),
            /// shl dst, a, b ; dst = a << (b & 63)
            Shl, "shl", Some(0x44),
            /// shr dst, a, b ; dst = a >> (b & 63), arithmetic
            Shr, "shr", Some(0x45),
            // =========================
            // Branches (targets are function-local labels)
            // =========================
            /// jmp label ; unconditional jump
            Jmp, "jmp", Some(0x60),
            /// jz label ; jump when Z
            Jz, "jz", Some(0x61),
            /// je label ; alias of jz
            Je, "je", Some(0x61),
            /// jnz label ; jump when !Z
            Jnz, "jnz", Some(0x62),
            /// jne label ; alias of jnz
            Jne, "jne", Some(0x62),
            /// jl label ; jump when N
            Jl, "jl", Some(0x63),
            /// jle label ; jump when N || Z
            Jle, "jle", Some(0x64),
            /// jg label ; jump when !N && !Z
            Jg, "jg", Some(0x65),
            /// jge label ; jump when !N
            Jge, "jge", Some(0x66),
            // =========================
            // Calls
            // =========================
            /// call $fn ; invoke fn with r0-r7 as arguments, result in r0
            Call, "call", Some(0x70),
            /// tailcall $fn ; invoke fn and return its result immediately
            TailCall, "tailcall", None,
            /// ret [val] ; return the evaluated operand (0 when omitted)
            Ret, "ret", Some(0x71),
            /// func.addr dst, $fn ; dst = fresh opaque function-pointer ID
            FuncAddr, "func.addr", Some(0x72),
            /// call.indirect src ; invoke the function behind the ID in src
            CallIndirect, "call.indirect", Some(0x73),
            // =========================
            // Console
            // =========================
            /// console.log.str ptr ; append the string at ptr to the output buffer
            ConsoleLogStr, "console.log.str", Some(0x80),
            /// console.log.val v ; append the decimal rendering of v
            ConsoleLogVal, "console.log.val", Some(0x81),
            /// console.log.space ; append one space
            ConsoleLogSpace, "console.log.space", Some(0x82),
            /// console.log.newline ; flush the buffer to the host output sink
            ConsoleLogNewline, "console.log.newline", Some(0x83),
            // =========================
            // String builtins (all allocate fresh heap strings)
            // =========================
            /// str.concat dst, a, b ; dst = a .. b
            StrConcat, "str.concat", Some(0x90),
            /// char.from dst, code ; dst = one-character string
            CharFrom, "char.from", None,
            /// str.sub dst, s, i, j ; 1-based inclusive substring, negatives count from the end
            StrSub, "str.sub", None,
            /// str.rep dst, s, n ; dst = s repeated n times
            StrRep, "str.rep", None,
            /// str.reverse dst, s
            StrReverse, "str.reverse", None,
            /// str.upper dst, s
            StrUpper, "str.upper", None,
            /// str.lower dst, s
            StrLower, "str.lower", None,
            /// int.tostring dst, v
            IntToString, "int.tostring", None,
            /// str.tonumber dst, s ; 0 when s does not parse
            StrToNumber, "str.tonumber", None,
            /// table.concat dst, t ; concatenate the elements of a table value
            TableConcat, "table.concat", None,
            // =========================
            // Misc
            // =========================
            /// type.of dst, v ; placeholder: 1 for nonzero, 0 for zero
            TypeOf, "type.of", None,
            /// nop
            Nop, "nop", Some(0xFF),
        }
    };
}

#[macro_export]
macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident, $mnemonic:literal, $byte:expr,
        )*
    ) => {
        // =========================
        // VM opcode enum
        // =========================
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name,
            )*
        }

        impl Opcode {
            /// All opcodes in table order.
            pub const ALL: &'static [Opcode] = &[
                $( Opcode::$name, )*
            ];

            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Returns the BASMB wire byte, or `None` for text-only opcodes.
            pub const fn wire_byte(&self) -> Option<u8> {
                match self {
                    $( Opcode::$name => $byte, )*
                }
            }

            /// Looks up an opcode by its assembly mnemonic.
            pub fn from_mnemonic(name: &str) -> Option<Opcode> {
                match name {
                    $( $mnemonic => Some(Opcode::$name), )*
                    _ => None,
                }
            }
        }
    };
}

for_each_opcode!(define_opcodes);

impl Opcode {
    /// Decodes a BASMB wire byte.
    ///
    /// Unknown bytes decode to [`Opcode::Nop`]. Shared alias bytes resolve
    /// to the first entry in table order (the canonical form).
    pub fn from_wire_byte(byte: u8) -> Opcode {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.wire_byte() == Some(byte))
            .unwrap_or(Opcode::Nop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn mnemonic_roundtrip() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(op));
        }
    }

    #[test]
    fn mnemonics_are_unique() {
        let mut seen = HashMap::new();
        for &op in Opcode::ALL {
            assert!(
                seen.insert(op.mnemonic(), op).is_none(),
                "duplicate mnemonic {}",
                op.mnemonic()
            );
        }
    }

    #[test]
    fn wire_bytes_unique_except_aliases() {
        let mut seen: HashMap<u8, Opcode> = HashMap::new();
        for &op in Opcode::ALL {
            let Some(byte) = op.wire_byte() else { continue };
            if let Some(&prior) = seen.get(&byte) {
                // je/jz and jne/jnz are the only sanctioned collisions.
                let pair = (prior, op);
                assert!(
                    pair == (Opcode::Jz, Opcode::Je) || pair == (Opcode::Jnz, Opcode::Jne),
                    "wire byte {byte:#04x} shared by {prior:?} and {op:?}"
                );
            } else {
                seen.insert(byte, op);
            }
        }
    }

    #[test]
    fn wire_byte_table_spot_checks() {
        assert_eq!(Opcode::Mov.wire_byte(), Some(0x01));
        assert_eq!(Opcode::LdI64.wire_byte(), Some(0x10));
        assert_eq!(Opcode::StI32.wire_byte(), Some(0x21));
        assert_eq!(Opcode::Cmp.wire_byte(), Some(0x50));
        assert_eq!(Opcode::Jge.wire_byte(), Some(0x66));
        assert_eq!(Opcode::CallIndirect.wire_byte(), Some(0x73));
        assert_eq!(Opcode::StrConcat.wire_byte(), Some(0x90));
        assert_eq!(Opcode::Nop.wire_byte(), Some(0xFF));
    }

    #[test]
    fn text_only_opcodes_have_no_wire_byte() {
        for op in [
            Opcode::LdI8,
            Opcode::StI8,
            Opcode::FAdd,
            Opcode::I2F,
            Opcode::TailCall,
            Opcode::StrSub,
            Opcode::TypeOf,
        ] {
            assert_eq!(op.wire_byte(), None);
        }
    }

    #[test]
    fn alias_bytes_decode_to_canonical_form() {
        assert_eq!(Opcode::from_wire_byte(0x61), Opcode::Jz);
        assert_eq!(Opcode::from_wire_byte(0x62), Opcode::Jnz);
    }

    #[test]
    fn unknown_wire_byte_decodes_to_nop() {
        assert_eq!(Opcode::from_wire_byte(0x0F), Opcode::Nop);
        assert_eq!(Opcode::from_wire_byte(0xE0), Opcode::Nop);
    }
}
