//! Operand forms and parsing.
//!
//! Operands are parsed once at load time into a tagged [`Operand`] so the
//! dispatch loop never re-tokenizes text. Accepted forms:
//!
//! - Registers: `r0`..`r255`
//! - Integers: decimal (signed), hex `0x…` and binary `0b…` with optional
//!   `_` digit separators
//! - Floats: a decimal point or an exponent (`1.5`, `2e10`, `-3.25e-2`)
//! - `null` / `nil`: both read as integer 0
//! - Symbolic references: `$name` (functions, data builders)
//! - Labels: bare identifiers, including the leading `.`
//! - Memory references: `[base]`, `[base+off]`, `[base-off]`; base and
//!   offset are themselves parsed recursively

use crate::virtual_machine::errors::VmError;
use std::fmt;

/// A single pre-parsed instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Register `rN`.
    Reg(u8),
    /// Integer immediate.
    Int(i64),
    /// Float immediate.
    Float(f64),
    /// Symbolic reference `$name`.
    Sym(String),
    /// Bare label name (including any leading `.`).
    Label(String),
    /// Memory reference `[base±offset]`.
    Mem {
        base: Box<Operand>,
        offset: Option<Box<Operand>>,
        /// True for the `[base-offset]` form.
        negate: bool,
    },
}

impl Operand {
    /// Parses one operand token.
    pub fn parse(token: &str) -> Result<Operand, VmError> {
        let tok = token.trim();
        if tok.is_empty() {
            return Err(VmError::InvalidOperand {
                token: token.to_string(),
            });
        }

        if tok == "null" || tok == "nil" {
            return Ok(Operand::Int(0));
        }

        if let Some(inner) = tok.strip_prefix('[') {
            let inner = inner.strip_suffix(']').ok_or(VmError::InvalidOperand {
                token: tok.to_string(),
            })?;
            return parse_mem(inner);
        }

        if let Some(name) = tok.strip_prefix('$') {
            if name.is_empty() {
                return Err(VmError::InvalidOperand {
                    token: tok.to_string(),
                });
            }
            return Ok(Operand::Sym(name.to_string()));
        }

        // Register form: `r` followed by decimal digits only. Anything else
        // starting with `r` falls through to the label rules.
        if let Some(digits) = tok.strip_prefix('r') {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                let idx: u32 = digits.parse().map_err(|_| VmError::InvalidRegister {
                    token: tok.to_string(),
                })?;
                if idx > u8::MAX as u32 {
                    return Err(VmError::InvalidRegister {
                        token: tok.to_string(),
                    });
                }
                return Ok(Operand::Reg(idx as u8));
            }
        }

        if let Some(v) = parse_int(tok) {
            return Ok(Operand::Int(v));
        }

        if let Some(f) = parse_float(tok) {
            return Ok(Operand::Float(f));
        }

        if is_label_name(tok) {
            return Ok(Operand::Label(tok.to_string()));
        }

        Err(VmError::InvalidOperand {
            token: tok.to_string(),
        })
    }

    /// Returns the register index, or an [`VmError::ExpectedRegister`] error.
    ///
    /// Used by handlers whose destination must be a register.
    pub fn expect_reg(&self) -> Result<u8, VmError> {
        match self {
            Operand::Reg(idx) => Ok(*idx),
            other => Err(VmError::ExpectedRegister(other.to_string())),
        }
    }

    /// Returns the symbol name for `$name` operands.
    pub fn as_sym(&self) -> Option<&str> {
        match self {
            Operand::Sym(name) => Some(name),
            _ => None,
        }
    }

    /// Returns the label name for bare-identifier operands.
    pub fn as_label(&self) -> Option<&str> {
        match self {
            Operand::Label(name) => Some(name),
            _ => None,
        }
    }
}

/// Parses the inside of a `[...]` memory reference.
///
/// Splits on the first `+` or `-` at bracket depth zero (skipping position
/// zero so a signed base still parses), then parses both sides recursively.
fn parse_mem(inner: &str) -> Result<Operand, VmError> {
    let inner = inner.trim();
    let bytes = inner.as_bytes();
    let mut depth = 0usize;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            b'+' | b'-' if depth == 0 && i > 0 => {
                let base = Operand::parse(&inner[..i])?;
                let offset = Operand::parse(&inner[i + 1..])?;
                return Ok(Operand::Mem {
                    base: Box::new(base),
                    offset: Some(Box::new(offset)),
                    negate: b == b'-',
                });
            }
            _ => {}
        }
    }

    Ok(Operand::Mem {
        base: Box::new(Operand::parse(inner)?),
        offset: None,
        negate: false,
    })
}

/// Parses decimal, hex (`0x…`) and binary (`0b…`) integer literals.
///
/// `_` digit separators are accepted in the prefixed forms. Hex and binary
/// digits fill the full 64-bit pattern, so `0xFFFF_FFFF_FFFF_FFFF` parses
/// to -1.
fn parse_int(tok: &str) -> Option<i64> {
    let (negative, body) = match tok.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, tok.strip_prefix('+').unwrap_or(tok)),
    };

    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = body.strip_prefix(prefix) {
            let digits: String = digits.chars().filter(|&c| c != '_').collect();
            if digits.is_empty() {
                return None;
            }
            let v = u64::from_str_radix(&digits, radix).ok()? as i64;
            return Some(if negative { v.wrapping_neg() } else { v });
        }
    }

    if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    tok.parse::<i64>().ok()
}

/// Parses float literals: requires a decimal point or an exponent, and a
/// leading digit or point, so identifiers like `inf` stay labels.
fn parse_float(tok: &str) -> Option<f64> {
    let body = tok.strip_prefix(['-', '+']).unwrap_or(tok);
    let first = body.bytes().next()?;
    if !first.is_ascii_digit() && first != b'.' {
        return None;
    }
    if !body.contains('.') && !body.contains(['e', 'E']) {
        return None;
    }
    tok.parse::<f64>().ok()
}

/// Checks whether a token is an acceptable label name.
fn is_label_name(tok: &str) -> bool {
    let mut bytes = tok.bytes();
    let Some(first) = bytes.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == b'.' || first == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_')
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(idx) => write!(f, "r{idx}"),
            Operand::Int(v) => write!(f, "{v}"),
            Operand::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Operand::Sym(name) => write!(f, "${name}"),
            Operand::Label(name) => write!(f, "{name}"),
            Operand::Mem {
                base,
                offset,
                negate,
            } => match offset {
                Some(off) => write!(f, "[{base}{}{off}]", if *negate { '-' } else { '+' }),
                None => write!(f, "[{base}]"),
            },
        }
    }
}
