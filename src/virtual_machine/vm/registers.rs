/// Number of registers in the file.
pub(super) const REGISTER_COUNT: usize = 256;

/// Register file holding VM storage.
///
/// Provides 256 untyped 64-bit slots (`r0`-`r255`). Interpretation is per
/// opcode: integer opcodes read the slot as a signed integer, float
/// opcodes reinterpret the same bits as an `f64`. Call preservation works
/// by snapshotting the whole file before a callee runs and restoring it
/// afterwards.
pub(super) struct Registers {
    regs: [i64; REGISTER_COUNT],
}

impl Registers {
    /// Creates a zeroed register file.
    pub(super) fn new() -> Self {
        Self {
            regs: [0; REGISTER_COUNT],
        }
    }

    /// Returns the value in register `idx`.
    ///
    /// Indexing with a `u8` cannot go out of bounds.
    #[inline]
    pub(super) fn get(&self, idx: u8) -> i64 {
        self.regs[idx as usize]
    }

    /// Returns the register bits reinterpreted as an `f64`.
    #[inline]
    pub(super) fn get_float(&self, idx: u8) -> f64 {
        f64::from_bits(self.regs[idx as usize] as u64)
    }

    /// Stores a value into register `idx`.
    #[inline]
    pub(super) fn set(&mut self, idx: u8, value: i64) {
        self.regs[idx as usize] = value;
    }

    /// Stores an `f64` into register `idx` as raw bits.
    #[inline]
    pub(super) fn set_float(&mut self, idx: u8, value: f64) {
        self.regs[idx as usize] = value.to_bits() as i64;
    }

    /// Captures the full register file for call preservation.
    pub(super) fn snapshot(&self) -> [i64; REGISTER_COUNT] {
        self.regs
    }

    /// Restores a previously captured snapshot.
    pub(super) fn restore(&mut self, snapshot: &[i64; REGISTER_COUNT]) {
        self.regs = *snapshot;
    }

    /// Zeroes every register.
    pub(super) fn clear(&mut self) {
        self.regs = [0; REGISTER_COUNT];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_start_at_zero() {
        let regs = Registers::new();
        assert_eq!(regs.get(0), 0);
        assert_eq!(regs.get(255), 0);
    }

    #[test]
    fn set_and_get() {
        let mut regs = Registers::new();
        regs.set(42, -7);
        assert_eq!(regs.get(42), -7);
        regs.set(255, i64::MAX);
        assert_eq!(regs.get(255), i64::MAX);
    }

    #[test]
    fn float_slots_alias_integer_bits() {
        let mut regs = Registers::new();
        regs.set_float(3, 1.5);
        assert_eq!(regs.get(3), 1.5f64.to_bits() as i64);
        assert_eq!(regs.get_float(3), 1.5);
    }

    #[test]
    fn snapshot_and_restore() {
        let mut regs = Registers::new();
        regs.set(7, 100);
        let snapshot = regs.snapshot();

        regs.set(7, 200);
        regs.set(8, 300);
        regs.restore(&snapshot);

        assert_eq!(regs.get(7), 100);
        assert_eq!(regs.get(8), 0);
    }

    #[test]
    fn clear_zeroes_everything() {
        let mut regs = Registers::new();
        regs.set(0, 1);
        regs.set(200, 2);
        regs.clear();
        assert_eq!(regs.get(0), 0);
        assert_eq!(regs.get(200), 0);
    }
}
