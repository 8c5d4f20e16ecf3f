//! The MIPS register model and the ABI partitions the translator relies on.

use std::fmt::Display;
use std::str::FromStr;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde_repr::Serialize_repr;

/// Every register the translator can observe. Besides the 32 general-purpose
/// and 32 floating-point registers this includes `hi`/`lo` (written by the
/// multiply/divide unit) and two synthetic registers: `condition_bit` (the
/// FPU condition flag set by `c.*.s`/`c.*.d`) and `return_reg` (a shadow of
/// whichever of `v0`/`f0` was written last, read at `jr $ra`).
///
/// The general-purpose registers are laid out in their hardware numbering,
/// so `Reg::from_u8(n)` resolves the numeric alias `$n`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, Serialize_repr,
)]
#[repr(u8)]
pub enum Reg {
    Zero,
    At,
    V0,
    V1,
    A0,
    A1,
    A2,
    A3,
    T0,
    T1,
    T2,
    T3,
    T4,
    T5,
    T6,
    T7,
    S0,
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    T8,
    T9,
    K0,
    K1,
    Gp,
    Sp,
    Fp,
    Ra,
    Hi,
    Lo,
    ConditionBit,
    ReturnReg,
    F0,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    F13,
    F14,
    F15,
    F16,
    F17,
    F18,
    F19,
    F20,
    F21,
    F22,
    F23,
    F24,
    F25,
    F26,
    F27,
    F28,
    F29,
    F30,
    F31,
}

/// Registers that may carry incoming arguments.
pub const ARGUMENT_REGS: [Reg; 6] = [Reg::A0, Reg::A1, Reg::A2, Reg::A3, Reg::F12, Reg::F14];

/// The order in which argument registers are inspected when collecting the
/// arguments of a `jal`.
pub const CALL_ARGUMENT_ORDER: [Reg; 6] = [Reg::F12, Reg::F14, Reg::A0, Reg::A1, Reg::A2, Reg::A3];

/// Registers a called function is free to overwrite.
pub const CALLER_SAVE_REGS: [Reg; 21] = [
    Reg::A0,
    Reg::A1,
    Reg::A2,
    Reg::A3,
    Reg::F12,
    Reg::F14,
    Reg::At,
    Reg::T0,
    Reg::T1,
    Reg::T2,
    Reg::T3,
    Reg::T4,
    Reg::T5,
    Reg::T6,
    Reg::T7,
    Reg::T8,
    Reg::T9,
    Reg::Hi,
    Reg::Lo,
    Reg::ConditionBit,
    Reg::ReturnReg,
];

/// Registers a called function must preserve.
pub const CALLEE_SAVE_REGS: [Reg; 8] = [
    Reg::S0,
    Reg::S1,
    Reg::S2,
    Reg::S3,
    Reg::S4,
    Reg::S5,
    Reg::S6,
    Reg::S7,
];

/// Registers with a fixed role that stores into the frame may preserve.
pub const SPECIAL_REGS: [Reg; 2] = [Reg::Ra, Reg::Fp];

impl Reg {
    pub fn is_float(self) -> bool {
        (Reg::F0 as u8..=Reg::F31 as u8).contains(&(self as u8))
    }

    /// The `N` in `fN`. Only meaningful for float registers.
    pub fn float_number(self) -> u8 {
        debug_assert!(self.is_float());
        self as u8 - Reg::F0 as u8
    }

    /// The odd float register paired with this even one in a double access.
    pub fn float_partner(self) -> Option<Reg> {
        if self.is_float() && self.float_number() % 2 == 0 {
            Reg::from_u8(self as u8 + 1)
        } else {
            None
        }
    }

    pub fn is_argument(self) -> bool {
        ARGUMENT_REGS.contains(&self)
    }

    pub fn is_caller_save(self) -> bool {
        CALLER_SAVE_REGS.contains(&self)
    }

    pub fn is_callee_save(self) -> bool {
        CALLEE_SAVE_REGS.contains(&self)
    }

    pub fn is_special(self) -> bool {
        SPECIAL_REGS.contains(&self)
    }

    fn name(self) -> &'static str {
        match self {
            Reg::Zero => "zero",
            Reg::At => "at",
            Reg::V0 => "v0",
            Reg::V1 => "v1",
            Reg::A0 => "a0",
            Reg::A1 => "a1",
            Reg::A2 => "a2",
            Reg::A3 => "a3",
            Reg::T0 => "t0",
            Reg::T1 => "t1",
            Reg::T2 => "t2",
            Reg::T3 => "t3",
            Reg::T4 => "t4",
            Reg::T5 => "t5",
            Reg::T6 => "t6",
            Reg::T7 => "t7",
            Reg::S0 => "s0",
            Reg::S1 => "s1",
            Reg::S2 => "s2",
            Reg::S3 => "s3",
            Reg::S4 => "s4",
            Reg::S5 => "s5",
            Reg::S6 => "s6",
            Reg::S7 => "s7",
            Reg::T8 => "t8",
            Reg::T9 => "t9",
            Reg::K0 => "k0",
            Reg::K1 => "k1",
            Reg::Gp => "gp",
            Reg::Sp => "sp",
            Reg::Fp => "fp",
            Reg::Ra => "ra",
            Reg::Hi => "hi",
            Reg::Lo => "lo",
            Reg::ConditionBit => "condition_bit",
            Reg::ReturnReg => "return_reg",
            _ => "f",
        }
    }
}

impl Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_float() {
            write!(f, "f{}", self.float_number())
        } else {
            f.write_str(self.name())
        }
    }
}

impl FromStr for Reg {
    type Err = ();

    /// Parses a register name without its `$` sigil. Accepts the symbolic
    /// names, `fN`, and the numeric aliases `0`..`31` (so `$31` maps to `ra`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let named = match s {
            "zero" => Some(Reg::Zero),
            "at" => Some(Reg::At),
            "v0" => Some(Reg::V0),
            "v1" => Some(Reg::V1),
            "gp" => Some(Reg::Gp),
            "sp" => Some(Reg::Sp),
            "fp" | "s8" => Some(Reg::Fp),
            "ra" => Some(Reg::Ra),
            "hi" => Some(Reg::Hi),
            "lo" => Some(Reg::Lo),
            "k0" => Some(Reg::K0),
            "k1" => Some(Reg::K1),
            "condition_bit" => Some(Reg::ConditionBit),
            "return_reg" => Some(Reg::ReturnReg),
            _ => None,
        };
        if let Some(reg) = named {
            return Ok(reg);
        }
        if let Some(rest) = s.strip_prefix('a')
            && let Ok(n) = rest.parse::<u8>()
            && n < 4
        {
            return Reg::from_u8(Reg::A0 as u8 + n).ok_or(());
        }
        if let Some(rest) = s.strip_prefix('s')
            && let Ok(n) = rest.parse::<u8>()
            && n < 8
        {
            return Reg::from_u8(Reg::S0 as u8 + n).ok_or(());
        }
        if let Some(rest) = s.strip_prefix('t')
            && let Ok(n) = rest.parse::<u8>()
        {
            return match n {
                0..=7 => Reg::from_u8(Reg::T0 as u8 + n).ok_or(()),
                8..=9 => Reg::from_u8(Reg::T8 as u8 + n - 8).ok_or(()),
                _ => Err(()),
            };
        }
        if let Some(rest) = s.strip_prefix('f')
            && let Ok(n) = rest.parse::<u8>()
            && n < 32
        {
            return Reg::from_u8(Reg::F0 as u8 + n).ok_or(());
        }
        // Numeric alias, e.g. `$31`.
        if let Ok(n) = s.parse::<u8>()
            && n < 32
        {
            return Reg::from_u8(n).ok_or(());
        }
        Err(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_aliases_follow_hardware_numbering() {
        assert_eq!("31".parse(), Ok(Reg::Ra));
        assert_eq!("29".parse(), Ok(Reg::Sp));
        assert_eq!("4".parse(), Ok(Reg::A0));
        assert_eq!("0".parse(), Ok(Reg::Zero));
    }

    #[test]
    fn float_pairing() {
        assert_eq!(Reg::F12.float_partner(), Some(Reg::F13));
        assert_eq!(Reg::F13.float_partner(), None);
        assert_eq!(Reg::A0.float_partner(), None);
        assert_eq!(Reg::F31.float_number(), 31);
    }

    #[test]
    fn names_round_trip() {
        for reg in [Reg::Zero, Reg::A3, Reg::T8, Reg::Fp, Reg::F14, Reg::ReturnReg] {
            assert_eq!(reg.to_string().parse(), Ok(reg));
        }
    }

    #[test]
    fn partitions_are_disjoint() {
        for reg in CALLEE_SAVE_REGS {
            assert!(!reg.is_caller_save());
        }
        for reg in SPECIAL_REGS {
            assert!(!reg.is_caller_save() && !reg.is_callee_save());
        }
    }
}
