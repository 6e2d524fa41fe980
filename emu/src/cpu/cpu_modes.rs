//! AArch32 processor modes.
//!
//! The mode lives in the bottom four bits of PSTATE. On a 26-bit processor
//! only the bottom two are architecturally present, which is why the four
//! classic modes occupy values 0-3. Each privileged mode selects its own
//! banked R13/R14 (FIQ additionally banks R8-R12), see
//! [`registers`](super::registers).

use serde::{Deserialize, Serialize};

/// The AArch32 operating mode, stored in PSTATE bits 3:0 (bit 4 of the CPSR
/// view is the 26/32-bit width selector, not part of the mode proper).
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum Mode {
    /// Normal program execution (unprivileged). (v1+)
    #[default]
    User = 0,

    /// Fast interrupt handling, banks R8-R14. (v1+)
    Fiq = 1,

    /// Interrupt handling. (v1+)
    Irq = 2,

    /// Supervisor, entered on reset and SWI/SVC. (v1+)
    Supervisor = 3,

    /// Secure monitor, entered on SMC. (v6Z, v7+ with Security Extensions)
    Monitor = 6,

    /// Entered on a data or prefetch abort. (v3+)
    Abort = 7,

    /// Hypervisor, entered on HVC. (v7VE+ with Virtualization Extensions)
    Hypervisor = 10,

    /// Entered on an undefined instruction. (v3+)
    Undefined = 11,

    /// Privileged mode sharing the User register view. (v4+)
    System = 15,
}

impl Mode {
    /// Everything except User may touch the privileged PSTATE fields.
    #[must_use]
    pub fn is_privileged(self) -> bool {
        self != Self::User
    }
}

impl From<Mode> for u32 {
    fn from(m: Mode) -> Self {
        m as Self
    }
}

impl TryFrom<u32> for Mode {
    type Error = u32;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        match n {
            0 => Ok(Self::User),
            1 => Ok(Self::Fiq),
            2 => Ok(Self::Irq),
            3 => Ok(Self::Supervisor),
            6 => Ok(Self::Monitor),
            7 => Ok(Self::Abort),
            10 => Ok(Self::Hypervisor),
            11 => Ok(Self::Undefined),
            15 => Ok(Self::System),
            _ => Err(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn round_trips_through_bits() {
        for mode in [
            Mode::User,
            Mode::Fiq,
            Mode::Irq,
            Mode::Supervisor,
            Mode::Monitor,
            Mode::Abort,
            Mode::Hypervisor,
            Mode::Undefined,
            Mode::System,
        ] {
            assert_eq!(Mode::try_from(mode as u32), Ok(mode));
        }
    }

    #[test]
    fn rejects_reserved_encodings() {
        for bits in [4u32, 5, 8, 9, 12, 13, 14] {
            assert_eq!(Mode::try_from(bits), Err(bits));
        }
    }
}
