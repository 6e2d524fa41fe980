//! Immutable core configuration: architecture version, optional features,
//! instruction-set availability and coprocessor capabilities.
//!
//! A configuration is fixed when the core is created. [`ArmConfig::normalize`]
//! reconciles partially specified configurations (e.g. a supported Thumb
//! instruction set forces the Thumb feature flag) the same way a real part
//! ships with a coherent feature set.

use serde::{Deserialize, Serialize};

/// Architecture version, 26-bit: v1/v2, 32-bit: v3 to v7, 64-bit: v8 and up
/// (unless only 32-bit mode is supported).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArmVersion {
    /// ARMv1 (1985)
    V1 = 1,
    /// ARMv2 (1986), product names: ARM2aS, ARM250, ARM3
    V2,
    /// ARMv3 (1993), product names: ARM6, ARM7
    V3,
    /// ARMv4 (1994), product names: ARM8, ARM7T, SecurCore
    V4,
    /// ARMv5 (1999), product names: ARM7EJ, ARM9E, ARM10E
    V5,
    /// ARMv6 (2002), product names: ARM11, SecurCore, Cortex-M
    V6,
    /// ARMv7 (2005), product names: SecurCore, Cortex-M, Cortex-R, Cortex-A
    V7,
    /// ARMv8 (2011), product names: Cortex-M, Cortex-R, Cortex-A, Cortex-X, Neoverse
    V8,
    /// ARMv8.1
    V81,
    /// ARMv8.2
    V82,
    /// ARMv8.3
    V83,
    /// ARMv9 (2021), product names: Cortex-A, Cortex-X, Neoverse
    V9,
}

/// Floating point coprocessor generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FpVersion {
    /// Vector Floating Point, for ARM10 (v5TE)
    Vfpv1 = 1,
    /// for v5TE and later
    Vfpv2,
    /// also SIMDv1, for v7 and later
    Vfpv3,
    /// also SIMDv2, for v7 and later
    Vfpv4,
    /// for v7E-M and v8-R
    Vfpv5,
    /// ARMv8 floating point
    V8Fp,
}

/// Instruction set selection.
///
/// Note that naming these after the AArch32/AArch64 execution states would be
/// a misnomer: these are instruction sets, selected by PSTATE (rw, jt).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Isa {
    /// Original 26-bit instruction set, introduced with ARMv1, removed in ARMv4.
    Arm26 = 1,
    /// 32-bit extension, identical instruction format, introduced with ARMv3.
    Arm32,
    /// Compressed Thumb and Thumb-2 instruction sets (ARMv4T and ARMv6T2).
    Thumb,
    /// Java bytecode, introduced in ARMv5TEJ.
    Jazelle,
    /// ThumbEE, variant of Thumb intended for JIT execution, ARMv7 only.
    ThumbEe,
    /// 64-bit extension, introduced with ARMv8.
    Arm64,
}

impl Isa {
    pub const ALL: [Self; 6] = [
        Self::Arm26,
        Self::Arm32,
        Self::Thumb,
        Self::Jazelle,
        Self::ThumbEe,
        Self::Arm64,
    ];
}

impl std::fmt::Display for Isa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Arm26 => f.write_str("ARM26"),
            Self::Arm32 => f.write_str("ARM"),
            Self::Thumb => f.write_str("Thumb"),
            Self::Jazelle => f.write_str("Jazelle"),
            Self::ThumbEe => f.write_str("ThumbEE"),
            Self::Arm64 => f.write_str("A64"),
        }
    }
}

/// Set of instruction sets a core is allowed to enter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsaSet(u16);

impl IsaSet {
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn of(isas: &[Isa]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < isas.len() {
            bits |= 1 << isas[i] as u16;
            i += 1;
        }
        Self(bits)
    }

    #[must_use]
    pub const fn contains(self, isa: Isa) -> bool {
        self.0 & (1 << isa as u16) != 0
    }

    pub fn insert(&mut self, isa: Isa) {
        self.0 |= 1 << isa as u16;
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Architecture profile (ARMv7 and later).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Profile {
    /// "Classic", pre-profile setting, treated the same as A-profile.
    #[default]
    Classic = 0,
    Application = 1,
    RealTime = 2,
    Microcontroller = 3,
}

/// Optional architecture features, held in a [`Features`] bitset.
///
/// Discriminants start at 2: bits 0-1 of the bitset hold the [`Profile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmFeature {
    /// SWP/SWPB, v2a, v3+
    Swp = 2,
    /// 26-bit mode: v1, v2, v3 but not v3G
    Arm26,
    /// 32-bit mode: v3+
    Arm32,
    /// Long multiplies: v3M, v4+ but not the xM variants
    Mull,
    /// Thumb: v4T+, v5T+, v6+
    Thumb,
    /// Enhanced DSP: v5TE(xP), v5TEJ, v6+
    EnhDsp,
    /// LDRD/STRD: v5TE but not v5TExP, v6+
    DspPair,
    /// Jazelle (the BXJ instruction): v5TEJ, v6+
    Jazelle,
    /// Multiprocessing extensions: v6K, v7+
    Multiproc,
    /// Thumb-2: v6T2, v7+
    Thumb2,
    /// Security extensions (Monitor mode, SMC): v6Z, v6KZ, v7+
    Security,
    /// Virtualization extensions (Hyp mode, HVC): v7VE, v8+
    Virtualization,
    /// AArch64: v8-A
    Arm64,
    /// Cryptographic extensions
    Cryptography,
    /// Floating Point Accelerator (1989), WE32206-compatible
    Fpa,
    /// VFP, 32-bit floating point support
    Vfp,
    /// VFP flag: D registers present
    Dreg,
    /// VFP flag: 32 D registers instead of 16
    Dreg32,
    /// 16-bit floating point support
    Fp16,
    /// Advanced SIMD (Neon)
    Simd,
    /// M-profile Vector Extension (Helium)
    Mve,
}

/// Feature bitset plus the architecture profile in the low two bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features(u32);

impl Features {
    pub const NONE: Self = Self(0);

    #[must_use]
    pub const fn of(features: &[ArmFeature]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < features.len() {
            bits |= 1 << features[i] as u32;
            i += 1;
        }
        Self(bits)
    }

    #[must_use]
    pub const fn has(self, feature: ArmFeature) -> bool {
        self.0 & (1 << feature as u32) != 0
    }

    pub fn insert(&mut self, feature: ArmFeature) {
        self.0 |= 1 << feature as u32;
    }

    #[must_use]
    pub const fn with(self, feature: ArmFeature) -> Self {
        Self(self.0 | (1 << feature as u32))
    }

    #[must_use]
    pub const fn profile(self) -> Profile {
        match self.0 & 0b11 {
            1 => Profile::Application,
            2 => Profile::RealTime,
            3 => Profile::Microcontroller,
            _ => Profile::Classic,
        }
    }

    #[must_use]
    pub const fn with_profile(self, profile: Profile) -> Self {
        Self((self.0 & !0b11) | profile as u32)
    }
}

/// Java bytecode support level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JavaImplementation {
    /// No bytecode is recognized.
    None = 0,
    /// All bytecodes are trapped to the software handler table.
    Trivial,
    /// The bytecodes implemented by v5TEJ hardware.
    Jazelle,
    /// All JVM bytecodes.
    Jvm,
    /// All JVM and picoJava bytecodes.
    PicoJava,
    /// JVM/picoJava bytecodes plus custom interworking extensions; this is a
    /// custom extension of Jazelle never implemented in real hardware.
    Extension,
}

/// Thumb support level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThumbImplementation {
    None = 0,
    Thumb1 = 1,
    Thumb2 = 3,
}

/// Identification constants for MIDR synthesis.
pub mod parts {
    pub const ARM1: u16 = 0x0100;
    pub const ARM2: u16 = 0x0200;
    pub const ARM250: u16 = 0x0250;
    pub const ARM3: u16 = 0x0300;
    pub const ARM610: u16 = 0x0610;
    pub const ARM710: u16 = 0x7100;
    pub const ARM810: u16 = 0x8100;
    pub const ARM926: u16 = 0x9260;
    pub const ARM1136: u16 = 0xB360;
    pub const ARM1176: u16 = 0xB760;
    pub const CORTEX_A8: u16 = 0xC080;
    pub const CORTEX_A9: u16 = 0xC090;
    pub const CORTEX_A15: u16 = 0xC0F0;
    pub const CORTEX_A53: u16 = 0xD030;

    pub const VENDOR_ARM: u8 = b'A';
    pub const VENDOR_DEC: u8 = b'D';
    pub const VENDOR_INTEL: u8 = b'i';
    /// Manufacturer byte used by pre-ARM6 parts only.
    pub const MANUFACTURER_VLSI: u8 = b'V';
}

/// Invalid host-supplied configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("instruction set {isa} is not available on {version:?}")]
    IsaUnavailable { isa: Isa, version: ArmVersion },
    #[error("no instruction set was requested")]
    NoInstructionSet,
}

/// Common set of information for emulation and disassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmConfig {
    pub version: ArmVersion,
    pub fp_version: Option<FpVersion>,
    pub features: Features,
    pub thumb_implementation: ThumbImplementation,
    /// `None` selects the default for the configured ISA set.
    pub jazelle_implementation: Option<JavaImplementation>,
    /// Part number for MIDR synthesis.
    pub part_number: u16,
    /// Implementer code for MIDR synthesis.
    pub vendor: u8,
}

impl ArmConfig {
    #[must_use]
    pub fn new(version: ArmVersion) -> Self {
        Self {
            version,
            fp_version: None,
            features: Features::NONE,
            thumb_implementation: ThumbImplementation::None,
            jazelle_implementation: None,
            part_number: parts::ARM926,
            vendor: parts::VENDOR_ARM,
        }
    }

    #[must_use]
    pub fn jazelle_level(&self) -> JavaImplementation {
        self.jazelle_implementation
            .unwrap_or(JavaImplementation::None)
    }

    #[must_use]
    pub fn supports_vfp_registers(&self) -> bool {
        self.features.has(ArmFeature::Vfp)
            || self.features.has(ArmFeature::Simd)
            || self.features.has(ArmFeature::Mve)
    }

    /// Checks that every requested instruction set exists on this version.
    pub fn validate(&self, supported_isas: IsaSet) -> Result<(), ConfigError> {
        if supported_isas.is_empty() {
            return Err(ConfigError::NoInstructionSet);
        }

        for isa in Isa::ALL {
            if !supported_isas.contains(isa) {
                continue;
            }
            let available = match isa {
                Isa::Arm26 => self.version <= ArmVersion::V3,
                Isa::Arm32 => self.version >= ArmVersion::V3,
                Isa::Thumb => self.version >= ArmVersion::V4,
                Isa::Jazelle => self.version >= ArmVersion::V5,
                Isa::ThumbEe => self.version == ArmVersion::V7,
                Isa::Arm64 => self.version >= ArmVersion::V8,
            };
            if !available {
                return Err(ConfigError::IsaUnavailable {
                    isa,
                    version: self.version,
                });
            }
        }
        Ok(())
    }

    /// Reconciles the feature set, the implementation levels and the ISA set
    /// with each other so that the rest of the core can rely on a coherent
    /// configuration.
    pub fn normalize(&mut self, supported_isas: &mut IsaSet) {
        if supported_isas.contains(Isa::Arm32)
            && !self.features.has(ArmFeature::Arm26)
            && !self.features.has(ArmFeature::Arm32)
        {
            if self.version < ArmVersion::V3 {
                self.features.insert(ArmFeature::Arm26);
            } else {
                self.features.insert(ArmFeature::Arm32);
            }
        }
        if supported_isas.contains(Isa::Arm26) {
            self.features.insert(ArmFeature::Arm26);
        }

        if supported_isas.contains(Isa::Arm64) {
            self.features.insert(ArmFeature::Arm64);
        }

        // Thumb implementation level must cover the requested feature set.
        if self.features.has(ArmFeature::Thumb2)
            && self.thumb_implementation < ThumbImplementation::Thumb2
        {
            self.thumb_implementation = ThumbImplementation::Thumb2;
        } else if (self.features.has(ArmFeature::Thumb)
            || supported_isas.contains(Isa::Thumb)
            || supported_isas.contains(Isa::ThumbEe))
            && self.thumb_implementation < ThumbImplementation::Thumb1
        {
            self.thumb_implementation = ThumbImplementation::Thumb1;
        }

        if self.thumb_implementation >= ThumbImplementation::Thumb1 {
            self.features.insert(ArmFeature::Thumb);
            supported_isas.insert(Isa::Thumb);
        }
        if self.thumb_implementation >= ThumbImplementation::Thumb2 {
            self.features.insert(ArmFeature::Thumb2);
        }

        // Pick a Java implementation level coherent with the constraints.
        self.jazelle_implementation = Some(match self.jazelle_implementation {
            None => {
                if supported_isas.contains(Isa::Jazelle) {
                    JavaImplementation::Jazelle
                } else if self.features.has(ArmFeature::Jazelle) {
                    JavaImplementation::Trivial
                } else {
                    JavaImplementation::None
                }
            }
            Some(JavaImplementation::None | JavaImplementation::Trivial)
                if supported_isas.contains(Isa::Jazelle) =>
            {
                JavaImplementation::Jazelle
            }
            // These are not real implementations, use all extensions.
            Some(JavaImplementation::Jvm | JavaImplementation::PicoJava) => {
                JavaImplementation::Extension
            }
            Some(level) => level,
        });

        if self.jazelle_level() >= JavaImplementation::Trivial {
            self.features.insert(ArmFeature::Jazelle);
        }
        if self.jazelle_level() >= JavaImplementation::Jazelle {
            supported_isas.insert(Isa::Jazelle);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn thumb_isa_forces_thumb_feature() {
        let mut config = ArmConfig::new(ArmVersion::V4);
        let mut isas = IsaSet::of(&[Isa::Arm32, Isa::Thumb]);
        config.normalize(&mut isas);

        assert!(config.features.has(ArmFeature::Thumb));
        assert_eq!(config.thumb_implementation, ThumbImplementation::Thumb1);
    }

    #[test]
    fn thumb2_feature_raises_implementation_level() {
        let mut config = ArmConfig::new(ArmVersion::V7);
        config.features.insert(ArmFeature::Thumb2);
        let mut isas = IsaSet::of(&[Isa::Arm32]);
        config.normalize(&mut isas);

        assert_eq!(config.thumb_implementation, ThumbImplementation::Thumb2);
        assert!(isas.contains(Isa::Thumb));
    }

    #[test]
    fn jazelle_isa_selects_jazelle_level() {
        let mut config = ArmConfig::new(ArmVersion::V5);
        let mut isas = IsaSet::of(&[Isa::Arm32, Isa::Jazelle]);
        config.normalize(&mut isas);

        assert_eq!(config.jazelle_level(), JavaImplementation::Jazelle);
        assert!(config.features.has(ArmFeature::Jazelle));
    }

    #[test]
    fn jvm_level_becomes_extension() {
        let mut config = ArmConfig::new(ArmVersion::V5);
        config.jazelle_implementation = Some(JavaImplementation::Jvm);
        let mut isas = IsaSet::of(&[Isa::Arm32]);
        config.normalize(&mut isas);

        assert_eq!(config.jazelle_level(), JavaImplementation::Extension);
        assert!(isas.contains(Isa::Jazelle));
    }

    #[test]
    fn old_version_picks_26_bit() {
        let mut config = ArmConfig::new(ArmVersion::V2);
        let mut isas = IsaSet::of(&[Isa::Arm32]);
        config.normalize(&mut isas);

        assert!(config.features.has(ArmFeature::Arm26));
        assert!(!config.features.has(ArmFeature::Arm32));
    }

    #[test]
    fn thumb_on_armv1_is_rejected() {
        let config = ArmConfig::new(ArmVersion::V1);
        let isas = IsaSet::of(&[Isa::Arm26, Isa::Thumb]);
        assert!(config.validate(isas).is_err());
    }

    #[test]
    fn thumbee_outside_v7_is_rejected() {
        let config = ArmConfig::new(ArmVersion::V8);
        let isas = IsaSet::of(&[Isa::Arm32, Isa::ThumbEe]);
        assert!(config.validate(isas).is_err());

        let config = ArmConfig::new(ArmVersion::V7);
        let isas = IsaSet::of(&[Isa::Arm32, Isa::ThumbEe]);
        assert!(config.validate(isas).is_ok());
    }

    #[test]
    fn profile_round_trips() {
        let features = Features::NONE.with_profile(Profile::Microcontroller);
        assert_eq!(features.profile(), Profile::Microcontroller);
        let features = features.with(ArmFeature::Thumb2);
        assert_eq!(features.profile(), Profile::Microcontroller);
    }
}
