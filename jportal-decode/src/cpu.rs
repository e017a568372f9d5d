//! Identifies the CPU that recorded a trace and looks up which Intel PT
//! silicon errata its generation is known to hit. Family/model pairs and
//! errata names are taken from the public Intel specification-update
//! documents; only the three errata the driver actually works around are
//! tracked (§4.11) rather than the full published list.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtCpu {
    family: u16,
    model: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuErrata {
    /// SKD022/SKL024/KBL023: VM entry that clears `TraceEn` while
    /// `PacketEn` is still set emits a FUP ahead of the `TIP.PGD`, so an
    /// async-disable observed right after a VM-entry boundary should be
    /// treated as synchronous instead.
    pub skd022: bool,
    /// BDM64: a TSX abort immediately following a branch instruction can
    /// log the pre-abort branch target after the abort's own Intel PT
    /// packet, corrupting apparent program order across the abort.
    pub bdm64: bool,
    /// SKL014/KBL014: an unconditional direct branch that clears
    /// `FilterEn` can produce a `TIP.PGD` with no target-IP payload.
    pub skl014: bool,
}

impl PtCpu {
    pub const fn new(family: u16, model: u8) -> Self {
        Self { family, model }
    }

    pub const fn family(&self) -> u16 {
        self.family
    }

    pub const fn model(&self) -> u8 {
        self.model
    }

    pub const fn errata(&self) -> CpuErrata {
        let mut errata = CpuErrata { skd022: false, bdm64: false, skl014: false };
        if self.family == 0x6 {
            match self.model {
                0x3d | 0x47 | 0x4f | 0x56 => {
                    errata.bdm64 = true;
                }
                0x4e | 0x5e | 0x8e | 0x9e | 0xa5 | 0xa6 => {
                    errata.skd022 = true;
                    errata.skl014 = true;
                }
                0x55 | 0x6a | 0x6c | 0x66 | 0x7d | 0x7e | 0x8c | 0x8d | 0xa7 | 0xa8 => {
                    errata.skd022 = true;
                    errata.skl014 = true;
                }
                _ => {}
            }
        }
        errata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skylake_client_hits_skd022_and_skl014() {
        let cpu = PtCpu::new(0x6, 0x9e);
        let errata = cpu.errata();
        assert!(errata.skd022);
        assert!(errata.skl014);
        assert!(!errata.bdm64);
    }

    #[test]
    fn broadwell_hits_bdm64_only() {
        let cpu = PtCpu::new(0x6, 0x47);
        let errata = cpu.errata();
        assert!(errata.bdm64);
        assert!(!errata.skd022);
    }

    #[test]
    fn unknown_model_has_no_errata() {
        let cpu = PtCpu::new(0x6, 0x01);
        assert_eq!(cpu.errata(), CpuErrata::default());
    }
}
