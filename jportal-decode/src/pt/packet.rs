//! A packet-level scanner over the PT byte stream.
//!
//! This is a reduced, self-contained subset of the Intel PT packet format —
//! not a byte-exact implementation of the SDM's encoding (that job belongs
//! to a dedicated decoder library; it is out of this crate's core per
//! `SPEC_FULL.md` §2 item 6). It models exactly the packets the driver
//! needs to resolve IPs against the codelet/JIT registries: sync
//! boundaries, taken/not-taken bits, target IPs, paging, and exec-mode
//! changes.

use crate::error::{Error, Result};

pub const OP_PAD: u8 = 0x00;
pub const OP_PSB: u8 = 0x01;
pub const OP_PSBEND: u8 = 0x02;
pub const OP_TIP: u8 = 0x03;
pub const OP_TIP_PGE: u8 = 0x04;
pub const OP_TIP_PGD: u8 = 0x05;
pub const OP_FUP: u8 = 0x06;
pub const OP_TNT: u8 = 0x07;
pub const OP_PIP: u8 = 0x08;
pub const OP_MODE: u8 = 0x09;
pub const OP_OVF: u8 = 0x0a;
pub const OP_MNT: u8 = 0x0b;
pub const OP_CBR: u8 = 0x0c;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Bits16,
    Bits32,
    Bits64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Pad,
    Psb,
    PsbEnd,
    /// Direct/indirect-branch target IP. `None` when the real packet has no
    /// payload (out-of-context).
    Tip(Option<u64>),
    TipPge(Option<u64>),
    TipPgd(Option<u64>),
    Fup(Option<u64>),
    /// Taken/not-taken bits, oldest first.
    Tnt(Vec<bool>),
    Pip { cr3: u64, non_root: bool },
    Mode(ExecMode),
    Ovf,
    Mnt,
    Cbr(u8),
}

pub struct PacketScanner<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketScanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.len());
    }

    pub fn at_eos(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Scans forward, discarding bytes, until the next `PSB` opcode byte.
    /// Leaves the cursor positioned at that byte.
    pub fn sync_forward(&mut self) -> Result<()> {
        while let Some(&b) = self.buf.get(self.pos) {
            if b == OP_PSB {
                return Ok(());
            }
            self.pos += 1;
        }
        Err(Error::BadInput("no PSB found before end of PT chunk".into()))
    }

    fn take_byte(&mut self) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or_else(|| Error::BadInput("truncated PT packet".into()))?;
        self.pos += 1;
        Ok(b)
    }

    fn take_u64(&mut self) -> Result<u64> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + 8)
            .ok_or_else(|| Error::BadInput("truncated PT packet payload".into()))?;
        self.pos += 8;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn take_ip(&mut self) -> Result<Option<u64>> {
        let has_ip = self.take_byte()? != 0;
        if has_ip {
            Ok(Some(self.take_u64()?))
        } else {
            Ok(None)
        }
    }

    pub fn next_packet(&mut self) -> Result<Packet> {
        if self.at_eos() {
            return Err(Error::BadInput("end of PT chunk".into()));
        }
        let op = self.take_byte()?;
        Ok(match op {
            OP_PAD => Packet::Pad,
            OP_PSB => Packet::Psb,
            OP_PSBEND => Packet::PsbEnd,
            OP_TIP => Packet::Tip(self.take_ip()?),
            OP_TIP_PGE => Packet::TipPge(self.take_ip()?),
            OP_TIP_PGD => Packet::TipPgd(self.take_ip()?),
            OP_FUP => Packet::Fup(self.take_ip()?),
            OP_TNT => {
                let count = self.take_byte()? as usize;
                let byte_len = count.div_ceil(8);
                let bytes = self.buf.get(self.pos..self.pos + byte_len).ok_or_else(|| {
                    Error::BadInput("truncated TNT packet".into())
                })?;
                self.pos += byte_len;
                let mut bits = Vec::with_capacity(count);
                for i in 0..count {
                    let byte = bytes[i / 8];
                    bits.push((byte >> (i % 8)) & 1 != 0);
                }
                Packet::Tnt(bits)
            }
            OP_PIP => {
                let cr3 = self.take_u64()?;
                let non_root = self.take_byte()? != 0;
                Packet::Pip { cr3, non_root }
            }
            OP_MODE => {
                let kind = self.take_byte()?;
                let mode = match kind {
                    0 => ExecMode::Bits16,
                    1 => ExecMode::Bits32,
                    2 => ExecMode::Bits64,
                    other => {
                        return Err(Error::BadInput(format!("unknown exec-mode byte {other}")))
                    }
                };
                Packet::Mode(mode)
            }
            OP_OVF => Packet::Ovf,
            OP_MNT => Packet::Mnt,
            OP_CBR => Packet::Cbr(self.take_byte()?),
            other => return Err(Error::BadInput(format!("unknown PT opcode byte {other:#x}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tip_bytes(op: u8, ip: Option<u64>) -> Vec<u8> {
        let mut out = vec![op];
        match ip {
            Some(v) => {
                out.push(1);
                out.extend_from_slice(&v.to_le_bytes());
            }
            None => out.push(0),
        }
        out
    }

    #[test]
    fn sync_forward_finds_psb_skipping_junk() {
        let buf = vec![OP_PAD, OP_PAD, OP_PSB, OP_PSBEND];
        let mut scanner = PacketScanner::new(&buf);
        scanner.sync_forward().unwrap();
        assert_eq!(scanner.position(), 2);
        assert_eq!(scanner.next_packet().unwrap(), Packet::Psb);
        assert_eq!(scanner.next_packet().unwrap(), Packet::PsbEnd);
    }

    #[test]
    fn tip_round_trips_with_and_without_payload() {
        let mut buf = tip_bytes(OP_TIP, Some(0x4000));
        buf.extend(tip_bytes(OP_TIP_PGD, None));
        let mut scanner = PacketScanner::new(&buf);
        assert_eq!(scanner.next_packet().unwrap(), Packet::Tip(Some(0x4000)));
        assert_eq!(scanner.next_packet().unwrap(), Packet::TipPgd(None));
    }

    #[test]
    fn tnt_bits_decode_lsb_first_oldest_first() {
        let buf = vec![OP_TNT, 3, 0b101];
        let mut scanner = PacketScanner::new(&buf);
        assert_eq!(scanner.next_packet().unwrap(), Packet::Tnt(vec![true, false, true]));
    }

    #[test]
    fn unknown_opcode_is_bad_input() {
        let buf = vec![0xffu8];
        let mut scanner = PacketScanner::new(&buf);
        assert!(scanner.next_packet().is_err());
    }

    #[test]
    fn pip_round_trips() {
        let mut buf = vec![OP_PIP];
        buf.extend_from_slice(&0x1000u64.to_le_bytes());
        buf.push(1);
        let mut scanner = PacketScanner::new(&buf);
        assert_eq!(scanner.next_packet().unwrap(), Packet::Pip { cr3: 0x1000, non_root: true });
    }
}
