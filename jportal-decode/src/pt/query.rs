//! Query-level view over the packet stream: tracks `ip`/`enabled`/`mode`/
//! `asid` and exposes the handful of "what happens next" questions the
//! per-chunk driver asks (§4.11), rather than raw packets.

use crate::error::{Error, Result};
use crate::pt::packet::{ExecMode, Packet, PacketScanner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEvent {
    Enabled { ip: u64 },
    Disabled { ip: Option<u64> },
    AsyncBranch { ip: u64 },
    Paging { cr3: u64, non_root: bool },
    ExecMode(ExecMode),
    Overflow,
    Eos,
}

pub struct PtQuery<'a> {
    packets: PacketScanner<'a>,
    pub ip: u64,
    pub enabled: bool,
    pub mode: ExecMode,
    pub asid: u64,
    /// Bits from the TNT packet currently being drained, oldest first.
    pending_tnt: Vec<bool>,
}

impl<'a> PtQuery<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            packets: PacketScanner::new(buf),
            ip: 0,
            enabled: false,
            mode: ExecMode::Bits64,
            asid: 0,
            pending_tnt: Vec::new(),
        }
    }

    pub fn position(&self) -> usize {
        self.packets.position()
    }

    pub fn at_eos(&self) -> bool {
        self.packets.at_eos() && self.pending_tnt.is_empty()
    }

    /// Resyncs to the next PSB and replays its header packets (FUP/PIP/MODE)
    /// until PSBEND, establishing known-good state.
    pub fn sync_forward(&mut self) -> Result<()> {
        self.packets.sync_forward()?;
        self.packets.next_packet()?; // consume PSB itself
        self.enabled = false;
        self.pending_tnt.clear();
        loop {
            match self.packets.next_packet()? {
                Packet::PsbEnd => return Ok(()),
                Packet::Fup(Some(ip)) => self.ip = ip,
                Packet::Fup(None) => {}
                Packet::Pip { cr3, .. } => self.asid = cr3,
                Packet::Mode(mode) => self.mode = mode,
                Packet::Pad => {}
                other => {
                    return Err(Error::BadInput(format!(
                        "unexpected packet {other:?} inside PSB+"
                    )))
                }
            }
        }
    }

    /// Drains packets, updating `ip`/`enabled`/`mode`/`asid`, until one
    /// requires the driver's attention (an IP became available, tracing was
    /// enabled/disabled, or an overflow occurred).
    pub fn next_event(&mut self) -> Result<QueryEvent> {
        if self.at_eos() {
            return Ok(QueryEvent::Eos);
        }
        loop {
            if self.packets.at_eos() {
                return Ok(QueryEvent::Eos);
            }
            match self.packets.next_packet()? {
                Packet::Pad | Packet::Psb | Packet::PsbEnd | Packet::Mnt | Packet::Cbr(_) => {}
                Packet::Tip(ip) => {
                    if let Some(ip) = ip {
                        self.ip = ip;
                        return Ok(QueryEvent::AsyncBranch { ip });
                    }
                }
                Packet::TipPge(ip) => {
                    self.enabled = true;
                    if let Some(ip) = ip {
                        self.ip = ip;
                    }
                    return Ok(QueryEvent::Enabled { ip: self.ip });
                }
                Packet::TipPgd(ip) => {
                    self.enabled = false;
                    if let Some(ip) = ip {
                        self.ip = ip;
                    }
                    return Ok(QueryEvent::Disabled { ip });
                }
                Packet::Fup(ip) => {
                    if let Some(ip) = ip {
                        self.ip = ip;
                    }
                }
                Packet::Tnt(bits) => {
                    self.pending_tnt = bits;
                    self.pending_tnt.reverse(); // pop() returns oldest-first
                }
                Packet::Pip { cr3, non_root } => {
                    self.asid = cr3;
                    return Ok(QueryEvent::Paging { cr3, non_root });
                }
                Packet::Mode(mode) => {
                    self.mode = mode;
                    return Ok(QueryEvent::ExecMode(mode));
                }
                Packet::Ovf => return Ok(QueryEvent::Overflow),
            }
        }
    }

    /// Pulls the next taken/not-taken bit, fetching a fresh TNT packet if
    /// the current one is exhausted.
    pub fn next_tnt(&mut self) -> Result<bool> {
        if let Some(bit) = self.pending_tnt.pop() {
            return Ok(bit);
        }
        loop {
            match self.packets.next_packet()? {
                Packet::Tnt(bits) if !bits.is_empty() => {
                    self.pending_tnt = bits;
                    self.pending_tnt.reverse();
                    return Ok(self.pending_tnt.pop().unwrap());
                }
                Packet::Tnt(_) => continue,
                other => {
                    return Err(Error::BadInput(format!(
                        "expected TNT packet, found {other:?}"
                    )))
                }
            }
        }
    }

    /// Pulls the next indirect-branch target IP (a standalone TIP packet).
    pub fn next_indirect_target(&mut self) -> Result<u64> {
        match self.packets.next_packet()? {
            Packet::Tip(Some(ip)) => {
                self.ip = ip;
                Ok(ip)
            }
            other => Err(Error::BadInput(format!("expected TIP packet, found {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pt::packet::{OP_FUP, OP_MODE, OP_PIP, OP_PSB, OP_PSBEND, OP_TIP, OP_TIP_PGE, OP_TNT};

    fn ip_bytes(op: u8, ip: u64) -> Vec<u8> {
        let mut v = vec![op, 1];
        v.extend_from_slice(&ip.to_le_bytes());
        v
    }

    #[test]
    fn sync_forward_establishes_ip_from_fup() {
        let mut buf = vec![OP_PSB];
        buf.extend(ip_bytes(OP_FUP, 0x4000));
        buf.push(OP_PSBEND);
        let mut q = PtQuery::new(&buf);
        q.sync_forward().unwrap();
        assert_eq!(q.ip, 0x4000);
    }

    #[test]
    fn tip_pge_enables_tracing_and_sets_ip() {
        let buf = ip_bytes(OP_TIP_PGE, 0x8000);
        let mut q = PtQuery::new(&buf);
        let ev = q.next_event().unwrap();
        assert_eq!(ev, QueryEvent::Enabled { ip: 0x8000 });
        assert!(q.enabled);
    }

    #[test]
    fn tnt_bits_drain_in_order() {
        let buf = vec![OP_TNT, 2, 0b01];
        let mut q = PtQuery::new(&buf);
        assert!(!q.next_tnt().unwrap());
        assert!(q.next_tnt().unwrap());
    }

    #[test]
    fn paging_and_mode_events_update_state() {
        let mut buf = vec![OP_PIP];
        buf.extend_from_slice(&0x2000u64.to_le_bytes());
        buf.push(0);
        buf.push(OP_MODE);
        buf.push(2);
        let mut q = PtQuery::new(&buf);
        assert_eq!(q.next_event().unwrap(), QueryEvent::Paging { cr3: 0x2000, non_root: false });
        assert_eq!(q.next_event().unwrap(), QueryEvent::ExecMode(ExecMode::Bits64));
        assert_eq!(q.asid, 0x2000);
    }

    #[test]
    fn eos_at_end_of_buffer() {
        let mut q = PtQuery::new(&[]);
        assert_eq!(q.next_event().unwrap(), QueryEvent::Eos);
    }
}
