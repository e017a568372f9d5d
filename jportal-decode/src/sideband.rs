//! Decodes the perf sideband stream delivered alongside the PT trace:
//! mmap/comm-style bookkeeping collapses to three event kinds the core
//! cares about — `AUX` (aux-area truncation, a data-loss signal),
//! `ITRACE_START`, and thread-switch records.
//!
//! Records are yielded in timestamp order, one at a time, bounded by a
//! caller-supplied "current time" so the PT-side driver can interleave
//! sideband events with trace packets as it decodes.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebandEvent {
    /// Aux-area record; `truncated` marks that samples were dropped before
    /// this point, which the caller surfaces as data loss.
    Aux { truncated: bool },
    ItraceStart,
    ThreadSwitch { tid: u32 },
}

const TAG_AUX: u8 = 0;
const TAG_ITRACE_START: u8 = 1;
const TAG_THREAD_SWITCH: u8 = 2;

pub struct SidebandDecoder<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> SidebandDecoder<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Yields the next sideband event if its timestamp is `<= time`,
    /// without consuming events past that bound. Returns `Ok(None)` at
    /// end of stream or when the next event is still in the future.
    pub fn sideband_event(&mut self, time: u64) -> Result<Option<(u64, SidebandEvent)>> {
        if self.position >= self.buffer.len() {
            return Ok(None);
        }
        let mut peek = self.position;
        let tag = self.read_u8(&mut peek)?;
        let timestamp = self.read_u64(&mut peek)?;
        if timestamp > time {
            return Ok(None);
        }
        let event = match tag {
            TAG_AUX => {
                let truncated = self.read_u8(&mut peek)? != 0;
                SidebandEvent::Aux { truncated }
            }
            TAG_ITRACE_START => SidebandEvent::ItraceStart,
            TAG_THREAD_SWITCH => {
                let tid = self.read_u32(&mut peek)?;
                SidebandEvent::ThreadSwitch { tid }
            }
            other => {
                return Err(Error::BadInput(format!("unknown sideband record tag {other}")))
            }
        };
        self.position = peek;
        Ok(Some((timestamp, event)))
    }

    fn read_u8(&self, pos: &mut usize) -> Result<u8> {
        let b = *self
            .buffer
            .get(*pos)
            .ok_or_else(|| Error::BadInput("truncated sideband record".into()))?;
        *pos += 1;
        Ok(b)
    }

    fn read_u32(&self, pos: &mut usize) -> Result<u32> {
        let bytes = self
            .buffer
            .get(*pos..*pos + 4)
            .ok_or_else(|| Error::BadInput("truncated sideband record".into()))?;
        *pos += 4;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_u64(&self, pos: &mut usize) -> Result<u64> {
        let bytes = self
            .buffer
            .get(*pos..*pos + 8)
            .ok_or_else(|| Error::BadInput("truncated sideband record".into()))?;
        *pos += 8;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: u8, timestamp: u64, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&timestamp.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn yields_events_up_to_time_bound() {
        let mut buf = record(TAG_ITRACE_START, 10, &[]);
        buf.extend(record(TAG_THREAD_SWITCH, 20, &42u32.to_le_bytes()));
        let mut dec = SidebandDecoder::new(&buf);

        assert_eq!(dec.sideband_event(5).unwrap(), None);
        let (ts, ev) = dec.sideband_event(15).unwrap().unwrap();
        assert_eq!(ts, 10);
        assert_eq!(ev, SidebandEvent::ItraceStart);

        assert_eq!(dec.sideband_event(15).unwrap(), None);
        let (ts, ev) = dec.sideband_event(100).unwrap().unwrap();
        assert_eq!(ts, 20);
        assert_eq!(ev, SidebandEvent::ThreadSwitch { tid: 42 });

        assert_eq!(dec.sideband_event(1000).unwrap(), None);
    }

    #[test]
    fn aux_truncation_flag_round_trips() {
        let buf = record(TAG_AUX, 5, &[1u8]);
        let mut dec = SidebandDecoder::new(&buf);
        let (_, ev) = dec.sideband_event(5).unwrap().unwrap();
        assert_eq!(ev, SidebandEvent::Aux { truncated: true });
    }

    #[test]
    fn unknown_tag_is_bad_input() {
        let buf = record(99, 0, &[]);
        let mut dec = SidebandDecoder::new(&buf);
        assert!(matches!(dec.sideband_event(0), Err(Error::BadInput(_))));
    }
}
