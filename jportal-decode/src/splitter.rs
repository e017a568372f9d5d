//! Splits a perf-format trace-data file into per-CPU PT/sideband chunks
//! (§4.12).
//!
//! Two passes, mirroring `ptjvm_split`/`ptjvm_fine_split`: a coarse pass
//! buckets every perf record by CPU (`AUXTRACE` contributes a PT byte
//! range, `AUX_ADVANCE` marks a loss boundary, everything else is
//! sideband), then a fine pass concatenates each CPU's PT ranges and cuts
//! the result into chunks of [`SYNC_SPLIT_NUMBER`] PSBs apiece using a
//! plain packet-level sync scan.

use std::collections::BTreeMap;

use crate::cpu::PtCpu;
use crate::error::{Error, Result};
use crate::pt::packet::PacketScanner;

pub const SYNC_SPLIT_NUMBER: usize = 500;

const PERF_RECORD_AUXTRACE: u32 = 71;
const PERF_RECORD_AUX_ADVANCE: u32 = 72;

const PERF_SAMPLE_TID: u64 = 1 << 1;
const PERF_SAMPLE_TIME: u64 = 1 << 2;
const PERF_SAMPLE_ID: u64 = 1 << 6;
const PERF_SAMPLE_CPU: u64 = 1 << 7;
const PERF_SAMPLE_STREAM_ID: u64 = 1 << 9;
const PERF_SAMPLE_IDENTIFIER: u64 = 1 << 16;

/// The trace-data file's fixed header (§6), read once before splitting.
/// The original is a packed C struct; this reader lays the same named
/// fields out sequentially in declaration order since there is no portable
/// way to reproduce C struct padding from safe Rust.
#[derive(Debug, Clone, Copy)]
pub struct TraceFileHeader {
    pub cpu: PtCpu,
    pub nr_cpus: i32,
    pub mtc_freq: u8,
    pub nom_freq: u8,
    pub cpuid_0x15_eax: u32,
    pub cpuid_0x15_ebx: u32,
    pub sample_type: u64,
    pub time_shift: u16,
    pub time_mult: u32,
    pub time_zero: u64,
    pub addr0_a: u64,
    pub addr0_b: u64,
}

pub const TRACE_FILE_HEADER_LEN: usize = 2 + 1 + 1 + 4 + 1 + 1 + 4 + 4 + 8 + 2 + 4 + 8 + 8 + 8;

impl TraceFileHeader {
    pub fn read(buf: &[u8]) -> Result<(Self, usize)> {
        let mut r = FieldReader { buf, pos: 0 };
        let family = r.u16()?;
        let model = r.u8()?;
        let _stepping = r.u8()?;
        let nr_cpus = r.i32()?;
        let mtc_freq = r.u8()?;
        let nom_freq = r.u8()?;
        let cpuid_0x15_eax = r.u32()?;
        let cpuid_0x15_ebx = r.u32()?;
        let sample_type = r.u64()?;
        let time_shift = r.u16()?;
        let time_mult = r.u32()?;
        let time_zero = r.u64()?;
        let addr0_a = r.u64()?;
        let addr0_b = r.u64()?;
        let header = TraceFileHeader {
            cpu: PtCpu::new(family, model),
            nr_cpus,
            mtc_freq,
            nom_freq,
            cpuid_0x15_eax,
            cpuid_0x15_ebx,
            sample_type,
            time_shift,
            time_mult,
            time_zero,
            addr0_a,
            addr0_b,
        };
        Ok((header, r.pos))
    }
}

struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let slice = self
            .buf
            .get(self.pos..self.pos + n)
            .ok_or_else(|| Error::BadInput("truncated trace-data file header".into()))?;
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

/// One decoded and re-chunked PT sync segment, ready for a
/// [`crate::driver::ChunkDriver`].
#[derive(Debug, Clone, Default)]
pub struct TracePart {
    pub pt_bytes: Vec<u8>,
    pub sb_bytes_copy: Vec<u8>,
    pub loss_flag: bool,
}

/// `(sample_size, cpu_off)` derived from a trace-data file's `sample_type`
/// mask — the byte layout of the non-PT perf records' trailing sample
/// block, used to locate the 4-byte cpu id each one carries.
fn sample_layout(sample_type: u64) -> Result<(usize, usize)> {
    let mut size = 0usize;
    if sample_type & PERF_SAMPLE_TID != 0 {
        size += 8;
    }
    if sample_type & PERF_SAMPLE_TIME != 0 {
        size += 8;
    }
    if sample_type & PERF_SAMPLE_ID != 0 {
        size += 8;
    }
    if sample_type & PERF_SAMPLE_STREAM_ID != 0 {
        size += 8;
    }
    if sample_type & PERF_SAMPLE_CPU == 0 {
        return Err(Error::BadInput("trace recorded without PERF_SAMPLE_CPU".into()));
    }
    let cpu_off = size;
    size += 8;
    if sample_type & PERF_SAMPLE_IDENTIFIER != 0 {
        size += 8;
    }
    Ok((size, cpu_off))
}

struct PerfHeader {
    kind: u32,
    size: usize,
}

fn read_perf_header(buf: &[u8], pos: usize) -> Result<PerfHeader> {
    let bytes = buf
        .get(pos..pos + 8)
        .ok_or_else(|| Error::BadInput("truncated perf record header".into()))?;
    let kind = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let size = u16::from_le_bytes(bytes[6..8].try_into().unwrap()) as usize;
    if size < 8 {
        return Err(Error::BadInput("perf record header claims size < 8".into()));
    }
    Ok(PerfHeader { kind, size })
}

fn read_u32_at(buf: &[u8], pos: usize) -> Result<u32> {
    let bytes = buf
        .get(pos..pos + 4)
        .ok_or_else(|| Error::BadInput("truncated perf record field".into()))?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u64_at(buf: &[u8], pos: usize) -> Result<u64> {
    let bytes = buf
        .get(pos..pos + 8)
        .ok_or_else(|| Error::BadInput("truncated perf record field".into()))?;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

#[derive(Default)]
struct CoarsePt {
    loss: bool,
    ranges: Vec<(usize, usize)>,
}

/// Splits the perf-format body (the bytes following [`TraceFileHeader`])
/// into per-CPU [`TracePart`] lists.
pub fn split(buf: &[u8], sample_type: u64) -> Result<BTreeMap<i32, Vec<TracePart>>> {
    let (sample_size, cpu_off) = sample_layout(sample_type)?;

    let mut per_cpu_pt: BTreeMap<i32, Vec<CoarsePt>> = BTreeMap::new();
    let mut per_cpu_sb: BTreeMap<i32, Vec<(usize, usize)>> = BTreeMap::new();

    let mut pos = 0usize;
    while pos < buf.len() {
        let header = read_perf_header(buf, pos)?;
        let record_end = pos
            .checked_add(header.size)
            .filter(|&e| e <= buf.len())
            .ok_or_else(|| Error::BadInput("perf record size exceeds buffer".into()))?;
        let body = pos + 8;

        match header.kind {
            PERF_RECORD_AUXTRACE => {
                // {size, offset, reference}: u64 each, {idx, tid, cpu, _reserved}: u32 each.
                let aux_size = read_u64_at(buf, body)? as usize;
                let cpu = read_u32_at(buf, body + 32)? as i32;
                let pt_begin = body + 40;
                let pt_end = pt_begin
                    .checked_add(aux_size)
                    .filter(|&e| e <= buf.len())
                    .ok_or_else(|| Error::BadInput("AUXTRACE size exceeds buffer".into()))?;
                let entry = per_cpu_pt.entry(cpu).or_default();
                if entry.is_empty() {
                    entry.push(CoarsePt::default());
                }
                entry.last_mut().unwrap().ranges.push((pt_begin, pt_end));
                pos = pt_end;
            }
            PERF_RECORD_AUX_ADVANCE => {
                let cpu = read_u32_at(buf, body)? as i32;
                per_cpu_pt.entry(cpu).or_default().push(CoarsePt { loss: true, ranges: Vec::new() });
                pos = record_end;
            }
            _ => {
                let fixed = 8 + sample_size;
                if header.size < fixed {
                    return Err(Error::BadInput("perf record too small for its sample_type".into()));
                }
                let cpu_pos = record_end - sample_size + cpu_off;
                let cpu = read_u32_at(buf, cpu_pos)? as i32;
                per_cpu_sb.entry(cpu).or_default().push((pos, record_end));
                pos = record_end;
            }
        }
    }

    let mut out = BTreeMap::new();
    for (cpu, coarse_list) in per_cpu_pt {
        let sb_bytes: Vec<u8> = per_cpu_sb
            .get(&cpu)
            .map(|ranges| ranges.iter().flat_map(|&(s, e)| buf[s..e].iter().copied()).collect())
            .unwrap_or_default();

        let mut parts_for_cpu = Vec::new();
        for coarse in coarse_list {
            let pt_concat: Vec<u8> =
                coarse.ranges.iter().flat_map(|&(s, e)| buf[s..e].iter().copied()).collect();
            let mut fine = fine_split(&pt_concat);
            if coarse.loss {
                if let Some(first) = fine.first_mut() {
                    first.loss_flag = true;
                }
            }
            for part in &mut fine {
                part.sb_bytes_copy = sb_bytes.clone();
            }
            parts_for_cpu.extend(fine);
        }
        out.insert(cpu, parts_for_cpu);
    }
    Ok(out)
}

/// Cuts one CPU's concatenated PT bytes at PSB boundaries, `SYNC_SPLIT_NUMBER`
/// PSBs per chunk.
fn fine_split(pt: &[u8]) -> Vec<TracePart> {
    let mut scanner = PacketScanner::new(pt);
    let mut out = Vec::new();
    let mut begin = 0usize;
    let mut have_begin = false;
    let mut cnt = 0usize;
    loop {
        if scanner.sync_forward().is_err() {
            let start = if have_begin { begin } else { 0 };
            out.push(TracePart { pt_bytes: pt[start..].to_vec(), ..Default::default() });
            break;
        }
        let offset = scanner.position();
        if !have_begin {
            begin = offset;
            have_begin = true;
        }
        // Consume the PSB itself so the next sync_forward call advances.
        let _ = scanner.next_packet();
        if cnt == SYNC_SPLIT_NUMBER {
            out.push(TracePart { pt_bytes: pt[begin..offset].to_vec(), ..Default::default() });
            have_begin = false;
            cnt = 0;
        } else {
            cnt += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pt::packet::{OP_PAD, OP_PSB};

    fn perf_header(kind: u32, size: u16) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&kind.to_le_bytes());
        v.extend_from_slice(&0u16.to_le_bytes()); // misc
        v.extend_from_slice(&size.to_le_bytes());
        v
    }

    fn auxtrace_record(cpu: u32, pt_data: &[u8]) -> Vec<u8> {
        let body_len = 8 * 3 + 4 * 4 + pt_data.len();
        let mut rec = perf_header(PERF_RECORD_AUXTRACE, (8 + body_len) as u16);
        rec.extend_from_slice(&(pt_data.len() as u64).to_le_bytes()); // size
        rec.extend_from_slice(&0u64.to_le_bytes()); // offset
        rec.extend_from_slice(&0u64.to_le_bytes()); // reference
        rec.extend_from_slice(&0u32.to_le_bytes()); // idx
        rec.extend_from_slice(&0u32.to_le_bytes()); // tid
        rec.extend_from_slice(&cpu.to_le_bytes());
        rec.extend_from_slice(&0u32.to_le_bytes()); // reserved
        rec.extend_from_slice(pt_data);
        rec
    }

    fn sideband_record(cpu: u32) -> Vec<u8> {
        // sample_type = PERF_SAMPLE_CPU only: an 8-byte {cpu, res} trailer.
        let mut rec = perf_header(9999, 8 + 8);
        rec.extend_from_slice(&cpu.to_le_bytes());
        rec.extend_from_slice(&0u32.to_le_bytes());
        rec
    }

    #[test]
    fn buckets_auxtrace_pt_bytes_by_cpu() {
        let pt = vec![OP_PSB, OP_PAD];
        let buf = auxtrace_record(3, &pt);
        let splits = split(&buf, PERF_SAMPLE_CPU).unwrap();
        assert_eq!(splits.len(), 1);
        let parts = &splits[&3];
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].pt_bytes, pt);
        assert!(!parts[0].loss_flag);
    }

    #[test]
    fn aux_advance_marks_next_part_lossy() {
        let mut buf = Vec::new();
        let mut advance = perf_header(PERF_RECORD_AUX_ADVANCE, 16);
        advance.extend_from_slice(&7u32.to_le_bytes());
        advance.extend_from_slice(&0u32.to_le_bytes());
        buf.extend(advance);
        let pt = vec![OP_PSB, OP_PAD];
        buf.extend(auxtrace_record(7, &pt));

        let splits = split(&buf, PERF_SAMPLE_CPU).unwrap();
        assert!(splits[&7][0].loss_flag);
    }

    #[test]
    fn non_pt_records_bucket_into_sideband() {
        let mut buf = auxtrace_record(1, &[OP_PSB]);
        buf.extend(sideband_record(1));
        let splits = split(&buf, PERF_SAMPLE_CPU).unwrap();
        assert_eq!(splits[&1][0].sb_bytes_copy.len(), 16);
    }

    #[test]
    fn missing_cpu_sample_flag_is_rejected() {
        assert!(split(&[], 0).is_err());
    }

    #[test]
    fn fine_split_cuts_every_sync_split_number_psbs() {
        let mut pt = Vec::new();
        for _ in 0..(SYNC_SPLIT_NUMBER + 2) {
            pt.push(OP_PSB);
            pt.push(OP_PAD);
        }
        let parts = fine_split(&pt);
        assert_eq!(parts.len(), 2);
    }
}
