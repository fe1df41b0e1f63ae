//! Steim-1 and Steim-2 decompression. Both are big endian in miniSEED 3.

use anyhow::{anyhow, bail};

const FRAME_SIZE: usize = 16; // 32-bit words per 64-byte frame

#[inline(always)]
fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Unpack `count` fields of `bits` each, most significant first, from the
/// low `count * bits` bits of `word`.
#[inline]
fn unpack(word: u32, count: u32, bits: u32, out: &mut Vec<i32>) {
    let mask = (1u32 << bits) - 1;
    for i in (0..count).rev() {
        out.push(sign_extend((word >> (i * bits)) & mask, bits));
    }
}

/// Walk the frames, collecting differences with `unpack_word`, and integrate
/// them starting at the forward integration constant X0.
fn integrate<F>(
    payload: &[u8],
    sample_count: usize,
    sid: &str,
    unpack_word: F,
) -> anyhow::Result<Vec<i32>>
where
    F: Fn(u32, u32, &mut Vec<i32>) -> anyhow::Result<()>,
{
    if payload.is_empty() {
        return Err(anyhow!("{sid}: empty Steim payload"));
    }
    let words: Vec<u32> = payload
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let max_frames = words.len() / FRAME_SIZE;

    let mut output = Vec::with_capacity(sample_count);
    let mut diffs = Vec::with_capacity(7 * FRAME_SIZE);
    let mut xn = 0i32;

    for (frame_idx, frame) in words.chunks_exact(FRAME_SIZE).take(max_frames).enumerate() {
        if output.len() >= sample_count {
            break;
        }
        diffs.clear();
        let nibbles = frame[0];
        let start = if frame_idx == 0 {
            output.push(frame[1] as i32);
            xn = frame[2] as i32;
            log::trace!("Frame {}: X0={}  Xn={}", frame_idx, output[0], xn);
            3
        } else {
            log::trace!("Frame {}", frame_idx);
            1
        };
        for (widx, &word) in frame.iter().enumerate().skip(start) {
            let nibble = (nibbles >> (30 - 2 * widx)) & 0x03;
            unpack_word(nibble, word, &mut diffs)?;
        }
        // the first difference of the first frame refers to the previous record
        let skip = usize::from(frame_idx == 0);
        for &d in diffs.iter().skip(skip) {
            if output.len() >= sample_count {
                break;
            }
            let last = *output.last().unwrap_or(&0);
            output.push(last.wrapping_add(d));
        }
    }

    if output.len() != sample_count {
        log::warn!(
            "{}: number of samples decompressed doesn't match number in header: {} != {}",
            sid,
            output.len(),
            sample_count
        );
        bail!("{sid}: number of samples decompressed doesn't match number in header");
    }
    if let Some(&last) = output.last() {
        if last != xn {
            log::warn!(
                "{}: data integrity check failed, last sample={}, Xn={}",
                sid,
                last,
                xn
            );
            bail!("{sid}: Steim data integrity check failed");
        }
    }
    Ok(output)
}

pub(crate) fn decode_steim1(
    payload: &[u8],
    sample_count: usize,
    sid: &str,
) -> anyhow::Result<Vec<i32>> {
    integrate(payload, sample_count, sid, |nibble, word, out| {
        match nibble {
            0 => {}
            1 => unpack(word, 4, 8, out),
            2 => unpack(word, 2, 16, out),
            _ => out.push(word as i32),
        }
        Ok(())
    })
}

pub(crate) fn decode_steim2(
    payload: &[u8],
    sample_count: usize,
    sid: &str,
) -> anyhow::Result<Vec<i32>> {
    integrate(payload, sample_count, sid, |nibble, word, out| {
        let dnib = word >> 30;
        match (nibble, dnib) {
            (0, _) => {}
            (1, _) => unpack(word, 4, 8, out),
            (2, 1) => unpack(word, 1, 30, out),
            (2, 2) => unpack(word, 2, 15, out),
            (2, 3) => unpack(word, 3, 10, out),
            (3, 0) => unpack(word, 5, 6, out),
            (3, 1) => unpack(word, 6, 5, out),
            (3, 2) => unpack(word, 7, 4, out),
            (nibble, dnib) => {
                bail!("{sid}: impossible Steim2 dnib={dnib:02b} for nibble={nibble:02b}")
            }
        }
        Ok(())
    })
}
