// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Decode raw terminal output into text.
///
/// Preference order:
/// 1. A BOM pins the encoding (UTF-8, UTF-16LE, UTF-16BE).
/// 2. Without a BOM, a NUL-density probe detects BOM-less UTF-16LE — the
///    usual shape of Windows console output: ASCII bytes at even offsets,
///    zero bytes at odd offsets.
/// 3. Otherwise lossy UTF-8; undecodable bytes become replacement characters.
pub fn decode_output_bytes(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }
    if let Some(rest) = data.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    if let Some(rest) = data.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, true);
    }
    if let Some(rest) = data.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, false);
    }

    let probe_len = data.len().min(2000);
    if probe_len >= 4 {
        let zero_odd = data[..probe_len].iter().skip(1).step_by(2).filter(|&&b| b == 0).count();
        let zero_even = data[..probe_len].iter().step_by(2).filter(|&&b| b == 0).count();
        if zero_odd > 10.max(zero_even * 2) {
            return decode_utf16(data, true);
        }
    }

    String::from_utf8_lossy(data).into_owned()
}

fn decode_utf16(data: &[u8], little_endian: bool) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| {
            let bytes = [pair[0], pair[1]];
            if little_endian {
                u16::from_le_bytes(bytes)
            } else {
                u16::from_be_bytes(bytes)
            }
        })
        .collect();
    let mut text: String = char::decode_utf16(units.iter().copied())
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    // An odd trailing byte cannot form a code unit; mark it rather than drop
    // it silently.
    if data.len() % 2 != 0 {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    text
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
