//! `show_alloc_mem` / `show_alloc_mem_ex`: the stable, bit-matchable
//! live-allocation listing.
//!
//! Both public functions write to stdout; both delegate to a `_to` sibling
//! parameterized over any [`std::io::Write`] sink, so the exact bytes can
//! be asserted on in tests without capturing process-level stdout. Grounded
//! on `extensions::logging::create_console_logger`'s split between building
//! an event and writing it to a concrete destination.

use std::io::{self, Write};

use crate::engine::{self, ZoneEntry};
use crate::fmt::FixedBuf;

fn write_line(sink: &mut impl Write, buf: &FixedBuf) -> io::Result<()> {
    sink.write_all(buf.as_bytes())
}

/// Print the current live-allocation map to stdout.
///
/// One line per zone header (`TINY`/`SMALL`/`LARGE : <base>`), followed by
/// one line per live block in that zone (`<start> - <end> : <size>
/// bytes`), followed by a final `Total : <n> bytes` line summing every
/// block's payload size. Zones are listed in ascending base-address order;
/// a zone with no live blocks still gets its header line.
pub fn show_alloc_mem() {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    let _ = show_alloc_mem_to(&mut lock);
}

/// [`show_alloc_mem`], writing to an arbitrary sink instead of stdout.
pub fn show_alloc_mem_to(sink: &mut impl Write) -> io::Result<()> {
    let mut total = 0usize;
    let mut first_err = Ok(());

    engine::for_each_zone_entry(|entry| {
        if first_err.is_err() {
            return;
        }
        let mut buf = FixedBuf::new();
        match entry {
            ZoneEntry::Zone { label, base } => {
                buf.push_str(label);
                buf.push_str(" : ");
                buf.push_ptr(base as *const u8);
                buf.push_str("\n");
            }
            ZoneEntry::Block { payload, size } => {
                total += size;
                buf.push_ptr(payload.as_ptr());
                buf.push_str(" - ");
                // SAFETY: computing the end address for display only, never
                // dereferenced; it lies at most one byte past the block's
                // live range, which is always in-bounds for a pointer value.
                let end = unsafe { payload.as_ptr().add(size) };
                buf.push_ptr(end);
                buf.push_str(" : ");
                buf.push_udec(size);
                buf.push_str(" bytes\n");
            }
        }
        first_err = write_line(sink, &buf);
    });

    first_err?;

    let mut buf = FixedBuf::new();
    buf.push_str("Total : ");
    buf.push_udec(total);
    buf.push_str(" bytes\n");
    write_line(sink, &buf)
}

/// Print the current live-allocation map to stdout, with a hexdump of each
/// live block's payload (see [`show_alloc_mem`] for the header/summary
/// lines; this adds one hexdump block per live payload).
pub fn show_alloc_mem_ex() {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    let _ = show_alloc_mem_ex_to(&mut lock);
}

/// [`show_alloc_mem_ex`], writing to an arbitrary sink instead of stdout.
pub fn show_alloc_mem_ex_to(sink: &mut impl Write) -> io::Result<()> {
    let mut total = 0usize;
    let mut first_err = Ok(());

    engine::for_each_zone_entry(|entry| {
        if first_err.is_err() {
            return;
        }
        match entry {
            ZoneEntry::Zone { label, base } => {
                let mut buf = FixedBuf::new();
                buf.push_str(label);
                buf.push_str(" : ");
                buf.push_ptr(base as *const u8);
                buf.push_str("\n");
                first_err = write_line(sink, &buf);
            }
            ZoneEntry::Block { payload, size } => {
                total += size;
                let mut header = FixedBuf::new();
                header.push_ptr(payload.as_ptr());
                header.push_str(" - ");
                // SAFETY: display-only end address, never dereferenced.
                let end = unsafe { payload.as_ptr().add(size) };
                header.push_ptr(end);
                header.push_str(" : ");
                header.push_udec(size);
                header.push_str(" bytes\n");
                first_err = write_line(sink, &header);
                if first_err.is_err() {
                    return;
                }
                // SAFETY: `payload` is a live block's payload, valid for
                // `size` readable bytes for as long as the engine's lock
                // (held by the caller of `for_each_zone_entry`) is held.
                let bytes = unsafe { std::slice::from_raw_parts(payload.as_ptr(), size) };
                first_err = write_hexdump(sink, payload.as_ptr() as usize, bytes);
            }
        }
    });

    first_err?;

    let mut buf = FixedBuf::new();
    buf.push_str("Total : ");
    buf.push_udec(total);
    buf.push_str(" bytes\n");
    write_line(sink, &buf)
}

/// Render `bytes` as a canonical hexdump: one line per 16-byte window, an
/// address column, two-digit uppercase hex bytes (space-padded to 16
/// columns on a short final line), and an ASCII gutter where bytes outside
/// the printable range `32..=126` render as `.`.
fn write_hexdump(sink: &mut impl Write, base_addr: usize, bytes: &[u8]) -> io::Result<()> {
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let mut buf = FixedBuf::new();
        buf.push_ptr((base_addr + row * 16) as *const u8);
        buf.push_str("  ");
        for i in 0..16 {
            if let Some(&b) = chunk.get(i) {
                buf.push_hex_byte(b, true);
                buf.push_str(" ");
            } else {
                buf.push_str("   ");
            }
        }
        buf.push_str(" |");
        for &b in chunk {
            if (32..=126).contains(&b) {
                buf.push_str(std::str::from_utf8(&[b]).unwrap_or("."));
            } else {
                buf.push_str(".");
            }
        }
        buf.push_str("|\n");
        write_line(sink, &buf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{calloc, free, malloc};

    #[test]
    fn total_line_matches_sum_of_blocks() {
        // `Total` sums every live block across the whole process-wide
        // engine, so this test needs exclusivity from the rest of the
        // suite for the duration of the check.
        let _guard = crate::engine::test_lock();

        let a = malloc(16).unwrap();
        let b = malloc(32).unwrap();

        let mut out = Vec::new();
        show_alloc_mem_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let total_line = text
            .lines()
            .find(|l| l.starts_with("Total :"))
            .expect("listing should end with a Total line");
        assert!(total_line.contains("48 bytes"));

        free(Some(a));
        free(Some(b));
    }

    #[test]
    fn show_alloc_mem_is_idempotent_with_no_intervening_calls() {
        let _guard = crate::engine::test_lock();

        let p = malloc(64).unwrap();

        let mut first = Vec::new();
        show_alloc_mem_to(&mut first).unwrap();
        let mut second = Vec::new();
        show_alloc_mem_to(&mut second).unwrap();

        assert_eq!(first, second);
        free(Some(p));
    }

    #[test]
    fn hexdump_marks_non_printable_bytes_as_dots() {
        let p = calloc(1, 20).unwrap();

        let mut out = Vec::new();
        show_alloc_mem_ex_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains('.'), "zero bytes should render as '.'");

        free(Some(p));
    }

    /// Pins the exact hexdump line layout -- two spaces after the address,
    /// uppercase hex bytes space-padded to 16 columns, a space before the
    /// opening `|`, and non-printable bytes rendered as `.` -- for a known
    /// 4-byte payload, independent of any live allocation's reported size.
    #[test]
    fn hexdump_line_matches_expected_bytes_exactly() {
        let bytes = [0xDEu8, 0xAD, 0x00, 0x41];

        let mut out = Vec::new();
        write_hexdump(&mut out, 0x1000, &bytes).unwrap();
        let text = String::from_utf8(out).unwrap();

        let mut expected = String::from("0x1000  ");
        for i in 0..16 {
            match bytes.get(i) {
                Some(&b) => expected.push_str(&format!("{b:02X} ")),
                None => expected.push_str("   "),
            }
        }
        expected.push_str(" |");
        for &b in &bytes {
            expected.push(if (32..=126).contains(&b) { b as char } else { '.' });
        }
        expected.push_str("|\n");

        assert_eq!(text, expected);
    }
}
