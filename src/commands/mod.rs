//! CLI command implementations
//!
//! Every command receives an already opened [`rch341_core::Ch341Device`];
//! opening and closing is done once in `main`.

pub mod eeprom;
pub mod gpio;
pub mod i2c;
pub mod info;
#[cfg(feature = "repl")]
pub mod repl;
pub mod spi;

use indicatif::ProgressStyle;

/// Chunk size for EEPROM transfers (4 KiB)
pub const CHUNK_SIZE: usize = 4096;

/// Progress bar style shared by the transfer commands
pub fn progress_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
        .progress_chars("#>-"))
}

/// Classic 16-bytes-per-line hex dump, addresses starting at `base`
pub fn hex_dump(base: u32, data: &[u8]) -> String {
    let mut out = String::new();
    for (i, line) in data.chunks(16).enumerate() {
        let addr = base as usize + i * 16;
        let hex: Vec<String> = line.iter().map(|b| format!("{:02x}", b)).collect();
        let ascii: String = line
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            })
            .collect();
        out.push_str(&format!("{:08x}  {:<47}  |{}|\n", addr, hex.join(" "), ascii));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_dump() {
        let dump = hex_dump(0x10, b"Hello\x00\xff");
        assert_eq!(
            dump,
            format!("00000010  {:<47}  |Hello..|\n", "48 65 6c 6c 6f 00 ff")
        );
        assert_eq!(hex_dump(0, &[0; 20]).lines().count(), 2);
        assert!(hex_dump(0, &[]).is_empty());
    }
}
