//! EEPROM read/write command implementations

use super::{progress_style, CHUNK_SIZE};
use indicatif::ProgressBar;
use rch341_core::{Ch341Device, EepromType};
use std::fs;
use std::path::Path;

/// Resolve the byte count for a read: explicit length or the rest of the part
fn read_length(eeprom: EepromType, start: u32, length: Option<u32>) -> Result<usize, String> {
    match length {
        Some(len) => Ok(len as usize),
        None => eeprom
            .capacity()
            .checked_sub(start as usize)
            .ok_or_else(|| format!("start 0x{:X} is beyond the end of a {}", start, eeprom)),
    }
}

/// Read a range in chunks, ticking `pb` as it goes
fn read_chunked(
    dev: &Ch341Device,
    eeprom: EepromType,
    start: u32,
    len: usize,
    pb: &ProgressBar,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    eeprom.check_range(start, len)?;
    let mut data = Vec::with_capacity(len);
    let mut offset = 0usize;
    while offset < len {
        let chunk = (len - offset).min(CHUNK_SIZE);
        let bytes = dev.eeprom_read(eeprom, start + offset as u32, chunk)?;
        data.extend_from_slice(&bytes);
        offset += chunk;
        pb.set_position(offset as u64);
    }
    Ok(data)
}

/// Read an EEPROM to a file, or hex dump it to stdout
pub fn run_read(
    dev: &Ch341Device,
    eeprom: EepromType,
    output: Option<&Path>,
    start: u32,
    length: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let len = read_length(eeprom, start, length)?;
    println!("Reading {} bytes from {} at 0x{:X}...", len, eeprom, start);

    let pb = ProgressBar::new(len as u64);
    pb.set_style(progress_style()?);
    let data = read_chunked(dev, eeprom, start, len, &pb)?;
    pb.finish_with_message("Read complete");

    match output {
        Some(path) => {
            fs::write(path, &data)?;
            println!("Wrote {} bytes to {:?}", data.len(), path);
        }
        None => print!("{}", super::hex_dump(start, &data)),
    }
    Ok(())
}

/// Write a file to an EEPROM, optionally reading it back
pub fn run_write(
    dev: &Ch341Device,
    eeprom: EepromType,
    input: &Path,
    start: u32,
    verify: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    eeprom.check_range(start, data.len())?;
    println!(
        "Writing {} bytes from {:?} to {} at 0x{:X}...",
        data.len(),
        input,
        eeprom,
        start
    );

    let pb = ProgressBar::new(data.len() as u64);
    pb.set_style(progress_style()?);
    let mut offset = 0usize;
    for chunk in data.chunks(CHUNK_SIZE) {
        dev.eeprom_write(eeprom, start + offset as u32, chunk)?;
        offset += chunk.len();
        pb.set_position(offset as u64);
    }
    pb.finish_with_message("Write complete");

    if verify {
        println!("Verifying...");
        let pb = ProgressBar::new(data.len() as u64);
        pb.set_style(progress_style()?);
        let readback = read_chunked(dev, eeprom, start, data.len(), &pb)?;
        pb.finish_with_message("Read complete");

        if let Some(pos) = first_mismatch(&data, &readback) {
            return Err(format!(
                "Verification failed at 0x{:X}: expected 0x{:02X}, got 0x{:02X}",
                start as usize + pos,
                data[pos],
                readback[pos]
            )
            .into());
        }
        println!("Verification passed");
    }
    Ok(())
}

fn first_mismatch(expected: &[u8], actual: &[u8]) -> Option<usize> {
    expected.iter().zip(actual).position(|(a, b)| a != b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_length() {
        assert_eq!(read_length(EepromType::Eeprom24C02, 0, None).unwrap(), 256);
        assert_eq!(read_length(EepromType::Eeprom24C02, 0x10, None).unwrap(), 240);
        assert_eq!(read_length(EepromType::Eeprom24C02, 0, Some(4)).unwrap(), 4);
        assert!(read_length(EepromType::Eeprom24C02, 0x200, None).is_err());
    }

    #[test]
    fn test_first_mismatch() {
        assert_eq!(first_mismatch(&[1, 2, 3], &[1, 2, 3]), None);
        assert_eq!(first_mismatch(&[1, 2, 3], &[1, 0, 3]), Some(1));
    }
}
