//! I2C command implementations

use crate::cli::parse_hex_bytes;
use rch341_core::{Ch341Device, I2cSpeed};

fn apply_speed(
    dev: &Ch341Device,
    speed: Option<I2cSpeed>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(speed) = speed {
        dev.i2c_set_speed(speed)?;
        log::info!("I2C speed set to {} kHz", speed.khz());
    }
    Ok(())
}

/// Run the bus scan and print the address grid
pub fn run_scan(
    dev: &Ch341Device,
    speed: Option<I2cSpeed>,
) -> Result<(), Box<dyn std::error::Error>> {
    apply_speed(dev, speed)?;
    let found = dev.i2c_scan()?;
    print!("{}", format_scan_grid(&found));
    println!();
    println!("{} device(s) found", found.len());
    Ok(())
}

/// Read `length` bytes starting at `register`
pub fn run_read(
    dev: &Ch341Device,
    address: u32,
    register: u8,
    length: usize,
    speed: Option<I2cSpeed>,
) -> Result<(), Box<dyn std::error::Error>> {
    apply_speed(dev, speed)?;
    let data = dev.i2c_read(address, register, length)?;
    print!("{}", super::hex_dump(register as u32, &data));
    Ok(())
}

/// Write hex bytes starting at `register`
pub fn run_write(
    dev: &Ch341Device,
    address: u32,
    register: u8,
    data: &[String],
    speed: Option<I2cSpeed>,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = parse_hex_bytes(&data.join(" "))?;
    apply_speed(dev, speed)?;
    dev.i2c_write(address, register, &bytes)?;
    println!(
        "Wrote {} byte(s) to 0x{:02X} register 0x{:02X}",
        bytes.len(),
        address,
        register
    );
    Ok(())
}

/// Render scan results like `i2cdetect`: 8 rows of 16 addresses
///
/// Acknowledged addresses print as their hex value, others as `--`. Address
/// 0x7F is never probed and prints blank.
pub fn format_scan_grid(found: &[u8]) -> String {
    let mut out = String::from("     0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f\n");
    for row in 0..8u8 {
        out.push_str(&format!("{:02x}:", row * 16));
        for col in 0..16u8 {
            let addr = row * 16 + col;
            if addr == 0x7F {
                out.push_str("   ");
            } else if found.contains(&addr) {
                out.push_str(&format!(" {:02x}", addr));
            } else {
                out.push_str(" --");
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_grid() {
        let grid = format_scan_grid(&[0x50, 0x68]);
        let lines: Vec<&str> = grid.lines().collect();
        assert_eq!(lines.len(), 9);
        assert!(lines[6].starts_with("50: 50 --"));
        assert!(lines[7].starts_with("60: -- -- -- -- -- -- -- -- 68"));
        assert!(lines[8].ends_with("--   "));
    }
}
