//! GPIO command implementations

use rch341_core::Ch341Device;

/// Drive `pins` to the levels in `values`
pub fn run_set(
    dev: &Ch341Device,
    pins: u32,
    values: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    dev.gpio_set(pins, values)?;
    println!("Set pins 0x{:02X} to 0x{:02X}", pins, values & pins);
    Ok(())
}

/// Print the level of every pin in `pins`
pub fn run_get(dev: &Ch341Device, pins: u32, raw: bool) -> Result<(), Box<dyn std::error::Error>> {
    let levels = dev.gpio_get(pins)?;
    print!("{}", format_levels(pins, levels));
    println!("Mask: 0x{:02X}", levels);
    if raw {
        println!("Raw input status: 0x{:08X}", dev.input_status()?);
    }
    Ok(())
}

/// One `Dn: level` line per selected pin
pub fn format_levels(pins: u32, levels: u32) -> String {
    (0..6)
        .filter(|bit| pins & (1 << bit) != 0)
        .map(|bit| {
            let level = if levels & (1 << bit) != 0 { "high" } else { "low" };
            format!("D{}: {}\n", bit, level)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_levels() {
        assert_eq!(format_levels(0x05, 0x04), "D0: low\nD2: high\n");
        assert_eq!(format_levels(0x3F, 0x3F).lines().count(), 6);
        assert!(format_levels(0, 0x3F).is_empty());
    }
}
