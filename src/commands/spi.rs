//! SPI command implementation

use crate::cli::parse_hex_bytes;
use rch341_core::{BitOrder, Ch341Device, ChipSelect, SpiConfig};

/// Build the exchange configuration from command-line flags
pub fn spi_config(
    cs: u32,
    no_cs: bool,
    lsb_first: bool,
) -> Result<SpiConfig, Box<dyn std::error::Error>> {
    let chip_select = if no_cs {
        None
    } else {
        Some(ChipSelect::from_index(cs)?)
    };
    let bit_order = if lsb_first {
        BitOrder::LsbFirst
    } else {
        BitOrder::MsbFirst
    };
    Ok(SpiConfig {
        chip_select,
        bit_order,
    })
}

/// Send hex bytes and print what came back
pub fn run_spi(
    dev: &Ch341Device,
    data: &[String],
    cs: u32,
    no_cs: bool,
    lsb_first: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let tx = parse_hex_bytes(&data.join(" "))?;
    let config = spi_config(cs, no_cs, lsb_first)?;
    log::debug!("SPI exchange of {} byte(s), {:?}", tx.len(), config);

    let rx = dev.spi_transfer(&config, &tx)?;
    print!("{}", super::hex_dump(0, &rx));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spi_config() {
        let cfg = spi_config(1, false, true).unwrap();
        assert_eq!(cfg.chip_select, Some(ChipSelect::D1));
        assert_eq!(cfg.bit_order, BitOrder::LsbFirst);
        assert_eq!(cfg.chip_select_byte(), 0x81);

        let cfg = spi_config(0, true, false).unwrap();
        assert_eq!(cfg.chip_select, None);
        assert_eq!(cfg.chip_select_byte(), 0);

        assert!(spi_config(3, false, false).is_err());
    }
}
