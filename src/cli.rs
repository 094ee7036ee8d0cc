//! CLI argument parsing

use clap::{Parser, Subcommand};
use rch341_core::{EepromType, I2cSpeed};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
pub fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a single byte, hex or decimal
fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let v = parse_hex_u32(s)?;
    u8::try_from(v).map_err(|_| format!("Value {} does not fit in a byte", v))
}

/// Parse a byte string such as `de ad be ef`, `0xde,0xad` or `deadbeef`
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, String> {
    let digits: String = s
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|part| {
            part.strip_prefix("0x")
                .or_else(|| part.strip_prefix("0X"))
                .unwrap_or(part)
        })
        .collect();
    if digits.len() % 2 != 0 {
        return Err(format!("Odd number of hex digits in '{}'", s));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("Invalid hex byte at offset {} in '{}'", i, s))
        })
        .collect()
}

fn parse_eeprom_type(s: &str) -> Result<EepromType, String> {
    s.parse::<EepromType>().map_err(|e| e.to_string())
}

fn parse_i2c_speed(s: &str) -> Result<I2cSpeed, String> {
    s.parse::<I2cSpeed>().map_err(|e| e.to_string())
}

#[derive(Parser)]
#[command(name = "rch341")]
#[command(author, version, about = "CH341 USB bridge tool", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the vendor driver library (CH341DLL.DLL / CH341DLLA64.DLL)
    #[arg(long, env = "RCH341_LIBRARY", global = true)]
    pub library: Option<PathBuf>,

    /// Use the simulated driver instead of the vendor library
    #[cfg(feature = "sim")]
    #[arg(long, global = true)]
    pub sim: bool,

    /// Device index (0-15)
    #[arg(short, long, default_value = "0", global = true)]
    pub device: u32,

    /// Request exclusive access to the device
    #[arg(long, global = true)]
    pub exclusive: bool,

    /// Skip the chip reset after opening
    #[arg(long, global = true)]
    pub no_reset: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show library, driver and chip versions
    Info,

    /// Scan the I2C bus for devices that acknowledge
    I2cScan {
        /// I2C speed (20, 100, 400 or 750 kHz)
        #[arg(short, long, value_parser = parse_i2c_speed)]
        speed: Option<I2cSpeed>,
    },

    /// Read bytes from an I2C device register
    I2cRead {
        /// 7-bit device address (hex or decimal)
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Register to start reading from (hex or decimal)
        #[arg(value_parser = parse_hex_u8)]
        register: u8,

        /// Number of bytes to read
        #[arg(short = 'n', long, default_value = "1")]
        length: usize,

        /// I2C speed (20, 100, 400 or 750 kHz)
        #[arg(short, long, value_parser = parse_i2c_speed)]
        speed: Option<I2cSpeed>,
    },

    /// Write bytes to an I2C device register
    I2cWrite {
        /// 7-bit device address (hex or decimal)
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Register to write to (hex or decimal)
        #[arg(value_parser = parse_hex_u8)]
        register: u8,

        /// Data bytes in hex, e.g. de ad be ef
        #[arg(required = true)]
        data: Vec<String>,

        /// I2C speed (20, 100, 400 or 750 kHz)
        #[arg(short, long, value_parser = parse_i2c_speed)]
        speed: Option<I2cSpeed>,
    },

    /// Read a 24Cxx EEPROM
    EepromRead {
        /// EEPROM type, e.g. 24C02 or 24C256
        #[arg(short = 't', long = "type", value_parser = parse_eeprom_type)]
        eeprom: EepromType,

        /// Output file path (hex dump to stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Start address (hex or decimal)
        #[arg(long, default_value = "0", value_parser = parse_hex_u32)]
        start: u32,

        /// Number of bytes (defaults to the rest of the part)
        #[arg(long, value_parser = parse_hex_u32)]
        length: Option<u32>,
    },

    /// Write a file to a 24Cxx EEPROM
    EepromWrite {
        /// EEPROM type, e.g. 24C02 or 24C256
        #[arg(short = 't', long = "type", value_parser = parse_eeprom_type)]
        eeprom: EepromType,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Start address (hex or decimal)
        #[arg(long, default_value = "0", value_parser = parse_hex_u32)]
        start: u32,

        /// Read back and compare after writing
        #[arg(long)]
        verify: bool,
    },

    /// Full-duplex SPI exchange
    Spi {
        /// Bytes to send in hex, e.g. 9f 00 00 00
        #[arg(required = true)]
        data: Vec<String>,

        /// Chip select pin (0-2)
        #[arg(long, default_value = "0")]
        cs: u32,

        /// Leave all chip selects inactive
        #[arg(long, conflicts_with = "cs")]
        no_cs: bool,

        /// Send least significant bit first
        #[arg(long)]
        lsb_first: bool,
    },

    /// Drive GPIO pins D0-D5
    GpioSet {
        /// Pins to drive, as a bit mask (hex or decimal)
        #[arg(value_parser = parse_hex_u32)]
        pins: u32,

        /// Levels for those pins, as a bit mask (hex or decimal)
        #[arg(value_parser = parse_hex_u32)]
        values: u32,
    },

    /// Read GPIO pin levels
    GpioGet {
        /// Pins to read, as a bit mask (defaults to D0-D5)
        #[arg(value_parser = parse_hex_u32, default_value = "0x3F")]
        pins: u32,

        /// Print the raw input status word as well
        #[arg(long)]
        raw: bool,
    },

    /// Start the Scheme REPL for scripting CH341 devices
    #[cfg(feature = "repl")]
    Repl {
        /// Run a script file instead of the interactive REPL
        #[arg(short, long)]
        script: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_hex_u32() {
        assert_eq!(parse_hex_u32("0x68").unwrap(), 0x68);
        assert_eq!(parse_hex_u32("104").unwrap(), 104);
        assert!(parse_hex_u32("0xZZ").is_err());
    }

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("de ad be ef").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(parse_hex_bytes("0x9f,0x00").unwrap(), vec![0x9F, 0x00]);
        assert_eq!(parse_hex_bytes("CAFE").unwrap(), vec![0xCA, 0xFE]);
        assert!(parse_hex_bytes("abc").is_err());
        assert!(parse_hex_bytes("zz").is_err());
    }

    #[test]
    fn test_parse_hex_u8() {
        assert_eq!(parse_hex_u8("0x75").unwrap(), 0x75);
        assert!(parse_hex_u8("256").is_err());
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_i2c_read() {
        let cli = Cli::try_parse_from(["rch341", "i2c-read", "0x68", "0x75", "-n", "2"]).unwrap();
        match cli.command {
            Commands::I2cRead {
                address,
                register,
                length,
                ..
            } => {
                assert_eq!(address, 0x68);
                assert_eq!(register, 0x75);
                assert_eq!(length, 2);
            }
            _ => panic!("wrong subcommand"),
        }
    }
}
