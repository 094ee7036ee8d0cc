//! Boundary value types
//!
//! Host values are converted into these before anything is forwarded to the
//! native library. Each conversion validates against the range the vendor
//! driver documents and fails with [`Ch341Error::InvalidArgument`] instead of
//! truncating.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

use crate::error::{Ch341Error, Result};

/// Number of device slots the vendor driver manages (`mCH341_MAX_NUMBER`)
pub const CH341_MAX_DEVICES: u32 = 16;

/// Largest I2C payload accepted in one call, in either direction
pub const MAX_I2C_TRANSFER: usize = 4096;

/// Largest SPI exchange accepted in one call
pub const MAX_SPI_TRANSFER: usize = 4096;

/// Highest valid 7-bit I2C address
pub const I2C_ADDRESS_MAX: u8 = 0x7F;

// ---------------------------------------------------------------------------
// Transfer buffers
// ---------------------------------------------------------------------------

/// Fixed-capacity byte buffer handed to a single native call
///
/// Buffers are built by the caller, lent to the native library for the
/// duration of one call, and not retained afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBuffer<const N: usize> {
    data: heapless::Vec<u8, N>,
}

impl<const N: usize> TransferBuffer<N> {
    /// Empty buffer
    pub fn new() -> Self {
        Self {
            data: heapless::Vec::new(),
        }
    }

    /// Copy `bytes` into a new buffer
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let data = heapless::Vec::from_slice(bytes).map_err(|_| {
            Ch341Error::invalid(format!(
                "buffer of {} bytes exceeds capacity of {}",
                bytes.len(),
                N
            ))
        })?;
        Ok(Self { data })
    }

    /// Zero-filled buffer of `len` bytes, used as a read target
    pub fn zeroed(len: usize) -> Result<Self> {
        let mut buf = Self::new();
        buf.data.resize(len, 0).map_err(|_| {
            Ch341Error::invalid(format!("length {} exceeds capacity of {}", len, N))
        })?;
        Ok(buf)
    }

    /// Append bytes, failing if the buffer would overflow
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<()> {
        self.data.extend_from_slice(bytes).map_err(|_| {
            Ch341Error::invalid(format!(
                "appending {} bytes to {} overflows capacity of {}",
                bytes.len(),
                self.data.len(),
                N
            ))
        })
    }

    /// Number of bytes held
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Contents as a slice
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Contents as a mutable slice
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy out into a host-owned vector
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl<const N: usize> Default for TransferBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Write frame for `CH341StreamI2C`: address byte plus payload
pub type I2cFrame = TransferBuffer<{ MAX_I2C_TRANSFER + 1 }>;

/// Read target for I2C transfers
pub type I2cBuffer = TransferBuffer<MAX_I2C_TRANSFER>;

/// In-place exchange buffer for `CH341StreamSPI4`
pub type SpiBuffer = TransferBuffer<MAX_SPI_TRANSFER>;

// ---------------------------------------------------------------------------
// Integer wrappers
// ---------------------------------------------------------------------------

/// Validated device slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceIndex(u32);

impl DeviceIndex {
    /// Validate a slot index against [`CH341_MAX_DEVICES`]
    pub fn new(index: u32) -> Result<Self> {
        if index >= CH341_MAX_DEVICES {
            return Err(Ch341Error::invalid(format!(
                "device index {} out of range (0-{})",
                index,
                CH341_MAX_DEVICES - 1
            )));
        }
        Ok(Self(index))
    }

    /// Raw index as passed to the native library
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Validated 7-bit I2C device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct I2cAddress(u8);

impl I2cAddress {
    /// Validate a 7-bit address
    pub fn new(addr: u32) -> Result<Self> {
        if addr > I2C_ADDRESS_MAX as u32 {
            return Err(Ch341Error::invalid(format!(
                "I2C address 0x{:02X} is not a 7-bit address",
                addr
            )));
        }
        Ok(Self(addr as u8))
    }

    /// The 7-bit address
    pub fn get(self) -> u8 {
        self.0
    }

    /// Address byte with the R/W bit cleared (write)
    pub fn write_byte(self) -> u8 {
        self.0 << 1
    }
}

impl fmt::Display for I2cAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

bitflags! {
    /// Output-capable GPIO pins D5-D0
    ///
    /// These are the pins `CH341Set_D5_D0` can drive. Reading uses the same
    /// bit positions in the `CH341GetInput` status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GpioPins: u8 {
        const D0 = 1 << 0;
        const D1 = 1 << 1;
        const D2 = 1 << 2;
        const D3 = 1 << 3;
        const D4 = 1 << 4;
        const D5 = 1 << 5;
    }
}

impl GpioPins {
    /// Validate a host pin mask
    pub fn from_mask(mask: u32) -> Result<Self> {
        u8::try_from(mask)
            .ok()
            .and_then(Self::from_bits)
            .ok_or_else(|| {
                Ch341Error::invalid(format!(
                    "pin mask 0x{:X} references pins outside D5-D0 (0x{:02X})",
                    mask,
                    Self::all().bits()
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Bus configuration
// ---------------------------------------------------------------------------

/// I2C clock selection, bits 1-0 of the `CH341SetStream` mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum I2cSpeed {
    /// 20 kHz
    Low,
    /// 100 kHz
    #[default]
    Standard,
    /// 400 kHz
    Fast,
    /// 750 kHz
    High,
}

impl I2cSpeed {
    /// All speeds in mode-bit order
    pub const ALL: [I2cSpeed; 4] = [
        I2cSpeed::Low,
        I2cSpeed::Standard,
        I2cSpeed::Fast,
        I2cSpeed::High,
    ];

    /// Map the vendor's 0-3 speed index
    pub fn from_index(index: u32) -> Result<Self> {
        Self::ALL.get(index as usize).copied().ok_or_else(|| {
            Ch341Error::invalid(format!("I2C speed {} out of range (0-3)", index))
        })
    }

    /// Vendor speed index
    pub fn index(self) -> u32 {
        match self {
            I2cSpeed::Low => 0,
            I2cSpeed::Standard => 1,
            I2cSpeed::Fast => 2,
            I2cSpeed::High => 3,
        }
    }

    /// Nominal clock in kHz
    pub fn khz(self) -> u32 {
        match self {
            I2cSpeed::Low => 20,
            I2cSpeed::Standard => 100,
            I2cSpeed::Fast => 400,
            I2cSpeed::High => 750,
        }
    }
}

impl FromStr for I2cSpeed {
    type Err = Ch341Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().trim_end_matches("khz") {
            "0" | "20" | "low" => Ok(I2cSpeed::Low),
            "1" | "100" | "standard" => Ok(I2cSpeed::Standard),
            "2" | "400" | "fast" => Ok(I2cSpeed::Fast),
            "3" | "750" | "high" => Ok(I2cSpeed::High),
            other => Err(Ch341Error::invalid(format!("unknown I2C speed '{}'", other))),
        }
    }
}

/// Bit order on the SPI wire, bit 7 of the `CH341SetStream` mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BitOrder {
    /// Most significant bit first
    #[default]
    MsbFirst,
    /// Least significant bit first
    LsbFirst,
}

/// Chip-select line driven during an SPI exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipSelect {
    D0,
    D1,
    D2,
}

impl ChipSelect {
    /// Map a 0-2 pin number
    pub fn from_index(index: u32) -> Result<Self> {
        match index {
            0 => Ok(ChipSelect::D0),
            1 => Ok(ChipSelect::D1),
            2 => Ok(ChipSelect::D2),
            _ => Err(Ch341Error::invalid(format!(
                "chip select D{} out of range (D0-D2)",
                index
            ))),
        }
    }

    fn index(self) -> u32 {
        match self {
            ChipSelect::D0 => 0,
            ChipSelect::D1 => 1,
            ChipSelect::D2 => 2,
        }
    }
}

/// SPI exchange configuration
///
/// The CH341 only speaks SPI mode 0 at a fixed clock; chip select and bit
/// order are the only knobs the vendor interface exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpiConfig {
    /// Chip select to assert, or `None` to leave all CS lines alone
    pub chip_select: Option<ChipSelect>,
    /// Wire bit order
    pub bit_order: BitOrder,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            chip_select: Some(ChipSelect::D0),
            bit_order: BitOrder::MsbFirst,
        }
    }
}

impl SpiConfig {
    /// Chip-select argument for `CH341StreamSPI4`: bit 7 enables, bits 1-0 pick the pin
    pub fn chip_select_byte(&self) -> u32 {
        match self.chip_select {
            Some(cs) => 0x80 | cs.index(),
            None => 0,
        }
    }
}

/// Mode word for `CH341SetStream`
///
/// Bits 1-0 carry the I2C speed, bit 2 selects dual SPI I/O (unused here),
/// bit 7 selects MSB-first SPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamMode(u32);

const STREAM_I2C_SPEED_MASK: u32 = 0x03;
const STREAM_SPI_MSB_FIRST: u32 = 0x80;

impl Default for StreamMode {
    fn default() -> Self {
        StreamMode::from_parts(I2cSpeed::default(), BitOrder::default())
    }
}

impl StreamMode {
    /// Combine an I2C speed and SPI bit order
    pub fn from_parts(speed: I2cSpeed, order: BitOrder) -> Self {
        StreamMode(speed.index()).with_bit_order(order)
    }

    /// Replace the I2C speed bits
    pub fn with_i2c_speed(self, speed: I2cSpeed) -> Self {
        StreamMode((self.0 & !STREAM_I2C_SPEED_MASK) | speed.index())
    }

    /// Replace the SPI bit order bit
    pub fn with_bit_order(self, order: BitOrder) -> Self {
        match order {
            BitOrder::MsbFirst => StreamMode(self.0 | STREAM_SPI_MSB_FIRST),
            BitOrder::LsbFirst => StreamMode(self.0 & !STREAM_SPI_MSB_FIRST),
        }
    }

    /// I2C speed encoded in this mode
    pub fn i2c_speed(self) -> I2cSpeed {
        I2cSpeed::ALL[(self.0 & STREAM_I2C_SPEED_MASK) as usize]
    }

    /// SPI bit order encoded in this mode
    pub fn bit_order(self) -> BitOrder {
        if self.0 & STREAM_SPI_MSB_FIRST != 0 {
            BitOrder::MsbFirst
        } else {
            BitOrder::LsbFirst
        }
    }

    /// Raw mode word
    pub fn bits(self) -> u32 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// EEPROM and chip identification
// ---------------------------------------------------------------------------

/// 24Cxx EEPROM families known to `CH341ReadEEPROM` / `CH341WriteEEPROM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EepromType {
    Eeprom24C01,
    Eeprom24C02,
    Eeprom24C04,
    Eeprom24C08,
    Eeprom24C16,
    Eeprom24C32,
    Eeprom24C64,
    Eeprom24C128,
    Eeprom24C256,
    Eeprom24C512,
    Eeprom24C1024,
    Eeprom24C2048,
    Eeprom24C4096,
}

impl EepromType {
    /// All types in native id order
    pub const ALL: [EepromType; 13] = [
        EepromType::Eeprom24C01,
        EepromType::Eeprom24C02,
        EepromType::Eeprom24C04,
        EepromType::Eeprom24C08,
        EepromType::Eeprom24C16,
        EepromType::Eeprom24C32,
        EepromType::Eeprom24C64,
        EepromType::Eeprom24C128,
        EepromType::Eeprom24C256,
        EepromType::Eeprom24C512,
        EepromType::Eeprom24C1024,
        EepromType::Eeprom24C2048,
        EepromType::Eeprom24C4096,
    ];

    /// Look up by native `EEPROM_TYPE` id
    pub fn from_id(id: u32) -> Result<Self> {
        Self::ALL
            .get(id as usize)
            .copied()
            .ok_or_else(|| Ch341Error::invalid(format!("unknown EEPROM type id {}", id)))
    }

    /// Native `EEPROM_TYPE` id
    pub fn id(self) -> u32 {
        Self::ALL.iter().position(|&t| t == self).unwrap_or(0) as u32
    }

    /// Capacity in bytes (24C01 is 128 bytes, each step doubles)
    pub fn capacity(self) -> usize {
        128 << self.id()
    }

    /// Part name, e.g. `24C256`
    pub fn name(self) -> &'static str {
        match self {
            EepromType::Eeprom24C01 => "24C01",
            EepromType::Eeprom24C02 => "24C02",
            EepromType::Eeprom24C04 => "24C04",
            EepromType::Eeprom24C08 => "24C08",
            EepromType::Eeprom24C16 => "24C16",
            EepromType::Eeprom24C32 => "24C32",
            EepromType::Eeprom24C64 => "24C64",
            EepromType::Eeprom24C128 => "24C128",
            EepromType::Eeprom24C256 => "24C256",
            EepromType::Eeprom24C512 => "24C512",
            EepromType::Eeprom24C1024 => "24C1024",
            EepromType::Eeprom24C2048 => "24C2048",
            EepromType::Eeprom24C4096 => "24C4096",
        }
    }

    /// Check that `len` bytes starting at `addr` fit in the part
    pub fn check_range(self, addr: u32, len: usize) -> Result<()> {
        let end = (addr as usize).checked_add(len);
        match end {
            Some(end) if end <= self.capacity() => Ok(()),
            _ => Err(Ch341Error::invalid(format!(
                "{} bytes at 0x{:X} exceed {} capacity of {} bytes",
                len,
                addr,
                self.name(),
                self.capacity()
            ))),
        }
    }
}

impl fmt::Display for EepromType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EepromType {
    type Err = Ch341Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper
            .trim_start_matches("EEPROM_")
            .trim_start_matches("ID_");
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == name)
            .ok_or_else(|| Ch341Error::invalid(format!("unknown EEPROM type '{}'", s)))
    }
}

/// Chip revision reported by `CH341GetVerIC`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IcVersion {
    /// Original CH341
    Ch341,
    /// CH341A
    Ch341a,
    /// CH341A3
    Ch341a3,
    /// Revision this binding does not know about
    Unknown(u32),
}

/// `IC_VER_CH341A`
pub const IC_VER_CH341A: u32 = 0x20;
/// `IC_VER_CH341A3`
pub const IC_VER_CH341A3: u32 = 0x30;

impl IcVersion {
    /// Decode the raw revision
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x10 => IcVersion::Ch341,
            IC_VER_CH341A => IcVersion::Ch341a,
            IC_VER_CH341A3 => IcVersion::Ch341a3,
            other => IcVersion::Unknown(other),
        }
    }

    /// Raw revision value
    pub fn raw(self) -> u32 {
        match self {
            IcVersion::Ch341 => 0x10,
            IcVersion::Ch341a => IC_VER_CH341A,
            IcVersion::Ch341a3 => IC_VER_CH341A3,
            IcVersion::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for IcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcVersion::Ch341 => write!(f, "CH341"),
            IcVersion::Ch341a => write!(f, "CH341A"),
            IcVersion::Ch341a3 => write!(f, "CH341A3"),
            IcVersion::Unknown(raw) => write!(f, "unknown (0x{:02X})", raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_i2c_address_range() {
        assert_eq!(I2cAddress::new(0x68).unwrap().write_byte(), 0xD0);
        assert!(I2cAddress::new(0x7F).is_ok());
        let err = I2cAddress::new(0x80).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_gpio_mask_range() {
        assert_eq!(GpioPins::from_mask(0x3F).unwrap(), GpioPins::all());
        assert_eq!(
            GpioPins::from_mask(0x05).unwrap(),
            GpioPins::D0 | GpioPins::D2
        );
        assert!(GpioPins::from_mask(0x40).is_err());
        assert!(GpioPins::from_mask(0x100).is_err());
    }

    #[test]
    fn test_device_index_range() {
        assert_eq!(DeviceIndex::new(15).unwrap().get(), 15);
        assert!(DeviceIndex::new(16).is_err());
    }

    #[test]
    fn test_transfer_buffer_capacity() {
        let buf = TransferBuffer::<4>::from_slice(&[1, 2, 3, 4]).unwrap();
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
        assert!(TransferBuffer::<4>::from_slice(&[0; 5]).is_err());
        assert!(TransferBuffer::<4>::zeroed(5).is_err());

        let mut frame = TransferBuffer::<3>::from_slice(&[0xD0]).unwrap();
        frame.extend_from_slice(&[0x75, 0x00]).unwrap();
        assert_eq!(frame.len(), 3);
        assert!(frame.extend_from_slice(&[0x01]).is_err());
    }

    #[test]
    fn test_stream_mode_bits() {
        let mode = StreamMode::default();
        assert_eq!(mode.bits(), 0x81);

        let mode = mode.with_i2c_speed(I2cSpeed::High);
        assert_eq!(mode.bits(), 0x83);
        assert_eq!(mode.bit_order(), BitOrder::MsbFirst);

        let mode = mode.with_bit_order(BitOrder::LsbFirst);
        assert_eq!(mode.bits(), 0x03);
        assert_eq!(mode.i2c_speed(), I2cSpeed::High);
    }

    #[test]
    fn test_i2c_speed_parse() {
        assert_eq!("400kHz".parse::<I2cSpeed>().unwrap(), I2cSpeed::Fast);
        assert_eq!("0".parse::<I2cSpeed>().unwrap(), I2cSpeed::Low);
        assert!(I2cSpeed::from_index(4).is_err());
    }

    #[test]
    fn test_chip_select_byte() {
        let cfg = SpiConfig {
            chip_select: Some(ChipSelect::D2),
            bit_order: BitOrder::MsbFirst,
        };
        assert_eq!(cfg.chip_select_byte(), 0x82);
        let cfg = SpiConfig {
            chip_select: None,
            ..cfg
        };
        assert_eq!(cfg.chip_select_byte(), 0);
        assert!(ChipSelect::from_index(3).is_err());
    }

    #[test]
    fn test_eeprom_types() {
        assert_eq!(EepromType::Eeprom24C01.capacity(), 128);
        assert_eq!(EepromType::Eeprom24C256.capacity(), 32 * 1024);
        assert_eq!(EepromType::Eeprom24C4096.capacity(), 512 * 1024);
        assert_eq!(EepromType::Eeprom24C256.id(), 8);
        assert_eq!(
            "id_24c256".parse::<EepromType>().unwrap(),
            EepromType::Eeprom24C256
        );
        assert_eq!(
            "EEPROM_24C02".parse::<EepromType>().unwrap(),
            EepromType::Eeprom24C02
        );
        assert!(EepromType::Eeprom24C02.check_range(0xF0, 16).is_ok());
        assert!(EepromType::Eeprom24C02.check_range(0xF0, 17).is_err());
    }

    #[test]
    fn test_ic_version() {
        assert_eq!(IcVersion::from_raw(0x30), IcVersion::Ch341a3);
        assert_eq!(IcVersion::from_raw(0x42).raw(), 0x42);
        assert_eq!(IcVersion::Ch341a.to_string(), "CH341A");
    }
}
