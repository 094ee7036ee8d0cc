//! Native driver seam
//!
//! [`Ch341Driver`] mirrors the subset of `CH341DLL` exports this binding uses,
//! one method per export, in the same argument order. Pointers become slices
//! and out-parameters become `&mut`, but return values stay raw: `BOOL`
//! results come back as `bool` and handles as `isize`. Translating them into
//! [`crate::Ch341Error`] is the job of [`crate::Ch341Device`], so every
//! implementation (the real DLL, or a simulator) gets identical treatment.
//!
//! Implementations must be callable from any thread. Per-device
//! serialization is done by the caller.

/// `INVALID_HANDLE_VALUE` as returned by `CH341OpenDevice` on failure
pub const INVALID_HANDLE_VALUE: isize = -1;

/// The vendor driver's exported interface
pub trait Ch341Driver: Send + Sync {
    /// `CH341GetVersion`: DLL version
    fn get_version(&self) -> u32;

    /// `CH341GetDrvVersion`: kernel driver version, 0 on failure
    fn get_drv_version(&self) -> u32;

    /// `CH341OpenDevice`: open slot `index`
    ///
    /// Returns [`INVALID_HANDLE_VALUE`] when no device is present.
    fn open_device(&self, index: u32) -> isize;

    /// `CH341CloseDevice`
    fn close_device(&self, index: u32);

    /// `CH341ResetDevice`
    fn reset_device(&self, index: u32) -> bool;

    /// `CH341GetVerIC`: chip revision, 0 on failure
    fn get_ver_ic(&self, index: u32) -> u32;

    /// `CH341GetDeviceName`: device path, `None` for a null pointer
    fn get_device_name(&self, index: u32) -> Option<String>;

    /// `CH341SetExclusive`
    fn set_exclusive(&self, index: u32, exclusive: bool) -> bool;

    /// `CH341SetStream`: I2C speed and SPI mode word
    fn set_stream(&self, index: u32, mode: u32) -> bool;

    /// `CH341WriteData`: push raw command bytes
    ///
    /// `written` receives the number of bytes accepted.
    fn write_data(&self, index: u32, buf: &[u8], written: &mut u32) -> bool;

    /// `CH341WriteRead`: push command bytes, then collect `read_times`
    /// responses of up to `read_step` bytes each into `read`
    ///
    /// `read` must hold at least `read_step * read_times` bytes. `read_len`
    /// receives the number of bytes actually returned.
    fn write_read(
        &self,
        index: u32,
        write: &[u8],
        read_step: u32,
        read_times: u32,
        read: &mut [u8],
        read_len: &mut u32,
    ) -> bool;

    /// `CH341ReadI2C`: read one register of a 7-bit `device`
    fn read_i2c(&self, index: u32, device: u8, addr: u8, out: &mut u8) -> bool;

    /// `CH341WriteI2C`: write one register of a 7-bit `device`
    fn write_i2c(&self, index: u32, device: u8, addr: u8, byte: u8) -> bool;

    /// `CH341StreamI2C`: write `write` (address byte first), then read
    /// `read.len()` bytes after a repeated start
    fn stream_i2c(&self, index: u32, write: &[u8], read: &mut [u8]) -> bool;

    /// `CH341ReadEEPROM`
    fn read_eeprom(&self, index: u32, eeprom: u32, addr: u32, buf: &mut [u8]) -> bool;

    /// `CH341WriteEEPROM`
    fn write_eeprom(&self, index: u32, eeprom: u32, addr: u32, buf: &[u8]) -> bool;

    /// `CH341StreamSPI4`: full-duplex exchange in place
    fn stream_spi4(&self, index: u32, chip_select: u32, buf: &mut [u8]) -> bool;

    /// `CH341GetInput`: D7-D0 and status lines
    fn get_input(&self, index: u32, status: &mut u32) -> bool;

    /// `CH341Set_D5_D0`: direction and level of D5-D0
    fn set_d5_d0(&self, index: u32, dir_out: u32, data_out: u32) -> bool;
}
