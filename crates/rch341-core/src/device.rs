//! CH341 device handle
//!
//! [`Ch341Context`] wraps a driver (the vendor DLL or a simulator). Claimed
//! device slots are tracked per driver instance, process-wide, so every
//! context over the same driver sees the same claims. [`Ch341Device`] is the
//! handle returned by [`Ch341Context::open`]: it forwards calls to the driver,
//! validates arguments beforehand and translates the raw results afterwards.
//!
//! Each handle carries its own mutex, held for the whole of every call, so a
//! handle can be shared between threads without interleaving native calls on
//! the same device. The guard is released on every exit path, including
//! native failures.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use once_cell::sync::{Lazy, OnceCell};

use crate::dll::{Ch341Dll, LibrarySource};
use crate::driver::{Ch341Driver, INVALID_HANDLE_VALUE};
use crate::error::{Ch341Error, Result};
use crate::protocol::{self, CH341_PACKET_LENGTH};
use crate::types::*;

/// Process-wide context over the vendor DLL, created on first use
static NATIVE: OnceCell<Ch341Context> = OnceCell::new();

/// Claimed slots per driver instance, keyed by the driver's address
///
/// Every open handle keeps its driver alive, so a key cannot be reused by
/// another driver while it still has claims.
static CLAIMS: Lazy<Mutex<HashMap<usize, HashSet<u32>>>> = Lazy::new(Default::default);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock leaves no partial native state behind
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn driver_key(driver: &Arc<dyn Ch341Driver>) -> usize {
    Arc::as_ptr(driver) as *const () as usize
}

/// Claim `index` on the driver behind `key`; false if already claimed
fn claim(key: usize, index: u32) -> bool {
    lock(&CLAIMS).entry(key).or_default().insert(index)
}

fn release(key: usize, index: u32) {
    let mut claims = lock(&CLAIMS);
    if let Some(slots) = claims.get_mut(&key) {
        slots.remove(&index);
        if slots.is_empty() {
            claims.remove(&key);
        }
    }
}

fn claimed(key: usize) -> Vec<u32> {
    let mut slots: Vec<u32> = lock(&CLAIMS)
        .get(&key)
        .map(|slots| slots.iter().copied().collect())
        .unwrap_or_default();
    slots.sort_unstable();
    slots
}

/// Options applied when opening a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Issue `CH341ResetDevice` right after opening
    pub reset: bool,
    /// Ask the driver for exclusive access (`CH341SetExclusive`)
    pub exclusive: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            reset: true,
            exclusive: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Entry point: a driver and the device slots claimed on it
///
/// Contexts created over clones of the same `Arc` share their claims.
#[derive(Clone)]
pub struct Ch341Context {
    driver: Arc<dyn Ch341Driver>,
}

impl Ch341Context {
    /// Wrap an arbitrary driver implementation
    pub fn new(driver: Arc<dyn Ch341Driver>) -> Self {
        Self { driver }
    }

    /// Context over the vendor DLL at its platform default location
    pub fn native() -> Result<Self> {
        Self::native_from(&LibrarySource::Default)
    }

    /// Context over the vendor DLL
    ///
    /// The library is loaded on the first call and shared by every later
    /// call in the process; `source` only matters the first time. It is
    /// never unloaded.
    pub fn native_from(source: &LibrarySource) -> Result<Self> {
        let ctx = NATIVE.get_or_try_init(|| {
            let dll = Ch341Dll::load(source)?;
            Ok::<_, Ch341Error>(Self::new(Arc::new(dll)))
        })?;
        Ok(ctx.clone())
    }

    /// Version of the loaded driver library
    pub fn dll_version(&self) -> u32 {
        self.driver.get_version()
    }

    /// Version of the kernel driver behind the library
    pub fn driver_version(&self) -> Result<u32> {
        match self.driver.get_drv_version() {
            0 => Err(Ch341Error::Io {
                op: "CH341GetDrvVersion",
                index: None,
            }),
            v => Ok(v),
        }
    }

    /// Whether `index` is currently held by an open handle
    pub fn is_claimed(&self, index: u32) -> bool {
        lock(&CLAIMS)
            .get(&driver_key(&self.driver))
            .is_some_and(|slots| slots.contains(&index))
    }

    /// Open device slot `index` with default options
    pub fn open(&self, index: u32) -> Result<Ch341Device> {
        self.open_with(index, OpenOptions::default())
    }

    /// Open device slot `index`
    ///
    /// Fails with [`Ch341Error::DeviceBusy`] without touching the driver if
    /// another handle on the same driver holds the slot, and with
    /// [`Ch341Error::DeviceNotFound`] if the driver has no device there.
    pub fn open_with(&self, index: u32, options: OpenOptions) -> Result<Ch341Device> {
        let index = DeviceIndex::new(index)?.get();

        let key = driver_key(&self.driver);
        if !claim(key, index) {
            return Err(Ch341Error::DeviceBusy(index));
        }

        log::trace!("CH341OpenDevice({})", index);
        let handle = self.driver.open_device(index);
        if handle == INVALID_HANDLE_VALUE {
            release(key, index);
            return Err(Ch341Error::DeviceNotFound(index));
        }

        // From here on, dropping `device` closes the slot and drops the claim
        let device = Ch341Device {
            index,
            driver: Arc::clone(&self.driver),
            state: Mutex::new(HandleState::opened(handle)),
        };

        if options.reset {
            device.reset()?;
        }
        device.set_exclusive(options.exclusive)?;

        log::info!("Opened CH341 device {}", index);
        Ok(device)
    }
}

impl fmt::Debug for Ch341Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ch341Context")
            .field("claimed", &claimed(driver_key(&self.driver)))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Device handle
// ---------------------------------------------------------------------------

/// Mutable per-handle state, guarded by the handle mutex
#[derive(Debug)]
struct HandleState {
    open: bool,
    /// Opaque value from `CH341OpenDevice`, never interpreted
    handle: isize,
    /// Last mode written with `CH341SetStream`, unknown until first set
    stream: Option<StreamMode>,
    gpio_dir: GpioPins,
    gpio_out: GpioPins,
}

impl HandleState {
    fn opened(handle: isize) -> Self {
        Self {
            open: true,
            handle,
            stream: None,
            gpio_dir: GpioPins::empty(),
            gpio_out: GpioPins::empty(),
        }
    }
}

/// An open CH341 device slot
///
/// Valid from a successful [`Ch341Context::open`] until [`close`] (or drop).
/// After close every operation fails with [`Ch341Error::HandleClosed`] and
/// the driver is not called.
///
/// [`close`]: Ch341Device::close
pub struct Ch341Device {
    index: u32,
    driver: Arc<dyn Ch341Driver>,
    state: Mutex<HandleState>,
}

impl fmt::Debug for Ch341Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Ch341Device")
            .field("index", &self.index)
            .field("open", &state.open)
            .field("handle", &format_args!("0x{:X}", state.handle))
            .finish()
    }
}

impl Drop for Ch341Device {
    fn drop(&mut self) {
        self.close();
    }
}

impl Ch341Device {
    /// Device slot this handle was opened on
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Whether the handle is still open
    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Release the device slot
    ///
    /// Closing is idempotent: only the first call reaches
    /// `CH341CloseDevice`, later calls are deliberate no-ops. The vendor
    /// close cannot report failure, so neither can this.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        if !state.open {
            log::debug!("CH341 device {} already closed, ignoring", self.index);
            return;
        }

        log::trace!("CH341CloseDevice({})", self.index);
        self.driver.close_device(self.index);
        state.open = false;
        release(driver_key(&self.driver), self.index);
        log::info!("Closed CH341 device {}", self.index);
    }

    /// Lock the handle, failing if it has been closed
    fn session(&self) -> Result<MutexGuard<'_, HandleState>> {
        let state = lock(&self.state);
        if !state.open {
            return Err(Ch341Error::HandleClosed(self.index));
        }
        Ok(state)
    }

    fn check(&self, ok: bool, op: &'static str) -> Result<()> {
        if ok {
            Ok(())
        } else {
            log::debug!("{} failed on CH341 device {}", op, self.index);
            Err(Ch341Error::Io {
                op,
                index: Some(self.index),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Device control
    // -----------------------------------------------------------------------

    /// Reset the chip (`CH341ResetDevice`)
    ///
    /// Forgets the cached stream mode and GPIO state, since the chip
    /// returns to its power-on configuration.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.session()?;
        log::trace!("CH341ResetDevice({})", self.index);
        self.check(self.driver.reset_device(self.index), "CH341ResetDevice")?;
        state.stream = None;
        state.gpio_dir = GpioPins::empty();
        state.gpio_out = GpioPins::empty();
        Ok(())
    }

    /// Request or drop exclusive driver access (`CH341SetExclusive`)
    pub fn set_exclusive(&self, exclusive: bool) -> Result<()> {
        let _state = self.session()?;
        log::trace!("CH341SetExclusive({}, {})", self.index, exclusive);
        self.check(
            self.driver.set_exclusive(self.index, exclusive),
            "CH341SetExclusive",
        )
    }

    /// Chip revision (`CH341GetVerIC`)
    pub fn ic_version(&self) -> Result<IcVersion> {
        let _state = self.session()?;
        match self.driver.get_ver_ic(self.index) {
            0 => Err(Ch341Error::Io {
                op: "CH341GetVerIC",
                index: Some(self.index),
            }),
            raw => Ok(IcVersion::from_raw(raw)),
        }
    }

    /// Device path as reported by the driver (`CH341GetDeviceName`)
    pub fn device_name(&self) -> Result<String> {
        let _state = self.session()?;
        self.driver
            .get_device_name(self.index)
            .ok_or(Ch341Error::Io {
                op: "CH341GetDeviceName",
                index: Some(self.index),
            })
    }

    fn apply_stream(&self, state: &mut HandleState, mode: StreamMode) -> Result<()> {
        if state.stream == Some(mode) {
            return Ok(());
        }
        log::trace!("CH341SetStream({}, 0x{:02X})", self.index, mode.bits());
        self.check(
            self.driver.set_stream(self.index, mode.bits()),
            "CH341SetStream",
        )?;
        log::debug!(
            "CH341 device {} stream mode 0x{:02X} (I2C {} kHz, SPI {:?})",
            self.index,
            mode.bits(),
            mode.i2c_speed().khz(),
            mode.bit_order()
        );
        state.stream = Some(mode);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // I2C
    // -----------------------------------------------------------------------

    /// Select the I2C clock, keeping the SPI bits of the stream mode
    pub fn i2c_set_speed(&self, speed: I2cSpeed) -> Result<()> {
        let mut state = self.session()?;
        let mode = state.stream.unwrap_or_default().with_i2c_speed(speed);
        self.apply_stream(&mut state, mode)
    }

    fn stream_i2c(&self, addr: I2cAddress, write: &[u8], read_len: usize) -> Result<Vec<u8>> {
        let mut frame = I2cFrame::from_slice(&[addr.write_byte()])?;
        frame.extend_from_slice(write)?;
        let mut read = I2cBuffer::zeroed(read_len)?;

        log::trace!(
            "CH341StreamI2C({}, addr={}, write={:02X?}, read_len={})",
            self.index,
            addr,
            write,
            read_len
        );
        self.check(
            self.driver
                .stream_i2c(self.index, frame.as_slice(), read.as_mut_slice()),
            "CH341StreamI2C",
        )?;
        Ok(read.to_vec())
    }

    /// One I2C transaction through `CH341StreamI2C`
    ///
    /// Writes `write` to the 7-bit `address`, then, if `read_len` is
    /// non-zero, reads `read_len` bytes after a repeated start. Any of the
    /// write-only, read-only and combined shapes is a single native call; an
    /// empty write with a zero read only addresses the target.
    pub fn i2c_transfer(&self, address: u32, write: &[u8], read_len: usize) -> Result<Vec<u8>> {
        let _state = self.session()?;
        let addr = I2cAddress::new(address)?;
        if write.len() > MAX_I2C_TRANSFER || read_len > MAX_I2C_TRANSFER {
            return Err(Ch341Error::InvalidArgument(format!(
                "I2C transfer of {} out / {} in bytes exceeds {} byte limit",
                write.len(),
                read_len,
                MAX_I2C_TRANSFER
            )));
        }
        self.stream_i2c(addr, write, read_len)
    }

    /// Read `len` bytes from register `reg` of `address`
    pub fn i2c_read(&self, address: u32, reg: u8, len: usize) -> Result<Vec<u8>> {
        self.i2c_transfer(address, &[reg], len)
    }

    /// Write `data` to register `reg` of `address`
    pub fn i2c_write(&self, address: u32, reg: u8, data: &[u8]) -> Result<()> {
        let _state = self.session()?;
        let addr = I2cAddress::new(address)?;
        let mut payload = I2cBuffer::from_slice(&[reg])?;
        payload.extend_from_slice(data)?;
        self.stream_i2c(addr, payload.as_slice(), 0).map(|_| ())
    }

    /// Read one register byte (`CH341ReadI2C`)
    pub fn i2c_read_byte(&self, address: u32, reg: u8) -> Result<u8> {
        let _state = self.session()?;
        let addr = I2cAddress::new(address)?;
        let mut out = 0u8;
        log::trace!("CH341ReadI2C({}, {}, 0x{:02X})", self.index, addr, reg);
        self.check(
            self.driver.read_i2c(self.index, addr.get(), reg, &mut out),
            "CH341ReadI2C",
        )?;
        Ok(out)
    }

    /// Write one register byte (`CH341WriteI2C`)
    pub fn i2c_write_byte(&self, address: u32, reg: u8, byte: u8) -> Result<()> {
        let _state = self.session()?;
        let addr = I2cAddress::new(address)?;
        log::trace!(
            "CH341WriteI2C({}, {}, 0x{:02X}, 0x{:02X})",
            self.index,
            addr,
            reg,
            byte
        );
        self.check(
            self.driver.write_i2c(self.index, addr.get(), reg, byte),
            "CH341WriteI2C",
        )
    }

    fn write_command(&self, packet: &[u8]) -> Result<()> {
        let mut written = 0u32;
        let ok = self.driver.write_data(self.index, packet, &mut written);
        self.check(ok && written as usize == packet.len(), "CH341WriteData")
    }

    fn out_byte_check_ack(&self, byte: u8) -> Result<bool> {
        let packet = protocol::out_byte_check_ack_packet(byte);
        let mut response = [0u8; CH341_PACKET_LENGTH];
        let mut len = 0u32;
        let ok = self.driver.write_read(
            self.index,
            &packet,
            CH341_PACKET_LENGTH as u32,
            1,
            &mut response,
            &mut len,
        );
        self.check(ok, "CH341WriteRead")?;

        let len = (len as usize).min(response.len());
        protocol::parse_ack(&response[..len]).ok_or(Ch341Error::Io {
            op: "CH341WriteRead",
            index: Some(self.index),
        })
    }

    fn probe(&self, addr: I2cAddress) -> Result<bool> {
        self.write_command(&protocol::start_packet())?;
        let ack = self.out_byte_check_ack(addr.write_byte());
        // Always try to release the bus, but report the first failure
        let stop = self.write_command(&protocol::stop_packet());
        let ack = ack?;
        stop?;
        Ok(ack)
    }

    /// Check whether a target acknowledges `address`
    pub fn i2c_probe(&self, address: u32) -> Result<bool> {
        let _state = self.session()?;
        let addr = I2cAddress::new(address)?;
        self.probe(addr)
    }

    /// Probe every address from 0x00 to 0x7E and return the ones that ACK
    pub fn i2c_scan(&self) -> Result<Vec<u8>> {
        let _state = self.session()?;
        let mut found = Vec::new();
        for raw in 0..I2C_ADDRESS_MAX {
            let addr = I2cAddress::new(raw as u32)?;
            if self.probe(addr)? {
                log::debug!("I2C target at {}", addr);
                found.push(raw);
            }
        }
        log::info!(
            "I2C scan on CH341 device {} found {} target(s)",
            self.index,
            found.len()
        );
        Ok(found)
    }

    // -----------------------------------------------------------------------
    // EEPROM
    // -----------------------------------------------------------------------

    /// Read `len` bytes at `addr` from a 24Cxx EEPROM (`CH341ReadEEPROM`)
    pub fn eeprom_read(&self, eeprom: EepromType, addr: u32, len: usize) -> Result<Vec<u8>> {
        let _state = self.session()?;
        eeprom.check_range(addr, len)?;
        let mut buf = vec![0u8; len];
        log::trace!(
            "CH341ReadEEPROM({}, {}, 0x{:X}, {})",
            self.index,
            eeprom,
            addr,
            len
        );
        self.check(
            self.driver
                .read_eeprom(self.index, eeprom.id(), addr, &mut buf),
            "CH341ReadEEPROM",
        )?;
        Ok(buf)
    }

    /// Write `data` at `addr` to a 24Cxx EEPROM (`CH341WriteEEPROM`)
    pub fn eeprom_write(&self, eeprom: EepromType, addr: u32, data: &[u8]) -> Result<()> {
        let _state = self.session()?;
        eeprom.check_range(addr, data.len())?;
        log::trace!(
            "CH341WriteEEPROM({}, {}, 0x{:X}, {})",
            self.index,
            eeprom,
            addr,
            data.len()
        );
        self.check(
            self.driver.write_eeprom(self.index, eeprom.id(), addr, data),
            "CH341WriteEEPROM",
        )
    }

    // -----------------------------------------------------------------------
    // SPI
    // -----------------------------------------------------------------------

    /// Full-duplex SPI exchange (`CH341StreamSPI4`)
    ///
    /// Returns exactly as many bytes as were written. An empty write returns
    /// an empty read without a native call.
    pub fn spi_transfer(&self, config: &SpiConfig, write: &[u8]) -> Result<Vec<u8>> {
        let mut state = self.session()?;
        if write.is_empty() {
            return Ok(Vec::new());
        }
        let mut buf = SpiBuffer::from_slice(write)?;

        let mode = state
            .stream
            .unwrap_or_default()
            .with_bit_order(config.bit_order);
        self.apply_stream(&mut state, mode)?;

        log::trace!(
            "CH341StreamSPI4({}, cs=0x{:02X}, {} bytes)",
            self.index,
            config.chip_select_byte(),
            buf.len()
        );
        self.check(
            self.driver
                .stream_spi4(self.index, config.chip_select_byte(), buf.as_mut_slice()),
            "CH341StreamSPI4",
        )?;
        Ok(buf.to_vec())
    }

    // -----------------------------------------------------------------------
    // GPIO
    // -----------------------------------------------------------------------

    /// Drive the pins in `pin_mask` to the levels in `value_mask`
    ///
    /// Pins in `pin_mask` become outputs; other pins keep their direction and
    /// level. Bits of `value_mask` outside `pin_mask` are ignored. Both masks
    /// must lie within D5-D0.
    pub fn gpio_set(&self, pin_mask: u32, value_mask: u32) -> Result<()> {
        let mut state = self.session()?;
        let pins = GpioPins::from_mask(pin_mask)?;
        let value = GpioPins::from_mask(value_mask)?;

        let dir = state.gpio_dir | pins;
        let out = state.gpio_out.difference(pins) | (value & pins);

        log::trace!(
            "CH341Set_D5_D0({}, dir=0x{:02X}, out=0x{:02X})",
            self.index,
            dir.bits(),
            out.bits()
        );
        self.check(
            self.driver
                .set_d5_d0(self.index, dir.bits() as u32, out.bits() as u32),
            "CH341Set_D5_D0",
        )?;
        state.gpio_dir = dir;
        state.gpio_out = out;
        Ok(())
    }

    fn read_input(&self) -> Result<u32> {
        let mut status = 0u32;
        self.check(
            self.driver.get_input(self.index, &mut status),
            "CH341GetInput",
        )?;
        log::trace!("CH341GetInput({}) = 0x{:08X}", self.index, status);
        Ok(status)
    }

    /// Levels of the pins in `pin_mask` (D5-D0)
    pub fn gpio_get(&self, pin_mask: u32) -> Result<u32> {
        let _state = self.session()?;
        let pins = GpioPins::from_mask(pin_mask)?;
        Ok(self.read_input()? & pins.bits() as u32)
    }

    /// Raw `CH341GetInput` status word
    ///
    /// Bits 7-0 are D7-D0, bit 8 ERR#, bit 9 PEMP, bit 10 INT#, bit 11 SLCT,
    /// bit 13 BUSY, bit 14 AUTOFD#, bit 15 SLCTIN#, bit 23 SDA.
    pub fn input_status(&self) -> Result<u32> {
        let _state = self.session()?;
        self.read_input()
    }
}
