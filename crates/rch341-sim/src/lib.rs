//! rch341-sim - In-memory CH341 driver for testing
//!
//! [`SimDriver`] implements [`Ch341Driver`] without any hardware. Each
//! simulated board has a small I2C bus with register-file peripherals, an
//! EEPROM behind the vendor EEPROM calls, SPI MOSI looped back to MISO and
//! GPIO outputs looped back to the input status word.
//!
//! Every trait call bumps a counter, so tests can assert that an operation
//! never reached the driver.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rch341_core::protocol::{
    CH341A_CMD_I2C_STM_END, CH341A_CMD_I2C_STM_OUT, CH341A_CMD_I2C_STM_STA,
    CH341A_CMD_I2C_STM_STO, CH341A_CMD_I2C_STREAM, I2C_ACK_NACK_BIT,
};
use rch341_core::{Ch341Driver, EepromType, CH341_MAX_DEVICES, IC_VER_CH341A3, INVALID_HANDLE_VALUE};

/// Default address of the simulated MPU6050
pub const MPU6050_ADDR: u8 = 0x68;
/// MPU6050 WHO_AM_I register
pub const MPU6050_WHO_AM_I: u8 = 0x75;
/// MPU6050 PWR_MGMT_1 register
pub const MPU6050_PWR_MGMT_1: u8 = 0x6B;
/// Default address of the simulated 24C02 on the I2C bus
pub const AT24_ADDR: u8 = 0x50;

/// SDA level in the `CH341GetInput` status word
const STATUS_SDA: u32 = 1 << 23;
/// D5-D0
const GPIO_OUTPUT_MASK: u32 = 0x3F;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Peripherals
// ---------------------------------------------------------------------------

/// Register-file I2C target
///
/// The first byte of a write selects the register, further bytes are stored
/// from there on. Reads continue from the current register. The pointer
/// wraps at the end of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimPeripheral {
    regs: Vec<u8>,
    pointer: usize,
}

impl SimPeripheral {
    /// `size` registers, all set to `fill`
    pub fn new(size: usize, fill: u8) -> Self {
        Self {
            regs: vec![fill; size.max(1)],
            pointer: 0,
        }
    }

    /// MPU6050-like sensor: WHO_AM_I reads 0x68, the chip starts asleep
    pub fn mpu6050() -> Self {
        Self::new(128, 0x00)
            .with_register(MPU6050_WHO_AM_I, 0x68)
            .with_register(MPU6050_PWR_MGMT_1, 0x40)
    }

    /// Erased 256-byte 24C02
    pub fn at24c02() -> Self {
        Self::new(256, 0xFF)
    }

    /// Preset one register
    pub fn with_register(mut self, reg: u8, value: u8) -> Self {
        if let Some(r) = self.regs.get_mut(reg as usize) {
            *r = value;
        }
        self
    }

    /// Current value of `reg`
    pub fn register(&self, reg: u8) -> Option<u8> {
        self.regs.get(reg as usize).copied()
    }

    fn advance(&mut self) {
        self.pointer = (self.pointer + 1) % self.regs.len();
    }

    fn write(&mut self, bytes: &[u8]) {
        let Some((&reg, data)) = bytes.split_first() else {
            return;
        };
        self.pointer = reg as usize % self.regs.len();
        for &b in data {
            self.regs[self.pointer] = b;
            self.advance();
        }
    }

    fn read(&mut self, out: &mut [u8]) {
        for b in out {
            *b = self.regs[self.pointer];
            self.advance();
        }
    }
}

// ---------------------------------------------------------------------------
// Boards
// ---------------------------------------------------------------------------

/// Versions reported by the simulated library
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of boards plugged in
    pub devices: u32,
    /// `CH341GetVersion`
    pub dll_version: u32,
    /// `CH341GetDrvVersion`
    pub driver_version: u32,
    /// `CH341GetVerIC`
    pub ic_version: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            devices: 1,
            dll_version: 0x22,
            driver_version: 0x30,
            ic_version: IC_VER_CH341A3,
        }
    }
}

/// Snapshot of one board's bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardStats {
    pub open: bool,
    pub opens: usize,
    pub closes: usize,
    pub resets: usize,
    pub stream_writes: usize,
    pub stream_mode: Option<u32>,
    pub exclusive: bool,
    pub last_chip_select: Option<u32>,
    pub bus_started: bool,
    pub gpio_dir: u8,
    pub gpio_out: u8,
}

#[derive(Debug)]
struct SimBoard {
    disconnected: bool,
    /// `CH341ResetDevice` reports failure while set
    reset_fails: bool,
    stats: BoardStats,
    /// Levels of undriven pins, in status word layout
    inputs: u32,
    peripherals: BTreeMap<u8, SimPeripheral>,
    eeprom: Vec<u8>,
}

impl SimBoard {
    fn new() -> Self {
        let mut peripherals = BTreeMap::new();
        peripherals.insert(MPU6050_ADDR, SimPeripheral::mpu6050());
        peripherals.insert(AT24_ADDR, SimPeripheral::at24c02());
        Self {
            disconnected: false,
            reset_fails: false,
            stats: BoardStats::default(),
            inputs: 0,
            peripherals,
            eeprom: Vec::new(),
        }
    }

    fn usable(&self) -> bool {
        self.stats.open && !self.disconnected
    }

    fn input_status(&self) -> u32 {
        let dir = self.stats.gpio_dir as u32;
        let driven = self.stats.gpio_out as u32 & dir;
        let external = self.inputs & !dir;
        // Pulled-up SDA reads high while the bus is idle
        let sda = if self.stats.bus_started { 0 } else { STATUS_SDA };
        driven | external | sda
    }

    /// Run one raw I2C stream packet, collecting ACK reports
    fn run_stream(&mut self, packet: &[u8], acks: &mut Vec<u8>) -> bool {
        let Some((&CH341A_CMD_I2C_STREAM, mut rest)) = packet.split_first() else {
            return false;
        };
        while let Some((&cmd, tail)) = rest.split_first() {
            rest = tail;
            match cmd {
                CH341A_CMD_I2C_STM_END => break,
                CH341A_CMD_I2C_STM_STA => self.stats.bus_started = true,
                CH341A_CMD_I2C_STM_STO => self.stats.bus_started = false,
                CH341A_CMD_I2C_STM_OUT => {
                    let Some((&byte, tail)) = rest.split_first() else {
                        return false;
                    };
                    rest = tail;
                    let ack =
                        self.stats.bus_started && self.peripherals.contains_key(&(byte >> 1));
                    acks.push(if ack { 0x00 } else { I2C_ACK_NACK_BIT });
                }
                c if c & 0xC0 == CH341A_CMD_I2C_STM_OUT => {
                    let n = (c & 0x3F) as usize;
                    if rest.len() < n {
                        return false;
                    }
                    rest = &rest[n..];
                }
                other => {
                    log::debug!("sim: unsupported stream command 0x{:02X}", other);
                    return false;
                }
            }
        }
        true
    }

    fn eeprom_mut(&mut self, eeprom: EepromType) -> &mut [u8] {
        if self.eeprom.len() < eeprom.capacity() {
            self.eeprom.resize(eeprom.capacity(), 0xFF);
        }
        &mut self.eeprom[..eeprom.capacity()]
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Simulated vendor library
#[derive(Debug)]
pub struct SimDriver {
    config: SimConfig,
    boards: Mutex<Vec<SimBoard>>,
    calls: AtomicUsize,
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimDriver {
    /// Create a simulator; each board starts with an MPU6050 at 0x68 and a
    /// 24C02 at 0x50
    pub fn new(config: SimConfig) -> Self {
        let count = config.devices.min(CH341_MAX_DEVICES);
        let boards = (0..count).map(|_| SimBoard::new()).collect();
        Self {
            config,
            boards: Mutex::new(boards),
            calls: AtomicUsize::new(0),
        }
    }

    /// Simulator with `devices` boards and default versions
    pub fn with_devices(devices: u32) -> Self {
        Self::new(SimConfig {
            devices,
            ..SimConfig::default()
        })
    }

    /// Total number of driver calls made so far
    pub fn native_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Bookkeeping for board `index`
    pub fn board_stats(&self, index: u32) -> Option<BoardStats> {
        lock(&self.boards)
            .get(index as usize)
            .map(|b| b.stats.clone())
    }

    /// Attach (or replace) an I2C target on board `index`
    pub fn add_peripheral(&self, index: u32, addr: u8, peripheral: SimPeripheral) {
        if let Some(board) = lock(&self.boards).get_mut(index as usize) {
            board.peripherals.insert(addr, peripheral);
        }
    }

    /// Remove the I2C target at `addr` on board `index`
    pub fn remove_peripheral(&self, index: u32, addr: u8) {
        if let Some(board) = lock(&self.boards).get_mut(index as usize) {
            board.peripherals.remove(&addr);
        }
    }

    /// Register value of an I2C target, bypassing the bus
    pub fn peek(&self, index: u32, addr: u8, reg: u8) -> Option<u8> {
        lock(&self.boards)
            .get(index as usize)?
            .peripherals
            .get(&addr)?
            .register(reg)
    }

    /// Levels applied externally to pins not configured as outputs
    pub fn set_inputs(&self, index: u32, levels: u32) {
        if let Some(board) = lock(&self.boards).get_mut(index as usize) {
            board.inputs = levels;
        }
    }

    /// Unplug board `index`: every later call for it fails
    pub fn disconnect(&self, index: u32) {
        if let Some(board) = lock(&self.boards).get_mut(index as usize) {
            log::debug!("sim: board {} disconnected", index);
            board.disconnected = true;
        }
    }

    /// Make `CH341ResetDevice` fail on board `index`
    pub fn fail_reset(&self, index: u32, fail: bool) {
        if let Some(board) = lock(&self.boards).get_mut(index as usize) {
            board.reset_fails = fail;
        }
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Run `f` on an open, connected board; fail otherwise
    fn with_board(&self, index: u32, f: impl FnOnce(&mut SimBoard) -> bool) -> bool {
        self.count();
        match lock(&self.boards).get_mut(index as usize) {
            Some(board) if board.usable() => f(board),
            _ => false,
        }
    }
}

impl Ch341Driver for SimDriver {
    fn get_version(&self) -> u32 {
        self.count();
        self.config.dll_version
    }

    fn get_drv_version(&self) -> u32 {
        self.count();
        self.config.driver_version
    }

    fn open_device(&self, index: u32) -> isize {
        self.count();
        match lock(&self.boards).get_mut(index as usize) {
            Some(board) if !board.disconnected => {
                board.stats.open = true;
                board.stats.opens += 1;
                0x100 + index as isize
            }
            _ => INVALID_HANDLE_VALUE,
        }
    }

    fn close_device(&self, index: u32) {
        self.count();
        if let Some(board) = lock(&self.boards).get_mut(index as usize) {
            board.stats.open = false;
            board.stats.closes += 1;
            board.stats.bus_started = false;
        }
    }

    fn reset_device(&self, index: u32) -> bool {
        self.with_board(index, |b| {
            if b.reset_fails {
                return false;
            }
            b.stats.resets += 1;
            b.stats.stream_mode = None;
            b.stats.gpio_dir = 0;
            b.stats.gpio_out = 0;
            b.stats.bus_started = false;
            true
        })
    }

    fn get_ver_ic(&self, index: u32) -> u32 {
        let mut version = 0;
        self.with_board(index, |_| {
            version = self.config.ic_version;
            true
        });
        version
    }

    fn get_device_name(&self, index: u32) -> Option<String> {
        let mut name = None;
        self.with_board(index, |_| {
            name = Some(format!(r"\\?\usb#vid_1a86&pid_5512#sim{}", index));
            true
        });
        name
    }

    fn set_exclusive(&self, index: u32, exclusive: bool) -> bool {
        self.with_board(index, |b| {
            b.stats.exclusive = exclusive;
            true
        })
    }

    fn set_stream(&self, index: u32, mode: u32) -> bool {
        self.with_board(index, |b| {
            b.stats.stream_writes += 1;
            b.stats.stream_mode = Some(mode);
            true
        })
    }

    fn write_data(&self, index: u32, buf: &[u8], written: &mut u32) -> bool {
        *written = 0;
        self.with_board(index, |b| {
            let mut acks = Vec::new();
            if !b.run_stream(buf, &mut acks) {
                return false;
            }
            *written = buf.len() as u32;
            true
        })
    }

    fn write_read(
        &self,
        index: u32,
        write: &[u8],
        read_step: u32,
        read_times: u32,
        read: &mut [u8],
        read_len: &mut u32,
    ) -> bool {
        *read_len = 0;
        self.with_board(index, |b| {
            let wanted = read_step as usize * read_times as usize;
            if wanted > read.len() {
                return false;
            }
            let mut acks = Vec::new();
            if !b.run_stream(write, &mut acks) {
                return false;
            }
            let n = acks.len().min(wanted);
            read[..n].copy_from_slice(&acks[..n]);
            *read_len = n as u32;
            true
        })
    }

    fn read_i2c(&self, index: u32, device: u8, addr: u8, out: &mut u8) -> bool {
        self.with_board(index, |b| match b.peripherals.get_mut(&device) {
            Some(p) => {
                let mut byte = [0u8];
                p.write(&[addr]);
                p.read(&mut byte);
                *out = byte[0];
                true
            }
            None => false,
        })
    }

    fn write_i2c(&self, index: u32, device: u8, addr: u8, byte: u8) -> bool {
        self.with_board(index, |b| match b.peripherals.get_mut(&device) {
            Some(p) => {
                p.write(&[addr, byte]);
                true
            }
            None => false,
        })
    }

    fn stream_i2c(&self, index: u32, write: &[u8], read: &mut [u8]) -> bool {
        self.with_board(index, |b| {
            let Some((&addr_byte, payload)) = write.split_first() else {
                return false;
            };
            let Some(p) = b.peripherals.get_mut(&(addr_byte >> 1)) else {
                log::debug!("sim: no I2C target at 0x{:02X}", addr_byte >> 1);
                return false;
            };
            p.write(payload);
            p.read(read);
            true
        })
    }

    fn read_eeprom(&self, index: u32, eeprom: u32, addr: u32, buf: &mut [u8]) -> bool {
        self.with_board(index, |b| {
            let Ok(kind) = EepromType::from_id(eeprom) else {
                return false;
            };
            let start = addr as usize;
            let mem = b.eeprom_mut(kind);
            match mem.get(start..start + buf.len()) {
                Some(src) => {
                    buf.copy_from_slice(src);
                    true
                }
                None => false,
            }
        })
    }

    fn write_eeprom(&self, index: u32, eeprom: u32, addr: u32, buf: &[u8]) -> bool {
        self.with_board(index, |b| {
            let Ok(kind) = EepromType::from_id(eeprom) else {
                return false;
            };
            let start = addr as usize;
            let mem = b.eeprom_mut(kind);
            match mem.get_mut(start..start + buf.len()) {
                Some(dst) => {
                    dst.copy_from_slice(buf);
                    true
                }
                None => false,
            }
        })
    }

    fn stream_spi4(&self, index: u32, chip_select: u32, _buf: &mut [u8]) -> bool {
        // MOSI is tied to MISO, so the buffer comes back unchanged
        self.with_board(index, |b| {
            b.stats.last_chip_select = Some(chip_select);
            true
        })
    }

    fn get_input(&self, index: u32, status: &mut u32) -> bool {
        self.with_board(index, |b| {
            *status = b.input_status();
            true
        })
    }

    fn set_d5_d0(&self, index: u32, dir_out: u32, data_out: u32) -> bool {
        self.with_board(index, |b| {
            if dir_out > GPIO_OUTPUT_MASK || data_out > GPIO_OUTPUT_MASK {
                return false;
            }
            b.stats.gpio_dir = dir_out as u8;
            b.stats.gpio_out = data_out as u8;
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rch341_core::{
        BitOrder, Ch341Context, Ch341Error, ChipSelect, ErrorKind, I2cSpeed, IcVersion,
        OpenOptions, SpiConfig, MAX_I2C_TRANSFER,
    };
    use std::sync::Arc;

    fn setup() -> (Arc<SimDriver>, Ch341Context) {
        let sim = Arc::new(SimDriver::default());
        let ctx = Ch341Context::new(sim.clone());
        (sim, ctx)
    }

    fn assert_kind<T: std::fmt::Debug>(result: rch341_core::Result<T>, kind: ErrorKind) {
        match result {
            Err(e) => assert_eq!(e.kind(), kind, "unexpected error: {}", e),
            Ok(v) => panic!("expected {} error, got Ok({:?})", kind, v),
        }
    }

    #[test]
    fn test_who_am_i_scenario() {
        let (_sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        let id = dev.i2c_transfer(0x68, &[0x75], 1).unwrap();
        assert_eq!(id, vec![0x68]);
        dev.close();
    }

    #[test]
    fn test_open_applies_options() {
        let (sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        let stats = sim.board_stats(0).unwrap();
        assert_eq!(stats.resets, 1);
        assert!(!stats.exclusive);
        dev.close();

        let _dev = ctx
            .open_with(
                0,
                OpenOptions {
                    reset: false,
                    exclusive: true,
                },
            )
            .unwrap();
        let stats = sim.board_stats(0).unwrap();
        assert_eq!(stats.resets, 1);
        assert!(stats.exclusive);
    }

    #[test]
    fn test_operations_after_close_never_reach_driver() {
        let (sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        dev.close();
        assert!(!dev.is_open());

        let before = sim.native_calls();
        assert_kind(dev.i2c_transfer(0x68, &[0x75], 1), ErrorKind::HandleClosed);
        assert_kind(dev.i2c_transfer(0x80, &[], 0), ErrorKind::HandleClosed);
        assert_kind(dev.i2c_read(0x68, 0x75, 1), ErrorKind::HandleClosed);
        assert_kind(dev.i2c_write(0x50, 0x00, &[1]), ErrorKind::HandleClosed);
        assert_kind(dev.i2c_read_byte(0x68, 0x75), ErrorKind::HandleClosed);
        assert_kind(dev.i2c_write_byte(0x50, 0, 0), ErrorKind::HandleClosed);
        assert_kind(dev.i2c_probe(0x68), ErrorKind::HandleClosed);
        assert_kind(dev.i2c_scan(), ErrorKind::HandleClosed);
        assert_kind(dev.i2c_set_speed(I2cSpeed::Fast), ErrorKind::HandleClosed);
        assert_kind(
            dev.spi_transfer(&SpiConfig::default(), &[1, 2]),
            ErrorKind::HandleClosed,
        );
        assert_kind(
            dev.spi_transfer(&SpiConfig::default(), &[]),
            ErrorKind::HandleClosed,
        );
        assert_kind(dev.gpio_set(0x01, 0x01), ErrorKind::HandleClosed);
        assert_kind(dev.gpio_get(0x01), ErrorKind::HandleClosed);
        assert_kind(dev.input_status(), ErrorKind::HandleClosed);
        assert_kind(
            dev.eeprom_read(EepromType::Eeprom24C02, 0, 1),
            ErrorKind::HandleClosed,
        );
        assert_kind(
            dev.eeprom_write(EepromType::Eeprom24C02, 0, &[0]),
            ErrorKind::HandleClosed,
        );
        assert_kind(dev.reset(), ErrorKind::HandleClosed);
        assert_kind(dev.set_exclusive(true), ErrorKind::HandleClosed);
        assert_kind(dev.ic_version(), ErrorKind::HandleClosed);
        assert_kind(dev.device_name(), ErrorKind::HandleClosed);
        assert_eq!(sim.native_calls(), before);
    }

    #[test]
    fn test_double_close_is_noop() {
        let (sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        dev.close();
        dev.close();
        drop(dev);
        assert_eq!(sim.board_stats(0).unwrap().closes, 1);
        assert!(!ctx.is_claimed(0));
    }

    #[test]
    fn test_drop_closes() {
        let (sim, ctx) = setup();
        {
            let _dev = ctx.open(0).unwrap();
            assert!(ctx.is_claimed(0));
        }
        let stats = sim.board_stats(0).unwrap();
        assert!(!stats.open);
        assert_eq!(stats.closes, 1);
        assert!(!ctx.is_claimed(0));
    }

    #[test]
    fn test_open_twice_is_busy() {
        let (sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        let err = ctx.open(0).unwrap_err();
        assert!(matches!(err, Ch341Error::DeviceBusy(0)));
        assert_eq!(sim.board_stats(0).unwrap().opens, 1);

        // A clone of the context shares the claims
        assert_kind(ctx.clone().open(0), ErrorKind::DeviceBusy);

        dev.close();
        assert!(ctx.open(0).is_ok());
    }

    #[test]
    fn test_contexts_over_one_driver_share_claims() {
        let sim = Arc::new(SimDriver::default());
        let a = Ch341Context::new(sim.clone());
        let b = Ch341Context::new(sim.clone());

        let dev = a.open(0).unwrap();
        assert!(b.is_claimed(0));
        assert!(matches!(b.open(0), Err(Ch341Error::DeviceBusy(0))));
        assert_eq!(sim.board_stats(0).unwrap().opens, 1);

        dev.close();
        assert!(!b.is_claimed(0));
        let dev = b.open(0).unwrap();
        assert_eq!(dev.i2c_read_byte(0x68, 0x75).unwrap(), 0x68);
    }

    #[test]
    fn test_separate_drivers_claim_independently() {
        let (_sim_a, a) = setup();
        let (_sim_b, b) = setup();
        let _dev_a = a.open(0).unwrap();
        let _dev_b = b.open(0).unwrap();
        assert!(a.is_claimed(0) && b.is_claimed(0));
    }

    #[test]
    fn test_failed_setup_after_open_releases_slot() {
        let (sim, ctx) = setup();
        sim.fail_reset(0, true);

        assert_kind(ctx.open(0), ErrorKind::IoError);
        let stats = sim.board_stats(0).unwrap();
        assert_eq!(stats.opens, 1);
        assert_eq!(stats.closes, 1);
        assert!(!stats.open);
        assert!(!ctx.is_claimed(0));

        sim.fail_reset(0, false);
        let dev = ctx.open(0).unwrap();
        assert!(dev.is_open());
        assert_eq!(sim.board_stats(0).unwrap().closes, 1);
    }

    #[test]
    fn test_open_missing_device() {
        let (sim, ctx) = setup();
        assert_kind(ctx.open(3), ErrorKind::DeviceNotFound);
        assert!(!ctx.is_claimed(3));

        let before = sim.native_calls();
        assert_kind(ctx.open(16), ErrorKind::InvalidArgument);
        assert_eq!(sim.native_calls(), before);
    }

    #[test]
    fn test_two_boards_open_independently() {
        let sim = Arc::new(SimDriver::with_devices(2));
        let ctx = Ch341Context::new(sim.clone());
        let a = ctx.open(0).unwrap();
        let b = ctx.open(1).unwrap();
        a.close();
        assert!(b.is_open());
        assert_eq!(b.i2c_read_byte(0x68, 0x75).unwrap(), 0x68);
    }

    #[test]
    fn test_invalid_i2c_arguments_never_reach_driver() {
        let (sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        let before = sim.native_calls();

        assert_kind(dev.i2c_transfer(0x80, &[0x75], 1), ErrorKind::InvalidArgument);
        assert_kind(dev.i2c_read_byte(0xFF, 0), ErrorKind::InvalidArgument);
        assert_kind(dev.i2c_probe(0x80), ErrorKind::InvalidArgument);
        assert_kind(
            dev.i2c_transfer(0x68, &vec![0; MAX_I2C_TRANSFER + 1], 0),
            ErrorKind::InvalidArgument,
        );
        assert_kind(
            dev.i2c_transfer(0x68, &[0x75], MAX_I2C_TRANSFER + 1),
            ErrorKind::InvalidArgument,
        );
        assert_kind(
            dev.i2c_write(0x50, 0, &vec![0; MAX_I2C_TRANSFER]),
            ErrorKind::InvalidArgument,
        );
        assert_eq!(sim.native_calls(), before);
    }

    #[test]
    fn test_i2c_transaction_shapes() {
        let (sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();

        // Write-only
        assert!(dev.i2c_transfer(0x50, &[0x10, 0xAA, 0xBB], 0).unwrap().is_empty());
        assert_eq!(sim.peek(0, 0x50, 0x11), Some(0xBB));

        // Combined
        assert_eq!(dev.i2c_transfer(0x50, &[0x10], 2).unwrap(), vec![0xAA, 0xBB]);

        // Read-only continues from the register pointer
        dev.i2c_transfer(0x50, &[0x10], 1).unwrap();
        assert_eq!(dev.i2c_transfer(0x50, &[], 1).unwrap(), vec![0xBB]);
    }

    #[test]
    fn test_i2c_nack_is_io_error() {
        let (_sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        let err = dev.i2c_transfer(0x20, &[0x00], 1).unwrap_err();
        assert!(matches!(
            err,
            Ch341Error::Io {
                op: "CH341StreamI2C",
                index: Some(0)
            }
        ));
        // The handle stays usable after a failed transaction
        assert_eq!(dev.i2c_transfer(0x68, &[0x75], 1).unwrap(), vec![0x68]);
    }

    #[test]
    fn test_i2c_register_helpers() {
        let (sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();

        dev.i2c_write_byte(0x68, MPU6050_PWR_MGMT_1, 0x00).unwrap();
        assert_eq!(sim.peek(0, 0x68, MPU6050_PWR_MGMT_1), Some(0x00));
        assert_eq!(dev.i2c_read_byte(0x68, MPU6050_WHO_AM_I).unwrap(), 0x68);

        dev.i2c_write(0x50, 0x20, &[1, 2, 3, 4]).unwrap();
        assert_eq!(dev.i2c_read(0x50, 0x21, 3).unwrap(), vec![2, 3, 4]);

        assert_kind(dev.i2c_read_byte(0x21, 0), ErrorKind::IoError);
    }

    #[test]
    fn test_i2c_probe_and_scan() {
        let (sim, ctx) = setup();
        sim.add_peripheral(0, 0x3C, SimPeripheral::new(16, 0));
        let dev = ctx.open(0).unwrap();

        assert!(dev.i2c_probe(0x68).unwrap());
        assert!(!dev.i2c_probe(0x69).unwrap());
        assert_eq!(dev.i2c_scan().unwrap(), vec![0x3C, 0x50, 0x68]);
        assert!(!sim.board_stats(0).unwrap().bus_started);

        sim.remove_peripheral(0, 0x3C);
        assert_eq!(dev.i2c_scan().unwrap(), vec![0x50, 0x68]);
    }

    #[test]
    fn test_i2c_speed_keeps_spi_bits() {
        let (sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        let lsb = SpiConfig {
            chip_select: Some(ChipSelect::D0),
            bit_order: BitOrder::LsbFirst,
        };

        dev.spi_transfer(&lsb, &[0x01]).unwrap();
        assert_eq!(sim.board_stats(0).unwrap().stream_mode, Some(0x01));

        dev.i2c_set_speed(I2cSpeed::Fast).unwrap();
        assert_eq!(sim.board_stats(0).unwrap().stream_mode, Some(0x02));

        dev.i2c_set_speed(I2cSpeed::High).unwrap();
        dev.spi_transfer(&SpiConfig::default(), &[0x01]).unwrap();
        assert_eq!(sim.board_stats(0).unwrap().stream_mode, Some(0x83));
    }

    #[test]
    fn test_stream_mode_written_only_on_change() {
        let (sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        let cfg = SpiConfig::default();

        dev.spi_transfer(&cfg, &[1]).unwrap();
        dev.spi_transfer(&cfg, &[2]).unwrap();
        dev.i2c_set_speed(I2cSpeed::Standard).unwrap();
        assert_eq!(sim.board_stats(0).unwrap().stream_writes, 1);

        // Reset forgets the cached mode
        dev.reset().unwrap();
        dev.spi_transfer(&cfg, &[3]).unwrap();
        assert_eq!(sim.board_stats(0).unwrap().stream_writes, 2);
    }

    #[test]
    fn test_spi_empty_write_returns_empty() {
        let (sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        let before = sim.native_calls();
        assert!(dev.spi_transfer(&SpiConfig::default(), &[]).unwrap().is_empty());
        assert_eq!(sim.native_calls(), before);
    }

    #[test]
    fn test_spi_length_symmetry() {
        let (sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        let cfg = SpiConfig {
            chip_select: Some(ChipSelect::D1),
            bit_order: BitOrder::MsbFirst,
        };
        for len in [1usize, 3, 64, 4096] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            assert_eq!(dev.spi_transfer(&cfg, &data).unwrap(), data);
        }
        assert_eq!(sim.board_stats(0).unwrap().last_chip_select, Some(0x81));

        assert_kind(
            dev.spi_transfer(&cfg, &vec![0; 4097]),
            ErrorKind::InvalidArgument,
        );
    }

    #[test]
    fn test_gpio_round_trip_all_masks() {
        let (_sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        for pins in 0..=0x3Fu32 {
            for value in 0..=0x3Fu32 {
                dev.gpio_set(pins, value).unwrap();
                assert_eq!(
                    dev.gpio_get(pins).unwrap(),
                    value & pins,
                    "pins=0x{:02X} value=0x{:02X}",
                    pins,
                    value
                );
            }
        }
    }

    #[test]
    fn test_gpio_set_leaves_other_pins() {
        let (sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        dev.gpio_set(0x03, 0x03).unwrap();
        dev.gpio_set(0x0C, 0x04).unwrap();
        let stats = sim.board_stats(0).unwrap();
        assert_eq!(stats.gpio_dir, 0x0F);
        assert_eq!(stats.gpio_out, 0x07);
        assert_eq!(dev.gpio_get(0x3F).unwrap(), 0x07);

        // Undriven pins follow the external level
        sim.set_inputs(0, 0x30);
        assert_eq!(dev.gpio_get(0x30).unwrap(), 0x30);
        assert_ne!(dev.input_status().unwrap() & (1 << 23), 0);
    }

    #[test]
    fn test_gpio_invalid_mask_never_reaches_driver() {
        let (sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        let before = sim.native_calls();
        assert_kind(dev.gpio_set(0x40, 0x00), ErrorKind::InvalidArgument);
        assert_kind(dev.gpio_set(0x01, 0x80), ErrorKind::InvalidArgument);
        assert_kind(dev.gpio_get(0x100), ErrorKind::InvalidArgument);
        assert_eq!(sim.native_calls(), before);
    }

    #[test]
    fn test_eeprom_read_write() {
        let (_sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        let kind = EepromType::Eeprom24C02;

        assert_eq!(dev.eeprom_read(kind, 0, 4).unwrap(), vec![0xFF; 4]);
        dev.eeprom_write(kind, 0xF0, &[0xDE, 0xAD]).unwrap();
        assert_eq!(dev.eeprom_read(kind, 0xF0, 2).unwrap(), vec![0xDE, 0xAD]);

        assert_kind(dev.eeprom_read(kind, 0xFF, 2), ErrorKind::InvalidArgument);
        assert_kind(
            dev.eeprom_write(kind, 0x100, &[0]),
            ErrorKind::InvalidArgument,
        );
    }

    #[test]
    fn test_device_info() {
        let (_sim, ctx) = setup();
        assert_eq!(ctx.dll_version(), 0x22);
        assert_eq!(ctx.driver_version().unwrap(), 0x30);

        let dev = ctx.open(0).unwrap();
        assert_eq!(dev.index(), 0);
        assert_eq!(dev.ic_version().unwrap(), IcVersion::Ch341a3);
        assert!(dev.device_name().unwrap().contains("vid_1a86"));
    }

    #[test]
    fn test_missing_driver_version_is_io_error() {
        let sim = Arc::new(SimDriver::new(SimConfig {
            driver_version: 0,
            ..SimConfig::default()
        }));
        let ctx = Ch341Context::new(sim);
        assert_kind(ctx.driver_version(), ErrorKind::IoError);
    }

    #[test]
    fn test_disconnect_surfaces_io_errors() {
        let (sim, ctx) = setup();
        let dev = ctx.open(0).unwrap();
        sim.disconnect(0);

        assert_kind(dev.i2c_transfer(0x68, &[0x75], 1), ErrorKind::IoError);
        assert_kind(dev.gpio_get(0x01), ErrorKind::IoError);
        assert_kind(dev.ic_version(), ErrorKind::IoError);

        // Closing still releases the slot
        dev.close();
        assert!(!ctx.is_claimed(0));
        assert_kind(ctx.open(0), ErrorKind::DeviceNotFound);
    }

    #[test]
    fn test_handle_shared_between_threads() {
        let (_sim, ctx) = setup();
        let dev = Arc::new(ctx.open(0).unwrap());

        let workers: Vec<_> = (0..4u8)
            .map(|n| {
                let dev = Arc::clone(&dev);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let reg = 0x40 + n;
                        dev.i2c_write(0x50, reg, &[n]).unwrap();
                        assert_eq!(dev.i2c_read_byte(0x68, 0x75).unwrap(), 0x68);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        for n in 0..4u8 {
            assert_eq!(dev.i2c_read(0x50, 0x40 + n, 1).unwrap(), vec![n]);
        }
    }
}
