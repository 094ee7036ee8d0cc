//! CH341 module for Steel Scheme
//!
//! Exposes the device binding to scripts. Devices are referred to by integer
//! handles issued from a per-engine [`HandleTable`]. Failures surface as
//! Scheme errors whose message starts with the error kind, e.g.
//! `HandleClosed: handle for CH341 device 0 is closed`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rch341_core::{
    BitOrder, Ch341Context, Ch341Device, Ch341Error, ChipSelect, EepromType, GpioPins, I2cSpeed,
    SpiConfig, IC_VER_CH341A, IC_VER_CH341A3,
};
use steel::rvals::SteelVal;
use steel::steel_vm::builtin::BuiltInModule;
use steel::steel_vm::register_fn::RegisterFn;

/// One script handle
enum Slot {
    Open(Arc<Ch341Device>),
    /// Device index of a handle closed from a script
    Closed(u32),
}

/// Devices indexed by script handle
///
/// Closing a handle drops its device and leaves only the device index behind,
/// so later calls through it report `HandleClosed` instead of `unknown handle`.
pub struct HandleTable {
    ctx: Ch341Context,
    slots: Vec<Slot>,
}

impl HandleTable {
    pub fn new(ctx: Ch341Context) -> Self {
        Self {
            ctx,
            slots: Vec::new(),
        }
    }

    fn open(&mut self, index: u32) -> Result<isize, Ch341Error> {
        let dev = self.ctx.open(index)?;
        self.slots.push(Slot::Open(Arc::new(dev)));
        Ok(self.slots.len() as isize - 1)
    }

    fn slot_mut(&mut self, handle: isize) -> Result<&mut Slot, String> {
        usize::try_from(handle)
            .ok()
            .and_then(|h| self.slots.get_mut(h))
            .ok_or_else(|| format!("InvalidArgument: unknown handle {}", handle))
    }

    fn get(&mut self, handle: isize) -> Result<Arc<Ch341Device>, String> {
        match self.slot_mut(handle)? {
            Slot::Open(dev) => Ok(Arc::clone(dev)),
            Slot::Closed(index) => Err(script_err(Ch341Error::HandleClosed(*index))),
        }
    }

    fn is_open(&mut self, handle: isize) -> Result<bool, String> {
        match self.slot_mut(handle)? {
            Slot::Open(dev) => Ok(dev.is_open()),
            Slot::Closed(_) => Ok(false),
        }
    }

    /// Close the device behind `handle`; closing twice is a no-op
    fn close(&mut self, handle: isize) -> Result<(), String> {
        let slot = self.slot_mut(handle)?;
        if let Slot::Open(dev) = slot {
            let index = dev.index();
            dev.close();
            *slot = Slot::Closed(index);
        }
        Ok(())
    }
}

/// Handle table shared by every function of one module
pub type SharedTable = Arc<Mutex<HandleTable>>;

fn lock(table: &SharedTable) -> MutexGuard<'_, HandleTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Look up a handle and release the table before the device call
fn device(table: &SharedTable, handle: isize) -> Result<Arc<Ch341Device>, String> {
    lock(table).get(handle)
}

fn script_err(e: Ch341Error) -> String {
    format!("{}: {}", e.kind(), e)
}

fn invalid(msg: String) -> String {
    format!("InvalidArgument: {}", msg)
}

fn non_negative(what: &str, v: isize) -> String {
    invalid(format!("{} must be a non-negative integer, got {}", what, v))
}

fn to_u32(what: &str, v: isize) -> Result<u32, String> {
    u32::try_from(v).map_err(|_| non_negative(what, v))
}

fn to_len(what: &str, v: isize) -> Result<usize, String> {
    usize::try_from(v).map_err(|_| non_negative(what, v))
}

fn to_byte(what: &str, v: isize) -> Result<u8, String> {
    u8::try_from(v).map_err(|_| invalid(format!("{} must be in 0-255, got {}", what, v)))
}

/// Create the `rch341/device` module bound to `table`
pub fn create_device_module(table: SharedTable) -> BuiltInModule {
    let mut module = BuiltInModule::new("rch341/device");

    register_device_commands(&mut module, &table);
    register_i2c_commands(&mut module, &table);
    register_bus_commands(&mut module, &table);
    register_byte_utilities(&mut module);

    module.register_fn("ch341-help", || {
        print_help();
        SteelVal::Void
    });

    module
}

fn register_device_commands(module: &mut BuiltInModule, table: &SharedTable) {
    let t = Arc::clone(table);
    module.register_fn("ch341-open", move |index: isize| -> Result<isize, String> {
        let index = to_u32("device index", index)?;
        lock(&t).open(index).map_err(script_err)
    });

    let t = Arc::clone(table);
    module.register_fn("ch341-close", move |handle: isize| -> Result<bool, String> {
        lock(&t).close(handle)?;
        Ok(true)
    });

    let t = Arc::clone(table);
    module.register_fn("ch341-open?", move |handle: isize| -> Result<bool, String> {
        lock(&t).is_open(handle)
    });

    let t = Arc::clone(table);
    module.register_fn("ch341-reset", move |handle: isize| -> Result<bool, String> {
        device(&t, handle)?.reset().map_err(script_err)?;
        Ok(true)
    });

    let t = Arc::clone(table);
    module.register_fn(
        "ch341-set-exclusive",
        move |handle: isize, exclusive: bool| -> Result<bool, String> {
            device(&t, handle)?
                .set_exclusive(exclusive)
                .map_err(script_err)?;
            Ok(true)
        },
    );

    let t = Arc::clone(table);
    module.register_fn("ch341-ic-version", move |handle: isize| -> Result<isize, String> {
        let version = device(&t, handle)?.ic_version().map_err(script_err)?;
        Ok(version.raw() as isize)
    });

    let t = Arc::clone(table);
    module.register_fn("ch341-name", move |handle: isize| -> Result<String, String> {
        device(&t, handle)?.device_name().map_err(script_err)
    });

    let t = Arc::clone(table);
    module.register_fn("ch341-dll-version", move || -> isize {
        lock(&t).ctx.dll_version() as isize
    });

    let t = Arc::clone(table);
    module.register_fn("ch341-driver-version", move || -> Result<isize, String> {
        let ctx = lock(&t).ctx.clone();
        ctx.driver_version()
            .map(|v| v as isize)
            .map_err(script_err)
    });
}

fn register_i2c_commands(module: &mut BuiltInModule, table: &SharedTable) {
    let t = Arc::clone(table);
    module.register_fn(
        "i2c-set-speed",
        move |handle: isize, speed: isize| -> Result<bool, String> {
            let speed = I2cSpeed::from_index(to_u32("speed", speed)?).map_err(script_err)?;
            device(&t, handle)?.i2c_set_speed(speed).map_err(script_err)?;
            Ok(true)
        },
    );

    let t = Arc::clone(table);
    module.register_fn(
        "i2c-transfer",
        move |handle: isize,
              addr: isize,
              write: SteelVal,
              read_len: isize|
              -> Result<SteelVal, String> {
            let addr = to_u32("I2C address", addr)?;
            let write = steel_to_bytes(&write)?;
            let read_len = to_len("read length", read_len)?;
            let read = device(&t, handle)?
                .i2c_transfer(addr, &write, read_len)
                .map_err(script_err)?;
            Ok(bytes_to_steel(&read))
        },
    );

    let t = Arc::clone(table);
    module.register_fn(
        "i2c-read",
        move |handle: isize, addr: isize, reg: isize, len: isize| -> Result<SteelVal, String> {
            let addr = to_u32("I2C address", addr)?;
            let reg = to_byte("register", reg)?;
            let len = to_len("length", len)?;
            let read = device(&t, handle)?
                .i2c_read(addr, reg, len)
                .map_err(script_err)?;
            Ok(bytes_to_steel(&read))
        },
    );

    let t = Arc::clone(table);
    module.register_fn(
        "i2c-write",
        move |handle: isize, addr: isize, reg: isize, data: SteelVal| -> Result<bool, String> {
            let addr = to_u32("I2C address", addr)?;
            let reg = to_byte("register", reg)?;
            let data = steel_to_bytes(&data)?;
            device(&t, handle)?
                .i2c_write(addr, reg, &data)
                .map_err(script_err)?;
            Ok(true)
        },
    );

    let t = Arc::clone(table);
    module.register_fn(
        "i2c-read-byte",
        move |handle: isize, addr: isize, reg: isize| -> Result<isize, String> {
            let addr = to_u32("I2C address", addr)?;
            let reg = to_byte("register", reg)?;
            let byte = device(&t, handle)?
                .i2c_read_byte(addr, reg)
                .map_err(script_err)?;
            Ok(byte as isize)
        },
    );

    let t = Arc::clone(table);
    module.register_fn(
        "i2c-write-byte",
        move |handle: isize, addr: isize, reg: isize, byte: isize| -> Result<bool, String> {
            let addr = to_u32("I2C address", addr)?;
            let reg = to_byte("register", reg)?;
            let byte = to_byte("byte", byte)?;
            device(&t, handle)?
                .i2c_write_byte(addr, reg, byte)
                .map_err(script_err)?;
            Ok(true)
        },
    );

    let t = Arc::clone(table);
    module.register_fn(
        "i2c-probe",
        move |handle: isize, addr: isize| -> Result<bool, String> {
            let addr = to_u32("I2C address", addr)?;
            device(&t, handle)?.i2c_probe(addr).map_err(script_err)
        },
    );

    let t = Arc::clone(table);
    module.register_fn("i2c-scan", move |handle: isize| -> Result<SteelVal, String> {
        let found = device(&t, handle)?.i2c_scan().map_err(script_err)?;
        Ok(bytes_to_steel(&found))
    });
}

fn register_bus_commands(module: &mut BuiltInModule, table: &SharedTable) {
    let t = Arc::clone(table);
    module.register_fn(
        "eeprom-read",
        move |handle: isize, kind: isize, addr: isize, len: isize| -> Result<SteelVal, String> {
            let kind = EepromType::from_id(to_u32("EEPROM type", kind)?).map_err(script_err)?;
            let addr = to_u32("EEPROM address", addr)?;
            let len = to_len("length", len)?;
            let data = device(&t, handle)?
                .eeprom_read(kind, addr, len)
                .map_err(script_err)?;
            Ok(bytes_to_steel(&data))
        },
    );

    let t = Arc::clone(table);
    module.register_fn(
        "eeprom-write",
        move |handle: isize, kind: isize, addr: isize, data: SteelVal| -> Result<bool, String> {
            let kind = EepromType::from_id(to_u32("EEPROM type", kind)?).map_err(script_err)?;
            let addr = to_u32("EEPROM address", addr)?;
            let data = steel_to_bytes(&data)?;
            device(&t, handle)?
                .eeprom_write(kind, addr, &data)
                .map_err(script_err)?;
            Ok(true)
        },
    );

    let t = Arc::clone(table);
    module.register_fn(
        "spi-transfer",
        move |handle: isize, cs: SteelVal, data: SteelVal| -> Result<SteelVal, String> {
            spi_transfer(&t, handle, &cs, &data, BitOrder::MsbFirst)
        },
    );

    let t = Arc::clone(table);
    module.register_fn(
        "spi-transfer-lsb",
        move |handle: isize, cs: SteelVal, data: SteelVal| -> Result<SteelVal, String> {
            spi_transfer(&t, handle, &cs, &data, BitOrder::LsbFirst)
        },
    );

    let t = Arc::clone(table);
    module.register_fn(
        "gpio-set",
        move |handle: isize, pins: isize, values: isize| -> Result<bool, String> {
            let pins = to_u32("pin mask", pins)?;
            let values = to_u32("value mask", values)?;
            device(&t, handle)?
                .gpio_set(pins, values)
                .map_err(script_err)?;
            Ok(true)
        },
    );

    let t = Arc::clone(table);
    module.register_fn(
        "gpio-get",
        move |handle: isize, pins: isize| -> Result<isize, String> {
            let pins = to_u32("pin mask", pins)?;
            let levels = device(&t, handle)?.gpio_get(pins).map_err(script_err)?;
            Ok(levels as isize)
        },
    );

    let t = Arc::clone(table);
    module.register_fn("gpio-input", move |handle: isize| -> Result<isize, String> {
        let status = device(&t, handle)?.input_status().map_err(script_err)?;
        Ok(status as isize)
    });
}

/// `cs` is a chip-select pin number 0-2, or `#f` for none
fn spi_transfer(
    table: &SharedTable,
    handle: isize,
    cs: &SteelVal,
    data: &SteelVal,
    bit_order: BitOrder,
) -> Result<SteelVal, String> {
    let chip_select = match cs {
        SteelVal::BoolV(false) => None,
        SteelVal::IntV(pin) => {
            Some(ChipSelect::from_index(to_u32("chip select", *pin)?).map_err(script_err)?)
        }
        _ => return Err(invalid("chip select must be 0-2 or #f".to_string())),
    };
    let config = SpiConfig {
        chip_select,
        bit_order,
    };
    let data = steel_to_bytes(data)?;
    let read = device(table, handle)?
        .spi_transfer(&config, &data)
        .map_err(script_err)?;
    Ok(bytes_to_steel(&read))
}

/// Register byte list helpers (independent of any device)
fn register_byte_utilities(module: &mut BuiltInModule) {
    module.register_fn(
        "make-bytes",
        |len: isize, fill: isize| -> Result<SteelVal, String> {
            let len = to_len("length", len)?;
            let fill = to_byte("fill", fill)?;
            Ok(bytes_to_steel(&vec![fill; len]))
        },
    );

    module.register_fn("bytes-length", |data: SteelVal| -> Result<isize, String> {
        Ok(steel_to_bytes(&data)?.len() as isize)
    });

    module.register_fn(
        "bytes-ref",
        |data: SteelVal, index: isize| -> Result<isize, String> {
            let bytes = steel_to_bytes(&data)?;
            usize::try_from(index)
                .ok()
                .and_then(|i| bytes.get(i))
                .map(|&b| b as isize)
                .ok_or_else(|| invalid(format!("index {} out of bounds", index)))
        },
    );

    module.register_fn("list->bytes", |list: SteelVal| -> Result<SteelVal, String> {
        Ok(bytes_to_steel(&steel_to_bytes(&list)?))
    });

    module.register_fn("bytes->hex", |data: SteelVal| -> Result<String, String> {
        let bytes = steel_to_bytes(&data)?;
        Ok(bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" "))
    });

    module.register_fn("hex->bytes", |hex: String| -> Result<SteelVal, String> {
        hex_to_bytes(&hex).map(|b| bytes_to_steel(&b))
    });
}

/// Create the `rch341/consts` module
pub fn create_constants_module() -> BuiltInModule {
    let mut module = BuiltInModule::new("rch341/consts");

    // EEPROM type ids, as taken by eeprom-read / eeprom-write
    let eeprom_ids: [(&'static str, EepromType); 13] = [
        ("ID_24C01", EepromType::Eeprom24C01),
        ("ID_24C02", EepromType::Eeprom24C02),
        ("ID_24C04", EepromType::Eeprom24C04),
        ("ID_24C08", EepromType::Eeprom24C08),
        ("ID_24C16", EepromType::Eeprom24C16),
        ("ID_24C32", EepromType::Eeprom24C32),
        ("ID_24C64", EepromType::Eeprom24C64),
        ("ID_24C128", EepromType::Eeprom24C128),
        ("ID_24C256", EepromType::Eeprom24C256),
        ("ID_24C512", EepromType::Eeprom24C512),
        ("ID_24C1024", EepromType::Eeprom24C1024),
        ("ID_24C2048", EepromType::Eeprom24C2048),
        ("ID_24C4096", EepromType::Eeprom24C4096),
    ];
    for (name, kind) in eeprom_ids {
        module.register_value(name, SteelVal::IntV(kind.id() as isize));
    }

    // I2C speeds, as taken by i2c-set-speed
    module.register_value("I2C_20K", SteelVal::IntV(I2cSpeed::Low.index() as isize));
    module.register_value("I2C_100K", SteelVal::IntV(I2cSpeed::Standard.index() as isize));
    module.register_value("I2C_400K", SteelVal::IntV(I2cSpeed::Fast.index() as isize));
    module.register_value("I2C_750K", SteelVal::IntV(I2cSpeed::High.index() as isize));

    // Chip revisions
    module.register_value("IC_VER_CH341", SteelVal::IntV(0x10));
    module.register_value("IC_VER_CH341A", SteelVal::IntV(IC_VER_CH341A as isize));
    module.register_value("IC_VER_CH341A3", SteelVal::IntV(IC_VER_CH341A3 as isize));

    // GPIO pin bits
    module.register_value("PIN_D0", SteelVal::IntV(GpioPins::D0.bits() as isize));
    module.register_value("PIN_D1", SteelVal::IntV(GpioPins::D1.bits() as isize));
    module.register_value("PIN_D2", SteelVal::IntV(GpioPins::D2.bits() as isize));
    module.register_value("PIN_D3", SteelVal::IntV(GpioPins::D3.bits() as isize));
    module.register_value("PIN_D4", SteelVal::IntV(GpioPins::D4.bits() as isize));
    module.register_value("PIN_D5", SteelVal::IntV(GpioPins::D5.bits() as isize));
    module.register_value("PIN_ALL", SteelVal::IntV(GpioPins::all().bits() as isize));
    module.register_value("STATUS_SDA", SteelVal::IntV(1 << 23));

    // Chip selects for spi-transfer
    module.register_value("CS_D0", SteelVal::IntV(0));
    module.register_value("CS_D1", SteelVal::IntV(1));
    module.register_value("CS_D2", SteelVal::IntV(2));
    module.register_value("CS_NONE", SteelVal::BoolV(false));

    module
}

// =============================================================================
// Value conversion
// =============================================================================

/// Convert bytes to a Steel list of integers
fn bytes_to_steel(bytes: &[u8]) -> SteelVal {
    SteelVal::ListV(bytes.iter().map(|&b| SteelVal::IntV(b as isize)).collect())
}

/// Convert a Steel list of integers or a string to bytes
///
/// List elements outside 0-255 are rejected, never truncated.
fn steel_to_bytes(val: &SteelVal) -> Result<Vec<u8>, String> {
    match val {
        SteelVal::ListV(items) => items
            .iter()
            .map(|v| match v {
                SteelVal::IntV(i) => to_byte("byte", *i),
                other => Err(invalid(format!("expected byte, got {}", other))),
            })
            .collect(),
        SteelVal::StringV(s) => Ok(s.as_bytes().to_vec()),
        _ => Err(invalid("expected list of bytes or string".to_string())),
    }
}

fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, String> {
    let hex = hex.replace(' ', "").replace("0x", "").replace(',', "");
    if hex.len() % 2 != 0 {
        return Err(invalid("hex string must have even length".to_string()));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| invalid(format!("invalid hex at offset {}", i)))
        })
        .collect()
}

fn print_help() {
    println!(
        r#"
rch341 Scheme REPL - Available Commands
=======================================

DEVICE
------
(ch341-open index)               Open device slot 0-15, returns a handle
(ch341-close h)                  Close; closing twice is a no-op
(ch341-open? h)                  #t while the handle is open
(ch341-reset h)                  Reset the chip
(ch341-set-exclusive h bool)     Request exclusive driver access
(ch341-ic-version h)             Chip revision (see IC_VER_*)
(ch341-name h)                   Device path
(ch341-dll-version)              Driver library version
(ch341-driver-version)           Kernel driver version

I2C
---
(i2c-set-speed h speed)          I2C_20K, I2C_100K, I2C_400K or I2C_750K
(i2c-transfer h addr write len)  Write bytes, then read len bytes
(i2c-read h addr reg len)        Read len bytes from register reg
(i2c-write h addr reg data)      Write data to register reg
(i2c-read-byte h addr reg)       Read one register
(i2c-write-byte h addr reg byte) Write one register
(i2c-probe h addr)               #t if addr acknowledges
(i2c-scan h)                     Addresses that acknowledge

EEPROM
------
(eeprom-read h type addr len)    type is one of ID_24C01 .. ID_24C4096
(eeprom-write h type addr data)

SPI
---
(spi-transfer h cs data)         Full duplex, MSB first; cs is 0-2 or #f
(spi-transfer-lsb h cs data)     Same, LSB first

GPIO
----
(gpio-set h pins values)         Drive pins (PIN_D0 .. PIN_D5) to values
(gpio-get h pins)                Levels of pins
(gpio-input h)                   Raw input status word

BYTES
-----
(make-bytes len fill)  (bytes-length b)  (bytes-ref b i)
(list->bytes l)  (bytes->hex b)  (hex->bytes "de ad be ef")

EXAMPLE
-------
(define h (ch341-open 0))
(i2c-transfer h #x68 (list #x75) 1)   ; MPU6050 WHO_AM_I
(ch341-close h)
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steel_to_bytes_rejects_out_of_range() {
        let ok = SteelVal::ListV(vec![SteelVal::IntV(0), SteelVal::IntV(255)].into());
        assert_eq!(steel_to_bytes(&ok).unwrap(), vec![0, 255]);

        let bad = SteelVal::ListV(vec![SteelVal::IntV(256)].into());
        assert!(steel_to_bytes(&bad).unwrap_err().starts_with("InvalidArgument"));

        let neg = SteelVal::ListV(vec![SteelVal::IntV(-1)].into());
        assert!(steel_to_bytes(&neg).is_err());
    }

    #[test]
    fn test_hex_to_bytes() {
        assert_eq!(hex_to_bytes("de ad,0xbe ef").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(hex_to_bytes("abc").is_err());
        assert!(hex_to_bytes("zz").is_err());
    }

    #[test]
    fn test_closed_handle_keeps_only_index() {
        let sim = Arc::new(rch341_sim::SimDriver::default());
        let mut table = HandleTable::new(Ch341Context::new(sim.clone()));

        let h = table.open(0).unwrap();
        let dev = table.get(h).unwrap();
        drop(dev);
        table.close(h).unwrap();
        assert!(matches!(table.slots[h as usize], Slot::Closed(0)));
        assert_eq!(sim.board_stats(0).unwrap().closes, 1);

        assert!(!table.is_open(h).unwrap());
        assert!(table.get(h).unwrap_err().starts_with("HandleClosed"));
        table.close(h).unwrap();
        assert_eq!(sim.board_stats(0).unwrap().closes, 1);

        // The slot is free again and a new handle is issued for it
        let h2 = table.open(0).unwrap();
        assert_ne!(h, h2);
        assert!(table.is_open(h2).unwrap());
        assert!(table.get(99).unwrap_err().starts_with("InvalidArgument"));
    }

    #[test]
    fn test_argument_conversion() {
        assert_eq!(to_u32("x", 5).unwrap(), 5);
        assert!(to_u32("x", -1).is_err());
        assert!(to_byte("x", 256).is_err());
        assert!(to_len("x", -3).is_err());
    }
}
