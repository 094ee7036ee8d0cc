//! Dynamic loading of the vendor `CH341DLL`
//!
//! The vendor ships the driver as a WINAPI DLL (`CH341DLL.DLL` for 32-bit
//! hosts, `CH341DLLA64.DLL` for 64-bit ones). All exports use the `stdcall`
//! convention, which Rust spells `extern "system"`; on 64-bit Windows this
//! collapses to the platform C convention.
//!
//! The library is loaded once and never unloaded: function pointers resolved
//! from it are kept next to the `Library` so they cannot outlive it.

use std::ffi::{c_char, c_void, CStr, OsStr};
use std::path::PathBuf;

use libloading::Library;

use crate::driver::Ch341Driver;
use crate::error::{Ch341Error, Result};

// Vendor header types
type Ulong = u32;
type Bool = i32;
type Handle = isize;
type EepromId = i32;

type GetVersionFn = unsafe extern "system" fn() -> Ulong;
type GetDrvVersionFn = unsafe extern "system" fn() -> Ulong;
type OpenDeviceFn = unsafe extern "system" fn(Ulong) -> Handle;
type CloseDeviceFn = unsafe extern "system" fn(Ulong);
type ResetDeviceFn = unsafe extern "system" fn(Ulong) -> Bool;
type GetVerIcFn = unsafe extern "system" fn(Ulong) -> Ulong;
type GetDeviceNameFn = unsafe extern "system" fn(Ulong) -> *const c_char;
type SetExclusiveFn = unsafe extern "system" fn(Ulong, Ulong) -> Bool;
type SetStreamFn = unsafe extern "system" fn(Ulong, Ulong) -> Bool;
type WriteDataFn = unsafe extern "system" fn(Ulong, *mut c_void, *mut Ulong) -> Bool;
type WriteReadFn = unsafe extern "system" fn(
    Ulong,
    Ulong,
    *mut c_void,
    Ulong,
    Ulong,
    *mut Ulong,
    *mut c_void,
) -> Bool;
type ReadI2cFn = unsafe extern "system" fn(Ulong, u8, u8, *mut u8) -> Bool;
type WriteI2cFn = unsafe extern "system" fn(Ulong, u8, u8, u8) -> Bool;
type StreamI2cFn = unsafe extern "system" fn(Ulong, Ulong, *mut c_void, Ulong, *mut c_void) -> Bool;
type EepromFn = unsafe extern "system" fn(Ulong, EepromId, Ulong, Ulong, *mut u8) -> Bool;
type StreamSpi4Fn = unsafe extern "system" fn(Ulong, Ulong, Ulong, *mut c_void) -> Bool;
type GetInputFn = unsafe extern "system" fn(Ulong, *mut Ulong) -> Bool;
type SetD5D0Fn = unsafe extern "system" fn(Ulong, Ulong, Ulong) -> Bool;

/// Where to find the vendor library
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LibrarySource {
    /// Platform default name, resolved through the system search path
    #[default]
    Default,
    /// Explicit file path
    Path(PathBuf),
}

impl LibrarySource {
    /// Name or path handed to the loader
    pub fn resolve(&self) -> Result<PathBuf> {
        match self {
            LibrarySource::Default => default_library_name().map(PathBuf::from),
            LibrarySource::Path(path) => Ok(path.clone()),
        }
    }
}

/// File name of the vendor library on this platform
pub fn default_library_name() -> Result<&'static str> {
    if cfg!(windows) {
        if cfg!(target_pointer_width = "64") {
            Ok("CH341DLLA64.DLL")
        } else {
            Ok("CH341DLL.DLL")
        }
    } else {
        Err(Ch341Error::UnsupportedPlatform(
            std::env::consts::OS.to_string(),
        ))
    }
}

/// Resolved export table
struct Exports {
    get_version: GetVersionFn,
    get_drv_version: GetDrvVersionFn,
    open_device: OpenDeviceFn,
    close_device: CloseDeviceFn,
    reset_device: ResetDeviceFn,
    get_ver_ic: GetVerIcFn,
    get_device_name: GetDeviceNameFn,
    set_exclusive: SetExclusiveFn,
    set_stream: SetStreamFn,
    write_data: WriteDataFn,
    write_read: WriteReadFn,
    read_i2c: ReadI2cFn,
    write_i2c: WriteI2cFn,
    stream_i2c: StreamI2cFn,
    read_eeprom: EepromFn,
    write_eeprom: EepromFn,
    stream_spi4: StreamSpi4Fn,
    get_input: GetInputFn,
    set_d5_d0: SetD5D0Fn,
}

/// Look up one export and copy the function pointer out
///
/// # Safety
///
/// `T` must match the export's real signature.
unsafe fn export<T: Copy>(lib: &Library, name: &'static str) -> Result<T> {
    let sym = lib
        .get::<T>(name.as_bytes())
        .map_err(|_| Ch341Error::MissingSymbol(name))?;
    Ok(*sym)
}

impl Exports {
    /// # Safety
    ///
    /// `lib` must be the WCH CH341 DLL, whose exports have the signatures
    /// declared above.
    unsafe fn resolve(lib: &Library) -> Result<Self> {
        Ok(Self {
            get_version: export(lib, "CH341GetVersion")?,
            get_drv_version: export(lib, "CH341GetDrvVersion")?,
            open_device: export(lib, "CH341OpenDevice")?,
            close_device: export(lib, "CH341CloseDevice")?,
            reset_device: export(lib, "CH341ResetDevice")?,
            get_ver_ic: export(lib, "CH341GetVerIC")?,
            get_device_name: export(lib, "CH341GetDeviceName")?,
            set_exclusive: export(lib, "CH341SetExclusive")?,
            set_stream: export(lib, "CH341SetStream")?,
            write_data: export(lib, "CH341WriteData")?,
            write_read: export(lib, "CH341WriteRead")?,
            read_i2c: export(lib, "CH341ReadI2C")?,
            write_i2c: export(lib, "CH341WriteI2C")?,
            stream_i2c: export(lib, "CH341StreamI2C")?,
            read_eeprom: export(lib, "CH341ReadEEPROM")?,
            write_eeprom: export(lib, "CH341WriteEEPROM")?,
            stream_spi4: export(lib, "CH341StreamSPI4")?,
            get_input: export(lib, "CH341GetInput")?,
            set_d5_d0: export(lib, "CH341Set_D5_D0")?,
        })
    }
}

/// The loaded vendor library
pub struct Ch341Dll {
    exports: Exports,
    // Must stay loaded for as long as `exports` is reachable
    _lib: Library,
}

impl Ch341Dll {
    /// Load the library from `source` and resolve every export
    pub fn load(source: &LibrarySource) -> Result<Self> {
        let path = source.resolve()?;
        log::info!("Loading CH341 driver library {}", path.display());

        let lib = Self::open_library(path.as_os_str()).map_err(|e| Ch341Error::LibraryLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        // SAFETY: the file was requested as the vendor CH341 DLL
        let exports = unsafe { Exports::resolve(&lib)? };

        let dll = Self {
            exports,
            _lib: lib,
        };
        log::debug!("CH341 DLL version 0x{:08X}", dll.get_version());
        Ok(dll)
    }

    fn open_library(path: &OsStr) -> std::result::Result<Library, libloading::Error> {
        // SAFETY: running the DLL's initialisers is the documented way to use it
        unsafe { Library::new(path) }
    }
}

fn to_bool(b: Bool) -> bool {
    b != 0
}

// SAFETY for every call below: argument types match the vendor header, and
// every pointer handed over references a live buffer of the advertised size
// that outlives the (synchronous) call.
impl Ch341Driver for Ch341Dll {
    fn get_version(&self) -> u32 {
        unsafe { (self.exports.get_version)() }
    }

    fn get_drv_version(&self) -> u32 {
        unsafe { (self.exports.get_drv_version)() }
    }

    fn open_device(&self, index: u32) -> isize {
        unsafe { (self.exports.open_device)(index) }
    }

    fn close_device(&self, index: u32) {
        unsafe { (self.exports.close_device)(index) }
    }

    fn reset_device(&self, index: u32) -> bool {
        to_bool(unsafe { (self.exports.reset_device)(index) })
    }

    fn get_ver_ic(&self, index: u32) -> u32 {
        unsafe { (self.exports.get_ver_ic)(index) }
    }

    fn get_device_name(&self, index: u32) -> Option<String> {
        let ptr = unsafe { (self.exports.get_device_name)(index) };
        if ptr.is_null() {
            return None;
        }
        // The DLL returns a pointer into its own static name table
        let name = unsafe { CStr::from_ptr(ptr) };
        Some(name.to_string_lossy().into_owned())
    }

    fn set_exclusive(&self, index: u32, exclusive: bool) -> bool {
        to_bool(unsafe { (self.exports.set_exclusive)(index, exclusive as Ulong) })
    }

    fn set_stream(&self, index: u32, mode: u32) -> bool {
        to_bool(unsafe { (self.exports.set_stream)(index, mode) })
    }

    fn write_data(&self, index: u32, buf: &[u8], written: &mut u32) -> bool {
        let Ok(mut len) = Ulong::try_from(buf.len()) else {
            return false;
        };
        // CH341WriteData takes a non-const pointer but only reads from it
        let ok = unsafe { (self.exports.write_data)(index, buf.as_ptr() as *mut c_void, &mut len) };
        *written = len;
        to_bool(ok)
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
        let needed = (read_step as usize).checked_mul(read_times as usize);
        if !matches!(needed, Some(n) if n <= read.len()) {
            log::error!(
                "CH341WriteRead read buffer of {} bytes too small for {}x{}",
                read.len(),
                read_times,
                read_step
            );
            return false;
        }
        let Ok(write_len) = Ulong::try_from(write.len()) else {
            return false;
        };
        let mut len: Ulong = 0;
        let ok = unsafe {
            (self.exports.write_read)(
                index,
                write_len,
                write.as_ptr() as *mut c_void,
                read_step,
                read_times,
                &mut len,
                read.as_mut_ptr().cast(),
            )
        };
        *read_len = len;
        to_bool(ok)
    }

    fn read_i2c(&self, index: u32, device: u8, addr: u8, out: &mut u8) -> bool {
        to_bool(unsafe { (self.exports.read_i2c)(index, device, addr, out) })
    }

    fn write_i2c(&self, index: u32, device: u8, addr: u8, byte: u8) -> bool {
        to_bool(unsafe { (self.exports.write_i2c)(index, device, addr, byte) })
    }

    fn stream_i2c(&self, index: u32, write: &[u8], read: &mut [u8]) -> bool {
        let (Ok(write_len), Ok(read_len)) =
            (Ulong::try_from(write.len()), Ulong::try_from(read.len()))
        else {
            return false;
        };
        let read_ptr: *mut c_void = if read.is_empty() {
            std::ptr::null_mut()
        } else {
            read.as_mut_ptr().cast()
        };
        to_bool(unsafe {
            (self.exports.stream_i2c)(
                index,
                write_len,
                write.as_ptr() as *mut c_void,
                read_len,
                read_ptr,
            )
        })
    }

    fn read_eeprom(&self, index: u32, eeprom: u32, addr: u32, buf: &mut [u8]) -> bool {
        let Ok(len) = Ulong::try_from(buf.len()) else {
            return false;
        };
        to_bool(unsafe {
            (self.exports.read_eeprom)(index, eeprom as EepromId, addr, len, buf.as_mut_ptr())
        })
    }

    fn write_eeprom(&self, index: u32, eeprom: u32, addr: u32, buf: &[u8]) -> bool {
        let Ok(len) = Ulong::try_from(buf.len()) else {
            return false;
        };
        to_bool(unsafe {
            (self.exports.write_eeprom)(
                index,
                eeprom as EepromId,
                addr,
                len,
                buf.as_ptr() as *mut u8,
            )
        })
    }

    fn stream_spi4(&self, index: u32, chip_select: u32, buf: &mut [u8]) -> bool {
        let Ok(len) = Ulong::try_from(buf.len()) else {
            return false;
        };
        to_bool(unsafe {
            (self.exports.stream_spi4)(index, chip_select, len, buf.as_mut_ptr().cast())
        })
    }

    fn get_input(&self, index: u32, status: &mut u32) -> bool {
        to_bool(unsafe { (self.exports.get_input)(index, status) })
    }

    fn set_d5_d0(&self, index: u32, dir_out: u32, data_out: u32) -> bool {
        to_bool(unsafe { (self.exports.set_d5_d0)(index, dir_out, data_out) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_library_name() {
        let name = default_library_name();
        if cfg!(windows) {
            assert!(name.unwrap().starts_with("CH341DLL"));
        } else {
            assert!(matches!(name, Err(Ch341Error::UnsupportedPlatform(_))));
        }
    }

    #[test]
    fn test_missing_library() {
        let source = LibrarySource::Path(PathBuf::from("/nonexistent/libch341-missing.so"));
        match Ch341Dll::load(&source) {
            Err(Ch341Error::LibraryLoad { path, .. }) => {
                assert!(path.contains("libch341-missing"))
            }
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("loaded a nonexistent library"),
        }
    }
}
