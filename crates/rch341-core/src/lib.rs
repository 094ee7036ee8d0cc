//! rch341-core - binding to the WCH CH341 vendor driver
//!
//! This crate forwards calls into the vendor's `CH341DLL` library and exposes
//! them with checked argument types. The USB protocol, bus timing and device
//! enumeration all live inside the vendor library; this layer only validates
//! arguments, marshals buffers, tracks handle lifetimes and translates
//! failures into [`Ch341Error`].
//!
//! The driver itself sits behind the [`Ch341Driver`] trait. [`Ch341Dll`] is
//! the real library, loaded once per process; the `rch341-sim` crate provides
//! an in-memory stand-in for tests.
//!
//! # Example
//!
//! ```no_run
//! use rch341_core::Ch341Context;
//!
//! let ctx = Ch341Context::native()?;
//! let dev = ctx.open(0)?;
//! let who_am_i = dev.i2c_transfer(0x68, &[0x75], 1)?;
//! println!("WHO_AM_I: 0x{:02X}", who_am_i[0]);
//! dev.close();
//! # Ok::<(), rch341_core::Ch341Error>(())
//! ```

mod device;
mod dll;
mod driver;
mod error;
pub mod protocol;
mod types;

pub use device::{Ch341Context, Ch341Device, OpenOptions};
pub use dll::{default_library_name, Ch341Dll, LibrarySource};
pub use driver::{Ch341Driver, INVALID_HANDLE_VALUE};
pub use error::{Ch341Error, ErrorKind, Result};
pub use types::*;
