//! Driver backend selection
//!
//! The vendor library is the default backend. Builds with the `sim` feature
//! can swap in the in-memory simulator with `--sim`.

use rch341_core::{Ch341Context, LibrarySource};
use std::path::Path;

/// Information about a driver backend
pub struct BackendInfo {
    /// Name shown to the user
    pub name: &'static str,
    /// Short description
    pub description: &'static str,
}

/// Backends compiled into this binary
#[allow(unused_mut)]
pub fn available_backends() -> Vec<BackendInfo> {
    let mut backends = vec![BackendInfo {
        name: "native",
        description: "WCH vendor library (CH341DLL.DLL / CH341DLLA64.DLL, or --library)",
    }];

    #[cfg(feature = "sim")]
    backends.push(BackendInfo {
        name: "sim",
        description: "In-memory simulator: MPU6050 at 0x68, 24C02 at 0x50, SPI and GPIO loopback",
    });

    backends
}

/// Open the driver context requested on the command line
pub fn open_context(
    library: Option<&Path>,
    sim: bool,
) -> Result<Ch341Context, Box<dyn std::error::Error>> {
    if sim {
        return open_sim();
    }

    let source = match library {
        Some(path) => LibrarySource::Path(path.to_path_buf()),
        None => LibrarySource::Default,
    };
    let ctx = Ch341Context::native_from(&source)?;
    log::debug!("Using native backend (DLL version 0x{:X})", ctx.dll_version());
    Ok(ctx)
}

#[cfg(feature = "sim")]
fn open_sim() -> Result<Ch341Context, Box<dyn std::error::Error>> {
    log::info!("Using simulated CH341 driver");
    Ok(Ch341Context::new(std::sync::Arc::new(
        rch341_sim::SimDriver::default(),
    )))
}

#[cfg(not(feature = "sim"))]
fn open_sim() -> Result<Ch341Context, Box<dyn std::error::Error>> {
    Err("simulator support not compiled in (enable the 'sim' feature)".into())
}

/// One line per backend, for `info`
pub fn backend_summary() -> String {
    available_backends()
        .iter()
        .map(|b| format!("  {:<8} {}", b.name, b.description))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_is_always_available() {
        let backends = available_backends();
        assert_eq!(backends[0].name, "native");
        assert!(backend_summary().contains("native"));
    }

    #[cfg(feature = "sim")]
    #[test]
    fn test_open_sim() {
        let ctx = open_context(None, true).unwrap();
        let dev = ctx.open(0).unwrap();
        assert_eq!(dev.i2c_read_byte(0x68, 0x75).unwrap(), 0x68);
    }
}
