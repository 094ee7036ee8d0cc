//! Info command implementation

use crate::backend;
use rch341_core::{Ch341Context, Ch341Device};

/// Print library, driver and chip information
pub fn run_info(ctx: &Ch341Context, dev: &Ch341Device) -> Result<(), Box<dyn std::error::Error>> {
    println!("Backends:");
    println!("{}", backend::backend_summary());
    println!();

    println!("DLL version:    0x{:08X}", ctx.dll_version());
    match ctx.driver_version() {
        Ok(v) => println!("Driver version: 0x{:08X}", v),
        Err(e) => println!("Driver version: unavailable ({})", e),
    }

    println!("Device index:   {}", dev.index());
    println!("Chip:           {}", dev.ic_version()?);
    println!("Device path:    {}", dev.device_name()?);
    println!("Input status:   0x{:08X}", dev.input_status()?);

    Ok(())
}
