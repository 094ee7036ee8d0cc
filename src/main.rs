//! rch341 - command line front-end for CH341 USB bridges
//!
//! Talks to the chip through the WCH vendor driver library (or the built-in
//! simulator with `--sim`) and exposes its I2C, EEPROM, SPI and GPIO
//! functions as subcommands. `rch341 repl` opens a Scheme environment with
//! the same operations for scripting.

mod backend;
mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use rch341_core::{Ch341Context, Ch341Device, OpenOptions};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    #[cfg(feature = "sim")]
    let sim = cli.sim;
    #[cfg(not(feature = "sim"))]
    let sim = false;

    let ctx = match backend::open_context(cli.library.as_deref(), sim) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Failed to load CH341 driver: {}", e);
            std::process::exit(1);
        }
    };

    let options = OpenOptions {
        reset: !cli.no_reset,
        exclusive: cli.exclusive,
    };

    if let Err(e) = run(cli.command, &ctx, cli.device, options) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn open(
    ctx: &Ch341Context,
    index: u32,
    options: OpenOptions,
) -> Result<Ch341Device, Box<dyn std::error::Error>> {
    let dev = ctx.open_with(index, options)?;
    log::debug!("Opened CH341 device {}", dev.index());
    Ok(dev)
}

/// Dispatch one subcommand; the device is opened here and closed on return
fn run(
    command: Commands,
    ctx: &Ch341Context,
    index: u32,
    options: OpenOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Info => {
            let dev = open(ctx, index, options)?;
            commands::info::run_info(ctx, &dev)
        }
        Commands::I2cScan { speed } => {
            let dev = open(ctx, index, options)?;
            commands::i2c::run_scan(&dev, speed)
        }
        Commands::I2cRead {
            address,
            register,
            length,
            speed,
        } => {
            let dev = open(ctx, index, options)?;
            commands::i2c::run_read(&dev, address, register, length, speed)
        }
        Commands::I2cWrite {
            address,
            register,
            data,
            speed,
        } => {
            let dev = open(ctx, index, options)?;
            commands::i2c::run_write(&dev, address, register, &data, speed)
        }
        Commands::EepromRead {
            eeprom,
            output,
            start,
            length,
        } => {
            let dev = open(ctx, index, options)?;
            commands::eeprom::run_read(&dev, eeprom, output.as_deref(), start, length)
        }
        Commands::EepromWrite {
            eeprom,
            input,
            start,
            verify,
        } => {
            let dev = open(ctx, index, options)?;
            commands::eeprom::run_write(&dev, eeprom, &input, start, verify)
        }
        Commands::Spi {
            data,
            cs,
            no_cs,
            lsb_first,
        } => {
            let dev = open(ctx, index, options)?;
            commands::spi::run_spi(&dev, &data, cs, no_cs, lsb_first)
        }
        Commands::GpioSet { pins, values } => {
            let dev = open(ctx, index, options)?;
            commands::gpio::run_set(&dev, pins, values)
        }
        Commands::GpioGet { pins, raw } => {
            let dev = open(ctx, index, options)?;
            commands::gpio::run_get(&dev, pins, raw)
        }
        #[cfg(feature = "repl")]
        Commands::Repl { script } => commands::repl::cmd_repl(ctx.clone(), script.as_deref()),
    }
}
