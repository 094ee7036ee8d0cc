//! Steel Scheme REPL for scripting CH341 devices
//!
//! This crate exposes the CH341 binding to a Scheme environment, either as
//! an interactive REPL or as a script runner.
//!
//! # Features
//!
//! - Device lifecycle through integer handles (`ch341-open`, `ch341-close`)
//! - I2C transfers, register helpers and bus scan
//! - 24Cxx EEPROM access, SPI exchange and GPIO control
//! - EEPROM ids, I2C speeds and pin bits as constants
//! - Command history, tab completion and multi-line input
//!
//! # Example Session
//!
//! ```scheme
//! λ > (define h (ch341-open 0))
//! λ > (i2c-transfer h #x68 (list #x75) 1)
//! => (104)  ; MPU6050 WHO_AM_I
//!
//! λ > (i2c-scan h)
//! => (80 104)
//!
//! λ > (ch341-close h)
//! => #t
//! ```

mod device_module;
mod error;
pub mod helper;

pub use device_module::{create_constants_module, create_device_module, HandleTable, SharedTable};
pub use error::ReplError;

use crate::helper::ReplHelper;
use colored::Colorize;
use directories::ProjectDirs;
use rch341_core::Ch341Context;
use rustyline::config::Configurer;
use rustyline::error::ReadlineError;
use rustyline::history::FileHistory;
use rustyline::Editor;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use steel::rvals::SteelVal;
use steel::steel_vm::engine::Engine;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Names offered for completion and highlighted in the editor
const KNOWN_NAMES: &[&str] = &[
    // Device
    "ch341-open",
    "ch341-close",
    "ch341-open?",
    "ch341-reset",
    "ch341-set-exclusive",
    "ch341-ic-version",
    "ch341-name",
    "ch341-dll-version",
    "ch341-driver-version",
    "ch341-help",
    // I2C
    "i2c-set-speed",
    "i2c-transfer",
    "i2c-read",
    "i2c-write",
    "i2c-read-byte",
    "i2c-write-byte",
    "i2c-probe",
    "i2c-scan",
    // EEPROM, SPI, GPIO
    "eeprom-read",
    "eeprom-write",
    "spi-transfer",
    "spi-transfer-lsb",
    "gpio-set",
    "gpio-get",
    "gpio-input",
    // Byte utilities
    "make-bytes",
    "bytes-length",
    "bytes-ref",
    "list->bytes",
    "bytes->hex",
    "hex->bytes",
    // Constants
    "ID_24C01",
    "ID_24C02",
    "ID_24C04",
    "ID_24C08",
    "ID_24C16",
    "ID_24C32",
    "ID_24C64",
    "ID_24C128",
    "ID_24C256",
    "ID_24C512",
    "ID_24C1024",
    "ID_24C2048",
    "ID_24C4096",
    "I2C_20K",
    "I2C_100K",
    "I2C_400K",
    "I2C_750K",
    "IC_VER_CH341",
    "IC_VER_CH341A",
    "IC_VER_CH341A3",
    "PIN_D0",
    "PIN_D1",
    "PIN_D2",
    "PIN_D3",
    "PIN_D4",
    "PIN_D5",
    "PIN_ALL",
    "STATUS_SDA",
    "CS_D0",
    "CS_D1",
    "CS_D2",
    "CS_NONE",
];

/// Get the ASCII art banner
fn get_banner() -> String {
    format!(
        r#"
           _     _____ _  _  _
   _ _ __ | |_  |__ / || |/ |
  | '_/ _|| ' \  |_ \__  _| |      Version {}
  |_| \__||_||_||___/  |_||_|      :? for help
"#,
        VERSION
    )
    .bright_yellow()
    .bold()
    .to_string()
}

/// Get the history file path
fn get_history_path() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "rch341") {
        let mut path = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&path).ok();
        path.push("repl_history");
        path
    } else {
        PathBuf::from(".rch341_history")
    }
}

/// Build an engine with the rch341 modules loaded
///
/// Each engine gets its own handle table; devices it opened are closed when
/// the engine is dropped.
pub fn create_engine(ctx: Ch341Context) -> Result<Engine, ReplError> {
    let mut engine = Engine::new();

    let table = Arc::new(Mutex::new(HandleTable::new(ctx)));
    engine.register_module(create_device_module(table));
    engine.register_module(create_constants_module());

    engine
        .run(
            r#"
        (require-builtin rch341/device)
        (require-builtin rch341/consts)
    "#,
        )
        .map_err(|e| ReplError::SteelError(format!("{}", e)))?;

    Ok(engine)
}

fn print_results(results: Vec<SteelVal>) {
    for result in results {
        if !matches!(result, SteelVal::Void) {
            print!("{} ", "=>".bright_blue().bold());
            println!("{}", result);
        }
    }
}

/// Run the interactive Steel REPL
pub fn run_repl(ctx: Ch341Context) -> Result<(), ReplError> {
    let mut engine = create_engine(ctx)?;

    let helper = ReplHelper::new(KNOWN_NAMES.iter().copied());
    let mut rl = Editor::<ReplHelper, FileHistory>::new()
        .map_err(|e| ReplError::IoError(std::io::Error::other(e)))?;
    rl.set_helper(Some(helper));
    rl.set_check_cursor_position(true);

    let history_path = get_history_path();
    if rl.load_history(&history_path).is_err() {
        log::debug!("No REPL history at {}", history_path.display());
    }

    println!("{}", get_banner());
    println!(
        "Type {} for available commands, {} or {} to exit.",
        "(ch341-help)".bright_cyan(),
        "(quit)".bright_cyan(),
        "(exit)".bright_cyan()
    );
    println!();

    let prompt = format!("{} ", "λ >".bright_green().bold());

    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(&line);

                match input {
                    "(quit)" | "(exit)" | ":q" | ":quit" => {
                        println!("Goodbye!");
                        break;
                    }
                    ":?" | ":help" => {
                        print_help();
                        continue;
                    }
                    _ => {}
                }

                match engine.run(line.clone()) {
                    Ok(results) => print_results(results),
                    Err(e) => eprintln!("{}: {}", "Error".bright_red().bold(), e),
                }

                let _ = std::io::stdout().flush();
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("{}: {:?}", "Error".bright_red().bold(), err);
                break;
            }
        }
    }

    if let Err(e) = rl.save_history(&history_path) {
        log::warn!("Failed to save REPL history: {}", e);
    }

    Ok(())
}

/// Print help message
fn print_help() {
    println!(
        "
    {} -- displays help dialog
    {}    -- exits the REPL

    {}       -- show rch341 device commands
    ",
        ":? | :help".bright_cyan(),
        ":q | :quit".bright_cyan(),
        "(ch341-help)".bright_cyan(),
    );
}

/// Run a Steel script, printing every non-void result
pub fn run_script(ctx: Ch341Context, script: String) -> Result<(), ReplError> {
    let mut engine = create_engine(ctx)?;
    let results = engine
        .run(script)
        .map_err(|e| ReplError::SteelError(format!("{}", e)))?;
    print_results(results);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rch341_sim::SimDriver;

    fn engine() -> (Arc<SimDriver>, Engine) {
        let sim = Arc::new(SimDriver::default());
        let engine = create_engine(Ch341Context::new(sim.clone())).unwrap();
        (sim, engine)
    }

    fn ints(val: &SteelVal) -> Vec<isize> {
        match val {
            SteelVal::ListV(items) => items
                .iter()
                .map(|v| match v {
                    SteelVal::IntV(i) => *i,
                    other => panic!("expected integer, got {}", other),
                })
                .collect(),
            other => panic!("expected list, got {}", other),
        }
    }

    fn last(results: Vec<SteelVal>) -> SteelVal {
        results.into_iter().last().expect("no result")
    }

    #[test]
    fn test_who_am_i_script() {
        let (_sim, mut engine) = engine();
        let results = engine
            .run(
                r#"
            (define h (ch341-open 0))
            (define id (i2c-transfer h #x68 (list #x75) 1))
            (ch341-close h)
            id
        "#,
            )
            .unwrap();
        assert_eq!(ints(&last(results)), vec![0x68]);
    }

    #[test]
    fn test_closed_handle_reports_kind() {
        let (sim, mut engine) = engine();
        engine
            .run(
                r#"
            (define h (ch341-open 0))
            (ch341-close h)
            (ch341-close h)
        "#,
            )
            .unwrap();
        assert_eq!(sim.board_stats(0).unwrap().closes, 1);

        let err = engine.run("(i2c-read-byte h #x68 #x75)").unwrap_err();
        assert!(err.to_string().contains("HandleClosed"), "{}", err);
    }

    #[test]
    fn test_script_errors_carry_kind() {
        let (_sim, mut engine) = engine();
        engine.run("(define h (ch341-open 0))").unwrap();

        let err = engine.run("(ch341-open 0)").unwrap_err();
        assert!(err.to_string().contains("DeviceBusy"), "{}", err);

        let err = engine.run("(i2c-transfer h #x80 (list 0) 1)").unwrap_err();
        assert!(err.to_string().contains("InvalidArgument"), "{}", err);

        let err = engine.run("(i2c-transfer h #x20 (list 0) 1)").unwrap_err();
        assert!(err.to_string().contains("IOError"), "{}", err);

        let err = engine.run("(spi-transfer h CS_D0 (list 256))").unwrap_err();
        assert!(err.to_string().contains("InvalidArgument"), "{}", err);

        let err = engine.run("(i2c-scan 42)").unwrap_err();
        assert!(err.to_string().contains("unknown handle"), "{}", err);
    }

    #[test]
    fn test_gpio_and_spi_script() {
        let (_sim, mut engine) = engine();
        let results = engine
            .run(
                r#"
            (define h (ch341-open 0))
            (gpio-set h (+ PIN_D0 PIN_D3) PIN_D3)
            (gpio-get h PIN_ALL)
        "#,
            )
            .unwrap();
        assert!(matches!(last(results), SteelVal::IntV(0x08)));

        let results = engine.run("(spi-transfer h CS_D1 (list 1 2 3))").unwrap();
        assert_eq!(ints(&last(results)), vec![1, 2, 3]);

        let results = engine.run("(spi-transfer-lsb h CS_NONE (list))").unwrap();
        assert!(ints(&last(results)).is_empty());
    }

    #[test]
    fn test_eeprom_and_scan_script() {
        let (_sim, mut engine) = engine();
        let results = engine
            .run(
                r#"
            (define h (ch341-open 0))
            (eeprom-write h ID_24C02 16 (hex->bytes "cafe"))
            (eeprom-read h ID_24C02 16 2)
        "#,
            )
            .unwrap();
        assert_eq!(ints(&last(results)), vec![0xCA, 0xFE]);

        let results = engine.run("(i2c-scan h)").unwrap();
        assert_eq!(ints(&last(results)), vec![0x50, 0x68]);
    }

    #[test]
    fn test_engines_share_claims() {
        let sim = Arc::new(SimDriver::default());
        let ctx = Ch341Context::new(sim);
        let mut a = create_engine(ctx.clone()).unwrap();
        let mut b = create_engine(ctx).unwrap();

        a.run("(define h (ch341-open 0))").unwrap();
        let err = b.run("(ch341-open 0)").unwrap_err();
        assert!(err.to_string().contains("DeviceBusy"), "{}", err);
    }
}
