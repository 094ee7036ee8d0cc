//! REPL command implementation

use rch341_core::Ch341Context;
use std::path::Path;

/// Run the Scheme REPL or execute a script
///
/// Scripts open their own handles, so the context is passed through unclaimed.
pub fn cmd_repl(
    ctx: Ch341Context,
    script: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(script_path) = script {
        let script_content = std::fs::read_to_string(script_path)?;
        rch341_repl::run_script(ctx, script_content)?;
    } else {
        rch341_repl::run_repl(ctx)?;
    }

    Ok(())
}
