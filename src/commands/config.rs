//! Configuration file editor command.
//!
//! Opens the wavext configuration file in the user's preferred editor, writing a file with
//! every default spelled out first if none exists.

use std::path::Path;
use std::process::Command;
use wavext::config::{get_config_path, WavextConfig};

/// Opens the wavext configuration file in the user's preferred editor.
///
/// Tries editors in this order:
/// 1. $EDITOR environment variable
/// 2. nano (most user-friendly fallback)
/// 3. vi (ultimate fallback, always available)
///
/// # Errors
/// - If the default config cannot be written
/// - If no editor can be found or executed
pub fn handle_config() -> anyhow::Result<()> {
    let config_path = get_config_path()?;
    ensure_config_file(&config_path)?;

    tracing::info!("Opening config file: {}", config_path.display());

    let editor = find_editor()?;
    tracing::debug!("Using editor: {}", editor);

    let status = Command::new(&editor)
        .arg(&config_path)
        .status()
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to open editor '{editor}': {e}. Make sure the editor is installed and accessible."
            )
        })?;

    if !status.success() {
        return Err(anyhow::anyhow!(
            "Editor exited with error code: {}",
            status.code().unwrap_or(-1)
        ));
    }

    // Surface mistakes now rather than on the next extraction.
    if let Err(e) = WavextConfig::load_from(&config_path) {
        eprintln!("Warning: {e:#}");
    }

    tracing::info!("Config file edited successfully");
    Ok(())
}

/// Writes the default configuration to `path` unless a file is already there.
fn ensure_config_file(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        return Ok(());
    }
    WavextConfig::default().save_to(path)?;
    tracing::info!("Created default config at {}", path.display());
    Ok(())
}

/// Finds the best available editor to use.
///
/// Tries in order: $EDITOR, nano, vi
fn find_editor() -> anyhow::Result<String> {
    if let Ok(editor) = std::env::var("EDITOR") {
        if !editor.is_empty() {
            return Ok(editor);
        }
    }

    for editor in &["nano", "vi"] {
        if is_editor_available(editor) {
            return Ok(editor.to_string());
        }
    }

    Err(anyhow::anyhow!(
        "No editor found. Please set the $EDITOR environment variable."
    ))
}

/// Checks if an editor is available in the system PATH.
fn is_editor_available(editor: &str) -> bool {
    Command::new("which")
        .arg(editor)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}
