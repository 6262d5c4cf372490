//! `rustedtavern preset-import`: convert a SillyTavern preset export.

use super::runtime::load_config;
use rustedtavern_preset::{compile, import::import_sillytavern};
use std::path::Path;
use tracing::warn;

pub async fn run(file: &Path, name: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let name = match name {
        Some(name) => name.to_string(),
        None => file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or("Cannot derive a preset name from the file; pass --name")?,
    };

    let json = std::fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {e}", file.display()))?;
    let preset = import_sillytavern(&json, &name)?;

    match compile(&preset) {
        Ok(order) => {
            for diagnostic in order.diagnostics() {
                println!("  note: {diagnostic}");
            }
        }
        Err(e) => warn!(preset = %name, error = %e, "Imported preset cannot be activated until fixed"),
    }

    let path = preset.save_to(&config.presets_dir())?;
    println!(
        "Imported '{name}' ({} fragments, {} order entries) to {}",
        preset.fragments.len(),
        preset.order.len(),
        path.display()
    );
    Ok(())
}
