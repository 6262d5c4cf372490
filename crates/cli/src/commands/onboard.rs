//! `rustedtavern onboard`: first-time setup.

use rustedtavern_config::AppConfig;
use rustedtavern_preset::Preset;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("RustedTavern setup");
    println!("==================\n");

    if config_path.exists() {
        println!("  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete and re-run onboard.\n");
    } else {
        std::fs::create_dir_all(&config_dir)?;
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("  Created config.toml at: {}", config_path.display());
    }

    let config = AppConfig::load()?;
    for dir in [
        config.characters_dir(),
        config.presets_dir(),
        config.presets_dir().join("regex"),
        config.history_dir(),
    ] {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
            println!("  Created {}", dir.display());
        }
    }

    let builtin = Preset::builtin_default();
    let preset_path = config.presets_dir().join(format!("{}.json", builtin.name));
    if !preset_path.exists() {
        let path = builtin.save_to(&config.presets_dir())?;
        println!("  Wrote preset {}", path.display());
    }

    println!("\nNext steps:");
    println!("  1. Put your API key in config.toml or RUSTEDTAVERN_API_KEY");
    println!("  2. Drop character cards (*.json) into {}", config.characters_dir().display());
    println!("  3. rustedtavern chat --nickname <you>");
    Ok(())
}
