//! `saferplaces onboard` — First-time setup.

use saferplaces_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("SaferPlaces — First-Time Setup");
    println!("==============================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", config_path.display());

    let config = AppConfig::default();
    std::fs::create_dir_all(config.storage.local_root())?;
    println!("✅ Created storage root: {}", config.storage.local_root().display());

    println!("\n📝 Next steps:");
    println!("   1. Set OPENAI_API_KEY (or api_key in {})", config_path.display());
    println!("   2. Set SAFERPLACES_API_TOKEN and SAFERCAST_API_TOKEN for the process APIs");
    println!("   3. Run: saferplaces chat --user <you> --project <name>\n");

    Ok(())
}
