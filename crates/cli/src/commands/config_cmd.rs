//! `saferplaces config` — Configuration management commands.

use saferplaces_config::AppConfig;

const REDACTED: &str = "[REDACTED]";

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set OPENAI_API_KEY or SAFERPLACES_API_KEY)");
    }
    if config.saferplaces_api.token.is_none() {
        warnings.push("No SaferPlaces API token (SAFERPLACES_API_TOKEN); process calls will be rejected");
    }
    if config.safercast_api.token.is_none() {
        warnings.push("No SaferCast API token (SAFERCAST_API_TOKEN); forecast calls will be rejected");
    }
    if config.storage.backend == "memory" {
        warnings.push("Storage backend is 'memory'; layers and threads are lost on exit");
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Provider:   {}", config.default_provider);
    println!("   Model:      {}", config.default_model);
    println!("   Max steps:  {}", config.agent.max_steps);
    println!("   Storage:    {} ({})", config.storage.backend, config.storage.bucket_root);
    println!("   Gateway:    {}:{}", config.gateway.host, config.gateway.port);

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

fn redacted(mut config: AppConfig) -> AppConfig {
    let hide = |secret: &mut Option<String>| {
        if secret.is_some() {
            *secret = Some(REDACTED.into());
        }
    };
    hide(&mut config.api_key);
    hide(&mut config.saferplaces_api.token);
    hide(&mut config.safercast_api.token);
    for provider in config.providers.values_mut() {
        hide(&mut provider.api_key);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn show_hides_secrets() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-secret".into());
        config.safercast_api.token = Some("cast-token".into());

        let out = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!out.contains("sk-secret"));
        assert!(!out.contains("cast-token"));
        assert!(out.contains(REDACTED));
    }

    #[test]
    fn redaction_leaves_missing_secrets_alone() {
        let config = redacted(AppConfig::default());
        assert!(config.api_key.is_none());
        assert!(config.saferplaces_api.token.is_none());
    }
}
