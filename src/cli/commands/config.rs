//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{ProxyError, ProxyResult};
use crate::repository::Repository;
use crate::storage::HashAlgorithm;
use crate::ui::{self, UiContext};

const VALID_KEYS: &[&str] = &[
    "general.log_format",
    "repository.name",
    "repository.url",
    "repository.upstream_url",
    "repository.role_download_url",
    "storage.root",
    "storage.hash_algorithms",
    "proxy.content_max_age",
    "proxy.metadata_max_age",
    "proxy.timeout_secs",
];

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> ProxyResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> ProxyResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> ProxyResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());

    Ok(())
}

async fn set_value(manager: &ConfigManager, config: &Config, key: &str, value: &str) -> ProxyResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();

    let parts: Vec<&str> = key.split('.').collect();
    match parts.as_slice() {
        ["general", "log_format"] => config.general.log_format = parse_log_format(value)?,

        ["repository", "name"] => config.repository.name = value.to_string(),
        ["repository", "url"] => config.repository.url = value.to_string(),
        ["repository", "upstream_url"] => config.repository.upstream_url = value.to_string(),
        ["repository", "role_download_url"] => {
            config.repository.role_download_url = value.to_string()
        }

        ["storage", "root"] => config.storage.root = value.into(),
        ["storage", "hash_algorithms"] => {
            config.storage.hash_algorithms = parse_algorithms(value)?
        }

        ["proxy", "content_max_age"] => config.proxy.content_max_age = parse_number(key, value)?,
        ["proxy", "metadata_max_age"] => config.proxy.metadata_max_age = parse_number(key, value)?,
        ["proxy", "timeout_secs"] => config.proxy.timeout_secs = parse_number(key, value)?,

        _ => {
            ui::step_error_detail(&ctx, "Unknown config key", key);
            ui::remark(&ctx, "Valid keys:");
            for key in VALID_KEYS {
                ui::remark(&ctx, &format!("  {}", key));
            }
            return Ok(());
        }
    }

    // Reject URLs and names the proxy could not start with
    Repository::from_config(&config.repository)?;

    manager.save(&config).await?;
    ui::step_ok(&ctx, &format!("Set {} = {}", key, value));

    Ok(())
}

fn parse_log_format(value: &str) -> ProxyResult<String> {
    match value {
        "text" | "json" => Ok(value.to_string()),
        _ => Err(ProxyError::BadRequest(format!(
            "log_format must be 'text' or 'json', got '{}'",
            value
        ))),
    }
}

fn parse_algorithms(value: &str) -> ProxyResult<Vec<String>> {
    let algorithms = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<HashAlgorithm>().map(|a| a.as_str().to_string()))
        .collect::<ProxyResult<Vec<_>>>()?;
    if algorithms.is_empty() {
        return Err(ProxyError::BadRequest("at least one hash algorithm is required".to_string()));
    }
    Ok(algorithms)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ProxyResult<T> {
    value
        .parse()
        .map_err(|_| ProxyError::BadRequest(format!("{} expects a number, got '{}'", key, value)))
}
