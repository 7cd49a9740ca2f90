//! List command - show stored assets or components

use crate::cli::args::{ListArgs, OutputFormat};
use crate::config::Config;
use crate::error::ProxyResult;
use crate::proxy::ProxyCache;
use crate::storage::{Asset, Component};
use crate::ui::{self, UiContext};
use console::style;

/// Execute the list command
pub async fn execute(args: ListArgs, config: &Config) -> ProxyResult<()> {
    let proxy = ProxyCache::from_config(config)?;
    let store = proxy.store();

    if args.components {
        let components = store.list_components(proxy.bucket()).await?;
        if components.is_empty() {
            print_empty(args.format, "No stored components");
            return Ok(());
        }
        match args.format {
            OutputFormat::Table => print_component_table(&components),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&components)?),
            OutputFormat::Plain => {
                for component in &components {
                    println!("{}", component.identity);
                }
            }
        }
    } else {
        let assets = store.list_assets(proxy.bucket()).await?;
        if assets.is_empty() {
            print_empty(args.format, "No stored assets");
            return Ok(());
        }
        match args.format {
            OutputFormat::Table => print_asset_table(&assets),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&assets)?),
            OutputFormat::Plain => {
                for asset in &assets {
                    println!("{}", asset.name);
                }
            }
        }
    }

    Ok(())
}

fn print_empty(format: OutputFormat, message: &str) {
    match format {
        OutputFormat::Json => println!("[]"),
        OutputFormat::Plain => {}
        OutputFormat::Table => ui::step_info(&UiContext::detect(), message),
    }
}

fn print_asset_table(assets: &[Asset]) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Assets");

    println!(
        "{:<60} {:<24} {:>10} {:<17}",
        style("NAME").bold(),
        style("KIND").bold(),
        style("SIZE").bold(),
        style("VERIFIED").bold()
    );
    println!("{}", "-".repeat(114));

    for asset in assets {
        let size = asset
            .size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let verified = asset
            .cache_info
            .as_ref()
            .map(|info| info.last_verified.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());

        println!(
            "{:<60} {:<24} {:>10} {:<17}",
            asset.name,
            style(asset.kind.as_str()).cyan(),
            size,
            verified
        );
    }

    println!();
    println!("{} asset(s)", assets.len());
}

fn print_component_table(components: &[Component]) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Components");

    println!(
        "{:<24} {:<32} {:<16} {:<17}",
        style("GROUP").bold(),
        style("NAME").bold(),
        style("VERSION").bold(),
        style("CREATED").bold()
    );
    println!("{}", "-".repeat(92));

    for component in components {
        println!(
            "{:<24} {:<32} {:<16} {:<17}",
            component.identity.group,
            component.identity.name,
            style(&component.identity.version).green(),
            component.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!();
    println!("{} component(s)", components.len());
}
