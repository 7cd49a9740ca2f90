//! Get command - serve one request through the cache

use crate::cli::args::GetArgs;
use crate::config::Config;
use crate::content::Content;
use crate::error::{ProxyError, ProxyResult};
use crate::proxy::{CacheStatus, ProxyCache};
use crate::route::Request;
use crate::ui::{TaskSpinner, UiContext};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{self, AsyncWrite, AsyncWriteExt};

/// Execute the get command
pub async fn execute(args: GetArgs, config: &Config) -> ProxyResult<()> {
    let ctx = UiContext::detect();
    let proxy = ProxyCache::from_config(config)?;
    let request = Request::parse(&args.path)?;

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("GET {}", request));

    let served = match proxy.get_with_status(&request).await {
        Ok(served) => served,
        Err(e) => {
            spinner.stop_error(&format!("GET {}", request));
            return Err(e);
        }
    };

    let Some((content, status)) = served else {
        spinner.stop_error(&format!("GET {}: not found upstream", request));
        return Err(ProxyError::UpstreamMissing(request.to_string()));
    };

    let summary = format!(
        "{} {} ({}, {})",
        status,
        request,
        content.content_type,
        format_size(content.size)
    );
    match status {
        CacheStatus::Stale => spinner.stop_warn(&summary),
        _ => spinner.stop(&summary),
    }

    match args.output {
        Some(path) => write_to_file(&content, &path).await,
        None => copy_body(&content, &mut io::stdout()).await,
    }
}

async fn write_to_file(content: &Content, path: &Path) -> ProxyResult<()> {
    let mut file = File::create(path)
        .await
        .map_err(|e| ProxyError::io(format!("creating {}", path.display()), e))?;
    copy_body(content, &mut file).await
}

async fn copy_body<W: AsyncWrite + Unpin>(content: &Content, out: &mut W) -> ProxyResult<()> {
    let mut body = content.open().await?;
    io::copy(&mut body, out)
        .await
        .map_err(|e| ProxyError::io("writing response body", e))?;
    out.flush()
        .await
        .map_err(|e| ProxyError::io("flushing response body", e))?;
    Ok(())
}

/// Human-readable byte count
fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}
