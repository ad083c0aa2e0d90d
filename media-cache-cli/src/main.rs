use std::time::Duration;

use clap::Parser;
use media_cache_engine::{
    CacheConfig, CacheStatus, DownloaderConfig, MediaCache, MediaDownloader,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod error;
mod utils;

use cli::{CleanArgs, CliArgs, Command, FetchArgs};
use error::AppError;
use utils::{format_bytes, parse_headers, parse_size};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();

    // RUST_LOG wins over --verbose
    let default_filter = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    let cache_config = match args.cache_dir {
        Some(dir) => CacheConfig::new(dir),
        None => CacheConfig::default(),
    };

    let downloader_config = match &args.command {
        Command::Fetch(fetch) => downloader_config(fetch)?,
        _ => DownloaderConfig::default(),
    };

    let cache = MediaCache::new(cache_config, MediaDownloader::new(downloader_config)).await?;

    match args.command {
        Command::Fetch(fetch) => run_fetch(&cache, fetch).await,
        Command::Path { urls } => {
            for url in urls {
                println!("{}", cache.path_for(&url).display());
            }
            Ok(())
        }
        Command::Exists { urls } => {
            for url in urls {
                let state = if cache.exists(&url).await { "cached" } else { "missing" };
                println!("{state}\t{url}");
            }
            Ok(())
        }
        Command::Size => {
            let bytes = cache.cache_size_bytes().await?;
            println!("{}\t{}", format_bytes(bytes), cache.root().display());
            Ok(())
        }
        Command::Clean(clean) => run_clean(&cache, clean).await,
    }
}

fn downloader_config(args: &FetchArgs) -> Result<DownloaderConfig, AppError> {
    let mut builder = DownloaderConfig::builder()
        .with_overall_timeout(Duration::from_secs(args.timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_max_retries(args.retries)
        .with_probe_enabled(!args.no_probe)
        .with_extra_headers(parse_headers(&args.headers));

    if let Some(user_agent) = &args.user_agent {
        builder = builder.with_user_agent(user_agent.as_str());
    }

    if args.no_proxy {
        info!("All proxy settings disabled (--no-proxy flag)");
        builder = builder.with_system_proxy(false);
    } else if let Some(proxy_url) = &args.proxy {
        builder = builder.with_proxy_url(proxy_url)?;
    }

    Ok(builder.build())
}

async fn run_fetch(cache: &MediaCache, args: FetchArgs) -> Result<(), AppError> {
    if args.output.is_some() && args.urls.len() > 1 {
        return Err(AppError::InvalidInput(
            "--output can only be used with a single URL".to_string(),
        ));
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling downloads");
                cancel.cancel();
            }
        });
    }

    let mut failures = 0usize;
    for url in &args.urls {
        match cache.fetch(url, &args.referer, &cancel).await {
            Ok(media) => {
                let status = match media.status {
                    CacheStatus::Hit => "hit",
                    CacheStatus::Miss => "miss",
                };
                println!(
                    "{status}\t{}\t{}\t{}",
                    media.content_type,
                    format_bytes(media.bytes.len() as u64),
                    media.path.display()
                );
                if let Some(output) = &args.output {
                    tokio::fs::write(output, &media.bytes).await?;
                    info!(path = %output.display(), "Wrote media copy");
                }
            }
            Err(e) => {
                error!(url = %url, error = %e, "Fetch failed");
                failures += 1;
            }
        }
        if cancel.is_cancelled() {
            break;
        }
    }

    match failures {
        0 => Ok(()),
        n => Err(AppError::InvalidInput(format!(
            "{n} of {} URLs could not be fetched",
            args.urls.len()
        ))),
    }
}

async fn run_clean(cache: &MediaCache, args: CleanArgs) -> Result<(), AppError> {
    if args.all {
        let removed = cache.clear().await?;
        println!("removed {removed} files");
        return Ok(());
    }

    if args.max_age_days.is_none() && args.max_size.is_none() {
        return Err(AppError::InvalidInput(
            "nothing to do: pass --max-age-days, --max-size or --all".to_string(),
        ));
    }

    let mut removed = 0;
    if let Some(days) = args.max_age_days {
        removed += cache.cleanup_old_files(days).await?;
    }
    if let Some(size) = &args.max_size {
        removed += cache.cleanup_by_size_bytes(parse_size(size)?).await?;
    }

    let remaining = cache.cache_size_bytes().await?;
    println!("removed {removed} files, {} remaining", format_bytes(remaining));
    Ok(())
}
