use std::env;
use std::path::PathBuf;

use kinapp_offline::{
    AppConfig, CacheStorage, DiskCacheStorage, HttpFetcher, MemoryCacheStorage,
    OfflineCachePolicy,
};

fn print_usage() {
    eprintln!("Usage: kinapp-offline [MODE] [OPTIONS]");
    eprintln!();
    eprintln!("Modes:");
    eprintln!("  (default)              Install the cache and serve the offline proxy");
    eprintln!("  --prefetch             Pre-cache the seed list and exit");
    eprintln!("  --cleanup              Delete stale cache generations and exit");
    eprintln!("  --write-config         Write the effective config to the config path and exit");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <PATH>        Config file (default: {})", AppConfig::default_path().display());
    eprintln!("  --origin <URL>         Origin server to put behind the cache");
    eprintln!("  --cache-version <NAME> Cache generation label");
    eprintln!("  --host <HOST>          Proxy bind address");
    eprintln!("  --port <PORT>          Proxy bind port");
    eprintln!("  --cache-dir <DIR>      Directory for cache generations");
    eprintln!("  --memory               Keep the cache in memory only");
    eprintln!("  -h, --help             Show this help");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Serve,
    Prefetch,
    Cleanup,
    WriteConfig,
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

fn take_value(args: &[String], i: &mut usize, flag: &str) -> String {
    *i += 1;
    args.get(*i)
        .cloned()
        .unwrap_or_else(|| fail(&format!("{flag} requires a value")))
}

#[tokio::main]
async fn main() -> kinapp_offline::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut mode = Mode::Serve;
    let mut config_path = AppConfig::default_path();
    let mut origin = None;
    let mut version = None;
    let mut host = None;
    let mut port = None;
    let mut cache_dir = None;
    let mut memory = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--prefetch" => mode = Mode::Prefetch,
            "--cleanup" => mode = Mode::Cleanup,
            "--write-config" => mode = Mode::WriteConfig,
            "--config" => config_path = PathBuf::from(take_value(&args, &mut i, "--config")),
            "--origin" => origin = Some(take_value(&args, &mut i, "--origin")),
            "--cache-version" => version = Some(take_value(&args, &mut i, "--cache-version")),
            "--host" => host = Some(take_value(&args, &mut i, "--host")),
            "--port" => {
                let value = take_value(&args, &mut i, "--port");
                port = Some(
                    value
                        .parse::<u16>()
                        .unwrap_or_else(|_| fail(&format!("invalid port: {value}"))),
                );
            }
            "--cache-dir" => cache_dir = Some(PathBuf::from(take_value(&args, &mut i, "--cache-dir"))),
            "--memory" => memory = true,
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let mut config = AppConfig::load_or_default(&config_path)?;
    log::info!("Using config {}", config_path.display());
    if let Some(origin) = origin {
        config.cache.origin = origin;
    }
    if let Some(version) = version {
        config.cache.version = version;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(dir) = cache_dir {
        config.server.cache_dir = Some(dir);
    }
    if memory {
        config.server.cache_dir = None;
    }

    if mode == Mode::WriteConfig {
        config.save(&config_path)?;
        log::info!("Wrote {}", config_path.display());
        return Ok(());
    }

    match config.server.cache_dir.clone() {
        Some(dir) => {
            log::info!("Cache directory: {}", dir.display());
            run(config, DiskCacheStorage::new(dir), mode).await
        }
        None => {
            log::info!("Cache kept in memory");
            run(config, MemoryCacheStorage::new(), mode).await
        }
    }
}

async fn run<S: CacheStorage + 'static>(
    config: AppConfig,
    storage: S,
    mode: Mode,
) -> kinapp_offline::Result<()> {
    let fetcher = HttpFetcher::new(&config.fetch)?;
    let policy = OfflineCachePolicy::new(&config.cache, storage, fetcher)?;

    match mode {
        Mode::Prefetch => {
            let count = policy.install().await?;
            println!("Cached {count} resources in {}", policy.version());
            Ok(())
        }
        Mode::Cleanup => {
            let deleted = policy.cleanup().await?;
            if deleted.is_empty() {
                println!("No stale caches");
            } else {
                println!("Deleted {}", deleted.join(", "));
            }
            Ok(())
        }
        Mode::Serve | Mode::WriteConfig => serve(config, policy).await,
    }
}

#[cfg(feature = "server")]
async fn serve<S: CacheStorage + 'static>(
    config: AppConfig,
    policy: OfflineCachePolicy<S, HttpFetcher>,
) -> kinapp_offline::Result<()> {
    let origin = reqwest::Url::parse(&config.cache.origin).map_err(|e| kinapp_offline::Error::Url {
        url: config.cache.origin.clone(),
        reason: e.to_string(),
    })?;
    let host = std::sync::Arc::new(kinapp_offline::WorkerHost::new());
    host.register(policy).await?;
    kinapp_offline::server::run_server(host, origin, &config.server).await
}

#[cfg(not(feature = "server"))]
async fn serve<S: CacheStorage + 'static>(
    _config: AppConfig,
    _policy: OfflineCachePolicy<S, HttpFetcher>,
) -> kinapp_offline::Result<()> {
    eprintln!("Proxy support requires the 'server' feature");
    std::process::exit(1);
}
