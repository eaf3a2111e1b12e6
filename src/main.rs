use std::path::PathBuf;
use std::time::Duration;

use workpool::config::Config;
use workpool::server::{self, state::AppState};
use workpool::store::Serializer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = parse_args(std::env::args().collect())?;

    tracing::info!(
        "Starting coordination server on {} (store {}, serializer {})",
        config.bind_addr,
        config.store_uri,
        config.serializer.name()
    );

    let state = AppState::new(config.clone());
    let app = server::router(state.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(state.shutdown.clone().cancelled_owned())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn parse_args(args: Vec<String>) -> anyhow::Result<Config> {
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                config.bind_addr = required(&args, i)?.parse()?;
                i += 2;
            }
            "--store" => {
                config.store_uri = required(&args, i)?.to_string();
                i += 2;
            }
            "--serializer" => {
                config.serializer = Serializer::resolve(required(&args, i)?)?;
                i += 2;
            }
            "--out" => {
                config.output_dir = Some(PathBuf::from(required(&args, i)?));
                i += 2;
            }
            "--group-by" => {
                config.group_by = required(&args, i)?
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!(e))?;
                i += 2;
            }
            "--heartbeat-interval" => {
                config.heartbeat_interval = Duration::from_secs(required(&args, i)?.parse()?);
                i += 2;
            }
            "--bucket-maximum" => {
                config.run_time_bucket_maximum = Some(required(&args, i)?.parse()?);
                i += 2;
            }
            "--workers" => {
                config.seed_worker_count = required(&args, i)?.parse()?;
                i += 2;
            }
            "--single-run" => {
                config.single_run = true;
                i += 1;
            }
            "--single-seed-per-run" => {
                config.single_seed_per_run = true;
                i += 1;
            }
            "--help" | "-h" => {
                usage(&args[0]);
                std::process::exit(0);
            }
            other => {
                usage(&args[0]);
                anyhow::bail!("unknown argument: {other}");
            }
        }
    }

    Ok(config)
}

fn required<'a>(args: &'a [String], i: usize) -> anyhow::Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("{} requires a value", args[i]))
}

fn usage(program: &str) {
    eprintln!("Usage: {program} [options]");
    eprintln!("  --bind <addr:port>         listen address (default 127.0.0.1:5138)");
    eprintln!("  --store <uri>              memory:/// or file:///path (default memory:///)");
    eprintln!("  --serializer <name>        json or msgpack (default json)");
    eprintln!("  --out <dir>                write per-run report artifacts here");
    eprintln!("  --group-by <mode>          file or timings (default timings)");
    eprintln!("  --heartbeat-interval <s>   worker check-in cadence (default 10)");
    eprintln!("  --bucket-maximum <secs>    fixed run-time bucket maximum");
    eprintln!("  --workers <n>              worker count used to derive bucket maximum");
    eprintln!("  --single-run               exit once the run is shut down");
    eprintln!("  --single-seed-per-run      ignore repeat seeds for a run");
}
