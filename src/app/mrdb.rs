use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mrdb::cmd::Args;
use mrdb::{coordinator, standalone, worker, workload};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let workload = workload::named(&args.workload)?;
    let port: u16 = args.port.parse().context("invalid --port")?;
    let tempdir = args.tempdir();

    if args.standalone {
        let [input, output] = paths(&args, "--standalone")?;
        standalone::run(
            standalone::Config {
                port,
                tempdir,
                m: args.m,
                r: args.r,
                input,
                output,
            },
            workload,
        )
        .await?;
    } else if args.master {
        let [input, output] = paths(&args, "--master")?;
        let coordinator = coordinator::Coordinator::bind(coordinator::Config {
            port,
            wait: args.wait,
            tempdir,
            m: args.m,
            r: args.r,
            input,
            output,
        })
        .await?;
        info!("starting coordinator at {}", coordinator.host());
        coordinator.run().await?;
    } else {
        let worker = worker::Worker::bind(worker::Config {
            port,
            master_addr: args.master_addr.clone(),
            tempdir,
        })
        .await?;
        if args.master_addr == worker.host() {
            bail!(
                "master address is the same as this worker ({})",
                worker.host()
            );
        }
        info!("starting worker at {}", worker.host());
        worker.run(workload).await?;
    }
    Ok(())
}

fn paths(args: &Args, mode: &str) -> Result<[std::path::PathBuf; 2]> {
    match args.paths.as_slice() {
        [input, output] => Ok([input.clone(), output.clone()]),
        _ => bail!("USAGE: mrdb {mode} [flags] <INPUT_DB> <OUTPUT_DB>"),
    }
}
