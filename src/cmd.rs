//! Command line surface of the `mrdb` binary.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Run as the coordinator of a job instead of a worker
    #[clap(long)]
    pub master: bool,

    /// Hold workers in the wait phase until the operator presses enter
    #[clap(long)]
    pub wait: bool,

    /// Run the whole job in-process, without a cluster
    #[clap(long)]
    pub standalone: bool,

    /// Address of the coordinator node
    #[clap(long = "masterAddr", default_value = "localhost:8080")]
    pub master_addr: String,

    /// The port to listen on
    #[clap(long, default_value = "8080")]
    pub port: String,

    /// The directory to store temporary shards in
    #[clap(long)]
    pub tempdir: Option<PathBuf>,

    /// Number of map tasks
    #[clap(short = 'M', default_value_t = 10)]
    pub m: u32,

    /// Number of reduce tasks
    #[clap(short = 'R', default_value_t = 10)]
    pub r: u32,

    /// Name of the MapReduce workload to run
    #[clap(long, default_value = "wc")]
    pub workload: String,

    /// Input and output pair stores (coordinator and standalone only)
    #[clap(value_parser)]
    pub paths: Vec<PathBuf>,
}

impl Args {
    /// The scratch directory, defaulting to one keyed by pid so
    /// several nodes can share a machine.
    pub fn tempdir(&self) -> PathBuf {
        self.tempdir.clone().unwrap_or_else(|| {
            PathBuf::from("tmp").join(format!("mapreduce.{}", std::process::id()))
        })
    }
}
