use dvrf_cli::{
    actions::{admin, keygen, node, status},
    opts::{Command, ZkDvrfOpts},
};

use gumdrop::Options;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "dvrf_cli=info,dvrf_core=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let opts = ZkDvrfOpts::parse_args_default_or_exit();

    let command = opts.command.unwrap_or_else(|| {
        eprintln!("No command was provided.");
        eprintln!("{}", ZkDvrfOpts::usage());
        process::exit(2)
    });

    match command {
        Command::Keygen(opts) => keygen(opts, &mut rand::thread_rng()),
        Command::Admin(opts) => admin(opts).await,
        Command::Node(opts) => node(opts).await,
        Command::Status(opts) => status(opts).await,
    }
}
