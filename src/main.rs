use clap::Parser;
use tracing_subscriber::EnvFilter;

use adhoc_toolchain::cli::{run, Mode};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    run(Mode::parse())
}
