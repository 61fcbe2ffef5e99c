use std::time::Instant;

use clap::Parser;
use log::info;

use fusor::params::Parameters;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let params = Parameters::parse();
    let started = Instant::now();
    fusor::run(&params)?;
    info!("finished in {:.1}s", started.elapsed().as_secs_f64());
    Ok(())
}
