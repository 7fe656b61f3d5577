use gp_ensemble::cli::{self, GpeArgs};
use ortho_config::OrthoConfig;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout carries only the report.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = GpeArgs::load()?;
    if let Some(report) = cli::run(&args)? {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
