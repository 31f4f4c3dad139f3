use clap::Parser;
use jobwatch_cli::{cli::Cli, logging, runner};
use tracing::error;

#[tokio::main]
async fn main() {
	let _ = dotenvy::dotenv();
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let outcome = match cli.into_config() {
		Ok(config) => runner::run(config).await,
		Err(err) => Err(err),
	};

	if let Err(err) = outcome {
		error!(target = "jobwatch", error = %format!("{:#}", err), "fatal");
		std::process::exit(1);
	}
}
