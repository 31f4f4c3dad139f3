use tracing_subscriber::EnvFilter;

/// Default filter for a `-v` count; `RUST_LOG` replaces it entirely.
fn default_directives(verbose: u8) -> &'static str {
	match verbose {
		0 => "warn,jobwatch=info",
		1 => "info",
		2 => "debug",
		_ => "trace",
	}
}

pub fn init_logging(verbose: u8) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

	let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}
