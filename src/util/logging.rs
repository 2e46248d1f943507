//! Logging setup: a global `tracing-subscriber` installed once at bootstrap,
//! driven off this service's `log_file`/`log_level` config keys rather than
//! CLI flags.
use std::io;
use std::path::Path;

use tracing_subscriber::EnvFilter;

/// Writes every line to both stdout and an open log file.
struct TeeWriter {
	file: std::fs::File,
}

impl io::Write for TeeWriter {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		io::stdout().write_all(buf)?;
		self.file.write_all(buf)?;
		Ok(buf.len())
	}
	fn flush(&mut self) -> io::Result<()> {
		io::stdout().flush()?;
		self.file.flush()
	}
}

/// Install a global `tracing` subscriber. `level` is one of
/// `warning`/`info`/`debug`; anything else defaults to `info`. When
/// `log_file` is set, output goes to both stdout and the file.
pub fn init(level: &str, log_file: Option<&Path>) {
	let filter = match level {
		"warning" => "warn",
		"debug" => "debug",
		_ => "info",
	};
	let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

	let builder = tracing_subscriber::fmt().with_env_filter(env_filter);

	match log_file {
		Some(path) => {
			let file = std::fs::OpenOptions::new()
				.create(true)
				.append(true)
				.open(path)
				.expect("failed to open log file");
			builder
				.with_writer(move || TeeWriter {
					file: file.try_clone().expect("failed to clone log file handle"),
				})
				.with_ansi(false)
				.init();
		}
		None => builder.init(),
	}
}
