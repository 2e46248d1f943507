//! Bootstrap/CLI entry point: parses flags, builds a Tokio runtime, and
//! hands off to the server bootstrap.
use std::path::PathBuf;

use structopt::StructOpt;

#[macro_use]
extern crate tracing;

mod server;

#[derive(StructOpt, Debug)]
#[structopt(name = "storage")]
struct Opt {
	/// Path to the TOML configuration file.
	#[structopt(long, default_value = "config/storage.toml")]
	config: PathBuf,

	/// Create the metadata store schema, then exit.
	#[structopt(long)]
	setup: bool,

	/// Create the blob store bucket/directory, then exit.
	#[structopt(long = "obj-setup")]
	obj_setup: bool,
}

fn main() -> anyhow::Result<()> {
	let opt = Opt::from_args();

	let rt = tokio::runtime::Runtime::new()?;
	rt.block_on(server::run(opt.config, opt.setup, opt.obj_setup))?;

	Ok(())
}
