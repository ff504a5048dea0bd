//! Compiles a `.map` file into a `.cdmap` next to it.

use cdmap::prelude::*;
use std::{env, fs, path::PathBuf, process::ExitCode};

const USAGE: &str = "Usage: dieselmap [--compress] <file.map>";

struct Args {
	compress: bool,
	input: PathBuf,
}

fn parse_args() -> Option<Args> {
	let mut compress = false;
	let mut input = None;

	for arg in env::args().skip(1) {
		match arg.as_str() {
			"--compress" => compress = true,
			flag if flag.starts_with("--") => return None,
			_ if input.is_some() => return None,
			_ => input = Some(PathBuf::from(arg)),
		}
	}

	Some(Args { compress, input: input? })
}

fn run(args: &Args) -> Result<(), String> {
	let source = fs::read_to_string(&args.input).map_err(|err| format!("Couldn't read {}: {err}", args.input.display()))?;

	log::info!("Compiling {}", args.input.display());
	let map = compile_map(&source, &CompileSettings::default(), &EditorMaterials).map_err(|err| format!("Couldn't compile {}: {err}", args.input.display()))?;

	let bytes = if args.compress {
		map.write_compressed().map_err(|err| format!("Couldn't compress: {err}"))?
	} else {
		map.write()
	};

	let output = args.input.with_extension("cdmap");
	fs::write(&output, &bytes).map_err(|err| format!("Couldn't write {}: {err}", output.display()))?;
	log::info!("Wrote {} ({} bytes)", output.display(), bytes.len());
	Ok(())
}

fn main() -> ExitCode {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	let Some(args) = parse_args() else {
		eprintln!("{USAGE}");
		return ExitCode::FAILURE;
	};

	match run(&args) {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			log::error!("{err}");
			ExitCode::FAILURE
		}
	}
}
