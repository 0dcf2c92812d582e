use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use cpre_preprocessor::{Options, Preprocessor};
use tracing::{error, metadata::LevelFilter};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
pub struct Args {
    /// The .c or .h file to preprocess. The result is printed to standard output.
    file: PathBuf,

    /// Directory searched for `<...>` includes (may be repeated; also the fallback for `"..."`
    /// includes that are not found next to the including file).
    #[clap(short = 'I', long = "include-dir")]
    include_dirs: Vec<PathBuf>,

    /// Keep comments in the output instead of replacing each with a space.
    #[clap(long)]
    keep_comments: bool,

    /// Trace grammar-rule reductions while parsing.
    #[clap(long)]
    debug: bool,
}

pub fn fallible_main(args: Args) -> anyhow::Result<()> {
    let mut options = Options {
        keep_comments: args.keep_comments,
        debug: args.debug,
        ..Options::default()
    };
    if !args.include_dirs.is_empty() {
        options.stdlib_path = args.include_dirs;
    }

    let mut preprocessor = Preprocessor::new(options);
    let result = preprocessor.process(&args.file);

    for diagnostic in preprocessor.diagnostics() {
        _ = diagnostic.emit_to_stderr(preprocessor.source_files());
    }

    let output = result.with_context(|| format!("cannot preprocess {:?}", args.file))?;
    print!("{output}");

    Ok(())
}

fn main() -> ExitCode {
    let subscriber = tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        );
    tracing::subscriber::set_global_default(subscriber)
        .expect("cannot set default tracing subscriber");

    let args = Args::parse();

    match fallible_main(args) {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error:?}");
            ExitCode::FAILURE
        }
    }
}
