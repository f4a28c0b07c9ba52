use std::path::PathBuf;

use structopt::StructOpt;

use retrace::convert::convert;
use retrace::params::Params;
use retrace_core::internal::*;

fn main() {
    // Collecting user arguments
    let cli_args = CliArgs::from_args();

    // Setting up log level, RUST_LOG wins if set
    let level = match cli_args.verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = cli_args.run() {
        let stage = ConvertError::find(&e).map(|c| c.kind()).unwrap_or("error");
        eprintln!("{stage}: {e:#}");
        std::process::exit(1)
    }
}

/// Converts a traced program into a canonical graph description and an
/// executable module.
#[derive(Debug, StructOpt)]
#[structopt(
    name = "retrace",
    about = "Converts traced convolution programs to canonical modules",
    usage = concat!(
        "retrace [FLAGS] [OPTIONS] <input> [output_prefix] ",
        "inputshape=[d1,d2,...] [inputshape2=[...]]..."
    )
)]
pub struct CliArgs {
    /// Sets the level of verbosity (-v info, -vv debug, -vvv trace).
    #[structopt(short = "v", parse(from_occurrences))]
    pub verbosity: usize,

    /// Print the structural description to stdout.
    #[structopt(long)]
    pub dump: bool,

    /// Run the trace and the converted module on random inputs, and fail
    /// unless their outputs are bit-identical.
    #[structopt(long)]
    pub check: bool,

    /// Seed for --check inputs.
    #[structopt(long, default_value = "0")]
    pub seed: u64,

    /// Traced program: a tar archive (possibly gzipped) or a directory.
    #[structopt(parse(from_os_str))]
    pub input: PathBuf,

    /// Output prefix (defaults to the input path without extensions),
    /// then inputshape=, inputshape2=... bindings.
    pub rest: Vec<String>,
}

impl CliArgs {
    pub fn run(&self) -> RetraceResult<()> {
        let params = Params::from_args(&self.input, &self.rest)?;
        let conversion = convert(&params)?;
        if self.dump {
            retrace_canon::canon().write(&conversion.graph, std::io::stdout().lock())?;
        }
        if self.check {
            let module = retrace_canon::canon()
                .module_for_path(&conversion.artifacts.module)
                .context("Loading converted module")?;
            retrace::check::check(&conversion.traced, &module, self.seed)?;
        }
        log::info!(
            "Converted {:?} into {:?} and {:?}",
            params.input, conversion.artifacts.structure, conversion.artifacts.module
        );
        Ok(())
    }
}
