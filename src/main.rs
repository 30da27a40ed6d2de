use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use coldbrew::jvm::{read_class_file, JVMParser};
use coldbrew::{Error, JitConfig, Program, Runtime, RuntimeConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a Java class file", long_about = None)]
struct Cli {
    /// Class file whose `main` method is executed
    #[arg(value_name = "CLASS_FILE")]
    class_file: PathBuf,

    /// Interpret every method, never compile
    #[arg(long)]
    no_jit: bool,

    /// Calls before a method is compiled
    #[arg(long, value_name = "N", default_value_t = JitConfig::default().threshold)]
    jit_threshold: u32,

    /// Deepest allowed chain of interpreted frames
    #[arg(long, value_name = "N", default_value_t = RuntimeConfig::default().max_call_depth)]
    max_call_depth: usize,

    /// Log more (-v info, -vv debug, -vvv trace every instruction)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn config(&self) -> RuntimeConfig {
        RuntimeConfig {
            max_call_depth: self.max_call_depth,
            jit: JitConfig {
                enabled: !self.no_jit,
                threshold: self.jit_threshold,
            },
        }
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    let bytes = read_class_file(&cli.class_file)?;
    let class_file = JVMParser::parse(&bytes)?;
    let (major, minor) = class_file.version();
    log::info!(
        "loaded {} v{major}.{minor} ({} methods)",
        class_file.class_name().unwrap_or("<unnamed>"),
        class_file.methods().len()
    );
    let program = Program::from_class_file(&class_file)?;
    let mut runtime = Runtime::new(program, cli.config());
    runtime.run()?;
    Ok(())
}

/// Exit status for a command line clap refused: 0 for `--help` and
/// `--version`, 1 for usage errors. 2 stays reserved for execution faults.
fn usage_exit_status(err: &clap::Error) -> u8 {
    if err.use_stderr() {
        1
    } else {
        0
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(usage_exit_status(&err));
        }
    };

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("coldbrew: {err}");
            ExitCode::from(err.exit_status())
        }
    }
}
