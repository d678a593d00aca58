use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;

use regil::cfg::Cfg;
use regil::diagnostic::{render_diagnostics, Diagnostic};
use regil::error::FunctionError;
use regil::{emit, pipeline, CodegenOptions, ModuleContext, Unit};

#[derive(Parser)]
#[command(
    name = "regil",
    version,
    about = "Register-machine IL code generator"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Explicit log level (overrides --verbose/--quiet)
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(clap::Args)]
struct CodegenArgs {
    /// Input unit (JSON)
    input: PathBuf,
    /// Config file (default: regil.toml next to the input, if any)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Physical registers per function
    #[arg(long, value_name = "N")]
    max_registers: Option<usize>,
    /// Keep unreachable statements
    #[arg(long)]
    no_strip: bool,
    /// Compile functions one at a time
    #[arg(long)]
    sequential: bool,
    /// Keep source comments on statements
    #[arg(long)]
    comments: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a unit to IL text
    Build {
        #[command(flatten)]
        args: CodegenArgs,
        /// Output file (default: <input>.il)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the lowered listing before packing and fixup
    Lower {
        #[command(flatten)]
        args: CodegenArgs,
    },
    /// Print the basic blocks and edges of every function
    Blocks {
        #[command(flatten)]
        args: CodegenArgs,
    },
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet, cli.log_level);

    match cli.command {
        Command::Build { args, output } => cmd_build(&args, output),
        Command::Lower { args } => cmd_lower(&args),
        Command::Blocks { args } => cmd_blocks(&args),
    }
}

fn setup_logging(verbose: u8, quiet: bool, log_level: Option<LogLevel>) {
    use tracing_subscriber::EnvFilter;

    let level = match (log_level, quiet, verbose) {
        (Some(LogLevel::Error), _, _) | (None, true, _) => "error",
        (Some(LogLevel::Warn), _, _) | (None, false, 0) => "warn",
        (Some(LogLevel::Info), _, _) => "info",
        (Some(LogLevel::Debug), _, _) | (None, false, 1) => "debug",
        (Some(LogLevel::Trace), _, _) | (None, false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

// ─── Option and input resolution ──────────────────────────────────

fn resolve_options(args: &CodegenArgs) -> CodegenOptions {
    let loaded = match &args.config {
        Some(path) => CodegenOptions::load(path),
        None => CodegenOptions::discover(args.input.parent().unwrap_or(Path::new("."))),
    };
    let mut options = match loaded {
        Ok(o) => o,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    if let Some(n) = args.max_registers {
        options.max_registers = n;
    }
    if args.no_strip {
        options.strip_unreachable = false;
    }
    if args.sequential {
        options.parallel = false;
    }
    if args.comments {
        options.comments = true;
    }
    match options.validate() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

fn read_unit(path: &Path) -> Unit {
    match regil::load_unit(path) {
        Ok(unit) => unit,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

fn report(unit: &Unit, err: &FunctionError) -> ! {
    let diagnostics = vec![Diagnostic::from(err)];
    render_diagnostics(&diagnostics, &unit.file, unit.source.as_deref().unwrap_or(""));
    process::exit(1);
}

/// Methods in index order, paired with their pre-pack lowering.
fn lower_all(unit: &Unit, options: &CodegenOptions) -> Vec<regil::lower::LoweredFunction> {
    let ctx = ModuleContext::from_methods(&unit.methods);
    let mut methods: Vec<&regil::Method> = unit.methods.iter().collect();
    methods.sort_by_key(|m| m.index);
    methods
        .into_iter()
        .map(|m| {
            pipeline::lower_function(m, &unit.symbols, &ctx, options).unwrap_or_else(|source| {
                report(
                    unit,
                    &FunctionError {
                        function: m.name.clone(),
                        source,
                    },
                )
            })
        })
        .collect()
}

// ─── Commands ─────────────────────────────────────────────────────

fn cmd_build(args: &CodegenArgs, output: Option<PathBuf>) {
    let options = resolve_options(args);
    let unit = read_unit(&args.input);
    let text = match regil::compile_unit_reporting(&unit, &options) {
        Ok(t) => t,
        Err(_) => process::exit(1),
    };
    let out_path = output.unwrap_or_else(|| args.input.with_extension("il"));
    if let Err(e) = std::fs::write(&out_path, &text) {
        eprintln!("error: cannot write '{}': {}", out_path.display(), e);
        process::exit(1);
    }
    eprintln!("Compiled -> {}", out_path.display());
}

fn cmd_lower(args: &CodegenArgs) {
    let options = resolve_options(args);
    let unit = read_unit(&args.input);
    for lowered in lower_all(&unit, &options) {
        print!("{}", emit::emit_lowered(&lowered));
    }
}

fn cmd_blocks(args: &CodegenArgs) {
    let options = resolve_options(args);
    let unit = read_unit(&args.input);
    for lowered in lower_all(&unit, &options) {
        let cfg = match Cfg::build(&lowered.statements, &lowered.constants) {
            Ok(cfg) => cfg,
            Err(source) => report(
                &unit,
                &FunctionError {
                    function: lowered.name.clone(),
                    source,
                },
            ),
        };
        println!(".function {} {}", lowered.index, lowered.name);
        print!("{}", cfg.dump(&lowered.statements));
    }
}
