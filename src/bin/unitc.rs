//! Command line driver for compiled units.
//!
//! # Commands
//!
//! - `unitc emit <input.ll> -o <path>` - Persist a unit as object, bitcode, IR or assembly
//! - `unitc source <input.ll>` - Print the unit's IR or assembly
//! - `unitc run <input.ll> <function>` - JIT the unit and call one function
//!
//! # Examples
//!
//! ```text
//! unitc emit kernel.ll -o kernel.o
//! unitc emit kernel.ll -o kernel.bin --format bc --target "llvm -mtriple=aarch64-linux-gnu"
//! unitc source kernel.ll --format asm
//! RUST_LOG=debug unitc run kernel.ll add --int 2 --int 40
//! ```

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use llvm_unit::core::options::opt_level_from_u8;
use llvm_unit::{CompiledUnit, IrSource, LoweredFunction, PackedArgs, TypeCode, UnitOptions};
use llvm_unit::llvm::{CodegenLlvm, LlvmTargetResolver};

#[derive(Parser)]
#[command(name = "unitc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, persist and run LLVM compilation units", long_about = None)]
struct Cli {
    #[command(flatten)]
    build: BuildArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BuildArgs {
    /// JIT optimization level (0-3); defaults to LLVM_UNIT_OPT_LEVEL or 3
    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(0..=3))]
    opt_level: Option<u8>,

    /// Skip module verification
    #[arg(long, global = true)]
    no_verify: bool,

    /// Target string, e.g. "llvm -mtriple=x86_64-linux-gnu -mcpu=skylake"
    #[arg(long, global = true, default_value = "llvm")]
    target: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Persist a unit to a file
    ///
    /// The format is taken from --format, or from the output's extension
    /// (o, obj, bc, ll, s, asm).
    #[command(after_help = "Example:\n  unitc emit kernel.ll -o kernel.o")]
    Emit {
        /// Textual IR input
        input: PathBuf,

        /// Output path
        #[arg(short, long)]
        output: PathBuf,

        /// Output format; empty uses the output's extension
        #[arg(long, default_value = "")]
        format: String,
    },

    /// Print the unit as textual IR or assembly
    Source {
        /// Textual IR input
        input: PathBuf,

        /// ll or s; empty prints IR
        #[arg(long, default_value = "")]
        format: String,
    },

    /// JIT the unit and call one function
    ///
    /// Integer arguments are passed first, then floats. The argument slots
    /// are printed after the call.
    #[command(after_help = "Example:\n  unitc run kernel.ll add --int 2 --int 40")]
    Run {
        /// Textual IR input
        input: PathBuf,

        /// Function to call
        function: String,

        /// Integer argument
        #[arg(long = "int", allow_hyphen_values = true)]
        ints: Vec<i64>,

        /// Float argument
        #[arg(long = "float", allow_hyphen_values = true)]
        floats: Vec<f64>,
    },
}

impl BuildArgs {
    fn options(&self) -> UnitOptions {
        let mut options = UnitOptions::from_env();
        if let Some(level) = self.opt_level.and_then(opt_level_from_u8) {
            options = options.with_opt_level(level);
        }
        if self.no_verify {
            options = options.with_verify(false);
        }
        options
    }

    fn load(&self, input: &Path) -> Result<Arc<CompiledUnit>, Box<dyn std::error::Error>> {
        let source: Box<dyn LoweredFunction> = Box::new(IrSource::from_file(input)?);
        let unit = CompiledUnit::init_with(
            &[source],
            &self.target,
            self.options(),
            &LlvmTargetResolver,
            &CodegenLlvm,
        )?;
        Ok(unit)
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Commands::Emit { input, output, format } => {
            let unit = cli.build.load(input)?;
            unit.save_to_file(output, format)?;
            println!("Wrote {}", output.display());
        }
        Commands::Source { input, format } => {
            let unit = cli.build.load(input)?;
            print!("{}", unit.get_source(format)?);
        }
        Commands::Run { input, function, ints, floats } => {
            let unit = cli.build.load(input)?;
            let func = unit
                .get_function(function)?
                .ok_or_else(|| format!("Function {} not found in {}", function, input.display()))?;

            let mut args = PackedArgs::new();
            for value in ints {
                args.push_int(*value);
            }
            for value in floats {
                args.push_float(*value);
            }
            func.call(&mut args)?;

            for idx in 0..args.len() {
                match args.type_code(idx) {
                    Some(TypeCode::Float) => println!("[{}] {}", idx, args.float(idx).unwrap_or_default()),
                    _ => println!("[{}] {}", idx, args.int(idx).unwrap_or_default()),
                }
            }
            println!("{}", unit.stats());
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
