use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use gcnc_opt::Pipeline;

/// gcnc: SPIR-V to AMD GCN shader compiler
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input SPIR-V binary
    input: PathBuf,

    /// Entry point to compile
    #[arg(long, default_value = "main")]
    entry: String,

    /// Output path for the code-word stream
    #[arg(short, long, default_value = "test.bin")]
    output: PathBuf,

    /// Dump the IR to stderr between stages
    #[arg(long)]
    emit_ir: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    env_logger::try_init().ok();

    let cli = Cli::parse();

    let bytes = std::fs::read(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;

    let mut program = gcnc_spirv::parse_bytes(&bytes, &cli.entry)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("SPIR-V loading failed")?;

    Pipeline::standard()
        .run(&mut program)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("pass pipeline failed")?;

    if cli.emit_ir {
        eprintln!("{}", gcnc_ir::dump_hir(&program));
    }

    let words = if cli.emit_ir {
        let (lprog, words) = gcnc_codegen::compile_with_lir(&program)
            .map_err(|e| miette::miette!("{e}"))
            .wrap_err("code generation failed")?;
        eprintln!("{}", gcnc_ir::dump_lir(&lprog));
        words
    } else {
        gcnc_codegen::compile(&program)
            .map_err(|e| miette::miette!("{e}"))
            .wrap_err("code generation failed")?
    };

    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in &words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    std::fs::write(&cli.output, bytes)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to write {}", cli.output.display()))?;
    Ok(())
}
