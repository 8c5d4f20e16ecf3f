use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mipsdec::info::FunctionSummary;
use mipsdec::output::render_function;
use mipsdec::translate::{Options, translate_function};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Decompile a `.s` file to C-like pseudocode")]
    Decompile {
        /// `.s` file to decompile
        file: PathBuf,
        /// Fail on the first block-level translation error instead of
        /// embedding it as a comment
        #[arg(long)]
        stop_on_error: bool,
        /// Emit a JSON summary per function instead of pseudocode
        #[arg(long)]
        json: bool,
        /// Only decompile the named function
        #[arg(long)]
        function: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Decompile {
            file,
            stop_on_error,
            json,
            function,
        } => {
            let src = std::fs::read_to_string(&file)?;
            let filename = file.display().to_string();
            let asm = mipsdec::parse::parse(&src, &filename)?;
            let options = Options { stop_on_error };
            let mut matched = false;
            for func in &asm.functions {
                if let Some(only) = &function
                    && func.name != *only
                {
                    continue;
                }
                matched = true;
                let info = translate_function(func, &options)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&FunctionSummary::new(&info))?);
                } else {
                    print!("{}", render_function(&info));
                    println!();
                }
            }
            if !matched {
                anyhow::bail!(
                    "no function named {} in {}",
                    function.as_deref().unwrap_or("<any>"),
                    filename
                );
            }
            Ok(())
        }
    }
}
