use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;

use croprec::commands::{
    batch_command, config_command, convert_command, labels_command, predict_command,
};
use croprec::config::{self, State};
use croprec::features::Number;

#[derive(Parser)]
#[command(name = "croprec")]
#[command(version = "0.1")]
#[command(about = "Recommends a crop from soil and climate readings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recommend a crop for one set of readings
    Predict {
        #[arg(allow_negative_numbers = true)]
        nitrogen: Number,
        #[arg(allow_negative_numbers = true)]
        phosphorus: Number,
        #[arg(allow_negative_numbers = true)]
        potassium: Number,
        #[arg(allow_negative_numbers = true)]
        temperature: Number,
        #[arg(allow_negative_numbers = true)]
        humidity: Number,
        #[arg(allow_negative_numbers = true)]
        ph: Number,
        #[arg(allow_negative_numbers = true)]
        rainfall: Number,
        /// Reject readings outside the dashboard's input ranges
        #[arg(long)]
        strict: bool,
    },
    /// Read JSON rows from stdin, write one JSON result per line
    Batch,
    /// List class indices and crop names
    Labels,
    /// Re-encode the configured model artifact as bincode
    Convert { output: PathBuf },
    Config,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let state = State::new()?;
    config::init_logging(state.verbose);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match args.command {
        Commands::Predict {
            nitrogen,
            phosphorus,
            potassium,
            temperature,
            humidity,
            ph,
            rainfall,
            strict,
        } => predict_command(
            &state,
            [nitrogen, phosphorus, potassium, temperature, humidity, ph, rainfall],
            strict,
            &mut out,
        )?,
        Commands::Batch => batch_command(&state, io::stdin().lock(), &mut out)?,
        Commands::Labels => labels_command(&state, &mut out)?,
        Commands::Convert { output } => convert_command(&state, &output)?,
        Commands::Config => config_command(&state, &mut out)?,
    }
    Ok(())
}
