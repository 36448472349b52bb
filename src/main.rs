use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "notes-to-docx",
    version,
    about = "Transcribe photographed handwritten notes into a DOCX document"
)]
struct Cli {
    /// Page images (jpg/jpeg/png) in reading order
    #[arg(required = true, value_name = "IMAGES")]
    images: Vec<PathBuf>,

    /// Output document (".docx" is appended when missing)
    #[arg(short = 'o', long = "output", default_value = notes_to_docx::pipeline::DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Provider or provider:model (e.g. groq, openai:MODEL_ID)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Pages processed at once (0 = one per CPU)
    #[arg(short = 'j', long = "concurrency")]
    concurrency: Option<usize>,

    /// Keep cropped diagrams in this directory instead of a temp dir
    #[arg(long = "work-dir")]
    work_dir: Option<PathBuf>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    notes_to_docx::logging::init(cli.verbose)?;
    let config = notes_to_docx::Config {
        images: cli.images,
        output: cli.output,
        model: cli.model,
        key: cli.key,
        concurrency: cli.concurrency,
        work_dir: cli.work_dir,
        settings_path: cli.read_settings,
    };
    let saved = notes_to_docx::run(config).await?;
    println!("{}", saved.display());
    Ok(())
}
