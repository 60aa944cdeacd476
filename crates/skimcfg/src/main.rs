//! SkimmedCFG CLI
//!
//! Builds generation workflows from request files and prints the parameter
//! layout the UI renders.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skimcfg_core::extension::GROUP_NAME;
use skimcfg_core::ui::{difference_method_choices, encode_choices, group_layout, mode_choices};
use skimcfg_core::{install_prompt, ExtensionConfig, FeatureSet, GenerationRequest, Pipeline};
use std::path::{Path, PathBuf};
use tracing::info;

mod logging_setup;

/// SkimmedCFG - CFG skimming for generation workflows
#[derive(Parser)]
#[command(name = "skimcfg")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a workflow from a request file
    Generate {
        /// Input request file (JSON)
        input: PathBuf,

        /// Output file, stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the SkimmedCFG parameter group
    Params,

    /// List modes and difference methods
    Modes,

    /// Show the install prompt for a set of available features
    Prompt {
        /// Available features
        #[arg(short, long, value_delimiter = ',')]
        features: Vec<String>,
    },
}

fn load_config(path: Option<&Path>) -> Result<ExtensionConfig> {
    match path {
        Some(path) => ExtensionConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(ExtensionConfig::default()),
    }
}

fn write_output(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

fn generate(config: &ExtensionConfig, input: &Path, output: Option<&Path>) -> Result<()> {
    let request = GenerationRequest::load(input)
        .with_context(|| format!("Failed to read request: {}", input.display()))?;
    let pipeline = Pipeline::new(config)?;
    let generated = pipeline.generate_request(&request)?;

    info!(
        "Generated workflow with {} nodes, {} parameters kept",
        generated.workflow.len(),
        generated.params.len()
    );
    let json = serde_json::to_string_pretty(&generated.workflow)?;
    write_output(&json, output)
}

fn params(config: &ExtensionConfig) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let layout = group_layout(&pipeline.registry, GROUP_NAME)
        .with_context(|| format!("Parameter group {} is not registered", GROUP_NAME))?;
    println!("{}", serde_json::to_string_pretty(&layout)?);
    Ok(())
}

fn modes() {
    println!("Modes:");
    for choice in encode_choices(&mode_choices()) {
        println!("  {}", choice);
    }
    println!("Difference methods:");
    for choice in encode_choices(&difference_method_choices()) {
        println!("  {}", choice);
    }
}

fn prompt(features: &[String]) -> Result<()> {
    let features: FeatureSet = features.iter().map(|f| f.trim()).collect();
    match install_prompt(&features) {
        Some(prompt) => println!("{}", serde_json::to_string_pretty(&prompt)?),
        None => println!("SkimmedCFG is installed"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let _log_guard = logging_setup::init(&config.log, cli.verbose)?;

    match cli.command {
        Commands::Generate { input, output } => generate(&config, &input, output.as_deref())?,
        Commands::Params => params(&config)?,
        Commands::Modes => modes(),
        Commands::Prompt { features } => prompt(&features)?,
    }

    Ok(())
}
