use std::io;
use std::path::PathBuf;

use clap::Parser;
use llama_bridge::Template;
use llama_cli::{
    chat_loop, generate, init_model, load_config, metrics_summary, open_session, tokenize_json,
    CliResult,
};
use llama_runtime::TinyModelSpec;
use tracing_subscriber::EnvFilter;

/// llama-bridge: tokenize and generate with a local model
#[derive(Parser)]
#[command(name = "llama-cli", version)]
struct Cli {
    /// JSON file with bridge settings (context size, token cap, ...).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Write a tiny reference model file.
    InitModel {
        /// Where to write the model file.
        path: PathBuf,

        #[arg(long, default_value = "tiny")]
        name: String,

        /// Seed for weight generation.
        #[arg(short, long, default_value_t = 12345)]
        seed: u64,

        /// Hidden width.
        #[arg(long, default_value_t = 32)]
        d_model: usize,

        /// Largest context window the model accepts.
        #[arg(long, default_value_t = 4096)]
        max_ctx: u32,

        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },

    /// Print the token ids of a text as JSON.
    Tokenize {
        #[arg(short, long)]
        model: PathBuf,

        text: String,
    },

    /// Generate a continuation of a prompt.
    Generate {
        #[arg(short, long)]
        model: PathBuf,

        /// Input prompt text.
        #[arg(short, long)]
        prompt: String,

        /// Maximum number of tokens to generate (overrides the config file).
        #[arg(long)]
        max_tokens: Option<usize>,
    },

    /// Chat interactively; `/reset` clears history, `/quit` exits.
    Chat {
        #[arg(short, long)]
        model: PathBuf,

        /// Prompt template: olmoe, chatml, alpaca, llama, mistral or raw.
        #[arg(short, long, default_value = "olmoe")]
        template: String,

        /// System prompt for templates that support one.
        #[arg(short, long)]
        system: Option<String>,
    },
}

fn run(cli: Cli) -> CliResult<()> {
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::InitModel {
            path,
            name,
            seed,
            d_model,
            max_ctx,
            force,
        } => {
            let spec = TinyModelSpec {
                name,
                seed,
                d_model,
                max_ctx,
            };
            init_model(&path, &spec, force)?;
            println!("{}", path.display());
        }
        Command::Tokenize { model, text } => {
            let session = open_session(&model, config)?;
            println!("{}", tokenize_json(&session, &text)?);
            session.cleanup();
        }
        Command::Generate {
            model,
            prompt,
            max_tokens,
        } => {
            if let Some(max_tokens) = max_tokens {
                config.max_new_tokens = max_tokens;
                config.validate()?;
            }
            let session = open_session(&model, config)?;
            let generation = generate(&session, &prompt, &mut io::stdout())?;
            eprintln!("{}", metrics_summary(&generation.metrics));
            session.cleanup();
        }
        Command::Chat {
            model,
            template,
            system,
        } => {
            let template = Template::by_name(&template, system.as_deref())?;
            let session = open_session(&model, config)?;
            let turns = chat_loop(&session, template, io::stdin().lock(), &mut io::stdout())?;
            tracing::info!(turns, "chat finished");
            session.cleanup();
        }
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
