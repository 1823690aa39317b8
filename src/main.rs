use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use voice_assistant::config::file::config_file_path;
use voice_assistant::skills::{IntentPattern, builtin_registry};
use voice_assistant::voice::{ConsoleSpeech, ConsoleSynthesizer};
use voice_assistant::{AssistantEngine, Config, SynthesisProvider};

/// Voice Assistant - wake word, skills and spoken answers
#[derive(Parser)]
#[command(name = "assistant", version, about)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, env = "ASSISTANT_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one command through the skills and print the answer
    Ask {
        /// Command text, e.g. "what time is it"
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Speak text through the configured synthesizer
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// List enabled skills and their intents
    Skills,
    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings come from the config, so load it first
    let config = Config::load(cli.config.as_deref());
    let (level, log_file) = config.as_ref().map_or_else(
        |_| ("info".to_string(), None),
        |c| (c.logging.level.clone(), c.logging.file.clone()),
    );

    // Held until exit so buffered log lines are flushed
    let _log_guard = match init_logging(cli.verbose, &level, log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match config {
        Ok(config) => run(cli.command, config).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8, level: &str, file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        1 => EnvFilter::new("info,voice_assistant=debug"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match file {
        Some(path) => {
            let name = path
                .file_name()
                .with_context(|| format!("log file {} has no file name", path.display()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            builder.with_ansi(false).with_writer(writer).init();
            Ok(Some(guard))
        }
        None => {
            builder.with_writer(std::io::stderr).init();
            Ok(None)
        }
    }
}

async fn run(command: Option<Command>, config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    if let Some(cmd) = command {
        return match cmd {
            Command::Ask { text } => cmd_ask(&config, &text.join(" ")).await,
            Command::Say { text } => cmd_say(&config, &text).await,
            Command::Skills => cmd_skills(&config),
            Command::Config => {
                cmd_config(&config);
                Ok(())
            }
        };
    }

    tracing::info!(
        wake_word = %config.wake_word.word,
        config = ?config.source,
        "starting voice assistant"
    );

    let engine = build_engine(&config)?;
    let shutdown = engine.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
            shutdown.cancel();
        }
    });

    if config.wake_word.enabled {
        println!(
            "Say \"{}\" followed by a command (Ctrl-D to quit)",
            config.wake_word.word
        );
    } else {
        println!("Type a command (Ctrl-D to quit)");
    }

    engine.run().await?;
    Ok(())
}

fn build_engine(config: &Arc<Config>) -> anyhow::Result<AssistantEngine> {
    let registry = builtin_registry(config)?;
    let speech = if config.wake_word.enabled {
        ConsoleSpeech::new()
    } else {
        ConsoleSpeech::new().without_wake_word()
    };

    Ok(AssistantEngine::new(
        Arc::clone(config),
        registry,
        Arc::new(speech),
        Arc::new(ConsoleSynthesizer),
    ))
}

/// Answer one command without the wake word
async fn cmd_ask(config: &Arc<Config>, text: &str) -> anyhow::Result<()> {
    let engine = build_engine(config)?;
    let answer = engine.process_text(text).await?;
    println!("{answer}");
    Ok(())
}

/// Speak text through the synthesizer
async fn cmd_say(config: &Config, text: &str) -> anyhow::Result<()> {
    ConsoleSynthesizer.speak(text, &config.voice_params()).await?;
    Ok(())
}

/// List enabled skills
fn cmd_skills(config: &Config) -> anyhow::Result<()> {
    let registry = builtin_registry(config)?;
    if registry.is_empty() {
        println!("No skills enabled.");
        return Ok(());
    }

    for skill in registry.skills() {
        println!("{} v{} - {}", skill.name(), skill.version(), skill.description());
        for intent in registry.intents(skill.name()).unwrap_or_default() {
            let kind = match intent.pattern {
                IntentPattern::Phrase(_) => "phrase",
                IntentPattern::Regex(_) => "regex",
            };
            println!("  {kind:6} {} -> {}", intent.pattern, intent.handler);
        }
    }
    Ok(())
}

/// Print the config file location and resolved values
fn cmd_config(config: &Config) {
    match config.source.as_ref().map_or_else(config_file_path, |p| Some(p.clone())) {
        Some(path) if path.exists() => println!("Config file: {}", path.display()),
        Some(path) => println!("Config file: {} (not found, using defaults)", path.display()),
        None => println!("Config file: none (no config directory)"),
    }
    println!("{config:#?}");
}
