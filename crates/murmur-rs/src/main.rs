//! `murmur`: line-oriented chat host for the murmur-rs engine.
//!
//! Reads the provider key from `ANTHROPIC_API_KEY` or
//! `AWS_BEARER_TOKEN_BEDROCK` unless the config file sets one.
//!
//! # Examples
//!
//! ```sh
//! # Interactive chat with two context files
//! murmur --storage-dir ~/.murmur chat --file src/lib.rs --file Cargo.toml
//!
//! # Browse saved conversations
//! murmur --storage-dir ~/.murmur list
//! murmur --storage-dir ~/.murmur show cv-18c2f0a4b1d3e000-0001
//! ```

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use murmur_rs::prelude::*;
use murmur_rs::{logging, transcript};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

const TRANSCRIPT_WIDTH: usize = 80;

/// Chat with an LLM about the files you are working on.
#[derive(Parser)]
#[command(name = "murmur", version)]
struct Cli {
    /// JSON config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Provider backend (`anthropic` or `bedrock`).
    #[arg(long, global = true)]
    provider: Option<ProviderKind>,

    /// Model identifier.
    #[arg(long, global = true)]
    model: Option<String>,

    /// Directory conversations are saved in. Omit to disable persistence.
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Directory for daily log files. Omit to disable logging.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Most verbose level written to the log file.
    #[arg(long, global = true, default_value = "debug")]
    log_level: tracing::Level,

    /// Maximum tokens per response.
    #[arg(long, global = true)]
    max_tokens: Option<u32>,

    /// Sampling temperature (0.0 to 1.0).
    #[arg(long, global = true)]
    temperature: Option<f32>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat (the default).
    Chat {
        /// File to include as context. Repeatable.
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        /// Wait for whole replies instead of streaming them.
        #[arg(long)]
        blocking: bool,
    },
    /// List saved conversations, most recent first.
    List,
    /// Print a saved conversation.
    Show { id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Merge the config file, CLI overrides and the environment.
fn resolve_config(cli: &Cli) -> murmur_rs::Result<MurmurConfig> {
    let mut config = match &cli.config {
        Some(path) => MurmurConfig::load(path)?,
        None => MurmurConfig::default(),
    };
    if let Some(kind) = cli.provider {
        config = config.with_provider_kind(kind);
    }
    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(max_tokens) = cli.max_tokens {
        config.provider.max_tokens = max_tokens;
    }
    if let Some(temperature) = cli.temperature {
        config.provider.temperature = temperature;
    }
    if cli.storage_dir.is_some() {
        config.storage_dir = cli.storage_dir.clone();
    }
    if cli.log_dir.is_some() {
        config.log_dir = cli.log_dir.clone();
    }
    Ok(config.apply_env(|name| std::env::var(name).ok()))
}

async fn run(cli: Cli) -> murmur_rs::Result<()> {
    let config = resolve_config(&cli)?;
    if let Some(dir) = &config.log_dir {
        logging::init(dir, cli.log_level)?;
    }
    let store = ConversationStore::new(config.storage_dir.clone())?;

    match cli.command {
        Some(Command::List) => {
            for line in transcript::format_listing(&store.list()?) {
                println!("{line}");
            }
            Ok(())
        }
        Some(Command::Show { id }) => match store.load(&id)? {
            Some(messages) => {
                for line in transcript::render(&messages, TRANSCRIPT_WIDTH) {
                    println!("{line}");
                }
                Ok(())
            }
            None => {
                eprintln!("Conversation {id} not found");
                std::process::exit(1);
            }
        },
        Some(Command::Chat { files, blocking }) => chat(config, store, files, blocking).await,
        None => chat(config, store, Vec::new(), false).await,
    }
}

// ── REPL ───────────────────────────────────────────────────────────

async fn chat(
    config: MurmurConfig,
    store: ConversationStore,
    files: Vec<PathBuf>,
    blocking: bool,
) -> murmur_rs::Result<()> {
    let provider = build_provider(config.provider.clone())?;
    let context = Arc::new(ContextRegistry::new());
    for file in &files {
        context.add_file(file);
    }

    let options = SessionOptions::default()
        .with_base_prompt(config.base_prompt.clone())
        .with_retry(config.retry.clone());
    let mut session = ChatSession::new(
        provider,
        store,
        context.clone(),
        Arc::new(TerminalDisplay::default()),
        options,
    );

    println!(
        "murmur ({} / {}). /quit or Ctrl-C at the prompt to exit, Ctrl-C stops a streaming reply.",
        session.provider().name(),
        session.provider().model()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let line = match next_input(&mut lines, interrupted()).await {
            Input::Line(line) => line,
            Input::Eof => break,
            Input::Interrupted => {
                println!();
                break;
            }
        };
        let line = line.trim();

        if let Some(command) = line.strip_prefix('/') {
            let (name, arg) = match command.split_once(' ') {
                Some((name, arg)) => (name, arg.trim()),
                None => (command, ""),
            };
            match run_command(&mut session, &context, name, arg) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    eprintln!("error: {e}");
                    continue;
                }
            }
        }

        let result = if blocking {
            tokio::select! {
                result = session.send_turn(line) => result,
                () = interrupted() => {
                    println!();
                    break;
                }
            }
        } else {
            session.send_turn_streamed_until(line, interrupted()).await
        };
        match result {
            Ok(TurnOutcome::Cancelled) => println!("\n[cancelled]"),
            Ok(TurnOutcome::Completed) => println!(),
            Ok(TurnOutcome::Skipped) => {}
            Err(e) => eprintln!("\nerror: {e}"),
        }
    }
    Ok(())
}

/// One read at the prompt.
#[derive(Debug, PartialEq)]
enum Input {
    Line(String),
    Eof,
    Interrupted,
}

/// Next line from `lines`, or [`Input::Interrupted`] if `interrupt`
/// resolves first. Read errors count as end of input.
async fn next_input<R>(lines: &mut Lines<R>, interrupt: impl Future<Output = ()>) -> Input
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        biased;
        () = interrupt => Input::Interrupted,
        line = lines.next_line() => match line {
            Ok(Some(line)) => Input::Line(line),
            Ok(None) | Err(_) => Input::Eof,
        },
    }
}

/// Resolves on Ctrl-C. Once a listener is installed the default SIGINT
/// exit is gone, so every wait in the REPL goes through here.
async fn interrupted() {
    let _ = tokio::signal::ctrl_c().await;
}

fn prompt() {
    print!("you> ");
    let _ = std::io::stdout().flush();
}

/// Run a slash command. `Ok(false)` ends the REPL.
fn run_command(
    session: &mut ChatSession,
    context: &ContextRegistry,
    name: &str,
    arg: &str,
) -> murmur_rs::Result<bool> {
    match name {
        "quit" | "exit" => return Ok(false),
        "new" => {
            session.start_new_conversation()?;
            println!("Started {}", session.conversation_id().unwrap_or_default());
        }
        "clear" => {
            session.clear()?;
            println!("Cleared; now in {}", session.conversation_id().unwrap_or_default());
        }
        "load" => {
            if session.load_conversation(arg)? {
                println!("Loaded conversation {arg}");
            } else {
                eprintln!("Conversation {arg} not found");
            }
        }
        "list" => {
            for line in transcript::format_listing(&session.list_conversations()?) {
                println!("{line}");
            }
        }
        "add" => {
            if context.add_file(arg) {
                println!("Added {arg}");
            }
        }
        "remove" => {
            if context.remove_file(arg) {
                println!("Removed {arg}");
            }
        }
        "files" => {
            for file in context.snapshot().files {
                println!("{}", file.display());
            }
        }
        other => eprintln!("Unknown command /{other}"),
    }
    Ok(true)
}

// ── Terminal display ───────────────────────────────────────────────

#[derive(Default)]
struct PrintState {
    /// Index of the assistant message being printed.
    index: Option<usize>,
    /// Bytes of that message already on screen.
    printed: usize,
    /// Print the whole transcript on the next render.
    replay: bool,
}

/// Prints only what is new: the growing tail of the latest assistant reply.
#[derive(Default)]
struct TerminalDisplay {
    state: Mutex<PrintState>,
}

impl DisplaySink for TerminalDisplay {
    fn render(&self, messages: &[Message]) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = std::io::stdout().lock();

        if std::mem::take(&mut state.replay) {
            for line in transcript::render(messages, TRANSCRIPT_WIDTH) {
                let _ = writeln!(out, "{line}");
            }
            state.index = messages.len().checked_sub(1);
            state.printed = messages.last().map_or(0, |m| m.content.len());
            return;
        }

        let Some(last) = messages.last() else {
            *state = PrintState::default();
            return;
        };
        if last.role != Role::Assistant {
            return;
        }
        let index = messages.len() - 1;
        if state.index != Some(index) {
            state.index = Some(index);
            state.printed = 0;
            let _ = write!(out, "murmur> ");
        }
        if let Some(delta) = last.content.get(state.printed..) {
            let _ = write!(out, "{delta}");
            state.printed = last.content.len();
        }
        let _ = out.flush();
    }

    fn show(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).replay = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_a_line_when_not_interrupted() {
        let mut lines = BufReader::new(&b"hello\nworld\n"[..]).lines();
        assert_eq!(
            next_input(&mut lines, std::future::pending()).await,
            Input::Line("hello".into())
        );
        assert_eq!(
            next_input(&mut lines, std::future::pending()).await,
            Input::Line("world".into())
        );
        assert_eq!(next_input(&mut lines, std::future::pending()).await, Input::Eof);
    }

    #[tokio::test]
    async fn interrupt_at_the_prompt_ends_the_wait() {
        let (_writer, reader) = tokio::io::duplex(64);
        let mut lines = BufReader::new(reader).lines();
        assert_eq!(next_input(&mut lines, async {}).await, Input::Interrupted);
    }

    #[tokio::test]
    async fn interrupt_after_a_turn_still_reaches_the_prompt() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"first\n").await.unwrap();
        assert_eq!(
            next_input(&mut lines, std::future::pending()).await,
            Input::Line("first".into())
        );
        assert_eq!(next_input(&mut lines, async {}).await, Input::Interrupted);
    }
}
