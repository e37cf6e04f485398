use std::io::{self, BufRead, Write};
use std::sync::Arc;

use slackbot_agent::backend::ResolvedBackend;
use slackbot_agent::web::default_tools;
use slackbot_agent::{ProcessEnv, Session, SessionOptions};
use slackbot_core::config::{AppConfig, LoadOptions};
use slackbot_core::ApplicationError;

use crate::commands::{CommandResult, EXIT_BACKEND, EXIT_CONFIG, EXIT_RUNTIME};

const EXIT_WORDS: [&str; 2] = ["exit", "quit"];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatSummary {
    pub turns: usize,
    pub failed_turns: usize,
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("chat", "config_validation", error.to_string(), EXIT_CONFIG)
        }
    };
    init_logging(&config);

    let backend = match ResolvedBackend::resolve(&ProcessEnv) {
        Ok(backend) => Arc::new(backend),
        Err(error) => {
            return CommandResult::failure("chat", "backend_selection", error.to_string(), EXIT_BACKEND)
        }
    };
    let tools = match default_tools(&config.tools) {
        Ok(tools) => tools,
        Err(error) => {
            return CommandResult::failure("chat", "tool_setup", error.to_string(), EXIT_BACKEND)
        }
    };

    let session = Session::from_config(
        config.session.name.clone(),
        &config.mcp_servers,
        backend,
        tools,
        SessionOptions::from(&config.session),
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            )
        }
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    match runtime.block_on(run_session(session, stdin.lock(), stdout.lock())) {
        Ok(_) => CommandResult { exit_code: 0, output: String::new() },
        Err(error) => CommandResult::failure("chat", "io", error.to_string(), EXIT_RUNTIME),
    }
}

/// Runs an interactive loop over `input` until EOF or an exit word.
///
/// Tool servers are connected before the first prompt and cleaned up after
/// the last one, also when reading or writing fails. A failed turn prints a
/// user-safe message and the loop goes on.
pub async fn run_session<R, W>(
    mut session: Session,
    input: R,
    mut output: W,
) -> io::Result<ChatSummary>
where
    R: BufRead,
    W: Write,
{
    let result = converse(&mut session, input, &mut output).await;
    session.cleanup().await;
    result
}

async fn converse<R, W>(session: &mut Session, input: R, output: &mut W) -> io::Result<ChatSummary>
where
    R: BufRead,
    W: Write,
{
    let report = session.connect().await;
    for (server, error) in &report.failed {
        writeln!(output, "! tool server `{server}` unavailable: {error}")?;
    }

    let mut summary = ChatSummary::default();
    let mut lines = input.lines();
    loop {
        write!(output, "you> ")?;
        output.flush()?;

        let Some(line) = lines.next().transpose()? else {
            writeln!(output)?;
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&message.to_ascii_lowercase().as_str()) {
            break;
        }

        summary.turns += 1;
        match session.run(message).await {
            Ok(reply) => writeln!(output, "{}> {reply}", session.name())?,
            Err(error) => {
                summary.failed_turns += 1;
                let interface = ApplicationError::from(error).into_interface("cli");
                writeln!(output, "! {}", interface.user_message())?;
            }
        }
    }

    Ok(summary)
}

fn init_logging(config: &AppConfig) {
    use tracing_subscriber::filter::LevelFilter;

    let level = config.logging.level.parse::<LevelFilter>().unwrap_or(LevelFilter::WARN);
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .with_max_level(level)
        .compact()
        .try_init();
}
