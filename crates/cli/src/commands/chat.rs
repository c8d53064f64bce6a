//! Terminal conversation against the in-process router. Appointments live in
//! memory for the lifetime of the command.

use std::sync::Arc;

use medidesk_agent::ConversationRouter;
use medidesk_core::config::{AppConfig, LogFormat};
use medidesk_core::domain::conversation::{SessionId, UserId, Utterance};
use medidesk_core::domain::session::SessionContext;
use medidesk_db::InMemoryAppointmentStore;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::commands::{current_thread_runtime, load_config, CommandResult};

const BANNER: &str = "medidesk chat: type /reset to start over, /quit to leave.\n";

pub fn run(user: &str) -> CommandResult {
    let user = user.trim();
    if user.is_empty() {
        return CommandResult::failure("chat", "validation", "--user must not be empty", 2);
    }

    let config = match load_config() {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("chat", error),
    };
    init_logging(&config);

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::runtime_failure("chat", error),
    };

    let outcome = runtime.block_on(async {
        let store = Arc::new(InMemoryAppointmentStore::default());
        let router = ConversationRouter::from_config(&config, store)
            .await
            .map_err(|error| ("startup", error.to_string(), 6u8))?;
        let input = BufReader::new(tokio::io::stdin());
        converse(&router, UserId(user.to_string()), input, tokio::io::stdout())
            .await
            .map_err(|error| ("io", error.to_string(), 7u8))
    });

    match outcome {
        Ok(_) => CommandResult { exit_code: 0, output: String::new() },
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("chat", error_class, message, exit_code)
        }
    }
}

/// Reads one utterance per line until EOF or `/quit` and writes each reply.
/// Returns the number of utterances the router handled.
pub async fn converse<R, W>(
    router: &ConversationRouter,
    user_id: UserId,
    input: R,
    mut output: W,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = SessionContext::new(SessionId::generate(), user_id.clone());
    let mut handled = 0;

    output.write_all(BANNER.as_bytes()).await?;
    output.flush().await?;

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        match text {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset();
                output.write_all(b"session reset\n").await?;
                output.flush().await?;
                continue;
            }
            _ => {}
        }

        let response = router.handle(&Utterance::new(user_id.clone(), text), &mut session).await;
        tracing::debug!(
            event_name = "cli.chat.reply",
            correlation_id = %response.correlation_id,
            session_id = %session.session_id,
            route = response.route.as_str(),
            side_effects = response.side_effects.len(),
            "reply rendered"
        );
        handled += 1;

        output.write_all(format!("assistant> {}\n", response.response_text).as_bytes()).await?;
        output.flush().await?;
    }

    Ok(handled)
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter);

    // A subscriber may already be installed when embedded in tests.
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
