use std::sync::Arc;

use teloxide::dispatching::{DefaultKey, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::markdown;
use teloxide::RequestError;
use tracing::info;

use crate::report;

/// Commands the bot answers. Matching is on the exact message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
}

impl Command {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "/start" => Some(Command::Start),
            "/help" => Some(Command::Help),
            _ => None,
        }
    }

    /// Reply text before MarkdownV2 escaping.
    pub fn reply(self) -> &'static str {
        match self {
            Command::Start => "Starting",
            Command::Help => "Cry for help!",
        }
    }
}

/// Routing table: text messages whose body is a known command go to
/// [`answer_command`]; everything else falls through to the dispatcher's
/// default handler.
pub fn schema() -> UpdateHandler<RequestError> {
    Update::filter_message()
        .filter_map(|msg: Message| msg.text().and_then(Command::parse))
        .endpoint(answer_command)
}

#[tracing::instrument(
    skip_all,
    fields(update_id = ?update.id, chat_id = msg.chat.id.0, command = ?command)
)]
async fn answer_command(
    bot: Bot,
    update: Update,
    msg: Message,
    command: Command,
) -> ResponseResult<()> {
    info!("Answering command");

    // Best effort: a failed send is reported and the update is still consumed.
    if let Err(e) = bot
        .send_message(msg.chat.id, markdown::escape(command.reply()))
        .parse_mode(ParseMode::MarkdownV2)
        .await
    {
        report::log_error("send reply", &e);
    }

    Ok(())
}

/// Build the dispatcher around [`schema`]. Unmatched updates are only logged.
pub fn build_dispatcher(bot: Bot) -> Dispatcher<Bot, RequestError, DefaultKey> {
    Dispatcher::builder(bot, schema())
        .default_handler(|upd: Arc<Update>| async move {
            info!(update_id = ?upd.id, "defaultHandler");
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error from the update dispatcher",
        ))
        .build()
}
