use domain_intake_core::{Cancellation, Outcome};
use domain_intake_dns::HostLookup;
use domain_intake_telegram::{
    BotApiClient, ChatId, Message, ParseMode, SendMessageRequest, Update, User,
};
use metrics::counter;
use tracing::{debug, error, info};

use crate::pipeline::{SubmissionError, SubmissionPipeline};
use crate::{replies, telemetry};

/// Private text message from a human sender, the only kind of update handled.
#[derive(Debug, Clone, Copy)]
pub struct Incoming<'a> {
    pub message: &'a Message,
    pub sender: &'a User,
    pub text: &'a str,
}

impl<'a> Incoming<'a> {
    /// Returns `None` for updates the bot must ignore: anything other than a
    /// text message sent by a human in a private, non-forum chat.
    pub fn from_update(update: &'a Update) -> Option<Self> {
        let message = update.message.as_ref()?;
        let sender = message.from.as_ref()?;
        if sender.is_bot || message.chat.is_forum || !message.chat.is_private() {
            return None;
        }
        let text = message.text.as_deref()?;
        Some(Self {
            message,
            sender,
            text,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Help,
    Info,
}

impl Command {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "/start" => Some(Self::Start),
            "/help" => Some(Self::Help),
            "/info" => Some(Self::Info),
            _ => None,
        }
    }
}

/// Turns incoming updates into pipeline runs and chat replies.
pub struct UpdateHandler<L> {
    pipeline: SubmissionPipeline<L>,
    bot: BotApiClient,
    operator_chat: ChatId,
}

impl<L: HostLookup> UpdateHandler<L> {
    pub fn new(pipeline: SubmissionPipeline<L>, bot: BotApiClient, operator_chat: ChatId) -> Self {
        Self {
            pipeline,
            bot,
            operator_chat,
        }
    }

    pub async fn handle(&self, update: &Update, cancel: &Cancellation) {
        let Some(incoming) = Incoming::from_update(update) else {
            debug!(stage = "telegram", update_id = update.update_id, "update discarded");
            return;
        };

        let chat_id = incoming.message.chat.id;
        let user_id = incoming.sender.id;
        debug!(
            stage = "telegram",
            update_id = update.update_id,
            chat_id,
            chat_username = incoming.message.chat.username.as_deref().unwrap_or_default(),
            user_id,
            user_username = incoming.sender.username.as_deref().unwrap_or_default(),
            user_first_name = %incoming.sender.first_name,
            message_date = incoming.message.date,
            message_text = incoming.text,
            "message received"
        );

        match Command::parse(incoming.text) {
            Some(command) => self.handle_command(command, chat_id).await,
            None => self.handle_submission(&incoming, cancel).await,
        }
    }

    async fn handle_command(&self, command: Command, chat_id: i64) {
        let (text, parse_mode) = match command {
            Command::Start => (
                replies::start(telemetry::BUILD_VERSION, telemetry::build_time()),
                Some(ParseMode::Markdown),
            ),
            Command::Help => (replies::HELP.to_string(), Some(ParseMode::Markdown)),
            Command::Info => (replies::INFO.to_string(), None),
        };

        let mut request = SendMessageRequest::new(chat_id, &text);
        request.parse_mode = parse_mode;
        if let Err(err) = self.bot.send_message(&request).await {
            error!(stage = "telegram", chat_id, command = ?command, error = %err, "failed to send command reply");
        }
    }

    async fn handle_submission(&self, incoming: &Incoming<'_>, cancel: &Cancellation) {
        let chat_id = incoming.message.chat.id;
        let result = self
            .pipeline
            .submit(incoming.sender.id, incoming.text, cancel)
            .await;

        let outcome = match &result {
            Ok(domain) => Outcome::Accepted {
                domain: domain.clone(),
            },
            Err(err) => match err.outcome() {
                Some(outcome) => outcome,
                None => return,
            },
        };

        let text = replies::for_outcome(&outcome, self.pipeline.rate_limit_window());
        let mut request = SendMessageRequest::new(chat_id, &text).parse_mode(ParseMode::Markdown);
        if outcome.is_accepted() {
            request = request.reply_to(incoming.message.message_id);
        }
        if let Err(err) = self.bot.send_message(&request).await {
            error!(
                stage = "telegram",
                chat_id,
                outcome = outcome.as_str(),
                error = %err,
                "failed to send submission reply"
            );
        }

        if let Err(err) = &result {
            if err.requires_operator() {
                self.inform_operator(err).await;
            }
        }
    }

    async fn inform_operator(&self, err: &SubmissionError) {
        let text = replies::operator_alert(&err.to_string());
        let request =
            SendMessageRequest::new(self.operator_chat.clone(), &text).parse_mode(ParseMode::Markdown);
        match self.bot.send_message(&request).await {
            Ok(_) => {
                counter!("operator_alerts_total", "result" => "sent").increment(1);
                info!(stage = "telegram", chat_id = %self.operator_chat, "operator alerted");
            }
            Err(send_err) => {
                counter!("operator_alerts_total", "result" => "failed").increment(1);
                error!(
                    stage = "telegram",
                    chat_id = %self.operator_chat,
                    root_error = %err,
                    error = %send_err,
                    "failed to send message to operator chat"
                );
            }
        }
    }
}
