use crate::error::StoreError;
use crate::models::{Score, SubjectRating, UserResponse};
use crate::responses;
use crate::results::{load_results, render_correctness, render_summary};
use crate::store::PollStore;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serenity::builder::CreateApplicationCommand;
use serenity::model::application::command::CommandOptionType;
use serenity::model::application::component::ButtonStyle;
use serenity::model::application::interaction::application_command::{
    ApplicationCommandInteraction, CommandDataOption, CommandDataOptionValue,
};
use serenity::model::application::interaction::InteractionResponseType;
use serenity::prelude::*;

// Discord rejects message content longer than this.
const MAX_MESSAGE_CHARS: usize = 2000;

pub const REFRESH_PREFIX: &str = "refresh_";

/// A parsed `/poll` subcommand.
#[derive(Debug, Clone, PartialEq)]
pub enum PollCommand {
    Results { poll_id: String },
    Vote { poll_id: String, option: String },
    Rate { poll_id: String, subject: String, rating: i64, comment: Option<String> },
    Predict { poll_id: String, score: String },
    Final { poll_id: String, score: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub content: String,
    pub ephemeral: bool,
    // Poll to attach a refresh button for
    pub refresh: Option<String>,
    // Sent to the caller alone after a public reply
    pub followup: Option<String>,
}

impl Reply {
    fn private(content: impl Into<String>) -> Self {
        Self { content: content.into(), ephemeral: true, refresh: None, followup: None }
    }
}

pub fn create_poll_command(
    command: &mut CreateApplicationCommand,
) -> &mut CreateApplicationCommand {
    command
        .name("poll")
        .description("Vote, rate players, predict scores and see results")
        .create_option(|option| {
            option
                .name("results")
                .description("Show the current results of a poll")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub| poll_id_option(sub))
        })
        .create_option(|option| {
            option
                .name("vote")
                .description("Vote in a topic, match or best-player poll")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub| poll_id_option(sub))
                .create_sub_option(|sub| {
                    sub.name("option")
                        .description("Option to vote for (name or id)")
                        .kind(CommandOptionType::String)
                        .required(true)
                })
        })
        .create_option(|option| {
            option
                .name("rate")
                .description("Rate a player from 1 to 10")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub| poll_id_option(sub))
                .create_sub_option(|sub| {
                    sub.name("player")
                        .description("Player to rate (name or id)")
                        .kind(CommandOptionType::String)
                        .required(true)
                })
                .create_sub_option(|sub| {
                    sub.name("rating")
                        .description("Rating from 1 to 10")
                        .kind(CommandOptionType::Integer)
                        .required(true)
                })
                .create_sub_option(|sub| {
                    sub.name("comment")
                        .description("Short comment on the performance")
                        .kind(CommandOptionType::String)
                        .required(false)
                })
        })
        .create_option(|option| {
            option
                .name("predict")
                .description("Predict the final score")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub| poll_id_option(sub))
                .create_sub_option(|sub| score_option(sub, "Your predicted score, e.g. 2-1"))
        })
        .create_option(|option| {
            option
                .name("final")
                .description("Enter the final score of a match (poll creator only)")
                .kind(CommandOptionType::SubCommand)
                .create_sub_option(|sub| poll_id_option(sub))
                .create_sub_option(|sub| score_option(sub, "The final score, e.g. 2-1"))
        })
}

fn poll_id_option(
    sub: &mut serenity::builder::CreateApplicationCommandOption,
) -> &mut serenity::builder::CreateApplicationCommandOption {
    sub.name("poll_id")
        .description("ID of the poll")
        .kind(CommandOptionType::String)
        .required(true)
}

fn score_option<'a>(
    sub: &'a mut serenity::builder::CreateApplicationCommandOption,
    description: &str,
) -> &'a mut serenity::builder::CreateApplicationCommandOption {
    sub.name("score")
        .description(description)
        .kind(CommandOptionType::String)
        .required(true)
}

pub async fn handle_poll_command(
    store: &dyn PollStore,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let reply = match parse_command(&command.data.options) {
        Ok(parsed) => {
            let user_id = command.user.id.to_string();
            info!("User {} ran /poll {:?}", user_id, parsed);
            execute(store, &user_id, parsed, Utc::now()).await
        }
        Err(message) => {
            warn!("Malformed /poll invocation: {}", message);
            Reply::private(message)
        }
    };

    send_reply(ctx, command, &reply).await?;
    Ok(())
}

/// Converts Discord's option tree into a `PollCommand`.
pub fn parse_command(options: &[CommandDataOption]) -> Result<PollCommand, String> {
    let sub = options.first().ok_or_else(|| "No subcommand provided".to_string())?;
    let args = &sub.options;
    let poll_id = required_string(args, "poll_id")?;

    match sub.name.as_str() {
        "results" => Ok(PollCommand::Results { poll_id }),
        "vote" => Ok(PollCommand::Vote { poll_id, option: required_string(args, "option")? }),
        "rate" => Ok(PollCommand::Rate {
            poll_id,
            subject: required_string(args, "player")?,
            rating: integer_arg(args, "rating").ok_or_else(|| missing("rating"))?,
            comment: string_arg(args, "comment").filter(|c| !c.trim().is_empty()),
        }),
        "predict" => Ok(PollCommand::Predict { poll_id, score: required_string(args, "score")? }),
        "final" => Ok(PollCommand::Final { poll_id, score: required_string(args, "score")? }),
        other => Err(format!("Unknown subcommand: {}", other)),
    }
}

/// Runs a parsed command and produces the reply. Store errors become
/// user-facing messages here; only database failures are logged as errors.
pub async fn execute(
    store: &dyn PollStore,
    user_id: &str,
    command: PollCommand,
    now: DateTime<Utc>,
) -> Reply {
    match run(store, user_id, command, now).await {
        Ok(reply) => reply,
        Err(CommandError::Input(message)) => Reply::private(message),
        Err(CommandError::Store(StoreError::Database(e))) => {
            error!("Database error while handling /poll: {}", e);
            Reply::private("Something went wrong talking to the database. Please try again.")
        }
        Err(CommandError::Store(e)) => Reply::private(capitalize(&e.to_string())),
    }
}

enum CommandError {
    Input(String),
    Store(StoreError),
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        CommandError::Store(e)
    }
}

async fn run(
    store: &dyn PollStore,
    user_id: &str,
    command: PollCommand,
    now: DateTime<Utc>,
) -> Result<Reply, CommandError> {
    match command {
        PollCommand::Results { poll_id } => {
            let results = load_results(store, &poll_id, Some(user_id), now).await?;
            Ok(Reply {
                content: render_summary(&results),
                ephemeral: false,
                refresh: Some(poll_id),
                followup: render_correctness(&results).map(str::to_string),
            })
        }
        PollCommand::Vote { poll_id, option } => {
            let poll = store.get_poll(&poll_id).await?;
            let option = poll.find_option(&option).ok_or_else(|| unknown(&poll_id, &option))?;
            let response = UserResponse::Choice { option_id: option.id.clone() };
            let label = option.label.clone();
            responses::submit(store, &poll_id, user_id, &response, now).await?;
            Ok(Reply::private(format!("Your vote for **{}** has been recorded.", label)))
        }
        PollCommand::Rate { poll_id, subject, rating, comment } => {
            let rating = u8::try_from(rating).map_err(|_| StoreError::InvalidRating(rating))?;
            let poll = store.get_poll(&poll_id).await?;
            let player = poll.find_option(&subject).ok_or_else(|| unknown(&poll_id, &subject))?;
            let response = UserResponse::Ratings {
                ratings: vec![SubjectRating {
                    subject_id: player.id.clone(),
                    rating,
                    comment,
                }],
            };
            let label = player.label.clone();
            responses::submit(store, &poll_id, user_id, &response, now).await?;
            Ok(Reply::private(format!("You rated **{}** {}/10.", label, rating)))
        }
        PollCommand::Predict { poll_id, score } => {
            let score: Score = score.parse().map_err(|e| CommandError::Input(format!("{}", e)))?;
            let response = UserResponse::Prediction { score };
            responses::submit(store, &poll_id, user_id, &response, now).await?;
            Ok(Reply::private(format!("Prediction of **{}** locked in.", score)))
        }
        PollCommand::Final { poll_id, score } => {
            let score: Score = score.parse().map_err(|e| CommandError::Input(format!("{}", e)))?;
            responses::record_final(store, &poll_id, user_id, score).await?;
            let results = load_results(store, &poll_id, None, now).await?;
            Ok(Reply {
                content: render_summary(&results),
                ephemeral: false,
                refresh: None,
                followup: None,
            })
        }
    }
}

pub async fn send_reply(
    ctx: &Context,
    command: &ApplicationCommandInteraction,
    reply: &Reply,
) -> Result<(), serenity::Error> {
    let content = truncate(&reply.content);
    command
        .create_interaction_response(&ctx.http, |response| {
            response
                .kind(InteractionResponseType::ChannelMessageWithSource)
                .interaction_response_data(|message| {
                    message.content(&content).ephemeral(reply.ephemeral);
                    if let Some(poll_id) = &reply.refresh {
                        message.components(|c| {
                            c.create_action_row(|row| {
                                row.create_button(|btn| {
                                    btn.custom_id(format!("{}{}", REFRESH_PREFIX, poll_id))
                                        .label("Refresh")
                                        .style(ButtonStyle::Secondary)
                                })
                            })
                        });
                    }
                    message
                })
        })
        .await?;

    if let Some(note) = &reply.followup {
        command
            .create_followup_message(&ctx.http, |message| message.content(note).ephemeral(true))
            .await?;
    }
    Ok(())
}

pub fn truncate(content: &str) -> String {
    if content.chars().count() <= MAX_MESSAGE_CHARS {
        return content.to_string();
    }
    let mut cut: String = content.chars().take(MAX_MESSAGE_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

fn unknown(poll_id: &str, needle: &str) -> StoreError {
    StoreError::UnknownOption {
        poll_id: poll_id.to_string(),
        option_id: needle.to_string(),
    }
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn missing(name: &str) -> String {
    format!("Missing argument `{}`", name)
}

fn required_string(options: &[CommandDataOption], name: &str) -> Result<String, String> {
    string_arg(options, name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| missing(name))
}

fn string_arg(options: &[CommandDataOption], name: &str) -> Option<String> {
    options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| match &option.resolved {
            Some(CommandDataOptionValue::String(value)) => Some(value.clone()),
            _ => None,
        })
}

fn integer_arg(options: &[CommandDataOption], name: &str) -> Option<i64> {
    options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| match &option.resolved {
            Some(CommandDataOptionValue::Integer(value)) => Some(*value),
            _ => None,
        })
}
