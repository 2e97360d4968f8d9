use crate::commands::poll::{handle_poll_command, truncate, REFRESH_PREFIX};
use crate::results::{load_results, render_summary};
use crate::store::PollStore;
use chrono::Utc;
use log::{error, info, warn};
use serenity::model::application::interaction::application_command::ApplicationCommandInteraction;
use serenity::model::application::interaction::message_component::MessageComponentInteraction;
use serenity::model::application::interaction::{Interaction, InteractionResponseType};
use serenity::prelude::*;

// Handle slash commands
pub async fn handle_command(
    store: &dyn PollStore,
    ctx: &Context,
    command: &ApplicationCommandInteraction,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Received command: {}", command.data.name);
    match command.data.name.as_str() {
        "poll" => handle_poll_command(store, ctx, command).await?,
        _ => {
            command
                .create_interaction_response(&ctx.http, |response| {
                    response
                        .kind(InteractionResponseType::ChannelMessageWithSource)
                        .interaction_response_data(|message| {
                            message.content("Unknown command").ephemeral(true)
                        })
                })
                .await?;
        }
    }
    Ok(())
}

// The only component we emit is the refresh button on results messages.
pub async fn handle_component(
    store: &dyn PollStore,
    ctx: &Context,
    component: &MessageComponentInteraction,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let custom_id = &component.data.custom_id;
    info!("Received component interaction: {}", custom_id);

    let Some(poll_id) = custom_id.strip_prefix(REFRESH_PREFIX) else {
        warn!("Unhandled component custom_id: {}", custom_id);
        component
            .create_interaction_response(&ctx.http, |response| {
                response
                    .kind(InteractionResponseType::ChannelMessageWithSource)
                    .interaction_response_data(|message| {
                        message.content("Unknown button action.").ephemeral(true)
                    })
            })
            .await?;
        return Ok(());
    };

    // Results are shared in channel, so the refreshed view is user-neutral.
    match load_results(store, poll_id, None, Utc::now()).await {
        Ok(results) => {
            let content = truncate(&render_summary(&results));
            component
                .create_interaction_response(&ctx.http, |response| {
                    response
                        .kind(InteractionResponseType::UpdateMessage)
                        .interaction_response_data(|message| message.content(&content))
                })
                .await?;
        }
        Err(e) => {
            error!("Failed to refresh poll '{}': {}", poll_id, e);
            component
                .create_interaction_response(&ctx.http, |response| {
                    response
                        .kind(InteractionResponseType::ChannelMessageWithSource)
                        .interaction_response_data(|message| {
                            message.content("Error fetching poll data.").ephemeral(true)
                        })
                })
                .await?;
        }
    }
    Ok(())
}

pub async fn handle_interaction(store: &dyn PollStore, ctx: &Context, interaction: Interaction) {
    let result = match interaction {
        Interaction::ApplicationCommand(command) => handle_command(store, ctx, &command).await,
        Interaction::MessageComponent(component) => handle_component(store, ctx, &component).await,
        _ => {
            warn!("Unhandled interaction type: {:?}", interaction.kind());
            Ok(())
        }
    };

    if let Err(why) = result {
        error!("Interaction handler error: {:?}", why);
    }
}
