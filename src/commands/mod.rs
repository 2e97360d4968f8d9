pub mod poll;

use serenity::model::application::command::Command;
use serenity::prelude::*;

pub async fn register_commands(ctx: &Context) -> Result<Vec<Command>, serenity::Error> {
    Command::set_global_application_commands(&ctx.http, |commands| {
        commands.create_application_command(|command| poll::create_poll_command(command))
    })
    .await
}
