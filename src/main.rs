mod commands;
mod config;
mod error;
mod handlers;
mod models;
mod responses;
mod results;
mod store;
mod tasks;
mod voting;

use config::{Config, StorageMode};
use log::{error, info};
use serenity::async_trait;
use serenity::model::application::interaction::Interaction;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use store::{MemoryStore, PollStore, SqliteStore};

struct Bot {
    store: Arc<dyn PollStore>,
    announce_interval: Duration,
    // `ready` fires again on every fresh gateway session.
    announcer_started: AtomicBool,
}

#[async_trait]
impl EventHandler for Bot {
    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let store = Arc::clone(&self.store);

        // Spawn a task to handle the interaction concurrently
        tokio::spawn(async move {
            handlers::handle_interaction(store.as_ref(), &ctx, interaction).await;
        });
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);

        match commands::register_commands(&ctx).await {
            Ok(registered) => info!("Registered {} global slash command(s).", registered.len()),
            Err(why) => error!("Failed to register slash commands: {:?}", why),
        }

        if self.announcer_started.swap(true, Ordering::SeqCst) {
            info!("Results announcer already running.");
            return;
        }
        let store = Arc::clone(&self.store);
        let period = self.announce_interval;
        tokio::spawn(async move {
            tasks::results_announcer::announce_closed_polls_task(store, ctx, period).await;
        });
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn PollStore>, error::StoreError> {
    let store: Arc<dyn PollStore> = match config.storage_mode {
        StorageMode::Sqlite => {
            info!("Using SQLite store at {}", config.database_url);
            Arc::new(SqliteStore::connect(&config.database_url).await?)
        }
        StorageMode::Memory => {
            info!("Using in-memory store; data will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    if let Some(path) = &config.seed_file {
        store::seed_from_file(store.as_ref(), path).await?;
    }
    Ok(store)
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let store = match open_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to initialize storage: {}", e);
            return;
        }
    };

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_INTEGRATIONS;

    let mut client = match Client::builder(&config.discord_token, intents)
        .event_handler(Bot {
            store,
            announce_interval: config.announce_interval,
            announcer_started: AtomicBool::new(false),
        })
        .await
    {
        Ok(client) => client,
        Err(why) => {
            error!("Error creating client: {:?}", why);
            return;
        }
    };

    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }
}
