use crate::commands::poll::truncate;
use crate::error::StoreError;
use crate::results::{render_summary, PollResults};
use crate::store::PollStore;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serenity::model::id::ChannelId;
use serenity::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Posts a results summary into each poll's channel once it has closed.
///
/// A poll is announced at most once: the store keeps a per-poll marker that
/// is set only after the post succeeds, so polls that closed while the bot
/// was offline, or whose post failed, are picked up on a later tick.
pub async fn announce_closed_polls_task(store: Arc<dyn PollStore>, ctx: Context, period: Duration) {
    info!("Starting results announcer, checking every {:?}", period);
    let mut interval = interval(period);

    loop {
        interval.tick().await;
        let now = Utc::now();

        let summaries = match closed_poll_summaries(store.as_ref(), now).await {
            Ok(summaries) => summaries,
            Err(e) => {
                error!("Failed to query for closed polls: {}", e);
                continue;
            }
        };

        for summary in summaries {
            let Ok(raw_channel) = summary.channel_id.parse::<u64>() else {
                // Retrying cannot help, so mark it and move on.
                warn!(
                    "Poll {} has an invalid channel id '{}'",
                    summary.poll_id, summary.channel_id
                );
                mark(store.as_ref(), &summary.poll_id, now).await;
                continue;
            };
            match ChannelId(raw_channel).say(&ctx.http, truncate(&summary.content)).await {
                Ok(_) => {
                    info!("Announced results of poll {}", summary.poll_id);
                    mark(store.as_ref(), &summary.poll_id, now).await;
                }
                Err(e) => error!("Error announcing poll {}, will retry: {}", summary.poll_id, e),
            }
        }
    }
}

async fn mark(store: &dyn PollStore, poll_id: &str, now: DateTime<Utc>) {
    if let Err(e) = store.mark_announced(poll_id, now).await {
        error!("Failed to mark poll {} as announced: {}", poll_id, e);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub poll_id: String,
    pub channel_id: String,
    pub content: String,
}

/// Renders one announcement for every closed poll not yet announced.
pub async fn closed_poll_summaries(
    store: &dyn PollStore,
    now: DateTime<Utc>,
) -> Result<Vec<Announcement>, StoreError> {
    let polls = store.unannounced_closed_polls(now).await?;
    if !polls.is_empty() {
        info!("Found {} closed poll(s) to announce.", polls.len());
    }
    Ok(polls
        .into_iter()
        .map(|poll| {
            let poll_id = poll.id.clone();
            let channel_id = poll.channel_id.clone();
            let results = PollResults::from_snapshot(poll, None, now);
            Announcement {
                poll_id,
                channel_id,
                content: render_summary(&results),
            }
        })
        .collect())
}
