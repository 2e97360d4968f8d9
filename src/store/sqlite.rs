use crate::error::StoreError;
use crate::models::{
    validate_options, MatchOutcome, Poll, PollKind, PollOption, RatingStats, Score, SubjectRating,
    UserResponse,
};
use crate::store::PollStore;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{migrate::MigrateDatabase, Row, Sqlite, Transaction};
use std::collections::HashMap;

// Take the write lock up front. A deferred transaction that reads first
// cannot upgrade while another writer holds the lock, and SQLite reports
// that as SQLITE_BUSY without waiting out the busy timeout.
const IMMEDIATE: &str = "BEGIN IMMEDIATE";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(db_url: &str) -> Result<Self, StoreError> {
        let in_memory = db_url.contains(":memory:");

        // Create database if it doesn't exist
        if !in_memory && !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database {}", db_url);
            Sqlite::create_database(db_url).await?;
        }

        // An in-memory database lives and dies with its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect(db_url)
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                guild_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                creator_id TEXT NOT NULL,
                question TEXT NOT NULL,
                kind TEXT NOT NULL,
                created_at TEXT NOT NULL,
                closes_at TEXT NOT NULL,
                final_home INTEGER,
                final_away INTEGER,
                announced_at TEXT
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_options (
                id TEXT NOT NULL,
                poll_id TEXT NOT NULL,
                label TEXT NOT NULL,
                position INTEGER NOT NULL,
                vote_count INTEGER NOT NULL DEFAULT 0,
                rating_sum INTEGER,
                rating_count INTEGER,
                outcome TEXT,
                PRIMARY KEY (poll_id, id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS responses (
                poll_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                option_id TEXT,
                predicted_home INTEGER,
                predicted_away INTEGER,
                timestamp TEXT NOT NULL,
                PRIMARY KEY (poll_id, user_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ratings (
                poll_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                rating INTEGER NOT NULL,
                comment TEXT,
                timestamp TEXT NOT NULL,
                PRIMARY KEY (poll_id, user_id, subject_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn load_options(&self, poll_id: &str) -> Result<Vec<PollOption>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, label, vote_count, rating_sum, rating_count, outcome
            FROM poll_options
            WHERE poll_id = ?
            ORDER BY position
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        let mut comments: HashMap<String, Vec<String>> = HashMap::new();
        let comment_rows = sqlx::query(
            r#"
            SELECT subject_id, comment
            FROM ratings
            WHERE poll_id = ? AND comment IS NOT NULL
            ORDER BY timestamp
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;
        for row in comment_rows {
            comments
                .entry(row.get::<String, _>("subject_id"))
                .or_default()
                .push(row.get::<String, _>("comment"));
        }

        let mut options = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.get::<String, _>("id");
            let rating_sum: Option<i64> = row.get("rating_sum");
            let rating_count: Option<i64> = row.get("rating_count");
            let rating = match (rating_sum, rating_count) {
                (Some(sum), Some(count)) => Some(RatingStats {
                    rating_sum: non_negative("rating_sum", sum)?,
                    rating_count: non_negative("rating_count", count)?,
                    comments: comments.remove(&id).unwrap_or_default(),
                }),
                _ => None,
            };
            let outcome = match row.get::<Option<String>, _>("outcome") {
                Some(s) => Some(
                    MatchOutcome::parse(&s)
                        .ok_or_else(|| StoreError::Corrupt(format!("unknown outcome {}", s)))?,
                ),
                None => None,
            };
            options.push(PollOption {
                count: non_negative("vote_count", row.get::<i64, _>("vote_count"))?,
                id,
                label: row.get::<String, _>("label"),
                rating,
                outcome,
            });
        }

        validate_options(poll_id, &options)?;
        Ok(options)
    }

    // Options are loaded separately; see `with_options`.
    fn poll_header(row: &SqliteRow) -> Result<Poll, StoreError> {
        let id = row.get::<String, _>("id");
        let kind_str = row.get::<String, _>("kind");
        let kind = PollKind::parse(&kind_str)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown poll kind: {}", kind_str)))?;

        let final_home: Option<i64> = row.get("final_home");
        let final_away: Option<i64> = row.get("final_away");
        let final_result = match (final_home, final_away) {
            (Some(home), Some(away)) => Some(Score::new(goals(home)?, goals(away)?)),
            _ => None,
        };

        Ok(Poll {
            guild_id: row.get::<String, _>("guild_id"),
            channel_id: row.get::<String, _>("channel_id"),
            creator_id: row.get::<String, _>("creator_id"),
            question: row.get::<String, _>("question"),
            kind,
            options: Vec::new(),
            created_at: parse_timestamp("created_at", &row.get::<String, _>("created_at"))?,
            closes_at: parse_timestamp("closes_at", &row.get::<String, _>("closes_at"))?,
            final_result,
            id,
        })
    }

    async fn with_options(&self, mut poll: Poll) -> Result<Poll, StoreError> {
        poll.options = self.load_options(&poll.id).await?;
        Ok(poll)
    }

    async fn ensure_first_response(
        tx: &mut Transaction<'_, Sqlite>,
        poll_id: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        let existing = sqlx::query("SELECT 1 FROM responses WHERE poll_id = ? AND user_id = ?")
            .bind(poll_id)
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
        if existing.is_some() {
            return Err(StoreError::AlreadyResponded);
        }
        Ok(())
    }

    async fn bump_vote_count(
        tx: &mut Transaction<'_, Sqlite>,
        poll_id: &str,
        option_id: &str,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE poll_options
            SET vote_count = vote_count + 1
            WHERE poll_id = ? AND id = ?
            "#,
        )
        .bind(poll_id)
        .bind(option_id)
        .execute(&mut **tx)
        .await?;
        if updated.rows_affected() != 1 {
            return Err(StoreError::UnknownOption {
                poll_id: poll_id.to_string(),
                option_id: option_id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_rating(
        tx: &mut Transaction<'_, Sqlite>,
        poll_id: &str,
        user_id: &str,
        rating: &SubjectRating,
    ) -> Result<(), StoreError> {
        let existing = sqlx::query(
            "SELECT 1 FROM ratings WHERE poll_id = ? AND user_id = ? AND subject_id = ?",
        )
        .bind(poll_id)
        .bind(user_id)
        .bind(&rating.subject_id)
        .fetch_optional(&mut **tx)
        .await?;
        if existing.is_some() {
            return Err(StoreError::AlreadyResponded);
        }

        let updated = sqlx::query(
            r#"
            UPDATE poll_options
            SET vote_count = vote_count + 1,
                rating_sum = COALESCE(rating_sum, 0) + ?,
                rating_count = COALESCE(rating_count, 0) + 1
            WHERE poll_id = ? AND id = ?
            "#,
        )
        .bind(i64::from(rating.rating))
        .bind(poll_id)
        .bind(&rating.subject_id)
        .execute(&mut **tx)
        .await?;
        if updated.rows_affected() != 1 {
            return Err(StoreError::UnknownOption {
                poll_id: poll_id.to_string(),
                option_id: rating.subject_id.clone(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO ratings (poll_id, user_id, subject_id, rating, comment, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(poll_id)
        .bind(user_id)
        .bind(&rating.subject_id)
        .bind(i64::from(rating.rating))
        .bind(rating.comment.as_deref())
        .bind(timestamp(Utc::now()))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PollStore for SqliteStore {
    async fn create_poll(&self, poll: &Poll) -> Result<(), StoreError> {
        validate_options(&poll.id, &poll.options)?;

        let mut tx = self.pool.begin_with(IMMEDIATE).await?;

        let exists = sqlx::query("SELECT 1 FROM polls WHERE id = ?")
            .bind(&poll.id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if exists {
            return Err(StoreError::AlreadyExists(poll.id.clone()));
        }

        sqlx::query(
            r#"
            INSERT INTO polls (id, guild_id, channel_id, creator_id, question, kind,
                               created_at, closes_at, final_home, final_away)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&poll.id)
        .bind(&poll.guild_id)
        .bind(&poll.channel_id)
        .bind(&poll.creator_id)
        .bind(&poll.question)
        .bind(poll.kind.as_str())
        .bind(timestamp(poll.created_at))
        .bind(timestamp(poll.closes_at))
        .bind(poll.final_result.map(|s| i64::from(s.home)))
        .bind(poll.final_result.map(|s| i64::from(s.away)))
        .execute(&mut *tx)
        .await?;

        // Insert poll options
        for (i, option) in poll.options.iter().enumerate() {
            let stats = option.rating.as_ref();
            sqlx::query(
                r#"
                INSERT INTO poll_options (id, poll_id, label, position, vote_count,
                                          rating_sum, rating_count, outcome)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&option.id)
            .bind(&poll.id)
            .bind(&option.label)
            .bind(i as i64)
            .bind(option.count as i64)
            .bind(stats.map(|s| s.rating_sum as i64))
            .bind(stats.map(|s| s.rating_count as i64))
            .bind(option.outcome.map(|o| o.as_str()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Stored poll {} with {} option(s)", poll.id, poll.options.len());
        Ok(())
    }

    async fn get_poll(&self, poll_id: &str) -> Result<Poll, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, guild_id, channel_id, creator_id, question, kind,
                   created_at, closes_at, final_home, final_away
            FROM polls
            WHERE id = ?
            "#,
        )
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::PollNotFound(poll_id.to_string()))?;

        let poll = Self::poll_header(&row)?;
        self.with_options(poll).await
    }

    async fn get_user_response(
        &self,
        poll_id: &str,
        user_id: &str,
    ) -> Result<Option<UserResponse>, StoreError> {
        let exists = sqlx::query("SELECT 1 FROM polls WHERE id = ?")
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if !exists {
            return Err(StoreError::PollNotFound(poll_id.to_string()));
        }

        let row = sqlx::query(
            r#"
            SELECT option_id, predicted_home, predicted_away
            FROM responses
            WHERE poll_id = ? AND user_id = ?
            "#,
        )
        .bind(poll_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            let predicted_home: Option<i64> = row.get("predicted_home");
            let predicted_away: Option<i64> = row.get("predicted_away");
            if let (Some(home), Some(away)) = (predicted_home, predicted_away) {
                return Ok(Some(UserResponse::Prediction {
                    score: Score::new(goals(home)?, goals(away)?),
                }));
            }
            return match row.get::<Option<String>, _>("option_id") {
                Some(option_id) => Ok(Some(UserResponse::Choice { option_id })),
                None => Err(StoreError::Corrupt(format!(
                    "empty response from {} on poll {}",
                    user_id, poll_id
                ))),
            };
        }

        let ratings = sqlx::query(
            r#"
            SELECT subject_id, rating, comment
            FROM ratings
            WHERE poll_id = ? AND user_id = ?
            ORDER BY timestamp
            "#,
        )
        .bind(poll_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            let rating = row.get::<i64, _>("rating");
            Ok(SubjectRating {
                subject_id: row.get::<String, _>("subject_id"),
                rating: u8::try_from(rating)
                    .map_err(|_| StoreError::Corrupt(format!("rating {} out of range", rating)))?,
                comment: row.get::<Option<String>, _>("comment"),
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

        if ratings.is_empty() {
            Ok(None)
        } else {
            Ok(Some(UserResponse::Ratings { ratings }))
        }
    }

    async fn submit_response(
        &self,
        poll: &Poll,
        user_id: &str,
        response: &UserResponse,
    ) -> Result<(), StoreError> {
        // Dropping the transaction on any early return rolls it back.
        let mut tx = self.pool.begin_with(IMMEDIATE).await?;
        let now = timestamp(Utc::now());

        match response {
            UserResponse::Choice { option_id } => {
                Self::ensure_first_response(&mut tx, &poll.id, user_id).await?;
                Self::bump_vote_count(&mut tx, &poll.id, option_id).await?;
                sqlx::query(
                    r#"
                    INSERT INTO responses (poll_id, user_id, option_id, timestamp)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(&poll.id)
                .bind(user_id)
                .bind(option_id)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }
            UserResponse::Prediction { score } => {
                Self::ensure_first_response(&mut tx, &poll.id, user_id).await?;
                let outcome = score.outcome();
                let option_id = sqlx::query(
                    "SELECT id FROM poll_options WHERE poll_id = ? AND outcome = ?",
                )
                .bind(&poll.id)
                .bind(outcome.as_str())
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| row.get::<String, _>("id"))
                .ok_or_else(|| StoreError::UnknownOption {
                    poll_id: poll.id.clone(),
                    option_id: outcome.as_str().to_string(),
                })?;
                Self::bump_vote_count(&mut tx, &poll.id, &option_id).await?;
                sqlx::query(
                    r#"
                    INSERT INTO responses (poll_id, user_id, option_id,
                                           predicted_home, predicted_away, timestamp)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&poll.id)
                .bind(user_id)
                .bind(&option_id)
                .bind(i64::from(score.home))
                .bind(i64::from(score.away))
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }
            UserResponse::Ratings { ratings } => {
                for rating in ratings {
                    Self::insert_rating(&mut tx, &poll.id, user_id, rating).await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn record_final_result(&self, poll_id: &str, score: Score) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE polls
            SET final_home = ?, final_away = ?
            WHERE id = ?
            "#,
        )
        .bind(i64::from(score.home))
        .bind(i64::from(score.away))
        .bind(poll_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::PollNotFound(poll_id.to_string()));
        }
        Ok(())
    }

    async fn unannounced_closed_polls(&self, now: DateTime<Utc>) -> Result<Vec<Poll>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, guild_id, channel_id, creator_id, question, kind,
                   created_at, closes_at, final_home, final_away
            FROM polls
            WHERE closes_at < ? AND announced_at IS NULL
            ORDER BY closes_at
            "#,
        )
        .bind(timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        let headers = rows
            .iter()
            .map(Self::poll_header)
            .collect::<Result<Vec<_>, _>>()?;
        let mut polls = Vec::with_capacity(headers.len());
        for poll in headers {
            polls.push(self.with_options(poll).await?);
        }
        Ok(polls)
    }

    async fn mark_announced(&self, poll_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE polls SET announced_at = ? WHERE id = ?")
            .bind(timestamp(at))
            .bind(poll_id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::PollNotFound(poll_id.to_string()));
        }
        Ok(())
    }
}

// Fixed-width UTC so that text comparison in SQL orders correctly.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("failed to parse {}: {}", field, e)))
}

fn non_negative(field: &str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {}: {}", field, value)))
}

fn goals(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("invalid goal count: {}", value)))
}
