use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("poll {0} not found")]
    PollNotFound(String),

    #[error("poll {0} already exists")]
    AlreadyExists(String),

    #[error("option {option_id} does not belong to poll {poll_id}")]
    UnknownOption { poll_id: String, option_id: String },

    #[error("poll {0} has closed")]
    PollClosed(String),

    #[error("you have already responded to this poll")]
    AlreadyResponded,

    #[error("rating must be between 1 and 10, got {0}")]
    InvalidRating(i64),

    #[error("comment is longer than {0} characters")]
    CommentTooLong(usize),

    #[error("this response does not fit a {0} poll")]
    WrongResponseKind(&'static str),

    #[error("only the poll creator can do that")]
    NotPermitted,

    #[error("corrupt poll data: {0}")]
    Corrupt(String),

    #[error("seed file: {0}")]
    Seed(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}
