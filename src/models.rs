use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Meme {
    pub id: u64,
    pub template: String,
    pub lines: Vec<String>,
    /// Origin locator the image is rendered from.
    pub url: String,
    pub context: String,
    pub link: String,
    pub votes: i64,
}

/// A meme before the store has assigned its id.
#[derive(Debug, Clone)]
pub struct NewMeme {
    pub template: String,
    pub lines: Vec<String>,
    pub url: String,
    pub context: String,
    pub link: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: Uuid,
    pub meme_id: u64,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TemplateExample {
    #[serde(default)]
    pub url: String,
}

/// One entry of the origin's `/templates` listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TemplateCatalogEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub lines: u32,
    #[serde(default)]
    pub blank: String,
    #[serde(default)]
    pub example: Option<TemplateExample>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteDirection::Up => "up",
            VoteDirection::Down => "down",
        }
    }

    /// Tally contribution of one active vote in this direction.
    pub fn delta(self) -> i64 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
        }
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(VoteDirection::Up),
            "down" => Ok(VoteDirection::Down),
            other => Err(format!("unknown vote direction '{}'", other)),
        }
    }
}

/// What the ledger did with a vote request.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VoteOutcome {
    /// No active vote existed; one adjustment was applied.
    Recorded { tally: i64 },
    /// The prior vote was reversed and the new one applied.
    Changed { tally: i64 },
    /// Same direction as the active vote. Nothing changed.
    AlreadyVoted { tally: i64 },
}

impl VoteOutcome {
    pub fn tally(&self) -> i64 {
        match *self {
            VoteOutcome::Recorded { tally }
            | VoteOutcome::Changed { tally }
            | VoteOutcome::AlreadyVoted { tally } => tally,
        }
    }
}
