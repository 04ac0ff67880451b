use crate::{
    domain::MemeRepository,
    errors::RepoError,
    models::{Comment, Meme, NewMeme},
};
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_dynamodb::{
    error::{ProvideErrorMetadata, SdkError},
    types::{AttributeValue, ReturnValue},
    Client as DynamoDbClient,
};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use tracing::{self, info};
use uuid::Uuid;

/// Counter row that allocates meme ids.
const MEMES_COUNTER: &str = "memes";

type Item = HashMap<String, AttributeValue>;

#[derive(Debug, Clone)]
pub struct TableNames {
    pub memes: String,
    pub comments: String,
    pub counters: String,
}

#[derive(Debug, Clone)]
pub struct DynamoDbMemeRepository {
    client: DynamoDbClient,
    tables: TableNames,
}

impl DynamoDbMemeRepository {
    /// Creates a new repository instance configured for a specific set of tables.
    pub fn new(client: DynamoDbClient, tables: TableNames) -> Self {
        info!(memes = %tables.memes, comments = %tables.comments, "Initializing DynamoDbMemeRepository");
        Self { client, tables }
    }

    /// Allocates the next meme id with an atomic counter increment.
    async fn next_id(&self) -> Result<u64, RepoError> {
        let resp = self
            .client
            .update_item()
            .table_name(&self.tables.counters)
            .key("counter", AttributeValue::S(MEMES_COUNTER.to_string()))
            // VALUE is a reserved word
            .update_expression("ADD #value :one")
            .expression_attribute_names("#value", "value")
            .expression_attribute_values(":one", AttributeValue::N("1".to_string()))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await
            .with_context(|| format!("DynamoDB (table: {}): Failed to allocate meme id", self.tables.counters))
            .map_err(RepoError::BackendError)?;

        resp.attributes
            .as_ref()
            .and_then(|attrs| number(attrs, "value"))
            .ok_or_else(|| RepoError::DataCorruption(format!("counter '{}' returned no value", MEMES_COUNTER)))
    }

    /// Removes every comment of `meme_id`.
    async fn delete_comments(&self, meme_id: u64) -> Result<usize, RepoError> {
        let keys = self.query_comments(meme_id, Some("meme_id, comment_key")).await?;
        for key in &keys {
            self.client
                .delete_item()
                .table_name(&self.tables.comments)
                .set_key(Some(key.clone()))
                .send()
                .await
                .with_context(|| format!("DynamoDB (table: {}): Failed to delete comment of meme {}", self.tables.comments, meme_id))
                .map_err(RepoError::BackendError)?;
        }
        Ok(keys.len())
    }

    /// Query over one meme's comments in range-key (creation) order. Handles pagination.
    async fn query_comments(&self, meme_id: u64, projection: Option<&str>) -> Result<Vec<Item>, RepoError> {
        let mut items = Vec::new();
        let mut last_evaluated_key: Option<Item> = None;

        loop {
            let resp = self
                .client
                .query()
                .table_name(&self.tables.comments)
                .key_condition_expression("meme_id = :id")
                .expression_attribute_values(":id", AttributeValue::N(meme_id.to_string()))
                .set_projection_expression(projection.map(str::to_string))
                .scan_index_forward(true)
                .set_exclusive_start_key(last_evaluated_key.take())
                .send()
                .await
                .with_context(|| format!("DynamoDB (table: {}): Failed to query comments of meme {}", self.tables.comments, meme_id))
                .map_err(RepoError::BackendError)?;

            items.extend(resp.items.unwrap_or_default());

            last_evaluated_key = resp.last_evaluated_key;
            if last_evaluated_key.is_none() {
                break;
            }
        }
        Ok(items)
    }
}

fn is_condition_failure<E: ProvideErrorMetadata, R>(err: &SdkError<E, R>) -> bool {
    err.as_service_error().and_then(|e| e.code()) == Some("ConditionalCheckFailedException")
}

#[async_trait]
impl MemeRepository for DynamoDbMemeRepository {
    async fn create(&self, new_meme: NewMeme) -> Result<Meme, RepoError> {
        let meme = Meme {
            id: self.next_id().await?,
            template: new_meme.template,
            lines: new_meme.lines,
            url: new_meme.url,
            context: new_meme.context,
            link: new_meme.link,
            votes: 0,
        };

        let result = self
            .client
            .put_item()
            .table_name(&self.tables.memes)
            .set_item(Some(meme_to_item(&meme)))
            .condition_expression("attribute_not_exists(meme_id)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(meme),
            // The counter fell behind existing rows.
            Err(e) if is_condition_failure(&e) => {
                tracing::error!(meme_id = meme.id, counters = %self.tables.counters, "DynamoDB: Allocated meme id already in use");
                Err(RepoError::Conflict(meme.id))
            }
            Err(e) => Err(RepoError::BackendError(anyhow::Error::new(e).context(format!(
                "DynamoDB (table: {}): Failed to put meme (id: {})",
                self.tables.memes, meme.id
            )))),
        }
    }

    async fn get_by_id(&self, id: u64) -> Result<Option<Meme>, RepoError> {
        let resp = self
            .client
            .get_item()
            .table_name(&self.tables.memes)
            .key("meme_id", AttributeValue::N(id.to_string()))
            // Tallies must reflect the latest adjustment.
            .consistent_read(true)
            .send()
            .await
            .with_context(|| format!("DynamoDB (table: {}): Failed to get meme (id: {})", self.tables.memes, id))
            .map_err(RepoError::BackendError)?;

        match resp.item {
            Some(item) => match item_to_meme(&item) {
                Some(meme) => Ok(Some(meme)),
                None => {
                    tracing::error!(meme_id = id, table_name = %self.tables.memes, "DynamoDB: Retrieved item but failed to parse into Meme");
                    Err(RepoError::DataCorruption(format!(
                        "Failed to parse meme data retrieved from DynamoDB table '{}' for id {}",
                        self.tables.memes, id
                    )))
                }
            },
            None => Ok(None), // Item not found is not an error
        }
    }

    /// Lists all memes using DynamoDB Scan, highest tally first. Handles pagination.
    async fn list_all(&self) -> Result<Vec<Meme>, RepoError> {
        tracing::debug!("DynamoDB: Scanning table '{}' for all memes", self.tables.memes);
        let mut memes: Vec<Meme> = Vec::new();
        let mut last_evaluated_key: Option<Item> = None;

        loop {
            let resp = self
                .client
                .scan()
                .table_name(&self.tables.memes)
                .set_exclusive_start_key(last_evaluated_key.take())
                .send()
                .await
                .with_context(|| format!("DynamoDB: Failed to scan table '{}'", self.tables.memes))
                .map_err(RepoError::BackendError)?;

            for item in resp.items.unwrap_or_default() {
                match item_to_meme(&item) {
                    Some(meme) => memes.push(meme),
                    None => {
                        let item_id = item.get("meme_id").and_then(|v| v.as_n().ok());
                        tracing::error!(item.id = ?item_id, table_name = %self.tables.memes, "DynamoDB: Failed to parse item from scan into Meme");
                        return Err(RepoError::DataCorruption(format!(
                            "DynamoDB: Failed to parse item {:?} during scan of table '{}'",
                            item_id, self.tables.memes
                        )));
                    }
                }
            }

            last_evaluated_key = resp.last_evaluated_key;
            if last_evaluated_key.is_none() {
                break;
            }
        }

        memes.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.id.cmp(&b.id)));
        tracing::debug!("DynamoDB (table: {}): Listed {} memes", self.tables.memes, memes.len());
        Ok(memes)
    }

    async fn adjust_votes(&self, id: u64, delta: i64) -> Result<i64, RepoError> {
        let result = self
            .client
            .update_item()
            .table_name(&self.tables.memes)
            .key("meme_id", AttributeValue::N(id.to_string()))
            .update_expression("ADD votes :delta")
            .condition_expression("attribute_exists(meme_id)")
            .expression_attribute_values(":delta", AttributeValue::N(delta.to_string()))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) if is_condition_failure(&e) => return Err(RepoError::NotFound(id)),
            Err(e) => {
                return Err(RepoError::BackendError(anyhow::Error::new(e).context(format!(
                    "DynamoDB (table: {}): Failed to adjust votes of meme {} by {}",
                    self.tables.memes, id, delta
                ))));
            }
        };

        let tally = resp
            .attributes
            .as_ref()
            .and_then(|attrs| number(attrs, "votes"))
            .ok_or_else(|| RepoError::DataCorruption(format!("meme {} returned no tally", id)))?;
        tracing::debug!(meme_id = id, delta, tally, "DynamoDB: Tally adjusted");
        Ok(tally)
    }

    /// Deletes the meme row, then its comments.
    async fn delete(&self, id: u64) -> Result<Meme, RepoError> {
        tracing::debug!(meme_id = id, table_name = %self.tables.memes, "DynamoDB: Deleting item");

        let result = self
            .client
            .delete_item()
            .table_name(&self.tables.memes)
            .key("meme_id", AttributeValue::N(id.to_string()))
            .condition_expression("attribute_exists(meme_id)")
            .return_values(ReturnValue::AllOld)
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) if is_condition_failure(&e) => return Err(RepoError::NotFound(id)),
            Err(e) => {
                return Err(RepoError::BackendError(
                    anyhow::Error::new(e)
                        .context(format!("DynamoDB (table: {}): Failed to delete meme (id: {})", self.tables.memes, id)),
                ));
            }
        };

        let meme = resp
            .attributes
            .as_ref()
            .and_then(item_to_meme)
            .ok_or_else(|| RepoError::DataCorruption(format!("deleted meme {} could not be parsed", id)))?;

        // The meme is gone, so leftover comments are unreachable.
        match self.delete_comments(id).await {
            Ok(count) => tracing::debug!(meme_id = id, count, "DynamoDB: Deleted comments"),
            Err(e) => tracing::warn!(meme_id = id, error = %e, "DynamoDB: Failed to delete comments of deleted meme"),
        }
        Ok(meme)
    }

    async fn add_comment(&self, comment: &Comment) -> Result<(), RepoError> {
        self.client
            .put_item()
            .table_name(&self.tables.comments)
            .set_item(Some(comment_to_item(comment)))
            .send()
            .await
            .with_context(|| format!("DynamoDB (table: {}): Failed to put comment on meme {}", self.tables.comments, comment.meme_id))
            .map_err(RepoError::BackendError)?;
        Ok(())
    }

    async fn list_comments(&self, meme_id: u64) -> Result<Vec<Comment>, RepoError> {
        self.query_comments(meme_id, None)
            .await?
            .iter()
            .map(|item| {
                item_to_comment(item).ok_or_else(|| {
                    RepoError::DataCorruption(format!("Failed to parse comment of meme {}", meme_id))
                })
            })
            .collect()
    }
}

fn number<T: std::str::FromStr>(item: &Item, name: &str) -> Option<T> {
    item.get(name)?.as_n().ok()?.parse().ok()
}

fn string(item: &Item, name: &str) -> Option<String> {
    Some(item.get(name)?.as_s().ok()?.to_string())
}

fn meme_to_item(meme: &Meme) -> Item {
    HashMap::from([
        ("meme_id".to_string(), AttributeValue::N(meme.id.to_string())),
        ("template".to_string(), AttributeValue::S(meme.template.clone())),
        (
            "lines".to_string(),
            AttributeValue::L(meme.lines.iter().cloned().map(AttributeValue::S).collect()),
        ),
        ("url".to_string(), AttributeValue::S(meme.url.clone())),
        ("context".to_string(), AttributeValue::S(meme.context.clone())),
        ("link".to_string(), AttributeValue::S(meme.link.clone())),
        ("votes".to_string(), AttributeValue::N(meme.votes.to_string())),
    ])
}

// Returns None if any required field is missing or has the wrong type.
fn item_to_meme(item: &Item) -> Option<Meme> {
    let lines = item
        .get("lines")?
        .as_l()
        .ok()?
        .iter()
        .map(|line| line.as_s().ok().cloned())
        .collect::<Option<Vec<String>>>()?;

    Some(Meme {
        id: number(item, "meme_id")?,
        template: string(item, "template")?,
        lines,
        url: string(item, "url")?,
        context: string(item, "context").unwrap_or_default(),
        link: string(item, "link").unwrap_or_default(),
        votes: number(item, "votes")?,
    })
}

/// Range key that sorts in creation order.
fn comment_key(comment: &Comment) -> String {
    format!(
        "{}#{}",
        comment.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        comment.id
    )
}

fn comment_to_item(comment: &Comment) -> Item {
    HashMap::from([
        ("meme_id".to_string(), AttributeValue::N(comment.meme_id.to_string())),
        ("comment_key".to_string(), AttributeValue::S(comment_key(comment))),
        ("comment_id".to_string(), AttributeValue::S(comment.id.to_string())),
        ("author".to_string(), AttributeValue::S(comment.author.clone())),
        ("content".to_string(), AttributeValue::S(comment.content.clone())),
        (
            "created_at".to_string(),
            AttributeValue::S(comment.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
        ),
    ])
}

fn item_to_comment(item: &Item) -> Option<Comment> {
    let created_at = DateTime::parse_from_rfc3339(&string(item, "created_at")?)
        .ok()?
        .with_timezone(&Utc);
    Some(Comment {
        id: Uuid::parse_str(&string(item, "comment_id")?).ok()?,
        meme_id: number(item, "meme_id")?,
        author: string(item, "author")?,
        content: string(item, "content")?,
        created_at,
    })
}
