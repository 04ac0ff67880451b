use crate::{
    domain::{ImageOrigin, MemeRepository},
    errors::ServiceError,
    images::ImageResolver,
    models::{Comment, Meme, NewMeme},
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

const ANONYMOUS_AUTHOR: &str = "anonymous";

/// Meme metadata, comments, and administrative deletion.
#[derive(Clone)]
pub struct MemeService {
    repo: Arc<dyn MemeRepository>,
    origin: Arc<dyn ImageOrigin>,
    images: ImageResolver,
    admin_key: Option<String>,
}

impl MemeService {
    pub fn new(
        repo: Arc<dyn MemeRepository>,
        origin: Arc<dyn ImageOrigin>,
        images: ImageResolver,
        admin_key: Option<String>,
    ) -> Self {
        Self { repo, origin, images, admin_key }
    }

    pub async fn create_meme(
        &self,
        template: &str,
        lines: Vec<String>,
        context: String,
        link: String,
    ) -> Result<Meme, ServiceError> {
        let template = template.trim();
        if template.is_empty() || template.contains('/') {
            return Err(ServiceError::InvalidInput(format!("invalid template id '{}'", template)));
        }
        let url = self.origin.image_url(template, &lines);
        let meme = self
            .repo
            .create(NewMeme {
                template: template.to_string(),
                lines,
                url,
                context,
                link,
            })
            .await?;
        tracing::info!(meme_id = meme.id, template = %meme.template, "Meme created");
        Ok(meme)
    }

    pub async fn list_memes(&self) -> Result<Vec<Meme>, ServiceError> {
        Ok(self.repo.list_all().await?)
    }

    pub async fn get_meme(&self, id: u64) -> Result<Meme, ServiceError> {
        self.repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Meme {}", id)))
    }

    /// Deletes the meme and its comments, then clears both cached image entries.
    pub async fn delete_meme(&self, id: u64, presented_key: Option<&str>) -> Result<(), ServiceError> {
        match (self.admin_key.as_deref(), presented_key) {
            (Some(expected), Some(presented)) if expected == presented => {}
            _ => {
                tracing::warn!(meme_id = id, "Rejected delete with missing or wrong admin key");
                return Err(ServiceError::Unauthorized);
            }
        }

        let meme = self.repo.delete(id).await?;
        self.images.invalidate(&meme).await;
        tracing::info!(meme_id = id, "Meme deleted");
        Ok(())
    }

    pub async fn add_comment(
        &self,
        meme_id: u64,
        author: &str,
        content: &str,
    ) -> Result<Comment, ServiceError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ServiceError::InvalidInput("comment content is empty".into()));
        }
        let author = match author.trim() {
            "" => ANONYMOUS_AUTHOR,
            author => author,
        };
        // Comments of unknown memes are rejected before anything is written.
        self.get_meme(meme_id).await?;

        let comment = Comment {
            id: Uuid::new_v4(),
            meme_id,
            author: author.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.repo.add_comment(&comment).await?;
        tracing::debug!(meme_id, comment_id = %comment.id, "Comment added");
        Ok(comment)
    }

    pub async fn list_comments(&self, meme_id: u64) -> Result<Vec<Comment>, ServiceError> {
        self.get_meme(meme_id).await?;
        Ok(self.repo.list_comments(meme_id).await?)
    }
}
