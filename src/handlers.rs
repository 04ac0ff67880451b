use crate::{
    errors::AppError,
    models::{Comment, Meme, TemplateCatalogEntry, VoteDirection, VoteOutcome},
    AppState,
};
use axum::{
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tracing;

const ADMIN_KEY_HEADER: &str = "x-admin-key";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Who is voting: the first `X-Forwarded-For` hop, or else the peer address.
///
/// Neither is verified. The header is taken as sent, so a client that is not
/// behind a proxy which overwrites it can vote again under a new identity.
/// Deploy behind such a proxy when one vote per person matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterIdentity(pub String);

impl<S> FromRequestParts<S> for VoterIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = forwarded {
            return Ok(VoterIdentity(hop.to_string()));
        }

        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| VoterIdentity(addr.ip().to_string()))
            .ok_or_else(|| AppError::InvalidInput("cannot determine voter identity".to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub template: String,
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    #[serde(default)]
    pub author: String,
    pub content: String,
}

fn parse_id(id_str: &str) -> Result<u64, AppError> {
    Ok(id_str.parse::<u64>()?)
}

fn image_response(bytes: Vec<u8>, locator: &str) -> Response {
    let content_type = mime_guess::from_path(locator).first_or_octet_stream();
    ([(header::CONTENT_TYPE, content_type.to_string())], bytes).into_response()
}

/// Splits `{template}/{line1}/.../{lineN}.png` (or `{template}.png`). A `_` segment is a blank line.
pub fn parse_image_path(path: &str) -> Result<(String, Vec<String>), AppError> {
    let stem = path
        .strip_suffix(".png")
        .ok_or_else(|| AppError::InvalidInput("image path must end in .png".to_string()))?;
    let mut segments = stem.split('/');
    let template = segments
        .next()
        .filter(|template| !template.is_empty())
        .ok_or_else(|| AppError::MissingField("template".to_string()))?;
    let lines = segments
        .map(|line| if line == "_" { String::new() } else { line.to_string() })
        .collect();
    Ok((template.to_string(), lines))
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn list_memes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Meme>>, AppError> {
    let memes = state.memes.list_memes().await?;
    tracing::debug!("Listed {} memes", memes.len());
    Ok(Json(memes))
}

pub async fn list_templates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TemplateCatalogEntry>>, AppError> {
    Ok(Json(state.catalog.get_templates().await?))
}

pub async fn generate_meme(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let meme = state
        .memes
        .create_meme(&request.template, request.lines, request.context, request.link)
        .await?;
    Ok((StatusCode::CREATED, Json(meme)))
}

pub async fn get_meme(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<Json<Meme>, AppError> {
    let meme_id = parse_id(&id_str)?;
    Ok(Json(state.memes.get_meme(meme_id).await?))
}

/// Handler for GET /meme/{id}: the rendered image of a stored meme.
pub async fn get_meme_image(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<Response, AppError> {
    let meme_id = parse_id(&id_str)?;
    tracing::debug!(%meme_id, "Serving meme image");
    let bytes = state.images.resolve_by_meme_id(meme_id).await?;
    Ok(image_response(bytes, "meme.png"))
}

/// Handler for GET /api/images/{template}/{lines...}.png
pub async fn proxy_image(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let (template, lines) = parse_image_path(&path)?;
    let bytes = state.images.resolve(&template, &lines).await?;
    Ok(image_response(bytes, &path))
}

pub async fn delete_meme(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let meme_id = parse_id(&id_str)?;
    let presented = headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok());
    state.memes.delete_meme(meme_id, presented).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn vote(
    State(state): State<Arc<AppState>>,
    Path((id_str, direction)): Path<(String, String)>,
    VoterIdentity(voter): VoterIdentity,
) -> Result<(StatusCode, Json<VoteOutcome>), AppError> {
    let meme_id = parse_id(&id_str)?;
    let direction: VoteDirection = direction.parse().map_err(AppError::InvalidInput)?;

    let outcome = state.votes.apply_vote(meme_id, &voter, direction).await?;
    tracing::debug!(%meme_id, %direction, tally = outcome.tally(), "Vote handled");
    let status = match outcome {
        VoteOutcome::AlreadyVoted { .. } => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<Json<Vec<Comment>>, AppError> {
    let meme_id = parse_id(&id_str)?;
    Ok(Json(state.memes.list_comments(meme_id).await?))
}

pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
    Json(request): Json<CommentRequest>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    let meme_id = parse_id(&id_str)?;
    let comment = state
        .memes
        .add_comment(meme_id, &request.author, &request.content)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}
