use axum::{
    body::Bytes,
    extract::multipart::{Field, Multipart, MultipartError},
    http::StatusCode,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::PostStatus,
    storage::StorageService,
};

/// An uploaded featured image, held in memory until the policy checks have passed.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: Option<String>,
    pub content_type: String,
    pub bytes: Bytes,
}

impl Upload {
    /// The storage key `posts/<uuid>.<ext>`. The extension comes from the file name when
    /// it looks sane, otherwise from the content type.
    pub fn object_key(&self) -> String {
        let from_name = self
            .file_name
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| {
                !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
            });

        let ext = from_name.unwrap_or_else(|| {
            match self.content_type.as_str() {
                "image/jpeg" => "jpg",
                "image/png" => "png",
                "image/gif" => "gif",
                "image/webp" => "webp",
                "image/svg+xml" => "svg",
                _ => "bin",
            }
            .to_string()
        });

        format!("posts/{}.{}", Uuid::new_v4(), ext)
    }
}

/// PostForm
///
/// The multipart body of `POST /api/posts` and `PUT /api/posts/{id}`. Text fields sent
/// empty (as browsers do for untouched inputs) are treated as absent.
#[derive(Debug, Clone, Default)]
pub struct PostForm {
    pub title: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub status: Option<String>,
    pub comment: Option<String>,
    pub featured_image: Option<Upload>,
}

fn multipart_error(error: MultipartError) -> AppError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::Validation(error.body_text())
    }
}

async fn text_value(field: Field<'_>) -> AppResult<Option<String>> {
    let value = field.text().await.map_err(multipart_error)?;
    let trimmed = value.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

/// Strips scripts, event handlers and other unsafe markup from post bodies, which the
/// public site renders as HTML. A body with nothing left is treated as absent.
pub fn clean_content(html: String) -> Option<String> {
    let cleaned = ammonia::clean(&html);
    let trimmed = cleaned.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl PostForm {
    pub async fn from_multipart(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = PostForm::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();

            match name.as_str() {
                "title" => form.title = text_value(field).await?,
                "content" => form.content = text_value(field).await?.and_then(clean_content),
                "imageUrl" => form.image_url = text_value(field).await?,
                "status" => form.status = text_value(field).await?,
                "comment" => form.comment = text_value(field).await?,
                "featuredImage" => {
                    let file_name = field.file_name().map(str::to_string);
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let bytes = field.bytes().await.map_err(multipart_error)?;

                    // An empty file input still sends a part.
                    if bytes.is_empty() {
                        continue;
                    }
                    if !content_type.starts_with("image/") {
                        return Err(AppError::Validation(
                            "Featured image must be an image file.".to_string(),
                        ));
                    }

                    form.featured_image = Some(Upload {
                        file_name,
                        content_type,
                        bytes,
                    });
                }
                other => tracing::debug!(field = %other, "ignoring unknown form field"),
            }
        }

        Ok(form)
    }

    /// The requested status, if any. Unknown values are a 400.
    pub fn parsed_status(&self) -> AppResult<Option<PostStatus>> {
        self.status
            .as_deref()
            .map(str::parse::<PostStatus>)
            .transpose()
            .map_err(|e| AppError::Validation(e.to_string()))
    }

    /// Resolves the featured image. An explicit URL wins over an uploaded file; the file
    /// is only written to storage when no URL was given.
    pub async fn store_image(&mut self, storage: &dyn StorageService) -> AppResult<Option<String>> {
        if let Some(url) = self.image_url.take() {
            return Ok(Some(url));
        }

        let Some(upload) = self.featured_image.take() else {
            return Ok(None);
        };

        let key = upload.object_key();
        let url = storage
            .put_object(&key, upload.bytes, &upload.content_type)
            .await?;
        tracing::info!(key = %key, "featured image stored");

        Ok(Some(url))
    }
}

/// PostFormSchema
///
/// OpenAPI description of the multipart post body.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
pub struct PostFormSchema {
    /// Required on create.
    title: Option<String>,
    /// Rich text (HTML). Required on create.
    content: Option<String>,
    /// External image URL. Takes precedence over `featuredImage`.
    image_url: Option<String>,
    #[schema(example = "pending_review")]
    status: Option<String>,
    /// Review note. Reviewers and admins only; required when rejecting.
    comment: Option<String>,
    #[schema(value_type = Option<String>, format = Binary)]
    featured_image: Option<Vec<u8>>,
}
