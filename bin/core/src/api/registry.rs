use axum::{Json, extract::Path};
use convoy_client::{
  api::RegistryTagsResponse, entities::ImageRef,
};
use tokio_util::sync::CancellationToken;

use crate::state::registry_manager;

use super::{ApiError, ApiResult};

/// `GET /registry/tags/{image}`: the cached tag list for an image
/// reference (eg `nginx` or `ghcr.io/owner/app`).
pub async fn tags(
  Path(image): Path<String>,
) -> ApiResult<RegistryTagsResponse> {
  let image = image.trim_matches('/').to_string();
  if image.is_empty() {
    return Err(ApiError::bad_request("image is required"));
  }
  let image_ref = ImageRef::parse(&image);
  let cancel = CancellationToken::new();
  let tags = registry_manager()
    .list_tags(&image_ref, &cancel)
    .await?;
  Ok(Json(RegistryTagsResponse { image, tags }))
}
