use bytes::Bytes;
use tracing::error;
use uuid::Uuid;

use crate::errors::{ApiError, ApiResult};
use crate::state::AppState;

/// One image received from a multipart form.
pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

/// Upload an image to the media store and return its hosted URL.
///
/// Objects are keyed `{prefix}/{uuid}.{ext}`. An unsupported content type is a
/// caller error; a store failure is an upload error, never a silent null.
pub async fn upload_image(st: &AppState, prefix: &str, item: UploadItem) -> ApiResult<String> {
    let ext = ext_from_mime(&item.content_type).ok_or_else(|| {
        ApiError::Validation(format!("unsupported image type: {}", item.content_type))
    })?;
    let key = format!("{}/{}.{}", prefix, Uuid::new_v4(), ext);

    st.storage
        .put_object(&key, item.body, &item.content_type)
        .await
        .map_err(|e| {
            error!(error = %e, %key, "put_object failed");
            ApiError::Upload(format!("failed to store {} image", prefix))
        })?;

    Ok(public_url(&st.config.media.public_base_url, &key))
}

fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("image/heic"), Some("heic"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
        assert_eq!(ext_from_mime("video/mp4"), None);
    }

    #[test]
    fn test_public_url_joins_cleanly() {
        assert_eq!(
            public_url("https://cdn.example.com/", "avatars/x.jpg"),
            "https://cdn.example.com/avatars/x.jpg"
        );
        assert_eq!(
            public_url("https://cdn.example.com", "covers/y.png"),
            "https://cdn.example.com/covers/y.png"
        );
    }

    #[tokio::test]
    async fn test_upload_image_returns_hosted_url() {
        let state = AppState::fake();
        let url = upload_image(
            &state,
            "avatars",
            UploadItem {
                body: Bytes::from_static(b"fake-image-bytes"),
                content_type: "image/png".into(),
            },
        )
        .await
        .unwrap();
        assert!(url.starts_with("https://media.fake.local/avatars/"));
        assert!(url.ends_with(".png"));
    }

    #[tokio::test]
    async fn test_upload_image_rejects_unknown_mime() {
        let state = AppState::fake();
        let err = upload_image(
            &state,
            "avatars",
            UploadItem {
                body: Bytes::from_static(b"zip"),
                content_type: "application/zip".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
