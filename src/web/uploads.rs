use crate::state::SharedState;
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, Response, StatusCode},
    Json,
};
use std::path::PathBuf;
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::{error, info};

pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp"];

/// Lowercased extension if the file name is an accepted image type.
fn image_extension(file_name: &str) -> Option<String> {
    let ext = std::path::Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

fn internal_error(e: std::io::Error) -> (StatusCode, String) {
    error!("Upload IO error: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Stores the request body as the new fallback image.
///
/// The file is always saved as `fallback.<ext>` in the uploads directory.
pub async fn upload_fallback(
    State(state): State<SharedState>,
    Path(file_name): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let ext = image_extension(&file_name)
        .ok_or((StatusCode::BAD_REQUEST, "Unsupported file type".to_string()))?;
    if body.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Empty upload".to_string()));
    }

    let dir = PathBuf::from(&state.config.server.uploads_dir);
    fs::create_dir_all(&dir).await.map_err(internal_error)?;

    let path = dir.join(format!("fallback.{}", ext));
    fs::write(&path, &body).await.map_err(internal_error)?;
    info!("Fallback image uploaded: {:?} ({} bytes)", path, body.len());

    state.playback.set_fallback_image(path.clone());

    Ok(Json(serde_json::json!({ "success": true, "path": path })))
}

/// Serves a file from the uploads directory.
pub async fn serve_upload(
    State(state): State<SharedState>,
    Path(file_name): Path<String>,
) -> Result<Response<Body>, (StatusCode, String)> {
    // Only plain file names, no traversal out of the uploads directory
    if file_name.contains('/') || file_name.contains('\\') || file_name.starts_with('.') {
        return Err((StatusCode::BAD_REQUEST, "Invalid file name".to_string()));
    }

    let mut file_path = PathBuf::from(&state.config.server.uploads_dir);
    file_path.push(&file_name);

    let file = File::open(&file_path)
        .await
        .map_err(|_| (StatusCode::NOT_FOUND, "File not found".to_string()))?;

    let content_type = mime_guess::from_path(&file_path)
        .first_or_octet_stream()
        .to_string();

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(body)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::api::tests::test_state;

    #[test]
    fn test_image_extension() {
        assert_eq!(image_extension("Photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(image_extension("fallback.png").as_deref(), Some("png"));
        assert!(image_extension("script.sh").is_none());
        assert!(image_extension("noext").is_none());
    }

    #[tokio::test]
    async fn test_upload_installs_fallback_image() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _image) = test_state(dir.path().to_str().unwrap());

        let Json(body) = upload_fallback(
            State(state.clone()),
            Path("Logo.PNG".to_string()),
            Bytes::from_static(b"\x89PNG fake"),
        )
        .await
        .unwrap();

        let expected = dir.path().join("fallback.png");
        assert_eq!(body["success"], true);
        assert_eq!(std::fs::read(&expected).unwrap(), b"\x89PNG fake");
        assert_eq!(state.playback.fallback_image(), Some(expected));
    }

    #[tokio::test]
    async fn test_upload_rejects_other_types() {
        let dir = tempfile::tempdir().unwrap();
        let (state, image) = test_state(dir.path().to_str().unwrap());

        let err = upload_fallback(
            State(state.clone()),
            Path("payload.exe".to_string()),
            Bytes::from_static(b"MZ"),
        )
        .await
        .unwrap_err();

        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert_eq!(state.playback.fallback_image(), Some(image.path().to_path_buf()));
    }

    #[tokio::test]
    async fn test_serve_upload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fallback.png"), b"image-bytes").unwrap();
        let (state, _image) = test_state(dir.path().to_str().unwrap());

        let response = serve_upload(State(state.clone()), Path("fallback.png".to_string()))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"image-bytes");

        let err = serve_upload(State(state.clone()), Path("missing.png".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);

        let err = serve_upload(State(state), Path("..".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }
}
