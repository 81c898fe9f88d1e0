// REST API (axum) - thin routing layer over `Ledger`
//
// GET    /transactions         -> { transactions, balance }
// POST   /transactions         -> created transaction
// DELETE /transactions/:id     -> 204
// POST   /transactions/import  -> created transactions (multipart field "file")

use axum::{
    extract::{
        multipart::Field, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::error::LedgerError;
use crate::import::SourceFormat;
use crate::ledger::Ledger;
use crate::upload;
use crate::writer::NewTransaction;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub upload_dir: PathBuf,
}

/// Error body: `{ "status": "error", "message": ... }`
#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

pub struct ApiError(LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            err if err.is_client_error() => StatusCode::BAD_REQUEST,
            err => {
                tracing::error!(error = %err, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = ErrorBody {
            status: "error",
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Run blocking ledger work off the async executor.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LedgerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
        .map_err(ApiError::from)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_transactions(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let snapshot = blocking(move || state.ledger.list_all()).await?;
    Ok(Json(snapshot))
}

async fn create_transaction(
    State(state): State<AppState>,
    payload: Result<Json<NewTransaction>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload.map_err(|e| LedgerError::InvalidInput(e.body_text()))?;
    let tx = blocking(move || state.ledger.create_one(&request)).await?;
    Ok(Json(tx))
}

async fn delete_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    blocking(move || state.ledger.delete_one(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream one multipart field to disk chunk by chunk.
async fn write_field(field: &mut Field<'_>, path: &FsPath) -> Result<u64, LedgerError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| LedgerError::InvalidInput(e.to_string()))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    tracing::debug!(path = %path.display(), bytes = written, "upload staged");
    Ok(written)
}

async fn import_transactions(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut staged = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| LedgerError::InvalidInput(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload.csv").to_string();
        let media_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let upload_dir = state.upload_dir.clone();
        let path = blocking(move || upload::staging_path(&upload_dir, &file_name)).await?;
        if let Err(err) = write_field(&mut field, &path).await {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove partial upload");
            }
            return Err(err.into());
        }
        staged = Some((path, media_type));
        break;
    }

    let (path, media_type) = staged.ok_or_else(|| {
        LedgerError::InvalidInput("multipart field 'file' is required".to_string())
    })?;

    // The pipeline leaves rejected formats alone; the staged copy is ours to drop
    if let Err(err) = SourceFormat::from_media_type(&media_type) {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove rejected upload");
        }
        return Err(err.into());
    }

    let ledger = Arc::clone(&state.ledger);
    let report = blocking(move || ledger.import_file(&path, &media_type)).await?;
    Ok(Json(report.into_transactions()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/transactions",
            get(list_transactions).post(create_transaction),
        )
        .route("/transactions/:id", delete(delete_transaction))
        .route("/transactions/import", post(import_transactions))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;

    fn test_state(upload_dir: PathBuf) -> AppState {
        AppState {
            ledger: Arc::new(Ledger::open_in_memory().unwrap()),
            upload_dir,
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_upload(file_name: &str, media_type: &str, contents: &str) -> Request<Body> {
        let boundary = "cashbook-test-boundary";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: {m}\r\n\r\n{c}\r\n--{b}--\r\n",
            b = boundary,
            f = file_name,
            m = media_type,
            c = contents
        );

        Request::builder()
            .method("POST")
            .uri("/transactions/import")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path().to_path_buf()));

        let response = app
            .clone()
            .oneshot(json_post(
                "/transactions",
                serde_json::json!({"title": "Salary", "value": 1000, "type": "income", "category": "Work"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created["title"], "Salary");
        assert_eq!(created["category"]["title"], "Work");

        let response = app
            .oneshot(Request::get("/transactions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listing = body_json(response).await;
        assert_eq!(listing["transactions"].as_array().unwrap().len(), 1);
        assert_eq!(listing["balance"]["total"], 1000.0);
    }

    #[tokio::test]
    async fn test_insufficient_funds_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path().to_path_buf()));

        let response = app
            .oneshot(json_post(
                "/transactions",
                serde_json::json!({"title": "TV", "value": 10, "type": "outcome", "category": "Tech"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("insufficient funds"));
    }

    #[tokio::test]
    async fn test_malformed_create_body_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path().to_path_buf()));

        for body in [
            serde_json::json!({"title": "x", "value": 5, "type": "transfer", "category": "c"}),
            serde_json::json!({"title": "x", "value": "5", "type": "income", "category": "c"}),
            serde_json::json!({"title": "x", "type": "income", "category": "c"}),
        ] {
            let response = app
                .clone()
                .oneshot(json_post("/transactions", body))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = body_json(response).await;
            assert_eq!(body["status"], "error");
            assert!(body["message"].as_str().unwrap().starts_with("invalid input"));
        }
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path().to_path_buf()));

        let response = app
            .oneshot(
                Request::delete("/transactions/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_existing_is_no_content() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path().to_path_buf());
        let tx = state
            .ledger
            .create_one(&NewTransaction::parse("Salary", "income", "10", "Work").unwrap())
            .unwrap();
        let app = router(state.clone());

        let response = app
            .oneshot(
                Request::delete(format!("/transactions/{}", tx.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.ledger.list_all().unwrap().transactions.is_empty());
    }

    #[tokio::test]
    async fn test_import_upload() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path().to_path_buf());
        let app = router(state.clone());

        let csv = "title,type,value,category\nSalary,income,1000,Work\nRent,outcome,300,Housing\nBad,outcome,,\nSnack,outcome,5,Food\n";
        let response = app
            .oneshot(multipart_upload("ledger.csv", "text/csv", csv))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created.as_array().unwrap().len(), 3);
        assert_eq!(state.ledger.balance().unwrap().total, rust_decimal::Decimal::from(695));

        // Staged upload removed after import
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_import_rejects_non_csv_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path().to_path_buf()));

        let response = app
            .oneshot(multipart_upload("ledger.json", "application/json", "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
