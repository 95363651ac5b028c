use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::models::{ErrorResponse, RenderRequest};

/// Re-render an already generated document in another format.
pub async fn render(payload: Result<Json<RenderRequest>, JsonRejection>) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let mut document = req.document;
    document.normalize();
    if document.is_empty() {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Document has no content to render".to_string(),
        );
    }

    let source = req
        .filename
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| document.title.clone());
    document.ensure_title(&source);

    match docscribe_render::render(&document, req.format) {
        Ok(bytes) => {
            let filename = attachment_name(&docscribe_render::output_filename(&source, req.format));
            (
                [
                    (header::CONTENT_TYPE, req.format.mime_type().to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, format = %req.format, "render failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

/// Header values must be visible ASCII.
fn attachment_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_name_is_ascii() {
        assert_eq!(attachment_name("Résumé notes.pdf"), "R_sum_ notes.pdf");
    }
}
