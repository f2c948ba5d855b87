//! HTTP status to typed error translation shared by HTTP based clients.

use reqwest::{Response, StatusCode};

use cloudstorage_common::{Error, Result};

/// Map a failed HTTP status (and its body) to the error taxonomy.
pub fn error_for_status(status: StatusCode, body: String) -> Error {
    let cause = if body.trim().is_empty() {
        status.to_string()
    } else {
        body
    };

    match status {
        StatusCode::UNAUTHORIZED => Error::Unauthorized(status.to_string()),
        StatusCode::NOT_FOUND => Error::NotFound(cause),
        StatusCode::CONFLICT => Error::Conflict(cause),
        _ => Error::Http {
            status: status.as_u16(),
            message: cause,
        },
    }
}

/// Fail on any status >= 400, otherwise hand the response back.
pub async fn handle_response_errors(response: Response) -> Result<Response> {
    let status = response.status();
    if status.as_u16() < 400 {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(status, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudstorage_common::ErrorKind;

    #[test]
    fn test_typed_statuses() {
        assert_eq!(
            error_for_status(StatusCode::UNAUTHORIZED, String::new()).kind(),
            Some(ErrorKind::Unauthorized)
        );
        assert_eq!(
            error_for_status(StatusCode::NOT_FOUND, "missing".into()).kind(),
            Some(ErrorKind::NotFound)
        );
        assert_eq!(
            error_for_status(StatusCode::CONFLICT, String::new()).kind(),
            Some(ErrorKind::Conflict)
        );
    }

    #[test]
    fn test_other_statuses_are_untyped() {
        let err = error_for_status(StatusCode::INTERNAL_SERVER_ERROR, "boom".into());
        assert_eq!(err.kind(), None);
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("boom"));

        let err = error_for_status(StatusCode::FORBIDDEN, String::new());
        assert_eq!(err.kind(), None);
        assert!(matches!(err, Error::Http { status: 403, .. }));
    }
}
