use colloquy_model::ErrorKind;
use mime::Mime;
use reqwest::{Response, StatusCode, header};

/// Classifies an unsuccessful HTTP status.
pub fn error_kind_for_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ErrorKind::Authentication
        }
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimitExceeded,
        StatusCode::REQUEST_TIMEOUT => ErrorKind::Transport,
        s if s.is_server_error() => ErrorKind::Transport,
        _ => ErrorKind::Other,
    }
}

/// Classifies an error raised by `reqwest` itself.
pub fn error_kind_for_reqwest(err: &reqwest::Error) -> ErrorKind {
    if let Some(status) = err.status() {
        return error_kind_for_status(status);
    }
    if err.is_decode() {
        return ErrorKind::MalformedResponse;
    }
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
    {
        return ErrorKind::Transport;
    }
    ErrorKind::Other
}

/// Returns `true` if the response is a `text/event-stream`.
pub fn is_event_stream(resp: &Response) -> bool {
    resp.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .map(|m: Mime| m.subtype().as_str() == "event-stream")
        .unwrap_or(false)
}

/// Turns a non-success response into an error kind with the body as the
/// message.
pub async fn check_response(
    resp: Response,
) -> Result<Response, (ErrorKind, String)> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let kind = error_kind_for_status(status);
    let body = resp.text().await.unwrap_or_default();
    debug!("request failed with {status}: {body}");
    Err((kind, format!("{status}: {body}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            error_kind_for_status(StatusCode::UNAUTHORIZED),
            ErrorKind::Authentication
        );
        assert_eq!(
            error_kind_for_status(StatusCode::FORBIDDEN),
            ErrorKind::Authentication
        );
        assert_eq!(
            error_kind_for_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorKind::RateLimitExceeded
        );
        assert_eq!(
            error_kind_for_status(StatusCode::BAD_GATEWAY),
            ErrorKind::Transport
        );
        assert_eq!(
            error_kind_for_status(StatusCode::BAD_REQUEST),
            ErrorKind::Other
        );
    }
}
