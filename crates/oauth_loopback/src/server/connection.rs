//! Per-connection request handling
//!
//! Reads one HTTP/1.1 request (or the exit marker) from a connection, answers
//! it, and reports what the accept loop should do next.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::error::OAuthError;
use crate::server::{OAuthCallback, EXIT};

/// Upper bound for the request line plus headers
pub(crate) const MAX_HEAD_BYTES: usize = 8 * 1024;
/// Upper bound for a `POST /submit` body
pub(crate) const MAX_BODY_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 100;

const SUBMIT_PATH: &str = "/submit";
const EXIT_PATH: &str = "/exit";
const FAVICON_PATH: &str = "/favicon.ico";

const CORS_HEADERS: &str = "Access-Control-Allow-Headers: *\r\n\
Access-Control-Allow-Methods: POST, GET, OPTIONS\r\n\
Access-Control-Allow-Credentials: true\r\n\
Access-Control-Allow-Origin: *\r\n";

/// What a connection asked for
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Deliver this to the handler
    Callback(OAuthCallback),
    /// Stop the server
    Exit,
    /// Answered (or dropped) without a callback
    Ignored,
}

/// Owned view of a parsed request head
#[derive(Debug)]
struct RequestHead {
    method: String,
    path: String,
    host: Option<String>,
    content_length: Option<usize>,
    chunked: bool,
    head_len: usize,
}

enum HeadError {
    Malformed,
    BadContentLength,
}

/// Try to parse the head from what has been read so far.
///
/// `Ok(None)` means more bytes are needed.
fn parse_head(buf: &[u8]) -> Result<Option<RequestHead>, HeadError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);

    let head_len = match request.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(_) => return Err(HeadError::Malformed),
    };

    let mut host = None;
    let mut content_length = None;
    let mut chunked = false;
    for header in request.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-length") {
            let value = std::str::from_utf8(header.value).map_err(|_| HeadError::BadContentLength)?;
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| HeadError::BadContentLength)?;
            content_length = Some(parsed);
        } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = std::str::from_utf8(header.value)
                .is_ok_and(|v| v.to_ascii_lowercase().contains("chunked"));
        } else if header.name.eq_ignore_ascii_case("host") {
            host = std::str::from_utf8(header.value).ok().map(|h| h.trim().to_string());
        }
    }

    Ok(Some(RequestHead {
        method: request.method.unwrap_or_default().to_string(),
        path: request.path.unwrap_or_default().to_string(),
        host,
        content_length,
        chunked,
        head_len,
    }))
}

/// Path without the query string
fn route(path: &str) -> &str {
    path.split_once('?').map_or(path, |(route, _)| route)
}

/// Handle a single connection.
///
/// `port` and `response_html` come from the server that accepted it.
/// A `POST /submit` body is read by `Content-Length` only; chunked uploads
/// are answered `411 Length Required`.
pub(crate) async fn handle_connection<S>(
    stream: &mut S,
    port: u16,
    response_html: &str,
) -> Result<Outcome, OAuthError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let head = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            trace!("Connection closed before a complete request");
            return Ok(Outcome::Ignored);
        }
        buf.extend_from_slice(&chunk[..n]);

        if buf.starts_with(&EXIT) {
            debug!("Received exit marker");
            return Ok(Outcome::Exit);
        }
        // A short read may be the beginning of the exit marker.
        if EXIT.starts_with(&buf) {
            continue;
        }

        match parse_head(&buf) {
            Ok(Some(head)) if head.head_len <= MAX_HEAD_BYTES => break head,
            Ok(None) if buf.len() <= MAX_HEAD_BYTES => continue,
            Ok(_) => {
                warn!("Request head exceeds {} bytes", MAX_HEAD_BYTES);
                write_response(stream, "431 Request Header Fields Too Large", "text/plain", "", false)
                    .await?;
                return Ok(Outcome::Ignored);
            }
            Err(HeadError::Malformed) => {
                warn!("Malformed HTTP request");
                write_response(stream, "400 Bad Request", "text/plain", "", false).await?;
                return Ok(Outcome::Ignored);
            }
            Err(HeadError::BadContentLength) => {
                warn!("Invalid Content-Length header");
                write_response(stream, "400 Bad Request", "text/plain", "", false).await?;
                return Ok(Outcome::Ignored);
            }
        }
    };

    trace!("{} {}", head.method, head.path);

    let path = route(&head.path);

    if path == EXIT_PATH {
        write_response(stream, "200 OK", "text/plain; charset=utf-8", "", false).await?;
        return Ok(Outcome::Exit);
    }

    match head.method.as_str() {
        "OPTIONS" => {
            write_response(stream, "204 No Content", "text/plain", "", true).await?;
            Ok(Outcome::Ignored)
        }
        "POST" if path == SUBMIT_PATH => {
            if head.chunked && head.content_length.is_none() {
                warn!("Chunked submission without Content-Length");
                write_response(stream, "411 Length Required", "text/plain", "", true).await?;
                return Ok(Outcome::Ignored);
            }

            let length = head.content_length.unwrap_or(0);
            if length > MAX_BODY_BYTES {
                warn!("Submission body of {} bytes exceeds limit", length);
                write_response(stream, "413 Payload Too Large", "text/plain", "", true).await?;
                return Ok(Outcome::Ignored);
            }

            let mut body = buf[head.head_len..].to_vec();
            while body.len() < length {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    warn!(
                        "Connection closed after {} of {} body bytes",
                        body.len(),
                        length
                    );
                    return Ok(Outcome::Ignored);
                }
                body.extend_from_slice(&chunk[..n]);
            }
            body.truncate(length);

            write_response(stream, "200 OK", "application/json; charset=utf-8", "true", true)
                .await?;

            let body = String::from_utf8_lossy(&body).into_owned();
            if body.is_empty() {
                Ok(Outcome::Ignored)
            } else {
                Ok(Outcome::Callback(OAuthCallback::Submission { body }))
            }
        }
        "GET" if path == FAVICON_PATH => {
            write_response(stream, "404 Not Found", "text/plain", "", false).await?;
            Ok(Outcome::Ignored)
        }
        "GET" => {
            write_response(stream, "200 OK", "text/html; charset=utf-8", response_html, false)
                .await?;
            let authority = head
                .host
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| format!("127.0.0.1:{}", port));
            Ok(Outcome::Callback(OAuthCallback::Redirect {
                url: format!("http://{}{}", authority, head.path),
            }))
        }
        _ => {
            write_response(stream, "405 Method Not Allowed", "text/plain", "", true).await?;
            Ok(Outcome::Ignored)
        }
    }
}

async fn write_response<S>(
    stream: &mut S,
    status: &str,
    content_type: &str,
    body: &str,
    cors: bool,
) -> Result<(), OAuthError>
where
    S: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Type: {}\r\n{}cache-control: max-age=0, private, must-revalidate\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        content_type,
        if cors { CORS_HEADERS } else { "" },
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// Feed `request` to handle_connection and return its outcome plus the raw response
    async fn run(request: &[u8]) -> (Outcome, String) {
        let (mut client, mut server) = duplex(256 * 1024);
        client.write_all(request).await.unwrap();
        client.shutdown().await.unwrap();

        let outcome = handle_connection(&mut server, 4242, "<p>bye</p>").await.unwrap();
        drop(server);

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        (outcome, String::from_utf8(response).unwrap())
    }

    #[tokio::test]
    async fn test_get_redirect_uses_host_header() {
        let (outcome, response) =
            run(b"GET /callback?code=abc&state=xyz HTTP/1.1\r\nHost: localhost:4242\r\n\r\n").await;

        assert_eq!(
            outcome,
            Outcome::Callback(OAuthCallback::Redirect {
                url: "http://localhost:4242/callback?code=abc&state=xyz".to_string()
            })
        );
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: text/html"));
        assert!(response.ends_with("<p>bye</p>"));
    }

    #[tokio::test]
    async fn test_get_redirect_without_host() {
        let (outcome, _) = run(b"GET /cb?code=1 HTTP/1.1\r\n\r\n").await;
        assert_eq!(
            outcome,
            Outcome::Callback(OAuthCallback::Redirect {
                url: "http://127.0.0.1:4242/cb?code=1".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_submit_body() {
        let (outcome, response) = run(
            b"POST /submit HTTP/1.1\r\nHost: x\r\ncontent-length: 11\r\n\r\n{\"code\":42}",
        )
        .await;

        assert_eq!(
            outcome,
            Outcome::Callback(OAuthCallback::Submission {
                body: "{\"code\":42}".to_string()
            })
        );
        assert!(response.contains("Access-Control-Allow-Origin: *"));
        assert!(response.contains("application/json"));
        assert!(response.ends_with("\r\n\r\ntrue"));
    }

    #[tokio::test]
    async fn test_submit_empty_body_is_ignored() {
        let (outcome, response) =
            run(b"POST /submit HTTP/1.1\r\nContent-Length: 0\r\n\r\n").await;
        assert_eq!(outcome, Outcome::Ignored);
        assert!(response.ends_with("true"));
    }

    #[tokio::test]
    async fn test_submit_truncated_body_is_ignored() {
        let (outcome, response) =
            run(b"POST /submit HTTP/1.1\r\nContent-Length: 50\r\n\r\nshort").await;
        assert_eq!(outcome, Outcome::Ignored);
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_submit_too_large() {
        let request = format!(
            "POST /submit HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_BODY_BYTES + 1
        );
        let (outcome, response) = run(request.as_bytes()).await;
        assert_eq!(outcome, Outcome::Ignored);
        assert!(response.starts_with("HTTP/1.1 413"));
    }

    #[tokio::test]
    async fn test_chunked_submit_rejected() {
        let (outcome, response) = run(
            b"POST /submit HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        )
        .await;
        assert_eq!(outcome, Outcome::Ignored);
        assert!(response.starts_with("HTTP/1.1 411"));
    }

    /// GET request whose head is `MAX_HEAD_BYTES + extra` bytes long
    fn padded_get(extra: usize) -> Vec<u8> {
        let prefix = "GET /cb HTTP/1.1\r\nX-Pad: ";
        let suffix = "\r\n\r\n";
        let pad = MAX_HEAD_BYTES + extra - prefix.len() - suffix.len();
        format!("{}{}{}", prefix, "a".repeat(pad), suffix).into_bytes()
    }

    #[tokio::test]
    async fn test_head_at_limit_accepted() {
        let request = padded_get(0);
        assert_eq!(request.len(), MAX_HEAD_BYTES);

        let (outcome, response) = run(&request).await;
        assert!(matches!(outcome, Outcome::Callback(OAuthCallback::Redirect { .. })));
        assert!(response.starts_with("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn test_head_just_over_limit_rejected() {
        let (outcome, response) = run(&padded_get(1)).await;
        assert_eq!(outcome, Outcome::Ignored);
        assert!(response.starts_with("HTTP/1.1 431"));
    }

    #[tokio::test]
    async fn test_complete_head_over_limit_rejected() {
        // Arrives in 1 KiB reads, so the head only completes past the limit
        let (outcome, response) = run(&padded_get(700)).await;
        assert_eq!(outcome, Outcome::Ignored);
        assert!(response.starts_with("HTTP/1.1 431"));
    }

    #[tokio::test]
    async fn test_unterminated_head_over_limit_rejected() {
        let request = format!("GET /cb HTTP/1.1\r\nX-Pad: {}", "a".repeat(20 * 1024));
        let (outcome, response) = run(request.as_bytes()).await;
        assert_eq!(outcome, Outcome::Ignored);
        assert!(response.starts_with("HTTP/1.1 431"));
    }

    #[tokio::test]
    async fn test_too_many_headers_rejected() {
        let mut request = String::from("GET /cb HTTP/1.1\r\n");
        for i in 0..=MAX_HEADERS {
            request.push_str(&format!("X-H{}: v\r\n", i));
        }
        request.push_str("\r\n");
        assert!(request.len() < MAX_HEAD_BYTES);

        let (outcome, response) = run(request.as_bytes()).await;
        assert_eq!(outcome, Outcome::Ignored);
        assert!(response.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn test_header_count_at_limit_accepted() {
        let mut request = String::from("GET /cb HTTP/1.1\r\n");
        for i in 0..MAX_HEADERS {
            request.push_str(&format!("X-H{}: v\r\n", i));
        }
        request.push_str("\r\n");

        let (outcome, _) = run(request.as_bytes()).await;
        assert!(matches!(outcome, Outcome::Callback(_)));
    }

    #[tokio::test]
    async fn test_exit_marker() {
        let (outcome, response) = run(&EXIT).await;
        assert_eq!(outcome, Outcome::Exit);
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_exit_path() {
        let (outcome, response) = run(b"GET /exit HTTP/1.1\r\n\r\n").await;
        assert_eq!(outcome, Outcome::Exit);
        assert!(response.starts_with("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn test_options_preflight() {
        let (outcome, response) = run(b"OPTIONS /submit HTTP/1.1\r\n\r\n").await;
        assert_eq!(outcome, Outcome::Ignored);
        assert!(response.starts_with("HTTP/1.1 204 No Content"));
        assert!(response.contains("Access-Control-Allow-Methods: POST, GET, OPTIONS"));
    }

    #[tokio::test]
    async fn test_favicon_is_not_a_callback() {
        let (outcome, response) = run(b"GET /favicon.ico HTTP/1.1\r\n\r\n").await;
        assert_eq!(outcome, Outcome::Ignored);
        assert!(response.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn test_other_method() {
        let (outcome, response) = run(b"DELETE /callback HTTP/1.1\r\n\r\n").await;
        assert_eq!(outcome, Outcome::Ignored);
        assert!(response.starts_with("HTTP/1.1 405"));
    }

    #[tokio::test]
    async fn test_malformed_request() {
        let (outcome, response) = run(b"\x00\x01garbage\r\n\r\n").await;
        assert_eq!(outcome, Outcome::Ignored);
        assert!(response.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn test_bad_content_length() {
        let (outcome, response) =
            run(b"POST /submit HTTP/1.1\r\nContent-Length: lots\r\n\r\n").await;
        assert_eq!(outcome, Outcome::Ignored);
        assert!(response.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn test_incomplete_head_is_ignored() {
        let (outcome, response) = run(b"GET /callback HTTP/1.1\r\nHost: x").await;
        assert_eq!(outcome, Outcome::Ignored);
        assert!(response.is_empty());
    }

    #[test]
    fn test_route_strips_query() {
        assert_eq!(route("/exit?now=1"), "/exit");
        assert_eq!(route("/callback"), "/callback");
    }
}
