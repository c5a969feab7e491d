//! Minimal HTTP/1.1 plumbing: an async request reader on top of
//! httparse and a response writer that knows how to drain a pipe into
//! a close-delimited streaming body.
//!
//! Only ASCII header names, `Content-Length` bodies, and
//! `Connection: close` semantics are supported; every connection
//! carries exactly one request.

use super::{HttpError, NetError};
use crate::pipe::PipeReader;
use httparse::Status;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// One parsed request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The request target including its query, as it appeared on the
    /// request line.
    pub fn target(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }
}

/// Reads one HTTP/1.1 request. The parser expects a `Content-Length`
/// header, rejects chunked encoding, and caps header and body sizes to
/// avoid unbounded buffering.
pub(crate) async fn read_request(
    stream: &mut (impl AsyncRead + Unpin),
) -> Result<HttpRequest, NetError> {
    let mut buffer = Vec::new();
    let mut temp = [0u8; 1024];
    let mut header_end = None;
    while header_end.is_none() {
        let read = stream.read(&mut temp).await?;
        if read == 0 {
            return Err(NetError::from(HttpError::ConnectionClosedBeforeHeaders));
        }
        buffer.extend_from_slice(&temp[..read]);
        if buffer.len() > MAX_HEADER_BYTES {
            return Err(NetError::from(HttpError::HeadersTooLarge));
        }
        header_end = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|pos| pos + 4);
    }
    let header_len = header_end.unwrap_or(buffer.len());

    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut request = httparse::Request::new(&mut headers);
    match request.parse(&buffer) {
        Ok(Status::Complete(_)) => {}
        Ok(Status::Partial) => {
            return Err(NetError::from(HttpError::ConnectionClosedBeforeHeaders));
        }
        Err(err) => {
            return Err(NetError::from(HttpError::RequestParse(err)));
        }
    }
    let method = request.method.ok_or(HttpError::MissingMethod)?.to_string();
    let raw_path = request.path.ok_or(HttpError::MissingPath)?;
    let (path, query) = match raw_path.find('?') {
        Some(idx) => (&raw_path[..idx], Some(raw_path[idx + 1..].to_string())),
        None => (raw_path, None),
    };

    let mut header_pairs = Vec::with_capacity(request.headers.len());
    for header in request.headers.iter() {
        let value =
            String::from_utf8(header.value.to_vec()).map_err(|_| HttpError::InvalidHeaderValue {
                name: header.name.to_string(),
            })?;
        header_pairs.push((header.name.to_string(), value));
    }

    let mut content_length = 0usize;
    for (name, value) in &header_pairs {
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value
                .trim()
                .parse()
                .map_err(|_| HttpError::InvalidContentLengthValue)?;
        }
    }
    if content_length > MAX_BODY_BYTES {
        return Err(NetError::from(HttpError::BodyTooLarge));
    }

    let mut body = Vec::with_capacity(content_length);
    let already = buffer.len() - header_len;
    if already > 0 {
        let copy = already.min(content_length);
        body.extend_from_slice(&buffer[header_len..header_len + copy]);
    }
    while body.len() < content_length {
        let read = stream.read(&mut temp).await?;
        if read == 0 {
            return Err(NetError::from(HttpError::ConnectionClosedBeforeBody));
        }
        let remaining = content_length - body.len();
        body.extend_from_slice(&temp[..read.min(remaining)]);
    }

    Ok(HttpRequest {
        method,
        path: path.to_string(),
        query,
        headers: header_pairs,
        body,
    })
}

/// A response to be written back: either a complete body or a
/// close-delimited stream fed from a pipe.
pub enum Response {
    Plain {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    Stream {
        status: u16,
        headers: Vec<(String, String)>,
        reader: PipeReader,
    },
}

impl Response {
    pub fn plain(status: u16, body: impl Into<Vec<u8>>) -> Response {
        Response::Plain {
            status,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: body.into(),
        }
    }

    pub fn empty(status: u16) -> Response {
        Response::Plain {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn ok_with(content_type: &str, body: impl Into<Vec<u8>>) -> Response {
        Response::Plain {
            status: 200,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &impl serde::Serialize) -> Response {
        match serde_json::to_vec(value) {
            Ok(body) => Response::Plain {
                status,
                headers: vec![("Content-Type".to_string(), "application/json".to_string())],
                body,
            },
            Err(err) => Response::internal_error(format!("failed to serialize response: {err}")),
        }
    }

    pub fn ok() -> Response {
        Response::empty(200)
    }

    pub fn accepted() -> Response {
        Response::empty(202)
    }

    pub fn bad_request(message: impl Into<String>) -> Response {
        Response::plain(400, message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Response {
        Response::plain(403, message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Response {
        Response::plain(404, message.into())
    }

    pub fn method_not_allowed(allowed: &[&str], method: &str) -> Response {
        let mut response = Response::plain(
            405,
            format!("Expecting one of {{ {} }}, but received '{method}'", allowed.join(", ")),
        );
        if let Response::Plain { headers, .. } = &mut response {
            headers.push(("Allow".to_string(), allowed.join(", ")));
        }
        response
    }

    pub fn not_acceptable(message: impl Into<String>) -> Response {
        Response::plain(406, message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Response {
        Response::plain(409, message.into())
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Response {
        Response::plain(415, message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Response {
        Response::plain(500, message.into())
    }

    pub fn not_implemented() -> Response {
        Response::empty(501)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Response {
        Response::plain(503, message.into())
    }

    pub fn temporary_redirect(location: impl Into<String>) -> Response {
        Response::Plain {
            status: 307,
            headers: vec![("Location".to_string(), location.into())],
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Response {
        match &mut self {
            Response::Plain { headers, .. } | Response::Stream { headers, .. } => {
                headers.push((name.into(), value.into()));
            }
        }
        self
    }

    pub fn status(&self) -> u16 {
        match self {
            Response::Plain { status, .. } | Response::Stream { status, .. } => *status,
        }
    }
}

pub(crate) async fn write_response(
    stream: &mut (impl AsyncWrite + Unpin),
    response: Response,
) -> Result<(), NetError> {
    match response {
        Response::Plain {
            status,
            headers,
            body,
        } => {
            let mut head = format!(
                "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                status,
                status_text(status),
                body.len()
            );
            for (name, value) in &headers {
                head.push_str(&format!("{name}: {value}\r\n"));
            }
            head.push_str("\r\n");
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(&body).await?;
            stream.flush().await?;
        }
        Response::Stream {
            status,
            headers,
            mut reader,
        } => {
            let mut head = format!(
                "HTTP/1.1 {} {}\r\nConnection: close\r\n",
                status,
                status_text(status)
            );
            for (name, value) in &headers {
                head.push_str(&format!("{name}: {value}\r\n"));
            }
            head.push_str("\r\n");
            stream.write_all(head.as_bytes()).await?;
            stream.flush().await?;

            // The body is delimited by connection close; drain the
            // pipe until the producer side closes or the client goes
            // away.
            while let Some(chunk) = reader.read().await {
                if stream.write_all(&chunk).await.is_err() {
                    break;
                }
                if stream.flush().await.is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        409 => "Conflict",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "OK",
    }
}
