//! Content negotiation for the request plane.
//!
//! Requests and responses each carry a primary media type; when the
//! primary is the framed streaming media, a secondary "message" header
//! selects the encoding of the records inside the stream. The
//! secondary headers are only valid alongside a streaming primary.

use super::http::{HttpRequest, Response};
use super::{MESSAGE_ACCEPT_HEADER, MESSAGE_CONTENT_TYPE_HEADER};
use crate::wire::{
    ContentType, APPLICATION_JSON, APPLICATION_PROTOBUF, APPLICATION_RECORDIO,
};

/// The four negotiated encodings of one request/response exchange.
#[derive(Debug, Clone, Copy)]
pub struct RequestMediaTypes {
    pub content: ContentType,
    pub accept: ContentType,
    pub message_content: Option<ContentType>,
    pub message_accept: Option<ContentType>,
}

impl RequestMediaTypes {
    /// Encoding of individual messages in the request body.
    pub fn request_encoding(&self) -> ContentType {
        self.message_content.unwrap_or(self.content)
    }

    /// Encoding of individual messages in the response body.
    pub fn response_encoding(&self) -> ContentType {
        self.message_accept.unwrap_or(self.accept)
    }
}

/// True when the client's header allows the given media type. A
/// missing header allows everything.
pub(crate) fn accepts_media_type(header: Option<&str>, media: &str) -> bool {
    let Some(header) = header else {
        return true;
    };
    header.split(',').any(|entry| {
        let media_range = entry.split(';').next().unwrap_or("").trim();
        media_range == media || media_range == "*/*" || media_range == "application/*"
    })
}

/// Decides the request and response encodings for an operator API
/// request, or the error response describing why negotiation failed.
pub(crate) fn negotiate(request: &HttpRequest) -> Result<RequestMediaTypes, Response> {
    let content = match request.header("Content-Type") {
        None => {
            return Err(Response::bad_request(
                "Expecting 'Content-Type' to be present",
            ));
        }
        Some(value) => ContentType::from_media_type(value).ok_or_else(|| {
            Response::unsupported_media_type(format!(
                "Expecting 'Content-Type' of {APPLICATION_JSON} or {APPLICATION_PROTOBUF} \
                 or {APPLICATION_RECORDIO}"
            ))
        })?,
    };

    let message_content_header = request.header(MESSAGE_CONTENT_TYPE_HEADER);
    let message_content = if content.is_streaming() {
        match message_content_header {
            None => {
                return Err(Response::bad_request(format!(
                    "Expecting '{MESSAGE_CONTENT_TYPE_HEADER}' to be set for streaming requests"
                )));
            }
            Some(value) => match ContentType::from_media_type(value) {
                Some(message) if !message.is_streaming() => Some(message),
                _ => {
                    return Err(Response::unsupported_media_type(format!(
                        "Expecting '{MESSAGE_CONTENT_TYPE_HEADER}' of {APPLICATION_JSON} or \
                         {APPLICATION_PROTOBUF}"
                    )));
                }
            },
        }
    } else {
        if message_content_header.is_some() {
            return Err(Response::unsupported_media_type(format!(
                "Expecting '{MESSAGE_CONTENT_TYPE_HEADER}' to be not set for non-streaming \
                 requests"
            )));
        }
        None
    };

    let accept_header = request.header("Accept");
    let accept = if accepts_media_type(accept_header, APPLICATION_JSON) {
        ContentType::Json
    } else if accepts_media_type(accept_header, APPLICATION_PROTOBUF) {
        ContentType::Protobuf
    } else if accepts_media_type(accept_header, APPLICATION_RECORDIO) {
        ContentType::RecordIo
    } else {
        return Err(Response::not_acceptable(format!(
            "Expecting 'Accept' to allow {APPLICATION_JSON} or {APPLICATION_PROTOBUF} or \
             {APPLICATION_RECORDIO}"
        )));
    };

    let message_accept_header = request.header(MESSAGE_ACCEPT_HEADER);
    let message_accept = if accept.is_streaming() {
        if accepts_media_type(message_accept_header, APPLICATION_JSON) {
            Some(ContentType::Json)
        } else if accepts_media_type(message_accept_header, APPLICATION_PROTOBUF) {
            Some(ContentType::Protobuf)
        } else {
            return Err(Response::not_acceptable(format!(
                "Expecting '{MESSAGE_ACCEPT_HEADER}' to allow {APPLICATION_JSON} or \
                 {APPLICATION_PROTOBUF}"
            )));
        }
    } else {
        if message_accept_header.is_some() {
            return Err(Response::not_acceptable(format!(
                "Expecting '{MESSAGE_ACCEPT_HEADER}' to be not set for non-streaming responses"
            )));
        }
        None
    };

    Ok(RequestMediaTypes {
        content,
        accept,
        message_content,
        message_accept,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> HttpRequest {
        HttpRequest {
            method: "POST".to_string(),
            path: "/api/v1".to_string(),
            query: None,
            headers: headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body: Vec::new(),
        }
    }

    #[test]
    fn missing_content_type_is_bad_request() {
        let result = negotiate(&request(&[]));
        assert_eq!(400, result.err().map(|r| r.status()).unwrap_or_default());
    }

    #[test]
    fn unknown_content_type_is_unsupported() {
        let result = negotiate(&request(&[("Content-Type", "text/html")]));
        assert_eq!(415, result.err().map(|r| r.status()).unwrap_or_default());
    }

    #[test]
    fn plain_json_round() {
        let media = negotiate(&request(&[
            ("Content-Type", "application/json"),
            ("Accept", "application/json"),
        ]))
        .ok()
        .unwrap();
        assert_eq!(ContentType::Json, media.content);
        assert_eq!(ContentType::Json, media.accept);
        assert_eq!(None, media.message_content);
        assert_eq!(None, media.message_accept);
    }

    #[test]
    fn missing_accept_defaults_to_json() {
        let media = negotiate(&request(&[("Content-Type", "application/x-protobuf")]))
            .ok()
            .unwrap();
        assert_eq!(ContentType::Json, media.accept);
    }

    #[test]
    fn streaming_request_requires_message_content_type() {
        let result = negotiate(&request(&[("Content-Type", "application/recordio")]));
        assert_eq!(400, result.err().map(|r| r.status()).unwrap_or_default());

        let media = negotiate(&request(&[
            ("Content-Type", "application/recordio"),
            ("Message-Content-Type", "application/json"),
        ]))
        .ok()
        .unwrap();
        assert_eq!(ContentType::RecordIo, media.content);
        assert_eq!(Some(ContentType::Json), media.message_content);
        assert_eq!(ContentType::Json, media.request_encoding());
    }

    #[test]
    fn nested_streaming_message_type_is_rejected() {
        let result = negotiate(&request(&[
            ("Content-Type", "application/recordio"),
            ("Message-Content-Type", "application/recordio"),
        ]));
        assert_eq!(415, result.err().map(|r| r.status()).unwrap_or_default());
    }

    #[test]
    fn message_content_type_invalid_without_streaming() {
        let result = negotiate(&request(&[
            ("Content-Type", "application/json"),
            ("Message-Content-Type", "application/json"),
        ]));
        assert_eq!(415, result.err().map(|r| r.status()).unwrap_or_default());
    }

    #[test]
    fn message_accept_invalid_without_streaming_accept() {
        let result = negotiate(&request(&[
            ("Content-Type", "application/json"),
            ("Accept", "application/json"),
            ("Message-Accept", "application/json"),
        ]));
        assert_eq!(406, result.err().map(|r| r.status()).unwrap_or_default());
    }

    #[test]
    fn streaming_accept_picks_message_accept() {
        let media = negotiate(&request(&[
            ("Content-Type", "application/json"),
            ("Accept", "application/recordio"),
            ("Message-Accept", "application/x-protobuf"),
        ]))
        .ok()
        .unwrap();
        assert_eq!(ContentType::RecordIo, media.accept);
        assert_eq!(Some(ContentType::Protobuf), media.message_accept);
        assert_eq!(ContentType::Protobuf, media.response_encoding());
    }

    #[test]
    fn unacceptable_accept_header() {
        let result = negotiate(&request(&[
            ("Content-Type", "application/json"),
            ("Accept", "text/html"),
        ]));
        assert_eq!(406, result.err().map(|r| r.status()).unwrap_or_default());
    }
}
