use std::{collections::HashMap, io::Write, net::TcpStream};

use serde::Serialize;

use super::{ErrorResponse, SaveResponse};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Sent on every response, preflight included.
pub(crate) const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpRequest {
    pub(crate) method: String,
    pub(crate) target: String,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpResponse {
    pub(crate) status: u16,
    pub(crate) content_type: &'static str,
    pub(crate) body: String,
}

impl HttpResponse {
    pub(crate) fn ok_json(body: String) -> Self {
        Self {
            status: 200,
            content_type: JSON_CONTENT_TYPE,
            body,
        }
    }

    pub(crate) fn preflight() -> Self {
        Self::ok_json(String::new())
    }

    pub(crate) fn saved(response: &SaveResponse) -> Self {
        Self::ok_json(render_json(response))
    }

    pub(crate) fn bad_request(message: &'static str) -> Self {
        Self::error_with_status(400, message)
    }

    pub(crate) fn error_with_status(status: u16, message: &'static str) -> Self {
        Self {
            status,
            content_type: JSON_CONTENT_TYPE,
            body: render_json(&ErrorResponse::new(message)),
        }
    }
}

fn render_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| {
        tracing::error!(%err, "rendering response body failed");
        r#"{"success":false,"error":"Failed to save data"}"#.to_string()
    })
}

pub(crate) fn write_response(
    stream: &mut TcpStream,
    response: HttpResponse,
) -> std::io::Result<()> {
    stream.write_all(render_response_text(&response).as_bytes())?;
    stream.flush()
}

pub(crate) fn status_text(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        400 => "400 Bad Request",
        405 => "405 Method Not Allowed",
        413 => "413 Payload Too Large",
        _ => "500 Internal Server Error",
    }
}

pub(crate) fn render_response_text(response: &HttpResponse) -> String {
    let mut head = format!("HTTP/1.1 {}\r\n", status_text(response.status));
    for (name, value) in CORS_HEADERS {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    format!(
        "{head}Content-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.content_type,
        response.body.len(),
        response.body
    )
}
