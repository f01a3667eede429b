use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Read},
    net::TcpStream,
};

use super::HttpRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct RequestHead {
    pub(super) method: String,
    pub(super) target: String,
    pub(super) headers: HashMap<String, String>,
}

impl RequestHead {
    pub(super) fn content_length(&self) -> Result<usize, String> {
        match self.headers.get("content-length") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| "invalid content-length header".to_string()),
            None => Ok(0),
        }
    }

    pub(super) fn into_request(self, body: Vec<u8>) -> HttpRequest {
        HttpRequest {
            method: self.method,
            target: self.target,
            headers: self.headers,
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum RequestReadError {
    Malformed(String),
    /// Declared body is over the limit; the body was left unread.
    BodyTooLarge { method: String },
}

impl From<String> for RequestReadError {
    fn from(value: String) -> Self {
        Self::Malformed(value)
    }
}

pub(super) fn read_http_request(
    stream: &mut TcpStream,
    max_body_bytes: usize,
) -> Result<Option<HttpRequest>, RequestReadError> {
    let mut reader = BufReader::new(stream);

    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        let bytes = reader.read_line(&mut line).map_err(|e| e.to_string())?;
        if bytes == 0 {
            if lines.is_empty() {
                return Ok(None);
            }
            break;
        }
        if line == "\r\n" || line == "\n" {
            break;
        }
        lines.push(line);
    }

    let head = parse_request_head(lines.iter().map(String::as_str))?;
    let content_length = head.content_length()?;
    if content_length > max_body_bytes {
        return Err(RequestReadError::BodyTooLarge {
            method: head.method,
        });
    }
    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).map_err(|e| e.to_string())?;
    }

    Ok(Some(head.into_request(body)))
}

/// Parses the request line and headers. Header names are lower-cased.
pub(super) fn parse_request_head<'a>(
    mut lines: impl Iterator<Item = &'a str>,
) -> Result<RequestHead, String> {
    let request_line = lines
        .next()
        .ok_or_else(|| "missing request line".to_string())?;
    let (method, target) = parse_request_line(request_line)?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| "invalid HTTP header".to_string())?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    Ok(RequestHead {
        method,
        target,
        headers,
    })
}

pub(super) fn parse_request_line(line: &str) -> Result<(String, String), String> {
    let line = line.trim();
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| "missing HTTP method".to_string())?;
    let target = parts
        .next()
        .ok_or_else(|| "missing HTTP target".to_string())?;
    let version = parts
        .next()
        .ok_or_else(|| "missing HTTP version".to_string())?;
    if !version.starts_with("HTTP/1.") {
        return Err("unsupported HTTP version".to_string());
    }
    Ok((method.to_string(), target.to_string()))
}
