//! Wire-format byte accounting.
//!
//! # Responsibilities
//! - Reconstruct the `Name: value\r\n` framing of a header block
//! - Cost the request-line fields hyper parses out of the stream
//!   (method, request target, protocol version, host)
//!
//! # Design Decisions
//! - Pure functions over `http` types; no allocation, no panics on empty input
//! - A header name with several values is framed once per value
//! - Host is only costed separately when it is not already in the header map

use axum::http::{header::HOST, request, HeaderMap, Version};

/// The blank `\r\n` line that closes every header block.
pub const HEADER_BLOCK_TERMINATOR: u64 = 2;

/// `": "` between a header name and its value.
const NAME_VALUE_SEPARATOR: u64 = 2;

/// `"\r\n"` ending each header line.
const LINE_TERMINATOR: u64 = 2;

/// Bytes a header block occupies on the wire.
///
/// An empty map still costs [`HEADER_BLOCK_TERMINATOR`].
pub fn header_overhead(headers: &HeaderMap) -> u64 {
    headers
        .iter()
        .fold(HEADER_BLOCK_TERMINATOR, |total, (name, value)| {
            total
                + name.as_str().len() as u64
                + NAME_VALUE_SEPARATOR
                + value.as_bytes().len() as u64
                + LINE_TERMINATOR
        })
}

/// Bytes a discrete request-line field occupies: its length plus the
/// separator or terminator that follows it.
pub fn field_overhead(field: &str) -> u64 {
    field.len() as u64 + 1
}

/// Protocol version as it appears on the request/status line.
pub fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// Breakdown of the non-body bytes of an inbound request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOverhead {
    pub headers: u64,
    pub host: u64,
    pub version: u64,
    pub path: u64,
    pub method: u64,
}

impl RequestOverhead {
    pub fn total(&self) -> u64 {
        self.headers + self.host + self.version + self.path + self.method
    }
}

/// Cost every part of a request that never shows up in its body stream.
pub fn request_overhead(parts: &request::Parts) -> RequestOverhead {
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    RequestOverhead {
        headers: header_overhead(&parts.headers),
        host: request_host(parts).map(field_overhead).unwrap_or(0),
        version: field_overhead(version_str(parts.version)),
        path: field_overhead(target),
        method: field_overhead(parts.method.as_str()),
    }
}

/// Cost of the response head: its header block plus the protocol version.
pub fn response_overhead(headers: &HeaderMap, version: Version) -> u64 {
    header_overhead(headers) + field_overhead(version_str(version))
}

/// Host not already accounted for by the header block.
///
/// HTTP/1.1 requests keep `Host` in the map; HTTP/2 carries it as the
/// `:authority` pseudo-header, which hyper folds into the URI instead.
fn request_host(parts: &request::Parts) -> Option<&str> {
    if parts.headers.contains_key(HOST) {
        return None;
    }
    parts.uri.authority().map(|authority| authority.as_str())
}
