//! Test fixtures for generating test data.

use bytes::Bytes;
use std::path::Path;

/// Boundary used by every multipart body built here.
pub const BOUNDARY: &str = "depot-test-boundary-7d1f";

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }

    Bytes::from(data)
}

/// `Content-Type` header value for bodies built by [`multipart_body`].
#[allow(dead_code)]
pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

/// Opening delimiter and headers of one multipart part.
#[allow(dead_code)]
pub fn part_head(field: &str, filename: Option<&str>) -> Vec<u8> {
    let disposition = match filename {
        Some(filename) => format!("form-data; name=\"{field}\"; filename=\"{filename}\""),
        None => format!("form-data; name=\"{field}\""),
    };
    format!(
        "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes()
}

/// Closing delimiter of a multipart body.
#[allow(dead_code)]
pub fn body_tail() -> Vec<u8> {
    format!("\r\n--{BOUNDARY}--\r\n").into_bytes()
}

/// A multipart body with the given `(field, filename, data)` parts.
#[allow(dead_code)]
pub fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (i, (field, filename, data)) in parts.iter().enumerate() {
        if i > 0 {
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(&part_head(field, *filename));
        body.extend_from_slice(data);
    }
    body.extend_from_slice(&body_tail());
    body
}

/// A multipart body with a single `file` part.
#[allow(dead_code)]
pub fn file_body(filename: &str, data: &[u8]) -> Vec<u8> {
    multipart_body(&[("file", Some(filename), data)])
}

/// Number of regular files directly inside `dir`.
#[allow(dead_code)]
pub fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
                .count()
        })
        .unwrap_or(0)
}
