//! Minimal `multipart/form-data` support: the detection client builds a
//! single-file body, the detection service parses one back out.

use anyhow::{anyhow, Result};
use rand::RngCore;

/// One form part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

pub fn new_boundary() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("----threatwatch{}", hex::encode(bytes))
}

pub fn content_type_for(boundary: &str) -> String {
    format!("multipart/form-data; boundary={}", boundary)
}

/// Encode a body holding exactly one file field.
pub fn encode_file(
    boundary: &str,
    field: &str,
    file_name: &str,
    content_type: &str,
    data: &[u8],
) -> Vec<u8> {
    let head = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
    );
    let tail = format!("\r\n--{boundary}--\r\n");
    let mut body = Vec::with_capacity(head.len() + data.len() + tail.len());
    body.extend_from_slice(head.as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(tail.as_bytes());
    body
}

/// Extract the boundary parameter from a `Content-Type` header value.
pub fn boundary_from_content_type(value: &str) -> Option<String> {
    let mut params = value.split(';');
    let media_type = params.next()?.trim();
    if !media_type.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|boundary| !boundary.is_empty())
}

/// Split a multipart body into its parts.
pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<FormPart>> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut cursor = find(body, &delimiter, 0).ok_or_else(|| anyhow!("multipart boundary not found"))?;
    let mut parts = Vec::new();
    loop {
        let start = cursor + delimiter.len();
        if body[start..].starts_with(b"--") {
            return Ok(parts);
        }
        let next = find(body, &delimiter, start)
            .ok_or_else(|| anyhow!("multipart body is not terminated"))?;
        let raw = strip_crlf(&body[start..next]);
        parts.push(parse_part(raw)?);
        cursor = next;
    }
}

fn parse_part(raw: &[u8]) -> Result<FormPart> {
    let split = find(raw, b"\r\n\r\n", 0).ok_or_else(|| anyhow!("multipart part has no header"))?;
    let headers = String::from_utf8_lossy(&raw[..split]);
    let data = raw[split + 4..].to_vec();

    let mut name = None;
    let mut file_name = None;
    let mut content_type = None;
    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                if let Some((k, v)) = param.trim().split_once('=') {
                    let v = v.trim().trim_matches('"').to_string();
                    match k.trim() {
                        "name" => name = Some(v),
                        "filename" => file_name = Some(v),
                        _ => {}
                    }
                }
            }
        } else if key.trim().eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }
    Ok(FormPart {
        name: name.ok_or_else(|| anyhow!("multipart part has no name"))?,
        file_name,
        content_type,
        data,
    })
}

/// Drop the CRLF that follows a delimiter and the one that precedes the next.
fn strip_crlf(raw: &[u8]) -> &[u8] {
    let raw = raw.strip_prefix(b"\r\n").unwrap_or(raw);
    raw.strip_suffix(b"\r\n").unwrap_or(raw)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_file_parses_back() {
        let boundary = new_boundary();
        let data = b"\x89PNG\r\n\x1a\n--not-a-boundary\r\n".to_vec();
        let body = encode_file(&boundary, "file", "image.png", "image/png", &data);

        let header = content_type_for(&boundary);
        let parsed_boundary = boundary_from_content_type(&header).unwrap();
        let parts = parse(&body, &parsed_boundary).unwrap();

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "file");
        assert_eq!(parts[0].file_name.as_deref(), Some("image.png"));
        assert_eq!(parts[0].content_type.as_deref(), Some("image/png"));
        assert_eq!(parts[0].data, data);
    }

    #[test]
    fn parses_browser_style_body_with_text_field() {
        let body = b"--XyZ\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--XyZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.jpg\"\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n--XyZ--\r\n";
        let parts = parse(body, "XyZ").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "note");
        assert_eq!(parts[0].data, b"hello");
        assert_eq!(parts[1].file_name.as_deref(), Some("a.jpg"));
        assert_eq!(parts[1].data, b"JPEG");
    }

    #[test]
    fn boundary_requires_form_data() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=\"abc\"").as_deref(),
            Some("abc")
        );
        assert!(boundary_from_content_type("application/json").is_none());
        assert!(boundary_from_content_type("multipart/form-data").is_none());
    }

    #[test]
    fn unterminated_body_is_rejected() {
        assert!(parse(b"--b\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\nabc", "b").is_err());
    }
}
