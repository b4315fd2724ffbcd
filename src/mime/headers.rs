//! MIME Headers
//!
//! Part header blocks, `Content-Type` values with parameters, and
//! content-id normalization.

use std::fmt;

use crate::error::{OmError, Result};

/// Normalize a content ID as found in headers or `start` parameters
///
/// Surrounding angle brackets are removed, as is a stray `cid:` prefix some
/// producers add.
pub fn normalize_content_id(id: &str) -> String {
    let mut id = id.trim();
    if id.len() >= 2 && id.starts_with('<') && id.ends_with('>') {
        id = &id[1..id.len() - 1];
    }
    if id.len() > 4 && id.starts_with("cid:") {
        id = &id[4..];
    }
    id.to_string()
}

/// Header block of one part; names compare case-insensitively
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaders {
    entries: Vec<(String, String)>,
}

impl PartHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw header block (without the terminating empty line)
    ///
    /// Folded lines are joined with a single space.
    pub(crate) fn parse(block: &[u8]) -> std::result::Result<Self, String> {
        let text = std::str::from_utf8(block).map_err(|e| format!("header block is not UTF-8: {}", e))?;
        let mut entries: Vec<(String, String)> = Vec::new();

        for line in text.split("\r\n") {
            if line.is_empty() {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                match entries.last_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(line.trim());
                    }
                    None => return Err("continuation line before the first header".to_string()),
                }
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| format!("header line without a colon: {:?}", line))?;
            entries.push((name.trim().to_string(), value.trim().to_string()));
        }
        Ok(PartHeaders { entries })
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// First value of a header
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Normalized `Content-ID`
    pub fn content_id(&self) -> Option<String> {
        self.get("Content-ID").map(normalize_content_id)
    }

    /// Raw `Content-Type` value
    pub fn content_type(&self) -> Option<&str> {
        self.get("Content-Type")
    }

    /// `Content-Transfer-Encoding`, lowercased
    pub fn transfer_encoding(&self) -> Option<String> {
        self.get("Content-Transfer-Encoding").map(|v| v.trim().to_ascii_lowercase())
    }
}

/// Parsed `Content-Type` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// `type/subtype`, lowercased
    media_type: String,
    /// Parameters in order, names lowercased
    parameters: Vec<(String, String)>,
}

impl ContentType {
    pub fn new(media_type: &str) -> Self {
        ContentType {
            media_type: media_type.trim().to_ascii_lowercase(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: &str, value: &str) -> Self {
        self.parameters.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    /// Parse `type/subtype; name=value; name="quoted value"`
    pub fn parse(value: &str) -> Result<Self> {
        let (media, rest) = match value.find(';') {
            Some(i) => (&value[..i], &value[i..]),
            None => (value, ""),
        };
        let media = media.trim();
        if !media.contains('/') || media.starts_with('/') || media.ends_with('/') {
            return Err(OmError::MalformedContainer(format!("invalid media type '{}'", media)));
        }
        let parameters = parse_parameters(rest).map_err(OmError::MalformedContainer)?;
        Ok(ContentType {
            media_type: media.to_ascii_lowercase(),
            parameters,
        })
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Check the media type, ignoring case
    pub fn is(&self, media_type: &str) -> bool {
        self.media_type.eq_ignore_ascii_case(media_type)
    }

    pub fn is_multipart(&self) -> bool {
        self.media_type.starts_with("multipart/")
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.media_type)?;
        for (name, value) in &self.parameters {
            if !value.is_empty() && value.bytes().all(is_token_char) {
                write!(f, "; {}={}", name, value)?;
            } else {
                write!(f, "; {}=\"", name)?;
                for c in value.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{}", c)?;
                }
                f.write_str("\"")?;
            }
        }
        Ok(())
    }
}

/// RFC 2045 token character
fn is_token_char(b: u8) -> bool {
    b > 0x20 && b < 0x7f && !b"()<>@,;:\\\"/[]?=".contains(&b)
}

fn parse_parameters(mut rest: &str) -> std::result::Result<Vec<(String, String)>, String> {
    let mut params = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(params);
        }
        if let Some(r) = rest.strip_prefix(';') {
            rest = r;
            continue;
        }

        let eq = rest
            .find('=')
            .ok_or_else(|| format!("parameter without value: '{}'", rest))?;
        let name = rest[..eq].trim().to_ascii_lowercase();
        rest = rest[eq + 1..].trim_start();

        let value = if let Some(quoted) = rest.strip_prefix('"') {
            let mut value = String::new();
            let mut end = None;
            let mut chars = quoted.char_indices();
            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        end = Some(i);
                        break;
                    }
                    c => value.push(c),
                }
            }
            let end = end.ok_or_else(|| format!("unterminated quoted value for '{}'", name))?;
            rest = &quoted[end + 1..];
            value
        } else {
            let end = rest.find(';').unwrap_or(rest.len());
            let value = rest[..end].trim().to_string();
            rest = &rest[end..];
            value
        };
        params.push((name, value));
    }
}
