use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// A `data:<mime>;base64,<payload>` image split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("data:")?;
        let (header, data) = rest.split_once(',')?;
        let mime_type = header.strip_suffix(";base64")?;
        if mime_type.is_empty() || data.is_empty() {
            return None;
        }
        Some(Self {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }

    pub fn to_uri(&self) -> String {
        to_data_uri(&self.mime_type, &self.data)
    }

    pub fn decode(&self) -> Option<Vec<u8>> {
        STANDARD.decode(self.data.as_bytes()).ok()
    }

    /// File extension for the MIME subtype, `jpg` when unknown.
    pub fn extension(&self) -> &str {
        match self.mime_type.split('/').nth(1) {
            Some("jpeg") | None => "jpg",
            Some(sub) if !sub.is_empty() => sub,
            _ => "jpg",
        }
    }
}

pub fn to_data_uri(mime_type: &str, base64_data: &str) -> String {
    format!("data:{};base64,{}", mime_type, base64_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_uri() {
        let img = InlineImage::parse("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(img.mime_type, "image/png");
        assert_eq!(img.data, "aGVsbG8=");
        assert_eq!(img.decode().unwrap(), b"hello");
        assert_eq!(img.extension(), "png");
        assert_eq!(img.to_uri(), "data:image/png;base64,aGVsbG8=");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(InlineImage::parse("https://example.com/a.png").is_none());
        assert!(InlineImage::parse("data:image/png,plain").is_none());
        assert!(InlineImage::parse("data:;base64,abc").is_none());
        assert!(InlineImage::parse("data:image/png;base64,").is_none());
    }

    #[test]
    fn test_jpeg_extension() {
        let img = InlineImage::parse("data:image/jpeg;base64,AAAA").unwrap();
        assert_eq!(img.extension(), "jpg");
    }
}
