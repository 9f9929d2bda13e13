//! Media kind classification for exam attachments.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Broad classification of an attachment, derived from its MIME type at
/// upload and stored alongside the file metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Pdf,
    Video,
    Document,
    /// Stored by older clients; never produced by [`MediaKind::from_mime`].
    Other,
}

impl MediaKind {
    /// Classify a MIME type.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else if mime == "application/pdf" {
            Self::Pdf
        } else if mime.starts_with("video/") {
            Self::Video
        } else {
            Self::Document
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Pdf => "pdf",
            Self::Video => "video",
            Self::Document => "document",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "pdf" => Ok(Self::Pdf),
            "video" => Ok(Self::Video),
            "document" => Ok(Self::Document),
            "other" => Ok(Self::Other),
            other => Err(Error::InvalidMediaKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_mimes() {
        assert_eq!(MediaKind::from_mime("image/png"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("image/jpeg"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::Pdf);
        assert_eq!(MediaKind::from_mime("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("text/plain"), MediaKind::Document);
        assert_eq!(
            MediaKind::from_mime("application/octet-stream"),
            MediaKind::Document
        );
    }

    #[test]
    fn string_form_round_trips() {
        for kind in [
            MediaKind::Image,
            MediaKind::Pdf,
            MediaKind::Video,
            MediaKind::Document,
            MediaKind::Other,
        ] {
            assert_eq!(kind.as_str().parse::<MediaKind>().unwrap(), kind);
        }
    }
}
