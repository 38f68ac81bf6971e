//! Content classification for served and uploaded files.
//!
//! The verdict decides how a file is rendered: text is shown inline in a
//! preformatted block, images are inlined as data URIs and everything else is
//! offered as an attachment.

use mime_guess::mime::{self, Mime};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeVerdict {
    Text,
    Image,
    Binary,
}

/// A verdict together with the media type it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub verdict: MimeVerdict,
    pub mime: Mime,
}

/// Classifies `path` by its extension. Never fails: a path without a known
/// type is classified as `application/octet-stream` binary.
pub fn classify(path: &Path) -> Classification {
    let guessed = mime_guess::from_path(path).first_or_octet_stream();
    let verdict = if guessed.type_() == mime::TEXT {
        MimeVerdict::Text
    } else if guessed.type_() == mime::IMAGE {
        MimeVerdict::Image
    } else {
        MimeVerdict::Binary
    };
    Classification {
        verdict,
        mime: guessed,
    }
}

/// Whether a content type can be guessed for `path` at all.
pub fn is_determinable(path: &Path) -> bool {
    mime_guess::from_path(path).first().is_some()
}
