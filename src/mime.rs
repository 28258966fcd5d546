//! MIME classification of generated files.

use crate::files::Encoding;
use std::fmt::Debug;

/// Maps a sandbox-relative file name to a MIME type.
///
/// The host decides how files are classified; [`GuessMime`] is the default.
pub trait MimeLookup: Debug + Send + Sync {
    fn lookup(&self, path: &str) -> String;
}

/// Extension-based lookup backed by `mime_guess`.
///
/// Extensions the compiler produces are classified here first, so its
/// intermediates come back as text rather than `application/octet-stream`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuessMime;

const TEXT_EXTENSIONS: &[(&str, &str)] = &[
    ("dim", "text/plain"),
    ("dimx", "text/plain"),
    ("bbl", "text/plain"),
    ("aux", "text/plain"),
    ("log", "text/plain"),
    ("mdk", "text/plain"),
    ("tex", "text/x-tex"),
];

impl MimeLookup for GuessMime {
    fn lookup(&self, path: &str) -> String {
        let ext = path
            .rsplit(['/', '\\'])
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());

        if let Some(ext) = ext.as_deref() {
            if let Some((_, mime)) = TEXT_EXTENSIONS.iter().find(|(known, _)| *known == ext) {
                return (*mime).to_string();
            }
        }

        mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

/// Choose the transfer encoding for a MIME type.
///
/// `text/*` and `application/json` travel as UTF-8; everything else as base64.
pub fn encoding_for_mime(mime: &str) -> Encoding {
    if mime.starts_with("text/") || mime == "application/json" {
        Encoding::Utf8
    } else {
        Encoding::Base64
    }
}
