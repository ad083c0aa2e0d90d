//! Mapping between file extensions and media content types.

use url::Url;

/// Extension used when neither the response nor the URL tells the type.
pub const GENERIC_EXTENSION: &str = ".bin";

pub const OCTET_STREAM: &str = "application/octet-stream";

// (extension, content type); the first row of a content type is its canonical extension
const MEDIA_TYPES: &[(&str, &str)] = &[
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".webp", "image/webp"),
    (".avif", "image/avif"),
    (".svg", "image/svg+xml"),
    (".bmp", "image/bmp"),
    (".ico", "image/x-icon"),
    (".tiff", "image/tiff"),
    (".tif", "image/tiff"),
    (".heic", "image/heic"),
    (".mp4", "video/mp4"),
    (".m4v", "video/x-m4v"),
    (".webm", "video/webm"),
    (".mov", "video/quicktime"),
    (".mkv", "video/x-matroska"),
    (".ogv", "video/ogg"),
    (".mp3", "audio/mpeg"),
    (".m4a", "audio/mp4"),
    (".aac", "audio/aac"),
    (".ogg", "audio/ogg"),
    (".oga", "audio/ogg"),
    (".opus", "audio/opus"),
    (".wav", "audio/wav"),
    (".flac", "audio/flac"),
];

// Non-canonical content types seen in the wild
const CONTENT_TYPE_ALIASES: &[(&str, &str)] = &[
    ("image/jpg", ".jpg"),
    ("image/pjpeg", ".jpg"),
    ("image/x-png", ".png"),
    ("image/svg", ".svg"),
    ("image/vnd.microsoft.icon", ".ico"),
    ("audio/mp3", ".mp3"),
    ("audio/x-wav", ".wav"),
    ("audio/wave", ".wav"),
    ("audio/x-m4a", ".m4a"),
    ("audio/x-flac", ".flac"),
];

/// Extension of a known media type taken from the URL path, e.g. `.jpg`.
pub fn extension_from_url(url: &str) -> Option<&'static str> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };

    let file_name = path.rsplit('/').next()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = format!(".{}", ext.to_ascii_lowercase());

    MEDIA_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(known, _)| *known)
}

/// Extension for a `Content-Type` header value, ignoring parameters.
///
/// `application/octet-stream` carries no type information and yields `None`.
pub fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    MEDIA_TYPES
        .iter()
        .find(|(_, mime)| *mime == essence)
        .map(|(ext, _)| *ext)
        .or_else(|| {
            CONTENT_TYPE_ALIASES
                .iter()
                .find(|(mime, _)| *mime == essence)
                .map(|(_, ext)| *ext)
        })
}

/// Content type of a cached file extension (with or without the dot).
pub fn content_type_from_extension(ext: &str) -> &'static str {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    MEDIA_TYPES
        .iter()
        .find(|(known, _)| &known[1..] == ext.as_str())
        .map(|(_, mime)| *mime)
        .unwrap_or(OCTET_STREAM)
}

/// Content type guessed from the URL path suffix.
pub fn content_type_from_url(url: &str) -> &'static str {
    extension_from_url(url)
        .map(content_type_from_extension)
        .unwrap_or(OCTET_STREAM)
}
