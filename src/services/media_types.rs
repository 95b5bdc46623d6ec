//! MIME detection and the supported-type policy.
//!
//! Detection inspects the leading bytes of the file first, then falls back
//! to the extension, then to `application/octet-stream`.

use std::path::Path;
use tokio::{fs::File, io::AsyncReadExt};
use tracing::debug;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Number of leading bytes read for signature matching.
const SNIFF_LEN: usize = 64;

const SUPPORTED_MIME_TYPES: &[&str] = &[
    // images
    "image/jpeg", "image/jpg", "image/png", "image/gif", "image/webp",
    "image/bmp", "image/tiff", "image/svg+xml", "image/x-icon",
    // documents
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/plain", "text/rtf",
    "application/vnd.oasis.opendocument.text",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/vnd.oasis.opendocument.presentation",
    // archives
    "application/zip", "application/x-rar-compressed", "application/x-7z-compressed",
    "application/x-tar", "application/gzip", "application/x-bzip2", "application/x-xz",
    // executables and packages
    "application/x-msdownload", "application/x-msdos-program", "application/x-executable",
    "application/x-apple-diskimage", "application/x-debian-package", "application/x-rpm",
    "application/vnd.android.package-archive",
    // audio
    "audio/mpeg", "audio/wav", "audio/flac", "audio/aac", "audio/ogg",
    "audio/mp4", "audio/x-ms-wma",
    // video
    "video/mp4", "video/x-msvideo", "video/x-matroska", "video/quicktime",
    "video/x-ms-wmv", "video/x-flv", "video/webm", "video/3gpp",
    // code and data
    "text/html", "text/css", "application/javascript", "application/x-httpd-php",
    "text/x-python", "text/x-java-source", "text/x-c", "text/xml", "application/json",
    "application/sql",
    // other
    "application/x-iso9660-image", "application/x-bittorrent",
    "application/epub+zip", "application/x-mobipocket-ebook",
];

const SUPPORTED_EXTENSIONS: &[&str] = &[
    // images
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "tif", "svg", "ico",
    // documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "rtf",
    "odt", "ods", "odp", "csv",
    // archives
    "zip", "rar", "7z", "tar", "gz", "bz2", "xz", "lzma",
    // executables and packages
    "exe", "msi", "dmg", "pkg", "deb", "rpm", "apk", "ipa",
    // audio
    "mp3", "wav", "flac", "aac", "ogg", "m4a", "wma", "opus",
    // video
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "3gp", "ogv",
    // code
    "html", "htm", "css", "js", "php", "py", "java", "cpp", "c", "h",
    "xml", "json", "sql", "sh", "bat", "ps1",
    // fonts
    "ttf", "otf", "woff", "woff2", "eot",
    // other
    "iso", "bin", "img", "torrent", "epub", "mobi", "azw3", "fb2",
    "log", "conf", "cfg", "ini", "yaml", "yml", "toml",
];

/// Types the extension table of `mime_guess` does not know about.
const EXTRA_EXTENSION_TYPES: &[(&str, &str)] = &[
    ("apk", "application/vnd.android.package-archive"),
    ("ipa", OCTET_STREAM),
    ("rar", "application/x-rar-compressed"),
    ("7z", "application/x-7z-compressed"),
    ("exe", "application/x-msdownload"),
    ("msi", "application/x-msdownload"),
    ("dmg", "application/x-apple-diskimage"),
    ("deb", "application/x-debian-package"),
    ("rpm", "application/x-rpm"),
    ("iso", "application/x-iso9660-image"),
    ("torrent", "application/x-bittorrent"),
    ("mobi", "application/x-mobipocket-ebook"),
    ("azw3", "application/x-mobipocket-ebook"),
];

/// Match the leading bytes against known file signatures.
pub fn sniff(head: &[u8]) -> Option<&'static str> {
    let starts = |sig: &[u8]| head.starts_with(sig);
    let at = |offset: usize, sig: &[u8]| {
        head.len() >= offset + sig.len() && &head[offset..offset + sig.len()] == sig
    };

    let mime = if starts(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if starts(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if starts(b"GIF87a") || starts(b"GIF89a") {
        "image/gif"
    } else if starts(b"RIFF") && at(8, b"WEBP") {
        "image/webp"
    } else if starts(b"RIFF") && at(8, b"WAVE") {
        "audio/wav"
    } else if starts(b"RIFF") && at(8, b"AVI ") {
        "video/x-msvideo"
    } else if starts(b"BM") && head.len() >= 14 {
        "image/bmp"
    } else if starts(b"II*\0") || starts(b"MM\0*") {
        "image/tiff"
    } else if starts(&[0x00, 0x00, 0x01, 0x00]) {
        "image/x-icon"
    } else if starts(b"%PDF-") {
        "application/pdf"
    } else if starts(b"PK\x03\x04") || starts(b"PK\x05\x06") {
        "application/zip"
    } else if starts(b"Rar!\x1a\x07") {
        "application/x-rar-compressed"
    } else if starts(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]) {
        "application/x-7z-compressed"
    } else if starts(&[0x1F, 0x8B]) {
        "application/gzip"
    } else if starts(b"BZh") {
        "application/x-bzip2"
    } else if starts(&[0xFD, b'7', b'z', b'X', b'Z', 0x00]) {
        "application/x-xz"
    } else if starts(b"ID3") || starts(&[0xFF, 0xFB]) || starts(&[0xFF, 0xF3]) {
        "audio/mpeg"
    } else if starts(b"fLaC") {
        "audio/flac"
    } else if starts(b"OggS") {
        "audio/ogg"
    } else if at(4, b"ftyp") {
        "video/mp4"
    } else if starts(&[0x1A, 0x45, 0xDF, 0xA3]) {
        "video/x-matroska"
    } else if starts(b"\x7fELF") {
        "application/x-executable"
    } else if starts(b"MZ") {
        "application/x-msdownload"
    } else {
        return None;
    };
    Some(mime)
}

/// MIME type implied by the file extension alone.
pub fn mime_from_extension(path: &Path) -> Option<String> {
    let ext = extension_of(path)?;
    if let Some((_, mime)) = EXTRA_EXTENSION_TYPES.iter().find(|(e, _)| *e == ext) {
        return Some((*mime).to_string());
    }
    mime_guess::from_ext(&ext)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

/// Detect the MIME type of a file by content, then extension, then the
/// generic binary type.
pub async fn detect_mime(path: &Path) -> String {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    if let Ok(file) = File::open(path).await {
        let _ = file.take(SNIFF_LEN as u64).read_to_end(&mut head).await;
    }

    let detected = sniff(&head)
        .map(str::to_string)
        .or_else(|| mime_from_extension(path))
        .unwrap_or_else(|| OCTET_STREAM.to_string());
    debug!(path = %path.display(), mime = %detected, "detected mime type");
    detected
}

/// Whether a file of this type may be uploaded.
///
/// A listed MIME type is always accepted; anything else (including a failed
/// or generic detection) is decided by the extension.
pub fn is_supported(mime: Option<&str>, path: &Path) -> bool {
    if let Some(mime) = mime {
        if mime != OCTET_STREAM && SUPPORTED_MIME_TYPES.contains(&mime) {
            return true;
        }
    }
    is_supported_extension(path)
}

pub fn is_supported_extension(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sniffs_common_signatures() {
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]), Some("image/jpeg"));
        assert_eq!(sniff(b"\x89PNG\r\n\x1a\n...."), Some("image/png"));
        assert_eq!(sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff(b"%PDF-1.7"), Some("application/pdf"));
        assert_eq!(sniff(b"\0\0\0\x18ftypmp42"), Some("video/mp4"));
        assert_eq!(sniff(b"plain words"), None);
        assert_eq!(sniff(b""), None);
    }

    #[test]
    fn extension_fallback_covers_uncommon_packages() {
        assert_eq!(
            mime_from_extension(Path::new("/a/app.APK")).as_deref(),
            Some("application/vnd.android.package-archive")
        );
        assert_eq!(
            mime_from_extension(Path::new("/a/notes.txt")).as_deref(),
            Some("text/plain")
        );
        assert_eq!(mime_from_extension(Path::new("/a/noext")), None);
    }

    #[tokio::test]
    async fn content_wins_over_misleading_extension() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(b"\x89PNG\r\n\x1a\nrest").unwrap();
        assert_eq!(detect_mime(file.path()).await, "image/png");
    }

    #[tokio::test]
    async fn unknown_content_without_extension_is_binary() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\x01\x02\x03").unwrap();
        assert_eq!(detect_mime(file.path()).await, OCTET_STREAM);
    }

    #[test]
    fn support_policy_falls_back_to_extension() {
        assert!(is_supported(Some("image/png"), Path::new("x.bin")));
        assert!(is_supported(Some(OCTET_STREAM), Path::new("x.apk")));
        assert!(is_supported(Some("application/x-unknown"), Path::new("x.yml")));
        assert!(!is_supported(Some("application/x-unknown"), Path::new("x.unknownext")));
        assert!(!is_supported(None, Path::new("noext")));
        assert!(is_supported(None, Path::new("A.JPG")));
    }
}
