//! Avatar validation for the PROFILE-piggybacked image blob.

const MAX_AVATAR_BYTES: usize = 20 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum AvatarError {
    UnknownMime(String),
    TooLarge(usize),
    MagicByteMismatch,
}

impl std::fmt::Display for AvatarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AvatarError::UnknownMime(m) => write!(f, "unsupported avatar MIME type '{}'", m),
            AvatarError::TooLarge(n) => write!(f, "avatar is {} bytes, exceeds 20 KB limit", n),
            AvatarError::MagicByteMismatch => write!(f, "avatar bytes don't match declared MIME type"),
        }
    }
}

/// `image/jpg` is tolerated as a synonym for `image/jpeg` — a quirk the
/// original implementation had and this preserves.
fn normalize_mime(mime: &str) -> &str {
    if mime == "image/jpg" {
        "image/jpeg"
    } else {
        mime
    }
}

fn magic_bytes_match(mime: &str, data: &[u8]) -> bool {
    match mime {
        "image/png" => data.starts_with(&[0x89, 0x50, 0x4E, 0x47]),
        "image/jpeg" => data.starts_with(&[0xFF, 0xD8, 0xFF]),
        "image/gif" => data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a"),
        "image/bmp" => data.starts_with(b"BM"),
        "image/webp" => data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP",
        _ => false,
    }
}

/// Validates a decoded avatar blob against its declared MIME type. An
/// invalid avatar drops only the avatar — the rest of a PROFILE is
/// unaffected, so callers should log and continue rather than propagate.
pub fn validate(mime: &str, data: &[u8]) -> Result<(), AvatarError> {
    let normalized = normalize_mime(mime);
    const SUPPORTED: [&str; 5] = [
        "image/png",
        "image/jpeg",
        "image/gif",
        "image/bmp",
        "image/webp",
    ];
    if !SUPPORTED.contains(&normalized) {
        return Err(AvatarError::UnknownMime(mime.to_string()));
    }
    if data.len() > MAX_AVATAR_BYTES {
        return Err(AvatarError::TooLarge(data.len()));
    }
    if !magic_bytes_match(normalized, data) {
        return Err(AvatarError::MagicByteMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_magic_bytes_pass() {
        let data = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert!(validate("image/png", &data).is_ok());
    }

    #[test]
    fn image_jpg_synonym_is_accepted() {
        let data = [0xFF, 0xD8, 0xFF, 0xE0];
        assert!(validate("image/jpg", &data).is_ok());
    }

    #[test]
    fn mismatched_magic_bytes_rejected() {
        let data = [0x00, 0x00, 0x00, 0x00];
        assert_eq!(validate("image/png", &data), Err(AvatarError::MagicByteMismatch));
    }

    #[test]
    fn oversized_avatar_rejected() {
        let data = vec![0x89, 0x50, 0x4E, 0x47];
        let mut big = data.clone();
        big.extend(vec![0u8; 21 * 1024]);
        assert!(matches!(validate("image/png", &big), Err(AvatarError::TooLarge(_))));
    }

    #[test]
    fn unknown_mime_rejected() {
        let data = [0, 1, 2, 3];
        assert!(matches!(
            validate("image/tiff", &data),
            Err(AvatarError::UnknownMime(_))
        ));
    }
}
