//! Cache key derivation and on-disk filenames

use sha2::{Digest, Sha256};

/// Pixel size meaning "the original, unscaled resource"
pub const UNSCALED: u32 = 0;

/// Separator between an original key and its scale suffix.
///
/// ASCII unit separator, which does not occur in URLs or file paths.
const SCALE_SEPARATOR: char = '\u{1f}';

/// Filename for a key's disk record: lowercase hex SHA-256 of the key (64 chars)
pub fn filename_for(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Key for a scaled variant of `original_key`.
///
/// Returns the original key when `pixel_size` is [`UNSCALED`].
pub fn scaled_key(original_key: &str, pixel_size: u32) -> String {
    if pixel_size == UNSCALED {
        return original_key.to_string();
    }
    format!(
        "{}{}{}x{}",
        original_key, SCALE_SEPARATOR, pixel_size, pixel_size
    )
}

/// Whether `key` can be stored and queried.
///
/// A key must be non-empty. The scale separator may only appear as the
/// suffix produced by [`scaled_key`], so every valid key maps back to exactly
/// one `(original, pixel_size)` pair and raw keys never alias scaled variants.
pub fn is_valid_key(key: &str) -> bool {
    match key.split_once(SCALE_SEPARATOR) {
        None => !key.is_empty(),
        Some((original, suffix)) => {
            !original.is_empty()
                && parse_scale(suffix)
                    .is_some_and(|size| size != UNSCALED && scaled_key(original, size) == key)
        }
    }
}

fn parse_scale(suffix: &str) -> Option<u32> {
    let (width, height) = suffix.split_once('x')?;
    let width = width.parse::<u32>().ok()?;
    (height.parse::<u32>().ok()? == width).then_some(width)
}
