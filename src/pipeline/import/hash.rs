use std::path::Path;

use base64::Engine;
use sha2::{Digest, Sha256};

use super::IngestError;

/// Compute the perceptual hash (pHash) used as the dedup key.
///
/// DCT-preprocessed mean hash over an 8x8 grid: a 64-bit fingerprint,
/// base64 encoded. Dedup compares these strings for exact equality.
/// Decodes by content, not extension. Uses img_hash's re-exported image
/// crate for compatibility.
pub fn compute_phash(path: &Path) -> Result<String, IngestError> {
    let bytes = std::fs::read(path)
        .map_err(|e| IngestError::HashComputation(format!("{}: {e}", path.display())))?;
    let img = img_hash::image::load_from_memory(&bytes)
        .map_err(|e| IngestError::HashComputation(format!("{}: {e}", path.display())))?;

    let hasher = img_hash::HasherConfig::new()
        .hash_alg(img_hash::HashAlg::Mean)
        .preproc_dct()
        .hash_size(8, 8)
        .to_hasher();

    Ok(hasher.hash_image(&img).to_base64())
}

/// SHA-256 of raw bytes, base64url without padding (safe as a file name).
pub fn compute_content_hash(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash)
}
