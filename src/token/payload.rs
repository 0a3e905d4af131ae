//! zlib + AES-CTR payload codec.
//!
//! Layout: `[16-byte IV][ciphertext]`. The IV starts with a strictly
//! increasing nanosecond stamp so no two calls in a process share one.

use super::Error;
use aes::{Aes128, Aes192, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use std::borrow::Cow;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const IV_LEN: usize = 16;

static LAST_IV_STAMP: AtomicU64 = AtomicU64::new(0);

fn next_stamp() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));

    let mut last = LAST_IV_STAMP.load(Ordering::Relaxed);
    loop {
        let next = now.max(last.saturating_add(1));
        match LAST_IV_STAMP.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

// stamp (8) | random (4) | block counter (4)
fn next_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    iv[..8].copy_from_slice(&next_stamp().to_be_bytes());
    iv[8..12].copy_from_slice(&rand::random::<[u8; 4]>());
    iv
}

/// Keys shorter than 16 bytes are zero padded; 16, 24 and 32 bytes select
/// AES-128, AES-192 and AES-256.
fn normalize_key(key: &[u8]) -> Result<Cow<'_, [u8]>, Error> {
    match key.len() {
        0 => Err(Error::KeyLength(0)),
        n if n < 16 => {
            let mut padded = vec![0u8; 16];
            padded[..n].copy_from_slice(key);
            Ok(Cow::Owned(padded))
        }
        16 | 24 | 32 => Ok(Cow::Borrowed(key)),
        n => Err(Error::KeyLength(n)),
    }
}

fn apply_keystream(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), Error> {
    let key = normalize_key(key)?;
    let invalid = |_| Error::KeyLength(key.len());
    match key.len() {
        16 => Ctr128BE::<Aes128>::new_from_slices(&key, iv)
            .map_err(invalid)?
            .apply_keystream(buf),
        24 => Ctr128BE::<Aes192>::new_from_slices(&key, iv)
            .map_err(invalid)?
            .apply_keystream(buf),
        _ => Ctr128BE::<Aes256>::new_from_slices(&key, iv)
            .map_err(invalid)?
            .apply_keystream(buf),
    }
    Ok(())
}

/// Compress then encrypt `plaintext`.
///
/// # Errors
///
/// Returns `KeyLength` for unusable keys.
pub fn encrypt_payload(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(plaintext)?;
    let compressed = encoder.finish()?;

    let iv = next_iv();
    let mut out = Vec::with_capacity(IV_LEN + compressed.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&compressed);
    apply_keystream(key, &iv, &mut out[IV_LEN..])?;
    Ok(out)
}

/// Reverse of [`encrypt_payload`].
///
/// # Errors
///
/// Returns `Decrypt` when the input is truncated, the key is wrong or the
/// decompressed stream is corrupt.
pub fn decrypt_payload(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, Error> {
    if ciphertext.len() < IV_LEN {
        return Err(Error::Decrypt);
    }
    let (iv, body) = ciphertext.split_at(IV_LEN);
    let mut compressed = body.to_vec();
    apply_keystream(key, iv, &mut compressed)?;

    let mut plaintext = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut plaintext)
        .map_err(|_| Error::Decrypt)?;
    Ok(plaintext)
}
