//! AES-256-GCM envelope sealing of credential payloads under a DEK
//!.

use crate::kms::KmsBackend;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use agp_core::CredentialPayload;
use agp_error::{AgpError, ErrorCode};
use rand::RngCore;
use serde::de::DeserializeOwned;
use zeroize::Zeroizing;

const DEK_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// An envelope-sealed blob: random IV, ciphertext, and AES-GCM tag.
#[derive(Debug, Clone)]
pub struct SealedBlob {
    /// 12-byte random initialization vector.
    pub iv: [u8; IV_LEN],
    /// Ciphertext, same length as the plaintext.
    pub ciphertext: Vec<u8>,
    /// 16-byte authentication tag.
    pub tag: [u8; TAG_LEN],
}

impl SealedBlob {
    /// Serialize to the on-disk/at-rest layout: `iv || ciphertext || tag`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_LEN + self.ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Parse the on-disk layout back into a [`SealedBlob`].
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Validation`] if `bytes` is shorter than
    /// `IV_LEN + TAG_LEN`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AgpError> {
        if bytes.len() < IV_LEN + TAG_LEN {
            return Err(AgpError::new(ErrorCode::Validation, "sealed blob too short"));
        }
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&bytes[..IV_LEN]);
        let ciphertext = bytes[IV_LEN..bytes.len() - TAG_LEN].to_vec();
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&bytes[bytes.len() - TAG_LEN..]);
        Ok(Self { iv, ciphertext, tag })
    }
}

fn validate_dek(dek: &[u8]) -> Result<(), AgpError> {
    if dek.len() != DEK_LEN {
        return Err(AgpError::new(
            ErrorCode::Validation,
            format!("DEK must be {DEK_LEN} bytes, got {}", dek.len()),
        ));
    }
    Ok(())
}

/// Seal `plaintext` under `dek` with a fresh random 12-byte IV.
///
/// # Errors
///
/// Returns [`ErrorCode::Validation`] if `dek` is not 32 bytes, or
/// [`ErrorCode::Internal`] if the underlying cipher call fails.
pub fn seal(plaintext: &[u8], dek: &[u8]) -> Result<SealedBlob, AgpError> {
    validate_dek(dek)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(dek));
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ct_and_tag = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| AgpError::new(ErrorCode::Internal, "envelope seal failed"))?;
    let (ciphertext, tag_slice) = ct_and_tag.split_at(ct_and_tag.len() - TAG_LEN);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(tag_slice);

    Ok(SealedBlob {
        iv,
        ciphertext: ciphertext.to_vec(),
        tag,
    })
}

/// Open a blob previously produced by [`seal`] under the same `dek`.
///
/// # Errors
///
/// Returns [`ErrorCode::Validation`] if `dek`, the IV, or the tag have the
/// wrong length, or [`ErrorCode::Internal`] if the authentication tag does
/// not verify (tamper or wrong key).
pub fn open(blob: &SealedBlob, dek: &[u8]) -> Result<Zeroizing<Vec<u8>>, AgpError> {
    validate_dek(dek)?;
    if blob.iv.len() != IV_LEN {
        return Err(AgpError::new(ErrorCode::Validation, "IV must be 12 bytes"));
    }
    if blob.tag.len() != TAG_LEN {
        return Err(AgpError::new(ErrorCode::Validation, "tag must be 16 bytes"));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(dek));
    let nonce = Nonce::from_slice(&blob.iv);
    let mut ct_and_tag = Vec::with_capacity(blob.ciphertext.len() + TAG_LEN);
    ct_and_tag.extend_from_slice(&blob.ciphertext);
    ct_and_tag.extend_from_slice(&blob.tag);

    let plaintext = cipher
        .decrypt(nonce, ct_and_tag.as_slice())
        .map_err(|_| AgpError::new(ErrorCode::Internal, "envelope open failed: authentication error"))?;

    Ok(Zeroizing::new(plaintext))
}

/// Unwrap `wrapped_dek` via `kms`, open `sealed` under the unwrapped DEK,
/// parse the plaintext as JSON into `T`, invoke `f`, and zero-fill both the
/// plaintext DEK and the decrypted JSON bytes on every exit path (success,
/// parse failure, or `f` returning an error).
///
/// # Errors
///
/// Propagates KMS unwrap, envelope-open, or JSON-parse failures; or
/// whatever `f` returns.
pub async fn with_decrypted_credential<T, F, R>(
    kms: &dyn KmsBackend,
    wrapped_dek: &[u8],
    sealed: &SealedBlob,
    f: F,
) -> Result<R, AgpError>
where
    T: DeserializeOwned,
    F: FnOnce(T) -> Result<R, AgpError>,
{
    let dek = kms.decrypt_data_key(wrapped_dek).await?;
    let plaintext = open(sealed, dek.as_slice());
    // `dek` is `Zeroizing` and is dropped (and zeroed) here regardless of
    // which branch below is taken.
    let plaintext = plaintext?;
    let parsed: Result<T, _> = serde_json::from_slice(&plaintext);
    // `plaintext` is `Zeroizing<Vec<u8>>`; it zeroes on drop at the end of
    // this function regardless of outcome.
    match parsed {
        Ok(value) => f(value),
        Err(e) => Err(AgpError::new(ErrorCode::Internal, "credential payload is not valid JSON")
            .with_source(e)),
    }
}

/// Convenience alias used by callers that only need the canonical
/// credential payload shape.
pub type DecryptedPayload = CredentialPayload;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::MockKms;

    #[test]
    fn round_trip_preserves_plaintext() {
        let dek = [7u8; DEK_LEN];
        let plaintext = b"super secret token";
        let sealed = seal(plaintext, &dek).unwrap();
        let opened = open(&sealed, &dek).unwrap();
        assert_eq!(&*opened, plaintext);
    }

    #[test]
    fn bit_flip_in_ciphertext_fails_open() {
        let dek = [7u8; DEK_LEN];
        let mut sealed = seal(b"payload", &dek).unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert!(open(&sealed, &dek).is_err());
    }

    #[test]
    fn bit_flip_in_tag_fails_open() {
        let dek = [7u8; DEK_LEN];
        let mut sealed = seal(b"payload", &dek).unwrap();
        sealed.tag[0] ^= 0x01;
        assert!(open(&sealed, &dek).is_err());
    }

    #[test]
    fn bit_flip_in_iv_fails_open() {
        let dek = [7u8; DEK_LEN];
        let mut sealed = seal(b"payload", &dek).unwrap();
        sealed.iv[0] ^= 0x01;
        assert!(open(&sealed, &dek).is_err());
    }

    #[test]
    fn rejects_wrong_length_dek() {
        let short_dek = [1u8; 16];
        assert!(seal(b"x", &short_dek).is_err());
    }

    #[test]
    fn to_bytes_from_bytes_round_trip() {
        let dek = [3u8; DEK_LEN];
        let sealed = seal(b"payload", &dek).unwrap();
        let bytes = sealed.to_bytes();
        let parsed = SealedBlob::from_bytes(&bytes).unwrap();
        let opened = open(&parsed, &dek).unwrap();
        assert_eq!(&*opened, b"payload");
    }

    #[tokio::test]
    async fn with_decrypted_credential_invokes_closure_with_parsed_payload() {
        let kms = MockKms::new("secret");
        let (dek, wrapped) = kms.generate_data_key().await.unwrap();
        let payload = CredentialPayload {
            access_token: Some("tok".into()),
            ..Default::default()
        };
        let json = serde_json::to_vec(&payload).unwrap();
        let sealed = seal(&json, dek.as_slice()).unwrap();

        let result: Result<String, AgpError> =
            with_decrypted_credential(&kms, &wrapped, &sealed, |p: CredentialPayload| {
                Ok(p.access_token.unwrap_or_default())
            })
            .await;
        assert_eq!(result.unwrap(), "tok");
    }
}
