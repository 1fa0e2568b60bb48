//! Signed-envelope extraction: DER PKCS#7 → enclosed payload.
//!
//! The signature is checked against the signer certificate carried inside
//! the envelope, with an empty trust store and `NOVERIFY`. Structure and
//! signature must be valid; whether the signer is *trusted* is not decided
//! here. Any failure is [`IngestError::MalformedEnvelope`], never retried.
//!
//! OpenSSL calls are CPU-bound and synchronous, so extraction runs under
//! `spawn_blocking`.

use crate::error::IngestError;
use crate::pipeline::artifact::StagedArtifact;
use openssl::error::ErrorStack;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::X509;
use std::path::Path;
use tracing::debug;

/// Verify the envelope at `path` and write its content to a new artifact
/// in `scratch`.
pub async fn extract(path: &Path, scratch: &Path) -> Result<StagedArtifact, IngestError> {
    let path = path.to_path_buf();
    let scratch = scratch.to_path_buf();

    tokio::task::spawn_blocking(move || extract_blocking(&path, &scratch))
        .await
        .map_err(|e| IngestError::Internal(format!("Envelope task panicked: {}", e)))?
}

fn extract_blocking(path: &Path, scratch: &Path) -> Result<StagedArtifact, IngestError> {
    let der = std::fs::read(path).map_err(|e| IngestError::io(path, e))?;

    let content = unwrap_envelope(&der).map_err(|e| {
        debug!(path = %path.display(), "not a PKCS7 file");
        IngestError::MalformedEnvelope {
            path: path.to_path_buf(),
            detail: describe(&e),
        }
    })?;

    debug!(
        path = %path.display(),
        envelope_bytes = der.len(),
        content_bytes = content.len(),
        "envelope verified"
    );
    StagedArtifact::write_in(scratch, "", &content)
}

/// Verify a DER-encoded signed envelope and return the enclosed bytes.
pub fn unwrap_envelope(der: &[u8]) -> Result<Vec<u8>, ErrorStack> {
    let pkcs7 = Pkcs7::from_der(der)?;
    let store = X509StoreBuilder::new()?.build();
    let certs: Stack<X509> = Stack::new()?;

    let mut content = Vec::new();
    pkcs7.verify(&certs, &store, None, Some(&mut content), Pkcs7Flags::NOVERIFY)?;
    Ok(content)
}

fn describe(e: &ErrorStack) -> String {
    let s = e.to_string();
    if s.is_empty() {
        "signature verification failed".to_string()
    } else {
        s
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::hash::MessageDigest;
    use openssl::pkey::{PKey, Private};
    use openssl::rsa::Rsa;
    use openssl::x509::{X509Builder, X509NameBuilder};

    fn signer() -> (X509, PKey<Private>) {
        let pkey = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "unit signer").unwrap();
        let name = name.build();

        let mut b = X509Builder::new().unwrap();
        b.set_version(2).unwrap();
        let serial = BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap();
        b.set_serial_number(&serial).unwrap();
        b.set_subject_name(&name).unwrap();
        b.set_issuer_name(&name).unwrap();
        b.set_pubkey(&pkey).unwrap();
        b.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        b.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
        b.sign(&pkey, MessageDigest::sha256()).unwrap();
        (b.build(), pkey)
    }

    pub(crate) fn sign(content: &[u8]) -> Vec<u8> {
        let (cert, pkey) = signer();
        let extra: Stack<X509> = Stack::new().unwrap();
        Pkcs7::sign(&cert, &pkey, &extra, content, Pkcs7Flags::BINARY)
            .unwrap()
            .to_der()
            .unwrap()
    }

    #[test]
    fn self_signed_envelope_unwraps() {
        let der = sign(b"<FatturaElettronica/>");
        assert_eq!(unwrap_envelope(&der).unwrap(), b"<FatturaElettronica/>");
    }

    #[test]
    fn tampered_content_fails_verification() {
        let content = b"importo totale 100.00 EUR";
        let mut der = sign(content);
        let at = der
            .windows(content.len())
            .position(|w| w == content)
            .expect("content is embedded");
        der[at + 15] = b'9';
        assert!(unwrap_envelope(&der).is_err());
    }

    #[test]
    fn garbage_is_not_an_envelope() {
        assert!(unwrap_envelope(b"\x00\x01\x02 not der").is_err());
    }

    #[tokio::test]
    async fn extract_writes_content_to_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("invoice.p7m");
        std::fs::write(&src, sign(b"payload")).unwrap();

        let artifact = extract(&src, dir.path()).await.unwrap();
        assert_eq!(std::fs::read(artifact.path()).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn extract_reports_malformed_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("invoice.p7m");
        std::fs::write(&src, b"\x30\x03\x02\x01\x00").unwrap();

        let err = extract(&src, dir.path()).await.unwrap_err();
        assert!(matches!(err, IngestError::MalformedEnvelope { .. }));
    }
}
