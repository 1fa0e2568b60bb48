//! `Received → Materialized`: get the payload onto disk.
//!
//! Web uploads and local files already are on disk and are used in place;
//! the caller keeps ownership and only `delete_after_import` ever removes
//! them. Mail attachments are decoded according to their
//! Content-Transfer-Encoding and written into a private `TempDir` under the
//! attachment's own file name, so naming can derive from it later.

use crate::error::IngestError;
use crate::request::{MailPart, Payload};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Name used when an attachment carries no usable file name.
const FALLBACK_NAME: &str = "attachment";

/// The materialized payload.
#[derive(Debug)]
pub enum Materialized {
    /// Caller-owned file, used in place.
    OnDisk(PathBuf),
    /// Decoded attachment. The `TempDir` keeps it alive until the run ends.
    Decoded { path: PathBuf, _temp_dir: TempDir },
}

impl Materialized {
    pub fn path(&self) -> &Path {
        match self {
            Materialized::OnDisk(p) => p,
            Materialized::Decoded { path, .. } => path,
        }
    }

    /// Final path component, the input to naming.
    pub fn base_name(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| FALLBACK_NAME.to_string())
    }
}

/// Materialize `payload`, decoding attachments into `scratch`.
pub async fn materialize(payload: &Payload, scratch: &Path) -> Result<Materialized, IngestError> {
    match payload {
        Payload::OnDisk(path) => {
            let meta = tokio::fs::metadata(path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    IngestError::FileNotFound { path: path.clone() }
                } else {
                    IngestError::io(path, e)
                }
            })?;
            if !meta.is_file() {
                return Err(IngestError::FileNotFound { path: path.clone() });
            }
            Ok(Materialized::OnDisk(path.clone()))
        }
        Payload::Attachment(part) => {
            let bytes = decode_attachment(part)?;
            let temp_dir = tempfile::Builder::new()
                .prefix("einvoice-mail-")
                .tempdir_in(scratch)
                .map_err(|e| IngestError::io(scratch, e))?;
            let path = temp_dir.path().join(attachment_name(part));
            tokio::fs::write(&path, &bytes)
                .await
                .map_err(|e| IngestError::io(&path, e))?;
            debug!(path = %path.display(), bytes = bytes.len(), "materialized attachment");
            Ok(Materialized::Decoded {
                path,
                _temp_dir: temp_dir,
            })
        }
    }
}

/// Decode an attachment body to raw bytes.
///
/// Multipart containers and unknown transfer encodings are not files.
pub fn decode_attachment(part: &MailPart) -> Result<Vec<u8>, IngestError> {
    if part
        .content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/")
    {
        return Err(IngestError::NotAFile(format!(
            "'{}' is a multipart container",
            part.content_type
        )));
    }

    let encoding = part
        .transfer_encoding
        .as_deref()
        .map(|e| e.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "7bit".to_string());

    match encoding.as_str() {
        "7bit" | "8bit" | "binary" => Ok(part.body.clone()),
        "base64" => {
            let compact: Vec<u8> = part
                .body
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            STANDARD
                .decode(compact)
                .map_err(|e| IngestError::NotAFile(format!("invalid base64 body: {e}")))
        }
        "quoted-printable" => decode_quoted_printable(&part.body),
        other => Err(IngestError::NotAFile(format!(
            "unsupported transfer encoding '{other}'"
        ))),
    }
}

fn decode_quoted_printable(body: &[u8]) -> Result<Vec<u8>, IngestError> {
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i] != b'=' {
            out.push(body[i]);
            i += 1;
            continue;
        }
        match body.get(i + 1..) {
            // soft line break
            Some([b'\r', b'\n', ..]) => i += 3,
            Some([b'\n', ..]) => i += 2,
            Some([hi, lo, ..]) => {
                let byte = hex_value(*hi)
                    .zip(hex_value(*lo))
                    .map(|(h, l)| (h << 4) | l)
                    .ok_or_else(|| {
                        IngestError::NotAFile(format!(
                            "invalid quoted-printable escape at byte {i}"
                        ))
                    })?;
                out.push(byte);
                i += 3;
            }
            // '=' at end of body
            _ => i += 1,
        }
    }
    Ok(out)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Only the last path component of the attachment's name is kept.
fn attachment_name(part: &MailPart) -> String {
    part.filename
        .as_deref()
        .and_then(|n| Path::new(n.trim()).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_body_with_line_breaks() {
        let part = MailPart::new("application/pkcs7-mime", b"aGVs\r\nbG8=\r\n".to_vec())
            .with_transfer_encoding("Base64");
        assert_eq!(decode_attachment(&part).unwrap(), b"hello");
    }

    #[test]
    fn quoted_printable_body() {
        let part = MailPart::new("text/xml", b"caf=C3=A9 =\r\nbar=3D1".to_vec())
            .with_transfer_encoding("quoted-printable");
        assert_eq!(decode_attachment(&part).unwrap(), "café bar=1".as_bytes());
    }

    #[test]
    fn bad_quoted_printable_escape() {
        let part = MailPart::new("text/xml", b"=ZZ".to_vec())
            .with_transfer_encoding("quoted-printable");
        assert!(matches!(decode_attachment(&part), Err(IngestError::NotAFile(_))));
    }

    #[test]
    fn multipart_is_not_a_file() {
        let part = MailPart::new("multipart/mixed; boundary=x", b"--x".to_vec());
        assert!(matches!(decode_attachment(&part), Err(IngestError::NotAFile(_))));
    }

    #[test]
    fn unknown_encoding_is_not_a_file() {
        let part = MailPart::new("application/octet-stream", b"x".to_vec())
            .with_transfer_encoding("uuencode");
        assert!(matches!(decode_attachment(&part), Err(IngestError::NotAFile(_))));
    }

    #[test]
    fn attachment_name_drops_directories() {
        let part = MailPart::new("application/octet-stream", Vec::new())
            .with_filename("../../etc/IT01.xml.p7m");
        assert_eq!(attachment_name(&part), "IT01.xml.p7m");
        let unnamed = MailPart::new("application/octet-stream", Vec::new());
        assert_eq!(attachment_name(&unnamed), "attachment");
    }

    #[tokio::test]
    async fn decoded_attachment_lives_until_drop() {
        let scratch = tempfile::tempdir().unwrap();
        let part = MailPart::new("application/octet-stream", b"payload".to_vec())
            .with_filename("invoice.p7m");
        let m = materialize(&Payload::Attachment(part), scratch.path()).await.unwrap();
        assert_eq!(m.base_name(), "invoice.p7m");
        assert_eq!(std::fs::read(m.path()).unwrap(), b"payload");
        drop(m);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_on_disk_file() {
        let err = materialize(&Payload::OnDisk("/no/such/invoice.xml".into()), Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::FileNotFound { .. }));
    }
}
