//! Pipeline stages for e-invoice ingestion.
//!
//! Each submodule implements one step of the run; the state machine that
//! sequences them lives in [`crate::importer`].
//!
//! ## Data Flow
//!
//! ```text
//! materialize ──▶ sniff ──▶ envelope | transform ──▶ naming ──▶ store
//! (decode/disk)   (gate)    (PKCS#7)   (XSLT+PDF)    (name/ver)
//! ```
//!
//! 1. [`materialize`] - get the payload onto disk (mail attachments decoded)
//! 2. [`sniff`]       - content-based mimetype gate; a mismatch is a soft no-op
//! 3. [`envelope`]    - verify and unwrap a signed envelope
//! 4. [`transform`]   - XML → HTML → PDF through a stylesheet and a renderer
//! 5. [`naming`]      - canonical name, create-vs-supersede, version bump
//!
//! Every temporary file a stage creates is a [`artifact::StagedArtifact`].

pub mod artifact;
pub mod envelope;
pub mod materialize;
pub mod naming;
pub mod sniff;
pub mod transform;
