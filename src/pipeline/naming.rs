//! Naming and versioning policy.
//!
//! A run computes its [`NamingDecision`] once and reuses it for the record's
//! title, file name and size. Whether the run creates a record or supersedes
//! one is a [`PersistPlan`].

use crate::error::IngestError;
use crate::store::DocumentRecord;
use chrono::Utc;
use std::path::Path;

/// How a kind normalises the extension of a derived name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRule {
    /// `invoice.xml.p7m` → `invoice.xml`
    StripExtension,
    /// `invoice.xml` → `invoice.pdf`
    ForcePdf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingDecision {
    pub name: String,
    pub size: u64,
    pub page_count: u32,
}

impl NamingDecision {
    pub fn new(
        override_name: Option<&str>,
        base_name: &str,
        rule: NameRule,
        size: u64,
        page_count: u32,
    ) -> Self {
        Self {
            name: canonical_name(override_name, base_name, rule),
            size,
            page_count,
        }
    }
}

/// The override verbatim if non-empty, else `base_name` normalised by `rule`.
pub fn canonical_name(override_name: Option<&str>, base_name: &str, rule: NameRule) -> String {
    if let Some(name) = override_name.filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    match rule {
        NameRule::StripExtension => strip_extension(base_name),
        NameRule::ForcePdf => force_pdf(base_name),
    }
}

/// Name handed to a follow-up stage through `apply_args`.
///
/// For envelopes the extension is stripped and a trailing space-separated
/// token (a mail client's ` (2)` or ` copy`) dropped; XML output is named
/// after the PDF it became.
pub fn followup_name(source_name: &str, rule: NameRule) -> String {
    match rule {
        NameRule::StripExtension => {
            let stem = strip_extension(source_name);
            match stem.rsplit_once(' ') {
                Some((head, _)) if !head.is_empty() => head.to_string(),
                _ => stem,
            }
        }
        NameRule::ForcePdf => force_pdf(source_name),
    }
}

fn strip_extension(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| name.to_string())
}

fn force_pdf(name: &str) -> String {
    Path::new(name).with_extension("pdf").to_string_lossy().into_owned()
}

/// What `ContentReady → Persisted` does with the store.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistPlan {
    Create,
    Supersede(DocumentRecord),
}

/// Create when asked to; otherwise supersede the existing record.
pub fn plan(
    create_document: bool,
    existing: Option<DocumentRecord>,
) -> Result<PersistPlan, IngestError> {
    match (create_document, existing) {
        (true, _) => Ok(PersistPlan::Create),
        (false, Some(doc)) => Ok(PersistPlan::Supersede(doc)),
        (false, None) => Err(IngestError::MissingDocument),
    }
}

/// Bump `record` to its next version under `file_name`.
pub fn supersede(record: &mut DocumentRecord, file_name: &str) {
    record.version += 1;
    record.file_name = file_name.to_string();
    record.updated_at = Utc::now();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewDocument;

    fn record() -> DocumentRecord {
        DocumentRecord::from_new(NewDocument {
            owner: None,
            title: "invoice".into(),
            size: 1,
            lang: None,
            file_name: "invoice".into(),
            parent_id: None,
            page_count: 1,
            notes: None,
        })
    }

    #[test]
    fn envelope_names_lose_their_extension() {
        assert_eq!(canonical_name(None, "invoice.p7m", NameRule::StripExtension), "invoice");
        assert_eq!(
            canonical_name(None, "IT01234567890_FPR01.xml.p7m", NameRule::StripExtension),
            "IT01234567890_FPR01.xml"
        );
        assert_eq!(canonical_name(None, "noext", NameRule::StripExtension), "noext");
    }

    #[test]
    fn xml_names_become_pdf() {
        assert_eq!(canonical_name(None, "invoice.xml", NameRule::ForcePdf), "invoice.pdf");
        assert_eq!(canonical_name(None, "invoice", NameRule::ForcePdf), "invoice.pdf");
    }

    #[test]
    fn override_wins_verbatim() {
        assert_eq!(
            canonical_name(Some("Fattura marzo.p7m"), "x.p7m", NameRule::StripExtension),
            "Fattura marzo.p7m"
        );
        assert_eq!(canonical_name(Some(""), "x.xml", NameRule::ForcePdf), "x.pdf");
    }

    #[test]
    fn followup_names() {
        assert_eq!(followup_name("IT01_FPR01.xml.p7m", NameRule::StripExtension), "IT01_FPR01.xml");
        assert_eq!(followup_name("invoice (2).p7m", NameRule::StripExtension), "invoice");
        assert_eq!(followup_name("invoice.xml", NameRule::ForcePdf), "invoice.pdf");
    }

    #[test]
    fn plan_requires_a_document_to_supersede() {
        assert_eq!(plan(true, None).unwrap(), PersistPlan::Create);
        assert!(matches!(plan(false, Some(record())).unwrap(), PersistPlan::Supersede(_)));
        assert!(matches!(plan(false, None), Err(IngestError::MissingDocument)));
    }

    #[test]
    fn supersede_bumps_version_by_one() {
        let mut r = record();
        supersede(&mut r, "invoice.pdf");
        assert_eq!(r.version, 2);
        assert_eq!(r.file_name, "invoice.pdf");
        supersede(&mut r, "invoice.pdf");
        assert_eq!(r.version, 3);
    }
}
