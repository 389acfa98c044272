//! Content resolution against the active ground truth.
//!
//! A document directory carries the same content twice: once as per-entity
//! files (named by the manifest) and once as the merged markdown document.
//! Exactly one of the two is authoritative for a session, chosen explicitly
//! at construction via [`ActiveSource`] rather than inferred from paths.
//! [`EntityStore`] routes every read and write through the matching
//! [`EntityContentSource`] implementation, so the correction layer never
//! cares which representation it is editing.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::{Entity, EntityId, EntityType, ExtractionMethod, Manifest, ManifestEntry};
use crate::error::DocNormError;
use crate::marker;

/// Merged document file name inside a document directory.
pub const MERGED_DOCUMENT_FILE: &str = "document.md";

/// Write `content` to `path` via a temp file and rename, so readers never
/// observe a partially written file.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), DocNormError> {
    let io_err = |source| DocNormError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = path.to_path_buf();
    let file_name = tmp
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    tmp.set_file_name(format!(".{file_name}.tmp"));

    {
        let mut f = std::fs::File::create(&tmp).map_err(io_err)?;
        f.write_all(content.as_bytes()).map_err(io_err)?;
        f.sync_all().map_err(io_err)?;
    }
    std::fs::rename(&tmp, path).map_err(io_err)
}

/// Which representation of the document is ground truth for this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveSource {
    /// Per-entity files are authoritative; the merged document is a
    /// derived artifact rebuilt on demand.
    EntityFiles,
    /// The merged document is authoritative; writes splice it in place.
    MergedDocument,
}

/// Capability seam between the store and one content representation.
///
/// Both implementations take the manifest entry rather than a bare id so
/// they can use the entry's file name, type, and placement without a second
/// lookup.
pub trait EntityContentSource: Send {
    fn read(&mut self, entry: &ManifestEntry) -> Result<String, DocNormError>;
    fn write(&mut self, entry: &ManifestEntry, content: &str) -> Result<(), DocNormError>;
    /// Drop any cached state so the next read hits the filesystem.
    fn invalidate_cache(&mut self);
}

// ── Merged-document source ───────────────────────────────────────────────

/// Reads and writes entity regions of the merged markdown document.
///
/// Reads go through a whole-document parse cached until the next write or
/// explicit invalidation. Writes splice the new content between the entity's
/// boundary marker and the next boundary (next marker or the trailing
/// change-log separator) and rewrite the file atomically.
pub struct MergedDocumentSource {
    path: PathBuf,
    cache: Option<HashMap<EntityId, String>>,
}

impl MergedDocumentSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path, cache: None }
    }

    fn load_document(&self) -> Result<String, DocNormError> {
        std::fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                DocNormError::DocumentNotFound {
                    path: self.path.clone(),
                }
            } else {
                DocNormError::Io {
                    path: self.path.clone(),
                    source,
                }
            }
        })
    }

    fn fill_cache(&mut self) -> Result<&HashMap<EntityId, String>, DocNormError> {
        if self.cache.is_none() {
            let doc = self.load_document()?;
            let parsed = marker::parse_document(&doc);
            debug!(
                path = %self.path.display(),
                entities = parsed.blocks.len(),
                "parsed merged document into content cache"
            );
            self.cache = Some(
                parsed
                    .blocks
                    .into_iter()
                    .map(|b| (b.id, b.content))
                    .collect(),
            );
        }
        Ok(self.cache.as_ref().expect("just filled"))
    }

    /// Replace the region belonging to `id` inside `doc`.
    ///
    /// The region starts after the entity's marker line and ends at the next
    /// marker or the trailing change-log separator, whichever comes first.
    fn splice(doc: &str, id: EntityId, content: &str) -> Option<String> {
        let needle = format!("<!-- Entity: {id} |");
        let marker_start = doc.find(&needle)?;
        let marker_end = marker_start + doc[marker_start..].find("-->")? + "-->".len();

        let rest = &doc[marker_end..];
        let next_marker = rest.find("<!-- Entity:");
        let change_log = marker::change_log_offset(rest);
        let region_end = match (next_marker, change_log) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => rest.len(),
        };

        let mut out = String::with_capacity(doc.len());
        out.push_str(&doc[..marker_end]);
        out.push_str("\n\n");
        out.push_str(content.trim_end());
        out.push_str("\n\n");
        out.push_str(&doc[marker_end + region_end..]);
        Some(out)
    }
}

impl EntityContentSource for MergedDocumentSource {
    fn read(&mut self, entry: &ManifestEntry) -> Result<String, DocNormError> {
        let path = self.path.clone();
        let cache = self.fill_cache()?;
        cache
            .get(&entry.id)
            .cloned()
            .ok_or(DocNormError::ContentNotFound { id: entry.id, path })
    }

    fn write(&mut self, entry: &ManifestEntry, content: &str) -> Result<(), DocNormError> {
        let doc = self.load_document()?;
        let spliced =
            Self::splice(&doc, entry.id, content).ok_or(DocNormError::ContentNotFound {
                id: entry.id,
                path: self.path.clone(),
            })?;
        write_atomic(&self.path, &spliced)?;
        self.cache = None;
        Ok(())
    }

    fn invalidate_cache(&mut self) {
        self.cache = None;
    }
}

// ── Entity-file source ───────────────────────────────────────────────────

/// Reads and writes the per-entity ground-truth files named by the manifest.
///
/// Each file opens with a small metadata header whose syntax follows the
/// file's format so every file stays valid in its own right:
///
/// * `.md` — fenced key-value block between `---` lines,
/// * `.yaml` — leading `# ` comment lines,
/// * `.mmd` — leading `%% ` directive lines.
///
/// Reads strip the header; writes regenerate a fresh one from the manifest
/// entry, marking the file corrected.
pub struct EntityFileSource {
    root: PathBuf,
}

impl EntityFileSource {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn entry_path(&self, entry: &ManifestEntry) -> PathBuf {
        self.root.join(&entry.file)
    }

    /// Strip the header block for the entry's file style, returning the body.
    pub fn strip_header(raw: &str, suffix: &str) -> String {
        match suffix {
            ".md" => {
                let trimmed = raw.trim_start();
                if let Some(rest) = trimmed.strip_prefix("---\n") {
                    if let Some(end) = rest.find("\n---") {
                        let after = &rest[end + "\n---".len()..];
                        return after.trim_start_matches('\n').trim_end().to_string();
                    }
                }
                raw.trim().to_string()
            }
            _ => {
                let prefix = if suffix == ".mmd" { "%% " } else { "# " };
                let mut rest = raw;
                while rest.starts_with(prefix) {
                    match rest.find('\n') {
                        Some(nl) => rest = &rest[nl + 1..],
                        None => rest = "",
                    }
                }
                rest.trim().to_string()
            }
        }
    }

    /// Render a fresh header for a corrected file.
    fn render_header(entry: &ManifestEntry, timestamp: &str) -> String {
        let suffix = entry.entity_type.file_suffix();
        let mut pairs = vec![
            ("entity_id".to_string(), entry.id.to_string()),
            ("type".to_string(), entry.entity_type.marker_tag().to_string()),
            ("source_page".to_string(), entry.page.to_string()),
            ("position".to_string(), entry.position.to_string()),
        ];
        if let Some(c) = entry.confidence {
            pairs.push(("confidence".to_string(), format!("{c:.2}")));
        }
        pairs.push(("corrected".to_string(), "true".to_string()));
        pairs.push(("correction_timestamp".to_string(), timestamp.to_string()));

        match suffix {
            ".md" => {
                let body: String = pairs
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}\n"))
                    .collect();
                format!("---\n{body}---\n")
            }
            _ => {
                let prefix = if suffix == ".mmd" { "%%" } else { "#" };
                pairs
                    .iter()
                    .map(|(k, v)| format!("{prefix} {k}: {v}\n"))
                    .collect()
            }
        }
    }
}

impl EntityContentSource for EntityFileSource {
    fn read(&mut self, entry: &ManifestEntry) -> Result<String, DocNormError> {
        let path = self.entry_path(entry);
        let raw = std::fs::read_to_string(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                DocNormError::ContentNotFound {
                    id: entry.id,
                    path: path.clone(),
                }
            } else {
                DocNormError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        Ok(Self::strip_header(&raw, entry.entity_type.file_suffix()))
    }

    fn write(&mut self, entry: &ManifestEntry, content: &str) -> Result<(), DocNormError> {
        let path = self.entry_path(entry);
        let timestamp = chrono::Utc::now().to_rfc3339();
        let header = Self::render_header(entry, &timestamp);
        let file = format!("{header}\n{}\n", content.trim_end());
        write_atomic(&path, &file)
    }

    fn invalidate_cache(&mut self) {}
}

// ── EntityStore ──────────────────────────────────────────────────────────

/// Manifest-backed content access bound to one [`ActiveSource`].
pub struct EntityStore {
    root: PathBuf,
    pub manifest: Manifest,
    source: Box<dyn EntityContentSource>,
}

impl EntityStore {
    /// Open a document directory. Fails if the manifest is missing or
    /// malformed; content files are only touched on access.
    pub fn open(root: impl Into<PathBuf>, active: ActiveSource) -> Result<Self, DocNormError> {
        let root = root.into();
        let manifest = Manifest::load(&root)?;
        let source: Box<dyn EntityContentSource> = match active {
            ActiveSource::EntityFiles => Box::new(EntityFileSource::new(root.clone())),
            ActiveSource::MergedDocument => Box::new(MergedDocumentSource::new(
                root.join(MERGED_DOCUMENT_FILE),
            )),
        };
        Ok(Self {
            root,
            manifest,
            source,
        })
    }

    /// Document directory this store was opened on.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the merged document inside this store's directory.
    pub fn document_path(&self) -> PathBuf {
        self.root.join(MERGED_DOCUMENT_FILE)
    }

    fn entry(&self, id: EntityId) -> Result<&ManifestEntry, DocNormError> {
        self.manifest
            .entry(id)
            .ok_or(DocNormError::EntityNotFound { id })
    }

    /// Current content of `id` from the active source.
    pub fn get(&mut self, id: EntityId) -> Result<String, DocNormError> {
        let entry = self.entry(id)?.clone();
        self.source.read(&entry)
    }

    /// Full entity view: manifest metadata plus current content.
    pub fn get_entity(&mut self, id: EntityId) -> Result<Entity, DocNormError> {
        let entry = self.entry(id)?.clone();
        let content = self.source.read(&entry)?;
        Ok(Entity {
            id: entry.id,
            entity_type: entry.entity_type,
            page: entry.page,
            position: entry.position,
            bbox: None,
            confidence: entry.confidence,
            content,
            extraction_method: ExtractionMethod::Native,
        })
    }

    /// Overwrite the content of `id` in the active source.
    pub fn set(&mut self, id: EntityId, content: &str) -> Result<(), DocNormError> {
        let entry = self.entry(id)?.clone();
        self.source.write(&entry, content)
    }

    /// Drop cached content; the next read re-reads the filesystem.
    pub fn invalidate(&mut self) {
        self.source.invalidate_cache();
    }

    /// Entity type of `id`, from the manifest alone.
    pub fn entity_type(&self, id: EntityId) -> Result<EntityType, DocNormError> {
        Ok(self.entry(id)?.entity_type)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::format_marker;

    fn entry(id: u32, t: EntityType, file: &str) -> ManifestEntry {
        ManifestEntry {
            id: EntityId(id),
            entity_type: t,
            page: 1,
            position: id,
            confidence: Some(0.9),
            file: file.to_string(),
            corrected: false,
            correction_timestamp: None,
            correction_kind: None,
        }
    }

    fn write_manifest(dir: &Path, entries: Vec<ManifestEntry>) {
        let manifest = Manifest {
            document_title: Some("T".into()),
            source_file: None,
            entities: entries,
        };
        manifest.save(dir).unwrap();
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        write_atomic(&path, "one").unwrap();
        write_atomic(&path, "two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        // No temp file left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn md_header_is_stripped_and_regenerated() {
        let raw = "---\nentity_id: E001\ntype: TEXT\n---\n\nActual body.\n";
        assert_eq!(EntityFileSource::strip_header(raw, ".md"), "Actual body.");

        let header = EntityFileSource::render_header(
            &entry(1, EntityType::Text, "entity_E001.md"),
            "2026-01-01T00:00:00Z",
        );
        assert!(header.starts_with("---\n"));
        assert!(header.contains("entity_id: E001"));
        assert!(header.contains("corrected: true"));
    }

    #[test]
    fn yaml_header_uses_comment_prefix() {
        let raw = "# entity_id: E002\n# type: TABLE\n\ntable:\n- a: 1\n";
        assert_eq!(
            EntityFileSource::strip_header(raw, ".yaml"),
            "table:\n- a: 1"
        );
        let header = EntityFileSource::render_header(
            &entry(2, EntityType::Table, "entity_E002.yaml"),
            "2026-01-01T00:00:00Z",
        );
        assert!(header.lines().all(|l| l.starts_with("# ")));
    }

    #[test]
    fn mmd_header_uses_directive_prefix() {
        let raw = "%% entity_id: E003\n%% type: DIAGRAM\n\ngraph TD\nA-->B\n";
        assert_eq!(
            EntityFileSource::strip_header(raw, ".mmd"),
            "graph TD\nA-->B"
        );
        let header = EntityFileSource::render_header(
            &entry(3, EntityType::Diagram, "entity_E003.mmd"),
            "2026-01-01T00:00:00Z",
        );
        assert!(header.lines().all(|l| l.starts_with("%% ")));
    }

    #[test]
    fn headerless_file_reads_whole_body() {
        assert_eq!(
            EntityFileSource::strip_header("plain content\n", ".md"),
            "plain content"
        );
        assert_eq!(
            EntityFileSource::strip_header("table:\n- a: 1\n", ".yaml"),
            "table:\n- a: 1"
        );
    }

    #[test]
    fn file_source_read_your_write() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), vec![entry(1, EntityType::Text, "e1.md")]);

        let mut store = EntityStore::open(dir.path(), ActiveSource::EntityFiles).unwrap();
        store.set(EntityId(1), "Corrected body.").unwrap();
        assert_eq!(store.get(EntityId(1)).unwrap(), "Corrected body.");

        // The file itself carries a fresh header.
        let raw = std::fs::read_to_string(dir.path().join("e1.md")).unwrap();
        assert!(raw.starts_with("---\n"));
        assert!(raw.contains("Corrected body."));
    }

    #[test]
    fn merged_source_reads_and_splices() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            vec![
                entry(1, EntityType::Text, "e1.md"),
                entry(2, EntityType::Table, "e2.yaml"),
            ],
        );
        let doc = format!(
            "# Title\n\n{}\n\nOld text.\n\n{}\n\n```yaml\na: 1\n```\n\n---\n\n# Change Log\n\n## Chunk 1\n- note\n",
            format_marker(EntityId(1), "TEXT", 1),
            format_marker(EntityId(2), "TABLE", 1),
        );
        std::fs::write(dir.path().join(MERGED_DOCUMENT_FILE), &doc).unwrap();

        let mut store = EntityStore::open(dir.path(), ActiveSource::MergedDocument).unwrap();
        assert_eq!(store.get(EntityId(1)).unwrap(), "Old text.");

        store.set(EntityId(1), "New text.").unwrap();
        assert_eq!(store.get(EntityId(1)).unwrap(), "New text.");

        let rewritten = std::fs::read_to_string(dir.path().join(MERGED_DOCUMENT_FILE)).unwrap();
        // Neighbouring entity and trailing change log survive the splice.
        assert!(rewritten.contains("```yaml\na: 1\n```"));
        assert!(rewritten.contains("# Change Log"));
        assert!(!rewritten.contains("Old text."));
    }

    #[test]
    fn splicing_last_entity_preserves_change_log() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), vec![entry(1, EntityType::Text, "e1.md")]);
        let doc = format!(
            "{}\n\nBody.\n\n---\n\n# Change Log\n\n## Chunk 1\n- note\n",
            format_marker(EntityId(1), "TEXT", 1),
        );
        std::fs::write(dir.path().join(MERGED_DOCUMENT_FILE), &doc).unwrap();

        let mut store = EntityStore::open(dir.path(), ActiveSource::MergedDocument).unwrap();
        store.set(EntityId(1), "Replaced.").unwrap();

        let rewritten = std::fs::read_to_string(dir.path().join(MERGED_DOCUMENT_FILE)).unwrap();
        assert!(rewritten.contains("Replaced."));
        assert!(rewritten.contains("# Change Log"));
        assert!(rewritten.contains("- note"));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), vec![entry(1, EntityType::Text, "e1.md")]);
        let mut store = EntityStore::open(dir.path(), ActiveSource::EntityFiles).unwrap();
        assert!(matches!(
            store.get(EntityId(99)),
            Err(DocNormError::EntityNotFound { id: EntityId(99) })
        ));
    }
}
