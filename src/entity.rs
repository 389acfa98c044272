//! Core data model: entity identifiers, the closed entity-type set, and the
//! document manifest.
//!
//! Everything downstream (chunking, marker protocol, the correction layer)
//! addresses content through these types. `EntityType` carries the explicit
//! suffix/fencing table so no caller ever branches on a type string.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DocNormError;

// ── EntityId ─────────────────────────────────────────────────────────────

/// Stable ordinal identifier for one addressable content block (`E012`).
///
/// Ids are assigned once during upstream extraction and are unique and
/// strictly increasing in document order. The numeric ordinal is kept so
/// ordering checks are cheap; `Display` renders the canonical zero-padded
/// form used in markers, placeholders, and persisted files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:03}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = DocNormError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix('E')
            .filter(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| DocNormError::Validation(format!("invalid entity id '{s}'")))?;
        let n = digits
            .parse::<u32>()
            .map_err(|_| DocNormError::Validation(format!("invalid entity id '{s}'")))?;
        Ok(EntityId(n))
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── EntityType ───────────────────────────────────────────────────────────

/// Closed set of entity content types.
///
/// Each variant maps to exactly one per-entity file suffix and one markdown
/// fencing convention; the table below is the single source of truth for
/// both, so adding a variant forces every dispatch site to be revisited.
///
/// | Variant     | Suffix  | Fence      | Marker tag   |
/// |-------------|---------|------------|--------------|
/// | `Text`      | `.md`   | none       | `TEXT`       |
/// | `Table`     | `.yaml` | ```yaml    | `TABLE`      |
/// | `Diagram`   | `.mmd`  | ```mermaid | `DIAGRAM`    |
/// | `ImageText` | `.md`   | none       | `IMAGE_TEXT` |
/// | `Form`      | `.yaml` | ```yaml    | `FORM`       |
/// | `Mixed`     | `.md`   | none       | `MIXED`      |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Text,
    Table,
    Diagram,
    ImageText,
    Form,
    Mixed,
}

impl EntityType {
    /// File suffix used for the per-entity ground-truth file.
    pub fn file_suffix(self) -> &'static str {
        match self {
            EntityType::Text | EntityType::ImageText | EntityType::Mixed => ".md",
            EntityType::Table | EntityType::Form => ".yaml",
            EntityType::Diagram => ".mmd",
        }
    }

    /// Code-fence language the body is wrapped in inside the merged
    /// document, or `None` for bare markdown.
    pub fn fence_language(self) -> Option<&'static str> {
        match self {
            EntityType::Table | EntityType::Form => Some("yaml"),
            EntityType::Diagram => Some("mermaid"),
            EntityType::Text | EntityType::ImageText | EntityType::Mixed => None,
        }
    }

    /// Upper-case tag used in the canonical boundary marker.
    pub fn marker_tag(self) -> &'static str {
        match self {
            EntityType::Text => "TEXT",
            EntityType::Table => "TABLE",
            EntityType::Diagram => "DIAGRAM",
            EntityType::ImageText => "IMAGE_TEXT",
            EntityType::Form => "FORM",
            EntityType::Mixed => "MIXED",
        }
    }

    /// Parse a marker tag, tolerating the legacy `EntityType.TABLE` spelling
    /// that older documents carry and any casing.
    pub fn parse_tag(tag: &str) -> Option<Self> {
        let tag = tag.rsplit('.').next().unwrap_or(tag).trim();
        match tag.to_ascii_uppercase().as_str() {
            "TEXT" => Some(EntityType::Text),
            "TABLE" => Some(EntityType::Table),
            "DIAGRAM" => Some(EntityType::Diagram),
            "IMAGE_TEXT" => Some(EntityType::ImageText),
            "FORM" => Some(EntityType::Form),
            "MIXED" => Some(EntityType::Mixed),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker_tag())
    }
}

/// How an entity's content was obtained during upstream extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Direct structural extraction from the source document.
    Native,
    /// Vision-service transcription of an image region.
    VisionFallback,
    /// Extraction attempted and failed; content is a placeholder.
    Failed,
}

// ── Entity ───────────────────────────────────────────────────────────────

/// One addressable content block with its provenance and current content.
///
/// Created once by upstream extraction; `content` may later be overwritten
/// by a correction, everything else is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub page: u32,
    pub position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub content: String,
    pub extraction_method: ExtractionMethod,
}

// ── Manifest ─────────────────────────────────────────────────────────────

/// Descriptor for one entity in the manifest: identity, placement, backing
/// file, and correction state. Order in [`Manifest::entities`] is document
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub page: u32,
    pub position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Path of the per-entity file, relative to the document directory.
    pub file: String,
    #[serde(default)]
    pub corrected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction_kind: Option<crate::corrections::CorrectionKind>,
}

/// Ordered entity descriptors for one document, persisted as
/// `manifest.json` in the document directory.
///
/// The manifest is mutated only by the correction layer; the normalization
/// pass never touches it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    pub entities: Vec<ManifestEntry>,
}

/// Manifest file name inside a document directory.
pub const MANIFEST_FILE: &str = "manifest.json";

impl Manifest {
    /// Load the manifest from a document directory.
    pub fn load(dir: &Path) -> Result<Self, DocNormError> {
        let path = dir.join(MANIFEST_FILE);
        let data = std::fs::read_to_string(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                DocNormError::ManifestNotFound { path: path.clone() }
            } else {
                DocNormError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        serde_json::from_str(&data).map_err(|e| {
            DocNormError::Validation(format!("malformed manifest {}: {e}", path.display()))
        })
    }

    /// Write the manifest back atomically (temp file + rename).
    pub fn save(&self, dir: &Path) -> Result<(), DocNormError> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DocNormError::Internal(format!("manifest serialisation: {e}")))?;
        crate::store::write_atomic(&path, &json)
    }

    /// Find the descriptor for `id`.
    pub fn entry(&self, id: EntityId) -> Option<&ManifestEntry> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Mutable descriptor lookup.
    pub fn entry_mut(&mut self, id: EntityId) -> Option<&mut ManifestEntry> {
        self.entities.iter_mut().find(|e| e.id == id)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
