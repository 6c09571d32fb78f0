//! Location index
//!
//! Resolves template ids to the files that define them. Built once from the
//! decoded location manifest, read-only afterwards.
//!
//! Each record's classification (file kind, school category, deck kind) is a
//! pure function of its path and is computed once when the record is built.
//!
//! Duplicate ids follow the configured [`DuplicatePolicy`]. With
//! `LastWriteWins` the later record owns the id in the lookup maps and the
//! duplicate is reported through [`IndexStats`] and [`LocationIndex::validate`].

use crate::error::{ExtractError, Result};
use crate::materializer::{Materialized, MaterializedObject};
use crate::value::Value;
use demon_common::config::ManifestConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{info, warn};

/// Smallest valid template id
pub const MIN_TEMPLATE_ID: i64 = 1;
/// Largest valid template id
pub const MAX_TEMPLATE_ID: i64 = 999_999_999;

/// File kind, from the directory segments of the path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Deck,
    Spell,
    Object,
    Creature,
    Item,
    Audio,
    Effect,
    Other,
    /// Empty path
    Unknown,
}

impl FileKind {
    /// Segment → kind, in priority order
    const SEGMENTS: [(&'static str, FileKind); 7] = [
        ("decks", FileKind::Deck),
        ("spells", FileKind::Spell),
        ("objects", FileKind::Object),
        ("creatures", FileKind::Creature),
        ("items", FileKind::Item),
        ("audio", FileKind::Audio),
        ("effects", FileKind::Effect),
    ];

    pub fn classify(path: &str) -> FileKind {
        if path.trim().is_empty() {
            return FileKind::Unknown;
        }
        let segments: Vec<String> = directory_segments(path)
            .map(|s| s.to_ascii_lowercase())
            .collect();
        Self::SEGMENTS
            .iter()
            .find(|(name, _)| segments.iter().any(|s| s == name))
            .map(|(_, kind)| *kind)
            .unwrap_or(FileKind::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Deck => "deck",
            FileKind::Spell => "spell",
            FileKind::Object => "object",
            FileKind::Creature => "creature",
            FileKind::Item => "item",
            FileKind::Audio => "audio",
            FileKind::Effect => "effect",
            FileKind::Other => "other",
            FileKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Magic school inferred from file-name keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum School {
    Fire,
    Ice,
    Storm,
    Myth,
    Life,
    Death,
    Balance,
    Shadow,
}

impl School {
    /// Keyword table; the first school with a matching token wins
    const KEYWORDS: [(School, &'static [&'static str]); 8] = [
        (School::Fire, &["fire", "flame", "pyro", "burn", "ember"]),
        (School::Ice, &["ice", "frost", "frozen", "chill", "snow"]),
        (School::Storm, &["storm", "thunder", "lightning", "bolt", "tempest"]),
        (School::Myth, &["myth", "conjure", "minotaur", "cyclops"]),
        (School::Life, &["life", "nature", "heal", "sprite", "unicorn"]),
        (School::Death, &["death", "necro", "dark", "vampire", "skeleton"]),
        (School::Balance, &["balance", "equi", "ra", "judgement"]),
        (School::Shadow, &["shadow", "dark", "void", "eclipse"]),
    ];

    pub fn classify(file_stem: &str) -> Option<School> {
        let tokens = tokenize(file_stem);
        Self::KEYWORDS
            .iter()
            .find(|(_, keywords)| {
                tokens
                    .iter()
                    .any(|token| keywords.iter().any(|kw| keyword_matches(token, kw)))
            })
            .map(|(school, _)| *school)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            School::Fire => "fire",
            School::Ice => "ice",
            School::Storm => "storm",
            School::Myth => "myth",
            School::Life => "life",
            School::Death => "death",
            School::Balance => "balance",
            School::Shadow => "shadow",
        }
    }
}

impl fmt::Display for School {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deck variant, from the deck file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeckKind {
    Mob,
    Boss,
    Hybrid,
    Polymorph,
    Treasure,
    School,
    Npc,
}

impl DeckKind {
    // Longer patterns first: "mobdeck" contains "bdeck", "bossdeck" contains "sdeck"
    const PATTERNS: [(&'static str, DeckKind); 11] = [
        ("mobdeck", DeckKind::Mob),
        ("bossdeck", DeckKind::Boss),
        ("polymorph", DeckKind::Polymorph),
        ("mdeck", DeckKind::Mob),
        ("bdeck", DeckKind::Boss),
        ("hdeck", DeckKind::Hybrid),
        ("pdeck", DeckKind::Polymorph),
        ("tdeck", DeckKind::Treasure),
        ("sdeck", DeckKind::School),
        ("ndeck", DeckKind::Npc),
        ("npcdeck", DeckKind::Npc),
    ];

    pub fn classify(file_stem: &str) -> Option<DeckKind> {
        let compact: String = file_stem
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::PATTERNS
            .iter()
            .find(|(pattern, _)| compact.contains(pattern))
            .map(|(_, kind)| *kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeckKind::Mob => "mob",
            DeckKind::Boss => "boss",
            DeckKind::Hybrid => "hybrid",
            DeckKind::Polymorph => "polymorph",
            DeckKind::Treasure => "treasure",
            DeckKind::School => "school",
            DeckKind::Npc => "npc",
        }
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|s| !s.is_empty())
}

fn directory_segments(path: &str) -> impl Iterator<Item = &str> {
    let segments: Vec<&str> = split_path(path).collect();
    let dirs = segments.len().saturating_sub(1);
    segments.into_iter().take(dirs)
}

/// File name without directory or extension
fn file_stem(path: &str) -> String {
    let name = split_path(path).last().unwrap_or("");
    match name.rfind('.') {
        Some(dot) if dot > 0 => name[..dot].to_string(),
        _ => name.to_string(),
    }
}

/// Parent directory with forward slashes ("" at the root)
fn parent_directory(path: &str) -> String {
    let segments: Vec<&str> = split_path(path).collect();
    segments[..segments.len().saturating_sub(1)].join("/")
}

/// Split on non-alphanumerics and lower→upper case changes, lowercased
fn tokenize(stem: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in stem.chars() {
        if !c.is_ascii_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_ascii_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        current.push(c.to_ascii_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Keywords of four or more letters also match as a token prefix
fn keyword_matches(token: &str, keyword: &str) -> bool {
    token == keyword || (keyword.len() >= 4 && token.starts_with(keyword))
}

/// One id → file mapping with cached classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub id: i64,
    pub path: String,
    pub file_name: String,
    pub directory: String,
    pub kind: FileKind,
    pub category: Option<School>,
    pub deck_kind: Option<DeckKind>,
    pub is_valid: bool,
}

impl LocationRecord {
    pub fn new(id: i64, path: impl Into<String>) -> Self {
        let path = path.into();
        let file_name = file_stem(&path);
        let kind = FileKind::classify(&path);
        let deck_kind = if kind == FileKind::Deck {
            DeckKind::classify(&file_name)
        } else {
            None
        };

        Self {
            id,
            directory: parent_directory(&path),
            category: School::classify(&file_name),
            kind,
            deck_kind,
            is_valid: id > 0 && !path.trim().is_empty(),
            file_name,
            path,
        }
    }
}

/// Problem found while building the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    DuplicateId { id: i64, previous_path: String, path: String },
    OutOfRange { id: i64, path: String },
    EmptyPath { id: i64 },
    MissingField { index: usize, field: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::DuplicateId { id, previous_path, path } => {
                write!(f, "duplicate id {} ('{}' replaced by '{}')", id, previous_path, path)
            }
            ValidationIssue::OutOfRange { id, path } => {
                write!(
                    f,
                    "id {} outside {}..={} ('{}')",
                    id, MIN_TEMPLATE_ID, MAX_TEMPLATE_ID, path
                )
            }
            ValidationIssue::EmptyPath { id } => write!(f, "id {} has an empty path", id),
            ValidationIssue::MissingField { index, field } => {
                write!(f, "entry {} lacks field '{}'", index, field)
            }
        }
    }
}

/// Build-time statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total: usize,
    pub unique_ids: usize,
    pub duplicate_ids: usize,
    pub valid: usize,
    pub invalid: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub issues: Vec<ValidationIssue>,
}

impl IndexStats {
    pub fn most_common_kind(&self) -> Option<&str> {
        self.by_kind
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(kind, _)| kind.as_str())
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} locations, {} unique ids, {} duplicates, {} invalid",
            self.total, self.unique_ids, self.duplicate_ids, self.invalid
        )
    }
}

/// Result of checking a list of ids against the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdValidation {
    pub total_checked: usize,
    pub found: BTreeSet<i64>,
    pub missing: BTreeSet<i64>,
    /// Ids that appeared more than once in the manifest
    pub duplicate_ids_in_source: BTreeSet<i64>,
    /// Share of checked ids that resolved
    pub success_rate: f64,
}

/// What to do when two records share an id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Later record wins; the duplicate is reported
    #[default]
    LastWriteWins,
    /// Fail the build
    Reject,
}

/// Field names of the manifest list and its records
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestLayout {
    pub list_field: String,
    pub id_field: String,
    pub path_field: String,
}

impl Default for ManifestLayout {
    fn default() -> Self {
        Self::from(&ManifestConfig::default())
    }
}

impl From<&ManifestConfig> for ManifestLayout {
    fn from(config: &ManifestConfig) -> Self {
        Self {
            list_field: config.list_field.clone(),
            id_field: config.id_field.clone(),
            path_field: config.path_field.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocationIndex {
    records: Vec<LocationRecord>,
    by_id: HashMap<i64, usize>,
    by_path: HashMap<String, usize>,
    duplicate_ids: BTreeSet<i64>,
    stats: IndexStats,
}

impl LocationIndex {
    /// Build from (id, path) pairs
    pub fn build<I, S>(entries: I, policy: DuplicatePolicy) -> Result<Self>
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        let records = entries
            .into_iter()
            .map(|(id, path)| LocationRecord::new(id, path))
            .collect();
        Self::from_records(records, policy, Vec::new())
    }

    /// Build from a materialized manifest object
    pub fn from_manifest(
        manifest: &MaterializedObject,
        layout: &ManifestLayout,
        policy: DuplicatePolicy,
    ) -> Result<Self> {
        let Some(Materialized::List(items)) = manifest.get(&layout.list_field) else {
            return Err(ExtractError::Manifest(format!(
                "{} has no list field '{}'",
                manifest.type_name, layout.list_field
            )));
        };

        let mut records = Vec::with_capacity(items.len());
        let mut issues = Vec::new();

        for (index, item) in items.iter().enumerate() {
            let id = read_field(item, &layout.id_field).and_then(Value::as_i64);
            let path = read_field(item, &layout.path_field)
                .and_then(Value::as_str)
                .map(str::to_string);

            match (id, path) {
                (Some(id), Some(path)) => records.push(LocationRecord::new(id, path)),
                (None, _) => issues.push(ValidationIssue::MissingField {
                    index,
                    field: layout.id_field.clone(),
                }),
                (_, None) => issues.push(ValidationIssue::MissingField {
                    index,
                    field: layout.path_field.clone(),
                }),
            }
        }

        Self::from_records(records, policy, issues)
    }

    fn from_records(
        records: Vec<LocationRecord>,
        policy: DuplicatePolicy,
        mut issues: Vec<ValidationIssue>,
    ) -> Result<Self> {
        let mut by_id: HashMap<i64, usize> = HashMap::with_capacity(records.len());
        let mut by_path: HashMap<String, usize> = HashMap::with_capacity(records.len());
        let mut duplicate_ids = BTreeSet::new();
        let mut stats = IndexStats {
            total: records.len(),
            ..IndexStats::default()
        };

        for (idx, record) in records.iter().enumerate() {
            if let Some(previous) = by_id.insert(record.id, idx) {
                duplicate_ids.insert(record.id);
                issues.push(ValidationIssue::DuplicateId {
                    id: record.id,
                    previous_path: records[previous].path.clone(),
                    path: record.path.clone(),
                });
            }
            by_path.insert(record.path.clone(), idx);

            if !(MIN_TEMPLATE_ID..=MAX_TEMPLATE_ID).contains(&record.id) {
                issues.push(ValidationIssue::OutOfRange {
                    id: record.id,
                    path: record.path.clone(),
                });
            }
            if record.path.trim().is_empty() {
                issues.push(ValidationIssue::EmptyPath { id: record.id });
            }

            if record.is_valid {
                stats.valid += 1;
            } else {
                stats.invalid += 1;
            }
            *stats.by_kind.entry(record.kind.as_str().to_string()).or_default() += 1;
            let category = record.category.map(|c| c.as_str()).unwrap_or("none");
            *stats.by_category.entry(category.to_string()).or_default() += 1;
        }

        if !duplicate_ids.is_empty() {
            match policy {
                DuplicatePolicy::Reject => {
                    return Err(ExtractError::DuplicateIds(duplicate_ids.into_iter().collect()));
                }
                DuplicatePolicy::LastWriteWins => warn!(
                    "{} duplicate location ids; keeping the last occurrence of each",
                    duplicate_ids.len()
                ),
            }
        }

        stats.unique_ids = by_id.len();
        stats.duplicate_ids = duplicate_ids.len();
        stats.issues = issues;

        info!("Location index built: {}", stats.display_string());

        Ok(Self {
            records,
            by_id,
            by_path,
            duplicate_ids,
            stats,
        })
    }

    pub fn lookup_by_id(&self, id: i64) -> Option<&LocationRecord> {
        self.by_id.get(&id).map(|&idx| &self.records[idx])
    }

    pub fn lookup_by_path(&self, path: &str) -> Option<&LocationRecord> {
        self.by_path.get(path).map(|&idx| &self.records[idx])
    }

    pub fn filter_by_kind(&self, kind: FileKind) -> Vec<&LocationRecord> {
        self.records.iter().filter(|r| r.kind == kind).collect()
    }

    pub fn filter_by_category(&self, category: School) -> Vec<&LocationRecord> {
        self.records
            .iter()
            .filter(|r| r.category == Some(category))
            .collect()
    }

    /// Check ids against the index; duplicates are those of the whole manifest
    pub fn validate(&self, ids: &[i64]) -> IdValidation {
        let mut found = BTreeSet::new();
        let mut missing = BTreeSet::new();
        let mut found_count = 0usize;

        for &id in ids {
            if self.by_id.contains_key(&id) {
                found.insert(id);
                found_count += 1;
            } else {
                missing.insert(id);
            }
        }

        IdValidation {
            total_checked: ids.len(),
            found,
            missing,
            duplicate_ids_in_source: self.duplicate_ids.clone(),
            success_rate: if ids.is_empty() {
                0.0
            } else {
                found_count as f64 / ids.len() as f64
            },
        }
    }

    /// Records that own their id in the lookup map, in input order
    pub fn unique_records(&self) -> impl Iterator<Item = &LocationRecord> {
        self.records
            .iter()
            .enumerate()
            .filter(|(idx, r)| self.by_id.get(&r.id) == Some(idx))
            .map(|(_, r)| r)
    }

    pub fn records(&self) -> &[LocationRecord] {
        &self.records
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    pub fn duplicate_ids(&self) -> &BTreeSet<i64> {
        &self.duplicate_ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Field of a materialized object, or of a raw record passed through
fn read_field<'a>(item: &'a Materialized, field: &str) -> Option<&'a Value> {
    match item {
        Materialized::Object(obj) => obj.get(field).and_then(Materialized::as_value),
        Materialized::Value(Value::Record(record)) => record.fields.get(field),
        Materialized::Value(Value::Map(map)) => map.get(field),
        _ => None,
    }
}
