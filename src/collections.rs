//! Collection catalog: record types, collection value shapes, and the
//! per-collection sync policy ([`CollectionSpec`]).

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A single domain record inside a collection.
pub trait Record {
    /// Structural identity used for deduplication.
    fn record_key(&self) -> String;

    fn validate(&self) -> Result<(), String>;
}

/// The whole value of a collection as stored remotely and in the cache.
pub trait CollectionValue:
    Serialize + DeserializeOwned + Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static
{
    fn item_count(&self) -> usize;

    /// Every record must pass; the first failure rejects the whole value.
    fn validate_all(&self) -> Result<(), ValidationError>;

    /// Union of `self` and `other`, deduplicated, earlier occurrences winning.
    fn merge_first_wins(self, other: Self) -> Self;
}

impl<R> CollectionValue for Vec<R>
where
    R: Record + Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    fn item_count(&self) -> usize {
        self.len()
    }

    fn validate_all(&self) -> Result<(), ValidationError> {
        for (i, record) in self.iter().enumerate() {
            record
                .validate()
                .map_err(|reason| ValidationError::new(format!("#{i}"), reason))?;
        }
        Ok(())
    }

    fn merge_first_wins(self, other: Self) -> Self {
        let mut seen = HashSet::new();
        self.into_iter()
            .chain(other)
            .filter(|r| seen.insert(r.record_key()))
            .collect()
    }
}

impl<R> CollectionValue for BTreeMap<String, Vec<R>>
where
    R: Record + Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    fn item_count(&self) -> usize {
        self.values().map(Vec::len).sum()
    }

    fn validate_all(&self) -> Result<(), ValidationError> {
        for (key, records) in self {
            if key.trim().is_empty() {
                return Err(ValidationError::new("<empty key>", "key must not be empty"));
            }
            for (i, record) in records.iter().enumerate() {
                record
                    .validate()
                    .map_err(|reason| ValidationError::new(format!("{key}#{i}"), reason))?;
            }
        }
        Ok(())
    }

    fn merge_first_wins(mut self, other: Self) -> Self {
        for (key, records) in other {
            self.entry(key).or_insert(records);
        }
        self
    }
}

fn require(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} must not be empty"))
    } else {
        Ok(())
    }
}

// ── Records ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl Record for Template {
    fn record_key(&self) -> String {
        self.id.clone()
    }

    fn validate(&self) -> Result<(), String> {
        require("id", &self.id)?;
        require("name", &self.name)
    }
}

/// A bookmark to a template (optionally one specific variant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedItem {
    pub template_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_key: Option<String>,
}

impl SavedItem {
    pub fn new(template_id: &str, variant_key: Option<&str>) -> Self {
        Self {
            template_id: template_id.to_string(),
            variant_key: variant_key.map(str::to_string),
        }
    }
}

impl Record for SavedItem {
    fn record_key(&self) -> String {
        format!("{}::{}", self.template_id, self.variant_key.as_deref().unwrap_or(""))
    }

    fn validate(&self) -> Result<(), String> {
        require("templateId", &self.template_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomCloud {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Record for CustomCloud {
    fn record_key(&self) -> String {
        self.id.clone()
    }

    fn validate(&self) -> Result<(), String> {
        require("id", &self.id)?;
        require("name", &self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Record for Category {
    fn record_key(&self) -> String {
        self.id.clone()
    }

    fn validate(&self) -> Result<(), String> {
        require("id", &self.id)?;
        require("name", &self.name)
    }
}

/// Categories grouped by cloud id.
pub type CloudCategories = BTreeMap<String, Vec<Category>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSymbol {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub symbol: String,
}

impl Record for StatusSymbol {
    fn record_key(&self) -> String {
        self.id.clone()
    }

    fn validate(&self) -> Result<(), String> {
        require("id", &self.id)?;
        require("label", &self.label)
    }
}

/// Point of contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Record for Contact {
    fn record_key(&self) -> String {
        self.id.clone()
    }

    fn validate(&self) -> Result<(), String> {
        require("id", &self.id)?;
        require("name", &self.name)?;
        match self.email {
            Some(ref email) if !email.contains('@') => Err(format!("invalid email {email:?}")),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: String,
    pub title: String,
    pub url: String,
}

impl Record for Link {
    fn record_key(&self) -> String {
        self.id.clone()
    }

    fn validate(&self) -> Result<(), String> {
        require("id", &self.id)?;
        require("title", &self.title)?;
        if self.url.starts_with("https://") || self.url.starts_with("http://") {
            Ok(())
        } else {
            Err(format!("url {:?} is not http(s)", self.url))
        }
    }
}

// ── Policy ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Team-wide, no identity required.
    Shared,
    /// Keyed by a stable user identifier.
    PerUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Remote write plus read-back before the visible value changes.
    Verified,
    /// Visible value changes immediately; remote write in the background.
    BestEffort,
}

pub type Validator<T> = Arc<dyn Fn(&T) -> Result<(), ValidationError> + Send + Sync>;

pub struct CollectionSpec<T> {
    pub name: String,
    pub scope: Scope,
    pub mode: WriteMode,
    pub validator: Validator<T>,
    /// Shared collection this per-user collection replaced, merged in once.
    pub legacy: Option<String>,
}

impl<T> Clone for CollectionSpec<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            scope: self.scope,
            mode: self.mode,
            validator: self.validator.clone(),
            legacy: self.legacy.clone(),
        }
    }
}

impl<T> fmt::Debug for CollectionSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionSpec")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("mode", &self.mode)
            .field("legacy", &self.legacy)
            .finish()
    }
}

impl<T: CollectionValue> CollectionSpec<T> {
    pub fn new(name: &str, scope: Scope, mode: WriteMode) -> Self {
        Self {
            name: name.to_string(),
            scope,
            mode,
            validator: Arc::new(T::validate_all),
            legacy: None,
        }
    }

    pub fn with_validator(
        mut self,
        validator: impl Fn(&T) -> Result<(), ValidationError> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn with_legacy(mut self, legacy: &str) -> Self {
        self.legacy = Some(legacy.to_string());
        self
    }

    pub fn validate(&self, value: &T) -> Result<(), ValidationError> {
        (self.validator)(value).map_err(|e| e.in_collection(&self.name))
    }
}

// ── Catalog ──────────────────────────────────────────────────────────

pub const TEMPLATES: &str = "templates";
pub const SAVED_ITEMS: &str = "user-saved-items";
pub const LEGACY_SAVED_ITEMS: &str = "saved-items";
pub const CUSTOM_CLOUDS: &str = "custom-clouds";
pub const CLOUD_CATEGORIES: &str = "cloud-categories";
pub const STATUS_SYMBOLS: &str = "status-symbols";
pub const CONTACTS: &str = "contacts";
pub const LINKS: &str = "links";

pub const ALL: [&str; 7] = [
    TEMPLATES,
    SAVED_ITEMS,
    CUSTOM_CLOUDS,
    CLOUD_CATEGORIES,
    STATUS_SYMBOLS,
    CONTACTS,
    LINKS,
];

pub fn templates() -> CollectionSpec<Vec<Template>> {
    CollectionSpec::new(TEMPLATES, Scope::Shared, WriteMode::Verified)
}

pub fn saved_items() -> CollectionSpec<Vec<SavedItem>> {
    CollectionSpec::new(SAVED_ITEMS, Scope::PerUser, WriteMode::Verified)
        .with_legacy(LEGACY_SAVED_ITEMS)
}

pub fn custom_clouds() -> CollectionSpec<Vec<CustomCloud>> {
    CollectionSpec::new(CUSTOM_CLOUDS, Scope::Shared, WriteMode::BestEffort)
}

pub fn cloud_categories() -> CollectionSpec<CloudCategories> {
    CollectionSpec::new(CLOUD_CATEGORIES, Scope::Shared, WriteMode::BestEffort)
}

pub fn status_symbols() -> CollectionSpec<Vec<StatusSymbol>> {
    CollectionSpec::new(STATUS_SYMBOLS, Scope::Shared, WriteMode::BestEffort)
}

pub fn contacts() -> CollectionSpec<Vec<Contact>> {
    CollectionSpec::new(CONTACTS, Scope::Shared, WriteMode::BestEffort)
}

pub fn links() -> CollectionSpec<Vec<Link>> {
    CollectionSpec::new(LINKS, Scope::Shared, WriteMode::BestEffort)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(id: &str, name: &str) -> Template {
        Template {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            category_id: None,
            variants: Vec::new(),
            thumbnail_url: None,
        }
    }

    #[test]
    fn test_template_validation_rejects_whole_collection() {
        let spec = templates();
        let good = vec![template("t1", "Card"), template("t2", "Header")];
        assert!(spec.validate(&good).is_ok());

        let bad = vec![template("t1", "Card"), template("t2", "  ")];
        let err = spec.validate(&bad).unwrap_err();
        assert_eq!(err.collection, "templates");
        assert_eq!(err.record, "#1");
        assert!(err.reason.contains("name"));
    }

    #[test]
    fn test_saved_item_merge_dedups_on_template_and_variant() {
        let a = vec![SavedItem::new("t1", None), SavedItem::new("t1", Some("dark"))];
        let b = vec![
            SavedItem::new("t1", Some("dark")),
            SavedItem::new("t2", None),
            SavedItem::new("t1", None),
        ];

        let merged = a.merge_first_wins(b);
        assert_eq!(
            merged,
            vec![
                SavedItem::new("t1", None),
                SavedItem::new("t1", Some("dark")),
                SavedItem::new("t2", None),
            ]
        );
    }

    #[test]
    fn test_merge_first_occurrence_wins() {
        let a = vec![template("t1", "Original")];
        let b = vec![template("t1", "Stale copy"), template("t2", "Other")];
        let merged = a.merge_first_wins(b);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "Original");
    }

    #[test]
    fn test_cloud_categories_count_and_merge() {
        let mut a = CloudCategories::new();
        a.insert(
            "cloud-1".to_string(),
            vec![
                Category { id: "c1".into(), name: "Buttons".into(), color: None },
                Category { id: "c2".into(), name: "Forms".into(), color: None },
            ],
        );
        let mut b = CloudCategories::new();
        b.insert("cloud-1".to_string(), Vec::new());
        b.insert(
            "cloud-2".to_string(),
            vec![Category { id: "c3".into(), name: "Icons".into(), color: None }],
        );

        assert_eq!(a.item_count(), 2);
        let merged = a.merge_first_wins(b);
        assert_eq!(merged.item_count(), 3);
        assert_eq!(merged["cloud-1"].len(), 2);
    }

    #[test]
    fn test_contact_and_link_validation() {
        let contacts = vec![Contact {
            id: "p1".into(),
            name: "Design Ops".into(),
            email: Some("not-an-email".into()),
            role: None,
        }];
        assert!(contacts.validate_all().is_err());

        let links = vec![Link { id: "l1".into(), title: "Guide".into(), url: "ftp://x".into() }];
        assert!(links.validate_all().is_err());
    }

    #[test]
    fn test_custom_validator_overrides_default() {
        let spec = links().with_validator(|links: &Vec<Link>| {
            if links.len() > 1 {
                Err(ValidationError::new("*", "only one link allowed"))
            } else {
                Ok(())
            }
        });
        let two = vec![
            Link { id: "a".into(), title: "A".into(), url: "https://a".into() },
            Link { id: "b".into(), title: "B".into(), url: "https://b".into() },
        ];
        assert_eq!(spec.validate(&two).unwrap_err().collection, "links");
    }

    #[test]
    fn test_records_use_camel_case_on_the_wire() {
        let item = SavedItem::new("t1", Some("dark"));
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["templateId"], "t1");
        assert_eq!(json["variantKey"], "dark");

        let bare: SavedItem = serde_json::from_str(r#"{"templateId":"t9"}"#).unwrap();
        assert!(bare.variant_key.is_none());
    }

    #[test]
    fn test_catalog_policies() {
        assert_eq!(saved_items().scope, Scope::PerUser);
        assert_eq!(saved_items().mode, WriteMode::Verified);
        assert_eq!(saved_items().legacy.as_deref(), Some(LEGACY_SAVED_ITEMS));
        assert_eq!(templates().mode, WriteMode::Verified);
        assert_eq!(links().mode, WriteMode::BestEffort);
        assert_eq!(ALL.len(), 7);
    }
}
