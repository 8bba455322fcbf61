//! Provider catalog
//!
//! The catalog document is the JSON resource shipped with the extension:
//!
//! ```json
//! { "psps": [ ... ], "orchestrators": { "notice": "...", "list": [ ... ] }, "tsps": { ... } }
//! ```
//!
//! Loading validates the document wholesale (a catalog with no providers or
//! with an incomplete descriptor is rejected) and then compiles every
//! provider's matcher individually, so that one bad pattern never takes the
//! rest of the catalog down.

use serde::{Deserialize, Serialize};

use crate::matcher::ProviderMatcher;

/// Error type for catalog loading.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Catalog contains no providers")]
    Empty,
    #[error("Provider #{index} ({name:?}) is missing required field '{field}'")]
    MissingField {
        index: usize,
        name: String,
        field: &'static str,
    },
    #[error("Provider '{0}' declares no hostnames, matchStrings or regex")]
    NoMatcher(String),
    #[error("Duplicate provider name: {0}")]
    DuplicateProvider(String),
}

// =============================================================================
// Document Schema
// =============================================================================

/// One provider entry as it appears in the catalog document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_strings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

impl ProviderDescriptor {
    fn has_matcher(&self) -> bool {
        self.hostnames.iter().any(|h| !h.trim().is_empty())
            || self.match_strings.iter().any(|s| !s.trim().is_empty())
            || self.regex.as_deref().is_some_and(|r| !r.trim().is_empty())
    }

    fn check_required(&self, index: usize) -> Result<(), CatalogError> {
        let fields: [(&'static str, &str); 4] = [
            ("name", &self.name),
            ("url", &self.url),
            ("image", &self.image),
            ("summary", &self.summary),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(CatalogError::MissingField {
                    index,
                    name: self.name.clone(),
                    field,
                });
            }
        }
        Ok(())
    }
}

/// A named group of providers sharing a group-level notice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDocument {
    #[serde(default)]
    pub notice: String,
    #[serde(default)]
    pub list: Vec<ProviderDescriptor>,
}

/// The catalog resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub psps: Vec<ProviderDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrators: Option<GroupDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsps: Option<GroupDocument>,
}

// =============================================================================
// Compiled Catalog
// =============================================================================

/// Which named group a provider belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// Payment orchestrators
    Orchestrators,
    /// Third-party service resellers
    Tsps,
}

impl GroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrators => "orchestrators",
            Self::Tsps => "tsps",
        }
    }
}

/// A provider with its compiled matcher.
#[derive(Debug, Clone)]
pub struct Provider {
    pub descriptor: ProviderDescriptor,
    pub matcher: ProviderMatcher,
}

impl Provider {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// A named provider group.
#[derive(Debug, Clone)]
pub struct ProviderGroup {
    pub kind: GroupKind,
    pub notice: String,
    pub members: Vec<ProviderDescriptor>,
}

impl ProviderGroup {
    fn contains(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.name.eq_ignore_ascii_case(name))
    }
}

/// Validated, compiled catalog. Immutable after load.
#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    document: CatalogDocument,
    providers: Vec<Provider>,
    groups: Vec<ProviderGroup>,
}

impl ProviderCatalog {
    /// Parse and load a catalog document.
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        let document: CatalogDocument = serde_json::from_str(text)?;
        Self::from_document(document)
    }

    /// Validate and compile a parsed document.
    pub fn from_document(document: CatalogDocument) -> Result<Self, CatalogError> {
        if document.psps.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = std::collections::HashSet::new();
        for (index, descriptor) in document.psps.iter().enumerate() {
            descriptor.check_required(index)?;
            if !descriptor.has_matcher() {
                return Err(CatalogError::NoMatcher(descriptor.name.clone()));
            }
            if !seen.insert(descriptor.name.to_ascii_lowercase()) {
                return Err(CatalogError::DuplicateProvider(descriptor.name.clone()));
            }
        }

        // Group members not listed in `psps` are providers in their own
        // right and are scanned after them, in document order.
        let mut scanned: Vec<&ProviderDescriptor> = document.psps.iter().collect();
        let mut groups = Vec::new();
        for (kind, group) in [
            (GroupKind::Orchestrators, &document.orchestrators),
            (GroupKind::Tsps, &document.tsps),
        ] {
            let Some(group) = group else { continue };
            for (index, member) in group.list.iter().enumerate() {
                member.check_required(index)?;
                if !seen.insert(member.name.to_ascii_lowercase()) {
                    continue;
                }
                if !member.has_matcher() {
                    return Err(CatalogError::NoMatcher(member.name.clone()));
                }
                scanned.push(member);
            }
            groups.push(ProviderGroup {
                kind,
                notice: group.notice.clone(),
                members: group.list.clone(),
            });
        }

        let providers: Vec<Provider> = scanned
            .into_iter()
            .map(|d| Provider {
                matcher: ProviderMatcher::compile(&d.name, &d.hostnames, &d.match_strings, d.regex.as_deref()),
                descriptor: d.clone(),
            })
            .collect();

        log::debug!(
            "catalog loaded: {} providers ({} from groups), {} groups",
            providers.len(),
            providers.len() - document.psps.len(),
            groups.len()
        );

        Ok(Self {
            document,
            providers,
            groups,
        })
    }

    /// The document this catalog was built from.
    pub fn document(&self) -> &CatalogDocument {
        &self.document
    }

    /// Providers in scan order: `psps`, then group-only members.
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn groups(&self) -> &[ProviderGroup] {
        &self.groups
    }

    /// Case-insensitive lookup. Providers take precedence over group members.
    pub fn lookup(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.providers
            .iter()
            .map(|p| &p.descriptor)
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .or_else(|| {
                self.groups
                    .iter()
                    .flat_map(|g| g.members.iter())
                    .find(|d| d.name.eq_ignore_ascii_case(name))
            })
    }

    /// First group listing this provider.
    pub fn group_of(&self, name: &str) -> Option<&ProviderGroup> {
        self.groups.iter().find(|g| g.contains(name))
    }

    /// Notice to show for a provider: a non-empty group notice wins over the
    /// provider's own notice.
    pub fn resolve_notice(&self, name: &str) -> Option<&str> {
        if let Some(group) = self.group_of(name) {
            if !group.notice.trim().is_empty() {
                return Some(&group.notice);
            }
        }
        self.lookup(name)
            .and_then(|d| d.notice.as_deref())
            .filter(|n| !n.trim().is_empty())
    }

    /// Providers whose declared pattern was rejected at compile time.
    pub fn pattern_failures(&self) -> Vec<(&str, &str)> {
        self.providers
            .iter()
            .filter_map(|p| p.matcher.pattern_error().map(|e| (p.name(), e)))
            .collect()
    }
}
