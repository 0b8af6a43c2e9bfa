//! Human-readable names for class ids.

use crate::{ClassId, Result, error::Error};
use serde::{Deserialize, Serialize};

/// Grading classes of the default ginseng sorting model, in class id order.
pub const DEFAULT_CLASS_NAMES: [&str; 8] = [
    "lesion",
    "finished",
    "muddy",
    "forked",
    "bruised",
    "rotten-head",
    "rust",
    "bud",
];

/// Ordered list of class names; position `i` names class id `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassCatalog {
    names: Vec<String>,
}

impl ClassCatalog {
    /// Build a catalog from names ordered by class id.
    ///
    /// # Errors
    /// Returns `Error::Config` if the list is empty, contains a blank name,
    /// or holds more classes than a register can address.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(Error::Config("class catalog must not be empty".into()));
        }
        if names.len() > usize::from(ClassId::MAX) {
            return Err(Error::Config(format!(
                "class catalog holds {} names, at most {} are addressable",
                names.len(),
                ClassId::MAX
            )));
        }
        if let Some(pos) = names.iter().position(|n| n.trim().is_empty()) {
            return Err(Error::Config(format!(
                "class name for id {} is blank",
                pos + 1
            )));
        }
        Ok(Self { names })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Whether `id` names a class in this catalog.
    #[must_use]
    pub fn contains(&self, id: ClassId) -> bool {
        id.index() < self.names.len()
    }

    /// Name for `id`, if the catalog knows it.
    #[must_use]
    pub fn name(&self, id: ClassId) -> Option<&str> {
        self.names.get(id.index()).map(String::as_str)
    }

    /// Name for `id`, or its number when unknown. Used for log labels.
    #[must_use]
    pub fn label(&self, id: ClassId) -> String {
        self.name(id)
            .map_or_else(|| format!("class-{id}"), str::to_string)
    }

    /// All `(id, name)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ClassId, &str)> {
        self.names.iter().enumerate().filter_map(|(idx, name)| {
            ClassId::from_index(idx)
                .ok()
                .map(|id| (id, name.as_str()))
        })
    }
}

impl Default for ClassCatalog {
    fn default() -> Self {
        Self {
            names: DEFAULT_CLASS_NAMES.iter().map(|n| n.to_string()).collect(),
        }
    }
}
