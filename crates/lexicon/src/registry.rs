//! Lexicon registry
//!
//! The registry flattens a set of Lexicon documents into one arena of
//! definitions keyed by fully-qualified id: the bare NSID for a document's
//! `main` definition, `nsid#name` for everything else. References are resolved
//! lazily by key lookup, so documents may reference each other in any order
//! and definitions may be mutually recursive.
//!
//! # Example
//!
//! ```rust
//! use lexicon::LexiconRegistry;
//! use serde_json::json;
//!
//! let registry = LexiconRegistry::from_values(vec![json!({
//!     "lexicon": 1,
//!     "id": "io.example.thing",
//!     "defs": {
//!         "main": {"type": "token"},
//!         "other": {"type": "string"},
//!     },
//! })])
//! .unwrap();
//!
//! assert!(registry.contains("io.example.thing"));
//! assert!(registry.contains("io.example.thing#other"));
//! assert!(registry.contains("blob"));
//! assert_eq!(
//!     registry.resolve_ref("io.example.thing", "#other"),
//!     "io.example.thing#other"
//! );
//! ```

use super::defs::{Definition, LexBlob, LexiconDoc};
use super::parsing::{collect_json_files, document_defs, document_id, full_id};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Id of the synthetic blob definition present in every registry
pub const BLOB_ID: &str = "blob";

/// Errors raised while building or querying a registry
#[derive(Debug, Error)]
pub enum LexiconError {
    /// Malformed document, unknown definition kind, or duplicate id
    #[error("{0}")]
    Config(String),

    /// No definition exists for the id
    #[error("{0} not found")]
    NotFound(String),

    /// IO error while loading documents from disk
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LexiconError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!("{}", message);
        LexiconError::Config(message)
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, LexiconError>;

/// Immutable index of Lexicon definitions
#[derive(Debug, Clone)]
pub struct LexiconRegistry {
    /// Definitions indexed by fully-qualified id
    defs: HashMap<String, Definition>,
}

impl LexiconRegistry {
    /// Build a registry from parsed documents
    ///
    /// Fails on a document whose `lexicon` version isn't 1 or on a duplicate
    /// fully-qualified id.
    pub fn new(docs: impl IntoIterator<Item = LexiconDoc>) -> Result<Self> {
        let mut defs = HashMap::new();

        for (i, doc) in docs.into_iter().enumerate() {
            if doc.id.is_empty() {
                return Err(LexiconError::config(format!(
                    "Lexicon {} missing or invalid id field",
                    i
                )));
            }
            if doc.lexicon != 1 {
                return Err(LexiconError::config(format!(
                    "{} lexicon field should be 1",
                    doc.id
                )));
            }

            for (name, def) in doc.defs {
                insert(&mut defs, full_id(&doc.id, &name), def)?;
            }
        }

        Ok(Self::finish(defs))
    }

    /// Build a registry from raw JSON documents
    ///
    /// Top-level shape is checked here so that errors name the offending
    /// document or definition. Definition internals are only parsed, not
    /// cross-checked; refs may point at documents loaded later.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Result<Self> {
        let mut defs = HashMap::new();

        for (i, value) in values.into_iter().enumerate() {
            let nsid = document_id(i, &value)?;
            for (id, def) in document_defs(&nsid, &value)? {
                insert(&mut defs, id, def)?;
            }
        }

        Ok(Self::finish(defs))
    }

    /// Build a registry from every `.json` file under a directory, recursively
    pub fn from_dir(path: impl AsRef<Path>) -> Result<Self> {
        let mut values = Vec::new();
        collect_json_files(path.as_ref(), &mut values)?;
        tracing::info!("{} lexicons loaded from {}", values.len(), path.as_ref().display());
        Self::from_values(values)
    }

    fn finish(mut defs: HashMap<String, Definition>) -> Self {
        defs.insert(BLOB_ID.to_string(), Definition::Blob(LexBlob::default()));
        if defs.len() == 1 {
            tracing::warn!("No lexicons loaded!");
        }
        Self { defs }
    }

    /// Look up a definition by fully-qualified id
    pub fn get(&self, id: &str) -> Option<&Definition> {
        self.defs.get(id)
    }

    /// Check whether a definition exists
    pub fn contains(&self, id: &str) -> bool {
        self.defs.contains_key(id)
    }

    /// Look up a definition, failing with [`LexiconError::NotFound`]
    pub fn resolve(&self, id: &str) -> Result<&Definition> {
        self.defs
            .get(id)
            .ok_or_else(|| LexiconError::NotFound(id.to_string()))
    }

    /// Resolve a reference string relative to the lexicon that contains it
    ///
    /// `#name` is joined onto the context's NSID; absolute refs are returned
    /// as-is. A trailing `#main` addresses the bare NSID.
    pub fn resolve_ref(&self, context: &str, reference: &str) -> String {
        let absolute = if reference.starts_with('#') {
            let base = context.split('#').next().unwrap_or(context);
            format!("{}{}", base, reference)
        } else {
            reference.to_string()
        };

        match absolute.strip_suffix("#main") {
            Some(bare) => bare.to_string(),
            None => absolute,
        }
    }

    /// Resolve a reference to `(fully-qualified id, definition)`
    pub fn lookup(&self, context: &str, reference: &str) -> Result<(String, &Definition)> {
        let id = self.resolve_ref(context, reference);
        let def = self.resolve(&id)?;
        Ok((id, def))
    }

    /// Iterate over fully-qualified ids
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(String::as_str)
    }

    /// Number of definitions, including the synthetic blob
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Whether the registry holds only the synthetic blob definition
    pub fn is_empty(&self) -> bool {
        self.defs.len() <= 1
    }
}

fn insert(defs: &mut HashMap<String, Definition>, id: String, def: Definition) -> Result<()> {
    if defs.contains_key(&id) {
        return Err(LexiconError::config(format!("Duplicate definition {}", id)));
    }
    defs.insert(id, def);
    Ok(())
}
