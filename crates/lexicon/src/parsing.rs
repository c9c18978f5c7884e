//! Lexicon document loading
//!
//! Raw JSON documents are checked at the top level only: a non-empty `id`,
//! `lexicon: 1`, and a recognized `type` on every definition. Everything
//! below that is left to the validator, which resolves refs lazily.

use super::defs::{Definition, LexiconDoc, DEFINITION_KINDS};
use super::registry::{LexiconError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

impl LexiconDoc {
    /// Parse one Lexicon document from a JSON value
    ///
    /// Applies the same checks as [`LexiconRegistry::from_values`], so a
    /// document accepted here is also accepted by the registry.
    ///
    /// [`LexiconRegistry::from_values`]: crate::LexiconRegistry::from_values
    ///
    /// # Examples
    ///
    /// ```
    /// use lexicon::LexiconDoc;
    /// use serde_json::json;
    ///
    /// let doc = LexiconDoc::from_value(&json!({
    ///     "lexicon": 1,
    ///     "id": "io.example.ping",
    ///     "defs": {"main": {"type": "query"}},
    /// }))
    /// .unwrap();
    ///
    /// assert_eq!(doc.main_def().map(|d| d.kind()), Some("query"));
    /// ```
    pub fn from_value(value: &Value) -> Result<Self> {
        let id = document_id(0, value)?;
        let defs = document_defs(&id, value)?
            .into_iter()
            .map(|(full, def)| {
                let name = full.split_once('#').map_or("main", |(_, name)| name);
                (name.to_string(), def)
            })
            .collect::<HashMap<_, _>>();

        Ok(Self {
            lexicon: 1,
            id,
            revision: value
                .get("revision")
                .and_then(Value::as_u64)
                .and_then(|r| u32::try_from(r).ok()),
            description: value
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            defs,
        })
    }

    /// Read and parse one Lexicon document from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_value(&read_json(path.as_ref())?)
    }
}

/// The document's NSID, after checking its `id` and `lexicon` fields
///
/// `index` is the document's position in the load, used when it has no id.
pub(crate) fn document_id(index: usize, value: &Value) -> Result<String> {
    let id = match value.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            return Err(LexiconError::config(format!(
                "Lexicon {} missing or invalid id field",
                index
            )))
        }
    };

    if value.get("lexicon").and_then(Value::as_u64) != Some(1) {
        return Err(LexiconError::config(format!(
            "{} lexicon field should be 1",
            id
        )));
    }

    Ok(id)
}

/// The document's definitions keyed by fully-qualified id
pub(crate) fn document_defs(nsid: &str, value: &Value) -> Result<Vec<(String, Definition)>> {
    let Some(defs) = value.get("defs").and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    defs.iter()
        .map(|(name, raw)| {
            let id = full_id(nsid, name);

            let kind = raw.get("type").and_then(Value::as_str).unwrap_or_default();
            if !DEFINITION_KINDS.contains(&kind) {
                return Err(LexiconError::config(format!(
                    "Bad type for lexicon {}: {}",
                    id, kind
                )));
            }

            let def = serde_json::from_value(raw.clone()).map_err(|e| {
                LexiconError::config(format!("Invalid definition {}: {}", id, e))
            })?;
            Ok((id, def))
        })
        .collect()
}

/// `nsid` for `main`, `nsid#name` otherwise
pub(crate) fn full_id(nsid: &str, name: &str) -> String {
    if name == "main" {
        nsid.to_string()
    } else {
        format!("{}#{}", nsid, name)
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| LexiconError::config(format!("Invalid JSON in {}: {}", path.display(), e)))
}

/// Collect every `.json` file under `path` as a raw JSON value.
///
/// Files are visited in sorted path order so that load errors are
/// reproducible.
pub(crate) fn collect_json_files(path: &Path, out: &mut Vec<Value>) -> Result<()> {
    if path.is_file() {
        out.push(read_json(path)?);
        return Ok(());
    }

    let mut entries = fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();

    for entry in entries {
        if entry.is_dir() || entry.extension().is_some_and(|ext| ext == "json") {
            collect_json_files(&entry, out)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LexiconRegistry;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_from_value_splits_names() {
        let doc = LexiconDoc::from_value(&json!({
            "lexicon": 1,
            "id": "io.example.post",
            "revision": 3,
            "defs": {
                "main": {
                    "type": "record",
                    "key": "tid",
                    "record": {"type": "object", "properties": {"text": {"type": "string"}}},
                },
                "tag": {"type": "string", "maxLength": 64},
            },
        }))
        .unwrap();

        assert_eq!(doc.id, "io.example.post");
        assert_eq!(doc.revision, Some(3));
        assert_eq!(doc.main_def().map(|d| d.kind()), Some("record"));
        assert_eq!(doc.defs.get("tag").map(|d| d.kind()), Some("string"));
    }

    #[test]
    fn test_from_value_rejects_version() {
        let err =
            LexiconDoc::from_value(&json!({"lexicon": 2, "id": "io.example.x", "defs": {}}))
                .unwrap_err();
        assert_eq!(err.to_string(), "io.example.x lexicon field should be 1");
    }

    #[test]
    fn test_from_value_rejects_bad_type() {
        let err = LexiconDoc::from_value(&json!({
            "lexicon": 1,
            "id": "io.example.x",
            "defs": {"thing": {"type": "nope"}},
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "Bad type for lexicon io.example.x#thing: nope");
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        fs::write(
            &path,
            r#"{"lexicon": 1, "id": "io.example.token", "defs": {"main": {"type": "token"}}}"#,
        )
        .unwrap();

        let doc = LexiconDoc::from_file(&path).unwrap();
        assert_eq!(doc.id, "io.example.token");

        let registry = LexiconRegistry::new([doc]).unwrap();
        assert!(registry.contains("io.example.token"));
    }

    #[test]
    fn test_registry_from_dir_recurses() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(
            dir.path().join("a.json"),
            r#"{"lexicon": 1, "id": "io.example.a", "defs": {"main": {"type": "token"}}}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("nested").join("b.json"),
            r#"{"lexicon": 1, "id": "io.example.b", "defs": {"main": {"type": "token"}}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "not a lexicon").unwrap();

        let registry = LexiconRegistry::from_dir(dir.path()).unwrap();
        assert!(registry.contains("io.example.a"));
        assert!(registry.contains("io.example.b"));
    }

    #[test]
    fn test_registry_from_dir_bad_json() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.json"), "{").unwrap();

        let err = LexiconRegistry::from_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
    }
}
