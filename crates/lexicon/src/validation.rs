//! Lexicon value validation
//!
//! [`Validator::validate`] walks a JSON value alongside the schema of one
//! slot (parameters, input, output, message, or record) of a definition,
//! recursing through refs, unions, arrays, and object properties. The first
//! violation aborts the walk.
//!
//! Two tolerances are deliberate: a union discriminator that resolves to no
//! known definition passes, and in truncate mode an over-long string is
//! shortened to its `maxGraphemes` instead of failing.
//!
//! # Example
//!
//! ```rust
//! use lexicon::{LexiconRegistry, Slot, ValidationOptions, Validator};
//! use serde_json::json;
//!
//! let registry = LexiconRegistry::from_values(vec![json!({
//!     "lexicon": 1,
//!     "id": "io.example.post",
//!     "defs": {"main": {
//!         "type": "record",
//!         "record": {
//!             "type": "object",
//!             "properties": {"text": {"type": "string", "maxGraphemes": 5}},
//!         },
//!     }},
//! })])
//! .unwrap();
//!
//! let truncating = Validator::new(registry, ValidationOptions::default().with_truncate(true));
//! let post = truncating
//!     .validate("io.example.post", Slot::Record, json!({"text": "hello world"}))
//!     .unwrap();
//! assert_eq!(post, json!({"text": "hell…"}));
//! ```

use super::defs::{Definition, LexBlob, LexBody, LexObject, LexString, LexUnion};
use super::formats::check_format;
use super::registry::LexiconRegistry;
use base64::Engine;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

/// Maximum schema nesting followed before giving up
pub const MAX_DEPTH: usize = 100;

/// Longest value repr included in error messages, in characters
const MAX_REPR_CHARS: usize = 50;

/// Errors raised by validation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A value violates its schema
    #[error("{0}")]
    Violation(Violation),

    /// The method or record being validated has no definition
    #[error("{0} not found")]
    NotFound(String),

    /// Schema nesting is too deep, usually a ref cycle
    #[error("schema nesting deeper than {MAX_DEPTH} at {0}")]
    DepthExceeded(String),
}

impl ValidationError {
    /// The violation details, if this is a schema violation
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            ValidationError::Violation(v) => Some(v),
            _ => None,
        }
    }
}

/// Result type for validation
pub type Result<T> = std::result::Result<T, ValidationError>;

/// One schema violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Fully-qualified id of the lexicon containing the failing schema
    pub lexicon: String,
    /// Type of the failing node, eg `string` or a method NSID at top level
    pub type_label: String,
    /// Field name
    pub name: String,
    /// Compact, truncated JSON repr of the offending value
    pub value: String,
    /// Human-readable reason
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lexicon != self.type_label {
            write!(f, "in {}, ", self.lexicon)?;
        }
        write!(
            f,
            "{} {} with value `{}`: {}",
            self.type_label, self.name, self.value, self.reason
        )
    }
}

/// Which part of a definition to validate against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Method query parameters
    Parameters,
    /// Query/procedure request body
    Input,
    /// Query/procedure response body
    Output,
    /// Subscription message payload
    Message,
    /// Record body
    Record,
}

impl Slot {
    /// Name used in error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Parameters => "parameters",
            Slot::Input => "input",
            Slot::Output => "output",
            Slot::Message => "message",
            Slot::Record => "record",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation mode flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Raise on violations. When false, violations are logged and skipped.
    pub strict: bool,
    /// Shorten strings longer than their `maxGraphemes` instead of failing
    pub truncate: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            strict: true,
            truncate: false,
        }
    }
}

impl ValidationOptions {
    /// Options that make validation a no-op
    pub fn disabled() -> Self {
        Self {
            strict: false,
            truncate: false,
        }
    }

    /// Set strict mode
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set truncate mode
    pub fn with_truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Whether validation does anything at all
    pub fn is_enabled(&self) -> bool {
        self.strict || self.truncate
    }
}

/// Where in the schema walk we are
#[derive(Clone, Copy)]
struct Site<'a> {
    name: &'a str,
    type_label: &'a str,
    lexicon: &'a str,
    depth: usize,
}

impl<'a> Site<'a> {
    fn child(&self, name: &'a str, type_label: &'a str, lexicon: &'a str) -> Site<'a> {
        Site {
            name,
            type_label,
            lexicon,
            depth: self.depth + 1,
        }
    }
}

/// Validates values against the definitions in a registry
///
/// Cheap to clone; the registry is shared and never mutated.
#[derive(Debug, Clone)]
pub struct Validator {
    registry: Arc<LexiconRegistry>,
    options: ValidationOptions,
}

impl Validator {
    /// Create a validator over a registry
    pub fn new(registry: LexiconRegistry, options: ValidationOptions) -> Self {
        Self::with_shared(Arc::new(registry), options)
    }

    /// Create a validator over an already shared registry
    pub fn with_shared(registry: Arc<LexiconRegistry>, options: ValidationOptions) -> Self {
        Self { registry, options }
    }

    /// The registry definitions are resolved against
    pub fn registry(&self) -> &LexiconRegistry {
        &self.registry
    }

    /// Shared handle to the registry
    pub fn shared_registry(&self) -> Arc<LexiconRegistry> {
        Arc::clone(&self.registry)
    }

    /// Validation mode flags
    pub fn options(&self) -> ValidationOptions {
        self.options
    }

    /// Validate `value` against one slot of definition `nsid`
    ///
    /// Returns the value, possibly with strings truncated. Values pass
    /// through untouched when the slot has no schema, when the slot's
    /// encoding is not JSON, or when validation is disabled.
    pub fn validate(&self, nsid: &str, slot: Slot, mut value: Value) -> Result<Value> {
        if !self.options.is_enabled() {
            return Ok(value);
        }

        let def = self
            .registry
            .get(nsid)
            .ok_or_else(|| ValidationError::NotFound(nsid.to_string()))?;

        let site = Site {
            name: slot.as_str(),
            type_label: nsid,
            lexicon: nsid,
            depth: 0,
        };

        match slot_schema(def, slot) {
            SlotSchema::None | SlotSchema::Opaque => {}
            SlotSchema::Params(object) => self.check_object(&site, &mut value, object, true)?,
            SlotSchema::Object(object) => self.check_object(&site, &mut value, object, false)?,
            SlotSchema::Def(Definition::Object(object)) => {
                self.check_object(&site, &mut value, object, false)?
            }
            SlotSchema::Def(schema) => self.check(&site, &mut value, schema)?,
        }

        Ok(value)
    }

    /// The body a method declares for `slot`, if any
    ///
    /// Only input, output, and message slots have bodies.
    pub fn declared_body(&self, nsid: &str, slot: Slot) -> Option<&LexBody> {
        match (self.registry.get(nsid)?, slot) {
            (Definition::Query(m) | Definition::Procedure(m), Slot::Input) => m.input.as_ref(),
            (Definition::Query(m) | Definition::Procedure(m), Slot::Output) => m.output.as_ref(),
            (Definition::Subscription(s), Slot::Message) => s.message.as_ref(),
            _ => None,
        }
    }

    /// Validate one subscription message payload against its frame header
    ///
    /// Event streams usually declare a union message schema and name the
    /// member in the header's `t` field rather than in the payload's
    /// `$type`. For those, `t` picks the member, resolved relative to
    /// `nsid`, and a header without `t` lets the payload through. Any other
    /// message schema is checked as [`Slot::Message`].
    pub fn validate_message(&self, nsid: &str, header: &Value, mut payload: Value) -> Result<Value> {
        if !self.options.is_enabled() {
            return Ok(payload);
        }

        let def = self
            .registry
            .get(nsid)
            .ok_or_else(|| ValidationError::NotFound(nsid.to_string()))?;

        let SlotSchema::Def(Definition::Union(union)) = slot_schema(def, Slot::Message) else {
            return self.validate(nsid, Slot::Message, payload);
        };

        let Some(member) = header.get("t").and_then(Value::as_str).filter(|t| !t.is_empty()) else {
            tracing::debug!("{} message header has no t, not validating payload", nsid);
            return Ok(payload);
        };

        let site = Site {
            name: Slot::Message.as_str(),
            type_label: nsid,
            lexicon: nsid,
            depth: 0,
        };
        self.check_union_member(&site, &mut payload, union, member)?;
        Ok(payload)
    }

    fn fail(&self, site: &Site<'_>, value: &Value, reason: impl Into<String>) -> Result<()> {
        let violation = Violation {
            lexicon: site.lexicon.to_string(),
            type_label: site.type_label.to_string(),
            name: site.name.to_string(),
            value: repr(value),
            reason: reason.into(),
        };

        if self.options.strict {
            Err(ValidationError::Violation(violation))
        } else {
            tracing::debug!("Ignoring invalid value: {}", violation);
            Ok(())
        }
    }

    fn unexpected_type(&self, site: &Site<'_>, value: &Value) -> Result<()> {
        self.fail(site, value, format!("has unexpected type {}", json_type(value)))
    }

    fn check(&self, site: &Site<'_>, value: &mut Value, def: &Definition) -> Result<()> {
        if site.depth > MAX_DEPTH {
            return Err(ValidationError::DepthExceeded(site.lexicon.to_string()));
        }

        if let Some(expected) = def.const_value() {
            if value != expected {
                self.fail(site, value, format!("is not const value {}", expected))?;
            }
        }
        if let Some(allowed) = def.enum_values() {
            if !allowed.contains(value) {
                self.fail(site, value, "is not one of enum values")?;
            }
        }

        match def {
            Definition::Unknown(_) => {
                let discriminator = value
                    .get("$type")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string);
                match discriminator {
                    Some(type_) => self.check_ref(site, value, &type_),
                    None => Ok(()),
                }
            }

            Definition::Null(_) => {
                if value.is_null() {
                    Ok(())
                } else {
                    self.unexpected_type(site, value)
                }
            }

            Definition::Boolean(_) => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    self.unexpected_type(site, value)
                }
            }

            Definition::Integer(int) => {
                if !(value.is_i64() || value.is_u64()) {
                    return self.unexpected_type(site, value);
                }
                let above_i64 = value.as_i64().is_none();
                let n = value.as_i64().unwrap_or(i64::MAX);
                if let Some(minimum) = int.minimum {
                    if !above_i64 && n < minimum {
                        self.fail(site, value, format!("is lower than minimum {}", minimum))?;
                    }
                }
                if let Some(maximum) = int.maximum {
                    if above_i64 || n > maximum {
                        self.fail(site, value, format!("is higher than maximum {}", maximum))?;
                    }
                }
                Ok(())
            }

            Definition::Number(num) => {
                let Some(n) = value.as_f64() else {
                    return self.unexpected_type(site, value);
                };
                if let Some(minimum) = num.minimum {
                    if n < minimum {
                        self.fail(site, value, format!("is lower than minimum {}", minimum))?;
                    }
                }
                if let Some(maximum) = num.maximum {
                    if n > maximum {
                        self.fail(site, value, format!("is higher than maximum {}", maximum))?;
                    }
                }
                Ok(())
            }

            Definition::String(string) => self.check_string(site, value, string),

            Definition::Bytes(bytes) => {
                let Some(encoded) = value.get("$bytes").and_then(Value::as_str) else {
                    return self.unexpected_type(site, value);
                };
                let Ok(decoded) = decode_base64(encoded) else {
                    return self.fail(site, value, "has invalid base64 $bytes");
                };
                self.check_length(site, value, decoded.len(), bytes.min_length, bytes.max_length)
            }

            Definition::CidLink(_) => {
                let Some(link) = value.get("$link").and_then(Value::as_str) else {
                    return self.unexpected_type(site, value);
                };
                if cid::Cid::try_from(link).is_err() {
                    return self.fail(site, value, format!("has invalid CID {}", link));
                }
                Ok(())
            }

            Definition::Array(array) => {
                let Some(len) = value.as_array().map(Vec::len) else {
                    return self.unexpected_type(site, value);
                };
                self.check_length(site, value, len, array.min_length, array.max_length)?;

                let item_site = site.child(site.name, label(&array.items), site.lexicon);
                if let Value::Array(items) = value {
                    for item in items.iter_mut() {
                        self.check(&item_site, item, &array.items)?;
                    }
                }
                Ok(())
            }

            Definition::Object(object) => self.check_typed_object(site, value, object, false),
            Definition::Params(object) => self.check_typed_object(site, value, object, true),
            Definition::Record(record) => {
                self.check_typed_object(site, value, &record.record, false)
            }

            Definition::Blob(blob) => self.check_blob(site, value, blob),

            Definition::Token(_) => {
                if value.as_str() != Some(site.lexicon) {
                    self.fail(site, value, format!("is not token {}", site.lexicon))
                } else if !self.registry.contains(site.lexicon) {
                    self.fail(site, value, "not found")
                } else {
                    Ok(())
                }
            }

            Definition::Ref(reference) => self.check_ref(site, value, &reference.target),

            Definition::Union(union) => {
                let discriminator = match &*value {
                    Value::Object(map) => match map.get("$type").and_then(Value::as_str) {
                        Some(type_) if !type_.is_empty() => type_.to_string(),
                        _ => return self.fail(site, value, "missing $type"),
                    },
                    Value::String(token) => token.clone(),
                    _ => return self.fail(site, value, "is invalid"),
                };
                self.check_union_member(site, value, union, &discriminator)
            }

            Definition::Query(_) | Definition::Procedure(_) | Definition::Subscription(_) => {
                self.fail(site, value, format!("cannot be a {} value", def.kind()))
            }
        }
    }

    fn check_union_member(
        &self,
        site: &Site<'_>,
        value: &mut Value,
        union: &LexUnion,
        discriminator: &str,
    ) -> Result<()> {
        let discriminator = self.registry.resolve_ref(site.lexicon, discriminator);

        if union.closed {
            let refs: Vec<String> = union
                .refs
                .iter()
                .map(|r| self.registry.resolve_ref(site.lexicon, r))
                .collect();
            if !refs.contains(&discriminator) {
                return self.fail(
                    site,
                    value,
                    format!("{} isn't one of [{}]", discriminator, refs.join(", ")),
                );
            }
        }

        let Some(target) = self.registry.get(&discriminator) else {
            tracing::debug!("Skipping unknown type {}", discriminator);
            return Ok(());
        };
        let target_site = site.child(site.name, label(target), &discriminator);
        self.check(&target_site, value, target)
    }

    fn check_ref(&self, site: &Site<'_>, value: &mut Value, reference: &str) -> Result<()> {
        let (id, target) = match self.registry.lookup(site.lexicon, reference) {
            Ok(found) => found,
            Err(e) => return self.fail(site, value, e.to_string()),
        };

        let target_site = site.child(site.name, label(target), &id);
        self.check(&target_site, value, target)
    }

    fn check_length(
        &self,
        site: &Site<'_>,
        value: &Value,
        len: usize,
        min: Option<usize>,
        max: Option<usize>,
    ) -> Result<()> {
        if let Some(max) = max {
            if len > max {
                return self.fail(site, value, format!("is longer ({}) than maxLength {}", len, max));
            }
        }
        if let Some(min) = min {
            if len < min {
                return self.fail(site, value, format!("is shorter ({}) than minLength {}", len, min));
            }
        }
        Ok(())
    }

    fn check_string(&self, site: &Site<'_>, value: &mut Value, def: &LexString) -> Result<()> {
        if self.options.truncate {
            if let (Some(max), Value::String(s)) = (def.max_graphemes, &mut *value) {
                if let Some(truncated) = truncate_graphemes(s, max) {
                    *s = truncated;
                }
            }
        }

        let Some(s) = value.as_str() else {
            return self.unexpected_type(site, value);
        };

        // length limits are in UTF-8 bytes, not characters
        self.check_length(site, value, s.len(), def.min_length, def.max_length)?;

        if let Some(format) = &def.format {
            if let Err(e) = check_format(s, format) {
                self.fail(site, value, e.to_string())?;
            }
        }

        if def.min_graphemes.is_some() || def.max_graphemes.is_some() {
            let count = s.graphemes(true).count();
            if let Some(min) = def.min_graphemes {
                if count < min {
                    self.fail(site, value, format!("is shorter than minGraphemes {}", min))?;
                }
            }
            if let Some(max) = def.max_graphemes {
                if count > max {
                    self.fail(site, value, format!("is longer than maxGraphemes {}", max))?;
                }
            }
        }

        Ok(())
    }

    fn check_typed_object(
        &self,
        site: &Site<'_>,
        value: &mut Value,
        object: &LexObject,
        params: bool,
    ) -> Result<()> {
        if !value.is_object() {
            return self.unexpected_type(site, value);
        }
        self.check_object(site, value, object, params)
    }

    fn check_object(
        &self,
        site: &Site<'_>,
        value: &mut Value,
        object: &LexObject,
        params: bool,
    ) -> Result<()> {
        if !value.is_object() {
            return self.fail(site, value, "should be object");
        }

        for (prop_name, prop_def) in &object.properties {
            let is_null = match value.get(prop_name) {
                None => {
                    if object.required.contains(prop_name) {
                        self.fail(site, value, format!("missing required property {}", prop_name))?;
                    }
                    continue;
                }
                Some(prop_value) => prop_value.is_null(),
            };

            if is_null {
                if !matches!(prop_def, Definition::Null(_)) && !object.nullable.contains(prop_name) {
                    self.fail(site, value, format!("property {} is not nullable", prop_name))?;
                }
                continue;
            }

            let prop_site = site.child(prop_name, label(prop_def), site.lexicon);
            if let Some(prop_value) = value.get_mut(prop_name) {
                self.check(&prop_site, prop_value, prop_def)?;
            }
        }

        // parameters are a closed set; other objects tolerate unknown keys
        if params {
            if let Value::Object(map) = &*value {
                let unknown: Vec<&str> = map
                    .keys()
                    .filter(|k| !object.properties.contains_key(*k))
                    .map(String::as_str)
                    .collect();
                if !unknown.is_empty() {
                    let reason = format!("unknown parameters: {}", unknown.join(", "));
                    self.fail(site, value, reason)?;
                }
            }
        }

        Ok(())
    }

    fn check_blob(&self, site: &Site<'_>, value: &mut Value, blob: &LexBlob) -> Result<()> {
        if !value.is_object() {
            return self.unexpected_type(site, value);
        }
        self.check_object(site, value, blob_shape(), false)?;

        if let (Some(max_size), Some(size)) = (blob.max_size, value.get("size").and_then(Value::as_u64)) {
            if size > max_size {
                self.fail(site, value, format!("has size {} over maxSize {}", size, max_size))?;
            }
        }

        if let Some(accept) = &blob.accept {
            let mime_type = value.get("mimeType").and_then(Value::as_str).unwrap_or_default();
            if !is_accepted_mime_type(mime_type, accept) {
                let reason = format!(
                    "MIME type {} not in accept types [{}]",
                    mime_type,
                    accept.join(", ")
                );
                self.fail(site, value, reason)?;
            }
        }

        Ok(())
    }
}

/// Whether a MIME type matches any pattern in a blob's `accept` list
///
/// Patterns are exact types, `type/*`, or `*/*`. An empty list accepts
/// everything.
///
/// # Examples
///
/// ```
/// use lexicon::validation::is_accepted_mime_type;
///
/// let accept = vec!["image/*".to_string(), "video/mp4".to_string()];
/// assert!(is_accepted_mime_type("image/png", &accept));
/// assert!(is_accepted_mime_type("video/mp4", &accept));
/// assert!(!is_accepted_mime_type("video/webm", &accept));
/// assert!(is_accepted_mime_type("anything/else", &[]));
/// ```
pub fn is_accepted_mime_type(mime_type: &str, accept: &[String]) -> bool {
    if accept.is_empty() || accept.iter().any(|a| a == "*/*") {
        return true;
    }
    if mime_type.is_empty() {
        return false;
    }

    let wildcard = match mime_type.split_once('/') {
        Some((major, _)) => format!("{}/*", major),
        None => format!("{}/*", mime_type),
    };
    accept.iter().any(|a| a == mime_type || *a == wildcard)
}

enum SlotSchema<'a> {
    None,
    Opaque,
    Params(&'a LexObject),
    Object(&'a LexObject),
    Def(&'a Definition),
}

fn slot_schema(def: &Definition, slot: Slot) -> SlotSchema<'_> {
    fn body(body: Option<&LexBody>) -> SlotSchema<'_> {
        match body {
            Some(body) if !body.is_json() => SlotSchema::Opaque,
            Some(body) => body
                .schema
                .as_deref()
                .map_or(SlotSchema::None, SlotSchema::Def),
            None => SlotSchema::None,
        }
    }

    match (def, slot) {
        (Definition::Query(m) | Definition::Procedure(m), Slot::Parameters) => {
            m.parameters.as_ref().map_or(SlotSchema::None, SlotSchema::Params)
        }
        (Definition::Subscription(s), Slot::Parameters) => {
            s.parameters.as_ref().map_or(SlotSchema::None, SlotSchema::Params)
        }
        (Definition::Query(m) | Definition::Procedure(m), Slot::Input) => body(m.input.as_ref()),
        (Definition::Query(m) | Definition::Procedure(m), Slot::Output) => body(m.output.as_ref()),
        (Definition::Subscription(s), Slot::Message) => body(s.message.as_ref()),
        (Definition::Record(r), Slot::Record) => SlotSchema::Object(&r.record),
        (other, Slot::Record) if !other.is_method() => SlotSchema::Def(other),
        _ => SlotSchema::None,
    }
}

/// Type label of a node in error messages; records read as their object
fn label(def: &Definition) -> &'static str {
    match def {
        Definition::Record(_) => "object",
        other => other.kind(),
    }
}

fn blob_shape() -> &'static LexObject {
    static SHAPE: OnceLock<LexObject> = OnceLock::new();
    SHAPE.get_or_init(|| {
        LexObject::new()
            .with_property("ref", Definition::CidLink(Default::default()))
            .with_property(
                "mimeType",
                Definition::String(LexString {
                    min_length: Some(1),
                    ..Default::default()
                }),
            )
            .with_property(
                "size",
                Definition::Integer(super::defs::LexInteger {
                    minimum: Some(1),
                    ..Default::default()
                }),
            )
            .with_required("ref")
            .with_required("mimeType")
            .with_required("size")
    })
}

/// Shorten `s` to `max - 1` graphemes plus an ellipsis, if it is longer than `max`
pub(crate) fn truncate_graphemes(s: &str, max: usize) -> Option<String> {
    if s.graphemes(true).count() <= max {
        return None;
    }
    let mut truncated: String = s.graphemes(true).take(max.saturating_sub(1)).collect();
    truncated.push('…');
    Some(truncated)
}

fn decode_base64(encoded: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(encoded.trim_end_matches('='))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn repr(value: &Value) -> String {
    let full = value.to_string();
    if full.chars().count() > MAX_REPR_CHARS {
        let mut short: String = full.chars().take(MAX_REPR_CHARS).collect();
        short.push('…');
        short
    } else {
        full
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures;
    use serde_json::json;

    fn message(result: Result<Value>) -> String {
        result.unwrap_err().to_string()
    }

    // =========================================================================
    // Entry point
    // =========================================================================

    #[test]
    fn test_validate_unknown_nsid() {
        let validator = fixtures::validator();
        let err = validator
            .validate("io.un.known", Slot::Input, json!({}))
            .unwrap_err();
        assert_eq!(err, ValidationError::NotFound("io.un.known".to_string()));
    }

    #[test]
    fn test_disabled_is_identity() {
        let validator = Validator::new(fixtures::registry(), ValidationOptions::disabled());
        let value = json!({"bar": "not a number"});
        assert_eq!(
            validator.validate("io.example.procedure", Slot::Input, value.clone()).unwrap(),
            value
        );
        // even unknown methods pass through
        assert!(validator.validate("io.un.known", Slot::Input, json!(1)).is_ok());
    }

    #[test]
    fn test_round_trip_identity() {
        let validator = fixtures::validator();
        let value = json!({"foo": "xyz", "bar": 3});
        assert_eq!(
            validator.validate("io.example.procedure", Slot::Input, value.clone()).unwrap(),
            value
        );
    }

    #[test]
    fn test_missing_required_property_message() {
        let validator = fixtures::validator();
        assert_eq!(
            message(validator.validate("io.example.procedure", Slot::Input, json!({}))),
            "io.example.procedure input with value `{}`: missing required property foo"
        );
        assert_eq!(
            message(validator.validate("io.example.procedure", Slot::Input, json!({"bar": 3}))),
            "io.example.procedure input with value `{\"bar\":3}`: missing required property foo"
        );
    }

    #[test]
    fn test_bad_property_type_message() {
        let validator = fixtures::validator();
        assert_eq!(
            message(validator.validate(
                "io.example.procedure",
                Slot::Input,
                json!({"foo": 2, "bar": 3})
            )),
            "in io.example.procedure, string foo with value `2`: has unexpected type integer"
        );
    }

    #[test]
    fn test_not_nullable_message() {
        let validator = fixtures::validator();
        assert_eq!(
            message(validator.validate(
                "io.example.query",
                Slot::Output,
                json!({"foo": null, "bar": 5})
            )),
            "io.example.query output with value `{\"foo\":null,\"bar\":5}`: property foo is not nullable"
        );
    }

    #[test]
    fn test_value_repr_is_truncated() {
        let validator = fixtures::validator();
        let long = "x".repeat(80);
        let err = validator
            .validate("io.example.procedure", Slot::Input, json!({"bar": long}))
            .unwrap_err();

        let violation = err.violation().unwrap();
        assert_eq!(violation.value.chars().count(), MAX_REPR_CHARS + 1);
        assert!(violation.value.ends_with('…'));
    }

    #[test]
    fn test_slot_without_schema_passes() {
        let validator = fixtures::validator();
        assert!(validator
            .validate("io.example.noParamsInputOutput", Slot::Input, json!({"any": "thing"}))
            .is_ok());
        assert!(validator
            .validate("io.example.noParamsInputOutput", Slot::Parameters, json!({"utm": "x"}))
            .is_ok());
    }

    #[test]
    fn test_non_json_encoding_passes_through() {
        let validator = fixtures::validator();
        let value = json!("raw");
        assert_eq!(
            validator.validate("io.example.encodings", Slot::Input, value.clone()).unwrap(),
            value
        );
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    #[test]
    fn test_params_reject_unknown_keys() {
        let validator = fixtures::validator();
        assert_eq!(
            message(validator.validate(
                "io.example.params",
                Slot::Parameters,
                json!({"bar": 1, "extra": "x"})
            )),
            "io.example.params parameters with value `{\"bar\":1,\"extra\":\"x\"}`: unknown parameters: extra"
        );
    }

    #[test]
    fn test_objects_tolerate_unknown_keys() {
        let validator = fixtures::validator();
        assert!(validator
            .validate("io.example.procedure", Slot::Input, json!({"foo": "a", "extra": 1}))
            .is_ok());
    }

    #[test]
    fn test_params_missing_required() {
        let validator = fixtures::validator();
        assert_eq!(
            message(validator.validate("io.example.params", Slot::Parameters, json!({"foo": "a"}))),
            "io.example.params parameters with value `{\"foo\":\"a\"}`: missing required property bar"
        );
    }

    // =========================================================================
    // Records, refs, arrays
    // =========================================================================

    #[test]
    fn test_record_pass() {
        let validator = fixtures::validator();
        for value in [
            json!({"baz": 3, "biff": {"baj": "foo"}}),
            json!({"baz": 3, "biff": {}}),
            json!({"baz": 3}),
        ] {
            assert!(validator.validate("io.example.record", Slot::Record, value).is_ok());
        }
    }

    #[test]
    fn test_record_fail() {
        let validator = fixtures::validator();
        for value in [
            json!({"baz": "x", "biff": {"baj": "foo"}}),
            json!({"baz": 3, "biff": 4}),
            json!({"biff": {"baj": "foo"}}),
            json!({"baz": 3, "biff": {"baj": 5}}),
        ] {
            assert!(
                validator.validate("io.example.record", Slot::Record, value.clone()).is_err(),
                "{} should fail",
                value
            );
        }
    }

    #[test]
    fn test_ref_error_names_resolved_lexicon() {
        let validator = fixtures::validator();
        assert_eq!(
            message(validator.validate(
                "io.example.record",
                Slot::Record,
                json!({"baz": 3, "biff": {"baj": 5}})
            )),
            "in io.example.record#biff, string baj with value `5`: has unexpected type integer"
        );
    }

    fn kitchen_sink() -> Value {
        json!({
            "array": ["x", "y"],
            "boolean": true,
            "integer": 3,
            "string": "z",
            "datetime": "1985-04-12T23:20:50Z",
            "object": {
                "array": ["x", "y"],
                "boolean": true,
                "integer": 3,
                "string": "z",
                "subobject": {"boolean": false},
            },
            "bytes": {"$bytes": "AQID"},
            "link": {"$link": "bafyreiblaotetvwobe7cu2uqvnddr6ew2q3cu75qsoweulzku2egca4dxq"},
            "null": null,
        })
    }

    #[test]
    fn test_kitchen_sink_pass() {
        let validator = fixtures::validator();
        assert!(validator
            .validate("io.example.kitchenSink", Slot::Record, kitchen_sink())
            .is_ok());
    }

    #[test]
    fn test_kitchen_sink_violations() {
        let validator = fixtures::validator();
        let cases = [
            ("/array", json!(["a", "b", "c", "d"]), "is longer (4) than maxLength 3"),
            ("/array", json!(["a", 1]), "has unexpected type integer"),
            ("/integer", json!(11), "is higher than maximum 10"),
            ("/integer", json!(-1), "is lower than minimum 0"),
            ("/integer", json!(1.5), "has unexpected type number"),
            ("/boolean", json!("true"), "has unexpected type string"),
            ("/string", json!(""), "is shorter (0) than minLength 1"),
            ("/string", json!("ééééé"), "is longer (10) than maxLength 8"),
            (
                "/datetime",
                json!("yesterday"),
                "yesterday is invalid for format datetime",
            ),
            ("/bytes", json!({"$bytes": "AQIDBAU"}), "is longer (5) than maxLength 4"),
            ("/bytes", json!("AQID"), "has unexpected type string"),
            ("/link", json!({"$link": "nope"}), "has invalid CID nope"),
            ("/null", json!(false), "has unexpected type boolean"),
            ("/object/subobject", json!({}), "missing required property boolean"),
        ];

        for (pointer, bad, reason) in cases {
            let mut value = kitchen_sink();
            *value.pointer_mut(pointer).unwrap() = bad;

            let err = validator
                .validate("io.example.kitchenSink", Slot::Record, value)
                .unwrap_err();
            assert_eq!(err.violation().unwrap().reason, reason, "at {}", pointer);
        }
    }

    #[test]
    fn test_object_array() {
        let validator = fixtures::validator();
        assert!(validator
            .validate("io.example.objectArray", Slot::Record, json!({"foo": []}))
            .is_ok());
        assert!(validator
            .validate(
                "io.example.objectArray",
                Slot::Record,
                json!({"foo": [{"bar": 3, "baj": "foo"}, {"bar": 4}]})
            )
            .is_ok());
        assert!(validator
            .validate("io.example.objectArray", Slot::Record, json!({"foo": [{"bar": "x"}]}))
            .is_err());
        assert!(validator
            .validate("io.example.objectArray", Slot::Record, json!({"foo": [{"baz": "x"}]}))
            .is_err());
    }

    #[test]
    fn test_ref_array() {
        let validator = fixtures::validator();
        assert!(validator
            .validate(
                "io.example.refArray",
                Slot::Record,
                json!({"foo": [{"baz": 5}, {"baz": 5, "biff": {"baj": "ok"}}]})
            )
            .is_ok());
        assert!(validator
            .validate("io.example.refArray", Slot::Record, json!({"foo": [{"biff": {}}]}))
            .is_err());
    }

    #[test]
    fn test_ref_cycle_is_bounded() {
        let validator = fixtures::validator();
        let err = validator
            .validate("io.example.cycle", Slot::Record, json!({}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::DepthExceeded(_)));
    }

    // =========================================================================
    // Required / nullable
    // =========================================================================

    #[test]
    fn test_nullable() {
        let validator = fixtures::validator();
        assert!(validator
            .validate("io.example.nullable", Slot::Record, json!({"maybe": null}))
            .is_ok());
        assert_eq!(
            validator
                .validate("io.example.nullable", Slot::Record, json!({"never": null}))
                .unwrap_err()
                .violation()
                .unwrap()
                .reason,
            "property never is not nullable"
        );
        assert!(validator
            .validate("io.example.nullable", Slot::Record, json!({}))
            .is_ok());
    }

    #[test]
    fn test_required_invariant() {
        let validator = fixtures::validator();
        let registry = validator.registry();
        let Some(Definition::Record(record)) = registry.get("io.example.kitchenSink") else {
            panic!("kitchenSink should be a record");
        };

        for name in record.record.properties.keys() {
            let mut value = kitchen_sink();
            value.as_object_mut().unwrap().remove(name);
            let result = validator.validate("io.example.kitchenSink", Slot::Record, value);
            assert_eq!(
                result.is_err(),
                record.record.required.contains(name),
                "removing {}",
                name
            );
        }
    }

    // =========================================================================
    // Unknown and unions
    // =========================================================================

    #[test]
    fn test_unknown_primitive() {
        let validator = fixtures::validator();
        assert!(validator
            .validate("io.example.unknown", Slot::Record, json!({"unknown": 3}))
            .is_ok());
    }

    #[test]
    fn test_unknown_with_type() {
        let validator = fixtures::validator();
        assert!(validator
            .validate(
                "io.example.unknown",
                Slot::Record,
                json!({"unknown": {"$type": "io.example.kitchenSink#subobject", "boolean": false}})
            )
            .is_ok());
        assert!(validator
            .validate(
                "io.example.unknown",
                Slot::Record,
                json!({"unknown": {"$type": "io.example.kitchenSink#subobject", "boolean": "xyz"}})
            )
            .is_err());
    }

    #[test]
    fn test_unknown_with_record_type() {
        let validator = fixtures::validator();
        assert!(validator
            .validate(
                "io.example.unknown",
                Slot::Record,
                json!({"unknown": {"$type": "io.example.record", "baz": 5}})
            )
            .is_ok());
        assert!(validator
            .validate(
                "io.example.unknown",
                Slot::Record,
                json!({"unknown": {"$type": "io.example.record"}})
            )
            .is_err());
    }

    #[test]
    fn test_open_union_members() {
        let validator = fixtures::validator();
        assert!(validator
            .validate(
                "io.example.union",
                Slot::Record,
                json!({"open": {"$type": "io.example.kitchenSink#subobject", "boolean": true}})
            )
            .is_ok());
        assert!(validator
            .validate("io.example.union", Slot::Record, json!({"open": "io.example.token"}))
            .is_ok());
        assert!(validator
            .validate(
                "io.example.union",
                Slot::Record,
                json!({"open": {"$type": "io.example.kitchenSink#subobject", "boolean": 1}})
            )
            .is_err());
    }

    #[test]
    fn test_union_unknown_member_passes_open_fails_closed() {
        let validator = fixtures::validator();
        let unknown = json!({"$type": "io.example.fromTheFuture", "x": 1});

        assert!(validator
            .validate("io.example.union", Slot::Record, json!({"open": unknown.clone()}))
            .is_ok());

        let err = validator
            .validate("io.example.union", Slot::Record, json!({"closed": unknown}))
            .unwrap_err();
        assert_eq!(
            err.violation().unwrap().reason,
            "io.example.fromTheFuture isn't one of [io.example.kitchenSink#subobject, io.example.union#local]"
        );
    }

    #[test]
    fn test_closed_union_local_ref() {
        let validator = fixtures::validator();
        assert!(validator
            .validate(
                "io.example.union",
                Slot::Record,
                json!({"closed": {"$type": "io.example.union#local", "n": 1}})
            )
            .is_ok());
        assert!(validator
            .validate(
                "io.example.union",
                Slot::Record,
                json!({"closed": {"$type": "io.example.union#local"}})
            )
            .is_err());
    }

    #[test]
    fn test_union_shape_errors() {
        let validator = fixtures::validator();
        let reason = |value: Value| {
            validator
                .validate("io.example.union", Slot::Record, json!({"open": value}))
                .unwrap_err()
                .violation()
                .unwrap()
                .reason
                .clone()
        };

        assert_eq!(reason(json!({"boolean": true})), "missing $type");
        assert_eq!(reason(json!(5)), "is invalid");
    }

    #[test]
    fn test_union_array() {
        let validator = fixtures::validator();
        assert!(validator
            .validate(
                "io.example.unionArray",
                Slot::Record,
                json!({"items": [
                    {"$type": "io.example.kitchenSink#subobject", "boolean": true},
                    {"$type": "io.example.unknownThing"},
                ]})
            )
            .is_ok());
    }

    #[test]
    fn test_declared_body() {
        let validator = fixtures::validator();
        let body = |nsid, slot| validator.declared_body(nsid, slot).map(LexBody::is_json);

        assert_eq!(body("io.example.echo", Slot::Input), Some(true));
        assert_eq!(body("io.example.encodings", Slot::Output), Some(false));
        assert_eq!(body("io.example.query", Slot::Input), None);
        assert_eq!(body("io.example.subscribe", Slot::Message), Some(true));
        assert_eq!(body("io.example.echo", Slot::Parameters), None);
        assert_eq!(body("io.un.known", Slot::Input), None);
    }

    #[test]
    fn test_message_union_member_from_header() {
        let validator = fixtures::validator();
        let commit = json!({"seq": 1, "repo": "did:plc:abc"});

        assert_eq!(
            validator
                .validate_message("io.example.subscribeRepos", &json!({"op": 1, "t": "#commit"}), commit.clone())
                .unwrap(),
            commit
        );

        // header picks the member, so a commit payload fails as an identity
        let err = validator
            .validate_message("io.example.subscribeRepos", &json!({"op": 1, "t": "#identity"}), commit)
            .unwrap_err();
        assert_eq!(err.violation().unwrap().reason, "missing required property did");

        let err = validator
            .validate_message(
                "io.example.subscribeRepos",
                &json!({"op": 1, "t": "#commit"}),
                json!({"seq": "one", "repo": "did:plc:abc"}),
            )
            .unwrap_err();
        assert_eq!(err.violation().unwrap().name, "seq");
    }

    #[test]
    fn test_message_union_without_header_type_passes() {
        let validator = fixtures::validator();
        let payload = json!({"seq": 1});

        assert_eq!(
            validator
                .validate_message("io.example.subscribeRepos", &json!({"op": 1}), payload.clone())
                .unwrap(),
            payload
        );
        // unknown members pass, as in any open union
        assert!(validator
            .validate_message("io.example.subscribeRepos", &json!({"op": 1, "t": "#handle"}), payload)
            .is_ok());
    }

    #[test]
    fn test_message_object_schema_ignores_header() {
        let validator = fixtures::validator();
        assert!(validator
            .validate_message("io.example.subscribe", &json!({"op": 1, "t": "#x"}), json!({"num": 3}))
            .is_ok());
        assert!(validator
            .validate_message("io.example.subscribe", &json!({"op": 1}), json!({"num": "3"}))
            .is_err());
    }

    #[test]
    fn test_token_must_match_its_id() {
        let validator = fixtures::validator();
        let err = validator
            .validate("io.example.union", Slot::Record, json!({"open": "io.example.record"}))
            .unwrap_err();
        assert_eq!(err.violation().unwrap().reason, "has unexpected type string");
    }

    // =========================================================================
    // Strings and truncation
    // =========================================================================

    #[test]
    fn test_grapheme_boundary() {
        let validator = fixtures::validator();
        let check = |s: &str| {
            validator.validate("io.example.graphemes", Slot::Record, json!({"string": s}))
        };

        // flags are multi-codepoint graphemes
        assert!(check("🇨🇾🇬🇭").is_ok());
        assert!(check("🇨🇾🇬🇭🇨🇾").is_ok());
        assert_eq!(
            check("🇨🇾🇬🇭🇨🇾🇬🇭").unwrap_err().violation().unwrap().reason,
            "is longer than maxGraphemes 3"
        );
        assert_eq!(
            check("a").unwrap_err().violation().unwrap().reason,
            "is shorter than minGraphemes 2"
        );
    }

    #[test]
    fn test_truncate() {
        let validator = fixtures::truncating_validator();
        for (input, expected) in [("short", "short"), ("too many graphemes", "too many …")] {
            assert_eq!(
                validator
                    .validate("io.example.stringLength", Slot::Record, json!({"string": input}))
                    .unwrap(),
                json!({"string": expected})
            );
        }
    }

    #[test]
    fn test_truncate_through_ref() {
        let validator = fixtures::truncating_validator();
        assert_eq!(
            validator
                .validate(
                    "io.example.outer",
                    Slot::Record,
                    json!({"str": {"string": "too many graphemes"}})
                )
                .unwrap(),
            json!({"str": {"string": "too many …"}})
        );
    }

    #[test]
    fn test_truncate_boundary_and_idempotence() {
        let validator = fixtures::truncating_validator();
        let validate = |s: &str| {
            validator
                .validate("io.example.stringLength", Slot::Record, json!({"string": s}))
                .unwrap()["string"]
                .as_str()
                .unwrap()
                .to_string()
        };

        assert_eq!(validate("0123456789"), "0123456789");

        let once = validate("0123456789a");
        assert_eq!(once, "012345678…");
        assert_eq!(once.graphemes(true).count(), 10);
        assert_eq!(validate(&once), once);
    }

    #[test]
    fn test_without_truncate_long_string_fails() {
        let validator = fixtures::validator();
        assert!(validator
            .validate(
                "io.example.stringLength",
                Slot::Record,
                json!({"string": "too many graphemes"})
            )
            .is_err());
    }

    #[test]
    fn test_non_strict_truncates_but_never_fails() {
        let validator = Validator::new(
            fixtures::registry(),
            ValidationOptions::disabled().with_truncate(true),
        );
        assert_eq!(
            validator
                .validate(
                    "io.example.stringLength",
                    Slot::Record,
                    json!({"string": "too many graphemes", "other": 1})
                )
                .unwrap(),
            json!({"string": "too many …", "other": 1})
        );
        assert!(validator
            .validate("io.example.record", Slot::Record, json!({"baz": "x"}))
            .is_ok());
    }

    // =========================================================================
    // const, enum, formats
    // =========================================================================

    #[test]
    fn test_const_and_enum() {
        let validator = fixtures::validator();
        let reason = |value: Value| {
            validator
                .validate("io.example.constraints", Slot::Record, value)
                .unwrap_err()
                .violation()
                .unwrap()
                .reason
                .clone()
        };

        assert!(validator
            .validate(
                "io.example.constraints",
                Slot::Record,
                json!({"constant": "fixed", "choice": 2})
            )
            .is_ok());
        assert_eq!(reason(json!({"constant": "moved"})), "is not const value \"fixed\"");
        assert_eq!(reason(json!({"choice": 4})), "is not one of enum values");
    }

    #[test]
    fn test_unknown_format_fails_closed() {
        let validator = fixtures::validator();
        assert_eq!(
            validator
                .validate("io.example.constraints", Slot::Record, json!({"format": "red"}))
                .unwrap_err()
                .violation()
                .unwrap()
                .reason,
            "unknown format color"
        );
    }

    #[test]
    fn test_format_error_is_wrapped_with_field() {
        let validator = fixtures::validator();
        assert_eq!(
            message(validator.validate(
                "io.example.constraints",
                Slot::Record,
                json!({"did": "did:plc:"})
            )),
            "in io.example.constraints, string did with value `\"did:plc:\"`: did:plc: is invalid for format did"
        );
    }

    // =========================================================================
    // Blobs
    // =========================================================================

    fn blob(mime_type: &str, size: u64) -> Value {
        json!({
            "$type": "blob",
            "ref": {"$link": "bafyreiblaotetvwobe7cu2uqvnddr6ew2q3cu75qsoweulzku2egca4dxq"},
            "mimeType": mime_type,
            "size": size,
        })
    }

    #[test]
    fn test_blob() {
        let validator = fixtures::validator();
        let reason = |value: Value| {
            validator
                .validate("io.example.blob", Slot::Record, json!({"image": value}))
                .unwrap_err()
                .violation()
                .unwrap()
                .reason
                .clone()
        };

        assert!(validator
            .validate("io.example.blob", Slot::Record, json!({"image": blob("image/png", 10)}))
            .is_ok());
        assert!(validator
            .validate("io.example.blob", Slot::Record, json!({"any": blob("text/plain", 10)}))
            .is_ok());

        assert_eq!(reason(blob("image/png", 1001)), "has size 1001 over maxSize 1000");
        assert_eq!(
            reason(blob("video/mp4", 10)),
            "MIME type video/mp4 not in accept types [image/*]"
        );
        assert_eq!(reason(blob("image/png", 0)), "is lower than minimum 1");
        assert_eq!(reason(json!({"mimeType": "image/png"})), "missing required property ref");
        assert_eq!(reason(json!("blob")), "has unexpected type string");
    }

    #[test]
    fn test_mime_types() {
        let accept = vec!["image/*".to_string(), "video/mp4".to_string()];
        assert!(is_accepted_mime_type("image/jpeg", &accept));
        assert!(is_accepted_mime_type("video/mp4", &accept));
        assert!(!is_accepted_mime_type("video/webm", &accept));
        assert!(!is_accepted_mime_type("", &accept));
        assert!(is_accepted_mime_type("x/y", &["*/*".to_string()]));
        assert!(is_accepted_mime_type("x/y", &[]));
    }
}
