//! Lexicon definition model
//!
//! Every named entry in a Lexicon document's `defs` map deserializes into a
//! [`Definition`], a tagged variant keyed on the `type` field. Fields the
//! validator does not consume (descriptions, `knownValues`, defaults) are kept
//! where cheap and otherwise ignored, so newer documents still load.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Top-level Lexicon document
///
/// Reference: <https://atproto.com/specs/lexicon>
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexiconDoc {
    /// Lexicon language version (must be 1)
    pub lexicon: u32,

    /// NSID identifier for this lexicon
    pub id: String,

    /// Revision number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u32>,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Map of named definitions
    #[serde(default)]
    pub defs: HashMap<String, Definition>,
}

impl LexiconDoc {
    /// Create a new Lexicon document
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            lexicon: 1,
            id: id.into(),
            revision: None,
            description: None,
            defs: HashMap::new(),
        }
    }

    /// Add a definition to the document
    pub fn with_def(mut self, name: impl Into<String>, def: Definition) -> Self {
        self.defs.insert(name.into(), def);
        self
    }

    /// Get the main definition (if it exists)
    pub fn main_def(&self) -> Option<&Definition> {
        self.defs.get("main")
    }
}

/// One named, typed schema node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Definition {
    /// Object with named properties
    Object(LexObject),
    /// Homogeneous list
    Array(LexArray),
    /// Reference to another definition
    Ref(LexRef),
    /// Discriminated union of references
    Union(LexUnion),
    /// Marker whose only valid value is its own id
    Token(LexToken),
    /// Blob reference
    Blob(LexBlob),
    /// String, optionally with a format
    String(LexString),
    /// Boolean
    Boolean(LexBoolean),
    /// Integer
    Integer(LexInteger),
    /// Floating point number
    Number(LexNumber),
    /// Raw bytes
    Bytes(LexBytes),
    /// Content-addressed link
    CidLink(LexCidLink),
    /// Any value, or a `$type`-discriminated object
    Unknown(LexUnknown),
    /// The null value
    Null(LexNull),
    /// Method parameters (closed set of keys)
    Params(LexObject),
    /// Repository record
    Record(LexRecord),
    /// XRPC query (HTTP GET)
    Query(LexXrpcMethod),
    /// XRPC procedure (HTTP POST)
    Procedure(LexXrpcMethod),
    /// XRPC event stream
    Subscription(LexSubscription),
}

/// Every `type` tag a definition may carry.
pub const DEFINITION_KINDS: &[&str] = &[
    "object",
    "array",
    "ref",
    "union",
    "token",
    "blob",
    "string",
    "boolean",
    "integer",
    "number",
    "bytes",
    "cid-link",
    "unknown",
    "null",
    "params",
    "record",
    "query",
    "procedure",
    "subscription",
];

impl Definition {
    /// The `type` tag of this definition
    pub fn kind(&self) -> &'static str {
        match self {
            Definition::Object(_) => "object",
            Definition::Array(_) => "array",
            Definition::Ref(_) => "ref",
            Definition::Union(_) => "union",
            Definition::Token(_) => "token",
            Definition::Blob(_) => "blob",
            Definition::String(_) => "string",
            Definition::Boolean(_) => "boolean",
            Definition::Integer(_) => "integer",
            Definition::Number(_) => "number",
            Definition::Bytes(_) => "bytes",
            Definition::CidLink(_) => "cid-link",
            Definition::Unknown(_) => "unknown",
            Definition::Null(_) => "null",
            Definition::Params(_) => "params",
            Definition::Record(_) => "record",
            Definition::Query(_) => "query",
            Definition::Procedure(_) => "procedure",
            Definition::Subscription(_) => "subscription",
        }
    }

    /// Whether this is a query, procedure, or subscription
    pub fn is_method(&self) -> bool {
        matches!(
            self,
            Definition::Query(_) | Definition::Procedure(_) | Definition::Subscription(_)
        )
    }

    /// The `const` value, for kinds that support one
    pub fn const_value(&self) -> Option<&Value> {
        match self {
            Definition::String(s) => s.r#const.as_ref(),
            Definition::Boolean(b) => b.r#const.as_ref(),
            Definition::Integer(i) => i.r#const.as_ref(),
            Definition::Number(n) => n.r#const.as_ref(),
            _ => None,
        }
    }

    /// The `enum` values, for kinds that support them
    pub fn enum_values(&self) -> Option<&[Value]> {
        match self {
            Definition::String(s) => s.r#enum.as_deref(),
            Definition::Integer(i) => i.r#enum.as_deref(),
            Definition::Number(n) => n.r#enum.as_deref(),
            _ => None,
        }
    }

    /// Properties, for object-shaped kinds
    pub fn as_object(&self) -> Option<&LexObject> {
        match self {
            Definition::Object(o) | Definition::Params(o) => Some(o),
            Definition::Record(r) => Some(&r.record),
            _ => None,
        }
    }
}

/// Object definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LexObject {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Property schemas, in declaration order
    #[serde(default)]
    pub properties: IndexMap<String, Definition>,

    /// Properties that must be present
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    /// Properties that may be explicitly `null`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nullable: Vec<String>,
}

impl LexObject {
    /// Create an empty object definition
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property
    pub fn with_property(mut self, name: impl Into<String>, def: Definition) -> Self {
        self.properties.insert(name.into(), def);
        self
    }

    /// Mark a property as required
    pub fn with_required(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }
}

/// Array definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LexArray {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Schema of each element
    pub items: Box<Definition>,

    /// Minimum number of elements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    /// Maximum number of elements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

/// Reference to another definition
///
/// Can be local (`#defName`) or external (`nsid` or `nsid#defName`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexRef {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Target identifier
    #[serde(rename = "ref")]
    pub target: String,
}

impl LexRef {
    /// Create a new reference
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            description: None,
            target: target.into(),
        }
    }

    /// Check if this is a local reference (starts with #)
    pub fn is_local(&self) -> bool {
        self.target.starts_with('#')
    }
}

/// Union of references, discriminated by `$type`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexUnion {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Member identifiers, absolute or `#fragment`
    #[serde(default)]
    pub refs: Vec<String>,

    /// Whether members outside `refs` are rejected
    #[serde(default)]
    pub closed: bool,
}

/// Token definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexToken {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Blob definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LexBlob {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Accepted MIME type patterns, eg `image/*`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<Vec<String>>,

    /// Maximum size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

/// String definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LexString {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Format name (at-uri, did, handle, ...). Checked at validation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Minimum length in UTF-8 bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    /// Maximum length in UTF-8 bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    /// Minimum number of grapheme clusters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_graphemes: Option<usize>,

    /// Maximum number of grapheme clusters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_graphemes: Option<usize>,

    /// Allowed values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#enum: Option<Vec<Value>>,

    /// Required value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#const: Option<Value>,

    /// Suggested values (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_values: Option<Vec<String>>,
}

/// Boolean definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LexBoolean {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Required value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#const: Option<Value>,
}

/// Integer definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LexInteger {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Inclusive lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,

    /// Inclusive upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,

    /// Allowed values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#enum: Option<Vec<Value>>,

    /// Required value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#const: Option<Value>,
}

/// Number definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LexNumber {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Inclusive lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    /// Inclusive upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    /// Allowed values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#enum: Option<Vec<Value>>,

    /// Required value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#const: Option<Value>,
}

/// Bytes definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LexBytes {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Minimum decoded length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    /// Maximum decoded length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

/// CID link definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexCidLink {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Unknown (any value) definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexUnknown {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Null definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexNull {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Record definition (storable in a repository)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexRecord {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Record key type, eg `tid`, `any`, `literal:self`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Record schema
    pub record: LexObject,
}

/// Input, output, or message body of a method
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LexBody {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// MIME type; absent for subscription messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,

    /// Body schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Box<Definition>>,
}

impl LexBody {
    /// Whether values in this body are JSON (and therefore validated)
    pub fn is_json(&self) -> bool {
        match &self.encoding {
            Some(encoding) => encoding == crate::JSON_ENCODING,
            None => true,
        }
    }
}

/// Named error a method may return
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexXrpcError {
    /// Error name, eg `RepoNotFound`
    pub name: String,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Query or procedure definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LexXrpcMethod {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Query parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<LexObject>,

    /// Request body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<LexBody>,

    /// Response body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<LexBody>,

    /// Named errors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<LexXrpcError>,
}

/// Subscription definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LexSubscription {
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Query parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<LexObject>,

    /// Schema of each streamed message payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<LexBody>,

    /// Named errors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<LexXrpcError>,
}
