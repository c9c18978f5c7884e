//! String format checkers
//!
//! Each Lexicon string `format` maps to one pure predicate. A value that fails
//! its predicate, or a format name nobody recognizes, is a [`FormatError`].
//!
//! Reference: <https://atproto.com/specs/lexicon#string-formats>

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors produced by the format checkers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormatError {
    /// The value does not satisfy the format
    #[error("{value} is invalid for format {format}")]
    Invalid {
        /// The offending value
        value: String,
        /// The format name
        format: String,
    },

    /// The format name is not recognized
    #[error("unknown format {0}")]
    Unknown(String),
}

/// Result type for format checks
pub type Result<T> = std::result::Result<T, FormatError>;

/// String format types defined by AT Protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StringFormat {
    /// DID or handle
    AtIdentifier,
    /// `at://authority/collection/rkey`
    AtUri,
    /// Content identifier
    Cid,
    /// RFC 3339 datetime with mandatory timezone
    Datetime,
    /// Decentralized identifier, `did:method:identifier`
    Did,
    /// Domain name handle
    Handle,
    /// Namespaced identifier
    Nsid,
    /// 13-character base32 timestamp identifier
    Tid,
    /// Repository record key
    RecordKey,
    /// Any scheme-qualified URI
    Uri,
    /// BCP-47 language tag
    Language,
}

impl StringFormat {
    /// Get the string representation of the format
    pub fn as_str(&self) -> &'static str {
        match self {
            StringFormat::AtIdentifier => "at-identifier",
            StringFormat::AtUri => "at-uri",
            StringFormat::Cid => "cid",
            StringFormat::Datetime => "datetime",
            StringFormat::Did => "did",
            StringFormat::Handle => "handle",
            StringFormat::Nsid => "nsid",
            StringFormat::Tid => "tid",
            StringFormat::RecordKey => "record-key",
            StringFormat::Uri => "uri",
            StringFormat::Language => "language",
        }
    }

    /// Check a value against this format
    pub fn check(&self, value: &str) -> Result<()> {
        let ok = !value.is_empty()
            && match self {
                StringFormat::AtIdentifier => is_did(value) || is_domain(&value.to_lowercase()),
                StringFormat::AtUri => is_at_uri(value),
                StringFormat::Cid => matches(&CID_RE, CID_PATTERN, value),
                StringFormat::Datetime => is_datetime(value),
                StringFormat::Did => is_did(value),
                StringFormat::Handle => value.len() <= 253 && is_domain(&value.to_lowercase()),
                StringFormat::Nsid => is_valid_nsid(value),
                StringFormat::Tid => is_tid(value),
                StringFormat::RecordKey => {
                    value != "." && value != ".." && matches(&RKEY_RE, RKEY_PATTERN, value)
                }
                StringFormat::Uri => is_uri(value),
                StringFormat::Language => matches(&LANG_RE, LANG_PATTERN, value),
            };

        if ok {
            Ok(())
        } else {
            Err(FormatError::Invalid {
                value: value.to_string(),
                format: self.as_str().to_string(),
            })
        }
    }
}

impl FromStr for StringFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "at-identifier" => Ok(StringFormat::AtIdentifier),
            "at-uri" => Ok(StringFormat::AtUri),
            "cid" => Ok(StringFormat::Cid),
            "datetime" => Ok(StringFormat::Datetime),
            "did" => Ok(StringFormat::Did),
            "handle" => Ok(StringFormat::Handle),
            "nsid" => Ok(StringFormat::Nsid),
            "tid" => Ok(StringFormat::Tid),
            "record-key" => Ok(StringFormat::RecordKey),
            "uri" => Ok(StringFormat::Uri),
            "language" => Ok(StringFormat::Language),
            _ => Err(FormatError::Unknown(s.to_string())),
        }
    }
}

impl std::fmt::Display for StringFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Check `value` against the format named `format`
///
/// # Examples
///
/// ```
/// use lexicon::check_format;
///
/// assert!(check_format("did:plc:abc123", "did").is_ok());
/// assert!(check_format("did:plc:", "did").is_err());
/// assert!(check_format("x", "color").is_err());
/// ```
pub fn check_format(value: &str, format: &str) -> Result<()> {
    format.parse::<StringFormat>()?.check(value)
}

// =============================================================================
// Patterns
// =============================================================================

// Labels are 1-63 chars, start alphanumeric and never end with a hyphen.
const DOMAIN_PATTERN: &str =
    r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]([a-z0-9-]*[a-z0-9])?$";
const NSID_PATTERN: &str =
    r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.){2,}[a-zA-Z][a-zA-Z0-9]{0,62}$";
const DID_PATTERN: &str = r"^did:[a-z]+:[A-Za-z0-9._%:-]{1,2048}$";
const AT_URI_PATTERN: &str = r"^at://([^/]+)(?:/([^/]+)(?:/([a-zA-Z0-9.:~_-]+))?)?$";
const LANG_PATTERN: &str = r"^(i|[a-z]{2,3})(-[A-Za-z0-9-]+)?$";
const RKEY_PATTERN: &str = r"^[A-Za-z0-9._:~-]{1,512}$";
const TID_PATTERN: &str = r"^[a-z2-7]{13}$";
const CID_PATTERN: &str = r"^[A-Za-z0-9+]{8,}$";
const DATETIME_TZ_PATTERN: &str = r"([+-][0-9]{2}:[0-9]{2}|Z)$";
const DATETIME_FRACTION_PATTERN: &str = r"\.[0-9]+$";

static DOMAIN_RE: OnceLock<Regex> = OnceLock::new();
static NSID_RE: OnceLock<Regex> = OnceLock::new();
static DID_RE: OnceLock<Regex> = OnceLock::new();
static AT_URI_RE: OnceLock<Regex> = OnceLock::new();
static LANG_RE: OnceLock<Regex> = OnceLock::new();
static RKEY_RE: OnceLock<Regex> = OnceLock::new();
static TID_RE: OnceLock<Regex> = OnceLock::new();
static CID_RE: OnceLock<Regex> = OnceLock::new();
static DATETIME_TZ_RE: OnceLock<Regex> = OnceLock::new();
static DATETIME_FRACTION_RE: OnceLock<Regex> = OnceLock::new();

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap())
}

fn matches(cell: &'static OnceLock<Regex>, pattern: &str, value: &str) -> bool {
    compiled(cell, pattern).is_match(value)
}

// =============================================================================
// Predicates
// =============================================================================

fn is_domain(value: &str) -> bool {
    matches(&DOMAIN_RE, DOMAIN_PATTERN, value)
}

fn is_did(value: &str) -> bool {
    !value.ends_with(':') && matches(&DID_RE, DID_PATTERN, value)
}

/// Whether `value` is a syntactically valid NSID
///
/// # Examples
///
/// ```
/// use lexicon::is_valid_nsid;
///
/// assert!(is_valid_nsid("app.bsky.feed.post"));
/// assert!(is_valid_nsid("io.exa-mple.dashedName"));
/// assert!(!is_valid_nsid("not_an*nsid"));
/// assert!(!is_valid_nsid("com.example"));
/// ```
pub fn is_valid_nsid(value: &str) -> bool {
    value.len() <= 317
        && !value.starts_with(|c: char| c.is_ascii_digit())
        && matches(&NSID_RE, NSID_PATTERN, value)
}

fn is_at_uri(value: &str) -> bool {
    if value.len() >= 8 * 1024
        || value.contains("/./")
        || value.contains("/../")
        || value.ends_with("/.")
        || value.ends_with("/..")
    {
        return false;
    }

    let Some(caps) = compiled(&AT_URI_RE, AT_URI_PATTERN).captures(value) else {
        return false;
    };

    let repo_ok = caps
        .get(1)
        .is_some_and(|repo| is_did(repo.as_str()) || is_domain(repo.as_str()));
    let collection_ok = caps
        .get(2)
        .map_or(true, |collection| is_valid_nsid(collection.as_str()));

    repo_ok && collection_ok
}

fn is_tid(value: &str) -> bool {
    // the top bit of the 64-bit timestamp is always zero
    matches(&TID_RE, TID_PATTERN, value) && value.as_bytes()[0] & 0x40 == 0
}

fn is_datetime(value: &str) -> bool {
    if !value.contains('T') {
        return false;
    }

    let tz = compiled(&DATETIME_TZ_RE, DATETIME_TZ_PATTERN);
    let fraction = compiled(&DATETIME_FRACTION_RE, DATETIME_FRACTION_PATTERN);

    let without_tz = tz.replace(value, "");
    if without_tz.len() == value.len() {
        return false;
    }
    let naive = fraction.replace(&without_tz, "");

    NaiveDateTime::parse_from_str(&naive, "%Y-%m-%dT%H:%M:%S").is_ok()
}

fn is_uri(value: &str) -> bool {
    if value.len() >= 8 * 1024 || value.contains(' ') {
        return false;
    }

    let Some((scheme, rest)) = value.split_once(':') else {
        return false;
    };

    let scheme_ok = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    let rest = rest.strip_prefix("//").unwrap_or(rest);

    scheme_ok && !rest.is_empty()
}
