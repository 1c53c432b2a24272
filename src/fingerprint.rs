use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::{self, Display};
use thiserror::Error;

/// Raised when a fingerprint cannot be constructed. Callers treat this as a
/// cache miss (see [`ResponseCache::lookup()`](crate::response::ResponseCache::lookup));
/// it never fails the request itself.
#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("variable serialization failed: {0}")]
    Variables(#[from] serde_json::Error),
}

/// Identity of one cacheable response.
///
/// Three components, all mandatory: the tenant/user scope, a surface label
/// naming what was computed (e.g. `notes:list:userA` — the part invalidation
/// rules match against), and a digest over the normalized query text plus
/// canonically serialized variables. Two keys are equal only when all three
/// match, so one tenant's entries are unreachable from another's lookups.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    scope: String,
    surface: String,
    digest: String,
}

impl CacheKey {
    /// Build the fingerprint for a request: `query` is normalized (comments
    /// stripped, insignificant whitespace collapsed) and `variables` are
    /// serialized with recursively sorted object keys, so textually
    /// different but semantically identical requests share a slot.
    pub fn compute<V>(
        scope: impl Into<String>,
        surface: impl Into<String>,
        query: &str,
        variables: &V,
    ) -> Result<Self, FingerprintError>
    where
        V: Serialize + ?Sized,
    {
        let vars = serde_json::to_value(variables)?;
        let mut canonical_vars = String::new();
        canonical_json(&vars, &mut canonical_vars);

        let mut hasher = Sha256::new();
        hasher.update(normalize_query(query).as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_vars.as_bytes());

        Ok(Self {
            scope: scope.into(),
            surface: surface.into(),
            digest: hex::encode(hasher.finalize()),
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn surface(&self) -> &str {
        &self.surface
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.scope, self.surface, &self.digest[..12.min(self.digest.len())])
    }
}

// Whitespace is insignificant except as a token separator, and `#` starts a
// comment running to end of line.
fn normalize_query(text: &str) -> String {
    const PUNCT: &[char] = &['{', '}', '(', ')', '[', ']', ':', ',', '=', '@', '!', '$'];

    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '#' {
            while let Some(&n) = chars.peek() {
                if n == '\n' {
                    break;
                }
                chars.next();
            }
        }
        else if c.is_whitespace() {
            pending_space = true;
        }
        else {
            if pending_space
                && !out.is_empty()
                && !PUNCT.contains(&c)
                && !out.ends_with(|p: char| PUNCT.contains(&p))
            {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }

    out
}

// Stable rendition of a JSON value: object keys sorted recursively, no
// insignificant whitespace. Key order in the incoming document never changes
// the digest.
fn canonical_json(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                canonical_json(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonical_json(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
