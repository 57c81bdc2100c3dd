use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tether_core::{current_unix_timestamp_ms, is_expired_unix_ms, write_text_atomic};

const BINDINGS_SCHEMA_VERSION: u32 = 1;
const CODE_LENGTH: usize = 10;
const CODE_TTL_MS: u64 = 60_000;
const CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Returns true when `text` has the shape of a verification code. Callers
/// gate free-form chat text with this before attempting validation.
pub fn looks_like_verification_code(text: &str) -> bool {
    static CODE_PATTERN: OnceLock<Regex> = OnceLock::new();
    CODE_PATTERN
        .get_or_init(|| Regex::new("^[a-z0-9]{10}$").expect("code pattern is valid"))
        .is_match(text)
}

/// An authorized chat identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Binding {
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub bound_at_unix_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BindingRegistryFile {
    schema_version: u32,
    #[serde(default)]
    bindings: Vec<Binding>,
}

/// Durable set of bound chat identities plus the in-memory verification-code
/// lifecycle. Opened once at startup; every mutation rewrites the whole file.
pub struct BindingStore {
    path: PathBuf,
    bindings: Vec<Binding>,
    pending_codes: HashMap<String, u64>,
}

impl BindingStore {
    /// Opens the store at `path`, loading any existing registry. A missing or
    /// malformed file loads as the empty set; only the running process's
    /// in-memory state is authoritative.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let bindings = match load_registry(&path) {
            Ok(bindings) => bindings,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "binding registry unreadable, starting with empty set"
                );
                Vec::new()
            }
        };
        Self {
            path,
            bindings,
            pending_codes: HashMap::new(),
        }
    }

    /// Generates a fresh single-use pairing code valid for sixty seconds.
    /// Multiple outstanding codes may coexist.
    pub fn create_pending_code(&mut self) -> String {
        let now = current_unix_timestamp_ms();
        self.pending_codes
            .retain(|_, expires| !is_expired_unix_ms(*expires, now));

        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        self.pending_codes
            .insert(code.clone(), now.saturating_add(CODE_TTL_MS));
        code
    }

    /// Consumes `code` and reports whether it was valid. The code is deleted
    /// on every path, so a code validates true at most once and never after
    /// its expiry instant.
    pub fn validate_code(&mut self, code: &str) -> bool {
        match self.pending_codes.remove(code) {
            Some(expires) => !is_expired_unix_ms(expires, current_unix_timestamp_ms()),
            None => false,
        }
    }

    /// Inserts or overwrites the binding for `identity` and persists the full
    /// registry. Persistence failures are logged and swallowed.
    pub fn add_binding(&mut self, identity: &str, display_name: Option<&str>) {
        let binding = Binding {
            identity: identity.to_string(),
            display_name: display_name.map(str::to_string),
            bound_at_unix_ms: current_unix_timestamp_ms(),
        };
        match self
            .bindings
            .iter_mut()
            .find(|existing| existing.identity == identity)
        {
            Some(existing) => *existing = binding,
            None => self.bindings.push(binding),
        }
        self.persist();
    }

    /// Removes the binding for `identity`, persisting only when a deletion
    /// occurred. Returns whether the binding existed.
    pub fn remove_binding(&mut self, identity: &str) -> bool {
        let before = self.bindings.len();
        self.bindings.retain(|binding| binding.identity != identity);
        let removed = self.bindings.len() != before;
        if removed {
            self.persist();
        }
        removed
    }

    pub fn is_bound(&self, identity: &str) -> bool {
        self.bindings
            .iter()
            .any(|binding| binding.identity == identity)
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn identities(&self) -> Vec<String> {
        self.bindings
            .iter()
            .map(|binding| binding.identity.clone())
            .collect()
    }

    fn persist(&self) {
        let file = BindingRegistryFile {
            schema_version: BINDINGS_SCHEMA_VERSION,
            bindings: self.bindings.clone(),
        };
        let mut payload = match serde_json::to_string_pretty(&file) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "failed to encode binding registry");
                return;
            }
        };
        payload.push('\n');
        if let Err(error) = write_text_atomic(&self.path, &payload) {
            tracing::warn!(
                path = %self.path.display(),
                %error,
                "failed to persist binding registry"
            );
        }
    }
}

fn load_registry(path: &Path) -> Result<Vec<Binding>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read binding registry {}", path.display()))?;
    let parsed = serde_json::from_str::<BindingRegistryFile>(&raw)
        .with_context(|| format!("failed to parse binding registry {}", path.display()))?;
    Ok(parsed.bindings)
}
