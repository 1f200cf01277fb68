use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::core::errors::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared secret that guards every mutating and querying endpoint.
#[derive(Clone)]
pub struct AdminKey {
    value: String,
}

impl std::fmt::Debug for AdminKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminKey").field("value", &"****").finish()
    }
}

impl AdminKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Uses the configured key when present, otherwise generates one and
    /// persists it to `key_file` so operators can read it back.
    pub fn resolve(configured: Option<&str>, key_file: &Path) -> Self {
        if let Some(key) = configured.map(str::trim).filter(|key| !key.is_empty()) {
            return Self::new(key);
        }

        let key = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        match write_owner_only(key_file, &key) {
            Ok(()) => tracing::warn!(
                "ADMIN_API_KEY not set; generated a key and wrote it to {}",
                key_file.display()
            ),
            Err(err) => tracing::warn!("Failed to write generated admin key: {}", err),
        }

        Self::new(key)
    }
}

/// On unix the file is 0600 from the moment it exists.
fn write_owner_only(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    // an older key file keeps its mode through truncation
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents.as_bytes())
}

pub fn require_api_key(headers: &HeaderMap, expected: &AdminKey) -> Result<(), ApiError> {
    let header_value = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if header_value.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    let matches: bool = header_value
        .as_bytes()
        .ct_eq(expected.value().as_bytes())
        .into();
    if !matches {
        return Err(ApiError::Unauthorized);
    }

    Ok(())
}
