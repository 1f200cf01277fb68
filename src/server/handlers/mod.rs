pub mod health;
pub mod index;
pub mod ingest;
pub mod query;

use crate::rag::DEFAULT_NAMESPACE;

/// Blank or missing namespaces fall back to the default one.
pub(crate) fn namespace_or_default(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|ns| !ns.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE)
        .to_string()
}

/// Blank namespaces mean "every namespace".
pub(crate) fn namespace_filter(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|ns| !ns.is_empty())
        .map(str::to_string)
}
