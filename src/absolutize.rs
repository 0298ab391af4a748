//! Media URI resolution against a manifest or endpoint base URL.

use crate::error::{Result, SimError};
use url::{Position, Url};

/// Resolve a raw URI reference from a manifest against `base`.
///
/// - a reference equal to the base's string form returns the base unchanged
/// - an absolute reference is returned as parsed
/// - `/path` is rebuilt on the base's `scheme://host[:port]`
/// - anything else replaces the base's last path element
///
/// Rebuilt strings are percent-decoded exactly once before the final parse.
///
/// # Errors
/// [`SimError::MalformedReference`] for an empty reference or when any parse
/// step fails.
pub fn absolutize(raw: &str, base: &Url) -> Result<Url> {
    if raw.is_empty() {
        return Err(SimError::MalformedReference(format!(
            "empty reference against {base}"
        )));
    }

    if raw == base.as_str() {
        return Ok(base.clone());
    }

    if let Ok(absolute) = Url::parse(raw) {
        return Ok(absolute);
    }

    // Validates the reference before it is spliced textually
    base.join(raw)
        .map_err(|e| SimError::MalformedReference(format!("{raw}: {e}")))?;

    let rebuilt = if raw.starts_with('/') {
        format!("{}{}", &base[..Position::BeforePath], raw)
    } else {
        match base[..Position::AfterPath].rsplit_once('/') {
            Some((parent, _)) => format!("{parent}/{raw}"),
            None => raw.to_string(),
        }
    };

    let decoded = urlencoding::decode(&rebuilt)
        .map_err(|e| SimError::MalformedReference(format!("{rebuilt}: {e}")))?;

    Url::parse(&decoded).map_err(|e| SimError::MalformedReference(format!("{decoded}: {e}")))
}
