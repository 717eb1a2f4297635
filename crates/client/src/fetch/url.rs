//! Resolution of request targets against the API base URL.

use url::Url;

use assetry_core::{Error, canonicalize};

/// Resolve a request target to a canonical absolute URL.
///
/// Targets starting with `/` are API paths appended to `base` (whose
/// trailing slash is dropped); anything else is canonicalized as an
/// absolute URL, defaulting the scheme to `https`.
pub fn resolve(base: Option<&Url>, target: &str) -> Result<Url, Error> {
    let target = target.trim();

    if !target.starts_with('/') {
        return Ok(canonicalize(target)?);
    }

    let Some(base) = base else {
        return Err(Error::InvalidUrl(format!("{target}: relative path without a configured base URL")));
    };

    let joined = format!("{}{}", base.as_str().trim_end_matches('/'), target);
    Ok(canonicalize(&joined)?)
}
