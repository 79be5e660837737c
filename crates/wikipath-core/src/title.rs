//! Title normalization.
//!
//! Two forms of a title coexist everywhere in this workspace:
//! - the *canonical* form, exactly as the remote API returned it, kept for
//!   display and for subsequent API calls;
//! - the *normalized* form, used only as a key for identity comparisons,
//!   visited sets and cache lookups.

/// Normalized (cache-key) form of a title: underscores become spaces, the
/// result is trimmed and lowercased.
///
/// Idempotent: `normalize(normalize(t)) == normalize(t)`.
pub fn normalize(title: &str) -> String {
    title.replace('_', " ").trim().to_lowercase()
}

/// Whether two titles name the same article.
pub fn same_title(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Whether a path visits any article twice, by normalized identity.
pub fn has_repeated_titles(path: &[String]) -> bool {
    let mut seen = std::collections::HashSet::with_capacity(path.len());
    !path.iter().all(|p| seen.insert(normalize(p)))
}
