//! Slug derivation and validation.
//!
//! A slug is the normalized identity of a resource within its kind and org:
//! lowercase, alphanumeric runs joined by single hyphens. Slugs are the
//! duplicate-detection key on create and the lookup key for `GetByReference`.
//! Identity comparisons elsewhere in the control plane always compare slug
//! with slug, never slug with display name.

use crate::error::{CoreError, CoreResult};

/// Derive a slug from a display name.
///
/// Lowercases the input, maps every non-alphanumeric run to a single
/// hyphen, and trims leading/trailing hyphens.
///
/// # Errors
///
/// Returns [`CoreError::EmptySlugSource`] if the name contains no
/// alphanumeric characters at all.
pub fn slugify(name: &str) -> CoreResult<String> {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    if slug.is_empty() {
        return Err(CoreError::EmptySlugSource);
    }
    Ok(slug)
}

/// Check whether a string is already a well-formed slug.
#[must_use]
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_name() {
        assert_eq!(slugify("PR Reviewer").unwrap(), "pr-reviewer");
    }

    #[test]
    fn test_collapses_runs() {
        assert_eq!(slugify("a  --  b").unwrap(), "a-b");
        assert_eq!(slugify("Data__Fetch!!v2").unwrap(), "data-fetch-v2");
    }

    #[test]
    fn test_trims_edges() {
        assert_eq!(slugify("  hello  ").unwrap(), "hello");
        assert_eq!(slugify("---x---").unwrap(), "x");
    }

    #[test]
    fn test_rejects_empty() {
        assert!(slugify("").is_err());
        assert!(slugify("!!!").is_err());
    }

    #[test]
    fn test_validation() {
        assert!(is_valid_slug("pr-reviewer"));
        assert!(is_valid_slug("basic-data-fetch"));
        assert!(!is_valid_slug("PR-Reviewer"));
        assert!(!is_valid_slug("-leading"));
        assert!(!is_valid_slug("trailing-"));
        assert!(!is_valid_slug("double--hyphen"));
        assert!(!is_valid_slug(""));
    }

    #[test]
    fn test_slugify_output_is_valid() {
        for name in ["PR Reviewer", "x", "A B C", "9 to 5"] {
            assert!(is_valid_slug(&slugify(name).unwrap()));
        }
    }
}
