//! Vendor value normalization: VCS providers, repository identifiers,
//! Terraform versions, slugs and migration ids

use crate::error::{MigrationError, Result};
use deunicode::deunicode;
use semver::Version;

/// Version used when the source version cannot be pinned
pub const FALLBACK_TERRAFORM_VERSION: &str = "1.5.7";

/// Pin a source Terraform version constraint to a concrete release
///
/// Everything but digits and dots is stripped; the remainder must parse as a
/// semantic version. `latest`, ranges and absent values fall back.
pub fn normalize_terraform_version(version: Option<&str>) -> String {
    let Some(version) = version else {
        return FALLBACK_TERRAFORM_VERSION.to_string();
    };
    let digits: String = version
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    match Version::parse(&digits) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => FALLBACK_TERRAFORM_VERSION.to_string(),
    }
}

/// Collapse a source VCS service provider name to its target name
pub fn collapse_vcs_provider(provider: Option<&str>) -> Result<Option<&'static str>> {
    let Some(provider) = provider else {
        return Ok(None);
    };
    let collapsed = match provider {
        "github" | "github_app" | "github_enterprise" => "github_custom",
        "gitlab_hosted" | "gitlab_community_edition" | "gitlab_enterprise_edition" => "gitlab",
        "bitbucket_hosted" => "bitbucket_cloud",
        "bitbucket_server" | "bitbucket_data_center" => "bitbucket_datacenter",
        "ado_services" | "ado_server" => "azure_devops",
        other => return Err(MigrationError::UnknownVcsProvider(other.to_string())),
    };
    Ok(Some(collapsed))
}

/// Split `namespace/repository` at the first slash
pub fn split_repository_identifier(identifier: &str) -> Result<(String, String)> {
    match identifier.split_once('/') {
        Some((namespace, repository)) if !namespace.is_empty() && !repository.is_empty() => {
            Ok((namespace.to_string(), repository.to_string()))
        }
        _ => Err(MigrationError::InvalidRepositoryIdentifier(identifier.to_string())),
    }
}

/// Lowercase ASCII slug with single dashes between words
///
/// Non-ASCII text is transliterated first, so `Données` becomes `donnees`.
pub fn slugify(text: &str) -> String {
    let ascii = deunicode(text);
    let mut slug = String::with_capacity(ascii.len());
    let mut pending_dash = false;
    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Code-identifier-safe id from name parts; `None` when nothing usable remains
pub fn migration_id(parts: &[&str]) -> Option<String> {
    let id = slugify(&parts.join("_")).replace('-', "_");
    if id.is_empty() {
        return None;
    }
    if id.starts_with(|c: char| c.is_ascii_digit()) {
        Some(format!("_{id}"))
    } else {
        Some(id)
    }
}
