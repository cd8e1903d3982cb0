//! Site registry loading.
//!
//! Turns the enabled rows of the `sites` table into descriptors ready for probing.

use crate::db::{DbError, Site, Store};

use regex::Regex;

/// A site ready to be probed.
#[derive(Debug, Clone)]
pub struct SiteDescriptor {
    pub id: i64,
    pub name: String,
    pub test_url: String,
    /// `None` means any response body counts as valid.
    pub content_pattern: Option<Regex>,
}

impl SiteDescriptor {
    pub fn new(id: i64, name: &str, test_url: &str, content_pattern: Option<Regex>) -> Self {
        Self {
            id,
            name: name.to_string(),
            test_url: test_url.to_string(),
            content_pattern,
        }
    }

    fn from_site(site: &Site) -> Self {
        let content_pattern = compile_pattern(site.id, site.regex.as_deref());
        Self::new(site.id, &site.name, &site.test_url, content_pattern)
    }
}

/// Compile a stored pattern. Patterns that fail to compile are dropped with a warning.
pub fn compile_pattern(site_id: i64, pattern: Option<&str>) -> Option<Regex> {
    let pattern = pattern?;
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(
                "Site {}: ignoring invalid content pattern {:?}: {}",
                site_id,
                pattern,
                e
            );
            None
        }
    }
}

/// Load all enabled sites from the store.
///
/// A failing query is returned to the caller; without sites there is nothing to do.
pub fn load_sites(store: &Store) -> Result<Vec<SiteDescriptor>, DbError> {
    let sites = store.get_enabled_sites()?;
    let descriptors: Vec<_> = sites.iter().map(SiteDescriptor::from_site).collect();
    tracing::info!("Loaded {} enabled sites", descriptors.len());
    Ok(descriptors)
}
