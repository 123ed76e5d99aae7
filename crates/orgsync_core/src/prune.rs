use std::collections::HashSet;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::SiteLayout;
use crate::error::SyncError;
use crate::model::OrganizationRecord;
use crate::wiki::WikiStore;

#[derive(Debug, Clone, Serialize)]
pub struct PruneItem {
    pub name: String,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub success: bool,
    pub dry_run: bool,
    pub upstream: usize,
    pub catalogue: usize,
    /// Catalogue entries with no live upstream organization.
    pub stale: Vec<String>,
    pub deleted_pages: usize,
    pub deleted_categories: usize,
    pub errors: Vec<String>,
    pub items: Vec<PruneItem>,
    pub request_count: usize,
}

/// Delete catalogue pages (and their categories) for organizations that
/// are gone upstream. A dry run only lists them.
pub fn prune_removed<W>(
    wiki: &mut W,
    layout: &SiteLayout,
    records: &[OrganizationRecord],
    dry_run: bool,
) -> Result<PruneReport>
where
    W: WikiStore + ?Sized,
{
    let live = records
        .iter()
        .map(OrganizationRecord::title)
        .collect::<HashSet<_>>();
    if live.is_empty() && !dry_run {
        bail!(SyncError::upstream(
            "organization listing",
            "registry returned no organizations; refusing to delete every catalogue page"
        ));
    }
    let members = wiki
        .category_members(&layout.catalogue_category)
        .with_context(|| format!("failed to list members of {}", layout.catalogue_category))?;
    info!(upstream = live.len(), catalogue = members.len(), dry_run, "pruning removed organizations");

    let mut report = PruneReport {
        dry_run,
        upstream: live.len(),
        catalogue: members.len(),
        ..PruneReport::default()
    };

    for title in members {
        if !layout.is_content_title(&title) {
            warn!(title = %title, "catalogue member outside the organization namespace; ignoring");
            continue;
        }
        let name = layout.strip_namespace(&title).to_string();
        if live.contains(&name) {
            continue;
        }
        report.stale.push(name.clone());
        if dry_run {
            info!(name = %name, "should be deleted");
            report.items.push(PruneItem {
                name,
                action: "would_delete".to_string(),
                detail: None,
            });
            continue;
        }

        if let Err(failure) = wiki.delete_page(&title, &layout.delete_reason) {
            let failure = SyncError::wiki_write(&title, format!("{failure:#}"));
            error!(name = %name, error = %failure, "prune failed");
            report.errors.push(format!("{name}: {failure}"));
            report.items.push(PruneItem {
                name,
                action: "error".to_string(),
                detail: Some(failure.to_string()),
            });
            continue;
        }
        report.deleted_pages += 1;

        match delete_category(wiki, layout, &name) {
            Ok(with_category) => {
                if with_category {
                    report.deleted_categories += 1;
                }
                let action = if with_category {
                    "deleted_page_and_category"
                } else {
                    "deleted_page"
                };
                info!(name = %name, action, "removed");
                report.items.push(PruneItem {
                    name,
                    action: action.to_string(),
                    detail: None,
                });
            }
            Err(failure) => {
                error!(name = %name, error = %format!("{failure:#}"), "category removal failed");
                report.errors.push(format!("{name}: {failure:#}"));
                report.items.push(PruneItem {
                    name,
                    action: "deleted_page".to_string(),
                    detail: Some(format!("{failure:#}")),
                });
            }
        }
    }

    report.request_count = wiki.request_count();
    report.success = report.errors.is_empty();
    Ok(report)
}

/// Returns whether a same-named category page existed and was deleted.
fn delete_category<W>(wiki: &mut W, layout: &SiteLayout, name: &str) -> Result<bool>
where
    W: WikiStore + ?Sized,
{
    let category_title = layout.category_title(name);
    if !wiki.page(&category_title)?.exists {
        return Ok(false);
    }
    wiki.delete_page(&category_title, &layout.delete_reason)
        .map_err(|failure| SyncError::wiki_write(&category_title, format!("{failure:#}")))?;
    Ok(true)
}
