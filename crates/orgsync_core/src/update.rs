use anyhow::Result;
use serde::Serialize;
use similar::TextDiff;
use tracing::{debug, error, info};

use crate::config::SiteLayout;
use crate::details::{DetailsMap, DetailsReport, OrganizationDetails};
use crate::error::SyncError;
use crate::template::{merge_template_block, render_template};
use crate::wiki::WikiStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Write pages that do not exist yet instead of skipping them.
    pub force_create: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateItem {
    pub title: String,
    pub action: String,
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateReport {
    pub success: bool,
    pub dry_run: bool,
    pub force_create: bool,
    pub organizations: usize,
    pub updated: usize,
    pub created: usize,
    pub unchanged: usize,
    pub skipped: usize,
    /// Names the details fetch could not match to a registry code.
    pub unresolved: Vec<String>,
    pub errors: Vec<String>,
    pub items: Vec<UpdateItem>,
    pub request_count: usize,
}

impl UpdateReport {
    /// Fold in the details fetch that fed this run; its errors fail the run.
    pub fn absorb_fetch(&mut self, fetch: &DetailsReport) {
        self.unresolved = fetch.skipped.clone();
        self.errors.splice(0..0, fetch.errors.iter().cloned());
        self.success = self.success && fetch.success;
    }
}

/// Full page text for `existing` with its template block replaced.
pub fn plan_page_text(
    existing: &str,
    details: &OrganizationDetails,
    layout: &SiteLayout,
) -> Result<String> {
    let rendered = render_template(details, layout)?;
    Ok(merge_template_block(existing, &rendered, &layout.template_name))
}

pub fn unified_diff(title: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(2)
        .header(title, title)
        .to_string()
}

/// Rewrite the template block of every organization content page.
pub fn update_pages<W>(
    wiki: &mut W,
    layout: &SiteLayout,
    details: &DetailsMap,
    options: UpdateOptions,
) -> UpdateReport
where
    W: WikiStore + ?Sized,
{
    info!(
        organizations = details.len(),
        force_create = options.force_create,
        dry_run = options.dry_run,
        "updating organization pages"
    );
    let mut report = UpdateReport {
        dry_run: options.dry_run,
        force_create: options.force_create,
        organizations: details.len(),
        ..UpdateReport::default()
    };

    for (name, organization) in details {
        let title = layout.content_title(name);
        match update_page(wiki, layout, &title, organization, options) {
            Ok(item) => {
                match item.action.as_str() {
                    "updated" | "would_update" => report.updated += 1,
                    "created" | "would_create" => report.created += 1,
                    "unchanged" => report.unchanged += 1,
                    _ => report.skipped += 1,
                }
                report.items.push(item);
            }
            Err(failure) => {
                error!(title = %title, error = %format!("{failure:#}"), "page update failed");
                report.errors.push(format!("{title}: {failure:#}"));
                report.items.push(UpdateItem {
                    title,
                    action: "error".to_string(),
                    detail: Some(format!("{failure:#}")),
                    diff: None,
                });
            }
        }
    }

    report.request_count = wiki.request_count();
    report.success = report.errors.is_empty();
    info!(
        updated = report.updated,
        created = report.created,
        unchanged = report.unchanged,
        skipped = report.skipped,
        errors = report.errors.len(),
        "organization pages updated"
    );
    report
}

fn update_page<W>(
    wiki: &mut W,
    layout: &SiteLayout,
    title: &str,
    details: &OrganizationDetails,
    options: UpdateOptions,
) -> Result<UpdateItem>
where
    W: WikiStore + ?Sized,
{
    let page = wiki.page(title)?;
    if !page.exists && !options.force_create {
        return Ok(UpdateItem {
            title: title.to_string(),
            action: "skipped".to_string(),
            detail: Some("page does not exist".to_string()),
            diff: None,
        });
    }

    let new_text = plan_page_text(&page.text, details, layout)?;
    if page.exists && new_text == page.text {
        return Ok(UpdateItem {
            title: title.to_string(),
            action: "unchanged".to_string(),
            detail: None,
            diff: None,
        });
    }

    let action = match (page.exists, options.dry_run) {
        (true, false) => "updated",
        (false, false) => "created",
        (true, true) => "would_update",
        (false, true) => "would_create",
    };
    let diff = options
        .dry_run
        .then(|| unified_diff(title, &page.text, &new_text));
    if !options.dry_run {
        wiki.edit_page(title, &new_text, &layout.edit_summary)
            .map_err(|failure| SyncError::wiki_write(title, format!("{failure:#}")))?;
        debug!(title, action, "page written");
    }
    Ok(UpdateItem {
        title: title.to_string(),
        action: action.to_string(),
        detail: None,
        diff,
    })
}
