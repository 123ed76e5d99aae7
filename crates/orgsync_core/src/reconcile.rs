use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::{SiteLayout, category_marker};
use crate::hierarchy::{Hierarchy, Placement};
use crate::wiki::WikiStore;

pub const CATEGORY_PREFIX: &str = "[[Category:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextChange {
    /// The page did not exist and now holds exactly the text.
    Created,
    /// A previous marker on the page was swapped for the text.
    Replaced,
    /// An uncategorized page had the text appended.
    Categorized,
    /// The page already carries a category; nothing written.
    Unchanged,
}

impl TextChange {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Replaced => "replaced",
            Self::Categorized => "categorized",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Decide the new text for a page that must carry `text`.
///
/// `existing` is `None` when the page does not exist. Pages that already
/// hold any category marker are never rewritten unless they carry the
/// `replace` marker, which is then substituted in place.
pub fn plan_text_change(
    existing: Option<&str>,
    text: &str,
    replace: Option<&str>,
) -> (TextChange, Option<String>) {
    let Some(current) = existing else {
        return (TextChange::Created, Some(text.to_string()));
    };
    if let Some(marker) = replace
        && marker != text
        && current.contains(marker)
    {
        return (TextChange::Replaced, Some(current.replace(marker, text)));
    }
    if !current.contains(CATEGORY_PREFIX) {
        let body = current.trim_end();
        let new_text = if body.trim().is_empty() {
            text.to_string()
        } else {
            format!("{body}\n{text}")
        };
        return (TextChange::Categorized, Some(new_text));
    }
    (TextChange::Unchanged, None)
}

pub fn add_text_if_absent<W>(
    wiki: &mut W,
    title: &str,
    text: &str,
    replace: Option<&str>,
    summary: &str,
) -> Result<TextChange>
where
    W: WikiStore + ?Sized,
{
    let page = wiki
        .page(title)
        .with_context(|| format!("failed to read {title}"))?;
    let existing = page.exists.then_some(page.text.as_str());
    let (change, new_text) = plan_text_change(existing, text, replace);
    if let Some(new_text) = new_text {
        wiki.edit_page(title, &new_text, summary)
            .map_err(|error| crate::error::SyncError::wiki_write(title, format!("{error:#}")))?;
        debug!(title, change = change.as_str(), text, "page now carries marker");
    }
    Ok(change)
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub title: String,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub success: bool,
    pub organizations: usize,
    pub created: usize,
    pub replaced: usize,
    pub categorized: usize,
    pub unchanged: usize,
    pub errors: Vec<String>,
    pub pages: Vec<PageResult>,
    pub request_count: usize,
}

impl ReconcileReport {
    fn record(&mut self, title: String, outcome: Result<TextChange>) {
        match outcome {
            Ok(change) => {
                match change {
                    TextChange::Created => self.created += 1,
                    TextChange::Replaced => self.replaced += 1,
                    TextChange::Categorized => self.categorized += 1,
                    TextChange::Unchanged => self.unchanged += 1,
                }
                self.pages.push(PageResult {
                    title,
                    action: change.as_str().to_string(),
                    detail: None,
                });
            }
            Err(failure) => {
                error!(title = %title, error = %format!("{failure:#}"), "page reconciliation failed");
                self.errors.push(format!("{title}: {failure:#}"));
                self.pages.push(PageResult {
                    title,
                    action: "error".to_string(),
                    detail: Some(format!("{failure:#}")),
                });
            }
        }
    }
}

/// Ensure the category page and the catalogue content page for one placement.
pub fn create_pages<W>(
    wiki: &mut W,
    layout: &SiteLayout,
    placement: &Placement,
    report: &mut ReconcileReport,
) where
    W: WikiStore + ?Sized,
{
    let top_marker = layout.category_marker();
    let (category_text, replace) = match placement.parent.as_deref() {
        None => (top_marker, None),
        Some(parent) => (category_marker(parent), Some(top_marker.as_str())),
    };

    let category_title = layout.category_title(&placement.name);
    let outcome = add_text_if_absent(
        wiki,
        &category_title,
        &category_text,
        replace,
        &layout.edit_summary,
    );
    report.record(category_title, outcome);

    let content_title = layout.content_title(&placement.name);
    let outcome = add_text_if_absent(
        wiki,
        &content_title,
        &layout.catalogue_marker(),
        None,
        &layout.edit_summary,
    );
    report.record(content_title, outcome);
}

/// Materialize the hierarchy as categories and catalogue pages.
pub fn recreate_tree<W>(wiki: &mut W, layout: &SiteLayout, hierarchy: &Hierarchy) -> ReconcileReport
where
    W: WikiStore + ?Sized,
{
    info!(mode = hierarchy.mode().as_str(), "creating organization category tree and pages");
    let mut report = ReconcileReport::default();
    for placement in hierarchy.placements() {
        report.organizations += 1;
        create_pages(wiki, layout, &placement, &mut report);
    }
    report.request_count = wiki.request_count();
    report.success = report.errors.is_empty();
    info!(
        created = report.created,
        replaced = report.replaced,
        categorized = report.categorized,
        unchanged = report.unchanged,
        errors = report.errors.len(),
        "category tree done"
    );
    report
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NukeReport {
    pub success: bool,
    pub dry_run: bool,
    pub visited: usize,
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
    pub request_count: usize,
}

/// Tear down everything under the top-level organization category.
///
/// Members are visited depth-first and deleted after their own members
/// (post-order). Only categories and organization-namespace pages are
/// deleted; any other member is left alone. The top-level category itself
/// survives.
pub fn nuke_tree<W>(wiki: &mut W, layout: &SiteLayout, dry_run: bool, reason: &str) -> Result<NukeReport>
where
    W: WikiStore + ?Sized,
{
    info!(dry_run, "nuking organization category tree and pages");
    let mut report = NukeReport {
        dry_run,
        ..NukeReport::default()
    };
    let members = wiki
        .category_members(&layout.category)
        .with_context(|| format!("failed to list members of {}", layout.category))?;
    let mut visited = HashSet::new();
    for member in members {
        recurse_delete(wiki, layout, &member, dry_run, reason, &mut visited, &mut report);
    }
    report.request_count = wiki.request_count();
    report.success = report.errors.is_empty();
    info!(deleted = report.deleted.len(), errors = report.errors.len(), "nuke done");
    Ok(report)
}

fn recurse_delete<W>(
    wiki: &mut W,
    layout: &SiteLayout,
    title: &str,
    dry_run: bool,
    reason: &str,
    visited: &mut HashSet<String>,
    report: &mut NukeReport,
) where
    W: WikiStore + ?Sized,
{
    // Category graphs may loop.
    if !visited.insert(title.to_string()) {
        return;
    }
    report.visited += 1;

    let page = match wiki.page(title) {
        Ok(page) => page,
        Err(failure) => {
            report.errors.push(format!("{title}: {failure:#}"));
            return;
        }
    };
    if !page.exists {
        return;
    }

    if page.is_category() {
        match wiki.category_members(&page.title) {
            Ok(members) => {
                for member in members {
                    recurse_delete(wiki, layout, &member, dry_run, reason, visited, report);
                }
            }
            Err(failure) => {
                report.errors.push(format!("{title}: {failure:#}"));
                return;
            }
        }
    }

    if !(page.is_category() || page.namespace == layout.namespace_id) {
        return;
    }
    if dry_run {
        report.deleted.push(page.title);
        return;
    }
    match wiki.delete_page(&page.title, reason) {
        Ok(()) => {
            debug!(title = %page.title, "deleted");
            report.deleted.push(page.title);
        }
        Err(failure) => {
            error!(title = %page.title, error = %format!("{failure:#}"), "delete failed");
            report.errors.push(format!("{}: {failure:#}", page.title));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{TextChange, add_text_if_absent, nuke_tree, plan_text_change, recreate_tree};
    use crate::config::{HierarchyMode, SiteLayout};
    use crate::hierarchy::Hierarchy;
    use crate::model::OrganizationRecord;
    use crate::testing::MockWiki;

    const TOP: &str = "[[Category:Φορείς]]";

    fn records() -> Vec<OrganizationRecord> {
        vec![
            OrganizationRecord::new("10", "Υπουργείο Α"),
            OrganizationRecord::new("11", "Διεύθυνση Α1").with_parent("10"),
            OrganizationRecord::new("12", "Τμήμα Α1α").with_parent("11"),
        ]
    }

    #[test]
    fn missing_page_gets_exact_text() {
        assert_eq!(
            plan_text_change(None, TOP, None),
            (TextChange::Created, Some(TOP.to_string()))
        );
    }

    #[test]
    fn replace_marker_is_substituted() {
        let (change, text) = plan_text_change(
            Some("intro\n[[Category:Φορείς]]"),
            "[[Category:Γονέας]]",
            Some(TOP),
        );
        assert_eq!(change, TextChange::Replaced);
        assert_eq!(text.as_deref(), Some("intro\n[[Category:Γονέας]]"));
    }

    #[test]
    fn uncategorized_page_keeps_its_text() {
        let (change, text) = plan_text_change(Some("Χειροκίνητο κείμενο\n"), TOP, None);
        assert_eq!(change, TextChange::Categorized);
        assert_eq!(text.as_deref(), Some("Χειροκίνητο κείμενο\n[[Category:Φορείς]]"));

        let (change, text) = plan_text_change(Some("  "), TOP, None);
        assert_eq!(change, TextChange::Categorized);
        assert_eq!(text.as_deref(), Some(TOP));
    }

    #[test]
    fn categorized_page_is_left_alone() {
        assert_eq!(
            plan_text_change(Some("[[Category:Άλλη]]"), TOP, None),
            (TextChange::Unchanged, None)
        );
        assert_eq!(
            plan_text_change(Some("[[Category:Άλλη]]"), "[[Category:Γονέας]]", Some(TOP)),
            (TextChange::Unchanged, None)
        );
    }

    #[test]
    fn add_text_if_absent_is_idempotent() {
        let layout = SiteLayout::default();
        for initial in [None, Some(""), Some("κείμενο"), Some("x [[Category:Φορείς]]")] {
            let mut wiki = MockWiki::new(layout.clone());
            if let Some(text) = initial {
                wiki.pages.insert("Category:Χ".to_string(), text.to_string());
            }
            add_text_if_absent(&mut wiki, "Category:Χ", "[[Category:Γονέας]]", Some(TOP), "s")
                .expect("first");
            let once = wiki.text("Category:Χ").map(ToString::to_string);
            let second =
                add_text_if_absent(&mut wiki, "Category:Χ", "[[Category:Γονέας]]", Some(TOP), "s")
                    .expect("second");
            assert_eq!(second, TextChange::Unchanged, "{initial:?}");
            assert_eq!(wiki.text("Category:Χ").map(ToString::to_string), once);
        }
    }

    #[test]
    fn recreate_tree_creates_categories_and_catalogue_pages() {
        let layout = SiteLayout::default();
        let mut wiki = MockWiki::new(layout.clone());
        let hierarchy = Hierarchy::build(&records(), HierarchyMode::Tree);

        let report = recreate_tree(&mut wiki, &layout, &hierarchy);
        assert!(report.success);
        assert_eq!(report.organizations, 3);
        assert_eq!(report.created, 6);
        assert_eq!(wiki.text("Category:Υπουργείο Α"), Some(TOP));
        assert_eq!(
            wiki.text("Category:Διεύθυνση Α1"),
            Some("[[Category:Υπουργείο Α]]")
        );
        assert_eq!(
            wiki.text("Category:Τμήμα Α1α"),
            Some("[[Category:Διεύθυνση Α1]]")
        );
        assert_eq!(
            wiki.text("Φορέας:Τμήμα Α1α"),
            Some("[[Category:Κατάλογος Φορέων]]")
        );

        let edits = wiki.edits.len();
        let again = recreate_tree(&mut wiki, &layout, &hierarchy);
        assert_eq!(again.unchanged, 6);
        assert_eq!(wiki.edits.len(), edits);
    }

    #[test]
    fn reparented_category_swaps_top_level_marker() {
        let layout = SiteLayout::default();
        let mut wiki = MockWiki::new(layout.clone())
            .with_page("Category:Διεύθυνση Α1", "Περιγραφή\n[[Category:Φορείς]]");
        let hierarchy = Hierarchy::build(&records(), HierarchyMode::Tree);

        let report = recreate_tree(&mut wiki, &layout, &hierarchy);
        assert_eq!(report.replaced, 1);
        assert_eq!(
            wiki.text("Category:Διεύθυνση Α1"),
            Some("Περιγραφή\n[[Category:Υπουργείο Α]]")
        );
    }

    #[test]
    fn failed_write_does_not_abort_the_batch() {
        let layout = SiteLayout::default();
        let mut wiki = MockWiki::new(layout.clone());
        wiki.failing_edits.insert("Category:Διεύθυνση Α1".to_string());
        let hierarchy = Hierarchy::build(&records(), HierarchyMode::Tree);

        let report = recreate_tree(&mut wiki, &layout, &hierarchy);
        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("wiki write failed"));
        assert_eq!(report.created, 5);
        assert!(wiki.text("Category:Τμήμα Α1α").is_some());
    }

    #[test]
    fn nuke_deletes_members_before_their_category() {
        let layout = SiteLayout::default();
        let mut wiki = MockWiki::new(layout.clone());
        let hierarchy = Hierarchy::build(&records(), HierarchyMode::Tree);
        recreate_tree(&mut wiki, &layout, &hierarchy);
        wiki.pages.insert(
            "Φορέας:Σημείωμα".to_string(),
            "[[Category:Διεύθυνση Α1]]".to_string(),
        );
        wiki.pages.insert(
            "Κύρια σελίδα".to_string(),
            "[[Category:Υπουργείο Α]]".to_string(),
        );

        let preview = nuke_tree(&mut wiki, &layout, true, "reset").expect("dry run");
        assert!(wiki.deletes.is_empty());
        assert_eq!(preview.deleted.len(), 4);

        let report = nuke_tree(&mut wiki, &layout, false, "reset").expect("nuke");
        assert!(report.success);
        assert_eq!(
            wiki.deletes,
            vec![
                "Category:Τμήμα Α1α".to_string(),
                "Φορέας:Σημείωμα".to_string(),
                "Category:Διεύθυνση Α1".to_string(),
                "Category:Υπουργείο Α".to_string(),
            ]
        );
        assert!(wiki.text("Κύρια σελίδα").is_some());
        assert!(wiki.text("Φορέας:Υπουργείο Α").is_some());
    }

    #[test]
    fn nuke_spares_main_namespace_titles_sharing_the_namespace_word() {
        let layout = SiteLayout::default();
        let mut wiki = MockWiki::new(layout.clone());
        let hierarchy = Hierarchy::build(&records(), HierarchyMode::Tree);
        recreate_tree(&mut wiki, &layout, &hierarchy);
        wiki.pages.insert(
            "Φορέας Πληροφορικής (οδηγός)".to_string(),
            "[[Category:Υπουργείο Α]]".to_string(),
        );

        let report = nuke_tree(&mut wiki, &layout, false, "reset").expect("nuke");
        assert!(report.success);
        assert!(wiki.text("Φορέας Πληροφορικής (οδηγός)").is_some());
        assert!(!wiki.deletes.contains(&"Φορέας Πληροφορικής (οδηγός)".to_string()));
        assert!(wiki.deletes.contains(&"Category:Υπουργείο Α".to_string()));
    }
}
