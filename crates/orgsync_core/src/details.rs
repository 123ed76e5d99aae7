use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SiteLayout;
use crate::error::SyncError;
use crate::lookup::{Lookup, LookupCache};
use crate::model::{Address, ContactPoint, OrganizationRecord};
use crate::registry::RegistryApi;
use crate::snapshot::{SnapshotKind, SnapshotStore};
use crate::wiki::WikiStore;

pub const STATUS_TRANSLATION: [(&str, &str); 2] = [("Active", "Ενεργός"), ("Inactive", "Ανενεργός")];

/// A registry record with coded fields replaced by display labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationDetails {
    pub code: String,
    pub preferred_label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_point: Option<ContactPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_address: Option<Address>,
    /// Parent organization name; empty when the parent code did not resolve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_organization_of: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Comma-joined purpose names; unset unless every id resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foundation_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_type: Option<String>,
}

pub type DetailsMap = BTreeMap<String, OrganizationDetails>;

pub fn translate_status(organization: &str, status: &str) -> Result<String, SyncError> {
    STATUS_TRANSLATION
        .iter()
        .find(|(raw, _)| *raw == status)
        .map(|(_, label)| (*label).to_string())
        .ok_or_else(|| SyncError::UnknownStatus {
            organization: organization.to_string(),
            status: status.to_string(),
        })
}

/// Translate the coded fields of one record.
///
/// Unresolvable parent, purpose and type values are logged and blanked. A
/// single unresolvable purpose id blanks the whole purpose field. An
/// unknown status is an error.
pub fn translate_record<R>(
    api: &mut R,
    cache: &mut LookupCache,
    record: OrganizationRecord,
) -> Result<OrganizationDetails, SyncError>
where
    R: RegistryApi + ?Sized,
{
    let name = record.title();

    let sub_organization_of = match record.parent_code() {
        Some(parent) => Some(
            cache
                .resolve_name(api, parent)
                .or_warn(&name, "subOrganizationOf")
                .unwrap_or_default(),
        ),
        None => None,
    };

    let mut purposes = Vec::with_capacity(record.purpose.len());
    let mut purposes_complete = true;
    for id in &record.purpose {
        match cache.resolve_purpose(api, *id).or_warn(&name, "purpose") {
            Some(purpose) => purposes.push(purpose),
            None => purposes_complete = false,
        }
    }
    let purpose = (purposes_complete && !purposes.is_empty()).then(|| purposes.join(","));

    let status = match record.status.as_deref().filter(|status| !status.is_empty()) {
        Some(status) => Some(translate_status(&name, status)?),
        None => None,
    };

    let organization_type = record
        .organization_type
        .and_then(|id| cache.resolve_type(api, id).or_warn(&name, "organizationType"));

    Ok(OrganizationDetails {
        code: record.code,
        preferred_label: record.preferred_label,
        alternative_labels: record.alternative_labels,
        description: record.description,
        url: record.url,
        contact_point: record.contact_point,
        main_address: record.main_address,
        sub_organization_of,
        identifier: record.identifier,
        purpose,
        vat_id: record.vat_id,
        status,
        foundation_date: record.foundation_date,
        termination_date: record.termination_date,
        organization_type,
    })
}

/// Titles of every existing content page, namespace prefix removed.
pub fn content_page_names<W>(wiki: &mut W, layout: &SiteLayout) -> Result<Vec<String>>
where
    W: WikiStore + ?Sized,
{
    let titles = wiki
        .all_pages(layout.namespace_id)
        .with_context(|| format!("failed to enumerate {} pages", layout.namespace))?;
    Ok(titles
        .iter()
        .map(|title| layout.strip_namespace(title).to_string())
        .collect())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DetailsReport {
    pub success: bool,
    pub requested: usize,
    pub fetched: usize,
    /// Names with no registry code.
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
    pub details: DetailsMap,
    pub request_count: usize,
}

/// Resolve and translate the full record of every named organization.
///
/// Names without a code are skipped and records that fail to fetch are
/// omitted; both are reported. An unknown status aborts the run.
pub fn fetch_details<R, F>(
    api: &mut R,
    cache: &mut LookupCache,
    names: &[String],
    mut load_all: F,
) -> Result<DetailsReport>
where
    R: RegistryApi + ?Sized,
    F: FnMut(&mut R) -> Result<Vec<OrganizationRecord>>,
{
    info!(organizations = names.len(), "fetching organization details");
    let mut report = DetailsReport {
        requested: names.len(),
        ..DetailsReport::default()
    };

    for name in names {
        let code = match cache.code_by_name(api, name, |api| load_all(api))? {
            Lookup::Found(code) => code,
            Lookup::Missing { reason } => {
                warn!(name = %name, %reason, "no registry code; skipping");
                report.skipped.push(name.clone());
                continue;
            }
        };
        let record = match cache.record_by_code(api, &code) {
            Lookup::Found(record) => record,
            Lookup::Missing { reason } => {
                let error = SyncError::upstream(format!("organization {code}"), reason);
                warn!(name = %name, code = %code, %error, "record unavailable; skipping");
                report.errors.push(format!("{name}: {error}"));
                continue;
            }
        };
        let details = translate_record(api, cache, record)?;
        debug!(name = %name, code = %code, "fetched details");
        report.details.insert(name.clone(), details);
    }

    report.fetched = report.details.len();
    report.request_count = api.request_count();
    report.success = report.errors.is_empty();
    info!(
        fetched = report.fetched,
        skipped = report.skipped.len(),
        errors = report.errors.len(),
        "organization details fetched"
    );
    Ok(report)
}

/// Details for the whole site, from the snapshot unless `refresh` is set.
///
/// A fresh fetch is persisted only when it completed without errors, so a
/// partial map never stands in for the full set on a later run.
pub fn cached_details<F>(store: &SnapshotStore, refresh: bool, fetch: F) -> Result<DetailsReport>
where
    F: FnOnce() -> Result<DetailsReport>,
{
    if !refresh && let Some(details) = store.load::<DetailsMap>(SnapshotKind::Details)? {
        return Ok(DetailsReport {
            success: true,
            requested: details.len(),
            fetched: details.len(),
            details,
            ..DetailsReport::default()
        });
    }

    let report = fetch()?;
    if report.success {
        store.save(SnapshotKind::Details, &report.details)?;
    } else {
        warn!(
            errors = report.errors.len(),
            "details fetch incomplete; snapshot not updated"
        );
    }
    Ok(report)
}
