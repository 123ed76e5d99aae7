use anyhow::{Context, Result};
use tracing::info;

use crate::lookup::LookupCache;
use crate::model::{DictionaryId, OrganizationRecord, OrganizationUnit};
use crate::registry::RegistryApi;

/// Flatten a unit tree below `root`, children listed before their parent.
/// The root itself is not included.
pub fn flatten_units(root: OrganizationUnit) -> Vec<OrganizationUnit> {
    let mut out = Vec::new();
    for child in root.children {
        push_unit(child, &mut out);
    }
    out
}

fn push_unit(mut unit: OrganizationUnit, out: &mut Vec<OrganizationUnit>) {
    for child in std::mem::take(&mut unit.children) {
        push_unit(child, out);
    }
    out.push(unit);
}

/// Units of the named organization, optionally restricted to `unit_types`.
/// An unknown name is a lookup error; an organization without a unit tree
/// yields no units.
pub fn units<R, F>(
    api: &mut R,
    cache: &mut LookupCache,
    name: &str,
    unit_types: &[DictionaryId],
    load_all: F,
) -> Result<Vec<OrganizationUnit>>
where
    R: RegistryApi + ?Sized,
    F: FnOnce(&mut R) -> Result<Vec<OrganizationRecord>>,
{
    let code = cache.code_by_name(api, name, load_all)?.into_error(name)?;
    let Some(tree) = api
        .organization_tree(&code)
        .with_context(|| format!("failed to fetch unit tree for {name} ({code})"))?
    else {
        return Ok(Vec::new());
    };

    let mut found = flatten_units(tree);
    if !unit_types.is_empty() {
        found.retain(|unit| {
            unit.unit_type
                .is_some_and(|unit_type| unit_types.contains(&unit_type))
        });
    }
    info!(name, code = %code, units = found.len(), "listed organization units");
    Ok(found)
}
