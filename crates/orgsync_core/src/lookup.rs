use std::collections::HashMap;

use anyhow::Result;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::model::{DictionaryId, DictionaryKind, OrganizationRecord, normalize_label};
use crate::registry::RegistryApi;

/// Outcome of translating a code or id, leaving the caller to decide
/// whether a miss is logged and blanked or escalated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    Missing { reason: String },
}

impl<T> Lookup<T> {
    pub fn missing(reason: impl Into<String>) -> Self {
        Self::Missing {
            reason: reason.into(),
        }
    }

    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::Missing { .. } => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Log a miss against `organization` and keep going without the value.
    pub fn or_warn(self, organization: &str, field: &str) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::Missing { reason } => {
                warn!(organization, field, %reason, "lookup missed; leaving field unset");
                None
            }
        }
    }

    pub fn into_error(self, key: &str) -> Result<T, SyncError> {
        match self {
            Self::Found(value) => Ok(value),
            Self::Missing { reason } => Err(SyncError::lookup(key, reason)),
        }
    }
}

/// Memoized registry translations for one run.
///
/// Record misses are not remembered, so a later call retries the registry.
/// A failed dictionary fetch is remembered until [`LookupCache::clear`],
/// which also picks up renames in a long-lived process.
#[derive(Debug, Default)]
pub struct LookupCache {
    records_by_code: HashMap<String, OrganizationRecord>,
    name_by_code: HashMap<String, String>,
    code_by_name: Option<HashMap<String, String>>,
    purpose_by_id: Option<DictionarySlot>,
    type_by_id: Option<DictionarySlot>,
}

type DictionarySlot = std::result::Result<HashMap<DictionaryId, String>, String>;

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn record_by_code<R>(&mut self, api: &mut R, code: &str) -> Lookup<OrganizationRecord>
    where
        R: RegistryApi + ?Sized,
    {
        if let Some(record) = self.records_by_code.get(code) {
            return Lookup::Found(record.clone());
        }
        match api.organization(code) {
            Ok(Some(record)) => {
                self.name_by_code
                    .insert(code.to_string(), record.title());
                self.records_by_code.insert(code.to_string(), record.clone());
                Lookup::Found(record)
            }
            Ok(None) => Lookup::missing(format!("no registry record for code {code}")),
            Err(error) => {
                let error = SyncError::upstream(format!("organization {code}"), format!("{error:#}"));
                warn!(code, %error, "registry fetch failed");
                Lookup::missing(error.to_string())
            }
        }
    }

    pub fn resolve_name<R>(&mut self, api: &mut R, code: &str) -> Lookup<String>
    where
        R: RegistryApi + ?Sized,
    {
        if let Some(name) = self.name_by_code.get(code) {
            return Lookup::Found(name.clone());
        }
        match self.record_by_code(api, code) {
            Lookup::Found(record) => Lookup::Found(record.title()),
            Lookup::Missing { reason } => Lookup::Missing { reason },
        }
    }

    pub fn resolve_purpose<R>(&mut self, api: &mut R, id: DictionaryId) -> Lookup<String>
    where
        R: RegistryApi + ?Sized,
    {
        let table = match load_dictionary(&mut self.purpose_by_id, api, DictionaryKind::Functions) {
            Ok(table) => table,
            Err(reason) => return Lookup::missing(reason),
        };
        match table.get(&id) {
            Some(name) => Lookup::Found(name.clone()),
            None => Lookup::missing(format!("purpose id {id} is not in the Functions dictionary")),
        }
    }

    pub fn resolve_type<R>(&mut self, api: &mut R, id: DictionaryId) -> Lookup<String>
    where
        R: RegistryApi + ?Sized,
    {
        let table = match load_dictionary(
            &mut self.type_by_id,
            api,
            DictionaryKind::OrganizationTypes,
        ) {
            Ok(table) => table,
            Err(reason) => return Lookup::missing(reason),
        };
        match table.get(&id) {
            Some(name) => Lookup::Found(name.clone()),
            None => Lookup::missing(format!(
                "type id {id} is not in the OrganizationTypes dictionary"
            )),
        }
    }

    /// Translate a page name back to its registry code. The index over the
    /// full record set is built on first use from `load_all`.
    pub fn code_by_name<R, F>(&mut self, api: &mut R, name: &str, load_all: F) -> Result<Lookup<String>>
    where
        R: RegistryApi + ?Sized,
        F: FnOnce(&mut R) -> Result<Vec<OrganizationRecord>>,
    {
        if self.code_by_name.is_none() {
            let records = load_all(api)?;
            self.seed_name_index(&records);
        }
        let key = normalize_label(name);
        Ok(match self.code_by_name.as_ref().and_then(|index| index.get(&key)) {
            Some(code) => Lookup::Found(code.clone()),
            None => Lookup::missing(format!("no registry organization is labelled `{key}`")),
        })
    }

    pub fn seed_name_index(&mut self, records: &[OrganizationRecord]) {
        let index = records
            .iter()
            .map(|record| (record.title(), record.code.clone()))
            .collect::<HashMap<_, _>>();
        debug!(entries = index.len(), "built name-to-code index");
        self.code_by_name = Some(index);
    }
}

fn load_dictionary<'a, R>(
    slot: &'a mut Option<DictionarySlot>,
    api: &mut R,
    kind: DictionaryKind,
) -> std::result::Result<&'a HashMap<DictionaryId, String>, String>
where
    R: RegistryApi + ?Sized,
{
    let loaded = slot.get_or_insert_with(|| match api.dictionary(kind) {
        Ok(entries) => Ok(entries
            .into_iter()
            .map(|entry| (entry.id, entry.description))
            .collect()),
        Err(error) => {
            let error = SyncError::upstream(
                format!("dictionary {}", kind.as_str()),
                format!("{error:#}"),
            );
            warn!(dictionary = kind.as_str(), %error, "dictionary fetch failed");
            Err(error.to_string())
        }
    });
    loaded.as_ref().map_err(Clone::clone)
}
