//! In-memory registry and wiki used by the unit tests.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};

use crate::config::SiteLayout;
use crate::model::{DictionaryEntry, DictionaryKind, OrganizationRecord, OrganizationUnit};
use crate::registry::RegistryApi;
use crate::wiki::{NS_CATEGORY, NS_MAIN, WikiPage, WikiStore, category_title};

#[derive(Debug, Default)]
pub struct MockRegistry {
    pub records: Vec<OrganizationRecord>,
    pub functions: Vec<DictionaryEntry>,
    pub organization_types: Vec<DictionaryEntry>,
    pub trees: BTreeMap<String, OrganizationUnit>,
    pub failing_codes: BTreeSet<String>,
    pub fail_listing: bool,
    pub fail_dictionaries: bool,
    pub listing_calls: usize,
    pub dictionary_calls: usize,
    request_count: usize,
}

impl MockRegistry {
    pub fn with_records(records: Vec<OrganizationRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }
}

impl RegistryApi for MockRegistry {
    fn organizations(&mut self) -> Result<Vec<OrganizationRecord>> {
        self.request_count += 1;
        self.listing_calls += 1;
        if self.fail_listing {
            bail!("registry listing unavailable");
        }
        Ok(self.records.clone())
    }

    fn organization(&mut self, code: &str) -> Result<Option<OrganizationRecord>> {
        self.request_count += 1;
        if self.failing_codes.contains(code) {
            bail!("registry returned HTTP 500 for {code}");
        }
        Ok(self.records.iter().find(|record| record.code == code).cloned())
    }

    fn search(&mut self, preferred_label: &str) -> Result<Option<OrganizationRecord>> {
        self.request_count += 1;
        Ok(self
            .records
            .iter()
            .find(|record| record.title() == preferred_label)
            .cloned())
    }

    fn dictionary(&mut self, kind: DictionaryKind) -> Result<Vec<DictionaryEntry>> {
        self.request_count += 1;
        self.dictionary_calls += 1;
        if self.fail_dictionaries {
            bail!("registry returned HTTP 503 for dictionary {}", kind.as_str());
        }
        Ok(match kind {
            DictionaryKind::Functions => self.functions.clone(),
            DictionaryKind::OrganizationTypes => self.organization_types.clone(),
        })
    }

    fn organization_tree(&mut self, code: &str) -> Result<Option<OrganizationUnit>> {
        self.request_count += 1;
        Ok(self.trees.get(code).cloned())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Category membership is derived from `[[Category:..]]` markers in page text.
#[derive(Debug)]
pub struct MockWiki {
    pub layout: SiteLayout,
    pub pages: BTreeMap<String, String>,
    pub edits: Vec<String>,
    pub deletes: Vec<String>,
    pub failing_edits: BTreeSet<String>,
    pub failing_deletes: BTreeSet<String>,
    request_count: usize,
}

impl MockWiki {
    pub fn new(layout: SiteLayout) -> Self {
        Self {
            layout,
            pages: BTreeMap::new(),
            edits: Vec::new(),
            deletes: Vec::new(),
            failing_edits: BTreeSet::new(),
            failing_deletes: BTreeSet::new(),
            request_count: 0,
        }
    }

    pub fn with_page(mut self, title: &str, text: &str) -> Self {
        self.pages.insert(title.to_string(), text.to_string());
        self
    }

    pub fn text(&self, title: &str) -> Option<&str> {
        self.pages.get(title).map(String::as_str)
    }

    fn namespace_of(&self, title: &str) -> i32 {
        if title.starts_with("Category:") {
            NS_CATEGORY
        } else if title.starts_with(&format!("{}:", self.layout.namespace)) {
            self.layout.namespace_id
        } else {
            NS_MAIN
        }
    }
}

impl WikiStore for MockWiki {
    fn page(&mut self, title: &str) -> Result<WikiPage> {
        self.request_count += 1;
        let namespace = self.namespace_of(title);
        Ok(match self.pages.get(title) {
            Some(text) => WikiPage {
                title: title.to_string(),
                namespace,
                exists: true,
                text: text.clone(),
            },
            None => WikiPage::missing(title, namespace),
        })
    }

    fn category_members(&mut self, category: &str) -> Result<Vec<String>> {
        self.request_count += 1;
        let title = category_title(category);
        let marker = format!("[[{title}]]");
        Ok(self
            .pages
            .iter()
            .filter(|(_, text)| text.contains(&marker))
            .map(|(title, _)| title.clone())
            .collect())
    }

    fn all_pages(&mut self, namespace: i32) -> Result<Vec<String>> {
        self.request_count += 1;
        Ok(self
            .pages
            .keys()
            .filter(|title| self.namespace_of(title) == namespace)
            .cloned()
            .collect())
    }

    fn edit_page(&mut self, title: &str, text: &str, _summary: &str) -> Result<()> {
        self.request_count += 1;
        if self.failing_edits.contains(title) {
            bail!("MediaWiki API error [protectedpage]: {title} is protected");
        }
        self.edits.push(title.to_string());
        self.pages.insert(title.to_string(), text.to_string());
        Ok(())
    }

    fn delete_page(&mut self, title: &str, _reason: &str) -> Result<()> {
        self.request_count += 1;
        if self.failing_deletes.contains(title) {
            bail!("MediaWiki API error [permissiondenied]: cannot delete {title}");
        }
        self.deletes.push(title.to_string());
        self.pages.remove(title);
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}
