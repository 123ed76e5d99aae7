use serde::{Deserialize, Serialize};

pub type DictionaryId = i64;

/// One organization as returned by the registry.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationRecord {
    pub code: String,
    pub preferred_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_organization_of: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub purpose: Vec<DictionaryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_type: Option<DictionaryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_point: Option<ContactPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foundation_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_date: Option<String>,
}

impl OrganizationRecord {
    pub fn new(code: impl Into<String>, preferred_label: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            preferred_label: preferred_label.into(),
            sub_organization_of: None,
            purpose: Vec::new(),
            organization_type: None,
            status: None,
            contact_point: None,
            main_address: None,
            alternative_labels: Vec::new(),
            description: None,
            url: None,
            identifier: None,
            vat_id: None,
            foundation_date: None,
            termination_date: None,
        }
    }

    pub fn with_parent(mut self, parent_code: impl Into<String>) -> Self {
        self.sub_organization_of = Some(parent_code.into());
        self
    }

    /// Page title for this organization: the label with whitespace collapsed.
    pub fn title(&self) -> String {
        normalize_label(&self.preferred_label)
    }

    pub fn parent_code(&self) -> Option<&str> {
        self.sub_organization_of
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContactPoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telephone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DictionaryEntry {
    pub id: DictionaryId,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryKind {
    Functions,
    OrganizationTypes,
}

impl DictionaryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Functions => "Functions",
            Self::OrganizationTypes => "OrganizationTypes",
        }
    }
}

/// A node of the registry's unit tree for a single organization.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationUnit {
    pub code: String,
    pub preferred_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_type: Option<DictionaryId>,
    #[serde(default, skip_serializing)]
    pub children: Vec<OrganizationUnit>,
}

pub fn normalize_label(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::{OrganizationRecord, normalize_label};

    #[test]
    fn normalize_label_collapses_whitespace() {
        assert_eq!(normalize_label("  ΔΗΜΟΣ   ΑΘΗΝΑΙΩΝ \n"), "ΔΗΜΟΣ ΑΘΗΝΑΙΩΝ");
    }

    #[test]
    fn record_decodes_registry_payload() {
        let record: OrganizationRecord = serde_json::from_str(
            r#"{
                "code": "100",
                "preferredLabel": "ΥΠΟΥΡΓΕΙΟ  ΥΓΕΙΑΣ",
                "subOrganizationOf": "1",
                "purpose": [3, 7],
                "organizationType": 2,
                "status": "Active",
                "contactPoint": {"telephone": "+30 210 1234567", "email": "info@example.gr"},
                "mainAddress": {"fullAddress": "Αριστοτέλους 17", "postCode": "10433", "extra": 1},
                "unknownField": true
            }"#,
        )
        .expect("decode record");
        assert_eq!(record.title(), "ΥΠΟΥΡΓΕΙΟ ΥΓΕΙΑΣ");
        assert_eq!(record.parent_code(), Some("1"));
        assert_eq!(record.purpose, vec![3, 7]);
        assert_eq!(
            record
                .main_address
                .as_ref()
                .and_then(|address| address.post_code.as_deref()),
            Some("10433")
        );
    }

    #[test]
    fn blank_parent_code_is_treated_as_root() {
        let record = OrganizationRecord::new("5", "Root").with_parent("  ");
        assert_eq!(record.parent_code(), None);
    }
}
