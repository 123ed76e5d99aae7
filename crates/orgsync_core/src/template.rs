use std::ops::Range;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::config::SiteLayout;
use crate::details::OrganizationDetails;

/// Template parameters in render order. Compound keys address a nested
/// field as `<outer>_<inner>`.
pub const FIELD_KEYS: [&str; 17] = [
    "code",
    "preferredLabel",
    "alternativeLabels",
    "description",
    "url",
    "contactPoint_telephone",
    "contactPoint_email",
    "mainAddress_fullAddress",
    "mainAddress_postCode",
    "subOrganizationOf",
    "identifier",
    "purpose",
    "vatId",
    "status",
    "foundationDate",
    "terminationDate",
    "organizationType",
];

const TELEPHONE_KEY: &str = "contactPoint_telephone";
const COUNTRY_PREFIX: &str = "+30";

/// Serialize one organization into `{{Template|prefixkey=value|...}}`.
///
/// Every parameter is emitted; fields without a value render empty.
pub fn render_template(details: &OrganizationDetails, layout: &SiteLayout) -> Result<String> {
    let fields = serde_json::to_value(details)
        .with_context(|| format!("failed to serialize details for {}", details.code))?;

    let mut rendered = format!("{{{{{}", layout.template_name);
    for key in FIELD_KEYS {
        let mut value = field_value(&fields, key)
            .map(|value| xml_escape(&value))
            .unwrap_or_default();
        if key == TELEPHONE_KEY {
            value = clean_telephone(&value);
        }
        rendered.push('|');
        rendered.push_str(&layout.template_param_prefix);
        rendered.push_str(key);
        rendered.push('=');
        rendered.push_str(&value);
    }
    rendered.push_str("}}");
    Ok(rendered)
}

fn field_value(fields: &Value, key: &str) -> Option<String> {
    let value = match key.split_once('_') {
        Some((outer, inner)) => fields.get(outer)?.get(inner)?,
        None => fields.get(key)?,
    };
    value_text(value)
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Object(_) => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(value_text)
                .collect::<Vec<_>>()
                .join(","),
        ),
    }
}

pub fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Keep only the leading national digits of a registry telephone value.
pub fn clean_telephone(value: &str) -> String {
    let compact = value.replace(' ', "");
    let national = compact.strip_prefix(COUNTRY_PREFIX).unwrap_or(&compact);
    national
        .chars()
        .take_while(char::is_ascii_digit)
        .collect()
}

/// Byte range of the first top-level `{{name ...}}` block in `text`,
/// braces balanced. Templates nested inside another template are not
/// considered, and an unterminated block yields `None`.
pub fn find_template_block(text: &str, name: &str) -> Option<Range<usize>> {
    let bytes = text.as_bytes();
    let mut index = 0;
    while index + 1 < bytes.len() {
        if bytes[index] != b'{' || bytes[index + 1] != b'{' {
            index += 1;
            continue;
        }
        let end = balanced_end(bytes, index);
        if opens_template(&text[index + 2..], name) {
            return end.map(|end| index..end);
        }
        index = end.unwrap_or(index + 2);
    }
    None
}

fn opens_template(after_braces: &str, name: &str) -> bool {
    let Some(rest) = after_braces.trim_start().strip_prefix(name) else {
        return false;
    };
    match rest.chars().next() {
        None => true,
        Some(next) => next == '|' || next == '}' || next.is_whitespace(),
    }
}

fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut index = start;
    while index + 1 < bytes.len() {
        match (bytes[index], bytes[index + 1]) {
            (b'{', b'{') => {
                depth += 1;
                index += 2;
            }
            (b'}', b'}') => {
                depth = depth.saturating_sub(1);
                index += 2;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => index += 1,
        }
    }
    None
}

/// Replace the first template block with `rendered`, keeping whatever
/// hand-written text surrounds it below the block.
pub fn merge_template_block(existing: &str, rendered: &str, name: &str) -> String {
    let leftovers = match find_template_block(existing, name) {
        Some(range) => format!("{}{}", &existing[..range.start], &existing[range.end..]),
        None => existing.to_string(),
    };
    let leftovers = leftovers.trim();
    if leftovers.is_empty() {
        rendered.to_string()
    } else {
        format!("{rendered}\n{leftovers}")
    }
}
