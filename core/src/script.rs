//! NSE script output tables and the accessors used to pull vulnerability
//! fields out of them.
//!
//! Nmap renders structured script output as nested `<table key="...">` and
//! `<elem key="...">text</elem>` nodes. Lookups follow document order: a
//! "descendant" lookup returns the first match in a pre-order walk below the
//! table it starts from.

use crate::model::{
    VulnerabilityRecord, MISSING_CVSS, MISSING_DESCRIPTION, UNKNOWN_DISCLOSURE,
};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptTable {
    pub key: Option<String>,
    pub children: Vec<TableNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableNode {
    Elem { key: Option<String>, text: String },
    Table(ScriptTable),
}

impl ScriptTable {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key,
            children: Vec::new(),
        }
    }

    fn has_key(&self, key: &str) -> bool {
        self.key.as_deref() == Some(key)
    }

    /// Text of every direct `elem` child, keyed or not.
    pub fn elem_texts(&self) -> impl Iterator<Item = &str> {
        self.children.iter().filter_map(|node| match node {
            TableNode::Elem { text, .. } => Some(text.as_str()),
            TableNode::Table(_) => None,
        })
    }

    /// First descendant `elem` with the given key.
    pub fn find_elem(&self, key: &str) -> Option<&str> {
        for node in &self.children {
            match node {
                TableNode::Elem { key: Some(k), text } if k == key => return Some(text),
                TableNode::Elem { .. } => {}
                TableNode::Table(table) => {
                    if let Some(text) = table.find_elem(key) {
                        return Some(text);
                    }
                }
            }
        }
        None
    }

    /// First descendant table with the given key.
    pub fn find_table(&self, key: &str) -> Option<&ScriptTable> {
        for node in &self.children {
            if let TableNode::Table(table) = node {
                if table.has_key(key) {
                    return Some(table);
                }
                if let Some(found) = table.find_table(key) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Every descendant table with the given key, in document order.
    pub fn find_tables(&self, key: &str) -> Vec<&ScriptTable> {
        let mut found = Vec::new();
        self.collect_tables(key, &mut found);
        found
    }

    fn collect_tables<'a>(&'a self, key: &str, found: &mut Vec<&'a ScriptTable>) {
        for node in &self.children {
            if let TableNode::Table(table) = node {
                if table.has_key(key) {
                    found.push(table);
                }
                table.collect_tables(key, found);
            }
        }
    }
}

/// Required field: absence discards the whole record.
fn required<'a>(table: &'a ScriptTable, key: &str) -> Option<&'a str> {
    table.find_elem(key)
}

/// Optional field with an explicit fallback.
fn optional(table: &ScriptTable, key: &str, default: &str) -> String {
    table.find_elem(key).unwrap_or(default).to_string()
}

/// CVE identifiers listed under the `ids` table, reduced to their trailing
/// colon segment (`CVE:CVE-2021-1234` becomes `CVE-2021-1234`).
pub fn cve_ids(table: &ScriptTable) -> Vec<String> {
    table
        .find_table("ids")
        .map(|ids| {
            ids.elem_texts()
                .filter(|text| !text.is_empty())
                .map(|text| text.rsplit(':').next().unwrap_or(text).to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// First line of the `description` table.
pub fn description(table: &ScriptTable) -> String {
    table
        .find_tables("description")
        .into_iter()
        .find_map(|desc| desc.elem_texts().next())
        .filter(|text| !text.is_empty())
        .unwrap_or(MISSING_DESCRIPTION)
        .to_string()
}

pub fn references(table: &ScriptTable) -> Vec<String> {
    table
        .find_table("refs")
        .map(|refs| {
            refs.elem_texts()
                .filter(|text| !text.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Whether a script attached to a port should be read for vulnerability
/// data.
pub fn is_vulnerability_candidate(script_id: &str, output: &str) -> bool {
    output.to_lowercase().contains("vulnerable") || script_id.contains("vulners")
}

/// Builds one record from a candidate script's table. `title` and `state`
/// are required; without either the script contributes nothing.
pub fn extract_vulnerability(
    table: &ScriptTable,
    port: &str,
    service: &str,
) -> Option<VulnerabilityRecord> {
    let (Some(name), Some(state)) = (required(table, "title"), required(table, "state")) else {
        debug!(port, service, "discarding script table without title or state");
        return None;
    };

    Some(VulnerabilityRecord {
        port: port.to_string(),
        service: service.to_string(),
        name: name.to_string(),
        state: state.to_string(),
        cve: cve_ids(table),
        cvss: optional(table, "cvss", MISSING_CVSS),
        description: description(table),
        disclosure_date: optional(table, "disclosure", UNKNOWN_DISCLOSURE),
        references: references(table),
    })
}
