use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const UNKNOWN_OS: &str = "Unknown";
pub const UNKNOWN_SERVICE: &str = "unknown";
pub const MISSING_COMMAND: &str = "Command not found";
pub const MISSING_CVSS: &str = "N/A";
pub const MISSING_DESCRIPTION: &str = "N/A";
pub const UNKNOWN_DISCLOSURE: &str = "unknown";

/// Stable identifier assigned to a host in document order at parse time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct HostId(pub usize);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostRecord {
    pub id: HostId,
    pub ip: String,
    pub os: String,
    pub ports: Vec<PortEntry>,
    pub vulnerabilities: Vec<VulnerabilityRecord>,
    pub max_cvss: f64,
}

impl HostRecord {
    pub fn max_severity(&self) -> Severity {
        Severity::from_score(self.max_cvss)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortEntry {
    pub port_id: String,
    pub service_name: String,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl PortEntry {
    /// Numeric port, if the id parses.
    pub fn number(&self) -> Option<u16> {
        self.port_id.trim().parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VulnerabilityRecord {
    pub port: String,
    pub service: String,
    pub name: String,
    pub state: String,
    pub cve: Vec<String>,
    pub cvss: String,
    pub description: String,
    pub disclosure_date: String,
    #[serde(default)]
    pub references: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanSummary {
    pub nmap_command: String,
    pub scanned_assets: usize,
    pub os_families: BTreeMap<String, usize>,
    /// Sum of open ports per host; not a count of distinct services.
    pub services: usize,
    pub ports: usize,
    pub cve_counts: BTreeMap<Severity, usize>,
}

impl ScanSummary {
    pub fn empty(nmap_command: impl Into<String>) -> Self {
        Self {
            nmap_command: nmap_command.into(),
            scanned_assets: 0,
            os_families: BTreeMap::new(),
            services: 0,
            ports: 0,
            cve_counts: Severity::ALL.iter().map(|tier| (*tier, 0)).collect(),
        }
    }

    pub fn cve_count(&self, severity: Severity) -> usize {
        self.cve_counts.get(&severity).copied().unwrap_or(0)
    }

    pub fn total_vulnerabilities(&self) -> usize {
        self.cve_counts.values().sum()
    }
}

impl fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Nmap command: {}", self.nmap_command)?;
        writeln!(f, "Scanned assets: {}", self.scanned_assets)?;
        writeln!(f, "Services: {}", self.services)?;
        writeln!(f, "Ports: {}", self.ports)?;
        writeln!(f, "OS families:")?;
        if self.os_families.is_empty() {
            writeln!(f, "  -")?;
        }
        for (os, count) in &self.os_families {
            writeln!(f, "  - {}: {}", count, os)?;
        }
        let counts: Vec<String> = Severity::ALL
            .iter()
            .map(|tier| format!("{} {}", tier, self.cve_count(*tier)))
            .collect();
        writeln!(f, "CVEs: {}", counts.join(", "))
    }
}

/// Output of a single parse: the aggregate summary and the hosts in document
/// order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedScan {
    pub summary: ScanSummary,
    pub hosts: Vec<HostRecord>,
}

impl ParsedScan {
    pub fn host(&self, id: HostId) -> Option<&HostRecord> {
        self.hosts.iter().find(|host| host.id == id)
    }
}
