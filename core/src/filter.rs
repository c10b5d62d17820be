use crate::model::HostRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceFilter {
    #[default]
    All,
    Named(String),
}

impl ServiceFilter {
    fn matches(&self, host: &HostRecord) -> bool {
        match self {
            ServiceFilter::All => true,
            ServiceFilter::Named(name) => host.ports.iter().any(|port| port.service_name == *name),
        }
    }
}

impl fmt::Display for ServiceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceFilter::All => f.write_str("all services"),
            ServiceFilter::Named(name) => f.write_str(name),
        }
    }
}

/// Common port presets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PortGroup {
    Smb,
    Rdp,
    Db,
    SshTelnet,
}

impl PortGroup {
    pub fn ports(self) -> &'static [u16] {
        match self {
            PortGroup::Smb => &[139, 445],
            PortGroup::Rdp => &[3389],
            PortGroup::Db => &[1433, 3306, 5432],
            PortGroup::SshTelnet => &[22, 23],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PortGroup::Smb => "SMB",
            PortGroup::Rdp => "RDP",
            PortGroup::Db => "DB",
            PortGroup::SshTelnet => "SSH/TELNET",
        }
    }
}

/// Criteria combined with logical AND. Defaults match every host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostFilter {
    #[serde(default)]
    pub min_cvss: f64,
    #[serde(default)]
    pub service: ServiceFilter,
    /// Empty means the port criterion is inactive.
    #[serde(default)]
    pub ports: BTreeSet<u16>,
}

impl HostFilter {
    pub fn with_port_group(mut self, group: PortGroup) -> Self {
        self.ports.extend(group.ports());
        self
    }

    pub fn matches(&self, host: &HostRecord) -> bool {
        host.max_cvss >= self.min_cvss && self.service.matches(host) && self.matches_ports(host)
    }

    fn matches_ports(&self, host: &HostRecord) -> bool {
        if self.ports.is_empty() {
            return true;
        }
        host.ports
            .iter()
            .filter_map(|port| port.number())
            .any(|number| self.ports.contains(&number))
    }

    pub fn describe(&self, shown: usize, total: usize) -> String {
        let ports = if self.ports.is_empty() {
            "none".to_string()
        } else {
            self.ports
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "Minimum CVSS: {:.1}; service: {}; ports: {}. Showing {} of {} hosts.",
            self.min_cvss, self.service, ports, shown, total
        )
    }
}

/// Hosts passing every active criterion, in their original order.
pub fn filter_hosts<'a>(hosts: &'a [HostRecord], filter: &HostFilter) -> Vec<&'a HostRecord> {
    hosts.iter().filter(|host| filter.matches(host)).collect()
}

/// Sorted, de-duplicated service names across all open ports.
pub fn distinct_services(hosts: &[HostRecord]) -> Vec<String> {
    let services: BTreeSet<&str> = hosts
        .iter()
        .flat_map(|host| host.ports.iter())
        .map(|port| port.service_name.as_str())
        .filter(|name| !name.is_empty())
        .collect();
    services.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HostId, PortEntry, VulnerabilityRecord};

    fn port(id: &str, service: &str) -> PortEntry {
        PortEntry {
            port_id: id.to_string(),
            service_name: service.to_string(),
            product: None,
            version: None,
        }
    }

    fn vuln(cvss: &str) -> VulnerabilityRecord {
        VulnerabilityRecord {
            port: "22".to_string(),
            service: "ssh".to_string(),
            name: "Weak Cipher".to_string(),
            state: "VULNERABLE".to_string(),
            cve: Vec::new(),
            cvss: cvss.to_string(),
            description: "N/A".to_string(),
            disclosure_date: "unknown".to_string(),
            references: Vec::new(),
        }
    }

    fn host(id: usize, ports: Vec<PortEntry>, max_cvss: f64) -> HostRecord {
        HostRecord {
            id: HostId(id),
            ip: format!("10.0.0.{}", id + 1),
            os: "Linux".to_string(),
            vulnerabilities: if max_cvss > 0.0 {
                vec![vuln(&max_cvss.to_string())]
            } else {
                Vec::new()
            },
            ports,
            max_cvss,
        }
    }

    fn inventory() -> Vec<HostRecord> {
        vec![
            host(0, vec![port("22", "ssh")], 7.5),
            host(1, vec![port("445", "microsoft-ds"), port("3389", "ms-wbt-server")], 9.3),
            host(2, vec![port("3306", "mysql"), port("x", "odd")], 0.0),
        ]
    }

    fn ids(hosts: &[&HostRecord]) -> Vec<usize> {
        hosts.iter().map(|host| host.id.0).collect()
    }

    #[test]
    fn default_filter_keeps_everything() {
        let hosts = inventory();
        let filtered = filter_hosts(&hosts, &HostFilter::default());
        assert_eq!(ids(&filtered), vec![0, 1, 2]);
    }

    #[test]
    fn min_cvss_threshold_is_inclusive() {
        let hosts = vec![host(0, vec![port("22", "ssh")], 7.5)];
        let strict = HostFilter {
            min_cvss: 8.0,
            ..HostFilter::default()
        };
        assert!(filter_hosts(&hosts, &strict).is_empty());

        let loose = HostFilter {
            min_cvss: 7.0,
            ..HostFilter::default()
        };
        assert_eq!(filter_hosts(&hosts, &loose).len(), 1);

        let exact = HostFilter {
            min_cvss: 7.5,
            ..HostFilter::default()
        };
        assert_eq!(filter_hosts(&hosts, &exact).len(), 1);
    }

    #[test]
    fn service_filter_matches_exact_names() {
        let hosts = inventory();
        let filter = HostFilter {
            service: ServiceFilter::Named("mysql".to_string()),
            ..HostFilter::default()
        };
        assert_eq!(ids(&filter_hosts(&hosts, &filter)), vec![2]);

        let filter = HostFilter {
            service: ServiceFilter::Named("MySQL".to_string()),
            ..HostFilter::default()
        };
        assert!(filter_hosts(&hosts, &filter).is_empty());
    }

    #[test]
    fn port_groups_match_any_member() {
        let hosts = inventory();
        let filter = HostFilter::default().with_port_group(PortGroup::Smb);
        assert_eq!(ids(&filter_hosts(&hosts, &filter)), vec![1]);

        let filter = HostFilter::default()
            .with_port_group(PortGroup::Db)
            .with_port_group(PortGroup::SshTelnet);
        assert_eq!(ids(&filter_hosts(&hosts, &filter)), vec![0, 2]);
    }

    #[test]
    fn criteria_combine_with_and() {
        let hosts = inventory();
        let filter = HostFilter {
            min_cvss: 5.0,
            service: ServiceFilter::Named("ssh".to_string()),
            ports: BTreeSet::from([22, 3389]),
        };
        assert_eq!(ids(&filter_hosts(&hosts, &filter)), vec![0]);
    }

    #[test]
    fn non_numeric_port_ids_do_not_hide_other_ports() {
        let hosts = inventory();
        let filter = HostFilter {
            ports: BTreeSet::from([3306]),
            ..HostFilter::default()
        };
        assert_eq!(ids(&filter_hosts(&hosts, &filter)), vec![2]);
    }

    #[test]
    fn filtering_leaves_source_untouched() {
        let hosts = inventory();
        let before = hosts.clone();
        let filter = HostFilter {
            min_cvss: 9.0,
            ..HostFilter::default()
        };
        let filtered = filter_hosts(&hosts, &filter);
        assert_eq!(filtered.len(), 1);
        assert_eq!(hosts, before);
    }

    #[test]
    fn distinct_services_are_sorted() {
        let hosts = inventory();
        assert_eq!(
            distinct_services(&hosts),
            vec!["microsoft-ds", "ms-wbt-server", "mysql", "odd", "ssh"]
        );
    }

    #[test]
    fn describe_reports_counts() {
        let filter = HostFilter::default().with_port_group(PortGroup::Rdp);
        assert_eq!(
            filter.describe(1, 3),
            "Minimum CVSS: 0.0; service: all services; ports: 3389. Showing 1 of 3 hosts."
        );
    }
}
