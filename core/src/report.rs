use crate::model::{HostId, HostRecord, VulnerabilityRecord};
use crate::severity::{classify, parse_score, Severity};
use comfy_table::{presets::ASCII_FULL, Cell, Color, Table};
use serde::{Deserialize, Serialize};

pub const COLUMNS: [&str; 3] = ["IP Direction", "Ports and Services", "Vulnerabilities"];

const DESCRIPTION_PREVIEW: usize = 100;
const REFERENCE_PREVIEW: usize = 2;

/// Flat three-column projection of the inventory, one row per host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TabularReport {
    pub columns: Vec<String>,
    pub rows: Vec<ReportRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportRow {
    pub host_id: HostId,
    pub ip: String,
    pub ports: String,
    pub vulnerabilities: String,
}

impl ReportRow {
    pub fn cells(&self) -> [&str; 3] {
        [&self.ip, &self.ports, &self.vulnerabilities]
    }

    /// Largest number of lines held by any cell of the row.
    pub fn line_count(&self) -> usize {
        self.cells()
            .iter()
            .map(|cell| cell.matches('\n').count() + 1)
            .max()
            .unwrap_or(1)
    }
}

pub fn project<'a>(hosts: impl IntoIterator<Item = &'a HostRecord>) -> TabularReport {
    TabularReport {
        columns: COLUMNS.iter().map(|column| column.to_string()).collect(),
        rows: hosts.into_iter().map(project_host).collect(),
    }
}

fn project_host(host: &HostRecord) -> ReportRow {
    let ports: Vec<String> = host
        .ports
        .iter()
        .map(|port| format!(" - Port: {}, Service: {}", port.port_id, port.service_name))
        .collect();

    let vulnerabilities: Vec<String> = by_descending_cvss(&host.vulnerabilities)
        .into_iter()
        .map(vulnerability_block)
        .collect();

    ReportRow {
        host_id: host.id,
        ip: host.ip.clone(),
        ports: ports.join("\n"),
        vulnerabilities: vulnerabilities.join("\n"),
    }
}

fn vulnerability_block(vuln: &VulnerabilityRecord) -> String {
    let (severity, _) = classify(&vuln.cvss);
    let mut block = String::new();
    block.push_str(&format!(" - Port: {}, Service: {}\n", vuln.port, vuln.service));
    block.push_str(&format!("   Name: {}\n", vuln.name));
    block.push_str(&format!("   Severity: {} ({})\n", vuln.cvss, severity.export_label()));
    block.push_str(&format!("   CVEs: {}\n", vuln.cve.join(", ")));
    block.push_str("   References: \n");
    block.push_str(&format!("\t{}\n", vuln.references.join("\n\t")));
    block
}

/// Stable sort, highest score first; unparseable scores rank as 0.0.
pub fn by_descending_cvss(vulnerabilities: &[VulnerabilityRecord]) -> Vec<&VulnerabilityRecord> {
    let mut sorted: Vec<&VulnerabilityRecord> = vulnerabilities.iter().collect();
    sorted.sort_by(|a, b| sort_score(b).total_cmp(&sort_score(a)));
    sorted
}

fn sort_score(vuln: &VulnerabilityRecord) -> f64 {
    parse_score(&vuln.cvss).unwrap_or(0.0)
}

/// Multi-line description of one host for terminal display.
pub fn render_host_details(host: &HostRecord) -> String {
    let mut out = String::new();
    out.push_str("--- Host ---\n");
    out.push_str(&format!("ID: {}\n", host.id));
    out.push_str(&format!("IP: {}\n", host.ip));
    out.push_str(&format!("Operating system: {}\n", host.os));
    out.push_str(&format!("Max CVSS: {:.1} ({})\n", host.max_cvss, host.max_severity()));

    out.push_str("\n--- Ports and services ---\n");
    if host.ports.is_empty() {
        out.push_str("   (no open ports detected)\n");
    }
    for port in &host.ports {
        let detail = [port.product.as_deref(), port.version.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if detail.is_empty() {
            out.push_str(&format!("   - Port: {:<5} Service: {}\n", port.port_id, port.service_name));
        } else {
            out.push_str(&format!(
                "   - Port: {:<5} Service: {} ({})\n",
                port.port_id, port.service_name, detail
            ));
        }
    }

    out.push_str("\n--- Vulnerabilities ---\n");
    if host.vulnerabilities.is_empty() {
        out.push_str("   (no vulnerabilities found)\n");
    }
    for vuln in by_descending_cvss(&host.vulnerabilities) {
        let (severity, _) = classify(&vuln.cvss);
        out.push_str(&format!("   - Name: {}\n", vuln.name));
        out.push_str(&format!("     Severity: {} ({})\n", vuln.cvss, severity));
        out.push_str(&format!("     Port: {} ({})\n", vuln.port, vuln.service));
        out.push_str(&format!("     State: {}\n", vuln.state));
        out.push_str(&format!("     CVEs: {}\n", vuln.cve.join(", ")));
        out.push_str(&format!("     Disclosed: {}\n", vuln.disclosure_date));
        out.push_str(&format!(
            "     Description: {}...\n",
            truncate_chars(&vuln.description, DESCRIPTION_PREVIEW)
        ));
        if !vuln.references.is_empty() {
            let shown: Vec<&str> = vuln
                .references
                .iter()
                .take(REFERENCE_PREVIEW)
                .map(String::as_str)
                .collect();
            out.push_str(&format!("     References: {}...\n", shown.join(", ")));
        }
        out.push('\n');
    }

    out
}

fn truncate_chars(input: &str, limit: usize) -> &str {
    match input.char_indices().nth(limit) {
        Some((index, _)) => &input[..index],
        None => input,
    }
}

/// Host overview table, severity column tinted with the tier color.
pub fn render_hosts_table<'a>(hosts: impl IntoIterator<Item = &'a HostRecord>) -> String {
    let mut display = Table::new();
    display.load_preset(ASCII_FULL);
    display.set_header(vec!["ID", "IP", "OS", "Open ports", "Vulnerabilities", "Max CVSS"]);

    for host in hosts {
        let severity = host.max_severity();
        display.add_row(vec![
            Cell::new(host.id),
            Cell::new(&host.ip),
            Cell::new(&host.os),
            Cell::new(host.ports.len()),
            Cell::new(host.vulnerabilities.len()),
            Cell::new(format!("{:.1} ({})", host.max_cvss, severity)).fg(tier_color(severity)),
        ]);
    }

    display.to_string()
}

fn tier_color(severity: Severity) -> Color {
    let rgb = severity.color();
    Color::Rgb {
        r: rgb.r,
        g: rgb.g,
        b: rgb.b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PortEntry;

    fn vuln(name: &str, cvss: &str) -> VulnerabilityRecord {
        VulnerabilityRecord {
            port: "443".to_string(),
            service: "https".to_string(),
            name: name.to_string(),
            state: "VULNERABLE".to_string(),
            cve: vec!["CVE-2014-3566".to_string()],
            cvss: cvss.to_string(),
            description: "N/A".to_string(),
            disclosure_date: "unknown".to_string(),
            references: vec!["https://a.example".to_string(), "https://b.example".to_string()],
        }
    }

    fn host(vulnerabilities: Vec<VulnerabilityRecord>) -> HostRecord {
        HostRecord {
            id: HostId(4),
            ip: "10.0.0.5".to_string(),
            os: "Unknown".to_string(),
            ports: vec![
                PortEntry {
                    port_id: "22".to_string(),
                    service_name: "ssh".to_string(),
                    product: Some("OpenSSH".to_string()),
                    version: Some("7.4".to_string()),
                },
                PortEntry {
                    port_id: "443".to_string(),
                    service_name: "https".to_string(),
                    product: None,
                    version: None,
                },
            ],
            vulnerabilities,
            max_cvss: 9.0,
        }
    }

    #[test]
    fn project_lists_highest_cvss_first() {
        let hosts = vec![host(vec![vuln("low", "3.0"), vuln("critical", "9.0")])];
        let report = project(&hosts);
        assert_eq!(report.columns, COLUMNS.to_vec());
        assert_eq!(report.rows.len(), 1);

        let cell = &report.rows[0].vulnerabilities;
        let critical = cell.find("Name: critical").expect("critical listed");
        let low = cell.find("Name: low").expect("low listed");
        assert!(critical < low);
        assert!(cell.contains("Severity: 9.0 (Crítica (Critical))"));
        assert!(cell.contains("Severity: 3.0 (Baja (Low))"));
    }

    #[test]
    fn ties_and_unparseable_scores_keep_discovery_order() {
        let vulns = vec![
            vuln("first", "N/A"),
            vuln("second", "5.0"),
            vuln("third", "0.0"),
            vuln("fourth", "5.0"),
        ];
        let order: Vec<&str> = by_descending_cvss(&vulns)
            .into_iter()
            .map(|v| v.name.as_str())
            .collect();
        assert_eq!(order, vec!["second", "fourth", "first", "third"]);
    }

    #[test]
    fn row_cells_are_formatted() {
        let hosts = vec![host(vec![vuln("poodle", "4.3")])];
        let row = &project(&hosts).rows[0];
        assert_eq!(row.host_id, HostId(4));
        assert_eq!(row.ip, "10.0.0.5");
        assert_eq!(
            row.ports,
            " - Port: 22, Service: ssh\n - Port: 443, Service: https"
        );
        assert_eq!(
            row.vulnerabilities,
            " - Port: 443, Service: https\n   Name: poodle\n   Severity: 4.3 (Media (Medium))\n   CVEs: CVE-2014-3566\n   References: \n\thttps://a.example\n\thttps://b.example\n"
        );
        assert_eq!(row.line_count(), 8);
    }

    #[test]
    fn host_without_findings_projects_empty_cells() {
        let mut bare = host(Vec::new());
        bare.ports.clear();
        let row = &project([&bare]).rows[0];
        assert_eq!(row.ports, "");
        assert_eq!(row.vulnerabilities, "");
        assert_eq!(row.line_count(), 1);
    }

    #[test]
    fn details_mention_ports_and_vulnerabilities() {
        let mut target = host(vec![vuln("poodle", "4.3")]);
        target.vulnerabilities[0].description = "x".repeat(150);
        let details = render_host_details(&target);
        assert!(details.contains("IP: 10.0.0.5"));
        assert!(details.contains("Service: ssh (OpenSSH 7.4)"));
        assert!(details.contains("Severity: 4.3 (Medium)"));
        assert!(details.contains(&format!("Description: {}...", "x".repeat(100))));
        assert!(!details.contains(&"x".repeat(101)));
        assert!(details.contains("References: https://a.example, https://b.example..."));
    }

    #[test]
    fn hosts_table_lists_every_host() {
        let hosts = vec![host(vec![vuln("poodle", "9.0")])];
        let rendered = render_hosts_table(&hosts);
        assert!(rendered.contains("10.0.0.5"));
        assert!(rendered.contains("Max CVSS"));
    }
}
