use crate::model::{
    HostId, HostRecord, ParsedScan, PortEntry, ScanSummary, VulnerabilityRecord, MISSING_COMMAND,
    UNKNOWN_OS, UNKNOWN_SERVICE,
};
use crate::script::{extract_vulnerability, is_vulnerability_candidate, ScriptTable, TableNode};
use crate::severity::{classify, parse_score};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("malformed scan report: {0} (the input must be a valid Nmap XML report)")]
    MalformedInput(#[from] MalformedXml),
    #[error("host #{position} has no address")]
    MissingAddress { position: usize },
    #[error("failed to open scan report {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reasons a document is not well-formed XML.
#[derive(Debug, thiserror::Error)]
pub enum MalformedXml {
    #[error(transparent)]
    Syntax(#[from] quick_xml::Error),
    #[error("document ended before its root element was closed")]
    UnexpectedEof,
    #[error("content found outside the root element")]
    ContentOutsideRoot,
}

impl From<quick_xml::Error> for ScanError {
    fn from(err: quick_xml::Error) -> Self {
        ScanError::MalformedInput(MalformedXml::Syntax(err))
    }
}

/// What to do with a `host` element that carries no address.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissingAddressPolicy {
    /// Fail the whole document.
    #[default]
    Abort,
    /// Drop the host and keep going.
    Skip,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParseOptions {
    #[serde(default)]
    pub missing_address: MissingAddressPolicy,
}

pub fn parse_str(source: &str) -> Result<ParsedScan, ScanError> {
    parse_reader(source.as_bytes())
}

pub fn parse_str_with_options(source: &str, options: ParseOptions) -> Result<ParsedScan, ScanError> {
    parse_reader_with_options(source.as_bytes(), options)
}

pub fn parse_file(path: impl AsRef<Path>) -> Result<ParsedScan, ScanError> {
    parse_file_with_options(path, ParseOptions::default())
}

/// Parses the report at `path`. The file is closed before this returns,
/// whether parsing succeeded or not.
pub fn parse_file_with_options(
    path: impl AsRef<Path>,
    options: ParseOptions,
) -> Result<ParsedScan, ScanError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_reader_with_options(BufReader::new(file), options)
}

pub fn parse_reader<R: BufRead>(input: R) -> Result<ParsedScan, ScanError> {
    parse_reader_with_options(input, ParseOptions::default())
}

pub fn parse_reader_with_options<R: BufRead>(
    input: R,
    options: ParseOptions,
) -> Result<ParsedScan, ScanError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut document = DocumentParser::new(options);

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(element) => {
                document.open(&element)?;
                document.stack.push(element.name().as_ref().to_vec());
            }
            Event::Empty(element) => {
                document.open(&element)?;
                document.close(element.name().as_ref())?;
            }
            Event::End(element) => {
                document.stack.pop();
                document.close(element.name().as_ref())?;
            }
            Event::Text(text) => document.text(&text.unescape()?)?,
            Event::CData(data) => document.text(&String::from_utf8_lossy(&data))?,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    document.finish()
}

/// Single-pass fold over the event stream of one document.
struct DocumentParser {
    options: ParseOptions,
    /// Names of the currently open elements, outermost first.
    stack: Vec<Vec<u8>>,
    root_seen: bool,
    root_closed: bool,
    nmap_command: Option<String>,
    host_position: usize,
    hosts: Vec<HostRecord>,
    summary: SummaryBuilder,
    current_host: Option<HostBuilder>,
    current_port: Option<PortBuilder>,
    current_script: Option<ScriptBuilder>,
    /// Tables open inside the captured table of the current script.
    tables: Vec<ScriptTable>,
    current_elem: Option<ElemBuilder>,
}

#[derive(Default)]
struct HostBuilder {
    position: usize,
    address_seen: bool,
    address: Option<String>,
    os_seen: bool,
    os: Option<String>,
    ports_seen: bool,
    in_ports: bool,
    ports: Vec<PortEntry>,
    vulnerabilities: Vec<VulnerabilityRecord>,
}

#[derive(Default)]
struct PortBuilder {
    port_id: Option<String>,
    state_seen: bool,
    state: Option<String>,
    service_seen: bool,
    service: Option<String>,
    product: Option<String>,
    version: Option<String>,
    vulnerability_tables: Vec<ScriptTable>,
}

struct ScriptBuilder {
    candidate: bool,
    table: Option<ScriptTable>,
}

struct ElemBuilder {
    key: Option<String>,
    text: String,
}

impl DocumentParser {
    fn new(options: ParseOptions) -> Self {
        Self {
            options,
            stack: Vec::new(),
            root_seen: false,
            root_closed: false,
            nmap_command: None,
            host_position: 0,
            hosts: Vec::new(),
            summary: SummaryBuilder::default(),
            current_host: None,
            current_port: None,
            current_script: None,
            tables: Vec::new(),
            current_elem: None,
        }
    }

    fn open(&mut self, element: &BytesStart<'_>) -> Result<(), ScanError> {
        check_attributes(element)?;
        if self.stack.is_empty() {
            if self.root_closed {
                return Err(MalformedXml::ContentOutsideRoot.into());
            }
            self.root_seen = true;
            self.nmap_command = attribute(element, b"args")?;
            return Ok(());
        }

        let name = element.name();
        let parent: &[u8] = self.stack.last().map(Vec::as_slice).unwrap_or_default();

        if self.stack.len() == 1 && name.as_ref() == b"host" {
            self.current_host = Some(HostBuilder {
                position: self.host_position,
                ..HostBuilder::default()
            });
            self.host_position += 1;
            return Ok(());
        }

        let Some(host) = self.current_host.as_mut() else {
            return Ok(());
        };

        match (name.as_ref(), parent) {
            (b"address", b"host") if !host.address_seen => {
                host.address_seen = true;
                host.address = attribute(element, b"addr")?;
            }
            (b"ports", b"host") if !host.ports_seen => {
                host.ports_seen = true;
                host.in_ports = true;
            }
            (b"port", b"ports") if host.in_ports => {
                self.current_port = Some(PortBuilder {
                    port_id: attribute(element, b"portid")?,
                    ..PortBuilder::default()
                });
            }
            (b"state", b"port") => {
                if let Some(port) = self.current_port.as_mut().filter(|port| !port.state_seen) {
                    port.state_seen = true;
                    port.state = attribute(element, b"state")?;
                }
            }
            (b"service", b"port") => {
                if let Some(port) = self.current_port.as_mut().filter(|port| !port.service_seen) {
                    port.service_seen = true;
                    port.service = attribute(element, b"name")?;
                    port.product = attribute(element, b"product")?;
                    port.version = attribute(element, b"version")?;
                }
            }
            (b"script", b"port") if self.current_port.is_some() => {
                let id = attribute(element, b"id")?.unwrap_or_default();
                let output = attribute(element, b"output")?.unwrap_or_default();
                self.current_script = Some(ScriptBuilder {
                    candidate: is_vulnerability_candidate(&id, &output),
                    table: None,
                });
            }
            (b"table", parent) => {
                let key = attribute(element, b"key")?;
                match self.current_script.as_ref() {
                    Some(script) if parent == b"script" && script.table.is_none() && self.tables.is_empty() => {
                        self.tables.push(ScriptTable::new(key));
                    }
                    Some(_) if !self.tables.is_empty() => self.tables.push(ScriptTable::new(key)),
                    _ => {}
                }
            }
            (b"elem", b"table") if !self.tables.is_empty() => {
                self.current_elem = Some(ElemBuilder {
                    key: attribute(element, b"key")?,
                    text: String::new(),
                });
            }
            (b"osmatch", _) if !host.os_seen => {
                host.os_seen = true;
                host.os = attribute(element, b"name")?;
            }
            _ => {}
        }

        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<(), ScanError> {
        if self.stack.is_empty() {
            if text.trim().is_empty() {
                return Ok(());
            }
            return Err(MalformedXml::ContentOutsideRoot.into());
        }
        if let Some(elem) = self.current_elem.as_mut() {
            elem.text.push_str(text);
        }
        Ok(())
    }

    /// Called with the closed element's name once it has been removed from
    /// the stack.
    fn close(&mut self, name: &[u8]) -> Result<(), ScanError> {
        if self.stack.is_empty() {
            self.root_closed = true;
            return Ok(());
        }

        match name {
            b"elem" => {
                if let (Some(elem), Some(table)) = (self.current_elem.take(), self.tables.last_mut()) {
                    table.children.push(TableNode::Elem {
                        key: elem.key,
                        text: elem.text,
                    });
                }
            }
            b"table" => {
                if let Some(table) = self.tables.pop() {
                    match self.tables.last_mut() {
                        Some(parent) => parent.children.push(TableNode::Table(table)),
                        None => {
                            if let Some(script) = self.current_script.as_mut() {
                                script.table = Some(table);
                            }
                        }
                    }
                }
            }
            b"script" => {
                if let Some(script) = self.current_script.take() {
                    if let (true, Some(table), Some(port)) =
                        (script.candidate, script.table, self.current_port.as_mut())
                    {
                        port.vulnerability_tables.push(table);
                    }
                }
            }
            b"port" => {
                if let (Some(port), Some(host)) = (self.current_port.take(), self.current_host.as_mut()) {
                    host.add_port(port);
                }
            }
            b"ports" => {
                if let Some(host) = self.current_host.as_mut() {
                    host.in_ports = false;
                }
            }
            b"host" if self.stack.len() == 1 => {
                if let Some(host) = self.current_host.take() {
                    self.finish_host(host)?;
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn finish_host(&mut self, host: HostBuilder) -> Result<(), ScanError> {
        let Some(ip) = host.address else {
            return match self.options.missing_address {
                MissingAddressPolicy::Abort => Err(ScanError::MissingAddress {
                    position: host.position,
                }),
                MissingAddressPolicy::Skip => {
                    warn!(position = host.position, "skipping host without address");
                    Ok(())
                }
            };
        };

        let max_cvss = host
            .vulnerabilities
            .iter()
            .filter_map(|vuln| parse_score(&vuln.cvss))
            .fold(0.0, f64::max);

        let record = HostRecord {
            id: HostId(self.hosts.len()),
            ip,
            os: host.os.unwrap_or_else(|| UNKNOWN_OS.to_string()),
            ports: host.ports,
            vulnerabilities: host.vulnerabilities,
            max_cvss,
        };
        debug!(
            ip = %record.ip,
            ports = record.ports.len(),
            vulnerabilities = record.vulnerabilities.len(),
            "parsed host"
        );

        self.summary.record(&record);
        self.hosts.push(record);
        Ok(())
    }

    fn finish(self) -> Result<ParsedScan, ScanError> {
        if !self.root_seen || !self.stack.is_empty() {
            return Err(MalformedXml::UnexpectedEof.into());
        }
        let nmap_command = self
            .nmap_command
            .unwrap_or_else(|| MISSING_COMMAND.to_string());
        Ok(ParsedScan {
            summary: self.summary.finish(nmap_command),
            hosts: self.hosts,
        })
    }
}

impl HostBuilder {
    fn add_port(&mut self, port: PortBuilder) {
        if port.state.as_deref() != Some("open") {
            return;
        }
        let Some(port_id) = port.port_id else {
            warn!(position = self.position, "skipping open port without portid");
            return;
        };
        let service = port.service.unwrap_or_else(|| UNKNOWN_SERVICE.to_string());

        for table in &port.vulnerability_tables {
            if let Some(vuln) = extract_vulnerability(table, &port_id, &service) {
                self.vulnerabilities.push(vuln);
            }
        }

        self.ports.push(PortEntry {
            port_id,
            service_name: service,
            product: port.product,
            version: port.version,
        });
    }
}

#[derive(Default)]
struct SummaryBuilder {
    scanned_assets: usize,
    os_families: BTreeMap<String, usize>,
    open_ports: usize,
    cve_counts: BTreeMap<crate::severity::Severity, usize>,
}

impl SummaryBuilder {
    fn record(&mut self, host: &HostRecord) {
        self.scanned_assets += 1;
        *self.os_families.entry(host.os.clone()).or_insert(0) += 1;
        self.open_ports += host.ports.len();
        for vuln in &host.vulnerabilities {
            let (severity, _) = classify(&vuln.cvss);
            *self.cve_counts.entry(severity).or_insert(0) += 1;
        }
    }

    fn finish(self, nmap_command: String) -> ScanSummary {
        let mut summary = ScanSummary::empty(nmap_command);
        summary.scanned_assets = self.scanned_assets;
        summary.os_families = self.os_families;
        summary.services = self.open_ports;
        summary.ports = self.open_ports;
        summary.cve_counts.extend(self.cve_counts);
        summary
    }
}

/// Rejects duplicated or malformed attributes anywhere in the document.
fn check_attributes(element: &BytesStart<'_>) -> Result<(), ScanError> {
    for attr in element.attributes() {
        attr.map_err(quick_xml::Error::from)?;
    }
    Ok(())
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, ScanError> {
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
