pub mod export;
pub mod filter;
pub mod model;
pub mod parser;
pub mod report;
pub mod script;
pub mod severity;

pub use export::{default_report_name, export_xlsx, xlsx_path, ExportError, ExportOutcome};
pub use filter::{distinct_services, filter_hosts, HostFilter, PortGroup, ServiceFilter};
pub use model::{HostId, HostRecord, ParsedScan, PortEntry, ScanSummary, VulnerabilityRecord};
pub use parser::{
    parse_file, parse_file_with_options, parse_reader, parse_reader_with_options, parse_str,
    parse_str_with_options, MalformedXml, MissingAddressPolicy, ParseOptions, ScanError,
};
pub use report::{
    by_descending_cvss, project, render_host_details, render_hosts_table, ReportRow,
    TabularReport,
};
pub use severity::{classify, parse_score, Rgb, Severity};
