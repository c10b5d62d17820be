use anyhow::{anyhow, Context};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use inventory_core::{
    default_report_name, distinct_services, export_xlsx, filter_hosts, parse_file_with_options,
    project, render_host_details, render_hosts_table, HostFilter, HostId, HostRecord,
    MissingAddressPolicy, ParseOptions, ParsedScan, PortGroup, ScanSummary, ServiceFilter,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Active inventory from Nmap XML reports")]
struct InventoryCli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the scan summary and the host table
    Inspect {
        /// Path to the Nmap XML report
        input: PathBuf,
        /// Output format
        #[arg(long, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        parsing: ParseArgs,
    },
    /// Show everything known about one host
    Host {
        /// Path to the Nmap XML report
        input: PathBuf,
        /// Host id as listed by `inspect`
        #[arg(long)]
        id: usize,
        /// Output format
        #[arg(long, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        #[command(flatten)]
        parsing: ParseArgs,
    },
    /// Write the (optionally filtered) inventory to an Excel workbook
    Export {
        /// Path to the Nmap XML report
        input: PathBuf,
        /// Workbook path; defaults to `<input stem>_report.xlsx`
        #[arg(long, short)]
        output: Option<PathBuf>,
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        parsing: ParseArgs,
    },
}

#[derive(Debug, Args)]
struct FilterArgs {
    /// Only hosts whose highest CVSS score is at least this value
    #[arg(long, default_value_t = 0.0, value_parser = parse_min_cvss)]
    min_cvss: f64,
    /// Only hosts exposing a service with this exact name
    #[arg(long)]
    service: Option<String>,
    /// Only hosts exposing one of these ports. Repeat for multiple ports.
    #[arg(long = "port", value_name = "PORT", action = ArgAction::Append)]
    ports: Vec<u16>,
    /// Common port presets. Repeat for multiple groups.
    #[arg(long = "port-group", value_name = "GROUP", action = ArgAction::Append)]
    port_groups: Vec<PortGroupArg>,
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Drop hosts without an address instead of rejecting the report
    #[arg(long)]
    skip_hosts_without_address: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
        };
        write!(f, "{value}")
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PortGroupArg {
    Smb,
    Rdp,
    Db,
    SshTelnet,
}

impl From<PortGroupArg> for PortGroup {
    fn from(value: PortGroupArg) -> Self {
        match value {
            PortGroupArg::Smb => PortGroup::Smb,
            PortGroupArg::Rdp => PortGroup::Rdp,
            PortGroupArg::Db => PortGroup::Db,
            PortGroupArg::SshTelnet => PortGroup::SshTelnet,
        }
    }
}

impl FilterArgs {
    fn to_filter(&self) -> HostFilter {
        let mut filter = HostFilter {
            min_cvss: self.min_cvss,
            service: match &self.service {
                Some(name) => ServiceFilter::Named(name.clone()),
                None => ServiceFilter::All,
            },
            ports: self.ports.iter().copied().collect(),
        };
        for group in &self.port_groups {
            let group = PortGroup::from(*group);
            debug!(group = group.label(), "port group selected");
            filter = filter.with_port_group(group);
        }
        filter
    }
}

impl ParseArgs {
    fn to_options(&self) -> ParseOptions {
        ParseOptions {
            missing_address: if self.skip_hosts_without_address {
                MissingAddressPolicy::Skip
            } else {
                MissingAddressPolicy::Abort
            },
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = InventoryCli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Inspect {
            input,
            format,
            filters,
            parsing,
        } => {
            let scan = load_scan(&input, parsing.to_options())?;
            let filter = filters.to_filter();
            output_inspect(&scan, &filter, format)?;
        }
        Command::Host {
            input,
            id,
            format,
            parsing,
        } => {
            let scan = load_scan(&input, parsing.to_options())?;
            let host = scan
                .host(HostId(id))
                .ok_or_else(|| anyhow!("no host with id {id} (report has {} hosts)", scan.hosts.len()))?;
            output_host(host, format)?;
        }
        Command::Export {
            input,
            output,
            filters,
            parsing,
        } => {
            let scan = load_scan(&input, parsing.to_options())?;
            let filter = filters.to_filter();
            let hosts = filter_hosts(&scan.hosts, &filter);
            let output = output.unwrap_or_else(|| default_output_path(&input));
            let report = project(hosts.iter().copied());
            let outcome = export_xlsx(&report, &output);
            if !outcome.success {
                anyhow::bail!("{outcome}");
            }
            println!("{outcome}");
            println!("{}", filter.describe(hosts.len(), scan.hosts.len()));
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();
}

fn load_scan(path: &Path, options: ParseOptions) -> anyhow::Result<ParsedScan> {
    let scan = parse_file_with_options(path, options)
        .with_context(|| format!("error processing {}", path.display()))?;
    info!(
        path = %path.display(),
        hosts = scan.hosts.len(),
        vulnerabilities = scan.summary.total_vulnerabilities(),
        "loaded scan report"
    );
    Ok(scan)
}

fn default_output_path(input: &Path) -> PathBuf {
    let name = default_report_name(input);
    match input.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

#[derive(Debug, Serialize)]
struct InspectResponse<'a> {
    generated_at: String,
    summary: &'a ScanSummary,
    filter: &'a HostFilter,
    services: Vec<String>,
    hosts: Vec<&'a HostRecord>,
}

fn output_inspect(
    scan: &ParsedScan,
    filter: &HostFilter,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let hosts = filter_hosts(&scan.hosts, filter);
    let services = distinct_services(&scan.hosts);

    match format {
        OutputFormat::Text => {
            println!("{}", scan.summary);
            if !services.is_empty() {
                println!("Available services: {}\n", services.join(", "));
            }
            println!("{}", render_hosts_table(hosts.iter().copied()));
            println!("\n{}", filter.describe(hosts.len(), scan.hosts.len()));
        }
        OutputFormat::Json | OutputFormat::Yaml => {
            let response = InspectResponse {
                generated_at: timestamp(),
                summary: &scan.summary,
                filter,
                services,
                hosts,
            };
            print_structured(&response, format)?;
        }
    }

    Ok(())
}

fn output_host(host: &HostRecord, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => print!("{}", render_host_details(host)),
        OutputFormat::Json | OutputFormat::Yaml => print_structured(host, format)?,
    }
    Ok(())
}

fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(value)?;
            print!("{yaml}");
        }
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

fn parse_min_cvss(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("expected a CVSS score, got '{s}'"))?;
    if !(0.0..=10.0).contains(&value) {
        return Err(format!("CVSS score must be between 0.0 and 10.0, got {value}"));
    }
    Ok(value)
}
