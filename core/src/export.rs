use crate::report::TabularReport;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, XlsxError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SHEET_NAME: &str = "Actives Inventory";

const COLUMN_WIDTHS: [f64; 3] = [25.0, 50.0, 120.0];
const LINE_HEIGHT: f64 = 15.0;
const HEADER_FILL: u32 = 0x4F81BD;
const FONT_NAME: &str = "Arial";
const FONT_SIZE: f64 = 12.0;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("spreadsheet error: {0}")]
    Xlsx(#[from] XlsxError),
}

/// Result of an export attempt. Failures are reported here rather than
/// returned as errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportOutcome {
    pub success: bool,
    pub path: PathBuf,
    pub error: Option<String>,
}

impl fmt::Display for ExportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(f, "report saved to {}", self.path.display()),
            Some(message) => write!(
                f,
                "could not save the report to {}: {}",
                self.path.display(),
                message
            ),
        }
    }
}

/// Appends `.xlsx` unless the path already carries it.
pub fn xlsx_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.extension().is_some_and(|ext| ext == "xlsx") {
        path.to_path_buf()
    } else {
        let mut raw = path.as_os_str().to_os_string();
        raw.push(".xlsx");
        PathBuf::from(raw)
    }
}

/// Default workbook name for a scan file: `<stem>_report.xlsx`.
pub fn default_report_name(scan_path: impl AsRef<Path>) -> String {
    let stem = scan_path
        .as_ref()
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|stem| !stem.is_empty());
    match stem {
        Some(stem) => format!("{stem}_report.xlsx"),
        None => "nmap_report.xlsx".to_string(),
    }
}

pub fn export_xlsx(report: &TabularReport, path: impl AsRef<Path>) -> ExportOutcome {
    let path = xlsx_path(path);
    match write_workbook(report, &path) {
        Ok(()) => {
            info!(path = %path.display(), rows = report.rows.len(), "wrote inventory workbook");
            ExportOutcome {
                success: true,
                path,
                error: None,
            }
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to write inventory workbook");
            ExportOutcome {
                success: false,
                path,
                error: Some(err.to_string()),
            }
        }
    }
}

fn write_workbook(report: &TabularReport, path: &Path) -> Result<(), ExportError> {
    let header_format = Format::new()
        .set_font_name(FONT_NAME)
        .set_font_size(FONT_SIZE)
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(HEADER_FILL))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin);
    let centered_format = Format::new()
        .set_font_name(FONT_NAME)
        .set_font_size(FONT_SIZE)
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin);
    let wrapped_format = Format::new()
        .set_font_name(FONT_NAME)
        .set_font_size(FONT_SIZE)
        .set_text_wrap()
        .set_align(FormatAlign::Left)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin);

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (col, title) in report.columns.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, title.as_str(), &header_format)?;
    }
    for (col, width) in COLUMN_WIDTHS.iter().enumerate() {
        worksheet.set_column_width(col as u16, *width)?;
    }

    for (index, row) in report.rows.iter().enumerate() {
        let row_number = (index + 1) as u32;
        for (col, value) in row.cells().iter().enumerate() {
            let format = if col == 0 {
                &centered_format
            } else {
                &wrapped_format
            };
            worksheet.write_string_with_format(row_number, col as u16, *value, format)?;
        }
        worksheet.set_row_height(row_number, LINE_HEIGHT * row.line_count() as f64)?;
    }

    workbook.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HostId, HostRecord, PortEntry};
    use crate::report::project;
    use std::io::Read;

    fn report() -> TabularReport {
        let hosts = vec![HostRecord {
            id: HostId(0),
            ip: "10.0.0.1".to_string(),
            os: "Linux".to_string(),
            ports: vec![PortEntry {
                port_id: "22".to_string(),
                service_name: "ssh".to_string(),
                product: None,
                version: None,
            }],
            vulnerabilities: Vec::new(),
            max_cvss: 0.0,
        }];
        project(&hosts)
    }

    #[test]
    fn appends_extension_when_missing() {
        assert_eq!(xlsx_path("out/report"), PathBuf::from("out/report.xlsx"));
        assert_eq!(xlsx_path("report.xlsx"), PathBuf::from("report.xlsx"));
        assert_eq!(xlsx_path("report.v1"), PathBuf::from("report.v1.xlsx"));
    }

    #[test]
    fn default_name_follows_scan_file() {
        assert_eq!(default_report_name("/tmp/lab_scan.xml"), "lab_scan_report.xlsx");
        assert_eq!(default_report_name(""), "nmap_report.xlsx");
    }

    #[test]
    fn writes_workbook_to_disk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let outcome = export_xlsx(&report(), dir.path().join("inventory"));
        assert!(outcome.success, "export failed: {:?}", outcome.error);
        assert!(outcome.error.is_none());
        assert!(outcome.path.ends_with("inventory.xlsx"));
        let metadata = std::fs::metadata(&outcome.path).expect("workbook exists");
        assert!(metadata.len() > 0);
    }

    fn read_part(path: &Path, name: &str) -> String {
        let file = std::fs::File::open(path).expect("open workbook");
        let mut archive = zip::ZipArchive::new(file).expect("workbook is a zip archive");
        let mut part = archive.by_name(name).expect("part exists");
        let mut xml = String::new();
        part.read_to_string(&mut xml).expect("part is utf-8");
        xml
    }

    #[test]
    fn workbook_carries_sheet_name_and_headers() {
        let dir = tempfile::tempdir().expect("temp dir");
        let outcome = export_xlsx(&report(), dir.path().join("inventory.xlsx"));
        assert!(outcome.success, "export failed: {:?}", outcome.error);

        let workbook = read_part(&outcome.path, "xl/workbook.xml");
        assert!(workbook.contains(r#"name="Actives Inventory""#));

        let strings = read_part(&outcome.path, "xl/sharedStrings.xml");
        for header in ["IP Direction", "Ports and Services", "Vulnerabilities"] {
            assert!(strings.contains(header), "missing header {header}");
        }
        assert!(strings.contains("10.0.0.1"));
        assert!(strings.contains(" - Port: 22, Service: ssh"));
    }

    #[test]
    fn write_failures_are_reported_not_raised() {
        let dir = tempfile::tempdir().expect("temp dir");
        let target = dir.path().join("missing").join("nested").join("inventory.xlsx");
        let outcome = export_xlsx(&report(), &target);
        assert!(!outcome.success);
        let message = outcome.error.as_deref().expect("error message");
        assert!(!message.is_empty());
        assert!(outcome.to_string().contains("could not save the report"));
    }
}
