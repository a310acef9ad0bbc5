//! Ordered report tables and their text exporters.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::string::FromUtf8Error;

use csv::{QuoteStyle, Terminator, WriterBuilder};
use thiserror::Error;

use super::aggregate::{BreakdownLine, CountryBreakdown, CountryBucket, HostListing, Percentage};
use crate::db::models::{FullConnectionGeoIpRecord, MachineGeoIpRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Text(String),
    Bytes(u64),
    Percent(Percentage),
    Blank,
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(text) => f.write_str(text),
            Cell::Bytes(bytes) => write!(f, "{bytes}"),
            Cell::Percent(percent) => write!(f, "{percent}"),
            Cell::Blank => Ok(()),
        }
    }
}

impl From<&str> for Cell {
    fn from(text: &str) -> Self {
        Cell::Text(text.to_string())
    }
}

impl From<String> for Cell {
    fn from(text: String) -> Self {
        Cell::Text(text)
    }
}

impl From<Option<String>> for Cell {
    fn from(text: Option<String>) -> Self {
        text.map(Cell::Text).unwrap_or(Cell::Blank)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRow {
    Cells(Vec<Cell>),
    Separator,
}

/// A header plus an ordered row sequence, shared by every exporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTable {
    pub header: Vec<&'static str>,
    pub rows: Vec<TableRow>,
}

impl ReportTable {
    /// Every record as text, header first. A separator is an empty record.
    pub fn records(&self) -> Vec<Vec<String>> {
        let mut records = vec![self.header.iter().map(|h| h.to_string()).collect()];
        records.extend(self.rows.iter().map(|row| match row {
            TableRow::Cells(cells) => cells.iter().map(Cell::to_string).collect(),
            TableRow::Separator => Vec::new(),
        }));
        records
    }
}

/// Known-country buckets by descending tx share. Buckets with equal shares are
/// merged into one group that keeps first-encountered order.
pub fn ordered_buckets(breakdown: &CountryBreakdown) -> Vec<&CountryBucket> {
    let mut groups: BTreeMap<Reverse<Percentage>, Vec<&CountryBucket>> = BTreeMap::new();
    for bucket in breakdown.buckets().iter().filter(|b| !b.is_unknown()) {
        groups.entry(Reverse(bucket.tx_percent)).or_default().push(bucket);
    }
    groups.into_values().flatten().collect()
}

fn line_to_row(line: BreakdownLine) -> TableRow {
    match line {
        BreakdownLine::Country {
            country,
            region,
            rx_bytes,
            tx_bytes,
            rx_percent,
            tx_percent,
        } => TableRow::Cells(vec![
            Cell::Text(country),
            Cell::Text(region),
            Cell::Bytes(rx_bytes),
            Cell::Bytes(tx_bytes),
            Cell::Percent(rx_percent),
            Cell::Percent(tx_percent),
        ]),
        BreakdownLine::Region {
            region,
            rx_bytes,
            tx_bytes,
        } => TableRow::Cells(vec![
            Cell::Blank,
            Cell::Text(region),
            Cell::Bytes(rx_bytes),
            Cell::Bytes(tx_bytes),
            Cell::Blank,
            Cell::Blank,
        ]),
    }
}

pub fn country_breakdown_table(breakdown: &CountryBreakdown) -> ReportTable {
    let mut rows: Vec<TableRow> = ordered_buckets(breakdown)
        .into_iter()
        .flat_map(CountryBucket::lines)
        .map(line_to_row)
        .collect();

    if let Some(unknown) = breakdown.unknown() {
        rows.extend(unknown.lines().into_iter().map(line_to_row));
    }

    rows.push(TableRow::Separator);
    rows.push(TableRow::Cells(vec![
        "Total".into(),
        Cell::Blank,
        Cell::Bytes(breakdown.total_rx_bytes()),
        Cell::Bytes(breakdown.total_tx_bytes()),
        Cell::Percent(breakdown.total_rx_percent()),
        Cell::Percent(breakdown.total_tx_percent()),
    ]));

    ReportTable {
        header: vec!["Country", "Region", "RX Bytes", "TX Bytes", "% Rx", "% Tx"],
        rows,
    }
}

pub fn internet_host_table(listing: &HostListing) -> ReportTable {
    ReportTable {
        header: vec!["Internet Host", "ISP"],
        rows: listing
            .entries()
            .iter()
            .map(|e| TableRow::Cells(vec![e.host.as_str().into(), e.isp.as_str().into()]))
            .collect(),
    }
}

pub fn machine_breakdown_table(records: &[MachineGeoIpRecord]) -> ReportTable {
    ReportTable {
        header: vec!["Local IP", "Country", "Region", "RX Bytes", "TX Bytes"],
        rows: records
            .iter()
            .map(|r| {
                TableRow::Cells(vec![
                    r.local_ip.to_string().into(),
                    r.country_name.as_str().into(),
                    r.region_name.clone().into(),
                    Cell::Bytes(r.total_rx_bytes),
                    Cell::Bytes(r.total_tx_bytes),
                ])
            })
            .collect(),
    }
}

pub fn full_connection_table(records: &[FullConnectionGeoIpRecord]) -> ReportTable {
    ReportTable {
        header: vec![
            "Local IP", "Global IP", "Country", "Region", "City", "ISP", "Domain", "RX Bytes",
            "TX Bytes",
        ],
        rows: records
            .iter()
            .map(|r| {
                TableRow::Cells(vec![
                    r.local_ip.to_string().into(),
                    r.global_ip.to_string().into(),
                    r.country_name.as_str().into(),
                    r.region_name.clone().into(),
                    r.city_name.clone().into(),
                    r.isp.clone().into(),
                    r.domain.clone().into(),
                    Cell::Bytes(r.total_rx_bytes),
                    Cell::Bytes(r.total_tx_bytes),
                ])
            })
            .collect(),
    }
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Export is not valid UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),
}

pub trait ReportExporter {
    fn export(&self, table: &ReportTable) -> Result<String, ExportError>;
}

/// Fixed-column table with `+---+` borders and the header boxed off.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsciiTableExporter;

impl ReportExporter for AsciiTableExporter {
    fn export(&self, table: &ReportTable) -> Result<String, ExportError> {
        let records = table.records();
        let columns = table.header.len();
        let mut widths = vec![0usize; columns];
        for record in &records {
            for (i, value) in record.iter().enumerate().take(columns) {
                widths[i] = widths[i].max(value.chars().count());
            }
        }

        let border: String = widths.iter().fold(String::from("+"), |mut acc, w| {
            acc.push_str(&"-".repeat(w + 2));
            acc.push('+');
            acc
        });
        let line = |record: &[String]| {
            let mut out = String::from("|");
            for (i, width) in widths.iter().enumerate() {
                let value = record.get(i).map(String::as_str).unwrap_or("");
                out.push_str(&format!(" {value:<width$} |"));
            }
            out
        };

        let mut out = Vec::with_capacity(records.len() + 3);
        out.push(border.clone());
        out.push(line(&records[0]));
        out.push(border.clone());
        out.extend(records[1..].iter().map(|r| line(r)));
        out.push(border);
        Ok(out.join("\n"))
    }
}

/// Comma-separated records terminated by CRLF. Fields holding a comma, quote or
/// line break are quoted, with embedded quotes doubled.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvExporter;

impl ReportExporter for CsvExporter {
    fn export(&self, table: &ReportTable) -> Result<String, ExportError> {
        let mut builder = WriterBuilder::new();
        builder
            .flexible(true)
            .terminator(Terminator::CRLF)
            .quote_style(QuoteStyle::Necessary);
        let mut writer = builder.from_writer(Vec::new());
        for record in table.records() {
            if record.is_empty() {
                // a zero-field record would come out as `""`; separators are bare line breaks
                writer.flush()?;
                let mut buf = writer.into_inner().map_err(|e| e.into_error())?;
                buf.extend_from_slice(b"\r\n");
                writer = builder.from_writer(buf);
            } else {
                writer.write_record(&record)?;
            }
        }
        let bytes = writer.into_inner().map_err(|e| e.into_error())?;
        Ok(String::from_utf8(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::aggregate::BreakdownRow;

    fn row(country: &str, region: Option<&str>, rx: u64, tx: u64) -> BreakdownRow {
        BreakdownRow {
            country: country.to_string(),
            region: region.map(str::to_string),
            rx_bytes: rx,
            tx_bytes: tx,
        }
    }

    fn first_column(table: &ReportTable) -> Vec<String> {
        table.records()[1..]
            .iter()
            .map(|r| r.first().cloned().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_scenario_ca_us_unknown() {
        let breakdown = CountryBreakdown::from_rows(vec![
            row("CA", None, 0, 300),
            row("US", None, 0, 100),
            row("Unknown", None, 0, 50),
        ]);
        let table = country_breakdown_table(&breakdown);
        let records = table.records();

        assert_eq!(first_column(&table), vec!["CA", "US", "Unknown", "", "Total"]);
        assert_eq!(records[1][5], "75.00");
        assert_eq!(records[2][5], "25.00");
        let total = records.last().unwrap();
        assert_eq!(total[3], "450");
        assert_eq!(total[5], "100.00");
        assert_eq!(total[4], "0.00");
    }

    #[test]
    fn test_unknown_precedes_total_even_when_largest() {
        let breakdown = CountryBreakdown::from_rows(vec![
            row("Unknown", None, 1, 900),
            row("FR", None, 1, 10),
            row("DE", None, 1, 90),
        ]);
        let table = country_breakdown_table(&breakdown);
        assert_eq!(first_column(&table), vec!["DE", "FR", "Unknown", "", "Total"]);
    }

    #[test]
    fn test_equal_percentages_keep_first_seen_order() {
        let breakdown = CountryBreakdown::from_rows(vec![
            row("NL", None, 0, 10),
            row("JP", None, 0, 50),
            row("BR", None, 0, 10),
            row("NL", None, 0, 0),
        ]);
        let table = country_breakdown_table(&breakdown);
        assert_eq!(first_column(&table), vec!["JP", "NL", "BR", "", "Total"]);
    }

    #[test]
    fn test_numeric_not_textual_ordering() {
        let breakdown = CountryBreakdown::from_rows(vec![row("A", None, 0, 9), row("B", None, 0, 91)]);
        let table = country_breakdown_table(&breakdown);
        assert_eq!(first_column(&table)[..2], ["B".to_string(), "A".to_string()]);
    }

    #[test]
    fn test_region_rows_follow_parent_without_percentages() {
        let breakdown = CountryBreakdown::from_rows(vec![
            row("US", Some("Texas"), 5, 10),
            row("US", Some("Ohio"), 5, 30),
        ]);
        let records = country_breakdown_table(&breakdown).records();
        assert_eq!(records[1], vec!["US", "", "10", "40", "100.00", "100.00"]);
        assert_eq!(records[2], vec!["", "Texas", "5", "10", "", ""]);
        assert_eq!(records[3], vec!["", "Ohio", "5", "30", "", ""]);
    }

    #[test]
    fn test_empty_input_total_is_zero() {
        let breakdown = CountryBreakdown::from_rows(Vec::new());
        let records = country_breakdown_table(&breakdown).records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2], vec!["Total", "", "0", "0", "0.00", "0.00"]);
    }

    #[test]
    fn test_table_and_csv_carry_identical_records() {
        let breakdown = CountryBreakdown::from_rows(vec![
            row("US", Some("Texas"), 5, 10),
            row("US", Some("Ohio"), 5, 30),
            row("Korea, Republic of", None, 7, 3),
        ]);
        let table = country_breakdown_table(&breakdown);

        let ascii = AsciiTableExporter.export(&table).unwrap();
        let ascii_records: Vec<Vec<String>> = ascii
            .lines()
            .filter(|l| l.starts_with('|'))
            .map(|l| {
                l.trim_matches('|')
                    .split(" | ")
                    .map(|c| c.trim().to_string())
                    .collect()
            })
            .collect();

        let csv = CsvExporter.export(&table).unwrap();
        let csv_lines: Vec<&str> = csv.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert!(csv.contains("\"Korea, Republic of\""));

        let expected = table.records();
        for (i, record) in expected.iter().enumerate() {
            if record.is_empty() {
                assert!(ascii_records[i].iter().all(String::is_empty));
            } else {
                assert_eq!(&ascii_records[i], record);
            }
        }
        assert_eq!(ascii_records.len(), expected.len());
        assert_eq!(csv.matches("\r\n").count(), expected.len());
        assert_eq!(csv_lines.len(), expected.len() - 1);
    }

    #[test]
    fn test_ascii_table_layout() {
        let table = ReportTable {
            header: vec!["Host", "ISP"],
            rows: vec![TableRow::Cells(vec!["example.com".into(), Cell::Blank])],
        };
        let expected = "\
+-------------+-----+
| Host        | ISP |
+-------------+-----+
| example.com |     |
+-------------+-----+";
        assert_eq!(AsciiTableExporter.export(&table).unwrap(), expected);
    }

    #[test]
    fn test_csv_quotes_only_special_fields() {
        let table = ReportTable {
            header: vec!["Host", "ISP", "Note"],
            rows: vec![
                TableRow::Cells(vec!["plain".into(), "a,b".into(), "say \"hi\"".into()]),
                TableRow::Separator,
                TableRow::Cells(vec!["two\nlines".into(), Cell::Blank, Cell::Bytes(42)]),
            ],
        };
        assert_eq!(
            CsvExporter.export(&table).unwrap(),
            "Host,ISP,Note\r\n\
             plain,\"a,b\",\"say \"\"hi\"\"\"\r\n\
             \r\n\
             \"two\nlines\",,42\r\n"
        );
    }

    #[test]
    fn test_host_table_has_one_row_per_unique_pair() {
        use crate::db::models::InternetHostRecord;
        let record = InternetHostRecord {
            local_ip: "10.0.0.2".parse().unwrap(),
            global_ip: "93.184.216.34".parse().unwrap(),
            global_hostname: Some("example.com".to_string()),
            isp: Some("Edgecast".to_string()),
        };
        let listing = HostListing::from_records(&[record.clone(), record]);
        let table = internet_host_table(&listing);
        assert_eq!(table.rows.len(), 1);
    }
}
