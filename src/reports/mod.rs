pub mod aggregate;
pub mod dispatch;
pub mod render;
pub mod window;

pub use aggregate::{CountryBreakdown, HostListing, Percentage};
pub use dispatch::{ReportDispatcher, ReportError, ReportOptions, TrafficReport};
pub use render::{AsciiTableExporter, CsvExporter, ExportError, ReportExporter, ReportTable};
pub use window::{ReportWindow, WindowError};
