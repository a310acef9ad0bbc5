use r2d2::ManageConnection;
use tracing::{debug, info};

use crate::db::models::{
    FullConnectionGeoIpRecord, GeoipSummaryRecord, InternetHostRecord, MachineGeoIpRecord,
    Site, TrafficRecord,
};
use crate::db::row::{decode_rows, FieldError, RowExt};
use crate::db::{DataAccessError, ProcArg, ProcedureConnection, StoreConnection, StoreRow, TransactionRunner};
use crate::reports::window::ReportWindow;

pub const CREATE_TRAFFIC_REPORT: &str = "traffic_report.create_traffic_report";
pub const GEOIP_BREAKDOWN: &str = "traffic_report.report_geoip_breakdown_for_site";
pub const MACHINE_BREAKDOWN: &str = "traffic_report.report_traffic_breakdown_in_site_by_machine";
pub const FULL_CONNECTION_BREAKDOWN: &str = "traffic_report.report_traffic_breakdown_for_site";
pub const INTERNET_HOST_BREAKDOWN: &str = "traffic_report.report_internet_host_breakdown_for_site";

/// GeoIP has no country for the address.
pub const UNKNOWN_COUNTRY: &str = "Unknown";

fn country_field(row: &StoreRow) -> Result<String, FieldError> {
    Ok(row
        .opt_str("country_name")?
        .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string()))
}

fn row_to_geoip_summary(row: &StoreRow) -> Result<GeoipSummaryRecord, FieldError> {
    Ok(GeoipSummaryRecord {
        country_name: country_field(row)?,
        region_name: row.opt_str("region_name")?,
        total_rx_bytes: row.u64_field("total_rx_bytes")?,
        total_tx_bytes: row.u64_field("total_tx_bytes")?,
    })
}

fn row_to_machine_geoip(row: &StoreRow) -> Result<MachineGeoIpRecord, FieldError> {
    Ok(MachineGeoIpRecord {
        local_ip: row.ip_field("local_ip")?,
        country_name: country_field(row)?,
        region_name: row.opt_str("region_name")?,
        total_rx_bytes: row.u64_field("total_rx_bytes")?,
        total_tx_bytes: row.u64_field("total_tx_bytes")?,
    })
}

fn row_to_full_connection(row: &StoreRow) -> Result<FullConnectionGeoIpRecord, FieldError> {
    Ok(FullConnectionGeoIpRecord {
        local_ip: row.ip_field("local_ip")?,
        global_ip: row.ip_field("global_ip")?,
        country_name: country_field(row)?,
        region_name: row.opt_str("region_name")?,
        city_name: row.opt_str("city_name")?,
        isp: row.opt_str("isp")?,
        domain: row.opt_str("domain")?,
        total_rx_bytes: row.u64_field("total_rx_bytes")?,
        total_tx_bytes: row.u64_field("total_tx_bytes")?,
    })
}

fn row_to_internet_host(row: &StoreRow) -> Result<InternetHostRecord, FieldError> {
    Ok(InternetHostRecord {
        local_ip: row.ip_field("local_ip")?,
        global_ip: row.ip_field("global_ip")?,
        global_hostname: row.opt_str("global_hostname")?,
        isp: row.opt_str("isp")?,
    })
}

fn window_args(site: &Site, window: &ReportWindow) -> [ProcArg; 3] {
    [
        ProcArg::Int(site.id),
        ProcArg::timestamp(window.start()),
        ProcArg::timestamp(window.end()),
    ]
}

fn byte_count(procedure: &str, argument: &'static str, value: u64) -> Result<ProcArg, DataAccessError> {
    i64::try_from(value)
        .map(ProcArg::Int)
        .map_err(|_| DataAccessError::ArgumentOutOfRange {
            procedure: procedure.to_string(),
            argument,
        })
}

fn traffic_record_args(log_id: i64, entry: &TrafficRecord) -> Result<Vec<ProcArg>, DataAccessError> {
    Ok(vec![
        ProcArg::Int(log_id),
        ProcArg::Int(entry.protocol.code()),
        ProcArg::inet(entry.src_address),
        entry.src_hostname.clone().into(),
        entry.src_port.into(),
        ProcArg::inet(entry.dst_address),
        entry.dst_hostname.clone().into(),
        entry.dst_port.into(),
        byte_count(CREATE_TRAFFIC_REPORT, "rx_bytes", entry.rx_bytes)?,
        byte_count(CREATE_TRAFFIC_REPORT, "tx_bytes", entry.tx_bytes)?,
        ProcArg::timestamp(entry.start_timestamp),
        byte_count(CREATE_TRAFFIC_REPORT, "duration", entry.duration.as_secs())?,
    ])
}

/// Stores every entry of one traffic log upload.
///
/// Without a caller connection all entries go in as one transaction, so a
/// failing entry leaves nothing of the upload behind.
pub fn store_traffic_report<M>(
    runner: &TransactionRunner<M>,
    log_id: i64,
    entries: &[TrafficRecord],
    conn: Option<&mut StoreConnection<M>>,
) -> Result<(), DataAccessError>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    let store_all = |conn: &mut StoreConnection<M>| -> Result<(), DataAccessError> {
        for entry in entries {
            let args = traffic_record_args(log_id, entry)?;
            runner.fetch_all(CREATE_TRAFFIC_REPORT, &args, Some(&mut *conn))?;
        }
        Ok(())
    };

    match conn {
        Some(conn) => store_all(conn)?,
        None => runner.transaction(store_all)?,
    }
    info!(log_id, entries = entries.len(), "Stored traffic report entries.");
    Ok(())
}

/// Breaks down all traffic by destination country and region.
pub fn retrieve_geoip_breakdown<M>(
    runner: &TransactionRunner<M>,
    site: &Site,
    window: &ReportWindow,
    conn: Option<&mut StoreConnection<M>>,
) -> Result<Vec<GeoipSummaryRecord>, DataAccessError>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    let rows = runner.fetch_all(GEOIP_BREAKDOWN, &window_args(site, window), conn)?;
    debug!(site_id = site.id, rows = rows.len(), "Fetched GeoIP breakdown.");
    decode_rows(GEOIP_BREAKDOWN, &rows, row_to_geoip_summary)
}

/// Breaks down traffic by local machine and destination.
pub fn retrieve_geoip_by_local_ip_breakdown<M>(
    runner: &TransactionRunner<M>,
    site: &Site,
    window: &ReportWindow,
    conn: Option<&mut StoreConnection<M>>,
) -> Result<Vec<MachineGeoIpRecord>, DataAccessError>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    let rows = runner.fetch_all(MACHINE_BREAKDOWN, &window_args(site, window), conn)?;
    debug!(site_id = site.id, rows = rows.len(), "Fetched machine breakdown.");
    decode_rows(MACHINE_BREAKDOWN, &rows, row_to_machine_geoip)
}

/// Breaks down remote traffic by local machine and remote host.
pub fn retrieve_full_host_breakdown<M>(
    runner: &TransactionRunner<M>,
    site: &Site,
    window: &ReportWindow,
    conn: Option<&mut StoreConnection<M>>,
) -> Result<Vec<FullConnectionGeoIpRecord>, DataAccessError>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    let rows = runner.fetch_all(FULL_CONNECTION_BREAKDOWN, &window_args(site, window), conn)?;
    debug!(site_id = site.id, rows = rows.len(), "Fetched full connection breakdown.");
    decode_rows(FULL_CONNECTION_BREAKDOWN, &rows, row_to_full_connection)
}

pub fn retrieve_internet_host_breakdown<M>(
    runner: &TransactionRunner<M>,
    site: &Site,
    window: &ReportWindow,
    conn: Option<&mut StoreConnection<M>>,
) -> Result<Vec<InternetHostRecord>, DataAccessError>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    let rows = runner.fetch_all(INTERNET_HOST_BREAKDOWN, &window_args(site, window), conn)?;
    debug!(site_id = site.id, rows = rows.len(), "Fetched internet host breakdown.");
    decode_rows(INTERNET_HOST_BREAKDOWN, &rows, row_to_internet_host)
}
