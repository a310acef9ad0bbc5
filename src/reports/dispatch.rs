//! Builds a site's traffic report and delivers it to the organization's
//! contacts.

use chrono::{DateTime, Utc};
use r2d2::ManageConnection;
use std::io::{Cursor, Write};
use thiserror::Error;
use tracing::{info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::aggregate::{BreakdownRow, CountryBreakdown, HostListing};
use super::render::{
    country_breakdown_table, full_connection_table, internet_host_table, machine_breakdown_table,
    AsciiTableExporter, CsvExporter, ExportError, ReportExporter,
};
use super::window::ReportWindow;
use crate::db::models::{Contact, OutputFormat, Site};
use crate::db::services::{organization_service, traffic_report_service};
use crate::db::{DataAccessError, ProcedureConnection, StoreConnection, TransactionRunner};
use crate::notifications::senders::{SenderError, SinkResolver};
use crate::notifications::{
    AlertKind, Attachment, AttachmentContent, MessageContext, RenderedMessage, TemplateEngine,
    TemplateError,
};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Data access error: {0}")]
    Data(#[from] DataAccessError),
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
    #[error("Failed to export report table: {0}")]
    Export(#[from] ExportError),
    #[error("Failed to build attachment archive: {0}")]
    Archive(#[from] ZipError),
    #[error("Delivery failed for {failed} of {total} contacts: {last}")]
    Delivery {
        failed: usize,
        total: usize,
        #[source]
        last: SenderError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    /// Deliver to every contact of the site's organization.
    pub send: bool,
    /// Render the full-connection CSV export into the returned report.
    pub csv_output: bool,
    /// Stamped into the message and the attachment filename.
    pub generated_at: DateTime<Utc>,
}

impl ReportOptions {
    pub fn new(send: bool, csv_output: bool) -> Self {
        Self {
            send,
            csv_output,
            generated_at: Utc::now(),
        }
    }
}

/// Everything produced for one report request.
#[derive(Debug, Clone)]
pub struct TrafficReport {
    pub site: Site,
    pub window: ReportWindow,
    pub breakdown: CountryBreakdown,
    pub hosts: HostListing,
    /// The message as sent to contacts without an attachment.
    pub message: RenderedMessage,
    pub csv_export: Option<String>,
    /// Number of contacts the report was delivered to.
    pub delivered: usize,
}

pub struct ReportDispatcher<'a, M>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    runner: &'a TransactionRunner<M>,
    engine: &'a TemplateEngine,
    resolver: &'a dyn SinkResolver,
}

impl<'a, M> ReportDispatcher<'a, M>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    pub fn new(
        runner: &'a TransactionRunner<M>,
        engine: &'a TemplateEngine,
        resolver: &'a dyn SinkResolver,
    ) -> Self {
        Self {
            runner,
            engine,
            resolver,
        }
    }

    /// Fetches, aggregates and renders the report for `site` over `window`,
    /// then delivers it when `options.send` is set.
    ///
    /// Each breakdown is its own store call. Passing `conn` runs them all in the
    /// caller's transaction. Every message is composed before anything is
    /// delivered, so a template failure sends nothing. A failing contact does
    /// not stop delivery to the others; the last failure is returned.
    pub fn generate_report(
        &self,
        site: &Site,
        window: &ReportWindow,
        options: ReportOptions,
        mut conn: Option<&mut StoreConnection<M>>,
    ) -> Result<TrafficReport, ReportError> {
        let runner = self.runner;
        let geoip =
            traffic_report_service::retrieve_geoip_breakdown(runner, site, window, conn.as_deref_mut())?;
        let machines = traffic_report_service::retrieve_geoip_by_local_ip_breakdown(
            runner,
            site,
            window,
            conn.as_deref_mut(),
        )?;
        let connections =
            traffic_report_service::retrieve_full_host_breakdown(runner, site, window, conn.as_deref_mut())?;
        let internet_hosts = traffic_report_service::retrieve_internet_host_breakdown(
            runner,
            site,
            window,
            conn.as_deref_mut(),
        )?;

        let breakdown = CountryBreakdown::from_rows(geoip.iter().map(BreakdownRow::from));
        let hosts = HostListing::from_records(&internet_hosts);

        let organization =
            organization_service::get_organization_for_site(runner, site, conn.as_deref_mut())?;
        let contacts = if options.send {
            Some(organization_service::get_contacts(runner, &organization, conn)?)
        } else {
            None
        };

        let wants_attachment = contacts
            .as_ref()
            .is_some_and(|c| c.iter().any(|c| c.output_format != OutputFormat::Inline));
        let csv_export = (options.csv_output || wants_attachment)
            .then(|| CsvExporter.export(&full_connection_table(&connections)))
            .transpose()?;

        let ascii = AsciiTableExporter;
        let country_table = ascii.export(&country_breakdown_table(&breakdown))?;
        let host_table = ascii.export(&internet_host_table(&hosts))?;
        let machine_table = ascii.export(&machine_breakdown_table(&machines))?;
        let kind = |with_attachment| AlertKind::ExtendedTrafficSummary {
            period: window.describe_length(),
            country_table: country_table.clone(),
            host_table: host_table.clone(),
            machine_table: machine_table.clone(),
            with_attachment,
        };
        let context = MessageContext {
            org_name: organization.name.clone(),
            site_name: site.name.clone(),
            recorder_name: None,
            event_time: options.generated_at,
        };
        let message = self.engine.render(&context, &kind(false))?;
        let attached_message = if wants_attachment {
            Some(self.engine.render(&context, &kind(true))?)
        } else {
            None
        };

        let mut delivered = 0;
        if let Some(contacts) = &contacts {
            let date = options
                .generated_at
                .with_timezone(&self.engine.timezone())
                .format("%Y-%m-%d")
                .to_string();
            let prepared = Attachments::build(csv_export.as_deref(), &date, contacts)?;

            let mut failed = 0;
            let mut last_error = None;
            for contact in contacts {
                let with_attachment = attached_message.as_ref().unwrap_or(&message);
                let (to_send, files): (&RenderedMessage, Vec<Attachment>) = match contact.output_format {
                    OutputFormat::Inline => (&message, Vec::new()),
                    OutputFormat::Csv => (with_attachment, prepared.csv.iter().cloned().collect()),
                    OutputFormat::Zip => (with_attachment, prepared.zip.iter().cloned().collect()),
                };
                match self.deliver(contact, to_send, &files) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!(
                            contact_id = contact.id,
                            organization_id = organization.id,
                            error = %e,
                            "Report delivery failed."
                        );
                        failed += 1;
                        last_error = Some(e);
                    }
                }
            }
            info!(site_id = site.id, delivered, failed, "Traffic report dispatched.");

            if let Some(last) = last_error {
                return Err(ReportError::Delivery {
                    failed,
                    total: contacts.len(),
                    last,
                });
            }
        }

        Ok(TrafficReport {
            site: site.clone(),
            window: *window,
            breakdown,
            hosts,
            message,
            csv_export: if options.csv_output { csv_export } else { None },
            delivered,
        })
    }

    fn deliver(
        &self,
        contact: &Contact,
        message: &RenderedMessage,
        attachments: &[Attachment],
    ) -> Result<(), SenderError> {
        let sink = self.resolver.resolve(contact)?;
        sink.deliver(&message.subject, &message.body, attachments)
    }
}

/// The attachment variants needed by a contact list, built once per report.
struct Attachments {
    csv: Option<Attachment>,
    zip: Option<Attachment>,
}

impl Attachments {
    fn build(csv: Option<&str>, date: &str, contacts: &[Contact]) -> Result<Self, ReportError> {
        let Some(csv) = csv else {
            return Ok(Self { csv: None, zip: None });
        };
        let wants = |format| contacts.iter().any(|c| c.output_format == format);
        let csv_name = format!("breakdown_{date}.csv");

        let zip = if wants(OutputFormat::Zip) {
            Some(Attachment {
                content: AttachmentContent::Bytes(zip_single(&csv_name, csv.as_bytes())?),
                filename: format!("breakdown_{date}.zip"),
            })
        } else {
            None
        };
        let csv = wants(OutputFormat::Csv).then(|| Attachment {
            content: AttachmentContent::Text(csv.to_string()),
            filename: csv_name,
        });
        Ok(Self { csv, zip })
    }
}

fn zip_single(name: &str, content: &[u8]) -> Result<Vec<u8>, ZipError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file(name, options)?;
    writer.write_all(content).map_err(ZipError::from)?;
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ContactMethod;
    use crate::db::services::organization_service::{GET_CONTACTS, GET_ORGANIZATION_FOR_SITE};
    use crate::db::services::traffic_report_service::{
        FULL_CONNECTION_BREAKDOWN, GEOIP_BREAKDOWN, INTERNET_HOST_BREAKDOWN, MACHINE_BREAKDOWN,
    };
    use crate::db::testing::{mock_runner, MockStore};
    use crate::notifications::senders::ContactSink;
    use chrono::TimeZone;
    use serde_json::json;
    use std::io::Read;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct Delivery {
        contact_id: i64,
        subject: String,
        body: String,
        attachments: Vec<Attachment>,
    }

    #[derive(Clone, Default)]
    struct RecordingResolver {
        deliveries: Arc<Mutex<Vec<Delivery>>>,
        failing: Vec<i64>,
    }

    struct RecordingSink {
        contact_id: i64,
        fail: bool,
        deliveries: Arc<Mutex<Vec<Delivery>>>,
    }

    impl ContactSink for RecordingSink {
        fn deliver(&self, subject: &str, body: &str, attachments: &[Attachment]) -> Result<(), SenderError> {
            if self.fail {
                return Err(SenderError::SendFailed(format!("contact {} unreachable", self.contact_id)));
            }
            self.deliveries.lock().unwrap().push(Delivery {
                contact_id: self.contact_id,
                subject: subject.to_string(),
                body: body.to_string(),
                attachments: attachments.to_vec(),
            });
            Ok(())
        }
    }

    impl SinkResolver for RecordingResolver {
        fn resolve(&self, contact: &Contact) -> Result<Box<dyn ContactSink>, SenderError> {
            Ok(Box::new(RecordingSink {
                contact_id: contact.id,
                fail: self.failing.contains(&contact.id),
                deliveries: self.deliveries.clone(),
            }))
        }
    }

    impl RecordingResolver {
        fn deliveries(&self) -> Vec<Delivery> {
            self.deliveries.lock().unwrap().clone()
        }
    }

    fn site() -> Site {
        Site {
            id: 7,
            organization_id: 3,
            name: "Main Office".to_string(),
        }
    }

    fn window() -> ReportWindow {
        let end = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        ReportWindow::last_hours(end, 24).unwrap()
    }

    fn options(send: bool, csv_output: bool) -> ReportOptions {
        ReportOptions {
            send,
            csv_output,
            generated_at: Utc.with_ymd_and_hms(2024, 3, 2, 6, 30, 0).unwrap(),
        }
    }

    fn seeded_store(formats: &[&str]) -> MockStore {
        let store = MockStore::new();
        store.respond(
            GEOIP_BREAKDOWN,
            vec![
                json!({ "country_name": "CA", "region_name": null, "total_rx_bytes": 0, "total_tx_bytes": 300 }),
                json!({ "country_name": "US", "region_name": null, "total_rx_bytes": 0, "total_tx_bytes": 100 }),
                json!({ "country_name": null, "region_name": null, "total_rx_bytes": 0, "total_tx_bytes": 50 }),
            ],
        );
        store.respond(
            MACHINE_BREAKDOWN,
            vec![json!({ "local_ip": "192.168.2.10", "country_name": "CA", "region_name": null, "total_rx_bytes": 0, "total_tx_bytes": 300 })],
        );
        store.respond(
            FULL_CONNECTION_BREAKDOWN,
            vec![json!({
                "local_ip": "192.168.2.10", "global_ip": "198.51.100.4", "country_name": "CA",
                "region_name": "Ontario", "city_name": "Toronto", "isp": "Example, Inc.", "domain": null,
                "total_rx_bytes": 0, "total_tx_bytes": 300
            })],
        );
        store.respond(
            INTERNET_HOST_BREAKDOWN,
            vec![
                json!({ "local_ip": "192.168.2.10", "global_ip": "198.51.100.4", "global_hostname": "example.ca", "isp": "Example, Inc." }),
                json!({ "local_ip": "192.168.2.11", "global_ip": "198.51.100.4", "global_hostname": "example.ca", "isp": "Example, Inc." }),
            ],
        );
        store.respond(GET_ORGANIZATION_FOR_SITE, vec![json!({ "id": 3, "name": "Example Org" })]);
        let contacts = formats
            .iter()
            .enumerate()
            .map(|(i, format)| {
                json!({ "id": i as i64 + 1, "method": "file", "value": format!("/tmp/{i}"), "output_format": format })
            })
            .collect();
        store.respond(GET_CONTACTS, contacts);
        store
    }

    #[test]
    fn test_report_without_send_touches_no_contacts() {
        let store = seeded_store(&["inline"]);
        let runner = mock_runner(&store, 2);
        let engine = TemplateEngine::default();
        let resolver = RecordingResolver::default();
        let dispatcher = ReportDispatcher::new(&runner, &engine, &resolver);

        let report = dispatcher
            .generate_report(&site(), &window(), options(false, false), None)
            .unwrap();

        assert_eq!(report.breakdown.total_tx_bytes(), 450);
        assert_eq!(report.hosts.entries().len(), 1);
        assert_eq!(report.csv_export, None);
        assert_eq!(report.delivered, 0);
        assert!(report.message.body.contains("| CA "));
        assert!(report.message.body.contains("Example Org"));
        assert!(resolver.deliveries().is_empty());

        let log = store.log();
        let procedures: Vec<&str> = log.calls.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            procedures,
            vec![
                GEOIP_BREAKDOWN,
                MACHINE_BREAKDOWN,
                FULL_CONNECTION_BREAKDOWN,
                INTERNET_HOST_BREAKDOWN,
                GET_ORGANIZATION_FOR_SITE,
            ]
        );
        assert_eq!(log.commits, 5);
        assert_eq!(log.rollbacks, 0);
    }

    #[test]
    fn test_each_contact_gets_its_output_format() {
        let store = seeded_store(&["inline", "csv", "zip"]);
        let runner = mock_runner(&store, 2);
        let engine = TemplateEngine::default();
        let resolver = RecordingResolver::default();
        let dispatcher = ReportDispatcher::new(&runner, &engine, &resolver);

        let report = dispatcher
            .generate_report(&site(), &window(), options(true, true), None)
            .unwrap();
        assert_eq!(report.delivered, 3);
        let csv = report.csv_export.unwrap();
        assert!(csv.contains("\"Example, Inc.\""));

        let deliveries = resolver.deliveries();
        assert_eq!(deliveries[0].subject, "Extended Traffic Report For Main Office");
        assert!(deliveries[0].attachments.is_empty());
        assert!(!deliveries[0].body.contains("CSV breakdown"));

        let csv_attachment = &deliveries[1].attachments[0];
        assert_eq!(csv_attachment.filename, "breakdown_2024-03-02.csv");
        assert_eq!(csv_attachment.content, AttachmentContent::Text(csv.clone()));
        assert!(deliveries[1].body.contains("CSV breakdown"));

        let zip_attachment = &deliveries[2].attachments[0];
        assert_eq!(zip_attachment.filename, "breakdown_2024-03-02.zip");
        let mut archive = zip::ZipArchive::new(Cursor::new(zip_attachment.content.as_bytes().to_vec())).unwrap();
        let mut unpacked = String::new();
        archive
            .by_name("breakdown_2024-03-02.csv")
            .unwrap()
            .read_to_string(&mut unpacked)
            .unwrap();
        assert_eq!(unpacked, csv);
    }

    #[test]
    fn test_failed_contact_does_not_stop_delivery() {
        let store = seeded_store(&["inline", "inline", "inline"]);
        let runner = mock_runner(&store, 2);
        let engine = TemplateEngine::default();
        let resolver = RecordingResolver {
            failing: vec![2],
            ..Default::default()
        };
        let dispatcher = ReportDispatcher::new(&runner, &engine, &resolver);

        let err = dispatcher
            .generate_report(&site(), &window(), options(true, false), None)
            .unwrap_err();

        assert!(matches!(err, ReportError::Delivery { failed: 1, total: 3, .. }));
        let delivered: Vec<i64> = resolver.deliveries().iter().map(|d| d.contact_id).collect();
        assert_eq!(delivered, vec![1, 3]);
    }

    #[test]
    fn test_repeated_requests_deliver_again() {
        let store = seeded_store(&["inline"]);
        let runner = mock_runner(&store, 2);
        let engine = TemplateEngine::default();
        let resolver = RecordingResolver::default();
        let dispatcher = ReportDispatcher::new(&runner, &engine, &resolver);

        for _ in 0..2 {
            dispatcher
                .generate_report(&site(), &window(), options(true, false), None)
                .unwrap();
        }
        assert_eq!(resolver.deliveries().len(), 2);
    }

    #[test]
    fn test_caller_connection_is_left_to_the_caller() {
        let store = seeded_store(&["inline"]);
        let runner = mock_runner(&store, 1);
        let engine = TemplateEngine::default();
        let resolver = RecordingResolver::default();
        let dispatcher = ReportDispatcher::new(&runner, &engine, &resolver);

        let mut conn = runner.acquire().unwrap();
        dispatcher
            .generate_report(&site(), &window(), options(true, false), Some(&mut conn))
            .unwrap();

        let log = store.log();
        assert_eq!(log.begins, 1);
        assert_eq!(log.commits, 0);
        assert_eq!(log.rollbacks, 0);
        assert_eq!(log.calls.len(), 6);
        conn.commit().unwrap();
        assert_eq!(store.log().commits, 1);
    }

    #[test]
    fn test_store_failure_aborts_before_delivery() {
        let store = seeded_store(&["inline"]);
        store.fail(INTERNET_HOST_BREAKDOWN, "relation does not exist");
        let runner = mock_runner(&store, 2);
        let engine = TemplateEngine::default();
        let resolver = RecordingResolver::default();
        let dispatcher = ReportDispatcher::new(&runner, &engine, &resolver);

        let err = dispatcher
            .generate_report(&site(), &window(), options(true, false), None)
            .unwrap_err();

        match err {
            ReportError::Data(e) => assert_eq!(e.procedure_name(), Some(INTERNET_HOST_BREAKDOWN)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(resolver.deliveries().is_empty());
        assert_eq!(store.log().rollbacks, 1);
    }
}
