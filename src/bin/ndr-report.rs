use chrono::Utc;
use clap::Parser;
use ndr_server::config::ServerConfig;
use ndr_server::db::postgres::connect_runner;
use ndr_server::db::services::organization_service;
use ndr_server::notifications::senders::DefaultSinkResolver;
use ndr_server::notifications::TemplateEngine;
use ndr_server::reports::{ReportDispatcher, ReportOptions, ReportWindow};
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Builds a site traffic report and optionally delivers it", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Site to report on
    #[arg(long)]
    site_id: i64,

    /// Length of the report window ending now
    #[arg(long, default_value_t = 24)]
    hours: i64,

    /// Deliver the report to the organization's contacts
    #[arg(long)]
    send: bool,

    /// Print the full-connection CSV export after the report
    #[arg(long)]
    csv: bool,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "ndr-report.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stderr so stdout carries only the report
    let console_layer = fmt::layer().with_writer(std::io::stderr);

    // Default to `info,postgres=warn` if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,postgres=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = ServerConfig::load(args.config.as_deref())?;
    init_logging(&config.log_dir);
    info!(site_id = args.site_id, hours = args.hours, send = args.send, "Generating traffic report.");

    let runner = connect_runner(&config.database_url, &config.pool_settings())?;
    let engine = TemplateEngine::new(config.wrap_width, config.timezone);
    let resolver = DefaultSinkResolver::default();
    let dispatcher = ReportDispatcher::new(&runner, &engine, &resolver);

    let window = ReportWindow::last_hours(Utc::now(), args.hours)?;
    let site = organization_service::get_site(&runner, args.site_id, None)?;

    let report = match dispatcher.generate_report(
        &site,
        &window,
        ReportOptions::new(args.send, args.csv),
        None,
    ) {
        Ok(report) => report,
        Err(e) => {
            error!(site_id = site.id, error = %e, "Traffic report failed.");
            return Err(e.into());
        }
    };

    println!("Subject: {}\n", report.message.subject);
    println!("{}", report.message.body);
    if let Some(csv) = &report.csv_export {
        print!("{csv}");
    }
    info!(site_id = site.id, delivered = report.delivered, "Traffic report complete.");
    Ok(())
}
