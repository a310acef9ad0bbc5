//! Message templates for alerts and traffic reports.
//!
//! Templates use `{{ token }}` placeholders rendered through Tera. Every token a
//! template references must be supplied; extra tokens are ignored. Content
//! fragments (host lists, report tables) are rendered first and inserted into
//! the envelope as plain values, so text inside them is never substituted again.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::debug;

use super::models::RenderedMessage;

pub type TokenMap = BTreeMap<String, String>;

pub const DEFAULT_WRAP_WIDTH: usize = 78;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z (%Z)";

lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"\{\{-?\s*([A-Za-z_][A-Za-z0-9_]*)").unwrap();
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template references missing token '{token}'")]
    MissingToken { token: String },
    #[error("Template rendering failed: {0}")]
    Render(String),
}

// Each paragraph is a single line; reflow wraps it to the configured width.

const FOOTER: &str = "\
You are receiving this message because you are a designated alert contact for {{ org_name }}. To stop receiving these messages, ask an administrator of {{ org_name }} to remove you from the alert contact list.

This message was generated automatically at {{ time }}.";

const TEST_ALERT_SUBJECT: &str = "ALERT: Recorder {{ recorder_human_name }} Is Testing Alerts";
const TEST_ALERT_BODY: &str = "\
The recorder {{ recorder_human_name }} at site {{ site_name }} installed for {{ org_name }} has issued a test alert to confirm that automated alert messages are delivered. This message was generated at {{ time }}.

If you or an administrator requested an alert test, you can safely delete this message. If not, contact your administrator to review recent activity seen by this recorder.";

const UNKNOWN_MACHINE_SUBJECT: &str = "ALERT: Unknown Machine Detected At {{ site_name }}";
const UNKNOWN_MACHINES_SUBJECT: &str = "ALERT: Unknown Machines Detected At {{ site_name }}";
const UNKNOWN_MACHINES_BODY: &str = "\
The recorder {{ recorder_human_name }} at site {{ site_name }} installed for {{ org_name }} has detected {{ machine_summary }} on the network. If you recently changed or added a machine, ask your administrator to add it to the network baseline.

If not, check whether someone has connected a phone or similar device to the network without permission.

This is what we know:

{{ machine_list }}

This alert repeats until every machine listed is either added to the baseline or removed from the network.";
const UNKNOWN_HOST_FRAGMENT: &str =
    "  IP Address: {{ ip_address }}\n  MAC Address: {{ mac_address }}\n  Vendor: {{ vendor }}";

const PROGRAM_ALERT_SUBJECT: &str = "ALERT: {{ program }} Raised An Alert At {{ site_name }}";
const PROGRAM_ALERT_BODY: &str = "\
The recorder {{ recorder_human_name }} at site {{ site_name }} installed for {{ org_name }} has reported an alert from {{ program }} at {{ time }}.

{{ alert_text }}";

const TRAFFIC_SUMMARY_SUBJECT: &str = "Traffic Report For {{ site_name }}";
const TRAFFIC_SUMMARY_BODY: &str = "\
This is a snapshot of internet traffic broken down by destination country and region for site {{ site_name }} of {{ org_name }} over the last {{ period }}. Percentages are shares of the traffic that could be located; traffic that could not be located is listed as Unknown. This report was generated at {{ time }}.

{{ country_table }}";

const EXTENDED_SUMMARY_SUBJECT: &str = "Extended Traffic Report For {{ site_name }}";
const EXTENDED_SUMMARY_BODY: &str = "\
This is a snapshot of internet traffic broken down by destination country and region for site {{ site_name }} of {{ org_name }} over the last {{ period }}. Percentages are shares of the traffic that could be located; traffic that could not be located is listed as Unknown. This report was generated at {{ time }}.

{{ country_table }}

Internet hosts contacted during this period:

{{ host_table }}

Traffic by local machine:

{{ machine_table }}

{{ attachment_note }}";
const ATTACHMENT_NOTE: &str =
    "Attached to this message is a CSV breakdown of all traffic for the last {{ period }}.";

/// Renders `template` with `tokens`. Fails before rendering if the template
/// references a token that was not supplied.
pub fn render_template(template: &str, tokens: &TokenMap) -> Result<String, TemplateError> {
    for captures in TOKEN.captures_iter(template) {
        let token = &captures[1];
        if !tokens.contains_key(token) {
            return Err(TemplateError::MissingToken {
                token: token.to_string(),
            });
        }
    }

    let mut context = Context::new();
    for (key, value) in tokens {
        context.insert(key.as_str(), value);
    }
    Tera::one_off(template, &context, false).map_err(|e| TemplateError::Render(e.to_string()))
}

/// Wraps every prose line to `width`. Blank lines are kept as paragraph breaks;
/// indented lines and table lines (`+`, `|`) pass through untouched.
pub fn reflow(text: &str, width: usize) -> String {
    text.lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else if line.starts_with(char::is_whitespace) || line.starts_with(['+', '|']) {
                line.trim_end().to_string()
            } else {
                textwrap::fill(line, width)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One machine that is not part of a site's baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownHost {
    pub ip: IpAddr,
    pub mac: Option<String>,
    pub vendor: Option<String>,
}

/// The catalog of messages sent to contacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertKind {
    TestAlert,
    UnknownMachines {
        hosts: Vec<UnknownHost>,
    },
    ProgramAlert {
        program: String,
        alert_text: String,
    },
    TrafficSummary {
        period: String,
        country_table: String,
    },
    ExtendedTrafficSummary {
        period: String,
        country_table: String,
        host_table: String,
        machine_table: String,
        with_attachment: bool,
    },
}

impl AlertKind {
    fn subject_template(&self) -> &'static str {
        match self {
            AlertKind::TestAlert => TEST_ALERT_SUBJECT,
            AlertKind::UnknownMachines { hosts } if hosts.len() == 1 => UNKNOWN_MACHINE_SUBJECT,
            AlertKind::UnknownMachines { .. } => UNKNOWN_MACHINES_SUBJECT,
            AlertKind::ProgramAlert { .. } => PROGRAM_ALERT_SUBJECT,
            AlertKind::TrafficSummary { .. } => TRAFFIC_SUMMARY_SUBJECT,
            AlertKind::ExtendedTrafficSummary { .. } => EXTENDED_SUMMARY_SUBJECT,
        }
    }

    fn body_template(&self) -> &'static str {
        match self {
            AlertKind::TestAlert => TEST_ALERT_BODY,
            AlertKind::UnknownMachines { .. } => UNKNOWN_MACHINES_BODY,
            AlertKind::ProgramAlert { .. } => PROGRAM_ALERT_BODY,
            AlertKind::TrafficSummary { .. } => TRAFFIC_SUMMARY_BODY,
            AlertKind::ExtendedTrafficSummary { .. } => EXTENDED_SUMMARY_BODY,
        }
    }

    /// Adds this kind's tokens to `tokens`, rendering inner fragments first.
    fn supply_tokens(&self, tokens: &mut TokenMap) -> Result<(), TemplateError> {
        match self {
            AlertKind::TestAlert => {}
            AlertKind::UnknownMachines { hosts } => {
                let summary = match hosts.len() {
                    1 => "an unknown machine".to_string(),
                    n => format!("{n} unknown machines"),
                };
                let mut fragments = Vec::with_capacity(hosts.len());
                for host in hosts {
                    let mut host_tokens = TokenMap::new();
                    host_tokens.insert("ip_address".into(), host.ip.to_string());
                    host_tokens.insert("mac_address".into(), describe(host.mac.as_deref()));
                    host_tokens.insert("vendor".into(), describe(host.vendor.as_deref()));
                    fragments.push(render_template(UNKNOWN_HOST_FRAGMENT, &host_tokens)?);
                }
                tokens.insert("machine_summary".into(), summary);
                tokens.insert("machine_list".into(), fragments.join("\n\n"));
            }
            AlertKind::ProgramAlert { program, alert_text } => {
                tokens.insert("program".into(), program.clone());
                tokens.insert("alert_text".into(), alert_text.clone());
            }
            AlertKind::TrafficSummary {
                period,
                country_table,
            } => {
                tokens.insert("period".into(), period.clone());
                tokens.insert("country_table".into(), country_table.clone());
            }
            AlertKind::ExtendedTrafficSummary {
                period,
                country_table,
                host_table,
                machine_table,
                with_attachment,
            } => {
                tokens.insert("period".into(), period.clone());
                tokens.insert("country_table".into(), country_table.clone());
                tokens.insert("host_table".into(), host_table.clone());
                tokens.insert("machine_table".into(), machine_table.clone());
                let note = if *with_attachment {
                    render_template(ATTACHMENT_NOTE, tokens)?
                } else {
                    String::new()
                };
                tokens.insert("attachment_note".into(), note);
            }
        }
        Ok(())
    }
}

fn describe(value: Option<&str>) -> String {
    value.unwrap_or("unknown").to_string()
}

/// Who a message is about and when it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    pub org_name: String,
    pub site_name: String,
    /// Required by templates that name the reporting recorder.
    pub recorder_name: Option<String>,
    pub event_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TemplateEngine {
    wrap_width: usize,
    timezone: Tz,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new(DEFAULT_WRAP_WIDTH, Tz::UTC)
    }
}

impl TemplateEngine {
    pub fn new(wrap_width: usize, timezone: Tz) -> Self {
        Self {
            wrap_width: wrap_width.max(1),
            timezone,
        }
    }

    pub fn wrap_width(&self) -> usize {
        self.wrap_width
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn format_time(&self, time: DateTime<Utc>) -> String {
        time.with_timezone(&self.timezone).format(TIME_FORMAT).to_string()
    }

    fn base_tokens(&self, context: &MessageContext) -> TokenMap {
        let mut tokens = TokenMap::new();
        tokens.insert("org_name".into(), context.org_name.clone());
        tokens.insert("site_name".into(), context.site_name.clone());
        tokens.insert("time".into(), self.format_time(context.event_time));
        if let Some(recorder) = &context.recorder_name {
            tokens.insert("recorder_human_name".into(), recorder.clone());
        }
        tokens
    }

    /// Renders subject, body and footer for `kind`. Nothing is returned unless
    /// every part renders.
    pub fn render(
        &self,
        context: &MessageContext,
        kind: &AlertKind,
    ) -> Result<RenderedMessage, TemplateError> {
        let mut tokens = self.base_tokens(context);
        kind.supply_tokens(&mut tokens)?;

        let subject = render_template(kind.subject_template(), &tokens)?;
        let body = reflow(&render_template(kind.body_template(), &tokens)?, self.wrap_width);
        let footer = reflow(&render_template(FOOTER, &tokens)?, self.wrap_width);
        debug!(subject = %subject, body_len = body.len(), "Rendered message.");

        Ok(RenderedMessage {
            subject: subject.trim().to_string(),
            body: format!("{}\n\n{}\n", body.trim_end(), footer.trim_end()),
        })
    }
}
