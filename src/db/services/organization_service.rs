use r2d2::ManageConnection;

use crate::db::models::{Contact, ContactMethod, Organization, OutputFormat, Site};
use crate::db::row::{decode_row, decode_rows, FieldError, RowExt};
use crate::db::{DataAccessError, ProcArg, ProcedureConnection, StoreConnection, StoreRow, TransactionRunner};

pub const GET_SITE: &str = "admin.get_site";
pub const GET_ORGANIZATION_FOR_SITE: &str = "admin.get_organization_for_site";
pub const GET_CONTACTS: &str = "admin.get_contacts_for_organization";

fn row_to_site(row: &StoreRow) -> Result<Site, FieldError> {
    Ok(Site {
        id: row.i64_field("id")?,
        organization_id: row.i64_field("org_id")?,
        name: row.str_field("name")?,
    })
}

fn row_to_organization(row: &StoreRow) -> Result<Organization, FieldError> {
    Ok(Organization {
        id: row.i64_field("id")?,
        name: row.str_field("name")?,
    })
}

fn row_to_contact(row: &StoreRow) -> Result<Contact, FieldError> {
    let method = match row.str_field("method")?.as_str() {
        "email" => ContactMethod::Email,
        "file" => ContactMethod::File,
        "webhook" => ContactMethod::Webhook,
        other => {
            return Err(FieldError {
                field: "method".to_string(),
                reason: format!("unknown contact method {other:?}"),
            })
        }
    };
    let output_format = match row.opt_str("output_format")?.as_deref() {
        None | Some("inline") => OutputFormat::Inline,
        Some("csv") => OutputFormat::Csv,
        Some("zip") => OutputFormat::Zip,
        Some(other) => {
            return Err(FieldError {
                field: "output_format".to_string(),
                reason: format!("unknown output format {other:?}"),
            })
        }
    };
    Ok(Contact {
        id: row.i64_field("id")?,
        method,
        value: row.str_field("value")?,
        output_format,
    })
}

pub fn get_site<M>(
    runner: &TransactionRunner<M>,
    site_id: i64,
    conn: Option<&mut StoreConnection<M>>,
) -> Result<Site, DataAccessError>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    let row = runner
        .fetch_one(GET_SITE, &[ProcArg::Int(site_id)], conn)?
        .ok_or_else(|| DataAccessError::NoRows {
            procedure: GET_SITE.to_string(),
        })?;
    decode_row(GET_SITE, &row, row_to_site)
}

pub fn get_organization_for_site<M>(
    runner: &TransactionRunner<M>,
    site: &Site,
    conn: Option<&mut StoreConnection<M>>,
) -> Result<Organization, DataAccessError>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    let row = runner
        .fetch_one(GET_ORGANIZATION_FOR_SITE, &[ProcArg::Int(site.id)], conn)?
        .ok_or_else(|| DataAccessError::NoRows {
            procedure: GET_ORGANIZATION_FOR_SITE.to_string(),
        })?;
    decode_row(GET_ORGANIZATION_FOR_SITE, &row, row_to_organization)
}

/// All alert contacts configured for an organization.
pub fn get_contacts<M>(
    runner: &TransactionRunner<M>,
    organization: &Organization,
    conn: Option<&mut StoreConnection<M>>,
) -> Result<Vec<Contact>, DataAccessError>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    let rows = runner.fetch_all(GET_CONTACTS, &[ProcArg::Int(organization.id)], conn)?;
    decode_rows(GET_CONTACTS, &rows, row_to_contact)
}
