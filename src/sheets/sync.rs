//! Idempotent find-or-create-or-update of one property row.
//!
//! The sheet is read once, the row is located by place id and then by name,
//! and at most one write follows. There is no lock between the read and the
//! write, so two runs for the same property can still race.

use crate::listing::columns::{NAME_FIELD, PLACE_ID_FIELD, header_for, is_mapped_header};
use crate::listing::property::PropertyDetails;
use crate::sheets::SheetError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::info;

/// Read-all, append and update-by-row against the listings range.
pub trait ListingsSheet {
    fn read_rows(&self) -> impl Future<Output = Result<Vec<Vec<String>>, SheetError>> + Send;

    fn append_row(&self, row: Vec<String>) -> impl Future<Output = Result<(), SheetError>> + Send;

    /// `row_number` is 1-based with the header row counted.
    fn update_row(
        &self,
        row_number: usize,
        row: Vec<String>,
    ) -> impl Future<Output = Result<(), SheetError>> + Send;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Create,
    #[default]
    Upsert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub action: SyncAction,
    pub row_number: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    PlaceId,
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowMatch {
    /// Index into the rows returned by `read_rows`.
    pub index: usize,
    pub matched_by: MatchedBy,
}

impl RowMatch {
    pub fn row_number(&self) -> usize {
        self.index + 1
    }
}

fn column_index(headers: &[String], field: &str) -> Option<usize> {
    let wanted = header_for(field)?.trim().to_lowercase();
    headers
        .iter()
        .position(|header| header.trim().to_lowercase() == wanted)
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("").trim()
}

/// Exact place-id match first, then case-insensitive exact name match.
pub fn find_existing(rows: &[Vec<String>], place_id: &str, name: &str) -> Option<RowMatch> {
    let headers = rows.first()?;
    let body = rows.iter().enumerate().skip(1);

    let place_id = place_id.trim();
    if !place_id.is_empty()
        && let Some(col) = column_index(headers, PLACE_ID_FIELD)
        && let Some((index, _)) = body.clone().find(|(_, row)| cell(row, col) == place_id)
    {
        return Some(RowMatch {
            index,
            matched_by: MatchedBy::PlaceId,
        });
    }

    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return None;
    }
    let col = column_index(headers, NAME_FIELD)?;
    body.clone()
        .find(|(_, row)| cell(row, col).to_lowercase() == name)
        .map(|(index, _)| RowMatch {
            index,
            matched_by: MatchedBy::Name,
        })
}

/// Lays the encoded values out in sheet column order. Columns the field map
/// does not own keep whatever `existing` holds.
pub fn build_row(headers: &[String], details: &PropertyDetails, existing: Option<&[String]>) -> Vec<String> {
    let values = details.to_sheet_values();
    headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            if is_mapped_header(header) {
                values.get(header.as_str()).cloned().unwrap_or_default()
            } else {
                existing
                    .and_then(|row| row.get(idx))
                    .cloned()
                    .unwrap_or_default()
            }
        })
        .collect()
}

pub async fn upsert<S>(sheet: &S, details: &PropertyDetails, mode: SyncMode) -> Result<SyncOutcome, SheetError>
where
    S: ListingsSheet + Sync,
{
    let rows = sheet.read_rows().await?;
    let headers = rows.first().ok_or(SheetError::MissingHeaderRow)?;

    if let Some(found) = find_existing(&rows, &details.google_place_id, &details.property_name) {
        let row_number = found.row_number();
        if mode == SyncMode::Create {
            info!(target = "onboard.sheets", row_number, matched_by = ?found.matched_by, "row_already_exists");
            return Ok(SyncOutcome {
                action: SyncAction::AlreadyExists,
                row_number,
            });
        }
        let row = build_row(headers, details, rows.get(found.index).map(Vec::as_slice));
        sheet.update_row(row_number, row).await?;
        info!(target = "onboard.sheets", row_number, matched_by = ?found.matched_by, "row_updated");
        return Ok(SyncOutcome {
            action: SyncAction::Updated,
            row_number,
        });
    }

    let row_number = rows.len() + 1;
    sheet.append_row(build_row(headers, details, None)).await?;
    info!(target = "onboard.sheets", row_number, "row_created");
    Ok(SyncOutcome {
        action: SyncAction::Created,
        row_number,
    })
}

/// Summary of one sheet row for the property listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetListing {
    pub name: String,
    pub place_id: String,
    pub airbnb_name: String,
    pub airbnb_link: String,
    pub state_city: String,
}

/// Rows with a non-empty property name, in sheet order. Columns are located
/// leniently (trimmed, case-insensitive) since this is read-only.
pub async fn read_listings<S>(sheet: &S) -> Result<Vec<SheetListing>, SheetError>
where
    S: ListingsSheet + Sync,
{
    let rows = sheet.read_rows().await?;
    let Some(headers) = rows.first() else {
        return Ok(Vec::new());
    };
    let Some(name_col) = column_index(headers, NAME_FIELD) else {
        return Ok(Vec::new());
    };
    let place_col = column_index(headers, PLACE_ID_FIELD);
    let airbnb_name_col = column_index(headers, "airbnbName");
    let airbnb_link_col = column_index(headers, "airbnbLink");
    let state_city_col = column_index(headers, "stateCity");
    let read = |row: &[String], col: Option<usize>| {
        col.map(|idx| cell(row, idx).to_string()).unwrap_or_default()
    };

    Ok(rows
        .iter()
        .skip(1)
        .filter(|row| !cell(row, name_col).is_empty())
        .map(|row| SheetListing {
            name: cell(row, name_col).to_string(),
            place_id: read(row, place_col),
            airbnb_name: read(row, airbnb_name_col),
            airbnb_link: read(row, airbnb_link_col),
            state_city: read(row, state_city_col),
        })
        .collect())
}
