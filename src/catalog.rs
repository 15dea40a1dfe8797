//! Known properties across the sheet and the secondary listings store.
//!
//! The two stores are independent: a name present in both is tagged `both`,
//! nothing else is reconciled.

use crate::sheets::{ListingsSheet, SheetListing, read_listings};
use crate::supabase::{SecondaryListing, SupabaseClient};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingSource {
    Sheet,
    Secondary,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySummary {
    pub property_name: String,
    pub place_id: String,
    pub airbnb_name: String,
    pub airbnb_link: String,
    pub state_city: String,
    pub source: ListingSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceCounts {
    pub sheet: usize,
    pub secondary: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertyCatalog {
    pub count: usize,
    pub sources: SourceCounts,
    pub properties: Vec<PropertySummary>,
}

/// Sheet entries first in sheet order, then secondary-only entries. Names are
/// compared case-insensitively.
pub fn merge(sheet: Vec<SheetListing>, secondary: Vec<SecondaryListing>) -> PropertyCatalog {
    let sources = SourceCounts {
        sheet: sheet.len(),
        secondary: secondary.len(),
    };
    let mut properties: Vec<PropertySummary> = Vec::with_capacity(sheet.len() + secondary.len());
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for row in sheet {
        let key = row.name.to_lowercase();
        if let Some(&idx) = by_name.get(&key) {
            // Later sheet duplicates replace earlier ones under the same key.
            properties[idx] = summary_from_sheet(row);
            continue;
        }
        by_name.insert(key, properties.len());
        properties.push(summary_from_sheet(row));
    }

    for listing in secondary {
        let key = listing.name.to_lowercase();
        if let Some(&idx) = by_name.get(&key) {
            properties[idx].source = ListingSource::Both;
            continue;
        }
        by_name.insert(key, properties.len());
        properties.push(PropertySummary {
            property_name: listing.name,
            place_id: String::new(),
            airbnb_name: listing.title,
            airbnb_link: String::new(),
            state_city: listing.location,
            source: ListingSource::Secondary,
        });
    }

    PropertyCatalog {
        count: properties.len(),
        sources,
        properties,
    }
}

fn summary_from_sheet(row: SheetListing) -> PropertySummary {
    PropertySummary {
        property_name: row.name,
        place_id: row.place_id,
        airbnb_name: row.airbnb_name,
        airbnb_link: row.airbnb_link,
        state_city: row.state_city,
        source: ListingSource::Sheet,
    }
}

/// Reads both stores concurrently. A failing or unconfigured store
/// contributes an empty list.
pub async fn list_properties<S>(sheet: &S, secondary: Option<&SupabaseClient>) -> PropertyCatalog
where
    S: ListingsSheet + Sync,
{
    let sheet_fut = async {
        read_listings(sheet).await.unwrap_or_else(|err| {
            warn!(target = "onboard.sheets", error = %err, "sheet_listing_failed");
            Vec::new()
        })
    };
    let secondary_fut = async {
        match secondary {
            Some(client) => client.fetch_listings().await.unwrap_or_else(|err| {
                warn!(target = "onboard.api", error = %err, "secondary_listing_failed");
                Vec::new()
            }),
            None => Vec::new(),
        }
    };
    let (sheet_rows, secondary_rows) = tokio::join!(sheet_fut, secondary_fut);
    merge(sheet_rows, secondary_rows)
}
