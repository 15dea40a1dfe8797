use crate::listing::columns::{
    CellValue, SHEET_COLUMN_MAP, decode_count, decode_flag, decode_money,
};
use crate::maps::{PlaceDetails, ResolvedPlace};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const PRICING_TYPES: [&str; 3] = ["Room Wise", "Per Person", "Entire Property"];

/// Markup applied to cost when no selling price is supplied.
pub const SELLING_PRICE_MARKUP: f64 = 1.5;

/// Attributes the language model read out of guest reviews. Every member is
/// either backed by review text or `None`; nothing is defaulted here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferredFields {
    pub total_rooms: Option<u32>,
    pub beds: Option<u32>,
    pub bathrooms: Option<u32>,
    pub guests: Option<u32>,
    pub pricing_type: Option<String>,
    pub wifi: Option<bool>,
    pub hot_water: Option<bool>,
    pub pets_allowed: Option<bool>,
    pub state_city: Option<String>,
    pub other_amenities: Option<String>,
}

const PLACEHOLDER_STRINGS: &[&str] = &["", "null", "none", "unknown", "n/a", "na", "name or null"];
const MAX_PLAUSIBLE_COUNT: u64 = 500;

impl InferredFields {
    /// Builds the record from the model's JSON, clearing every member whose
    /// type does not match its domain. Returns the names of cleared members.
    /// Non-object input yields `None`.
    pub fn from_model_json(value: &Value) -> Option<(Self, Vec<&'static str>)> {
        let object = value.as_object()?;
        let mut rejected = Vec::new();

        let mut count = |key: &'static str| -> Option<u32> {
            let raw = object.get(key)?;
            if raw.is_null() {
                return None;
            }
            let parsed = raw
                .as_u64()
                .or_else(|| {
                    raw.as_f64()
                        .filter(|v| *v >= 0.0 && v.fract() == 0.0)
                        .map(|v| v as u64)
                })
                .filter(|v| *v <= MAX_PLAUSIBLE_COUNT)
                .map(|v| v as u32);
            if parsed.is_none() {
                rejected.push(key);
            }
            parsed
        };
        let total_rooms = count("totalRooms");
        let beds = count("beds");
        let bathrooms = count("bathrooms");
        let guests = count("guests");

        let mut flag = |key: &'static str| -> Option<bool> {
            let raw = object.get(key)?;
            if raw.is_null() {
                return None;
            }
            let parsed = raw.as_bool();
            if parsed.is_none() {
                rejected.push(key);
            }
            parsed
        };
        let wifi = flag("wifi");
        let hot_water = flag("hotWater");
        let pets_allowed = flag("petsAllowed");

        let mut text = |key: &'static str| -> Option<String> {
            let raw = object.get(key)?;
            if raw.is_null() {
                return None;
            }
            let parsed = raw
                .as_str()
                .map(str::trim)
                .filter(|v| !PLACEHOLDER_STRINGS.contains(&v.to_lowercase().as_str()))
                .map(str::to_string);
            if parsed.is_none() {
                rejected.push(key);
            }
            parsed
        };
        let state_city = text("stateCity");
        let other_amenities = text("otherAmenities");
        let pricing_raw = text("pricingType");

        let pricing_type = pricing_raw.and_then(|raw| {
            let canonical = canonical_pricing_type(&raw);
            if canonical.is_none() {
                rejected.push("pricingType");
            }
            canonical
        });

        Some((
            Self {
                total_rooms,
                beds,
                bathrooms,
                guests,
                pricing_type,
                wifi,
                hot_water,
                pets_allowed,
                state_city,
                other_amenities,
            },
            rejected,
        ))
    }
}

pub fn canonical_pricing_type(raw: &str) -> Option<String> {
    PRICING_TYPES
        .iter()
        .find(|known| known.eq_ignore_ascii_case(raw.trim()))
        .map(|known| known.to_string())
}

/// Operator-entered values. Anything set here beats what the model inferred.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyOverrides {
    pub total_rooms: Option<u32>,
    pub beds: Option<u32>,
    pub bathrooms: Option<u32>,
    pub guests: Option<u32>,
    pub cost_price: Option<f64>,
    pub selling_price: Option<f64>,
    pub pricing_type: Option<String>,
    pub contact_number: Option<String>,
}

/// Precedence for a single field: explicit override, then inferred, then default.
pub fn merge_field<T>(override_value: Option<T>, inferred: Option<T>, default: T) -> T {
    override_value.or(inferred).unwrap_or(default)
}

pub fn default_selling_price(cost_price: f64) -> f64 {
    (cost_price * SELLING_PRICE_MARKUP).round()
}

/// The sheet row for one property, keyed by logical field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PropertyDetails {
    pub property_name: String,
    pub airbnb_name: String,
    pub airbnb_link: String,
    pub google_maps_link: String,
    pub state_city: String,
    pub contact_number: String,
    pub total_rooms: u32,
    pub bathrooms: u32,
    pub beds: u32,
    pub guests: u32,
    pub pricing_type: String,
    pub cost_price: f64,
    pub selling_price: f64,
    pub extra_guest_price_after: u32,
    pub extra_guest_price: f64,
    pub pet_fee: f64,
    pub essentials: bool,
    pub wifi: bool,
    pub hot_water: bool,
    pub pets_allowed: bool,
    pub other_amenities: String,
    pub ai_description: String,
    pub google_rating: String,
    pub google_reviews: String,
    pub google_place_id: String,
    pub last_enriched: String,
    pub cancellation_policy: String,
    pub upi_id: String,
}

pub struct AssembleInput<'a> {
    pub place: &'a ResolvedPlace,
    pub details: &'a PlaceDetails,
    pub maps_url: &'a str,
    pub description: Option<&'a str>,
    pub inferred: Option<&'a InferredFields>,
    pub overrides: &'a PropertyOverrides,
    pub enriched_on: NaiveDate,
}

impl PropertyDetails {
    pub fn assemble(input: AssembleInput<'_>) -> Self {
        let inferred = input.inferred.cloned().unwrap_or_default();
        let overrides = input.overrides;
        let cost_price = overrides.cost_price.unwrap_or(0.0);
        let derived_selling = Some(cost_price)
            .filter(|cost| *cost > 0.0)
            .map(default_selling_price);

        Self {
            property_name: input.place.name.clone(),
            airbnb_name: input.place.name.clone(),
            google_maps_link: input.maps_url.to_string(),
            state_city: inferred.state_city.clone().unwrap_or_default(),
            contact_number: input
                .details
                .phone
                .clone()
                .or_else(|| overrides.contact_number.clone())
                .unwrap_or_default(),
            google_place_id: input.place.place_id.clone(),
            google_rating: input.details.rating.map(|r| r.to_string()).unwrap_or_default(),
            google_reviews: input
                .details
                .total_reviews
                .map(|n| n.to_string())
                .unwrap_or_default(),
            ai_description: input.description.unwrap_or_default().to_string(),
            last_enriched: input.enriched_on.format("%Y-%m-%d").to_string(),
            total_rooms: merge_field(overrides.total_rooms, inferred.total_rooms, 0),
            beds: merge_field(overrides.beds, inferred.beds, 0),
            bathrooms: merge_field(overrides.bathrooms, inferred.bathrooms, 0),
            guests: merge_field(overrides.guests, inferred.guests, 0),
            cost_price,
            selling_price: merge_field(overrides.selling_price, derived_selling, 0.0),
            pricing_type: merge_field(
                overrides
                    .pricing_type
                    .as_deref()
                    .and_then(canonical_pricing_type),
                inferred.pricing_type.clone(),
                String::new(),
            ),
            wifi: merge_field(None, inferred.wifi, false),
            hot_water: merge_field(None, inferred.hot_water, false),
            pets_allowed: merge_field(None, inferred.pets_allowed, false),
            other_amenities: inferred.other_amenities.clone().unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn cell(&self, field: &str) -> Option<CellValue> {
        use CellValue::{Count, Flag, Money, Text};
        let value = match field {
            "propertyName" => Text(self.property_name.clone()),
            "airbnbName" => Text(self.airbnb_name.clone()),
            "airbnbLink" => Text(self.airbnb_link.clone()),
            "googleMapsLink" => Text(self.google_maps_link.clone()),
            "stateCity" => Text(self.state_city.clone()),
            "contactNumber" => Text(self.contact_number.clone()),
            "totalRooms" => Count(self.total_rooms),
            "bathrooms" => Count(self.bathrooms),
            "beds" => Count(self.beds),
            "guests" => Count(self.guests),
            "pricingType" => Text(self.pricing_type.clone()),
            "costPrice" => Money(self.cost_price),
            "sellingPrice" => Money(self.selling_price),
            "extraGuestPriceAfter" => Count(self.extra_guest_price_after),
            "extraGuestPrice" => Money(self.extra_guest_price),
            "petFee" => Money(self.pet_fee),
            "essentials" => Flag(self.essentials),
            "wifi" => Flag(self.wifi),
            "hotWater" => Flag(self.hot_water),
            "petsAllowed" => Flag(self.pets_allowed),
            "otherAmenities" => Text(self.other_amenities.clone()),
            "aiDescription" => Text(self.ai_description.clone()),
            "googleRating" => Text(self.google_rating.clone()),
            "googleReviews" => Text(self.google_reviews.clone()),
            "googlePlaceId" => Text(self.google_place_id.clone()),
            "lastEnriched" => Text(self.last_enriched.clone()),
            "cancellationPolicy" => Text(self.cancellation_policy.clone()),
            "upiId" => Text(self.upi_id.clone()),
            _ => return None,
        };
        Some(value)
    }

    fn set_cell(&mut self, field: &str, raw: &str) {
        let text = raw.to_string();
        match field {
            "propertyName" => self.property_name = text,
            "airbnbName" => self.airbnb_name = text,
            "airbnbLink" => self.airbnb_link = text,
            "googleMapsLink" => self.google_maps_link = text,
            "stateCity" => self.state_city = text,
            "contactNumber" => self.contact_number = text,
            "totalRooms" => self.total_rooms = decode_count(raw),
            "bathrooms" => self.bathrooms = decode_count(raw),
            "beds" => self.beds = decode_count(raw),
            "guests" => self.guests = decode_count(raw),
            "pricingType" => self.pricing_type = text,
            "costPrice" => self.cost_price = decode_money(raw),
            "sellingPrice" => self.selling_price = decode_money(raw),
            "extraGuestPriceAfter" => self.extra_guest_price_after = decode_count(raw),
            "extraGuestPrice" => self.extra_guest_price = decode_money(raw),
            "petFee" => self.pet_fee = decode_money(raw),
            "essentials" => self.essentials = decode_flag(raw),
            "wifi" => self.wifi = decode_flag(raw),
            "hotWater" => self.hot_water = decode_flag(raw),
            "petsAllowed" => self.pets_allowed = decode_flag(raw),
            "otherAmenities" => self.other_amenities = text,
            "aiDescription" => self.ai_description = text,
            "googleRating" => self.google_rating = text,
            "googleReviews" => self.google_reviews = text,
            "googlePlaceId" => self.google_place_id = text,
            "lastEnriched" => self.last_enriched = text,
            "cancellationPolicy" => self.cancellation_policy = text,
            "upiId" => self.upi_id = text,
            _ => {}
        }
    }

    /// Header -> encoded cell for every declared logical field.
    pub fn to_sheet_values(&self) -> BTreeMap<&'static str, String> {
        SHEET_COLUMN_MAP
            .iter()
            .filter_map(|(field, header)| self.cell(field).map(|cell| (*header, cell.encode())))
            .collect()
    }

    /// Reads a sheet row back through the same header mapping. Headers match
    /// exactly; unmapped or missing columns leave the field at its default.
    pub fn from_sheet_row(headers: &[String], row: &[String]) -> Self {
        let mut details = Self::default();
        for (field, header) in SHEET_COLUMN_MAP {
            if let Some(idx) = headers.iter().position(|h| h == header) {
                let raw = row.get(idx).map(String::as_str).unwrap_or("");
                details.set_cell(field, raw);
            }
        }
        details
    }
}
