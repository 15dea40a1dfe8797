//! Logical field name -> exact sheet column header.
//!
//! Headers are join keys against a live sheet, so they are byte-for-byte what
//! the sheet uses, trailing spaces included ("Airbnb Name ", "Bathroom ", ...).

pub const SHEET_COLUMN_MAP: [(&str, &str); 28] = [
    ("propertyName", "Property Name"),
    ("airbnbName", "Airbnb Name "),
    ("airbnbLink", "Airbnb Link"),
    ("googleMapsLink", "Google Maps Link"),
    ("stateCity", "State/City"),
    ("contactNumber", "Contact Number"),
    ("totalRooms", "Total Rooms"),
    ("bathrooms", "Bathroom "),
    ("beds", "Beds"),
    ("guests", "Guests"),
    ("pricingType", "Pricing Type"),
    ("costPrice", "Cost Price "),
    ("sellingPrice", "Selling Price"),
    ("extraGuestPriceAfter", "Extra Guest Price applies after "),
    ("extraGuestPrice", "Extra Guest Price"),
    ("petFee", "Pet Fee"),
    ("essentials", "Essentials"),
    ("wifi", "Wifi"),
    ("hotWater", "Hot Water"),
    ("petsAllowed", "Pets Allowed"),
    ("otherAmenities", "Any other amenities"),
    ("aiDescription", "AI Description"),
    ("googleRating", "Google Rating"),
    ("googleReviews", "Google Reviews"),
    ("googlePlaceId", "Property ID "),
    ("lastEnriched", "Last Enriched"),
    ("cancellationPolicy", "Cancellation Policy"),
    ("upiId", "UPI ID "),
];

pub const NAME_FIELD: &str = "propertyName";
pub const PLACE_ID_FIELD: &str = "googlePlaceId";

pub fn header_for(field: &str) -> Option<&'static str> {
    SHEET_COLUMN_MAP
        .iter()
        .find(|(key, _)| *key == field)
        .map(|(_, header)| *header)
}

pub fn is_mapped_header(header: &str) -> bool {
    SHEET_COLUMN_MAP.iter().any(|(_, mapped)| *mapped == header)
}

/// Typed cell content before it is flattened to the sheet's string form.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Count(u32),
    Money(f64),
    Flag(bool),
}

impl CellValue {
    /// Flags render as "Yes"/"No"; a zero number means "not entered yet" and
    /// renders empty rather than "0".
    pub fn encode(&self) -> String {
        match self {
            CellValue::Text(value) => value.clone(),
            CellValue::Count(0) => String::new(),
            CellValue::Count(value) => value.to_string(),
            CellValue::Money(value) if *value == 0.0 => String::new(),
            CellValue::Money(value) => value.to_string(),
            CellValue::Flag(true) => "Yes".into(),
            CellValue::Flag(false) => "No".into(),
        }
    }
}

pub fn decode_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "yes" | "true" | "y" | "1")
}

pub fn decode_count(raw: &str) -> u32 {
    raw.trim().parse::<u32>().unwrap_or(0)
}

pub fn decode_money(raw: &str) -> f64 {
    raw.trim()
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

/// 1-based column number to A1 letters (1 -> A, 27 -> AA).
pub fn column_letter(mut column: usize) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = (column - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        column = (column - 1) / 26;
    }
    letters.iter().rev().collect()
}
