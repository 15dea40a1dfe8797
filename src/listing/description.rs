//! Listing copy from guest reviews, plus the structured attributes the model
//! read out of them.

use crate::listing::property::InferredFields;
use crate::llm::{LlmClient, LlmError};
use crate::maps::Review;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

pub const SEPARATOR: &str = "---PROPERTY_DATA---";

pub const BANNED_TERMS: [&str; 19] = [
    "serene",
    "tranquil",
    "nestled",
    "tucked away",
    "hidden gem",
    "oasis",
    "paradise",
    "picturesque",
    "quaint",
    "idyllic",
    "breathtaking",
    "stunning",
    "magical",
    "enchanting",
    "escape",
    "retreat",
    "getaway",
    "rejuvenate",
    "unwind",
];

pub const SECTION_HEADERS: [&str; 6] = [
    "The Space",
    "Guest Access",
    "Room Types",
    "Experiences & Activities",
    "Getting There",
    "Other Things to Note",
];

const INSTRUCTIONS: &str = "Write an SEO-friendly holiday rental listing title and description \
using only what the guest reviews below say about this stay.

Formatting rules:
- Never use em dashes or long dashes. Use commas, periods or colons.
- No blank lines between bullet points. Bullets in a section are consecutive.
- Bullets use the form \"• Item: Description\" with no extra indentation.
- Open with a title line and a short welcome paragraph, then use these section headers in order:";

const INFERRED_RULES: &str = "Rules for the JSON object:
- Use null for any field the reviews do not state clearly.
- Never guess room, bed, bathroom or guest counts or the pricing type. They are entered by hand.
- Set wifi, hotWater or petsAllowed to true only when a guest explicitly mentions using them.
- stateCity only when a guest names the city, state or region.
- otherAmenities only lists things guests describe experiencing, comma separated.
- When in doubt, use null. Wrong data is worse than missing data.

JSON shape:
{\"totalRooms\":null,\"beds\":null,\"bathrooms\":null,\"guests\":null,\"pricingType\":null,\
\"wifi\":null,\"hotWater\":null,\"petsAllowed\":null,\"stateCity\":null,\"otherAmenities\":null}";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no reviews to describe")]
    NoReviews,
    #[error("No content generated")]
    Empty,
    #[error(transparent)]
    Llm(#[from] LlmError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedDescription {
    pub description: String,
    pub inferred_fields: Option<InferredFields>,
    pub model: String,
    pub reviews_used: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected_fields: Vec<&'static str>,
}

pub struct DescriptionRequest<'a> {
    pub reviews: &'a [Review],
    pub rating: Option<f64>,
    pub total_reviews: Option<u32>,
    pub place_name: &'a str,
}

pub fn build_prompt(request: &DescriptionRequest<'_>) -> String {
    let reviews = request
        .reviews
        .iter()
        .map(|review| {
            format!(
                "- \"{}\" (Rating: {}/5, by {})",
                review.text, review.rating, review.author_name
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let rating = request
        .rating
        .map(|r| r.to_string())
        .unwrap_or_else(|| "N/A".into());
    let total = request
        .total_reviews
        .map(|n| n as usize)
        .unwrap_or(request.reviews.len());
    let place_name = if request.place_name.trim().is_empty() {
        "the property"
    } else {
        request.place_name
    };

    format!(
        "{INSTRUCTIONS}\n{headers}\n\n\
Place rating: {rating}/5\nTotal reviews: {total}\n\nReviews:\n{reviews}\n\n\
Remember:\n\
- Do not use the name \"{place_name}\" anywhere in the title or description.\n\
- Quote real sentences from the reviews and reuse guests' exact words and phrases.\n\
- Prefer concrete details guests mention (food, walks, rivers, birds) over adjectives.\n\
- Avoid these overused terms: {banned}.\n\
- Work in searchable terms such as nearby landmarks, property type and who it suits.\n\n\
After the listing, write a line containing only {SEPARATOR} followed by one JSON object.\n\n\
{INFERRED_RULES}",
        headers = SECTION_HEADERS.join(", "),
        banned = BANNED_TERMS.join(", "),
    )
}

/// Outcome of splitting a raw completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCompletion {
    pub description: String,
    pub inferred: Option<Value>,
}

/// Splits at the first separator. Without one the whole completion is the
/// description. A broken JSON suffix never invalidates the prose.
pub fn parse_completion(raw: &str) -> ParsedCompletion {
    let Some(idx) = raw.find(SEPARATOR) else {
        return ParsedCompletion {
            description: raw.to_string(),
            inferred: None,
        };
    };
    let description = raw[..idx].trim().to_string();
    let suffix = &raw[idx + SEPARATOR.len()..];
    let inferred = outermost_object(suffix).and_then(|json| serde_json::from_str(json).ok());
    ParsedCompletion {
        description,
        inferred,
    }
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub async fn generate(
    llm: &LlmClient,
    request: DescriptionRequest<'_>,
) -> Result<GeneratedDescription, GenerationError> {
    if request.reviews.is_empty() {
        return Err(GenerationError::NoReviews);
    }
    let prompt = build_prompt(&request);
    let response = llm.generate(&prompt).await?;
    if response.text.trim().is_empty() {
        return Err(GenerationError::Empty);
    }

    let parsed = parse_completion(&response.text);
    let (inferred_fields, rejected_fields) = match parsed.inferred.as_ref() {
        Some(value) => match InferredFields::from_model_json(value) {
            Some((fields, rejected)) => (Some(fields), rejected),
            None => (None, Vec::new()),
        },
        None => (None, Vec::new()),
    };
    if !rejected_fields.is_empty() {
        warn!(
            target = "onboard.llm",
            rejected = ?rejected_fields,
            "inferred_fields_cleared"
        );
    }
    info!(
        target = "onboard.llm",
        model = %response.model,
        reviews = request.reviews.len(),
        chars = parsed.description.len(),
        inferred = inferred_fields.is_some(),
        "description_generated"
    );

    Ok(GeneratedDescription {
        description: parsed.description,
        inferred_fields,
        model: response.model,
        reviews_used: request.reviews.len(),
        rejected_fields,
    })
}
