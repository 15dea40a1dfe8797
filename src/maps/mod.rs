pub mod models;
pub mod places;
pub mod resolver;
pub mod url;

pub use models::{Coordinates, PhotoRef, PlaceDetails, ResolvedPlace, Review, SearchCandidate};
pub use places::{MapsConfig, PlacesClient, PlacesError};
pub use resolver::{PlaceSearch, ResolveError, resolve};
pub use url::{ParseError, ParsedPlaceUrl, UrlParser};
