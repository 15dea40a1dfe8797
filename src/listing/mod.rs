pub mod columns;
pub mod description;
pub mod property;

pub use description::{DescriptionRequest, GeneratedDescription, GenerationError};
pub use property::{InferredFields, PropertyDetails, PropertyOverrides};
