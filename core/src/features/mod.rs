pub mod accumulator;
pub mod vector;

pub use accumulator::{FlowStatistics, MIN_PACKETS};
pub use vector::{FeatureSchema, FeatureVector, NamedFeature};
