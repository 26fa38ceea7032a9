//! # strata vector
//!
//! In-memory vector layers and the attribute joins between them.
//!
//! - [`VectorLayer`]: features sharing a [`Fields`] set, with change
//!   notifications
//! - [`Project`]: layers by id, used to resolve join references
//! - [`JoinBuffer`]: the joins of one layer, their memory caches and the
//!   joined fields they contribute

pub mod feature;
pub mod fields;
pub mod join;
pub mod layer;
pub mod project;

pub use feature::{AttributeValue, Feature, FeatureId};
pub use fields::{Field, FieldOrigin, FieldType, Fields};
pub use join::{JoinBuffer, JoinInfo};
pub use layer::{LayerEvent, SubscriptionId, VectorLayer};
pub use project::Project;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AttributeValue, Feature, FeatureId, Field, FieldOrigin, FieldType, Fields, JoinBuffer, JoinInfo, LayerEvent,
        Project, VectorLayer,
    };
}
