//! Registry of layers by id

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::layer::{LayerEvent, VectorLayer};

/// Owns the layers that joins refer to by id
#[derive(Debug, Default)]
pub struct Project {
    layers: RwLock<HashMap<String, Arc<VectorLayer>>>,
}

impl Project {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a layer; fails if its id is taken
    pub fn add_layer(&self, layer: Arc<VectorLayer>) -> bool {
        let mut layers = self.layers.write().unwrap_or_else(PoisonError::into_inner);
        if layers.contains_key(layer.id()) {
            return false;
        }
        layers.insert(layer.id().to_string(), layer);
        true
    }

    pub fn map_layer(&self, id: &str) -> Option<Arc<VectorLayer>> {
        self.layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Ids of all registered layers, sorted
    pub fn layer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Announce the deletion to the layer's subscribers, then drop the
    /// project's reference.
    pub fn remove_layer(&self, id: &str) -> bool {
        let Some(layer) = self.map_layer(id) else {
            return false;
        };
        debug!("Removing layer {id}");
        layer.emit(LayerEvent::WillBeDeleted);
        self.layers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }
}
