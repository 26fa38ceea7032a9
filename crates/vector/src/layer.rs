//! In-memory vector layer with change notifications

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use geo_types::Geometry;

use crate::feature::{AttributeValue, Feature, FeatureId};
use crate::fields::{Field, FieldOrigin, Fields};

/// Change notifications a layer sends to its subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerEvent {
    /// The field set changed
    FieldsChanged,
    /// Feature attributes or the feature list changed
    DataModified,
    /// The layer is about to be removed from its project
    WillBeDeleted,
}

/// Handle returned by [`VectorLayer::subscribe`]
pub type SubscriptionId = u64;

type Listener = Arc<dyn Fn(&str, LayerEvent) + Send + Sync>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// A named set of features sharing one field set.
///
/// Listeners run on the thread that made the change, after the layer has
/// released its own locks, so they may call back into the layer.
pub struct VectorLayer {
    id: String,
    name: String,
    fields: RwLock<Fields>,
    features: RwLock<Vec<Feature>>,
    subscribers: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_feature_id: AtomicU64,
    next_subscription: AtomicU64,
}

impl std::fmt::Debug for VectorLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorLayer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("fields", &read(&self.fields).len())
            .field("features", &read(&self.features).len())
            .finish()
    }
}

impl VectorLayer {
    pub fn new(id: impl Into<String>, name: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            fields: RwLock::new(fields),
            features: RwLock::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            next_feature_id: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the current field set
    pub fn fields(&self) -> Fields {
        read(&self.fields).clone()
    }

    /// Append a field; existing features get a Null value for it
    pub fn add_field(&self, field: Field) -> bool {
        {
            let mut fields = write(&self.fields);
            if fields.contains(field.name()) {
                return false;
            }
            fields.append(field, FieldOrigin::Edit);
            let len = fields.len();
            for feature in write(&self.features).iter_mut() {
                feature.attributes.resize(len, AttributeValue::Null);
            }
        }
        self.emit(LayerEvent::FieldsChanged);
        true
    }

    /// Remove a field by name together with its values
    pub fn remove_field(&self, name: &str) -> bool {
        {
            let mut fields = write(&self.fields);
            let Some(index) = fields.index_of(name) else {
                return false;
            };
            fields.remove(index);
            for feature in write(&self.features).iter_mut() {
                if index < feature.attributes.len() {
                    feature.attributes.remove(index);
                }
            }
        }
        self.emit(LayerEvent::FieldsChanged);
        true
    }

    /// Snapshot of all features
    pub fn features(&self) -> Vec<Feature> {
        read(&self.features).clone()
    }

    pub fn feature(&self, id: FeatureId) -> Option<Feature> {
        read(&self.features).iter().find(|f| f.id() == id).cloned()
    }

    pub fn feature_count(&self) -> usize {
        read(&self.features).len()
    }

    /// Visit every feature without cloning it
    pub fn for_each_feature(&self, mut visit: impl FnMut(&Feature)) {
        for feature in read(&self.features).iter() {
            visit(feature);
        }
    }

    /// Add a feature; attributes are padded or truncated to the field count
    pub fn add_feature(&self, geometry: Option<Geometry<f64>>, mut attributes: Vec<AttributeValue>) -> FeatureId {
        let id = self.next_feature_id.fetch_add(1, Ordering::Relaxed);
        attributes.resize(read(&self.fields).len(), AttributeValue::Null);

        let mut feature = Feature::empty(id).with_attributes(attributes);
        feature.geometry = geometry;
        write(&self.features).push(feature);

        self.emit(LayerEvent::DataModified);
        id
    }

    pub fn change_attribute(&self, id: FeatureId, field_index: usize, value: AttributeValue) -> bool {
        if field_index >= read(&self.fields).len() {
            return false;
        }
        {
            let mut features = write(&self.features);
            let Some(feature) = features.iter_mut().find(|f| f.id() == id) else {
                return false;
            };
            feature.set_attribute(field_index, value);
        }
        self.emit(LayerEvent::DataModified);
        true
    }

    pub fn delete_feature(&self, id: FeatureId) -> bool {
        {
            let mut features = write(&self.features);
            let Some(pos) = features.iter().position(|f| f.id() == id) else {
                return false;
            };
            features.remove(pos);
        }
        self.emit(LayerEvent::DataModified);
        true
    }

    /// Register a listener called with this layer's id and the event
    pub fn subscribe(&self, listener: impl Fn(&str, LayerEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    pub(crate) fn emit(&self, event: LayerEvent) {
        let listeners: Vec<Listener> = lock(&self.subscribers)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&self.id, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldType;

    fn layer() -> VectorLayer {
        let fields = [Field::new("id", FieldType::Int)].into_iter().collect();
        VectorLayer::new("l1", "parcels", fields)
    }

    #[test]
    fn test_features_follow_field_changes() {
        let layer = layer();
        let fid = layer.add_feature(None, vec![1i64.into(), "extra".into()]);
        assert_eq!(layer.feature(fid).unwrap().attributes.len(), 1);

        assert!(layer.add_field(Field::new("name", FieldType::String)));
        assert!(!layer.add_field(Field::new("name", FieldType::String)));
        assert!(layer.feature(fid).unwrap().attribute(1).is_null());

        assert!(layer.change_attribute(fid, 1, "a".into()));
        assert!(!layer.change_attribute(fid, 5, "a".into()));
        assert!(layer.remove_field("id"));
        assert_eq!(layer.feature(fid).unwrap().attributes, vec![AttributeValue::from("a")]);

        assert!(layer.delete_feature(fid));
        assert!(!layer.delete_feature(fid));
        assert_eq!(layer.feature_count(), 0);
    }

    #[test]
    fn test_listeners_receive_events_and_can_reenter() {
        let layer = Arc::new(layer());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&layer);
        let sink = Arc::clone(&seen);
        let id = layer.subscribe(move |layer_id, event| {
            // Reading back from the listener must not deadlock
            let count = weak.upgrade().map_or(0, |l| l.feature_count());
            lock(&sink).push((layer_id.to_string(), event, count));
        });

        layer.add_feature(None, vec![]);
        layer.add_field(Field::new("x", FieldType::Float));

        assert_eq!(
            *lock(&seen),
            vec![
                ("l1".to_string(), LayerEvent::DataModified, 1),
                ("l1".to_string(), LayerEvent::FieldsChanged, 1),
            ]
        );

        assert!(layer.unsubscribe(id));
        assert!(!layer.unsubscribe(id));
        assert_eq!(layer.subscriber_count(), 0);
    }
}
