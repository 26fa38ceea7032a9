//! Attribute joins between vector layers.
//!
//! A [`JoinBuffer`] belongs to one layer and holds the ordered list of joins
//! that append another layer's fields to it. Each join matches features on
//! a key field: the owner's `target_field_name` against the joined layer's
//! `join_field_name`. Joined layers are held weakly and resolved by id
//! through a [`Project`]; until resolved a join contributes no fields.
//!
//! The buffer listens to its joined layers: field changes rebuild memory
//! caches and re-announce the joined fields, data changes mark caches dirty,
//! and deleting a joined layer drops its join.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, warn};

use strata_core::xml::Element;

use crate::feature::{AttributeValue, Feature};
use crate::fields::{FieldOrigin, Fields};
use crate::layer::{LayerEvent, SubscriptionId, VectorLayer, lock};
use crate::project::Project;

/// Configuration and cache of one join
#[derive(Debug, Clone)]
pub struct JoinInfo {
    target_field_name: String,
    join_layer_id: String,
    join_field_name: String,
    join_fields_subset: Option<Vec<String>>,
    memory_cache: bool,
    prefix: Option<String>,
    join_layer: Weak<VectorLayer>,
    /// Joined-layer field indices held by each cached row, in row order
    cached_indices: Vec<usize>,
    cache: HashMap<String, Vec<AttributeValue>>,
    cache_dirty: bool,
}

impl PartialEq for JoinInfo {
    fn eq(&self, other: &Self) -> bool {
        self.target_field_name == other.target_field_name
            && self.join_layer_id == other.join_layer_id
            && self.join_field_name == other.join_field_name
            && self.join_fields_subset == other.join_fields_subset
            && self.memory_cache == other.memory_cache
            && self.prefix == other.prefix
    }
}

impl JoinInfo {
    pub fn new(
        target_field_name: impl Into<String>,
        join_layer_id: impl Into<String>,
        join_field_name: impl Into<String>,
    ) -> Self {
        Self {
            target_field_name: target_field_name.into(),
            join_layer_id: join_layer_id.into(),
            join_field_name: join_field_name.into(),
            join_fields_subset: None,
            memory_cache: false,
            prefix: None,
            join_layer: Weak::new(),
            cached_indices: Vec::new(),
            cache: HashMap::new(),
            cache_dirty: true,
        }
    }

    /// Restrict the joined fields to these names, in this order
    pub fn with_subset<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.join_fields_subset = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_memory_cache(mut self, memory_cache: bool) -> Self {
        self.memory_cache = memory_cache;
        self
    }

    /// Prefix for joined field names; an empty prefix keeps the names as is
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Resolve the join layer up front; also sets the join layer id
    pub fn with_join_layer(mut self, layer: &Arc<VectorLayer>) -> Self {
        self.join_layer_id = layer.id().to_string();
        self.join_layer = Arc::downgrade(layer);
        self
    }

    pub fn target_field_name(&self) -> &str {
        &self.target_field_name
    }

    pub fn join_layer_id(&self) -> &str {
        &self.join_layer_id
    }

    pub fn join_field_name(&self) -> &str {
        &self.join_field_name
    }

    pub fn join_fields_subset(&self) -> Option<&[String]> {
        self.join_fields_subset.as_deref()
    }

    pub fn is_memory_cached(&self) -> bool {
        self.memory_cache
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// The joined layer, if resolved and still alive
    pub fn join_layer(&self) -> Option<Arc<VectorLayer>> {
        self.join_layer.upgrade()
    }

    pub fn is_cache_dirty(&self) -> bool {
        self.cache_dirty
    }

    /// Number of rows in the memory cache
    pub fn cached_row_count(&self) -> usize {
        self.cache.len()
    }

    /// Joined-layer field indices this join appends, in output order
    fn source_indices(&self, joined: &Fields) -> Vec<usize> {
        match &self.join_fields_subset {
            Some(subset) => subset_indices(joined, subset),
            None => (0..joined.len())
                .filter(|&i| joined.at(i).is_some_and(|f| f.name() != self.join_field_name))
                .collect(),
        }
    }

    fn build_cache(&mut self) {
        self.cache.clear();
        self.cached_indices.clear();
        self.cache_dirty = false;

        let Some(layer) = self.join_layer() else {
            return;
        };
        let fields = layer.fields();
        let Some(key_index) = fields.index_of(&self.join_field_name) else {
            warn!(
                "Join field `{}` not found in layer {}",
                self.join_field_name, self.join_layer_id
            );
            return;
        };
        let indices = self.source_indices(&fields);

        let cache = &mut self.cache;
        layer.for_each_feature(|feature| {
            if let Some(key) = feature.attribute(key_index).join_key() {
                let row = indices.iter().map(|&i| feature.attribute(i).clone()).collect();
                cache.entry(key).or_insert(row);
            }
        });
        debug!("Cached {} rows of layer {}", self.cache.len(), self.join_layer_id);
        self.cached_indices = indices;
    }

    /// Value of joined-layer field `source_index` for the feature whose join
    /// field matches `key`
    fn lookup(&self, key: &str, source_index: usize) -> AttributeValue {
        if self.memory_cache {
            let position = self.cached_indices.iter().position(|&i| i == source_index);
            return position
                .and_then(|p| self.cache.get(key).and_then(|row| row.get(p)))
                .cloned()
                .unwrap_or_default();
        }

        let Some(layer) = self.join_layer() else {
            return AttributeValue::Null;
        };
        let Some(key_index) = layer.fields().index_of(&self.join_field_name) else {
            return AttributeValue::Null;
        };
        let mut value = None;
        layer.for_each_feature(|feature| {
            if value.is_none() && feature.attribute(key_index).join_key().as_deref() == Some(key) {
                value = Some(feature.attribute(source_index).clone());
            }
        });
        value.unwrap_or_default()
    }
}

/// Indices in `fields` of the named fields, in the order given; unknown
/// names are skipped.
fn subset_indices(fields: &Fields, names: &[String]) -> Vec<usize> {
    names.iter().filter_map(|name| fields.index_of(name)).collect()
}

fn unique_name(fields: &Fields, base: String) -> String {
    if !fields.contains(&base) {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}_{n}");
        if !fields.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[derive(Debug)]
struct Subscription {
    layer_id: String,
    layer: Weak<VectorLayer>,
    id: SubscriptionId,
}

impl Subscription {
    fn cancel(&self) {
        if let Some(layer) = self.layer.upgrade() {
            layer.unsubscribe(self.id);
        }
    }
}

#[derive(Debug, Default)]
struct State {
    joins: Vec<JoinInfo>,
    subscriptions: Vec<Subscription>,
}

type ChangeListener = Arc<dyn Fn() + Send + Sync>;

struct Shared {
    owner: Weak<VectorLayer>,
    owner_id: String,
    state: Mutex<State>,
    listeners: Mutex<Vec<(u64, ChangeListener)>>,
    next_listener: AtomicU64,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for subscription in state.subscriptions.drain(..) {
            subscription.cancel();
        }
    }
}

/// Ordered attribute joins of one layer.
///
/// All operations go through one lock; joined-fields-changed listeners run
/// after it is released.
pub struct JoinBuffer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for JoinBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinBuffer")
            .field("owner", &self.shared.owner_id)
            .field("joins", &lock(&self.shared.state).joins)
            .finish()
    }
}

impl JoinBuffer {
    pub fn new(owner: &Arc<VectorLayer>) -> Self {
        Self::with_owner(Arc::downgrade(owner), owner.id().to_string())
    }

    fn with_owner(owner: Weak<VectorLayer>, owner_id: String) -> Self {
        Self {
            shared: Arc::new(Shared {
                owner,
                owner_id,
                state: Mutex::new(State::default()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// The layer these joins belong to
    pub fn owner(&self) -> Option<Arc<VectorLayer>> {
        self.shared.owner.upgrade()
    }

    /// Add a join.
    ///
    /// Returns `false` without changing anything when a key field or the
    /// layer id is empty, the join points at the owner, a join to the same
    /// layer exists, or a resolved join layer lacks the join field.
    pub fn add_join(&self, mut info: JoinInfo) -> bool {
        {
            let mut state = lock(&self.shared.state);
            if !self.accepts(&state.joins, &info) {
                return false;
            }
            self.attach(&mut state, &mut info);
            state.joins.push(info);
        }
        self.notify();
        true
    }

    /// Whether `info` may join next to `joins`
    fn accepts(&self, joins: &[JoinInfo], info: &JoinInfo) -> bool {
        if info.target_field_name.is_empty() || info.join_field_name.is_empty() || info.join_layer_id.is_empty() {
            debug!("Rejected join with empty key field or layer id");
            return false;
        }
        if info.join_layer_id == self.shared.owner_id {
            debug!("Rejected self-join on layer {}", info.join_layer_id);
            return false;
        }
        if joins.iter().any(|j| j.join_layer_id == info.join_layer_id) {
            debug!("Rejected duplicate join to layer {}", info.join_layer_id);
            return false;
        }
        if let Some(layer) = info.join_layer()
            && !layer.fields().contains(&info.join_field_name)
        {
            debug!(
                "Rejected join: field `{}` missing from layer {}",
                info.join_field_name, info.join_layer_id
            );
            return false;
        }
        true
    }

    /// Subscribe to the resolved layer of `info` and load its cache
    fn attach(&self, state: &mut State, info: &mut JoinInfo) {
        if let Some(layer) = info.join_layer() {
            self.subscribe(state, &layer);
            if info.memory_cache {
                info.build_cache();
            }
        }
    }

    /// Remove the first join to `join_layer_id`
    pub fn remove_join(&self, join_layer_id: &str) -> bool {
        {
            let mut state = lock(&self.shared.state);
            let Some(pos) = state.joins.iter().position(|j| j.join_layer_id == join_layer_id) else {
                return false;
            };
            state.joins.remove(pos);
            Self::unsubscribe(&mut state, join_layer_id);
        }
        self.notify();
        true
    }

    /// Replace the joined fields of `fields` with the current joins'
    /// fields. Fields of earlier calls are stripped first, so the result
    /// only depends on the non-joined fields and the joins.
    pub fn update_fields(&self, fields: &mut Fields) {
        fields.retain(|_, origin| !origin.is_join());

        let state = lock(&self.shared.state);
        for (join_index, info) in state.joins.iter().enumerate() {
            let Some(layer) = info.join_layer() else {
                continue;
            };
            let joined = layer.fields();
            let prefix = info
                .prefix
                .clone()
                .unwrap_or_else(|| format!("{}_", layer.name()));

            for source_index in info.source_indices(&joined) {
                let Some(field) = joined.at(source_index) else {
                    continue;
                };
                let mut field = field.clone();
                field.set_name(unique_name(fields, format!("{prefix}{}", field.name())));
                fields.append(
                    field,
                    FieldOrigin::Join {
                        join_index,
                        source_index,
                    },
                );
            }
        }
    }

    /// Load the memory caches of all memory-cached joins
    pub fn create_join_caches(&self) {
        let mut state = lock(&self.shared.state);
        for info in state.joins.iter_mut().filter(|j| j.memory_cache) {
            info.build_cache();
        }
    }

    /// The join a field of `fields` comes from, with the field's index in
    /// the joined layer
    pub fn join_for_field_index(&self, index: usize, fields: &Fields) -> Option<(JoinInfo, usize)> {
        let FieldOrigin::Join {
            join_index,
            source_index,
        } = fields.origin(index)?
        else {
            return None;
        };
        let state = lock(&self.shared.state);
        state.joins.get(join_index).map(|j| (j.clone(), source_index))
    }

    /// Index in `fields` of the first field joined from `join_layer_id`
    pub fn joined_fields_offset(&self, join_layer_id: &str, fields: &Fields) -> Option<usize> {
        let state = lock(&self.shared.state);
        let join_index = state.joins.iter().position(|j| j.join_layer_id == join_layer_id)?;
        fields.iter().position(|(_, origin)| {
            matches!(origin, FieldOrigin::Join { join_index: i, .. } if i == join_index)
        })
    }

    /// Field indices of `layer` for the named fields; unknown names are skipped
    pub fn join_subset_indices(layer: &VectorLayer, names: &[String]) -> Vec<usize> {
        subset_indices(&layer.fields(), names)
    }

    /// Full attribute row of an owner feature under `fields` as produced
    /// by [`JoinBuffer::update_fields`]: the feature's own values followed
    /// by the joined values. Unmatched keys, Null keys and unresolved joins
    /// give Null.
    pub fn joined_attributes(&self, feature: &Feature, fields: &Fields) -> Vec<AttributeValue> {
        let mut state = lock(&self.shared.state);
        for info in state.joins.iter_mut() {
            if info.memory_cache && info.cache_dirty {
                info.build_cache();
            }
        }

        let keys: Vec<Option<String>> = state
            .joins
            .iter()
            .map(|info| {
                fields
                    .index_of(&info.target_field_name)
                    .and_then(|i| feature.attribute(i).join_key())
            })
            .collect();

        fields
            .iter()
            .enumerate()
            .map(|(index, (_, origin))| match origin {
                FieldOrigin::Join {
                    join_index,
                    source_index,
                } => match (state.joins.get(join_index), keys.get(join_index)) {
                    (Some(info), Some(Some(key))) => info.lookup(key, source_index),
                    _ => AttributeValue::Null,
                },
                _ => feature.attribute(index).clone(),
            })
            .collect()
    }

    /// Resolve unresolved joins by id, subscribe to the resolved layers
    /// and load their caches.
    pub fn resolve_references(&self, project: &Project) {
        let mut resolved = 0usize;
        {
            let mut guard = lock(&self.shared.state);
            let state = &mut *guard;
            for info in state.joins.iter_mut() {
                if info.join_layer().is_some() {
                    continue;
                }
                let Some(layer) = project.map_layer(&info.join_layer_id) else {
                    debug!("Join layer {} not found", info.join_layer_id);
                    continue;
                };
                info.join_layer = Arc::downgrade(&layer);
                Self::unsubscribe_from(&mut state.subscriptions, &info.join_layer_id);
                state.subscriptions.push(self.subscription_for(&layer));
                if info.memory_cache {
                    info.build_cache();
                }
                resolved += 1;
            }
        }
        if resolved > 0 {
            debug!("Resolved {resolved} join layer(s) for {}", self.shared.owner_id);
            self.notify();
        }
    }

    pub fn contains_joins(&self) -> bool {
        !lock(&self.shared.state).joins.is_empty()
    }

    /// Snapshot of the joins in order
    pub fn vector_joins(&self) -> Vec<JoinInfo> {
        lock(&self.shared.state).joins.clone()
    }

    /// Append a `<vectorjoins>` element describing the joins
    pub fn write_xml(&self, parent: &mut Element) {
        let state = lock(&self.shared.state);
        let joins = parent.append_child(Element::new("vectorjoins"));

        for info in state.joins.iter().filter(|j| !j.target_field_name.is_empty()) {
            let mut join = Element::new("join")
                .with_attribute("targetFieldName", &info.target_field_name)
                .with_attribute("joinLayerId", &info.join_layer_id)
                .with_attribute("joinFieldName", &info.join_field_name)
                .with_attribute("memoryCache", u8::from(info.memory_cache));
            if let Some(prefix) = &info.prefix {
                join.set_attribute("customPrefix", prefix);
            }
            if let Some(subset) = &info.join_fields_subset {
                let list = join.append_child(Element::new("joinFieldsSubset"));
                for name in subset {
                    list.append_child(Element::new("field").with_attribute("name", name));
                }
            }
            joins.append_child(join);
        }
    }

    /// Replace the joins with those of a `<vectorjoins>` element (or its
    /// parent). Joins come back unresolved; call
    /// [`JoinBuffer::resolve_references`] afterwards.
    pub fn read_xml(&self, element: &Element) {
        let container = if element.name() == "vectorjoins" {
            Some(element)
        } else {
            element.child("vectorjoins")
        };

        let mut joins: Vec<JoinInfo> = Vec::new();
        for join in container.into_iter().flat_map(|c| c.children_named("join")) {
            let mut info = JoinInfo::new(
                join.attribute("targetFieldName").unwrap_or_default(),
                join.attribute("joinLayerId").unwrap_or_default(),
                join.attribute("joinFieldName").unwrap_or_default(),
            )
            .with_memory_cache(join.bool_attribute("memoryCache").unwrap_or(false));
            if let Some(prefix) = join.attribute("customPrefix") {
                info = info.with_prefix(prefix);
            }
            if let Some(subset) = join.child("joinFieldsSubset") {
                info = info.with_subset(
                    subset
                        .children_named("field")
                        .filter_map(|f| f.attribute("name")),
                );
            }
            if self.accepts(&joins, &info) {
                joins.push(info);
            } else {
                warn!("Skipped invalid join in layer {}", self.shared.owner_id);
            }
        }

        {
            let mut state = lock(&self.shared.state);
            for subscription in state.subscriptions.drain(..) {
                subscription.cancel();
            }
            for info in joins.iter_mut() {
                self.attach(&mut state, info);
            }
            state.joins = joins;
        }
        self.notify();
    }

    /// Register a joined-fields-changed listener
    pub fn on_joined_fields_changed(&self, listener: impl Fn() + Send + Sync + 'static) -> u64 {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: u64) -> bool {
        let mut listeners = lock(&self.shared.listeners);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn notify(&self) {
        let listeners: Vec<ChangeListener> = lock(&self.shared.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener();
        }
    }

    fn subscription_for(&self, layer: &Arc<VectorLayer>) -> Subscription {
        let weak = Arc::downgrade(&self.shared);
        let id = layer.subscribe(move |layer_id, event| {
            if let Some(shared) = weak.upgrade() {
                JoinBuffer { shared }.on_layer_event(layer_id, event);
            }
        });
        Subscription {
            layer_id: layer.id().to_string(),
            layer: Arc::downgrade(layer),
            id,
        }
    }

    fn subscribe(&self, state: &mut State, layer: &Arc<VectorLayer>) {
        Self::unsubscribe_from(&mut state.subscriptions, layer.id());
        state.subscriptions.push(self.subscription_for(layer));
    }

    fn unsubscribe(state: &mut State, layer_id: &str) {
        if !state.joins.iter().any(|j| j.join_layer_id == layer_id) {
            Self::unsubscribe_from(&mut state.subscriptions, layer_id);
        }
    }

    fn unsubscribe_from(subscriptions: &mut Vec<Subscription>, layer_id: &str) {
        subscriptions.retain(|s| {
            if s.layer_id == layer_id {
                s.cancel();
                false
            } else {
                true
            }
        });
    }

    fn on_layer_event(&self, layer_id: &str, event: LayerEvent) {
        match event {
            LayerEvent::FieldsChanged => {
                let affected = {
                    let mut state = lock(&self.shared.state);
                    let mut affected = false;
                    for info in state.joins.iter_mut().filter(|j| j.join_layer_id == layer_id) {
                        affected = true;
                        if info.memory_cache {
                            info.build_cache();
                        }
                    }
                    affected
                };
                if affected {
                    self.notify();
                }
            }
            LayerEvent::DataModified => {
                let affected = {
                    let mut state = lock(&self.shared.state);
                    let mut affected = false;
                    for info in state.joins.iter_mut().filter(|j| j.join_layer_id == layer_id) {
                        affected = true;
                        info.cache_dirty = true;
                    }
                    affected
                };
                if affected {
                    self.notify();
                }
            }
            LayerEvent::WillBeDeleted => {
                debug!("Join layer {layer_id} is being deleted");
                self.remove_join(layer_id);
            }
        }
    }
}

impl Clone for JoinBuffer {
    /// Deep copy: joins and caches are copied, listeners are not, and the
    /// copy holds its own subscriptions to the joined layers.
    fn clone(&self) -> Self {
        let copy = Self::with_owner(self.shared.owner.clone(), self.shared.owner_id.clone());
        let joins = lock(&self.shared.state).joins.clone();
        {
            let mut state = lock(&copy.shared.state);
            for layer in joins.iter().filter_map(JoinInfo::join_layer) {
                copy.subscribe(&mut state, &layer);
            }
            state.joins = joins;
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{Field, FieldType};

    fn layer(id: &str, names: &[&str]) -> Arc<VectorLayer> {
        let fields = names.iter().map(|n| Field::new(*n, FieldType::String)).collect();
        Arc::new(VectorLayer::new(id, id, fields))
    }

    #[test]
    fn test_unique_name() {
        let fields: Fields = ["a", "a_1"].iter().map(|n| Field::new(*n, FieldType::Int)).collect();
        assert_eq!(unique_name(&fields, "b".into()), "b");
        assert_eq!(unique_name(&fields, "a".into()), "a_2");
    }

    #[test]
    fn test_source_indices_follow_subset_order() {
        let joined = layer("j", &["key", "a", "b", "c"]);
        let all = JoinInfo::new("k", "j", "key");
        assert_eq!(all.source_indices(&joined.fields()), vec![1, 2, 3]);

        let subset = all.clone().with_subset(["c", "missing", "a"]);
        assert_eq!(subset.source_indices(&joined.fields()), vec![3, 1]);
        assert_ne!(all, subset);
    }

    #[test]
    fn test_rejects_self_join() {
        let owner = layer("o", &["k"]);
        let buffer = JoinBuffer::new(&owner);
        assert!(!buffer.add_join(JoinInfo::new("k", "o", "k")));
        assert!(!buffer.contains_joins());
    }

    #[test]
    fn test_drop_releases_subscriptions() {
        let owner = layer("o", &["k"]);
        let joined = layer("j", &["k", "v"]);
        let buffer = JoinBuffer::new(&owner);
        assert!(buffer.add_join(JoinInfo::new("k", "j", "k").with_join_layer(&joined)));
        assert_eq!(joined.subscriber_count(), 1);

        let copy = buffer.clone();
        assert_eq!(joined.subscriber_count(), 2);
        drop(buffer);
        drop(copy);
        assert_eq!(joined.subscriber_count(), 0);
    }
}
