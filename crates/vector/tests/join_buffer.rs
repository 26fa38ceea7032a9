//! Integration tests for attribute joins

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use strata_core::xml::Element;
use strata_vector::prelude::*;

fn string_fields(names: &[&str]) -> Fields {
    names.iter().map(|n| Field::new(*n, FieldType::String)).collect()
}

/// Owner "parcels" (id, zone) and joined "zones" (code, label, area)
fn setup() -> (Project, Arc<VectorLayer>, Arc<VectorLayer>) {
    let project = Project::new();

    let parcels = Arc::new(VectorLayer::new("parcels", "parcels", string_fields(&["id", "zone"])));
    parcels.add_feature(None, vec!["p1".into(), "A".into()]);
    parcels.add_feature(None, vec!["p2".into(), "B".into()]);
    parcels.add_feature(None, vec!["p3".into(), AttributeValue::Null]);

    let zones = Arc::new(VectorLayer::new("zones", "zones", string_fields(&["code", "label", "area"])));
    zones.add_feature(None, vec!["A".into(), "Residential".into(), "10".into()]);
    zones.add_feature(None, vec!["B".into(), "Industrial".into(), "20".into()]);

    project.add_layer(Arc::clone(&parcels));
    project.add_layer(Arc::clone(&zones));
    (project, parcels, zones)
}

fn counter(buffer: &JoinBuffer) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&count);
    buffer.on_joined_fields_changed(move || {
        sink.fetch_add(1, Ordering::SeqCst);
    });
    count
}

#[test]
fn test_update_fields_appends_prefixed_fields() {
    let (_project, parcels, zones) = setup();
    let buffer = JoinBuffer::new(&parcels);
    assert!(buffer.add_join(JoinInfo::new("zone", "zones", "code").with_join_layer(&zones)));

    let mut fields = parcels.fields();
    buffer.update_fields(&mut fields);
    assert_eq!(
        fields.names().collect::<Vec<_>>(),
        vec!["id", "zone", "zones_label", "zones_area"]
    );

    // Idempotent
    buffer.update_fields(&mut fields);
    assert_eq!(fields.len(), 4);

    let (info, source_index) = buffer.join_for_field_index(3, &fields).unwrap();
    assert_eq!(info.join_layer_id(), "zones");
    assert_eq!(source_index, 2);
    assert!(buffer.join_for_field_index(1, &fields).is_none());
    assert_eq!(buffer.joined_fields_offset("zones", &fields), Some(2));
    assert_eq!(buffer.joined_fields_offset("other", &fields), None);
}

#[test]
fn test_prefix_collisions_get_suffixes() {
    let (_project, parcels, zones) = setup();
    parcels.add_field(Field::new("label", FieldType::String));
    parcels.add_field(Field::new("label_1", FieldType::String));

    let buffer = JoinBuffer::new(&parcels);
    assert!(buffer.add_join(
        JoinInfo::new("zone", "zones", "code")
            .with_join_layer(&zones)
            .with_prefix("")
            .with_subset(["label"])
    ));

    let mut fields = parcels.fields();
    buffer.update_fields(&mut fields);
    assert_eq!(fields.at(4).map(Field::name), Some("label_2"));
    assert_eq!(fields.len(), 5);
}

#[test]
fn test_invalid_and_duplicate_joins_are_rejected() {
    let (_project, parcels, zones) = setup();
    let buffer = JoinBuffer::new(&parcels);
    let changes = counter(&buffer);

    assert!(!buffer.add_join(JoinInfo::new("", "zones", "code")));
    assert!(!buffer.add_join(JoinInfo::new("zone", "", "code")));
    assert!(!buffer.add_join(JoinInfo::new("zone", "zones", "")));
    assert!(!buffer.add_join(JoinInfo::new("zone", "zones", "missing").with_join_layer(&zones)));
    assert!(!buffer.contains_joins());
    assert_eq!(changes.load(Ordering::SeqCst), 0);

    assert!(buffer.add_join(JoinInfo::new("zone", "zones", "code").with_join_layer(&zones)));
    assert!(!buffer.add_join(JoinInfo::new("id", "zones", "label").with_join_layer(&zones)));
    assert_eq!(buffer.vector_joins().len(), 1);
    assert_eq!(changes.load(Ordering::SeqCst), 1);

    assert!(!buffer.remove_join("nope"));
    assert!(buffer.remove_join("zones"));
    assert!(!buffer.remove_join("zones"));
    assert_eq!(changes.load(Ordering::SeqCst), 2);
    assert_eq!(zones.subscriber_count(), 0);
}

#[test]
fn test_joined_attributes_with_and_without_cache() {
    let (_project, parcels, zones) = setup();

    for memory_cache in [true, false] {
        let buffer = JoinBuffer::new(&parcels);
        assert!(buffer.add_join(
            JoinInfo::new("zone", "zones", "code")
                .with_join_layer(&zones)
                .with_memory_cache(memory_cache)
        ));
        if memory_cache {
            assert_eq!(buffer.vector_joins()[0].cached_row_count(), 2);
        }

        let mut fields = parcels.fields();
        buffer.update_fields(&mut fields);

        let rows: Vec<Vec<AttributeValue>> = parcels
            .features()
            .iter()
            .map(|f| buffer.joined_attributes(f, &fields))
            .collect();

        let expected: Vec<AttributeValue> = vec!["p1".into(), "A".into(), "Residential".into(), "10".into()];
        assert_eq!(rows[0], expected);
        assert_eq!(rows[1][2], AttributeValue::from("Industrial"));
        // Null keys never match
        assert!(rows[2][2].is_null() && rows[2][3].is_null());
    }
}

#[test]
fn test_data_changes_refresh_cache() {
    let (_project, parcels, zones) = setup();
    let buffer = JoinBuffer::new(&parcels);
    assert!(buffer.add_join(
        JoinInfo::new("zone", "zones", "code")
            .with_join_layer(&zones)
            .with_memory_cache(true)
    ));
    let changes = counter(&buffer);

    let fid = zones.add_feature(None, vec!["C".into(), "Park".into(), "5".into()]);
    assert!(buffer.vector_joins()[0].is_cache_dirty());
    assert_eq!(changes.load(Ordering::SeqCst), 1);

    // Edits of the owner itself are not joined data
    parcels.add_feature(None, vec!["p4".into(), "A".into()]);
    assert_eq!(changes.load(Ordering::SeqCst), 1);

    let mut fields = parcels.fields();
    buffer.update_fields(&mut fields);
    let feature = Feature::empty(99).with_attributes(vec!["p9".into(), "C".into()]);
    assert_eq!(buffer.joined_attributes(&feature, &fields)[2], AttributeValue::from("Park"));
    assert_eq!(buffer.vector_joins()[0].cached_row_count(), 3);

    assert_eq!(changes.load(Ordering::SeqCst), 1);

    assert!(zones.delete_feature(fid));
    assert_eq!(changes.load(Ordering::SeqCst), 2);
    assert!(buffer.joined_attributes(&feature, &fields)[2].is_null());
}

#[test]
fn test_joined_field_changes_are_announced() {
    let (_project, parcels, zones) = setup();
    let buffer = JoinBuffer::new(&parcels);
    assert!(buffer.add_join(JoinInfo::new("zone", "zones", "code").with_join_layer(&zones)));
    let changes = counter(&buffer);

    zones.add_field(Field::new("owner", FieldType::String));
    assert_eq!(changes.load(Ordering::SeqCst), 1);

    let mut fields = parcels.fields();
    buffer.update_fields(&mut fields);
    assert!(fields.contains("zones_owner"));

    // Unrelated layers do not trigger anything
    parcels.add_field(Field::new("notes", FieldType::String));
    assert_eq!(changes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_deleting_joined_layer_drops_join() {
    let (project, parcels, zones) = setup();
    let buffer = JoinBuffer::new(&parcels);
    assert!(buffer.add_join(JoinInfo::new("zone", "zones", "code").with_join_layer(&zones)));
    let changes = counter(&buffer);

    let mut fields = parcels.fields();
    buffer.update_fields(&mut fields);
    assert_eq!(fields.len(), 4);

    drop(zones);
    assert!(project.remove_layer("zones"));

    assert!(!buffer.contains_joins());
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    buffer.update_fields(&mut fields);
    assert_eq!(fields.names().collect::<Vec<_>>(), vec!["id", "zone"]);
}

#[test]
fn test_clone_is_independent() {
    let (_project, parcels, zones) = setup();
    let buffer = JoinBuffer::new(&parcels);
    assert!(buffer.add_join(
        JoinInfo::new("zone", "zones", "code")
            .with_join_layer(&zones)
            .with_memory_cache(true)
    ));
    let changes = counter(&buffer);

    let copy = buffer.clone();
    assert_eq!(copy.vector_joins(), buffer.vector_joins());
    assert_eq!(copy.vector_joins()[0].cached_row_count(), 2);

    assert!(copy.remove_join("zones"));
    assert!(buffer.contains_joins());
    assert_eq!(changes.load(Ordering::SeqCst), 0);

    // The original still follows the joined layer
    zones.add_field(Field::new("extra", FieldType::Int));
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    assert_eq!(zones.subscriber_count(), 1);
}

#[test]
fn test_xml_roundtrip_and_resolve() {
    let (project, parcels, zones) = setup();
    let buffer = JoinBuffer::new(&parcels);
    assert!(buffer.add_join(
        JoinInfo::new("zone", "zones", "code")
            .with_join_layer(&zones)
            .with_memory_cache(true)
            .with_prefix("z_")
            .with_subset(["area", "label"])
    ));

    let mut layer = Element::new("maplayer");
    buffer.write_xml(&mut layer);
    let xml = layer.to_xml_string();
    let parsed = Element::parse(&xml).unwrap();

    let restored = JoinBuffer::new(&parcels);
    let changes = counter(&restored);
    restored.read_xml(&parsed);
    assert_eq!(restored.vector_joins(), buffer.vector_joins());
    assert_eq!(changes.load(Ordering::SeqCst), 1);

    // Unresolved joins contribute no fields
    let mut fields = parcels.fields();
    restored.update_fields(&mut fields);
    assert_eq!(fields.len(), 2);

    let before = changes.load(Ordering::SeqCst);
    restored.resolve_references(&project);
    assert_eq!(changes.load(Ordering::SeqCst), before + 1);

    restored.update_fields(&mut fields);
    assert_eq!(fields.names().collect::<Vec<_>>(), vec!["id", "zone", "z_area", "z_label"]);
    assert_eq!(restored.vector_joins()[0].cached_row_count(), 2);
    assert_eq!(
        JoinBuffer::join_subset_indices(&zones, &["label".to_string(), "nope".to_string()]),
        vec![1]
    );
}

#[test]
fn test_read_xml_replaces_joins_at_once() {
    let (project, parcels, zones) = setup();
    let districts = Arc::new(VectorLayer::new("districts", "districts", string_fields(&["code", "name"])));
    project.add_layer(Arc::clone(&districts));

    let buffer = JoinBuffer::new(&parcels);
    assert!(buffer.add_join(JoinInfo::new("zone", "zones", "code").with_join_layer(&zones)));
    let changes = counter(&buffer);

    let mut joins = Element::new("vectorjoins");
    for (target, layer_id, field) in [
        ("zone", "districts", "code"),
        ("id", "districts", "name"),
        ("", "zones", "code"),
        ("zone", "parcels", "id"),
    ] {
        joins.append_child(
            Element::new("join")
                .with_attribute("targetFieldName", target)
                .with_attribute("joinLayerId", layer_id)
                .with_attribute("joinFieldName", field),
        );
    }

    buffer.read_xml(&joins);
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    let restored = buffer.vector_joins();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].join_layer_id(), "districts");
    assert_eq!(restored[0].target_field_name(), "zone");
    assert_eq!(zones.subscriber_count(), 0);

    buffer.resolve_references(&project);
    assert_eq!(districts.subscriber_count(), 1);
    assert_eq!(changes.load(Ordering::SeqCst), 2);
}
