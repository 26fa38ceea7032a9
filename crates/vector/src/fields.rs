//! Attribute field definitions and ordered field sets

use serde::{Deserialize, Serialize};

/// Value type of an attribute field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    String,
}

/// A named, typed attribute field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    name: String,
    field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }
}

/// Where a field of a layer's field set comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldOrigin {
    /// Stored by the data source
    Provider,
    /// Appended by an attribute join
    Join {
        /// Position of the join in the join buffer
        join_index: usize,
        /// Index of the field in the joined layer
        source_index: usize,
    },
    /// Added while editing
    Edit,
    /// Computed from an expression
    Expression,
}

impl FieldOrigin {
    pub fn is_join(&self) -> bool {
        matches!(self, Self::Join { .. })
    }
}

/// Ordered set of fields, each tagged with its origin
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    entries: Vec<(Field, FieldOrigin)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, field: Field, origin: FieldOrigin) {
        self.entries.push((field, origin));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn at(&self, index: usize) -> Option<&Field> {
        self.entries.get(index).map(|(f, _)| f)
    }

    pub fn origin(&self, index: usize) -> Option<FieldOrigin> {
        self.entries.get(index).map(|(_, o)| *o)
    }

    /// Index of the first field named `name`
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(f, _)| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(f, _)| f.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Field, FieldOrigin)> {
        self.entries.iter().map(|(f, o)| (f, *o))
    }

    pub fn remove(&mut self, index: usize) -> Option<Field> {
        (index < self.entries.len()).then(|| self.entries.remove(index).0)
    }

    /// Keep only the fields for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(&Field, FieldOrigin) -> bool) {
        self.entries.retain(|(f, o)| keep(f, *o));
    }
}

impl FromIterator<Field> for Fields {
    /// Collect provider fields
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|f| (f, FieldOrigin::Provider)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_retain() {
        let mut fields: Fields = [Field::new("id", FieldType::Int), Field::new("name", FieldType::String)]
            .into_iter()
            .collect();
        fields.append(
            Field::new("b_pop", FieldType::Int),
            FieldOrigin::Join {
                join_index: 0,
                source_index: 2,
            },
        );

        assert_eq!(fields.index_of("name"), Some(1));
        assert!(fields.origin(2).is_some_and(|o| o.is_join()));
        assert_eq!(fields.names().collect::<Vec<_>>(), vec!["id", "name", "b_pop"]);

        fields.retain(|_, origin| !origin.is_join());
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.remove(0).map(|f| f.name().to_string()), Some("id".to_string()));
        assert!(fields.remove(5).is_none());
    }
}
