use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Parameter value attached to an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectParameterValue {
    pub class: String,
    pub object: String,
    pub parameter: String,
    pub value: Value,
    pub alternative: Option<String>,
}

/// Parameter value attached to a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipParameterValue {
    pub class: String,
    pub objects: Vec<String>,
    pub parameter: String,
    pub value: Value,
    pub alternative: Option<String>,
}

/// Normalized output of one mapping application.
///
/// Name collections are insertion-ordered sets: the first occurrence wins and
/// later duplicates are dropped, so identical input always serializes to
/// identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappedBatch {
    pub object_classes: IndexSet<String>,
    /// (class, object)
    pub objects: IndexSet<(String, String)>,
    /// (relationship class, member object classes)
    pub relationship_classes: IndexSet<(String, Vec<String>)>,
    /// (relationship class, member objects)
    pub relationships: IndexSet<(String, Vec<String>)>,
    /// (class, group object, member object)
    pub object_groups: IndexSet<(String, String, String)>,
    pub alternatives: IndexSet<String>,
    /// (class, parameter)
    pub object_parameters: IndexSet<(String, String)>,
    /// (relationship class, parameter)
    pub relationship_parameters: IndexSet<(String, String)>,
    pub object_parameter_values: Vec<ObjectParameterValue>,
    pub relationship_parameter_values: Vec<RelationshipParameterValue>,
}

impl MappedBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entities across all collections.
    pub fn entity_count(&self) -> usize {
        self.object_classes.len()
            + self.objects.len()
            + self.relationship_classes.len()
            + self.relationships.len()
            + self.object_groups.len()
            + self.alternatives.len()
            + self.object_parameters.len()
            + self.relationship_parameters.len()
            + self.object_parameter_values.len()
            + self.relationship_parameter_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_count() == 0
    }

    /// Append another batch, keeping first-occurrence order.
    pub fn extend(&mut self, other: MappedBatch) {
        self.object_classes.extend(other.object_classes);
        self.objects.extend(other.objects);
        self.relationship_classes.extend(other.relationship_classes);
        self.relationships.extend(other.relationships);
        self.object_groups.extend(other.object_groups);
        self.alternatives.extend(other.alternatives);
        self.object_parameters.extend(other.object_parameters);
        self.relationship_parameters.extend(other.relationship_parameters);
        self.object_parameter_values.extend(other.object_parameter_values);
        self.relationship_parameter_values
            .extend(other.relationship_parameter_values);
    }

    pub fn add_object_class(&mut self, class: &str) {
        if !self.object_classes.contains(class) {
            self.object_classes.insert(class.to_string());
        }
    }

    pub fn add_object(&mut self, class: &str, object: &str) {
        self.objects.insert((class.to_string(), object.to_string()));
    }

    pub fn add_relationship_class(&mut self, class: &str, object_classes: &[String]) {
        self.relationship_classes
            .insert((class.to_string(), object_classes.to_vec()));
    }

    pub fn add_relationship(&mut self, class: &str, objects: &[String]) {
        self.relationships.insert((class.to_string(), objects.to_vec()));
    }

    pub fn add_object_group(&mut self, class: &str, group: &str, member: &str) {
        self.object_groups
            .insert((class.to_string(), group.to_string(), member.to_string()));
    }

    pub fn add_alternative(&mut self, name: &str) {
        if !self.alternatives.contains(name) {
            self.alternatives.insert(name.to_string());
        }
    }

    pub fn add_object_parameter(&mut self, class: &str, parameter: &str) {
        self.object_parameters
            .insert((class.to_string(), parameter.to_string()));
    }

    pub fn add_relationship_parameter(&mut self, class: &str, parameter: &str) {
        self.relationship_parameters
            .insert((class.to_string(), parameter.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_keep_first_position() {
        let mut batch = MappedBatch::new();
        batch.add_object_class("b");
        batch.add_object_class("a");
        batch.add_object_class("b");
        let classes: Vec<&str> = batch.object_classes.iter().map(String::as_str).collect();
        assert_eq!(classes, vec!["b", "a"]);
    }

    #[test]
    fn extend_and_count() {
        let mut first = MappedBatch::new();
        first.add_object_class("a");
        first.add_object("a", "x");

        let mut second = MappedBatch::new();
        second.add_object_class("a");
        second.add_object("a", "y");
        second.add_alternative("Base");

        first.extend(second);
        assert_eq!(first.object_classes.len(), 1);
        assert_eq!(first.objects.len(), 2);
        assert_eq!(first.entity_count(), 4);
        assert!(!first.is_empty());
        assert!(MappedBatch::new().is_empty());
    }
}
