//! Mapping specification tree.
//!
//! A specification is an ordered list of item mappings. Each item names the
//! entity kind it produces and holds leaf components that say where a value
//! comes from. Parameter mappings nest under their item.
//!
//! JSON form:
//!
//! ```json
//! [{"map_type": "ObjectClass",
//!   "name": {"map_type": "column", "reference": 0},
//!   "objects": {"map_type": "column", "reference": 1},
//!   "parameters": {"map_type": "None"},
//!   "skip_columns": [],
//!   "read_start_row": 0}]
//! ```

use serde::{Deserialize, Serialize};

// ── Components ───────────────────────────────────────────────────────

/// Where a single value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "map_type")]
pub enum Component {
    /// Cell of the current data row.
    #[serde(rename = "column")]
    Column { reference: usize },
    /// Cell of a fixed row in the current pivot column.
    #[serde(rename = "row")]
    Row { reference: usize },
    /// Header name of a column.
    #[serde(rename = "column_name")]
    ColumnHeader { reference: usize },
    /// Literal text.
    #[serde(rename = "constant")]
    Constant { reference: String },
    /// Hidden: ignored for this application.
    #[default]
    #[serde(rename = "None")]
    None,
}

impl Component {
    pub fn column(reference: usize) -> Self {
        Component::Column { reference }
    }

    pub fn row(reference: usize) -> Self {
        Component::Row { reference }
    }

    pub fn header(reference: usize) -> Self {
        Component::ColumnHeader { reference }
    }

    pub fn constant(text: impl Into<String>) -> Self {
        Component::Constant {
            reference: text.into(),
        }
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self, Component::None)
    }

    pub fn is_pivot(&self) -> bool {
        matches!(self, Component::Row { .. })
    }
}

// ── Parameters ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "map_type")]
pub enum ParameterMapping {
    #[default]
    #[serde(rename = "None")]
    None,
    /// Declare a parameter on the item's class.
    ParameterDefinition { name: Component },
    /// Declare a parameter and give the item's entity a value for it.
    ParameterValue {
        name: Component,
        #[serde(default)]
        value: Component,
        #[serde(default)]
        alternative: Component,
    },
}

impl ParameterMapping {
    fn components(&self) -> Vec<&Component> {
        match self {
            ParameterMapping::None => Vec::new(),
            ParameterMapping::ParameterDefinition { name } => vec![name],
            ParameterMapping::ParameterValue {
                name,
                value,
                alternative,
            } => vec![name, value, alternative],
        }
    }
}

// ── Items ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "map_type")]
pub enum ItemMapping {
    ObjectClass {
        name: Component,
        #[serde(default)]
        objects: Component,
        #[serde(default)]
        parameters: ParameterMapping,
        #[serde(default)]
        skip_columns: Vec<usize>,
        #[serde(default)]
        read_start_row: usize,
    },
    RelationshipClass {
        name: Component,
        #[serde(default)]
        object_classes: Vec<Component>,
        #[serde(default)]
        objects: Vec<Component>,
        #[serde(default)]
        parameters: ParameterMapping,
        #[serde(default)]
        import_objects: bool,
        #[serde(default)]
        skip_columns: Vec<usize>,
        #[serde(default)]
        read_start_row: usize,
    },
    ObjectGroup {
        name: Component,
        #[serde(default)]
        groups: Component,
        #[serde(default)]
        members: Component,
        #[serde(default)]
        import_objects: bool,
        #[serde(default)]
        skip_columns: Vec<usize>,
        #[serde(default)]
        read_start_row: usize,
    },
    Alternative {
        name: Component,
        #[serde(default)]
        skip_columns: Vec<usize>,
        #[serde(default)]
        read_start_row: usize,
    },
}

impl ItemMapping {
    /// Object class mapping with no parameters.
    pub fn object_class(name: Component, objects: Component) -> Self {
        ItemMapping::ObjectClass {
            name,
            objects,
            parameters: ParameterMapping::None,
            skip_columns: Vec::new(),
            read_start_row: 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ItemMapping::ObjectClass { .. } => "ObjectClass",
            ItemMapping::RelationshipClass { .. } => "RelationshipClass",
            ItemMapping::ObjectGroup { .. } => "ObjectGroup",
            ItemMapping::Alternative { .. } => "Alternative",
        }
    }

    pub fn name(&self) -> &Component {
        match self {
            ItemMapping::ObjectClass { name, .. }
            | ItemMapping::RelationshipClass { name, .. }
            | ItemMapping::ObjectGroup { name, .. }
            | ItemMapping::Alternative { name, .. } => name,
        }
    }

    pub fn skip_columns(&self) -> &[usize] {
        match self {
            ItemMapping::ObjectClass { skip_columns, .. }
            | ItemMapping::RelationshipClass { skip_columns, .. }
            | ItemMapping::ObjectGroup { skip_columns, .. }
            | ItemMapping::Alternative { skip_columns, .. } => skip_columns,
        }
    }

    pub fn read_start_row(&self) -> usize {
        match self {
            ItemMapping::ObjectClass { read_start_row, .. }
            | ItemMapping::RelationshipClass { read_start_row, .. }
            | ItemMapping::ObjectGroup { read_start_row, .. }
            | ItemMapping::Alternative { read_start_row, .. } => *read_start_row,
        }
    }

    pub fn parameters(&self) -> &ParameterMapping {
        const NONE: &ParameterMapping = &ParameterMapping::None;
        match self {
            ItemMapping::ObjectClass { parameters, .. }
            | ItemMapping::RelationshipClass { parameters, .. } => parameters,
            _ => NONE,
        }
    }

    /// Every leaf component, parameters included, in tree order.
    pub fn components(&self) -> Vec<&Component> {
        let mut out = Vec::new();
        match self {
            ItemMapping::ObjectClass { name, objects, .. } => {
                out.push(name);
                out.push(objects);
            }
            ItemMapping::RelationshipClass {
                name,
                object_classes,
                objects,
                ..
            } => {
                out.push(name);
                out.extend(object_classes.iter());
                out.extend(objects.iter());
            }
            ItemMapping::ObjectGroup {
                name,
                groups,
                members,
                ..
            } => {
                out.push(name);
                out.push(groups);
                out.push(members);
            }
            ItemMapping::Alternative { name, .. } => out.push(name),
        }
        out.extend(self.parameters().components());
        out
    }

    /// An item is pivoted when any of its components reads from a fixed row.
    pub fn is_pivoted(&self) -> bool {
        self.components().iter().any(|c| c.is_pivot())
    }
}

// ── Specification ────────────────────────────────────────────────────

/// The mapping tree for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct MappingSpec(pub Vec<ItemMapping>);

impl MappingSpec {
    pub fn new(items: Vec<ItemMapping>) -> Self {
        Self(items)
    }

    /// First column is the class name, second the object name.
    pub fn default_guess() -> Self {
        Self(vec![ItemMapping::object_class(
            Component::column(0),
            Component::column(1),
        )])
    }

    pub fn items(&self) -> &[ItemMapping] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_legacy_item_format() {
        let spec: MappingSpec = serde_json::from_value(json!([{
            "map_type": "ObjectClass",
            "name": {"map_type": "column", "reference": 0},
            "parameters": {"map_type": "None"},
            "skip_columns": [],
            "read_start_row": 0,
            "objects": {"map_type": "column", "reference": 1}
        }]))
        .unwrap();
        assert_eq!(spec, MappingSpec::default_guess());
    }

    #[test]
    fn missing_fields_default_to_hidden() {
        let spec: MappingSpec = serde_json::from_value(json!([{
            "map_type": "ObjectClass",
            "name": {"map_type": "constant", "reference": "unit"}
        }]))
        .unwrap();
        assert_eq!(
            spec.items()[0],
            ItemMapping::object_class(Component::constant("unit"), Component::None)
        );
    }

    #[test]
    fn nested_parameter_round_trip() {
        let spec = MappingSpec::new(vec![ItemMapping::RelationshipClass {
            name: Component::constant("node__unit"),
            object_classes: vec![Component::header(0), Component::header(1)],
            objects: vec![Component::column(0), Component::column(1)],
            parameters: ParameterMapping::ParameterValue {
                name: Component::row(0),
                value: Component::None,
                alternative: Component::constant("Base"),
            },
            import_objects: true,
            skip_columns: vec![3],
            read_start_row: 1,
        }]);
        let json = spec.to_json().unwrap();
        let back = MappingSpec::from_json(&json).unwrap();
        assert_eq!(back, spec);
        assert_eq!(back.to_json().unwrap(), json);
        assert!(back.items()[0].is_pivoted());
    }

    #[test]
    fn component_json_shape() {
        let value = serde_json::to_value(Component::header(2)).unwrap();
        assert_eq!(value, json!({"map_type": "column_name", "reference": 2}));
        let value = serde_json::to_value(Component::None).unwrap();
        assert_eq!(value, json!({"map_type": "None"}));
    }

    #[test]
    fn unknown_map_type_is_rejected() {
        let result: Result<MappingSpec, _> =
            serde_json::from_value(json!([{"map_type": "Scenario", "name": {"map_type": "None"}}]));
        assert!(result.is_err());
    }
}
