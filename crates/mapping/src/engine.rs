//! Mapping engine: applies a [`MappingSpec`] to raw rows.
//!
//! Rows are visited top to bottom; within a row the items are visited in
//! specification order, and pivoted items once per pivot column. Anything
//! that goes wrong for a single row is recorded as a [`RowError`] and the
//! walk continues. Problems that would hit every row (a hidden class name, a
//! reference outside the table) fail the whole application up front.

use tracing::debug;

use tabula_core::{
    ColumnTypes, MappedBatch, ObjectParameterValue, RelationshipParameterValue, RowError,
    RowTypes, TabulaError, Value,
};

use crate::spec::{Component, ItemMapping, MappingSpec, ParameterMapping};

/// Result of one mapping application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingOutput {
    pub batch: MappedBatch,
    pub errors: Vec<RowError>,
}

impl MappingOutput {
    pub fn into_parts(self) -> (MappedBatch, Vec<RowError>) {
        (self.batch, self.errors)
    }
}

/// Apply `spec` to `rows` (data rows only; the header is passed separately).
pub fn apply(
    spec: &MappingSpec,
    rows: &[Vec<String>],
    header: &[String],
    column_types: &ColumnTypes,
    row_types: &RowTypes,
) -> Result<MappingOutput, TabulaError> {
    let width = rows
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .max(header.len());

    let plans = spec
        .items()
        .iter()
        .enumerate()
        .map(|(index, item)| ItemPlan::new(index, item, rows, header, width))
        .collect::<Result<Vec<_>, _>>()?;

    let mut output = MappingOutput::default();

    for (row, cells) in rows.iter().enumerate() {
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        for plan in &plans {
            if row < plan.data_start {
                continue;
            }
            let mut ctx = Cursor {
                rows,
                header,
                column_types,
                row_types,
                row,
                pivot: None,
            };
            match &plan.pivot_columns {
                None => {
                    if let Err(message) = map_item(plan.item, &ctx, &mut output.batch) {
                        output.errors.push(RowError::new(row, message));
                    }
                }
                Some(columns) => {
                    for &column in columns {
                        ctx.pivot = Some(column);
                        if let Err(message) = map_item(plan.item, &ctx, &mut output.batch) {
                            output
                                .errors
                                .push(RowError::new(row, format!("column {}: {}", column, message)));
                        }
                    }
                }
            }
        }
    }

    debug!(
        items = plans.len(),
        rows = rows.len(),
        entities = output.batch.entity_count(),
        errors = output.errors.len(),
        "mapping applied"
    );
    Ok(output)
}

// ── Planning and validation ──────────────────────────────────────────

struct ItemPlan<'a> {
    item: &'a ItemMapping,
    data_start: usize,
    pivot_columns: Option<Vec<usize>>,
}

impl<'a> ItemPlan<'a> {
    fn new(
        index: usize,
        item: &'a ItemMapping,
        rows: &[Vec<String>],
        header: &[String],
        width: usize,
    ) -> Result<Self, TabulaError> {
        let invalid = |reason: String| {
            TabulaError::Mapping(format!("{} mapping #{}: {}", item.kind(), index, reason))
        };

        if item.name().is_hidden() {
            return Err(invalid("name component is hidden".into()));
        }

        let components = item.components();
        for component in &components {
            match component {
                Component::ColumnHeader { reference } if *reference >= header.len() => {
                    return Err(invalid(format!(
                        "header reference {} is outside the header ({} columns)",
                        reference,
                        header.len()
                    )));
                }
                Component::Column { reference }
                    if !header.is_empty() && *reference >= header.len() =>
                {
                    return Err(invalid(format!(
                        "column reference {} is outside the header ({} columns)",
                        reference,
                        header.len()
                    )));
                }
                Component::Row { reference } if *reference >= rows.len() => {
                    return Err(invalid(format!(
                        "row reference {} is outside the table ({} rows)",
                        reference,
                        rows.len()
                    )));
                }
                _ => {}
            }
        }

        match item {
            ItemMapping::RelationshipClass {
                object_classes,
                objects,
                ..
            } => {
                if object_classes.is_empty() {
                    return Err(invalid("no object classes".into()));
                }
                if object_classes.len() != objects.len() {
                    return Err(invalid(format!(
                        "{} object classes but {} objects",
                        object_classes.len(),
                        objects.len()
                    )));
                }
            }
            ItemMapping::ObjectClass { objects, .. } => {
                if matches!(item.parameters(), ParameterMapping::ParameterValue { .. })
                    && objects.is_hidden()
                {
                    return Err(invalid("parameter values need an object name".into()));
                }
            }
            _ => {}
        }

        let pivoted = item.is_pivoted();
        if let ParameterMapping::ParameterValue { value, .. } = item.parameters() {
            if value.is_hidden() && !pivoted {
                return Err(invalid("parameter value component is hidden".into()));
            }
        }

        let mut data_start = item.read_start_row();
        let pivot_columns = if pivoted {
            let last_pivot_row = components
                .iter()
                .filter_map(|c| match c {
                    Component::Row { reference } => Some(*reference),
                    _ => None,
                })
                .max()
                .unwrap_or(0);
            data_start = data_start.max(last_pivot_row + 1);

            let fixed: Vec<usize> = components
                .iter()
                .filter_map(|c| match c {
                    Component::Column { reference } => Some(*reference),
                    _ => None,
                })
                .collect();
            Some(
                (0..width)
                    .filter(|c| !fixed.contains(c) && !item.skip_columns().contains(c))
                    .collect(),
            )
        } else {
            None
        };

        Ok(Self {
            item,
            data_start,
            pivot_columns,
        })
    }
}

// ── Resolution ───────────────────────────────────────────────────────

/// Position of the walk: current data row and, for pivoted items, column.
struct Cursor<'a> {
    rows: &'a [Vec<String>],
    header: &'a [String],
    column_types: &'a ColumnTypes,
    row_types: &'a RowTypes,
    row: usize,
    pivot: Option<usize>,
}

impl<'a> Cursor<'a> {
    fn cell(&self, row: usize, column: usize) -> Option<&'a str> {
        self.rows.get(row)?.get(column).map(String::as_str)
    }

    fn text<'s>(&self, component: &'s Component) -> Option<&'s str>
    where
        'a: 's,
    {
        let raw = match component {
            Component::Column { reference } => self.cell(self.row, *reference),
            Component::Row { reference } => self.pivot.and_then(|c| self.cell(*reference, c)),
            Component::ColumnHeader { reference } => {
                self.header.get(*reference).map(String::as_str)
            }
            Component::Constant { reference } => Some(reference.as_str()),
            Component::None => None,
        };
        raw.filter(|s| !s.trim().is_empty())
    }

    /// A name that must be present.
    fn required(&self, component: &Component, what: &str) -> Result<String, String> {
        self.text(component)
            .map(str::to_string)
            .ok_or_else(|| format!("{} is missing", what))
    }

    /// A name that may be hidden, but must be present when it is not.
    fn optional(&self, component: &Component, what: &str) -> Result<Option<String>, String> {
        if component.is_hidden() {
            return Ok(None);
        }
        self.required(component, what).map(Some)
    }

    /// A typed value. Hidden values in pivoted items read the pivot cell.
    fn value(&self, component: &Component) -> Result<Value, String> {
        let (raw, declared) = match component {
            Component::Column { reference } => (
                self.cell(self.row, *reference),
                self.column_types.get(reference),
            ),
            Component::Row { reference } => (
                self.pivot.and_then(|c| self.cell(*reference, c)),
                self.row_types.get(reference),
            ),
            Component::None => match self.pivot {
                Some(column) => (self.cell(self.row, column), self.column_types.get(&column)),
                None => (None, None),
            },
            Component::ColumnHeader { .. } | Component::Constant { .. } => {
                (self.text(component), None)
            }
        };
        let raw = raw
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| "parameter value is missing".to_string())?;
        declared.copied().unwrap_or_default().convert(raw)
    }
}

// ── Item mapping ─────────────────────────────────────────────────────

fn map_item(item: &ItemMapping, ctx: &Cursor<'_>, batch: &mut MappedBatch) -> Result<(), String> {
    match item {
        ItemMapping::ObjectClass {
            name,
            objects,
            parameters,
            ..
        } => {
            let class = ctx.required(name, "object class name")?;
            batch.add_object_class(&class);
            let object = ctx.optional(objects, "object name")?;
            if let Some(object) = &object {
                batch.add_object(&class, object);
            }
            match parameters {
                ParameterMapping::None => {}
                ParameterMapping::ParameterDefinition { name } => {
                    if let Some(parameter) = ctx.optional(name, "parameter name")? {
                        batch.add_object_parameter(&class, &parameter);
                    }
                }
                ParameterMapping::ParameterValue {
                    name,
                    value,
                    alternative,
                } => {
                    let parameter = ctx.required(name, "parameter name")?;
                    batch.add_object_parameter(&class, &parameter);
                    let object = object.ok_or_else(|| "object name is missing".to_string())?;
                    let alternative = ctx.optional(alternative, "alternative name")?;
                    if let Some(alternative) = &alternative {
                        batch.add_alternative(alternative);
                    }
                    let value = ctx.value(value)?;
                    batch.object_parameter_values.push(ObjectParameterValue {
                        class,
                        object,
                        parameter,
                        value,
                        alternative,
                    });
                }
            }
        }
        ItemMapping::RelationshipClass {
            name,
            object_classes,
            objects,
            parameters,
            import_objects,
            ..
        } => {
            let class = ctx.required(name, "relationship class name")?;
            let classes = object_classes
                .iter()
                .map(|c| ctx.required(c, "object class name"))
                .collect::<Result<Vec<_>, _>>()?;
            batch.add_relationship_class(&class, &classes);
            let members = objects
                .iter()
                .map(|c| ctx.required(c, "object name"))
                .collect::<Result<Vec<_>, _>>()?;
            if *import_objects {
                for (object_class, object) in classes.iter().zip(&members) {
                    batch.add_object_class(object_class);
                    batch.add_object(object_class, object);
                }
            }
            batch.add_relationship(&class, &members);
            match parameters {
                ParameterMapping::None => {}
                ParameterMapping::ParameterDefinition { name } => {
                    if let Some(parameter) = ctx.optional(name, "parameter name")? {
                        batch.add_relationship_parameter(&class, &parameter);
                    }
                }
                ParameterMapping::ParameterValue {
                    name,
                    value,
                    alternative,
                } => {
                    let parameter = ctx.required(name, "parameter name")?;
                    batch.add_relationship_parameter(&class, &parameter);
                    let alternative = ctx.optional(alternative, "alternative name")?;
                    if let Some(alternative) = &alternative {
                        batch.add_alternative(alternative);
                    }
                    let value = ctx.value(value)?;
                    batch
                        .relationship_parameter_values
                        .push(RelationshipParameterValue {
                            class,
                            objects: members,
                            parameter,
                            value,
                            alternative,
                        });
                }
            }
        }
        ItemMapping::ObjectGroup {
            name,
            groups,
            members,
            import_objects,
            ..
        } => {
            let class = ctx.required(name, "object class name")?;
            let group = ctx.required(groups, "group name")?;
            let member = ctx.required(members, "member name")?;
            if *import_objects {
                batch.add_object_class(&class);
                batch.add_object(&class, &group);
                batch.add_object(&class, &member);
            }
            batch.add_object_group(&class, &group, &member);
        }
        ItemMapping::Alternative { name, .. } => {
            let alternative = ctx.required(name, "alternative name")?;
            batch.add_alternative(&alternative);
        }
    }
    Ok(())
}
