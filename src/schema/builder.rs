//! Schema Model Builder.
//!
//! Turns a model type's descriptors into the desired [`TableSchema`]:
//!
//! - scalar and key properties become one column each
//! - multi-language text fans out into one column per language
//! - nested objects flatten into `{property}_`-prefixed columns
//! - collections become subtables named `{table}_{property}`
//! - derived types split into a base table and a derived table
//!
//! Synthetic columns trail the property columns in a fixed order: site
//! column, derived-type descriptor columns, subtable link column.
//!
//! A subtable links to its parent's identity, or else to a single-column
//! primary key. A site-scoped type's key always includes `__Site`, so a
//! site-scoped type with collections needs an identity property.

use tracing::debug;

use super::language::LanguageSet;
use super::model::{
    ColumnDescriptor, ColumnRole, ComputedColumn, DerivedLink, ForeignKeyDescriptor,
    IndexDescriptor, IndexKind, NestedGroup, Subtable, SubtableLink, TableSchema,
    DERIVED_MODULE_COLUMN, DERIVED_TABLE_COLUMN, DERIVED_TYPE_COLUMN, DESCRIPTOR_LENGTH,
    PARENT_COLUMN, ROW_ID_COLUMN, SITE_COLUMN, SITE_LENGTH,
};
use crate::error::{ConfigError, Result};
use crate::metadata::descriptor::{
    Inheritance, ModelType, PropertyDescriptor, PropertyKind, ValueType,
};
use crate::metadata::inspector::Inspector;
use crate::sql::types::ColumnType;

/// Primary key constraint name.
pub fn primary_key_name(table: &str) -> String {
    format!("PK_{}", table)
}

/// Index name: `UX_` for unique, `IX_` otherwise.
pub fn index_name(table: &str, columns: &[String], unique: bool) -> String {
    format!(
        "{}_{}_{}",
        if unique { "UX" } else { "IX" },
        table,
        columns.join("_")
    )
}

/// Foreign key constraint name.
pub fn foreign_key_name(table: &str, referenced: &str) -> String {
    format!("FK_{}_{}", table, referenced)
}

/// Default constraint name.
pub fn default_name(table: &str, column: &str) -> String {
    format!("DF_{}_{}", table, column)
}

/// Where a table sits in the model.
enum Placement<'a> {
    /// The table of a persisted type (or the base of a split).
    Root,
    /// Derived table keyed by its base.
    Derived { base: &'a TableSchema, base_type: &'a ModelType },
    /// Subtable linked to `parent`.
    Subtable {
        parent: &'a str,
        link: &'a ColumnDescriptor,
    },
}

/// Builds desired schemas from model metadata.
pub struct SchemaBuilder<'a> {
    inspector: &'a Inspector,
    languages: &'a LanguageSet,
    schema: String,
}

impl<'a> SchemaBuilder<'a> {
    pub fn new(inspector: &'a Inspector, languages: &'a LanguageSet, schema: impl Into<String>) -> Self {
        Self {
            inspector,
            languages,
            schema: schema.into(),
        }
    }

    /// Every table of a type, in creation order: the base table first for a
    /// derived type.
    pub fn build_all(&self, model: &ModelType) -> Result<Vec<TableSchema>> {
        match model.base_key() {
            Some(base_key) => {
                let base_type = self.inspector.describe(base_key)?;
                let base = self.build(&base_type)?;
                let derived = self.build_table(model, &model.dataset, Placement::Derived {
                    base: &base,
                    base_type: &base_type,
                })?;
                Ok(vec![base, derived])
            }
            None => Ok(vec![self.build(model)?]),
        }
    }

    /// The type's own table.
    pub fn build(&self, model: &ModelType) -> Result<TableSchema> {
        if let Some(base_key) = model.base_key() {
            let base_type = self.inspector.describe(base_key)?;
            let base = self.build(&base_type)?;
            return self.build_table(model, &model.dataset, Placement::Derived {
                base: &base,
                base_type: &base_type,
            });
        }
        self.build_table(model, &model.dataset, Placement::Root)
    }

    /// The shape a record of this type is read and written through: the
    /// table itself, or base and derived merged.
    pub fn read_shape(&self, model: &ModelType) -> Result<TableSchema> {
        let tables = self.build_all(model)?;
        Ok(match tables.as_slice() {
            [base, derived] => TableSchema::merged_view(base, derived),
            _ => tables.into_iter().next().ok_or_else(|| {
                ConfigError::UnknownType(model.key.clone())
            })?,
        })
    }

    fn build_table(&self, model: &ModelType, name: &str, placement: Placement<'_>) -> Result<TableSchema> {
        let mut table = TableSchema::new(&self.schema, name);
        table.type_key = model.key.clone();

        let skip: Vec<&str> = match &placement {
            Placement::Derived { base_type, .. } => {
                base_type.properties.iter().map(|p| p.name.as_str()).collect()
            }
            _ => vec![],
        };

        // Derived tables start with the base key.
        if let Placement::Derived { base, .. } = &placement {
            for key in base.key_columns() {
                let mut column = key.clone();
                column.identity = None;
                table.columns.push(column);
            }
            table.site_scoped = base.site_scoped;
        }

        // Subtables carry their own identity.
        if let Placement::Subtable { .. } = &placement {
            table.columns.push(
                ColumnDescriptor::new(ROW_ID_COLUMN, ColumnType::Int32)
                    .identity()
                    .role(ColumnRole::RowId),
            );
        }

        let mut pending: Vec<(String, String)> = Vec::new();
        let in_subtable = matches!(placement, Placement::Subtable { .. });
        for p in model.properties.iter().filter(|p| !skip.contains(&p.name.as_str())) {
            self.add_property(model, &mut table, p, &[], "", false, in_subtable, &mut pending)?;
        }

        // Trailing synthetic columns.
        if let Placement::Root = placement {
            if model.site_scoped {
                table.site_scoped = true;
                table.columns.push(
                    ColumnDescriptor::new(SITE_COLUMN, ColumnType::text(Some(SITE_LENGTH)))
                        .role(ColumnRole::Site),
                );
            }
            if model.inheritance == Inheritance::Base {
                table.type_descriptor = true;
                for (column, role) in [
                    (DERIVED_TABLE_COLUMN, ColumnRole::DerivedTable),
                    (DERIVED_TYPE_COLUMN, ColumnRole::DerivedType),
                    (DERIVED_MODULE_COLUMN, ColumnRole::DerivedModule),
                ] {
                    table.columns.push(
                        ColumnDescriptor::new(column, ColumnType::text(Some(DESCRIPTOR_LENGTH)))
                            .nullable()
                            .role(role),
                    );
                }
            }
        }
        if let Placement::Subtable { parent, link } = &placement {
            table.columns.push(
                ColumnDescriptor::new(PARENT_COLUMN, link.column_type).role(ColumnRole::Parent),
            );
            table.link = Some(SubtableLink {
                parent_table: parent.to_string(),
                parent_column: link.name.clone(),
            });
        }

        self.add_keys(model, &mut table, &placement)?;

        // Subtables last: they link to this table's final key.
        for (property, element_key) in pending {
            let sub_name = format!("{}_{}", table.name, property);
            let link = table
                .link_target()
                .cloned()
                .ok_or_else(|| ConfigError::SubtableNeedsKey {
                    table: sub_name.clone(),
                })?;
            let element = self.inspector.describe(&element_key)?;
            let sub = self.build_table(&element, &sub_name, Placement::Subtable {
                parent: &table.name,
                link: &link,
            })?;
            table.subtables.push(Subtable {
                property,
                table: sub,
            });
        }

        debug!(
            table = %table.name,
            columns = table.columns.len(),
            subtables = table.subtables.len(),
            "Built table schema"
        );
        Ok(table)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_property(
        &self,
        model: &ModelType,
        table: &mut TableSchema,
        p: &PropertyDescriptor,
        parent_path: &[String],
        prefix: &str,
        optional: bool,
        in_subtable: bool,
        pending: &mut Vec<(String, String)>,
    ) -> Result<()> {
        if !p.persisted {
            return Ok(());
        }
        let mut path = parent_path.to_vec();
        path.push(p.name.clone());
        let column = format!("{}{}", prefix, p.column);
        let nullable = p.nullable || optional;

        match p.kind {
            PropertyKind::Identity => {
                if in_subtable || !prefix.is_empty() {
                    return Err(ConfigError::invalid_identity(
                        &model.key,
                        &p.name,
                        "identity is only allowed on a top-level persisted type",
                    )
                    .into());
                }
                table.columns.push(
                    ColumnDescriptor::new(&column, ColumnType::Int32)
                        .identity()
                        .role(ColumnRole::Property {
                            path,
                            value_type: ValueType::Int32,
                        }),
                );
            }
            PropertyKind::MultiLanguageText => {
                let max_length = p
                    .max_length
                    .ok_or_else(|| ConfigError::missing_max_length(&model.key, &p.name))?;
                for language in self.languages.iter() {
                    let name = LanguageSet::column_name(&column, language);
                    table.columns.push(
                        ColumnDescriptor::new(&name, ColumnType::text(Some(max_length)))
                            .nullable()
                            .role(ColumnRole::Language {
                                path: path.clone(),
                                language: language.to_string(),
                            }),
                    );
                    if p.indexed || p.unique {
                        let cols = vec![name];
                        table.indexes.push(IndexDescriptor::new(
                            index_name(&table.name, &cols, p.unique),
                            cols,
                            if p.unique { IndexKind::UniqueKey } else { IndexKind::NonUnique },
                        ));
                    }
                }
            }
            PropertyKind::Collection => {
                let element = p
                    .value_type
                    .model_key()
                    .ok_or_else(|| ConfigError::unsupported(&model.key, &p.name, p.value_type.runtime_name()))?;
                if !prefix.is_empty() {
                    return Err(ConfigError::unsupported(
                        &model.key,
                        &p.name,
                        format!("collection of {} inside a nested object", element),
                    )
                    .into());
                }
                pending.push((p.name.clone(), element.to_string()));
            }
            PropertyKind::Nested => {
                let nested_key = p
                    .value_type
                    .model_key()
                    .ok_or_else(|| ConfigError::unsupported(&model.key, &p.name, p.value_type.runtime_name()))?;
                let nested = self.inspector.describe(nested_key)?;
                let nested_prefix = format!("{}_", column);
                table.nested.push(NestedGroup {
                    path: path.clone(),
                    type_key: nested.key.clone(),
                    prefix: nested_prefix.clone(),
                    nullable: p.nullable,
                });
                for inner in &nested.properties {
                    // Keys of a nested type are plain values of the owner.
                    let mut inner = inner.clone();
                    if inner.kind.is_key() {
                        inner.kind = PropertyKind::Scalar;
                    }
                    self.add_property(
                        &nested,
                        table,
                        &inner,
                        &path,
                        &nested_prefix,
                        nullable,
                        in_subtable,
                        pending,
                    )?;
                }
            }
            PropertyKind::Computed => {
                if let Some(expr) = &p.computed_expr {
                    table.computed.push(ComputedColumn {
                        name: column,
                        path,
                        value_type: p.value_type.clone(),
                        expr: expr.clone(),
                    });
                }
            }
            PropertyKind::Binary => {
                let value_type = match p.value_type {
                    ValueType::Bytes => ValueType::Bytes,
                    ValueType::Model(_) => {
                        return Err(ConfigError::unsupported(
                            &model.key,
                            &p.name,
                            p.value_type.runtime_name(),
                        )
                        .into())
                    }
                    _ => ValueType::Serialized,
                };
                table.columns.push(
                    ColumnDescriptor::new(&column, ColumnType::VarBinary)
                        .with_nullable(nullable)
                        .migration_default(p.migration_default.clone())
                        .role(ColumnRole::Property { path, value_type }),
                );
            }
            PropertyKind::Scalar | PropertyKind::PrimaryKey | PropertyKind::SecondaryKey => {
                if p.value_type == ValueType::Text && p.max_length.is_none() {
                    return Err(ConfigError::missing_max_length(&model.key, &p.name).into());
                }
                let column_type = p.value_type.column_type(p.max_length).ok_or_else(|| {
                    ConfigError::unsupported(&model.key, &p.name, p.value_type.runtime_name())
                })?;
                let is_key = p.kind.is_key() && prefix.is_empty();
                table.columns.push(
                    ColumnDescriptor::new(&column, column_type)
                        .with_nullable(nullable && !is_key)
                        .migration_default(p.migration_default.clone())
                        .role(ColumnRole::Property {
                            path,
                            value_type: p.value_type.clone(),
                        }),
                );
                if (p.indexed || p.unique) && !is_key {
                    let cols = vec![column];
                    table.indexes.push(IndexDescriptor::new(
                        index_name(&table.name, &cols, p.unique),
                        cols,
                        if p.unique { IndexKind::UniqueKey } else { IndexKind::NonUnique },
                    ));
                }
            }
        }
        Ok(())
    }

    fn add_keys(&self, model: &ModelType, table: &mut TableSchema, placement: &Placement<'_>) -> Result<()> {
        let key_columns: Vec<String> = model
            .key_properties()
            .iter()
            .map(|p| p.column.clone())
            .collect();

        match placement {
            Placement::Root => {
                let identity = table.identity().map(|c| c.name.clone());
                let mut pk = key_columns;
                let identity_is_key = pk.is_empty() && identity.is_some();
                if pk.is_empty() {
                    match &identity {
                        Some(id) => pk.push(id.clone()),
                        None => {
                            return Err(ConfigError::MissingPrimaryKey {
                                type_name: model.key.clone(),
                            }
                            .into())
                        }
                    }
                }
                if table.site_scoped {
                    pk.push(SITE_COLUMN.to_string());
                }
                table.indexes.insert(
                    0,
                    IndexDescriptor::new(primary_key_name(&table.name), pk, IndexKind::PrimaryKey),
                );
                if let (Some(id), false) = (identity, identity_is_key && !table.site_scoped) {
                    let cols = vec![id];
                    table.indexes.insert(
                        1,
                        IndexDescriptor::new(index_name(&table.name, &cols, true), cols, IndexKind::UniqueKey),
                    );
                }
            }
            Placement::Derived { base, base_type } => {
                let pk: Vec<String> = base.key_columns().iter().map(|c| c.name.clone()).collect();
                table.indexes.insert(
                    0,
                    IndexDescriptor::new(primary_key_name(&table.name), pk.clone(), IndexKind::PrimaryKey),
                );
                table.foreign_keys.push(ForeignKeyDescriptor {
                    name: foreign_key_name(&table.name, &base.name),
                    columns: pk.clone(),
                    referenced_table: base.name.clone(),
                    referenced_columns: pk.clone(),
                    cascade_delete: true,
                    cascade_update: true,
                });
                table.derived = Some(DerivedLink {
                    base_table: base.name.clone(),
                    base_type: base_type.key.clone(),
                    key_columns: pk,
                });
            }
            Placement::Subtable { parent, link } => {
                table.indexes.insert(
                    0,
                    IndexDescriptor::new(
                        primary_key_name(&table.name),
                        vec![ROW_ID_COLUMN.to_string()],
                        IndexKind::PrimaryKey,
                    ),
                );
                if !key_columns.is_empty() {
                    let mut cols = key_columns;
                    cols.push(PARENT_COLUMN.to_string());
                    table.indexes.push(IndexDescriptor::new(
                        index_name(&table.name, &cols, true),
                        cols,
                        IndexKind::UniqueKey,
                    ));
                }
                let parent_cols = vec![PARENT_COLUMN.to_string()];
                table.indexes.push(IndexDescriptor::new(
                    index_name(&table.name, &parent_cols, false),
                    parent_cols,
                    IndexKind::NonUnique,
                ));
                table.foreign_keys.push(ForeignKeyDescriptor {
                    name: foreign_key_name(&table.name, parent),
                    columns: vec![PARENT_COLUMN.to_string()],
                    referenced_table: parent.to_string(),
                    referenced_columns: vec![link.name.clone()],
                    cascade_delete: true,
                    cascade_update: !link.is_identity(),
                });
            }
        }
        Ok(())
    }
}
