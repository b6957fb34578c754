//! Relational schema descriptions.
//!
//! A [`TableSchema`] is produced two ways: the schema builder derives the
//! desired one from model metadata, and the introspector reads the live one
//! from the catalog. Desired schemas additionally record how every column maps
//! back onto the model ([`ColumnRole`]), which drives statement generation and
//! the object mapper.

use serde::{Deserialize, Serialize};

use crate::metadata::descriptor::{DefaultValue, ValueType};
use crate::sql::ddl::{
    AlterAction, AlterTable, ColumnDef, CreateIndex, CreateTable, DdlStatement, DropIndex,
    ReferentialAction, TableConstraint,
};
use crate::sql::expr::Expr;
use crate::sql::types::ColumnType;

/// Site (tenant) column carried by site-scoped tables.
pub const SITE_COLUMN: &str = "__Site";
/// Link column of a subtable row to its parent.
pub const PARENT_COLUMN: &str = "__Parent";
/// Identity column of a subtable.
pub const ROW_ID_COLUMN: &str = "__RowId";
/// Derived-type descriptor columns of a base table.
pub const DERIVED_TABLE_COLUMN: &str = "__DerivedTable";
pub const DERIVED_TYPE_COLUMN: &str = "__DerivedType";
pub const DERIVED_MODULE_COLUMN: &str = "__DerivedModule";

pub const SITE_LENGTH: u32 = 100;
pub const DESCRIPTOR_LENGTH: u32 = 256;

/// How a column maps back onto the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnRole {
    /// A property value; `path` runs from the root type through nested objects.
    Property {
        path: Vec<String>,
        value_type: ValueType,
    },
    /// One language of a multi-language text property.
    Language { path: Vec<String>, language: String },
    Site,
    DerivedTable,
    DerivedType,
    DerivedModule,
    Parent,
    RowId,
    /// Read from the catalog; no model mapping.
    Live,
}

/// A column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Identity seed and increment.
    pub identity: Option<(i64, i64)>,
    /// Value given to existing rows when the column is added or made NOT NULL.
    pub migration_default: Option<DefaultValue>,
    pub role: ColumnRole,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            identity: None,
            migration_default: None,
            role: ColumnRole::Live,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn identity(mut self) -> Self {
        self.identity = Some((1, 1));
        self
    }

    pub fn role(mut self, role: ColumnRole) -> Self {
        self.role = role;
        self
    }

    pub fn migration_default(mut self, value: Option<DefaultValue>) -> Self {
        self.migration_default = value;
        self
    }

    pub fn is_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// Written by INSERT: everything the database does not assign.
    pub fn is_insertable(&self) -> bool {
        !self.is_identity()
    }

    /// Same physical definition (type, nullability, identity).
    pub fn same_definition(&self, other: &ColumnDescriptor) -> bool {
        self.column_type == other.column_type
            && self.nullable == other.nullable
            && self.identity.is_some() == other.identity.is_some()
    }

    /// Column definition for CREATE TABLE / ALTER TABLE.
    pub fn to_column_def(&self) -> ColumnDef {
        let mut def = ColumnDef::new(&self.name, self.column_type).with_nullable(self.nullable);
        if let Some((seed, increment)) = self.identity {
            def = def.identity_with(seed, increment);
        }
        def
    }

    /// Property path for property and language columns.
    pub fn path(&self) -> Option<&[String]> {
        match &self.role {
            ColumnRole::Property { path, .. } | ColumnRole::Language { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Kind of index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    PrimaryKey,
    UniqueKey,
    NonUnique,
}

/// A primary key or index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub kind: IndexKind,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>, columns: Vec<String>, kind: IndexKind) -> Self {
        Self {
            name: name.into(),
            columns,
            kind,
        }
    }

    /// Same definition, ignoring column-name case.
    pub fn same_definition(&self, other: &IndexDescriptor) -> bool {
        self.kind == other.kind
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    pub fn touches(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    /// Statement creating the index (or adding the primary key).
    pub fn create_ddl(&self, schema: &str, table: &str) -> DdlStatement {
        match self.kind {
            IndexKind::PrimaryKey => AlterTable::new(
                table,
                AlterAction::AddConstraint(TableConstraint::primary_key(
                    &self.name,
                    self.columns.clone(),
                )),
            )
            .schema(schema)
            .into(),
            IndexKind::UniqueKey => CreateIndex::new(&self.name, table)
                .schema(schema)
                .unique()
                .columns(self.columns.clone())
                .into(),
            IndexKind::NonUnique => CreateIndex::new(&self.name, table)
                .schema(schema)
                .columns(self.columns.clone())
                .into(),
        }
    }

    pub fn drop_ddl(&self, schema: &str, table: &str) -> DdlStatement {
        match self.kind {
            IndexKind::PrimaryKey => AlterTable::new(
                table,
                AlterAction::DropConstraint {
                    name: self.name.clone(),
                },
            )
            .schema(schema)
            .into(),
            _ => DropIndex::new(&self.name, table).schema(schema).into(),
        }
    }
}

/// A foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub cascade_delete: bool,
    pub cascade_update: bool,
}

impl ForeignKeyDescriptor {
    pub fn same_definition(&self, other: &ForeignKeyDescriptor) -> bool {
        let same = |a: &[String], b: &[String]| {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
        };
        same(&self.columns, &other.columns)
            && self.referenced_table.eq_ignore_ascii_case(&other.referenced_table)
            && same(&self.referenced_columns, &other.referenced_columns)
            && self.cascade_delete == other.cascade_delete
            && self.cascade_update == other.cascade_update
    }

    pub fn touches(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    pub fn to_constraint(&self, schema: &str) -> TableConstraint {
        let action = |cascade: bool| {
            if cascade {
                ReferentialAction::Cascade
            } else {
                ReferentialAction::NoAction
            }
        };
        TableConstraint::ForeignKey {
            name: self.name.clone(),
            columns: self.columns.clone(),
            references_schema: Some(schema.to_string()),
            references_table: self.referenced_table.clone(),
            references_columns: self.referenced_columns.clone(),
            on_delete: action(self.cascade_delete),
            on_update: action(self.cascade_update),
        }
    }

    pub fn create_ddl(&self, schema: &str, table: &str) -> DdlStatement {
        AlterTable::new(table, AlterAction::AddConstraint(self.to_constraint(schema)))
            .schema(schema)
            .into()
    }

    pub fn drop_ddl(&self, schema: &str, table: &str) -> DdlStatement {
        AlterTable::new(
            table,
            AlterAction::DropConstraint {
                name: self.name.clone(),
            },
        )
        .schema(schema)
        .into()
    }
}

/// A computed property read through an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedColumn {
    pub name: String,
    pub path: Vec<String>,
    pub value_type: ValueType,
    pub expr: String,
}

impl ComputedColumn {
    pub fn expr(&self) -> Expr {
        Expr::Paren(Box::new(Expr::Raw(self.expr.clone())))
    }
}

/// A nested object flattened into prefixed columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedGroup {
    pub path: Vec<String>,
    pub type_key: String,
    /// Column-name prefix shared by the group's columns.
    pub prefix: String,
    pub nullable: bool,
}

/// A collection property stored in its own table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtable {
    /// Collection property on the parent.
    pub property: String,
    pub table: TableSchema,
}

/// Link of a subtable to its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtableLink {
    pub parent_table: String,
    pub parent_column: String,
}

/// Link of a derived table to its base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedLink {
    pub base_table: String,
    pub base_type: String,
    pub key_columns: Vec<String>,
}

/// A table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Model type the table stores; empty for live schemas.
    pub type_key: String,
    /// Schema (owner) name.
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
    pub site_scoped: bool,
    /// Base table of a derived-type split: carries the descriptor columns.
    pub type_descriptor: bool,
    pub derived: Option<DerivedLink>,
    pub link: Option<SubtableLink>,
    pub subtables: Vec<Subtable>,
    pub nested: Vec<NestedGroup>,
    pub computed: Vec<ComputedColumn>,
}

impl TableSchema {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_key: String::new(),
            schema: schema.into(),
            name: name.into(),
            columns: vec![],
            indexes: vec![],
            foreign_keys: vec![],
            site_scoped: false,
            type_descriptor: false,
            derived: None,
            link: None,
            subtables: vec![],
            nested: vec![],
            computed: vec![],
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn index(&self, name: &str) -> Option<&IndexDescriptor> {
        self.indexes
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_key(&self) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|i| i.kind == IndexKind::PrimaryKey)
    }

    /// Primary key columns, in key order.
    pub fn key_columns(&self) -> Vec<&ColumnDescriptor> {
        self.primary_key()
            .map(|pk| pk.columns.iter().filter_map(|c| self.column(c)).collect())
            .unwrap_or_default()
    }

    /// Primary key columns bound from a record (the site column is bound
    /// from the engine settings instead).
    pub fn record_key_columns(&self) -> Vec<&ColumnDescriptor> {
        self.key_columns()
            .into_iter()
            .filter(|c| c.role != ColumnRole::Site)
            .collect()
    }

    pub fn identity(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.is_identity())
    }

    /// The column subtables link to: the identity, else a single-column
    /// primary key.
    pub fn link_target(&self) -> Option<&ColumnDescriptor> {
        if let Some(identity) = self.identity() {
            return Some(identity);
        }
        match self.key_columns().as_slice() {
            [single] => Some(single),
            _ => None,
        }
    }

    /// Column holding the given property path, for scalar properties.
    pub fn property_column(&self, path: &[&str]) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| match &c.role {
            ColumnRole::Property { path: p, .. } => {
                p.len() == path.len() && p.iter().zip(path).all(|(a, b)| a == b)
            }
            _ => false,
        })
    }

    /// Columns written by INSERT, in table order.
    pub fn insert_columns(&self) -> Vec<&ColumnDescriptor> {
        self.columns.iter().filter(|c| c.is_insertable()).collect()
    }

    /// Subtable for a collection property.
    pub fn subtable(&self, property: &str) -> Option<&Subtable> {
        self.subtables.iter().find(|s| s.property == property)
    }

    /// This table and all subtables, parents before children.
    pub fn walk(&self) -> Vec<&TableSchema> {
        let mut out = vec![self];
        for sub in &self.subtables {
            out.extend(sub.table.walk());
        }
        out
    }

    /// `[schema].[name]` for messages.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// CREATE TABLE with columns and the primary key; other indexes and
    /// foreign keys are created separately.
    pub fn create_ddl(&self) -> CreateTable {
        let mut create = CreateTable::new(&self.name)
            .schema(&self.schema)
            .columns(self.columns.iter().map(ColumnDescriptor::to_column_def));
        if let Some(pk) = self.primary_key() {
            create = create.constraint(TableConstraint::primary_key(&pk.name, pk.columns.clone()));
        }
        create
    }

    /// Read shape of a derived type: base columns followed by the derived
    /// table's own columns, with the base's key and the derived subtables.
    pub fn merged_view(base: &TableSchema, derived: &TableSchema) -> TableSchema {
        let mut view = base.clone();
        view.type_key = derived.type_key.clone();
        view.derived = derived.derived.clone();
        for column in &derived.columns {
            if !view.has_column(&column.name) {
                view.columns.push(column.clone());
            }
        }
        view.nested.extend(derived.nested.iter().cloned());
        view.computed.extend(derived.computed.iter().cloned());
        view.subtables.extend(derived.subtables.iter().cloned());
        view
    }
}
