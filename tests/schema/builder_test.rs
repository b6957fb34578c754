// tests/schema/builder_test.rs
use std::sync::Arc;

use relmap::error::{ConfigError, Error};
use relmap::metadata::{parse_descriptors, Inspector, ModelType, PropertyDescriptor, StaticSource, ValueType};
use relmap::schema::{IndexKind, LanguageSet, SchemaBuilder, TableSchema, PARENT_COLUMN, ROW_ID_COLUMN, SITE_COLUMN};

const SHOP: &str = r#"
[[types]]
module = "Shop"
name = "Address"

[[types.properties]]
name = "Street"
type = "text"
max_length = 60
nullable = true

[[types.properties]]
name = "City"
type = "text"
max_length = 40

[[types]]
module = "Shop"
name = "Serial"

[[types.properties]]
name = "Number"
type = "text"
max_length = 30

[[types]]
module = "Shop"
name = "Line"

[[types.properties]]
name = "Sku"
kind = "primary_key"
type = "text"
max_length = 20

[[types.properties]]
name = "Qty"
type = "int32"

[[types.properties]]
name = "Serials"
kind = "collection"
model = "Shop.Serial"

[[types]]
module = "Shop"
name = "Order"
dataset = "Orders"
site_scoped = true

[[types.properties]]
name = "Id"
kind = "identity"
type = "int32"

[[types.properties]]
name = "Number"
kind = "primary_key"
type = "text"
max_length = 20

[[types.properties]]
name = "Title"
kind = "multi_language_text"
type = "text"
max_length = 100

[[types.properties]]
name = "Total"
type = "decimal"
precision = 12
scale = 2

[[types.properties]]
name = "Ship"
kind = "nested"
model = "Shop.Address"
nullable = true

[[types.properties]]
name = "Lines"
kind = "collection"
model = "Shop.Line"

[[types.properties]]
name = "Placed"
type = "datetime"
nullable = true
indexed = true
"#;

const ZOO: &str = r#"
[[types]]
module = "Zoo"
name = "Animal"
dataset = "Animals"
inheritance = "base"

[[types.properties]]
name = "Id"
kind = "identity"
type = "int32"

[[types.properties]]
name = "Name"
type = "text"
max_length = 50

[[types]]
module = "Zoo"
name = "Dog"
dataset = "Dogs"
base = "Zoo.Animal"

[[types.properties]]
name = "Breed"
type = "text"
max_length = 30
"#;

fn build(source: &str, key: &str) -> Vec<TableSchema> {
    let inspector = Inspector::new(Arc::new(parse_descriptors(source).unwrap()));
    let languages = LanguageSet::new(["en", "fr"]).unwrap();
    let model = inspector.describe(key).unwrap();
    SchemaBuilder::new(&inspector, &languages, "sales")
        .build_all(&model)
        .unwrap()
}

fn build_err(types: Vec<ModelType>, key: &str) -> Error {
    let inspector = Inspector::new(Arc::new(StaticSource::new(types)));
    let languages = LanguageSet::new(["en"]).unwrap();
    let model = match inspector.describe(key) {
        Ok(model) => model,
        Err(e) => return e.into(),
    };
    SchemaBuilder::new(&inspector, &languages, "dbo")
        .build_all(&model)
        .unwrap_err()
}

fn column_names(table: &TableSchema) -> Vec<&str> {
    table.columns.iter().map(|c| c.name.as_str()).collect()
}

#[test]
fn test_root_table_columns() {
    let tables = build(SHOP, "Shop.Order");
    assert_eq!(tables.len(), 1);
    let orders = &tables[0];
    assert_eq!(orders.qualified_name(), "sales.Orders");
    assert_eq!(
        column_names(orders),
        vec![
            "Id",
            "Number",
            "Title_en",
            "Title_fr",
            "Total",
            "Ship_Street",
            "Ship_City",
            "Placed",
            SITE_COLUMN,
        ]
    );
    assert!(orders.site_scoped);
    assert!(!orders.type_descriptor);
}

#[test]
fn test_optional_nested_object_makes_its_columns_nullable() {
    let orders = &build(SHOP, "Shop.Order")[0];
    assert!(orders.column("Ship_City").unwrap().nullable);
    assert!(orders.column("Ship_Street").unwrap().nullable);
    assert!(orders.column("Title_en").unwrap().nullable);
    assert!(!orders.column("Number").unwrap().nullable);
    assert_eq!(orders.nested.len(), 1);
    assert_eq!(orders.nested[0].prefix, "Ship_");
}

#[test]
fn test_root_keys_and_indexes() {
    let orders = &build(SHOP, "Shop.Order")[0];
    let pk = orders.primary_key().unwrap();
    assert_eq!(pk.name, "PK_Orders");
    assert_eq!(pk.columns, vec!["Number", SITE_COLUMN]);

    let identity = orders.index("UX_Orders_Id").unwrap();
    assert_eq!(identity.kind, IndexKind::UniqueKey);
    assert_eq!(identity.columns, vec!["Id"]);

    let placed = orders.index("IX_Orders_Placed").unwrap();
    assert_eq!(placed.kind, IndexKind::NonUnique);
    assert_eq!(orders.link_target().unwrap().name, "Id");
}

#[test]
fn test_subtables_link_to_parent_identity() {
    let orders = &build(SHOP, "Shop.Order")[0];
    let lines = &orders.subtable("Lines").unwrap().table;
    assert_eq!(lines.name, "Orders_Lines");
    assert_eq!(column_names(lines), vec![ROW_ID_COLUMN, "Sku", "Qty", PARENT_COLUMN]);
    assert_eq!(lines.primary_key().unwrap().columns, vec![ROW_ID_COLUMN]);
    assert!(lines.index("UX_Orders_Lines_Sku___Parent").is_some());
    assert!(lines.index("IX_Orders_Lines___Parent").is_some());

    let fk = &lines.foreign_keys[0];
    assert_eq!(fk.name, "FK_Orders_Lines_Orders");
    assert_eq!(fk.columns, vec![PARENT_COLUMN]);
    assert_eq!(fk.referenced_table, "Orders");
    assert_eq!(fk.referenced_columns, vec!["Id"]);
    assert!(fk.cascade_delete);
    assert!(!fk.cascade_update);

    let link = lines.link.as_ref().unwrap();
    assert_eq!(link.parent_table, "Orders");
    assert_eq!(link.parent_column, "Id");
}

#[test]
fn test_nested_subtables_link_to_row_id() {
    let orders = &build(SHOP, "Shop.Order")[0];
    let lines = &orders.subtable("Lines").unwrap().table;
    let serials = &lines.subtable("Serials").unwrap().table;
    assert_eq!(serials.name, "Orders_Lines_Serials");
    assert_eq!(serials.link.as_ref().unwrap().parent_column, ROW_ID_COLUMN);
    assert_eq!(serials.foreign_keys[0].referenced_columns, vec![ROW_ID_COLUMN]);
    // No key properties: only the parent index.
    assert!(serials
        .indexes
        .iter()
        .all(|i| i.kind != IndexKind::UniqueKey));

    let walked: Vec<&str> = orders.walk().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(walked, vec!["Orders", "Orders_Lines", "Orders_Lines_Serials"]);
}

#[test]
fn test_base_table_carries_type_descriptor() {
    let tables = build(ZOO, "Zoo.Animal");
    assert_eq!(tables.len(), 1);
    let animals = &tables[0];
    assert!(animals.type_descriptor);
    assert_eq!(
        column_names(animals),
        vec!["Id", "Name", "__DerivedTable", "__DerivedType", "__DerivedModule"]
    );
    assert_eq!(animals.primary_key().unwrap().columns, vec!["Id"]);
    // The identity is the key: no extra unique index.
    assert_eq!(animals.indexes.len(), 1);
}

#[test]
fn test_derived_table_shares_base_key() {
    let tables = build(ZOO, "Zoo.Dog");
    let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Animals", "Dogs"]);

    let dogs = &tables[1];
    assert_eq!(column_names(dogs), vec!["Id", "Breed"]);
    assert!(dogs.identity().is_none());
    assert_eq!(dogs.primary_key().unwrap().columns, vec!["Id"]);

    let fk = &dogs.foreign_keys[0];
    assert_eq!(fk.name, "FK_Dogs_Animals");
    assert!(fk.cascade_delete && fk.cascade_update);

    let derived = dogs.derived.as_ref().unwrap();
    assert_eq!(derived.base_table, "Animals");
    assert_eq!(derived.base_type, "Zoo.Animal");

    let view = TableSchema::merged_view(&tables[0], dogs);
    assert_eq!(view.type_key, "Zoo.Dog");
    assert!(view.has_column("Breed") && view.has_column("__DerivedType"));
}

#[test]
fn test_text_without_max_length_is_rejected() {
    let err = build_err(
        vec![ModelType::new("M", "A", "As")
            .property(PropertyDescriptor::identity("Id"))
            .property(PropertyDescriptor::scalar("Note", ValueType::Text))],
        "M.A",
    );
    assert!(matches!(
        err,
        Error::Config(ConfigError::MissingMaxLength { ref property, .. }) if property == "Note"
    ));
}

#[test]
fn test_type_without_key_is_rejected() {
    let err = build_err(
        vec![ModelType::new("M", "A", "As").property(PropertyDescriptor::text("Note", 10))],
        "M.A",
    );
    assert!(matches!(err, Error::Config(ConfigError::MissingPrimaryKey { .. })));
}

#[test]
fn test_subtable_needs_a_single_link_column() {
    let err = build_err(
        vec![
            ModelType::new("M", "Item", "Items").property(PropertyDescriptor::text("Label", 10)),
            ModelType::new("M", "A", "As")
                .property(PropertyDescriptor::primary_key("K1", ValueType::Int32))
                .property(PropertyDescriptor::primary_key("K2", ValueType::Int32))
                .property(PropertyDescriptor::collection("Items", "M.Item")),
        ],
        "M.A",
    );
    assert!(matches!(err, Error::Config(ConfigError::SubtableNeedsKey { .. })));
}

#[test]
fn test_site_scoped_collections_link_through_identity() {
    let item = ModelType::new("M", "Item", "Items").property(PropertyDescriptor::text("Label", 10));
    let keyed = ModelType::new("M", "A", "As")
        .property(PropertyDescriptor::primary_key("Code", ValueType::Int32))
        .property(PropertyDescriptor::collection("Items", "M.Item"))
        .site_scoped();
    let err = build_err(vec![item.clone(), keyed.clone()], "M.A");
    assert!(matches!(err, Error::Config(ConfigError::SubtableNeedsKey { .. })));

    let inspector = Inspector::new(Arc::new(StaticSource::new(vec![
        item,
        keyed.property(PropertyDescriptor::identity("Id")),
    ])));
    let languages = LanguageSet::new(["en"]).unwrap();
    let model = inspector.describe("M.A").unwrap();
    let tables = SchemaBuilder::new(&inspector, &languages, "dbo")
        .build_all(&model)
        .unwrap();
    let link = tables[0].subtables[0].table.link.as_ref().unwrap();
    assert_eq!(link.parent_column, "Id");
}

#[test]
fn test_identity_inside_subtable_is_rejected() {
    let err = build_err(
        vec![
            ModelType::new("M", "Item", "Items").property(PropertyDescriptor::identity("Id")),
            ModelType::new("M", "A", "As")
                .property(PropertyDescriptor::identity("Id"))
                .property(PropertyDescriptor::collection("Items", "M.Item")),
        ],
        "M.A",
    );
    assert!(matches!(err, Error::Config(ConfigError::InvalidIdentity { .. })));
}

#[test]
fn test_unknown_element_type_is_rejected() {
    let err = build_err(
        vec![ModelType::new("M", "A", "As")
            .property(PropertyDescriptor::identity("Id"))
            .property(PropertyDescriptor::collection("Items", "M.Missing"))],
        "M.A",
    );
    assert!(matches!(err, Error::Config(ConfigError::UnknownType(ref k)) if k == "M.Missing"));
}
