// tests/statement/statement_test.rs
use std::sync::Arc;

use relmap::mapper::{Params, Record, Value};
use relmap::metadata::{parse_descriptors, Inspector};
use relmap::schema::{LanguageSet, SchemaBuilder, TableSchema};
use relmap::sql::Dialect;
use relmap::statement::crud::{self, Synthetic, ORIGINAL_PREFIX};
use relmap::statement::derived::{descriptor_lookup, joined_get};
use relmap::statement::procedure::{self, ProcedureKind};
use relmap::statement::{plan_select, KeyKind, QuerySpec};
use sqlparser::dialect::MsSqlDialect;
use sqlparser::parser::Parser;

const MODEL: &str = r#"
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
name = "Lines"
kind = "collection"
model = "Shop.Line"

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

[[types]]
module = "Zoo"
name = "Cat"
dataset = "Cats"
base = "Zoo.Animal"
"#;

fn tables(key: &str) -> Vec<TableSchema> {
    let inspector = Inspector::new(Arc::new(parse_descriptors(MODEL).unwrap()));
    let languages = LanguageSet::new(["en", "fr"]).unwrap();
    let model = inspector.describe(key).unwrap();
    SchemaBuilder::new(&inspector, &languages, "sales")
        .build_all(&model)
        .unwrap()
}

fn orders() -> TableSchema {
    tables("Shop.Order").remove(0)
}

fn assert_parses(sql: &str) {
    if let Err(e) = Parser::parse_sql(&MsSqlDialect {}, sql) {
        panic!("invalid T-SQL: {}\n{}", e, sql);
    }
}

#[test]
fn test_get_addresses_key_and_site() {
    let sql = crud::get(&orders(), KeyKind::Key).unwrap().to_sql(Dialect::TSql);
    assert!(sql.starts_with("SELECT TOP (1)"));
    assert!(sql.contains("[Title_en],\n    [Title_fr]"));
    assert!(sql.contains("FROM [sales].[Orders]"));
    assert!(sql.ends_with("WHERE [Number] = @Number AND [__Site] = @__Site"));
    assert_parses(&sql);

    let by_identity = crud::get(&orders(), KeyKind::Identity).unwrap().to_sql(Dialect::TSql);
    assert!(by_identity.ends_with("WHERE [Id] = @Id AND [__Site] = @__Site"));
    assert_parses(&by_identity);
}

#[test]
fn test_insert_skips_identity_and_outputs_it() {
    let sql = crud::insert(&orders()).to_sql(Dialect::TSql);
    assert!(sql.starts_with(
        "INSERT INTO [sales].[Orders] ([Number], [Title_en], [Title_fr], [__Site])"
    ));
    assert!(sql.contains("OUTPUT INSERTED.[Id]"));
    assert!(sql.contains("VALUES (@Number, @Title_en, @Title_fr, @__Site)"));
}

#[test]
fn test_update_keeps_site_and_uses_original_key() {
    let sql = crud::update(&orders(), KeyKind::Key).unwrap().to_sql(Dialect::TSql);
    assert!(sql.contains("SET [Number] = @Number, [Title_en] = @Title_en, [Title_fr] = @Title_fr"));
    assert!(!sql.contains("[__Site] = @__Site,"));
    assert!(sql.ends_with("WHERE [Number] = @Original_Number AND [__Site] = @__Site"));
}

#[test]
fn test_delete_by_identity() {
    let sql = crud::delete(&orders(), KeyKind::Identity).unwrap().to_sql(Dialect::TSql);
    assert_eq!(
        sql,
        "DELETE FROM [sales].[Orders]\nWHERE [Id] = @Id AND [__Site] = @__Site"
    );
    assert_parses(&sql);
}

#[test]
fn test_children_are_read_in_batches() {
    let orders = orders();
    let lines = &orders.subtable("Lines").unwrap().table;
    let sql = crud::select_children(lines, 3).to_sql(Dialect::TSql);
    assert!(sql.contains("WHERE [__Parent] IN (@__Parent0, @__Parent1, @__Parent2)"));
    assert!(sql.ends_with("ORDER BY [__RowId] ASC"));
    assert_parses(&sql);

    let mut params = Params::new();
    crud::bind_parents(&[Value::Int32(7), Value::Int32(9)], &mut params);
    assert_eq!(params.get("__Parent1"), Some(&Value::Int32(9)));
}

#[test]
fn test_bind_row_fills_synthetic_columns() {
    let orders = orders();
    let record = Record::new("Shop.Order")
        .with("Number", "A-1")
        .with_languages("Title", [("en", "Chair"), ("fr", " ")]);
    let mut params = Params::new();
    crud::bind_row(&orders, &record, &Synthetic::site(Some("north")), &mut params).unwrap();
    crud::bind_address(&orders, KeyKind::Key, &record, Some("north"), ORIGINAL_PREFIX, &mut params).unwrap();

    assert_eq!(params.get("Title_en"), Some(&Value::from("Chair")));
    assert_eq!(params.get("Title_fr"), Some(&Value::Null));
    assert_eq!(params.get("__Site"), Some(&Value::from("north")));
    assert_eq!(params.get("Original_Number"), Some(&Value::from("A-1")));
    assert!(params.get("Id").is_none());
}

#[test]
fn test_base_insert_writes_descriptor_but_update_does_not() {
    let tables = tables("Zoo.Dog");
    let animals = &tables[0];
    let insert = crud::insert(animals).to_sql(Dialect::TSql);
    assert!(insert.contains("[__DerivedTable], [__DerivedType], [__DerivedModule]"));

    let update = crud::update(animals, KeyKind::Key).unwrap().to_sql(Dialect::TSql);
    assert!(!update.contains("__Derived"));
    assert!(update.contains("SET [Name] = @Name"));

    let mut synthetic = Synthetic::site(None);
    synthetic.descriptor = Some(("Dogs", "Dog", "Zoo"));
    let mut params = Params::new();
    let rex = Record::new("Zoo.Dog").with("Name", "Rex");
    crud::bind_row(animals, &rex, &synthetic, &mut params).unwrap();
    assert_eq!(params.get("__DerivedTable"), Some(&Value::from("Dogs")));
    assert_eq!(params.get("__DerivedModule"), Some(&Value::from("Zoo")));
}

#[test]
fn test_derived_reads() {
    let tables = tables("Zoo.Dog");
    let (animals, dogs) = (&tables[0], &tables[1]);

    let lookup = descriptor_lookup(animals, KeyKind::Identity).unwrap().to_sql(Dialect::TSql);
    assert!(lookup.ends_with("WHERE [Id] = @Id"));
    assert_parses(&lookup);

    let joined = joined_get(animals, dogs, KeyKind::Identity).unwrap().to_sql(Dialect::TSql);
    assert!(joined.contains("INNER JOIN [sales].[Dogs] AS [d] ON [d].[Id] = [b].[Id]"));
    assert!(joined.contains("[d].[Breed]"));
    assert_parses(&joined);

    let update = crud::update_derived(dogs).unwrap().to_sql(Dialect::TSql);
    assert_eq!(update, "UPDATE [sales].[Dogs]\nSET [Breed] = @Breed\nWHERE [Id] = @Id");

    // A derived type with no properties of its own has nothing to update.
    let cats = tables_of_cat();
    assert!(crud::update_derived(&cats[1]).is_none());
}

fn tables_of_cat() -> Vec<TableSchema> {
    tables("Zoo.Cat")
}

#[test]
fn test_derived_query_joins_base() {
    let tables = tables("Zoo.Dog");
    let spec = QuerySpec::new().asc("Name").page(0, 10);
    let plan = plan_select(&tables[1], Some(&tables[0]), &[], &spec, None).unwrap();
    let page = plan.page.to_sql(Dialect::TSql);
    assert!(page.contains("FROM [sales].[Dogs] AS [t0]"));
    assert!(page.contains("INNER JOIN [sales].[Animals] AS [tb] ON [tb].[Id] = [t0].[Id]"));
    assert!(page.contains("ORDER BY [tb].[Name] ASC"));
    assert!(page.ends_with("OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"));
    assert_parses(&page);
    assert_parses(&plan.count.to_sql(Dialect::TSql));
}

#[test]
fn test_site_query_binds_site() {
    let plan = plan_select(&orders(), None, &[], &QuerySpec::new(), Some("north")).unwrap();
    let page = plan.page.to_sql(Dialect::TSql);
    assert!(page.contains("WHERE [t0].[__Site] = @__Site"));
    assert!(page.contains("ORDER BY [t0].[Number] ASC, [t0].[__Site] ASC"));
    assert_eq!(plan.params.get("__Site"), Some(&Value::from("north")));
}

#[test]
fn test_procedures_of_a_table_with_subtable() {
    let orders = orders();
    let names: Vec<String> = procedure::procedures(&orders)
        .unwrap()
        .iter()
        .map(|p| p.name.clone())
        .collect();
    assert_eq!(names.len(), ProcedureKind::ALL.len());
    assert!(names.contains(&"Orders__UpdateByIdentity".to_string()));

    let add = procedure::procedure(&orders, ProcedureKind::Add)
        .unwrap()
        .to_sql(Dialect::TSql);
    assert!(add.contains("@Lines [sales].[Orders_Lines_T] READONLY"));
    assert!(add.contains("INSERT INTO [sales].[Orders_Lines] ([Sku], [Qty], [__Parent])"));

    let table_type = procedure::table_type(&orders.subtables[0].table).to_sql(Dialect::TSql);
    assert!(table_type.starts_with("CREATE TYPE [sales].[Orders_Lines_T] AS TABLE ("));
    assert!(!table_type.contains("__Parent"));
    assert!(!table_type.contains("__RowId"));
}

#[test]
fn test_keyless_table_gets_no_identity_procedures() {
    let tables = tables("Zoo.Dog");
    let kinds = ProcedureKind::for_table(&tables[1]);
    assert_eq!(
        kinds,
        vec![ProcedureKind::Get, ProcedureKind::Add, ProcedureKind::Update, ProcedureKind::Remove]
    );
}
