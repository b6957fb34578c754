// tests/migrate/migration_test.rs
use std::sync::Arc;

use relmap::error::{ConfigError, Error};
use relmap::mapper::{Record, Value};
use relmap::metadata::{
    DefaultValue, Inspector, ModelType, PropertyDescriptor, StaticSource, ValueType,
};
use relmap::migrate::{MigrationPlan, TableState};
use relmap::provider::{DataProvider, MemoryServer, ProviderOptions};
use relmap::schema::{LanguageSet, SchemaBuilder, TableSchema};

const CONN: &str = "Server=mem;Database=Migrate";

fn provider_with(server: &MemoryServer, types: Vec<ModelType>, procedures: bool) -> DataProvider {
    let options = ProviderOptions::new(CONN, LanguageSet::new(["en", "de"]).unwrap())
        .emit_procedures(procedures);
    DataProvider::builder(options)
        .inspector(Arc::new(Inspector::new(Arc::new(StaticSource::new(types)))))
        .factory(Arc::new(server.clone()))
        .build()
        .unwrap()
}

fn provider(server: &MemoryServer, types: Vec<ModelType>) -> DataProvider {
    provider_with(server, types, false)
}

fn note_v1() -> ModelType {
    ModelType::new("Desk", "Note", "Notes")
        .property(PropertyDescriptor::identity("Id"))
        .property(PropertyDescriptor::text("Body", 50).nullable())
}

fn order_types() -> Vec<ModelType> {
    vec![
        ModelType::new("Shop", "Address", "Address")
            .property(PropertyDescriptor::text("City", 40)),
        ModelType::new("Shop", "Serial", "Serial")
            .property(PropertyDescriptor::text("Number", 30)),
        ModelType::new("Shop", "Line", "Line")
            .property(PropertyDescriptor::primary_key("Sku", ValueType::Text).max_length(20))
            .property(PropertyDescriptor::scalar("Qty", ValueType::Int32))
            .property(PropertyDescriptor::collection("Serials", "Shop.Serial")),
        ModelType::new("Shop", "Order", "Orders")
            .property(PropertyDescriptor::identity("Id"))
            .property(PropertyDescriptor::primary_key("Number", ValueType::Text).max_length(20))
            .property(PropertyDescriptor::multi_language("Title", 100))
            .property(PropertyDescriptor::scalar(
                "Total",
                ValueType::Decimal {
                    precision: 12,
                    scale: 2,
                },
            ))
            .property(PropertyDescriptor::nested("Ship", "Shop.Address").nullable())
            .property(PropertyDescriptor::collection("Lines", "Shop.Line"))
            .site_scoped(),
    ]
}

fn desired(types: Vec<ModelType>, key: &str) -> Vec<TableSchema> {
    let inspector = Inspector::new(Arc::new(StaticSource::new(types)));
    let languages = LanguageSet::new(["en"]).unwrap();
    let model = inspector.describe(key).unwrap();
    SchemaBuilder::new(&inspector, &languages, "dbo")
        .build_all(&model)
        .unwrap()
}

fn position(script: &str, needle: &str) -> usize {
    script
        .find(needle)
        .unwrap_or_else(|| panic!("{} not found in\n{}", needle, script))
}

#[test]
fn test_fresh_install_orders_phases() {
    let tables = desired(order_types(), "Shop.Order");
    let states: Vec<TableState<'_>> = tables[0]
        .walk()
        .into_iter()
        .map(|t| TableState::new(t, None, false))
        .collect();
    let plan = MigrationPlan::install(&states).unwrap();
    assert_eq!(plan.touched, vec!["Orders", "Orders_Lines", "Orders_Lines_Serials"]);

    let script = plan.to_script();
    let create_orders = position(&script, "CREATE TABLE [dbo].[Orders]");
    let create_lines = position(&script, "CREATE TABLE [dbo].[Orders_Lines]");
    let unique = position(&script, "UX_Orders_Id");
    let fk = position(&script, "FK_Orders_Lines_Orders");
    assert!(create_orders < create_lines);
    assert!(create_lines < unique);
    assert!(unique < fk);
    assert_eq!(script.matches("\nGO\n").count(), plan.len());
}

#[test]
fn test_matching_live_table_needs_nothing() {
    let tables = desired(vec![note_v1()], "Desk.Note");
    let states = [TableState::new(&tables[0], Some(&tables[0]), true)];
    assert!(MigrationPlan::install(&states).unwrap().is_empty());
}

#[test]
fn test_required_column_on_populated_table_needs_default() {
    let live = desired(vec![note_v1()], "Desk.Note");
    let wanted = desired(
        vec![note_v1().property(PropertyDescriptor::scalar("Rank", ValueType::Int32))],
        "Desk.Note",
    );

    let empty = [TableState::new(&wanted[0], Some(&live[0]), false)];
    assert_eq!(MigrationPlan::install(&empty).unwrap().len(), 1);

    let populated = [TableState::new(&wanted[0], Some(&live[0]), true)];
    let err = MigrationPlan::install(&populated).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::MissingMigrationDefault { ref column, .. } if column == "Rank"
    ));
}

#[test]
fn test_uninstall_drops_children_first() {
    let tables = desired(order_types(), "Shop.Order");
    let plan = MigrationPlan::uninstall(&tables[0].walk());
    assert_eq!(plan.touched, vec!["Orders_Lines_Serials", "Orders_Lines", "Orders"]);
    assert!(plan.to_script().contains("DROP TABLE IF EXISTS [dbo].[Orders_Lines_Serials]"));
}

#[tokio::test]
async fn test_install_is_idempotent() {
    let server = MemoryServer::new();
    let p = provider(&server, order_types());

    let first = p.install("Shop.Order").await.unwrap();
    assert_eq!(first.touched.len(), 3);
    let db = server.database(CONN).unwrap();
    assert_eq!(db.lock().row_count("dbo", "Orders_Lines_Serials"), Some(0));

    let second = p.install("Shop.Order").await.unwrap();
    assert!(second.is_empty(), "unexpected statements: {}", second.to_script());

    // A fresh provider sees the same live tables.
    let again = provider(&server, order_types());
    assert!(again.install("Shop.Order").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_added_column_takes_migration_default() {
    let server = MemoryServer::new();
    let v1 = provider(&server, vec![note_v1()]);
    v1.install("Desk.Note").await.unwrap();
    for body in ["one", "two"] {
        let mut note = Record::new("Desk.Note").with("Body", body);
        assert!(v1.add(&mut note).await.unwrap().is_added());
    }

    let v2 = provider(
        &server,
        vec![note_v1().property(
            PropertyDescriptor::scalar("Rank", ValueType::Int32).migration_default(DefaultValue::Int(3)),
        )],
    );
    let plan = v2.install("Desk.Note").await.unwrap();
    let script = plan.to_script();
    assert!(script.contains("DF_Notes_Rank"));
    assert!(script.contains("DROP CONSTRAINT [DF_Notes_Rank]"));

    let rows = server.database(CONN).unwrap().lock().rows("dbo", "Notes");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.value("Rank") == Value::Int32(3)));

    let note = v2.get_by_identity("Desk.Note", 1).await.unwrap().unwrap();
    assert_eq!(note.value("Rank"), Value::Int32(3));
    assert_eq!(note.value("Body"), Value::from("one"));
    assert!(v2.install("Desk.Note").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_default_leaves_table_untouched() {
    let server = MemoryServer::new();
    let v1 = provider(&server, vec![note_v1()]);
    v1.install("Desk.Note").await.unwrap();
    let mut note = Record::new("Desk.Note").with("Body", "kept");
    v1.add(&mut note).await.unwrap();

    let v2 = provider(
        &server,
        vec![note_v1().property(PropertyDescriptor::scalar("Rank", ValueType::Int32))],
    );
    let err = v2.install("Desk.Note").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::MissingMigrationDefault { .. })
    ));
    let db = server.database(CONN).unwrap();
    assert!(db.lock().table("dbo", "Notes").unwrap().column_index("Rank").is_none());
}

#[tokio::test]
async fn test_column_becoming_required_replaces_nulls() {
    let server = MemoryServer::new();
    let v1 = provider(&server, vec![note_v1()]);
    v1.install("Desk.Note").await.unwrap();
    let mut blank = Record::new("Desk.Note");
    let mut filled = Record::new("Desk.Note").with("Body", "text");
    v1.add(&mut blank).await.unwrap();
    v1.add(&mut filled).await.unwrap();

    let v2 = provider(
        &server,
        vec![ModelType::new("Desk", "Note", "Notes")
            .property(PropertyDescriptor::identity("Id"))
            .property(
                PropertyDescriptor::text("Body", 200).migration_default(DefaultValue::Text("n/a".into())),
            )],
    );
    v2.install("Desk.Note").await.unwrap();

    let bodies: Vec<Value> = server
        .database(CONN)
        .unwrap()
        .lock()
        .rows("dbo", "Notes")
        .iter()
        .map(|r| r.value("Body"))
        .collect();
    assert_eq!(bodies, vec![Value::from("n/a"), Value::from("text")]);
}

#[tokio::test]
async fn test_removed_property_drops_column() {
    let server = MemoryServer::new();
    let v1 = provider(
        &server,
        vec![note_v1().property(PropertyDescriptor::text("Tag", 10).nullable().indexed())],
    );
    v1.install("Desk.Note").await.unwrap();
    let mut note = Record::new("Desk.Note").with("Body", "b").with("Tag", "t");
    v1.add(&mut note).await.unwrap();

    let v2 = provider(&server, vec![note_v1()]);
    let script = v2.install("Desk.Note").await.unwrap().to_script();
    // The index on the column goes before the column.
    assert!(position(&script, "IX_Notes_Tag") < position(&script, "DROP COLUMN [Tag]"));

    let db = server.database(CONN).unwrap();
    let db = db.lock();
    let notes = db.table("dbo", "Notes").unwrap();
    assert!(notes.column_index("Tag").is_none());
    assert_eq!(db.rows("dbo", "Notes")[0].value("Body"), Value::from("b"));
}

#[tokio::test]
async fn test_procedures_are_installed_once() {
    let server = MemoryServer::new();
    let types = vec![
        ModelType::new("Shop", "Line", "Line")
            .property(PropertyDescriptor::primary_key("Sku", ValueType::Text).max_length(20))
            .property(PropertyDescriptor::scalar("Qty", ValueType::Int32)),
        ModelType::new("Shop", "Order", "Orders")
            .property(PropertyDescriptor::identity("Id"))
            .property(PropertyDescriptor::primary_key("Number", ValueType::Text).max_length(20))
            .property(PropertyDescriptor::collection("Lines", "Shop.Line")),
    ];
    let p = provider_with(&server, types, true);

    let first = p.install("Shop.Order").await.unwrap();
    {
        let db = server.database(CONN).unwrap();
        let db = db.lock();
        for name in ["Orders__Get", "Orders__GetByIdentity", "Orders__Add", "Orders__RemoveByIdentity"] {
            assert!(db.has_procedure("dbo", name), "{} missing", name);
        }
        assert!(db.has_type("dbo", "Orders_Lines_T"));
    }
    assert!(first.len() > first.touched.len());

    assert!(p.install("Shop.Order").await.unwrap().is_empty());

    p.uninstall("Shop.Order").await.unwrap();
    let db = server.database(CONN).unwrap();
    let db = db.lock();
    assert!(!db.has_procedure("dbo", "Orders__Get"));
    assert!(!db.has_type("dbo", "Orders_Lines_T"));
    assert!(db.table("dbo", "Orders").is_none());
    assert!(db.table("dbo", "Orders_Lines").is_none());
}

#[tokio::test]
async fn test_nested_subtables_install_without_procedures() {
    let server = MemoryServer::new();
    let p = provider_with(&server, order_types(), true);

    let first = p.install("Shop.Order").await.unwrap();
    assert_eq!(first.touched, vec!["Orders", "Orders_Lines", "Orders_Lines_Serials"]);
    {
        let db = server.database(CONN).unwrap();
        let db = db.lock();
        assert!(db.table("dbo", "Orders_Lines_Serials").is_some());
        assert!(!db.has_procedure("dbo", "Orders__Update"));
        assert!(!db.has_type("dbo", "Orders_Lines_T"));
    }
    assert!(p.install("Shop.Order").await.unwrap().is_empty());
}
