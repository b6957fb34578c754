// tests/provider/crud_test.rs
use std::sync::Arc;

use relmap::error::{AddOutcome, ConfigError, Error, UpdateOutcome};
use relmap::mapper::{Record, Value};
use relmap::metadata::{Inspector, ModelType, PropertyDescriptor, StaticSource, ValueType};
use relmap::provider::{DataProvider, MemoryServer, ProviderOptions, TransactionScope};
use relmap::schema::LanguageSet;
use relmap::statement::{Filter, QuerySpec};
use rust_decimal::Decimal;

const CONN: &str = "Server=mem;Database=Shop";

fn types() -> Vec<ModelType> {
    vec![
        ModelType::new("Shop", "Address", "Address")
            .property(PropertyDescriptor::text("Street", 60).nullable())
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

fn options() -> ProviderOptions {
    ProviderOptions::new(CONN, LanguageSet::new(["en", "fr"]).unwrap()).site("north")
}

fn provider_with(server: &MemoryServer, options: ProviderOptions) -> DataProvider {
    DataProvider::builder(options)
        .inspector(Arc::new(Inspector::new(Arc::new(StaticSource::new(types())))))
        .factory(Arc::new(server.clone()))
        .build()
        .unwrap()
}

async fn installed(server: &MemoryServer) -> DataProvider {
    let p = provider_with(server, options());
    p.install("Shop.Order").await.unwrap();
    p
}

fn line(sku: &str, qty: i32, serials: &[&str]) -> Record {
    Record::new("Shop.Line")
        .with("Sku", sku)
        .with("Qty", qty)
        .with_collection(
            "Serials",
            serials
                .iter()
                .map(|s| Record::new("Shop.Serial").with("Number", *s))
                .collect(),
        )
}

fn order(number: &str) -> Record {
    Record::new("Shop.Order")
        .with("Number", number)
        .with_languages("Title", [("en", "Chair"), ("fr", "Chaise")])
        .with("Total", Decimal::new(1250, 2))
        .with_nested(
            "Ship",
            Some(Record::new("Shop.Address").with("City", "Oslo")),
        )
        .with_collection(
            "Lines",
            vec![line("A", 1, &["S1", "S2"]), line("B", 2, &[])],
        )
}

fn key(number: &str) -> Record {
    Record::new("Shop.Order").with("Number", number)
}

fn count(server: &MemoryServer, table: &str) -> usize {
    server
        .database(CONN)
        .unwrap()
        .lock()
        .row_count("dbo", table)
        .unwrap_or_default()
}

#[tokio::test]
async fn test_add_then_get_rebuilds_the_graph() {
    let server = MemoryServer::new();
    let p = installed(&server).await;

    let mut o = order("N-1");
    let outcome = p.add(&mut o).await.unwrap();
    assert_eq!(outcome, AddOutcome::Added { identity: Some(1) });
    assert_eq!(o.value("Id"), Value::Int32(1));
    assert_eq!(count(&server, "Orders_Lines"), 2);
    assert_eq!(count(&server, "Orders_Lines_Serials"), 2);

    let got = p.get(&key("N-1")).await.unwrap().unwrap();
    assert_eq!(got.type_key, "Shop.Order");
    assert_eq!(got.value("Id"), Value::Int32(1));
    assert_eq!(got.value("Total"), Value::Decimal(Decimal::new(125, 1)));

    let title = got.languages("Title").unwrap();
    assert_eq!(title.get("en").map(String::as_str), Some("Chair"));
    assert_eq!(title.get("fr").map(String::as_str), Some("Chaise"));

    let ship = got.nested("Ship").unwrap();
    assert_eq!(ship.value("City"), Value::from("Oslo"));
    assert!(ship.value("Street").is_null());

    let lines = got.collection("Lines");
    let skus: Vec<Value> = lines.iter().map(|l| l.value("Sku")).collect();
    assert_eq!(skus, vec![Value::from("A"), Value::from("B")]);
    let serials: Vec<Value> = lines[0]
        .collection("Serials")
        .iter()
        .map(|s| s.value("Number"))
        .collect();
    assert_eq!(serials, vec![Value::from("S1"), Value::from("S2")]);
    assert!(lines[1].collection("Serials").is_empty());

    let by_identity = p.get_by_identity("Shop.Order", 1).await.unwrap().unwrap();
    assert_eq!(by_identity, got);
}

#[tokio::test]
async fn test_blank_languages_are_not_stored() {
    let server = MemoryServer::new();
    let p = installed(&server).await;
    let mut o = order("N-1").with_languages("Title", [("en", "Desk"), ("fr", "  ")]);
    p.add(&mut o).await.unwrap();

    let rows = server.database(CONN).unwrap().lock().rows("dbo", "Orders");
    assert!(rows[0].value("Title_fr").is_null());
    let got = p.get(&key("N-1")).await.unwrap().unwrap();
    assert_eq!(got.languages("Title").unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_key_is_reported_not_raised() {
    let server = MemoryServer::new();
    let p = installed(&server).await;
    p.add(&mut order("N-1")).await.unwrap();

    let mut again = order("N-1").with_collection("Lines", vec![line("Z", 9, &[])]);
    assert_eq!(p.add(&mut again).await.unwrap(), AddOutcome::AlreadyExists);
    assert!(again.value("Id").is_null());
    assert_eq!(count(&server, "Orders"), 1);
    assert_eq!(count(&server, "Orders_Lines"), 2);
}

#[tokio::test]
async fn test_update_replaces_children() {
    let server = MemoryServer::new();
    let p = installed(&server).await;
    p.add(&mut order("N-1")).await.unwrap();

    let mut changed = p.get(&key("N-1")).await.unwrap().unwrap();
    changed.set("Total", Value::Decimal(Decimal::new(99, 0)));
    changed.set_languages("Title", [("en".to_string(), "Stool".to_string())].into());
    changed = changed.with_collection("Lines", vec![line("C", 5, &["S9"])]);
    assert_eq!(p.update(&changed).await.unwrap(), UpdateOutcome::Updated);

    let got = p.get(&key("N-1")).await.unwrap().unwrap();
    assert_eq!(got.value("Total"), Value::Decimal(Decimal::new(99, 0)));
    assert!(got.languages("Title").unwrap().get("fr").is_none());
    let lines = got.collection("Lines");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].value("Qty"), Value::Int32(5));
    assert_eq!(count(&server, "Orders_Lines"), 1);
    assert_eq!(count(&server, "Orders_Lines_Serials"), 1);
}

#[tokio::test]
async fn test_update_outcomes() {
    let server = MemoryServer::new();
    let p = installed(&server).await;
    p.add(&mut order("N-1")).await.unwrap();
    p.add(&mut order("N-2")).await.unwrap();

    // Key change through the key as read.
    let original = p.get(&key("N-1")).await.unwrap().unwrap();
    let mut renamed = original.clone();
    renamed.set("Number", Value::from("N-9"));
    assert_eq!(p.update_key(&original, &renamed).await.unwrap(), UpdateOutcome::Updated);
    assert!(p.get(&key("N-1")).await.unwrap().is_none());
    let moved = p.get(&key("N-9")).await.unwrap().unwrap();
    assert_eq!(moved.value("Id"), Value::Int32(1));
    assert_eq!(moved.collection("Lines").len(), 2);

    // Renaming onto an existing key.
    let second = p.get(&key("N-2")).await.unwrap().unwrap();
    let mut clash = second.clone();
    clash.set("Number", Value::from("N-9"));
    assert_eq!(p.update_key(&second, &clash).await.unwrap(), UpdateOutcome::NewKeyExists);
    assert!(p.get(&key("N-2")).await.unwrap().is_some());

    // The row is gone.
    let mut ghost = order("N-404");
    ghost.set("Id", Value::Int32(77));
    assert_eq!(p.update(&ghost).await.unwrap(), UpdateOutcome::RecordDeleted);
    assert_eq!(p.update_by_identity(&ghost).await.unwrap(), UpdateOutcome::RecordDeleted);
}

#[tokio::test]
async fn test_update_by_identity_may_change_the_key() {
    let server = MemoryServer::new();
    let p = installed(&server).await;
    let mut o = order("N-1");
    p.add(&mut o).await.unwrap();

    o.set("Number", Value::from("N-5"));
    o = o.with_collection("Lines", vec![]);
    assert_eq!(p.update_by_identity(&o).await.unwrap(), UpdateOutcome::Updated);

    let got = p.get_by_identity("Shop.Order", 1).await.unwrap().unwrap();
    assert_eq!(got.value("Number"), Value::from("N-5"));
    assert!(got.collection("Lines").is_empty());
    assert_eq!(count(&server, "Orders_Lines_Serials"), 0);
}

#[tokio::test]
async fn test_remove_takes_children_along() {
    let server = MemoryServer::new();
    let p = installed(&server).await;
    p.add(&mut order("N-1")).await.unwrap();
    p.add(&mut order("N-2")).await.unwrap();

    assert!(p.remove(&key("N-1")).await.unwrap());
    assert!(!p.remove(&key("N-1")).await.unwrap());
    assert_eq!(count(&server, "Orders_Lines"), 2);
    assert_eq!(count(&server, "Orders_Lines_Serials"), 2);

    assert!(p.remove_by_identity("Shop.Order", 2).await.unwrap());
    assert!(!p.remove_by_identity("Shop.Order", 2).await.unwrap());
    assert_eq!(count(&server, "Orders_Lines"), 0);
    assert!(p.get_by_identity("Shop.Order", 2).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sites_do_not_see_each_other() {
    let server = MemoryServer::new();
    let north = installed(&server).await;
    let south = provider_with(&server, options().site("south"));

    north.add(&mut order("N-1")).await.unwrap();
    let mut theirs = order("N-1").with("Total", Decimal::new(7, 0));
    assert!(south.add(&mut theirs).await.unwrap().is_added());
    assert_eq!(count(&server, "Orders"), 2);

    let got = south.get(&key("N-1")).await.unwrap().unwrap();
    assert_eq!(got.value("Total"), Value::Decimal(Decimal::new(7, 0)));
    assert_eq!(north.query("Shop.Order", &QuerySpec::new()).await.unwrap().total, 1);

    assert!(south.remove(&key("N-1")).await.unwrap());
    assert!(north.get(&key("N-1")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_query_reads_children_of_every_page_record() {
    let server = MemoryServer::new();
    let p = installed(&server).await;
    for n in 1..=5 {
        let mut o = order(&format!("N-{}", n)).with("Total", Decimal::new(n, 0));
        p.add(&mut o).await.unwrap();
    }

    let spec = QuerySpec::new()
        .filter(Filter::gt("Total", 1))
        .desc("Total")
        .page(1, 2);
    let page = p.query("Shop.Order", &spec).await.unwrap();
    assert_eq!(page.total, 4);
    let numbers: Vec<Value> = page.records.iter().map(|r| r.value("Number")).collect();
    assert_eq!(numbers, vec![Value::from("N-4"), Value::from("N-3")]);
    assert!(page.records.iter().all(|r| r.collection("Lines").len() == 2));
    assert_eq!(page.records[0].collection("Lines")[0].collection("Serials").len(), 2);

    let english = QuerySpec::new().filter(Filter::eq("Title_en", "chair"));
    assert_eq!(p.query("Shop.Order", &english).await.unwrap().total, 5);
}

#[tokio::test]
async fn test_unknown_record_field_is_rejected() {
    let server = MemoryServer::new();
    let p = installed(&server).await;
    let mut o = order("N-1").with("Colour", "red");
    let err = p.add(&mut o).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::UnknownField { ref field, .. }) if field == "Colour"
    ));
    assert_eq!(count(&server, "Orders"), 0);
}

#[tokio::test]
async fn test_transaction_scope_commits_or_rolls_back() {
    let server = MemoryServer::new();
    let p = installed(&server).await;

    let scope = TransactionScope::begin(&[&p]).await.unwrap();
    p.add(&mut order("N-1")).await.unwrap();
    p.add(&mut order("N-2")).await.unwrap();
    scope.rollback().await.unwrap();
    assert_eq!(count(&server, "Orders"), 0);
    assert_eq!(count(&server, "Orders_Lines"), 0);

    let scope = TransactionScope::begin(&[&p]).await.unwrap();
    p.add(&mut order("N-1")).await.unwrap();
    assert!(p.remove(&key("N-1")).await.unwrap());
    p.add(&mut order("N-3")).await.unwrap();
    scope.commit().await.unwrap();
    assert_eq!(count(&server, "Orders"), 1);
    assert!(p.get(&key("N-3")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_scope_rejects_other_databases() {
    let server = MemoryServer::new();
    let p = installed(&server).await;
    let elsewhere = provider_with(
        &server,
        ProviderOptions::new("Server=mem;Database=Other", LanguageSet::new(["en"]).unwrap()),
    );
    let err = TransactionScope::begin(&[&p, &elsewhere]).await.unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
}

const VAULT: &str = "Server=mem;Database=Vault";

fn vault_types() -> Vec<ModelType> {
    vec![ModelType::new("Vault", "Doc", "Docs")
        .property(PropertyDescriptor::primary_key("Code", ValueType::Text).max_length(20))
        .property(PropertyDescriptor::secondary_key("Rev", ValueType::Int32))
        .property(PropertyDescriptor::text("Title", 40))
        .property(PropertyDescriptor::binary("Blob", ValueType::Bytes))
        .property(PropertyDescriptor::binary("Meta", ValueType::Serialized))]
}

async fn vault(server: &MemoryServer) -> DataProvider {
    let p = DataProvider::builder(ProviderOptions::new(VAULT, LanguageSet::new(["en"]).unwrap()))
        .inspector(Arc::new(Inspector::new(Arc::new(StaticSource::new(vault_types())))))
        .factory(Arc::new(server.clone()))
        .build()
        .unwrap();
    p.install("Vault.Doc").await.unwrap();
    p
}

fn doc(code: &str, rev: i32) -> Record {
    Record::new("Vault.Doc")
        .with("Code", code)
        .with("Rev", rev)
        .with("Title", format!("{} rev {}", code, rev))
        .with("Blob", vec![0u8, 7, 255, rev as u8])
        .with("Meta", serde_json::json!({ "tags": ["a", "b"], "rev": rev, "draft": false }))
}

fn doc_key(code: &str, rev: i32) -> Record {
    Record::new("Vault.Doc").with("Code", code).with("Rev", rev)
}

#[tokio::test]
async fn test_composite_key_with_blobs_reads_back_whole() {
    let server = MemoryServer::new();
    let p = vault(&server).await;

    let mut first = doc("D-1", 1);
    let mut second = doc("D-1", 2);
    assert_eq!(p.add(&mut first).await.unwrap(), AddOutcome::Added { identity: None });
    assert!(p.add(&mut second).await.unwrap().is_added());

    let got = p.get(&doc_key("D-1", 2)).await.unwrap().unwrap();
    assert_eq!(got, second);
    assert_eq!(got.value("Blob"), Value::Bytes(vec![0, 7, 255, 2]));
    assert_eq!(
        got.value("Meta"),
        Value::Json(serde_json::json!({ "tags": ["a", "b"], "rev": 2, "draft": false }))
    );
    assert_eq!(p.get(&doc_key("D-1", 1)).await.unwrap().unwrap(), first);
    assert!(p.get(&doc_key("D-1", 3)).await.unwrap().is_none());

    let stored = server
        .database(VAULT)
        .unwrap()
        .lock()
        .rows("dbo", "Docs");
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn test_composite_key_outcomes() {
    let server = MemoryServer::new();
    let p = vault(&server).await;
    p.add(&mut doc("D-1", 1)).await.unwrap();
    p.add(&mut doc("D-1", 2)).await.unwrap();

    // Same (Code, Rev) twice.
    assert_eq!(p.add(&mut doc("D-1", 1)).await.unwrap(), AddOutcome::AlreadyExists);

    // Moving revision 2 onto revision 1.
    let original = p.get(&doc_key("D-1", 2)).await.unwrap().unwrap();
    let mut clash = original.clone();
    clash.set("Rev", 1);
    assert_eq!(p.update_key(&original, &clash).await.unwrap(), UpdateOutcome::NewKeyExists);
    assert_eq!(p.get(&doc_key("D-1", 2)).await.unwrap().unwrap(), original);

    // Moving it to a free revision keeps the blobs.
    let mut moved = original.clone();
    moved.set("Rev", 5);
    moved.set("Meta", serde_json::json!({ "tags": [] }));
    assert_eq!(p.update_key(&original, &moved).await.unwrap(), UpdateOutcome::Updated);
    assert!(p.get(&doc_key("D-1", 2)).await.unwrap().is_none());
    let got = p.get(&doc_key("D-1", 5)).await.unwrap().unwrap();
    assert_eq!(got.value("Blob"), Value::Bytes(vec![0, 7, 255, 2]));
    assert_eq!(got.value("Meta"), Value::Json(serde_json::json!({ "tags": [] })));

    // The row is gone.
    assert_eq!(p.update(&doc("D-9", 1)).await.unwrap(), UpdateOutcome::RecordDeleted);
}
