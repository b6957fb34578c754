// tests/provider/derived_test.rs
use std::sync::Arc;

use relmap::error::{ConfigError, Error, UpdateOutcome};
use relmap::mapper::{Record, Value};
use relmap::metadata::{Inspector, ModelType, PropertyDescriptor, StaticSource, TypeRegistry, ValueType};
use relmap::provider::{DataProvider, MemoryServer, ProviderOptions};
use relmap::schema::LanguageSet;
use relmap::statement::{Filter, QuerySpec};

const CONN: &str = "Server=mem;Database=Zoo";

fn types() -> Vec<ModelType> {
    vec![
        ModelType::new("Zoo", "Animal", "Animals")
            .property(PropertyDescriptor::identity("Id"))
            .property(PropertyDescriptor::text("Name", 50))
            .base(),
        ModelType::new("Zoo", "Dog", "Dogs")
            .property(PropertyDescriptor::text("Breed", 30).nullable())
            .derived_from("Zoo.Animal"),
        ModelType::new("Zoo", "Cat", "Cats")
            .property(PropertyDescriptor::scalar("Lives", ValueType::Int32))
            .derived_from("Zoo.Animal"),
    ]
}

fn build(server: &MemoryServer, registry: Option<TypeRegistry>) -> DataProvider {
    let mut builder = DataProvider::builder(ProviderOptions::new(CONN, LanguageSet::new(["en"]).unwrap()))
        .inspector(Arc::new(Inspector::new(Arc::new(StaticSource::new(types())))))
        .factory(Arc::new(server.clone()));
    if let Some(registry) = registry {
        builder = builder.registry(registry);
    }
    builder.build().unwrap()
}

async fn zoo(server: &MemoryServer) -> DataProvider {
    let p = build(server, None);
    p.install("Zoo.Dog").await.unwrap();
    p.install("Zoo.Cat").await.unwrap();

    let mut rex = Record::new("Zoo.Dog").with("Name", "Rex").with("Breed", "Collie");
    let mut tom = Record::new("Zoo.Cat").with("Name", "Tom").with("Lives", 9);
    let mut blob = Record::new("Zoo.Animal").with("Name", "Blob");
    for record in [&mut rex, &mut tom, &mut blob] {
        assert!(p.add(record).await.unwrap().is_added());
    }
    p
}

fn names(records: &[Record]) -> Vec<Value> {
    records.iter().map(|r| r.value("Name")).collect()
}

#[tokio::test]
async fn test_base_install_is_shared() {
    let server = MemoryServer::new();
    let p = build(&server, None);
    let dogs = p.install("Zoo.Dog").await.unwrap();
    assert_eq!(dogs.touched, vec!["Animals", "Dogs"]);
    let cats = p.install("Zoo.Cat").await.unwrap();
    assert_eq!(cats.touched, vec!["Cats"]);
}

#[tokio::test]
async fn test_add_writes_descriptor_on_base_row() {
    let server = MemoryServer::new();
    let _p = zoo(&server).await;

    let db = server.database(CONN).unwrap();
    let db = db.lock();
    let animals = db.rows("dbo", "Animals");
    assert_eq!(animals.len(), 3);
    assert_eq!(animals[0].value("__DerivedTable"), Value::from("Dogs"));
    assert_eq!(animals[0].value("__DerivedType"), Value::from("Dog"));
    assert_eq!(animals[0].value("__DerivedModule"), Value::from("Zoo"));
    assert_eq!(animals[1].value("__DerivedTable"), Value::from("Cats"));
    assert!(animals[2].value("__DerivedTable").is_null());

    let dogs = db.rows("dbo", "Dogs");
    assert_eq!(dogs.len(), 1);
    assert_eq!(dogs[0].value("Id"), Value::Int32(1));
    assert_eq!(dogs[0].value("Breed"), Value::from("Collie"));
}

#[tokio::test]
async fn test_get_through_base_returns_concrete_type() {
    let server = MemoryServer::new();
    let p = zoo(&server).await;

    let rex = p.get_by_identity("Zoo.Animal", 1).await.unwrap().unwrap();
    assert_eq!(rex.type_key, "Zoo.Dog");
    assert_eq!(rex.value("Name"), Value::from("Rex"));
    assert_eq!(rex.value("Breed"), Value::from("Collie"));

    let tom = p
        .get(&Record::new("Zoo.Animal").with("Id", 2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tom.type_key, "Zoo.Cat");
    assert_eq!(tom.value("Lives"), Value::Int32(9));

    let blob = p.get_by_identity("Zoo.Animal", 3).await.unwrap().unwrap();
    assert_eq!(blob.type_key, "Zoo.Animal");
    assert!(blob.get("Breed").is_none());

    assert!(p.get_by_identity("Zoo.Animal", 4).await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_through_derived_type() {
    let server = MemoryServer::new();
    let p = zoo(&server).await;
    let rex = p.get_by_identity("Zoo.Dog", 1).await.unwrap().unwrap();
    assert_eq!(rex.value("Breed"), Value::from("Collie"));
    // A cat is not a dog.
    assert!(p.get_by_identity("Zoo.Dog", 2).await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_writes_both_tables() {
    let server = MemoryServer::new();
    let p = zoo(&server).await;

    let mut rex = p.get_by_identity("Zoo.Dog", 1).await.unwrap().unwrap();
    rex.set("Name", "Max");
    rex.set("Breed", "Beagle");
    assert_eq!(p.update(&rex).await.unwrap(), UpdateOutcome::Updated);

    let got = p.get_by_identity("Zoo.Animal", 1).await.unwrap().unwrap();
    assert_eq!(got.type_key, "Zoo.Dog");
    assert_eq!(got.value("Name"), Value::from("Max"));
    assert_eq!(got.value("Breed"), Value::from("Beagle"));

    let db = server.database(CONN).unwrap();
    let animals = db.lock().rows("dbo", "Animals");
    assert_eq!(animals[0].value("__DerivedType"), Value::from("Dog"));
}

#[tokio::test]
async fn test_queries_stay_on_their_table() {
    let server = MemoryServer::new();
    let p = zoo(&server).await;

    let dogs = p.query("Zoo.Dog", &QuerySpec::new()).await.unwrap();
    assert_eq!(dogs.total, 1);
    assert_eq!(dogs.records[0].type_key, "Zoo.Dog");
    assert_eq!(dogs.records[0].value("Name"), Value::from("Rex"));

    let all = p.query("Zoo.Animal", &QuerySpec::new().asc("Name")).await.unwrap();
    assert_eq!(all.total, 3);
    assert_eq!(
        names(&all.records),
        vec![Value::from("Blob"), Value::from("Rex"), Value::from("Tom")]
    );

    let cats = p
        .query("Zoo.Cat", &QuerySpec::new().filter(Filter::gt("Lives", 5)))
        .await
        .unwrap();
    assert_eq!(names(&cats.records), vec![Value::from("Tom")]);
}

#[tokio::test]
async fn test_remove_derived_removes_base_row() {
    let server = MemoryServer::new();
    let p = zoo(&server).await;

    assert!(p.remove_by_identity("Zoo.Dog", 1).await.unwrap());
    let db = server.database(CONN).unwrap();
    assert_eq!(db.lock().row_count("dbo", "Dogs"), Some(0));
    assert_eq!(db.lock().row_count("dbo", "Animals"), Some(2));
    assert!(p.get_by_identity("Zoo.Animal", 1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unregistered_descriptor_is_reported() {
    let server = MemoryServer::new();
    zoo(&server).await;

    let mut registry = TypeRegistry::new();
    for model in types().iter().filter(|m| m.name != "Dog") {
        registry.register_model(model);
    }
    let p = build(&server, Some(registry));
    let err = p.get_by_identity("Zoo.Animal", 1).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::UnresolvedDerivedType { ref type_name, .. }) if type_name == "Dog"
    ));
    assert!(p.get_by_identity("Zoo.Animal", 2).await.unwrap().is_some());
}

#[tokio::test]
async fn test_uninstalling_base_drops_derived_tables() {
    let server = MemoryServer::new();
    let p = zoo(&server).await;

    let plan = p.uninstall("Zoo.Animal").await.unwrap();
    let script = plan.to_script();
    let cats = script.find("[dbo].[Cats]").unwrap();
    let animals = script.find("[dbo].[Animals]").unwrap();
    assert!(cats < animals);

    let db = server.database(CONN).unwrap();
    let db = db.lock();
    for table in ["Animals", "Dogs", "Cats"] {
        assert!(db.table("dbo", table).is_none(), "{} still exists", table);
    }
}
