// tests/statement/filter_test.rs
//
// Filters compiled by the query planner and run against the in-memory server.
use std::sync::Arc;

use relmap::error::{ConfigError, Error};
use relmap::mapper::{Record, Value};
use relmap::metadata::{Inspector, ModelType, PropertyDescriptor, StaticSource, ValueType};
use relmap::provider::{DataProvider, MemoryServer, ProviderOptions};
use relmap::schema::LanguageSet;
use relmap::statement::{Filter, FilterOp, JoinSpec, QuerySpec};

const CONN: &str = "Server=mem;Database=Filters";

fn types() -> Vec<ModelType> {
    vec![
        ModelType::new("Crm", "Address", "Address")
            .property(PropertyDescriptor::text("City", 40).nullable()),
        ModelType::new("Crm", "Team", "Teams")
            .property(PropertyDescriptor::primary_key("Code", ValueType::Text).max_length(10))
            .property(PropertyDescriptor::text("Label", 40)),
        ModelType::new("Crm", "Person", "People")
            .property(PropertyDescriptor::identity("Id"))
            .property(PropertyDescriptor::primary_key("Code", ValueType::Text).max_length(10))
            .property(PropertyDescriptor::text("Name", 50).nullable())
            .property(PropertyDescriptor::scalar("Age", ValueType::Int32).nullable())
            .property(PropertyDescriptor::nested("Home", "Crm.Address").nullable())
            .property(PropertyDescriptor::text("TeamCode", 10).nullable()),
    ]
}

fn person(code: &str, name: Option<&str>, age: Option<i32>, team: Option<&str>) -> Record {
    Record::new("Crm.Person")
        .with("Code", code)
        .with("Name", name)
        .with("Age", age)
        .with("TeamCode", team)
}

async fn people() -> DataProvider {
    let server = MemoryServer::new();
    let inspector = Inspector::new(Arc::new(StaticSource::new(types())));
    let provider = DataProvider::builder(ProviderOptions::new(CONN, LanguageSet::new(["en"]).unwrap()))
        .inspector(Arc::new(inspector))
        .factory(Arc::new(server))
        .build()
        .unwrap();
    provider.install("Crm.Team").await.unwrap();
    provider.install("Crm.Person").await.unwrap();

    for (code, label) in [("R", "Red"), ("B", "Blue")] {
        let mut team = Record::new("Crm.Team").with("Code", code).with("Label", label);
        provider.add(&mut team).await.unwrap();
    }
    let mut rows = vec![
        person("A1", Some("Ann"), Some(30), Some("R")).with_nested(
            "Home",
            Some(Record::new("Crm.Address").with("City", "Oslo")),
        ),
        person("B2", Some("bob_smith"), None, Some("B")),
        person("C3", None, Some(45), Some("R")),
        person("D4", Some("Cara 50%"), Some(20), None),
    ];
    for row in &mut rows {
        assert!(provider.add(row).await.unwrap().is_added());
    }
    provider
}

async fn codes(provider: &DataProvider, spec: QuerySpec) -> Vec<String> {
    provider
        .query("Crm.Person", &spec)
        .await
        .unwrap()
        .records
        .iter()
        .map(|r| r.value("Code").to_text().unwrap_or_default())
        .collect()
}

async fn matching(provider: &DataProvider, filter: Filter) -> Vec<String> {
    codes(provider, QuerySpec::new().filter(filter)).await
}

#[tokio::test]
async fn test_comparisons_treat_null_as_smallest() {
    let p = people().await;
    assert_eq!(matching(&p, Filter::eq("Age", 30)).await, vec!["A1"]);
    assert_eq!(matching(&p, Filter::ne("Age", 30)).await, vec!["B2", "C3", "D4"]);
    assert_eq!(matching(&p, Filter::lt("Age", 40)).await, vec!["A1", "B2", "D4"]);
    assert_eq!(
        matching(&p, Filter::leaf("Age", FilterOp::LessThanOrEqual, 20)).await,
        vec!["B2", "D4"]
    );
    assert_eq!(matching(&p, Filter::gt("Age", 25)).await, vec!["A1", "C3"]);
    assert_eq!(
        matching(&p, Filter::leaf("Age", FilterOp::GreaterThanOrEqual, 45)).await,
        vec!["C3"]
    );
}

#[tokio::test]
async fn test_null_comparands() {
    let p = people().await;
    assert_eq!(matching(&p, Filter::eq("Age", Value::Null)).await, vec!["B2"]);
    assert_eq!(matching(&p, Filter::ne("Age", Value::Null)).await, vec!["A1", "C3", "D4"]);
    assert!(matching(&p, Filter::lt("Age", Value::Null)).await.is_empty());
    assert!(matching(&p, Filter::gt("Age", Value::Null)).await.is_empty());
    assert!(matching(&p, Filter::contains("Name", Value::Null)).await.is_empty());
}

#[tokio::test]
async fn test_patterns_match_literally() {
    let p = people().await;
    assert_eq!(matching(&p, Filter::contains("Name", "_")).await, vec!["B2"]);
    assert_eq!(matching(&p, Filter::contains("Name", "50%")).await, vec!["D4"]);
    assert_eq!(
        matching(&p, Filter::leaf("Name", FilterOp::StartsWith, "BOB")).await,
        vec!["B2"]
    );
    assert_eq!(
        matching(&p, Filter::leaf("Name", FilterOp::EndsWith, "n")).await,
        vec!["A1"]
    );
    // Negated patterns keep NULL rows.
    assert_eq!(
        matching(&p, Filter::leaf("Name", FilterOp::NotContains, "a")).await,
        vec!["B2", "C3"]
    );
    assert_eq!(
        matching(&p, Filter::leaf("Name", FilterOp::NotStartsWith, "c")).await,
        vec!["A1", "B2", "C3"]
    );
    assert_eq!(
        matching(&p, Filter::leaf("Name", FilterOp::NotEndsWith, "%")).await,
        vec!["A1", "B2", "C3"]
    );
}

#[tokio::test]
async fn test_trees() {
    let p = people().await;
    let either = Filter::gt("Age", 40).or(Filter::eq("Name", "bob_smith"));
    assert_eq!(matching(&p, either.clone()).await, vec!["B2", "C3"]);
    assert_eq!(
        matching(&p, either.and(Filter::eq("TeamCode", "R"))).await,
        vec!["C3"]
    );
    assert!(matching(&p, Filter::Or(vec![])).await.is_empty());
    assert_eq!(matching(&p, Filter::And(vec![])).await.len(), 4);
}

#[tokio::test]
async fn test_nested_property_path() {
    let p = people().await;
    assert_eq!(matching(&p, Filter::eq("Home.City", "oslo")).await, vec!["A1"]);
    assert_eq!(matching(&p, Filter::eq("Home_City", Value::Null)).await, vec!["B2", "C3", "D4"]);
}

#[tokio::test]
async fn test_sort_and_page_with_total() {
    let p = people().await;
    assert_eq!(
        codes(&p, QuerySpec::new().desc("Age")).await,
        vec!["C3", "A1", "D4", "B2"]
    );
    assert_eq!(
        codes(&p, QuerySpec::new().asc("Age")).await,
        vec!["B2", "D4", "A1", "C3"]
    );

    let page = p
        .query("Crm.Person", &QuerySpec::new().page(1, 2))
        .await
        .unwrap();
    assert_eq!(page.total, 4);
    let got: Vec<Value> = page.records.iter().map(|r| r.value("Code")).collect();
    assert_eq!(got, vec![Value::from("B2"), Value::from("C3")]);

    let filtered = p
        .query(
            "Crm.Person",
            &QuerySpec::new().filter(Filter::ne("Age", Value::Null)).page(0, 1),
        )
        .await
        .unwrap();
    assert_eq!(filtered.total, 3);
    assert_eq!(filtered.records.len(), 1);

    let counted = p
        .query("Crm.Person", &QuerySpec::new().page(0, 0))
        .await
        .unwrap();
    assert_eq!(counted.total, 4);
    assert!(counted.records.is_empty());
}

#[tokio::test]
async fn test_filters_reach_joined_tables() {
    let p = people().await;
    let red = QuerySpec::new()
        .join(JoinSpec::inner("Crm.Team", &[("TeamCode", "Code")]))
        .filter(Filter::eq("Label", "Red"));
    assert_eq!(codes(&p, red).await, vec!["A1", "C3"]);

    let teamless = QuerySpec::new()
        .join(JoinSpec::left("Crm.Team", &[("TeamCode", "Code")]))
        .filter(Filter::eq("Label", Value::Null));
    assert_eq!(codes(&p, teamless).await, vec!["D4"]);

    let by_label = QuerySpec::new()
        .join(JoinSpec::inner("Crm.Team", &[("TeamCode", "Code")]))
        .asc("Label")
        .asc("Code");
    assert_eq!(codes(&p, by_label).await, vec!["B2", "A1", "C3"]);
}

#[tokio::test]
async fn test_unknown_field_is_a_config_error() {
    let p = people().await;
    let err = p
        .query("Crm.Person", &QuerySpec::new().filter(Filter::eq("Shoe", 9)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::UnknownField { ref field, .. }) if field == "Shoe"
    ));

    let err = p
        .query("Crm.Person", &QuerySpec::new().desc("Shoe"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::UnknownField { .. })));
}
