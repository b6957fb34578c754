// tests/provider/transfer_test.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relmap::error::{Error, Result};
use relmap::mapper::{Record, Value};
use relmap::metadata::{Inspector, ModelType, PropertyDescriptor, StaticSource, ValueType};
use relmap::provider::{DataProvider, ImportReport, MemoryServer, ProviderOptions, Translator};
use relmap::schema::LanguageSet;

fn types() -> Vec<ModelType> {
    vec![
        ModelType::new("Desk", "Item", "Item")
            .property(PropertyDescriptor::multi_language("Label", 40)),
        ModelType::new("Desk", "Note", "Notes")
            .property(PropertyDescriptor::identity("Id"))
            .property(PropertyDescriptor::primary_key("Code", ValueType::Text).max_length(10))
            .property(PropertyDescriptor::multi_language("Body", 100))
            .property(PropertyDescriptor::collection("Items", "Desk.Item")),
    ]
}

async fn provider(server: &MemoryServer, database: &str) -> DataProvider {
    let options = ProviderOptions::new(
        format!("Server=mem;Database={}", database),
        LanguageSet::new(["en", "de", "fr"]).unwrap(),
    )
    .export_chunk_size(2);
    let p = DataProvider::builder(options)
        .inspector(Arc::new(Inspector::new(Arc::new(StaticSource::new(types())))))
        .factory(Arc::new(server.clone()))
        .build()
        .unwrap();
    p.install("Desk.Note").await.unwrap();
    p
}

fn note(code: &str, body: &[(&str, &str)]) -> Record {
    Record::new("Desk.Note")
        .with("Code", code)
        .with_languages("Body", body.iter().copied())
}

async fn seeded(server: &MemoryServer) -> DataProvider {
    let p = provider(server, "Source").await;
    let mut notes = vec![
        note("N1", &[("en", "hello")]),
        note("N2", &[("en", "x"), ("de", "y"), ("fr", "z")]),
        note("N3", &[]),
        note("N4", &[("en", "tree")]).with_collection(
            "Items",
            vec![Record::new("Desk.Item").with_languages("Label", [("en", "leaf")])],
        ),
        note("N5", &[("de", "nur deutsch")]),
    ];
    for n in &mut notes {
        assert!(p.add(n).await.unwrap().is_added());
    }
    p
}

fn codes(records: &[Record]) -> Vec<Value> {
    records.iter().map(|r| r.value("Code")).collect()
}

#[tokio::test]
async fn test_export_pages_in_key_order() {
    let server = MemoryServer::new();
    let p = seeded(&server).await;

    let mut chunks = Vec::new();
    let exported = p
        .export("Desk.Note", |chunk| {
            chunks.push(codes(&chunk));
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(exported, 5);
    assert_eq!(
        chunks,
        vec![
            vec![Value::from("N1"), Value::from("N2")],
            vec![Value::from("N3"), Value::from("N4")],
            vec![Value::from("N5")],
        ]
    );

    let all = p.export_all("Desk.Note").await.unwrap();
    assert_eq!(all[3].collection("Items").len(), 1);
}

#[tokio::test]
async fn test_export_stops_when_callback_fails() {
    let server = MemoryServer::new();
    let p = seeded(&server).await;
    let mut seen = 0;
    let err = p
        .export("Desk.Note", |chunk| {
            seen += chunk.len();
            Err(Error::Internal("disk full".into()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
    assert_eq!(seen, 2);
}

#[tokio::test]
async fn test_import_counts_existing_keys() {
    let server = MemoryServer::new();
    let source = seeded(&server).await;
    let target = provider(&server, "Target").await;

    let records = source.export_all("Desk.Note").await.unwrap();
    let report = target.import(records.clone()).await.unwrap();
    assert_eq!(report, ImportReport { added: 5, existing: 0 });

    let copied = target.export_all("Desk.Note").await.unwrap();
    assert_eq!(codes(&copied), codes(&records));
    assert_eq!(
        copied[3].collection("Items")[0].languages("Label").unwrap()["en"],
        "leaf"
    );

    let mut again = records;
    again.push(note("N6", &[("en", "new")]));
    let report = target.import(again).await.unwrap();
    assert_eq!(report, ImportReport { added: 1, existing: 5 });
}

#[tokio::test]
async fn test_failed_import_chunk_rolls_back_alone() {
    let server = MemoryServer::new();
    let target = provider(&server, "Target").await;
    let records = vec![
        note("A", &[]),
        note("B", &[]),
        note("C", &[]),
        note("much-too-long-code", &[]),
        note("E", &[]),
    ];
    let err = target.import(records).await.unwrap_err();
    assert!(matches!(err, Error::Operation { ref operation, .. } if operation == "Import"));

    let db = server.database("Server=mem;Database=Target").unwrap();
    assert_eq!(db.lock().row_count("dbo", "Notes"), Some(2));
}

struct Tagger {
    calls: AtomicUsize,
}

#[async_trait]
impl Translator for Tagger {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(from, "en");
        Ok(format!("{}:{}", to, text))
    }
}

#[tokio::test]
async fn test_translation_fills_blank_languages() {
    let server = MemoryServer::new();
    let p = seeded(&server).await;
    let tagger = Tagger {
        calls: AtomicUsize::new(0),
    };

    let report = p.translate_all("Desk.Note", &tagger).await.unwrap();
    assert_eq!(report.records, 5);
    assert_eq!(report.updated, 2);
    assert_eq!(report.values, 6);
    assert_eq!(tagger.calls.load(Ordering::SeqCst), 6);

    let n1 = p.get(&Record::new("Desk.Note").with("Code", "N1")).await.unwrap().unwrap();
    let body = n1.languages("Body").unwrap();
    assert_eq!(body["de"], "de:hello");
    assert_eq!(body["fr"], "fr:hello");

    let n2 = p.get(&Record::new("Desk.Note").with("Code", "N2")).await.unwrap().unwrap();
    assert_eq!(n2.languages("Body").unwrap()["de"], "y");

    let n4 = p.get(&Record::new("Desk.Note").with("Code", "N4")).await.unwrap().unwrap();
    let label = n4.collection("Items")[0].languages("Label").unwrap();
    assert_eq!(label["fr"], "fr:leaf");

    // Nothing left to do.
    let again = p.translate_all("Desk.Note", &tagger).await.unwrap();
    assert_eq!(again.updated, 0);
    assert_eq!(again.values, 0);
}
