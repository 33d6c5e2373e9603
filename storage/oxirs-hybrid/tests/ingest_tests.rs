//! Registry, authorization and staged ingestion against PostgreSQL

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{count, database, database_with, grant, unique, StaticEndpoint};
use oxirs_hybrid::model::{BRICK_NS, RDF_TYPE};
use oxirs_hybrid::{
    DataPoint, Dataset, ErrorKind, GraphFormat, HybridConfig, ModelRequest, Permission,
    RequestContext, Stream, TripleDataset, TripleRecord,
};
use std::sync::Arc;

const COUNT_STREAMS: &str = "SELECT COUNT(*) FROM streams WHERE source = $1";
const COUNT_TRIPLES: &str = "SELECT COUNT(*) FROM triples WHERE source = $1";

#[tokio::test]
async fn test_reregistration_is_idempotent() {
    let Some(db) = database().await else { return };
    let source = unique("bldg");
    let ctx = RequestContext::with_api_key(unique("key"));
    grant(&db, ctx.api_key().unwrap().as_str(), Permission::Write, &source).await;

    let stream = Stream::new(&source, "temp1")
        .with_units("F")
        .with_brick_uri(format!("urn:{source}#temp1"))
        .with_brick_class(format!("{BRICK_NS}Air_Temperature_Sensor"));
    let first = db.register_stream(&ctx, stream.clone()).await.unwrap();
    let second = db.register_stream(&ctx, stream.clone()).await.unwrap();
    assert_eq!(first, second);

    assert_eq!(count(&db, COUNT_STREAMS, &source).await, 1);
    assert_eq!(count(&db, COUNT_TRIPLES, &source).await, 1);

    let (s, p, o): (String, String, String) =
        sqlx::query_as("SELECT s, p, o FROM triples WHERE source = $1")
            .bind(&source)
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(s, format!("<urn:{source}#temp1>"));
    assert_eq!(p, format!("<{RDF_TYPE}>"));
    assert_eq!(o, format!("<{BRICK_NS}Air_Temperature_Sensor>"));

    // Units change in place; the id does not.
    let third = db
        .register_stream(&ctx, stream.with_units("C"))
        .await
        .unwrap();
    assert_eq!(third, first);
    let units: Option<String> = sqlx::query_scalar("SELECT units FROM streams WHERE id = $1")
        .bind(first)
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(units.as_deref(), Some("C"));
}

#[tokio::test]
async fn test_duplicate_triples_stored_once() {
    let Some(db) = database().await else { return };
    let source = unique("graph");
    let ctx = RequestContext::with_api_key(unique("key"));
    grant(&db, ctx.api_key().unwrap().as_str(), Permission::Write, &source).await;

    let time = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let triple = TripleRecord::new("<urn:a>", "<urn:b>", "\"c\"");
    for _ in 0..2 {
        let dataset = TripleDataset::new(&source, "upload", time, vec![triple.clone()]);
        db.add_triples(&ctx, dataset).await.unwrap();
    }
    assert_eq!(count(&db, COUNT_TRIPLES, &source).await, 1);
}

#[tokio::test]
async fn test_last_reading_wins() {
    let Some(db) = database().await else { return };
    let source = unique("bldg");
    let ctx = RequestContext::with_api_key(unique("key"));
    grant(&db, ctx.api_key().unwrap().as_str(), Permission::Write, &source).await;
    let id = db
        .register_stream(&ctx, Stream::new(&source, "temp1"))
        .await
        .unwrap();

    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let t1 = t0 + Duration::minutes(1);
    let first = db
        .insert_readings(&ctx, Dataset::new(&source, "temp1", vec![DataPoint::new(t0, 70.1)]))
        .await
        .unwrap();
    assert_eq!(first.staged, 1);
    db.insert_readings(&ctx, Dataset::new(&source, "temp1", vec![DataPoint::new(t0, 71.0)]))
        .await
        .unwrap();
    // Duplicates inside one batch resolve to the later row.
    db.insert_readings(
        &ctx,
        Dataset::new(
            &source,
            "temp1",
            vec![DataPoint::new(t1, 1.0), DataPoint::new(t1, 2.0)],
        ),
    )
    .await
    .unwrap();

    let rows: Vec<(chrono::DateTime<Utc>, f64)> =
        sqlx::query_as("SELECT time, value FROM readings WHERE stream_id = $1 ORDER BY time")
            .bind(id)
            .fetch_all(db.pool())
            .await
            .unwrap();
    assert_eq!(rows, vec![(t0, 71.0), (t1, 2.0)]);
}

#[tokio::test]
async fn test_unauthorized_writes_change_nothing() {
    let Some(db) = database().await else { return };
    let source = unique("bldg");
    let ctx = RequestContext::with_api_key(unique("key"));
    // A read grant is not a write grant.
    grant(&db, ctx.api_key().unwrap().as_str(), Permission::Read, &source).await;

    let err = db
        .register_stream(&ctx, Stream::new(&source, "temp1").with_brick_uri("urn:x"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let err = db
        .insert_readings(
            &ctx,
            Dataset::new(&source, "temp1", vec![DataPoint::new(Utc::now(), 1.0)]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let err = db
        .add_triples(
            &ctx,
            TripleDataset::new(
                &source,
                "upload",
                Utc::now(),
                vec![TripleRecord::new("<urn:a>", "<urn:b>", "<urn:c>")],
            ),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let err = db
        .register_stream(&RequestContext::anonymous(), Stream::new(&source, "temp1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    assert_eq!(count(&db, COUNT_STREAMS, &source).await, 0);
    assert_eq!(count(&db, COUNT_TRIPLES, &source).await, 0);
    assert!(!db
        .check_authorized(&ctx, Permission::Write, &source)
        .await
        .unwrap());
    assert!(db
        .check_authorized(&ctx, Permission::Read, &source)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_readings_need_registered_stream() {
    let Some(db) = database().await else { return };
    let source = unique("bldg");
    let ctx = RequestContext::with_api_key(unique("key"));
    grant(&db, ctx.api_key().unwrap().as_str(), Permission::Write, &source).await;

    let err = db
        .insert_readings(
            &ctx,
            Dataset::new(&source, "ghost", vec![DataPoint::new(Utc::now(), 1.0)]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(count(&db, COUNT_STREAMS, &source).await, 0);
}

#[tokio::test]
async fn test_bad_row_rolls_back_batch() {
    // One connection, so the staging check below sees the same session.
    let Some(db) = database_with(
        HybridConfig::default(),
        Arc::new(StaticEndpoint::default()),
        1,
    )
    .await
    else {
        return;
    };
    let source = unique("graph");
    let ctx = RequestContext::with_api_key(unique("key"));
    grant(&db, ctx.api_key().unwrap().as_str(), Permission::Write, &source).await;

    let time = Utc::now();
    let batch = vec![
        TripleRecord::new("<urn:a>", "<urn:b>", "<urn:c>"),
        TripleRecord::new("<urn:a>", "", "<urn:c>"),
    ];
    let err = db
        .add_triples(&ctx, TripleDataset::new(&source, "upload", time, batch))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(count(&db, COUNT_TRIPLES, &source).await, 0);

    let staging: Option<String> =
        sqlx::query_scalar("SELECT to_regclass('pg_temp.triples_staging')::text")
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert!(staging.is_none());

    // Staging is gone, so the same connection can ingest again.
    let stats = db
        .add_triples(
            &ctx,
            TripleDataset::new(
                &source,
                "upload",
                time,
                vec![TripleRecord::new("<urn:a>", "<urn:b>", "<urn:c>")],
            ),
        )
        .await
        .unwrap();
    assert_eq!(stats.applied, 1);
}

#[tokio::test]
async fn test_undecodable_term_rejected_before_commit() {
    let Some(db) = database().await else { return };
    let source = unique("graph");
    let ctx = RequestContext::with_api_key(unique("key"));
    grant(&db, ctx.api_key().unwrap().as_str(), Permission::Write, &source).await;

    let time = Utc::now();
    let batch = vec![
        TripleRecord::new("<urn:a>", "<urn:b>", "<urn:c>"),
        TripleRecord::new("urn:bare", "<urn:p>", "<urn:o>"),
    ];
    let err = db
        .add_triples(&ctx, TripleDataset::new(&source, "upload", time, batch))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(count(&db, COUNT_TRIPLES, &source).await, 0);

    // The snapshot of the graph stays readable.
    let mut out = Vec::new();
    let written = db
        .graph_as_of(
            &RequestContext::anonymous(),
            &ModelRequest::new(&source, time),
            GraphFormat::NTriples,
            &mut out,
        )
        .await
        .unwrap();
    assert_eq!(written, 0);

    let err = db
        .register_stream(&ctx, Stream::new(&source, "temp1").with_brick_uri("not an iri"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(count(&db, COUNT_STREAMS, &source).await, 0);
}
