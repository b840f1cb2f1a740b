//! CSV-simulated sources through the default hub

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use common::{eventually, tag, tags, test_config};
use errors::ErrorCode;
use idh_hub::Hub;
use idh_model::{SourceFlags, SourceType};
use std::path::Path;

const SERIES: &str = "namespace_index,tag_name,value,quality\n\
                      2,MV1,10,\n\
                      2,MV1,20,\n\
                      2,MV1,30,\n\
                      2,CV1,0.5,0x40\n";

fn write_fixture(dir: &Path) -> String {
    let path = dir.join("simulated.csv");
    std::fs::write(&path, SERIES).unwrap();
    format!("csv://{}", path.display())
}

#[tokio::test]
async fn test_csv_series_cycle_through_group() {
    let dir = tempfile::tempdir().unwrap();
    let schema = write_fixture(dir.path());
    let hub = Hub::new(test_config());
    let instance = hub.instance_create();
    let source = hub
        .source_create(instance, SourceType::Csv, &schema, 20, SourceFlags::SUBSCRIBE)
        .unwrap();
    let group = hub.group_create(source, "csv").unwrap();

    let subscribed = hub
        .group_subscribe(group, &tags(&["MV1", "CV1", "DV3"]))
        .await
        .unwrap();
    assert_eq!(subscribed.elements[2], Err(ErrorCode::InvalidTag));
    let handles = subscribed.handles();

    let mut seen = Vec::new();
    let cycled = eventually(|| {
        let value = hub.group_read_values(group, &handles[..1]).unwrap().values()[0].value;
        if !seen.contains(&(value as i64)) {
            seen.push(value as i64);
        }
        seen.len() == 3
    })
    .await;
    assert!(cycled, "saw {seen:?}");

    let cv1 = hub.group_read_values(group, &handles[1..2]).unwrap().values()[0];
    assert_eq!(cv1.value, 0.5);
    assert!(!cv1.quality().is_good());

    hub.instance_destroy(instance).await.unwrap();
}

#[tokio::test]
async fn test_csv_write_and_browse() {
    let dir = tempfile::tempdir().unwrap();
    let schema = write_fixture(dir.path());
    let hub = Hub::new(test_config());
    let instance = hub.instance_create();
    // Interval 0: values only change on write
    let source = hub
        .source_create(instance, SourceType::Csv, &schema, 0, SourceFlags::SUBSCRIBE)
        .unwrap();

    let written = hub
        .source_write_values(source, &[99.0], &[tag("CV1")])
        .await
        .unwrap();
    assert!(written.elements[0].is_ok());
    let read = hub
        .source_read_values(source, &[tag("CV1")])
        .await
        .unwrap();
    assert_eq!(read.values()[0].value, 99.0);
    assert!(read.values()[0].quality().is_good());

    let err = hub.source_browse_root(source, 10).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnsupportedType);
}

#[tokio::test]
async fn test_missing_csv_file() {
    let hub = Hub::new(test_config());
    let instance = hub.instance_create();
    let source = hub
        .source_create(
            instance,
            SourceType::Csv,
            "csv:///definitely/not/here.csv",
            100,
            SourceFlags::SUBSCRIBE,
        )
        .unwrap();

    let err = hub
        .source_read_values(source, &[tag("MV1")])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidServer);
}
