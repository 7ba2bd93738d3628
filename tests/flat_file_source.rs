//! Flat-file adapter over real files in a temp dir

use rust_decimal::Decimal;
use std::path::{Path, PathBuf};

use vendor_sync::source::flat_file::{DerivedSku, FileFieldMap, FileFormat, FlatFileConfig};
use vendor_sync::source::{FlatFileSource, RawRecord, SourceAdapter};

fn fields() -> FileFieldMap {
    FileFieldMap {
        sku: vec!["SKU".into(), "Item Number".into()],
        brand: vec!["Brand".into(), "Manufacturer".into()],
        part: vec!["Part".into(), "MFG Part #".into()],
        cost: vec!["Cost".into(), "Your Price".into()],
        inventory: vec!["Qty".into(), "Available".into()],
        ..Default::default()
    }
}

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

async fn all_records(source: &mut FlatFileSource) -> Vec<RawRecord> {
    let mut records = Vec::new();
    while let Some(page) = source.next_page().await.unwrap() {
        records.extend(page.records);
    }
    records
}

#[tokio::test]
async fn test_header_aliases_and_value_cleaning() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "feed.csv",
        "\u{feff}Item Number,Manufacturer,MFG Part #,Your Price,Available\n\
         1001,Acme,\"=\"\"800110\"\"\",\"$1,204.50\",10+\n\
         1002,Acme,900-X,3.25,In Stock\n",
    );

    let mut source = FlatFileSource::new("acme-file", FlatFileConfig::new(&path, fields()));
    let records = all_records(&mut source).await;

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].sku.as_deref(), Some("1001"));
    assert_eq!(records[0].part.as_deref(), Some("800110"));
    assert_eq!(records[0].cost, Some("1204.50".parse::<Decimal>().unwrap()));
    assert_eq!(records[0].inventory_qty, Some(10));
    assert_eq!(records[0].inventory_text.as_deref(), Some("10+"));

    assert_eq!(records[1].inventory_qty, None);
    assert_eq!(records[1].inventory_text.as_deref(), Some("In Stock"));
}

#[tokio::test]
async fn test_skip_rows_with_custom_headers() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "banner.csv",
        "ACME PRICE LIST,,,\n\
         Generated 2024-05-01,,,\n\
         Acme,1-A,2.00,4\n\
         Acme,2-B,3.00,0\n",
    );

    let config = FlatFileConfig::new(&path, fields())
        .with_skip_rows(2)
        .with_headers(vec!["Brand".into(), "Part".into(), "Cost".into(), "Qty".into()]);
    let mut source = FlatFileSource::new("acme-file", config);
    let records = all_records(&mut source).await;

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].brand.as_deref(), Some("Acme"));
    assert_eq!(records[1].part.as_deref(), Some("2-B"));
    assert_eq!(records[1].inventory_qty, Some(0));
}

#[tokio::test]
async fn test_skip_rows_before_header_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "banner.csv",
        "Vendor export\nBrand,Part,Cost\nAcme,1,1.00\n",
    );

    let mut source = FlatFileSource::new(
        "acme-file",
        FlatFileConfig::new(&path, fields()).with_skip_rows(1),
    );
    let records = all_records(&mut source).await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].cost, Some(Decimal::ONE));
}

#[tokio::test]
async fn test_derived_sku_and_delimiter() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "feed.txt", "Brand;Part;Cost\nAcme;77;1.00\n");

    let mut config = FlatFileConfig::new(&path, fields()).with_derived_sku(DerivedSku {
        first: vec!["Brand".into()],
        second: vec!["Part".into()],
        separator: "_".into(),
    });
    config.delimiter = ';';
    let mut source = FlatFileSource::new("acme-file", config);
    let records = all_records(&mut source).await;

    assert_eq!(records[0].sku.as_deref(), Some("Acme_77"));
}

#[tokio::test]
async fn test_pages_and_seek() {
    let dir = tempfile::tempdir().unwrap();
    let mut csv = String::from("Brand,Part,Cost\n");
    for i in 0..7 {
        csv.push_str(&format!("Acme,{i},1.00\n"));
    }
    csv.push_str(",,\n");
    let path = write(dir.path(), "feed.csv", &csv);

    let mut source = FlatFileSource::new(
        "acme-file",
        FlatFileConfig::new(&path, fields()).with_page_size(3),
    );
    let first = source.next_page().await.unwrap().unwrap();
    assert_eq!(first.index, 0);
    assert_eq!(first.records.len(), 3);
    assert_eq!(first.total_pages, Some(3));
    assert_eq!(source.row_count(), Some(7));

    source.seek(2);
    let last = source.next_page().await.unwrap().unwrap();
    assert_eq!(last.index, 2);
    assert_eq!(last.records.len(), 1);
    assert_eq!(last.records[0].part.as_deref(), Some("6"));
    assert!(source.next_page().await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_file_yields_no_records() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FlatFileSource::new(
        "acme-file",
        FlatFileConfig::new(dir.path().join("nope.csv"), fields()),
    );
    assert!(source.next_page().await.unwrap().is_none());
    assert_eq!(source.row_count(), None);
}

#[tokio::test]
async fn test_unreadable_spreadsheet_yields_no_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "feed.xlsx", "not a zip archive");
    assert_eq!(FileFormat::from_path(&path), FileFormat::Xlsx);

    let mut source = FlatFileSource::new("acme-file", FlatFileConfig::new(&path, fields()));
    assert!(source.next_page().await.unwrap().is_none());
}

#[tokio::test(flavor = "current_thread")]
async fn test_large_feed_reads_alongside_other_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let mut csv = String::from("Brand,Part,Cost\n");
    for i in 0..20_000 {
        csv.push_str(&format!("Acme,{i},1.00\n"));
    }
    let path = write(dir.path(), "big.csv", &csv);

    let ticker = tokio::spawn(async {
        tokio::task::yield_now().await;
        "ticked"
    });
    let reader = tokio::spawn(async move {
        let mut source = FlatFileSource::new(
            "acme-file",
            FlatFileConfig::new(&path, fields()).with_page_size(1000),
        );
        all_records(&mut source).await.len()
    });

    assert_eq!(ticker.await.unwrap(), "ticked");
    assert_eq!(reader.await.unwrap(), 20_000);
}
