mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::*;
use image::{DynamicImage, Rgb, RgbImage};
use rsretrieval::captions::build_caption_collection;
use rsretrieval::{
    Collection, DatasetManager, Error, RetrievalService, SearchHit, SharedCollection, UploadedFile,
};
use rstest::*;
use tempfile::TempDir;

#[fixture]
fn temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

#[fixture]
fn service() -> RetrievalService {
    RetrievalService::new(embedder())
}

/// 添加 a.jpg、b.jpg、c.jpg，分别为红、绿、蓝
#[fixture]
fn abc(temp_dir: TempDir) -> (TempDir, DatasetManager) {
    let dataset = dataset(temp_dir.path(), Some(embedder()));
    let files = [
        UploadedFile::new("a.jpg", jpeg(RED)),
        UploadedFile::new("b.jpg", jpeg(GREEN)),
        UploadedFile::new("c.jpg", jpeg(BLUE)),
    ];
    let report = dataset.add_images(&files).unwrap();
    assert_eq!(report.added, 3, "{:?}", report.failed);
    (temp_dir, dataset)
}

fn solid(color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb(color)))
}

fn labels(hits: &[SearchHit]) -> Vec<&str> {
    hits.iter().map(|hit| hit.label.as_str()).collect()
}

#[rstest]
fn test_empty_index_returns_nothing(temp_dir: TempDir, service: RetrievalService) {
    let collection = SharedCollection::with(
        "图片索引",
        temp_dir.path().join("image.index"),
        temp_dir.path().join("image_meta.json"),
        Some(Collection::new(3)),
    );
    let hits = service.search_by_text("red roofs", 5, &collection).unwrap();
    assert!(hits.is_empty());
}

#[rstest]
fn test_missing_index_is_not_ready(temp_dir: TempDir, service: RetrievalService) {
    let collection = SharedCollection::open(
        "图片索引",
        temp_dir.path().join("image.index"),
        temp_dir.path().join("image_meta.json"),
    );
    let err = service.search_by_image(&solid(RED), 5, &collection).unwrap_err();
    assert!(matches!(err, Error::ResourceMissing { .. }));
}

#[rstest]
fn test_invalid_queries(abc: (TempDir, DatasetManager), service: RetrievalService) {
    let (_dir, dataset) = abc;
    let err = service.search_by_text("   ", 5, dataset.collection()).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    let err = service.search_by_text("red", 0, dataset.collection()).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[rstest]
fn test_add_assigns_positions_in_order(abc: (TempDir, DatasetManager)) {
    let (_dir, dataset) = abc;
    let collection = dataset.collection().read().unwrap();
    let entries = collection.metadata().entries();
    assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), [0, 1, 2]);
    assert_eq!(
        entries.iter().map(|e| e.filename.as_str()).collect::<Vec<_>>(),
        ["a.jpg", "b.jpg", "c.jpg"]
    );
    assert_eq!(collection.index().len(), collection.metadata().len());
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(10)]
fn test_search_is_ranked(
    abc: (TempDir, DatasetManager),
    service: RetrievalService,
    #[case] k: usize,
) {
    let (_dir, dataset) = abc;
    let hits = service.search_by_image(&solid(GREEN), k, dataset.collection()).unwrap();
    assert_eq!(hits.len(), k.min(3));
    assert_eq!(hits[0].label, "b.jpg");
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(hits.iter().all(|hit| hit.score <= 1. + 1e-5));
}

#[rstest]
fn test_text_to_image(abc: (TempDir, DatasetManager), service: RetrievalService) {
    let (_dir, dataset) = abc;
    let hits = service.search_by_text("a blue lake", 1, dataset.collection()).unwrap();
    assert_eq!(labels(&hits), ["c.jpg"]);
}

#[rstest]
fn test_reload_gives_same_results(abc: (TempDir, DatasetManager), service: RetrievalService) {
    let (dir, dataset) = abc;
    let before = service.search_by_image(&solid([120, 200, 40]), 3, dataset.collection()).unwrap();

    let reopened = SharedCollection::open(
        "图片索引",
        dir.path().join("image.index"),
        dir.path().join("image_meta.json"),
    );
    let after = service.search_by_image(&solid([120, 200, 40]), 3, &reopened).unwrap();
    assert_eq!(before, after);
}

#[rstest]
fn test_rebuild_keeps_label_set(abc: (TempDir, DatasetManager)) {
    let (_dir, dataset) = abc;
    let label_set = |dataset: &DatasetManager| {
        let collection = dataset.collection().read().unwrap();
        collection.metadata().labels().map(String::from).collect::<BTreeSet<_>>()
    };
    let before = label_set(&dataset);
    assert_eq!(dataset.rebuild_index().unwrap(), 3);
    assert_eq!(label_set(&dataset), before);
}

#[rstest]
fn test_removed_image_is_stale_until_rebuild(
    abc: (TempDir, DatasetManager),
    service: RetrievalService,
) {
    let (_dir, dataset) = abc;
    dataset.remove_image("b.jpg").unwrap();
    assert!(!dataset.images_dir().join("b.jpg").exists());
    assert!(dataset.collection().needs_rebuild());

    // 重建前索引仍然包含已删除的图片
    let hits = service.search_by_image(&solid(GREEN), 3, dataset.collection()).unwrap();
    assert_eq!(hits[0].label, "b.jpg");

    assert_eq!(dataset.rebuild_index().unwrap(), 2);
    assert!(!dataset.collection().needs_rebuild());
    let hits = service.search_by_image(&solid(GREEN), 3, dataset.collection()).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(!labels(&hits).contains(&"b.jpg"));
}

#[rstest]
fn test_image_to_caption(temp_dir: TempDir, service: RetrievalService) {
    let captions = [
        "many green trees are around the pond",
        "a red running track surrounds the field",
        "   ",
        "the blue sea is calm",
    ]
    .map(String::from);

    let (collection, skipped) = build_caption_collection(service.embedder().as_ref(), &captions);
    assert_eq!(skipped, 1);
    assert_eq!(collection.len(), 3);

    let shared = Arc::new(SharedCollection::with(
        "描述索引",
        temp_dir.path().join("caption.index"),
        temp_dir.path().join("caption_meta.json"),
        None,
    ));
    shared.replace(collection).unwrap();

    let hits = service.search_by_image(&solid(RED), 1, &shared).unwrap();
    assert_eq!(labels(&hits), ["a red running track surrounds the field"]);
}
