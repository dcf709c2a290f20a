use std::sync::LazyLock;

use prometheus::*;

use crate::history::QueryType;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("rs_search_count", "count of the searches", &["type"]).unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "rs_search_duration",
        "duration of the per-query search in seconds",
        &["type"]
    )
    .unwrap()
});

static METRIC_SEARCH_MAX_SCORE: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "rs_search_max_score",
        "max cosine similarity of the per-query search",
        &["type"],
        (0..=20).map(|x| x as f64 * 0.05).collect()
    )
    .unwrap()
});

static METRIC_DATASET_CHANGES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "rs_dataset_changes",
        "count of the dataset changes",
        &["operation"]
    )
    .unwrap()
});

/// 记录一次成功的检索
pub fn observe_search(kind: QueryType, duration: f32, max_score: Option<f32>) {
    let label = [kind.as_str()];
    METRIC_SEARCH_COUNT.with_label_values(&label).inc();
    METRIC_SEARCH_DURATION.with_label_values(&label).observe(duration as f64);
    if let Some(score) = max_score {
        METRIC_SEARCH_MAX_SCORE.with_label_values(&label).observe(score as f64);
    }
}

pub fn inc_images_added(count: usize) {
    METRIC_DATASET_CHANGES.with_label_values(&["add"]).inc_by(count as u64);
}

pub fn inc_images_removed() {
    METRIC_DATASET_CHANGES.with_label_values(&["remove"]).inc();
}

pub fn inc_rebuild() {
    METRIC_DATASET_CHANGES.with_label_values(&["rebuild"]).inc();
}

/// 以文本格式导出所有指标
pub fn gather_text() -> Result<String> {
    TextEncoder::new().encode_to_string(&prometheus::gather())
}
