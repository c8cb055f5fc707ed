//! Shared top-level metric aggregations used by both views.

use polars::prelude::*;

/// Per-group aggregations over page metrics: additive counters are summed,
/// rate/position metrics are averaged.
pub fn top_level_aggregations() -> Vec<Expr> {
    vec![
        col("visits").sum(),
        col("views").sum(),
        col("visitors").sum(),
        col("dyf_yes").sum(),
        col("dyf_no").sum(),
        col("dyf_submit").sum(),
        col("gsc_total_clicks").sum(),
        col("gsc_total_impressions").sum(),
        col("gsc_total_ctr").mean(),
        col("gsc_total_position").mean(),
        col("average_time_spent").mean(),
        col("bouncerate").mean(),
    ]
}

/// The columns the aggregations consume, for narrow scans.
pub fn top_level_source_columns() -> Vec<Expr> {
    vec![
        col("url"),
        col("date"),
        col("visits"),
        col("views"),
        col("visitors"),
        col("dyf_yes"),
        col("dyf_no"),
        col("dyf_submit"),
        col("gsc_total_clicks"),
        col("gsc_total_impressions"),
        col("gsc_total_ctr"),
        col("gsc_total_position"),
        col("average_time_spent"),
        col("bouncerate"),
    ]
}
