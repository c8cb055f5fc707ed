//! The pages view: one denormalized row per page per preset date range.

use super::daterange::{date_ranges_with_comparisons, DateRange, DateRangeWithComparison};
use super::metrics_common::{top_level_aggregations, top_level_source_columns};
use super::utils::ViewsUtils;
use crate::mongo::MongoDb;
use crate::objectid::ObjectId;
use crate::schemas::util::{dt_ms, list_of, oid, oid_list, schema_of, struct_of};
use crate::schemas::{parquet_models, MongoCollection, ParquetModel, SyncType};
use crate::storage::datetime_lit;
use chrono::Utc;
use color_eyre::Result;
use log::info;
use polars::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

/// Rows per insert batch when streaming a computed view into the database.
const PAGES_VIEW_BATCH: usize = 20_000;

const TOP_SEARCHTERMS: usize = 200;
const TOP_ACTIVITY_MAP_LINKS: usize = 100;

pub fn view_model(dir_path: &Path) -> MongoCollection {
    // Identifier decoding happens in prepare_for_insert; the computed frame
    // is already in on-disk shape, so both transforms stay identity.
    let model = ParquetModel::base(
        "view_pages",
        "view_pages.parquet",
        schema_of(vec![
            ("_id", oid()),
            (
                "dateRange",
                struct_of(vec![("start", dt_ms()), ("end", dt_ms())]),
            ),
            ("url", DataType::String),
            (
                "page",
                struct_of(vec![
                    ("_id", oid()),
                    ("url", DataType::String),
                    ("title", DataType::String),
                    ("lang", DataType::String),
                    ("redirect", DataType::String),
                    ("owners", DataType::String),
                    ("sections", DataType::String),
                ]),
            ),
            ("pageStatus", DataType::String),
            ("visits", DataType::Int64),
            ("views", DataType::Int64),
            ("visitors", DataType::Int64),
            ("dyf_yes", DataType::Int64),
            ("dyf_no", DataType::Int64),
            ("dyf_submit", DataType::Int64),
            ("gsc_total_clicks", DataType::Int64),
            ("gsc_total_impressions", DataType::Int64),
            ("gsc_total_ctr", DataType::Float64),
            ("gsc_total_position", DataType::Float64),
            ("average_time_spent", DataType::Float64),
            ("bouncerate", DataType::Float64),
            ("numComments", DataType::Int32),
            (
                "aa_searchterms",
                list_of(struct_of(vec![
                    ("term", DataType::String),
                    ("clicks", DataType::Int64),
                    ("position", DataType::Float64),
                ])),
            ),
            (
                "gsc_searchterms",
                list_of(struct_of(vec![
                    ("term", DataType::String),
                    ("clicks", DataType::Int64),
                    ("ctr", DataType::Float64),
                    ("impressions", DataType::Int64),
                    ("position", DataType::Float64),
                ])),
            ),
            (
                "activity_map",
                list_of(struct_of(vec![
                    ("link", DataType::String),
                    ("clicks", DataType::Int64),
                ])),
            ),
            ("tasks", oid_list()),
            ("projects", oid_list()),
            ("lastUpdated", dt_ms()),
        ]),
        dir_path,
    );
    MongoCollection::new("view_pages", SyncType::Simple, model)
}

pub fn temp_filename(range: &DateRange) -> String {
    format!("view_pages_{}.parquet", range.slug())
}

pub struct PagesViewService<'a> {
    db: &'a MongoDb,
    utils: &'a ViewsUtils,
    model: MongoCollection,
    dependencies: HashMap<&'static str, ParquetModel>,
    pub date_ranges: Vec<DateRangeWithComparison>,
}

impl<'a> PagesViewService<'a> {
    pub fn new(db: &'a MongoDb, utils: &'a ViewsUtils) -> Self {
        PagesViewService {
            db,
            utils,
            model: view_model(&utils.parquet_dir_path),
            dependencies: parquet_models(&utils.parquet_dir_path),
            date_ranges: date_ranges_with_comparisons(Utc::now().date_naive()),
        }
    }

    pub fn recalculate(&self) -> Result<()> {
        let started = Instant::now();
        info!("Recalculating pages view...");

        self.db.driver.delete_many(self.model.collection, &json!({}))?;
        self.calculate_and_write_view_files()?;
        self.insert_view_from_temp()?;

        info!(
            "Finished recalculating pages view in {}",
            crate::utils::format_duration(started.elapsed())
        );
        Ok(())
    }

    fn each_range(&self) -> impl Iterator<Item = DateRange> + '_ {
        self.date_ranges
            .iter()
            .flat_map(|dr| [dr.range, dr.comparison])
    }

    fn calculate_and_write_view_files(&self) -> Result<()> {
        for range in self.each_range() {
            let started = Instant::now();
            info!("Writing pages view for {} to {}...", range.start, range.end);
            let lf = self.view_date_range_data(&range)?;
            self.utils.sink_temp(lf, &temp_filename(&range))?;
            info!("  Finished in {}", crate::utils::format_duration(started.elapsed()));
        }
        Ok(())
    }

    fn insert_view_from_temp(&self) -> Result<()> {
        for range in self.each_range() {
            let started = Instant::now();
            info!("Inserting pages view for {} to {}...", range.start, range.end);

            let lf = self.utils.scan_temp(&temp_filename(&range))?;
            let mut offset: i64 = 0;
            loop {
                let df = lf
                    .clone()
                    .slice(offset, PAGES_VIEW_BATCH as IdxSize)
                    .collect()?;
                if df.height() == 0 {
                    break;
                }
                // Unordered insert: duplicates don't block the rest of the batch.
                self.db.insert_many(&self.model, &df, false, false)?;
                if df.height() < PAGES_VIEW_BATCH {
                    break;
                }
                offset += PAGES_VIEW_BATCH as i64;
            }

            info!("  Finished in {}", crate::utils::format_duration(started.elapsed()));
        }
        Ok(())
    }

    /// `url -> page` lookup with a liveness classification.
    fn pages_lookup(&self) -> Result<LazyFrame> {
        Ok(self.dependencies["pages"]
            .lf()?
            .select([
                col("_id"),
                col("url"),
                col("title"),
                col("lang"),
                when(col("is_404"))
                    .then(lit("404"))
                    .otherwise(
                        when(col("redirect").is_not_null())
                            .then(lit("Redirected"))
                            .otherwise(lit("Live")),
                    )
                    .alias("pageStatus"),
                col("redirect"),
                col("owners"),
                col("sections"),
                col("tasks"),
                col("projects"),
            ])
            .sort(["url"], SortMultipleOptions::default()))
    }

    fn view_date_range_data(&self, range: &DateRange) -> Result<LazyFrame> {
        let pages = self.pages_lookup()?.collect()?;
        let num_pages = pages.height();

        let doc_ids: Vec<String> = (0..num_pages).map(|_| ObjectId::new().to_hex()).collect();
        let id_series = Series::new("_id".into(), doc_ids);

        let pages = pages.lazy().select([
            lit(id_series).alias("_id"),
            as_struct(vec![
                datetime_lit(range.start_datetime()).alias("start"),
                datetime_lit(range.end_datetime()).alias("end"),
            ])
            .alias("dateRange"),
            col("url"),
            as_struct(vec![
                col("_id"),
                col("url"),
                col("title"),
                col("lang"),
                col("redirect"),
                col("owners"),
                col("sections"),
            ])
            .alias("page"),
            col("tasks"),
            col("projects"),
            col("pageStatus"),
            datetime_lit(Utc::now().naive_utc()).alias("lastUpdated"),
        ]);

        let join_on_url = |lf: LazyFrame, other: LazyFrame| -> LazyFrame {
            let mut args = JoinArgs::new(JoinType::Left);
            args.coalesce = JoinCoalesce::CoalesceColumns;
            args.maintain_order = MaintainOrderJoin::Left;
            lf.join(other, [col("url")], [col("url")], args)
        };

        let mut lf = pages;
        lf = join_on_url(lf, self.top_level_page_metrics(range)?);
        lf = join_on_url(lf, self.num_comments(range)?);
        lf = join_on_url(lf, self.aa_searchterms(range)?);
        lf = join_on_url(lf, self.gsc_searchterms(range)?);
        lf = join_on_url(lf, self.activity_map(range)?);
        Ok(lf)
    }

    fn in_range(&self, range: &DateRange) -> Expr {
        col("date").is_between(
            datetime_lit(range.start_datetime()),
            datetime_lit(range.end_datetime()),
            ClosedInterval::Both,
        )
    }

    fn top_level_page_metrics(&self, range: &DateRange) -> Result<LazyFrame> {
        Ok(self.dependencies["page_metrics"]
            .lf()?
            .select(top_level_source_columns())
            .filter(self.in_range(range))
            .group_by([col("url")])
            .agg(top_level_aggregations()))
    }

    fn num_comments(&self, range: &DateRange) -> Result<LazyFrame> {
        Ok(self.dependencies["feedback"]
            .lf()?
            .select([col("date"), col("url")])
            .filter(self.in_range(range))
            .group_by([col("url")])
            .agg([len().alias("numComments")])
            .with_columns([col("numComments").cast(DataType::Int32)]))
    }

    fn aa_searchterms(&self, range: &DateRange) -> Result<LazyFrame> {
        Ok(self.dependencies["aa_searchterms"]
            .lf()?
            .select([col("date"), col("url"), col("term"), col("clicks"), col("position")])
            .filter(self.in_range(range))
            .with_columns([col("term").str().to_lowercase()])
            .group_by([col("url"), col("term")])
            .agg([
                col("clicks").sum(),
                col("position").mean().round_sig_figs(3),
            ])
            .group_by([col("url")])
            .agg([top_k_structs(
                vec![col("term"), col("clicks"), col("position")],
                TOP_SEARCHTERMS,
            )
            .alias("aa_searchterms")]))
    }

    fn gsc_searchterms(&self, range: &DateRange) -> Result<LazyFrame> {
        Ok(self.dependencies["gsc_searchterms"]
            .lf()?
            .select([
                col("date"),
                col("url"),
                col("term"),
                col("clicks"),
                col("ctr"),
                col("impressions"),
                col("position"),
            ])
            .filter(self.in_range(range))
            .with_columns([col("term").str().to_lowercase()])
            .group_by([col("url"), col("term")])
            .agg([
                col("clicks").sum(),
                col("ctr").mean().round_sig_figs(3),
                col("impressions").sum(),
                col("position").mean().round_sig_figs(3),
            ])
            .group_by([col("url")])
            .agg([top_k_structs(
                vec![
                    col("term"),
                    col("clicks"),
                    col("ctr"),
                    col("impressions"),
                    col("position"),
                ],
                TOP_SEARCHTERMS,
            )
            .alias("gsc_searchterms")]))
    }

    fn activity_map(&self, range: &DateRange) -> Result<LazyFrame> {
        Ok(self.dependencies["activity_map"]
            .lf()?
            .select([col("date"), col("url"), col("link"), col("clicks")])
            .filter(self.in_range(range))
            .with_columns([col("link").str().to_lowercase()])
            .group_by([col("url"), col("link")])
            .agg([col("clicks").sum()])
            .group_by([col("url")])
            .agg([top_k_structs(vec![col("link"), col("clicks")], TOP_ACTIVITY_MAP_LINKS)
                .alias("activity_map")]))
    }
}

/// In a group-by aggregation: the top-`k` elements by `clicks`, packed as a
/// list of structs over the given fields.
pub(crate) fn top_k_structs(fields: Vec<Expr>, k: usize) -> Expr {
    as_struct(fields)
        .sort_by(
            [col("clicks")],
            SortMultipleOptions::default().with_order_descending(true),
        )
        .head(Some(k))
}
