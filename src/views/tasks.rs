//! The tasks view: one denormalized row per task per preset date range,
//! aggregated from the pages view plus calldrivers and survey data.

use super::daterange::{date_ranges_with_comparisons, DateRange, DateRangeWithComparison};
use super::pages::{temp_filename as pages_temp_filename, top_k_structs};
use super::utils::ViewsUtils;
use crate::mongo::MongoDb;
use crate::objectid::ObjectId;
use crate::schemas::util::{dt_ms, list_of, oid, schema_of, struct_of};
use crate::schemas::{parquet_models, MongoCollection, ParquetModel, SyncType};
use crate::storage::datetime_lit;
use chrono::{Duration, Utc};
use color_eyre::Result;
use log::info;
use polars::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

/// Tasks view rows are wide; insert in small batches.
const TASKS_VIEW_BATCH: usize = 1_000;

const TOP_TASK_SEARCHTERMS: usize = 100;

pub fn view_model(dir_path: &Path) -> MongoCollection {
    let model = ParquetModel::base(
        "view_tasks",
        "view_tasks.parquet",
        schema_of(vec![
            ("_id", oid()),
            (
                "dateRange",
                struct_of(vec![("start", dt_ms()), ("end", dt_ms())]),
            ),
            (
                "task",
                struct_of(vec![
                    ("_id", oid()),
                    ("airtable_id", DataType::String),
                    ("title", DataType::String),
                    ("title_fr", DataType::String),
                    ("group", DataType::String),
                    ("subgroup", DataType::String),
                    ("topic", DataType::String),
                    ("subtopic", DataType::String),
                    ("sub_subtopic", list_of(DataType::String)),
                    ("user_type", list_of(DataType::String)),
                    ("tpc_ids", list_of(DataType::Int32)),
                    ("program", DataType::String),
                    ("service", DataType::String),
                    ("user_journey", list_of(DataType::String)),
                    ("status", DataType::String),
                    ("channel", list_of(DataType::String)),
                    ("core", list_of(DataType::String)),
                    ("portfolio", DataType::String),
                ]),
            ),
            ("totalCalls", DataType::Int64),
            (
                "calldriversEnquiry",
                list_of(struct_of(vec![
                    ("enquiry_line", DataType::String),
                    ("calls", DataType::Int64),
                ])),
            ),
            (
                "callsByTopic",
                list_of(struct_of(vec![
                    ("tpc_id", DataType::Int32),
                    ("enquiry_line", DataType::String),
                    ("topic", DataType::String),
                    ("subtopic", DataType::String),
                    ("sub_subtopic", DataType::String),
                    ("calls", DataType::Int64),
                ])),
            ),
            ("callsPerVisit", DataType::Float64),
            ("dyfNo", DataType::Int64),
            ("dyfNoPerVisit", DataType::Float64),
            ("dyfYes", DataType::Int64),
            ("visits", DataType::Int64),
            ("gscTotalClicks", DataType::Int64),
            ("gscTotalImpressions", DataType::Int64),
            ("gscTotalCtr", DataType::Float64),
            ("gscTotalPosition", DataType::Float64),
            ("survey", DataType::Int64),
            ("survey_completed", DataType::Int64),
            ("tmf_ranking_index", DataType::Float64),
            ("cops", DataType::Boolean),
            ("numComments", DataType::Int64),
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
                "metricsByDay",
                list_of(struct_of(vec![
                    ("date", dt_ms()),
                    ("calls", DataType::Int64),
                    ("callsPerVisit", DataType::Float64),
                    ("dyfNo", DataType::Int64),
                    ("dyfNoPerVisit", DataType::Float64),
                    ("dyfYes", DataType::Int64),
                    ("numComments", DataType::Int64),
                    ("commentsPerVisit", DataType::Float64),
                    ("visits", DataType::Int64),
                ])),
            ),
            ("pages", list_of(DataType::Struct(vec![]))),
            ("projects", list_of(DataType::Struct(vec![]))),
            ("ux_tests", list_of(DataType::Struct(vec![]))),
            ("lastUpdated", dt_ms()),
        ]),
        dir_path,
    );
    MongoCollection::new("view_tasks", SyncType::Simple, model)
}

pub fn temp_filename(range: &DateRange) -> String {
    format!("view_tasks_{}.parquet", range.slug())
}

/// Reference frames shared by every date range: tasks with their joined
/// projects/ux tests, page-url mappings, and tpc/gc-task lookups.
struct TasksViewContext {
    tasks: DataFrame,
    urls_by_task: DataFrame,
    tasks_by_tpc_id: DataFrame,
    tasks_by_gc_task: DataFrame,
}

impl TasksViewContext {
    fn build(dependencies: &HashMap<&'static str, ParquetModel>) -> Result<Self> {
        let projects_by_task = dependencies["projects"]
            .lf()?
            .select([
                col("_id"),
                col("title"),
                col("description"),
                col("attachments"),
                col("tasks"),
            ])
            .explode(by_name(["tasks"], true))
            .filter(col("tasks").is_not_null())
            .group_by([col("tasks")])
            .agg([as_struct(vec![
                col("_id"),
                col("title"),
                col("description"),
                col("attachments"),
            ])
            .alias("projects")])
            .rename(["tasks"], ["_id"], true);

        let ux_tests_by_task = dependencies["ux_tests"]
            .lf()?
            .explode(by_name(["tasks"], true))
            .filter(col("tasks").is_not_null())
            .group_by([col("tasks")])
            .agg([
                as_struct(vec![
                    col("_id"),
                    col("title"),
                    col("airtable_id"),
                    col("project"),
                    col("subtask"),
                    col("date"),
                    col("success_rate"),
                    col("test_type"),
                    col("session_type"),
                    col("scenario"),
                    col("vendor"),
                    col("version_tested"),
                    col("total_users"),
                    col("successful_users"),
                    col("status"),
                    col("cops"),
                ])
                .alias("ux_tests"),
                col("cops").max().alias("cops"),
            ])
            .rename(["tasks"], ["_id"], true);

        let left_coalesce = || {
            let mut args = JoinArgs::new(JoinType::Left);
            args.coalesce = JoinCoalesce::CoalesceColumns;
            args
        };

        let tasks = dependencies["tasks"]
            .lf()?
            .drop(by_name(["projects", "ux_tests"], true))
            .join(projects_by_task, [col("_id")], [col("_id")], left_coalesce())
            .join(ux_tests_by_task, [col("_id")], [col("_id")], left_coalesce())
            .collect()?;

        let urls_by_task = dependencies["pages"]
            .lf()?
            .select([col("url"), col("tasks")])
            .explode(by_name(["tasks"], true))
            .filter(col("tasks").is_not_null())
            .rename(["tasks"], ["task"], true)
            .collect()?;

        let tasks_by_tpc_id = tasks
            .clone()
            .lazy()
            .select([col("_id"), col("tpc_ids")])
            .explode(by_name(["tpc_ids"], true))
            .filter(col("tpc_ids").is_not_null())
            .group_by([col("tpc_ids")])
            .agg([col("_id").alias("tasks")])
            .rename(["tpc_ids"], ["tpc_id"], true)
            .collect()?;

        let tasks_by_gc_task = tasks
            .clone()
            .lazy()
            .select([
                col("_id"),
                col("gc_tasks")
                    .list()
                    .eval(col("").struct_().field_by_name("title"))
                    .alias("gc_task"),
            ])
            .explode(by_name(["gc_task"], true))
            .filter(col("gc_task").is_not_null())
            .group_by([col("gc_task")])
            .agg([col("_id").alias("tasks")])
            .collect()?;

        Ok(TasksViewContext {
            tasks,
            urls_by_task,
            tasks_by_tpc_id,
            tasks_by_gc_task,
        })
    }
}

pub struct TasksViewService<'a> {
    db: &'a MongoDb,
    utils: &'a ViewsUtils,
    model: MongoCollection,
    dependencies: HashMap<&'static str, ParquetModel>,
    pub date_ranges: Vec<DateRangeWithComparison>,
}

impl<'a> TasksViewService<'a> {
    pub fn new(db: &'a MongoDb, utils: &'a ViewsUtils) -> Self {
        TasksViewService {
            db,
            utils,
            model: view_model(&utils.parquet_dir_path),
            dependencies: parquet_models(&utils.parquet_dir_path),
            date_ranges: date_ranges_with_comparisons(Utc::now().date_naive()),
        }
    }

    pub fn recalculate(&self) -> Result<()> {
        let started = Instant::now();
        info!("Recalculating tasks view...");

        let context = TasksViewContext::build(&self.dependencies)?;

        self.db.driver.delete_many(self.model.collection, &json!({}))?;

        for range in self.each_range() {
            let range_started = Instant::now();
            info!("Writing tasks view for {} to {}...", range.start, range.end);
            let lf = self.view_date_range_data(&context, &range)?;
            self.utils.sink_temp(lf, &temp_filename(&range))?;
            info!(
                "  Finished in {}",
                crate::utils::format_duration(range_started.elapsed())
            );
        }

        self.insert_view_from_temp()?;

        info!(
            "Finished recalculating tasks view in {}",
            crate::utils::format_duration(started.elapsed())
        );
        Ok(())
    }

    fn each_range(&self) -> impl Iterator<Item = DateRange> + '_ {
        self.date_ranges
            .iter()
            .flat_map(|dr| [dr.range, dr.comparison])
    }

    fn insert_view_from_temp(&self) -> Result<()> {
        for range in self.each_range() {
            let started = Instant::now();
            info!("Inserting tasks view for {} to {}...", range.start, range.end);

            let lf = self.utils.scan_temp(&temp_filename(&range))?;
            let mut offset: i64 = 0;
            loop {
                let df = lf
                    .clone()
                    .slice(offset, TASKS_VIEW_BATCH as IdxSize)
                    .collect()?;
                if df.height() == 0 {
                    break;
                }
                self.db.insert_many(&self.model, &df, false, false)?;
                if df.height() < TASKS_VIEW_BATCH {
                    break;
                }
                offset += TASKS_VIEW_BATCH as i64;
            }

            info!("  Finished in {}", crate::utils::format_duration(started.elapsed()));
        }
        Ok(())
    }

    fn scan_pages_view(&self, range: &DateRange) -> Result<LazyFrame> {
        self.utils.scan_temp(&pages_temp_filename(range))
    }

    fn in_range(&self, range: &DateRange) -> Expr {
        col("date").is_between(
            datetime_lit(range.start_datetime()),
            datetime_lit(range.end_datetime()),
            ClosedInterval::Both,
        )
    }

    fn view_date_range_data(
        &self,
        context: &TasksViewContext,
        range: &DateRange,
    ) -> Result<LazyFrame> {
        self.write_temp_aa_searchterms(range)?;
        self.write_temp_gsc_searchterms(range)?;
        self.write_temp_metrics_by_day(context, range)?;

        let num_tasks = context.tasks.height();
        let doc_ids: Vec<String> = (0..num_tasks).map(|_| ObjectId::new().to_hex()).collect();
        let id_series = Series::new("_doc_id".into(), doc_ids);

        let view = context.tasks.clone().lazy().select([
            lit(id_series),
            col("_id"),
            as_struct(vec![
                col("_id"),
                col("airtable_id"),
                col("title"),
                col("title_fr"),
                col("group"),
                col("subgroup"),
                col("topic"),
                col("subtopic"),
                col("sub_subtopic"),
                col("user_type"),
                col("tpc_ids"),
                col("program"),
                col("service"),
                col("user_journey"),
                col("status"),
                col("channel"),
                col("core"),
                col("portfolio"),
            ])
            .alias("task"),
            col("projects"),
            col("ux_tests"),
            col("cops"),
            as_struct(vec![
                datetime_lit(range.start_datetime()).alias("start"),
                datetime_lit(range.end_datetime()).alias("end"),
            ])
            .alias("dateRange"),
            datetime_lit(Utc::now().naive_utc()).alias("lastUpdated"),
        ]);

        let join_on_id = |lf: LazyFrame, other: LazyFrame| -> LazyFrame {
            let mut args = JoinArgs::new(JoinType::Left);
            args.coalesce = JoinCoalesce::CoalesceColumns;
            args.maintain_order = MaintainOrderJoin::Left;
            lf.join(other, [col("_id")], [col("_id")], args)
        };

        let mut view = view;
        view = join_on_id(view, self.top_level_metrics(context, range)?);
        view = join_on_id(view, self.utils.scan_temp(&aa_temp_filename(range))?);
        view = join_on_id(view, self.utils.scan_temp(&gsc_temp_filename(range))?);
        view = join_on_id(view, self.utils.scan_temp(&metrics_by_day_temp_filename(range))?);
        view = join_on_id(view, self.pages_by_task(range)?);
        view = join_on_id(view, self.gc_task_metrics(context, range)?);

        let view = view
            .drop(by_name(["_id"], true))
            .rename(["_doc_id"], ["_id"], true)
            .with_columns([
                col("dyfNo").fill_null(lit(0)),
                col("dyfYes").fill_null(lit(0)),
                col("numComments").fill_null(lit(0)),
                col("gscTotalClicks").fill_null(lit(0)),
                col("gscTotalImpressions").fill_null(lit(0)),
                col("visits").fill_null(lit(0)),
                col("totalCalls").fill_null(lit(0)),
                col("callsPerVisit").fill_null(lit(0.0)),
                col("survey").fill_null(lit(0)),
                col("survey_completed").fill_null(lit(0)),
            ])
            .with_columns([(col("visits") * lit(0.1)
                + col("totalCalls") * lit(0.6)
                + col("survey") * lit(0.3))
            .round(5, RoundMode::HalfToEven)
            .alias("tmf_ranking_index")]);

        Ok(view)
    }

    /// Per-task sums of the pages-view metrics plus call volumes.
    fn top_level_metrics(
        &self,
        context: &TasksViewContext,
        range: &DateRange,
    ) -> Result<LazyFrame> {
        let page_metrics = self
            .scan_pages_view(range)?
            .select([
                col("tasks"),
                col("dyf_no"),
                col("dyf_yes"),
                col("visits"),
                col("gsc_total_clicks"),
                col("gsc_total_impressions"),
                col("gsc_total_ctr"),
                col("gsc_total_position"),
                col("numComments"),
            ])
            .explode(by_name(["tasks"], true))
            .filter(col("tasks").is_not_null())
            .group_by([col("tasks")])
            .agg([
                col("dyf_no").sum().alias("dyfNo"),
                col("dyf_yes").sum().alias("dyfYes"),
                col("visits").sum(),
                col("numComments").sum(),
                col("gsc_total_clicks").sum().alias("gscTotalClicks"),
                col("gsc_total_impressions").sum().alias("gscTotalImpressions"),
                col("gsc_total_position")
                    .mean()
                    .round(5, RoundMode::HalfToEven)
                    .alias("gscTotalPosition"),
                col("gsc_total_ctr")
                    .mean()
                    .round(5, RoundMode::HalfToEven)
                    .alias("gscTotalCtr"),
            ])
            .with_columns([when(col("visits").eq(lit(0)))
                .then(lit(Null {}))
                .otherwise((col("dyfNo").cast(DataType::Float64) / col("visits")).round_sig_figs(8))
                .alias("dyfNoPerVisit")])
            .rename(["tasks"], ["_id"], true);

        let calls_by_topic = self.dependencies["calldrivers"]
            .lf()?
            .select([
                col("date"),
                col("tpc_id"),
                col("enquiry_line"),
                col("topic"),
                col("subtopic"),
                col("sub_subtopic"),
                col("calls"),
            ])
            .filter(self.in_range(range))
            .group_by([col("tpc_id")])
            .agg([
                col("enquiry_line").first(),
                col("topic").first(),
                col("subtopic").first(),
                col("sub_subtopic").first(),
                col("calls").sum(),
            ])
            .join(
                context.tasks_by_tpc_id.clone().lazy(),
                [col("tpc_id")],
                [col("tpc_id")],
                {
                    let mut args = JoinArgs::new(JoinType::Inner);
                    args.coalesce = JoinCoalesce::CoalesceColumns;
                    args
                },
            )
            .explode(by_name(["tasks"], true))
            .rename(["tasks"], ["_id"], true);

        let calls_by_enquiry_line = calls_by_topic
            .clone()
            .group_by([col("_id"), col("enquiry_line")])
            .agg([col("calls").sum()])
            .group_by([col("_id")])
            .agg([as_struct(vec![col("enquiry_line"), col("calls")]).alias("calldriversEnquiry")]);

        let total_calls = calls_by_topic
            .clone()
            .group_by([col("_id")])
            .agg([col("calls").sum().alias("totalCalls")]);

        let calls_by_topic_join = calls_by_topic
            .group_by([col("_id")])
            .agg([as_struct(vec![
                col("tpc_id"),
                col("enquiry_line"),
                col("topic"),
                col("subtopic"),
                col("sub_subtopic"),
                col("calls"),
            ])
            .alias("callsByTopic")]);

        let full_coalesce = || {
            let mut args = JoinArgs::new(JoinType::Full);
            args.coalesce = JoinCoalesce::CoalesceColumns;
            args
        };

        Ok(page_metrics
            .join(total_calls, [col("_id")], [col("_id")], full_coalesce())
            .join(calls_by_enquiry_line, [col("_id")], [col("_id")], full_coalesce())
            .join(calls_by_topic_join, [col("_id")], [col("_id")], full_coalesce())
            .with_columns([when(col("visits").eq(lit(0)).or(col("visits").is_null()))
                .then(lit(Null {}))
                .otherwise(
                    (col("totalCalls").cast(DataType::Float64) / col("visits"))
                        .round(6, RoundMode::HalfToEven),
                )
                .alias("callsPerVisit")]))
    }

    /// Survey participation per task, via the gc-task title mapping.
    fn gc_task_metrics(
        &self,
        context: &TasksViewContext,
        range: &DateRange,
    ) -> Result<LazyFrame> {
        let inner_coalesce = || {
            let mut args = JoinArgs::new(JoinType::Inner);
            args.coalesce = JoinCoalesce::CoalesceColumns;
            args
        };

        Ok(self.dependencies["gc_tss"]
            .lf()?
            .select([
                col("date"),
                col("gc_task"),
                col("sampling_task"),
                col("able_to_complete"),
            ])
            .filter(
                self.in_range(range)
                    .and(col("sampling_task").eq(lit("y")))
                    .and(
                        col("able_to_complete")
                            .eq(lit("Yes"))
                            .or(col("able_to_complete").eq(lit("No"))),
                    ),
            )
            .group_by([col("gc_task")])
            .agg([
                len().alias("survey"),
                col("able_to_complete")
                    .eq(lit("Yes"))
                    .sum()
                    .alias("survey_completed"),
            ])
            .join(
                context.tasks_by_gc_task.clone().lazy(),
                [col("gc_task")],
                [col("gc_task")],
                inner_coalesce(),
            )
            .explode(by_name(["tasks"], true))
            .group_by([col("tasks")])
            .agg([col("survey").sum(), col("survey_completed").sum()])
            .rename(["tasks"], ["_id"], true))
    }

    fn write_temp_aa_searchterms(&self, range: &DateRange) -> Result<()> {
        let aa = self
            .scan_pages_view(range)?
            .filter(col("tasks").is_not_null().and(col("aa_searchterms").is_not_null()))
            .select([col("tasks"), col("aa_searchterms")])
            .explode(by_name(["tasks"], true))
            .explode(by_name(["aa_searchterms"], true))
            .rename(["tasks"], ["_id"], true)
            .unnest(by_name(["aa_searchterms"], true), None)
            .group_by([col("_id"), col("term")])
            .agg([
                col("clicks").sum(),
                col("position").mean().round(4, RoundMode::HalfToEven),
            ])
            .group_by([col("_id")])
            .agg([top_k_structs(
                vec![col("term"), col("clicks"), col("position")],
                TOP_TASK_SEARCHTERMS,
            )
            .alias("aa_searchterms")]);

        self.utils.sink_temp(aa, &aa_temp_filename(range))
    }

    fn write_temp_gsc_searchterms(&self, range: &DateRange) -> Result<()> {
        let gsc = self
            .scan_pages_view(range)?
            .filter(col("tasks").is_not_null().and(col("gsc_searchterms").is_not_null()))
            .select([col("tasks"), col("gsc_searchterms")])
            .explode(by_name(["tasks"], true))
            .explode(by_name(["gsc_searchterms"], true))
            .rename(["tasks"], ["_id"], true)
            .unnest(by_name(["gsc_searchterms"], true), None)
            .filter(col("term").is_not_null())
            .group_by([col("_id"), col("term")])
            .agg([
                col("clicks").sum(),
                col("ctr").mean().round(4, RoundMode::HalfToEven),
                col("impressions").sum(),
                col("position").mean().round(4, RoundMode::HalfToEven),
            ])
            .group_by([col("_id")])
            .agg([top_k_structs(
                vec![
                    col("term"),
                    col("clicks"),
                    col("ctr"),
                    col("impressions"),
                    col("position"),
                ],
                TOP_TASK_SEARCHTERMS,
            )
            .alias("gsc_searchterms")]);

        self.utils.sink_temp(gsc, &gsc_temp_filename(range))
    }

    /// Daily per-task metrics over a complete date spine, so every day in the
    /// range is present even with no activity.
    fn write_temp_metrics_by_day(
        &self,
        context: &TasksViewContext,
        range: &DateRange,
    ) -> Result<()> {
        let inner_coalesce = || {
            let mut args = JoinArgs::new(JoinType::Inner);
            args.coalesce = JoinCoalesce::CoalesceColumns;
            args
        };
        let full_coalesce = || {
            let mut args = JoinArgs::new(JoinType::Full);
            args.coalesce = JoinCoalesce::CoalesceColumns;
            args
        };
        let left_coalesce = || {
            let mut args = JoinArgs::new(JoinType::Left);
            args.coalesce = JoinCoalesce::CoalesceColumns;
            args
        };

        let comments_by_day = self.dependencies["feedback"]
            .lf()?
            .select([col("date"), col("url")])
            .filter(self.in_range(range))
            .group_by([col("date"), col("url")])
            .agg([len().alias("numComments")])
            .join(
                context.urls_by_task.clone().lazy(),
                [col("url")],
                [col("url")],
                inner_coalesce(),
            )
            .group_by([col("task"), col("date")])
            .agg([col("numComments").sum()])
            .rename(["task"], ["_id"], true);

        let calls_by_day = self.dependencies["calldrivers"]
            .lf()?
            .select([col("date"), col("tpc_id"), col("calls")])
            .filter(self.in_range(range))
            .group_by([col("tpc_id"), col("date")])
            .agg([col("calls").sum()])
            .join(
                context.tasks_by_tpc_id.clone().lazy(),
                [col("tpc_id")],
                [col("tpc_id")],
                inner_coalesce(),
            )
            .explode(by_name(["tasks"], true))
            .group_by([col("tasks"), col("date")])
            .agg([col("calls").sum()])
            .rename(["tasks"], ["_id"], true);

        let metrics_by_day = self.dependencies["page_metrics"]
            .lf()?
            .select([
                col("date"),
                col("url"),
                col("visits"),
                col("dyf_no"),
                col("dyf_yes"),
            ])
            .filter(self.in_range(range))
            .group_by([col("date"), col("url")])
            .agg([
                col("visits").sum(),
                col("dyf_no").sum(),
                col("dyf_yes").sum(),
            ])
            .join(
                context.urls_by_task.clone().lazy(),
                [col("url")],
                [col("url")],
                inner_coalesce(),
            )
            .group_by([col("task"), col("date")])
            .agg([
                col("visits").sum(),
                col("dyf_no").sum(),
                col("dyf_yes").sum(),
            ])
            .rename(["task"], ["_id"], true);

        let combined = metrics_by_day
            .join(
                calls_by_day,
                [col("_id"), col("date")],
                [col("_id"), col("date")],
                full_coalesce(),
            )
            .join(
                comments_by_day,
                [col("_id"), col("date")],
                [col("_id"), col("date")],
                full_coalesce(),
            );

        let full_by_day = context
            .tasks
            .clone()
            .lazy()
            .select([col("_id")])
            .cross_join(date_spine(range)?.lazy(), None)
            .join(
                combined,
                [col("_id"), col("date")],
                [col("_id"), col("date")],
                left_coalesce(),
            )
            .with_columns([
                col("calls").fill_null(lit(0)),
                col("numComments").fill_null(lit(0)),
                col("visits").fill_null(lit(0)),
                col("dyf_no").fill_null(lit(0)).alias("dyfNo"),
                col("dyf_yes").fill_null(lit(0)).alias("dyfYes"),
            ])
            .with_columns([
                per_visit_rate("numComments").alias("commentsPerVisit"),
                per_visit_rate("calls").alias("callsPerVisit"),
                per_visit_rate("dyfNo").alias("dyfNoPerVisit"),
            ])
            .sort(["_id", "date"], SortMultipleOptions::default())
            .group_by_stable([col("_id")])
            .agg([as_struct(vec![
                col("date"),
                col("calls"),
                col("callsPerVisit"),
                col("dyfNo"),
                col("dyfNoPerVisit"),
                col("dyfYes"),
                col("numComments"),
                col("commentsPerVisit"),
                col("visits"),
            ])
            .alias("metricsByDay")]);

        self.utils.sink_temp(full_by_day, &metrics_by_day_temp_filename(range))
    }

    /// Page summaries grouped per task, from the pages-view temp file.
    fn pages_by_task(&self, range: &DateRange) -> Result<LazyFrame> {
        Ok(self
            .scan_pages_view(range)?
            .select([
                col("_id"),
                col("page"),
                col("tasks"),
                col("pageStatus"),
                col("visits").fill_null(lit(0)),
                col("dyf_yes").fill_null(lit(0)),
                col("dyf_no").fill_null(lit(0)),
                col("numComments").fill_null(lit(0)),
                col("gsc_total_clicks").fill_null(lit(0)),
                col("gsc_total_impressions").fill_null(lit(0)),
                col("gsc_total_ctr"),
                col("gsc_total_position"),
            ])
            .explode(by_name(["tasks"], true))
            .filter(col("tasks").is_not_null())
            .select([
                col("tasks"),
                as_struct(vec![
                    col("_id"),
                    col("page"),
                    col("pageStatus"),
                    col("visits"),
                    col("dyf_yes"),
                    col("dyf_no"),
                    col("numComments"),
                    col("gsc_total_clicks"),
                    col("gsc_total_impressions"),
                    col("gsc_total_ctr"),
                    col("gsc_total_position"),
                ])
                .alias("pages"),
            ])
            .rename(["tasks"], ["_id"], true)
            .group_by([col("_id")])
            .agg([col("pages")]))
    }
}

fn aa_temp_filename(range: &DateRange) -> String {
    format!("tasks_aa_searchterms_{}.parquet", range.slug())
}

fn gsc_temp_filename(range: &DateRange) -> String {
    format!("tasks_gsc_searchterms_{}.parquet", range.slug())
}

fn metrics_by_day_temp_filename(range: &DateRange) -> String {
    format!("tasks_metrics_by_day_{}.parquet", range.slug())
}

/// `null` when there are no visits, else `metric / visits` at 8 significant
/// figures.
fn per_visit_rate(metric: &str) -> Expr {
    when(col("visits").eq(lit(0)))
        .then(lit(Null {}))
        .otherwise((col(metric).cast(DataType::Float64) / col("visits")).round_sig_figs(8))
}

/// One datetime row per day in the range, inclusive.
fn date_spine(range: &DateRange) -> Result<DataFrame> {
    let mut days = Vec::new();
    let mut cursor = range.start;
    while cursor <= range.end {
        days.push(
            cursor
                .and_hms_opt(0, 0, 0)
                .unwrap_or_default()
                .and_utc()
                .timestamp_millis(),
        );
        cursor += Duration::days(1);
    }
    let dates = Int64Chunked::from_vec("date".into(), days)
        .into_datetime(TimeUnit::Milliseconds, None)
        .into_series();
    DataFrame::new(vec![dates.into_column()]).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::daterange::DateRange;
    use chrono::NaiveDate;

    #[test]
    fn date_spine_covers_every_day_inclusive() {
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2024, 2, 27).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
        };
        let spine = date_spine(&range).unwrap();
        assert_eq!(spine.height(), 5);
    }

    #[test]
    fn temp_filenames_embed_the_range() {
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 9, 30).unwrap(),
        };
        assert_eq!(
            temp_filename(&range),
            "view_tasks_2025-07-01_2025-09-30.parquet"
        );
        assert_eq!(
            aa_temp_filename(&range),
            "tasks_aa_searchterms_2025-07-01_2025-09-30.parquet"
        );
    }
}
