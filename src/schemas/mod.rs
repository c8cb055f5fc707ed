//! The schema registry: one `ParquetModel` per physical Parquet file, one
//! `MongoCollection` per logical collection.
//!
//! Models are plain values carrying declarative metadata plus `transform` /
//! `reverse_transform` function pointers; concrete models are constructed by
//! the per-collection modules and collected by [`collection_models`].

use crate::filter::as_datetime;
use crate::record::{
    array_to_object, convert_objectids, records_from_frame, Record, Value,
};
use crate::sampling::SamplingContext;
use chrono::NaiveDateTime;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use polars::io::HiveOptions;
use polars::prelude::*;
use serde_json::{json, Value as Json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub mod util;

mod aa_item_ids;
mod aa_searchterms;
mod activity_map;
mod annotations;
mod calldrivers;
mod custom_reports_registry;
mod feedback;
mod gc_tasks_mappings;
mod gc_tss;
mod gsc_searchterms;
mod overall_metrics;
mod overall_searchterms;
mod page_metrics;
mod pages;
mod pages_list;
mod projects;
mod readability;
mod reports;
mod search_assessment;
mod tasks;
mod urls;

pub use page_metrics::METRICS_SENTINEL_COLLECTION;

/// Calendar partition key for hive-partitioned files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionBy {
    Month,
    Year,
}

impl PartitionBy {
    pub fn partition_columns(&self) -> &'static [&'static str] {
        match self {
            PartitionBy::Month => &["year", "month"],
            PartitionBy::Year => &["year"],
        }
    }

    /// `year=YYYY[/month=M]` directory segment for a partition start date.
    pub fn partition_dir(&self, start: NaiveDateTime) -> String {
        use chrono::Datelike;
        match self {
            PartitionBy::Month => {
                format!("year={}/month={}", start.year(), start.month())
            }
            PartitionBy::Year => format!("year={}", start.year()),
        }
    }
}

/// How a collection is kept in sync: full re-export or date-watermark append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncType {
    Simple,
    Incremental,
}

pub type TransformFn = fn(LazyFrame) -> LazyFrame;
pub type SamplingFilterFn = fn(&ParquetModel, &SamplingContext) -> Result<Option<Json>>;

/// One physical Parquet file: where it comes from, what shape it has on disk,
/// and how to move between database shape and disk shape.
pub struct ParquetModel {
    pub collection: &'static str,
    pub parquet_filename: &'static str,
    pub schema: Schema,
    /// Partial schema contributed when this file is a secondary of a collection.
    pub secondary_schema: Option<Schema>,
    pub filter: Option<Json>,
    pub projection: Option<Json>,
    pub pipeline: Option<Vec<Json>>,
    pub use_aggregation: bool,
    pub partition_by: Option<PartitionBy>,
    pub transform: TransformFn,
    pub reverse_transform: TransformFn,
    pub sampling_filter: SamplingFilterFn,
    pub dir_path: PathBuf,
}

/// Default transform: the frame passes through unchanged.
pub fn identity_transform(lf: LazyFrame) -> LazyFrame {
    lf
}

/// Default sampling filter: models not sensitive to sampling reuse their
/// static filter.
pub fn static_filter(model: &ParquetModel, _ctx: &SamplingContext) -> Result<Option<Json>> {
    Ok(model.filter.clone())
}

impl ParquetModel {
    /// Skeleton with identity transforms and no query shaping; the
    /// per-collection constructors override what they need.
    pub fn base(
        collection: &'static str,
        parquet_filename: &'static str,
        schema: Schema,
        dir_path: &Path,
    ) -> Self {
        ParquetModel {
            collection,
            parquet_filename,
            schema,
            secondary_schema: None,
            filter: None,
            projection: None,
            pipeline: None,
            use_aggregation: false,
            partition_by: None,
            transform: identity_transform,
            reverse_transform: identity_transform,
            sampling_filter: static_filter,
            dir_path: dir_path.to_path_buf(),
        }
    }

    pub fn target_path(&self) -> PathBuf {
        self.dir_path.join(self.parquet_filename)
    }

    pub fn get_sampling_filter(&self, ctx: &SamplingContext) -> Result<Option<Json>> {
        (self.sampling_filter)(self, ctx)
    }

    /// Lazily scan the model's file(s), hive-partitioned when the target is a
    /// partitioned directory.
    pub fn lf(&self) -> Result<LazyFrame> {
        let path = self.target_path();
        if !path.exists() {
            return Err(eyre!("Missing Parquet file {}", path.display()));
        }
        let pl_path = PlPath::new(path.to_str().unwrap());
        let args = ScanArgsParquet {
            hive_options: HiveOptions {
                enabled: Some(self.partition_by.is_some() && path.is_dir()),
                ..Default::default()
            },
            ..Default::default()
        };
        LazyFrame::scan_parquet(pl_path, args).map_err(Into::into)
    }

    /// `max(date)` across the model's file(s); None when the file is empty.
    pub fn latest_date(&self) -> Result<Option<NaiveDateTime>> {
        let df = self
            .lf()?
            .select([col("date")
                .max()
                .cast(DataType::Datetime(TimeUnit::Milliseconds, None))
                .cast(DataType::Int64)])
            .collect()?;
        let ms = df.column("date")?.i64()?.get(0);
        Ok(ms.and_then(|ms| as_datetime(&json!({ "$date": ms }))))
    }
}

/// Identifier-bearing fields re-encoded from hex on insert.
const OBJECTID_FIELDS: &[&str] = &[
    "_id",
    "task",
    "tasks",
    "page",
    "pages",
    "project",
    "projects",
    "ux_tests",
    "attachments",
    "en_attachment",
    "fr_attachment",
    "aa_searchterms",
    "aa_searchterms_en",
    "aa_searchterms_fr",
    "activity_map",
    "gsc_searchterms",
];

/// Reference-list fields that default to an empty sequence, never null.
const DEFAULT_EMPTY_LIST_FIELDS: &[&str] = &[
    "pages",
    "tasks",
    "projects",
    "ux_tests",
    "attachments",
    "calldriversEnquiry",
    "callsByTopic",
];

/// One logical collection: a primary file plus any secondary files joined on
/// `_id` during import.
pub struct MongoCollection {
    pub collection: &'static str,
    pub sync_type: SyncType,
    pub primary: ParquetModel,
    pub secondaries: Vec<ParquetModel>,
    pub objectid_fields: &'static [&'static str],
    pub default_empty_list_fields: &'static [&'static str],
    /// Fields stored on disk as `[{k, v}]` arrays and re-assembled into
    /// documents on insert (`$objectToArray` projections).
    pub kv_object_fields: &'static [&'static str],
}

impl MongoCollection {
    pub fn new(collection: &'static str, sync_type: SyncType, primary: ParquetModel) -> Self {
        MongoCollection {
            collection,
            sync_type,
            primary,
            secondaries: Vec::new(),
            objectid_fields: OBJECTID_FIELDS,
            default_empty_list_fields: DEFAULT_EMPTY_LIST_FIELDS,
            kv_object_fields: &[],
        }
    }

    pub fn with_secondaries(mut self, secondaries: Vec<ParquetModel>) -> Self {
        self.secondaries = secondaries;
        self
    }

    pub fn with_kv_object_fields(mut self, fields: &'static [&'static str]) -> Self {
        self.kv_object_fields = fields;
        self
    }

    pub fn models(&self) -> impl Iterator<Item = &ParquetModel> {
        std::iter::once(&self.primary).chain(self.secondaries.iter())
    }

    /// Left-join each secondary onto the primary on `_id`, preserving the
    /// primary's row order.
    pub fn assemble(&self, primary: LazyFrame, secondaries: Vec<LazyFrame>) -> LazyFrame {
        let mut lf = primary;
        for secondary in secondaries {
            let mut args = JoinArgs::new(JoinType::Left);
            args.coalesce = JoinCoalesce::CoalesceColumns;
            args.maintain_order = MaintainOrderJoin::Left;
            lf = lf.join(secondary, [col("_id")], [col("_id")], args);
        }
        lf
    }

    /// Ordered union of the primary schema with each secondary contribution.
    /// Types must unify (the stricter, narrower type wins); a conflict is a
    /// fatal configuration error.
    pub fn combined_schema(&self) -> Result<Schema> {
        let mut combined: Vec<(PlSmallStr, DataType)> = self
            .primary
            .schema
            .iter()
            .map(|(name, dtype)| (name.clone(), dtype.clone()))
            .collect();

        for model in &self.secondaries {
            let contribution = model.secondary_schema.as_ref().unwrap_or(&model.schema);
            for (name, dtype) in contribution.iter() {
                match combined.iter_mut().find(|(existing, _)| existing == name) {
                    Some((_, existing)) => {
                        *existing = unify_dtypes(existing, dtype).map_err(|e| {
                            eyre!("Schema conflict on {}.{}: {}", self.collection, name, e)
                        })?;
                    }
                    None => combined.push((name.clone(), dtype.clone())),
                }
            }
        }

        Ok(Schema::from_iter(
            combined.into_iter().map(|(name, dtype)| Field::new(name, dtype)),
        ))
    }

    /// Turn an assembled frame into insert-ready records: nulls dropped or
    /// defaulted, hex identifiers decoded, declared defaults always present.
    /// Rows are sorted by `_id` unless the caller disables sorting.
    pub fn prepare_for_insert(&self, df: &DataFrame, sort_id: bool) -> Result<Vec<Record>> {
        let combined = self.combined_schema()?;
        let sorted;
        let df = if sort_id {
            sorted = df.sort(["_id"], SortMultipleOptions::default())?;
            &sorted
        } else {
            df
        };

        let mut records = Vec::with_capacity(df.height());
        for row in records_from_frame(df)? {
            let mut record = Record::new();
            for (key, value) in row {
                if value.is_null() {
                    if self.default_empty_list_fields.contains(&key.as_str()) {
                        record.insert(key, Value::Array(Vec::new()));
                    }
                    continue;
                }
                let value = if self.kv_object_fields.contains(&key.as_str()) {
                    array_to_object(value)
                } else {
                    value
                };
                let value = if self.objectid_fields.contains(&key.as_str()) {
                    convert_objectids(value)
                } else {
                    value
                };
                record.insert(key, value);
            }

            for (name, _) in combined.iter() {
                if self.default_empty_list_fields.contains(&name.as_str())
                    && !record.contains_key(name.as_str())
                {
                    record.insert(name.to_string(), Value::Array(Vec::new()));
                }
            }

            records.push(record);
        }
        Ok(records)
    }
}

/// Stricter-narrower-wins unification of two column types.
fn unify_dtypes(a: &DataType, b: &DataType) -> Result<DataType> {
    if a == b {
        return Ok(a.clone());
    }
    match (a, b) {
        (DataType::Int32, DataType::Int64) | (DataType::Int64, DataType::Int32) => {
            Ok(DataType::Int32)
        }
        (DataType::Float32, DataType::Float64) | (DataType::Float64, DataType::Float32) => {
            Ok(DataType::Float32)
        }
        (DataType::List(a_inner), DataType::List(b_inner)) => Ok(DataType::List(Box::new(
            unify_dtypes(a_inner, b_inner)?,
        ))),
        (DataType::Struct(a_fields), DataType::Struct(b_fields)) => {
            let mut fields: Vec<Field> = a_fields.clone();
            for b_field in b_fields {
                match fields.iter_mut().find(|f| f.name() == b_field.name()) {
                    Some(existing) => {
                        let unified = unify_dtypes(existing.dtype(), b_field.dtype())?;
                        *existing = Field::new(existing.name().clone(), unified);
                    }
                    None => fields.push(b_field.clone()),
                }
            }
            Ok(DataType::Struct(fields))
        }
        (a, b) => Err(eyre!("Cannot unify {:?} with {:?}", a, b)),
    }
}

/// All collection models, in the fixed processing order.
pub fn collection_models(dir_path: &Path) -> Vec<MongoCollection> {
    vec![
        annotations::collection(dir_path),
        aa_item_ids::collection(dir_path),
        calldrivers::collection(dir_path),
        custom_reports_registry::collection(dir_path),
        feedback::collection(dir_path),
        gc_tss::collection(dir_path),
        gc_tasks_mappings::collection(dir_path),
        overall_metrics::collection(dir_path),
        pages::collection(dir_path),
        pages_list::collection(dir_path),
        page_metrics::collection(dir_path),
        projects::collection(dir_path),
        tasks::collection(dir_path),
        urls::collection(dir_path),
        ux_tests::collection(dir_path),
        readability::collection(dir_path),
        reports::collection(dir_path),
        search_assessment::collection(dir_path),
    ]
}

/// Parquet models the view builder reads from, keyed by short name.
pub fn parquet_models(dir_path: &Path) -> HashMap<&'static str, ParquetModel> {
    let mut models = HashMap::new();
    models.insert("pages", pages::model(dir_path));
    models.insert("page_metrics", page_metrics::model(dir_path));
    models.insert("aa_searchterms", aa_searchterms::model(dir_path));
    models.insert("activity_map", activity_map::model(dir_path));
    models.insert("gsc_searchterms", gsc_searchterms::model(dir_path));
    models.insert("feedback", feedback::model(dir_path));
    models.insert("calldrivers", calldrivers::model(dir_path));
    models.insert("gc_tss", gc_tss::model(dir_path));
    models.insert("tasks", tasks::model(dir_path));
    models.insert("projects", projects::model(dir_path));
    models.insert("ux_tests", ux_tests::model(dir_path));
    models
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::util::schema_of;

    #[test]
    fn unify_prefers_narrower_types() {
        assert_eq!(unify_dtypes(&DataType::Int64, &DataType::Int32).unwrap(), DataType::Int32);
        assert_eq!(
            unify_dtypes(&DataType::Float32, &DataType::Float64).unwrap(),
            DataType::Float32
        );
        assert!(unify_dtypes(&DataType::Int32, &DataType::String).is_err());
    }

    #[test]
    fn combined_schema_is_ordered_union() {
        let dir = Path::new(".");
        let primary = ParquetModel::base(
            "c",
            "c.parquet",
            schema_of(vec![
                ("_id", DataType::String),
                ("visits", DataType::Int64),
            ]),
            dir,
        );
        let mut secondary = ParquetModel::base(
            "c",
            "c_terms.parquet",
            schema_of(vec![("ignored", DataType::String)]),
            dir,
        );
        secondary.secondary_schema = Some(schema_of(vec![
            ("visits", DataType::Int32),
            ("terms", DataType::List(Box::new(DataType::String))),
        ]));

        let collection = MongoCollection::new("c", SyncType::Simple, primary)
            .with_secondaries(vec![secondary]);
        let combined = collection.combined_schema().unwrap();

        let names: Vec<&str> = combined.iter_names().map(|n| n.as_str()).collect();
        assert_eq!(names, ["_id", "visits", "terms"]);
        assert_eq!(combined.get("visits"), Some(&DataType::Int32));
    }

    #[test]
    fn registry_has_every_collection_once() {
        let models = collection_models(Path::new("."));
        assert_eq!(models.len(), 18);
        let mut names: Vec<&str> = models.iter().map(|m| m.collection).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 18);
    }

    #[test]
    fn partition_dir_naming() {
        let start = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(PartitionBy::Month.partition_dir(start), "year=2024/month=3");
        assert_eq!(PartitionBy::Year.partition_dir(start), "year=2024");
    }
}
