use chrono::NaiveDate;
use clap::Parser;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use log::info;
use mongo_parquet::filter::midnight;
use mongo_parquet::{
    connect_driver, CollectionFilter, MongoConfig, MongoDb, MongoParquet, StorageClient,
};
use mongo_parquet_cli::Args;
use std::path::Path;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Optional .env next to the repository root; process env wins.
    let _ = dotenvy::from_path(Path::new("../../.env"));
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    if args.no_action() {
        eprintln!(
            "No action specified. Use --export-from-mongo, --import-to-mongo, --upload-to-remote, \
             --download-from-remote, --sync-parquet, or --recalculate-views."
        );
        eprintln!("Use --help for more information.");
        return Ok(());
    }

    run(&args)
}

fn run(args: &Args) -> Result<()> {
    let filter = CollectionFilter::new(args.include.clone(), args.exclude.clone())?;

    let min_date = args
        .min_date
        .as_deref()
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(midnight)
                .wrap_err_with(|| format!("Invalid --min-date '{}'", s))
        })
        .transpose()?;

    let storage = StorageClient::new(&args.data_dir, &args.sample_dir, args.storage)?;

    // Upload/download don't need a database connection.
    let needs_db = args.export_from_mongo
        || args.import_to_mongo
        || args.sync_parquet
        || args.recalculate_views;

    let config = MongoConfig::new(&args.db_name);
    let driver: Box<dyn mongo_parquet::MongoDriver> = if needs_db {
        connect_driver(&config)?
    } else {
        Box::new(mongo_parquet::mongo::memory::MemoryDriver::new())
    };
    let mut mp = MongoParquet::new(config, storage, MongoDb::new(driver), args.sample);

    if args.sample && needs_db {
        seed_sampling_context(&mut mp)?;
    }

    if args.export_from_mongo {
        mp.export_from_mongo(&filter)?;
    }
    if args.sync_parquet {
        mp.sync_parquet_with_mongo(&filter, args.upload_to_remote, args.cleanup_temp_dir)?;
    }
    if args.import_to_mongo {
        mp.import_to_mongo(&filter, args.from_remote, min_date, args.drop)?;
    }
    if args.upload_to_remote && !args.sync_parquet {
        mp.upload_to_remote(args.cleanup_local)?;
    }
    if args.download_from_remote {
        mp.download_from_remote(&filter)?;
    }
    if args.recalculate_views {
        mp.recalculate_views(args.cleanup_temp_dir)?;
    }

    info!("Done");
    Ok(())
}

/// Seed the sampling context from the database: project ids come from
/// `SAMPLE_PROJECT_IDS` (comma-separated hex), task ids are the tasks of
/// those projects, page ids the pages of those tasks. The sample date range
/// comes from `SAMPLE_START_DATE`/`SAMPLE_END_DATE` (YYYY-MM-DD), defaulting
/// to 2024-01-01 through yesterday.
fn seed_sampling_context(mp: &mut MongoParquet) -> Result<()> {
    use mongo_parquet::filter::{in_ids, oid_value};
    use mongo_parquet::{ObjectId, SampleDateRange, Value};
    use serde_json::json;

    info!("Fetching sampling filter references...");

    let project_ids: Vec<ObjectId> = std::env::var("SAMPLE_PROJECT_IDS")
        .map_err(|_| eyre!("--sample requires SAMPLE_PROJECT_IDS in the environment"))?
        .split(',')
        .map(|id| ObjectId::parse_hex(id.trim()))
        .collect::<Result<_>>()?;

    let ids_of = |records: Vec<mongo_parquet::Record>| -> Vec<ObjectId> {
        records
            .into_iter()
            .filter_map(|record| match record.get("_id") {
                Some(Value::ObjectId(oid)) => Some(*oid),
                _ => None,
            })
            .collect()
    };

    let project_filter =
        json!({ "projects": in_ids(&project_ids) });
    let task_ids = ids_of(mp.db.driver.find("tasks", Some(&project_filter), None)?);

    let task_filter = json!({ "tasks": { "$in": task_ids.iter().map(oid_value).collect::<Vec<_>>() } });
    let page_ids = ids_of(mp.db.driver.find("pages", Some(&task_filter), None)?);

    let parse_date = |var: &str| -> Option<chrono::NaiveDateTime> {
        std::env::var(var)
            .ok()
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
            .map(midnight)
    };
    let start = parse_date("SAMPLE_START_DATE").unwrap_or_else(|| {
        midnight(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default())
    });
    let end = parse_date("SAMPLE_END_DATE").unwrap_or_else(|| {
        midnight(chrono::Utc::now().date_naive() - chrono::Duration::days(1))
    });

    mp.setup_sampling_context(|ctx| {
        ctx.set_ids("project", project_ids);
        ctx.set_ids("task", task_ids);
        ctx.set_ids("page", page_ids);
        ctx.set_date_range(SampleDateRange {
            start: Some(start),
            end: Some(end),
        });
    });
    Ok(())
}
