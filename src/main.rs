use std::sync::Mutex;

use clap::Parser;
use hybridseek::{
    ConfigDb,
    DataDir,
    HybridRetriever,
    IndexBuilder,
    MetadataStore,
    Settings,
    error::{Error, Result},
    read_records,
    search,
    settings::{self, keys},
};
use kdam::{BarExt, tqdm};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{BuildArgs, Cli, Command, ConfigAction, SearchArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("HYBRIDSEEK_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    if let Command::Config { action } = &cli.command {
        return cmd_config(&config_db, &cli, action);
    }

    // config.redb is locked while open; release it before long-running work.
    let settings = Settings::resolve(&cli.overrides(), &config_db)?;
    drop(config_db);

    match &cli.command {
        Command::Build(args) => cmd_build(&data_dir, &settings, args)?,
        Command::Search(args) => cmd_search(&data_dir, &settings, args)?,
        Command::Status(args) => cmd_status(&data_dir, &settings, args.json)?,
        Command::Mcp => {
            let retriever = HybridRetriever::open_active(
                &data_dir.artifacts(),
                settings.build_embedder()?,
            )?;
            hybridseek::mcp::run_mcp(retriever)?;
        }
        Command::Config { .. } | Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_build(
    data_dir: &DataDir,
    settings: &Settings,
    args: &BuildArgs,
) -> Result<()> {
    let records = read_records(&args.records)?;
    info!(
        records = records.len(),
        path = %args.records.display(),
        "read records"
    );

    let builder = IndexBuilder::new(
        data_dir.artifacts(),
        settings.build_embedder()?,
        settings.max_in_flight,
    )?;

    let result = if args.no_progress {
        builder.build(&records)?
    } else {
        let bar = Mutex::new((
            tqdm!(total = records.len(), desc = "Embedding"),
            0usize,
        ));
        let result = builder.build_with_progress(&records, |done| {
            if let Ok(mut guard) = bar.lock() {
                let (pb, shown) = &mut *guard;
                if done > *shown {
                    *shown = done;
                    let _ = pb.update_to(done);
                }
            }
        });
        eprintln!();
        result?
    };

    println!(
        "Built generation {} with {} records (dimension {}, model {}) in {:.1}s",
        result.generation,
        result.record_count,
        result.dimension,
        result.embedding_model,
        result.elapsed.as_secs_f64()
    );
    Ok(())
}

fn cmd_search(
    data_dir: &DataDir,
    settings: &Settings,
    args: &SearchArgs,
) -> Result<()> {
    let retriever = HybridRetriever::open_active(
        &data_dir.artifacts(),
        settings.build_embedder()?,
    )?;
    let results = retriever.search(&args.query, &args.params())?;

    if args.json {
        search::format_json(&results, &args.query)?;
    } else {
        search::format_human(&results);
    }
    Ok(())
}

fn cmd_status(data_dir: &DataDir, settings: &Settings, json: bool) -> Result<()> {
    let artifacts = data_dir.artifacts();
    let manifest = match artifacts.active() {
        Ok(paths) => {
            let manifest = MetadataStore::open(&paths.metadata())?.manifest()?;
            Some((paths.generation(), manifest))
        }
        Err(Error::MissingArtifact(_)) => None,
        Err(e) => return Err(e),
    };

    if json {
        let index = manifest.as_ref().map(|(generation, m)| {
            serde_json::json!({
                "generation": generation,
                "records": m.record_count,
                "dimension": m.dimension,
                "embedding_model": m.embedding_model,
                "built_at": m.built_at,
            })
        });
        let status = serde_json::json!({
            "data_dir": data_dir.root(),
            "index": index,
            "settings": settings,
        });
        println!("{status}");
        return Ok(());
    }

    println!("Data directory: {}", data_dir.root().display());
    match &manifest {
        Some((generation, m)) => {
            println!("Active generation: {generation}");
            println!("Records: {}", m.record_count);
            println!("Dimension: {}", m.dimension);
            println!("Built with: {}", m.embedding_model);
        }
        None => println!("No index built yet."),
    }
    println!("Embedder: {}", settings.embedder);
    println!("Embedding model: {}", settings.embedding_model);
    println!("Ollama URL: {}", settings.ollama_url);
    Ok(())
}

fn cmd_config(
    config_db: &ConfigDb,
    cli: &Cli,
    action: &ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let resolved = Settings::resolve(&cli.overrides(), config_db)?;
            let stored = config_db.list_settings()?;
            if *json {
                let stored: serde_json::Map<String, serde_json::Value> = stored
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                println!(
                    "{}",
                    serde_json::json!({ "resolved": resolved, "stored": stored })
                );
            } else {
                println!("embedder = {}", resolved.embedder);
                println!("embedding_model = {}", resolved.embedding_model);
                println!("ollama_url = {}", resolved.ollama_url);
                println!("embed_timeout_secs = {}", resolved.embed_timeout_secs);
                println!("max_in_flight = {}", resolved.max_in_flight);
                println!("hash_dimension = {}", resolved.hash_dimension);
                if !stored.is_empty() {
                    println!();
                    println!("Stored in config.redb:");
                    for (key, value) in &stored {
                        println!("  {key} = {value}");
                    }
                }
            }
        }
        ConfigAction::Set { key, value } => {
            settings::validate_setting(key, value)?;
            config_db.set_setting(key, value)?;
            println!("Set {key} = {value}");
        }
        ConfigAction::Clear { key: Some(key) } => {
            if !config_db.remove_setting(key)? {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key.clone(),
                });
            }
            println!("Cleared {key}");
        }
        ConfigAction::Clear { key: None } => {
            for key in keys::ALL {
                if config_db.remove_setting(key)? {
                    println!("Cleared {key}");
                }
            }
            // Anything left was written by hand or by an older version.
            for (key, _) in config_db.list_settings()? {
                warn!(key = %key, "removing unknown setting");
                config_db.remove_setting(&key)?;
            }
        }
    }
    Ok(())
}
