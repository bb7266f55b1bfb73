use std::process::ExitCode;

use pagetree::Database;
use pagetree::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn show_help() {
    println!("Usage: pagetree <command> [arguments]");
    println!("Commands:");
    println!("  create <database_name>                 - Create a new database");
    println!("  debug <database_name>                  - Show the header and tree statistics");
    println!("  insert <database_name> <key> <value>   - Insert or update a key");
    println!("  get <database_name> <key>              - Print the value stored under a key");
    println!("  delete <database_name> <key>           - Delete a key");
    println!("  scan <database_name>                   - Print every entry in key order");
    println!("  help                                   - Show this help message");
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagetree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("Error: No command provided.");
        show_help();
        return ExitCode::FAILURE;
    };

    if command == "help" {
        show_help();
        return ExitCode::SUCCESS;
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match (command.as_str(), &args[1..]) {
        ("create", [name]) => create(&config, name),
        ("debug", [name]) => debug(&config, name),
        ("insert", [name, key, value]) => insert(&config, name, key, value),
        ("get", [name, key]) => get(&config, name, key),
        ("delete", [name, key]) => delete(&config, name, key),
        ("scan", [name]) => scan(&config, name),
        ("create" | "debug" | "insert" | "get" | "delete" | "scan", _) => {
            println!("Error: Wrong arguments for '{command}'.");
            show_help();
            return ExitCode::FAILURE;
        }
        _ => {
            println!("Error: Unknown command '{command}'.");
            show_help();
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            println!("Error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn open(config: &Config, name: &str) -> Result<Database, String> {
    Database::open(&config.database_path(name), config.tree)
        .map_err(|e| format!("cannot open database '{name}': {e}"))
}

fn create(config: &Config, name: &str) -> Result<(), String> {
    std::fs::create_dir_all(&config.data_directory)
        .map_err(|e| format!("cannot create data directory: {e}"))?;

    let db = Database::create(&config.database_path(name), name, config.tree)
        .map_err(|e| format!("cannot create database '{name}': {e}"))?;
    println!(
        "Database '{}' created successfully in '{}' directory",
        db.name(),
        config.data_directory.display()
    );
    Ok(())
}

fn debug(config: &Config, name: &str) -> Result<(), String> {
    let mut db = open(config, name)?;
    let header = db.header();
    println!("Name:             {}", header.name);
    println!("Root page:        {}", header.root);
    println!("Total pages:      {}", header.total_page_count);
    println!("Free list head:   {}", header.free_list_head);
    println!("Free pages:       {}", header.free_page_count);
    println!("Live pages:       {}", db.live_page_count());

    let stats = db.verify().map_err(|e| e.to_string())?;
    println!("Tree height:      {}", stats.height);
    println!("Internal pages:   {}", stats.internal_pages);
    println!("Leaf pages:       {}", stats.leaf_pages);
    println!("Entries:          {}", stats.entries);
    println!("Bytes used:       {}", stats.bytes_used);
    Ok(())
}

fn insert(config: &Config, name: &str, key: &str, value: &str) -> Result<(), String> {
    let mut db = open(config, name)?;
    db.insert(key.as_bytes(), value.as_bytes())
        .map_err(|e| e.to_string())?;
    println!("OK");
    Ok(())
}

fn get(config: &Config, name: &str, key: &str) -> Result<(), String> {
    let mut db = open(config, name)?;
    match db.get(key.as_bytes()).map_err(|e| e.to_string())? {
        Some(value) => println!("{}", String::from_utf8_lossy(&value)),
        None => println!("(not found)"),
    }
    Ok(())
}

fn delete(config: &Config, name: &str, key: &str) -> Result<(), String> {
    let mut db = open(config, name)?;
    if db.delete(key.as_bytes()).map_err(|e| e.to_string())? {
        println!("Deleted");
    } else {
        println!("(not found)");
    }
    Ok(())
}

fn scan(config: &Config, name: &str) -> Result<(), String> {
    let mut db = open(config, name)?;
    for (key, value) in db.scan().map_err(|e| e.to_string())? {
        println!(
            "{}\t{}",
            String::from_utf8_lossy(&key),
            String::from_utf8_lossy(&value)
        );
    }
    Ok(())
}
