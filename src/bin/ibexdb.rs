//! # IbexDB Storage Shell
//!
//! An interactive shell over the storage engine for inspection and manual
//! operations. This is not a SQL client; it speaks the facade's own
//! vocabulary (tables, opaque keys and values, scans).
//!
//! ## Usage
//!
//! ```bash
//! ibexdb ./data
//! ```
//!
//! ## Commands
//!
//! ```text
//! create db <name>              drop db <name>
//! use <name>                    show dbs
//! create table <t> <col>:<type>[:pk][:uniq][:nn][:ai] ...
//! drop table <t>                schema <t>
//! put <t> <key> <value>         get <t> <key>
//! del <t> <key>                 scan <t> [start] [end]
//! rowid <t>                     cache
//! help                          quit
//! ```

use std::env;
use std::process::ExitCode;

use eyre::{bail, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use ibexdb::{error_kind, ColumnDef, DatabaseManager, TableSchema};

const PROMPT: &str = "ibexdb> ";

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 || args[1] == "--help" || args[1] == "-h" {
        eprintln!("usage: ibexdb <data-root>");
        return ExitCode::from(2);
    }

    match run(&args[1]) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(root: &str) -> Result<()> {
    let mut manager = DatabaseManager::open(root)?;
    let mut editor = DefaultEditor::new()?;

    println!("IbexDB storage shell (data root: {root})");
    println!("type 'help' for commands");

    loop {
        let line = match editor.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        if matches!(line, "quit" | "exit" | ".quit") {
            break;
        }
        if let Err(e) = dispatch(&mut manager, line) {
            match error_kind(&e) {
                Some(kind) => println!("ERR [{kind:?}] {e}"),
                None => println!("ERR {e}"),
            }
        }
    }
    Ok(())
}

fn dispatch(manager: &mut DatabaseManager, line: &str) -> Result<()> {
    let words: Vec<&str> = line.split_whitespace().collect();

    match words.as_slice() {
        ["help"] => {
            print_help();
            Ok(())
        }
        ["show", "dbs"] => {
            for name in manager.list_databases()? {
                let marker = if manager.current_name() == Some(&name) {
                    " *"
                } else {
                    ""
                };
                println!("{name}{marker}");
            }
            Ok(())
        }
        ["create", "db", name] => {
            manager.create_database(name)?;
            println!("OK");
            Ok(())
        }
        ["drop", "db", name] => {
            manager.drop_database(name)?;
            println!("OK");
            Ok(())
        }
        ["use", name] => {
            manager.use_database(name)?;
            println!("CURRENT_DB: {name}");
            Ok(())
        }
        ["create", "table", table, cols @ ..] if !cols.is_empty() => {
            let schema = parse_schema(table, cols)?;
            current(manager)?.create_table(table, schema)?;
            println!("OK");
            Ok(())
        }
        ["drop", "table", table] => {
            current(manager)?.drop_table(table)?;
            println!("OK");
            Ok(())
        }
        ["schema", table] => {
            let schema = current(manager)?.read_schema(table)?;
            println!("table {}", schema.table_name);
            for col in &schema.columns {
                let mut flags = String::new();
                if col.primary_key {
                    flags.push_str(" PRIMARY KEY");
                }
                if col.unique {
                    flags.push_str(" UNIQUE");
                }
                if col.not_null {
                    flags.push_str(" NOT NULL");
                }
                if col.auto_increment {
                    flags.push_str(" AUTO_INCREMENT");
                }
                println!("  {} {}{flags}", col.name, col.data_type);
            }
            Ok(())
        }
        ["put", table, key, value] => {
            current(manager)?.insert(table, key.as_bytes(), value.as_bytes())?;
            println!("OK");
            Ok(())
        }
        ["get", table, key] => {
            match current(manager)?.get(table, key.as_bytes())? {
                Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                None => println!("(not found)"),
            }
            Ok(())
        }
        ["del", table, key] => {
            current(manager)?.delete(table, key.as_bytes())?;
            println!("OK");
            Ok(())
        }
        ["scan", table, bounds @ ..] if bounds.len() <= 2 => {
            let start = bounds.first().map(|s| s.as_bytes().to_vec());
            let end = bounds.get(1).map(|s| s.as_bytes().to_vec());
            let rows = current(manager)?.range_scan(table, start, end)?;
            for (key, value) in &rows {
                println!(
                    "{} = {}",
                    String::from_utf8_lossy(key),
                    String::from_utf8_lossy(value)
                );
            }
            println!("({} rows)", rows.len());
            Ok(())
        }
        ["rowid", table] => {
            println!("{}", current(manager)?.next_row_id(table)?);
            Ok(())
        }
        ["cache"] => {
            for (table, dirty) in current(manager)?.cached_tables()? {
                println!("{table}{}", if dirty { " (dirty)" } else { "" });
            }
            Ok(())
        }
        _ => bail!("unrecognized command; type 'help'"),
    }
}

fn current<'m>(manager: &'m mut DatabaseManager) -> Result<&'m ibexdb::Database> {
    manager
        .current()
        .ok_or_else(|| eyre::eyre!("no database selected; 'use <name>' first"))
}

/// Column syntax: `name:type[:pk][:uniq][:nn][:ai]`, e.g.
/// `id:INT:pk:ai email:VARCHAR(255):uniq:nn`.
fn parse_schema(table: &str, cols: &[&str]) -> Result<TableSchema> {
    let mut columns = Vec::with_capacity(cols.len());
    for spec in cols {
        let mut parts = spec.split(':');
        let name = parts.next().filter(|s| !s.is_empty());
        let data_type = parts.next().filter(|s| !s.is_empty());
        let (Some(name), Some(data_type)) = (name, data_type) else {
            bail!("bad column spec '{spec}'; expected name:type[:flags]");
        };

        let mut col = ColumnDef::new(name, data_type);
        for flag in parts {
            col = match flag {
                "pk" => col.primary_key(),
                "uniq" => col.unique(),
                "nn" => col.not_null(),
                "ai" => col.auto_increment(),
                other => bail!("unknown column flag '{other}' in '{spec}'"),
            };
        }
        columns.push(col);
    }
    Ok(TableSchema::new(table, columns))
}

fn print_help() {
    println!(
        "\
databases:
  create db <name>      drop db <name>
  use <name>            show dbs
tables (column spec: name:type[:pk][:uniq][:nn][:ai]):
  create table <t> <col> [<col> ...]
  drop table <t>        schema <t>
records:
  put <t> <key> <value> get <t> <key>
  del <t> <key>         scan <t> [start] [end]
misc:
  rowid <t>             cache
  help                  quit"
    );
}
