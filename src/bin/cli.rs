//! RivetDB - interactive shell

use std::io::{self, BufRead, Write};

use rivetdb::engine::QueryOutcome;
use rivetdb::Engine;

fn print_banner(data_dir: &str) {
    println!("RivetDB shell - data directory: {}", data_dir);
    println!("End statements with ';'. Type '.help' for help, '.quit' to exit.\n");
}

fn print_help() {
    println!(
        r#"
Commands:
  .help              Show this help message
  .quit              Exit the shell
  .tables            List all tables

Statements:
  CREATE TABLE t (c INT PRIMARY KEY, ...);
  CREATE INDEX i ON t(c);
  INSERT INTO t (c, ...) VALUES (v, ...);
  SELECT ... FROM t [JOIN u ON ...] [WHERE ...] [GROUP BY ...] [ORDER BY ...];
  UPDATE t SET c = v [WHERE ...];
  DELETE FROM t [WHERE ...];
  DROP INDEX i ON t;
  DROP TABLE t;
"#
    );
}

fn print_outcome(outcome: &QueryOutcome) {
    if let Some(error) = &outcome.error {
        eprintln!("{}", error);
        return;
    }
    if let Some(rows) = &outcome.result {
        match serde_json::to_string_pretty(rows) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("failed to render rows: {}", e),
        }
        println!("{} row(s) in {:.6}s", rows.len(), outcome.runtime);
    } else if let Some(count) = outcome.rows_affected {
        println!("{} row(s) affected in {:.6}s", count, outcome.runtime);
    } else {
        println!("OK ({:.6}s)", outcome.runtime);
    }
}

fn main() {
    let data_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./data".to_string());

    let mut engine = match Engine::open(&data_dir) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("failed to open '{}': {}", data_dir, e);
            std::process::exit(1);
        }
    };

    print_banner(&data_dir);

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { "rivet> " } else { "  ...> " };
        print!("{}", prompt);
        if io::stdout().flush().is_err() {
            break;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("error reading input: {}", e);
                break;
            }
        }

        let trimmed = line.trim();
        if buffer.is_empty() && trimmed.starts_with('.') {
            match trimmed {
                ".quit" | ".exit" => break,
                ".help" => print_help(),
                ".tables" => {
                    for name in engine.catalog().table_names() {
                        println!("  {}", name);
                    }
                }
                other => eprintln!("unknown command: {}", other),
            }
            continue;
        }

        buffer.push_str(&line);
        if trimmed.ends_with(';') {
            let script = std::mem::take(&mut buffer);
            print_outcome(&engine.execute_script(&script));
        }
    }

    println!("bye");
}
