//! Dead-letter replay drill.
//!
//! Operator tool for §9's `EventInbox.status = FAILED` resolution: lists
//! dead-lettered messages for a queue and, with `--replay`, requeues one by
//! id with a fresh read count.
//!
//! # Usage
//! ```bash
//! dlq_replay_drill --queue ingest_events
//! dlq_replay_drill --replay 42
//! ```

use sqlx::postgres::PgPoolOptions;
use std::env;

enum Command {
    List { queue: Option<String> },
    Replay { id: i64 },
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = env::args().collect();

    let mut i = 1;
    let mut queue = None;
    let mut replay_id = None;

    while i < args.len() {
        match args[i].as_str() {
            "--queue" => {
                queue = args.get(i + 1).cloned();
                i += 2;
            }
            "--replay" => {
                let id = args
                    .get(i + 1)
                    .ok_or("--replay requires a dead-letter id")?
                    .parse::<i64>()
                    .map_err(|_| "--replay id must be an integer".to_string())?;
                replay_id = Some(id);
                i += 2;
            }
            other => return Err(format!("unrecognized argument: {other}")),
        }
    }

    match replay_id {
        Some(id) => Ok(Command::Replay { id }),
        None => Ok(Command::List { queue }),
    }
}

#[tokio::main]
async fn main() {
    let command = parse_args().unwrap_or_else(|err| {
        eprintln!("{err}");
        std::process::exit(1);
    });

    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| {
        eprintln!("DATABASE_URL must be set");
        std::process::exit(1);
    });

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .unwrap_or_else(|err| {
            eprintln!("failed to connect to database: {err}");
            std::process::exit(1);
        });

    match command {
        Command::List { queue } => {
            let entries = order_events_rs::dlq::list(&pool, 200)
                .await
                .expect("failed to list dead letters");

            let filtered: Vec<_> = entries
                .into_iter()
                .filter(|e| queue.as_deref().is_none_or(|q| q == e.queue))
                .collect();

            println!("{} dead-lettered message(s):", filtered.len());
            for entry in filtered {
                println!(
                    "  id={} queue={} read_count={} died_at={} error={}",
                    entry.id, entry.queue, entry.read_count, entry.died_at, entry.error
                );
            }
        }
        Command::Replay { id } => {
            let replayed = order_events_rs::dlq::replay(&pool, id)
                .await
                .expect("failed to replay dead letter");

            if replayed {
                println!("replayed dead letter {id} back onto its queue");
            } else {
                println!("no dead letter found with id {id}");
                std::process::exit(1);
            }
        }
    }
}
