//! BlitzKV command-line driver
//!
//! Opens an engine on a device file and either runs a synthetic workload or
//! reads commands from stdin.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use blitzkv::{Config, Engine};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// BlitzKV
#[derive(Parser, Debug)]
#[command(name = "blitzkv")]
#[command(about = "SSD-optimized key-value storage core")]
#[command(version)]
struct Args {
    /// Data directory (the device file is re-formatted on every run)
    #[arg(short, long, default_value = "./blitzkv_data")]
    data_dir: PathBuf,

    /// Blocks in the new-generation region
    #[arg(long, default_value = "256")]
    newgen_blocks: u32,

    /// Blocks in the hot region
    #[arg(long, default_value = "128")]
    hot_blocks: u32,

    /// Blocks in the cold region
    #[arg(long, default_value = "256")]
    cold_blocks: u32,

    /// Read cache capacity in pages
    #[arg(long, default_value = "4096")]
    cache_pages: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write keys, read a skewed subset back and print metrics
    Load {
        /// Number of keys to write
        #[arg(short, long, default_value = "10000")]
        keys: usize,

        /// Value size in bytes
        #[arg(short, long, default_value = "256")]
        value_size: usize,

        /// Reads issued after the load
        #[arg(short, long, default_value = "50000")]
        reads: usize,

        /// Keys that receive 90% of the reads
        #[arg(long, default_value = "100")]
        hot_keys: usize,
    },

    /// Read `put|get|del|flush|sweep|stats|quit` commands from stdin
    Shell,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,blitzkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("BlitzKV v{}", blitzkv::VERSION);
    tracing::info!("Data directory: {}", args.data_dir.display());

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .regions(args.newgen_blocks, args.hot_blocks, args.cold_blocks)
        .cache_capacity(args.cache_pages)
        .build();

    let engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    let result = match args.command {
        Commands::Load {
            keys,
            value_size,
            reads,
            hot_keys,
        } => run_load(&engine, keys, value_size, reads, hot_keys),
        Commands::Shell => run_shell(&engine),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
    }
    if let Err(e) = engine.close() {
        tracing::error!("Failed to close engine: {}", e);
        std::process::exit(1);
    }
}

fn run_load(
    engine: &Engine,
    keys: usize,
    value_size: usize,
    reads: usize,
    hot_keys: usize,
) -> blitzkv::Result<()> {
    let value = vec![0xA5u8; value_size];
    let hot_keys = hot_keys.clamp(1, keys.max(1));

    let start = Instant::now();
    for i in 0..keys {
        engine.put(format!("key-{:08}", i).as_bytes(), &value)?;
    }
    let write_time = start.elapsed();

    // xorshift keeps the read pattern reproducible without an RNG dependency
    let mut state = 0x2545_F491_4F6C_DD1Du64;
    let start = Instant::now();
    for _ in 0..reads {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let i = if state % 10 < 9 {
            (state >> 8) as usize % hot_keys
        } else {
            (state >> 8) as usize % keys.max(1)
        };
        engine.get(format!("key-{:08}", i).as_bytes())?;
    }
    let read_time = start.elapsed();

    engine.sweep()?;
    engine.quiesce()?;

    println!("wrote {} keys in {:?} ({})", keys, write_time, rate(keys, write_time));
    println!("read {} keys in {:?} ({})", reads, read_time, rate(reads, read_time));
    print_stats(engine);
    Ok(())
}

fn run_shell(engine: &Engine) -> blitzkv::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        let reply = match (parts.next(), parts.next(), parts.next()) {
            (Some("put"), Some(key), Some(value)) => engine
                .put(key.as_bytes(), value.as_bytes())
                .map(|_| "OK".to_string()),
            (Some("get"), Some(key), None) => engine.get(key.as_bytes()).map(|v| match v {
                Some(v) => String::from_utf8_lossy(&v).into_owned(),
                None => "(nil)".to_string(),
            }),
            (Some("del"), Some(key), None) => engine
                .delete(key.as_bytes())
                .map(|found| if found { "1" } else { "0" }.to_string()),
            (Some("flush"), None, None) => engine.flush().map(|_| "OK".to_string()),
            (Some("sweep"), None, None) => engine.sweep().map(|n| format!("{} transitions", n)),
            (Some("stats"), None, None) => {
                print_stats(engine);
                continue;
            }
            (Some("quit"), None, None) => break,
            (None, _, _) => continue,
            _ => Ok("ERR usage: put <k> <v> | get <k> | del <k> | flush | sweep | stats | quit".to_string()),
        };

        match reply {
            Ok(text) => writeln!(stdout, "{}", text)?,
            Err(e) => writeln!(stdout, "ERR {}", e)?,
        }
    }
    Ok(())
}

fn print_stats(engine: &Engine) {
    println!("{}", engine.metrics_snapshot());
    for region in engine.region_stats() {
        println!(
            "{:>15}: {}/{} blocks free, {} pending erase, {} pages allocated",
            region.region.to_string(),
            region.free_blocks,
            region.total_blocks,
            region.pending_blocks,
            region.allocated_pages
        );
    }
    let wear = engine.wear_stats();
    println!(
        "wear: {} erases, min {} max {} per block",
        wear.total_erases, wear.min_erases, wear.max_erases
    );
    println!(
        "space amplification {:.2}, write amplification {:.2}",
        engine.space_amplification(),
        engine.write_amplification()
    );
}

fn rate(n: usize, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        return "n/a".to_string();
    }
    format!("{:.0} ops/s", n as f64 / secs)
}
