use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use e2e_tests::{create_test_chunks, random_embedding, TestHarness, DIMENSION};

const CHUNKS_PER_DOCUMENT: usize = 4;
const DEFAULT_ITERATIONS: usize = 50;

#[derive(Parser, Debug)]
#[command(name = "perf_bench", about = "Docstore search latency benchmark")]
struct Args {
    #[arg(long, value_enum, default_value = "small")]
    tier: DatasetTier,
    /// Queries per phase
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Write the report as JSON into this directory
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum DatasetTier {
    Small,
    Medium,
}

impl DatasetTier {
    fn documents(self) -> usize {
        match self {
            DatasetTier::Small => 50,
            DatasetTier::Medium => 500,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PhaseReport {
    name: String,
    queries: usize,
    mean_ms: f64,
    p50_ms: f64,
    p95_ms: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct BenchReport {
    tier: DatasetTier,
    rows: usize,
    dimension: usize,
    ingest_ms: f64,
    phases: Vec<PhaseReport>,
    cache_hit_rate: f64,
}

fn summarize(name: &str, mut samples: Vec<f64>) -> PhaseReport {
    samples.sort_by(|a, b| a.total_cmp(b));
    let pick = |q: f64| -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let idx = ((samples.len() - 1) as f64 * q).round() as usize;
        samples[idx]
    };
    PhaseReport {
        name: name.to_string(),
        queries: samples.len(),
        mean_ms: samples.iter().sum::<f64>() / samples.len().max(1) as f64,
        p50_ms: pick(0.5),
        p95_ms: pick(0.95),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let harness = TestHarness::new().await;
    let cached = harness.cached();

    let chunks = create_test_chunks(args.tier.documents(), CHUNKS_PER_DOCUMENT, DIMENSION, args.seed);
    let rows = chunks.len();
    let start = Instant::now();
    for batch in chunks.chunks(100) {
        harness.store.add_chunks(batch.to_vec()).await?;
    }
    let ingest_ms = elapsed_ms(start);

    let mut rng = StdRng::seed_from_u64(args.seed ^ 0x5eed);
    let queries: Vec<Vec<f32>> = (0..args.iterations)
        .map(|_| random_embedding(&mut rng, DIMENSION))
        .collect();

    let mut phases = Vec::new();
    for name in ["cold", "warm"] {
        let mut samples = Vec::with_capacity(queries.len());
        for query in &queries {
            let start = Instant::now();
            cached.search(query, 10, None).await?;
            samples.push(elapsed_ms(start));
        }
        phases.push(summarize(name, samples));
    }

    let report = BenchReport {
        tier: args.tier,
        rows,
        dimension: DIMENSION,
        ingest_ms,
        phases,
        cache_hit_rate: cached.cache_stats().hit_rate(),
    };
    let json = serde_json::to_string_pretty(&report)?;
    println!("{}", json);

    if let Some(dir) = args.out_dir {
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("search_{:?}.json", args.tier).to_lowercase());
        fs::write(&path, json)?;
        eprintln!("Wrote {}", path.display());
    }
    Ok(())
}
