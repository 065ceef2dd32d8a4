#![allow(dead_code, reason = "each benchmark uses a different subset")]

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};

const AREAS: &[&str] = &["kitchen", "hall", "bedroom", "garage", "office"];

/// Generates `n` Home Assistant style contexts with a fixed seed.
pub fn generate_random_contexts(n: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut contexts = Vec::with_capacity(n);

    for _ in 0..n {
        let sensor_count = rng.random_range(3..10);
        let mut sensors = Vec::with_capacity(sensor_count);
        for _ in 0..sensor_count {
            sensors.push(json!({
                "name": random_string(&mut rng, 3, 8),
                "area": AREAS[rng.random_range(0..AREAS.len())],
                "state": format!("{:.1}", rng.random_range(10.0..30.0)),
                "on": rng.random_bool(0.5),
            }));
        }

        contexts.push(json!({
            "user": {
                "name": random_string(&mut rng, 5, 10),
                "home": rng.random_bool(0.7),
            },
            "sensors": sensors,
            "threshold": rng.random_range(15..25),
            "show_details": rng.random_bool(0.8),
        }));
    }

    contexts
}

/// Generates `n` spoken commands built from a small vocabulary.
pub fn generate_random_commands(n: usize) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..n)
        .map(|_| {
            let verb = ["turn", "switch"][rng.random_range(0..2)];
            let state = ["on", "off"][rng.random_range(0..2)];
            let article = if rng.random_bool(0.5) { " the" } else { "" };
            let area = AREAS[rng.random_range(0..AREAS.len())];
            format!("{} {}{} {} light", verb, state, article, area)
        })
        .collect()
}

fn random_string(rng: &mut StdRng, min_len: usize, max_len: usize) -> String {
    let charset = "abcdefghijklmnopqrstuvwxyz";
    let len = rng.random_range(min_len..=max_len);

    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..charset.len());
            charset.chars().nth(idx).unwrap()
        })
        .collect()
}

// Print binary size information - can be used from individual benchmarks
pub fn print_binary_size() {
    let binary_path = std::env::current_exe().unwrap();
    let metadata = std::fs::metadata(binary_path.clone()).unwrap();
    let size_bytes = metadata.len();
    let size_kb = size_bytes as f64 / 1024.0;
    let size_mb = size_kb / 1024.0;

    println!(
        "Binary size: {:.2} MB ({:.2} KB, {} bytes)",
        size_mb, size_kb, size_bytes
    );
    println!("Binary path: {}", binary_path.display());
}
