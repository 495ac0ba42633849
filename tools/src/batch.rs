use data_contracts::{ImagePair, PipelineResult};
use rayon::prelude::*;
use rayon::ThreadPoolBuildError;
use tracing::info;

use crate::pipeline::PipelineRunner;

/// Process every pair on a pool of `jobs` workers. Results come back sorted
/// by pair index regardless of completion order.
pub fn process_pairs(
    runner: &PipelineRunner<'_>,
    pairs: &[ImagePair],
    jobs: usize,
) -> Result<Vec<PipelineResult>, ThreadPoolBuildError> {
    let jobs = jobs.max(1);
    let total = pairs.len();
    info!(pairs = total, jobs, "processing pairs");

    let mut results: Vec<PipelineResult> = if jobs == 1 {
        pairs
            .iter()
            .enumerate()
            .map(|(i, pair)| {
                let res = runner.process(pair);
                log_progress(i + 1, total);
                res
            })
            .collect()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .thread_name(|i| format!("spatialpair-worker-{i}"))
            .build()?;
        pool.install(|| pairs.par_iter().map(|pair| runner.process(pair)).collect())
    };

    results.sort_by_key(|r| r.pair_index);
    Ok(results)
}

fn log_progress(done: usize, total: usize) {
    if done % 5 == 0 || done == total {
        info!("processed {done}/{total} pairs");
    }
}
