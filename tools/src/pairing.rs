//! Left/right pairing of independently numbered capture sequences.
//!
//! The left camera's index is canonical. Right indices are mapped into the
//! left's index space with a constant offset (estimated from the head of
//! both sequences unless supplied), then both lists are walked with two
//! cursors. Frames without a counterpart are reported, not processed.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use data_contracts::{
    CameraSide, CapturedImage, ImagePair, SkippedFile, UnpairedImage, UnpairedReason,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Number of leading frames per side used to propose offsets.
const OFFSET_PROBE: usize = 4;

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("{side} directory {path} is not a directory")]
    NotADirectory { side: CameraSide, path: PathBuf },
    #[error("reading {side} directory {path}: {source}")]
    Io {
        side: CameraSide,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{side} camera has index {index} twice ({first} and {second}); pairing is ambiguous")]
    DuplicateIndex {
        side: CameraSide,
        index: u32,
        first: PathBuf,
        second: PathBuf,
    },
}

#[derive(Debug, Clone, Default)]
pub struct MatchOptions {
    /// Fixed `right.index - left.index`; estimated when `None`.
    pub index_offset: Option<i64>,
    pub max_timestamp_skew: u64,
}

/// Parsed and sorted contents of one camera directory.
#[derive(Debug, Clone, Default)]
pub struct DirectoryScan {
    pub images: Vec<CapturedImage>,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone, Default)]
pub struct PairingOutcome {
    pub pairs: Vec<ImagePair>,
    pub unpaired: Vec<UnpairedImage>,
    pub skipped: Vec<SkippedFile>,
    pub index_offset: i64,
}

/// List, parse, sort, and duplicate-check one camera directory.
pub fn scan_directory(dir: &Path, side: CameraSide) -> Result<DirectoryScan, PairingError> {
    if !dir.is_dir() {
        return Err(PairingError::NotADirectory {
            side,
            path: dir.to_path_buf(),
        });
    }
    let io_err = |source| PairingError::Io {
        side,
        path: dir.to_path_buf(),
        source,
    };

    let mut scan = DirectoryScan::default();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !path.is_file() {
            continue;
        }
        match CapturedImage::from_path(&path, side) {
            Ok(image) => scan.images.push(image),
            Err(err) => {
                warn!(%side, path = %path.display(), "skipping file: {err}");
                scan.skipped.push(SkippedFile {
                    path,
                    side,
                    reason: err.to_string(),
                });
            }
        }
    }

    sort_captures(&mut scan.images);
    check_duplicates(&scan.images, side)?;
    scan.skipped.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(%side, images = scan.images.len(), skipped = scan.skipped.len(), "scanned directory");
    Ok(scan)
}

/// Sort by index, with timestamp and path as tie-breaks so the order never
/// depends on directory listing order.
pub fn sort_captures(images: &mut [CapturedImage]) {
    images.sort_by(|a, b| {
        a.index
            .cmp(&b.index)
            .then(a.timestamp.cmp(&b.timestamp))
            .then_with(|| a.path.cmp(&b.path))
    });
}

fn check_duplicates(sorted: &[CapturedImage], side: CameraSide) -> Result<(), PairingError> {
    match sorted.windows(2).find(|w| w[0].index == w[1].index) {
        Some(w) => Err(PairingError::DuplicateIndex {
            side,
            index: w[0].index,
            first: w[0].path.clone(),
            second: w[1].path.clone(),
        }),
        None => Ok(()),
    }
}

/// Scan both directories and pair them.
pub fn pair_directories(
    left_dir: &Path,
    right_dir: &Path,
    opts: &MatchOptions,
) -> Result<PairingOutcome, PairingError> {
    let left = scan_directory(left_dir, CameraSide::Left)?;
    let right = scan_directory(right_dir, CameraSide::Right)?;

    let mut outcome = match_sequences(left.images, right.images, opts)?;
    let mut skipped = left.skipped;
    skipped.extend(right.skipped);
    outcome.skipped = skipped;
    info!(
        pairs = outcome.pairs.len(),
        unpaired = outcome.unpaired.len(),
        skipped = outcome.skipped.len(),
        offset = outcome.index_offset,
        "pairing complete"
    );
    Ok(outcome)
}

/// Pair two capture lists. Inputs may be in any order; duplicates are rejected.
pub fn match_sequences(
    mut left: Vec<CapturedImage>,
    mut right: Vec<CapturedImage>,
    opts: &MatchOptions,
) -> Result<PairingOutcome, PairingError> {
    sort_captures(&mut left);
    sort_captures(&mut right);
    check_duplicates(&left, CameraSide::Left)?;
    check_duplicates(&right, CameraSide::Right)?;

    let offset = opts
        .index_offset
        .unwrap_or_else(|| estimate_offset(&left, &right));
    if offset != 0 {
        info!(offset, "right camera numbering is offset from the left");
    }

    let mut outcome = PairingOutcome {
        index_offset: offset,
        ..PairingOutcome::default()
    };
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    loop {
        let ordering = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => i64::from(l.index)
                .saturating_add(offset)
                .cmp(&i64::from(r.index)),
            _ => break,
        };
        match ordering {
            std::cmp::Ordering::Equal => {
                let (Some(l), Some(r)) = (left.next(), right.next()) else {
                    break;
                };
                let pair_index = outcome.pairs.len();
                // Sides come from the scan, so this cannot fail for well-formed input.
                match ImagePair::new(l, r, pair_index) {
                    Ok(pair) => {
                        if pair.timestamp_skew() > opts.max_timestamp_skew {
                            warn!(
                                left = %pair.left.path.display(),
                                right = %pair.right.path.display(),
                                left_ts = pair.left.timestamp,
                                right_ts = pair.right.timestamp,
                                "paired images have diverging timestamps"
                            );
                        }
                        outcome.pairs.push(pair);
                    }
                    Err(err) => warn!("dropping pair: {err}"),
                }
            }
            std::cmp::Ordering::Less => {
                if let Some(orphan) = left.next() {
                    report_orphan(&mut outcome, orphan, UnpairedReason::MissedTrigger);
                }
            }
            std::cmp::Ordering::Greater => {
                if let Some(orphan) = right.next() {
                    report_orphan(&mut outcome, orphan, UnpairedReason::MissedTrigger);
                }
            }
        }
    }

    for orphan in left.chain(right) {
        report_orphan(&mut outcome, orphan, UnpairedReason::Trailing);
    }
    Ok(outcome)
}

fn report_orphan(outcome: &mut PairingOutcome, image: CapturedImage, reason: UnpairedReason) {
    warn!(
        side = %image.side,
        index = image.index,
        path = %image.path.display(),
        ?reason,
        "no counterpart; image will not be processed"
    );
    outcome.unpaired.push(UnpairedImage { image, reason });
}

/// Choose the right-minus-left index offset that pairs the most frames.
///
/// Candidates come from every combination of the first few frames on each
/// side, so a missed trigger on the very first shot does not shift the
/// session. Among equally good candidates the one whose matches have the
/// smallest total timestamp skew wins, then the first-to-first difference,
/// then the smallest magnitude.
pub fn estimate_offset(left: &[CapturedImage], right: &[CapturedImage]) -> i64 {
    let (Some(first_l), Some(first_r)) = (left.first(), right.first()) else {
        return 0;
    };
    let natural = i64::from(first_r.index) - i64::from(first_l.index);
    let right_by_index: HashMap<i64, u64> = right
        .iter()
        .map(|r| (i64::from(r.index), r.timestamp))
        .collect();

    let mut candidates: Vec<i64> = left
        .iter()
        .take(OFFSET_PROBE)
        .flat_map(|l| {
            right
                .iter()
                .take(OFFSET_PROBE)
                .map(move |r| i64::from(r.index) - i64::from(l.index))
        })
        .collect();
    candidates.sort_unstable();
    candidates.dedup();

    let score = |offset: i64| {
        let (matches, skew) = left
            .iter()
            .filter_map(|l| {
                right_by_index
                    .get(&(i64::from(l.index) + offset))
                    .map(|&ts| u128::from(l.timestamp.abs_diff(ts)))
            })
            .fold((0usize, 0u128), |(n, total), skew| (n + 1, total + skew));
        (matches, Reverse(skew))
    };

    candidates
        .into_iter()
        .map(|offset| (offset, score(offset)))
        .max_by(|(a, score_a), (b, score_b)| {
            score_a
                .cmp(score_b)
                .then((*a == natural).cmp(&(*b == natural)))
                .then(b.abs().cmp(&a.abs()))
                .then(b.cmp(a))
        })
        .map(|(offset, _)| offset)
        .unwrap_or(natural)
}
