// src/core/rank.rs

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, info};

use crate::core::error::RankLoadError;

/// Popularity ranks keyed by registrable domain, loaded from a `rank,domain` CSV.
#[derive(Debug, Clone, Default)]
pub struct RankTable {
    ranks: HashMap<String, u32>,
}

impl RankTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads a rank list such as the Tranco top-1M export.
    pub fn load(path: &Path) -> Result<Self, RankLoadError> {
        let file = File::open(path).map_err(|source| RankLoadError::Io { path: path.to_path_buf(), source })?;
        let table = Self::from_reader(BufReader::new(file))
            .map_err(|source| RankLoadError::Io { path: path.to_path_buf(), source })?;
        info!(path = %path.display(), domains = table.len(), "Loaded domain rank table.");
        Ok(table)
    }

    /// Parses `rank,domain` lines. Lines without a numeric rank are skipped,
    /// and the best rank wins when a domain appears more than once.
    pub fn from_reader(reader: impl BufRead) -> std::io::Result<Self> {
        let mut ranks = HashMap::new();
        let mut skipped = 0usize;
        for line in reader.lines() {
            let line = line?;
            let Some((rank, domain)) = line.trim().split_once(',') else {
                skipped += 1;
                continue;
            };
            let (Ok(rank), domain) = (rank.trim().parse::<u32>(), domain.trim().to_ascii_lowercase()) else {
                skipped += 1;
                continue;
            };
            if rank == 0 || domain.is_empty() {
                skipped += 1;
                continue;
            }
            ranks
                .entry(domain)
                .and_modify(|existing: &mut u32| *existing = (*existing).min(rank))
                .or_insert(rank);
        }
        if skipped > 0 {
            debug!(skipped, "Skipped malformed rank lines.");
        }
        Ok(Self { ranks })
    }

    /// Returns the rank of a domain, or 0 when it is unranked.
    pub fn lookup(&self, domain: &str) -> u32 {
        self.ranks.get(domain).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, u32)> for RankTable {
    fn from_iter<I: IntoIterator<Item = (S, u32)>>(iter: I) -> Self {
        Self { ranks: iter.into_iter().map(|(domain, rank)| (domain.into(), rank)).collect() }
    }
}
