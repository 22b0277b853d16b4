use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use thiserror::Error;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid HTTP date {0:?}")]
pub struct InvalidWatermark(String);

/// Freshness token exchanged through `If-Modified-Since` / `Last-Modified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    /// Smallest watermark the server treats as strictly newer than `self`.
    pub fn next(self) -> Self {
        Self(self.0 + TimeDelta::seconds(1))
    }

    pub fn to_http_date(&self) -> String {
        self.0.format(HTTP_DATE_FORMAT).to_string()
    }
}

impl FromStr for Watermark {
    type Err = InvalidWatermark;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDateTime::parse_from_str(s.trim(), HTTP_DATE_FORMAT)
            .map(|naive| Self(naive.and_utc()))
            .map_err(|_| InvalidWatermark(s.to_string()))
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_http_date())
    }
}

/// Last-seen watermark per long-poll target. Entries are never removed and
/// never move backwards.
#[derive(Debug, Clone, Default)]
pub struct WatermarkTable {
    entries: HashMap<String, Watermark>,
}

impl WatermarkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target: &str) -> Option<Watermark> {
        self.entries.get(target).copied()
    }

    /// Records `candidate` for `target` unless an equal or newer watermark is
    /// already present. Returns the watermark now stored.
    pub fn record(&mut self, target: &str, candidate: Watermark) -> Watermark {
        match self.entries.get_mut(target) {
            Some(current) => {
                if candidate > *current {
                    *current = candidate;
                }
                *current
            }
            None => {
                self.entries.insert(target.to_string(), candidate);
                candidate
            }
        }
    }
}
