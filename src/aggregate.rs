//! Aggregation of a result set into display tables.
//!
//! Everything here is a pure function of a [`ResultSet`] and an optional
//! [`PeriodFilter`]. Tables are rebuilt from scratch on every call; nothing is
//! patched incrementally.
//!
//! Counting is per article per entity: an article with five authors adds one
//! to each author, and its organizations, countries and words are
//! de-duplicated within the article before counting.

use crate::error::{Result, ScopusError};
use crate::record::{ArticleRecord, ResultSet, YearMonth};
use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

/// Default length of top-N rollups ("top 25 authors")
pub const DEFAULT_TOP_N: usize = 25;

/// Authors kept per rolling frame
pub const FRAME_TOP_AUTHORS: usize = 25;

/// Words kept per rolling frame (word-cloud input)
pub const FRAME_TOP_WORDS: usize = 100;

const STOP_WORDS: &[&str] = &[
    "and", "the", "for", "with", "from", "are", "was", "were", "this", "that", "these", "those",
    "its", "their", "into", "has", "have", "been", "can", "our", "also", "between", "which",
    "using", "based", "not", "but", "than", "via",
];

/// Inclusive `[start, end]` month range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodFilter {
    start: YearMonth,
    end: YearMonth,
}

impl PeriodFilter {
    pub fn new(start: YearMonth, end: YearMonth) -> Result<Self> {
        if start > end {
            return Err(ScopusError::Validation(format!(
                "Period start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Build a filter from optional bounds, filling a missing one from the
    /// data's `(first, last)` month range.
    ///
    /// The filled bound never crosses the given one, so a single bound lying
    /// outside the data still yields a valid (possibly empty) period. Only two
    /// explicit, inverted bounds are rejected.
    pub fn from_bounds(
        from: Option<YearMonth>,
        to: Option<YearMonth>,
        range: Option<(YearMonth, YearMonth)>,
    ) -> Result<Option<Self>> {
        if from.is_none() && to.is_none() {
            return Ok(None);
        }
        let start = from.or_else(|| match (range, to) {
            (Some((first, _)), Some(to)) => Some(first.min(to)),
            (Some((first, _)), None) => Some(first),
            (None, to) => to,
        });
        let end = to.or_else(|| match (range, from) {
            (Some((_, last)), Some(from)) => Some(last.max(from)),
            (Some((_, last)), None) => Some(last),
            (None, from) => from,
        });
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end).map(Some),
            _ => Ok(None),
        }
    }

    pub fn start(&self) -> YearMonth {
        self.start
    }

    pub fn end(&self) -> YearMonth {
        self.end
    }

    pub fn contains(&self, month: YearMonth) -> bool {
        self.start <= month && month <= self.end
    }

    /// Whether a record passes. Undated records never do.
    pub fn admits(&self, record: &ArticleRecord) -> bool {
        record.cover_month.is_some_and(|m| self.contains(m))
    }
}

/// One row of a [`CountTable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountEntry {
    pub name: String,
    pub count: u64,
}

/// Name → count table that remembers first-appearance order.
///
/// Serialized as an array sorted by descending count, ties in
/// first-appearance order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountTable {
    entries: Vec<CountEntry>,
    index: HashMap<String, usize>,
}

impl CountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one to `name`, creating it at the end if unseen.
    pub fn increment(&mut self, name: &str) {
        match self.index.get(name) {
            Some(&i) => self.entries[i].count += 1,
            None => {
                self.index.insert(name.to_string(), self.entries.len());
                self.entries.push(CountEntry {
                    name: name.to_string(),
                    count: 1,
                });
            }
        }
    }

    pub fn get(&self, name: &str) -> u64 {
        self.index.get(name).map_or(0, |&i| self.entries[i].count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }

    /// Entries in first-appearance order.
    pub fn iter(&self) -> std::slice::Iter<'_, CountEntry> {
        self.entries.iter()
    }

    /// The `n` largest entries, descending; ties keep first-appearance order.
    pub fn top(&self, n: usize) -> Vec<CountEntry> {
        let mut sorted = self.entries.clone();
        // stable sort keeps insertion order among equal counts
        sorted.sort_by(|a, b| b.count.cmp(&a.count));
        sorted.truncate(n);
        sorted
    }

    pub fn sorted(&self) -> Vec<CountEntry> {
        self.top(self.entries.len())
    }
}

impl Serialize for CountTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.sorted())
    }
}

/// Article count for one month (or a rolling window ending in that month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthlyCount {
    pub month: YearMonth,
    pub count: u64,
}

/// Derived counts for one (result set, period) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateTables {
    /// Articles that passed the period filter
    pub articles: usize,
    pub period: Option<PeriodFilter>,
    pub authors: CountTable,
    pub organizations: CountTable,
    pub countries: CountTable,
    pub subject_areas: CountTable,
    /// Keyword phrases plus title/abstract words
    pub words: CountTable,
    /// Dense series from the first to the last dated month
    pub monthly: Vec<MonthlyCount>,
    pub yearly: BTreeMap<i32, u64>,
}

impl AggregateTables {
    /// Largest meaningful rolling window: months spanned by the dated records.
    pub fn max_window(&self) -> usize {
        self.monthly.len()
    }

    /// Clamp a requested window into `[1, max_window]`.
    pub fn clamp_window(&self, window: usize) -> usize {
        window.clamp(1, self.max_window().max(1))
    }

    /// Sliding sum of monthly counts over `window` consecutive months.
    ///
    /// Produces one value per month of the series; months near the start sum
    /// over the part of the window that exists. Oversized windows are clamped.
    pub fn rolling(&self, window: usize) -> Vec<MonthlyCount> {
        let window = self.clamp_window(window);
        let mut sum = 0u64;
        self.monthly
            .iter()
            .enumerate()
            .map(|(i, mc)| {
                sum += mc.count;
                if i >= window {
                    sum -= self.monthly[i - window].count;
                }
                MonthlyCount {
                    month: mc.month,
                    count: sum,
                }
            })
            .collect()
    }

    /// Count of articles whose month falls in `period`, read off the monthly series.
    pub fn count_in(&self, period: &PeriodFilter) -> u64 {
        self.monthly
            .iter()
            .filter(|mc| period.contains(mc.month))
            .map(|mc| mc.count)
            .sum()
    }
}

/// Build all tables for `results`, restricted to `period` when given.
///
/// With a period, undated records are dropped. Without one they still count
/// toward authors, organizations, countries and words, but not toward the
/// month and year tables.
pub fn build(results: &ResultSet, period: Option<&PeriodFilter>) -> AggregateTables {
    let mut tables = AggregateTables {
        period: period.copied(),
        ..Default::default()
    };
    let mut months: BTreeMap<YearMonth, u64> = BTreeMap::new();

    for record in filtered(results, period) {
        tables.articles += 1;
        for author in record.distinct_authors() {
            tables.authors.increment(author);
        }
        for org in record.organizations() {
            tables.organizations.increment(org);
        }
        for country in record.countries() {
            tables.countries.increment(country);
        }
        if let Some(area) = record.subject_area.as_deref() {
            tables.subject_areas.increment(area);
        }
        for word in article_words(record) {
            tables.words.increment(&word);
        }
        if let Some(month) = record.cover_month {
            *months.entry(month).or_default() += 1;
            *tables.yearly.entry(month.year()).or_default() += 1;
        }
    }

    tables.monthly = densify(&months);
    tables
}

fn filtered<'a>(
    results: &'a ResultSet,
    period: Option<&'a PeriodFilter>,
) -> impl Iterator<Item = &'a ArticleRecord> + 'a {
    results
        .iter()
        .filter(move |r| period.map_or(true, |p| p.admits(r)))
}

/// Fill the gaps between the first and last month with zero counts.
fn densify(months: &BTreeMap<YearMonth, u64>) -> Vec<MonthlyCount> {
    let (Some((&first, _)), Some((&last, _))) = (months.first_key_value(), months.last_key_value())
    else {
        return Vec::new();
    };
    let mut series = Vec::with_capacity(first.months_through(&last));
    let mut month = first;
    while month <= last {
        series.push(MonthlyCount {
            month,
            count: months.get(&month).copied().unwrap_or(0),
        });
        month = month.succ();
    }
    series
}

/// Per-month snapshot over a rolling window, the input of one animation frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollingFrame {
    /// Last month of the window
    pub month: YearMonth,
    pub articles: usize,
    pub countries: Vec<CountEntry>,
    pub authors: Vec<CountEntry>,
    pub words: Vec<CountEntry>,
}

/// Frames for every month of the series whose window holds at least one article.
///
/// `window` is clamped the same way as [`AggregateTables::rolling`].
pub fn rolling_frames(
    results: &ResultSet,
    period: Option<&PeriodFilter>,
    window: usize,
) -> Vec<RollingFrame> {
    let dated: Vec<(YearMonth, &ArticleRecord)> = filtered(results, period)
        .filter_map(|r| r.cover_month.map(|m| (m, r)))
        .collect();
    let Some(first) = dated.iter().map(|(m, _)| *m).min() else {
        return Vec::new();
    };
    let last = dated.iter().map(|(m, _)| *m).max().unwrap_or(first);
    let window = window.clamp(1, first.months_through(&last));

    let mut frames = Vec::new();
    let mut month = first;
    while month <= last {
        let span = PeriodFilter {
            start: month.add_months(1 - window as i64),
            end: month,
        };
        let mut countries = CountTable::new();
        let mut authors = CountTable::new();
        let mut words = CountTable::new();
        let mut articles = 0;

        for (_, record) in dated.iter().filter(|(m, _)| span.contains(*m)) {
            articles += 1;
            for country in record.countries() {
                countries.increment(country);
            }
            for author in record.distinct_authors() {
                authors.increment(author);
            }
            for word in article_words(record) {
                words.increment(&word);
            }
        }

        if articles > 0 {
            frames.push(RollingFrame {
                month,
                articles,
                countries: countries.sorted(),
                authors: authors.top(FRAME_TOP_AUTHORS),
                words: words.top(FRAME_TOP_WORDS),
            });
        }
        month = month.succ();
    }
    frames
}

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z]+").expect("valid regex"))
}

/// Lower-case letter runs longer than two characters, minus stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    word_regex()
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Distinct terms of one article: keyword phrases, then title and abstract words.
pub fn article_words(record: &ArticleRecord) -> Vec<String> {
    let keywords = record
        .keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty());
    let text = tokenize(&record.title)
        .into_iter()
        .chain(record.description.as_deref().map(tokenize).unwrap_or_default());

    let mut seen = HashSet::new();
    keywords
        .chain(text)
        .filter(|w| seen.insert(w.clone()))
        .collect()
}
