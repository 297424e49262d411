//! Article records and the de-duplicated result set.
//!
//! Records are parsed once from the Scopus response (see [`crate::scopus`])
//! and never mutated afterwards.

use crate::error::{Result, ScopusError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// A calendar month, the atomic unit for period bucketing.
///
/// Ordering is chronological. Serialized as `"YYYY-MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Create a month value. `month` is 1-based.
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(ScopusError::Validation(format!(
                "Month must be between 1 and 12, got {}",
                month
            )));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Parse a Scopus `prism:coverDate`.
    ///
    /// Accepts `YYYY`, `YYYY-MM` and `YYYY-MM-DD`; a bare year maps to January.
    pub fn from_cover_date(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.len() {
            4 => raw.parse::<i32>().ok().map(|year| Self { year, month: 1 }),
            7 => raw.parse().ok(),
            _ => NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().map(|d| {
                use chrono::Datelike;
                Self {
                    year: d.year(),
                    month: d.month(),
                }
            }),
        }
    }

    /// Months since year 0, used for arithmetic.
    fn ordinal(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    fn from_ordinal(ordinal: i64) -> Self {
        Self {
            year: ordinal.div_euclid(12) as i32,
            month: ordinal.rem_euclid(12) as u32 + 1,
        }
    }

    /// Shift by `months` (negative goes back in time).
    pub fn add_months(&self, months: i64) -> Self {
        Self::from_ordinal(self.ordinal() + months)
    }

    /// The following month.
    pub fn succ(&self) -> Self {
        self.add_months(1)
    }

    /// Number of months in `[self, other]`, inclusive. Zero if `other < self`.
    pub fn months_through(&self, other: &YearMonth) -> usize {
        let diff = other.ordinal() - self.ordinal();
        if diff < 0 {
            0
        } else {
            diff as usize + 1
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = ScopusError;

    /// Strict `YYYY-MM` parsing.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ScopusError::Validation(format!("Expected YYYY-MM, got '{}'", s));
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for YearMonth {
    type Error = ScopusError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}

/// One affiliation listed on an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affiliation {
    pub name: Option<String>,
    pub country: Option<String>,
}

/// An author paired with one of their affiliation countries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorCountry {
    pub author: String,
    pub country: String,
}

/// One bibliographic entry returned by the search API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Unique identifier (`SCOPUS_ID:...`)
    pub identifier: String,
    pub eid: Option<String>,
    pub title: String,
    /// Author display names in byline order
    pub authors: Vec<String>,
    pub author_countries: Vec<AuthorCountry>,
    pub affiliations: Vec<Affiliation>,
    /// Cover date at month granularity
    pub cover_month: Option<YearMonth>,
    pub keywords: Vec<String>,
    /// Abstract text (`dc:description`, COMPLETE view only)
    pub description: Option<String>,
    /// Subject area abbreviation, e.g. `COMP`
    pub subject_area: Option<String>,
    pub publication_name: Option<String>,
    pub doi: Option<String>,
}

impl ArticleRecord {
    /// Distinct affiliation names, in listing order.
    pub fn organizations(&self) -> Vec<&str> {
        dedup_in_order(self.affiliations.iter().filter_map(|a| a.name.as_deref()))
    }

    /// Distinct countries from affiliations and author pairs, in listing order.
    pub fn countries(&self) -> Vec<&str> {
        dedup_in_order(
            self.affiliations
                .iter()
                .filter_map(|a| a.country.as_deref())
                .chain(self.author_countries.iter().map(|p| p.country.as_str())),
        )
    }

    /// Distinct author names, in byline order.
    pub fn distinct_authors(&self) -> Vec<&str> {
        dedup_in_order(self.authors.iter().map(String::as_str))
    }
}

fn dedup_in_order<'a>(items: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    items
        .map(str::trim)
        .filter(|s| !s.is_empty() && seen.insert(*s))
        .collect()
}

/// Ordered, identifier-keyed collection of records for one query.
///
/// Insertion order is API return order. A record whose identifier is already
/// present is rejected, so re-running a partially failed fetch cannot double
/// count an article.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Vec<ArticleRecord>")]
pub struct ResultSet {
    records: Vec<ArticleRecord>,
    #[serde(skip)]
    seen: HashSet<String>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Returns `false` if its identifier was already present.
    pub fn insert(&mut self, record: ArticleRecord) -> bool {
        if !self.seen.insert(record.identifier.clone()) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.seen.contains(identifier)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ArticleRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[ArticleRecord] {
        &self.records
    }

    /// Earliest and latest cover month among dated records.
    pub fn month_range(&self) -> Option<(YearMonth, YearMonth)> {
        let mut months = self.records.iter().filter_map(|r| r.cover_month);
        let first = months.next()?;
        Some(months.fold((first, first), |(lo, hi), m| (lo.min(m), hi.max(m))))
    }
}

impl From<Vec<ArticleRecord>> for ResultSet {
    fn from(records: Vec<ArticleRecord>) -> Self {
        records.into_iter().collect()
    }
}

impl FromIterator<ArticleRecord> for ResultSet {
    fn from_iter<I: IntoIterator<Item = ArticleRecord>>(iter: I) -> Self {
        let mut set = ResultSet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

impl Extend<ArticleRecord> for ResultSet {
    fn extend<I: IntoIterator<Item = ArticleRecord>>(&mut self, iter: I) {
        for record in iter {
            self.insert(record);
        }
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a ArticleRecord;
    type IntoIter = std::slice::Iter<'a, ArticleRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.records)
    }
}

/// Minimal record builder shared by tests across modules.
#[cfg(test)]
pub(crate) fn test_record(id: &str, authors: &[&str], country: &str, month: &str) -> ArticleRecord {
    ArticleRecord {
        identifier: id.to_string(),
        eid: None,
        title: format!("Article {}", id),
        authors: authors.iter().map(|a| a.to_string()).collect(),
        author_countries: Vec::new(),
        affiliations: vec![Affiliation {
            name: Some(format!("{} University", country)),
            country: Some(country.to_string()),
        }],
        cover_month: Some(month.parse().expect("valid month")),
        keywords: Vec::new(),
        description: None,
        subject_area: None,
        publication_name: None,
        doi: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cover_date_granularities() {
        assert_eq!(YearMonth::from_cover_date("2023"), Some(YearMonth::new(2023, 1).unwrap()));
        assert_eq!(YearMonth::from_cover_date("2023-05"), Some(YearMonth::new(2023, 5).unwrap()));
        assert_eq!(
            YearMonth::from_cover_date("2023-05-15"),
            Some(YearMonth::new(2023, 5).unwrap())
        );
        assert_eq!(YearMonth::from_cover_date("2023-13-01"), None);
        assert_eq!(YearMonth::from_cover_date(""), None);
        assert_eq!(YearMonth::from_cover_date("soon"), None);
    }

    #[test]
    fn test_year_month_parse_and_display() {
        let m: YearMonth = "2021-02".parse().unwrap();
        assert_eq!(m.year(), 2021);
        assert_eq!(m.month(), 2);
        assert_eq!(m.to_string(), "2021-02");
        assert!("2021-2".parse::<YearMonth>().is_err());
        assert!("2021-00".parse::<YearMonth>().is_err());
        assert!("202102".parse::<YearMonth>().is_err());
    }

    #[test]
    fn test_month_arithmetic_crosses_years() {
        let dec: YearMonth = "2020-12".parse().unwrap();
        assert_eq!(dec.succ().to_string(), "2021-01");
        assert_eq!(dec.add_months(-12).to_string(), "2019-12");
        assert_eq!(dec.add_months(-11).to_string(), "2020-01");
        let mar: YearMonth = "2021-03".parse().unwrap();
        assert_eq!(dec.months_through(&mar), 4);
        assert_eq!(mar.months_through(&dec), 0);
        assert_eq!(mar.months_through(&mar), 1);
    }

    #[test]
    fn test_year_month_serde_as_string() {
        let m: YearMonth = "2022-07".parse().unwrap();
        assert_eq!(serde_json::to_string(&m).unwrap(), "\"2022-07\"");
        let back: YearMonth = serde_json::from_str("\"2022-07\"").unwrap();
        assert_eq!(back, m);
        assert!(serde_json::from_str::<YearMonth>("\"July\"").is_err());
    }

    #[test]
    fn test_result_set_rejects_duplicate_identifiers() {
        let mut set = ResultSet::new();
        assert!(set.insert(test_record("1", &["A"], "US", "2021-01")));
        assert!(set.insert(test_record("2", &["B"], "US", "2021-02")));
        let mut dup = test_record("1", &["Z"], "FR", "2020-01");
        dup.title = "Different title".into();
        assert!(!set.insert(dup));
        assert_eq!(set.len(), 2);
        assert_eq!(set.records()[0].authors, vec!["A"]);
        assert!(set.contains("2"));
    }

    #[test]
    fn test_month_range_ignores_undated() {
        let mut undated = test_record("3", &["C"], "DE", "2021-01");
        undated.cover_month = None;
        let set: ResultSet = vec![
            test_record("1", &["A"], "US", "2021-05"),
            undated,
            test_record("2", &["B"], "US", "2020-11"),
        ]
        .into();
        let (lo, hi) = set.month_range().unwrap();
        assert_eq!(lo.to_string(), "2020-11");
        assert_eq!(hi.to_string(), "2021-05");
        assert_eq!(ResultSet::new().month_range(), None);
    }

    #[test]
    fn test_countries_merge_and_dedup() {
        let mut record = test_record("1", &["A", "B", "A"], "US", "2021-01");
        record.affiliations.push(Affiliation {
            name: Some("US University".into()),
            country: Some("US".into()),
        });
        record.author_countries.push(AuthorCountry {
            author: "B".into(),
            country: "Canada".into(),
        });
        assert_eq!(record.countries(), vec!["US", "Canada"]);
        assert_eq!(record.organizations(), vec!["US University"]);
        assert_eq!(record.distinct_authors(), vec!["A", "B"]);
    }

    #[test]
    fn test_result_set_json_is_plain_array() {
        let set: ResultSet = vec![test_record("1", &["A"], "US", "2021-01")].into();
        let json = serde_json::to_value(&set).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["cover_month"], "2021-01");
        let back: ResultSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }
}
