//! CSV and JSON export of result sets.
//!
//! CSV columns follow [`CSV_COLUMNS`]. List-valued fields are joined with
//! [`LIST_DELIMITER`]; paired values (author/country, organization/country)
//! use [`PAIR_SEPARATOR`] inside each list item. A separator or
//! [`ESCAPE`] occurring inside a value is prefixed with [`ESCAPE`], so values
//! such as the keyword `Li; Na batteries` survive a round trip. JSON is the
//! plain array of [`ArticleRecord`] objects.

use crate::error::Result;
use crate::record::{Affiliation, ArticleRecord, AuthorCountry, ResultSet};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::info;

/// Separator between items of a list-valued column
pub const LIST_DELIMITER: char = ';';

/// Separator inside a paired list item
pub const PAIR_SEPARATOR: char = '|';

/// Escapes a separator that is part of a value
pub const ESCAPE: char = '\\';

/// CSV column order
pub const CSV_COLUMNS: &[&str] = &[
    "identifier", "eid", "title", "authors", "author_countries", "affiliations",
    "cover_month", "keywords", "description", "subject_area", "publication_name", "doi",
];

/// Flat CSV row; field order must match `CSV_COLUMNS`.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    identifier: String,
    eid: String,
    title: String,
    authors: String,
    author_countries: String,
    affiliations: String,
    cover_month: String,
    keywords: String,
    description: String,
    subject_area: String,
    publication_name: String,
    doi: String,
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, LIST_DELIMITER | PAIR_SEPARATOR | ESCAPE) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            // a trailing lone escape is kept as is
            out.push(chars.next().unwrap_or(ESCAPE));
        } else {
            out.push(c);
        }
    }
    out
}

/// Split on `sep` wherever it is not escaped; pieces stay escaped.
fn split_unescaped(cell: &str, sep: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut begin = 0;
    let mut escaped = false;
    for (i, c) in cell.char_indices() {
        if escaped {
            escaped = false;
        } else if c == ESCAPE {
            escaped = true;
        } else if c == sep {
            pieces.push(&cell[begin..i]);
            begin = i + c.len_utf8();
        }
    }
    pieces.push(&cell[begin..]);
    pieces
}

/// Join already escaped items.
fn join_escaped<I: IntoIterator<Item = String>>(items: I) -> String {
    let mut out = String::new();
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            out.push(LIST_DELIMITER);
        }
        out.push_str(&item);
    }
    out
}

fn join_list<S: AsRef<str>>(items: &[S]) -> String {
    join_escaped(items.iter().map(|item| escape(item.as_ref())))
}

fn join_pairs<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    join_escaped(
        pairs
            .into_iter()
            .map(|(left, right)| format!("{}{}{}", escape(left), PAIR_SEPARATOR, escape(right))),
    )
}

fn split_list(cell: &str) -> Vec<String> {
    if cell.is_empty() {
        return Vec::new();
    }
    split_unescaped(cell, LIST_DELIMITER)
        .into_iter()
        .map(unescape)
        .collect()
}

/// Pairs without a separator keep the whole item on the left.
fn split_pairs(cell: &str) -> Vec<(String, String)> {
    if cell.is_empty() {
        return Vec::new();
    }
    split_unescaped(cell, LIST_DELIMITER)
        .into_iter()
        .map(|item| {
            let left = split_unescaped(item, PAIR_SEPARATOR)
                .first()
                .copied()
                .unwrap_or(item);
            let right = item
                .get(left.len() + PAIR_SEPARATOR.len_utf8()..)
                .unwrap_or_default();
            (unescape(left), unescape(right))
        })
        .collect()
}

fn optional(cell: String) -> Option<String> {
    (!cell.is_empty()).then_some(cell)
}

impl From<&ArticleRecord> for CsvRow {
    fn from(r: &ArticleRecord) -> Self {
        CsvRow {
            identifier: r.identifier.clone(),
            eid: r.eid.clone().unwrap_or_default(),
            title: r.title.clone(),
            authors: join_list(&r.authors),
            author_countries: join_pairs(
                r.author_countries
                    .iter()
                    .map(|p| (p.author.as_str(), p.country.as_str())),
            ),
            affiliations: join_pairs(r.affiliations.iter().map(|a| {
                (
                    a.name.as_deref().unwrap_or_default(),
                    a.country.as_deref().unwrap_or_default(),
                )
            })),
            cover_month: r.cover_month.map(|m| m.to_string()).unwrap_or_default(),
            keywords: join_list(&r.keywords),
            description: r.description.clone().unwrap_or_default(),
            subject_area: r.subject_area.clone().unwrap_or_default(),
            publication_name: r.publication_name.clone().unwrap_or_default(),
            doi: r.doi.clone().unwrap_or_default(),
        }
    }
}

impl TryFrom<CsvRow> for ArticleRecord {
    type Error = crate::error::ScopusError;

    fn try_from(row: CsvRow) -> Result<Self> {
        let author_countries = split_pairs(&row.author_countries)
            .into_iter()
            .map(|(author, country)| AuthorCountry { author, country })
            .collect();
        let affiliations = split_pairs(&row.affiliations)
            .into_iter()
            .map(|(name, country)| Affiliation {
                name: optional(name),
                country: optional(country),
            })
            .collect();
        let cover_month = match optional(row.cover_month) {
            Some(raw) => Some(raw.parse()?),
            None => None,
        };

        Ok(ArticleRecord {
            identifier: row.identifier,
            eid: optional(row.eid),
            title: row.title,
            authors: split_list(&row.authors),
            author_countries,
            affiliations,
            cover_month,
            keywords: split_list(&row.keywords),
            description: optional(row.description),
            subject_area: optional(row.subject_area),
            publication_name: optional(row.publication_name),
            doi: optional(row.doi),
        })
    }
}

/// Write one CSV row per record, header included.
pub fn write_csv<W: Write>(results: &ResultSet, writer: W) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(true).from_writer(writer);
    if results.is_empty() {
        wtr.write_record(CSV_COLUMNS)?;
    }
    for record in results {
        wtr.serialize(CsvRow::from(record))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read records previously written by [`write_csv`].
pub fn read_csv<R: Read>(reader: R) -> Result<ResultSet> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let mut results = ResultSet::new();
    for row in rdr.deserialize::<CsvRow>() {
        results.insert(ArticleRecord::try_from(row?)?);
    }
    Ok(results)
}

/// Write any serializable value as pretty JSON.
pub fn write_json<T: Serialize + ?Sized, W: Write>(value: &T, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

/// Read a JSON array of records.
pub fn read_json<R: Read>(reader: R) -> Result<ResultSet> {
    Ok(serde_json::from_reader(reader)?)
}

/// Save the result set as CSV at `path`.
pub fn save_csv(path: &Path, results: &ResultSet) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write_csv(results, &mut file)?;
    file.flush()?;
    info!(path = %path.display(), rows = results.len(), "Saved CSV");
    Ok(())
}

/// Save any serializable value as JSON at `path`.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write_json(value, &mut file)?;
    file.flush()?;
    info!(path = %path.display(), "Saved JSON");
    Ok(())
}

/// Load a CSV file written by [`save_csv`].
pub fn load_csv(path: &Path) -> Result<ResultSet> {
    read_csv(BufReader::new(File::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::test_record;

    fn two_records() -> ResultSet {
        let mut first = test_record("SCOPUS_ID:1", &["Doe J.", "Roe, Ann"], "US", "2021-01");
        first.keywords = vec!["graphene".into(), "energy storage".into()];
        first.author_countries = vec![AuthorCountry {
            author: "Roe, Ann".into(),
            country: "United States".into(),
        }];
        first.description = Some("Abstract, with \"quotes\"\nand a newline".into());
        first.doi = Some("10.1000/xyz".into());

        let mut second = test_record("SCOPUS_ID:2", &["Lone A."], "Chile", "2021-02");
        second.affiliations.push(Affiliation {
            name: None,
            country: Some("Peru".into()),
        });
        second.cover_month = None;
        vec![first, second].into()
    }

    #[test]
    fn test_csv_round_trip_preserves_author_lists() {
        let results = two_records();
        let mut buf = Vec::new();
        write_csv(&results, &mut buf).unwrap();

        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with(&CSV_COLUMNS.join(",")));
        assert!(text.contains("Doe J.;\"Roe, Ann\"") || text.contains("\"Doe J.;Roe, Ann\""));

        let mut rdr = csv::Reader::from_reader(buf.as_slice());
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        let authors: Vec<&str> = rows[0][3].split(LIST_DELIMITER).collect();
        assert_eq!(authors, vec!["Doe J.", "Roe, Ann"]);

        let back = read_csv(buf.as_slice()).unwrap();
        assert_eq!(back, results);
    }

    #[test]
    fn test_separators_inside_values_survive_round_trip() {
        let mut record = test_record("SCOPUS_ID:7", &["O'Neil; P.", "Back\\slash"], "US", "2022-03");
        record.keywords = vec!["Li; Na batteries".into(), "graphene".into(), "a|b".into()];
        record.author_countries = vec![AuthorCountry {
            author: "O'Neil; P.".into(),
            country: "Trinidad | Tobago".into(),
        }];
        record.affiliations = vec![Affiliation {
            name: Some("Lab; Dept|Unit".into()),
            country: None,
        }];
        let results: ResultSet = vec![record].into();

        let mut buf = Vec::new();
        write_csv(&results, &mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.contains("Li\\; Na batteries;graphene;a\\|b"));

        let back = read_csv(buf.as_slice()).unwrap();
        assert_eq!(back, results);
    }

    #[test]
    fn test_split_helpers() {
        assert_eq!(split_list("a\\;b;c"), vec!["a;b", "c"]);
        assert!(split_list("").is_empty());
        assert_eq!(
            split_pairs("Doe|US;Solo"),
            vec![("Doe".to_string(), "US".to_string()), ("Solo".to_string(), String::new())]
        );
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }

    #[test]
    fn test_empty_result_set_writes_header_only() {
        let mut buf = Vec::new();
        write_csv(&ResultSet::new(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.trim_end(), CSV_COLUMNS.join(","));
        assert!(read_csv(text.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_json_field_names_are_stable() {
        let results = two_records();
        let mut buf = Vec::new();
        write_json(&results, &mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        let first = value[0].as_object().unwrap();
        for key in [
            "identifier", "eid", "title", "authors", "author_countries", "affiliations",
            "cover_month", "keywords", "description", "subject_area", "publication_name", "doi",
        ] {
            assert!(first.contains_key(key), "missing {}", key);
        }
        assert_eq!(value[1]["cover_month"], serde_json::Value::Null);
        assert_eq!(read_json(buf.as_slice()).unwrap(), results);
    }

    #[test]
    fn test_save_and_load_files() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("results.csv");
        let json_path = dir.path().join("results.json");
        let results = two_records();

        save_csv(&csv_path, &results).unwrap();
        save_json(&json_path, &results).unwrap();

        assert_eq!(load_csv(&csv_path).unwrap(), results);
        let json = std::fs::read_to_string(&json_path).unwrap();
        assert!(json.contains("SCOPUS_ID:2"));
    }

    #[test]
    fn test_bad_month_in_csv_is_rejected() {
        let mut text = CSV_COLUMNS.join(",");
        text.push_str("\nSCOPUS_ID:9,,T,A,,,March,,,,,\n");
        assert!(read_csv(text.as_bytes()).is_err());
    }
}
