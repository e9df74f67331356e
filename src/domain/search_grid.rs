//! Search grid for the registry's activity search
//!
//! The registry only indexes the free-text activity field and silently caps large
//! result sets, so coverage comes from splitting every keyword across legal forms and
//! registration-date windows.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("Month {month} is outside 1..=12")]
    InvalidMonth { month: u32 },

    #[error("Date range {from} - {to} ends before it starts")]
    InvertedRange { from: YearMonth, to: YearMonth },
}

/// Calendar month used by the registration-date filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, GridError> {
        if !(1..=12).contains(&month) {
            return Err(GridError::InvalidMonth { month });
        }
        Ok(Self { year, month })
    }

    pub fn first_day(self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:02}", self.year, self.month)
    }
}

/// Inclusive registration-date window, written in config as `[year_from, month_from, year_to, month_to]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u32; 4]", into = "[u32; 4]")]
pub struct DateRange {
    pub from: YearMonth,
    pub to: YearMonth,
}

impl DateRange {
    pub fn new(from: YearMonth, to: YearMonth) -> Result<Self, GridError> {
        if from > to {
            return Err(GridError::InvertedRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// Shorthand for the `(y1, m1, y2, m2)` tuples of the default grid
    pub fn months(y1: i32, m1: u32, y2: i32, m2: u32) -> Result<Self, GridError> {
        Self::new(YearMonth::new(y1, m1)?, YearMonth::new(y2, m2)?)
    }
}

impl TryFrom<[u32; 4]> for DateRange {
    type Error = GridError;

    fn try_from([y1, m1, y2, m2]: [u32; 4]) -> Result<Self, Self::Error> {
        Self::months(y1 as i32, m1, y2 as i32, m2)
    }
}

impl From<DateRange> for [u32; 4] {
    fn from(range: DateRange) -> Self {
        [
            range.from.year as u32,
            range.from.month,
            range.to.year as u32,
            range.to.month,
        ]
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// One point of the keyword × legal form × date range grid
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchCell {
    pub keyword: String,
    pub legal_form: String,
    pub date_range: DateRange,
}

impl fmt::Display for SearchCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let form: String = self.legal_form.chars().take(10).collect();
        write!(f, "'{}' [{}] [{}]", self.keyword, form, self.date_range)
    }
}

/// The full Cartesian search space, enumerated keyword-major
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchGrid {
    keywords: Vec<String>,
    legal_forms: Vec<String>,
    date_ranges: Vec<DateRange>,
}

impl SearchGrid {
    pub fn new(keywords: Vec<String>, legal_forms: Vec<String>, date_ranges: Vec<DateRange>) -> Self {
        Self {
            keywords,
            legal_forms,
            date_ranges,
        }
    }

    pub fn len(&self) -> usize {
        self.keywords.len() * self.legal_forms.len() * self.date_ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn legal_forms(&self) -> &[String] {
        &self.legal_forms
    }

    pub fn date_ranges(&self) -> &[DateRange] {
        &self.date_ranges
    }

    /// Cell at a position of the enumeration order, or `None` past the end
    pub fn cell(&self, index: usize) -> Option<SearchCell> {
        if index >= self.len() {
            return None;
        }
        let per_keyword = self.legal_forms.len() * self.date_ranges.len();
        let keyword = &self.keywords[index / per_keyword];
        let rest = index % per_keyword;
        let legal_form = &self.legal_forms[rest / self.date_ranges.len()];
        let date_range = self.date_ranges[rest % self.date_ranges.len()];

        Some(SearchCell {
            keyword: keyword.clone(),
            legal_form: legal_form.clone(),
            date_range,
        })
    }

    /// True when `index` is the last cell searched for its keyword
    pub fn closes_keyword(&self, index: usize) -> bool {
        let per_keyword = self.legal_forms.len() * self.date_ranges.len();
        per_keyword > 0 && (index + 1) % per_keyword == 0
    }

    pub fn cells(&self) -> impl Iterator<Item = SearchCell> + '_ {
        (0..self.len()).filter_map(move |i| self.cell(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(k: usize, l: usize, d: usize) -> SearchGrid {
        SearchGrid::new(
            (0..k).map(|i| format!("kw{i}")).collect(),
            (0..l).map(|i| format!("form{i}")).collect(),
            (0..d)
                .map(|i| DateRange::months(2000 + i as i32, 1, 2000 + i as i32, 12).unwrap())
                .collect(),
        )
    }

    #[test]
    fn enumerates_full_product_in_keyword_major_order() {
        let grid = grid(2, 3, 4);
        let cells: Vec<_> = grid.cells().collect();

        assert_eq!(cells.len(), 24);
        assert_eq!(cells[0].keyword, "kw0");
        assert_eq!(cells[0].legal_form, "form0");
        assert_eq!(cells[3].date_range.from.year, 2003);
        assert_eq!(cells[4].legal_form, "form1");
        assert_eq!(cells[12].keyword, "kw1");

        let unique: std::collections::HashSet<_> = cells.iter().collect();
        assert_eq!(unique.len(), 24);
    }

    #[test]
    fn keyword_boundaries() {
        let grid = grid(2, 2, 3);
        let closing: Vec<usize> = (0..grid.len()).filter(|&i| grid.closes_keyword(i)).collect();
        assert_eq!(closing, vec![5, 11]);
    }

    #[test]
    fn empty_dimension_yields_no_cells() {
        let grid = grid(3, 0, 2);
        assert!(grid.is_empty());
        assert_eq!(grid.cells().count(), 0);
        assert!(grid.cell(0).is_none());
    }

    #[test]
    fn month_bounds() {
        let feb = YearMonth::new(2024, 2).unwrap();
        assert_eq!(feb.last_day(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        let dec = YearMonth::new(2025, 12).unwrap();
        assert_eq!(dec.last_day(), NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
        assert_eq!(dec.first_day(), NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert!(YearMonth::new(2025, 13).is_err());
    }

    #[test]
    fn date_range_config_form() {
        let range: DateRange = serde_json::from_str("[2025, 10, 2025, 12]").unwrap();
        assert_eq!(range.to_string(), "2025/10-2025/12");
        assert!(serde_json::from_str::<DateRange>("[2025, 12, 2025, 1]").is_err());
        assert!(serde_json::from_str::<DateRange>("[2025, 0, 2025, 1]").is_err());
    }
}
