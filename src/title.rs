use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

// Date separators are `.` `|` or the CJK year/month marks; the stock code is
// the first digit run after the day.
static TITLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^0-9]*([0-9]{4})[.|年]([0-9]+)[.|月]([0-9]+)[^0-9]+([0-9]+).*$")
        .expect("title pattern is valid")
});

#[derive(Debug, Error, PartialEq)]
pub enum TitleError {
    #[error("title does not contain a date followed by a stock code: {0:?}")]
    NoMatch(String),
    #[error("number out of range in title: {0}")]
    Number(String),
    #[error("invalid calendar date {year}-{month}-{day}")]
    InvalidDate { year: i32, month: u32, day: u32 },
}

/// Raw facts pulled out of a title. The date is validated lazily.
#[derive(Debug, Clone, PartialEq)]
pub struct TitleFacts {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub stock: String,
}

impl TitleFacts {
    pub fn date(&self) -> Result<NaiveDate, TitleError> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day).ok_or(TitleError::InvalidDate {
            year: self.year,
            month: self.month,
            day: self.day,
        })
    }
}

pub fn parse(title: &str) -> Result<TitleFacts, TitleError> {
    let captures = TITLE_PATTERN
        .captures(title)
        .ok_or_else(|| TitleError::NoMatch(title.to_string()))?;

    let number = |idx: usize| -> Result<u32, TitleError> {
        let raw = &captures[idx];
        raw.parse::<u32>().map_err(|_| TitleError::Number(raw.to_string()))
    };

    let year = captures[1]
        .parse::<i32>()
        .map_err(|_| TitleError::Number(captures[1].to_string()))?;

    Ok(TitleFacts {
        year,
        month: number(2)?,
        day: number(3)?,
        stock: captures[4].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cjk_title() {
        let facts = parse("【公告】2017年6月30日 600000 浦发银行发布年报").unwrap();
        assert_eq!(facts.year, 2017);
        assert_eq!(facts.month, 6);
        assert_eq!(facts.day, 30);
        assert_eq!(facts.stock, "600000");
        assert_eq!(facts.date().unwrap(), NaiveDate::from_ymd_opt(2017, 6, 30).unwrap());
    }

    #[test]
    fn test_parse_dotted_title() {
        let facts = parse("News 2018.01.05: code 000651 rallies").unwrap();
        assert_eq!((facts.year, facts.month, facts.day), (2018, 1, 5));
        assert_eq!(facts.stock, "000651");
    }

    #[test]
    fn test_stock_is_first_digit_run_after_day() {
        let facts = parse("2019|3|8 sz002415 and 300750").unwrap();
        assert_eq!(facts.stock, "002415");
    }

    #[test]
    fn test_rejects_title_without_stock() {
        assert!(matches!(parse("2017年6月30日"), Err(TitleError::NoMatch(_))));
        assert!(matches!(parse("2017年6月30日 浦发银行"), Err(TitleError::NoMatch(_))));
    }

    #[test]
    fn test_rejects_leading_digits_that_are_not_a_year() {
        assert!(matches!(parse("12345.6.7 x 8"), Err(TitleError::NoMatch(_))));
        assert!(matches!(parse("Q1 2017.6.30 x 8"), Err(TitleError::NoMatch(_))));
    }

    #[test]
    fn test_impossible_date_only_fails_when_requested() {
        let facts = parse("2017年13月40日 600000").unwrap();
        assert_eq!(facts.stock, "600000");
        assert_eq!(
            facts.date(),
            Err(TitleError::InvalidDate { year: 2017, month: 13, day: 40 })
        );
    }

    #[test]
    fn test_oversized_number_is_an_error() {
        assert!(matches!(parse("2017.99999999999.1 600000"), Err(TitleError::Number(_))));
    }
}
