//! Per-day tracking and summary scoring of the quotes that follow an info.

use crate::data_structures::{Judge, Tracert};
use crate::stock::StockResult;
use chrono::NaiveDate;
use thiserror::Error;

// A baseline below this is treated as "not yet known".
const MIN_BEGIN_PRICE: f64 = 0.01;

const DATE_COL: usize = 0;
const OPEN_COL: usize = 1;
const CHANGE_PERCENT_COL: usize = 4;
const LOW_COL: usize = 5;
const HIGH_COL: usize = 6;

#[derive(Debug, Error, PartialEq)]
pub enum EvaluateError {
    #[error("quote row {row} has {len} columns, expected at least {min}", min = HIGH_COL + 1)]
    ShortRow { row: usize, len: usize },
    #[error("quote row {row} column {column}: cannot parse {value:?}")]
    BadValue { row: usize, column: usize, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub tracerts: Vec<Tracert>,
    pub judge: Judge,
}

#[derive(Debug, Clone, PartialEq)]
struct Quote {
    date: NaiveDate,
    open: f64,
    change_percent: f64,
    low: f64,
    high: f64,
}

fn parse_quote(row: usize, cols: &[String]) -> Result<Quote, EvaluateError> {
    if cols.len() <= HIGH_COL {
        return Err(EvaluateError::ShortRow { row, len: cols.len() });
    }

    let bad = |column: usize| EvaluateError::BadValue {
        row,
        column,
        value: cols[column].clone(),
    };
    let number = |column: usize, raw: &str| raw.trim().parse::<f64>().map_err(|_| bad(column));

    Ok(Quote {
        date: NaiveDate::parse_from_str(cols[DATE_COL].trim(), "%Y-%m-%d").map_err(|_| bad(DATE_COL))?,
        open: number(OPEN_COL, &cols[OPEN_COL])?,
        change_percent: number(CHANGE_PERCENT_COL, &cols[CHANGE_PERCENT_COL].replace('%', ""))?,
        low: number(LOW_COL, &cols[LOW_COL])?,
        high: number(HIGH_COL, &cols[HIGH_COL])?,
    })
}

fn percent(value: f64, base: f64) -> f64 {
    (value - base) / base * 100.0
}

/// Scans the quote window in date order and derives one tracert per row plus
/// the judge. Ids on the returned records are placeholders; the store assigns
/// tracert ids. Percentages measured against a missing baseline or a zero open
/// are left empty so every stored value stays finite.
pub fn evaluate(info_id: u64, result: &StockResult) -> Result<Evaluation, EvaluateError> {
    let mut quotes = if result.is_ok() {
        result
            .hq
            .iter()
            .enumerate()
            .map(|(row, cols)| parse_quote(row, cols))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        Vec::new()
    };
    quotes.sort_by_key(|q| q.date);

    let mut begin_price = 0.0_f64;
    let mut max_price = 0.0_f64;
    let mut increase_days = 0_u32;

    let mut judge = Judge {
        id: info_id,
        info_id,
        day5: None,
        day10: None,
        day20: None,
        day30: None,
        increase_days: 0,
        increase_total: 0.0,
        score: 0,
    };
    let mut tracerts = Vec::with_capacity(quotes.len());

    for (days, quote) in (0_u32..).zip(quotes.iter()) {
        if begin_price < MIN_BEGIN_PRICE {
            begin_price = quote.open;
        }
        let baseline = (begin_price >= MIN_BEGIN_PRICE).then_some(begin_price);

        tracerts.push(Tracert {
            id: 0,
            info_id,
            date: quote.date,
            days,
            highest: quote.high,
            lowest: quote.low,
            increase_day: quote.change_percent,
            increase_total: baseline.map(|begin| percent(quote.high, begin)),
            amplitude_day: (quote.open > 0.0).then(|| (quote.high - quote.low) / quote.open * 100.0),
        });

        if quote.high > max_price {
            max_price = quote.high;
            increase_days = days + 1;
        }

        let slot = match days {
            5 => &mut judge.day5,
            10 => &mut judge.day10,
            20 => &mut judge.day20,
            30 => &mut judge.day30,
            _ => continue,
        };
        *slot = baseline.map(|begin| percent(quote.open, begin));
    }

    judge.increase_days = increase_days;
    if begin_price >= MIN_BEGIN_PRICE {
        judge.increase_total = percent(max_price, begin_price);
    }
    // `as` truncates toward zero and maps NaN to 0
    judge.score = judge.increase_total as i32;

    Ok(Evaluation { tracerts, judge })
}
