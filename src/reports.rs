use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Weekday};
use rusqlite::Connection;

use crate::error::Result;

/// Which database table a report reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ledger {
    History,
    Staging,
}

impl Ledger {
    fn table(&self) -> &'static str {
        match self {
            Self::History => "transactions",
            Self::Staging => "temporary_transactions",
        }
    }
}

// ---------------------------------------------------------------------------
// Year filter helper
// ---------------------------------------------------------------------------

fn year_filter(year: Option<i32>) -> (String, Vec<String>) {
    match year {
        Some(y) => ("date LIKE ?1".to_string(), vec![format!("{y:04}%")]),
        None => ("1 = 1".to_string(), Vec::new()),
    }
}

fn as_params(params: &[String]) -> Vec<&dyn rusqlite::types::ToSql> {
    params
        .iter()
        .map(|p| p as &dyn rusqlite::types::ToSql)
        .collect()
}

/// Most recent year with data.
pub fn latest_year(conn: &Connection, ledger: Ledger) -> Result<Option<i32>> {
    let year: Option<String> = conn.query_row(
        &format!("SELECT MAX(substr(date, 1, 4)) FROM {}", ledger.table()),
        [],
        |r| r.get(0),
    )?;
    Ok(year.and_then(|y| y.parse().ok()))
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub income: f64,
    /// Absolute value of all negative amounts.
    pub expenses: f64,
    pub profit: f64,
    pub count: i64,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
}

pub fn summary(conn: &Connection, ledger: Ledger, year: Option<i32>) -> Result<Summary> {
    let (clause, params) = year_filter(year);
    let sql = format!(
        "SELECT COALESCE(SUM(CASE WHEN net_amount > 0 THEN net_amount END), 0), \
                COALESCE(SUM(CASE WHEN net_amount < 0 THEN -net_amount END), 0), \
                COUNT(*), MIN(date), MAX(date) \
         FROM {} WHERE {clause}",
        ledger.table()
    );
    let (income, expenses, count, first_date, last_date) =
        conn.query_row(&sql, as_params(&params).as_slice(), |r| {
            Ok((
                r.get::<_, f64>(0)?,
                r.get::<_, f64>(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
            ))
        })?;
    Ok(Summary {
        income,
        expenses,
        profit: income - expenses,
        count,
        first_date,
        last_date,
    })
}

// ---------------------------------------------------------------------------
// Monthly
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MonthRow {
    /// `YYYY-MM`
    pub month: String,
    pub income: f64,
    pub expenses: f64,
    pub profit: f64,
    pub cumulative: f64,
}

pub fn monthly(conn: &Connection, ledger: Ledger, year: Option<i32>) -> Result<Vec<MonthRow>> {
    let (clause, params) = year_filter(year);
    let sql = format!(
        "SELECT substr(date, 1, 7) AS month, \
                COALESCE(SUM(CASE WHEN net_amount > 0 THEN net_amount END), 0), \
                COALESCE(SUM(CASE WHEN net_amount < 0 THEN -net_amount END), 0) \
         FROM {} WHERE {clause} GROUP BY month ORDER BY month",
        ledger.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(as_params(&params).as_slice(), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?, r.get::<_, f64>(2)?))
    })?;

    let mut running = 0.0;
    let mut out = Vec::new();
    for row in rows {
        let (month, income, expenses) = row?;
        let profit = income - expenses;
        running += profit;
        out.push(MonthRow {
            month,
            income,
            expenses,
            profit,
            cumulative: running,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Cumulative profit per day
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DayRow {
    /// `YYYY-MM-DD`
    pub day: String,
    pub net: f64,
    pub cumulative: f64,
}

pub fn cumulative(conn: &Connection, ledger: Ledger, year: Option<i32>) -> Result<Vec<DayRow>> {
    let (clause, params) = year_filter(year);
    let sql = format!(
        "SELECT substr(date, 1, 10) AS day, SUM(net_amount) \
         FROM {} WHERE {clause} GROUP BY day ORDER BY day",
        ledger.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(as_params(&params).as_slice(), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
    })?;

    let mut running = 0.0;
    let mut out = Vec::new();
    for row in rows {
        let (day, net) = row?;
        running += net;
        out.push(DayRow {
            day,
            net,
            cumulative: running,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Weekday performance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct WeekdayRow {
    pub weekday: Weekday,
    /// Mean of the daily income totals of this weekday.
    pub average_income: f64,
    /// Days with income that fell on this weekday.
    pub days: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeekdayPerformance {
    /// Monday first; the closed weekday and weekdays without income are absent.
    pub rows: Vec<WeekdayRow>,
    /// Total expenses spread over every day that has data.
    pub daily_expense_reference: f64,
}

pub fn weekday_performance(
    conn: &Connection,
    ledger: Ledger,
    year: Option<i32>,
    closed: Option<Weekday>,
) -> Result<WeekdayPerformance> {
    let (clause, params) = year_filter(year);
    let table = ledger.table();

    let (expenses, days_with_data): (f64, i64) = conn.query_row(
        &format!(
            "SELECT COALESCE(SUM(CASE WHEN net_amount < 0 THEN -net_amount END), 0), \
                    COUNT(DISTINCT substr(date, 1, 10)) \
             FROM {table} WHERE {clause}"
        ),
        as_params(&params).as_slice(),
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let daily_expense_reference = if days_with_data > 0 {
        expenses / days_with_data as f64
    } else {
        0.0
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT substr(date, 1, 10) AS day, SUM(net_amount) \
         FROM {table} WHERE net_amount > 0 AND {clause} GROUP BY day"
    ))?;
    let days = stmt.query_map(as_params(&params).as_slice(), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
    })?;

    // weekday index (Monday = 0) -> (sum of daily totals, number of days)
    let mut buckets: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for day in days {
        let (day, income) = day?;
        let Ok(date) = NaiveDate::parse_from_str(&day, "%Y-%m-%d") else {
            continue;
        };
        if Some(date.weekday()) == closed {
            continue;
        }
        let entry = buckets.entry(date.weekday().num_days_from_monday()).or_default();
        entry.0 += income;
        entry.1 += 1;
    }

    let rows = buckets
        .into_iter()
        .filter_map(|(idx, (sum, n))| {
            let weekday = Weekday::try_from(idx as u8).ok()?;
            Some(WeekdayRow {
                weekday,
                average_income: sum / n as f64,
                days: n,
            })
        })
        .collect();

    Ok(WeekdayPerformance {
        rows,
        daily_expense_reference,
    })
}

// ---------------------------------------------------------------------------
// Average performance (expanding means over one year)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AverageRow {
    pub month: String,
    pub income: f64,
    pub expenses: f64,
    pub profit: f64,
    pub mean_income: f64,
    pub mean_expenses: f64,
    pub mean_profit: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AveragePerformance {
    pub year: i32,
    pub rows: Vec<AverageRow>,
}

/// Monthly figures of `year` (default: the latest year with data) with the
/// running mean of each series up to that month.
pub fn average_performance(
    conn: &Connection,
    ledger: Ledger,
    year: Option<i32>,
) -> Result<Option<AveragePerformance>> {
    let year = match year {
        Some(y) => y,
        None => match latest_year(conn, ledger)? {
            Some(y) => y,
            None => return Ok(None),
        },
    };
    let months = monthly(conn, ledger, Some(year))?;

    let (mut income, mut expenses, mut profit) = (0.0, 0.0, 0.0);
    let rows = months
        .into_iter()
        .enumerate()
        .map(|(i, m)| {
            let n = (i + 1) as f64;
            income += m.income;
            expenses += m.expenses;
            profit += m.profit;
            AverageRow {
                month: m.month,
                income: m.income,
                expenses: m.expenses,
                profit: m.profit,
                mean_income: income / n,
                mean_expenses: expenses / n,
                mean_profit: profit / n,
            }
        })
        .collect();
    Ok(Some(AveragePerformance { year, rows }))
}
