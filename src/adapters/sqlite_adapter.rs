//! SQLite data adapter.

use std::collections::HashMap;

use chrono::NaiveDate;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};

use crate::domain::error::FactorError;
use crate::domain::market::{Fundamentals, PricePoint, SymbolRange};
use crate::ports::config_port::ConfigPort;
use crate::ports::fundamentals_port::FundamentalsStore;
use crate::ports::price_port::PriceStore;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    min_symbols_per_day: usize,
}

fn db_error(e: impl std::fmt::Display) -> FactorError {
    FactorError::Store {
        reason: e.to_string(),
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(text: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            text.len(),
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, FactorError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| FactorError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).clamp(1, 64) as u32;
        let min_symbols = config.get_int("data", "min_symbols_per_day", 1).max(1) as usize;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(db_error)?;

        tracing::debug!(path = %db_path, pool_size, "opened sqlite store");
        Ok(Self {
            pool,
            min_symbols_per_day: min_symbols,
        })
    }

    pub fn in_memory() -> Result<Self, FactorError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_error)?;

        Ok(Self {
            pool,
            min_symbols_per_day: 1,
        })
    }

    pub fn with_min_symbols_per_day(mut self, count: usize) -> Self {
        self.min_symbols_per_day = count.max(1);
        self
    }

    pub fn initialize_schema(&self) -> Result<(), FactorError> {
        let conn = self.pool.get().map_err(db_error)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS prices (
                symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                price REAL NOT NULL,
                PRIMARY KEY (symbol, date)
            );
            CREATE INDEX IF NOT EXISTS idx_prices_date ON prices(date);
            CREATE TABLE IF NOT EXISTS fundamentals (
                symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                shares_outstanding REAL,
                eps REAL,
                total_assets REAL,
                total_liabilities REAL,
                PRIMARY KEY (symbol, date)
            );",
        )
        .map_err(db_error)?;

        Ok(())
    }

    pub fn insert_prices(&self, points: &[PricePoint]) -> Result<(), FactorError> {
        let mut conn = self.pool.get().map_err(db_error)?;
        let tx = conn.transaction().map_err(db_error)?;

        for point in points {
            tx.execute(
                "INSERT OR REPLACE INTO prices (symbol, date, price) VALUES (?1, ?2, ?3)",
                params![point.symbol, format_date(point.date), point.price],
            )
            .map_err(db_error)?;
        }

        tx.commit().map_err(db_error)?;
        Ok(())
    }

    pub fn insert_fundamentals(
        &self,
        symbol: &str,
        date: NaiveDate,
        record: &Fundamentals,
    ) -> Result<(), FactorError> {
        let conn = self.pool.get().map_err(db_error)?;
        conn.execute(
            "INSERT OR REPLACE INTO fundamentals
                (symbol, date, shares_outstanding, eps, total_assets, total_liabilities)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                symbol,
                format_date(date),
                record.shares_outstanding,
                record.eps,
                record.total_assets,
                record.total_liabilities
            ],
        )
        .map_err(db_error)?;
        Ok(())
    }
}

impl PriceStore for SqliteStore {
    fn get_many(&self, ranges: &[SymbolRange]) -> Result<Vec<PricePoint>, FactorError> {
        let conn = self.pool.get().map_err(db_error)?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT symbol, date, price FROM prices
                 WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date ASC",
            )
            .map_err(db_error)?;

        let mut points = Vec::new();
        for range in ranges {
            let rows = stmt
                .query_map(
                    params![range.symbol, format_date(range.start), format_date(range.end)],
                    |row| {
                        Ok(PricePoint {
                            symbol: row.get(0)?,
                            date: parse_date(row.get(1)?)?,
                            price: row.get(2)?,
                        })
                    },
                )
                .map_err(db_error)?;
            for row in rows {
                points.push(row.map_err(db_error)?);
            }
        }
        Ok(points)
    }

    fn list_trading_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, FactorError> {
        let conn = self.pool.get().map_err(db_error)?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT date FROM prices
                 WHERE date >= ?1 AND date <= ?2
                 GROUP BY date
                 HAVING COUNT(DISTINCT symbol) >= ?3
                 ORDER BY date ASC",
            )
            .map_err(db_error)?;

        let rows = stmt
            .query_map(
                params![
                    format_date(start),
                    format_date(end),
                    self.min_symbols_per_day as i64
                ],
                |row| parse_date(row.get(0)?),
            )
            .map_err(db_error)?;

        let mut days = Vec::new();
        for row in rows {
            days.push(row.map_err(db_error)?);
        }
        Ok(days)
    }

    fn get_many_on_day(
        &self,
        symbols: &[String],
        date: NaiveDate,
    ) -> Result<HashMap<String, f64>, FactorError> {
        let conn = self.pool.get().map_err(db_error)?;
        let mut stmt = conn
            .prepare_cached("SELECT price FROM prices WHERE symbol = ?1 AND date = ?2")
            .map_err(db_error)?;

        let day = format_date(date);
        let mut prices = HashMap::new();
        for symbol in symbols {
            let price: Option<f64> = stmt
                .query_row(params![symbol, day], |row| row.get(0))
                .optional()
                .map_err(db_error)?;
            if let Some(price) = price {
                prices.insert(symbol.clone(), price);
            }
        }
        Ok(prices)
    }

    fn latest_trading_day(&self) -> Result<Option<NaiveDate>, FactorError> {
        let conn = self.pool.get().map_err(db_error)?;
        conn.query_row(
            "SELECT date FROM prices
             GROUP BY date
             HAVING COUNT(DISTINCT symbol) >= ?1
             ORDER BY date DESC
             LIMIT 1",
            params![self.min_symbols_per_day as i64],
            |row| parse_date(row.get(0)?),
        )
        .optional()
        .map_err(db_error)
    }
}

impl FundamentalsStore for SqliteStore {
    fn get(&self, symbol: &str, date: NaiveDate) -> Result<Option<Fundamentals>, FactorError> {
        let conn = self.pool.get().map_err(db_error)?;
        conn.query_row(
            "SELECT shares_outstanding, eps, total_assets, total_liabilities
             FROM fundamentals
             WHERE symbol = ?1 AND date <= ?2
             ORDER BY date DESC
             LIMIT 1",
            params![symbol, format_date(date)],
            |row| {
                Ok(Fundamentals {
                    shares_outstanding: row.get(0)?,
                    eps: row.get(1)?,
                    total_assets: row.get(2)?,
                    total_liabilities: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(db_error)
    }
}
