use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, params};

use mercato_core::{CandleStore, SeriesKey, StoreError};
use mercato_types::OhlcvBar;

/// SQLite-backed warehouse.
///
/// One connection behind a mutex; statements run on the blocking pool so
/// the async runtime never stalls on disk I/O. The candle table is keyed by
/// `(market, provider, symbol, timeframe, ts)` with upsert-on-conflict, so
/// backfill replays converge. Timestamps are stored as INTEGER milliseconds.
pub struct SqliteCandleStore {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS candles (
    market    TEXT    NOT NULL,
    provider  TEXT    NOT NULL,
    symbol    TEXT    NOT NULL,
    timeframe TEXT    NOT NULL,
    ts        INTEGER NOT NULL,
    open      REAL    NOT NULL,
    high      REAL    NOT NULL,
    low       REAL    NOT NULL,
    close     REAL    NOT NULL,
    volume    REAL    NOT NULL,
    PRIMARY KEY (market, provider, symbol, timeframe, ts)
);
";

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl SqliteCandleStore {
    /// Open (or create) the database at `path` and ensure the schema.
    ///
    /// # Errors
    /// [`StoreError::Backend`] when the file cannot be opened or migrated.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("sqlite lock poisoned");
            op(&conn).map_err(backend)
        })
        .await
        .map_err(|err| StoreError::Backend(format!("blocking task failed: {err}")))?
    }
}

#[async_trait]
impl CandleStore for SqliteCandleStore {
    async fn range(
        &self,
        key: &SeriesKey,
        since_ms: Option<i64>,
        before_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, StoreError> {
        let key = key.clone();
        let lower = since_ms.unwrap_or(i64::MIN);
        let upper = before_ms.unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.blocking(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT ts, open, high, low, close, volume FROM candles
                 WHERE market = ?1 AND provider = ?2 AND symbol = ?3 AND timeframe = ?4
                   AND ts >= ?5 AND ts < ?6
                 ORDER BY ts ASC LIMIT ?7",
            )?;
            let rows = stmt.query_map(
                params![
                    key.market,
                    key.provider,
                    key.symbol,
                    key.timeframe.to_string(),
                    lower,
                    upper,
                    limit
                ],
                |row| {
                    Ok(OhlcvBar {
                        timestamp_ms: row.get(0)?,
                        open: row.get(1)?,
                        high: row.get(2)?,
                        low: row.get(3)?,
                        close: row.get(4)?,
                        volume: row.get(5)?,
                    })
                },
            )?;
            rows.collect()
        })
        .await
    }

    async fn upsert(&self, key: &SeriesKey, bars: &[OhlcvBar]) -> Result<(), StoreError> {
        if bars.is_empty() {
            return Ok(());
        }
        let key = key.clone();
        let bars = bars.to_vec();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO candles (market, provider, symbol, timeframe, ts, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (market, provider, symbol, timeframe, ts)
                 DO UPDATE SET open = excluded.open, high = excluded.high,
                               low = excluded.low, close = excluded.close,
                               volume = excluded.volume",
            )?;
            for bar in &bars {
                stmt.execute(params![
                    key.market,
                    key.provider,
                    key.symbol,
                    key.timeframe.to_string(),
                    bar.timestamp_ms,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ])?;
            }
            Ok(())
        })
        .await
    }

    async fn has_any_in_range(
        &self,
        key: &SeriesKey,
        since_ms: i64,
        before_ms: i64,
    ) -> Result<bool, StoreError> {
        let key = key.clone();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM candles
                    WHERE market = ?1 AND provider = ?2 AND symbol = ?3 AND timeframe = ?4
                      AND ts >= ?5 AND ts < ?6
                 )",
                params![
                    key.market,
                    key.provider,
                    key.symbol,
                    key.timeframe.to_string(),
                    since_ms,
                    before_ms
                ],
                |row| row.get(0),
            )
        })
        .await
    }
}
