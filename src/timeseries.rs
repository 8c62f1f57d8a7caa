//! Time-series reads over tables keyed by a `"Time"` column.
//!
//! Each multi-field read builds one statement per field and runs them as a
//! [`Batch`], returning one [`Rows`] per field in the order given. Time bounds
//! are bound as UTC timestamps; bucket widths and limits are integers written
//! into the SQL text.

use chrono::{DateTime, Utc};

use crate::builder::{quote_ident, Statement};
use crate::driver::{Batch, Driver};
use crate::error::{DbError, DbResult};
use crate::rows::Rows;
use crate::types::{Aggregate, HistoricWhere, TIME_COLUMN};
use crate::value::Value;

/// Alias of the bucket column in downsampled and aggregate results.
pub const BUCKET_COLUMN: &str = "dateTime";

fn ts(t: &DateTime<Utc>) -> Value {
    Value::Timestamp(t.naive_utc())
}

fn time_col() -> String {
    quote_ident(TIME_COLUMN)
}

fn check_bucket(bucket_secs: u64) -> DbResult<()> {
    if bucket_secs == 0 {
        return Err(DbError::invalid("bucket width must be at least one second"));
    }
    Ok(())
}

fn order(descending: bool) -> &'static str {
    if descending { "DESC" } else { "ASC" }
}

/// `None` and `Some(0)` both mean no limit.
fn limit_clause(limit: Option<u64>) -> String {
    limit
        .filter(|n| *n > 0)
        .map(|n| format!(" LIMIT {}", n))
        .unwrap_or_default()
}

/// Most recent non-null value of `field`.
pub fn latest_value(table: &str, field: &str) -> Statement {
    let (t, f) = (time_col(), quote_ident(field));
    Statement::raw(format!(
        "SELECT {t}, {f} FROM {} WHERE {f} IS NOT NULL ORDER BY {t} DESC LIMIT 1",
        quote_ident(table)
    ))
}

/// Raw rows with `start <= Time <= end`, newest first.
pub fn time_series(
    table: &str,
    field: &str,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
) -> Statement {
    let t = time_col();
    Statement::new(
        format!(
            "SELECT {t}, {} FROM {} WHERE {t} BETWEEN $1 AND $2 ORDER BY {t} DESC",
            quote_ident(field),
            quote_ident(table)
        ),
        vec![ts(start), ts(end)],
    )
}

/// Fixed-width bucket aggregate of `field` over `start <= Time <= end`, newest
/// bucket first.
pub fn downsampled(
    table: &str,
    field: &str,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    bucket_secs: u64,
) -> DbResult<Statement> {
    check_bucket(bucket_secs)?;
    let (t, f, b) = (time_col(), quote_ident(field), quote_ident(BUCKET_COLUMN));
    Ok(Statement::new(
        format!(
            "SELECT time_bucket('{bucket_secs} seconds', {t}) AS {b}, {} AS {f} FROM {} \
             WHERE {t} BETWEEN $1 AND $2 GROUP BY {b} ORDER BY {b} DESC",
            Aggregate::Avg.apply(&f),
            quote_ident(table)
        ),
        vec![ts(start), ts(end)],
    ))
}

/// As [`downsampled`], with empty buckets carrying the last observed average.
pub fn interpolated(
    table: &str,
    field: &str,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    bucket_secs: u64,
) -> DbResult<Statement> {
    check_bucket(bucket_secs)?;
    let (t, f, b) = (time_col(), quote_ident(field), quote_ident(BUCKET_COLUMN));
    Ok(Statement::new(
        format!(
            "SELECT time_bucket_gapfill('{bucket_secs} seconds', {t}, $1, $2) AS {b}, \
             locf({}) AS {f} FROM {} \
             WHERE {t} BETWEEN $1 AND $2 GROUP BY {b} ORDER BY {b} DESC",
            Aggregate::Avg.apply(&f),
            quote_ident(table)
        ),
        vec![ts(start), ts(end)],
    ))
}

/// Single-field range read shaped by `where_kind`, nulls excluded.
///
/// `TimeGreater` and `TimeLess` compare against `start` only.
pub fn historian(
    table: &str,
    field: &str,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    descending: bool,
    where_kind: HistoricWhere,
    limit: Option<u64>,
) -> Statement {
    let (t, f) = (time_col(), quote_ident(field));
    let (predicate, params) = match where_kind {
        HistoricWhere::TimeGreater => (format!("{t} > $1"), vec![ts(start)]),
        HistoricWhere::TimeLess => (format!("{t} < $1"), vec![ts(start)]),
        HistoricWhere::TimeSlot => (format!("{t} > $1 AND {t} < $2"), vec![ts(start), ts(end)]),
        HistoricWhere::TimeSlotEqStart => {
            (format!("{t} >= $1 AND {t} < $2"), vec![ts(start), ts(end)])
        }
        HistoricWhere::TimeSlotEqEnd => {
            (format!("{t} > $1 AND {t} <= $2"), vec![ts(start), ts(end)])
        }
    };
    Statement::new(
        format!(
            "SELECT {t}, {f} FROM {} WHERE {predicate} AND {f} IS NOT NULL ORDER BY {t} {}{}",
            quote_ident(table),
            order(descending),
            limit_clause(limit)
        ),
        params,
    )
}

/// Bucketed aggregate of `field` over `start <= Time < end`.
#[allow(clippy::too_many_arguments)]
pub fn historian_aggregate(
    aggregate: Aggregate,
    table: &str,
    field: &str,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    descending: bool,
    limit: Option<u64>,
    interval_secs: u64,
) -> DbResult<Statement> {
    check_bucket(interval_secs)?;
    let (t, f, b) = (time_col(), quote_ident(field), quote_ident(BUCKET_COLUMN));
    Ok(Statement::new(
        format!(
            "SELECT time_bucket('{interval_secs} seconds', {t}) AS {b}, {} AS {f} FROM {} \
             WHERE {t} >= $1 AND {t} < $2 GROUP BY {b} ORDER BY {b} {}{}",
            aggregate.apply(&f),
            quote_ident(table),
            order(descending),
            limit_clause(limit)
        ),
        vec![ts(start), ts(end)],
    ))
}

impl Driver {
    async fn per_field<S: AsRef<str>>(
        &self,
        table: &str,
        fields: &[S],
        build: impl Fn(&str) -> DbResult<Statement>,
    ) -> DbResult<Vec<Rows>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let batch = fields
            .iter()
            .map(|f| build(f.as_ref()))
            .collect::<DbResult<Batch>>()?;
        let mut results = self.batch_query(&batch).await?;
        for rows in &mut results {
            rows.table_name = table.to_string();
        }
        Ok(results)
    }

    /// Latest non-null sample of each field.
    pub async fn get_latest_value<S: AsRef<str>>(
        &self,
        fields: &[S],
        table: &str,
    ) -> DbResult<Vec<Rows>> {
        self.per_field(table, fields, |f| Ok(latest_value(table, f))).await
    }

    pub async fn get_time_series_values<S: AsRef<str>>(
        &self,
        fields: &[S],
        table: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> DbResult<Vec<Rows>> {
        self.per_field(table, fields, |f| Ok(time_series(table, f, start, end))).await
    }

    /// Per-field averages in buckets of `bucket_secs`.
    pub async fn get_down_sampled_values<S: AsRef<str>>(
        &self,
        fields: &[S],
        table: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        bucket_secs: u64,
    ) -> DbResult<Vec<Rows>> {
        self.per_field(table, fields, |f| downsampled(table, f, start, end, bucket_secs))
            .await
    }

    /// Per-field bucket averages with gaps filled by the previous bucket.
    pub async fn get_interpolated_values<S: AsRef<str>>(
        &self,
        fields: &[S],
        table: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        bucket_secs: u64,
    ) -> DbResult<Vec<Rows>> {
        self.per_field(table, fields, |f| interpolated(table, f, start, end, bucket_secs))
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn get_historian_time_series_values(
        &self,
        field: &str,
        table: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        descending: bool,
        where_kind: HistoricWhere,
        limit: Option<u64>,
    ) -> DbResult<Rows> {
        let stmt = historian(table, field, start, end, descending, where_kind, limit);
        let mut rows = self.query(&stmt.sql, &stmt.params).await?;
        rows.table_name = table.to_string();
        Ok(rows)
    }

    /// Per-field bucketed aggregate over `[start, end)`.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_historian_aggregate<S: AsRef<str>>(
        &self,
        aggregate: Aggregate,
        fields: &[S],
        table: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        descending: bool,
        limit: Option<u64>,
        interval_secs: u64,
    ) -> DbResult<Vec<Rows>> {
        check_bucket(interval_secs)?;
        self.per_field(table, fields, |f| {
            historian_aggregate(aggregate, table, f, start, end, descending, limit, interval_secs)
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn get_historian_aggr_max<S: AsRef<str>>(
        &self,
        fields: &[S],
        table: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        descending: bool,
        limit: Option<u64>,
        interval_secs: u64,
    ) -> DbResult<Vec<Rows>> {
        self.get_historian_aggregate(
            Aggregate::Max,
            fields,
            table,
            start,
            end,
            descending,
            limit,
            interval_secs,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn get_historian_aggr_min<S: AsRef<str>>(
        &self,
        fields: &[S],
        table: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        descending: bool,
        limit: Option<u64>,
        interval_secs: u64,
    ) -> DbResult<Vec<Rows>> {
        self.get_historian_aggregate(
            Aggregate::Min,
            fields,
            table,
            start,
            end,
            descending,
            limit,
            interval_secs,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn get_historian_aggr_count<S: AsRef<str>>(
        &self,
        fields: &[S],
        table: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        descending: bool,
        limit: Option<u64>,
        interval_secs: u64,
    ) -> DbResult<Vec<Rows>> {
        self.get_historian_aggregate(
            Aggregate::Count,
            fields,
            table,
            start,
            end,
            descending,
            limit,
            interval_secs,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn get_historian_aggr_avg<S: AsRef<str>>(
        &self,
        fields: &[S],
        table: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        descending: bool,
        limit: Option<u64>,
        interval_secs: u64,
    ) -> DbResult<Vec<Rows>> {
        self.get_historian_aggregate(
            Aggregate::Avg,
            fields,
            table,
            start,
            end,
            descending,
            limit,
            interval_secs,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn t30() -> DateTime<Utc> {
        t0() + chrono::Duration::seconds(30)
    }

    #[test]
    fn test_latest_value() {
        assert_eq!(
            latest_value("readings", "temp").sql,
            "SELECT \"Time\", \"temp\" FROM \"readings\" \
             WHERE \"temp\" IS NOT NULL ORDER BY \"Time\" DESC LIMIT 1"
        );
    }

    #[test]
    fn test_time_series_binds_utc() {
        let stmt = time_series("readings", "temp", &t0(), &t30());
        assert_eq!(
            stmt.sql,
            "SELECT \"Time\", \"temp\" FROM \"readings\" \
             WHERE \"Time\" BETWEEN $1 AND $2 ORDER BY \"Time\" DESC"
        );
        assert_eq!(stmt.params, vec![ts(&t0()), ts(&t30())]);
    }

    #[test]
    fn test_downsampled_is_deterministic() {
        let a = downsampled("readings", "temp", &t0(), &t30(), 10).unwrap();
        let b = downsampled("readings", "temp", &t0(), &t30(), 10).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.sql,
            "SELECT time_bucket('10 seconds', \"Time\") AS \"dateTime\", \
             avg(\"temp\")::double precision AS \"temp\" \
             FROM \"readings\" WHERE \"Time\" BETWEEN $1 AND $2 \
             GROUP BY \"dateTime\" ORDER BY \"dateTime\" DESC"
        );
    }

    #[test]
    fn test_interpolated_uses_gapfill() {
        let stmt = interpolated("readings", "temp", &t0(), &t30(), 10).unwrap();
        assert!(stmt.sql.starts_with(
            "SELECT time_bucket_gapfill('10 seconds', \"Time\", $1, $2) AS \"dateTime\", \
             locf(avg(\"temp\")::double precision) AS \"temp\""
        ));
    }

    #[test]
    fn test_zero_bucket_rejected() {
        assert!(matches!(
            downsampled("readings", "temp", &t0(), &t30(), 0),
            Err(DbError::InvalidInput(_))
        ));
        assert!(
            historian_aggregate(Aggregate::Max, "readings", "temp", &t0(), &t30(), true, None, 0)
                .is_err()
        );
    }

    #[test]
    fn test_historian_shapes() {
        let cases = [
            (HistoricWhere::TimeGreater, "\"Time\" > $1", 1),
            (HistoricWhere::TimeLess, "\"Time\" < $1", 1),
            (HistoricWhere::TimeSlot, "\"Time\" > $1 AND \"Time\" < $2", 2),
            (HistoricWhere::TimeSlotEqStart, "\"Time\" >= $1 AND \"Time\" < $2", 2),
            (HistoricWhere::TimeSlotEqEnd, "\"Time\" > $1 AND \"Time\" <= $2", 2),
        ];
        for (kind, predicate, params) in cases {
            let stmt = historian("readings", "temp", &t0(), &t30(), false, kind, None);
            assert_eq!(
                stmt.sql,
                format!(
                    "SELECT \"Time\", \"temp\" FROM \"readings\" \
                     WHERE {} AND \"temp\" IS NOT NULL ORDER BY \"Time\" ASC",
                    predicate
                )
            );
            assert_eq!(stmt.params.len(), params);
        }
    }

    #[test]
    fn test_historian_limit() {
        let stmt = historian(
            "readings",
            "temp",
            &t0(),
            &t30(),
            true,
            HistoricWhere::TimeSlot,
            Some(50),
        );
        assert!(stmt.sql.ends_with("ORDER BY \"Time\" DESC LIMIT 50"));
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let stmt = historian(
            "readings",
            "temp",
            &t0(),
            &t30(),
            true,
            HistoricWhere::TimeSlot,
            Some(0),
        );
        assert!(stmt.sql.ends_with("ORDER BY \"Time\" DESC"));
        let stmt = historian_aggregate(
            Aggregate::Max,
            "readings",
            "temp",
            &t0(),
            &t30(),
            false,
            Some(0),
            60,
        )
        .unwrap();
        assert!(!stmt.sql.contains("LIMIT"));
    }

    #[test]
    fn test_historian_aggregate() {
        let stmt = historian_aggregate(
            Aggregate::Count,
            "readings",
            "temp",
            &t0(),
            &t30(),
            false,
            Some(5),
            60,
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT time_bucket('60 seconds', \"Time\") AS \"dateTime\", \
             count(\"temp\") AS \"temp\" \
             FROM \"readings\" WHERE \"Time\" >= $1 AND \"Time\" < $2 \
             GROUP BY \"dateTime\" ORDER BY \"dateTime\" ASC LIMIT 5"
        );
    }
}
