//! Interval shorthand parser using nom.
//!
//! Accepts one or more `<amount><unit>` terms, e.g. `10s`, `5m`, `24h`, `7d`,
//! `1w` or `1h30m`. Units are case-insensitive.

use std::time::Duration;

use nom::{
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{digit1, multispace0},
    combinator::{all_consuming, map_res, value},
    multi::many1,
    sequence::{delimited, pair},
    IResult,
};

use crate::error::{DbError, DbResult};

const SECOND: u64 = 1;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

/// Seconds per unit suffix.
fn unit(input: &str) -> IResult<&str, u64> {
    alt((
        value(SECOND, tag_no_case("s")),
        value(MINUTE, tag_no_case("m")),
        value(HOUR, tag_no_case("h")),
        value(DAY, tag_no_case("d")),
        value(WEEK, tag_no_case("w")),
    ))(input)
}

fn amount(input: &str) -> IResult<&str, u64> {
    map_res(digit1, str::parse::<u64>)(input)
}

/// One `<amount><unit>` term, in seconds.
fn term(input: &str) -> IResult<&str, Option<u64>> {
    let (input, (n, per)) = pair(amount, unit)(input)?;
    Ok((input, n.checked_mul(per)))
}

fn terms(input: &str) -> IResult<&str, Vec<Option<u64>>> {
    all_consuming(delimited(multispace0, many1(term), multispace0))(input)
}

/// Parse interval shorthand into a duration.
pub fn parse_duration(input: &str) -> DbResult<Duration> {
    let (_, parts) = terms(input).map_err(|_| {
        DbError::invalid(format!("invalid interval '{}': expected e.g. 10s, 5m, 24h, 7d", input))
    })?;
    let total = parts
        .into_iter()
        .try_fold(0u64, |acc, secs| secs.and_then(|s| acc.checked_add(s)))
        .ok_or_else(|| DbError::invalid(format!("interval '{}' is too large", input)))?;
    if total == 0 {
        return Err(DbError::invalid(format!("interval '{}' is empty", input)));
    }
    Ok(Duration::from_secs(total))
}

/// Parse interval shorthand that must be a whole number of days.
pub fn parse_days(input: &str) -> DbResult<u32> {
    let secs = parse_duration(input)?.as_secs();
    if secs % DAY != 0 {
        return Err(DbError::invalid(format!(
            "interval '{}' is not a whole number of days",
            input
        )));
    }
    u32::try_from(secs / DAY)
        .map_err(|_| DbError::invalid(format!("interval '{}' is too large", input)))
}
