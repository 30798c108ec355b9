//! Natural-language time expression parsing
//!
//! Turns phrases like "last week" or "yesterday afternoon" into half-open
//! `[start, end)` epoch-second ranges, computed against `now()` in local
//! time. Pure and synchronous — no I/O, no suspension points.

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime, TimeZone};
use regex::Regex;
use std::sync::LazyLock;

/// A half-open time range in epoch seconds, plus the query text with the
/// recognised time expression removed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTimeExpression {
    /// Start of the range (inclusive), if one was recognised.
    pub start: Option<f64>,
    /// End of the range (exclusive), if one was recognised.
    pub end: Option<f64>,
    /// `query` with the recognised time tokens stripped, trimmed of
    /// whitespace. Equal to the original query when nothing was recognised.
    pub cleaned_query: String,
}

impl ParsedTimeExpression {
    fn none(query: &str) -> Self {
        Self {
            start: None,
            end: None,
            cleaned_query: query.trim().to_string(),
        }
    }

    fn range(start: DateTime<Local>, end: DateTime<Local>, cleaned_query: String) -> Self {
        Self {
            start: Some(start.timestamp() as f64),
            end: Some(end.timestamp() as f64),
            cleaned_query,
        }
    }
}

/// Parse a natural-language time expression out of `query`.
///
/// Returns `(start, end, cleaned_query)` as described in spec.md §4.1.
/// When nothing is recognised all three fields indicate "no time filter":
/// `start` and `end` are `None` and `cleaned_query` equals the trimmed
/// input.
pub fn parse_time_expression(query: &str) -> (Option<f64>, Option<f64>, String) {
    let parsed = parse(query, Local::now());
    (parsed.start, parsed.end, parsed.cleaned_query)
}

fn parse(query: &str, now: DateTime<Local>) -> ParsedTimeExpression {
    let lower = query.to_lowercase();

    if let Some(p) = try_part_of_day_with_day(&lower, query, now) {
        return p;
    }
    if let Some(p) = try_single_word(&lower, query, now) {
        return p;
    }
    if let Some(p) = try_relative_window(&lower, query, now) {
        return p;
    }
    if let Some(p) = try_n_units_ago(&lower, query, now) {
        return p;
    }
    if let Some(p) = try_season(&lower, query, now) {
        return p;
    }
    if let Some(p) = try_holiday(&lower, query, now) {
        return p;
    }
    if let Some(p) = try_part_of_day_today(&lower, query, now) {
        return p;
    }

    ParsedTimeExpression::none(query)
}

/// Midnight at the start of `date`, in local time.
fn midnight(date: NaiveDate) -> DateTime<Local> {
    Local
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .single()
        .expect("local midnight is unambiguous for all but DST-transition dates")
}

fn remove_token(query: &str, token: &str) -> String {
    let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(token))).expect("valid regex");
    re.replace_all(query, "").trim().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn try_single_word(lower: &str, original: &str, now: DateTime<Local>) -> Option<ParsedTimeExpression> {
    let today = now.date_naive();

    if has_word(lower, "today") {
        return Some(ParsedTimeExpression::range(midnight(today), now, remove_token(original, "today")));
    }
    if has_word(lower, "yesterday") {
        let y = today - Duration::days(1);
        return Some(ParsedTimeExpression::range(midnight(y), midnight(today), remove_token(original, "yesterday")));
    }
    if has_word(lower, "tomorrow") {
        let t = today + Duration::days(1);
        let after = t + Duration::days(1);
        return Some(ParsedTimeExpression::range(midnight(t), midnight(after), remove_token(original, "tomorrow")));
    }
    None
}

fn has_word(haystack: &str, word: &str) -> bool {
    haystack.split(|c: char| !c.is_alphanumeric()).any(|w| w == word)
}

fn try_relative_window(lower: &str, original: &str, now: DateTime<Local>) -> Option<ParsedTimeExpression> {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\b(last|past|this)\s+(week|month|year)\b").expect("valid regex")
    });

    let caps = RE.captures(lower)?;
    let qualifier = &caps[1];
    let unit = &caps[2];
    let matched = caps.get(0).unwrap().as_str();

    let today = now.date_naive();
    let (start, end) = match (qualifier, unit) {
        ("this", "week") => {
            let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            (midnight(monday), now)
        }
        ("this", "month") => {
            let first = today.with_day(1).expect("day 1 always valid");
            (midnight(first), now)
        }
        ("this", "year") => {
            let jan1 = NaiveDate::from_ymd_opt(today.year(), 1, 1).expect("valid date");
            (midnight(jan1), now)
        }
        (_, "week") => {
            let this_monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            let last_monday = this_monday - Duration::days(7);
            (midnight(last_monday), midnight(this_monday))
        }
        (_, "month") => {
            let this_first = today.with_day(1).expect("day 1 always valid");
            let last_first = prev_month(this_first);
            (midnight(last_first), midnight(this_first))
        }
        (_, "year") => {
            let this_jan1 = NaiveDate::from_ymd_opt(today.year(), 1, 1).expect("valid date");
            let last_jan1 = NaiveDate::from_ymd_opt(today.year() - 1, 1, 1).expect("valid date");
            (midnight(last_jan1), midnight(this_jan1))
        }
        _ => return None,
    };

    Some(ParsedTimeExpression::range(start, end, remove_token(original, matched)))
}

fn prev_month(first_of_month: NaiveDate) -> NaiveDate {
    if first_of_month.month() == 1 {
        NaiveDate::from_ymd_opt(first_of_month.year() - 1, 12, 1).expect("valid date")
    } else {
        NaiveDate::from_ymd_opt(first_of_month.year(), first_of_month.month() - 1, 1).expect("valid date")
    }
}

const WORD_NUMBERS: &[(&str, i64)] = &[
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
];

fn word_to_number(word: &str) -> Option<i64> {
    if let Ok(n) = word.parse::<i64>() {
        return Some(n);
    }
    WORD_NUMBERS.iter().find(|(w, _)| *w == word).map(|(_, n)| *n)
}

fn try_n_units_ago(lower: &str, original: &str, now: DateTime<Local>) -> Option<ParsedTimeExpression> {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\b(\d+|one|two|three|four|five|six|seven|eight|nine|ten)\s+(minute|hour|day|week|month|year)s?\s+ago\b")
            .expect("valid regex")
    });

    let caps = RE.captures(lower)?;
    let n = word_to_number(&caps[1])?;
    let unit = &caps[2];
    let matched = caps.get(0).unwrap().as_str();

    let target = match unit {
        "minute" => now - Duration::minutes(n),
        "hour" => now - Duration::hours(n),
        "day" => now - Duration::days(n),
        "week" => now - Duration::weeks(n),
        "month" => now - approx_months(n),
        "year" => now - approx_months(n * 12),
        _ => return None,
    };

    // "N units ago" denotes the day containing that instant, as a full-day window.
    let day = target.date_naive();
    Some(ParsedTimeExpression::range(midnight(day), midnight(day + Duration::days(1)), remove_token(original, matched)))
}

fn approx_months(n: i64) -> Duration {
    Duration::days(n * 30)
}

fn try_season(lower: &str, original: &str, now: DateTime<Local>) -> Option<ParsedTimeExpression> {
    let year = now.year();
    let (name, (start_md, end_md)): (&str, ((u32, u32), (u32, u32))) = if has_word(lower, "spring") {
        ("spring", ((3, 1), (6, 1)))
    } else if has_word(lower, "summer") {
        ("summer", ((6, 1), (9, 1)))
    } else if has_word(lower, "autumn") || has_word(lower, "fall") {
        ("autumn", ((9, 1), (12, 1)))
    } else if has_word(lower, "winter") {
        ("winter", ((12, 1), (3, 1)))
    } else {
        return None;
    };

    let start_date = NaiveDate::from_ymd_opt(year, start_md.0, start_md.1).expect("valid date");
    // Winter spans the year boundary; if `now` is before winter's start this
    // calendar year, use the most recent occurrence (started last December).
    let (start_date, end_year) = if name == "winter" && now.month() < 12 {
        (
            NaiveDate::from_ymd_opt(year - 1, 12, 1).expect("valid date"),
            year,
        )
    } else {
        (start_date, year)
    };
    let end_date = NaiveDate::from_ymd_opt(end_year, end_md.0, end_md.1).expect("valid date");

    let token = if name == "autumn" && has_word(lower, "fall") { "fall" } else { name };
    Some(ParsedTimeExpression::range(midnight(start_date), midnight(end_date), remove_token(original, token)))
}

fn try_holiday(lower: &str, original: &str, now: DateTime<Local>) -> Option<ParsedTimeExpression> {
    let year = now.year();

    let (token, month, day) = if lower.contains("christmas") {
        ("christmas", 12, 25)
    } else if lower.contains("thanksgiving") {
        // US Thanksgiving: fourth Thursday of November.
        let (m, d) = fourth_thursday_of_november(year);
        ("thanksgiving", m, d)
    } else if lower.contains("new year") {
        ("new year", 1, 1)
    } else {
        return None;
    };

    let mut date = NaiveDate::from_ymd_opt(year, month, day).expect("valid date");
    if date > now.date_naive() {
        // Most recent occurrence, not the upcoming one.
        date = if month == 11 {
            let (m, d) = fourth_thursday_of_november(year - 1);
            NaiveDate::from_ymd_opt(year - 1, m, d).expect("valid date")
        } else {
            NaiveDate::from_ymd_opt(year - 1, month, day).expect("valid date")
        };
    }

    Some(ParsedTimeExpression::range(midnight(date), midnight(date + Duration::days(1)), remove_token(original, token)))
}

fn fourth_thursday_of_november(year: i32) -> (u32, u32) {
    let first = NaiveDate::from_ymd_opt(year, 11, 1).expect("valid date");
    let first_thursday_offset = (3 + 7 - first.weekday().num_days_from_monday() as i64) % 7;
    let fourth_thursday = first + Duration::days(first_thursday_offset + 21);
    (11, fourth_thursday.day())
}

/// `<part-of-day>` combined with `yesterday`/`today`/`tomorrow`, e.g.
/// "yesterday afternoon" → prior day's 12:00-18:00.
fn try_part_of_day_with_day(lower: &str, original: &str, now: DateTime<Local>) -> Option<ParsedTimeExpression> {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\b(today|yesterday|tomorrow)\s+(morning|afternoon|evening|night)\b")
            .expect("valid regex")
    });

    let caps = RE.captures(lower)?;
    let day_word = &caps[1];
    let part = &caps[2];
    let matched = caps.get(0).unwrap().as_str();

    let today = now.date_naive();
    let date = match day_word {
        "yesterday" => today - Duration::days(1),
        "tomorrow" => today + Duration::days(1),
        _ => today,
    };

    let (start_hour, end_hour) = part_of_day_hours(part);
    let start = midnight(date) + Duration::hours(start_hour);
    let end = midnight(date) + Duration::hours(end_hour);

    Some(ParsedTimeExpression::range(start, end, remove_token(original, matched)))
}

/// A bare part-of-day with no day qualifier defaults to today.
fn try_part_of_day_today(lower: &str, original: &str, now: DateTime<Local>) -> Option<ParsedTimeExpression> {
    let part = ["morning", "afternoon", "evening", "night"]
        .into_iter()
        .find(|p| has_word(lower, p))?;

    let today = now.date_naive();
    let (start_hour, end_hour) = part_of_day_hours(part);
    let start = midnight(today) + Duration::hours(start_hour);
    let end = midnight(today) + Duration::hours(end_hour);

    Some(ParsedTimeExpression::range(start, end, remove_token(original, part)))
}

fn part_of_day_hours(part: &str) -> (i64, i64) {
    match part {
        "morning" => (6, 12),
        "afternoon" => (12, 18),
        "evening" => (18, 22),
        "night" => (22, 24),
        _ => unreachable!("caller only passes recognised parts-of-day"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Local> {
        // A Wednesday.
        Local.with_ymd_and_hms(2026, 7, 15, 14, 30, 0).unwrap()
    }

    #[test]
    fn today_spans_midnight_to_now() {
        let p = parse("today", fixed_now());
        assert!(p.start.is_some());
        assert_eq!(p.end, Some(fixed_now().timestamp() as f64));
    }

    #[test]
    fn yesterday_spans_full_prior_day() {
        let p = parse("yesterday", fixed_now());
        let start = p.start.unwrap();
        let end = p.end.unwrap();
        assert_eq!(end - start, 86400.0);
    }

    #[test]
    fn yesterday_afternoon_is_a_six_hour_window() {
        let p = parse("yesterday afternoon", fixed_now());
        let start = p.start.unwrap();
        let end = p.end.unwrap();
        assert_eq!(end - start, 6.0 * 3600.0);
    }

    #[test]
    fn no_expression_returns_none_and_original_query() {
        let p = parse("databases and caching", fixed_now());
        assert!(p.start.is_none());
        assert!(p.end.is_none());
        assert_eq!(p.cleaned_query, "databases and caching");
    }

    #[test]
    fn last_week_cleans_the_query() {
        let p = parse("memories about databases from last week", fixed_now());
        assert!(p.start.is_some());
        assert!(p.end.is_some());
        assert_eq!(p.cleaned_query, "memories about databases from");
    }

    #[test]
    fn n_units_ago_recognised() {
        let p = parse("three days ago", fixed_now());
        assert!(p.start.is_some());
        let p2 = parse("2 hours ago", fixed_now());
        assert!(p2.start.is_some());
    }
}
