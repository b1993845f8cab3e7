//! Review date parsing
//!
//! Review cards show dates the way people say them in Ukrainian: "сьогодні",
//! "вчора", "3 дні тому", "тиждень тому", or "12 березня [2023]".

use chrono::{Datelike, Duration, NaiveDate};

const MONTHS: [&str; 12] = [
    "січня",
    "лютого",
    "березня",
    "квітня",
    "травня",
    "червня",
    "липня",
    "серпня",
    "вересня",
    "жовтня",
    "листопада",
    "грудня",
];

/// Resolves a card date relative to `today`
///
/// Returns `None` for text that matches no known form. A day past the end of
/// the month (the listing really shows "31 червня") is walked back until it
/// is valid.
pub fn parse_review_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = text.trim();

    if text.contains("сьогодні") {
        return Some(today);
    }
    if text.contains("вчора") {
        return today.pred_opt();
    }
    if let Some(days) = days_ago(text) {
        // Counts come from page text and may be arbitrarily large
        return Duration::try_days(days).and_then(|ago| today.checked_sub_signed(ago));
    }
    if text.contains("тиждень") {
        return today.checked_sub_signed(Duration::weeks(1));
    }

    absolute_date(text, today.year())
}

/// "N дні|днів|дня назад|тому"
fn days_ago(text: &str) -> Option<i64> {
    let mut words = text.split_whitespace();
    let count = words.next()?.parse::<i64>().ok()?;
    let unit = words.next()?;
    let suffix = words.next()?;

    let unit_ok = matches!(unit, "дні" | "днів" | "дня");
    let suffix_ok = matches!(suffix, "назад" | "тому");
    (unit_ok && suffix_ok).then_some(count)
}

/// "DD <month> [YYYY]"
fn absolute_date(text: &str, current_year: i32) -> Option<NaiveDate> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 2 {
        return None;
    }

    let day = words[0].parse::<u32>().ok().filter(|d| (1..=31).contains(d))?;
    let month = MONTHS.iter().position(|m| *m == words[1])? as u32 + 1;
    let year = match words.get(2) {
        Some(word) if word.len() == 4 => word.parse::<i32>().unwrap_or(current_year),
        _ => current_year,
    };

    let mut day = day;
    while day > 0 {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
        tracing::warn!(
            "Invalid day {} for month {} in {:?}, falling back to {}",
            day,
            month,
            text,
            day - 1
        );
        day -= 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_relative_words() {
        assert_eq!(parse_review_date("сьогодні", today()), date(2024, 3, 10));
        assert_eq!(parse_review_date("вчора", today()), date(2024, 3, 9));
        assert_eq!(parse_review_date("тиждень тому", today()), date(2024, 3, 3));
    }

    #[test]
    fn test_days_ago() {
        assert_eq!(parse_review_date("2 дні тому", today()), date(2024, 3, 8));
        assert_eq!(parse_review_date("5 днів назад", today()), date(2024, 3, 5));
        assert_eq!(parse_review_date("21 дня тому", today()), date(2024, 2, 18));
    }

    #[test]
    fn test_out_of_range_day_count_is_unparsed() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert_eq!(parse_review_date("100000000 днів тому", today), None);
        assert_eq!(
            parse_review_date("9223372036854775807 днів тому", today),
            None
        );
    }

    #[test]
    fn test_absolute_dates() {
        assert_eq!(parse_review_date("12 березня", today()), date(2024, 3, 12));
        assert_eq!(
            parse_review_date("1 грудня 2022", today()),
            date(2022, 12, 1)
        );
    }

    #[test]
    fn test_day_past_month_end_falls_back() {
        assert_eq!(
            parse_review_date("31 червня 2024", today()),
            date(2024, 6, 30)
        );
        assert_eq!(
            parse_review_date("30 лютого 2023", today()),
            date(2023, 2, 28)
        );
    }

    #[test]
    fn test_unrecognised_text() {
        assert_eq!(parse_review_date("", today()), None);
        assert_eq!(parse_review_date("колись", today()), None);
        assert_eq!(parse_review_date("12 March 2023", today()), None);
    }
}
