//! Locale-aware date normalization.

use chrono::NaiveDate;
use regex::Regex;

use super::patterns::{
    DATE_DOTTED, DATE_EN_DAY_FIRST, DATE_EN_MONTH_FIRST, DATE_ISO, DATE_PL_LONG, DATE_RU_LONG, DATE_SLASHED,
};
use crate::error::NormalizationError;
use crate::models::schema::Language;

/// Capture layout of a date pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    YearMonthDay,
    DayMonthYear,
    DayMonthNameYear,
    MonthNameDayYear,
}

struct DatePattern {
    regex: &'static Regex,
    layout: Layout,
}

/// Patterns applicable to the configured languages, ISO first.
fn patterns_for(languages: &[Language]) -> Vec<DatePattern> {
    let mut patterns = vec![DatePattern {
        regex: &DATE_ISO,
        layout: Layout::YearMonthDay,
    }];
    let mut push = |regex: &'static Regex, layout: Layout| {
        if !patterns.iter().any(|p| std::ptr::eq(p.regex, regex)) {
            patterns.push(DatePattern { regex, layout });
        }
    };

    for language in languages {
        match language {
            Language::Ru => {
                push(&DATE_DOTTED, Layout::DayMonthYear);
                push(&DATE_RU_LONG, Layout::DayMonthNameYear);
            }
            Language::Pl => {
                push(&DATE_DOTTED, Layout::DayMonthYear);
                push(&DATE_PL_LONG, Layout::DayMonthNameYear);
            }
            Language::De => push(&DATE_DOTTED, Layout::DayMonthYear),
            Language::En => {
                push(&DATE_SLASHED, Layout::DayMonthYear);
                push(&DATE_EN_DAY_FIRST, Layout::DayMonthNameYear);
                push(&DATE_EN_MONTH_FIRST, Layout::MonthNameDayYear);
            }
        }
    }
    patterns
}

/// Parse the first valid date under the patterns of `languages`.
pub fn parse_date(text: &str, languages: &[Language]) -> Result<NaiveDate, NormalizationError> {
    for pattern in patterns_for(languages) {
        for caps in pattern.regex.captures_iter(text) {
            let (year, month, day) = match pattern.layout {
                Layout::YearMonthDay => (parse_year(&caps[1]), number(&caps[2]), number(&caps[3])),
                Layout::DayMonthYear => (parse_year(&caps[3]), number(&caps[2]), number(&caps[1])),
                Layout::DayMonthNameYear => (parse_year(&caps[3]), month_number(&caps[2]), number(&caps[1])),
                Layout::MonthNameDayYear => (parse_year(&caps[3]), month_number(&caps[1]), number(&caps[2])),
            };

            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return Ok(date);
            }
        }
    }

    Err(NormalizationError::NoDatePattern(text.to_string()))
}

fn number(s: &str) -> u32 {
    s.parse().unwrap_or(0)
}

fn parse_year(s: &str) -> i32 {
    let year: i32 = s.parse().unwrap_or(0);
    if s.len() == 2 {
        // Two-digit year: 00-50 → 2000s, 51-99 → 1900s
        if year <= 50 { 2000 + year } else { 1900 + year }
    } else {
        year
    }
}

fn month_number(month: &str) -> u32 {
    let month = month.to_lowercase();
    match month.as_str() {
        "января" | "stycznia" => 1,
        "февраля" | "lutego" => 2,
        "марта" | "marca" => 3,
        "апреля" | "kwietnia" => 4,
        "мая" | "maja" => 5,
        "июня" | "czerwca" => 6,
        "июля" | "lipca" => 7,
        "августа" | "sierpnia" => 8,
        "сентября" | "września" => 9,
        "октября" | "października" => 10,
        "ноября" | "listopada" => 11,
        "декабря" | "grudnia" => 12,
        english => match english.get(..3) {
            Some("jan") => 1,
            Some("feb") => 2,
            Some("mar") => 3,
            Some("apr") => 4,
            Some("may") => 5,
            Some("jun") => 6,
            Some("jul") => 7,
            Some("aug") => 8,
            Some("sep") => 9,
            Some("oct") => 10,
            Some("nov") => 11,
            Some("dec") => 12,
            _ => 0,
        },
    }
}
