//! Regex patterns shared by the normalization rules.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    pub static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();

    // Dates
    pub static ref DATE_ISO: Regex = Regex::new(
        r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b"
    ).unwrap();

    pub static ref DATE_DOTTED: Regex = Regex::new(
        r"\b(\d{1,2})\.(\d{1,2})\.(\d{4}|\d{2})\b"
    ).unwrap();

    pub static ref DATE_SLASHED: Regex = Regex::new(
        r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b"
    ).unwrap();

    pub static ref DATE_EN_DAY_FIRST: Regex = Regex::new(
        r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?,?\s+(\d{4})\b"
    ).unwrap();

    pub static ref DATE_EN_MONTH_FIRST: Regex = Regex::new(
        r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b"
    ).unwrap();

    pub static ref DATE_RU_LONG: Regex = Regex::new(
        r"(?i)(\d{1,2})\s+(января|февраля|марта|апреля|мая|июня|июля|августа|сентября|октября|ноября|декабря)\s+(\d{4})"
    ).unwrap();

    pub static ref DATE_PL_LONG: Regex = Regex::new(
        r"(?i)(\d{1,2})\s+(stycznia|lutego|marca|kwietnia|maja|czerwca|lipca|sierpnia|września|października|listopada|grudnia)\s+(\d{4})"
    ).unwrap();

    // Amounts
    pub static ref CURRENCY: Regex = Regex::new(
        r"(?i)руб(?:лей|ля|ль)?\.?|₽|rub|pln|zł|usd|eur|\$|€"
    ).unwrap();

    pub static ref QUANTITY_UNIT: Regex = Regex::new(
        r"(?i)\s*(?:шт|pcs|szt|stk|kg|кг|ед)\.?\s*$"
    ).unwrap();

    // Items table cells: tabs, pipes or runs of two or more spaces
    pub static ref TABLE_CELL_SEPARATOR: Regex = Regex::new(
        r"\t|\||[ \u{00a0}]{2,}"
    ).unwrap();
}
