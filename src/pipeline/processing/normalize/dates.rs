//! Date clean-up: Japanese era dates and six-digit short dates to `YYYYMMDD`,
//! plus the month key used when aligning registry and utility records.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use super::kana::fullwidth_digits_to_halfwidth;

static ERA_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(令和|平成|昭和|大正|明治)(元|\d+)年(\d{1,2})月(\d{1,2})日")
        .expect("era date pattern")
});
static SHORT_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{6}$").expect("short date pattern"));

/// Formats tried, in order, when reading a start date
pub const START_DATE_FORMATS: [&str; 5] = ["%Y/%m/%d", "%d/%m/%Y", "%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"];

fn era_base_year(era: &str) -> Option<i32> {
    match era {
        "令和" => Some(2019),
        "平成" => Some(1989),
        "昭和" => Some(1926),
        "大正" => Some(1912),
        "明治" => Some(1868),
        _ => None,
    }
}

/// `令和2年4月1日` -> `20200401`; `None` when the value is not an era date.
pub fn era_to_gregorian(value: &str) -> Option<String> {
    let value = fullwidth_digits_to_halfwidth(value);
    let caps = ERA_DATE.captures(&value)?;
    let base = era_base_year(&caps[1])?;
    let year: i32 = match &caps[2] {
        "元" => 1,
        digits => digits.parse().ok()?,
    };
    let month: u32 = caps[3].parse().ok()?;
    let day: u32 = caps[4].parse().ok()?;
    Some(format!("{:04}{:02}{:02}", base + year - 1, month, day))
}

/// `130320` -> `20130320`, `850320` -> `19850320`.
pub fn expand_short_date(value: &str) -> Option<String> {
    if !SHORT_DATE.is_match(value) {
        return None;
    }
    let yy: u32 = value[..2].parse().ok()?;
    let century = if yy < 50 { "20" } else { "19" };
    Some(format!("{}{}", century, value))
}

/// Era conversion followed by short-date expansion; other values pass through.
pub fn to_gregorian_date(value: &str) -> String {
    let value = era_to_gregorian(value).unwrap_or_else(|| value.to_string());
    expand_short_date(&value).unwrap_or(value)
}

pub fn parse_start_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    START_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// `YYYY-MM` of a start date, if it parses.
pub fn start_month(value: &str) -> Option<String> {
    parse_start_date(value).map(|d| format!("{:04}-{:02}", d.year(), d.month()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_era_dates() {
        assert_eq!(era_to_gregorian("平成25年03月20日").as_deref(), Some("20130320"));
        assert_eq!(era_to_gregorian("令和元年5月1日").as_deref(), Some("20190501"));
        assert_eq!(era_to_gregorian("昭和６４年１月７日").as_deref(), Some("19890107"));
        assert_eq!(era_to_gregorian("2013/03/20"), None);
    }

    #[test]
    fn test_short_dates() {
        assert_eq!(expand_short_date("130320").as_deref(), Some("20130320"));
        assert_eq!(expand_short_date("850320").as_deref(), Some("19850320"));
        assert_eq!(expand_short_date("20130320"), None);
    }

    #[test]
    fn test_to_gregorian_passes_other_values_through() {
        assert_eq!(to_gregorian_date("平成2年1月3日"), "19900103");
        assert_eq!(to_gregorian_date("2010/01/01"), "2010/01/01");
        assert_eq!(to_gregorian_date(""), "");
    }

    #[test]
    fn test_start_month_formats() {
        assert_eq!(start_month("2020/04/01").as_deref(), Some("2020-04"));
        assert_eq!(start_month("2020-04-15").as_deref(), Some("2020-04"));
        assert_eq!(start_month("20200415").as_deref(), Some("2020-04"));
        assert_eq!(start_month("not a date"), None);
        assert_eq!(start_month(""), None);
    }
}
