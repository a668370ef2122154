use chrono::{Datelike, NaiveDate};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Largest window `upcoming_birthdays` accepts, in days.
pub const MAX_LOOKAHEAD_DAYS: i64 = 365;

const WISHES: [&str; 5] = [
    "Hope your day is filled with joy and cake! 🎂",
    "Another year of awesome! Have a great day! 🎈",
    "Time to celebrate! Happy Birthday! 🎊",
    "Wishing you the happiest of birthdays! 🎁",
    "Have an amazing birthday celebration! 🎉",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BirthdayError {
    #[error("Invalid date format '{0}', use MM-DD (e.g. 12-25 for December 25th)")]
    Format(String),

    #[error("{month:02}-{day:02} is not a calendar date")]
    InvalidDate { month: u32, day: u32 },
}

/// A month and day, stored as `"MM-DD"`.
///
/// February 29th is accepted; in non-leap years it is celebrated on the 28th.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Birthday {
    month: u32,
    day: u32,
}

impl Birthday {
    pub fn new(month: u32, day: u32) -> Result<Self, BirthdayError> {
        // 2000 is a leap year, so this accepts exactly the dates that exist in some year
        NaiveDate::from_ymd_opt(2000, month, day)
            .map(|_| Self { month, day })
            .ok_or(BirthdayError::InvalidDate { month, day })
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    /// The day this birthday is celebrated in `year`.
    pub fn in_year(&self, year: i32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
            .or_else(|| NaiveDate::from_ymd_opt(year, self.month, self.day - 1))
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn falls_on(&self, date: NaiveDate) -> bool {
        self.in_year(date.year()) == date
    }

    /// Next celebration on or after `today`.
    pub fn next_occurrence(&self, today: NaiveDate) -> NaiveDate {
        let this_year = self.in_year(today.year());
        if this_year >= today {
            this_year
        } else {
            self.in_year(today.year() + 1)
        }
    }

    pub fn days_until(&self, today: NaiveDate) -> i64 {
        (self.next_occurrence(today) - today).num_days()
    }

    /// Long form, e.g. "December 25".
    pub fn long_form(&self) -> String {
        self.in_year(2000).format("%B %d").to_string()
    }
}

impl FromStr for Birthday {
    type Err = BirthdayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (month, day) = s
            .split_once('-')
            .ok_or_else(|| BirthdayError::Format(s.to_string()))?;

        let parse = |part: &str| -> Result<u32, BirthdayError> {
            if part.is_empty() || part.len() > 2 || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(BirthdayError::Format(s.to_string()));
            }
            part.parse().map_err(|_| BirthdayError::Format(s.to_string()))
        };

        Self::new(parse(month)?, parse(day)?)
    }
}

impl fmt::Display for Birthday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

impl TryFrom<String> for Birthday {
    type Error = BirthdayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Birthday> for String {
    fn from(birthday: Birthday) -> Self {
        birthday.to_string()
    }
}

/// One row of the `upcoming_birthdays` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcomingBirthday {
    pub user_id: u64,
    pub birthday: Birthday,
    pub date: NaiveDate,
    pub days_until: i64,
}

impl UpcomingBirthday {
    pub fn when(&self) -> String {
        match self.days_until {
            0 => "Today! 🎉".to_string(),
            1 => "Tomorrow! 🎈".to_string(),
            n => format!("In {} days", n),
        }
    }
}

/// Birthdays whose next celebration is within the next `days` days (today
/// counts as day 0), soonest first.
pub fn upcoming<I>(birthdays: I, today: NaiveDate, days: i64) -> Vec<UpcomingBirthday>
where
    I: IntoIterator<Item = (u64, Birthday)>,
{
    let mut upcoming: Vec<UpcomingBirthday> = birthdays
        .into_iter()
        .map(|(user_id, birthday)| UpcomingBirthday {
            user_id,
            birthday,
            date: birthday.next_occurrence(today),
            days_until: birthday.days_until(today),
        })
        .filter(|entry| entry.days_until < days)
        .collect();

    upcoming.sort_by_key(|entry| (entry.days_until, entry.user_id));
    upcoming
}

/// Validates the `upcoming_birthdays` window.
pub fn parse_lookahead(arg: Option<&str>) -> Option<i64> {
    let days = match arg {
        Some(arg) => arg.trim().parse::<i64>().ok()?,
        None => MAX_LOOKAHEAD_DAYS,
    };
    (1..=MAX_LOOKAHEAD_DAYS).contains(&days).then_some(days)
}

pub fn random_wish() -> &'static str {
    WISHES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(WISHES[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_valid_dates() {
        assert_eq!("12-25".parse::<Birthday>().unwrap(), Birthday::new(12, 25).unwrap());
        assert_eq!("1-5".parse::<Birthday>().unwrap().to_string(), "01-05");
        assert!("02-29".parse::<Birthday>().is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!("13-01".parse::<Birthday>(), Err(BirthdayError::InvalidDate { .. })));
        assert!(matches!("02-30".parse::<Birthday>(), Err(BirthdayError::InvalidDate { .. })));
        assert!(matches!("12/25".parse::<Birthday>(), Err(BirthdayError::Format(_))));
        assert!(matches!("1225".parse::<Birthday>(), Err(BirthdayError::Format(_))));
        assert!(matches!("+1-05".parse::<Birthday>(), Err(BirthdayError::Format(_))));
    }

    #[test]
    fn test_leap_day_in_common_year() {
        let leap = Birthday::new(2, 29).unwrap();
        assert!(leap.falls_on(date(2025, 2, 28)));
        assert!(leap.falls_on(date(2024, 2, 29)));
        assert!(!leap.falls_on(date(2024, 2, 28)));
    }

    #[test]
    fn test_next_occurrence_wraps_year() {
        let birthday = Birthday::new(1, 10).unwrap();
        assert_eq!(birthday.next_occurrence(date(2026, 1, 10)), date(2026, 1, 10));
        assert_eq!(birthday.next_occurrence(date(2026, 1, 11)), date(2027, 1, 10));
        assert_eq!(birthday.days_until(date(2026, 12, 31)), 10);
    }

    #[test]
    fn test_upcoming_sorted_and_filtered() {
        let today = date(2026, 10, 19);
        let birthdays = vec![
            (1, Birthday::new(10, 25).unwrap()),
            (2, Birthday::new(10, 19).unwrap()),
            (3, Birthday::new(10, 20).unwrap()),
            (4, Birthday::new(3, 1).unwrap()),
        ];

        let soon = upcoming(birthdays, today, 30);

        let users: Vec<u64> = soon.iter().map(|b| b.user_id).collect();
        assert_eq!(users, vec![2, 3, 1]);
        assert_eq!(soon[0].when(), "Today! 🎉");
        assert_eq!(soon[1].when(), "Tomorrow! 🎈");
        assert_eq!(soon[2].when(), "In 6 days");
    }

    #[test]
    fn test_lookahead_bounds() {
        assert_eq!(parse_lookahead(None), Some(365));
        assert_eq!(parse_lookahead(Some("30")), Some(30));
        assert_eq!(parse_lookahead(Some("0")), None);
        assert_eq!(parse_lookahead(Some("366")), None);
        assert_eq!(parse_lookahead(Some("soon")), None);
    }

    #[test]
    fn test_serde_uses_month_day_string() {
        let json = serde_json::to_string(&Birthday::new(7, 4).unwrap()).unwrap();
        assert_eq!(json, "\"07-04\"");
        let back: Birthday = serde_json::from_str(&json).unwrap();
        assert_eq!(back.long_form(), "July 04");
        assert!(serde_json::from_str::<Birthday>("\"99-99\"").is_err());
    }

    #[test]
    fn test_random_wish_is_from_list() {
        assert!(WISHES.contains(&random_wish()));
    }
}
