use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;

/// A fixed-date holiday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holiday {
    pub name: &'static str,
    pub month: u32,
    pub day: u32,
    pub emoji: &'static str,
    pub message: &'static str,
}

pub const HOLIDAYS: &[Holiday] = &[
    Holiday {
        name: "Christmas",
        month: 12,
        day: 25,
        emoji: "🎄",
        message: "🎄 Wishing everyone a Merry Christmas! May your day be filled with joy and celebration! 🎁",
    },
    Holiday {
        name: "Thanksgiving",
        month: 11,
        day: 28,
        emoji: "🦃",
        message: "🦃 Happy Thanksgiving! Time to gather with loved ones and give thanks! 🍽️",
    },
    Holiday {
        name: "Halloween",
        month: 10,
        day: 31,
        emoji: "🎃",
        message: "🎃 Happy Halloween! Have a spooktacular time! 👻",
    },
];

impl Holiday {
    fn in_year(&self, year: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
    }

    pub fn is_on(&self, date: NaiveDate) -> bool {
        date.month() == self.month && date.day() == self.day
    }

    /// Next occurrence on or after `today`.
    pub fn next_occurrence(&self, today: NaiveDate) -> Option<NaiveDate> {
        match self.in_year(today.year()) {
            Some(date) if date >= today => Some(date),
            _ => self.in_year(today.year() + 1),
        }
    }

    /// Text posted on the day itself.
    pub fn announcement(&self) -> String {
        format!("**Happy {}! 🎉**\n{}", self.name, self.message)
    }
}

/// The soonest holiday on or after `today`, with its date.
pub fn next_holiday(today: NaiveDate) -> Option<(&'static Holiday, NaiveDate)> {
    HOLIDAYS
        .iter()
        .filter_map(|holiday| holiday.next_occurrence(today).map(|date| (holiday, date)))
        .min_by_key(|(_, date)| *date)
}

/// Remembers which holidays were already announced, so a scan that runs
/// several times a day announces each holiday once.
#[derive(Debug, Default)]
pub struct AnnouncementTracker {
    last_announced: HashMap<&'static str, NaiveDate>,
}

impl AnnouncementTracker {
    /// Holidays falling on `today` that have not been announced yet. They are
    /// marked as announced.
    pub fn due(&mut self, today: NaiveDate) -> Vec<&'static Holiday> {
        let mut due = Vec::new();
        for holiday in HOLIDAYS.iter().filter(|holiday| holiday.is_on(today)) {
            if self.last_announced.insert(holiday.name, today) != Some(today) {
                due.push(holiday);
            }
        }
        due
    }
}
