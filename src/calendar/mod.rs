//! # Calendar Module
//!
//! Date logic behind the birthday and holiday features. Nothing here talks to
//! Discord or storage; the scheduler in [`crate::bot::scheduler`] feeds it dates
//! and stored birthdays and posts whatever comes back.

pub mod birthday;
pub mod holiday;

pub use birthday::{Birthday, BirthdayError, UpcomingBirthday};
pub use holiday::{next_holiday, AnnouncementTracker, Holiday, HOLIDAYS};
