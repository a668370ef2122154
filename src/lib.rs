//! Harmony Bot: a Discord bot that plays music in voice channels, keeps track
//! of member birthdays and announces holidays.

pub mod audio;
pub mod bot;
pub mod calendar;
pub mod config;
pub mod sources;
pub mod storage;
