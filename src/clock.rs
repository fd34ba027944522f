//! Processing date source.
//!
//! The defensive window and relative date expressions ("ontem", "últimos 30
//! dias") are anchored on the processing date, which comes from a `Clock` so
//! tests can pin it.

use chrono::NaiveDate;

pub trait Clock: Send + Sync {
    /// Current processing date.
    fn today(&self) -> NaiveDate;
}

/// Local wall-clock date.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// Always returns the same date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
