//! Outreach timing heuristics.
//!
//! Pure data and pure functions: per-industry day-of-week multipliers,
//! preferred hours and base open rates, plus the blackout and
//! reduced-volume calendar. Nothing here holds state or reads the clock;
//! callers pass local time in.
//!
//! Window gating is the hard constraint on sending. The per-lead send-time
//! recommendation only orders a batch.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Weekday};
use serde::Serialize;
use std::fmt;

use crate::phase::SendWindow;

/// Timing profile of one industry.
#[derive(Debug, Clone, PartialEq)]
pub struct IndustryProfile {
    pub industry: &'static str,
    /// Aliases matched against the lead's free-text industry.
    pub aliases: &'static [&'static str],
    /// Multipliers indexed Monday = 0 .. Sunday = 6. Zero means never.
    pub day_multipliers: [f64; 7],
    /// Local hours at which owners read email.
    pub best_hours: &'static [u32],
    pub base_open_rate: f64,
}

impl IndustryProfile {
    #[must_use]
    pub fn day_multiplier(&self, day: Weekday) -> f64 {
        self.day_multipliers[day.num_days_from_monday() as usize]
    }

    #[must_use]
    pub fn allows(&self, day: Weekday, hour: u32) -> bool {
        self.day_multiplier(day) > 0.0 && self.best_hours.contains(&hour)
    }
}

const WEEKDAYS_ONLY: [f64; 7] = [0.9, 1.1, 1.2, 1.1, 0.8, 0.0, 0.0];

pub static INDUSTRY_PROFILES: &[IndustryProfile] = &[
    IndustryProfile {
        industry: "dentist",
        aliases: &["dental", "orthodont"],
        day_multipliers: [0.9, 1.2, 1.2, 1.1, 0.7, 0.0, 0.0],
        best_hours: &[9, 10, 11, 12, 13, 14],
        base_open_rate: 0.24,
    },
    IndustryProfile {
        industry: "plumber",
        aliases: &["plumbing"],
        day_multipliers: [1.1, 1.1, 1.0, 1.0, 0.8, 0.3, 0.0],
        best_hours: &[7, 8, 9, 10, 16, 17],
        base_open_rate: 0.19,
    },
    IndustryProfile {
        industry: "hvac",
        aliases: &["heating", "air conditioning"],
        day_multipliers: [1.1, 1.1, 1.0, 1.0, 0.8, 0.3, 0.0],
        best_hours: &[7, 8, 9, 10, 16, 17],
        base_open_rate: 0.18,
    },
    IndustryProfile {
        industry: "restaurant",
        aliases: &["cafe", "diner", "bistro", "pizzeria"],
        day_multipliers: [1.2, 1.2, 1.0, 0.9, 0.5, 0.0, 0.4],
        best_hours: &[9, 10, 14, 15, 16],
        base_open_rate: 0.16,
    },
    IndustryProfile {
        industry: "salon",
        aliases: &["barber", "spa", "nail"],
        day_multipliers: [1.3, 1.1, 1.0, 1.0, 0.7, 0.0, 0.5],
        best_hours: &[8, 9, 10, 13, 14],
        base_open_rate: 0.21,
    },
    IndustryProfile {
        industry: "lawyer",
        aliases: &["attorney", "law firm", "legal"],
        day_multipliers: [0.9, 1.2, 1.2, 1.1, 0.6, 0.0, 0.0],
        best_hours: &[8, 9, 10, 11, 15, 16],
        base_open_rate: 0.22,
    },
    IndustryProfile {
        industry: "auto repair",
        aliases: &["mechanic", "auto shop", "body shop"],
        day_multipliers: [1.1, 1.0, 1.0, 1.0, 0.8, 0.4, 0.0],
        best_hours: &[7, 8, 9, 12, 13],
        base_open_rate: 0.17,
    },
];

/// Profile used for industries not in [`INDUSTRY_PROFILES`].
pub static DEFAULT_PROFILE: IndustryProfile = IndustryProfile {
    industry: "default",
    aliases: &[],
    day_multipliers: WEEKDAYS_ONLY,
    best_hours: &[9, 10, 11, 12, 13, 14, 15, 16],
    base_open_rate: 0.20,
};

/// Look up the timing profile for a free-text industry.
///
/// ```
/// use prospector::window::profile_for;
///
/// assert_eq!(profile_for("Dental Clinic").industry, "dentist");
/// assert_eq!(profile_for("bakery").industry, "default");
/// ```
#[must_use]
pub fn profile_for(industry: &str) -> &'static IndustryProfile {
    let needle = industry.trim().to_lowercase();
    INDUSTRY_PROFILES
        .iter()
        .find(|p| {
            needle.contains(p.industry) || p.aliases.iter().any(|alias| needle.contains(alias))
        })
        .unwrap_or(&DEFAULT_PROFILE)
}

// =========================================================================
// Calendar
// =========================================================================

/// Why a date is closed or throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Holiday {
    NewYearsDay,
    MemorialDay,
    IndependenceDay,
    LaborDay,
    Thanksgiving,
    BlackFriday,
    ChristmasEve,
    ChristmasDay,
    HolidayWeek,
    NewYearsEve,
}

impl fmt::Display for Holiday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NewYearsDay => "New Year's Day",
            Self::MemorialDay => "Memorial Day",
            Self::IndependenceDay => "Independence Day",
            Self::LaborDay => "Labor Day",
            Self::Thanksgiving => "Thanksgiving",
            Self::BlackFriday => "Black Friday",
            Self::ChristmasEve => "Christmas Eve",
            Self::ChristmasDay => "Christmas Day",
            Self::HolidayWeek => "holiday week",
            Self::NewYearsEve => "New Year's Eve",
        };
        f.write_str(name)
    }
}

fn nth_weekday(year: i32, month: u32, day: Weekday, n: u8) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, day, n)
}

fn last_weekday(year: i32, month: u32, day: Weekday) -> Option<NaiveDate> {
    nth_weekday(year, month, day, 5).or_else(|| nth_weekday(year, month, day, 4))
}

/// Fourth Thursday of November.
#[must_use]
pub fn thanksgiving(year: i32) -> Option<NaiveDate> {
    nth_weekday(year, 11, Weekday::Thu, 4)
}

/// The holiday that blocks sending on `date`, if any.
#[must_use]
pub fn blackout(date: NaiveDate) -> Option<Holiday> {
    let year = date.year();
    match (date.month(), date.day()) {
        (1, 1) => return Some(Holiday::NewYearsDay),
        (7, 4) => return Some(Holiday::IndependenceDay),
        (12, 24) => return Some(Holiday::ChristmasEve),
        (12, 25) => return Some(Holiday::ChristmasDay),
        (12, 31) => return Some(Holiday::NewYearsEve),
        _ => {}
    }
    if thanksgiving(year) == Some(date) {
        return Some(Holiday::Thanksgiving);
    }
    if last_weekday(year, 5, Weekday::Mon) == Some(date) {
        return Some(Holiday::MemorialDay);
    }
    if nth_weekday(year, 9, Weekday::Mon, 1) == Some(date) {
        return Some(Holiday::LaborDay);
    }
    None
}

#[must_use]
pub fn is_blackout(date: NaiveDate) -> bool {
    blackout(date).is_some()
}

/// Volume multiplier for `date`: 1.0 normally, lower on throttled days,
/// 0.0 on blackouts.
#[must_use]
pub fn volume_multiplier(date: NaiveDate) -> f64 {
    if is_blackout(date) {
        return 0.0;
    }
    match reduced_volume(date) {
        Some(_) => 0.5,
        None => 1.0,
    }
}

/// The reason `date` is a reduced-volume day, if it is one.
#[must_use]
pub fn reduced_volume(date: NaiveDate) -> Option<Holiday> {
    if thanksgiving(date.year()).map(|d| d + Duration::days(1)) == Some(date) {
        return Some(Holiday::BlackFriday);
    }
    if date.month() == 12 && (26..=30).contains(&date.day()) {
        return Some(Holiday::HolidayWeek);
    }
    None
}

// =========================================================================
// Gating
// =========================================================================

/// Outcome of a window check.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowVerdict {
    Open,
    /// Outside the phase's configured days or hours.
    OutsideSendWindow,
    /// No target industry reads email at this hour.
    IndustryOffHours,
    Blackout(Holiday),
}

impl WindowVerdict {
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for WindowVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::OutsideSendWindow => write!(f, "outside send window"),
            Self::IndustryOffHours => write!(f, "off-hours for target industries"),
            Self::Blackout(holiday) => write!(f, "blackout ({})", holiday),
        }
    }
}

/// Check `local` against the phase send window, the industry tables and
/// the blackout calendar.
///
/// With no target industries the default profile applies.
#[must_use]
pub fn check_window(local: NaiveDateTime, window: &SendWindow, industries: &[String]) -> WindowVerdict {
    if let Some(holiday) = blackout(local.date()) {
        return WindowVerdict::Blackout(holiday);
    }
    if !window.contains(local) {
        return WindowVerdict::OutsideSendWindow;
    }

    let (day, hour) = (local.weekday(), local.hour());
    let industry_open = if industries.is_empty() {
        DEFAULT_PROFILE.allows(day, hour)
    } else {
        industries.iter().any(|i| profile_for(i).allows(day, hour))
    };
    if !industry_open {
        return WindowVerdict::IndustryOffHours;
    }
    WindowVerdict::Open
}

/// True when sends are allowed at `local`.
#[must_use]
pub fn is_optimal_window(local: NaiveDateTime, window: &SendWindow, industries: &[String]) -> bool {
    check_window(local, window, industries).is_open()
}

// =========================================================================
// Scoring
// =========================================================================

/// Expected open rate for an email to `industry` sent at `day`/`hour`.
#[must_use]
pub fn score(industry: &str, day: Weekday, hour: u32) -> f64 {
    let profile = profile_for(industry);
    let hour_factor = if profile.best_hours.contains(&hour) {
        1.0
    } else if (8..=17).contains(&hour) {
        0.6
    } else {
        0.2
    };
    profile.base_open_rate * profile.day_multiplier(day) * hour_factor
}

/// Advisory send-time recommendation for one lead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendTimeRecommendation {
    /// Local time at the start of the recommended hour.
    pub at: NaiveDateTime,
    pub day: Weekday,
    pub hour: u32,
    pub expected_open_rate: f64,
}

/// Best hour within the next seven days for `industry`, honouring the send
/// window and blackouts. Earliest wins on ties. `None` when the window
/// admits no hour in the coming week.
#[must_use]
pub fn compute_optimal_send_time(
    industry: &str,
    local_now: NaiveDateTime,
    window: &SendWindow,
) -> Option<SendTimeRecommendation> {
    let start = local_now.date().and_hms_opt(local_now.hour(), 0, 0)?;
    let mut best: Option<SendTimeRecommendation> = None;

    for offset in 0..(7 * 24) {
        let candidate = start + Duration::hours(offset);
        if !window.contains(candidate) || is_blackout(candidate.date()) {
            continue;
        }
        let rate = score(industry, candidate.weekday(), candidate.hour())
            * volume_multiplier(candidate.date());
        if rate <= 0.0 {
            continue;
        }
        if best.as_ref().map_or(true, |b| rate > b.expected_open_rate) {
            best = Some(SendTimeRecommendation {
                at: candidate,
                day: candidate.weekday(),
                hour: candidate.hour(),
                expected_open_rate: rate,
            });
        }
    }
    best
}
