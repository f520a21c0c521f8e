//! # Session Windows
//!
//! Noon-to-noon window arithmetic and the session resolution decision.
//!
//! ## Window Boundaries
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │               Courier-local time (e.g. Africa/Kinshasa)                 │
//! │                                                                         │
//! │   day D-1 12:00          day D 12:00           day D+1 12:00            │
//! │        │◄──── window W(D-1) ───►│◄──── window W(D) ────►│               │
//! │        │                        │                       │               │
//! │   now = D 11:59  ──► W(D-1)     now = D 12:01 ──► W(D)                  │
//! │                                                                         │
//! │  Boundaries are computed on the local calendar, then converted to UTC,  │
//! │  so zones far from UTC never land on the wrong day.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Resolution Decision
//! ```text
//! open session?
//!   ├── explicit ─────────────────────────────► keep
//!   ├── automatic, opened inside W ───────────► keep
//!   └── automatic, opened before W ──► rotate (close), then:
//! latest session opened inside W?
//!   ├── closed ───────────────────────────────► reopen
//!   ├── open ─────────────────────────────────► keep
//!   └── none ─────────────────────────────────► create
//! ```

use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::types::{DeliverySession, SessionOrigin};

/// Local hour at which windows roll over.
pub const WINDOW_BOUNDARY_HOUR: u32 = 12;

/// A courier's time zone, remembering whether UTC was substituted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourierZone {
    pub tz: Tz,
    /// True when the configured zone was missing or unknown.
    pub fell_back: bool,
}

impl CourierZone {
    /// Parses an IANA zone name. Missing or unknown names resolve to UTC.
    ///
    /// ```rust
    /// use farine_core::window::CourierZone;
    ///
    /// assert!(!CourierZone::resolve(Some("Africa/Kinshasa")).fell_back);
    /// assert!(CourierZone::resolve(Some("Mars/Olympus")).fell_back);
    /// assert!(CourierZone::resolve(None).fell_back);
    /// ```
    pub fn resolve(name: Option<&str>) -> Self {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => match name.parse::<Tz>() {
                Ok(tz) => CourierZone { tz, fell_back: false },
                Err(_) => CourierZone::utc(true),
            },
            None => CourierZone::utc(true),
        }
    }

    fn utc(fell_back: bool) -> Self {
        CourierZone {
            tz: Tz::UTC,
            fell_back,
        }
    }
}

/// Half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Local calendar date on which the window opens.
    pub local_date: NaiveDate,
}

impl SessionWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Active noon-to-noon window for `now` in `tz`.
pub fn active_window(now: DateTime<Utc>, tz: Tz) -> SessionWindow {
    let today = now.with_timezone(&tz).date_naive();
    let noon_today = local_instant(today, WINDOW_BOUNDARY_HOUR, tz);

    if now >= noon_today {
        let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
        SessionWindow {
            start: noon_today,
            end: local_instant(tomorrow, WINDOW_BOUNDARY_HOUR, tz),
            local_date: today,
        }
    } else {
        let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
        SessionWindow {
            start: local_instant(yesterday, WINDOW_BOUNDARY_HOUR, tz),
            end: noon_today,
            local_date: yesterday,
        }
    }
}

/// Local calendar day `[00:00, next 00:00)` containing `now`, in UTC.
pub fn local_day(now: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.with_timezone(&tz).date_naive();
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    (local_instant(today, 0, tz), local_instant(tomorrow, 0, tz))
}

/// `<prefix>-YYYY-MM-DD` using the window's local date.
pub fn session_name(prefix: &str, window: &SessionWindow) -> String {
    format!("{}-{}", prefix, window.local_date.format("%Y-%m-%d"))
}

/// `hour:00` local on `date`, as UTC.
///
/// Ambiguous times take the earlier instant; a time inside a DST gap
/// moves forward one hour.
fn local_instant(date: NaiveDate, hour: u32, tz: Tz) -> DateTime<Utc> {
    let naive = date
        .and_hms_opt(hour, 0, 0)
        .unwrap_or_else(|| date.and_time(NaiveTime::default()));

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => shifted_past_gap(naive, tz),
    }
}

fn shifted_past_gap(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    let shifted = naive + chrono::Duration::hours(1);
    tz.from_local_datetime(&shifted)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

// =============================================================================
// Resolution Plan
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionStep {
    Keep(String),
    Reopen(String),
    Create,
}

/// What the resolver must do, decided from the courier's current open
/// session and the most recent session opened inside the active window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionPlan {
    /// Automatic session from an earlier window to close first.
    pub rotate: Option<String>,
    pub step: ResolutionStep,
}

pub fn plan_resolution(
    open: Option<&DeliverySession>,
    latest_in_window: Option<&DeliverySession>,
    window: &SessionWindow,
) -> ResolutionPlan {
    let mut rotate = None;

    if let Some(open) = open {
        if open.origin == SessionOrigin::Explicit || window.contains(open.opened_at) {
            return ResolutionPlan {
                rotate: None,
                step: ResolutionStep::Keep(open.id.clone()),
            };
        }
        rotate = Some(open.id.clone());
    }

    let step = match latest_in_window {
        Some(found) if Some(&found.id) == rotate.as_ref() => ResolutionStep::Create,
        Some(found) if found.is_open() => ResolutionStep::Keep(found.id.clone()),
        Some(found) => ResolutionStep::Reopen(found.id.clone()),
        None => ResolutionStep::Create,
    };

    ResolutionPlan { rotate, step }
}

// =============================================================================
// Unit Tests
// =============================================================================
