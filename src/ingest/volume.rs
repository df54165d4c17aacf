//! Daily volume modeling for historical backfills.
//!
//! Real BNPL traffic is not flat: weekends dip, paycheck weeks lift,
//! Black Friday spikes and Christmas Day collapses. The model composes a
//! weekend factor, a seasonal factor, a paycheck-cycle factor and bounded
//! deterministic noise so the same `(base, date, seed)` always yields the
//! same target volume.

use chrono::{Datelike, NaiveDate, Weekday};
use sha2::{Digest, Sha256};

/// Multiplicative daily volume model with tunable factors.
#[derive(Debug, Clone)]
pub struct VolumeModel {
    /// Saturday/Sunday multiplier
    pub weekend_factor: f64,
    /// Multiplier during the two paycheck windows of each month
    pub paycheck_factor: f64,
    /// Half-width of the deterministic noise band, as a fraction
    pub noise_amplitude: f64,
    /// Christmas Day multiplier
    pub christmas_factor: f64,
    /// Black Friday multiplier
    pub peak_factor: f64,
}

impl Default for VolumeModel {
    fn default() -> Self {
        Self {
            weekend_factor: 0.78,
            paycheck_factor: 1.08,
            noise_amplitude: 0.04,
            christmas_factor: 0.12,
            peak_factor: 2.0,
        }
    }
}

impl VolumeModel {
    /// Target volume for one calendar date.
    ///
    /// `base * weekday * seasonal * paycheck * (1 + noise)`, rounded, with a
    /// floor of 1 so a modeled day is never empty.
    pub fn modeled_volume(&self, base_daily_volume: u64, date: NaiveDate, seed: u64) -> u64 {
        let modeled = base_daily_volume as f64
            * self.weekday_factor(date)
            * self.seasonal_factor(date)
            * self.paycheck_cycle_factor(date)
            * (1.0 + self.bounded_noise(date, seed));
        (modeled.round() as u64).max(1)
    }

    fn weekday_factor(&self, date: NaiveDate) -> f64 {
        match date.weekday() {
            Weekday::Sat | Weekday::Sun => self.weekend_factor,
            _ => 1.0,
        }
    }

    /// Holiday calendar. Christmas week is a trough, Black Friday weekend a
    /// spike, with a mild run-up through mid December.
    fn seasonal_factor(&self, date: NaiveDate) -> f64 {
        if Some(date) == black_friday(date.year()) {
            return self.peak_factor;
        }
        if Some(date) == cyber_monday(date.year()) {
            return 1.5;
        }
        match (date.month(), date.day()) {
            (12, 25) => self.christmas_factor,
            (12, 24) => 0.50,
            (12, 26) => 0.45,
            (12, 31) => 0.70,
            (1, 1) => 0.35,
            (12, 15..=23) => 1.30,
            _ => 1.0,
        }
    }

    fn paycheck_cycle_factor(&self, date: NaiveDate) -> f64 {
        // Most employers pay on the 1st or the 15th; spending lifts for the
        // following week.
        match date.day() {
            1..=7 | 15..=21 => self.paycheck_factor,
            _ => 1.0,
        }
    }

    /// Deterministic noise in `[-noise_amplitude, +noise_amplitude]`, keyed
    /// on `(seed, date)` so reruns and resumed runs model identical volumes.
    fn bounded_noise(&self, date: NaiveDate, seed: u64) -> f64 {
        let mut hasher = Sha256::new();
        hasher.update(seed.to_le_bytes());
        hasher.update(date.to_string().as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let fraction = u64::from_le_bytes(bytes) as f64 / u64::MAX as f64;
        (fraction * 2.0 - 1.0) * self.noise_amplitude
    }
}

/// Black Friday: the day after the fourth Thursday of November.
fn black_friday(year: i32) -> Option<NaiveDate> {
    let fourth_thursday = (1..=30)
        .filter_map(|day| NaiveDate::from_ymd_opt(year, 11, day))
        .filter(|d| d.weekday() == Weekday::Thu)
        .nth(3)?;
    fourth_thursday.succ_opt()
}

/// Cyber Monday: the Monday after Black Friday.
fn cyber_monday(year: i32) -> Option<NaiveDate> {
    black_friday(year)?.checked_add_days(chrono::Days::new(3))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_same_inputs_yield_same_volume() {
        let model = VolumeModel::default();
        let d = date("2024-06-12");
        assert_eq!(
            model.modeled_volume(5000, d, 42),
            model.modeled_volume(5000, d, 42)
        );
        assert_ne!(
            model.modeled_volume(5000, d, 42),
            model.modeled_volume(5000, d, 43)
        );
    }

    #[test]
    fn test_weekend_volume_sits_in_the_dip_band() {
        let model = VolumeModel::default();
        // 2024-06-08 is a Saturday outside the paycheck windows
        let weekend = model.modeled_volume(5000, date("2024-06-08"), 42);
        let ratio = weekend as f64 / 5000.0;
        assert!((0.70..=0.85).contains(&ratio), "weekend ratio {ratio}");
    }

    #[test]
    fn test_christmas_day_collapses() {
        let model = VolumeModel::default();
        // 2024-12-25 is a Wednesday: only seasonal and noise apply
        let volume = model.modeled_volume(5000, date("2024-12-25"), 42);
        assert!((540..=660).contains(&volume), "christmas volume {volume}");
    }

    #[test]
    fn test_black_friday_spikes() {
        let model = VolumeModel::default();
        assert_eq!(black_friday(2024), Some(date("2024-11-29")));
        let volume = model.modeled_volume(5000, date("2024-11-29"), 42);
        // 2x peak on a plain Friday, day 29 sits outside both paycheck windows
        assert!(volume > 9_500, "black friday volume {volume}");
    }

    #[test]
    fn test_paycheck_weeks_lift() {
        let model = VolumeModel {
            noise_amplitude: 0.0,
            ..VolumeModel::default()
        };
        // Tuesdays in and out of the paycheck windows
        let in_window = model.modeled_volume(5000, date("2024-06-18"), 42);
        let out_of_window = model.modeled_volume(5000, date("2024-06-11"), 42);
        assert_eq!(in_window, 5400);
        assert_eq!(out_of_window, 5000);
    }

    #[test]
    fn test_noise_stays_bounded() {
        let model = VolumeModel::default();
        let mut d = date("2024-03-04");
        // Plain weekdays outside paycheck windows across several months
        for _ in 0..8 {
            if d.weekday() != Weekday::Sat
                && d.weekday() != Weekday::Sun
                && !(1..=7).contains(&d.day())
                && !(15..=21).contains(&d.day())
            {
                let v = model.modeled_volume(10_000, d, 7) as f64;
                assert!((9_600.0..=10_400.0).contains(&v), "{d}: {v}");
            }
            d = d.checked_add_days(chrono::Days::new(3)).unwrap();
        }
    }

    #[test]
    fn test_volume_never_drops_to_zero() {
        let model = VolumeModel::default();
        assert!(model.modeled_volume(1, date("2024-12-25"), 42) >= 1);
    }
}
