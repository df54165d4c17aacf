//! Calendar scenarios for the daily volume model.

use bnpl_pipeline::ingest::VolumeModel;
use chrono::NaiveDate;

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

/// Christmas week 2024 at the standard baseline and seed. Dec 24-26 fall on
/// Tue/Wed/Thu, so only the seasonal factors and noise apply.
#[test]
fn test_christmas_week_2024_trough() {
    let model = VolumeModel::default();

    let eve = model.modeled_volume(5000, date("2024-12-24"), 42);
    let day = model.modeled_volume(5000, date("2024-12-25"), 42);
    let boxing = model.modeled_volume(5000, date("2024-12-26"), 42);

    assert!((2400..=2600).contains(&eve), "christmas eve {eve}");
    assert!((540..=660).contains(&day), "christmas day {day}");
    assert!((2160..=2340).contains(&boxing), "boxing day {boxing}");

    // The trough shape holds regardless of noise draws
    assert!(day < boxing && boxing < eve);
}

#[test]
fn test_black_friday_beats_every_nearby_day() {
    let model = VolumeModel::default();
    let bf = model.modeled_volume(5000, date("2024-11-29"), 42);

    let mut d = date("2024-11-22");
    while d <= date("2024-12-06") {
        if d != date("2024-11-29") {
            let v = model.modeled_volume(5000, d, 42);
            assert!(bf > v, "{d}: {v} >= black friday {bf}");
        }
        d = d.succ_opt().unwrap();
    }
}

#[test]
fn test_full_year_is_reproducible_across_seeds() {
    let model = VolumeModel::default();
    let mut d = date("2024-01-01");
    let mut identical = true;
    while d <= date("2024-12-31") {
        let a = model.modeled_volume(5000, d, 42);
        let b = model.modeled_volume(5000, d, 42);
        assert_eq!(a, b, "{d} not reproducible");
        if a != model.modeled_volume(5000, d, 43) {
            identical = false;
        }
        d = d.succ_opt().unwrap();
    }
    // A different seed must actually change the year's shape
    assert!(!identical);
}

#[test]
fn test_weekends_dip_relative_to_adjacent_weekdays() {
    let model = VolumeModel::default();
    // Fri/Sat pairs in plain mid-month weeks
    for (friday, saturday) in [
        ("2024-06-14", "2024-06-08"),
        ("2024-09-13", "2024-09-14"),
        ("2025-02-14", "2025-02-08"),
    ] {
        let weekday = model.modeled_volume(5000, date(friday), 42) as f64;
        let weekend = model.modeled_volume(5000, date(saturday), 42) as f64;
        let ratio = weekend / 5000.0;
        assert!(weekend < weekday, "{saturday} not below {friday}");
        assert!((0.70..=0.85).contains(&ratio), "{saturday}: {ratio}");
    }
}
