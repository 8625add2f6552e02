use super::*;

#[test]
fn equality_ignores_timescale() {
    assert_eq!(MediaTime::new(1, 2), MediaTime::new(2, 4));
    assert_eq!(MediaTime::new(3000, 90_000), MediaTime::new(1, 30));
    assert!(MediaTime::new(1, 30) < MediaTime::new(1, 29));
}

#[test]
fn arithmetic_across_timescales() {
    let a = MediaTime::new(1, 30);
    let b = MediaTime::new(1, 600);
    let sum = a + b;
    assert_eq!(sum.timescale, 600);
    assert_eq!(sum.value, 21);

    let diff = MediaTime::new(5, 1) - MediaTime::new(3000, 90_000);
    assert!((diff.seconds() - (5.0 - 1.0 / 30.0)).abs() < 1e-9);
}

#[test]
fn from_seconds_rounds_to_nearest_tick() {
    let t = MediaTime::from_seconds(1.0 / 29.97, DEFAULT_TIMESCALE);
    assert_eq!(t.value, 3003);
    assert_eq!(MediaTime::from_seconds(f64::NAN, 10).value, 0);
}

#[test]
fn rescale_rounds_half_away_from_zero() {
    assert_eq!(MediaTime::new(1, 4).rescale(2).value, 1);
    assert_eq!(MediaTime::new(-1, 4).rescale(2).value, -1);
    assert_eq!(MediaTime::new(7, 0).seconds(), 7.0);
}

#[test]
fn unbounded_range_uses_asset_duration() {
    let asset = MediaTime::new(10, 1);
    let full = TimeRange::default();
    assert!(full.is_unbounded());
    assert_eq!(full.export_duration(asset), asset);
    assert_eq!(full.end_within(asset), asset);

    let late = TimeRange::from_start(MediaTime::new(4, 1));
    assert_eq!(late.export_duration(asset), asset);
    assert!(late.contains(MediaTime::new(100, 1)));
}

#[test]
fn bounded_range_contains_half_open() {
    let r = TimeRange::new(MediaTime::new(2, 1), MediaTime::new(3, 1));
    assert_eq!(r.end(), Some(MediaTime::new(5, 1)));
    assert!(r.contains(MediaTime::new(2, 1)));
    assert!(r.contains(MediaTime::new(49, 10)));
    assert!(!r.contains(MediaTime::new(5, 1)));
    assert!(!r.contains(MediaTime::new(1, 1)));
}
