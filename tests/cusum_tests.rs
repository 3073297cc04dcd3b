use regime_gate::changepoint::{CusumConfig, CusumDetector};

fn baseline() -> Vec<f64> {
    (0..20)
        .map(|i| if i % 2 == 0 { 0.98 } else { 1.02 })
        .collect()
}

#[test]
fn jump_to_double_fires_within_four_samples() {
    let mut cusum = CusumDetector::with_threshold(3.0);
    cusum.fit(&baseline());

    let mut fired_at = None;
    let mut strength = 0.0;
    for (i, v) in [2.0, 2.01, 1.99, 2.0].into_iter().enumerate() {
        let u = cusum.update(v);
        if u.changed {
            fired_at = Some(i);
            strength = u.strength;
            break;
        }
    }
    assert!(fired_at.is_some(), "expected change within four samples");
    assert!(strength > 0.0);
}

#[test]
fn strength_increases_with_shift_until_saturation() {
    let mut previous = 0.0;
    let mut saturated = false;
    for shift in [1.0, 2.0, 3.0, 4.0, 6.0] {
        let mut cusum = CusumDetector::new(CusumConfig {
            threshold: 5.0,
            drift: 0.5,
        });
        cusum.fit(&baseline());
        let mut strength = 0.0;
        for _ in 0..3 {
            strength = cusum.update(1.0 + shift * 0.02).strength;
        }
        if saturated {
            assert_eq!(strength, 1.0);
        } else {
            assert!(
                strength > previous,
                "shift {} gave {} after {}",
                shift,
                strength,
                previous
            );
        }
        saturated = strength >= 1.0;
        previous = strength;
    }
    assert!(saturated);
}

#[test]
fn downward_shift_is_detected() {
    let mut cusum = CusumDetector::with_threshold(3.0);
    cusum.fit(&baseline());
    let mut changed = false;
    for _ in 0..4 {
        changed |= cusum.update(0.5).changed;
    }
    assert!(changed);
    let (pos, neg) = cusum.sums();
    assert_eq!(pos, 0.0);
    assert!(neg > 3.0);
}

#[test]
fn first_update_without_baseline_fits_and_reports_no_change() {
    let mut cusum = CusumDetector::default();
    assert!(!cusum.is_fitted());
    let u = cusum.update(42.0);
    assert!(!u.changed);
    assert_eq!(u.strength, 0.0);
    assert_eq!(cusum.reference(), Some((42.0, 1.0)));
}

#[test]
fn flat_baseline_floors_std_to_one() {
    let mut cusum = CusumDetector::default();
    cusum.fit(&[3.0; 10]);
    assert_eq!(cusum.reference(), Some((3.0, 1.0)));
}

#[test]
fn fit_uses_only_last_twenty_samples() {
    let mut cusum = CusumDetector::default();
    let mut data = vec![1000.0; 5];
    data.extend(std::iter::repeat(2.0).take(20));
    cusum.fit(&data);
    assert_eq!(cusum.reference().map(|r| r.0), Some(2.0));
}

#[test]
fn reset_clears_sums_but_keeps_reference() {
    let mut cusum = CusumDetector::with_threshold(3.0);
    cusum.fit(&baseline());
    let _ = cusum.update(2.0);
    assert!(cusum.sums().0 > 0.0);
    let reference = cusum.reference();
    cusum.reset();
    assert_eq!(cusum.sums(), (0.0, 0.0));
    assert_eq!(cusum.reference(), reference);
}

#[test]
fn steady_stream_does_not_fire() {
    let mut cusum = CusumDetector::default();
    cusum.fit(&baseline());
    for v in baseline().into_iter().cycle().take(200) {
        assert!(!cusum.update(v).changed);
    }
}
