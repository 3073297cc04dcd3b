use chrono::{DateTime, Duration, TimeZone, Utc};
use regime_gate::regime::{ChangeMetric, RegimeChangeConfig, RegimeChangeDetector};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap()
}

fn calm_price(i: usize) -> f64 {
    if i % 2 == 0 {
        100.1
    } else {
        99.9
    }
}

#[test]
fn no_event_before_min_history() {
    let mut d = RegimeChangeDetector::new("BTCUSDT", RegimeChangeConfig::default());
    for i in 0..19 {
        assert!(d.update(t0() + Duration::minutes(i as i64), calm_price(i)).is_none());
    }
    assert!(!d.is_ready());
    let _ = d.update(t0() + Duration::minutes(19), calm_price(19));
    assert!(d.is_ready());
}

#[test]
fn price_jump_is_flagged_on_return_metric() {
    let mut d = RegimeChangeDetector::new("BTCUSDT", RegimeChangeConfig::default());
    for i in 0..40 {
        let _ = d.update(t0() + Duration::minutes(i as i64), calm_price(i));
    }
    let jump_time = t0() + Duration::minutes(40);
    let event = d
        .update(jump_time, calm_price(39) * 1.05)
        .expect("jump should produce an event");

    assert!(event.change_detected);
    assert_eq!(event.metric_changed, ChangeMetric::Return);
    assert_eq!(event.cusum_strength, 1.0);
    assert_eq!(event.symbol, "BTCUSDT");
    assert_eq!(event.time, jump_time);
    assert!((0.0..=1.0).contains(&event.confidence));
    assert!((0.0..=1.0).contains(&event.bocpd_probability));
    assert!(event.combined_strength >= 1.0 / 3.0);
    assert!(
        (event.confidence - (event.combined_strength + event.bocpd_probability) / 2.0).abs()
            < 1e-12
    );
    assert_eq!(d.last_event(), Some(&event));
}

#[test]
fn events_below_confidence_threshold_are_suppressed() {
    let cfg = RegimeChangeConfig {
        change_confidence_threshold: 0.95,
        ..RegimeChangeConfig::default()
    };
    let mut d = RegimeChangeDetector::new("ETHUSDT", cfg);
    for i in 0..60 {
        assert!(d.update(t0() + Duration::minutes(i as i64), calm_price(i)).is_none());
    }
    assert!(d.last_event().is_none());
}

#[test]
fn invalid_prices_are_ignored() {
    let mut d = RegimeChangeDetector::new("BTCUSDT", RegimeChangeConfig::default());
    let _ = d.update(t0(), 100.0);
    for bad in [f64::NAN, -1.0, 0.0, f64::INFINITY] {
        assert!(d.update(t0(), bad).is_none());
    }
    assert_eq!(d.history_len(), 1);
}

#[test]
fn history_is_bounded_and_volatility_tracked() {
    let mut d = RegimeChangeDetector::new("BTCUSDT", RegimeChangeConfig::default());
    for i in 0..500 {
        let _ = d.update(t0() + Duration::minutes(i as i64), calm_price(i));
    }
    assert!(d.history_len() <= 21);
    let vol = d.last_volatility().expect("volatility after warmup");
    assert!(vol > 0.0 && vol < 0.01);
}

#[test]
fn reset_forgets_history() {
    let mut d = RegimeChangeDetector::new("BTCUSDT", RegimeChangeConfig::default());
    for i in 0..30 {
        let _ = d.update(t0() + Duration::minutes(i as i64), calm_price(i));
    }
    d.reset();
    assert_eq!(d.history_len(), 0);
    assert!(!d.is_ready());
    assert!(d.last_event().is_none());
    assert_eq!(d.symbol(), "BTCUSDT");
}
