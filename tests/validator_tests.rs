use chrono::{TimeZone, Utc};
use tick_recorder::model::tick::{Side, Tick};
use tick_recorder::pipeline::{OfiCalculator, TickValidator};

fn tick(secs: i64, price: f64, qty: f64) -> Tick {
    Tick {
        ts: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        price,
        qty,
        side: Side::Buy,
        ofi: 0.0,
    }
}

/// Deterministic pseudo-random walk in [-1, 1).
fn lcg(seed: &mut u64) -> f64 {
    *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    ((*seed >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
}

#[test]
fn prices_within_jump_limit_pass_unchanged() {
    let mut v = TickValidator::new(0.05, 300);
    let mut seed = 7;
    let mut price = 1_000.0;
    for i in 0..500 {
        // Stay comfortably inside the 5% band.
        price *= 1.0 + 0.04 * lcg(&mut seed);
        let out = v.adjust(tick(i, price, 1.0)).unwrap();
        assert_eq!(out.price, price, "tick {}", i);
    }
}

#[test]
fn non_positive_price_reuses_last_valid_price() {
    let mut v = TickValidator::new(0.05, 300);
    v.adjust(tick(0, 250.0, 1.0)).unwrap();
    for (i, bad) in [0.0, -1.0, -250.0].into_iter().enumerate() {
        let out = v.adjust(tick(i as i64 + 1, bad, 1.0)).unwrap();
        assert_eq!(out.price, 250.0);
    }
    assert_eq!(v.last_price(), Some(250.0));
}

#[test]
fn first_non_positive_price_is_absent() {
    let mut v = TickValidator::new(0.05, 300);
    assert!(v.adjust(tick(0, -5.0, 1.0)).is_none());
    let out = v.adjust(tick(1, 10.0, 1.0)).unwrap();
    assert_eq!(out.price, 10.0);
}

#[test]
fn large_jumps_are_clamped_in_their_direction() {
    let jump = 0.05;
    let mut v = TickValidator::new(jump, 300);
    let mut seed = 42;
    let mut last = 100.0;
    v.adjust(tick(0, last, 1.0)).unwrap();
    for i in 1..300 {
        let r = lcg(&mut seed);
        let direction = if r >= 0.0 { 1.0 } else { -1.0 };
        // Between 6% and 50% away from the last accepted price.
        let raw = last * (1.0 + direction * (0.06 + 0.44 * r.abs()));
        let out = v.adjust(tick(i, raw, 1.0)).unwrap();
        let expected = last * (1.0 + direction * jump);
        assert!(
            (out.price - expected).abs() <= 1e-9 * expected.abs(),
            "tick {}: got {} expected {}",
            i,
            out.price,
            expected
        );
        last = out.price;
    }
}

#[test]
fn window_never_holds_entries_older_than_horizon() {
    let window = 30;
    let mut v = TickValidator::new(0.05, window);
    let mut seed = 3;
    let mut secs = 0;
    for _ in 0..1_000 {
        secs += ((lcg(&mut seed).abs() * 7.0) as i64).max(0);
        let now = tick(secs, 100.0, 1.0).ts;
        v.adjust(tick(secs, 100.0, 1.0 + lcg(&mut seed).abs())).unwrap();
        let oldest = v.window_start().unwrap();
        assert!(oldest >= now - chrono::Duration::seconds(window as i64));
    }
}

#[test]
fn qty_clamps_follow_window_bounds() {
    let mut v = TickValidator::new(0.05, 300);
    let mut seed = 11;
    let mut seen: Vec<f64> = Vec::new();
    // 200 ticks one second apart stay inside the 300s window.
    for i in 0..200 {
        let qty = if i % 10 == 9 {
            -lcg(&mut seed).abs()
        } else {
            1.0 + 5.0 * lcg(&mut seed).abs()
        };
        seen.push(qty);
        let window_min = seen.iter().copied().fold(f64::INFINITY, f64::min);
        let window_max = seen.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let out = v.adjust(tick(i, 100.0, qty)).unwrap();
        let expected = if qty > window_max {
            window_max
        } else if qty <= 0.0 {
            window_min
        } else {
            qty
        };
        assert_eq!(out.qty, expected, "tick {}", i);
    }
}

#[test]
fn zero_qty_maps_to_smaller_earlier_negative() {
    let mut v = TickValidator::new(0.05, 300);
    v.adjust(tick(0, 100.0, -2.0)).unwrap();
    let out = v.adjust(tick(1, 100.0, 0.0)).unwrap();
    assert_eq!(out.qty, -2.0);
}

#[test]
fn ofi_is_zero_first_then_signed_qty() {
    let mut ofi = OfiCalculator::new();
    let mut t = tick(0, 100.0, 3.0);
    assert_eq!(ofi.compute(&t), 0.0);
    for i in 1..50 {
        t.side = if i % 3 == 0 { Side::Sell } else { Side::Buy };
        t.qty = i as f64 * 0.5;
        let expected = if t.side == Side::Buy { t.qty } else { -t.qty };
        assert_eq!(ofi.compute(&t), expected);
    }
}
