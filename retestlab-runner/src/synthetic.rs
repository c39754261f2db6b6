//! Seeded synthetic bars for demos and tests.
//!
//! A random walk from 100.0 on weekdays starting 2020-01-02. Daily returns
//! are uniform in ±3% on top of a slow drift that flips every few months,
//! so the series has both trending and ranging stretches. Same seed, same
//! bars.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use retestlab_core::domain::Bar;

/// Bars from an explicit seed.
pub fn generate_bars(count: usize, seed: u64) -> Vec<Bar> {
    walk(&mut StdRng::seed_from_u64(seed), count)
}

/// Bars seeded from the symbol name, so each symbol gets its own series.
pub fn generate_for_symbol(symbol: &str, count: usize) -> Vec<Bar> {
    let seed = *blake3::hash(symbol.as_bytes()).as_bytes();
    walk(&mut StdRng::from_seed(seed), count)
}

fn start_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

fn walk(rng: &mut StdRng, count: usize) -> Vec<Bar> {
    let mut bars = Vec::with_capacity(count);
    let mut price = 100.0_f64;
    let mut day = start_date();
    let mut drift = 0.0_f64;

    while bars.len() < count {
        if matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            day += Duration::days(1);
            continue;
        }
        if bars.len() % 63 == 0 {
            drift = rng.gen_range(-0.004..0.004);
        }

        let daily_return: f64 = drift + rng.gen_range(-0.03..0.03);
        let open = price;
        let close = (price * (1.0 + daily_return)).max(0.01);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
        let volume = rng.gen_range(500_000..5_000_000u64) as f64;

        bars.push(Bar {
            timestamp: day,
            open,
            high,
            low,
            close,
            volume,
        });
        price = close;
        day += Duration::days(1);
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bars() {
        assert_eq!(generate_bars(200, 7), generate_bars(200, 7));
        assert_ne!(generate_bars(200, 7), generate_bars(200, 8));
    }

    #[test]
    fn symbols_get_distinct_series() {
        let spy = generate_for_symbol("SPY", 100);
        assert_eq!(spy, generate_for_symbol("SPY", 100));
        assert_ne!(spy, generate_for_symbol("QQQ", 100));
    }

    #[test]
    fn bars_are_sane_weekdays_in_order() {
        let bars = generate_bars(500, 42);
        assert_eq!(bars.len(), 500);
        assert_eq!(bars[0].timestamp, start_date());
        for pair in bars.windows(2) {
            assert!(pair[1].timestamp > pair[0].timestamp);
        }
        for bar in &bars {
            assert!(bar.is_sane(), "{bar:?}");
            assert!(!matches!(bar.timestamp.weekday(), Weekday::Sat | Weekday::Sun));
        }
    }

    #[test]
    fn zero_count_is_empty() {
        assert!(generate_bars(0, 1).is_empty());
    }
}
