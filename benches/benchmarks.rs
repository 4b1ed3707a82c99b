//! Benchmark suite for prospector hot paths.
//!
//! Covers:
//! - Send-time scoring and the seven-day optimal send search
//! - Lead store inserts (new and merged) and batch selection
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench
//! cargo bench -- --save-baseline main
//! cargo bench -- --baseline main
//! ```

use chrono::{Duration, NaiveDate, TimeZone, Utc, Weekday};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use prospector::lead::{Business, LeadStore};
use prospector::phase::SendWindow;
use prospector::window;

fn business(i: usize, industry: &str) -> Business {
    Business {
        provider_id: Some(format!("place-{}", i)),
        name: format!("Business {}", i),
        industry: industry.to_string(),
        city: "Austin".to_string(),
        state: "TX".to_string(),
        email: Some(format!("office{}@example.com", i)),
        rating: Some(4.0 + (i % 10) as f64 / 10.0),
        review_count: (i % 200) as u32,
        ..Business::default()
    }
}

// ============================================================================
// Send Window Benchmarks
// ============================================================================

fn bench_window_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_score");
    for industry in ["dentist", "plumber", "restaurant", "unknown"] {
        group.bench_with_input(BenchmarkId::from_parameter(industry), &industry, |b, industry| {
            b.iter(|| {
                let mut total = 0.0;
                for day in [Weekday::Mon, Weekday::Wed, Weekday::Fri, Weekday::Sat] {
                    for hour in 0..24 {
                        total += window::score(black_box(industry), day, hour);
                    }
                }
                total
            });
        });
    }
    group.finish();
}

fn bench_optimal_send_time(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimal_send_time");
    let send_window = SendWindow::default();
    let dates = [
        ("ordinary_week", NaiveDate::from_ymd_opt(2025, 3, 5)),
        ("thanksgiving_week", NaiveDate::from_ymd_opt(2025, 11, 24)),
        ("christmas_week", NaiveDate::from_ymd_opt(2025, 12, 22)),
    ];
    for (name, date) in dates {
        let Some(now) = date.and_then(|d| d.and_hms_opt(9, 30, 0)) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::from_parameter(name), &now, |b, now| {
            b.iter(|| window::compute_optimal_send_time(black_box("dentist"), *now, &send_window));
        });
    }
    group.finish();
}

// ============================================================================
// Lead Store Benchmarks
// ============================================================================

fn bench_lead_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("lead_insert");
    let now = Utc.with_ymd_and_hms(2025, 3, 5, 8, 0, 0).unwrap();

    for size in [100, 1000] {
        let businesses: Vec<_> = (0..size).map(|i| business(i, "dentist")).collect();
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("new", size), &businesses, |b, businesses| {
            b.iter(|| {
                let store = LeadStore::open_in_memory().unwrap();
                for business in businesses {
                    store.insert(black_box(business), now).unwrap();
                }
            });
        });

        let store = LeadStore::open_in_memory().unwrap();
        for business in &businesses {
            store.insert(business, now).unwrap();
        }
        group.bench_with_input(BenchmarkId::new("merge", size), &businesses, |b, businesses| {
            b.iter(|| {
                for business in businesses {
                    store.insert(black_box(business), now + Duration::hours(1)).unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_uncontacted_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontacted_batch");
    let now = Utc.with_ymd_and_hms(2025, 3, 5, 8, 0, 0).unwrap();

    for size in [100, 1000] {
        let store = LeadStore::open_in_memory().unwrap();
        for i in 0..size {
            let industry = if i % 3 == 0 { "plumber" } else { "dentist" };
            store.insert(&business(i, industry), now).unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(size), &store, |b, store| {
            b.iter(|| store.get_uncontacted_batch(black_box(10)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(window_benches, bench_window_score, bench_optimal_send_time);

criterion_group!(store_benches, bench_lead_insert, bench_uncontacted_batch);

criterion_main!(window_benches, store_benches);
