use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion};
use rendezvous::models::Event;
use rendezvous::services::compute_common_slots;
use std::hint::black_box;
use uuid::Uuid;

/// `per_day` half-hour meetings every day for two weeks, from 09:00 on.
fn busy_calendar(start: chrono::DateTime<Utc>, per_day: i64, offset_minutes: i64) -> Vec<Event> {
    let creator_id = Uuid::new_v4();
    (0..14)
        .flat_map(|day| {
            (0..per_day).map(move |n| {
                let start_time = start
                    + Duration::days(day)
                    + Duration::minutes(offset_minutes + n * 60);
                Event {
                    title: format!("Meeting {day}-{n}"),
                    description: None,
                    duration_minutes: 30,
                    platform: "Meet".to_string(),
                    start_time,
                    end_time: start_time + Duration::minutes(30),
                    creator_id,
                }
            })
        })
        .collect()
}

fn benchmark_common_slots(c: &mut Criterion) {
    // Monday 00:00 UTC; business hours start 9h later
    let now = Utc.with_ymd_and_hms(2030, 1, 7, 0, 0, 0).unwrap();
    let morning = now + Duration::hours(9);

    let light_a = busy_calendar(morning, 2, 0);
    let light_b = busy_calendar(morning, 2, 30);
    // Interleaved half hours fill the whole business day
    let full_a = busy_calendar(morning, 8, 0);
    let full_b = busy_calendar(morning, 8, 30);

    let mut group = c.benchmark_group("common_slots");

    group.bench_function("light_calendars", |b| {
        b.iter(|| compute_common_slots(black_box(&light_a), black_box(&light_b), 60, now))
    });

    group.bench_function("fully_booked_two_weeks", |b| {
        b.iter(|| compute_common_slots(black_box(&full_a), black_box(&full_b), 60, now))
    });

    group.finish();
}

criterion_group!(benches, benchmark_common_slots);
criterion_main!(benches);
