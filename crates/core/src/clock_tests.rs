// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

use super::*;

#[test]
fn advance_moves_both_timelines_in_step() {
    let clock = FakeClock::new();
    let instant_before = clock.now();
    let wall_before = clock.now_utc();

    clock.advance(Duration::from_secs(90));

    assert_eq!(clock.now().duration_since(instant_before), Duration::from_secs(90));
    assert_eq!((clock.now_utc() - wall_before).num_seconds(), 90);
}

#[test]
fn timelines_stand_still_until_moved() {
    let clock = FakeClock::new();
    let instant = clock.now();
    let wall = clock.now_utc();
    assert_eq!(clock.now(), instant);
    assert_eq!(clock.now_utc(), wall);
}

#[test]
fn set_utc_pins_the_wall_clock_only() {
    let clock = FakeClock::new();
    let instant_before = clock.now();

    let deadline = DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    clock.set_utc(deadline);

    assert_eq!(clock.now_utc(), deadline);
    assert_eq!(clock.now(), instant_before);
}

#[test]
fn clones_share_one_set_of_timelines() {
    let clock = FakeClock::new();
    let observer = clock.clone();
    clock.advance(Duration::from_secs(5));
    assert_eq!(observer.now(), clock.now());
    assert_eq!(observer.now_utc(), clock.now_utc());
}
