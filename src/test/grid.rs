#[cfg(test)]
mod tests {
    use crate::models::{Session, SessionStatus};
    use crate::schedule::{SlotWindow, day_grid, month_grid, week_grid};
    use chrono::{
        Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
    };

    fn session_at(id: i64, starts_at: &str, ends_at: &str) -> Session {
        let parse = |s: &str| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
                .expect("valid fixture instant")
                .and_utc()
        };

        Session {
            id,
            teacher_id: 1,
            student_id: 1,
            student_name: "Maya Student".to_string(),
            starts_at: parse(starts_at),
            ends_at: parse(ends_at),
            location: None,
            status: SessionStatus::Scheduled,
            programs: Vec::new(),
        }
    }

    fn ids(sessions: &[Session]) -> Vec<i64> {
        sessions.iter().map(|s| s.id).collect()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid fixture date")
    }

    #[test]
    fn day_grid_floors_to_the_lower_half_hour() {
        let sessions = vec![
            session_at(1, "2030-06-01 10:15", "2030-06-01 10:45"),
            session_at(2, "2030-06-01 10:45", "2030-06-01 11:15"),
            session_at(3, "2030-06-01 10:00", "2030-06-01 10:15"),
        ];

        let slots = day_grid(&sessions, date("2030-06-01"), SlotWindow::default(), &Utc);

        assert_eq!(slots.len(), 18, "10:00-19:00 yields 18 half-hour slots");
        assert_eq!(slots[0].starts_at, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        assert_eq!(ids(&slots[0].sessions), vec![1, 3]);
        assert_eq!(slots[1].starts_at, NaiveTime::from_hms_opt(10, 30, 0).unwrap());
        assert_eq!(ids(&slots[1].sessions), vec![2]);
    }

    #[test]
    fn day_grid_drops_sessions_outside_the_window() {
        let sessions = vec![
            session_at(1, "2030-06-01 09:59", "2030-06-01 10:29"),
            session_at(2, "2030-06-01 19:00", "2030-06-01 19:30"),
            session_at(3, "2030-06-01 18:30", "2030-06-01 19:00"),
            session_at(4, "2030-06-02 10:15", "2030-06-02 10:45"),
        ];

        let slots = day_grid(&sessions, date("2030-06-01"), SlotWindow::default(), &Utc);

        let placed: Vec<i64> = slots.iter().flat_map(|s| ids(&s.sessions)).collect();
        assert_eq!(
            placed,
            vec![3],
            "Before-window, after-window and other-day sessions are silently dropped"
        );
        assert_eq!(ids(&slots[17].sessions), vec![3], "18:30 is the last slot");
    }

    #[test]
    fn week_grid_assigns_by_local_date_and_is_idempotent() {
        let sessions = vec![
            session_at(1, "2030-06-01 10:00", "2030-06-01 10:30"),
            session_at(2, "2030-06-03 12:00", "2030-06-03 12:30"),
            session_at(3, "2030-06-07 18:00", "2030-06-07 18:30"),
            session_at(4, "2030-06-08 10:00", "2030-06-08 10:30"), // beyond +6
        ];

        let start = date("2030-06-01");
        let first = week_grid(&sessions, start, &Utc);
        let second = week_grid(&sessions, start, &Utc);

        assert_eq!(first.len(), 7);
        assert_eq!(first[0].date, start);
        assert_eq!(ids(&first[0].sessions), vec![1]);
        assert_eq!(ids(&first[2].sessions), vec![2]);
        assert_eq!(ids(&first[6].sessions), vec![3]);
        assert!(first[1].sessions.is_empty());

        let flatten =
            |grid: &[crate::schedule::DayBucket]| -> Vec<(NaiveDate, Vec<i64>)> {
                grid.iter().map(|b| (b.date, ids(&b.sessions))).collect()
            };
        assert_eq!(flatten(&first), flatten(&second), "Bucketing twice is identical");
    }

    #[test]
    fn week_grid_keys_by_local_date_across_the_utc_day_boundary() {
        // UTC+9: a late-evening UTC instant is already the next local day.
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        let sessions = vec![session_at(1, "2030-06-01 23:30", "2030-06-02 00:00")];

        let buckets = week_grid(&sessions, date("2030-06-01"), &tz);

        assert!(buckets[0].sessions.is_empty());
        assert_eq!(ids(&buckets[1].sessions), vec![1], "Local date is 2030-06-02");
    }

    #[test]
    fn day_grid_uses_local_wall_clock_across_the_utc_day_boundary() {
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        let window = SlotWindow {
            start_hour: 8,
            end_hour: 10,
        };
        // 23:30 UTC on June 1st is 08:30 local on June 2nd.
        let sessions = vec![session_at(1, "2030-06-01 23:30", "2030-06-02 00:00")];

        let slots = day_grid(&sessions, date("2030-06-02"), window, &tz);

        assert_eq!(slots.len(), 4);
        assert_eq!(ids(&slots[1].sessions), vec![1], "08:30 slot");
        assert!(day_grid(&sessions, date("2030-06-01"), window, &tz)
            .iter()
            .all(|s| s.sessions.is_empty()));
    }

    #[test]
    fn month_grid_is_a_sunday_start_42_cell_window() {
        // June 2024: the 1st is a Saturday, so the grid starts Sunday May 26.
        let sessions = vec![
            session_at(1, "2024-06-01 10:00", "2024-06-01 10:30"),
            session_at(2, "2024-06-15 12:00", "2024-06-15 12:30"),
        ];

        let cells = month_grid(&sessions, 2024, 6, &Utc).expect("valid month");

        assert_eq!(cells.len(), 42);
        assert_eq!(cells[0].date, date("2024-05-26"));
        assert!(!cells[0].in_month);
        assert_eq!(cells[6].date, date("2024-06-01"));
        assert!(cells[6].in_month);
        assert_eq!(ids(&cells[6].sessions), vec![1]);
        assert_eq!(ids(&cells[20].sessions), vec![2]);
        assert!(!cells[41].in_month, "Trailing July days pad the grid");

        assert!(month_grid(&sessions, 2024, 13, &Utc).is_none());
    }

    #[test]
    fn month_grid_collects_every_session_of_a_day() {
        let sessions: Vec<Session> = (0..5)
            .map(|i| {
                session_at(
                    i + 1,
                    &format!("2024-06-15 {:02}:00", 10 + i),
                    &format!("2024-06-15 {:02}:30", 10 + i),
                )
            })
            .collect();

        let cells = month_grid(&sessions, 2024, 6, &Utc).expect("valid month");

        assert_eq!(
            cells[20].sessions.len(),
            5,
            "The grid itself is uncapped; the preview cap is applied at render time"
        );
    }

    /// Models the US 2024 spring-forward: UTC-5 before 2024-03-10 07:00 UTC,
    /// UTC-4 after. Enough of a time zone to exercise bucketing across the
    /// transition.
    #[derive(Clone, Copy, Debug)]
    struct SpringForwardTz;

    impl SpringForwardTz {
        fn cutoff() -> NaiveDateTime {
            NaiveDate::from_ymd_opt(2024, 3, 10)
                .unwrap()
                .and_hms_opt(7, 0, 0)
                .unwrap()
        }

        fn standard() -> FixedOffset {
            FixedOffset::west_opt(5 * 3600).unwrap()
        }

        fn daylight() -> FixedOffset {
            FixedOffset::west_opt(4 * 3600).unwrap()
        }
    }

    impl TimeZone for SpringForwardTz {
        type Offset = FixedOffset;

        fn from_offset(_offset: &FixedOffset) -> Self {
            SpringForwardTz
        }

        fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
            LocalResult::Single(self.offset_from_utc_date(local))
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            LocalResult::Single(self.offset_from_utc_datetime(&(*local + Duration::hours(5))))
        }

        fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
            self.offset_from_utc_datetime(&utc.and_time(NaiveTime::MIN))
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            if *utc < Self::cutoff() {
                Self::standard()
            } else {
                Self::daylight()
            }
        }
    }

    #[test]
    fn week_grid_keys_by_local_date_across_a_dst_transition() {
        let sessions = vec![
            // 00:30 local, still standard time
            session_at(1, "2024-03-10 05:30", "2024-03-10 06:00"),
            // 23:30 local on the 10th: daylight offset pulls a UTC instant
            // from the 11th back onto the transition day
            session_at(2, "2024-03-11 03:30", "2024-03-11 04:00"),
            // 01:30 local on the 11th
            session_at(3, "2024-03-11 05:30", "2024-03-11 06:00"),
        ];

        let buckets = week_grid(&sessions, date("2024-03-10"), &SpringForwardTz);

        assert_eq!(ids(&buckets[0].sessions), vec![1, 2]);
        assert_eq!(ids(&buckets[1].sessions), vec![3]);
    }

    #[test]
    fn day_grid_applies_the_post_transition_offset() {
        // 15:15 UTC on the transition day is 11:15 local (UTC-4); under the
        // pre-transition offset it would have been 10:15.
        let sessions = vec![session_at(1, "2024-03-10 15:15", "2024-03-10 15:45")];

        let slots = day_grid(
            &sessions,
            date("2024-03-10"),
            SlotWindow::default(),
            &SpringForwardTz,
        );

        assert_eq!(ids(&slots[2].sessions), vec![1], "11:00 slot, not 10:00");
        assert!(slots[0].sessions.is_empty());
    }
}
