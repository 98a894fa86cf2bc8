//! Library unit tests

#[cfg(test)]
mod types_tests {
    use crate::types::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_resource_ids_are_unique() {
        let now = Utc::now();
        let a = Resource::new("acc", "", now);
        let b = Resource::new("acc", "", now);
        assert_ne!(a.id, b.id);
        assert_eq!(a.date_created, a.date_modified);
    }

    #[test]
    fn test_manual_clock() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), start + Duration::seconds(90));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_filter_macro() {
        let f = crate::filter!("owner" => "alice", "builtin" => true);
        assert_eq!(f.len(), 2);
        assert_eq!(f["builtin"], serde_json::Value::Bool(true));
        assert_eq!(Table::new("prod", "labels").to_string(), "prod.labels");
    }
}
