use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc};
use munlink_api::{
    auth::guard::{age_on, blocks_self_transaction, is_same_municipality},
    services::marketplace::{pickup::ensure_lead_time, Page},
};
use proptest::prelude::*;
use uuid::Uuid;

fn any_date() -> impl Strategy<Value = NaiveDate> {
    (1900i32..2100, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn any_uuid() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

proptest! {
    #[test]
    fn age_is_never_negative_and_grows_on_birthdays(dob in any_date(), years in 0i32..120) {
        let birthday = NaiveDate::from_ymd_opt(dob.year() + years, dob.month(), dob.day()).unwrap();
        prop_assert_eq!(age_on(dob, birthday), years as u32);
        if let Some(eve) = birthday.pred_opt() {
            prop_assert_eq!(age_on(dob, eve), (years - 1).max(0) as u32);
        }
    }

    #[test]
    fn age_before_birth_is_zero(dob in any_date(), days in 1i64..10_000) {
        let earlier = dob - Duration::days(days);
        prop_assert_eq!(age_on(dob, earlier), 0);
    }

    #[test]
    fn municipality_match_needs_two_equal_ids(a in proptest::option::of(any_uuid()), b in proptest::option::of(any_uuid())) {
        let expected = matches!((a, b), (Some(x), Some(y)) if x == y);
        prop_assert_eq!(is_same_municipality(a, b), expected);
        prop_assert_eq!(is_same_municipality(a, b), is_same_municipality(b, a));
        prop_assert!(!is_same_municipality(None, a));
    }

    #[test]
    fn self_transaction_only_when_ids_match(a in any_uuid(), b in any_uuid()) {
        prop_assert!(blocks_self_transaction(a, a));
        prop_assert_eq!(blocks_self_transaction(a, b), a == b);
    }

    #[test]
    fn lead_time_boundary_is_exclusive(lead in 0i64..1440, offset_secs in -7200i64..7200) {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let pickup = now + Duration::minutes(lead) + Duration::seconds(offset_secs);
        let result = ensure_lead_time(pickup, now, lead);
        prop_assert_eq!(result.is_ok(), offset_secs > 0);
    }

    #[test]
    fn page_count_covers_every_row(total in 0u64..10_000, per_page in 1u64..200) {
        let page: Page<()> = Page::new(Vec::new(), total, 1, per_page);
        prop_assert!(page.pages * per_page >= total);
        if total > 0 {
            prop_assert!((page.pages - 1) * per_page < total);
        } else {
            prop_assert_eq!(page.pages, 0);
        }
    }
}
