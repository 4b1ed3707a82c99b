//! Test fixtures: reproducible leads, businesses and clock values.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::lead::{dedup_key, Business, Lead, LeadStatus};

/// Wednesday 2025-03-05 at `hour`:00 UTC.
#[must_use]
pub fn wednesday(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 5, hour, 0, 0).unwrap()
}

/// Saturday 2025-03-08 at `hour`:00 UTC.
#[must_use]
pub fn saturday(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 8, hour, 0, 0).unwrap()
}

#[must_use]
pub fn local(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

/// An Austin business with a plausible address.
#[must_use]
pub fn business(name: &str, industry: &str) -> Business {
    let slug = name.to_lowercase().replace(' ', "");
    Business {
        provider_id: Some(format!("place-{}", slug)),
        name: name.to_string(),
        industry: industry.to_string(),
        address: Some("100 Congress Ave".to_string()),
        city: "Austin".to_string(),
        state: "TX".to_string(),
        phone: Some("512-555-0100".to_string()),
        email: Some(format!("office@{}.example.com", slug)),
        rating: Some(4.6),
        review_count: 38,
        has_website: false,
        website_url: None,
    }
}

/// The three Austin dentists used in pipeline scenarios.
#[must_use]
pub fn austin_dentists() -> Vec<Business> {
    vec![
        business("Smile Dental", "dentist"),
        business("Bright Teeth", "dentist"),
        business("Congress Family Dentistry", "dentist"),
    ]
}

/// A new, uncontacted lead not backed by a store.
#[must_use]
pub fn lead(name: &str, industry: &str) -> Lead {
    let b = business(name, industry);
    Lead {
        id: 1,
        dedup_key: dedup_key(b.provider_id.as_deref().unwrap_or(name), &b.city, &b.state),
        provider_id: b.provider_id,
        name: b.name,
        industry: b.industry,
        address: b.address,
        city: b.city,
        state: b.state,
        phone: b.phone,
        email: b.email,
        rating: b.rating,
        review_count: b.review_count,
        has_website: b.has_website,
        website_url: b.website_url,
        status: LeadStatus::New,
        created_at: wednesday(8),
        contacted_at: None,
        responded_at: None,
        converted_at: None,
        attempts: 0,
        last_error: None,
    }
}
