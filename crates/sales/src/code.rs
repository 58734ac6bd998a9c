//! Daily sale codes: `PREFIX-YYYYMMDD-NNNN`.
//!
//! The date part and the sequence are both scoped to the *business* calendar
//! day, which is derived from a fixed UTC offset rather than from UTC.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use kasir_core::{DomainError, DomainResult, ValueObject};

use crate::error::SaleError;
use crate::ledger::SaleLedger;

const DATE_FORMAT: &str = "%Y%m%d";

/// Human-readable sale code, unique among all sales.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SaleCode {
    prefix: String,
    date: NaiveDate,
    sequence: u64,
}

impl SaleCode {
    pub fn new(prefix: impl Into<String>, date: NaiveDate, sequence: u64) -> DomainResult<Self> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        if sequence == 0 {
            return Err(DomainError::validation("sale code sequence starts at 1"));
        }
        Ok(Self {
            prefix,
            date,
            sequence,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl ValueObject for SaleCode {}

impl fmt::Display for SaleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{:04}",
            self.prefix,
            self.date.format(DATE_FORMAT),
            self.sequence
        )
    }
}

impl FromStr for SaleCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || DomainError::validation(format!("malformed sale code: {s:?}"));

        let mut parts = s.rsplitn(3, '-');
        let (Some(seq), Some(date), Some(prefix)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };

        if seq.len() < 4 || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        if date.len() != 8 {
            return Err(malformed());
        }
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| malformed())?;
        let sequence = seq.parse::<u64>().map_err(|_| malformed())?;

        SaleCode::new(prefix, date, sequence)
    }
}

impl TryFrom<String> for SaleCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SaleCode> for String {
    fn from(value: SaleCode) -> Self {
        value.to_string()
    }
}

fn validate_prefix(prefix: &str) -> DomainResult<()> {
    if prefix.is_empty() {
        return Err(DomainError::validation("sale code prefix cannot be empty"));
    }
    if !prefix.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(DomainError::validation(format!(
            "sale code prefix must be ASCII alphanumeric, got {prefix:?}"
        )));
    }
    Ok(())
}

/// Half-open UTC window `[start, end)` covering one business day.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DayBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayBounds {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Maps instants onto business-local calendar days.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BusinessCalendar {
    offset: FixedOffset,
}

impl BusinessCalendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// The business-local date `instant` falls on.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// UTC bounds of the business day `date`.
    pub fn day_bounds(&self, date: NaiveDate) -> DayBounds {
        let local_midnight = date.and_time(NaiveTime::MIN);
        let utc_midnight =
            local_midnight - TimeDelta::seconds(i64::from(self.offset.local_minus_utc()));
        let start = Utc.from_utc_datetime(&utc_midnight);
        DayBounds {
            start,
            end: start + TimeDelta::days(1),
        }
    }
}

/// Derives the next sale code for the business day of a given instant.
///
/// The sequence is `count + 1` where `count` is the number of sales already
/// recorded for that day. Two concurrent callers can observe the same count;
/// the ledger's unique constraint on `code` turns the loser into a retryable
/// conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeGenerator {
    prefix: String,
    calendar: BusinessCalendar,
}

impl CodeGenerator {
    pub fn new(prefix: impl Into<String>, calendar: BusinessCalendar) -> DomainResult<Self> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        Ok(Self { prefix, calendar })
    }

    pub fn calendar(&self) -> BusinessCalendar {
        self.calendar
    }

    pub async fn generate<L>(&self, ledger: &mut L, now: DateTime<Utc>) -> Result<SaleCode, SaleError>
    where
        L: SaleLedger + ?Sized,
    {
        let date = self.calendar.local_date(now);
        let bounds = self.calendar.day_bounds(date);

        let existing = ledger
            .count_sales_between(bounds.start, bounds.end)
            .await
            .map_err(SaleError::GenerationFailed)?;

        let code = SaleCode {
            prefix: self.prefix.clone(),
            date,
            sequence: existing + 1,
        };
        debug!(%code, existing, "generated sale code");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kasir_core::{ItemId, Money, SaleId, SaleLineId, StoreError, StoreResult};
    use proptest::prelude::*;

    fn wib() -> BusinessCalendar {
        BusinessCalendar::new(FixedOffset::east_opt(7 * 3600).unwrap())
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    /// Ledger that only answers counts from a fixed list of timestamps.
    struct CountingLedger {
        timestamps: Vec<DateTime<Utc>>,
        fail: bool,
    }

    #[async_trait]
    impl SaleLedger for CountingLedger {
        async fn count_sales_between(
            &mut self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> StoreResult<u64> {
            if self.fail {
                return Err(StoreError::unavailable("ledger offline"));
            }
            Ok(self
                .timestamps
                .iter()
                .filter(|t| start <= **t && **t < end)
                .count() as u64)
        }

        async fn insert_sale_header(
            &mut self,
            _code: &SaleCode,
            _total: Money,
            _created_at: DateTime<Utc>,
        ) -> StoreResult<SaleId> {
            unreachable!("code generation never writes")
        }

        async fn update_sale_total(&mut self, _sale_id: SaleId, _total: Money) -> StoreResult<()> {
            unreachable!("code generation never writes")
        }

        async fn insert_sale_line(
            &mut self,
            _sale_id: SaleId,
            _item_id: ItemId,
            _quantity: i64,
            _subtotal: Money,
        ) -> StoreResult<SaleLineId> {
            unreachable!("code generation never writes")
        }
    }

    #[test]
    fn formats_with_padded_sequence() {
        let code = SaleCode::new("MP", date(2026, 10, 14), 1).unwrap();
        assert_eq!(code.to_string(), "MP-20261014-0001");

        let wide = SaleCode::new("MP", date(2026, 10, 14), 12_345).unwrap();
        assert_eq!(wide.to_string(), "MP-20261014-12345");
    }

    #[test]
    fn parses_its_own_format() {
        let code: SaleCode = "MP-20261014-0042".parse().unwrap();
        assert_eq!(code.prefix(), "MP");
        assert_eq!(code.date(), date(2026, 10, 14));
        assert_eq!(code.sequence(), 42);
    }

    #[test]
    fn rejects_malformed_codes() {
        for bad in [
            "",
            "MP",
            "MP-20261014",
            "MP-20261014-42",
            "MP-2026104-0001",
            "MP-20261341-0001",
            "-20261014-0001",
            "M-P-20261014-0001",
            "MP-20261014-0000",
        ] {
            assert!(bad.parse::<SaleCode>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn rejects_bad_prefixes() {
        let cal = wib();
        assert!(CodeGenerator::new("", cal).is_err());
        assert!(CodeGenerator::new("M P", cal).is_err());
        assert!(CodeGenerator::new("MP-1", cal).is_err());
        assert!(CodeGenerator::new("MP", cal).is_ok());
    }

    #[test]
    fn serde_uses_display_form() {
        let code = SaleCode::new("MP", date(2026, 1, 2), 7).unwrap();
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"MP-20260102-0007\"");
        assert!(serde_json::from_str::<SaleCode>("\"nope\"").is_err());
    }

    #[test]
    fn business_day_follows_offset() {
        let cal = wib();
        // 18:00 UTC is already 01:00 the next day at UTC+7.
        assert_eq!(cal.local_date(at("2026-10-14T18:00:00Z")), date(2026, 10, 15));
        assert_eq!(cal.local_date(at("2026-10-14T16:59:59Z")), date(2026, 10, 14));

        let bounds = cal.day_bounds(date(2026, 10, 15));
        assert_eq!(bounds.start, at("2026-10-14T17:00:00Z"));
        assert_eq!(bounds.end, at("2026-10-15T17:00:00Z"));
        assert!(bounds.contains(at("2026-10-14T17:00:00Z")));
        assert!(!bounds.contains(at("2026-10-15T17:00:00Z")));
    }

    #[tokio::test]
    async fn first_sale_of_day_is_0001() {
        let generator = CodeGenerator::new("MP", wib()).unwrap();
        let mut ledger = CountingLedger {
            timestamps: vec![at("2026-10-13T10:00:00Z")],
            fail: false,
        };
        let code = generator
            .generate(&mut ledger, at("2026-10-14T03:00:00Z"))
            .await
            .unwrap();
        assert_eq!(code.to_string(), "MP-20261014-0001");
    }

    #[tokio::test]
    async fn sequence_counts_only_same_business_day() {
        let generator = CodeGenerator::new("MP", wib()).unwrap();
        let mut ledger = CountingLedger {
            timestamps: vec![
                at("2026-10-13T16:59:59Z"), // previous business day
                at("2026-10-13T17:00:00Z"),
                at("2026-10-14T09:30:00Z"),
                at("2026-10-14T17:00:00Z"), // next business day
            ],
            fail: false,
        };
        let code = generator
            .generate(&mut ledger, at("2026-10-14T12:00:00Z"))
            .await
            .unwrap();
        assert_eq!(code.to_string(), "MP-20261014-0003");
    }

    #[tokio::test]
    async fn ledger_failure_is_generation_failure() {
        let generator = CodeGenerator::new("MP", wib()).unwrap();
        let mut ledger = CountingLedger {
            timestamps: vec![],
            fail: true,
        };
        let err = generator
            .generate(&mut ledger, at("2026-10-14T12:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, SaleError::GenerationFailed(StoreError::Unavailable(_))));
    }

    proptest! {
        #[test]
        fn every_instant_lies_inside_its_own_day(
            secs in 0i64..4_102_444_800,
            offset_hours in -12i32..=14,
        ) {
            let cal = BusinessCalendar::new(FixedOffset::east_opt(offset_hours * 3600).unwrap());
            let instant = DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
            let bounds = cal.day_bounds(cal.local_date(instant));
            prop_assert!(bounds.contains(instant));
            prop_assert_eq!(cal.local_date(bounds.start), cal.local_date(instant));
        }
    }
}
