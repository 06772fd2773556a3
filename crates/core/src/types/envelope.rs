//! EMDR envelope types.
//!
//! An [`Envelope`] is the JSON document carried (zlib-compressed) inside every
//! message published on the EMDR network. It groups one or more [`Rowset`]s,
//! each scoped to a `(region, type)` pair and stamped with the time the
//! uploader generated it.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Kind of data carried by an envelope (`"orders"` or `"history"` on the
/// public network). Kept as a free-form string so unknown kinds still parse.
pub type ResultType = String;

/// Decoded EMDR market data envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Result-type tag, e.g. `orders` or `history`.
    pub result_type: ResultType,
    /// Protocol version string.
    #[serde(default)]
    pub version: String,
    /// Credentials the uploader attached to the message.
    #[serde(default)]
    pub upload_keys: Vec<UploadKey>,
    /// Software that produced the envelope.
    #[serde(default)]
    pub generator: Generator,
    /// Time the envelope was assembled by the uploader.
    #[serde(default)]
    pub current_time: Option<DateTime<FixedOffset>>,
    /// Column names for the positional rows.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Row groups, one per `(region, type)`.
    #[serde(default)]
    pub rowsets: Vec<Rowset>,
}

/// A named upload credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadKey {
    pub name: String,
    pub key: String,
}

/// Identity of the uploading software.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generator {
    pub name: String,
    pub version: String,
}

/// Rows for one region and item type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rowset {
    /// When the uploader captured this rowset.
    #[serde(rename = "generatedAt")]
    pub generated_at: DateTime<FixedOffset>,
    /// Region identifier.
    #[serde(rename = "regionID")]
    pub region_id: i64,
    /// Item type identifier.
    #[serde(rename = "typeID")]
    pub type_id: i64,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Rowset {
    /// Returns `true` if the rowset was generated at or after `cutoff`.
    pub fn is_fresh(&self, cutoff: DateTime<Utc>) -> bool {
        self.generated_at.with_timezone(&Utc) >= cutoff
    }
}

/// A positional data row. Order rows carry 11 fields, history rows 6.
///
/// Rows that match neither shape are kept as raw JSON so one odd row does
/// not invalidate the rest of the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Row {
    Order(OrderRow),
    History(HistoryRow),
    Other(serde_json::Value),
}

/// One market order, serialized as an 11-element JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRow {
    pub price: f64,
    pub vol_remaining: i64,
    pub range: i64,
    pub order_id: i64,
    pub vol_entered: i64,
    pub min_volume: i64,
    pub bid: bool,
    pub issue_date: DateTime<FixedOffset>,
    pub duration: i64,
    pub station_id: i64,
    /// Null when the uploader could not resolve the solar system.
    pub solar_system_id: Option<i64>,
}

/// One day of price history, serialized as a 6-element JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub date: DateTime<FixedOffset>,
    pub orders: i64,
    pub quantity: i64,
    pub low: f64,
    pub high: f64,
    pub average: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ORDERS_JSON: &str = r#"{
        "resultType": "orders",
        "version": "0.1",
        "uploadKeys": [{"name": "emk", "key": "abc"}, {"name": "ec", "key": "def"}],
        "generator": {"name": "Yapeal", "version": "11.335.1737"},
        "currentTime": "2011-10-22T15:46:00+00:00",
        "columns": ["price","volRemaining","range","orderID","volEntered","minVolume","bid","issueDate","duration","stationID","solarSystemID"],
        "rowsets": [{
            "generatedAt": "2011-10-22T15:43:00+00:00",
            "regionID": 10000065,
            "typeID": 11134,
            "rows": [
                [8999, 1, 32767, 2363806077, 1, 1, false, "2011-12-03T08:10:59+00:00", 90, 60008692, 30005038],
                [11499.99, 10, 32767, 2363915657, 10, 1, false, "2011-12-03T10:53:26+00:00", 90, 60006970, null]
            ]
        }]
    }"#;

    const HISTORY_JSON: &str = r#"{
        "resultType": "history",
        "version": "0.1",
        "uploadKeys": [],
        "generator": {"name": "Yapeal", "version": "11.335.1737"},
        "currentTime": "2011-10-22T15:46:00+00:00",
        "columns": ["date","orders","quantity","low","high","average"],
        "rowsets": [{
            "generatedAt": "2011-10-22T15:42:00+00:00",
            "regionID": 10000065,
            "typeID": 11134,
            "rows": [["2011-12-03T00:00:00+00:00", 40, 40, 1999, 499999.99, 35223.50]]
        }]
    }"#;

    #[test]
    fn test_parse_orders_envelope() {
        let env: Envelope = serde_json::from_str(ORDERS_JSON).expect("parse orders");
        assert_eq!(env.result_type, "orders");
        assert_eq!(env.upload_keys.len(), 2);
        assert_eq!(env.upload_keys[0].name, "emk");
        assert_eq!(env.generator.name, "Yapeal");
        assert_eq!(env.columns.len(), 11);
        assert_eq!(env.rowsets.len(), 1);

        let rowset = &env.rowsets[0];
        assert_eq!(rowset.region_id, 10000065);
        assert_eq!(rowset.type_id, 11134);
        assert_eq!(rowset.rows.len(), 2);
        match &rowset.rows[1] {
            Row::Order(row) => {
                assert_eq!(row.order_id, 2363915657);
                assert!(!row.bid);
                assert_eq!(row.solar_system_id, None);
            }
            other => panic!("expected order row, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_history_envelope() {
        let env: Envelope = serde_json::from_str(HISTORY_JSON).expect("parse history");
        assert_eq!(env.result_type, "history");
        match &env.rowsets[0].rows[0] {
            Row::History(row) => {
                assert_eq!(row.orders, 40);
                assert_eq!(row.low, 1999.0);
            }
            other => panic!("expected history row, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let env: Envelope = serde_json::from_str(r#"{"resultType": "orders"}"#).unwrap();
        assert!(env.upload_keys.is_empty());
        assert!(env.rowsets.is_empty());
        assert!(env.current_time.is_none());
    }

    #[test]
    fn test_missing_result_type_is_rejected() {
        assert!(serde_json::from_str::<Envelope>(r#"{"rowsets": []}"#).is_err());
    }

    #[test]
    fn test_malformed_row_is_kept_raw() {
        let json = r#"{
            "resultType": "orders",
            "rowsets": [{
                "generatedAt": "2011-10-22T15:43:00+00:00",
                "regionID": 10000065,
                "typeID": 11134,
                "rows": [[8999, 1, 32767, 2363806077, 1, 1, false, "2011-12-03T08:10:59+00:00", 90, null, 30005038]]
            }]
        }"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        let rowset = &env.rowsets[0];
        assert_eq!(rowset.region_id, 10000065);
        match &rowset.rows[0] {
            Row::Other(value) => assert_eq!(value.as_array().map(Vec::len), Some(11)),
            other => panic!("expected raw row, got {other:?}"),
        }
    }

    #[test]
    fn test_rowset_freshness_is_inclusive() {
        let generated = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let rowset = Rowset {
            generated_at: generated.fixed_offset(),
            region_id: 1,
            type_id: 2,
            rows: Vec::new(),
        };
        assert!(rowset.is_fresh(generated));
        assert!(!rowset.is_fresh(generated + chrono::Duration::seconds(1)));
    }
}
