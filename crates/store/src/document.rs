//! Persisted document shape and key derivation.

use serde::{Deserialize, Serialize};

use emdr_core::types::UploadKey;

/// One fresh rowset, as written to the document store.
///
/// Field names match what existing readers of the bucket expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDocument {
    pub region: i64,
    #[serde(rename = "ItemID")]
    pub item_id: i64,
    /// Unix seconds at which the relay extracted the rowset.
    #[serde(rename = "InsertTime")]
    pub insert_time: i64,
    #[serde(rename = "UploadKeys")]
    pub upload_keys: Vec<UploadKey>,
    #[serde(rename = "resultType")]
    pub result_type: String,
}

/// Composite key `"{region}-{type}-{result_type}"`.
///
/// One document per key: a newer rowset for the same region, item, and
/// result type replaces the older one.
pub fn document_key(region_id: i64, type_id: i64, result_type: &str) -> String {
    format!("{region_id}-{type_id}-{result_type}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_key_format() {
        assert_eq!(document_key(10000210, 34, "history"), "10000210-34-history");
        assert_eq!(document_key(10000002, 587, "orders"), "10000002-587-orders");
    }

    #[test]
    fn test_document_json_field_names() {
        let doc = MarketDocument {
            region: 10000002,
            item_id: 34,
            insert_time: 1_700_000_000,
            upload_keys: vec![UploadKey {
                name: "emk".into(),
                key: "abc".into(),
            }],
            result_type: "orders".into(),
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["region"], 10000002);
        assert_eq!(json["ItemID"], 34);
        assert_eq!(json["InsertTime"], 1_700_000_000i64);
        assert_eq!(json["UploadKeys"][0]["name"], "emk");
        assert_eq!(json["resultType"], "orders");
    }
}
