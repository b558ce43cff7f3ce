//! Queue API wire types.
//!
//! Field names match the external API exactly; the rest of the daemon works
//! with [`DeliveryItem`] and never sees these.

use message_delivery_worker::DeliveryItem;
use serde::{Deserialize, Deserializer, Serialize};

/// Login request body for `POST /v1/auth/generate-token`.
#[derive(Debug, Serialize)]
pub struct GenerateTokenRequest {
    pub email: String,
    pub password: String,
    pub device_name: String,
}

/// Login response body.
#[derive(Debug, Deserialize)]
pub struct GenerateTokenResponse {
    #[serde(default)]
    pub token: Option<String>,
}

/// One pending message as the queue API serializes it.
#[derive(Debug, Clone, Deserialize)]
pub struct WireItem {
    #[serde(rename = "id_proveedor_envio_sms", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "numero_destino")]
    pub destination: String,
    #[serde(rename = "mensaje")]
    pub body: String,
}

impl From<WireItem> for DeliveryItem {
    fn from(item: WireItem) -> Self {
        DeliveryItem {
            id: item.id,
            destination: item.destination,
            body: item.body,
        }
    }
}

/// The API serializes ids as strings or bare numbers depending on the
/// endpoint version; accept both.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(i64),
    }

    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
    })
}

/// The `data` field arrives as an array, a bare object, or not at all.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    Many(Vec<WireItem>),
    One(WireItem),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<WireItem> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

/// Response body for `GET /v1/gateway/sms/supplier/pending-messages`.
#[derive(Debug, Deserialize)]
pub struct PendingMessagesResponse {
    #[serde(rename = "type")]
    pub response_type: String,
    #[serde(default)]
    pub data: Option<OneOrMany>,
}

/// Request body for `POST /v1/gateway/sms/supplier/confirm-sent-message`.
#[derive(Debug, Serialize)]
pub struct ConfirmRequest {
    pub id_proveedor_envio_sms: String,
    pub estado_envio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mensaje_error: Option<String>,
}

/// Response body for the confirm endpoint.
#[derive(Debug, Deserialize)]
pub struct ConfirmResponse {
    #[serde(rename = "type")]
    pub response_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_item_uses_external_field_names() {
        let json = r#"{
            "id_proveedor_envio_sms": "abc-123",
            "numero_destino": "59170012345",
            "mensaje": "hola"
        }"#;
        let item: WireItem = serde_json::from_str(json).unwrap();

        assert_eq!(item.id, "abc-123");
        assert_eq!(item.destination, "59170012345");
        assert_eq!(item.body, "hola");
    }

    #[test]
    fn wire_item_accepts_numeric_id() {
        let json = r#"{
            "id_proveedor_envio_sms": 42,
            "numero_destino": "59170012345",
            "mensaje": "hola"
        }"#;
        let item: WireItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.id, "42");
    }

    #[test]
    fn pending_response_accepts_array() {
        let json = r#"{"type":"success","data":[
            {"id_proveedor_envio_sms":"a","numero_destino":"59170012345","mensaje":"x"},
            {"id_proveedor_envio_sms":"b","numero_destino":"59171112222","mensaje":"y"}
        ]}"#;
        let response: PendingMessagesResponse = serde_json::from_str(json).unwrap();

        assert_eq!(response.response_type, "success");
        assert_eq!(response.data.unwrap().into_vec().len(), 2);
    }

    #[test]
    fn pending_response_accepts_bare_object() {
        let json = r#"{"type":"success","data":
            {"id_proveedor_envio_sms":"a","numero_destino":"59170012345","mensaje":"x"}
        }"#;
        let response: PendingMessagesResponse = serde_json::from_str(json).unwrap();

        let items = response.data.unwrap().into_vec();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "a");
    }

    #[test]
    fn pending_response_accepts_missing_data() {
        let json = r#"{"type":"error"}"#;
        let response: PendingMessagesResponse = serde_json::from_str(json).unwrap();

        assert_eq!(response.response_type, "error");
        assert!(response.data.is_none());
    }

    #[test]
    fn confirm_request_omits_absent_error_text() {
        let request = ConfirmRequest {
            id_proveedor_envio_sms: "abc".to_string(),
            estado_envio: "COMPLETADO".to_string(),
            mensaje_error: None,
        };
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains("\"estado_envio\":\"COMPLETADO\""));
        assert!(!json.contains("mensaje_error"));
    }

    #[test]
    fn confirm_request_carries_error_text() {
        let request = ConfirmRequest {
            id_proveedor_envio_sms: "abc".to_string(),
            estado_envio: "ERROR".to_string(),
            mensaje_error: Some("send timed out".to_string()),
        };
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains("\"estado_envio\":\"ERROR\""));
        assert!(json.contains("\"mensaje_error\":\"send timed out\""));
    }
}
