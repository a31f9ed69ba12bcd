use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One outbound request, serialized as a single CRLF-terminated JSON frame.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub id: i64,
    pub method: &'a str,
    pub params: &'a [Value],
}

impl Request<'_> {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        let mut frame = serde_json::to_string(self)?;
        frame.push_str("\r\n");
        Ok(frame)
    }
}

/// One inbound frame. The peer interleaves correlated results, error objects
/// and unsolicited `props` notifications on the same connection, so all
/// shapes share a single loosely-typed frame.
#[derive(Debug, Deserialize)]
pub struct Frame {
    pub id: Option<i64>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Vec<Value>>,
    pub error: Option<ErrorBody>,
}

impl Frame {
    pub fn parse(line: &str) -> Result<Frame, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn is_props_notification(&self) -> bool {
        self.method.as_deref() == Some("props")
    }
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
}

/// Partial property map carried by a `props` notification. Only the fields
/// present in the payload are applied.
#[derive(Debug, Default, Deserialize)]
pub struct PropsUpdate {
    pub name: Option<String>,
    pub power: Option<String>,
    pub bright: Option<u8>,
    pub color_mode: Option<u8>,
    pub rgb: Option<u32>,
    pub hue: Option<u16>,
    pub sat: Option<u8>,
    pub ct: Option<u16>,
}

impl PropsUpdate {
    pub fn from_params(params: Value) -> Result<PropsUpdate, serde_json::Error> {
        serde_json::from_value(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn request_serializes_to_one_crlf_terminated_frame() {
        let params = [json!(50), json!("smooth"), json!(200)];
        let request = Request {
            id: 7,
            method: "set_bright",
            params: &params,
        };

        assert_eq!(
            request.to_frame().unwrap(),
            "{\"id\":7,\"method\":\"set_bright\",\"params\":[50,\"smooth\",200]}\r\n"
        );
    }

    #[test]
    fn parses_a_correlated_result() {
        let frame = Frame::parse(r#"{"id":1,"result":["ok"]}"#).unwrap();

        assert_eq!(frame.id, Some(1));
        assert_eq!(frame.result, Some(vec![json!("ok")]));
        assert!(frame.error.is_none());
        assert!(!frame.is_props_notification());
    }

    #[test]
    fn parses_a_correlated_error() {
        let frame = Frame::parse(r#"{"id":2,"error":{"code":-1,"message":"general error"}}"#).unwrap();

        assert_eq!(frame.id, Some(2));
        let error = frame.error.unwrap();
        assert_eq!(error.code, -1);
        assert_eq!(error.message, "general error");
    }

    #[test]
    fn parses_a_partial_props_notification() {
        let frame = Frame::parse(r#"{"method":"props","params":{"power":"off"}}"#).unwrap();
        assert!(frame.is_props_notification());

        let props = PropsUpdate::from_params(frame.params.unwrap()).unwrap();
        assert_eq!(props.power.as_deref(), Some("off"));
        assert_eq!(props.bright, None);
        assert_eq!(props.rgb, None);
        assert_eq!(props.ct, None);
    }

    #[test]
    fn parses_a_full_props_notification() {
        let frame = Frame::parse(
            r#"{"method":"props","params":{"power":"on","bright":80,"color_mode":2,"ct":4000,"rgb":16711935,"hue":300,"sat":100,"name":"desk"}}"#,
        )
        .unwrap();

        let props = PropsUpdate::from_params(frame.params.unwrap()).unwrap();
        assert_eq!(props.bright, Some(80));
        assert_eq!(props.color_mode, Some(2));
        assert_eq!(props.ct, Some(4000));
        assert_eq!(props.rgb, Some(0xff00ff));
        assert_eq!(props.name.as_deref(), Some("desk"));
    }

    #[test]
    fn rejects_non_json_frames() {
        assert!(Frame::parse("NOTIFY * HTTP/1.1").is_err());
        assert!(Frame::parse("").is_err());
    }
}
