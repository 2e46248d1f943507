//! The `{ResponseCode, Failure, Result}` JSON envelope every Ingest-HTTP
//! handler responds with.
use hyper::{Body, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
struct ApiResponse {
	#[serde(rename = "ResponseCode")]
	response_code: u8,
	#[serde(rename = "Failure", skip_serializing_if = "Option::is_none")]
	failure: Option<String>,
	#[serde(rename = "Result", skip_serializing_if = "Option::is_none")]
	result: Option<Value>,
}

pub fn success(result: impl Serialize) -> Response<Body> {
	let body = ApiResponse {
		response_code: 1,
		failure: None,
		result: Some(serde_json::to_value(result).unwrap_or(Value::Null)),
	};
	json_response(StatusCode::OK, &body)
}

pub fn success_empty() -> Response<Body> {
	let body = ApiResponse {
		response_code: 1,
		failure: None,
		result: None,
	};
	json_response(StatusCode::OK, &body)
}

pub fn failure(status: StatusCode, message: impl Into<String>) -> Response<Body> {
	let body = ApiResponse {
		response_code: 0,
		failure: Some(message.into()),
		result: None,
	};
	json_response(status, &body)
}

fn json_response(status: StatusCode, body: &ApiResponse) -> Response<Body> {
	let bytes = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
	Response::builder()
		.status(status)
		.header("content-type", "application/json")
		.body(Body::from(bytes))
		.expect("building a response from a fixed header set cannot fail")
}
