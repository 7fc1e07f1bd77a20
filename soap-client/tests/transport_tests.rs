//! Integration tests for the HTTP transport.
//!
//! These run the transport against a local mock camera and check what is put on
//! the wire and how replies are classified.

use soap_client::{
    decode_subscribe_response, encode_subscribe, encode_unsubscribe, ns, Credentials,
    HttpTransport, SoapError, SoapReply, SoapTransport, UsernameToken, EVENT_SERVICE_PATH,
};
use std::time::Duration;

const SUBSCRIBE_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:wsnt="http://docs.oasis-open.org/wsn/b-2" xmlns:wsa="http://www.w3.org/2005/08/addressing">
    <env:Body>
        <wsnt:SubscribeResponse>
            <wsnt:SubscriptionReference>
                <wsa:Address>http://192.168.1.10:8000/onvif/Subscription?Idx=00_0</wsa:Address>
            </wsnt:SubscriptionReference>
            <wsnt:CurrentTime>2024-05-01T10:00:00Z</wsnt:CurrentTime>
            <wsnt:TerminationTime>2024-05-01T11:00:00Z</wsnt:TerminationTime>
        </wsnt:SubscribeResponse>
    </env:Body>
</env:Envelope>"#;

fn token() -> UsernameToken {
    UsernameToken::new(&Credentials::new("admin", "password"))
}

#[tokio::test]
async fn test_subscribe_round_trip() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", EVENT_SERVICE_PATH)
        .match_header("content-type", ns::SOAP_CONTENT_TYPE)
        .match_header("action", ns::SUBSCRIBE_ACTION)
        .match_body(mockito::Matcher::Regex("ConsumerReference".to_string()))
        .with_status(200)
        .with_header("content-type", "application/soap+xml; charset=utf-8")
        .with_body(SUBSCRIBE_RESPONSE)
        .create_async()
        .await;

    let transport = HttpTransport::new().unwrap();
    let request = encode_subscribe("http://10.0.0.2:8123/api/webhook/abc", Some(Duration::from_secs(3600)));
    let url = format!("{}{}", server.url(), EVENT_SERVICE_PATH);

    let response = transport
        .send(&url, request.action, request.envelope(&token()))
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    match decode_subscribe_response(response.status, &response.document) {
        SoapReply::Subscription(result) => {
            assert_eq!(result.manager_url, "/onvif/Subscription?Idx=00_0");
            assert_eq!(result.lease, Some(Duration::from_secs(3600)));
        }
        other => panic!("Expected subscription, got {other:?}"),
    }

    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_status_is_returned_not_raised() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", EVENT_SERVICE_PATH)
        .with_status(400)
        .with_header("content-type", "application/soap+xml")
        .with_body(
            r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Body><env:Fault><env:Code><env:Value>env:Sender</env:Value></env:Code><env:Reason><env:Text>Not Authorized</env:Text></env:Reason></env:Fault></env:Body></env:Envelope>"#,
        )
        .create_async()
        .await;

    let transport = HttpTransport::new().unwrap();
    let request = encode_unsubscribe("http://cam/onvif/Subscription?Idx=00_0");
    let url = format!("{}{}", server.url(), EVENT_SERVICE_PATH);

    let response = transport
        .send(&url, request.action, request.envelope(&token()))
        .await
        .unwrap();
    assert_eq!(response.status, 400);
    match decode_subscribe_response(response.status, &response.document) {
        SoapReply::Fault(fault) => assert_eq!(fault.reason.as_deref(), Some("Not Authorized")),
        other => panic!("Expected fault, got {other:?}"),
    }
}

#[tokio::test]
async fn test_html_reply_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", EVENT_SERVICE_PATH)
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html><body>Login</body></html>")
        .create_async()
        .await;

    let transport = HttpTransport::new().unwrap();
    let request = encode_unsubscribe("/onvif/Subscription?Idx=00_0");
    let url = format!("{}{}", server.url(), EVENT_SERVICE_PATH);

    let result = transport.send(&url, request.action, request.envelope(&token())).await;
    assert!(matches!(result, Err(SoapError::UnexpectedContentType(ct)) if ct == "text/html"));
}

#[tokio::test]
async fn test_malformed_xml_is_parse_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", EVENT_SERVICE_PATH)
        .with_status(200)
        .with_header("content-type", "application/soap+xml")
        .with_body("<env:Envelope><unclosed>")
        .create_async()
        .await;

    let transport = HttpTransport::new().unwrap();
    let request = encode_unsubscribe("/onvif/Subscription?Idx=00_0");
    let url = format!("{}{}", server.url(), EVENT_SERVICE_PATH);

    let result = transport.send(&url, request.action, request.envelope(&token())).await;
    assert!(matches!(result, Err(SoapError::Parse(_))));
}

#[tokio::test]
async fn test_refused_connection_is_no_answer() {
    let transport = HttpTransport::with_timeouts(Duration::from_millis(500), Duration::from_secs(1)).unwrap();
    let request = encode_unsubscribe("/onvif/Subscription?Idx=00_0");

    let result = transport
        .send("http://127.0.0.1:1/onvif/event_service", request.action, request.envelope(&token()))
        .await;
    match result {
        Err(err) => assert!(err.is_no_answer(), "unexpected error {err:?}"),
        Ok(_) => panic!("Expected a network error"),
    }
}
