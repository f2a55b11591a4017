use deal_rebalancer::error::ThesisError;
use deal_rebalancer::thesis::{ThesisClient, ThesisClientConfig};
use deal_rebalancer::Sector;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAYLOAD: &str = r#"```json
{"amount_millions": 4, "desired_sectors": {"Retail": 3, "Financial": 1}, "overview": "High street"}
```"#;

fn client(max_attempts: u32) -> ThesisClient {
    ThesisClient::new(ThesisClientConfig {
        max_attempts,
        retry_base_delay_ms: 10,
        ..ThesisClientConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn retries_after_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/thesis"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/thesis"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAYLOAD))
        .expect(1)
        .mount(&server)
        .await;

    let thesis = client(3)
        .fetch(&format!("{}/thesis", server.uri()))
        .await
        .unwrap();
    assert_eq!(thesis.budget(), 4_000_000.0);
    assert!((thesis.desired_sectors[&Sector::Retail] - 0.75).abs() < 1e-12);
}

#[tokio::test]
async fn quota_messages_count_as_rate_limits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Resource has been exhausted (e.g. check quota)."))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAYLOAD))
        .mount(&server)
        .await;

    let thesis = client(2).fetch(&server.uri()).await.unwrap();
    assert_eq!(thesis.overview, "High street");
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let err = client(2).fetch(&server.uri()).await.unwrap_err();
    assert!(matches!(err, ThesisError::RateLimited { attempts: 2 }));
}

#[tokio::test]
async fn other_failures_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such thesis"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(3).fetch(&server.uri()).await.unwrap_err();
    match err {
        ThesisError::Http { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, "no such thesis");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn sends_the_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("X-API-Key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAYLOAD))
        .expect(1)
        .mount(&server)
        .await;

    let client = ThesisClient::new(ThesisClientConfig {
        api_key: Some("secret".into()),
        ..ThesisClientConfig::default()
    })
    .unwrap();
    client.fetch(&server.uri()).await.unwrap();
}
