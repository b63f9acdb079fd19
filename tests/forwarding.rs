//! End-to-end forwarding tests against a mock REST upstream.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::StatusCode;
use http_body_util::StreamBody;
use hyper::body::Frame;

mod common;

#[tokio::test]
async fn test_get_users_xml() {
    let upstream = common::start_mock_upstream().await;
    let proxy = common::start_proxy(common::test_config()).await;

    let res = common::client()
        .get(proxy.url(&upstream.url("/geostore/rest/users")))
        .send()
        .await
        .expect("Proxy unreachable");

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/xml");
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "<response>Some content</response>");

    let seen = upstream.last();
    assert_eq!(seen.path_and_query, "/geostore/rest/users");
    assert_eq!(seen.headers["host"], upstream.addr.to_string());
}

#[tokio::test]
async fn test_post_xml_and_json() {
    let upstream = common::start_mock_upstream().await;
    let proxy = common::start_proxy(common::test_config()).await;
    let client = common::client();

    let xml = "<Resource><name>test</name><category><name>MAP</name></category></Resource>";
    let res = client
        .post(proxy.url(&upstream.url("/geostore/rest/resources")))
        .header("content-type", "text/xml")
        .body(xml)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(res.headers()["content-type"], "text/xml");
    assert_eq!(res.text().await.unwrap(), "<response>5</response>");
    assert_eq!(upstream.last().body, xml.as_bytes());

    let json = r#"{"Resource":{"name":"test","category":{"name":"MAP"}}}"#;
    let res = client
        .post(proxy.url(&upstream.url("/geostore/rest/resources")))
        .header("content-type", "application/json")
        .body(json)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(res.headers()["content-type"], "application/json");
    assert_eq!(res.text().await.unwrap(), r#"{"id":5}"#);
    assert_eq!(upstream.last().body, json.as_bytes());
}

#[tokio::test]
async fn test_put_and_delete() {
    let upstream = common::start_mock_upstream().await;
    let proxy = common::start_proxy(common::test_config()).await;
    let client = common::client();

    let res = client
        .put(proxy.url(&upstream.url("/geostore/rest/resources/5")))
        .header("content-type", "text/xml")
        .body("<Resource><description>updated</description></Resource>")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(upstream.last().method, "PUT");

    let res = client
        .delete(proxy.url(&upstream.url("/geostore/rest/resources/5")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(upstream.last().method, "DELETE");
}

#[tokio::test]
async fn test_target_query_string_survives() {
    let upstream = common::start_mock_upstream().await;
    let proxy = common::start_proxy(common::test_config()).await;

    let res = common::client()
        .get(proxy.url(&upstream.url("/echo?service=WMS&request=GetCapabilities")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(upstream.last().path_and_query, "/echo?service=WMS&request=GetCapabilities");
}

#[tokio::test]
async fn test_hop_by_hop_headers_not_forwarded() {
    let upstream = common::start_mock_upstream().await;
    let proxy = common::start_proxy(common::test_config()).await;

    let res = common::client()
        .get(proxy.url(&upstream.url("/echo")))
        .header("connection", "keep-alive, x-drop-me")
        .header("keep-alive", "timeout=5")
        .header("x-drop-me", "1")
        .header("proxy-authorization", "Basic Zm9vOmJhcg==")
        .header("proxy-connection", "keep-alive")
        .header("te", "trailers")
        .header("x-keep-me", "yes")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let seen = upstream.last();
    for name in ["keep-alive", "x-drop-me", "proxy-authorization", "proxy-connection", "te"] {
        assert!(!seen.headers.contains_key(name), "{} reached upstream", name);
    }
    assert_eq!(seen.headers["x-keep-me"], "yes");
    assert_eq!(seen.headers["x-forwarded-for"], "127.0.0.1");
    assert_eq!(seen.headers["x-forwarded-proto"], "http");
    assert_eq!(seen.headers["x-forwarded-host"], proxy.addr.to_string());
}

#[tokio::test]
async fn test_zero_length_body() {
    let upstream = common::start_mock_upstream().await;
    let proxy = common::start_proxy(common::test_config()).await;

    let res = common::client()
        .post(proxy.url(&upstream.url("/echo")))
        .header("content-type", "text/plain")
        .body("")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.bytes().await.unwrap().is_empty());

    let seen = upstream.last();
    assert!(seen.body.is_empty());
    assert_eq!(seen.headers["content-length"], "0");
}

#[tokio::test]
async fn test_large_bodies_round_trip() {
    let upstream = common::start_mock_upstream().await;
    let mut config = common::test_config();
    config.forwarding.chunk_size = 4096;
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    // Above the buffer threshold, so the request body streams.
    let payload = common::pattern(300_000);
    let res = client
        .post(proxy.url(&upstream.url("/echo")))
        .header("content-type", "application/octet-stream")
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.bytes().await.unwrap().as_ref(), payload.as_slice());
    assert_eq!(upstream.last().body.as_ref(), payload.as_slice());

    let res = client
        .get(proxy.url(&upstream.url("/large?size=1000000")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.bytes().await.unwrap().as_ref(), common::pattern(1_000_000).as_slice());
}

#[tokio::test]
async fn test_redirect_is_relayed_not_followed() {
    let upstream = common::start_mock_upstream().await;
    let proxy = common::start_proxy(common::test_config()).await;

    let res = common::client()
        .get(proxy.url(&upstream.url("/redirect")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()["location"], "/geostore/rest/users");
    assert_eq!(upstream.requests().len(), 1);
}

#[tokio::test]
async fn test_repeated_get_is_identical_and_reuses_connection() {
    let upstream = common::start_mock_upstream().await;
    let proxy = common::start_proxy(common::test_config()).await;
    let client = common::client();
    let url = proxy.url(&upstream.url("/geostore/rest/users"));

    let mut seen = Vec::new();
    for _ in 0..2 {
        let res = client.get(&url).send().await.unwrap();
        let status = res.status();
        let content_type = res.headers()["content-type"].clone();
        let body = res.text().await.unwrap();
        seen.push((status, content_type, body));
    }
    assert_eq!(seen[0], seen[1]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = proxy.state.pool.stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].idle, 1);
    assert_eq!(stats[0].in_use, 0);
}

#[tokio::test]
async fn test_concurrent_requests_do_not_cross_talk() {
    let mut upstreams = Vec::new();
    for _ in 0..4 {
        upstreams.push(common::start_mock_upstream().await);
    }
    let proxy = common::start_proxy(common::test_config()).await;
    let client = common::client();

    let mut tasks = Vec::new();
    for i in 0..32 {
        let url = proxy.url(&upstreams[i % upstreams.len()].url("/echo"));
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let body = format!("request-{}-{}", i, "x".repeat(i * 97));
            let res = client
                .post(url)
                .header("content-type", "text/plain")
                .body(body.clone())
                .send()
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(res.text().await.unwrap(), body);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let total: usize = upstreams.iter().map(|u| u.requests().len()).sum();
    assert_eq!(total, 32);
}

#[tokio::test]
async fn test_body_of_unknown_length_is_sent_chunked() {
    let upstream = common::start_mock_upstream().await;
    let proxy = common::start_proxy(common::test_config()).await;

    let payload = common::pattern(500_000);
    let frames: Vec<Result<Frame<Bytes>, std::io::Error>> = payload
        .chunks(10_000)
        .map(|c| Ok(Frame::data(Bytes::copy_from_slice(c))))
        .collect();
    let body = reqwest::Body::wrap(StreamBody::new(futures_util::stream::iter(frames)));

    let res = common::client()
        .post(proxy.url(&upstream.url("/echo")))
        .header("content-type", "application/octet-stream")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.bytes().await.unwrap().as_ref(), payload.as_slice());

    let seen = upstream.last();
    assert_eq!(seen.headers["transfer-encoding"], "chunked");
    assert!(!seen.headers.contains_key("content-length"));
    assert_eq!(seen.body.as_ref(), payload.as_slice());
}
