//! End-to-end tests: a real origin and a real proxy on loopback, driven by a
//! raw HTTP/1.1 client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use rttp_cache::proxy::admin;
use rttp_cache::{CachingProxy, ProxyConfig, Request, Response, Server, StatusCode};

const ADMIN: &str = "/__cache";

/// Largest body the test origin reads.
const ORIGIN_BODY_LIMIT: usize = 16 * 1024 * 1024;

struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn text(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap()
    }
}

/// Sends `raw` on a fresh connection and reads until the peer closes.
async fn send(addr: SocketAddr, raw: &[u8]) -> Reply {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();

    let split = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
    let head = std::str::from_utf8(&out[..split]).unwrap();
    let mut lines = head.split("\r\n");
    let status = lines.next().unwrap().split(' ').nth(1).unwrap().parse().unwrap();
    let headers = lines
        .map(|line| {
            let (name, value) = line.split_once(':').unwrap();
            (name.to_owned(), value.trim().to_owned())
        })
        .collect();

    Reply {
        status,
        headers,
        body: out[split + 4..].to_vec(),
    }
}

async fn get(addr: SocketAddr, target: &str) -> Reply {
    let raw = format!("GET {target} HTTP/1.1\r\nHost: proxy.test\r\nConnection: close\r\n\r\n");
    send(addr, raw.as_bytes()).await
}

/// Origin that counts the requests it serves.
///
/// - `/missing` → 404
/// - `/echo` → request details as the body
/// - `/upload` → the number of body bytes received
/// - `/file` → 200 with a 12345-byte body
/// - anything else → 200 with a body naming the path and hit number
async fn spawn_origin() -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();

    tokio::spawn(server.run(move |mut req: Request| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            match req.take_body().collect(ORIGIN_BODY_LIMIT).await {
                Ok(body) => origin_reply(&req, n, &body),
                Err(e) => Response::plain_text(StatusCode::BAD_REQUEST, e.to_string()),
            }
        }
    }));

    (addr, hits)
}

fn origin_reply(req: &Request, n: usize, body: &[u8]) -> Response {
    match req.path() {
        "/missing" => Response::plain_text(StatusCode::NOT_FOUND, "not here"),
        "/echo" => {
            let h = req.headers();
            let body = format!(
                "method={} host={} type={} xff={} body={}",
                req.method(),
                h.get("host").unwrap_or("-"),
                h.get("content-type").unwrap_or("-"),
                h.get("x-forwarded-for").unwrap_or("-"),
                String::from_utf8_lossy(body),
            );
            Response::plain_text(StatusCode::OK, body)
        }
        "/upload" => Response::plain_text(StatusCode::OK, format!("received={}", body.len())),
        "/file" => Response::new(StatusCode::OK)
            .header("Content-Type", "application/octet-stream")
            .body_bytes(vec![b'f'; 12345]),
        path => Response::new(StatusCode::OK)
            .header("Content-Type", "text/plain")
            .header("Set-Cookie", "a=1")
            .header("Set-Cookie", "b=2")
            .body(format!("{path} #{n}")),
    }
}

async fn spawn_proxy(origin: &str) -> (SocketAddr, Arc<CachingProxy>) {
    spawn_configured(ProxyConfig::new(0, origin, Some(ADMIN.to_owned())).unwrap()).await
}

async fn spawn_configured(config: ProxyConfig) -> (SocketAddr, Arc<CachingProxy>) {
    let proxy = Arc::new(CachingProxy::from_config(&config).unwrap());
    let server = Server::bind(config.listen_addr()).await.unwrap();
    let addr = server.local_addr();

    let handler = Arc::clone(&proxy);
    tokio::spawn(server.run(move |req| {
        let proxy = Arc::clone(&handler);
        async move { proxy.handle(req).await }
    }));

    (addr, proxy)
}

async fn setup() -> (SocketAddr, Arc<AtomicUsize>, Arc<CachingProxy>) {
    let (origin, hits) = spawn_origin().await;
    let (proxy_addr, proxy) = spawn_proxy(&format!("http://{origin}/")).await;
    (proxy_addr, hits, proxy)
}

#[tokio::test]
async fn second_request_is_served_from_cache() {
    let (proxy, hits, _) = setup().await;

    let first = get(proxy, "/products?page=1").await;
    let second = get(proxy, "/products?page=1").await;

    assert_eq!(first.status, 200);
    assert_eq!(first.header("x-cache"), Some("MISS"));
    assert_eq!(second.header("x-cache"), Some("HIT"));
    assert_eq!(first.text(), "/products #1");
    assert_eq!(second.text(), "/products #1");
    assert_eq!(second.header("content-type"), Some("text/plain"));
    let cookies: Vec<_> = second
        .headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("set-cookie"))
        .map(|(_, v)| v.as_str())
        .collect();
    assert_eq!(cookies, ["a=1", "b=2"]);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn query_and_method_are_part_of_the_key() {
    let (proxy, hits, _) = setup().await;

    get(proxy, "/p?x=1").await;
    let other = get(proxy, "/p?x=2").await;
    let delete = send(
        proxy,
        b"DELETE /p?x=1 HTTP/1.1\r\nHost: proxy.test\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert_eq!(other.header("x-cache"), Some("MISS"));
    assert_eq!(delete.header("x-cache"), Some("MISS"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn error_responses_are_relayed_not_cached() {
    let (proxy, hits, cache) = setup().await;

    let first = get(proxy, "/missing").await;
    let second = get(proxy, "/missing").await;

    assert_eq!(first.status, 404);
    assert_eq!(first.text(), "not here");
    assert_eq!(second.header("x-cache"), Some("MISS"));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(cache.store().is_empty());
}

#[tokio::test]
async fn unreachable_origin_is_bad_gateway() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);
    let (proxy, cache) = spawn_proxy(&format!("http://{dead}")).await;

    let reply = get(proxy, "/anything").await;

    assert_eq!(reply.status, 502);
    assert_eq!(reply.text(), "Error connecting to the origin server.");
    assert_eq!(reply.header("x-cache"), None);
    assert!(cache.store().is_empty());
}

#[tokio::test]
async fn origin_sees_its_own_host_and_the_callers_address() {
    let (proxy, _, _) = setup().await;

    let raw = b"POST /echo HTTP/1.1\r\nHost: proxy.test\r\nContent-Type: application/json\r\nContent-Length: 7\r\nConnection: close\r\n\r\n{\"a\":1}";
    let reply = send(proxy, raw).await;

    let text = reply.text();
    assert!(text.starts_with("method=POST host=127.0.0.1:"), "{text}");
    assert!(text.contains(" type=application/json "), "{text}");
    assert!(text.contains(" xff=127.0.0.1 "), "{text}");
    assert!(text.ends_with(" body={\"a\":1}"), "{text}");
}

#[tokio::test]
async fn chunked_request_body_is_forwarded() {
    let (proxy, _, _) = setup().await;

    let raw = b"PUT /echo HTTP/1.1\r\nHost: proxy.test\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
    let reply = send(proxy, raw).await;

    assert_eq!(reply.status, 200);
    assert!(reply.text().ends_with(" body=hello world"), "{}", reply.text());
}

#[tokio::test]
async fn clearing_forces_the_next_request_to_the_origin() {
    let (proxy, hits, _) = setup().await;

    get(proxy, "/a").await;
    get(proxy, "/b").await;
    assert_eq!(get(proxy, "/a").await.header("x-cache"), Some("HIT"));

    let cleared = admin::clear_remote(&proxy.to_string(), ADMIN).await.unwrap();
    assert_eq!(cleared, 2);

    let after = get(proxy, "/a").await;
    assert_eq!(after.header("x-cache"), Some("MISS"));
    assert_eq!(after.text(), "/a #3");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn concurrent_requests_settle_on_one_entry() {
    let (proxy, hits, cache) = setup().await;

    let tasks: Vec<_> = (0..20)
        .map(|_| tokio::spawn(async move { get(proxy, "/hot").await }))
        .collect();
    for task in tasks {
        let reply = task.await.unwrap();
        assert_eq!(reply.status, 200);
        assert!(reply.text().starts_with("/hot #"));
    }

    assert_eq!(cache.store().len(), 1);
    let origin_hits = hits.load(Ordering::SeqCst);
    assert!((1..=20).contains(&origin_hits));

    let settled = get(proxy, "/hot").await;
    assert_eq!(settled.header("x-cache"), Some("HIT"));
    assert_eq!(hits.load(Ordering::SeqCst), origin_hits);
}

#[tokio::test]
async fn large_upload_streams_through_to_the_origin() {
    let (proxy, hits, _) = setup().await;

    let size = 9 * 1024 * 1024;
    let mut raw = format!(
        "POST /upload HTTP/1.1\r\nHost: proxy.test\r\nContent-Type: application/octet-stream\r\nContent-Length: {size}\r\nConnection: close\r\n\r\n"
    )
    .into_bytes();
    raw.resize(raw.len() + size, b'u');

    let reply = send(proxy, &raw).await;

    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), format!("received={size}"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn head_keeps_the_origins_content_length() {
    let (proxy, hits, _) = setup().await;
    let head = b"HEAD /file HTTP/1.1\r\nHost: proxy.test\r\nConnection: close\r\n\r\n";

    let miss = send(proxy, head).await;
    let hit = send(proxy, head).await;

    for (reply, cache) in [(&miss, "MISS"), (&hit, "HIT")] {
        assert_eq!(reply.status, 200);
        assert_eq!(reply.header("x-cache"), Some(cache));
        assert_eq!(reply.header("content-length"), Some("12345"));
        assert!(reply.body.is_empty());
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // GET is a separate entry and carries the real body.
    let full = get(proxy, "/file").await;
    assert_eq!(full.header("x-cache"), Some("MISS"));
    assert_eq!(full.header("content-length"), Some("12345"));
    assert_eq!(full.body.len(), 12345);
}

#[tokio::test]
async fn cors_preflight_and_cross_origin_reads() {
    let (origin, hits) = spawn_origin().await;
    let config = ProxyConfig::new(0, &format!("http://{origin}"), None)
        .unwrap()
        .with_cors(true);
    let (proxy, cache) = spawn_configured(config).await;

    let preflight = send(
        proxy,
        b"OPTIONS /api HTTP/1.1\r\nHost: proxy.test\r\nOrigin: http://app.test\r\n\
          Access-Control-Request-Method: PUT\r\nAccess-Control-Request-Headers: x-token\r\n\
          Connection: close\r\n\r\n",
    )
    .await;
    assert_eq!(preflight.status, 204);
    assert_eq!(preflight.header("access-control-allow-origin"), Some("*"));
    assert_eq!(preflight.header("access-control-allow-methods"), Some("PUT"));
    assert_eq!(preflight.header("access-control-allow-headers"), Some("x-token"));
    assert_eq!(preflight.header("x-cache"), None);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(cache.store().is_empty());

    let cross = b"GET /api HTTP/1.1\r\nHost: proxy.test\r\nOrigin: http://app.test\r\nConnection: close\r\n\r\n";
    let miss = send(proxy, cross).await;
    let hit = send(proxy, cross).await;
    assert_eq!(miss.header("x-cache"), Some("MISS"));
    assert_eq!(hit.header("x-cache"), Some("HIT"));
    assert_eq!(miss.header("access-control-allow-origin"), Some("*"));
    assert_eq!(hit.header("access-control-allow-origin"), Some("*"));

    let same_origin = get(proxy, "/api").await;
    assert_eq!(same_origin.header("x-cache"), Some("HIT"));
    assert_eq!(same_origin.header("access-control-allow-origin"), None);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
