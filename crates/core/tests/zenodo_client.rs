//! ZenodoClient against a loopback HTTP server

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use zenodo_upload_core::{DepositTarget, FailureKind, UploadClient, UploadTask, ZenodoClient};

const TOKEN: &str = "secret-token";
const DEPOSIT: &str = "4242";

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Minimal deposition API: one deposit whose bucket accepts PUTs
struct FakeZenodo {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeZenodo {
    async fn start(put_status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let request = match read_request(&mut stream).await {
                    Ok(request) => request,
                    Err(_) => continue,
                };
                let (status, body) = route(&request, addr, put_status);
                recorded.lock().unwrap().push(request);
                let _ = write_response(&mut stream, status, &body).await;
            }
        });

        Self { addr, requests }
    }

    fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

fn route(request: &Recorded, addr: SocketAddr, put_status: u16) -> (u16, String) {
    let expected_auth = format!("Bearer {}", TOKEN);
    if request.header("authorization") != Some(expected_auth.as_str()) {
        return (401, r#"{"message":"invalid token"}"#.to_string());
    }

    match request.method.as_str() {
        "GET" if request.path == format!("/api/deposit/depositions/{}", DEPOSIT) => (
            200,
            serde_json::json!({
                "id": DEPOSIT,
                "submitted": false,
                "links": { "bucket": format!("http://{}/api/files/bucket-1", addr) }
            })
            .to_string(),
        ),
        "GET" => (404, r#"{"message":"PID does not exist"}"#.to_string()),
        "PUT" if request.path.starts_with("/api/files/bucket-1/") => {
            (put_status, r#"{"key":"uploaded"}"#.to_string())
        }
        _ => (400, "{}".to_string()),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<Recorded> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let chunked = headers
        .iter()
        .any(|(k, v)| k == "transfer-encoding" && v.contains("chunked"));
    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut raw = buf[header_end..].to_vec();
    let body = if chunked {
        while find(&raw, b"0\r\n\r\n").is_none() {
            let n = stream.read(&mut tmp).await?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&tmp[..n]);
        }
        decode_chunked(&raw)
    } else {
        while raw.len() < content_length {
            let n = stream.read(&mut tmp).await?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&tmp[..n]);
        }
        raw.truncate(content_length);
        raw
    };

    Ok(Recorded {
        method,
        path,
        headers,
        body,
    })
}

fn decode_chunked(mut raw: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    while let Some(line_end) = find(raw, b"\r\n") {
        let size_line = String::from_utf8_lossy(&raw[..line_end]).to_string();
        let size = usize::from_str_radix(size_line.split(';').next().unwrap_or("0").trim(), 16).unwrap_or(0);
        if size == 0 {
            break;
        }
        let start = line_end + 2;
        body.extend_from_slice(&raw[start..start + size]);
        raw = &raw[start + size + 2..];
    }
    body
}

async fn write_response(stream: &mut TcpStream, status: u16, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn data_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> UploadTask {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    UploadTask {
        path,
        size: content.len() as u64,
        relative_name: name.to_string(),
    }
}

fn client(chunk_size: usize) -> ZenodoClient {
    ZenodoClient::new(chunk_size, Duration::from_secs(10)).unwrap()
}

#[tokio::test]
async fn test_upload_streams_file_in_chunks() {
    let server = FakeZenodo::start(201).await;
    let dir = tempfile::tempdir().unwrap();
    let content: Vec<u8> = (0..100u8).collect();
    let task = data_file(&dir, "data.bin", &content);
    let target = DepositTarget::new(server.base_url(), DEPOSIT, TOKEN).unwrap();

    let mut deltas: Vec<u64> = Vec::new();
    let result = client(25)
        .upload(&task, &target, &mut |delta: u64| deltas.push(delta))
        .await;

    assert!(result.is_ok(), "{:?}", result);
    assert_eq!(deltas, vec![25, 25, 25, 25]);

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[1].method, "PUT");
    assert_eq!(requests[1].path, "/api/files/bucket-1/data.bin");
    assert_eq!(requests[1].body, content);
}

#[tokio::test]
async fn test_unknown_deposit_is_fatal() {
    let server = FakeZenodo::start(200).await;
    let dir = tempfile::tempdir().unwrap();
    let task = data_file(&dir, "a.txt", b"hello");
    let target = DepositTarget::new(server.base_url(), "999", TOKEN).unwrap();

    let failure = client(1024)
        .upload(&task, &target, &mut |_: u64| {})
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Fatal);
    assert!(failure.reason.contains("404"));
    assert!(failure.reason.starts_with("looking up deposit 999"));
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_rejected_file_names_the_upload() {
    let server = FakeZenodo::start(404).await;
    let dir = tempfile::tempdir().unwrap();
    let task = data_file(&dir, "a.txt", b"hello");
    let target = DepositTarget::new(server.base_url(), DEPOSIT, TOKEN).unwrap();

    let failure = client(1024)
        .upload(&task, &target, &mut |_: u64| {})
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Fatal);
    assert!(failure.reason.starts_with("uploading a.txt: HTTP 404"));
    assert!(!failure.reason.contains("deposit"));
}

#[tokio::test]
async fn test_bucket_is_looked_up_once() {
    let server = FakeZenodo::start(201).await;
    let dir = tempfile::tempdir().unwrap();
    let first = data_file(&dir, "a.txt", b"alpha");
    let second = data_file(&dir, "b.txt", b"beta");
    let target = DepositTarget::new(server.base_url(), DEPOSIT, TOKEN).unwrap();

    let client = client(1024);
    for task in [&first, &second, &first] {
        assert!(client.upload(task, &target, &mut |_: u64| {}).await.is_ok());
    }

    let methods: Vec<String> = server.requests().into_iter().map(|r| r.method).collect();
    assert_eq!(methods, vec!["GET", "PUT", "PUT", "PUT"]);
}

#[tokio::test]
async fn test_retry_reuses_bucket() {
    let server = FakeZenodo::start(503).await;
    let dir = tempfile::tempdir().unwrap();
    let task = data_file(&dir, "a.txt", b"hello");
    let target = DepositTarget::new(server.base_url(), DEPOSIT, TOKEN).unwrap();

    let client = client(1024);
    for _ in 0..2 {
        let failure = client.upload(&task, &target, &mut |_: u64| {}).await.unwrap_err();
        assert!(failure.is_retryable());
    }

    let methods: Vec<String> = server.requests().into_iter().map(|r| r.method).collect();
    assert_eq!(methods, vec!["GET", "PUT", "PUT"]);
}

#[tokio::test]
async fn test_invalid_token_is_fatal() {
    let server = FakeZenodo::start(200).await;
    let dir = tempfile::tempdir().unwrap();
    let task = data_file(&dir, "a.txt", b"hello");
    let target = DepositTarget::new(server.base_url(), DEPOSIT, "wrong").unwrap();

    let failure = client(1024)
        .upload(&task, &target, &mut |_: u64| {})
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Fatal);
    assert!(failure.reason.contains("401"));
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let server = FakeZenodo::start(503).await;
    let dir = tempfile::tempdir().unwrap();
    let task = data_file(&dir, "a.txt", b"hello");
    let target = DepositTarget::new(server.base_url(), DEPOSIT, TOKEN).unwrap();

    let failure = client(1024)
        .upload(&task, &target, &mut |_: u64| {})
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Retryable);
    assert!(failure.reason.contains("503"));
}

#[tokio::test]
async fn test_connection_refused_is_retryable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let task = data_file(&dir, "a.txt", b"hello");
    let target = DepositTarget::new(format!("http://{}/api", addr), DEPOSIT, TOKEN).unwrap();

    let failure = client(1024)
        .upload(&task, &target, &mut |_: u64| {})
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Retryable);
}

#[tokio::test]
async fn test_missing_local_file_is_fatal() {
    let server = FakeZenodo::start(200).await;
    let dir = tempfile::tempdir().unwrap();
    let task = UploadTask {
        path: dir.path().join("gone.txt"),
        size: 3,
        relative_name: "gone.txt".to_string(),
    };
    let target = DepositTarget::new(server.base_url(), DEPOSIT, TOKEN).unwrap();

    let failure = client(1024)
        .upload(&task, &target, &mut |_: u64| {})
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::Fatal);
}
