//! Scripted HTTP responder for integration tests.
//!
//! Serves one canned response per accepted connection, in order, and records
//! each raw request with its arrival time. Unlike a declarative mock this can
//! answer byte-identical requests differently, which the truncation and
//! rate-limit retry flows need.

use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub struct Exchange {
    pub request: String,
    pub arrived_at: Instant,
}

pub async fn scripted_server(responses: Vec<String>) -> (String, JoinHandle<Vec<Exchange>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut exchanges = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let arrived_at = Instant::now();
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            exchanges.push(Exchange {
                request,
                arrived_at,
            });
        }
        exchanges
    });
    (url, handle)
}

pub fn json_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         content-type: application/json\r\n\
         content-length: {}\r\n\
         connection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

pub fn sse_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         content-type: text/event-stream\r\n\
         content-length: {}\r\n\
         connection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

pub fn error_response(status: u16, reason: &str, extra_headers: &[(&str, &str)], body: &str) -> String {
    let mut headers = String::new();
    for (name, value) in extra_headers {
        headers.push_str(&format!("{}: {}\r\n", name, value));
    }
    format!(
        "HTTP/1.1 {} {}\r\n\
         {}content-length: {}\r\n\
         connection: close\r\n\r\n{}",
        status,
        reason,
        headers,
        body.len(),
        body
    )
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(headers_end) = find_headers_end(&data) {
            let headers = String::from_utf8_lossy(&data[..headers_end]);
            let content_length = headers
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if data.len() >= headers_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}

fn find_headers_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}
