//! File transfers: chunked streaming, on-the-fly compression and the
//! file-serving router.

extern crate emvc;
extern crate flate2;

mod common;

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use emvc::Router;
use flate2::read::{GzDecoder, ZlibDecoder};

use common::{dechunk, split_response, Harness};

fn temp_file(name: &str, content: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir()
        .join(format!("emvc-files-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Patterned payload large enough to span many read chunks.
fn big_payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i % 251) as u8)
        .collect()
}

#[test]
fn download_streams_the_file_chunked_with_disposition() {
    let content = big_payload(30_000);
    let path = temp_file("report.pdf", &content);

    let root = Router::new("/");
    root.get("/download-file/:[filename]", move |req, res, next| {
        let filename = req.param_or("filename", "test.txt").to_string();
        res.status(200).download(&path, Some(filename.as_str()));
        next.ok();
    });

    let h = Harness::new(root);
    h.push(b"GET /download-file/report.pdf HTTP/1.1\r\nHost: t\r\n\r\n");

    let (head, body) = split_response(&h.take_output());
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains(
        "Content-Disposition: attachment; filename=report.pdf"
    ));
    assert!(head.contains("Transfer-Encoding: chunked"));
    assert!(!head.contains("Content-Length"));
    assert_eq!(dechunk(&body), content);
}

#[test]
fn gzip_wins_over_deflate_whatever_the_order() {
    let content = big_payload(300_000);
    let path = temp_file("large.bin", &content);

    let root = Router::new("/");
    root.get("/file", move |_req, res, next| {
        res.send_file(&path);
        next.ok();
    });

    let h = Harness::new(root);
    h.push(
        b"GET /file HTTP/1.1\r\nHost: t\r\n\
          Accept-Encoding: deflate, gzip;q=1.0, *;q=0.5\r\n\r\n",
    );

    let (head, body) = split_response(&h.take_output());
    assert!(head.contains("Content-Encoding: gzip"), "head: {}", head);
    assert!(head.contains("Transfer-Encoding: chunked"));

    let compressed = dechunk(&body);
    assert!(compressed.len() < content.len());
    let mut decoded = Vec::new();
    GzDecoder::new(&compressed[..])
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, content);
}

#[test]
fn deflate_is_the_fallback_coding() {
    let content = big_payload(50_000);
    let path = temp_file("deflate.bin", &content);

    let root = Router::new("/");
    root.get("/file", move |_req, res, next| {
        res.send_file(&path);
        next.ok();
    });

    let h = Harness::new(root);
    h.push(
        b"GET /file HTTP/1.1\r\nHost: t\r\n\
          Accept-Encoding: deflate\r\n\r\n",
    );

    let (head, body) = split_response(&h.take_output());
    assert!(head.contains("Content-Encoding: deflate"));
    let mut decoded = Vec::new();
    ZlibDecoder::new(&dechunk(&body)[..])
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, content);
}

#[test]
fn missing_file_flows_through_the_error_path() {
    let root = Router::new("/");
    root.get("/gone", |_req, res, next| {
        res.send_file("/definitely/not/a/real/path");
        next.ok();
    });
    let h = Harness::new(root);
    h.push(b"GET /gone HTTP/1.1\r\nHost: t\r\n\r\n");
    let (head, _) = split_response(&h.take_output());
    assert!(head.starts_with("HTTP/1.1 404"), "head: {}", head);
}

#[test]
fn file_router_serves_and_404s_through_the_pipeline() {
    let content = b"body { color: red }".to_vec();
    let path = temp_file("style.css", &content);
    let base = path.parent().unwrap().to_path_buf();

    let root = Router::new("/");
    root.register_router(Router::file_router(&base, "/static"));

    let h = Harness::new(root.clone());
    h.push(b"GET /static/style.css HTTP/1.1\r\nHost: t\r\n\r\n");
    let (head, body) = split_response(&h.take_output());
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(dechunk(&body), content);

    let h = Harness::new(root.clone());
    h.push(b"GET /static/missing.css HTTP/1.1\r\nHost: t\r\n\r\n");
    let (head, _) = split_response(&h.take_output());
    assert!(head.starts_with("HTTP/1.1 404"));

    // directory escapes are rejected, not served
    let h = Harness::new(root);
    h.push(b"GET /static/../../etc/passwd HTTP/1.1\r\nHost: t\r\n\r\n");
    let (head, _) = split_response(&h.take_output());
    assert!(head.starts_with("HTTP/1.1 404"), "head: {}", head);
}
