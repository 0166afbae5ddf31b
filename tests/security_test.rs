//! 安全相关的黑盒测试：路径穿越、控制字节、超长请求行、选择器边界。
//! 每个用例都在进程内拉起一台真实服务器，用裸 `TcpStream` 发起攻击载荷。

use std::sync::Arc;

use gopherd::{Config, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start_server(root: &std::path::Path, extra: &str) -> std::net::SocketAddr {
    let toml = format!(
        "root = \"{}\"\nhostname = \"localhost\"\nport = 7070\n{}",
        root.display(),
        extra
    );
    let config = Config::from_toml_str(&toml);
    let server = Server::new(config);
    server.insert_generated_files().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Arc::clone(&server).run(listener));
    addr
}

async fn send_raw(addr: std::net::SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(payload).await.unwrap();
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await;
    response
}

#[tokio::test]
async fn test_path_traversal_never_escapes_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("inside.txt"), "inside root").unwrap();
    let addr = start_server(dir.path(), "").await;

    let attacks: &[&[u8]] = &[
        b"../etc/passwd\r\n",
        b"../../etc/passwd\r\n",
        b"../../../../../../etc/passwd\r\n",
        b"/../../etc/passwd\r\n",
        b"docs/../../etc/passwd\r\n",
    ];

    for attack in attacks {
        let response = send_raw(addr, attack).await;
        let text = String::from_utf8_lossy(&response);
        assert!(
            !text.contains("root:"),
            "路径穿越攻击不应泄露系统文件: {:?}",
            String::from_utf8_lossy(attack)
        );
    }
}

#[tokio::test]
async fn test_encoded_traversal_never_escapes_root() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_server(dir.path(), "").await;

    let attacks: &[&[u8]] = &[
        b"/%2e%2e/%2e%2e/etc/passwd\r\n",
        b"/..%2fetc%2fpasswd\r\n",
        b"%2e%2e%2f%2e%2e%2fetc%2fpasswd\r\n",
    ];

    for attack in attacks {
        let response = send_raw(addr, attack).await;
        let text = String::from_utf8_lossy(&response);
        assert!(!text.contains("root:"), "编码穿越不应泄露系统文件");
    }
}

#[tokio::test]
async fn test_control_bytes_rejected_with_400() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_server(dir.path(), "").await;

    let attacks: &[&[u8]] = &[
        b"/file\x00name\r\n",
        b"/file\x01name\r\n",
        b"/file\x7fname\r\n",
        b"/a\tb\r\n",
    ];

    for attack in attacks {
        let response = send_raw(addr, attack).await;
        let text = String::from_utf8_lossy(&response);
        assert!(
            text.starts_with("3400 Bad Request\t"),
            "控制字节应触发 400: {:?} -> {:?}",
            attack,
            text
        );
    }
}

#[tokio::test]
async fn test_oversized_request_line_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_server(dir.path(), "conn_read_max = 128").await;

    let payload = format!("/{}\r\n", "A".repeat(10_000));
    let response = send_raw(addr, payload.as_bytes()).await;
    let text = String::from_utf8_lossy(&response);
    // 超长请求行按读取失败处理
    assert!(text.starts_with("3503 Service Unavailable\t") || text.is_empty());
}

#[tokio::test]
async fn test_selector_length_boundary_in_listing() {
    let dir = tempfile::tempdir().unwrap();
    // 255 字节选择器：254 字节文件名 + 前导 '/'
    let keep_name = "k".repeat(254);
    // 256 字节选择器：255 字节文件名 + 前导 '/'
    let long_name = "l".repeat(255);
    std::fs::write(dir.path().join(&keep_name), "x").unwrap();
    std::fs::write(dir.path().join(&long_name), "x").unwrap();
    let addr = start_server(dir.path(), "page_width = 400").await;

    let response = send_raw(addr, b"\r\n").await;
    let text = String::from_utf8_lossy(&response);

    assert!(
        text.contains(&format!("\t/{}\t", keep_name)),
        "255 字节的选择器应原样保留"
    );
    assert!(
        !text.contains(&format!("\t/{}\t", long_name)),
        "256 字节的选择器不应原样出现"
    );
    assert!(text.contains("\t/error_selector_length\t"));
}

#[tokio::test]
async fn test_page_width_truncation_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let exact = "e".repeat(40);
    let over = "o".repeat(41);
    std::fs::write(dir.path().join(&exact), "x").unwrap();
    std::fs::write(dir.path().join(&over), "x").unwrap();
    let addr = start_server(dir.path(), "page_width = 40").await;

    let response = send_raw(addr, b"\r\n").await;
    let text = String::from_utf8_lossy(&response);

    assert!(text.contains(&format!("9{}\t", exact)), "恰好等宽不截断");
    assert!(!text.contains(&format!("9{}\t", over)), "超宽必须截断");
    assert!(text.contains(&format!("9{}...\t", "o".repeat(37))));
}

#[tokio::test]
async fn test_restricted_paths_not_reachable_via_rewrite_target() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("blocked.txt"), "blocked contents").unwrap();
    let addr = start_server(
        dir.path(),
        "restricted_paths = \"blocked.*\"\nremap_requests = \"^/alias$ -> /blocked.txt\"",
    )
    .await;

    // 重写结果仍要经过受限检查
    let response = send_raw(addr, b"/alias\r\n").await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("3403 Forbidden\t"));
    assert!(!text.contains("blocked contents"));
}

#[tokio::test]
async fn test_cgi_source_not_served_as_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("cgi-bin")).unwrap();
    std::fs::write(dir.path().join("cgi-bin/tool"), "#!/bin/sh\necho secret-logic\n").unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(dir.path().join("cgi-bin/tool"))
            .unwrap()
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(dir.path().join("cgi-bin/tool"), perms).unwrap();
    }
    let addr = start_server(dir.path(), "cgi_dir = \"cgi-bin\"").await;

    // CGI 目录内的路径走执行分支，脚本源码不会被当作普通文件下发
    let response = send_raw(addr, b"/cgi-bin/tool\r\n").await;
    let text = String::from_utf8_lossy(&response);
    assert!(!text.contains("#!/bin/sh"));
    assert_eq!(text.trim(), "secret-logic");
}
