//! # Connection 模块
//!
//! 该模块把一条 TCP 连接包装为带读写超时的缓冲 I/O 通道。
//! 每次读写操作都重新施加配置的超时时间，读行操作使用前缀续读协议并
//! 强制执行请求行最大字节数。

use crate::{
    config::Config,
    exception::{Exception, ExceptionKind},
};

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// 带超时与缓冲的客户端连接。
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    ip: String,
    read_deadline: Duration,
    write_deadline: Duration,
    read_max: usize,
}

impl Connection {
    /// 按配置的缓冲区大小与超时包装一条 TCP 连接。
    pub fn new(stream: TcpStream, config: &Config) -> Self {
        let ip = stream
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::with_capacity(config.conn_read_buf(), read_half),
            writer: BufWriter::with_capacity(config.conn_write_buf(), write_half),
            ip,
            read_deadline: config.read_deadline(),
            write_deadline: config.write_deadline(),
            read_max: config.conn_read_max(),
        }
    }

    /// 获取对端 IP 地址（CGI 的 `REMOTE_ADDR` 与访问日志使用）
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// 读取一行（以 CRLF 或 LF 结尾），超出最大字节数或超时则失败。
    ///
    /// 底层缓冲一次给不出完整行时继续追加读取，直到看到行结束符
    /// 或超过配置的上限。
    pub async fn read_line(&mut self) -> Result<String, Exception> {
        let mut line: Vec<u8> = Vec::new();

        loop {
            let available = match timeout(self.read_deadline, self.reader.fill_buf()).await {
                Ok(Ok(buf)) => buf,
                Ok(Err(e)) => return Err(Exception::wrap(ExceptionKind::ConnRead, e)),
                Err(e) => return Err(Exception::wrap(ExceptionKind::ConnRead, e)),
            };

            if available.is_empty() {
                return Err(Exception::wrap(
                    ExceptionKind::ConnRead,
                    "connection closed before line end",
                ));
            }

            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    line.extend_from_slice(&available[..pos]);
                    self.reader.consume(pos + 1);
                    break;
                }
                None => {
                    let count = available.len();
                    line.extend_from_slice(available);
                    self.reader.consume(count);
                }
            }

            if line.len() > self.read_max {
                return Err(Exception::wrap(
                    ExceptionKind::ConnRead,
                    "request line exceeds read max",
                ));
            }
        }

        if line.last() == Some(&b'\r') {
            line.pop();
        }

        if line.len() > self.read_max {
            return Err(Exception::wrap(
                ExceptionKind::ConnRead,
                "request line exceeds read max",
            ));
        }

        String::from_utf8(line).map_err(|e| Exception::wrap(ExceptionKind::InvalidRequest, e))
    }

    /// 向连接写入一段字节
    pub async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Exception> {
        match timeout(self.write_deadline, self.writer.write_all(bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Exception::wrap(ExceptionKind::ConnWrite, e)),
            Err(e) => Err(Exception::wrap(ExceptionKind::ConnWrite, e)),
        }
    }

    /// 从一个读取器分块搬运数据到连接（大文件直接流式下发时使用）
    pub async fn write_from<R>(&mut self, reader: &mut R, buf_size: usize) -> Result<(), Exception>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; buf_size.max(1)];
        loop {
            let count = match reader.read(&mut buf).await {
                Ok(c) => c,
                Err(e) => return Err(Exception::wrap(ExceptionKind::ConnWrite, e)),
            };
            if count == 0 {
                break;
            }
            self.write_bytes(&buf[..count]).await?;
        }
        Ok(())
    }

    /// 刷新缓冲并关闭连接
    pub async fn close(mut self) -> Result<(), Exception> {
        match timeout(self.write_deadline, self.writer.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Exception::wrap(ExceptionKind::ConnClose, e)),
            Err(e) => return Err(Exception::wrap(ExceptionKind::ConnClose, e)),
        }
        match timeout(self.write_deadline, self.writer.shutdown()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Exception::wrap(ExceptionKind::ConnClose, e)),
            Err(e) => Err(Exception::wrap(ExceptionKind::ConnClose, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair(config: &Config) -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();
        (Connection::new(server_stream, config), client)
    }

    #[tokio::test]
    async fn test_read_line_crlf() {
        let config = Config::new();
        let (mut conn, mut client) = pair(&config).await;

        client.write_all(b"hello.txt\r\n").await.unwrap();
        let line = conn.read_line().await.unwrap();
        assert_eq!(line, "hello.txt");
    }

    #[tokio::test]
    async fn test_read_line_lf_only() {
        let config = Config::new();
        let (mut conn, mut client) = pair(&config).await;

        client.write_all(b"hello.txt\n").await.unwrap();
        let line = conn.read_line().await.unwrap();
        assert_eq!(line, "hello.txt");
    }

    #[tokio::test]
    async fn test_read_line_empty_selector() {
        let config = Config::new();
        let (mut conn, mut client) = pair(&config).await;

        client.write_all(b"\r\n").await.unwrap();
        let line = conn.read_line().await.unwrap();
        assert_eq!(line, "");
    }

    #[tokio::test]
    async fn test_read_line_spans_buffer_refills() {
        // 行长度超过读缓冲时走前缀续读路径
        let config = Config::from_toml_str("conn_read_buf = 16\nconn_read_max = 4096");
        let (mut conn, mut client) = pair(&config).await;

        let selector = format!("/{}", "a".repeat(100));
        client
            .write_all(format!("{}\r\n", selector).as_bytes())
            .await
            .unwrap();
        let line = conn.read_line().await.unwrap();
        assert_eq!(line, selector);
    }

    #[tokio::test]
    async fn test_read_line_enforces_read_max() {
        let config = Config::from_toml_str("conn_read_max = 32");
        let (mut conn, mut client) = pair(&config).await;

        let long = "a".repeat(100);
        client
            .write_all(format!("{}\r\n", long).as_bytes())
            .await
            .unwrap();
        let result = conn.read_line().await;
        assert_eq!(result.unwrap_err().kind(), ExceptionKind::ConnRead);
    }

    #[tokio::test]
    async fn test_read_line_times_out() {
        let config = Config::from_toml_str("read_deadline_secs = 1");
        let (mut conn, _client) = pair(&config).await;

        // 客户端保持连接但不发任何数据
        let result = conn.read_line().await;
        assert_eq!(result.unwrap_err().kind(), ExceptionKind::ConnRead);
    }

    #[tokio::test]
    async fn test_write_bytes_round_trip() {
        let config = Config::new();
        let (mut conn, mut client) = pair(&config).await;

        conn.write_bytes(b"HI\n").await.unwrap();
        conn.close().await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"HI\n");
    }

    #[tokio::test]
    async fn test_write_from_streams_reader() {
        let config = Config::new();
        let (mut conn, mut client) = pair(&config).await;

        let payload = vec![b'z'; 10_000];
        let mut reader = std::io::Cursor::new(payload.clone());
        conn.write_from(&mut reader, 512).await.unwrap();
        conn.close().await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, payload);
    }
}
