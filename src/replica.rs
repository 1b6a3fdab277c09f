use std::time::Duration;

use anyhow::Context;
use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::resp_value::RespValue;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Turns `"<host> <port>"` into a connectable `host:port`.
pub fn master_address(replicaof: &str) -> anyhow::Result<String> {
    let parts = replicaof.split_ascii_whitespace().collect::<Vec<&str>>();
    match parts.as_slice() {
        [host, port] => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("invalid master port {:?}", port))?;
            Ok(format!("{}:{}", host, port))
        }
        _ => anyhow::bail!("expected \"<host> <port>\", got {:?}", replicaof),
    }
}

/// First step of the replication handshake: PING the master and wait at most
/// `limit` for PONG. Nothing past that is implemented.
pub async fn handshake(replicaof: &str, limit: Duration) -> anyhow::Result<()> {
    let address = master_address(replicaof)?;
    tokio::time::timeout(limit, ping_master(&address))
        .await
        .with_context(|| format!("master {} did not answer within {:?}", address, limit))?
}

async fn ping_master(address: &str) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect(address)
        .await
        .with_context(|| format!("failed to connect to master {}", address))?;

    let mut output_buf = BytesMut::new();
    RespValue::Array(vec![RespValue::bulk("PING")]).serialize(&mut output_buf);
    stream.write_all(&output_buf).await?;

    let mut input_buf = BytesMut::with_capacity(64);
    loop {
        if stream.read_buf(&mut input_buf).await? == 0 {
            anyhow::bail!("master {} closed the connection during handshake", address);
        }
        match RespValue::deserialize(&input_buf)? {
            Some((RespValue::SimpleString(s), _)) if s.eq_ignore_ascii_case("PONG") => {
                tracing::info!("Master {} answered PING", address);
                return Ok(());
            }
            Some((response, _)) => {
                anyhow::bail!("unexpected handshake response {:?}", response)
            }
            None => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::{handshake, master_address, HANDSHAKE_TIMEOUT};

    #[test]
    fn parse_master_address() {
        assert_eq!(master_address("localhost 6379").unwrap(), "localhost:6379");
        assert!(master_address("localhost").is_err());
        assert!(master_address("localhost port").is_err());
    }

    async fn fake_master(reply: &'static [u8]) -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0; 64];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(reply).await.unwrap();
            buf.truncate(n);
            buf
        });
        (port, handle)
    }

    #[tokio::test]
    async fn sends_ping() {
        let (port, master) = fake_master(b"+PONG\r\n").await;
        handshake(&format!("127.0.0.1 {}", port), HANDSHAKE_TIMEOUT).await.unwrap();
        assert_eq!(master.await.unwrap(), b"*1\r\n$4\r\nPING\r\n");
    }

    #[tokio::test]
    async fn rejects_unexpected_reply() {
        let (port, _master) = fake_master(b"-ERR nope\r\n").await;
        assert!(handshake(&format!("127.0.0.1 {}", port), HANDSHAKE_TIMEOUT).await.is_err());
    }

    #[tokio::test]
    async fn silent_master_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _master = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(stream);
        });

        let started = std::time::Instant::now();
        let result = handshake(&format!("127.0.0.1 {}", port), Duration::from_millis(100)).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
