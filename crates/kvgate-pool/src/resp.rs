//! Minimal RESP framing, just enough for the link to issue `AUTH`/`SELECT`
//! and hand single replies back.
//!
//! # Wire format
//!
//! ```text
//! Client → Server:
//!   *2\r\n$4\r\nAUTH\r\n$6\r\nsecret\r\n     (array of bulk strings)
//!
//! Server → Client:
//!   +OK\r\n            status
//!   -WRONGPASS ...\r\n error
//!   :42\r\n            integer
//!   $3\r\nfoo\r\n      bulk ($-1 is nil)
//!   *2\r\n...          array (*-1 is nil)
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::backend::{BoxFuture, Reply};
use crate::error::{LinkError, LinkResult};

/// Bulk payloads larger than this are treated as a protocol error.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
const INITIAL_BULK_CAPACITY: usize = 64 * 1024;

/// Encode a command as a RESP array of bulk strings.
pub fn encode_command(args: &[Vec<u8>]) -> Vec<u8> {
    let payload: usize = args.iter().map(|a| a.len() + 16).sum();
    let mut out = Vec::with_capacity(16 + payload);
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Read exactly one reply.
pub fn read_reply<'a, R>(reader: &'a mut R) -> BoxFuture<'a, LinkResult<Reply>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let line = read_line(reader).await?;
        let (kind, rest) = line
            .split_first()
            .ok_or_else(|| LinkError::Protocol("empty reply line".to_string()))?;
        let text = String::from_utf8_lossy(rest).into_owned();

        match *kind {
            b'+' => Ok(Reply::Status(text)),
            b'-' => Ok(Reply::Error(text)),
            b':' => parse_int(&text).map(Reply::Integer),
            b'$' => {
                let len = parse_int(&text)?;
                if len < 0 {
                    return Ok(Reply::Nil);
                }
                let len = checked_len(len)?;
                // Capacity follows the bytes received, not the announced length.
                let wanted = len + 2;
                let mut data = Vec::with_capacity(wanted.min(INITIAL_BULK_CAPACITY));
                (&mut *reader)
                    .take(wanted as u64)
                    .read_to_end(&mut data)
                    .await?;
                if data.len() < wanted {
                    return Err(LinkError::ServerClosed);
                }
                if !data.ends_with(b"\r\n") {
                    return Err(LinkError::Protocol("bulk reply missing CRLF".to_string()));
                }
                data.truncate(len);
                Ok(Reply::Bulk(data))
            }
            b'*' => {
                let count = parse_int(&text)?;
                if count < 0 {
                    return Ok(Reply::Nil);
                }
                let count = checked_len(count)?;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(read_reply(reader).await?);
                }
                Ok(Reply::Array(items))
            }
            other => Err(LinkError::Protocol(format!(
                "unexpected reply type byte 0x{other:02x}"
            ))),
        }
    })
}

async fn read_line<R>(reader: &mut R) -> LinkResult<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(LinkError::ServerClosed);
    }
    if !line.ends_with(b"\r\n") {
        return Err(LinkError::Protocol("reply line missing CRLF".to_string()));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn parse_int(text: &str) -> LinkResult<i64> {
    text.parse::<i64>()
        .map_err(|_| LinkError::Protocol(format!("invalid integer {text:?}")))
}

fn checked_len(n: i64) -> LinkResult<usize> {
    usize::try_from(n)
        .ok()
        .filter(|&len| len <= MAX_BULK_LEN)
        .ok_or_else(|| LinkError::Protocol(format!("length {n} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn parse(bytes: &[u8]) -> LinkResult<Reply> {
        let mut reader = BufReader::new(bytes);
        read_reply(&mut reader).await
    }

    #[test]
    fn encode_auth() {
        let frame = encode_command(&[b"AUTH".to_vec(), b"secret".to_vec()]);
        assert_eq!(frame, b"*2\r\n$4\r\nAUTH\r\n$6\r\nsecret\r\n");
    }

    #[test]
    fn encode_binary_safe() {
        let frame = encode_command(&[b"SET".to_vec(), b"k".to_vec(), b"a\r\nb".to_vec()]);
        assert_eq!(frame, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$4\r\na\r\nb\r\n");
    }

    #[tokio::test]
    async fn parse_status_and_error() {
        assert_eq!(parse(b"+OK\r\n").await.unwrap(), Reply::Status("OK".into()));
        assert_eq!(
            parse(b"-WRONGPASS invalid username-password pair\r\n")
                .await
                .unwrap(),
            Reply::Error("WRONGPASS invalid username-password pair".into())
        );
    }

    #[tokio::test]
    async fn parse_integer_bulk_nil() {
        assert_eq!(parse(b":-7\r\n").await.unwrap(), Reply::Integer(-7));
        assert_eq!(
            parse(b"$5\r\nhello\r\n").await.unwrap(),
            Reply::Bulk(b"hello".to_vec())
        );
        assert_eq!(parse(b"$-1\r\n").await.unwrap(), Reply::Nil);
        assert_eq!(parse(b"*-1\r\n").await.unwrap(), Reply::Nil);
    }

    #[tokio::test]
    async fn parse_nested_array() {
        let reply = parse(b"*2\r\n:1\r\n*1\r\n+x\r\n").await.unwrap();
        assert_eq!(
            reply,
            Reply::Array(vec![
                Reply::Integer(1),
                Reply::Array(vec![Reply::Status("x".into())])
            ])
        );
    }

    #[tokio::test]
    async fn eof_is_server_closed() {
        assert!(matches!(parse(b"").await, Err(LinkError::ServerClosed)));
        assert!(matches!(parse(b"$5\r\nhe").await, Err(LinkError::ServerClosed)));
    }

    #[tokio::test]
    async fn huge_announced_bulk_with_short_body_is_server_closed() {
        assert!(matches!(
            parse(b"$536870912\r\nabc").await,
            Err(LinkError::ServerClosed)
        ));
        assert!(matches!(
            parse(b"$536870913\r\nabc").await,
            Err(LinkError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn bulk_larger_than_initial_capacity() {
        let body = vec![b'x'; INITIAL_BULK_CAPACITY + 10];
        let mut frame = format!("${}\r\n", body.len()).into_bytes();
        frame.extend_from_slice(&body);
        frame.extend_from_slice(b"\r\n");
        assert_eq!(parse(&frame).await.unwrap(), Reply::Bulk(body));
    }

    #[tokio::test]
    async fn garbage_is_protocol_error() {
        assert!(matches!(parse(b"?what\r\n").await, Err(LinkError::Protocol(_))));
        assert!(matches!(parse(b":abc\r\n").await, Err(LinkError::Protocol(_))));
        assert!(matches!(parse(b"+no-crlf").await, Err(LinkError::Protocol(_))));
    }

    #[tokio::test]
    async fn replies_read_back_to_back() {
        let mut reader = BufReader::new(&b"+OK\r\n:2\r\n"[..]);
        assert_eq!(read_reply(&mut reader).await.unwrap(), Reply::Status("OK".into()));
        assert_eq!(read_reply(&mut reader).await.unwrap(), Reply::Integer(2));
    }
}
