// ABOUTME: Frame-level IO over TCP with read buffering and write batching
// ABOUTME: Also streams length-prefixed file payloads across the same socket

use crate::datatypes::{Attr, Token};
use crate::frame::{self, Frame, FILE_BUFFER, FILE_HEADER_SIZE};
use bytes::{Buf, BytesMut};
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Read half of a socket with frame reassembly.
///
/// Bytes already pulled off the socket past a frame boundary stay in the
/// buffer and seed the next frame's header, or the next file stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    stream: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(stream: R) -> FrameReader<R> {
        FrameReader {
            stream,
            // Frames top out under 10KB, so a 4KB read buffer covers the
            // common case without tuning.
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Read a single [`Frame`] from the underlying stream.
    ///
    /// Waits until enough data has arrived to parse a whole frame. Returns
    /// `None` when the stream closes cleanly between frames; a close that
    /// breaks a frame in half is an error.
    pub async fn read_frame(&mut self) -> crate::Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return self
                    .buffer
                    .is_empty()
                    .then_some(None)
                    .ok_or_else(|| "connection reset by peer".into());
            }
        }
    }

    /// Read a frame, treating a clean close as an error. Used inside
    /// multi-turn exchanges where the peer going away is itself a failure.
    pub async fn expect_frame(&mut self) -> crate::Result<Frame> {
        self.read_frame()
            .await?
            .ok_or_else(|| "connection closed by peer".into())
    }

    /// Read a frame and interpret it as a PASS/FAIL acknowledgement.
    pub async fn expect_token(&mut self) -> crate::Result<Token> {
        let frame = self.expect_frame().await?;
        Ok(Token::from_frame(&frame)?)
    }

    fn parse_frame(&mut self) -> crate::Result<Option<Frame>> {
        use frame::Error::Incomplete;

        let mut buf = Cursor::new(&self.buffer[..]);
        match Frame::check(&mut buf) {
            Ok(len) => {
                buf.set_position(0);
                let frame = Frame::parse(&mut buf)?;
                self.buffer.advance(len);
                Ok(Some(frame))
            }
            // Not an error; reading from the socket will continue.
            Err(Incomplete) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Receive one file stream, writing its payload into `dest`.
    ///
    /// `progress` is called after each chunk with bytes received so far and
    /// the total size. Returns the number of bytes written. A zero-size
    /// header is the sender's failure signal and surfaces as an error with
    /// no payload consumed.
    pub async fn read_file<W>(
        &mut self,
        dest: &mut W,
        mut progress: impl FnMut(u64, u64),
    ) -> crate::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        while self.buffer.len() < FILE_HEADER_SIZE {
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return Err("connection reset by peer".into());
            }
        }

        let mut raw = [0u8; FILE_HEADER_SIZE];
        raw.copy_from_slice(&self.buffer[..FILE_HEADER_SIZE]);
        self.buffer.advance(FILE_HEADER_SIZE);

        let size = frame::parse_file_header(&raw)?;
        if size == 0 {
            return Err("peer reported a failed upload".into());
        }

        let mut received: u64 = 0;
        while received < size {
            if self.buffer.is_empty()
                && 0 == self.stream.read_buf(&mut self.buffer).await?
            {
                return Err("connection reset by peer".into());
            }
            let take = self.buffer.len().min((size - received) as usize);
            dest.write_all(&self.buffer[..take]).await?;
            self.buffer.advance(take);
            received += take as u64;
            progress(received, size);
        }
        dest.flush().await?;
        Ok(size)
    }
}

/// Write half of a socket. Decorated with a `BufWriter` so multi-part
/// writes coalesce into few syscalls; every frame is flushed whole.
#[derive(Debug)]
pub struct FrameWriter<W> {
    stream: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(stream: W) -> FrameWriter<W> {
        FrameWriter {
            stream: BufWriter::new(stream),
        }
    }

    /// Write a single frame to the underlying stream.
    pub async fn write_frame(&mut self, payload: &[u8], attr: Attr) -> crate::Result<()> {
        let encoded = Frame::encode(payload, attr)?;
        self.stream.write_all(&encoded).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Frame and send a UTF-8 message.
    pub async fn send_text(&mut self, msg: &str, attr: Attr) -> crate::Result<()> {
        self.write_frame(msg.as_bytes(), attr).await
    }

    /// Send a PASS/FAIL acknowledgement.
    pub async fn send_token(&mut self, token: Token) -> crate::Result<()> {
        self.send_text(token.as_str(), Attr::DYNAMIC).await
    }

    /// Stream `size` bytes from `src` under the single-shot file header.
    ///
    /// When the size does not fit the header, the abort header is written
    /// instead so the receiver fails cleanly, and the error is returned.
    pub async fn write_file<R>(
        &mut self,
        src: &mut R,
        size: u64,
        mut progress: impl FnMut(u64, u64),
    ) -> crate::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let header = match frame::encode_file_header(size) {
            Ok(header) => header,
            Err(e) => {
                self.abort_file().await?;
                return Err(e.into());
            }
        };
        self.stream.write_all(&header).await?;

        let mut chunk = vec![0u8; FILE_BUFFER];
        let mut sent: u64 = 0;
        while sent < size {
            let want = FILE_BUFFER.min((size - sent) as usize);
            let n = src.read(&mut chunk[..want]).await?;
            if n == 0 {
                return Err("file ended short of its advertised size".into());
            }
            self.stream.write_all(&chunk[..n]).await?;
            sent += n as u64;
            progress(sent, size);
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Emit the abort header in place of a file stream.
    pub async fn abort_file(&mut self) -> crate::Result<()> {
        self.stream.write_all(&frame::abort_file_header()).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

/// Both halves of one socket, for code that owns the whole connection.
#[derive(Debug)]
pub struct Connection {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl Connection {
    pub fn new(socket: TcpStream) -> Connection {
        let (read_half, write_half) = socket.into_split();
        Connection {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
        }
    }

    pub async fn read_frame(&mut self) -> crate::Result<Option<Frame>> {
        self.reader.read_frame().await
    }

    pub async fn expect_frame(&mut self) -> crate::Result<Frame> {
        self.reader.expect_frame().await
    }

    pub async fn expect_token(&mut self) -> crate::Result<Token> {
        self.reader.expect_token().await
    }

    pub async fn write_frame(&mut self, payload: &[u8], attr: Attr) -> crate::Result<()> {
        self.writer.write_frame(payload, attr).await
    }

    pub async fn send_text(&mut self, msg: &str, attr: Attr) -> crate::Result<()> {
        self.writer.send_text(msg, attr).await
    }

    pub async fn send_token(&mut self, token: Token) -> crate::Result<()> {
        self.writer.send_token(token).await
    }

    /// Split into independently owned halves.
    pub fn into_split(self) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn frames_survive_arbitrary_packet_boundaries() {
        let first = Frame::encode(b"hello", Attr::SUCCESS).unwrap();
        let second = Frame::encode(b"world!", Attr::new(2, 6)).unwrap();
        let mut wire = Vec::new();
        wire.extend_from_slice(&first);
        wire.extend_from_slice(&second);

        for cut in 0..=wire.len() {
            let (mut tx, rx) = duplex(64);
            let mut reader = FrameReader::new(rx);
            let (head, tail) = wire.split_at(cut);
            tx.write_all(head).await.unwrap();
            let tail = tail.to_vec();
            let feeder = tokio::spawn(async move {
                tx.write_all(&tail).await.unwrap();
                tx
            });

            let a = reader.read_frame().await.unwrap().unwrap();
            let b = reader.read_frame().await.unwrap().unwrap();
            assert_eq!(&a.payload[..], b"hello", "split at {cut}");
            assert_eq!(a.attr, Attr::SUCCESS);
            assert_eq!(&b.payload[..], b"world!");
            assert_eq!(b.attr, Attr::new(2, 6));
            drop(feeder.await.unwrap());
            assert!(reader.read_frame().await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn truncated_stream_is_a_connection_loss() {
        let encoded = Frame::encode(b"doomed payload", Attr::DYNAMIC).unwrap();
        // mid-header and mid-payload truncations
        for cut in [3, frame::HEADER_SIZE + 4] {
            let (mut tx, rx) = duplex(64);
            let mut reader = FrameReader::new(rx);
            tx.write_all(&encoded[..cut]).await.unwrap();
            drop(tx);
            assert!(reader.read_frame().await.is_err(), "cut at {cut}");
        }
    }

    #[tokio::test]
    async fn clean_close_reads_as_none() {
        let (tx, rx) = duplex(64);
        let mut reader = FrameReader::new(rx);
        drop(tx);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_stream_roundtrip_with_progress() {
        let payload: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let (tx, rx) = duplex(1024);
        let mut writer = FrameWriter::new(tx);
        let mut reader = FrameReader::new(rx);

        let data = payload.clone();
        let sender = tokio::spawn(async move {
            let mut src = &data[..];
            let size = data.len() as u64;
            writer.write_file(&mut src, size, |_, _| {}).await.unwrap();
        });

        let mut out = Vec::new();
        let mut last = 0;
        let n = reader
            .read_file(&mut out, |done, total| {
                assert!(done <= total);
                last = done;
            })
            .await
            .unwrap();
        sender.await.unwrap();

        assert_eq!(n, payload.len() as u64);
        assert_eq!(out, payload);
        assert_eq!(last, payload.len() as u64);
    }

    #[tokio::test]
    async fn aborted_file_stream_fails_the_receiver() {
        let (tx, rx) = duplex(64);
        let mut writer = FrameWriter::new(tx);
        let mut reader = FrameReader::new(rx);
        writer.abort_file().await.unwrap();
        let mut out = Vec::new();
        assert!(reader.read_file(&mut out, |_, _| {}).await.is_err());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn leftover_bytes_seed_the_following_file_header() {
        let (mut tx, rx) = duplex(4096);
        let mut reader = FrameReader::new(rx);

        let mut wire = Frame::encode(b"PASS", Attr::DYNAMIC).unwrap().to_vec();
        wire.extend_from_slice(&frame::encode_file_header(5).unwrap());
        wire.extend_from_slice(b"bytes");
        tx.write_all(&wire).await.unwrap();

        let token = reader.expect_token().await.unwrap();
        assert!(token.is_pass());
        let mut out = Vec::new();
        let n = reader.read_file(&mut out, |_, _| {}).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(out, b"bytes");
    }
}
