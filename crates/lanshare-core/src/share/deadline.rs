//! 连接级超时
//!
//! hyper 只能限制请求头的读取时间。响应写到一个不再读取的客户端时，
//! 写操作会一直挂起；keep-alive 连接也可能无限期地空闲。
//! [`DeadlineIo`] 包装底层连接，补上这两种限制：
//!
//! - **写超时**: 单次写（或 flush）持续挂起超过 `write` 即返回 `TimedOut`
//! - **空闲超时**: 超过 `idle` 没有任何字节收发，挂起的读返回 `TimedOut`

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep, sleep};

pub(crate) struct DeadlineIo<S> {
    inner: S,
    write_timeout: Duration,
    idle_timeout: Duration,
    /// 仅在写挂起期间存在
    write_deadline: Option<Pin<Box<Sleep>>>,
    idle_deadline: Pin<Box<Sleep>>,
}

impl<S> DeadlineIo<S> {
    pub(crate) fn new(inner: S, write_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            inner,
            write_timeout,
            idle_timeout,
            write_deadline: None,
            idle_deadline: Box::pin(sleep(idle_timeout)),
        }
    }

    fn touch(&mut self) {
        let next = Instant::now() + self.idle_timeout;
        self.idle_deadline.as_mut().reset(next);
    }

    fn finish_write<T>(
        &mut self,
        cx: &mut Context<'_>,
        poll: Poll<io::Result<T>>,
    ) -> Poll<io::Result<T>> {
        match poll {
            Poll::Ready(result) => {
                self.write_deadline = None;
                if result.is_ok() {
                    self.touch();
                }
                Poll::Ready(result)
            }
            Poll::Pending => {
                let timeout = self.write_timeout;
                let deadline = self
                    .write_deadline
                    .get_or_insert_with(|| Box::pin(sleep(timeout)));
                if deadline.as_mut().poll(cx).is_ready() {
                    self.write_deadline = None;
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("write stalled for {}s", timeout.as_secs_f32()),
                    )));
                }
                Poll::Pending
            }
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for DeadlineIo<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                if buf.filled().len() > before {
                    this.touch();
                }
                Poll::Ready(result)
            }
            Poll::Pending => {
                if this.idle_deadline.as_mut().poll(cx).is_ready() {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connection idle for {}s", this.idle_timeout.as_secs_f32()),
                    )));
                }
                Poll::Pending
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DeadlineIo<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        this.finish_write(cx, poll)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        this.finish_write(cx, poll)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        this.finish_write(cx, poll)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const WRITE: Duration = Duration::from_secs(30);
    const IDLE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_times_out() {
        // 对端从不读取，缓冲区写满后写操作挂起
        let (near, _far) = tokio::io::duplex(64);
        let mut io = DeadlineIo::new(near, WRITE, IDLE);

        let start = Instant::now();
        let err = io.write_all(&[0u8; 1024]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(start.elapsed() >= WRITE);
        assert!(start.elapsed() < IDLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_reader_keeps_write_alive() {
        let (near, mut far) = tokio::io::duplex(64);
        let mut io = DeadlineIo::new(near, WRITE, IDLE);

        // 每 20 秒读走一块，每次写挂起都短于写超时
        let reader = tokio::spawn(async move {
            let mut total = 0;
            let mut buf = [0u8; 64];
            while total < 256 {
                tokio::time::sleep(Duration::from_secs(20)).await;
                total += far.read(&mut buf).await.unwrap();
            }
            total
        });

        io.write_all(&[0u8; 256]).await.unwrap();
        assert!(reader.await.unwrap() >= 256);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_read_times_out() {
        let (near, _far) = tokio::io::duplex(64);
        let mut io = DeadlineIo::new(near, WRITE, IDLE);

        let start = Instant::now();
        let mut buf = [0u8; 8];
        let err = io.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(start.elapsed() >= IDLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_traffic_resets_idle_deadline() {
        let (near, mut far) = tokio::io::duplex(64);
        let mut io = DeadlineIo::new(near, WRITE, IDLE);

        let start = Instant::now();
        tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_secs(40)).await;
                far.write_all(b"x").await.unwrap();
            }
            // 保持连接打开
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let mut buf = [0u8; 1];
        for _ in 0..3 {
            assert_eq!(io.read(&mut buf).await.unwrap(), 1);
        }
        assert!(start.elapsed() >= Duration::from_secs(120));

        let err = io.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
